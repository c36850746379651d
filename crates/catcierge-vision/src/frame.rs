//! Frame and region-of-interest helpers.
//!
//! Frames are single-channel [`GrayImage`] buffers. The ROI is applied as
//! a crop right after acquisition, so everything downstream (obstruction
//! test, matchers) only ever sees the cropped view.

use crate::error::VisionError;
use image::GrayImage;
use std::path::Path;

/// A region of interest in frame coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Roi {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Roi {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

/// Crop a frame to the ROI, clamped to the frame bounds.
pub fn crop(frame: &GrayImage, roi: &Roi) -> GrayImage {
    if roi.is_empty() {
        return frame.clone();
    }

    let x = roi.x.min(frame.width().saturating_sub(1));
    let y = roi.y.min(frame.height().saturating_sub(1));
    let w = roi.width.min(frame.width() - x);
    let h = roi.height.min(frame.height() - y);

    image::imageops::crop_imm(frame, x, y, w, h).to_image()
}

/// Load an image from disk as greyscale.
pub fn load_gray(path: &Path) -> Result<GrayImage, VisionError> {
    let img = image::open(path).map_err(|source| VisionError::ImageLoad {
        path: path.to_path_buf(),
        source,
    })?;

    Ok(img.into_luma8())
}
