//! Backlight auto-ROI search.
//!
//! During startup the largest bright connected component is located; its
//! bounding rectangle becomes the region of interest for the rest of the
//! run. A backlight below the minimum area refuses to start, since it
//! usually means the light is off or the camera is pointed wrong.

use crate::contours::contours_with_areas;
use crate::error::VisionError;
use crate::frame::Roi;
use image::{GrayImage, Luma, RgbImage};
use imageproc::contrast::{threshold, ThresholdType};
use imageproc::point::Point;
use tracing::info;

/// Default greyscale threshold for what counts as backlight.
pub const DEFAULT_AUTO_ROI_THRESHOLD: u8 = 90;

/// Default minimum backlight area in pixels.
pub const DEFAULT_MIN_BACKLIGHT: u32 = 10_000;

/// Locate the backlight and return its bounding rectangle together with
/// the traced contour (the contour is only used for the saved
/// visualisation).
pub fn find_backlight(
    frame: &GrayImage,
    thr: u8,
    min_area: u32,
) -> Result<(Roi, Vec<Point<i32>>), VisionError> {
    let bin = threshold(frame, thr, ThresholdType::Binary);

    let best = contours_with_areas(&bin)
        .into_iter()
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .ok_or(VisionError::BacklightNotFound)?;

    let (points, area) = best;

    if area < min_area as f64 {
        return Err(VisionError::BacklightTooSmall {
            area,
            min: min_area,
        });
    }

    info!(
        area,
        min_area, "back light found with area greater than the minimum"
    );

    let min_x = points.iter().map(|p| p.x).min().unwrap_or(0).max(0) as u32;
    let min_y = points.iter().map(|p| p.y).min().unwrap_or(0).max(0) as u32;
    let max_x = points.iter().map(|p| p.x).max().unwrap_or(0).max(0) as u32;
    let max_y = points.iter().map(|p| p.y).max().unwrap_or(0).max(0) as u32;

    let roi = Roi::new(min_x, min_y, max_x - min_x + 1, max_y - min_y + 1);

    Ok((roi, points))
}

/// Render the detected backlight for `--save_auto_roi`.
pub fn draw_auto_roi(frame: &GrayImage, roi: &Roi, contour: &[Point<i32>]) -> RgbImage {
    let mut out = image::DynamicImage::ImageLuma8(frame.clone()).into_rgb8();

    for p in contour {
        if p.x >= 0 && p.y >= 0 && (p.x as u32) < out.width() && (p.y as u32) < out.height() {
            out.put_pixel(p.x as u32, p.y as u32, image::Rgb([255, 255, 255]));
        }
    }

    let rect = imageproc::rect::Rect::at(roi.x as i32, roi.y as i32).of_size(roi.width, roi.height);
    imageproc::drawing::draw_hollow_rect_mut(&mut out, rect, image::Rgb([255, 0, 0]));

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_with_light(x0: u32, y0: u32, w: u32, h: u32) -> GrayImage {
        let mut img = GrayImage::from_pixel(320, 240, Luma([20]));
        for y in y0..y0 + h {
            for x in x0..x0 + w {
                img.put_pixel(x, y, Luma([250]));
            }
        }
        img
    }

    #[test]
    fn test_finds_big_backlight() {
        let frame = frame_with_light(40, 60, 200, 120);
        let (roi, _) = find_backlight(&frame, DEFAULT_AUTO_ROI_THRESHOLD, 10_000).unwrap();

        // Bounding box must tightly cover the bright area.
        assert!(roi.x >= 39 && roi.x <= 41);
        assert!(roi.y >= 59 && roi.y <= 61);
        assert!(roi.width >= 198 && roi.width <= 202);
        assert!(roi.height >= 118 && roi.height <= 122);
    }

    #[test]
    fn test_too_small_backlight_is_rejected() {
        let frame = frame_with_light(10, 10, 20, 20);
        let err = find_backlight(&frame, DEFAULT_AUTO_ROI_THRESHOLD, 10_000).unwrap_err();
        assert!(matches!(err, VisionError::BacklightTooSmall { .. }));
    }

    #[test]
    fn test_dark_frame_has_no_backlight() {
        let frame = GrayImage::from_pixel(320, 240, Luma([5]));
        let err = find_backlight(&frame, DEFAULT_AUTO_ROI_THRESHOLD, 10_000).unwrap_err();
        assert!(matches!(err, VisionError::BacklightNotFound));
    }

    #[test]
    fn test_biggest_component_wins() {
        let mut frame = frame_with_light(10, 10, 250, 150);
        // A smaller second light.
        for y in 200..230 {
            for x in 280..310 {
                frame.put_pixel(x, y, Luma([250]));
            }
        }

        let (roi, _) = find_backlight(&frame, DEFAULT_AUTO_ROI_THRESHOLD, 1_000).unwrap();
        assert!(roi.x < 20);
        assert!(roi.width > 200);
    }
}
