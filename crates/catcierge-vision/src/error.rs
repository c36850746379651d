//! Error types for frame classification.

use std::path::PathBuf;
use thiserror::Error;

/// Internal matcher failures. A frame that produces one of these is
/// dropped by the state machine; it is not a classification outcome.
#[derive(Debug, Error)]
pub enum MatcherError {
    #[error("match frame is {got_w}x{got_h}, expected {want_w}x{want_h}")]
    FrameSize {
        got_w: u32,
        got_h: u32,
        want_w: u32,
        want_h: u32,
    },

    #[error("failed to load image {path}: {source}")]
    ImageLoad {
        path: PathBuf,
        source: image::ImageError,
    },

    #[error("no snout images specified")]
    NoSnouts,

    #[error("too many snout images ({count}), at most {max} allowed")]
    TooManySnouts { count: usize, max: usize },

    #[error("snout image {path} ({w}x{h}) is larger than the match frame")]
    SnoutTooLarge { path: PathBuf, w: u32, h: u32 },

    #[error(transparent)]
    Cascade(#[from] haar::cascade::CascadeError),
}

use crate::haar;

/// Errors from the backlight / ROI search.
#[derive(Debug, Error)]
pub enum VisionError {
    #[error("failed to find back light")]
    BacklightNotFound,

    #[error("back light area too small, {area:.0} expecting {min} or bigger")]
    BacklightTooSmall { area: f64, min: u32 },

    #[error("failed to load image {path}: {source}")]
    ImageLoad {
        path: PathBuf,
        source: image::ImageError,
    },
}
