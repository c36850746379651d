//! Per-frame obstruction test.
//!
//! Decides whether the backlight centre is occluded, which is what flips
//! the state machine from waiting into matching. The test is cheap on
//! purpose since it runs on every frame.

use image::GrayImage;
use imageproc::contrast::{threshold, ThresholdType};

/// Dark pixels darker than this count as occlusion.
const OBSTRUCT_THRESHOLD: u8 = 90;

/// More dark pixels than this in the window means obstructed. Spiders
/// and other one pixel creatures need not bother.
const OBSTRUCT_MIN_PIXELS: u32 = 200;

/// The window the test runs over, as fractions of the frame size,
/// centred. Not user configurable, but kept as a seam.
#[derive(Debug, Clone, Copy)]
pub struct ObstructionWindow {
    pub width_frac: f64,
    pub height_frac: f64,
}

impl Default for ObstructionWindow {
    fn default() -> Self {
        Self {
            width_frac: 0.5,
            height_frac: 0.1,
        }
    }
}

/// Is the centre of the (ROI-cropped) frame occluded?
pub fn is_obstructed(frame: &GrayImage, win: &ObstructionWindow) -> bool {
    let (fw, fh) = frame.dimensions();
    if fw == 0 || fh == 0 {
        return false;
    }

    let w = ((fw as f64 * win.width_frac) as u32).max(1);
    let h = ((fh as f64 * win.height_frac) as u32).max(1);
    let x = (fw - w) / 2;
    let y = (fh - h) / 2;

    let center = image::imageops::crop_imm(frame, x, y, w, h).to_image();
    let inverted = threshold(&center, OBSTRUCT_THRESHOLD, ThresholdType::BinaryInverted);

    let dark = inverted.pixels().filter(|p| p.0[0] != 0).count() as u32;

    dark > OBSTRUCT_MIN_PIXELS
}
