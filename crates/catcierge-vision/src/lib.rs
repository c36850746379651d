//! catcierge-vision: Frame classification for the cat door controller
//!
//! This crate provides:
//! - Frame/ROI handling and the backlight auto-ROI search
//! - The cheap per-frame obstruction test that gates matching
//! - The template (snout correlation) matcher
//! - The Haar cascade matcher with contour-based prey search
//! - Enum dispatch over the two matcher strategies

pub mod backlight;
pub mod contours;
pub mod error;
pub mod frame;
pub mod haar;
pub mod matcher;
pub mod morph;
pub mod obstruct;
pub mod template;

pub use backlight::find_backlight;
pub use error::{MatcherError, VisionError};
pub use frame::{crop, load_gray, Roi};
pub use haar::{HaarMatcher, HaarMatcherArgs, InDirection, PreyMethod};
pub use matcher::{Matcher, MatcherKind};
pub use obstruct::{is_obstructed, ObstructionWindow};
pub use template::{TemplateMatcher, TemplateMatcherArgs};
