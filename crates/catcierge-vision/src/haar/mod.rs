//! Haar cascade matcher.
//!
//! Detects the cat head with a trained cascade, then searches a cropped
//! region below the head for prey contours. Going out skips the prey
//! search entirely.

pub mod cascade;

use crate::contours::count_significant_contours;
use crate::error::MatcherError;
use crate::morph;
use catcierge_core::{MatchDirection, MatchGroup, MatchResult, Rect, MAX_MATCH_RECTS};
use cascade::{Cascade, DetectParams};
use image::{DynamicImage, GrayImage};
use imageproc::contrast::{equalize_histogram, otsu_level, threshold, ThresholdType};
use imageproc::filter::gaussian_blur_f32;
use std::path::PathBuf;
use tracing::debug;

/// Head found, prey found: the match failed.
pub const HAAR_FAIL: f64 = 0.0;
/// Head found, no prey.
pub const HAAR_SUCCESS: f64 = 1.0;
/// No head found, still counted as a success.
pub const HAAR_SUCCESS_NO_HEAD: f64 = 2.0;
/// Head found while `no_match_is_fail` makes headless frames fail.
pub const HAAR_SUCCESS_NO_HEAD_IS_FAIL: f64 = 3.0;

/// How far the prey region is widened towards the exit side.
const ROI_EXTEND: i32 = 30;

/// Which side of the frame is "inside the house".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InDirection {
    Left,
    #[default]
    Right,
}

impl InDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            InDirection::Left => "left",
            InDirection::Right => "right",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PreyMethod {
    #[default]
    Adaptive,
    Normal,
}

impl PreyMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PreyMethod::Adaptive => "adaptive",
            PreyMethod::Normal => "normal",
        }
    }
}

#[derive(Debug, Clone)]
pub struct HaarMatcherArgs {
    pub cascade: PathBuf,
    pub in_direction: InDirection,
    pub min_width: u32,
    pub min_height: u32,
    pub eq_histogram: bool,
    pub no_match_is_fail: bool,
    pub prey_method: PreyMethod,
    pub prey_steps: u8,
}

impl Default for HaarMatcherArgs {
    fn default() -> Self {
        Self {
            cascade: PathBuf::new(),
            in_direction: InDirection::Right,
            min_width: 80,
            min_height: 80,
            eq_histogram: false,
            no_match_is_fail: false,
            prey_method: PreyMethod::Adaptive,
            prey_steps: 2,
        }
    }
}

pub struct HaarMatcher {
    args: HaarMatcherArgs,
    cascade: Cascade,
}

/// Crop a rect out of a frame, clamped to the frame bounds.
fn crop_rect(img: &GrayImage, rect: &Rect) -> GrayImage {
    let x = rect.x.max(0) as u32;
    let y = rect.y.max(0) as u32;
    let x = x.min(img.width().saturating_sub(1));
    let y = y.min(img.height().saturating_sub(1));
    let w = rect.width.min(img.width() - x).max(1);
    let h = rect.height.min(img.height() - y).max(1);
    image::imageops::crop_imm(img, x, y, w, h).to_image()
}

/// Inverse gaussian-weighted adaptive threshold. Brings out small
/// details such as a mouse tail that fades into the background during a
/// global threshold.
fn adaptive_threshold_inv(img: &GrayImage, sigma: f32, c: i16) -> GrayImage {
    let blurred = gaussian_blur_f32(img, sigma);
    GrayImage::from_fn(img.width(), img.height(), |x, y| {
        let v = img.get_pixel(x, y).0[0] as i16;
        let mean = blurred.get_pixel(x, y).0[0] as i16;
        image::Luma([if v <= mean - c { 255 } else { 0 }])
    })
}

impl HaarMatcher {
    pub fn new(args: HaarMatcherArgs) -> Result<Self, MatcherError> {
        let cascade = Cascade::from_file(&args.cascade)?;
        Ok(Self { args, cascade })
    }

    /// Test hook: build from an already parsed cascade.
    pub fn with_cascade(args: HaarMatcherArgs, cascade: Cascade) -> Self {
        Self { args, cascade }
    }

    pub fn args(&self) -> &HaarMatcherArgs {
        &self.args
    }

    /// Limit the prey region to the lower half of the head box and widen
    /// it towards the outside so big mice still get white on both sides.
    fn prey_roi(&self, head: &Rect) -> Rect {
        let mut roi = *head;
        roi.height /= 2;
        roi.y += roi.height as i32;

        roi.width += ROI_EXTEND as u32;
        roi.x += match self.args.in_direction {
            InDirection::Right => -ROI_EXTEND,
            InDirection::Left => ROI_EXTEND,
        };
        if roi.x < 0 {
            roi.x = 0;
        }

        roi
    }

    /// Decide the motion sense from the outermost columns of the
    /// thresholded prey region: the side with more white pixels is the
    /// side the animal has not yet covered.
    fn guess_direction(&self, thr: &GrayImage, inverted: bool) -> MatchDirection {
        let h = thr.height();
        let left_sum: u32 = (0..h).map(|y| thr.get_pixel(0, y).0[0] as u32).sum();
        let right_sum: u32 = (0..h)
            .map(|y| thr.get_pixel(thr.width() - 1, y).0[0] as u32)
            .sum();

        if left_sum.abs_diff(right_sum) <= 25 {
            return MatchDirection::Unknown;
        }

        debug!(left_sum, right_sum, "direction column sums");

        let going_right = right_sum > left_sum;
        let dir = match (going_right, self.args.in_direction) {
            (true, InDirection::Right) | (false, InDirection::Left) => MatchDirection::In,
            _ => MatchDirection::Out,
        };

        if inverted {
            match dir {
                MatchDirection::In => MatchDirection::Out,
                MatchDirection::Out => MatchDirection::In,
                MatchDirection::Unknown => MatchDirection::Unknown,
            }
        } else {
            dir
        }
    }

    fn find_prey_adaptive(
        &self,
        roi_img: &GrayImage,
        inv_thr: &GrayImage,
        result: &mut MatchResult,
        save_steps: bool,
    ) -> bool {
        // An inverted adaptive threshold of the region as well; combined
        // with the inverted global threshold it keeps thin prey parts.
        let adp = adaptive_threshold_inv(roi_img, 2.0, 5);
        if save_steps {
            result.add_step(
                "adp_thresh",
                "Inverted adaptive threshold",
                DynamicImage::ImageLuma8(adp.clone()),
            );
        }

        let combined = morph::combine_max(inv_thr, &adp);
        if save_steps {
            result.add_step(
                "inv_combined",
                "Combined global and adaptive threshold",
                DynamicImage::ImageLuma8(combined.clone()),
            );
        }

        let opened = morph::open(&combined, 2, 2, 2);
        if save_steps {
            result.add_step(
                "opened",
                "Opened image",
                DynamicImage::ImageLuma8(opened.clone()),
            );
        }

        let mut dilated = morph::dilate(&opened, 3, 3, 3);
        if save_steps {
            result.add_step(
                "dilated",
                "Dilated image",
                DynamicImage::ImageLuma8(dilated.clone()),
            );
        }

        // Back to white background before counting.
        morph::invert(&mut dilated);
        if save_steps {
            result.add_step(
                "combined",
                "Combined binary image",
                DynamicImage::ImageLuma8(dilated.clone()),
            );
        }

        let contour_count = count_significant_contours(&dilated);
        debug!(contour_count, "adaptive prey contours");

        contour_count > 1
    }

    fn find_prey_normal(&self, thr: &GrayImage) -> bool {
        let mut contour_count = count_significant_contours(thr);

        // A single contour may still hide prey overlapping the cat
        // profile; a second, more aggressive pass splits those.
        if self.args.prey_steps >= 2 && contour_count == 1 {
            let eroded = morph::erode(thr, 3, 3, 3);
            let opened = morph::open(&eroded, 5, 1, 1);
            contour_count = count_significant_contours(&opened);
        }

        debug!(contour_count, "normal prey contours");

        contour_count > 1
    }

    pub fn match_frame(
        &self,
        frame: &GrayImage,
        save_steps: bool,
    ) -> Result<MatchResult, MatcherError> {
        let mut result = MatchResult::default();

        let img_eq = if self.args.eq_histogram {
            equalize_histogram(frame)
        } else {
            frame.clone()
        };

        if save_steps {
            result.add_step(
                "gray",
                "Grayscale original",
                DynamicImage::ImageLuma8(img_eq.clone()),
            );
        }

        let mut rects = self.cascade.detect(
            &img_eq,
            &DetectParams {
                min_size: (self.args.min_width, self.args.min_height),
                ..Default::default()
            },
        );
        rects.truncate(MAX_MATCH_RECTS);

        let head_found = !rects.is_empty();
        result.match_rects = rects;

        // Even a frame with no head counts as a success by default. Only
        // found prey fails, unless no_match_is_fail is set.
        let mut score = if self.args.no_match_is_fail {
            if head_found {
                HAAR_SUCCESS_NO_HEAD_IS_FAIL
            } else {
                HAAR_FAIL
            }
        } else {
            HAAR_SUCCESS_NO_HEAD
        };

        if head_found {
            let head = result.match_rects[0];

            if save_steps {
                result.add_step(
                    "haar_roi",
                    "Haar match",
                    DynamicImage::ImageLuma8(crop_rect(&img_eq, &head)),
                );
            }

            let roi = self.prey_roi(&head);
            let roi_img = crop_rect(&img_eq, &roi);

            if save_steps {
                result.add_step(
                    "roi",
                    "Cropped region of interest",
                    DynamicImage::ImageLuma8(roi_img.clone()),
                );
            }

            let (thr_type, inverted) = match self.args.prey_method {
                PreyMethod::Adaptive => (ThresholdType::BinaryInverted, true),
                PreyMethod::Normal => (ThresholdType::Binary, false),
            };

            let level = otsu_level(&roi_img);
            let thr_img = threshold(&roi_img, level, thr_type);

            if save_steps {
                result.add_step(
                    "thresh",
                    "Global thresholded binary image",
                    DynamicImage::ImageLuma8(thr_img.clone()),
                );
            }

            result.direction = self.guess_direction(&thr_img, inverted);

            if result.direction == MatchDirection::Out {
                // Don't bother looking for prey when the cat is leaving.
                result.description = "Skipped prey detection when going out".to_string();
            } else {
                let prey = match self.args.prey_method {
                    PreyMethod::Adaptive => {
                        self.find_prey_adaptive(&roi_img, &thr_img, &mut result, save_steps)
                    }
                    PreyMethod::Normal => self.find_prey_normal(&thr_img),
                };

                if prey {
                    score = HAAR_FAIL;
                    result.description = "Prey detected".to_string();
                } else {
                    score = HAAR_SUCCESS;
                    result.description = "No prey detected".to_string();
                }

                if save_steps {
                    let mut final_img = DynamicImage::ImageLuma8(img_eq.clone()).into_rgb8();
                    let color = if prey {
                        image::Rgb([255, 0, 0])
                    } else {
                        image::Rgb([0, 255, 0])
                    };
                    let draw = imageproc::rect::Rect::at(head.x, head.y)
                        .of_size(head.width.max(1), head.height.max(1));
                    imageproc::drawing::draw_hollow_rect_mut(&mut final_img, draw, color);
                    result.add_step("final", "Final image", DynamicImage::ImageRgb8(final_img));
                }
            }
        } else {
            result.description = if score == HAAR_FAIL {
                "Fail No cat head detected".to_string()
            } else {
                "No cat head detected".to_string()
            };
        }

        result.score = score;
        result.success = score > 0.0;

        Ok(result)
    }

    /// Veto the tally when no frame in the group ever showed a head.
    pub fn decide(&self, group: &mut MatchGroup) -> bool {
        let no_head_count = group
            .matches()
            .iter()
            .filter(|m| m.result.score == HAAR_SUCCESS_NO_HEAD)
            .count();

        if !group.matches().is_empty() && no_head_count == group.match_count() {
            group.description = "No head found in any image".to_string();
            group.final_decision = true;
            return false;
        }

        group.success
    }

    pub fn translate(&self, var: &str) -> Option<String> {
        match var {
            "cascade" => Some(self.args.cascade.display().to_string()),
            "in_direction" => Some(self.args.in_direction.as_str().to_string()),
            "min_size" => Some(format!("{}x{}", self.args.min_width, self.args.min_height)),
            "min_size_width" => Some(self.args.min_width.to_string()),
            "min_size_height" => Some(self.args.min_height.to_string()),
            "no_match_is_fail" => {
                Some(if self.args.no_match_is_fail { "1" } else { "0" }.to_string())
            }
            "eq_histogram" => Some(if self.args.eq_histogram { "1" } else { "0" }.to_string()),
            "prey_method" => Some(self.args.prey_method.as_str().to_string()),
            "prey_steps" => Some(self.args.prey_steps.to_string()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use catcierge_core::MatchState;
    use chrono::Local;
    use image::Luma;

    fn never_match_cascade() -> Cascade {
        let xml = r#"<?xml version="1.0"?>
<opencv_storage>
<cascade type_id="opencv-cascade-classifier">
  <stageType>BOOST</stageType>
  <featureType>HAAR</featureType>
  <height>8</height>
  <width>8</width>
  <stages>
    <_>
      <stageThreshold>0.5</stageThreshold>
      <weakClassifiers>
        <_>
          <internalNodes>0 -1 0 -1.0e+09</internalNodes>
          <leafValues>-1.0 -1.0</leafValues>
        </_>
      </weakClassifiers>
    </_>
  </stages>
  <features>
    <_>
      <rects>
        <_>0 0 8 8 1.</_>
      </rects>
      <tilted>0</tilted>
    </_>
  </features>
</cascade>
</opencv_storage>
"#;
        Cascade::from_str(xml).unwrap()
    }

    fn frame() -> GrayImage {
        GrayImage::from_fn(320, 240, |x, y| Luma([((x * 3 + y * 5) % 251) as u8]))
    }

    #[test]
    fn test_no_head_soft_success() {
        let matcher = HaarMatcher::with_cascade(HaarMatcherArgs::default(), never_match_cascade());
        let result = matcher.match_frame(&frame(), false).unwrap();
        assert_eq!(result.score, HAAR_SUCCESS_NO_HEAD);
        assert!(result.success);
        assert_eq!(result.description, "No cat head detected");
    }

    #[test]
    fn test_no_head_is_fail() {
        let matcher = HaarMatcher::with_cascade(
            HaarMatcherArgs {
                no_match_is_fail: true,
                ..Default::default()
            },
            never_match_cascade(),
        );
        let result = matcher.match_frame(&frame(), false).unwrap();
        assert_eq!(result.score, HAAR_FAIL);
        assert!(!result.success);
        assert_eq!(result.description, "Fail No cat head detected");
    }

    #[test]
    fn test_decide_vetoes_headless_group() {
        let matcher = HaarMatcher::with_cascade(HaarMatcherArgs::default(), never_match_cascade());
        let f = frame();

        let mut group = MatchGroup::new();
        group.start(&f, Local::now());
        for _ in 0..4 {
            let result = matcher.match_frame(&f, false).unwrap();
            group.push(MatchState::new(result, &f, Local::now()));
        }

        group.success_count = group.tally_success();
        group.success = true; // per-frame rule says success

        let decided = matcher.decide(&mut group);
        assert!(!decided);
        assert!(group.final_decision);
        assert_eq!(group.description, "No head found in any image");
    }

    #[test]
    fn test_decide_keeps_mixed_group() {
        let matcher = HaarMatcher::with_cascade(HaarMatcherArgs::default(), never_match_cascade());
        let f = frame();

        let mut group = MatchGroup::new();
        group.start(&f, Local::now());
        for i in 0..4 {
            let mut result = matcher.match_frame(&f, false).unwrap();
            if i == 0 {
                // One frame with an actual head + no prey.
                result.score = HAAR_SUCCESS;
            }
            group.push(MatchState::new(result, &f, Local::now()));
        }

        group.success = true;
        assert!(matcher.decide(&mut group));
        assert!(!group.final_decision);
    }

    #[test]
    fn test_prey_roi_widens_towards_exit() {
        let matcher = HaarMatcher::with_cascade(
            HaarMatcherArgs {
                in_direction: InDirection::Right,
                ..Default::default()
            },
            never_match_cascade(),
        );

        let head = Rect::new(100, 50, 80, 80);
        let roi = matcher.prey_roi(&head);
        assert_eq!(roi.height, 40);
        assert_eq!(roi.y, 90);
        assert_eq!(roi.width, 110);
        // In = right means the exit is to the left.
        assert_eq!(roi.x, 70);
    }

    #[test]
    fn test_prey_roi_clamps_x() {
        let matcher = HaarMatcher::with_cascade(HaarMatcherArgs::default(), never_match_cascade());
        let head = Rect::new(10, 50, 80, 80);
        let roi = matcher.prey_roi(&head);
        assert_eq!(roi.x, 0);
    }

    #[test]
    fn test_direction_heuristic() {
        let matcher = HaarMatcher::with_cascade(
            HaarMatcherArgs {
                in_direction: InDirection::Right,
                ..Default::default()
            },
            never_match_cascade(),
        );

        // White on the right column only: animal is on the left, moving
        // right. Not inverted: going right = in for in_direction right.
        let mut img = GrayImage::new(20, 10);
        for y in 0..10 {
            img.put_pixel(19, y, Luma([255]));
        }
        assert_eq!(matcher.guess_direction(&img, false), MatchDirection::In);
        assert_eq!(matcher.guess_direction(&img, true), MatchDirection::Out);

        // Balanced columns: unknown.
        let balanced = GrayImage::new(20, 10);
        assert_eq!(
            matcher.guess_direction(&balanced, false),
            MatchDirection::Unknown
        );
    }

    #[test]
    fn test_adaptive_threshold_picks_out_detail() {
        // A thin dark line on bright background survives the inverse
        // adaptive threshold.
        let mut img = GrayImage::from_pixel(40, 40, Luma([200]));
        for x in 5..35 {
            img.put_pixel(x, 20, Luma([60]));
        }
        let out = adaptive_threshold_inv(&img, 2.0, 5);
        assert_eq!(out.get_pixel(20, 20).0[0], 255);
        assert_eq!(out.get_pixel(20, 5).0[0], 0);
    }

    #[test]
    fn test_translate_vars() {
        let matcher = HaarMatcher::with_cascade(
            HaarMatcherArgs {
                cascade: PathBuf::from("/tmp/cat.xml"),
                ..Default::default()
            },
            never_match_cascade(),
        );

        assert_eq!(matcher.translate("cascade").as_deref(), Some("/tmp/cat.xml"));
        assert_eq!(matcher.translate("in_direction").as_deref(), Some("right"));
        assert_eq!(matcher.translate("min_size").as_deref(), Some("80x80"));
        assert_eq!(matcher.translate("min_size_width").as_deref(), Some("80"));
        assert_eq!(matcher.translate("prey_method").as_deref(), Some("adaptive"));
        assert_eq!(matcher.translate("prey_steps").as_deref(), Some("2"));
        assert!(matcher.translate("bogus").is_none());
    }
}
