//! Snout template matcher.
//!
//! Correlates one or more binary "snout" templates against the frame and
//! averages the peak responses. A flipped pass lets the same snouts match
//! an animal on its way out without counting as a failure.

use crate::error::MatcherError;
use catcierge_core::{MatchDirection, MatchResult, Rect};
use image::GrayImage;
use imageproc::contrast::{threshold, ThresholdType};
use imageproc::template_matching::{find_extremes, match_template, MatchTemplateMethod};
use std::path::PathBuf;

/// Binary threshold applied to both snouts and frames before correlation.
const BINARY_THRESHOLD: u8 = 90;

pub const DEFAULT_MATCH_THRESHOLD: f64 = 0.8;
pub const MAX_SNOUT_COUNT: usize = 24;

#[derive(Debug, Clone)]
pub struct TemplateMatcherArgs {
    pub snout_paths: Vec<PathBuf>,
    pub match_threshold: f64,
    pub match_flipped: bool,
    pub frame_width: u32,
    pub frame_height: u32,
}

impl Default for TemplateMatcherArgs {
    fn default() -> Self {
        Self {
            snout_paths: Vec::new(),
            match_threshold: DEFAULT_MATCH_THRESHOLD,
            match_flipped: true,
            frame_width: 320,
            frame_height: 240,
        }
    }
}

#[derive(Debug)]
pub struct TemplateMatcher {
    args: TemplateMatcherArgs,
    snouts: Vec<GrayImage>,
    flipped_snouts: Vec<GrayImage>,
}

fn prepare(img: &GrayImage) -> GrayImage {
    threshold(img, BINARY_THRESHOLD, ThresholdType::Binary)
}

impl TemplateMatcher {
    pub fn new(args: TemplateMatcherArgs) -> Result<Self, MatcherError> {
        if args.snout_paths.is_empty() {
            return Err(MatcherError::NoSnouts);
        }

        if args.snout_paths.len() > MAX_SNOUT_COUNT {
            return Err(MatcherError::TooManySnouts {
                count: args.snout_paths.len(),
                max: MAX_SNOUT_COUNT,
            });
        }

        let mut snouts = Vec::with_capacity(args.snout_paths.len());
        let mut flipped_snouts = Vec::with_capacity(args.snout_paths.len());

        for path in &args.snout_paths {
            let img = image::open(path)
                .map_err(|source| MatcherError::ImageLoad {
                    path: path.clone(),
                    source,
                })?
                .into_luma8();

            if img.width() > args.frame_width || img.height() > args.frame_height {
                return Err(MatcherError::SnoutTooLarge {
                    path: path.clone(),
                    w: img.width(),
                    h: img.height(),
                });
            }

            let prepared = prepare(&img);
            flipped_snouts.push(image::imageops::flip_horizontal(&prepared));
            snouts.push(prepared);
        }

        Ok(Self {
            args,
            snouts,
            flipped_snouts,
        })
    }

    pub fn args(&self) -> &TemplateMatcherArgs {
        &self.args
    }

    pub fn match_threshold(&self) -> f64 {
        self.args.match_threshold
    }

    /// Run one set of snouts against the prepared frame, returning the
    /// average peak correlation and the peak rectangles.
    fn run_pass(&self, prepared: &GrayImage, snouts: &[GrayImage]) -> (f64, Vec<Rect>) {
        let mut sum = 0.0;
        let mut rects = Vec::with_capacity(snouts.len());

        for snout in snouts {
            let response =
                match_template(prepared, snout, MatchTemplateMethod::CrossCorrelationNormalized);
            let extremes = find_extremes(&response);

            let peak = extremes.max_value as f64;
            // A blank frame yields an all-zero denominator; treat that as
            // no correlation rather than poisoning the average.
            if peak.is_finite() {
                sum += peak;
            }

            let (px, py) = extremes.max_value_location;
            rects.push(Rect::new(
                px as i32,
                py as i32,
                snout.width(),
                snout.height(),
            ));
        }

        (sum / snouts.len() as f64, rects)
    }

    pub fn match_frame(
        &self,
        frame: &GrayImage,
        _save_steps: bool,
    ) -> Result<MatchResult, MatcherError> {
        if frame.width() != self.args.frame_width || frame.height() != self.args.frame_height {
            return Err(MatcherError::FrameSize {
                got_w: frame.width(),
                got_h: frame.height(),
                want_w: self.args.frame_width,
                want_h: self.args.frame_height,
            });
        }

        let prepared = prepare(frame);
        let mut result = MatchResult::default();

        let (mut avg, mut rects) = self.run_pass(&prepared, &self.snouts);
        result.direction = MatchDirection::Unknown;

        if avg >= self.args.match_threshold {
            result.direction = MatchDirection::In;
        } else if self.args.match_flipped {
            // Failed facing in; retry against the mirrored snouts so a
            // cat on its way out still scores.
            let (flipped_avg, flipped_rects) = self.run_pass(&prepared, &self.flipped_snouts);
            avg = flipped_avg;
            rects = flipped_rects;

            if avg >= self.args.match_threshold {
                result.direction = MatchDirection::Out;
            }
        }

        result.score = avg;
        result.match_rects = rects;
        result.success = avg >= self.args.match_threshold;
        result.description = if result.success {
            format!(
                "No prey detected ({:.1} >= {:.1})",
                avg, self.args.match_threshold
            )
        } else {
            format!(
                "Prey detected ({:.1} < {:.1})",
                avg, self.args.match_threshold
            )
        };

        Ok(result)
    }

    /// The template matcher never vetoes the per-frame tally.
    pub fn decide(&self, group: &catcierge_core::MatchGroup) -> bool {
        group.success
    }

    pub fn translate(&self, var: &str) -> Option<String> {
        if var == "snout_count" {
            return Some(self.args.snout_paths.len().to_string());
        }

        if let Some(rest) = var.strip_prefix("snout") {
            if let Ok(idx) = rest.parse::<usize>() {
                return self
                    .args
                    .snout_paths
                    .get(idx.checked_sub(1)?)
                    .map(|p| p.display().to_string());
            }
        }

        match var {
            "threshold" => Some(format!("{:.6}", self.args.match_threshold)),
            "match_flipped" => Some(if self.args.match_flipped { "1" } else { "0" }.to_string()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;
    use std::path::Path;

    /// A frame with a bright "snout" blob on dark background.
    fn synthetic_frame() -> GrayImage {
        let mut img = GrayImage::from_pixel(320, 240, Luma([0]));
        // An asymmetric bright shape.
        for y in 100..140 {
            for x in 120..180 {
                img.put_pixel(x, y, Luma([220]));
            }
        }
        for y in 110..130 {
            for x in 180..200 {
                img.put_pixel(x, y, Luma([220]));
            }
        }
        img
    }

    fn write_snout(dir: &Path, name: &str, img: &GrayImage) -> PathBuf {
        let path = dir.join(name);
        img.save(&path).unwrap();
        path
    }

    fn matcher_with_snout(snout: &GrayImage, flipped: bool) -> (TemplateMatcher, tempfile::TempDir) {
        matcher_with_threshold(snout, flipped, DEFAULT_MATCH_THRESHOLD)
    }

    fn matcher_with_threshold(
        snout: &GrayImage,
        flipped: bool,
        threshold: f64,
    ) -> (TemplateMatcher, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = write_snout(dir.path(), "snout.png", snout);
        let matcher = TemplateMatcher::new(TemplateMatcherArgs {
            snout_paths: vec![path],
            match_flipped: flipped,
            match_threshold: threshold,
            ..Default::default()
        })
        .unwrap();
        (matcher, dir)
    }

    #[test]
    fn test_snout_from_frame_scores_high() {
        let frame = synthetic_frame();
        let snout = image::imageops::crop_imm(&frame, 110, 90, 100, 60).to_image();
        let (matcher, _dir) = matcher_with_snout(&snout, false);

        let result = matcher.match_frame(&frame, false).unwrap();
        assert!(result.success, "score was {}", result.score);
        assert!(result.score > 0.99);
        assert_eq!(result.direction, MatchDirection::In);
        assert_eq!(result.match_rects.len(), 1);
        // Peak should land where the snout was cut out.
        assert!((result.match_rects[0].x - 110).abs() <= 1);
        assert!((result.match_rects[0].y - 90).abs() <= 1);
    }

    #[test]
    fn test_flipped_frame_matches_out() {
        let frame = synthetic_frame();
        let snout = image::imageops::crop_imm(&frame, 110, 90, 100, 60).to_image();
        // A strict threshold: partial windows of the mirrored shape can
        // correlate surprisingly well with the unflipped snout.
        let (matcher, _dir) = matcher_with_threshold(&snout, true, 0.95);

        let mirrored = image::imageops::flip_horizontal(&frame);
        let result = matcher.match_frame(&mirrored, false).unwrap();
        assert!(result.success, "score was {}", result.score);
        assert_eq!(result.direction, MatchDirection::Out);
    }

    #[test]
    fn test_blank_frame_fails() {
        let frame = synthetic_frame();
        let snout = image::imageops::crop_imm(&frame, 110, 90, 100, 60).to_image();
        let (matcher, _dir) = matcher_with_snout(&snout, true);

        let blank = GrayImage::from_pixel(320, 240, Luma([0]));
        let result = matcher.match_frame(&blank, false).unwrap();
        assert!(!result.success);
        assert!(result.score < DEFAULT_MATCH_THRESHOLD);
        assert_eq!(result.direction, MatchDirection::Unknown);
    }

    #[test]
    fn test_wrong_frame_size_is_an_error() {
        let frame = synthetic_frame();
        let snout = image::imageops::crop_imm(&frame, 110, 90, 100, 60).to_image();
        let (matcher, _dir) = matcher_with_snout(&snout, false);

        let small = GrayImage::new(100, 100);
        assert!(matches!(
            matcher.match_frame(&small, false),
            Err(MatcherError::FrameSize { .. })
        ));
    }

    #[test]
    fn test_no_snouts_rejected() {
        let err = TemplateMatcher::new(TemplateMatcherArgs::default()).unwrap_err();
        assert!(matches!(err, MatcherError::NoSnouts));
    }

    #[test]
    fn test_translate_vars() {
        let frame = synthetic_frame();
        let snout = image::imageops::crop_imm(&frame, 110, 90, 100, 60).to_image();
        let (matcher, _dir) = matcher_with_snout(&snout, true);

        assert_eq!(matcher.translate("snout_count").as_deref(), Some("1"));
        assert_eq!(matcher.translate("match_flipped").as_deref(), Some("1"));
        assert!(matcher
            .translate("snout1")
            .is_some_and(|s| s.ends_with("snout.png")));
        assert!(matcher.translate("snout2").is_none());
        assert!(matcher.translate("bogus").is_none());
    }
}
