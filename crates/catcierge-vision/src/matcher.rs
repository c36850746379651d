//! Enum dispatch over the two matcher strategies.

use crate::error::MatcherError;
use crate::haar::HaarMatcher;
use crate::obstruct::{self, ObstructionWindow};
use crate::template::TemplateMatcher;
use catcierge_core::{MatchDirection, MatchGroup, MatchResult, MATCH_MAX_COUNT};
use image::GrayImage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatcherKind {
    Template,
    Haar,
}

/// The frame classifier. Exactly one strategy is active per run.
pub enum Matcher {
    Template(TemplateMatcher),
    Haar(HaarMatcher),
}

impl Matcher {
    pub fn kind(&self) -> MatcherKind {
        match self {
            Matcher::Template(_) => MatcherKind::Template,
            Matcher::Haar(_) => MatcherKind::Haar,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Matcher::Template(_) => "Template",
            Matcher::Haar(_) => "Haar Cascade",
        }
    }

    pub fn short_name(&self) -> &'static str {
        match self {
            Matcher::Template(_) => "template",
            Matcher::Haar(_) => "haar",
        }
    }

    /// Score a single frame. An `Err` is an internal failure, not a
    /// classification; the caller drops the frame and carries on.
    pub fn match_frame(
        &self,
        frame: &GrayImage,
        save_steps: bool,
    ) -> Result<MatchResult, MatcherError> {
        match self {
            Matcher::Template(m) => m.match_frame(frame, save_steps),
            Matcher::Haar(m) => m.match_frame(frame, save_steps),
        }
    }

    /// Final say over a completed group. A veto sets
    /// `group.final_decision` and fills `group.description`.
    pub fn decide(&self, group: &mut MatchGroup) -> bool {
        match self {
            Matcher::Template(m) => m.decide(group),
            Matcher::Haar(m) => m.decide(group),
        }
    }

    /// Matcher-specific template variables.
    pub fn translate(&self, var: &str) -> Option<String> {
        match self {
            Matcher::Template(m) => m.translate(var),
            Matcher::Haar(m) => m.translate(var),
        }
    }

    /// Is the backlight centre occluded? Matchers may replace this;
    /// both strategies currently use the shared detector.
    pub fn is_obstructed(&self, frame: &GrayImage) -> bool {
        obstruct::is_obstructed(frame, &ObstructionWindow::default())
    }

    /// Infer the direction of a whole group from its per-frame results.
    ///
    /// The template matcher rarely disagrees with itself, so any
    /// successful frame's direction wins. The Haar matcher votes.
    pub fn overall_direction(&self, group: &MatchGroup) -> MatchDirection {
        match self {
            Matcher::Template(_) => {
                let mut direction = MatchDirection::Unknown;
                for m in group.matches() {
                    if m.result.success {
                        direction = m.result.direction;
                    }
                }
                direction
            }
            Matcher::Haar(_) => {
                let mut in_count = 0usize;
                let mut out_count = 0usize;
                let mut unknown_count = 0usize;

                for m in group.matches() {
                    match m.result.direction {
                        MatchDirection::In => in_count += 1,
                        MatchDirection::Out => out_count += 1,
                        MatchDirection::Unknown => unknown_count += 1,
                    }
                }

                // Ties break in, then out, then unknown.
                debug_assert!(in_count + out_count + unknown_count <= MATCH_MAX_COUNT);
                if in_count > out_count && in_count > unknown_count {
                    MatchDirection::In
                } else if out_count > unknown_count {
                    MatchDirection::Out
                } else {
                    MatchDirection::Unknown
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::haar::cascade::Cascade;
    use crate::haar::HaarMatcherArgs;
    use catcierge_core::MatchState;
    use chrono::Local;
    use image::Luma;

    fn haar_matcher() -> Matcher {
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
        Matcher::Haar(HaarMatcher::with_cascade(
            HaarMatcherArgs::default(),
            Cascade::from_str(xml).unwrap(),
        ))
    }

    fn group_with_directions(dirs: &[(MatchDirection, bool)]) -> MatchGroup {
        let frame = GrayImage::from_pixel(8, 8, Luma([0]));
        let mut group = MatchGroup::new();
        group.start(&frame, Local::now());
        for (dir, success) in dirs {
            let result = MatchResult {
                direction: *dir,
                success: *success,
                ..Default::default()
            };
            group.push(MatchState::new(result, &frame, Local::now()));
        }
        group
    }

    #[test]
    fn test_haar_majority_vote() {
        let matcher = haar_matcher();

        let group = group_with_directions(&[
            (MatchDirection::In, true),
            (MatchDirection::In, true),
            (MatchDirection::Out, true),
            (MatchDirection::Unknown, true),
        ]);
        assert_eq!(matcher.overall_direction(&group), MatchDirection::In);

        let group = group_with_directions(&[
            (MatchDirection::Out, true),
            (MatchDirection::Out, true),
            (MatchDirection::In, true),
            (MatchDirection::Unknown, true),
        ]);
        assert_eq!(matcher.overall_direction(&group), MatchDirection::Out);

        let group = group_with_directions(&[
            (MatchDirection::Unknown, true),
            (MatchDirection::Unknown, true),
            (MatchDirection::Unknown, true),
            (MatchDirection::In, true),
        ]);
        assert_eq!(matcher.overall_direction(&group), MatchDirection::Unknown);
    }

    #[test]
    fn test_haar_name() {
        let matcher = haar_matcher();
        assert_eq!(matcher.short_name(), "haar");
        assert_eq!(matcher.kind(), MatcherKind::Haar);
    }
}
