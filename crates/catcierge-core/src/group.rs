//! Match group bookkeeping.
//!
//! A match group is the fixed-size window of per-frame match results a
//! single lock/unlock decision is made over. The state machine owns the
//! group and is the only writer; the template engine reads it on every
//! lifecycle event.

use crate::id::MatchId;
use crate::path::SplitPath;
use crate::timefmt::{self, FILENAME_TIME_FORMAT, TEMPLATE_TIME_FORMAT};
use crate::types::{MatchDirection, Rect, MATCH_MAX_COUNT, MAX_STEPS};
use chrono::{DateTime, Local};
use image::{DynamicImage, GrayImage};

/// One intermediate image out of the matching pipeline.
#[derive(Debug, Clone)]
pub struct MatchStep {
    pub name: &'static str,
    pub description: &'static str,
    pub img: DynamicImage,
    pub path: SplitPath,
}

/// Outcome of matching a single frame.
#[derive(Debug, Clone, Default)]
pub struct MatchResult {
    /// Classification score. Negative means internal failure, not a
    /// classification outcome.
    pub score: f64,
    pub success: bool,
    pub description: String,
    pub match_rects: Vec<Rect>,
    pub direction: MatchDirection,
    pub steps: Vec<MatchStep>,
}

impl MatchResult {
    /// Record a pipeline step image. Steps beyond [`MAX_STEPS`] are dropped.
    pub fn add_step(&mut self, name: &'static str, description: &'static str, img: DynamicImage) {
        if self.steps.len() >= MAX_STEPS {
            return;
        }

        self.steps.push(MatchStep {
            name,
            description,
            img,
            path: SplitPath::default(),
        });
    }
}

/// One slot in a match group: the per-frame result plus the captured
/// frame, its timestamp and its stable id.
#[derive(Debug, Clone, Default)]
pub struct MatchState {
    pub path: SplitPath,
    pub img: Option<GrayImage>,
    pub time: Option<DateTime<Local>>,
    pub time_str: String,
    pub id: Option<MatchId>,
    pub result: MatchResult,
}

impl MatchState {
    pub fn new(result: MatchResult, frame: &GrayImage, time: DateTime<Local>) -> Self {
        let time_str = timefmt::strftime(FILENAME_TIME_FORMAT, &time)
            .unwrap_or_else(|_| time.to_rfc3339());
        let id = MatchId::compute(frame.as_raw(), &time_str);

        Self {
            path: SplitPath::default(),
            img: Some(frame.clone()),
            time: Some(time),
            time_str,
            id: Some(id),
            result,
        }
    }
}

/// The unit of decision making.
#[derive(Debug, Clone, Default)]
pub struct MatchGroup {
    pub id: Option<MatchId>,
    matches: Vec<MatchState>,

    pub success: bool,
    pub success_count: usize,
    /// Set when the matcher overrode the per-frame tally.
    pub final_decision: bool,
    pub description: String,
    pub direction: MatchDirection,

    pub start_time: Option<DateTime<Local>>,
    pub end_time: Option<DateTime<Local>>,

    pub obstruct_img: Option<GrayImage>,
    pub obstruct_path: SplitPath,
    pub obstruct_time: Option<DateTime<Local>>,
}

impl MatchGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin a new group from the frame that triggered matching.
    ///
    /// The group id is the SHA-1 of the obstruct image bytes plus the
    /// formatted group start timestamp.
    pub fn start(&mut self, obstruct_frame: &GrayImage, now: DateTime<Local>) {
        self.matches.clear();
        self.success = false;
        self.success_count = 0;
        self.final_decision = false;
        self.description.clear();
        self.direction = MatchDirection::Unknown;
        self.start_time = Some(now);
        self.end_time = None;

        let time_str =
            timefmt::strftime(TEMPLATE_TIME_FORMAT, &now).unwrap_or_else(|_| now.to_rfc3339());
        self.id = Some(MatchId::compute(obstruct_frame.as_raw(), &time_str));

        self.obstruct_img = Some(obstruct_frame.clone());
        self.obstruct_path.reset();
        self.obstruct_time = Some(now);
    }

    pub fn end(&mut self, now: DateTime<Local>) {
        self.end_time = Some(now);
    }

    pub fn matches(&self) -> &[MatchState] {
        &self.matches
    }

    pub fn matches_mut(&mut self) -> &mut [MatchState] {
        &mut self.matches
    }

    pub fn match_count(&self) -> usize {
        self.matches.len()
    }

    pub fn is_full(&self) -> bool {
        self.matches.len() >= MATCH_MAX_COUNT
    }

    /// Append a match. The group never holds more than
    /// [`MATCH_MAX_COUNT`] entries; pushing into a full group is a bug in
    /// the state machine.
    pub fn push(&mut self, state: MatchState) -> &mut MatchState {
        debug_assert!(!self.is_full());
        self.matches.push(state);
        self.matches.last_mut().unwrap()
    }

    /// Most recently appended match, if any.
    pub fn current(&self) -> Option<&MatchState> {
        self.matches.last()
    }

    /// Number of per-frame successes in the group.
    pub fn tally_success(&self) -> usize {
        self.matches.iter().filter(|m| m.result.success).count()
    }

    /// Drop the captured frames once they have been flushed to disk.
    pub fn release_images(&mut self) {
        for m in &mut self.matches {
            m.img = None;
            for step in &mut m.result.steps {
                step.img = DynamicImage::new_luma8(0, 0);
            }
        }
        self.obstruct_img = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(seed: u8) -> GrayImage {
        GrayImage::from_fn(8, 8, |x, y| image::Luma([seed.wrapping_add((x + y) as u8)]))
    }

    fn result(success: bool) -> MatchResult {
        MatchResult {
            score: if success { 1.0 } else { 0.0 },
            success,
            ..Default::default()
        }
    }

    #[test]
    fn test_start_resets_group() {
        let mut g = MatchGroup::new();
        g.start(&frame(0), Local::now());
        g.push(MatchState::new(result(true), &frame(1), Local::now()));
        g.success = true;
        g.final_decision = true;

        g.start(&frame(2), Local::now());
        assert_eq!(g.match_count(), 0);
        assert!(!g.success);
        assert!(!g.final_decision);
        assert!(g.id.is_some());
        assert!(g.obstruct_img.is_some());
    }

    #[test]
    fn test_tally_counts_successes() {
        let mut g = MatchGroup::new();
        g.start(&frame(0), Local::now());
        for ok in [true, false, true, false] {
            g.push(MatchState::new(result(ok), &frame(3), Local::now()));
        }
        assert_eq!(g.tally_success(), 2);
        assert!(g.is_full());
    }

    #[test]
    fn test_group_id_depends_on_obstruct_frame() {
        let mut a = MatchGroup::new();
        let mut b = MatchGroup::new();
        let now = Local::now();
        a.start(&frame(0), now);
        b.start(&frame(9), now);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_match_state_has_id_and_stamp() {
        let m = MatchState::new(result(true), &frame(0), Local::now());
        assert!(m.id.is_some());
        assert!(!m.time_str.is_empty());
        assert!(m.img.is_some());
    }

    #[test]
    fn test_step_cap() {
        let mut r = MatchResult::default();
        for _ in 0..(MAX_STEPS + 4) {
            r.add_step("s", "step", DynamicImage::new_luma8(1, 1));
        }
        assert_eq!(r.steps.len(), MAX_STEPS);
    }

    #[test]
    fn test_release_images() {
        let mut g = MatchGroup::new();
        g.start(&frame(0), Local::now());
        g.push(MatchState::new(result(true), &frame(1), Local::now()));
        g.release_images();
        assert!(g.obstruct_img.is_none());
        assert!(g.matches()[0].img.is_none());
    }
}
