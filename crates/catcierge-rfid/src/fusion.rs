//! Direction fusion over the reader pair.
//!
//! The first reader to trigger fixes the direction for the current
//! match group: inner first means the animal is heading in, outer first
//! means it is heading out. Once set, the direction never changes for
//! the rest of the group.

use crate::reader::TagEvent;
use catcierge_core::MatchDirection;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderSide {
    Inner,
    Outer,
}

impl ReaderSide {
    pub fn name(&self) -> &'static str {
        match self {
            ReaderSide::Inner => "Inner",
            ReaderSide::Outer => "Outer",
        }
    }

    fn direction(&self) -> MatchDirection {
        match self {
            ReaderSide::Inner => MatchDirection::In,
            ReaderSide::Outer => MatchDirection::Out,
        }
    }
}

/// Latest tag knowledge for one reader.
#[derive(Debug, Clone, Default)]
pub struct RfidMatch {
    pub triggered: bool,
    pub complete: bool,
    pub data: String,
    pub is_allowed: bool,
}

/// Fused state of both readers for the current match group.
#[derive(Debug, Clone, Default)]
pub struct DirectionFusion {
    pub inner: RfidMatch,
    pub outer: RfidMatch,
    pub direction: MatchDirection,
}

impl DirectionFusion {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget everything at the start of a new match group.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn side(&self, side: ReaderSide) -> &RfidMatch {
        match side {
            ReaderSide::Inner => &self.inner,
            ReaderSide::Outer => &self.outer,
        }
    }

    /// Feed one tag event. Returns true when this newly triggered the
    /// reader (the moment a detection event should fire).
    pub fn observe(&mut self, side: ReaderSide, event: &TagEvent, allowed: &[String]) -> bool {
        let current = match side {
            ReaderSide::Inner => &mut self.inner,
            ReaderSide::Outer => &mut self.outer,
        };

        // A longer complete reply always improves on what is stored.
        if event.complete && event.data.len() > current.data.len() {
            current.data = event.data.clone();
            current.complete = true;
            current.is_allowed = allowed.iter().any(|tag| tag == &current.data);
        }

        // Repeat reads must not reverse an already decided direction.
        if current.triggered {
            return false;
        }

        current.triggered = true;
        current.complete = event.complete;
        current.data = event.data.clone();
        current.is_allowed = allowed.iter().any(|tag| tag == &current.data);

        if self.direction == MatchDirection::Unknown {
            self.direction = side.direction();
            info!(
                reader = side.name(),
                direction = self.direction.as_str(),
                "RFID direction fixed"
            );
        }

        true
    }

    /// Should the door lock on this group's tag reads? With both readers
    /// configured a single allowed read is enough to stay open.
    pub fn disallowed(&self, have_inner: bool, have_outer: bool) -> bool {
        match (have_inner, have_outer) {
            (true, true) => !(self.inner.is_allowed || self.outer.is_allowed),
            (true, false) => !self.inner.is_allowed,
            (false, true) => !self.outer.is_allowed,
            (false, false) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag(data: &str, complete: bool) -> TagEvent {
        TagEvent {
            complete,
            data: data.to_string(),
        }
    }

    const ALLOWED: &[String] = &[];

    fn allowed(tags: &[&str]) -> Vec<String> {
        tags.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn test_inner_first_means_in() {
        let mut fusion = DirectionFusion::new();
        assert!(fusion.observe(ReaderSide::Inner, &tag("A1B2", true), ALLOWED));
        assert_eq!(fusion.direction, MatchDirection::In);

        assert!(fusion.observe(ReaderSide::Outer, &tag("A1B2", true), ALLOWED));
        // Second reader never rewrites the direction.
        assert_eq!(fusion.direction, MatchDirection::In);
    }

    #[test]
    fn test_outer_first_means_out() {
        let mut fusion = DirectionFusion::new();
        fusion.observe(ReaderSide::Outer, &tag("A1B2", true), ALLOWED);
        assert_eq!(fusion.direction, MatchDirection::Out);
    }

    #[test]
    fn test_repeat_reads_do_not_retrigger() {
        let mut fusion = DirectionFusion::new();
        assert!(fusion.observe(ReaderSide::Inner, &tag("A1", false), ALLOWED));
        assert!(!fusion.observe(ReaderSide::Inner, &tag("A1", false), ALLOWED));
        assert_eq!(fusion.direction, MatchDirection::In);
    }

    #[test]
    fn test_longer_complete_reply_updates_data() {
        let allowed = allowed(&["999_000000123456"]);
        let mut fusion = DirectionFusion::new();

        fusion.observe(ReaderSide::Inner, &tag("999_0000", false), &allowed);
        assert_eq!(fusion.inner.data, "999_0000");
        assert!(!fusion.inner.is_allowed);

        // A later, longer, complete read improves the stored tag.
        fusion.observe(ReaderSide::Inner, &tag("999_000000123456", true), &allowed);
        assert_eq!(fusion.inner.data, "999_000000123456");
        assert!(fusion.inner.complete);
        assert!(fusion.inner.is_allowed);
    }

    #[test]
    fn test_shorter_reply_does_not_clobber() {
        let mut fusion = DirectionFusion::new();
        fusion.observe(ReaderSide::Inner, &tag("999_000000123456", true), ALLOWED);
        fusion.observe(ReaderSide::Inner, &tag("999", true), ALLOWED);
        assert_eq!(fusion.inner.data, "999_000000123456");
    }

    #[test]
    fn test_allowed_set_membership() {
        let allowed = allowed(&["AAA", "BBB"]);
        let mut fusion = DirectionFusion::new();

        fusion.observe(ReaderSide::Inner, &tag("BBB", true), &allowed);
        assert!(fusion.inner.is_allowed);

        fusion.observe(ReaderSide::Outer, &tag("CCC", true), &allowed);
        assert!(!fusion.outer.is_allowed);
    }

    #[test]
    fn test_disallowed_with_both_readers() {
        let allowed = allowed(&["AAA"]);
        let mut fusion = DirectionFusion::new();

        fusion.observe(ReaderSide::Inner, &tag("AAA", true), &allowed);
        fusion.observe(ReaderSide::Outer, &tag("XXX", true), &allowed);

        // One good read is enough.
        assert!(!fusion.disallowed(true, true));
        // Outer alone would lock.
        assert!(fusion.disallowed(false, true));
        assert!(!fusion.disallowed(true, false));
    }

    #[test]
    fn test_reset_clears_direction() {
        let mut fusion = DirectionFusion::new();
        fusion.observe(ReaderSide::Inner, &tag("AAA", true), ALLOWED);
        fusion.reset();
        assert_eq!(fusion.direction, MatchDirection::Unknown);
        assert!(!fusion.inner.triggered);
    }
}
