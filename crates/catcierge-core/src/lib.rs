//! catcierge-core: Data model for the catcierge cat door controller
//!
//! This crate provides:
//! - Match group bookkeeping (the fixed window of per-frame results a
//!   lock/unlock decision is made over)
//! - Monotonic timers used by the door state machine
//! - SHA-1 based match / match group ids
//! - Wall-clock formatting for filenames and templates, including the
//!   `--base_time` replay shift

pub mod group;
pub mod id;
pub mod path;
pub mod timefmt;
pub mod timer;
pub mod types;

// Re-exports for convenience
pub use group::{MatchGroup, MatchResult, MatchState, MatchStep};
pub use id::MatchId;
pub use path::SplitPath;
pub use timefmt::{TimeFormatError, WallClock, FILENAME_TIME_FORMAT};
pub use timer::Timer;
pub use types::{
    Event, LockoutMethod, MatchDirection, Rect, SigusrBehavior, MATCH_MAX_COUNT, MAX_MATCH_RECTS,
    MAX_STEPS,
};
