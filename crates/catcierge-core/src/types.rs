//! Shared enums and constants for the door controller.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Number of frames matched before the lock state is decided.
pub const MATCH_MAX_COUNT: usize = 4;

/// Maximum number of intermediate step images kept per match.
pub const MAX_STEPS: usize = 24;

/// Maximum number of match rectangles reported per frame.
pub const MAX_MATCH_RECTS: usize = 24;

/// Direction the animal is moving through the door.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MatchDirection {
    #[default]
    Unknown,
    In,
    Out,
}

impl MatchDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchDirection::Unknown => "unknown",
            MatchDirection::In => "in",
            MatchDirection::Out => "out",
        }
    }
}

impl fmt::Display for MatchDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the lockout state is left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockoutMethod {
    /// Leave when the lockout timer expires.
    #[default]
    TimerOnly = 1,
    /// Require a clear frame before the timer starts, leave on timeout.
    ObstructThenTimer = 2,
    /// Leave on either a clear frame or timer expiry.
    ObstructOrTimer = 3,
}

impl TryFrom<u8> for LockoutMethod {
    type Error = String;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            1 => Ok(LockoutMethod::TimerOnly),
            2 => Ok(LockoutMethod::ObstructThenTimer),
            3 => Ok(LockoutMethod::ObstructOrTimer),
            _ => Err(format!("invalid lockout method {v}, must be 1, 2 or 3")),
        }
    }
}

/// A rectangle in frame coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

/// Lifecycle events the template engine and command runner fire on.
///
/// This is a closed set; templates subscribe to event names (or `*`/`all`)
/// and every event has a matching `--<event>_cmd` option.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Event {
    MatchGroupDone,
    StateChange,
    DoLockout,
    DoUnlock,
    SaveImg,
    MatchDone,
    FrameObstructed,
    RfidDetect,
    RfidMatch,
}

impl Event {
    pub const ALL: [Event; 9] = [
        Event::MatchGroupDone,
        Event::StateChange,
        Event::DoLockout,
        Event::DoUnlock,
        Event::SaveImg,
        Event::MatchDone,
        Event::FrameObstructed,
        Event::RfidDetect,
        Event::RfidMatch,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Event::MatchGroupDone => "match_group_done",
            Event::StateChange => "state_change",
            Event::DoLockout => "do_lockout",
            Event::DoUnlock => "do_unlock",
            Event::SaveImg => "save_img",
            Event::MatchDone => "match_done",
            Event::FrameObstructed => "frame_obstructed",
            Event::RfidDetect => "rfid_detect",
            Event::RfidMatch => "rfid_match",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Event::MatchGroupDone => {
                "All steps for a match group have been performed. \
                 This is most likely what you want to trigger most stuff on."
            }
            Event::StateChange => "State machine state changed.",
            Event::DoLockout => "Triggered right before a lockout is performed.",
            Event::DoUnlock => "Triggered right before an unlock is performed.",
            Event::SaveImg => "After all images for a match group have been saved to disk.",
            Event::MatchDone => "Triggered after each match in a match group.",
            Event::FrameObstructed => {
                "Right after the camera view has been obstructed and the \
                 obstruct image has been saved."
            }
            Event::RfidDetect => "One of the RFID readers has detected a tag.",
            Event::RfidMatch => {
                "An RFID match has been completed, including both readers having been read."
            }
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Event {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Event::ALL
            .iter()
            .copied()
            .find(|e| e.name() == s)
            .ok_or_else(|| format!("unknown event \"{s}\""))
    }
}

/// What a SIGUSR1/SIGUSR2 delivery does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SigusrBehavior {
    /// Nothing is performed.
    #[default]
    None,
    /// Lock the cat door for the lockout time.
    Lock,
    /// Unlock the cat door.
    Unlock,
    /// Ignore any events until "attention".
    Ignore,
    /// Stop ignoring events.
    Attention,
}

impl FromStr for SigusrBehavior {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(SigusrBehavior::None),
            "lock" => Ok(SigusrBehavior::Lock),
            "unlock" => Ok(SigusrBehavior::Unlock),
            "ignore" => Ok(SigusrBehavior::Ignore),
            "attention" => Ok(SigusrBehavior::Attention),
            _ => Err(format!("unknown sigusr behavior \"{s}\"")),
        }
    }
}
