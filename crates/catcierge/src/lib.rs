//! catcierge: Image recognition cat door controller
//!
//! This crate provides:
//! - The match-group state machine driving the door lock
//! - CLI and INI configuration with the same option names
//! - GPIO, PID file and signal plumbing
//! - Frame sources (stills replay, optional live capture)
//! - The main loop wiring it all together

pub mod args;
pub mod camera;
pub mod config;
pub mod fsm;
pub mod gpio;
pub mod lifecycle;
pub mod runner;

#[cfg(feature = "zmq")]
pub mod zmq_pub;

// Re-exports for convenience
pub use args::Args;
pub use fsm::{Catcierge, EventCommands, Settings, State};
pub use gpio::{DoorLock, MockPinBank, PinBank, SysfsGpio};
