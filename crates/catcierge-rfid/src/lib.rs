//! catcierge-rfid: Serial tag readers for the cat door controller
//!
//! Two readers sit on either side of the door. Each is a small state
//! machine over a raw 9600 8N1 serial port in RAT (read-animal-tag)
//! streaming mode. The pair is serviced non-blocking from the main loop;
//! the order the readers trigger in fixes the direction of passage.

pub mod fusion;
pub mod reader;

pub use fusion::{DirectionFusion, ReaderSide, RfidMatch};
pub use reader::{ReaderState, RfidError, RfidReader, TagEvent};

/// Replies shorter than this are partial tag reads.
pub const RFID_COMPLETE_LENGTH: usize = 17;

/// Protocol error messages, indexed by the digit following `?`.
pub const RFID_ERROR_MESSAGES: [&str; 5] = [
    "Command not understood",          // ?0
    "Tag not present",                 // ?1
    "Tag failure to Read/Write",       // ?2
    "Access to Block 0 not allowed",   // ?3
    "Page address invalid for this tag", // ?4
];

/// Message for a numbered `?N` protocol error.
pub fn error_message(code: usize) -> &'static str {
    RFID_ERROR_MESSAGES[code % RFID_ERROR_MESSAGES.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        assert_eq!(error_message(0), "Command not understood");
        assert_eq!(error_message(4), "Page address invalid for this tag");
        // Out-of-range codes wrap rather than panic.
        assert_eq!(error_message(5), "Command not understood");
    }
}
