//! One serial tag reader.

use crate::{error_message, RFID_COMPLETE_LENGTH};
use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum RfidError {
    #[error("{name} RFID reader: failed to open serial port {path}: {source}")]
    Open {
        name: &'static str,
        path: PathBuf,
        source: serialport::Error,
    },

    #[error("{name} RFID reader: failed to write RAT command: {source}")]
    Rat {
        name: &'static str,
        source: std::io::Error,
    },

    #[error("{name} RFID reader: read error: {source}")]
    Read {
        name: &'static str,
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReaderState {
    #[default]
    Disconnected,
    /// Port open, RAT sent, waiting for the reader's first reply.
    Connected,
    AwaitingTag,
}

/// A decoded tag reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagEvent {
    /// Replies of at least [`RFID_COMPLETE_LENGTH`] raw bytes are
    /// complete tag reads.
    pub complete: bool,
    pub data: String,
}

/// Driver for one reader on a serial port.
pub struct RfidReader {
    name: &'static str,
    path: PathBuf,
    port: Option<Box<dyn SerialPort>>,
    state: ReaderState,
}

impl RfidReader {
    pub fn new(name: &'static str, path: &Path) -> Self {
        Self {
            name,
            path: path.to_path_buf(),
            port: None,
            state: ReaderState::Disconnected,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn state(&self) -> ReaderState {
        self.state
    }

    /// Open the port (9600 8N1 raw), flush stale input and enable the
    /// reader's auto-read-tag streaming mode.
    pub fn open(&mut self) -> Result<(), RfidError> {
        let mut port = serialport::new(self.path.to_string_lossy(), 9600)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(Duration::from_millis(0))
            .open()
            .map_err(|source| RfidError::Open {
                name: self.name,
                path: self.path.clone(),
                source,
            })?;

        port.clear(ClearBuffer::Input).ok();

        port.write_all(b"RAT\r\n").map_err(|source| RfidError::Rat {
            name: self.name,
            source,
        })?;

        info!(
            reader = self.name,
            path = %self.path.display(),
            "opened serial port, sent RAT request"
        );

        self.port = Some(port);
        self.state = ReaderState::Connected;

        Ok(())
    }

    pub fn close(&mut self) {
        if self.port.take().is_some() {
            info!(reader = self.name, "disconnected RFID reader");
        }
        self.state = ReaderState::Disconnected;
    }

    /// Non-blocking read. Returns a tag event when a reply was decoded,
    /// `None` when no data is pending or the reply was consumed by the
    /// reader state machine.
    pub fn poll(&mut self) -> Result<Option<TagEvent>, RfidError> {
        let Some(port) = self.port.as_mut() else {
            return Ok(None);
        };

        let mut buf = [0u8; 1024];
        let n = match port.read(&mut buf) {
            Ok(n) => n,
            Err(e)
                if e.kind() == std::io::ErrorKind::TimedOut
                    || e.kind() == std::io::ErrorKind::WouldBlock =>
            {
                // Need more.
                return Ok(None);
            }
            Err(source) => {
                return Err(RfidError::Read {
                    name: self.name,
                    source,
                });
            }
        };

        if n == 0 {
            return Ok(None);
        }

        let raw = &buf[..n];
        let text = String::from_utf8_lossy(raw);
        debug!(reader = self.name, bytes = n, reply = %text, "serial reply");

        let protocol_error = if raw[0] == b'?' {
            let code = text[1..]
                .chars()
                .next()
                .and_then(|c| c.to_digit(10))
                .unwrap_or(0) as usize;
            Some(code)
        } else {
            None
        };

        match self.state {
            ReaderState::Connected => {
                info!(
                    reader = self.name,
                    path = %self.path.display(),
                    "started listening for cats"
                );
                self.state = ReaderState::AwaitingTag;
                Ok(None)
            }
            ReaderState::AwaitingTag => {
                if let Some(code) = protocol_error {
                    warn!(
                        reader = self.name,
                        code, "protocol error on read, {}", error_message(code)
                    );
                    return Ok(None);
                }

                Ok(Some(TagEvent {
                    complete: n >= RFID_COMPLETE_LENGTH,
                    data: text.trim_end_matches(['\r', '\n']).to_string(),
                }))
            }
            ReaderState::Disconnected => {
                error!(reader = self.name, "read while disconnected");
                Ok(None)
            }
        }
    }
}

impl Drop for RfidReader {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_reader_is_disconnected() {
        let reader = RfidReader::new("Inner", Path::new("/dev/ttyUSB0"));
        assert_eq!(reader.state(), ReaderState::Disconnected);
        assert_eq!(reader.name(), "Inner");
    }

    #[test]
    fn test_poll_without_port_is_quiet() {
        let mut reader = RfidReader::new("Inner", Path::new("/dev/ttyUSB0"));
        assert!(reader.poll().unwrap().is_none());
    }

    #[test]
    fn test_open_missing_device_errors() {
        let mut reader = RfidReader::new("Outer", Path::new("/dev/does-not-exist-421"));
        assert!(matches!(reader.open(), Err(RfidError::Open { .. })));
        assert_eq!(reader.state(), ReaderState::Disconnected);
    }
}
