//! GPIO lines for the solenoid lock and the backlight.
//!
//! Pins are driven through the sysfs interface: exported once at
//! startup, direction set to out, then written on lock state changes.
//! Only the main loop ever writes them.

use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing::info;

/// The two-method pin interface the rest of the daemon sees.
pub trait PinBank {
    /// Export a pin and configure it as an output.
    fn setup_output(&mut self, pin: u32) -> Result<()>;

    fn set_pin(&mut self, pin: u32, high: bool) -> Result<()>;
}

/// Sysfs-backed pins.
pub struct SysfsGpio {
    base: PathBuf,
}

impl SysfsGpio {
    pub fn new() -> Self {
        Self::with_base("/sys/class/gpio")
    }

    pub fn with_base(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }
}

impl Default for SysfsGpio {
    fn default() -> Self {
        Self::new()
    }
}

impl PinBank for SysfsGpio {
    fn setup_output(&mut self, pin: u32) -> Result<()> {
        let export = self.base.join("export");
        match std::fs::write(&export, pin.to_string()) {
            Ok(()) => {}
            // Re-exporting an already exported pin is fine.
            Err(e) if e.raw_os_error() == Some(libc::EBUSY) => {}
            Err(e) => {
                return Err(e).with_context(|| format!("failed to export GPIO pin {pin}"));
            }
        }

        let direction = self.base.join(format!("gpio{pin}/direction"));
        std::fs::write(&direction, "out")
            .with_context(|| format!("failed to set direction for GPIO pin {pin}"))?;

        Ok(())
    }

    fn set_pin(&mut self, pin: u32, high: bool) -> Result<()> {
        let value = self.base.join(format!("gpio{pin}/value"));
        std::fs::write(&value, if high { "1" } else { "0" })
            .with_context(|| format!("failed to write GPIO pin {pin}"))
    }
}

/// Pin bank used when a custom lockout command replaces the GPIO
/// entirely.
#[derive(Debug, Default)]
pub struct NoopPinBank;

impl PinBank for NoopPinBank {
    fn setup_output(&mut self, _pin: u32) -> Result<()> {
        Ok(())
    }

    fn set_pin(&mut self, _pin: u32, _high: bool) -> Result<()> {
        Ok(())
    }
}

/// What a [`MockPinBank`] saw.
#[derive(Debug, Default)]
pub struct MockPinLog {
    pub outputs: Vec<u32>,
    pub writes: Vec<(u32, bool)>,
}

/// Test pin bank that records every write into a shared log, so the
/// log stays inspectable after the bank is moved into a [`DoorLock`].
#[derive(Debug, Default)]
pub struct MockPinBank {
    log: std::sync::Arc<std::sync::Mutex<MockPinLog>>,
}

impl MockPinBank {
    pub fn new() -> (Self, std::sync::Arc<std::sync::Mutex<MockPinLog>>) {
        let log = std::sync::Arc::new(std::sync::Mutex::new(MockPinLog::default()));
        (Self { log: log.clone() }, log)
    }
}

impl PinBank for MockPinBank {
    fn setup_output(&mut self, pin: u32) -> Result<()> {
        self.log.lock().unwrap().outputs.push(pin);
        Ok(())
    }

    fn set_pin(&mut self, pin: u32, high: bool) -> Result<()> {
        self.log.lock().unwrap().writes.push((pin, high));
        Ok(())
    }
}

/// The door lock plus the optional backlight, over some pin bank.
pub struct DoorLock {
    bank: Box<dyn PinBank + Send>,
    lockout_pin: u32,
    backlight_pin: Option<u32>,
}

impl DoorLock {
    pub fn new(bank: Box<dyn PinBank + Send>, lockout_pin: u32, backlight_pin: Option<u32>) -> Self {
        Self {
            bank,
            lockout_pin,
            backlight_pin,
        }
    }

    /// Export both pins and start with the door open and the light on.
    pub fn setup(&mut self) -> Result<()> {
        self.bank.setup_output(self.lockout_pin)?;
        self.bank.set_pin(self.lockout_pin, false)?;

        if let Some(pin) = self.backlight_pin {
            self.bank.setup_output(pin)?;
            self.bank.set_pin(pin, true)?;
        }

        info!(
            lockout_pin = self.lockout_pin,
            backlight_pin = self.backlight_pin,
            "initialized GPIO pins"
        );

        Ok(())
    }

    pub fn lock(&mut self) -> Result<()> {
        self.bank.set_pin(self.lockout_pin, true)?;
        if let Some(pin) = self.backlight_pin {
            self.bank.set_pin(pin, true)?;
        }
        Ok(())
    }

    pub fn unlock(&mut self) -> Result<()> {
        self.bank.set_pin(self.lockout_pin, false)?;
        if let Some(pin) = self.backlight_pin {
            self.bank.set_pin(pin, true)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sysfs_writes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("export"), "").unwrap();
        std::fs::create_dir(dir.path().join("gpio4")).unwrap();
        std::fs::write(dir.path().join("gpio4/direction"), "").unwrap();
        std::fs::write(dir.path().join("gpio4/value"), "").unwrap();

        let mut gpio = SysfsGpio::with_base(dir.path());
        gpio.setup_output(4).unwrap();
        gpio.set_pin(4, true).unwrap();

        assert_eq!(
            std::fs::read_to_string(dir.path().join("export")).unwrap(),
            "4"
        );
        assert_eq!(
            std::fs::read_to_string(dir.path().join("gpio4/direction")).unwrap(),
            "out"
        );
        assert_eq!(
            std::fs::read_to_string(dir.path().join("gpio4/value")).unwrap(),
            "1"
        );
    }

    #[test]
    fn test_door_lock_sequencing() {
        let (bank, log) = MockPinBank::new();
        let mut door = DoorLock::new(Box::new(bank), 4, Some(18));
        door.setup().unwrap();
        door.lock().unwrap();
        door.unlock().unwrap();

        let log = log.lock().unwrap();
        assert_eq!(log.outputs, vec![4, 18]);
        // setup: door open + light on, lock: pin high, unlock: pin low.
        assert_eq!(
            log.writes,
            vec![
                (4, false),
                (18, true),
                (4, true),
                (18, true),
                (4, false),
                (18, true)
            ]
        );
    }
}
