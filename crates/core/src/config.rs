//! Session configuration.
//!
//! [`Configuration`] describes the emulated device and is written at the head of
//! every session file. [`EngineOptions`] tunes the engine itself and is never
//! persisted.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::Result;

/// Minimum spacing between two delivered button events.
pub const DEFAULT_BUTTON_SPACING: Duration = Duration::from_millis(100);
/// Default bound of each input queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Where the firmware image comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FirmwareSource {
    /// Read from disk at initialization time.
    File(PathBuf),
    /// Bundled with the host (bound emulator builds, tests).
    Embedded(Vec<u8>),
}

impl FirmwareSource {
    /// Fetch the image bytes.
    pub fn read(&self) -> Result<Vec<u8>> {
        match self {
            FirmwareSource::File(path) => Ok(std::fs::read(path)?),
            FirmwareSource::Embedded(bytes) => Ok(bytes.clone()),
        }
    }
}

/// Device configuration for one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Configuration {
    /// Device identifier understood by the [`Device`](crate::Device) factory.
    pub device: String,
    /// RAM size in KB.
    pub ram_size_kb: u32,
    /// Firmware image.
    pub firmware: FirmwareSource,
}

impl Default for Configuration {
    fn default() -> Self {
        Configuration {
            device: String::from("generic"),
            ram_size_kb: 8 * 1024,
            firmware: FirmwareSource::Embedded(Vec::new()),
        }
    }
}

/// How the stepper role is realized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadingModel {
    /// A dedicated OS thread runs the instruction core.
    Threaded,
    /// No stepper thread; the controller calls `execute_incremental` itself.
    Cooperative,
}

/// Engine tunables.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub threading: ThreadingModel,
    /// Button events are handed to the firmware no faster than this.
    pub button_spacing: Duration,
    /// Capacity of each of the button, key and pen queues.
    pub queue_capacity: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        EngineOptions {
            threading: ThreadingModel::Threaded,
            button_spacing: DEFAULT_BUTTON_SPACING,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl EngineOptions {
    pub fn cooperative() -> Self {
        EngineOptions {
            threading: ThreadingModel::Cooperative,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_firmware_read() {
        let src = FirmwareSource::Embedded(vec![1, 2, 3]);
        assert_eq!(src.read().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_missing_firmware_file() {
        let src = FirmwareSource::File(PathBuf::from("/nonexistent/firmware.rom"));
        assert!(src.read().is_err());
    }

    #[test]
    fn test_default_options() {
        let opts = EngineOptions::default();
        assert_eq!(opts.threading, ThreadingModel::Threaded);
        assert_eq!(opts.button_spacing, Duration::from_millis(100));
        assert_eq!(EngineOptions::cooperative().queue_capacity, DEFAULT_QUEUE_CAPACITY);
    }
}
