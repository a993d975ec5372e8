//! Common types shared across connector implementations.

use readerlink_core::Pin;
use serde::{Deserialize, Serialize};

/// Configuration reported by a connected reader.
///
/// Contains metadata about the reader such as name, firmware version and
/// the antennas and GPIO pins it exposes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReaderConfiguration {
    /// Reader name (e.g., "Speedway R420").
    pub name: String,

    /// Optional firmware version string.
    pub firmware_version: Option<String>,

    /// Antenna ports.
    pub antennas: Vec<u16>,

    /// GPIO pins.
    pub pins: Vec<Pin>,
}

impl ReaderConfiguration {
    /// Create a new configuration with required fields.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            firmware_version: None,
            antennas: Vec::new(),
            pins: Vec::new(),
        }
    }

    /// Set the firmware version.
    pub fn with_firmware_version(mut self, firmware_version: impl Into<String>) -> Self {
        self.firmware_version = Some(firmware_version.into());
        self
    }

    /// Set the antennas.
    pub fn with_antennas(mut self, antennas: Vec<u16>) -> Self {
        self.antennas = antennas;
        self
    }

    /// Set the GPIO pins.
    pub fn with_pins(mut self, pins: Vec<Pin>) -> Self {
        self.pins = pins;
        self
    }
}
