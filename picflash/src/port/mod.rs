//! Transport abstraction.
//!
//! The session loop talks to the device through the [`Transport`] trait:
//!
//! ```text
//! +------------------+
//! |   Session loop   |
//! +--------+---------+
//!          |  poll_presence / write_bytes / drain
//!          v
//! +--------+---------+        +------------------+
//! |  Transport trait | <----- |  reader thread   |
//! +--------+---------+  mpsc  +------------------+
//!          |
//!          v
//! +--------+---------+
//! | Native serial    |
//! |  (serialport)    |
//! +------------------+
//! ```
//!
//! Reads never block the loop: a reader thread owned by the transport pushes
//! received chunks into a channel, and [`Transport::drain`] empties it.

#[cfg(feature = "native")]
pub mod native;

use std::time::Duration;

use crate::error::Result;

/// Serial port configuration. The link always runs 8N1 without flow control.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Port name/path (e.g., "/dev/ttyUSB0", "COM3"). Empty selects the
    /// first port that appears.
    pub port_name: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Read timeout of the reader thread.
    pub timeout: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: 115200,
            timeout: Duration::from_millis(50),
        }
    }
}

impl SerialConfig {
    /// Create a new configuration with port name and baud rate.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            ..Default::default()
        }
    }

    /// Set the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Serial port information.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct PortInfo {
    /// Port name/path.
    pub name: String,
    /// USB vendor ID (if available).
    pub vid: Option<u16>,
    /// USB product ID (if available).
    pub pid: Option<u16>,
    /// Manufacturer string (if available).
    pub manufacturer: Option<String>,
    /// Product string (if available).
    pub product: Option<String>,
    /// Serial number (if available).
    pub serial_number: Option<String>,
}

/// A change in transport availability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortEvent {
    /// A port was opened.
    Attached(String),
    /// The open port went away and was closed.
    Detached(String),
}

/// Byte transport to the bootloader.
pub trait Transport {
    /// Reconcile with the ports that currently exist, opening or closing as
    /// needed. Returns what changed, if anything.
    fn poll_presence(&mut self) -> Result<Option<PortEvent>>;

    /// Write all bytes.
    fn write_bytes(&mut self, bytes: &[u8]) -> Result<()>;

    /// Take every chunk received since the last call, without blocking.
    fn drain(&mut self) -> Vec<Vec<u8>>;

    /// Whether a port is open.
    fn is_open(&self) -> bool;
}

/// Trait for listing available serial ports.
pub trait PortEnumerator {
    /// List all available serial ports.
    fn list_ports() -> Result<Vec<PortInfo>>;
}

// Re-export the appropriate implementation based on features
#[cfg(feature = "native")]
pub use native::{NativePortEnumerator, SerialTransport};
