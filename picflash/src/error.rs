//! Error types for picflash.

use std::io;
use thiserror::Error;

/// Result type for picflash operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for picflash operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// Malformed or rejected hex record.
    #[error("Invalid hex record on line {line}: {reason}")]
    HexRecord {
        /// 1-based line number within the hex file (0 when parsing a lone line).
        line: usize,
        /// What was wrong with the record.
        reason: String,
    },

    /// The hex file ended without an end-of-file record.
    #[error("No end of file record")]
    MissingEndOfFile,

    /// A memory run overlaps more than one allowed region.
    #[error(
        "Splitting region [{start:#010X}, {end:#010X}) into more than one is not supported"
    )]
    UnsupportedSplit {
        /// First address of the run.
        start: u32,
        /// One past the last address of the run.
        end: u32,
    },

    /// Invalid image file or image contents.
    #[error("Invalid image: {0}")]
    InvalidImage(String),

    /// Device id not present in the geometry table.
    #[error("Unknown device id {0:#010X}")]
    UnknownDevice(u32),

    /// Device name not present in the geometry table.
    #[error("Unknown device '{0}'")]
    UnknownDeviceName(String),

    /// Key file could not be used.
    #[error("Invalid key file: {0}")]
    KeyFile(String),

    /// A known-answer self-test failed.
    #[error("Self-test failed: {0}")]
    SelfTest(String),

    /// A required input file was not given.
    #[error("Missing input: {0}")]
    MissingInput(String),

    /// Protocol error.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    pub(crate) fn hex(line: usize, reason: impl Into<String>) -> Self {
        Self::HexRecord {
            line,
            reason: reason.into(),
        }
    }
}
