//! Single-byte device responses.
//!
//! The bootloader answers with one byte per event. The top nibble selects the
//! family (`0xF_` acknowledge, `0xE_` negative acknowledge) and the low
//! nibble the reason. Bytes `0x80..=0xDF` carry device text with the top bit
//! set; everything else is plain text.

use std::fmt;

/// Connect probe sent by the host and echoed by the bootloader; also the
/// generic "OK" acknowledge.
pub const ACK_OK: u8 = 0xFC;

/// Acknowledge codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckCode {
    /// A page was erased (`F0`).
    PageErased,
    /// A page was skipped because it is protected (`F1`).
    PageProtected,
    /// Erase finished (`F2`).
    EraseDone,
    /// Command completed (`FC`).
    Ok,
    /// Unassigned code.
    Reserved(u8),
}

impl AckCode {
    /// Decode the low nibble of an acknowledge byte.
    pub fn from_nibble(nibble: u8) -> Self {
        match nibble & 0x0F {
            0x0 => Self::PageErased,
            0x1 => Self::PageProtected,
            0x2 => Self::EraseDone,
            0xC => Self::Ok,
            other => Self::Reserved(other),
        }
    }

    /// Wire byte.
    pub fn byte(self) -> u8 {
        0xF0 | match self {
            Self::PageErased => 0x0,
            Self::PageProtected => 0x1,
            Self::EraseDone => 0x2,
            Self::Ok => 0xC,
            Self::Reserved(n) => n & 0x0F,
        }
    }

    /// Human-readable reason.
    pub fn reason(self) -> &'static str {
        match self {
            Self::PageErased => "page erased",
            Self::PageProtected => "page protected",
            Self::EraseDone => "erase done",
            Self::Ok => "ok",
            Self::Reserved(_) => "reserved",
        }
    }
}

/// Negative acknowledge codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NackCode {
    /// Packet CRC did not match (`E0`).
    CrcMismatch = 0x0,
    /// Packet larger than the receive buffer (`E1`).
    PacketTooLarge = 0x1,
    /// Target flash was not erased (`E2`).
    WriteWithoutErase = 0x2,
    /// Used length does not fit the payload (`E3`).
    WriteSizeError = 0x3,
    /// Address is not word aligned (`E4`).
    WriteMisaligned = 0x4,
    /// Write would cross a page boundary (`E5`).
    WriteWraps = 0x5,
    /// Address outside writable flash (`E6`).
    WriteOutOfBounds = 0x6,
    /// Write touches the configuration words (`E7`).
    WriteOverConfiguration = 0x7,
    /// Boot flash written before its first page (`E8`).
    BootShimMissing = 0x8,
    /// Flash programming failed, retried (`E9`).
    FlashWriteFailed = 0x9,
    /// Read-back compare failed (`EA`).
    CompareFailed = 0xA,
    /// All write retries failed (`EB`).
    WritesFailed = 0xB,
    /// Unknown command byte (`EC`).
    UnknownCommand = 0xC,
    /// Page erase failed (`ED`).
    EraseFailed = 0xD,
    /// Unassigned (`EE`).
    UnusedE = 0xE,
    /// Unassigned (`EF`).
    UnusedF = 0xF,
}

impl NackCode {
    /// Decode the low nibble of a negative acknowledge byte.
    pub fn from_nibble(nibble: u8) -> Self {
        match nibble & 0x0F {
            0x0 => Self::CrcMismatch,
            0x1 => Self::PacketTooLarge,
            0x2 => Self::WriteWithoutErase,
            0x3 => Self::WriteSizeError,
            0x4 => Self::WriteMisaligned,
            0x5 => Self::WriteWraps,
            0x6 => Self::WriteOutOfBounds,
            0x7 => Self::WriteOverConfiguration,
            0x8 => Self::BootShimMissing,
            0x9 => Self::FlashWriteFailed,
            0xA => Self::CompareFailed,
            0xB => Self::WritesFailed,
            0xC => Self::UnknownCommand,
            0xD => Self::EraseFailed,
            0xE => Self::UnusedE,
            _ => Self::UnusedF,
        }
    }

    /// Wire byte.
    pub fn byte(self) -> u8 {
        0xE0 | self as u8
    }

    /// Human-readable reason.
    pub fn reason(self) -> &'static str {
        match self {
            Self::CrcMismatch => "CRC mismatch",
            Self::PacketTooLarge => "packet size too large",
            Self::WriteWithoutErase => "write without erase",
            Self::WriteSizeError => "write size error",
            Self::WriteMisaligned => "write misaligned",
            Self::WriteWraps => "write wraps",
            Self::WriteOutOfBounds => "write out of bounds",
            Self::WriteOverConfiguration => "write over configuration",
            Self::BootShimMissing => "boot shim missing",
            Self::FlashWriteFailed => "flash write failed",
            Self::CompareFailed => "compare failed",
            Self::WritesFailed => "writes failed",
            Self::UnknownCommand => "unknown command",
            Self::EraseFailed => "erase failed",
            Self::UnusedE | Self::UnusedF => "unused",
        }
    }
}

/// A classified ACK or NACK byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Response {
    /// Acknowledge.
    Ack(AckCode),
    /// Negative acknowledge.
    Nack(NackCode),
}

impl Response {
    /// Classify a byte, returning `None` for anything outside the two families.
    pub fn classify(byte: u8) -> Option<Self> {
        match byte & 0xF0 {
            0xF0 => Some(Self::Ack(AckCode::from_nibble(byte))),
            0xE0 => Some(Self::Nack(NackCode::from_nibble(byte))),
            _ => None,
        }
    }

    /// Wire byte.
    pub fn byte(self) -> u8 {
        match self {
            Self::Ack(code) => code.byte(),
            Self::Nack(code) => code.byte(),
        }
    }

    /// Whether this is the `FC` acknowledge.
    pub fn is_ok(self) -> bool {
        self == Self::Ack(AckCode::Ok)
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ack(code) => write!(f, "ACK 0x{:02X} {}", code.byte(), code.reason()),
            Self::Nack(code) => write!(f, "NACK 0x{:02X} {}", code.byte(), code.reason()),
        }
    }
}

/// Host command bytes.
pub mod command {
    /// Request bootloader information.
    pub const INFO: u8 = b'I';
    /// Erase application flash.
    pub const ERASE: u8 = b'E';
    /// Report the CRC of all flash.
    pub const CRC: u8 = b'C';
    /// Write packet (followed by length and payload).
    pub const WRITE: u8 = b'W';
    /// Leave the bootloader and start the application.
    pub const QUIT: u8 = b'Q';
    /// Ask a running application to jump into the bootloader.
    pub const JUMP_TO_BOOTLOADER: u8 = b'B';
    /// Connect probe.
    pub const PROBE: u8 = super::ACK_OK;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_families() {
        assert_eq!(Response::classify(0xFC), Some(Response::Ack(AckCode::Ok)));
        assert_eq!(
            Response::classify(0xF0),
            Some(Response::Ack(AckCode::PageErased))
        );
        assert_eq!(
            Response::classify(0xF7),
            Some(Response::Ack(AckCode::Reserved(7)))
        );
        assert_eq!(
            Response::classify(0xE0),
            Some(Response::Nack(NackCode::CrcMismatch))
        );
        assert_eq!(
            Response::classify(0xED),
            Some(Response::Nack(NackCode::EraseFailed))
        );
        assert_eq!(Response::classify(b'A'), None);
        assert_eq!(Response::classify(0xC1), None);
    }

    #[test]
    fn test_bytes_round_trip() {
        for byte in 0xE0..=0xFF {
            let response = Response::classify(byte).unwrap();
            assert_eq!(response.byte(), byte);
        }
    }

    #[test]
    fn test_display() {
        let text = Response::Nack(NackCode::WriteOutOfBounds).to_string();
        assert_eq!(text, "NACK 0xE6 write out of bounds");
        assert!(Response::Ack(AckCode::Ok).is_ok());
    }
}
