//! Intel HEX record parsing.
//!
//! ## Record Format
//!
//! ```text
//! :CCAAAATTDD...DDSS
//!  |  |   | |     +-- checksum: two's complement of the sum of all preceding bytes
//!  |  |   | +-------- CC data bytes
//!  |  |   +---------- record type (00 data, 01 end of file, 04 extended linear address)
//!  |  +-------------- 16-bit address (big-endian)
//!  +----------------- byte count
//! ```
//!
//! Extended linear address records set the upper 16 bits of every following
//! data record address until the next one.

use std::fs;
use std::path::Path;

use log::debug;

use crate::error::{Error, Result};

/// Shortest well-formed line: `:` plus count, address, type and checksum.
const MIN_LINE_LEN: usize = 11;

/// Bytes before the data field: count, address (2), type.
const HEADER_BYTES: usize = 4;

/// Hex record types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordType {
    /// Data bytes to place at the record address.
    Data,
    /// Marks the end of the file.
    EndOfFile,
    /// Sets the upper 16 bits of following addresses.
    ExtendedLinearAddress,
    /// Any record type this loader does not handle.
    Other(u8),
}

impl From<u8> for RecordType {
    fn from(code: u8) -> Self {
        match code {
            0x00 => Self::Data,
            0x01 => Self::EndOfFile,
            0x04 => Self::ExtendedLinearAddress,
            other => Self::Other(other),
        }
    }
}

/// One decoded hex line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HexRecord {
    /// Full 32-bit address, including the current extended linear address.
    pub address: u32,
    /// Record type.
    pub record_type: RecordType,
    /// Data field.
    pub data: Vec<u8>,
    /// Whether the checksum matched.
    pub valid: bool,
}

/// Parse one hex line.
///
/// `upper_address` carries the extended linear address between calls: it is
/// updated by extended linear address records and OR-ed into data record
/// addresses.
///
/// In strict mode every structural problem, checksum mismatch and unsupported
/// record type is an error. Otherwise malformed lines and unsupported record
/// types return `Ok(None)`, and a checksum mismatch returns a record with
/// `valid == false`.
pub fn parse_record(line: &str, strict: bool, upper_address: &mut u32) -> Result<Option<HexRecord>> {
    match decode_line(line, strict, upper_address) {
        Ok(record) => Ok(record),
        Err(reason) if strict => Err(Error::hex(0, reason)),
        Err(_) => Ok(None),
    }
}

fn decode_line(
    line: &str,
    strict: bool,
    upper_address: &mut u32,
) -> std::result::Result<Option<HexRecord>, String> {
    let line = line.trim_end();
    if line.len() < MIN_LINE_LEN {
        return Err(format!("line too short ({} characters)", line.len()));
    }
    let Some(digits) = line.strip_prefix(':') else {
        return Err("missing ':' start code".into());
    };
    let bytes = hex::decode(digits).map_err(|e| format!("bad hex digits: {e}"))?;

    let count = usize::from(bytes[0]);
    let address = u16::from_be_bytes([bytes[1], bytes[2]]);
    let record_type = RecordType::from(bytes[3]);

    let expected = HEADER_BYTES + count + 1;
    if bytes.len() < expected || (strict && bytes.len() != expected) {
        return Err(format!(
            "byte count {count} does not match line length ({} bytes)",
            bytes.len()
        ));
    }

    let data = &bytes[HEADER_BYTES..HEADER_BYTES + count];
    let checksum = bytes[HEADER_BYTES + count];
    let sum = bytes[..HEADER_BYTES + count]
        .iter()
        .fold(0u8, |acc, &b| acc.wrapping_add(b));
    let computed = sum.wrapping_neg();
    let valid = computed == checksum;
    if strict && !valid {
        return Err(format!(
            "checksum mismatch: computed {computed:#04X}, line has {checksum:#04X}"
        ));
    }

    let full_address = match record_type {
        RecordType::Data => *upper_address | u32::from(address),
        RecordType::EndOfFile => {
            if strict && (count != 0 || address != 0) {
                return Err("end of file record must have zero count and address".into());
            }
            0
        },
        RecordType::ExtendedLinearAddress => {
            if count != 2 || (strict && address != 0) {
                return Err("extended linear address record must carry 2 bytes at address 0".into());
            }
            if valid {
                *upper_address = u32::from(u16::from_be_bytes([data[0], data[1]])) << 16;
            }
            *upper_address
        },
        RecordType::Other(code) => {
            return Err(format!("unsupported record type {code:#04X}"));
        },
    };

    Ok(Some(HexRecord {
        address: full_address,
        record_type,
        data: data.to_vec(),
        valid,
    }))
}

/// The records of a hex file, up to and including its end of file record.
#[derive(Debug, Clone, Default)]
pub struct HexFile {
    /// Valid records in file order.
    pub records: Vec<HexRecord>,
    /// Lines that were dropped (malformed, unsupported or bad checksum).
    pub failed_lines: usize,
}

impl HexFile {
    /// Read and parse a hex file.
    pub fn from_file<P: AsRef<Path>>(path: P, strict: bool) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading hex file: {}", path.display());
        let text = fs::read_to_string(path)?;
        Self::parse(&text, strict)
    }

    /// Parse hex text. Parsing stops at the first end of file record, which
    /// must be present.
    pub fn parse(text: &str, strict: bool) -> Result<Self> {
        let mut file = Self::default();
        let mut upper_address = 0;
        let mut seen_end = false;

        for (index, line) in text.lines().enumerate() {
            let record = parse_record(line, strict, &mut upper_address).map_err(|e| match e {
                Error::HexRecord { reason, .. } => Error::hex(index + 1, reason),
                other => other,
            })?;
            match record {
                Some(record) if record.valid => {
                    let end = record.record_type == RecordType::EndOfFile;
                    file.records.push(record);
                    if end {
                        seen_end = true;
                        break;
                    }
                },
                _ => file.failed_lines += 1,
            }
        }

        if !seen_end {
            return Err(Error::MissingEndOfFile);
        }
        debug!(
            "{} records, {} failed lines",
            file.records.len(),
            file.failed_lines
        );
        Ok(file)
    }

    /// Iterate over the data records.
    pub fn data_records(&self) -> impl Iterator<Item = &HexRecord> {
        self.records
            .iter()
            .filter(|r| r.record_type == RecordType::Data)
    }
}
