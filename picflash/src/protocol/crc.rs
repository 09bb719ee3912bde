//! CRC32-K (Koopman polynomial) used to protect write packets.
//!
//! MSB-first, no reflection, initial value 0, no final XOR. A running value
//! can be chained across calls by passing the previous result back in.

use log::debug;

use crate::error::{Error, Result};

/// Koopman polynomial.
pub const CRC32K_POLY: u32 = 0x741B_8CD7;

static CRC32K_TABLE: [u32; 256] = build_table();

const fn build_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = (i as u32) << 24;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 0x8000_0000 != 0 {
                (crc << 1) ^ CRC32K_POLY
            } else {
                crc << 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

/// Fold one byte into `crc` using the lookup table.
#[inline]
pub fn crc32k_update(crc: u32, byte: u8) -> u32 {
    CRC32K_TABLE[(((crc >> 24) ^ u32::from(byte)) & 0xFF) as usize] ^ (crc << 8)
}

/// Fold one byte into `crc` one bit at a time.
pub fn crc32k_update_bitwise(crc: u32, byte: u8) -> u32 {
    let mut crc = crc ^ (u32::from(byte) << 24);
    for _ in 0..8 {
        crc = if crc & 0x8000_0000 != 0 {
            (crc << 1) ^ CRC32K_POLY
        } else {
            crc << 1
        };
    }
    crc
}

/// CRC32-K of `data`.
pub fn crc32k(data: &[u8]) -> u32 {
    crc32k_continue(0, data)
}

/// Continue a CRC32-K computation over more data.
pub fn crc32k_continue(crc: u32, data: &[u8]) -> u32 {
    data.iter().fold(crc, |crc, &b| crc32k_update(crc, b))
}

/// Bitwise CRC32-K of `data`. Slow; used to cross-check the table.
pub fn crc32k_bitwise(data: &[u8]) -> u32 {
    data.iter().fold(0, |crc, &b| crc32k_update_bitwise(crc, b))
}

/// Check the lookup table against known entries and the bitwise form.
pub fn self_test() -> Result<()> {
    if CRC32K_TABLE[0x80] != 0x5323_A969 || CRC32K_TABLE[255] != 0x4E34_4A03 {
        return Err(Error::SelfTest("CRC32-K table mismatch".into()));
    }
    let data: Vec<u8> = (0..=255u8).rev().collect();
    for len in [0, 1, 7, 64, 256] {
        if crc32k(&data[..len]) != crc32k_bitwise(&data[..len]) {
            return Err(Error::SelfTest(format!(
                "CRC32-K table and bitwise disagree on {len} bytes"
            )));
        }
    }
    debug!("CRC32-K self-test passed");
    Ok(())
}
