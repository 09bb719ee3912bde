//! Page/row aligned blocks and their optional random ordering.

use log::debug;
use rand::CryptoRng;

use crate::image::memory::MemoryRun;

/// One page-sized write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// Target address of the first payload byte.
    pub address: u32,
    /// Page-sized payload; bytes past `used_length` are random padding.
    pub payload: Vec<u8>,
    /// Number of payload bytes to write.
    pub used_length: u16,
}

impl Block {
    /// The bytes the device actually writes.
    pub fn used(&self) -> &[u8] {
        &self.payload[..usize::from(self.used_length)]
    }
}

/// Split `run` into blocks that never cross a page.
///
/// Each step takes a full page when the address is page aligned, the rest
/// of the page when it is row aligned, and the rest of the row otherwise,
/// capped by the bytes left in the run. Every payload is `page_size` bytes;
/// the unused tail is filled from `rng`.
pub fn pack_run<R>(run: &MemoryRun, page_size: u32, row_size: u32, rng: &mut R) -> Vec<Block>
where
    R: CryptoRng + ?Sized,
{
    let page = page_size as usize;
    let mut blocks = Vec::new();
    let mut offset = 0usize;

    while offset < run.data.len() {
        let address = run.address.wrapping_add(offset as u32);
        let page_excess = address & (page_size - 1);
        let row_excess = address & (row_size - 1);

        let target = if page_excess == 0 {
            page_size
        } else if row_excess == 0 {
            page_size - page_excess
        } else {
            row_size - row_excess
        };
        let length = (target as usize).min(run.data.len() - offset);

        let mut payload = vec![0u8; page];
        if length < page {
            rng.fill_bytes(&mut payload);
        }
        payload[..length].copy_from_slice(&run.data[offset..offset + length]);

        blocks.push(Block {
            address,
            payload,
            used_length: length as u16,
        });
        offset += length;
    }

    blocks
}

/// Uniform value in `0..max` by rejection sampling on the fewest bytes that
/// cover `max - 1`.
pub fn random_below<R>(rng: &mut R, max: usize) -> usize
where
    R: CryptoRng + ?Sized,
{
    if max <= 1 {
        return 0;
    }
    let bits = usize::BITS - (max - 1).leading_zeros();
    let bytes = bits.div_ceil(8) as usize;
    let mask: u8 = if bits % 8 == 0 {
        0xFF
    } else {
        (1u8 << (bits % 8)) - 1
    };

    let mut buf = [0u8; std::mem::size_of::<usize>()];
    loop {
        rng.fill_bytes(&mut buf[..bytes]);
        buf[0] &= mask;
        let value = buf[..bytes]
            .iter()
            .fold(0usize, |acc, &b| (acc << 8) | usize::from(b));
        if value < max {
            return value;
        }
    }
}

/// Shuffle `blocks` (Fisher-Yates), then move the block that starts at
/// `boot_start` to the front. The bootloader needs the first boot flash page
/// before any other boot flash write.
pub fn shuffle_blocks<R>(blocks: &mut [Block], boot_start: u32, rng: &mut R)
where
    R: CryptoRng + ?Sized,
{
    for i in (1..blocks.len()).rev() {
        let j = random_below(rng, i + 1);
        blocks.swap(i, j);
    }

    if let Some(pos) = blocks.iter().position(|b| b.address == boot_start) {
        debug!("Moving boot flash block from position {pos} to 0");
        blocks.swap(0, pos);
    }
}
