//! Contiguous memory runs and region clamping.

use log::debug;

use crate::error::{Error, Result};
use crate::image::hex::{HexRecord, RecordType};

/// A contiguous run of bytes at a fixed address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryRun {
    /// Address of the first byte.
    pub address: u32,
    /// Run contents.
    pub data: Vec<u8>,
}

impl MemoryRun {
    /// Create a run.
    pub fn new(address: u32, data: Vec<u8>) -> Self {
        Self { address, data }
    }

    /// One past the last address, computed without wrapping.
    pub fn end(&self) -> u64 {
        u64::from(self.address) + self.data.len() as u64
    }

    /// Whether the run holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// An address window the image may write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllowedRegion {
    /// First allowed address.
    pub start: u32,
    /// Window size in bytes.
    pub length: u32,
}

impl AllowedRegion {
    /// Create a region.
    pub fn new(start: u32, length: u32) -> Self {
        Self { start, length }
    }

    /// One past the last address, computed without wrapping.
    pub fn end(&self) -> u64 {
        u64::from(self.start) + u64::from(self.length)
    }
}

/// Result of merging data records into runs.
#[derive(Debug, Clone, Default)]
pub struct Assembly {
    /// Runs in record order.
    pub runs: Vec<MemoryRun>,
    /// Discontinuities between consecutive data records.
    pub gaps: usize,
}

/// Merge consecutive data records into runs.
///
/// A record continues the current run when its address is exactly the end of
/// the previous record; anything else (a jump forward or backward) starts a
/// new run. Non-data records are ignored.
pub fn assemble<'a, I>(records: I) -> Assembly
where
    I: IntoIterator<Item = &'a HexRecord>,
{
    let mut assembly = Assembly::default();
    let mut next_address: Option<u64> = None;
    let mut bytes = 0usize;

    for record in records {
        if record.record_type != RecordType::Data {
            continue;
        }
        bytes += record.data.len();
        let start = u64::from(record.address);
        match assembly.runs.last_mut() {
            Some(run) if next_address == Some(start) => {
                run.data.extend_from_slice(&record.data);
            },
            _ => {
                if next_address.is_some() {
                    assembly.gaps += 1;
                }
                assembly
                    .runs
                    .push(MemoryRun::new(record.address, record.data.clone()));
            },
        }
        next_address = Some(start + record.data.len() as u64);
    }

    debug!(
        "Assembled {} bytes into {} runs ({} gaps)",
        bytes,
        assembly.runs.len(),
        assembly.gaps
    );
    assembly
}

/// Clamp `run` to the allowed `regions`.
///
/// A run that misses every region becomes empty. A run that intersects
/// exactly one region is cut down to the intersection. A run that touches
/// more than one region is rejected.
pub fn clamp(run: &MemoryRun, regions: &[AllowedRegion]) -> Result<MemoryRun> {
    let run_end = run.end();
    let hits: Vec<(u64, u64)> = regions
        .iter()
        .filter_map(|region| {
            let start = u64::from(run.address).max(u64::from(region.start));
            let end = run_end.min(region.end());
            (end > start).then_some((start, end))
        })
        .collect();

    match hits.as_slice() {
        [] => Ok(MemoryRun::new(run.address, Vec::new())),
        [(start, end)] => {
            let offset = (start - u64::from(run.address)) as usize;
            let length = (end - start) as usize;
            // start lies inside a u32 region, so it fits
            let address = *start as u32;
            Ok(MemoryRun::new(
                address,
                run.data[offset..offset + length].to_vec(),
            ))
        },
        _ => Err(Error::UnsupportedSplit {
            start: run.address,
            end: run_end.min(u64::from(u32::MAX)) as u32,
        }),
    }
}
