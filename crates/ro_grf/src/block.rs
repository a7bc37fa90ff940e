//! Windowed bulk reads over the blob region.
//!
//! Copying entries one by one costs a seek and a lock per entry. Entries are instead grouped
//! in offset order into windows of at most [`WINDOW_SIZE`] bytes, each read with a single call.

use crate::error::Result;
use crate::handle::ArchiveHandle;
use crate::types::HEADER_SIZE;

/// Largest span read at once, unless a single entry is bigger
pub const WINDOW_SIZE: u64 = 8 * 1024 * 1024;

/// A byte range requested from the blob region, relative to the end of the header
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct StoredRange {
    pub offset: u64,
    pub len: u64,
}

impl StoredRange {
    fn end(&self) -> u64 {
        self.offset + self.len
    }
}

/// One window and the requests it serves
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamReadBlockInfo {
    pub start: u64,
    pub len: u64,
    /// Indices into the planned ranges
    pub members: Vec<usize>,
}

impl StreamReadBlockInfo {
    /// Groups `ranges`, which must be sorted by offset, into windows
    pub fn plan(ranges: &[StoredRange]) -> Vec<StreamReadBlockInfo> {
        let mut blocks: Vec<StreamReadBlockInfo> = Vec::new();

        for (index, range) in ranges.iter().enumerate() {
            if let Some(block) = blocks.last_mut() {
                let end = (block.start + block.len).max(range.end());
                if range.offset >= block.start && end - block.start <= WINDOW_SIZE {
                    block.len = end - block.start;
                    block.members.push(index);
                    continue;
                }
            }

            blocks.push(StreamReadBlockInfo {
                start: range.offset,
                len: range.len,
                members: vec![index],
            });
        }

        blocks
    }

    /// Reads the whole window
    pub fn read(&self, handle: &ArchiveHandle) -> Result<LoadedBlock> {
        Ok(LoadedBlock {
            start: self.start,
            data: handle.read_at(HEADER_SIZE + self.start, self.len as usize)?,
        })
    }
}

/// The bytes of a window
#[derive(Debug)]
pub struct LoadedBlock {
    start: u64,
    data: Vec<u8>,
}

impl LoadedBlock {
    /// The bytes of a range inside this window
    pub fn slice(&self, range: StoredRange) -> &[u8] {
        let from = (range.offset - self.start) as usize;
        &self.data[from..from + range.len as usize]
    }
}
