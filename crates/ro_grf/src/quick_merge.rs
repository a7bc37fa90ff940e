//! Free space tracking for incremental saves, and the choice between appending and repacking.

use tracing::debug;

use crate::entry::{align8, FileEntry, Modification};
use crate::header::Header;
use crate::table::FileTable;

/// Waste above which a full rewrite is forced
pub const MAX_WASTED_BYTES: u64 = 20 * 1024 * 1024;

/// Below this many live entries a full rewrite is always cheap
pub const MIN_ENTRIES_FOR_MERGE: usize = 30;

/// Above this many additions a full rewrite is forced
pub const MAX_ADDED_FOR_MERGE: usize = 500;

/// Waste above `1 / WASTE_RATIO_DIVISOR` of the table offset forces a full rewrite
const WASTE_RATIO_DIVISOR: u64 = 10;

/// A gap in the blob region, relative to the end of the header
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FreeSpace {
    pub offset: u64,
    pub len: u64,
}

/// Edits that cannot be expressed by appending
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct PendingChanges {
    /// The user key is being set, changed or removed
    pub key_transition: bool,
    /// The container is being converted to another version
    pub version_change: bool,
}

/// Allocator over the gaps between the payloads the current file table references
///
/// Gaps are kept sorted by size so the first fitting gap is also the tightest one. Requests that
/// fit nowhere are served from the end of the stream, which starts behind the current file table.
/// Removed and replaced entries keep their range until the new table is in charge.
#[derive(Debug, Clone)]
pub struct QuickMergeHelper {
    gaps: Vec<FreeSpace>,
    end_of_stream: u64,
    table_len: u64,
    /// Bytes held by removed and replaced entries, free once the merge is written
    pending_free: u64,
}

impl QuickMergeHelper {
    /// Computes the free space of a container whose table sits at `table_offset` and spans `table_len`
    pub fn new(table: &FileTable, table_offset: u64, table_len: u64) -> Self {
        let mut helper = QuickMergeHelper {
            gaps: Vec::new(),
            end_of_stream: 0,
            table_len,
            pending_free: 0,
        };
        helper.compute_free_space(table, table_offset);
        helper
    }

    /// Rebuilds the gap list from the ranges the file on disk references
    pub fn compute_free_space(&mut self, table: &FileTable, table_offset: u64) {
        let stored: Vec<&FileEntry> = table.all().filter(|e| e.is_file() && !is_incoming(e)).collect();
        let displaced = table
            .displaced()
            .iter()
            .map(|&(offset, len)| (offset, offset + u64::from(len)));
        let released = stored.iter().filter(|e| e.is_removed()).map(|e| e.end() - e.offset);
        self.pending_free = released.chain(displaced.clone().map(|(start, end)| end - start)).sum();

        let mut ranges: Vec<(u64, u64)> = stored.iter().map(|e| (e.offset, e.end())).chain(displaced).collect();
        ranges.sort_unstable();

        self.gaps.clear();
        let mut cursor = 0;
        for (start, end) in ranges {
            if start > cursor {
                self.gaps.push(FreeSpace {
                    offset: cursor,
                    len: start - cursor,
                });
            }
            cursor = cursor.max(end);
        }
        if table_offset > cursor {
            self.gaps.push(FreeSpace {
                offset: cursor,
                len: table_offset - cursor,
            });
        }

        self.sort();
        self.end_of_stream = cursor.max(table_offset) + self.table_len;
    }

    fn sort(&mut self) {
        self.gaps.sort_by_key(|gap| (gap.len, gap.offset));
    }

    /// Gaps, smallest first
    pub fn free_space(&self) -> &[FreeSpace] {
        &self.gaps
    }

    /// Sum of all gaps
    pub fn total_free(&self) -> u64 {
        self.gaps.iter().map(|gap| gap.len).sum()
    }

    /// Where the next request that fits no gap lands
    pub fn end_of_stream(&self) -> u64 {
        self.end_of_stream
    }

    /// Returns the offset for `size` bytes, shrinking the gap it is taken from
    pub fn allocate(&mut self, size: u64) -> u64 {
        if size > 0 {
            if let Some(gap) = self.gaps.iter_mut().find(|gap| gap.len >= size) {
                let offset = gap.offset;
                gap.offset += size;
                gap.len -= size;
                self.sort();
                return offset;
            }
        }

        let offset = self.end_of_stream;
        self.end_of_stream += size;
        offset
    }

    /// Whether the pending edits should be written by a full rewrite instead of being appended
    pub fn should_repack_instead(&self, header: &Header, table: &FileTable, pending: PendingChanges) -> bool {
        if pending.key_transition || pending.version_change {
            debug!(?pending, "repack: structural change pending");
            return true;
        }
        if header.is_encrypted && !header.encrypt_file_table {
            debug!("repack: content is encrypted but the file table is not");
            return true;
        }
        if table
            .all()
            .any(|e| e.modification.intersects(Modification::ENCRYPT | Modification::DECRYPT))
        {
            debug!("repack: entries change their encryption");
            return true;
        }

        let live = table.len();
        if live < MIN_ENTRIES_FOR_MERGE {
            debug!(live, "repack: too few entries");
            return true;
        }

        let incoming: Vec<&FileEntry> = table.entries().filter(|e| is_incoming(e)).collect();
        if incoming.len() > MAX_ADDED_FOR_MERGE {
            debug!(added = incoming.len(), "repack: too many additions");
            return true;
        }

        let mut simulation = self.clone();
        for entry in incoming {
            let estimate = if entry.modification.contains(Modification::ADDED) {
                align8(entry.decompressed_size)
            } else {
                align8(entry.compressed_size)
            };
            simulation.allocate(u64::from(estimate));
        }

        // the current table and released payloads are left behind as gaps once the new table is written
        let waste = simulation.total_free() + self.table_len + self.pending_free;
        let table_offset = simulation.end_of_stream;
        if waste > MAX_WASTED_BYTES || waste * WASTE_RATIO_DIVISOR > table_offset {
            debug!(waste, table_offset, "repack: too much wasted space");
            return true;
        }

        false
    }
}

/// Whether an entry's bytes come from outside this container
pub(crate) fn is_incoming(entry: &FileEntry) -> bool {
    entry.is_pending() || entry.modification.contains(Modification::GRF_MERGE)
}
