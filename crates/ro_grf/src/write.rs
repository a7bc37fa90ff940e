//! Writing containers
//!
//! Every save is a composition of the same phases:
//!
//! 1. entries already stored in the container are streamed out in offset order, re-keyed only
//!    when their encryption or the target version requires it,
//! 2. entries folded in from another container are copied the same way,
//! 3. pending additions are compressed on the worker pool and written in table order.
//!
//! A full rewrite packs everything behind a fresh header, a compacting rewrite additionally stores
//! identical payloads once, and a quick merge only writes the additions into free space.

use std::collections::HashMap;
use std::fs::File;
use std::io::{Seek, SeekFrom, Write};
use std::sync::atomic::{AtomicUsize, Ordering};

use bon::Builder;
use md5::{Digest, Md5};
use rand::seq::SliceRandom;
use tracing::{debug, info, instrument};

use crate::block::{StoredRange, StreamReadBlockInfo};
use crate::cipher::Cipher;
use crate::compression::{decompress, Codec, CodecConfig, StoredFormat};
use crate::des::{self, LegacyCipher};
use crate::entry::{align8, EntryFlags, FileEntry, Modification};
use crate::error::{Error, Result};
use crate::handle::ArchiveHandle;
use crate::header::Header;
use crate::pool::{CancelToken, Progress, WorkerPool};
use crate::quick_merge::{is_incoming, PendingChanges, QuickMergeHelper};
use crate::table::FileTable;
use crate::types::HEADER_SIZE;
use crate::user_key::{UserKey, UserKeyCipher};
use crate::version::{GrfVersion, TableDialect};

/// Additions up to this size are compressed in a few large batches
pub const SMALL_FILE_LIMIT: u32 = 2048;

/// Result of a write that may decline to run
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The container was written
    Written,
    /// The edits cannot be appended, a full rewrite is needed instead
    RepackRequired,
}

/// How a full rewrite lays out payloads
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub enum RewriteMode {
    /// Every entry gets its own slot, entries sharing a slot keep sharing it
    #[default]
    Repack,
    /// Identical payloads are stored once
    Compact,
}

/// A container entries are read from while writing
#[derive(Debug, Clone)]
pub struct ArchiveSource {
    pub handle: ArchiveHandle,
    pub version: GrfVersion,
    /// Key validated for this container
    pub key: Option<UserKey>,
}

impl ArchiveSource {
    fn is_legacy(&self) -> bool {
        self.version.is_legacy_encrypted()
    }
}

/// Writer for the whole life of one save
///
/// The header and table handed to the write methods describe the target: version, encryption
/// flags and key. They are updated in place to describe what was written.
#[derive(Builder)]
pub struct GrfWriter<'a> {
    pool: &'a WorkerPool,

    #[builder(default)]
    codec: CodecConfig,

    /// Where the stored entries of the table live
    source: Option<ArchiveSource>,

    /// Where entries flagged [`Modification::GRF_MERGE`] live
    merge: Option<ArchiveSource>,

    progress: Option<&'a Progress>,

    cancel: Option<&'a CancelToken>,
}

/// The payload of an entry in its final form
#[derive(Debug)]
struct Prepared {
    /// Slot content, padded to the aligned size
    bytes: Vec<u8>,
    compressed: u32,
    decompressed: u32,
    flags: EntryFlags,
    cycle: i32,
}

/// Version and encryption entries are written with
#[derive(Debug, Clone)]
struct Target {
    legacy: bool,
    raw_only: bool,
    key: Option<UserKey>,
}

impl Target {
    fn from_header(header: &Header) -> Result<Self> {
        let dialect = header.version.dialect()?;
        let key = if header.is_encrypted {
            Some(header.require_key()?.clone())
        } else {
            None
        };
        Ok(Target {
            legacy: dialect == TableDialect::V1,
            raw_only: dialect == TableDialect::Alpha,
            key,
        })
    }

    fn key_for(&self, entry: &FileEntry) -> Option<&UserKey> {
        if entry.is_file() && !entry.is_key_marker() {
            self.key.as_ref()
        } else {
            None
        }
    }

    /// Legacy cycle of an entry coming from a container of the given kind
    fn cycle_for(&self, entry: &FileEntry, compressed: u32, from_legacy: bool) -> i32 {
        if !entry.is_file() {
            -1
        } else if self.legacy {
            des::cycle_for_entry(&entry.name, compressed)
        } else if from_legacy {
            -1
        } else {
            entry.cycle
        }
    }
}

/// Identifies a slot of a source container
#[derive(Debug, Hash, PartialEq, Eq)]
struct Origin {
    source: u8,
    offset: u64,
    len: usize,
    flags: u8,
    cycle: i32,
}

/// Identifies a payload by content
#[derive(Debug, Hash, PartialEq, Eq)]
struct ContentKey {
    digest: [u8; 16],
    compressed: u32,
    decompressed: u32,
    flags: u8,
    cycle: i32,
}

impl ContentKey {
    fn of(prepared: &Prepared) -> Self {
        ContentKey {
            digest: Md5::digest(&prepared.bytes).into(),
            compressed: prepared.compressed,
            decompressed: prepared.decompressed,
            flags: prepared.flags.persisted(),
            cycle: prepared.cycle,
        }
    }
}

/// Appends slots to the blob region of a full rewrite
struct Emitter<'w, W: Write> {
    out: &'w mut W,
    cursor: u64,
    narrow: bool,
    shared: HashMap<Origin, u64>,
    contents: Option<HashMap<ContentKey, u64>>,
    deduplicated: usize,
}

impl<'w, W: Write> Emitter<'w, W> {
    fn new(out: &'w mut W, narrow: bool, mode: RewriteMode) -> Self {
        Emitter {
            out,
            cursor: 0,
            narrow,
            shared: HashMap::new(),
            contents: (mode == RewriteMode::Compact).then(HashMap::new),
            deduplicated: 0,
        }
    }

    fn place(&mut self, prepared: &Prepared, origin: Option<Origin>) -> Result<u64> {
        if let Some(offset) = origin.as_ref().and_then(|o| self.shared.get(o)) {
            return Ok(*offset);
        }

        let content = self.contents.as_ref().map(|_| ContentKey::of(prepared));
        if let (Some(contents), Some(key)) = (&self.contents, &content) {
            if let Some(&offset) = contents.get(key) {
                self.deduplicated += 1;
                if let Some(origin) = origin {
                    self.shared.insert(origin, offset);
                }
                return Ok(offset);
            }
        }

        let offset = self.cursor;
        self.out.write_all(&prepared.bytes)?;
        self.cursor += prepared.bytes.len() as u64;
        if self.narrow && self.cursor > u64::from(u32::MAX) {
            return Err(Error::CapacityExceeded);
        }

        if let Some(origin) = origin {
            self.shared.insert(origin, offset);
        }
        if let (Some(contents), Some(key)) = (self.contents.as_mut(), content) {
            contents.insert(key, offset);
        }
        Ok(offset)
    }
}

/// Progress over every phase of a save
struct Tracker<'p> {
    total: usize,
    done: AtomicUsize,
    progress: Option<&'p Progress>,
}

impl Tracker<'_> {
    fn advance(&self) {
        let done = self.done.fetch_add(1, Ordering::Relaxed) + 1;
        if let Some(progress) = self.progress {
            progress.set(done as f32 * 100.0 / self.total.max(1) as f32);
        }
    }
}

impl GrfWriter<'_> {
    fn is_cancelled(&self) -> bool {
        self.cancel.is_some_and(|c| c.is_cancelled())
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }

    fn set_progress(&self, value: f32) {
        if let Some(progress) = self.progress {
            progress.set(value);
        }
    }

    /// Writes a complete container into `out`
    #[instrument(skip_all, fields(version = %header.version, ?mode), err)]
    pub fn write<W: Write + Seek>(
        &self,
        out: &mut W,
        header: &mut Header,
        table: &mut FileTable,
        mode: RewriteMode,
    ) -> Result<()> {
        self.set_progress(Progress::INDETERMINATE);
        let target = Target::from_header(header)?;

        let mut live: Vec<FileEntry> = table.entries().cloned().collect();
        let mut stored = Vec::new();
        let mut merged = Vec::new();
        let mut added = Vec::new();
        for (index, entry) in live.iter().enumerate() {
            if !entry.is_file() {
                continue;
            }
            if entry.is_pending() {
                added.push(index);
            } else if entry.modification.contains(Modification::GRF_MERGE) {
                merged.push(index);
            } else {
                stored.push(index);
            }
        }
        debug!(stored = stored.len(), merged = merged.len(), added = added.len(), "writing entries");

        let tracker = Tracker {
            total: stored.len() + merged.len() + added.len(),
            done: AtomicUsize::new(0),
            progress: self.progress,
        };

        out.seek(SeekFrom::Start(0))?;
        out.write_all(&[0u8; HEADER_SIZE as usize])?;
        let mut emitter = Emitter::new(out, header.version.has_32bit_offsets(), mode);

        if !stored.is_empty() {
            let source = self.source.as_ref().ok_or_else(|| {
                Error::CustomError("stored entries have no container to be copied from".into())
            })?;
            self.copy_from(source, 0, &stored, &mut live, &target, &mut emitter, &tracker)?;
        }

        if !merged.is_empty() {
            let merge = self
                .merge
                .as_ref()
                .ok_or_else(|| Error::CustomError("merged entries have no container to be copied from".into()))?;
            self.copy_from(merge, 1, &merged, &mut live, &target, &mut emitter, &tracker)?;
        }

        for (index, prepared) in self.prepare_added(&added, &live, &target, &tracker)? {
            let offset = emitter.place(&prepared, None)?;
            apply(&mut live[index], prepared, offset);
        }

        let table_offset = emitter.cursor;
        let deduplicated = emitter.deduplicated;

        let mut written = FileTable::new();
        for mut entry in live {
            if !entry.is_file() {
                entry.offset = 0;
            }
            written.insert(entry);
        }
        written.commit();

        header.file_table_offset = table_offset;
        let serialized = written.serialize(header, &self.codec)?;
        written.set_table_sizes(serialized.compressed_size, serialized.size);

        out.seek(SeekFrom::Start(HEADER_SIZE + table_offset))?;
        out.write_all(&serialized.bytes)?;
        header.write(out, written.len())?;
        out.flush()?;

        info!(
            files = written.len(),
            table_offset,
            deduplicated,
            "container written"
        );
        *table = written;
        self.set_progress(100.0);
        Ok(())
    }

    /// Appends the pending additions of `table` into the free space of `file`
    ///
    /// Existing payloads are left untouched and the header is written last, so an interrupted
    /// merge leaves the previous table in charge.
    #[instrument(skip_all, fields(version = %header.version), err)]
    pub fn quick_merge(
        &self,
        file: &mut File,
        header: &mut Header,
        table: &mut FileTable,
        pending: PendingChanges,
    ) -> Result<WriteOutcome> {
        self.set_progress(Progress::INDETERMINATE);

        let untouched = table.all().all(|e| e.modification.is_empty() && !e.is_pending());
        if pending == PendingChanges::default() && untouched {
            debug!("nothing to merge");
            self.set_progress(100.0);
            return Ok(WriteOutcome::Written);
        }

        let file_len = file.metadata()?.len();
        let table_len = file_len.saturating_sub(header.table_position());
        let mut helper = QuickMergeHelper::new(table, header.file_table_offset, table_len);
        if helper.should_repack_instead(header, table, pending) {
            info!("quick merge declined, a full rewrite is needed");
            return Ok(WriteOutcome::RepackRequired);
        }

        let target = Target::from_header(header)?;
        let mut live: Vec<FileEntry> = table.all().cloned().collect();
        let added: Vec<usize> = live
            .iter()
            .enumerate()
            .filter(|(_, e)| e.is_file() && !e.is_removed() && e.is_pending())
            .map(|(i, _)| i)
            .collect();
        let merged: Vec<usize> = live
            .iter()
            .enumerate()
            .filter(|(_, e)| e.is_file() && !e.is_removed() && !e.is_pending() && is_incoming(e))
            .map(|(i, _)| i)
            .collect();

        let tracker = Tracker {
            total: added.len() + merged.len(),
            done: AtomicUsize::new(0),
            progress: self.progress,
        };

        let mut prepared = self.prepare_added(&added, &live, &target, &tracker)?;
        if !merged.is_empty() {
            let merge = self
                .merge
                .as_ref()
                .ok_or_else(|| Error::CustomError("merged entries have no container to be copied from".into()))?;
            prepared.extend(self.rekey_each(merge, &merged, &live, &target, &tracker)?);
            prepared.sort_by_key(|(index, _)| *index);
        }

        let narrow = header.version.has_32bit_offsets();
        for (index, prepared) in prepared {
            self.check_cancelled()?;
            let len = prepared.bytes.len() as u64;
            let offset = helper.allocate(len);
            if narrow && offset + len > u64::from(u32::MAX) {
                return Err(Error::CapacityExceeded);
            }
            file.seek(SeekFrom::Start(HEADER_SIZE + offset))?;
            file.write_all(&prepared.bytes)?;
            apply(&mut live[index], prepared, offset);
        }

        let mut written = FileTable::new();
        for entry in live {
            written.insert(entry);
        }
        written.commit();

        let table_offset = helper.end_of_stream();
        header.file_table_offset = table_offset;
        let serialized = written.serialize(header, &self.codec)?;
        written.set_table_sizes(serialized.compressed_size, serialized.size);

        file.seek(SeekFrom::Start(HEADER_SIZE + table_offset))?;
        file.write_all(&serialized.bytes)?;
        file.set_len(HEADER_SIZE + table_offset + serialized.bytes.len() as u64)?;
        file.sync_data()?;

        header.write(file, written.len())?;
        file.sync_all()?;

        info!(
            files = written.len(),
            free = helper.total_free(),
            table_offset,
            "quick merge written"
        );
        *table = written;
        self.set_progress(100.0);
        Ok(WriteOutcome::Written)
    }

    /// Streams stored entries of `source` in offset order through the emitter
    #[allow(clippy::too_many_arguments)]
    fn copy_from<W: Write>(
        &self,
        source: &ArchiveSource,
        source_id: u8,
        indices: &[usize],
        live: &mut [FileEntry],
        target: &Target,
        emitter: &mut Emitter<'_, W>,
        tracker: &Tracker<'_>,
    ) -> Result<()> {
        let mut order = indices.to_vec();
        order.sort_by_key(|&i| (live[i].offset, i));
        let ranges: Vec<StoredRange> = order
            .iter()
            .map(|&i| StoredRange {
                offset: live[i].offset,
                len: u64::from(live[i].stored_len()),
            })
            .collect();

        let from_legacy = source.is_legacy();
        for block in StreamReadBlockInfo::plan(&ranges) {
            self.check_cancelled()?;
            let loaded = block.read(&source.handle)?;

            let prepared = {
                let live = &*live;
                self.pool.parallel_for(
                    &block.members,
                    |_| tracker.advance(),
                    || self.is_cancelled(),
                    |_, &member| {
                        let entry = &live[order[member]];
                        let slot = loaded.slice(ranges[member]).to_vec();
                        rekey(entry, slot, source.key.as_ref(), from_legacy, target)
                    },
                )?
            };

            for (&member, prepared) in block.members.iter().zip(prepared) {
                let index = order[member];
                let origin = Origin {
                    source: source_id,
                    offset: live[index].offset,
                    len: prepared.bytes.len(),
                    flags: prepared.flags.persisted(),
                    cycle: prepared.cycle,
                };
                let offset = emitter.place(&prepared, Some(origin))?;
                apply(&mut live[index], prepared, offset);
            }
        }

        Ok(())
    }

    /// Reads and re-keys entries of `source` one by one
    fn rekey_each(
        &self,
        source: &ArchiveSource,
        indices: &[usize],
        live: &[FileEntry],
        target: &Target,
        tracker: &Tracker<'_>,
    ) -> Result<Vec<(usize, Prepared)>> {
        let from_legacy = source.is_legacy();
        let prepared = self.pool.parallel_for(
            indices,
            |_| tracker.advance(),
            || self.is_cancelled(),
            |_, &index| {
                let entry = &live[index];
                let slot = entry.read_raw(&source.handle)?;
                rekey(entry, slot, source.key.as_ref(), from_legacy, target)
            },
        )?;
        Ok(indices.iter().copied().zip(prepared).collect())
    }

    /// Compresses and encrypts pending additions, returned in table order
    fn prepare_added(
        &self,
        indices: &[usize],
        live: &[FileEntry],
        target: &Target,
        tracker: &Tracker<'_>,
    ) -> Result<Vec<(usize, Prepared)>> {
        let (small, mut large): (Vec<usize>, Vec<usize>) = indices
            .iter()
            .partition(|&&i| live[i].decompressed_size <= SMALL_FILE_LIMIT);
        large.shuffle(&mut rand::rng());

        let codec = if target.raw_only {
            CodecConfig::builder().codec(Codec::Raw).build()
        } else {
            self.codec
        };
        let prepare = |_: usize, &index: &usize| prepare_new(&live[index], &codec, target);

        let small_workers = (self.pool.workers() / 4).max(1);
        let small_prepared = self.pool.parallel_for_with(
            small_workers,
            &small,
            |_| tracker.advance(),
            || self.is_cancelled(),
            prepare,
        )?;
        let large_prepared =
            self.pool
                .parallel_for(&large, |_| tracker.advance(), || self.is_cancelled(), prepare)?;

        let mut prepared: Vec<(usize, Prepared)> = small
            .into_iter()
            .zip(small_prepared)
            .chain(large.into_iter().zip(large_prepared))
            .collect();
        prepared.sort_by_key(|(index, _)| *index);
        Ok(prepared)
    }
}

/// Records where and how an entry was written
fn apply(entry: &mut FileEntry, prepared: Prepared, offset: u64) {
    entry.offset = offset;
    entry.compressed_size = prepared.compressed;
    entry.aligned_size = prepared.bytes.len() as u32;
    entry.decompressed_size = prepared.decompressed;
    entry.flags = prepared.flags;
    entry.cycle = prepared.cycle;
}

/// Compresses a pending addition
fn prepare_new(entry: &FileEntry, codec: &CodecConfig, target: &Target) -> Result<Prepared> {
    let Some(source) = &entry.source else {
        return Err(Error::CustomError(format!("{} has no pending content", entry.name)));
    };
    let data = source.load()?;
    let decompressed = u32::try_from(data.len()).map_err(|_| Error::CapacityExceeded)?;

    let mut flags = EntryFlags::FILE;
    let payload = if codec.is_raw() || entry.is_key_marker() {
        flags |= EntryFlags::RAW_DATA;
        data
    } else if data.is_empty() {
        data
    } else {
        if codec.codec == Codec::Lzma {
            flags |= EntryFlags::LZMA;
        }
        codec.compress(&data)?
    };

    let compressed = u32::try_from(payload.len()).map_err(|_| Error::CapacityExceeded)?;
    let cycle = if target.legacy {
        des::cycle_for_entry(&entry.name, compressed)
    } else {
        -1
    };
    seal(payload, decompressed, flags, cycle, target.key_for(entry))
}

/// Brings a stored slot to the form the target expects
fn rekey(
    entry: &FileEntry,
    mut slot: Vec<u8>,
    source_key: Option<&UserKey>,
    from_legacy: bool,
    target: &Target,
) -> Result<Prepared> {
    let compressed = entry.compressed_size;
    let decompressed = entry.decompressed_size;
    let has_user = entry.flags.contains(EntryFlags::USER_CRYPT);
    let target_key = target.key_for(entry);
    let cycle = target.cycle_for(entry, compressed, from_legacy);
    let needs_raw = target.raw_only && entry.stored_format() != StoredFormat::Raw;

    let user_unchanged = match (has_user, target_key) {
        (false, None) => true,
        (true, Some(key)) => source_key == Some(key),
        _ => false,
    };
    if user_unchanged && cycle == entry.cycle && !needs_raw {
        slot.resize(align8(compressed) as usize, 0);
        return Ok(Prepared {
            bytes: slot,
            compressed,
            decompressed,
            flags: entry.flags,
            cycle,
        });
    }

    entry.decrypt_stored(&mut slot, source_key)?;

    let mut flags = entry.flags;
    if needs_raw {
        slot = decompress(&slot, decompressed as usize, entry.stored_format())?;
        flags.remove(EntryFlags::LZSS | EntryFlags::LZMA);
        flags.insert(EntryFlags::RAW_DATA);
    }

    let cycle = target.cycle_for(entry, slot.len() as u32, from_legacy);
    seal(slot, decompressed, flags, cycle, target_key)
}

/// Applies the cipher layers to a compressed payload: legacy first, user key last
fn seal(
    mut data: Vec<u8>,
    decompressed: u32,
    mut flags: EntryFlags,
    cycle: i32,
    key: Option<&UserKey>,
) -> Result<Prepared> {
    let compressed = u32::try_from(data.len()).map_err(|_| Error::CapacityExceeded)?;
    let aligned = align8(compressed) as usize;
    data.resize(aligned, 0);

    flags.remove(EntryFlags::MIXED_CRYPT | EntryFlags::HEADER_CRYPT | EntryFlags::USER_CRYPT);
    if cycle >= 0 {
        LegacyCipher.encrypt(&cycle, &mut data, aligned)?;
        flags.insert(if cycle > 0 {
            EntryFlags::MIXED_CRYPT
        } else {
            EntryFlags::HEADER_CRYPT
        });
    }

    if let Some(key) = key {
        let probeable = cycle < 0 && !flags.intersects(EntryFlags::RAW_DATA | EntryFlags::LZSS);
        let encrypted = if probeable {
            UserKeyCipher.encrypt_probed(key, &mut data, compressed as usize)?
        } else {
            UserKeyCipher.encrypt(key, &mut data, compressed as usize)?;
            true
        };
        if encrypted {
            flags.insert(EntryFlags::USER_CRYPT);
        }
    }

    Ok(Prepared {
        bytes: data,
        compressed,
        decompressed,
        flags,
        cycle,
    })
}

#[cfg(test)]
mod test {
    use std::io::Cursor;
    use std::sync::Arc;

    use pretty_assertions::assert_eq;

    use super::{seal, GrfWriter, RewriteMode};
    use crate::entry::{EntryFlags, EntrySource, FileEntry};
    use crate::error::{Error, Result};
    use crate::header::Header;
    use crate::pool::{CancelToken, WorkerPool};
    use crate::table::FileTable;
    use crate::types::HEADER_SIZE;
    use crate::user_key::UserKey;
    use crate::version::GrfVersion;

    fn pending_table(files: &[(&str, &[u8])]) -> FileTable {
        let mut table = FileTable::new();
        for (name, data) in files {
            let data: Arc<[u8]> = (*data).into();
            let len = data.len() as u32;
            table.insert(FileEntry::added(name, EntrySource::Buffer(data), len));
        }
        table
    }

    #[test]
    fn new_container_layout() -> Result<()> {
        let pool = WorkerPool::new(2)?;
        let writer = GrfWriter::builder().pool(&pool).build();

        let mut header = Header::new(GrfVersion::V0X200);
        let mut table = pending_table(&[("a.txt", b"hello hello hello"), ("empty.txt", b""), ("b.txt", b"world")]);

        let mut out = Cursor::new(Vec::new());
        writer.write(&mut out, &mut header, &mut table, RewriteMode::Repack)?;

        let aligned: u64 = table.entries().map(|e| u64::from(e.aligned_size())).sum();
        assert_eq!(header.table_position(), HEADER_SIZE + aligned);
        assert_eq!(table.len(), 3);
        assert!(table.entries().all(|e| e.aligned_size() % 8 == 0 && e.aligned_size() >= e.compressed_size()));
        assert!(table.entries().all(|e| !e.is_pending()));
        assert_eq!(table.by_name("empty.txt")?.compressed_size(), 0);
        Ok(())
    }

    #[test]
    fn writes_are_deterministic() -> Result<()> {
        let pool = WorkerPool::new(4)?;
        let writer = GrfWriter::builder().pool(&pool).build();
        let files: Vec<(String, Vec<u8>)> = (0..40)
            .map(|i| (format!("data\\{i}.txt"), vec![b'a' + (i % 26) as u8; 100 + i * 150]))
            .collect();
        let refs: Vec<(&str, &[u8])> = files.iter().map(|(n, d)| (n.as_str(), d.as_slice())).collect();

        let mut first = Cursor::new(Vec::new());
        writer.write(&mut first, &mut Header::default(), &mut pending_table(&refs), RewriteMode::Repack)?;
        let mut second = Cursor::new(Vec::new());
        writer.write(&mut second, &mut Header::default(), &mut pending_table(&refs), RewriteMode::Repack)?;

        assert_eq!(first.into_inner(), second.into_inner());
        Ok(())
    }

    #[test]
    fn encryption_requires_a_key() -> Result<()> {
        let pool = WorkerPool::new(1)?;
        let writer = GrfWriter::builder().pool(&pool).build();

        let mut header = Header::default();
        header.is_encrypted = true;
        let mut table = pending_table(&[("a.txt", b"a")]);
        let result = writer.write(&mut Cursor::new(Vec::new()), &mut header, &mut table, RewriteMode::Repack);
        assert!(matches!(result, Err(Error::NoKeySet)));
        Ok(())
    }

    #[test]
    fn cancelled_writes_fail() -> Result<()> {
        let pool = WorkerPool::new(1)?;
        let cancel = CancelToken::default();
        cancel.cancel();
        let writer = GrfWriter::builder().pool(&pool).cancel(&cancel).build();

        let mut table = pending_table(&[("a.txt", b"a")]);
        let result = writer.write(&mut Cursor::new(Vec::new()), &mut Header::default(), &mut table, RewriteMode::Repack);
        assert!(matches!(result, Err(Error::Cancelled)));
        Ok(())
    }

    #[test]
    fn sealing_layers() -> Result<()> {
        let key = UserKey::derive("secret");

        let raw = seal(b"raw payload".to_vec(), 11, EntryFlags::FILE | EntryFlags::RAW_DATA, -1, Some(&key))?;
        assert!(raw.flags.contains(EntryFlags::USER_CRYPT));
        assert_eq!(raw.bytes.len(), 16);
        assert_eq!(raw.compressed, 11);

        let legacy = seal(vec![0x78; 30], 60, EntryFlags::FILE, 0, None)?;
        assert!(legacy.flags.contains(EntryFlags::HEADER_CRYPT));
        assert_eq!(legacy.bytes.len(), 32);
        Ok(())
    }
}
