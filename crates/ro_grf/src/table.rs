//! The file table and its four on-disk dialects.

use std::io::{Cursor, Read, Seek, SeekFrom, Write};

use binrw::{BinRead, BinWrite, NullString};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use indexmap::IndexMap;
use tracing::{debug, instrument};

use crate::cipher::Cipher;
use crate::compression::{decompress, looks_encrypted, CodecConfig, StoredFormat};
use crate::des;
use crate::entry::{align8, lookup_key, normalize, EntryFlags, FileEntry, Modification};
use crate::error::{Error, FileNotFoundError, Result};
use crate::header::Header;
use crate::quick_merge::is_incoming;
use crate::types::{
    AlphaEntryRecord, EntryRecord, EntryRecordWide, LegacyEntryRecord, TableBlockHeader, HEADER_SIZE,
    LEGACY_ALIGNED_BIAS, LEGACY_SIZE_BIAS,
};
use crate::user_key::UserKeyCipher;
use crate::version::TableDialect;

/// Size of the fixed tail of a 0x1xx record
const LEGACY_RECORD_SIZE: usize = 17;

/// Reserved bytes around the coded name of a 0x1xx record
const LEGACY_NAME_PADDING: usize = 6;

/// A serialized table, ready to be written at the table offset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerializedTable {
    pub bytes: Vec<u8>,
    /// Size of the table as stored, block header excluded
    pub compressed_size: u32,
    /// Size of the records once decompressed
    pub size: u32,
}

/// Insertion ordered map of normalized paths to entries, looked up case insensitively
#[derive(Debug, Clone, Default)]
pub struct FileTable {
    files: IndexMap<Box<str>, FileEntry>,
    /// Blob ranges of stored entries replaced since the last write, still referenced on disk
    displaced: Vec<(u64, u32)>,
    compressed_size: u32,
    size: u32,
}

impl FileTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses the table described by `header`
    ///
    /// Broken records are reported through [`Header::diagnostic`]; only structural damage fails.
    /// With `repair` set, entries pointing past the end of the file are kept.
    #[instrument(skip(reader, header), fields(version = %header.version), err)]
    pub fn parse<R: Read + Seek>(reader: &mut R, header: &mut Header, repair: bool) -> Result<FileTable> {
        let file_len = reader.seek(SeekFrom::End(0))?;
        let position = header.table_position();
        if position > file_len {
            return Err(Error::CorruptedTable(format!(
                "table offset {position} is past the end of the file ({file_len} bytes)"
            )));
        }
        reader.seek(SeekFrom::Start(position))?;

        let mut table = FileTable::new();
        match header.version.dialect()? {
            TableDialect::V3 => table.parse_compressed(reader, header, file_len, true)?,
            TableDialect::V2 => table.parse_compressed(reader, header, file_len, false)?,
            TableDialect::V1 => table.parse_legacy(reader, header)?,
            TableDialect::Alpha => table.parse_alpha(reader, header)?,
        }

        table.check_ranges(header, file_len, repair);

        let declared = header.real_files_count();
        if declared != table.files.len() as i64 {
            header.diagnostic(format!(
                "header declares {declared} files but the table holds {}",
                table.files.len()
            ));
        }

        debug!(files = table.files.len(), "parsed file table");
        Ok(table)
    }

    fn parse_compressed<R: Read + Seek>(
        &mut self,
        reader: &mut R,
        header: &mut Header,
        file_len: u64,
        wide: bool,
    ) -> Result<()> {
        if wide {
            reader.read_i32::<LittleEndian>()?;
        }
        let block = TableBlockHeader::read(reader)?;
        let remaining = file_len.saturating_sub(reader.stream_position()?);
        if u64::from(block.compressed) > remaining {
            return Err(Error::CorruptedTable(format!(
                "table block of {} bytes exceeds the {remaining} bytes left in the file",
                block.compressed
            )));
        }

        let mut packed = vec![0u8; block.compressed as usize];
        reader.read_exact(&mut packed)?;

        let records = if header.encrypt_file_table {
            let key = header.require_key()?;
            let len = packed.len();
            UserKeyCipher.decrypt(key, &mut packed, len)?;
            if looks_encrypted(&packed) {
                return Err(Error::WrongKey);
            }
            decompress(&packed, block.size as usize, StoredFormat::Auto).map_err(|_| Error::WrongKey)?
        } else {
            decompress(&packed, block.size as usize, StoredFormat::Auto)
                .map_err(|e| Error::CorruptedTable(e.to_string()))?
        };

        self.compressed_size = block.compressed;
        self.size = block.size;

        let len = records.len() as u64;
        let mut cursor = Cursor::new(records);
        while cursor.position() < len {
            let position = cursor.position();
            let record = if wide {
                EntryRecordWide::read(&mut cursor).map(|r| {
                    (r.name, r.compressed, r.aligned, r.decompressed, r.flags, r.offset)
                })
            } else {
                EntryRecord::read(&mut cursor).map(|r| {
                    (r.name, r.compressed, r.aligned, r.decompressed, r.flags, u64::from(r.offset))
                })
            };

            let Ok((NullString(name), compressed, aligned, decompressed, flags, offset)) = record else {
                header.diagnostic(format!("truncated record at table byte {position}"));
                break;
            };

            let mut entry = FileEntry::stored(name, EntryFlags::from_persisted(flags));
            if !set_sizes(&mut entry, compressed, aligned, decompressed, header) {
                continue;
            }
            entry.offset = offset;
            if entry.flags.contains(EntryFlags::MIXED_CRYPT) {
                entry.cycle = des::cycle_for_size(entry.compressed_size);
            } else if entry.flags.contains(EntryFlags::HEADER_CRYPT) {
                entry.cycle = 0;
            }
            self.insert_parsed(entry, header);
        }

        Ok(())
    }

    fn parse_legacy<R: Read + Seek>(&mut self, reader: &mut R, header: &mut Header) -> Result<()> {
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;
        self.size = data.len() as u32;
        self.compressed_size = self.size;

        let mut position = 0;
        while position + 4 <= data.len() {
            let declared = i32::from_le_bytes([
                data[position],
                data[position + 1],
                data[position + 2],
                data[position + 3],
            ]);
            let record_start = position + 4;
            let Some(len) = usize::try_from(declared)
                .ok()
                .filter(|len| *len >= LEGACY_NAME_PADDING)
                .filter(|len| record_start + len + LEGACY_RECORD_SIZE <= data.len())
            else {
                header.diagnostic(format!("invalid record length {declared} at table byte {position}"));
                break;
            };

            let name = des::decode_name(&data[record_start + 2..record_start + len - 4]);
            let tail_start = record_start + len;
            let record = LegacyEntryRecord::read(&mut Cursor::new(&data[tail_start..tail_start + LEGACY_RECORD_SIZE]))?;
            position = tail_start + LEGACY_RECORD_SIZE;

            let mut entry = FileEntry::stored(name, EntryFlags::from_persisted(record.flags));
            let sizes = record
                .packed_compressed
                .checked_sub(record.decompressed)
                .and_then(|value| value.checked_sub(LEGACY_SIZE_BIAS))
                .zip(record.packed_aligned.checked_sub(LEGACY_ALIGNED_BIAS));
            let Some((compressed, aligned)) = sizes else {
                header.diagnostic(format!("{} has invalid sizes", entry.name));
                continue;
            };
            if !set_sizes(&mut entry, compressed, aligned, record.decompressed, header) {
                continue;
            }
            let Ok(offset) = u64::try_from(record.offset) else {
                header.diagnostic(format!("{} has a negative offset", entry.name));
                continue;
            };
            entry.offset = offset;
            if entry.is_file() {
                let cycle = des::cycle_for_entry(&entry.name, entry.compressed_size);
                entry.set_legacy_cycle(cycle);
            }
            self.insert_parsed(entry, header);
        }

        Ok(())
    }

    fn parse_alpha<R: Read + Seek>(&mut self, reader: &mut R, header: &mut Header) -> Result<()> {
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;
        self.size = data.len() as u32;
        self.compressed_size = self.size;

        let len = data.len() as u64;
        let mut cursor = Cursor::new(data);
        while cursor.position() < len {
            let position = cursor.position();
            let Ok(mut record) = AlphaEntryRecord::read(&mut cursor) else {
                header.diagnostic(format!("truncated record at table byte {position}"));
                break;
            };

            des::nibble_swap(&mut record.name);
            if let Some(end) = record.name.iter().position(|b| *b == 0) {
                record.name.truncate(end);
            }

            let flags = EntryFlags::from_persisted(record.flags);
            let mut entry = FileEntry::stored(record.name, flags | EntryFlags::RAW_DATA);
            entry.compressed_size = record.size;
            entry.decompressed_size = record.size;
            entry.aligned_size = align8(record.size);
            entry.offset = u64::from(record.offset);
            self.insert_parsed(entry, header);
        }

        Ok(())
    }

    fn check_ranges(&mut self, header: &mut Header, file_len: u64, repair: bool) {
        let mut out_of_range = Vec::new();
        for (key, entry) in &self.files {
            if entry.is_file() && HEADER_SIZE + entry.offset + u64::from(entry.stored_len()) > file_len {
                out_of_range.push((key.clone(), entry.name.clone()));
            }
        }

        for (key, name) in out_of_range {
            if repair {
                header.diagnostic(format!("{name} points past the end of the file, kept for repair"));
            } else {
                header.diagnostic(format!("{name} points past the end of the file, skipped"));
                self.files.shift_remove(&key);
            }
        }
    }

    /// Inserts a parsed entry, a renamed entry wins over a plain duplicate
    fn insert_parsed(&mut self, entry: FileEntry, header: &mut Header) {
        let key = lookup_key(&entry.name);
        match self.files.get(&key) {
            Some(existing)
                if existing.modification.contains(Modification::RENAMED)
                    && !entry.modification.contains(Modification::RENAMED) =>
            {
                header.diagnostic(format!("duplicate entry {} ignored", entry.name));
            }
            Some(_) => {
                header.diagnostic(format!("duplicate entry {} replaces an earlier record", entry.name));
                self.files.insert(key, entry);
            }
            None => {
                self.files.insert(key, entry);
            }
        }
    }

    /// Adds or replaces an entry, returning the one it replaced
    pub fn insert(&mut self, entry: FileEntry) -> Option<FileEntry> {
        let replaced = self.files.insert(lookup_key(&entry.name), entry);
        if let Some(old) = replaced.as_ref().filter(|e| e.is_file() && !is_incoming(e)) {
            self.displaced.push((old.offset, old.aligned_size.max(old.compressed_size)));
        }
        replaced
    }

    /// Ranges of replaced entries, as offset and length, that the current file still references
    pub(crate) fn displaced(&self) -> &[(u64, u32)] {
        &self.displaced
    }

    /// Get a live entry by path
    pub fn get(&self, path: &str) -> Option<&FileEntry> {
        self.files.get(&lookup_key(path)).filter(|e| !e.is_removed())
    }

    pub(crate) fn get_mut(&mut self, path: &str) -> Option<&mut FileEntry> {
        self.files.get_mut(&lookup_key(path)).filter(|e| !e.is_removed())
    }

    /// Get a live entry by path, failing when it does not exist
    pub fn by_name(&self, path: &str) -> Result<&FileEntry> {
        self.get(path)
            .ok_or_else(|| Error::FileNotFound(FileNotFoundError::Name(path.to_owned())))
    }

    /// Get a live entry by its position among live entries
    pub fn by_index(&self, index: usize) -> Result<&FileEntry> {
        self.entries()
            .nth(index)
            .ok_or(Error::FileNotFound(FileNotFoundError::Index(index)))
    }

    pub fn contains(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.entries().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Live entries in table order
    pub fn entries(&self) -> impl Iterator<Item = &FileEntry> {
        self.files.values().filter(|e| !e.is_removed())
    }

    /// Every entry, tombstones included
    pub(crate) fn all(&self) -> impl Iterator<Item = &FileEntry> {
        self.files.values()
    }

    pub(crate) fn all_mut(&mut self) -> impl Iterator<Item = &mut FileEntry> {
        self.files.values_mut()
    }

    /// Total size of the files once extracted, directories excluded
    pub fn decompressed_size(&self) -> Option<u128> {
        let mut total = 0u128;
        for entry in self.entries().filter(|e| e.is_file()) {
            total = total.checked_add(u128::from(entry.decompressed_size))?;
        }
        Some(total)
    }

    /// Sizes of the table as last read or written: stored, then decompressed
    pub fn table_sizes(&self) -> (u32, u32) {
        (self.compressed_size, self.size)
    }

    pub(crate) fn set_table_sizes(&mut self, compressed: u32, size: u32) {
        self.compressed_size = compressed;
        self.size = size;
    }

    /// Tombstones an entry; pending additions are dropped right away
    pub fn remove(&mut self, path: &str) -> Result<()> {
        let key = lookup_key(path);
        let Some(entry) = self.files.get_mut(&key).filter(|e| !e.is_removed()) else {
            return Err(Error::FileNotFound(FileNotFoundError::Name(path.to_owned())));
        };

        if entry.modification.contains(Modification::ADDED) {
            self.files.shift_remove(&key);
        } else {
            entry.flags.insert(EntryFlags::REMOVED);
            entry.modification.insert(Modification::REMOVED);
        }
        Ok(())
    }

    /// Moves an entry to a new path
    pub fn rename(&mut self, from: &str, to: &str) -> Result<()> {
        let to = normalize(to);
        if to.is_empty() {
            return Err(Error::CustomError("cannot rename to an empty path".into()));
        }
        if self.contains(&to) {
            return Err(Error::CustomError(format!("{to} already exists")));
        }

        let from_key = lookup_key(from);
        if !self.files.get(&from_key).is_some_and(|e| !e.is_removed()) {
            return Err(Error::FileNotFound(FileNotFoundError::Name(from.to_owned())));
        }
        let Some(mut entry) = self.files.shift_remove(&from_key) else {
            return Err(Error::FileNotFound(FileNotFoundError::Name(from.to_owned())));
        };

        entry.name_raw = to.as_bytes().into();
        entry.name = to.into();
        entry.modification.insert(Modification::RENAMED);
        self.insert(entry);
        Ok(())
    }

    /// Drops tombstones and clears pending state after a successful write
    pub(crate) fn commit(&mut self) {
        self.files.retain(|_, e| !e.is_removed());
        self.displaced.clear();
        for entry in self.files.values_mut() {
            entry.modification = Modification::empty();
            entry.source = None;
        }
    }

    /// Serializes the live entries in the dialect of `header`
    #[instrument(skip_all, fields(version = %header.version), err)]
    pub fn serialize(&self, header: &Header, codec: &CodecConfig) -> Result<SerializedTable> {
        match header.version.dialect()? {
            TableDialect::V3 => self.serialize_compressed(header, codec, true),
            TableDialect::V2 => self.serialize_compressed(header, codec, false),
            TableDialect::V1 => self.serialize_legacy(),
            TableDialect::Alpha => self.serialize_alpha(),
        }
    }

    fn serialize_compressed(&self, header: &Header, codec: &CodecConfig, wide: bool) -> Result<SerializedTable> {
        let mut records = Cursor::new(Vec::new());
        for entry in self.entries() {
            let name = NullString(entry.name_raw.to_vec());
            let (compressed, aligned, decompressed) = record_sizes(entry)?;
            let flags = entry.flags.persisted();
            if wide {
                EntryRecordWide {
                    name,
                    compressed,
                    aligned,
                    decompressed,
                    flags,
                    offset: entry.offset,
                }
                .write(&mut records)?;
            } else {
                EntryRecord {
                    name,
                    compressed,
                    aligned,
                    decompressed,
                    flags,
                    offset: u32::try_from(entry.offset).map_err(|_| Error::CapacityExceeded)?,
                }
                .write(&mut records)?;
            }
        }

        let records = records.into_inner();
        let mut packed = codec.compress_table(&records)?;
        if header.encrypt_file_table {
            let key = header.require_key()?;
            let len = packed.len();
            UserKeyCipher.encrypt(key, &mut packed, len)?;
        }

        let block = TableBlockHeader {
            compressed: u32::try_from(packed.len()).map_err(|_| Error::CapacityExceeded)?,
            size: u32::try_from(records.len()).map_err(|_| Error::CapacityExceeded)?,
        };

        let mut out = Cursor::new(Vec::with_capacity(packed.len() + 12));
        if wide {
            out.write_i32::<LittleEndian>(0)?;
        }
        block.write(&mut out)?;
        out.write_all(&packed)?;

        Ok(SerializedTable {
            bytes: out.into_inner(),
            compressed_size: block.compressed,
            size: block.size,
        })
    }

    fn serialize_legacy(&self) -> Result<SerializedTable> {
        let mut out = Cursor::new(Vec::new());
        for entry in self.entries() {
            let coded = des::encode_name(&entry.name_raw);
            let (compressed, aligned, decompressed) = record_sizes(entry)?;

            out.write_i32::<LittleEndian>((coded.len() + LEGACY_NAME_PADDING) as i32)?;
            out.write_all(&[0; 2])?;
            out.write_all(&coded)?;
            out.write_all(&[0; 4])?;
            LegacyEntryRecord {
                packed_compressed: compressed
                    .checked_add(decompressed)
                    .and_then(|value| value.checked_add(LEGACY_SIZE_BIAS))
                    .ok_or(Error::CapacityExceeded)?,
                packed_aligned: aligned.checked_add(LEGACY_ALIGNED_BIAS).ok_or(Error::CapacityExceeded)?,
                decompressed,
                flags: entry.flags.persisted(),
                offset: i32::try_from(entry.offset).map_err(|_| Error::CapacityExceeded)?,
            }
            .write(&mut out)?;
        }

        let bytes = out.into_inner();
        let size = bytes.len() as u32;
        Ok(SerializedTable {
            bytes,
            compressed_size: size,
            size,
        })
    }

    fn serialize_alpha(&self) -> Result<SerializedTable> {
        let mut out = Cursor::new(Vec::new());
        for entry in self.entries() {
            let mut name = entry.name_raw.to_vec();
            des::nibble_swap(&mut name);
            AlphaEntryRecord {
                size: entry.compressed_size,
                offset: u32::try_from(entry.offset).map_err(|_| Error::CapacityExceeded)?,
                flags: (entry.flags - EntryFlags::RAW_DATA).persisted(),
                name_len: u16::try_from(name.len())
                    .map_err(|_| Error::CustomError(format!("name of {} is too long", entry.name)))?,
                name,
            }
            .write(&mut out)?;
        }

        let bytes = out.into_inner();
        let size = bytes.len() as u32;
        Ok(SerializedTable {
            bytes,
            compressed_size: size,
            size,
        })
    }
}

fn record_sizes(entry: &FileEntry) -> Result<(i32, i32, i32)> {
    let convert = |value: u32| i32::try_from(value).map_err(|_| Error::CapacityExceeded);
    Ok((
        convert(entry.compressed_size)?,
        convert(entry.aligned_size)?,
        convert(entry.decompressed_size)?,
    ))
}

/// Applies record sizes, reporting negative ones
fn set_sizes(entry: &mut FileEntry, compressed: i32, aligned: i32, decompressed: i32, header: &mut Header) -> bool {
    let (Ok(compressed), Ok(aligned), Ok(decompressed)) = (
        u32::try_from(compressed),
        u32::try_from(aligned),
        u32::try_from(decompressed),
    ) else {
        header.diagnostic(format!("{} has negative sizes", entry.name));
        return false;
    };

    entry.compressed_size = compressed;
    entry.aligned_size = aligned;
    entry.decompressed_size = decompressed;
    true
}

#[cfg(test)]
mod test {
    use std::io::Cursor;

    use pretty_assertions::assert_eq;
    use tracing_test::traced_test;

    use super::FileTable;
    use crate::compression::CodecConfig;
    use crate::entry::{EntryFlags, EntrySource, FileEntry, Modification};
    use crate::error::{Error, Result};
    use crate::header::Header;
    use crate::types::HEADER_SIZE;
    use crate::user_key::UserKey;
    use crate::version::GrfVersion;

    fn entry(name: &str, offset: u64, compressed: u32) -> FileEntry {
        let mut entry = FileEntry::stored(name.as_bytes().to_vec(), EntryFlags::FILE);
        entry.compressed_size = compressed;
        entry.aligned_size = compressed.div_ceil(8) * 8;
        entry.decompressed_size = compressed * 2;
        entry.offset = offset;
        entry
    }

    /// Lays out a file holding a blob region of `blob` bytes and `table` behind it
    fn archive(header: &mut Header, table: &FileTable, blob: u64) -> Result<Cursor<Vec<u8>>> {
        header.file_table_offset = blob;
        let serialized = table.serialize(header, &CodecConfig::default())?;

        let mut out = Cursor::new(vec![0u8; (HEADER_SIZE + blob) as usize]);
        header.write(&mut out, table.len())?;
        let mut bytes = out.into_inner();
        bytes.extend_from_slice(&serialized.bytes);
        Ok(Cursor::new(bytes))
    }

    fn sample() -> FileTable {
        let mut table = FileTable::new();
        table.insert(entry("data\\a.txt", 0, 11));
        table.insert(entry("data\\sprite\\b.spr", 16, 20));
        table.insert(entry("data\\map.gat", 40, 8));
        table
    }

    #[test]
    fn every_dialect_round_trips() -> Result<()> {
        for version in [GrfVersion::V0X300, GrfVersion::V0X200, GrfVersion::V0X103] {
            let mut header = Header::new(version);
            let mut file = archive(&mut header, &sample(), 48)?;

            let mut read_header = Header::read(&mut file)?;
            let table = FileTable::parse(&mut file, &mut read_header, false)?;

            assert_eq!(table.len(), 3, "{version}");
            let b = table.by_name("DATA/Sprite/B.SPR")?;
            assert_eq!(b.name(), "data\\sprite\\b.spr");
            assert_eq!(b.offset(), 16);
            assert_eq!(b.compressed_size(), 20);
            assert_eq!(b.aligned_size(), 24);
            assert_eq!(b.size(), 40);
            assert!(read_header.found_errors.is_empty(), "{:?}", read_header.found_errors);
        }
        Ok(())
    }

    #[test]
    fn legacy_tables_derive_cycles() -> Result<()> {
        let mut header = Header::new(GrfVersion::V0X103);
        let mut file = archive(&mut header, &sample(), 48)?;

        let mut read_header = Header::read(&mut file)?;
        let table = FileTable::parse(&mut file, &mut read_header, false)?;

        assert_eq!(table.by_name("data\\map.gat")?.cycle(), 0);
        assert_eq!(table.by_name("data\\a.txt")?.cycle(), 1);
        Ok(())
    }

    #[test]
    fn legacy_record_with_overflowing_sizes_is_skipped() -> Result<()> {
        let mut header = Header::new(GrfVersion::V0X103);
        let mut bytes = archive(&mut header, &sample(), 48)?.into_inner();

        let table_start = (HEADER_SIZE + 48) as usize;
        let mut len = [0u8; 4];
        len.copy_from_slice(&bytes[table_start..table_start + 4]);
        let tail = table_start + 4 + i32::from_le_bytes(len) as usize;
        bytes[tail..tail + 4].copy_from_slice(&i32::MIN.to_le_bytes());

        let mut file = Cursor::new(bytes);
        let mut read_header = Header::read(&mut file)?;
        let table = FileTable::parse(&mut file, &mut read_header, false)?;

        assert_eq!(table.len(), 2);
        assert!(!table.contains("data\\a.txt"));
        assert!(table.contains("data\\map.gat"));
        assert!(
            read_header.found_errors.iter().any(|e| e == "data\\a.txt has invalid sizes"),
            "{:?}",
            read_header.found_errors
        );
        Ok(())
    }

    #[test]
    fn alpha_tables() -> Result<()> {
        let mut table = FileTable::new();
        let mut raw = entry("a.txt", 0, 5);
        raw.decompressed_size = 5;
        table.insert(raw);

        let mut header = Header::new(GrfVersion::ALPHA);
        let mut file = archive(&mut header, &table, 8)?;

        let mut read_header = Header::read(&mut file)?;
        let table = FileTable::parse(&mut file, &mut read_header, false)?;
        let a = table.by_name("a.txt")?;
        assert_eq!(a.size(), 5);
        assert!(a.flags().contains(EntryFlags::RAW_DATA));
        Ok(())
    }

    #[test]
    #[traced_test]
    fn out_of_range_entries() -> Result<()> {
        let mut table = sample();
        table.insert(entry("far.txt", 4096, 10));

        let mut header = Header::new(GrfVersion::V0X200);
        let mut file = archive(&mut header, &table, 48)?;

        let mut read_header = Header::read(&mut file)?;
        let parsed = FileTable::parse(&mut file, &mut read_header, false)?;
        assert!(!parsed.contains("far.txt"));
        assert!(logs_contain("points past the end of the file"));

        let mut read_header = Header::read(&mut file)?;
        let repaired = FileTable::parse(&mut file, &mut read_header, true)?;
        assert!(repaired.contains("far.txt"));
        Ok(())
    }

    #[test]
    fn encrypted_table_needs_the_right_key() -> Result<()> {
        let mut header = Header::new(GrfVersion::V0X200);
        header.is_encrypted = true;
        header.encrypt_file_table = true;
        header.validate_key(UserKey::derive("right"), None)?;
        let mut file = archive(&mut header, &sample(), 48)?;

        let mut read_header = Header::read(&mut file)?;
        assert!(matches!(
            FileTable::parse(&mut file, &mut read_header, false),
            Err(Error::NoKeySet)
        ));

        read_header.validate_key(UserKey::derive("wrong"), None)?;
        assert!(matches!(
            FileTable::parse(&mut file, &mut read_header, false),
            Err(Error::WrongKey)
        ));

        read_header.validate_key(UserKey::derive("right"), None)?;
        assert_eq!(FileTable::parse(&mut file, &mut read_header, false)?.len(), 3);
        Ok(())
    }

    #[test]
    fn renamed_duplicates_win() {
        let mut header = Header::default();
        let mut table = FileTable::new();

        let mut renamed = entry("a.txt", 0, 1);
        renamed.modification = Modification::RENAMED;
        table.insert_parsed(renamed, &mut header);
        table.insert_parsed(entry("A.TXT", 8, 2), &mut header);

        assert_eq!(table.len(), 1);
        assert_eq!(table.by_name("a.txt").map(|e| e.offset()).ok(), Some(0));
        assert_eq!(header.found_errors.len(), 1);

        table.insert_parsed(entry("b.txt", 0, 1), &mut header);
        table.insert_parsed(entry("b.txt", 16, 1), &mut header);
        assert_eq!(table.by_name("b.txt").map(|e| e.offset()).ok(), Some(16));
    }

    #[test]
    fn edits() -> Result<()> {
        let mut table = sample();
        table.insert(FileEntry::added("new.txt", EntrySource::Buffer(b"x".as_slice().into()), 1));

        table.remove("new.txt")?;
        assert!(!table.contains("new.txt"));
        assert_eq!(table.all().count(), 3);

        table.remove("data/a.txt")?;
        assert!(!table.contains("data\\a.txt"));
        assert_eq!(table.all().count(), 3);
        assert!(table.remove("data/a.txt").is_err());

        table.rename("data\\map.gat", "data/maps/map.gat")?;
        let moved = table.by_name("data\\maps\\map.gat")?;
        assert!(moved.modification().contains(Modification::RENAMED));
        assert!(table.rename("data\\sprite\\b.spr", "data\\maps\\map.gat").is_err());

        table.commit();
        assert_eq!(table.len(), 2);
        assert_eq!(table.all().count(), 2);
        Ok(())
    }
}
