//! Metadata of a single archived file and access to its payload.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use bitflags::bitflags;

use crate::cipher::Cipher;
use crate::compression::{decompress, StoredFormat};
use crate::des::LegacyCipher;
use crate::error::{Error, Result};
use crate::handle::ArchiveHandle;
use crate::types::HEADER_SIZE;
use crate::user_key::{UserKey, UserKeyCipher, KEY_MARKER_PATH};

bitflags! {
    /// State of an entry, the low byte is what gets persisted
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct EntryFlags: u16 {
        const FILE = 0x01;
        /// Legacy DES with a cycle derived from the size
        const MIXED_CRYPT = 0x02;
        /// Legacy DES over the first blocks only
        const HEADER_CRYPT = 0x04;
        /// Encrypted with the user key
        const USER_CRYPT = 0x08;
        const RAW_DATA = 0x10;
        const LZSS = 0x20;

        const LZMA = 0x100;
        const DIRECTORY = 0x200;
        const REMOVED = 0x400;
    }
}

impl EntryFlags {
    const PERSISTED: u16 = 0xFF;

    /// The byte written to the file table
    pub fn persisted(self) -> u8 {
        (self.bits() & Self::PERSISTED) as u8
    }

    /// Flags from a file table byte, records without [`EntryFlags::FILE`] are directories
    pub fn from_persisted(byte: u8) -> Self {
        let flags = EntryFlags::from_bits_retain(u16::from(byte));
        if flags.contains(EntryFlags::FILE) {
            flags
        } else {
            flags | EntryFlags::DIRECTORY
        }
    }
}

bitflags! {
    /// Edits to an entry that are not committed to disk yet
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Modification: u8 {
        const ADDED = 0x01;
        const REMOVED = 0x02;
        const RENAMED = 0x04;
        const GRF_MERGE = 0x08;
        const ENCRYPT = 0x10;
        const DECRYPT = 0x20;
    }
}

/// Where the bytes of a pending addition come from
#[derive(Clone)]
pub enum EntrySource {
    /// A file on disk, read when the container is saved
    File(PathBuf),
    /// Data kept in memory
    Buffer(Arc<[u8]>),
}

impl fmt::Debug for EntrySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntrySource::File(path) => write!(f, "File({})", path.display()),
            EntrySource::Buffer(data) => write!(f, "Buffer({} bytes)", data.len()),
        }
    }
}

impl EntrySource {
    /// Loads the uncompressed content
    pub fn load(&self) -> Result<Vec<u8>> {
        match self {
            EntrySource::File(path) => Ok(std::fs::read(path)?),
            EntrySource::Buffer(data) => Ok(data.to_vec()),
        }
    }
}

/// Rounds a size up to the 8 byte allocation unit
pub const fn align8(size: u32) -> u32 {
    size.div_ceil(8) * 8
}

/// One archived file or directory
#[derive(Debug, Clone)]
pub struct FileEntry {
    pub(crate) name: Box<str>,
    pub(crate) name_raw: Box<[u8]>,
    pub(crate) compressed_size: u32,
    pub(crate) aligned_size: u32,
    pub(crate) decompressed_size: u32,
    pub(crate) offset: u64,
    pub(crate) flags: EntryFlags,
    pub(crate) modification: Modification,
    pub(crate) cycle: i32,
    pub(crate) source: Option<EntrySource>,
}

impl FileEntry {
    /// An entry parsed from a file table
    ///
    /// Names using forward slashes are normalized and marked as renamed, they are written back
    /// under their new name.
    pub(crate) fn stored(name_raw: Vec<u8>, flags: EntryFlags) -> Self {
        let modification = if name_raw.contains(&b'/') {
            Modification::RENAMED
        } else {
            Modification::empty()
        };
        let name_raw = normalize_raw(name_raw);
        FileEntry {
            name: String::from_utf8_lossy(&name_raw).into(),
            name_raw: name_raw.into(),
            compressed_size: 0,
            aligned_size: 0,
            decompressed_size: 0,
            offset: 0,
            flags,
            modification,
            cycle: -1,
            source: None,
        }
    }

    /// A pending addition
    pub fn added(name: &str, source: EntrySource, decompressed_size: u32) -> Self {
        let name = normalize(name);
        FileEntry {
            name_raw: name.as_bytes().into(),
            name: name.into(),
            compressed_size: 0,
            aligned_size: 0,
            decompressed_size,
            offset: 0,
            flags: EntryFlags::FILE,
            modification: Modification::ADDED,
            cycle: -1,
            source: Some(source),
        }
    }

    /// Get the normalized path of the entry
    ///
    /// # Warnings
    ///
    /// It is dangerous to use this name directly when extracting an archive.
    /// It may break out of the current directory (`..\data`). Carelessly writing
    /// to these paths allows an attacker to craft a container that will overwrite
    /// critical files.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the name in its raw byte representation, usually EUC-KR
    pub fn name_raw(&self) -> &[u8] {
        &self.name_raw
    }

    /// Size of the payload as stored
    pub fn compressed_size(&self) -> u32 {
        self.compressed_size
    }

    /// Size of the slot occupied in the blob region
    pub fn aligned_size(&self) -> u32 {
        self.aligned_size
    }

    /// Size of the file once extracted
    pub fn size(&self) -> u32 {
        self.decompressed_size
    }

    /// Offset of the payload from the end of the header
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn flags(&self) -> EntryFlags {
        self.flags
    }

    pub fn modification(&self) -> Modification {
        self.modification
    }

    /// Legacy DES cycle, -1 when the entry is not legacy encrypted
    pub fn cycle(&self) -> i32 {
        self.cycle
    }

    pub fn is_file(&self) -> bool {
        self.flags.contains(EntryFlags::FILE)
    }

    pub fn is_directory(&self) -> bool {
        self.flags.contains(EntryFlags::DIRECTORY)
    }

    pub fn is_removed(&self) -> bool {
        self.flags.contains(EntryFlags::REMOVED)
    }

    /// Whether the entry holds bytes that are not in any archive yet
    pub fn is_pending(&self) -> bool {
        self.source.is_some()
    }

    /// Whether this is the entry holding the key checksum
    pub fn is_key_marker(&self) -> bool {
        self.name.eq_ignore_ascii_case(KEY_MARKER_PATH)
    }

    /// Bytes occupied on disk: the aligned slot for legacy entries, the payload otherwise
    pub(crate) fn stored_len(&self) -> u32 {
        if self.cycle >= 0 {
            self.aligned_size.max(align8(self.compressed_size))
        } else {
            self.compressed_size
        }
    }

    /// End of the occupied range, relative to the end of the header
    pub(crate) fn end(&self) -> u64 {
        self.offset + u64::from(self.aligned_size.max(self.compressed_size))
    }

    pub(crate) fn stored_format(&self) -> StoredFormat {
        if self.flags.contains(EntryFlags::RAW_DATA) {
            StoredFormat::Raw
        } else if self.flags.contains(EntryFlags::LZSS) {
            StoredFormat::Lzss
        } else {
            StoredFormat::Auto
        }
    }

    /// Whether the user key layer can be checked against the compression markers
    pub(crate) fn is_probeable(&self) -> bool {
        self.cycle < 0 && self.stored_format() == StoredFormat::Auto
    }

    pub(crate) fn set_legacy_cycle(&mut self, cycle: i32) {
        self.cycle = cycle;
        self.flags.remove(EntryFlags::MIXED_CRYPT | EntryFlags::HEADER_CRYPT);
        match cycle {
            c if c > 0 => self.flags.insert(EntryFlags::MIXED_CRYPT),
            0 => self.flags.insert(EntryFlags::HEADER_CRYPT),
            _ => {}
        }
    }

    /// Reads the stored bytes without removing any encryption
    pub fn read_raw(&self, handle: &ArchiveHandle) -> Result<Vec<u8>> {
        if let Some(source) = &self.source {
            return source.load();
        }
        if !self.is_file() || self.stored_len() == 0 {
            return Ok(Vec::new());
        }
        handle.read_at(HEADER_SIZE + self.offset, self.stored_len() as usize)
    }

    /// Removes both cipher layers from stored bytes, leaving the compressed payload
    pub(crate) fn decrypt_stored(&self, data: &mut Vec<u8>, key: Option<&UserKey>) -> Result<()> {
        let len = self.compressed_size as usize;

        if self.flags.contains(EntryFlags::USER_CRYPT) {
            let key = key.ok_or(Error::NoKeySet)?;
            if self.is_probeable() {
                UserKeyCipher.decrypt_probed(key, data, len)?;
            } else {
                UserKeyCipher.decrypt(key, data, len)?;
            }
        }

        if self.cycle >= 0 {
            let len = data.len();
            LegacyCipher.decrypt(&self.cycle, data, len)?;
        }

        data.truncate(len);
        Ok(())
    }

    /// Reads the compressed payload with every cipher layer removed
    pub fn read_compressed(&self, handle: &ArchiveHandle, key: Option<&UserKey>) -> Result<Vec<u8>> {
        let mut data = self.read_raw(handle)?;
        if self.source.is_none() {
            self.decrypt_stored(&mut data, key)?;
        }
        Ok(data)
    }

    /// Reads and decompresses the content of the entry
    pub fn read(&self, handle: &ArchiveHandle, key: Option<&UserKey>) -> Result<Vec<u8>> {
        if self.source.is_some() {
            return self.read_raw(handle);
        }

        let data = self.read_compressed(handle, key)?;
        decompress(&data, self.decompressed_size as usize, self.stored_format()).map_err(|e| match e {
            Error::CorruptedOrEncryptedEntry(reason) => {
                Error::CorruptedOrEncryptedEntry(format!("{} ({reason})", self.name))
            }
            e => e,
        })
    }
}

/// Normalizes a path to the backslash separated form used in tables
pub fn normalize(path: &str) -> String {
    path.replace('/', "\\").trim_start_matches('\\').to_owned()
}

fn normalize_raw(mut name: Vec<u8>) -> Vec<u8> {
    name.iter_mut().filter(|b| **b == b'/').for_each(|b| *b = b'\\');
    let start = name.iter().position(|b| *b != b'\\').unwrap_or(name.len());
    name.drain(..start);
    name
}

/// Lookup key of a path, case insensitive
pub fn lookup_key(path: &str) -> Box<str> {
    normalize(path).to_lowercase().into()
}
