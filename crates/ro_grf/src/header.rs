//! The header model, shared by every table dialect.

use std::io::{Read, Seek, SeekFrom, Write};

use binrw::{BinRead, BinWrite};
use tracing::{instrument, warn};

use crate::error::{Error, Result};
use crate::types::{GrfHeaderRaw, HEADER_SIZE, KEY_MARKER_CONTENT, KEY_MARKER_TABLE};
use crate::user_key::UserKey;
use crate::version::{GrfVersion, TableDialect};

/// Bias folded into the declared file count
const FILE_COUNT_BIAS: i64 = 7;

/// Header of an opened or new container
///
/// Besides the persisted fields this carries the diagnostics gathered while loading and the
/// user key validated for this session. The key is never written back.
#[derive(Debug, Clone)]
pub struct Header {
    /// Format version
    pub version: GrfVersion,

    /// Key area as stored, markers included
    pub key: [u8; 14],

    /// Offset of the file table from the end of the header
    pub file_table_offset: u64,

    /// Legacy seed folded into the declared count, always 0 for 0x3xx
    pub seed: i32,

    /// Declared number of files, as stored
    pub declared_files: i32,

    /// Content is encrypted with a user key
    pub is_encrypted: bool,

    /// The file table is encrypted with a user key
    pub encrypt_file_table: bool,

    /// Human readable problems found while loading
    pub found_errors: Vec<String>,

    user_key: Option<UserKey>,
}

impl Default for Header {
    fn default() -> Self {
        Self::new(GrfVersion::default())
    }
}

impl Header {
    /// Header of an empty container
    pub fn new(version: GrfVersion) -> Self {
        Header {
            version,
            key: [0; 14],
            file_table_offset: 0,
            seed: 0,
            declared_files: FILE_COUNT_BIAS as i32,
            is_encrypted: false,
            encrypt_file_table: false,
            found_errors: Vec::new(),
            user_key: None,
        }
    }

    /// Reads and validates the fixed header at the start of `reader`
    #[instrument(skip_all, err)]
    pub fn read<R: Read + Seek>(reader: &mut R) -> Result<Header> {
        let len = reader.seek(SeekFrom::End(0))?;
        if len < HEADER_SIZE {
            return Err(Error::HeaderTooShort(len));
        }

        reader.seek(SeekFrom::Start(0))?;
        let raw = GrfHeaderRaw::read(reader).map_err(|e| match e {
            binrw::Error::BadMagic { .. } => Error::InvalidArchive,
            e => Error::from(e),
        })?;

        let version = GrfVersion::from_raw(raw.version);
        let dialect = version.dialect()?;

        let (file_table_offset, seed) = match dialect {
            TableDialect::V3 => {
                let high = u64::from(raw.seed as u32);
                ((high << 32) | u64::from(raw.file_table_offset), 0)
            }
            _ => (u64::from(raw.file_table_offset), raw.seed),
        };

        let marker = raw.key[13];
        Ok(Header {
            version,
            key: raw.key,
            file_table_offset,
            seed,
            declared_files: raw.declared_files,
            is_encrypted: marker & KEY_MARKER_CONTENT != 0,
            encrypt_file_table: marker & KEY_MARKER_TABLE != 0,
            found_errors: Vec::new(),
            user_key: None,
        })
    }

    /// Number of files once the seed and bias are removed
    pub fn real_files_count(&self) -> i64 {
        i64::from(self.declared_files) - i64::from(self.seed) - FILE_COUNT_BIAS
    }

    /// Absolute position of the file table
    pub fn table_position(&self) -> u64 {
        HEADER_SIZE + self.file_table_offset
    }

    /// Builds the on-disk form for a table holding `files` records
    pub fn to_raw(&self, files: usize) -> Result<GrfHeaderRaw> {
        let mut key = self.key;
        key[13] &= !(KEY_MARKER_CONTENT | KEY_MARKER_TABLE);
        if self.is_encrypted {
            key[13] |= KEY_MARKER_CONTENT;
        }
        if self.encrypt_file_table {
            key[13] |= KEY_MARKER_TABLE;
        }

        let files = i64::try_from(files).map_err(|_| Error::CapacityExceeded)?;
        let (file_table_offset, seed, declared) = if self.version.has_32bit_offsets() {
            let offset = u32::try_from(self.file_table_offset).map_err(|_| Error::CapacityExceeded)?;
            (offset, self.seed, files + i64::from(self.seed) + FILE_COUNT_BIAS)
        } else {
            let offset = self.file_table_offset;
            (offset as u32, (offset >> 32) as i32, files + FILE_COUNT_BIAS)
        };

        Ok(GrfHeaderRaw {
            key,
            file_table_offset,
            seed,
            declared_files: i32::try_from(declared).map_err(|_| Error::CapacityExceeded)?,
            version: self.version.raw(),
        })
    }

    /// Writes the header at the start of `writer`, updating the declared count
    pub fn write<W: Write + Seek>(&mut self, writer: &mut W, files: usize) -> Result<()> {
        let raw = self.to_raw(files)?;
        writer.seek(SeekFrom::Start(0))?;
        raw.write(writer)?;
        self.declared_files = raw.declared_files;
        self.key = raw.key;
        Ok(())
    }

    /// The key validated for this session
    pub fn user_key(&self) -> Option<&UserKey> {
        self.user_key.as_ref()
    }

    /// Returns the validated key, failing when none has been set
    pub fn require_key(&self) -> Result<&UserKey> {
        self.user_key.as_ref().ok_or(Error::NoKeySet)
    }

    pub(crate) fn set_user_key(&mut self, key: Option<UserKey>) {
        self.user_key = key;
    }

    /// Checks `key` against the marker entry content, keeping it on success
    pub fn validate_key(&mut self, key: UserKey, marker: Option<&[u8]>) -> Result<()> {
        if let Some(marker) = marker {
            if !key.matches_marker(marker) {
                return Err(Error::WrongKey);
            }
        }
        self.user_key = Some(key);
        Ok(())
    }

    /// Records a load problem without failing
    pub fn diagnostic(&mut self, message: impl Into<String>) {
        let message = message.into();
        warn!("{message}");
        self.found_errors.push(message);
    }
}

#[cfg(test)]
mod test {
    use std::io::Cursor;

    use pretty_assertions::assert_eq;

    use super::Header;
    use crate::error::{Error, Result};
    use crate::types::HEADER_SIZE;
    use crate::user_key::UserKey;
    use crate::version::GrfVersion;

    #[test]
    fn markers_round_trip() -> Result<()> {
        let mut header = Header::new(GrfVersion::V0X200);
        header.is_encrypted = true;
        header.encrypt_file_table = true;
        header.file_table_offset = 128;

        let mut out = Cursor::new(Vec::new());
        header.write(&mut out, 3)?;

        let read = Header::read(&mut out)?;
        assert!(read.is_encrypted);
        assert!(read.encrypt_file_table);
        assert_eq!(read.key[13], 0x03);
        assert_eq!(read.real_files_count(), 3);
        assert_eq!(read.table_position(), HEADER_SIZE + 128);
        Ok(())
    }

    #[test]
    fn seed_is_folded_into_count() -> Result<()> {
        let mut header = Header::new(GrfVersion::V0X103);
        header.seed = 11;

        let mut out = Cursor::new(Vec::new());
        header.write(&mut out, 5)?;
        assert_eq!(header.declared_files, 5 + 11 + 7);

        let read = Header::read(&mut out)?;
        assert_eq!(read.real_files_count(), 5);
        Ok(())
    }

    #[test]
    fn wide_offsets_use_the_seed_field() -> Result<()> {
        let mut header = Header::new(GrfVersion::V0X300);
        header.file_table_offset = 0x1_0000_0010;

        let mut out = Cursor::new(Vec::new());
        header.write(&mut out, 2)?;

        let read = Header::read(&mut out)?;
        assert_eq!(read.file_table_offset, 0x1_0000_0010);
        assert_eq!(read.seed, 0);
        assert_eq!(read.real_files_count(), 2);
        Ok(())
    }

    #[test]
    fn narrow_offsets_overflow() {
        let mut header = Header::new(GrfVersion::V0X200);
        header.file_table_offset = u64::from(u32::MAX) + 1;
        assert!(matches!(header.to_raw(0), Err(Error::CapacityExceeded)));
    }

    #[test]
    fn short_and_foreign_files() {
        assert!(matches!(
            Header::read(&mut Cursor::new(vec![0u8; 10])),
            Err(Error::HeaderTooShort(10))
        ));
        assert!(matches!(
            Header::read(&mut Cursor::new(vec![0u8; 64])),
            Err(Error::InvalidArchive)
        ));
    }

    #[test]
    fn unsupported_version() -> Result<()> {
        let mut header = Header::new(GrfVersion::from_raw(0x10));
        let mut out = Cursor::new(Vec::new());
        header.write(&mut out, 0)?;
        assert!(matches!(
            Header::read(&mut out),
            Err(Error::UnsupportedVersion(0x10))
        ));
        Ok(())
    }

    #[test]
    fn key_validation() -> Result<()> {
        let mut header = Header::default();
        assert!(matches!(header.require_key(), Err(Error::NoKeySet)));

        let marker = UserKey::derive("right").marker();
        assert!(matches!(
            header.validate_key(UserKey::derive("wrong"), Some(&marker)),
            Err(Error::WrongKey)
        ));
        header.validate_key(UserKey::derive("right"), Some(&marker))?;
        assert!(header.require_key().is_ok());
        Ok(())
    }
}
