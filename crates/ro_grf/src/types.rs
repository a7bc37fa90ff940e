//! Base types for structure of GRF file.

use binrw::{BinRead, BinWrite, NullString};

/// Size of the fixed header, every stored offset is relative to its end
pub const HEADER_SIZE: u64 = 46;

/// Bit in the last key byte marking content encrypted with a user key
pub const KEY_MARKER_CONTENT: u8 = 0x01;

/// Bit in the last key byte marking an encrypted file table
pub const KEY_MARKER_TABLE: u8 = 0x02;

/// Value added to the compressed size field of 0x1xx records
pub const LEGACY_SIZE_BIAS: i32 = 715;

/// Value added to the aligned size field of 0x1xx records
pub const LEGACY_ALIGNED_BIAS: i32 = 37579;

/// GRF file header
///
/// Every container starts with "Master of Magic", a 14 byte key area and the location of the file table.
/// All data is stored in little endian format
#[derive(BinRead, BinWrite, Debug, Copy, Clone, PartialEq)]
#[brw(magic = b"Master of Magic\0", little)]
pub struct GrfHeaderRaw {
    /// Key area, the last byte carries the encryption markers
    pub key: [u8; 14],

    /// Offset of the file table from the end of the header (low half for 0x3xx)
    pub file_table_offset: u32,

    /// Legacy seed folded into the file count (high half of the offset for 0x3xx)
    pub seed: i32,

    /// Declared number of files, including the seed and a bias of 7
    pub declared_files: i32,

    /// `major << 8 | minor`
    pub version: u32,
}

impl Default for GrfHeaderRaw {
    fn default() -> Self {
        Self {
            key: [0; 14],
            file_table_offset: 0,
            seed: 0,
            declared_files: 7,
            version: 0x200,
        }
    }
}

/// Sizes leading a compressed file table
#[derive(BinRead, BinWrite, Debug, Default, Copy, Clone, PartialEq)]
#[brw(little)]
pub struct TableBlockHeader {
    /// Size of the table as stored
    pub compressed: u32,

    /// Size of the table once decompressed
    pub size: u32,
}

/// Entry record of a 0x2xx table, after decompression
#[derive(BinRead, BinWrite, Debug, Clone, PartialEq)]
#[brw(little)]
pub struct EntryRecord {
    pub name: NullString,
    pub compressed: i32,
    pub aligned: i32,
    pub decompressed: i32,
    pub flags: u8,
    pub offset: u32,
}

/// Entry record of a 0x3xx table, after decompression
#[derive(BinRead, BinWrite, Debug, Clone, PartialEq)]
#[brw(little)]
pub struct EntryRecordWide {
    pub name: NullString,
    pub compressed: i32,
    pub aligned: i32,
    pub decompressed: i32,
    pub flags: u8,
    pub offset: u64,
}

/// Fixed tail of a 0x1xx record, following the coded name
#[derive(BinRead, BinWrite, Debug, Default, Copy, Clone, PartialEq)]
#[brw(little)]
pub struct LegacyEntryRecord {
    /// compressed + decompressed + [`LEGACY_SIZE_BIAS`]
    pub packed_compressed: i32,
    /// aligned + [`LEGACY_ALIGNED_BIAS`]
    pub packed_aligned: i32,
    pub decompressed: i32,
    pub flags: u8,
    pub offset: i32,
}

/// Entry of an alpha table
#[derive(BinRead, BinWrite, Debug, Default, Clone, PartialEq)]
#[brw(little)]
pub struct AlphaEntryRecord {
    pub size: u32,
    pub offset: u32,
    pub flags: u8,
    pub name_len: u16,
    /// Name with every byte nibble swapped
    #[br(count = name_len)]
    pub name: Vec<u8>,
}

#[cfg(test)]
mod test {
    use std::io::Cursor;

    use binrw::BinRead;
    use binrw::BinWrite;
    use pretty_assertions::assert_eq;

    use crate::error::Result;
    use crate::types::{AlphaEntryRecord, EntryRecord, GrfHeaderRaw};

    #[rustfmt::skip]
    const EMPTY_V200_HEADER: [u8; 46] = [
        // Master of Magic\0
        0x4D, 0x61, 0x73, 0x74, 0x65, 0x72, 0x20, 0x6F,
        0x66, 0x20, 0x4D, 0x61, 0x67, 0x69, 0x63, 0x00,
        // Key
        0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        // File table offset
        0x00, 0x00, 0x00, 0x00,
        // Seed
        0x00, 0x00, 0x00, 0x00,
        // Declared files
        0x07, 0x00, 0x00, 0x00,
        // Version
        0x00, 0x02, 0x00, 0x00,
    ];

    #[test]
    fn read_empty_header() -> Result<()> {
        let mut input = Cursor::new(EMPTY_V200_HEADER.to_vec());
        assert_eq!(GrfHeaderRaw::read(&mut input)?, GrfHeaderRaw::default());
        Ok(())
    }

    #[test]
    fn write_empty_header() -> Result<()> {
        let mut actual = Vec::new();
        GrfHeaderRaw::default().write(&mut Cursor::new(&mut actual))?;
        assert_eq!(actual, EMPTY_V200_HEADER.to_vec());
        Ok(())
    }

    #[test]
    fn read_invalid_magic() {
        let mut input = EMPTY_V200_HEADER.to_vec();
        input[0] = b'm';
        assert!(GrfHeaderRaw::read(&mut Cursor::new(input)).is_err());
    }

    #[test]
    fn write_record() -> Result<()> {
        #[rustfmt::skip]
        let expected = vec![
            // a.txt\0
            0x61, 0x2E, 0x74, 0x78, 0x74, 0x00,
            0x0B, 0x00, 0x00, 0x00,
            0x10, 0x00, 0x00, 0x00,
            0x05, 0x00, 0x00, 0x00,
            0x01,
            0x20, 0x00, 0x00, 0x00,
        ];

        let record = EntryRecord {
            name: "a.txt".into(),
            compressed: 11,
            aligned: 16,
            decompressed: 5,
            flags: 1,
            offset: 32,
        };

        let mut actual = Vec::new();
        record.write(&mut Cursor::new(&mut actual))?;
        assert_eq!(actual, expected);

        let read_back = EntryRecord::read(&mut Cursor::new(actual))?;
        assert_eq!(read_back, record);

        Ok(())
    }

    #[test]
    fn read_alpha_record() -> Result<()> {
        #[rustfmt::skip]
        let mut input = Cursor::new(vec![
            0x04, 0x00, 0x00, 0x00,
            0x08, 0x00, 0x00, 0x00,
            0x01,
            0x02, 0x00,
            0x16, 0x26,
        ]);

        let record = AlphaEntryRecord::read(&mut input)?;
        assert_eq!(record.size, 4);
        assert_eq!(record.offset, 8);
        assert_eq!(record.name, vec![0x16, 0x26]);

        Ok(())
    }
}
