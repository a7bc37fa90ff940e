//! This library handles reading, editing and rewriting **GRF** containers used by *Ragnarok Online*.
//!
//! # GRF Container Format Documentation
//!
//! A GRF file stores the assets of the game in a single file: a fixed size header, a blob region
//! holding the payload of every entry, and a file table describing the entries. Related formats
//! (`.gpf`, `.rgz`, `.thor`) share the same layout.
//!
//! ## File Structure
//!
//! | Offset (bytes) | Field                  | Description                                                |
//! |----------------|------------------------|------------------------------------------------------------|
//! | 0x0000         | Magic                  | 16 bytes: "Master of Magic\0"                              |
//! | 0x0010         | Key                    | 14 bytes, the last one carries the encryption markers      |
//! | 0x001E         | File Table Offset      | 4 bytes: offset of the table, relative to the header end   |
//! | 0x0022         | Seed                   | 4 bytes: folded into the file count                        |
//! | 0x0026         | Declared Files         | 4 bytes: `files + seed + 7`                                |
//! | 0x002A         | Version                | 4 bytes: `major << 8 \| minor`                             |
//!
//! ### Header
//!
//! - **Key**: historically an obfuscation key. The final byte records whether entries are
//!   encrypted with a user key (`0x01`) and whether the file table is (`0x02`).
//! - **Seed**: for versions `0x300` and later this holds the high 32 bits of the table offset
//!   and the file count is `declared - 7`. Otherwise the file count is `declared - seed - 7`.
//!
//! ### Blob Region
//!
//! Payloads are stored back to back behind the header, each padded to a multiple of 8 bytes.
//! Payloads are compressed (zlib, raw deflate framed as zlib, or LZMA behind a `0x00` marker),
//! optionally obfuscated with the legacy DES cycle cipher, and optionally encrypted with a user key.
//!
//! ### File Table
//!
//! The table layout depends on the version:
//!
//! | Version       | Layout                                                                     |
//! |---------------|----------------------------------------------------------------------------|
//! | `>= 0x300`    | `i32 reserved`, then as `0x200` with 8 byte offsets                        |
//! | `>= 0x200`    | `i32 compressed`, `i32 size`, compressed records, optionally encrypted     |
//! | `>= 0x100`    | uncompressed records up to the end of the file, names DES encoded          |
//! | `>= 0x018`    | uncompressed records with nibble swapped names, payloads stored raw        |
//!
//! A `0x200` record is laid out as follows:
//!
//! | Field                  | Description                                             |
//! |------------------------|---------------------------------------------------------|
//! | Name                   | NUL terminated, `\` separated path                       |
//! | Compressed Size        | 4 bytes                                                 |
//! | Aligned Size           | 4 bytes: compressed size rounded up to 8                |
//! | Decompressed Size      | 4 bytes                                                 |
//! | Flags                  | 1 byte: see [`entry::EntryFlags`]                       |
//! | Offset                 | 4 bytes: relative to the end of the header              |
//!
//! ## Additional Information
//!
//! - **File Extension**: `.grf`, `.gpf`
//! - **Endianness**: Little-endian for all multi-byte integers
//! - **Compression Methods**: zlib, deflate, LZMA, raw, and the read only LZSS of old archives
//!

pub mod block;
pub mod cipher;
pub mod compression;
pub mod container;
pub mod des;
pub mod entry;
pub mod error;
pub mod handle;
pub mod header;
pub mod lzss;
pub mod pool;
pub mod quick_merge;
pub mod table;
pub mod types;
pub mod user_key;
pub mod version;
pub mod write;

pub use compression::{Codec, CodecConfig};
pub use container::{Container, ContainerOptions, OpenMode, SaveMode};
pub use entry::FileEntry;
pub use table::FileTable;
pub use version::GrfVersion;
pub use write::{GrfWriter, WriteOutcome};
