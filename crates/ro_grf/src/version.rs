//! Format versions and the table dialect each one selects.

use std::fmt;

use crate::error::{Error, Result};

/// The layout used by the file table of a container
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum TableDialect {
    /// Pre-0x100 layout: fixed per-entry header, nibble swapped names, no compression
    Alpha,
    /// 0x1xx layout: flat records with DES coded names
    V1,
    /// 0x2xx layout: compressed table, optionally encrypted as a whole
    V2,
    /// 0x3xx layout: like [`TableDialect::V2`] with a reserved leading field and 64 bit offsets
    V3,
}

/// A container format version, stored as `major << 8 | minor`
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GrfVersion(u32);

impl GrfVersion {
    /// Oldest alpha version that can still be read
    pub const ALPHA: GrfVersion = GrfVersion(0x0018);
    /// Legacy DES obfuscated version
    pub const V0X102: GrfVersion = GrfVersion(0x0102);
    /// Legacy DES obfuscated version, most common 0x1xx flavour
    pub const V0X103: GrfVersion = GrfVersion(0x0103);
    /// Compressed table version
    pub const V0X200: GrfVersion = GrfVersion(0x0200);
    /// Compressed table version with 64 bit offsets
    pub const V0X300: GrfVersion = GrfVersion(0x0300);

    /// Wraps a raw version number without validating it
    pub const fn from_raw(raw: u32) -> Self {
        GrfVersion(raw)
    }

    /// Builds a version from its major and minor parts
    pub const fn new(major: u8, minor: u8) -> Self {
        GrfVersion(((major as u32) << 8) | minor as u32)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    pub const fn major(self) -> u8 {
        ((self.0 >> 8) & 0xFF) as u8
    }

    pub const fn minor(self) -> u8 {
        (self.0 & 0xFF) as u8
    }

    /// Selects the table dialect, failing for versions older than the alpha layout or newer than 0x3FF
    pub fn dialect(self) -> Result<TableDialect> {
        match self.0 {
            v if v > 0x3FF => Err(Error::UnsupportedVersion(v)),
            v if v >= 0x300 => Ok(TableDialect::V3),
            v if v >= 0x200 => Ok(TableDialect::V2),
            v if v >= 0x100 => Ok(TableDialect::V1),
            v if v >= Self::ALPHA.0 => Ok(TableDialect::Alpha),
            v => Err(Error::UnsupportedVersion(v)),
        }
    }

    /// Whether entries of this version are always legacy DES obfuscated
    pub fn is_legacy_encrypted(self) -> bool {
        matches!(self.dialect(), Ok(TableDialect::V1))
    }

    /// Whether offsets are limited to 32 bits
    pub fn has_32bit_offsets(self) -> bool {
        !matches!(self.dialect(), Ok(TableDialect::V3))
    }
}

impl Default for GrfVersion {
    fn default() -> Self {
        Self::V0X200
    }
}

impl fmt::Debug for GrfVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GrfVersion(0x{:X})", self.0)
    }
}

impl fmt::Display for GrfVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:X}", self.0)
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::{GrfVersion, TableDialect};
    use crate::error::{Error, Result};

    #[test]
    fn dialect_selection() -> Result<()> {
        assert_eq!(GrfVersion::from_raw(0x301).dialect()?, TableDialect::V3);
        assert_eq!(GrfVersion::V0X200.dialect()?, TableDialect::V2);
        assert_eq!(GrfVersion::V0X103.dialect()?, TableDialect::V1);
        assert_eq!(GrfVersion::from_raw(0x20).dialect()?, TableDialect::Alpha);
        assert!(matches!(
            GrfVersion::from_raw(0x10).dialect(),
            Err(Error::UnsupportedVersion(0x10))
        ));
        assert!(matches!(
            GrfVersion::from_raw(0x400).dialect(),
            Err(Error::UnsupportedVersion(0x400))
        ));
        Ok(())
    }

    #[test]
    fn major_minor_packing() {
        let version = GrfVersion::new(2, 0);
        assert_eq!(version, GrfVersion::V0X200);
        assert_eq!(GrfVersion::V0X103.major(), 1);
        assert_eq!(GrfVersion::V0X103.minor(), 3);
    }
}
