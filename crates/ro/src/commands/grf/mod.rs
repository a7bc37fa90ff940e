pub mod add;
pub mod compact;
pub mod diff;
pub mod extract;
pub mod list;
pub mod merge;
pub mod pack;
pub mod patch;
pub mod repack;

use std::path::Path;

use clap::ValueEnum;
use miette::{Context, Result};
use ro_grf::container::{Container, SaveMode};
use ro_grf::{Codec, GrfVersion};

#[derive(clap::Subcommand)]
pub enum GrfCommands {
    /// Add files or a directory to a GRF container
    Add(add::AddArgs),
    /// Rewrite a GRF container, storing identical payloads once
    Compact(compact::CompactArgs),
    /// Compare two GRF containers
    Diff(diff::DiffArgs),
    /// Extract a GRF container into a directory
    Extract(extract::ExtractArgs),
    /// List the entries of a GRF container
    List(list::ListArgs),
    /// Merge a GRF container into another one
    Merge(merge::MergeArgs),
    /// Create a GRF container from a directory
    Pack(pack::PackArgs),
    /// Create a GRF container holding what changed between two containers
    Patch(patch::PatchArgs),
    /// Rewrite a GRF container, reclaiming wasted space
    Repack(repack::RepackArgs),
}

impl GrfCommands {
    pub fn handle(&self) -> Result<()> {
        match self {
            GrfCommands::Add(add) => add.handle(),
            GrfCommands::Compact(compact) => compact.handle(),
            GrfCommands::Diff(diff) => diff.handle(),
            GrfCommands::Extract(extract) => extract.handle(),
            GrfCommands::List(list) => list.handle(),
            GrfCommands::Merge(merge) => merge.handle(),
            GrfCommands::Pack(pack) => pack.handle(),
            GrfCommands::Patch(patch) => patch.handle(),
            GrfCommands::Repack(repack) => repack.handle(),
        }
    }
}

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum CodecArg {
    #[default]
    Zlib,
    Deflate,
    Lzma,
    Raw,
}

impl From<CodecArg> for Codec {
    fn from(value: CodecArg) -> Self {
        match value {
            CodecArg::Zlib => Codec::Zlib,
            CodecArg::Deflate => Codec::Deflate,
            CodecArg::Lzma => Codec::Lzma,
            CodecArg::Raw => Codec::Raw,
        }
    }
}

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum SaveModeArg {
    /// Append into free space when it is cheap
    #[default]
    Quick,
    /// Rewrite the whole container
    Full,
}

impl From<SaveModeArg> for SaveMode {
    fn from(value: SaveModeArg) -> Self {
        match value {
            SaveModeArg::Quick => SaveMode::QuickMerge,
            SaveModeArg::Full => SaveMode::Full,
        }
    }
}

/// Parses `0x200`, `200` or `2.0`
pub fn parse_version(value: &str) -> Result<GrfVersion, String> {
    let invalid = || format!("{value} is not a version, use 0x200 or 2.0");

    let version = if let Some((major, minor)) = value.split_once('.') {
        let major = major.parse::<u8>().map_err(|_| invalid())?;
        let minor = u8::from_str_radix(minor, 16).map_err(|_| invalid())?;
        GrfVersion::new(major, minor)
    } else {
        let digits = value.trim_start_matches("0x").trim_start_matches("0X");
        GrfVersion::from_raw(u32::from_str_radix(digits, 16).map_err(|_| invalid())?)
    };

    version.dialect().map_err(|e| e.to_string())?;
    Ok(version)
}

/// Opens a container, validating `key` when one is given
pub fn open(path: &Path, key: Option<&str>) -> Result<Container> {
    let mut container = Container::open(path).context(format!("opening {}", path.display()))?;
    if let Some(key) = key {
        container.validate_key(key).context("validating the key")?;
    }
    Ok(container)
}

#[cfg(test)]
mod test {
    use super::parse_version;
    use ro_grf::GrfVersion;

    #[test]
    fn versions() {
        assert_eq!(parse_version("0x200"), Ok(GrfVersion::V0X200));
        assert_eq!(parse_version("103"), Ok(GrfVersion::V0X103));
        assert_eq!(parse_version("3.0"), Ok(GrfVersion::V0X300));
        assert!(parse_version("0x900").is_err());
        assert!(parse_version("abc.d").is_err());
    }
}
