use std::path::PathBuf;

use clap::Args;
use miette::{Context, Result};
use ro_grf::GrfVersion;
use tracing::info;

use super::parse_version;

#[derive(Args)]
pub struct RepackArgs {
    /// The GRF file to rewrite
    #[arg(short, long, value_name = "FILE")]
    file: PathBuf,

    /// Convert the container to another version
    #[arg(long, value_parser = parse_version)]
    version: Option<GrfVersion>,

    /// Key of an encrypted container
    #[arg(short, long)]
    key: Option<String>,

    /// Remove the encryption, requires the key
    #[arg(long, default_value_t = false, requires = "key")]
    decrypt: bool,
}

impl RepackArgs {
    pub fn handle(&self) -> Result<()> {
        let mut container = super::open(&self.file, self.key.as_deref())?;
        let before = std::fs::metadata(&self.file).map(|m| m.len()).unwrap_or_default();

        if let Some(version) = self.version {
            container.set_version(version)?;
        }
        if self.decrypt {
            container.remove_encryption()?;
        }
        container.repack().context(format!("rewriting {}", self.file.display()))?;

        let after = std::fs::metadata(&self.file).map(|m| m.len()).unwrap_or_default();
        info!("repacked {}: {before} -> {after} bytes", self.file.display());
        Ok(())
    }
}
