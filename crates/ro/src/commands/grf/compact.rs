use std::path::PathBuf;

use clap::Args;
use miette::{Context, Result};
use tracing::info;

#[derive(Args)]
pub struct CompactArgs {
    /// The GRF file to rewrite
    #[arg(short, long, value_name = "FILE")]
    file: PathBuf,

    /// Key of an encrypted container
    #[arg(short, long)]
    key: Option<String>,
}

impl CompactArgs {
    pub fn handle(&self) -> Result<()> {
        let mut container = super::open(&self.file, self.key.as_deref())?;
        let before = std::fs::metadata(&self.file).map(|m| m.len()).unwrap_or_default();

        container.compact().context(format!("compacting {}", self.file.display()))?;

        let after = std::fs::metadata(&self.file).map(|m| m.len()).unwrap_or_default();
        info!("compacted {}: {before} -> {after} bytes", self.file.display());
        Ok(())
    }
}
