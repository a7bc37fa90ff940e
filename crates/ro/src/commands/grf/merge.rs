use std::path::PathBuf;

use clap::Args;
use miette::{Context, Result};
use tracing::info;

use super::SaveModeArg;

#[derive(Args)]
pub struct MergeArgs {
    /// The GRF file receiving the entries
    #[arg(short, long, value_name = "FILE")]
    file: PathBuf,

    /// The GRF file whose entries are merged
    #[arg(short, long, value_name = "FILE")]
    source: PathBuf,

    /// Write the result here instead of editing the target
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Key of the receiving container
    #[arg(short, long)]
    key: Option<String>,

    /// Key of the merged container
    #[arg(long)]
    source_key: Option<String>,

    /// How the container is written
    #[arg(short, long, value_enum, default_value_t = SaveModeArg::Quick)]
    mode: SaveModeArg,
}

impl MergeArgs {
    pub fn handle(&self) -> Result<()> {
        let mut container = super::open(&self.file, self.key.as_deref())?;
        let source = super::open(&self.source, self.source_key.as_deref())?;

        let merged = container.merge(&source)?;
        container
            .save(self.output.as_deref(), self.mode.into())
            .context("writing the merged container")?;

        let written = self.output.as_ref().unwrap_or(&self.file);
        info!("merged {merged} entries into {}", written.display());
        Ok(())
    }
}
