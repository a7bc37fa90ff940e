use std::path::PathBuf;

use clap::Args;
use miette::{Context, Result};
use ro_grf::container::ExtractOptions;
use tracing::info;

#[derive(Args)]
pub struct ExtractArgs {
    /// An input GRF file
    #[arg(short, long, value_name = "FILE")]
    file: PathBuf,

    /// A target directory
    #[arg(short, long, value_name = "DIR")]
    directory: PathBuf,

    /// Entries to extract, every entry when omitted
    #[arg(value_name = "ENTRY")]
    entries: Vec<String>,

    /// Key of an encrypted container
    #[arg(short, long)]
    key: Option<String>,

    /// Allow overwriting the target
    #[arg(long, default_value_t = false)]
    overwrite: bool,

    /// Number of worker threads
    #[arg(short, long)]
    workers: Option<usize>,
}

impl ExtractArgs {
    pub fn handle(&self) -> Result<()> {
        let container = super::open(&self.file, self.key.as_deref())?;

        let options = ExtractOptions::builder()
            .overwrite(self.overwrite)
            .maybe_workers(self.workers)
            .build();
        let paths: Vec<&str> = self.entries.iter().map(String::as_str).collect();

        let written = container
            .extract(&paths, &self.directory, &options)
            .context(format!("extracting into {}", self.directory.display()))?;
        info!("extracted {written} files into {}", self.directory.display());
        Ok(())
    }
}
