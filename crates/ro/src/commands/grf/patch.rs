use std::path::PathBuf;

use clap::Args;
use miette::{miette, Context, Result};
use tracing::info;

#[derive(Args)]
pub struct PatchArgs {
    /// The container the patch applies to
    #[arg(long, value_name = "FILE")]
    older: PathBuf,

    /// The container the patch leads to
    #[arg(long, value_name = "FILE")]
    newer: PathBuf,

    /// The patch container to create
    #[arg(short, long, value_name = "FILE")]
    output: PathBuf,

    /// Key shared by both containers
    #[arg(short, long)]
    key: Option<String>,

    /// Allow overwriting the output
    #[arg(long, default_value_t = false)]
    overwrite: bool,
}

impl PatchArgs {
    pub fn handle(&self) -> Result<()> {
        if self.output.exists() && !self.overwrite {
            return Err(miette!("{} already exists", self.output.display()));
        }

        let older = super::open(&self.older, self.key.as_deref())?;
        let mut newer = super::open(&self.newer, self.key.as_deref())?;

        let unchanged = older
            .patch(&mut newer, &self.output)
            .context(format!("writing {}", self.output.display()))?;
        info!(
            "{} holds {} changed entries, {unchanged} unchanged ones were left out",
            self.output.display(),
            newer.len()
        );
        Ok(())
    }
}
