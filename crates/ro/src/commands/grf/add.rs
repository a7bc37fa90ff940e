use std::path::PathBuf;

use clap::Args;
use miette::{Context, Result};
use tracing::info;

use super::SaveModeArg;

#[derive(Args)]
pub struct AddArgs {
    /// The GRF file to edit
    #[arg(short, long, value_name = "FILE")]
    file: PathBuf,

    /// Files or directories to add
    #[arg(value_name = "PATH", required = true)]
    paths: Vec<PathBuf>,

    /// Path inside the container the inputs are placed under
    #[arg(short, long, default_value = "data")]
    root: String,

    /// Key of an encrypted container
    #[arg(short, long)]
    key: Option<String>,

    /// How the container is written
    #[arg(short, long, value_enum, default_value_t = SaveModeArg::Quick)]
    mode: SaveModeArg,
}

impl AddArgs {
    pub fn handle(&self) -> Result<()> {
        let mut container = super::open(&self.file, self.key.as_deref())?;

        let mut added = 0;
        for path in &self.paths {
            if path.is_dir() {
                added += container
                    .add_directory(&self.root, path)
                    .context(format!("reading {}", path.display()))?;
                continue;
            }

            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            container
                .add_file(&format!("{}\\{name}", self.root), path)
                .context(format!("adding {}", path.display()))?;
            added += 1;
        }

        container
            .save(None, self.mode.into())
            .context(format!("writing {}", self.file.display()))?;
        info!("added {added} files to {}", self.file.display());
        Ok(())
    }
}
