use std::path::PathBuf;

use clap::Args;
use miette::{miette, Context, Result};
use ro_grf::container::{Container, ContainerOptions, OpenMode, SaveMode};
use ro_grf::{CodecConfig, GrfVersion};
use tracing::info;

use super::{parse_version, CodecArg};

#[derive(Args)]
pub struct PackArgs {
    /// An input directory
    #[arg(short, long, value_name = "DIR")]
    directory: PathBuf,

    /// A target GRF file
    #[arg(short, long, value_name = "FILE")]
    file: PathBuf,

    /// Version of the container
    #[arg(long, value_parser = parse_version, default_value = "0x200")]
    version: GrfVersion,

    /// Compression of the entries
    #[arg(long, value_enum, default_value_t = CodecArg::Zlib)]
    codec: CodecArg,

    /// Compression level, 0 to 9
    #[arg(long, default_value_t = 6)]
    level: u32,

    /// Encrypt the entries with a key
    #[arg(short, long)]
    key: Option<String>,

    /// Encrypt the file table as well, requires a key
    #[arg(long, default_value_t = false, requires = "key")]
    encrypt_table: bool,

    /// Number of worker threads
    #[arg(short, long)]
    workers: Option<usize>,

    /// Allow overwriting the target
    #[arg(long, default_value_t = false)]
    overwrite: bool,
}

impl PackArgs {
    pub fn handle(&self) -> Result<()> {
        if self.file.exists() && !self.overwrite {
            return Err(miette!("{} already exists", self.file.display()));
        }

        let mut options = ContainerOptions::builder()
            .version(self.version)
            .codec(CodecConfig::builder().codec(self.codec.into()).level(self.level).build())
            .build();
        if let Some(workers) = self.workers {
            options.workers = workers;
        }

        let mut container = Container::open_with(&self.file, OpenMode::New, options)?;
        let added = container
            .add_directory("", &self.directory)
            .context(format!("reading {}", self.directory.display()))?;
        if added == 0 {
            return Err(miette!("directory is empty"));
        }

        if let Some(key) = &self.key {
            container.set_encryption(key, self.encrypt_table)?;
        }

        container
            .save(None, SaveMode::Full)
            .context(format!("writing {}", self.file.display()))?;
        info!("packed {added} files into {}", self.file.display());
        Ok(())
    }
}
