use std::path::PathBuf;

use clap::Args;
use itertools::Itertools;
use miette::Result;
use owo_colors::OwoColorize;

#[derive(Args)]
pub struct ListArgs {
    /// An input GRF file
    #[arg(short, long, value_name = "FILE")]
    file: PathBuf,

    /// Key of an encrypted container
    #[arg(short, long)]
    key: Option<String>,

    /// Sort entries by name instead of table order
    #[arg(long, default_value_t = false)]
    sorted: bool,
}

impl ListArgs {
    pub fn handle(&self) -> Result<()> {
        let container = super::open(&self.file, self.key.as_deref())?;

        let entries = if self.sorted {
            container.entries().sorted_by_key(|e| e.name().to_lowercase()).collect_vec()
        } else {
            container.entries().collect_vec()
        };

        for entry in &entries {
            if entry.is_directory() {
                println!("{:>10} {:>10}  {}", "-", "-", entry.name().blue());
                continue;
            }
            println!(
                "{:>10} {:>10}  {}",
                entry.size(),
                entry.compressed_size().dimmed(),
                entry.name()
            );
        }

        let header = container.header();
        println!(
            "{} entries, version {}, {} bytes once extracted",
            entries.len(),
            header.version,
            container.decompressed_size().unwrap_or_default()
        );
        for problem in container.found_errors() {
            println!("{} {}", "warning:".yellow(), problem);
        }
        Ok(())
    }
}
