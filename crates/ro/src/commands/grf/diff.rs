use std::collections::BTreeMap;
use std::fmt::Display;
use std::path::PathBuf;

use clap::{Args, ValueEnum};
use itertools::Itertools;
use miette::{miette, Result};
use owo_colors::OwoColorize;
use ro_grf::{Container, FileEntry};

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Compare names and decompressed content
    #[default]
    Semantic,
    /// Also compare the header and how each entry is stored
    Full,
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Change {
    Added(String),
    Removed(String),
    Comparison(String, String, String),
    Modified(String, Vec<Change>, Vec<Change>),
}

impl Change {
    fn with_children(&mut self, children: Vec<Change>) -> Result<()> {
        match self {
            Change::Modified(_, vec, _) => {
                vec.extend(children);
                vec.sort();
                Ok(())
            }
            _ => Err(miette!("tried to add children to an addition or removal")),
        }
    }

    fn with_related(&mut self, related: Change) -> Result<()> {
        match self {
            Change::Modified(_, _, vec) => {
                vec.push(related);
                Ok(())
            }
            _ => Err(miette!("tried to add related to an addition or removal")),
        }
    }
}

impl Display for Change {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Change::Added(v) => writeln!(f, "✅ {}", v.green()),
            Change::Removed(v) => writeln!(f, "❌ {}", v.red()),
            Change::Comparison(key, old, new) => {
                writeln!(f, "* {}: {} vs {}", key, old.red(), new.green())
            }
            Change::Modified(v, children, related) => {
                writeln!(f, "🔃 {}", v.blue())?;
                let body = related
                    .iter()
                    .chain(children)
                    .map(|c| c.to_string())
                    .join("")
                    .lines()
                    .filter(|l| !l.trim().is_empty())
                    .map(|l| format!("  {l}"))
                    .join("\n");
                if !body.is_empty() {
                    writeln!(f, "{body}")?;
                }
                Ok(())
            }
        }
    }
}

#[derive(Args)]
pub struct DiffArgs {
    /// An input GRF file
    #[arg(short, long, value_name = "FILE")]
    left: PathBuf,

    /// An input GRF file
    #[arg(short, long, value_name = "FILE")]
    right: PathBuf,

    /// Key of the left container
    #[arg(long)]
    left_key: Option<String>,

    /// Key of the right container
    #[arg(long)]
    right_key: Option<String>,

    /// Comparison mode
    #[arg(short, long, value_enum, default_value_t = Mode::Semantic)]
    mode: Mode,
}

impl DiffArgs {
    fn handle_entry(&self, left: (&Container, &FileEntry), right: (&Container, &FileEntry)) -> Result<Option<Change>> {
        let (left_grf, left) = left;
        let (right_grf, right) = right;
        let mut result: Option<Change> = None;
        let modified = || Change::Modified(right.name().to_owned(), Vec::new(), Vec::new());

        if left.size() != right.size() {
            result.get_or_insert_with(modified).with_related(Change::Comparison(
                "size".into(),
                left.size().to_string(),
                right.size().to_string(),
            ))?;
        }

        if self.mode == Mode::Full {
            if left.compressed_size() != right.compressed_size() {
                result.get_or_insert_with(modified).with_related(Change::Comparison(
                    "compressed size".into(),
                    left.compressed_size().to_string(),
                    right.compressed_size().to_string(),
                ))?;
            }
            if left.flags() != right.flags() {
                result.get_or_insert_with(modified).with_related(Change::Comparison(
                    "flags".into(),
                    format!("{:?}", left.flags()),
                    format!("{:?}", right.flags()),
                ))?;
            }
        }

        if result.is_none() && left_grf.read(left.name())? != right_grf.read(right.name())? {
            result.get_or_insert_with(modified).with_related(Change::Comparison(
                "content".into(),
                "old".into(),
                "new".into(),
            ))?;
        }

        Ok(result)
    }

    fn handle_grf(&self, left: &Container, right: &Container) -> Result<Option<Change>> {
        let name = self.right.display().to_string();
        let mut result: Option<Change> = None;
        let modified = || Change::Modified(name.clone(), Vec::new(), Vec::new());

        if left.len() != right.len() {
            result.get_or_insert_with(modified).with_related(Change::Comparison(
                "entries".into(),
                left.len().to_string(),
                right.len().to_string(),
            ))?;
        }

        if self.mode == Mode::Full {
            let (l, r) = (left.header(), right.header());
            if l.version != r.version {
                result.get_or_insert_with(modified).with_related(Change::Comparison(
                    "version".into(),
                    l.version.to_string(),
                    r.version.to_string(),
                ))?;
            }
            if (l.is_encrypted, l.encrypt_file_table) != (r.is_encrypted, r.encrypt_file_table) {
                result.get_or_insert_with(modified).with_related(Change::Comparison(
                    "encryption".into(),
                    format!("content {}, table {}", l.is_encrypted, l.encrypt_file_table),
                    format!("content {}, table {}", r.is_encrypted, r.encrypt_file_table),
                ))?;
            }
        }

        let key = |e: &FileEntry| e.name().to_lowercase().replace('/', "\\");
        let left_files: BTreeMap<String, &FileEntry> = left.entries().filter(|e| e.is_file()).map(|e| (key(e), e)).collect();
        let right_files: BTreeMap<String, &FileEntry> = right.entries().filter(|e| e.is_file()).map(|e| (key(e), e)).collect();

        let added = right_files
            .iter()
            .filter(|(k, _)| !left_files.contains_key(*k))
            .map(|(_, e)| Change::Added(e.name().to_owned()))
            .collect_vec();
        if !added.is_empty() {
            result.get_or_insert_with(modified).with_children(added)?;
        }

        let removed = left_files
            .iter()
            .filter(|(k, _)| !right_files.contains_key(*k))
            .map(|(_, e)| Change::Removed(e.name().to_owned()))
            .collect_vec();
        if !removed.is_empty() {
            result.get_or_insert_with(modified).with_children(removed)?;
        }

        let mut changed = Vec::new();
        for (k, l) in &left_files {
            if let Some(r) = right_files.get(k) {
                if let Some(change) = self.handle_entry((left, *l), (right, *r))? {
                    changed.push(change);
                }
            }
        }
        if !changed.is_empty() {
            result.get_or_insert_with(modified).with_children(changed)?;
        }

        Ok(result)
    }

    pub fn handle(&self) -> Result<()> {
        let left = super::open(&self.left, self.left_key.as_deref())?;
        let right = super::open(&self.right, self.right_key.as_deref())?;

        match self.handle_grf(&left, &right)? {
            Some(difference) => println!("{difference}"),
            None => println!("{}", "no differences".dimmed()),
        }
        Ok(())
    }
}
