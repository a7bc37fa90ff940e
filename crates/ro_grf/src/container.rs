//! Container sessions: opening, editing and saving a GRF file.
//!
//! ```no_run
//! use ro_grf::container::{Container, SaveMode};
//!
//! fn add_readme() -> ro_grf::error::Result<()> {
//!     let mut container = Container::open("data.grf")?;
//!     container.add_buffer("data\\readme.txt", b"hello".to_vec())?;
//!     container.save(None, SaveMode::QuickMerge)
//! }
//! ```

use std::fs::{self, OpenOptions};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use bon::Builder;
use md5::{Digest, Md5};
use tempfile::NamedTempFile;
use tracing::{error, info, instrument, warn};
use walkdir::WalkDir;

use crate::compression::CodecConfig;
use crate::entry::{normalize, EntrySource, FileEntry, Modification};
use crate::error::{Error, Result};
use crate::handle::ArchiveHandle;
use crate::header::Header;
use crate::pool::{default_workers, CancelToken, Progress, WorkerPool};
use crate::quick_merge::PendingChanges;
use crate::table::FileTable;
use crate::user_key::{UserKey, KEY_MARKER_PATH};
use crate::version::{GrfVersion, TableDialect};
use crate::write::{ArchiveSource, GrfWriter, RewriteMode, WriteOutcome};

/// How a container is opened
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub enum OpenMode {
    /// The file must exist and be valid
    #[default]
    Normal,
    /// Start empty, the file is created or replaced on save
    New,
    /// Open the file when it exists, start empty otherwise
    OpenOrNew,
    /// Like [`OpenMode::Normal`], keeping entries that point past the end of the file
    Repair,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ContainerState {
    Closed,
    Opened(OpenMode),
}

/// Strategy used by [`Container::save`]
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub enum SaveMode {
    /// Rewrite every entry
    Full,
    /// Append the edits into free space, falling back to a full rewrite when that is wasteful
    #[default]
    QuickMerge,
    /// Rewrite every entry, storing identical payloads once
    Compact,
}

/// Whether a save blocks the caller
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub enum Execution {
    #[default]
    Sync,
    Async,
}

/// Settings of a container session
#[derive(Debug, Clone, Builder)]
pub struct ContainerOptions {
    /// Compression used for new entries and for the file table
    #[builder(default)]
    pub codec: CodecConfig,

    /// Number of worker threads
    #[builder(default = default_workers())]
    pub workers: usize,

    /// Version of newly created containers
    #[builder(default)]
    pub version: GrfVersion,
}

impl Default for ContainerOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Settings of [`Container::extract`]
#[derive(Debug, Default, Clone, Builder)]
pub struct ExtractOptions {
    /// Replace files that already exist
    #[builder(default)]
    pub overwrite: bool,

    /// Workers used instead of the container's pool
    pub workers: Option<usize>,
}

#[derive(Debug, Clone)]
enum KeyTransition {
    Set { key: UserKey, encrypt_table: bool },
    Remove,
}

/// Commands applied by the next save
#[derive(Debug, Default, Clone)]
struct PendingCommands {
    version: Option<GrfVersion>,
    key: Option<KeyTransition>,
}

/// An opened container and its unsaved edits
#[derive(Debug)]
pub struct Container {
    state: ContainerState,
    path: Option<PathBuf>,
    handle: Option<ArchiveHandle>,
    header: Header,
    table: FileTable,
    options: ContainerOptions,
    pool: WorkerPool,
    pending: PendingCommands,
    merge_source: Option<ArchiveSource>,
    cancel_reload: bool,
    awaiting_key: bool,
    progress: Progress,
    cancel: CancelToken,
}

impl Container {
    /// An empty container that is not backed by a file yet
    pub fn new(options: ContainerOptions) -> Result<Container> {
        options.version.dialect()?;
        Ok(Container {
            state: ContainerState::Opened(OpenMode::New),
            path: None,
            handle: None,
            header: Header::new(options.version),
            table: FileTable::new(),
            pool: WorkerPool::new(options.workers)?,
            options,
            pending: PendingCommands::default(),
            merge_source: None,
            cancel_reload: false,
            awaiting_key: false,
            progress: Progress::default(),
            cancel: CancelToken::default(),
        })
    }

    /// Opens an existing container with default options
    pub fn open(path: impl AsRef<Path>) -> Result<Container> {
        Self::open_with(path, OpenMode::Normal, ContainerOptions::default())
    }

    /// Opens a container whose file table is encrypted
    pub fn open_with_key(path: impl AsRef<Path>, passphrase: &str) -> Result<Container> {
        let mut container = Self::open(path)?;
        container.validate_key(passphrase)?;
        Ok(container)
    }

    #[instrument(skip(path, options), fields(path = %path.as_ref().display()), err)]
    pub fn open_with(path: impl AsRef<Path>, mode: OpenMode, options: ContainerOptions) -> Result<Container> {
        let path = path.as_ref();
        let mut container = Container::new(options)?;
        container.path = Some(path.to_path_buf());

        match mode {
            OpenMode::New => {}
            OpenMode::OpenOrNew if !path.exists() => {}
            OpenMode::OpenOrNew => container.load(path, OpenMode::Normal)?,
            OpenMode::Normal | OpenMode::Repair => container.load(path, mode)?,
        }

        info!(files = container.table.len(), state = ?container.state, "container opened");
        Ok(container)
    }

    fn load(&mut self, path: &Path, mode: OpenMode) -> Result<()> {
        let handle = ArchiveHandle::open(path)?;
        let key = self.header.user_key().cloned();
        let mut header = handle.with_file(Header::read)?;
        header.set_user_key(key);

        let awaiting_key = header.encrypt_file_table && header.user_key().is_none();
        let table = if awaiting_key {
            info!("the file table is encrypted, waiting for a key");
            FileTable::new()
        } else {
            handle.with_file(|f| FileTable::parse(f, &mut header, mode == OpenMode::Repair))?
        };

        self.progress.set(if awaiting_key {
            Progress::AWAITING_KEY
        } else {
            100.0
        });
        self.handle = Some(handle);
        self.header = header;
        self.table = table;
        self.awaiting_key = awaiting_key;
        self.pending = PendingCommands::default();
        self.merge_source = None;
        self.path = Some(path.to_path_buf());
        self.state = ContainerState::Opened(mode);
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        match self.state {
            ContainerState::Closed => Err(Error::ContainerClosed),
            ContainerState::Opened(_) => Ok(()),
        }
    }

    fn ensure_readable(&self) -> Result<()> {
        self.ensure_open()?;
        if self.awaiting_key {
            return Err(Error::NoKeySet);
        }
        Ok(())
    }

    /// Derives a key from `passphrase` and checks it against the container
    ///
    /// An encrypted file table is parsed with the key, otherwise the key marker entry decides.
    pub fn validate_key(&mut self, passphrase: &str) -> Result<()> {
        self.ensure_open()?;
        let key = UserKey::derive(passphrase);

        if self.awaiting_key {
            let handle = self.handle.as_ref().ok_or(Error::ContainerClosed)?;
            let repair = self.state == ContainerState::Opened(OpenMode::Repair);
            let mut header = self.header.clone();
            header.set_user_key(Some(key.clone()));
            let table = handle.with_file(|f| FileTable::parse(f, &mut header, repair))?;

            self.header = header;
            self.table = table;
            self.awaiting_key = false;
            self.progress.set(100.0);
        }

        let marker = match self.table.get(KEY_MARKER_PATH) {
            Some(entry) => Some(self.read_entry(entry, false)?),
            None => None,
        };
        self.header.validate_key(key, marker.as_deref())?;
        info!("encryption key accepted");
        Ok(())
    }

    /// Releases the file, unsaved edits are lost
    pub fn close(&mut self) {
        self.handle = None;
        self.table = FileTable::new();
        self.pending = PendingCommands::default();
        self.merge_source = None;
        self.awaiting_key = false;
        self.state = ContainerState::Closed;
    }

    /// Re-reads the container from disk, dropping unsaved edits
    ///
    /// After a failed save the edits are kept once instead.
    pub fn reload(&mut self) -> Result<()> {
        self.ensure_open()?;
        if self.cancel_reload {
            info!("reload skipped, keeping the edits of the failed save");
            self.cancel_reload = false;
            return Ok(());
        }

        match (self.path.clone(), &self.handle) {
            (Some(path), Some(_)) => {
                let mode = match self.state {
                    ContainerState::Opened(OpenMode::Repair) => OpenMode::Repair,
                    _ => OpenMode::Normal,
                };
                self.load(&path, mode)
            }
            _ => {
                self.table = FileTable::new();
                self.pending = PendingCommands::default();
                self.merge_source = None;
                Ok(())
            }
        }
    }

    pub fn state(&self) -> ContainerState {
        self.state
    }

    /// The file backing this container, if any
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn table(&self) -> &FileTable {
        &self.table
    }

    /// Version the container is written with on the next save
    pub fn version(&self) -> GrfVersion {
        self.pending.version.unwrap_or(self.header.version)
    }

    /// Problems found while loading
    pub fn found_errors(&self) -> &[String] {
        &self.header.found_errors
    }

    /// Progress of the running operation
    pub fn progress(&self) -> &Progress {
        &self.progress
    }

    /// Token cancelling the running operation
    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Whether the last save failed and the edits were kept
    pub fn cancel_reload(&self) -> bool {
        self.cancel_reload
    }

    /// Whether the file table cannot be read until a key is validated
    pub fn is_awaiting_key(&self) -> bool {
        self.awaiting_key
    }

    /// Adds or replaces an entry with the content of a file on disk
    pub fn add_file(&mut self, grf_path: &str, disk_path: impl AsRef<Path>) -> Result<()> {
        self.ensure_readable()?;
        let disk_path = disk_path.as_ref();
        let len = u32::try_from(fs::metadata(disk_path)?.len()).map_err(|_| Error::CapacityExceeded)?;
        self.insert_added(grf_path, EntrySource::File(disk_path.to_path_buf()), len)
    }

    /// Adds or replaces an entry with in-memory content
    pub fn add_buffer(&mut self, grf_path: &str, data: impl Into<Arc<[u8]>>) -> Result<()> {
        self.ensure_readable()?;
        let data = data.into();
        let len = u32::try_from(data.len()).map_err(|_| Error::CapacityExceeded)?;
        self.insert_added(grf_path, EntrySource::Buffer(data), len)
    }

    /// Adds every file below `directory` under `grf_root`, returning how many were added
    pub fn add_directory(&mut self, grf_root: &str, directory: impl AsRef<Path>) -> Result<usize> {
        self.ensure_readable()?;
        let directory = directory.as_ref();
        let root = normalize(grf_root);

        let mut added = 0;
        for item in WalkDir::new(directory).sort_by_file_name() {
            let item = item.map_err(|e| Error::CustomError(e.to_string()))?;
            if !item.file_type().is_file() {
                continue;
            }
            let Ok(relative) = item.path().strip_prefix(directory) else {
                continue;
            };
            let relative = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("\\");
            let grf_path = if root.is_empty() {
                relative
            } else {
                format!("{root}\\{relative}")
            };
            self.add_file(&grf_path, item.path())?;
            added += 1;
        }

        info!(added, directory = %directory.display(), "directory added");
        Ok(added)
    }

    fn insert_added(&mut self, grf_path: &str, source: EntrySource, len: u32) -> Result<()> {
        let name = normalize(grf_path);
        if name.is_empty() {
            return Err(Error::CustomError("cannot add an entry with an empty path".into()));
        }
        self.table.insert(FileEntry::added(&name, source, len));
        Ok(())
    }

    /// Marks an entry as removed
    pub fn remove(&mut self, path: &str) -> Result<()> {
        self.ensure_readable()?;
        self.table.remove(path)
    }

    pub fn rename(&mut self, from: &str, to: &str) -> Result<()> {
        self.ensure_readable()?;
        self.table.rename(from, to)
    }

    /// Queues a conversion to `version` for the next save
    pub fn set_version(&mut self, version: GrfVersion) -> Result<()> {
        self.ensure_readable()?;
        let dialect = version.dialect()?;
        if dialect == TableDialect::Alpha && self.header.version.dialect()? != TableDialect::Alpha {
            return Err(Error::CustomError("containers cannot be converted to the alpha layout".into()));
        }

        self.pending.version = (version != self.header.version).then_some(version);
        Ok(())
    }

    /// Encrypts every entry with a key derived from `passphrase` on the next save
    pub fn set_encryption(&mut self, passphrase: &str, encrypt_table: bool) -> Result<()> {
        self.ensure_readable()?;
        if !matches!(self.version().dialect()?, TableDialect::V2 | TableDialect::V3) {
            return Err(Error::CustomError(format!(
                "version {} cannot be encrypted, convert it to 0x200 or later",
                self.version()
            )));
        }

        let key = UserKey::derive(passphrase);
        let marker = key.marker();
        let len = marker.len() as u32;
        self.table
            .insert(FileEntry::added(KEY_MARKER_PATH, EntrySource::Buffer(marker.into()), len));
        for entry in self.table.all_mut().filter(|e| e.is_file() && !e.is_key_marker()) {
            entry.modification.remove(Modification::DECRYPT);
            entry.modification.insert(Modification::ENCRYPT);
        }

        self.pending.key = Some(KeyTransition::Set { key, encrypt_table });
        Ok(())
    }

    /// Decrypts every entry on the next save
    pub fn remove_encryption(&mut self) -> Result<()> {
        self.ensure_readable()?;
        if self.table.contains(KEY_MARKER_PATH) {
            self.table.remove(KEY_MARKER_PATH)?;
        }
        for entry in self.table.all_mut().filter(|e| e.is_file()) {
            entry.modification.remove(Modification::ENCRYPT);
            entry.modification.insert(Modification::DECRYPT);
        }

        self.pending.key = Some(KeyTransition::Remove);
        Ok(())
    }

    /// Get a live entry by path
    pub fn entry(&self, path: &str) -> Result<&FileEntry> {
        self.ensure_readable()?;
        self.table.by_name(path)
    }

    /// Live entries in table order
    pub fn entries(&self) -> impl Iterator<Item = &FileEntry> {
        self.table.entries()
    }

    /// The decompressed content of an entry
    pub fn read(&self, path: &str) -> Result<Vec<u8>> {
        let entry = self.entry(path)?;
        self.read_entry(entry, false)
    }

    /// The stored bytes of an entry, still compressed and encrypted
    pub fn read_raw(&self, path: &str) -> Result<Vec<u8>> {
        let entry = self.entry(path)?;
        self.read_entry(entry, true)
    }

    fn read_entry(&self, entry: &FileEntry, raw: bool) -> Result<Vec<u8>> {
        if let Some(source) = &entry.source {
            return source.load();
        }

        let (handle, key) = match &self.merge_source {
            Some(merge) if entry.modification.contains(Modification::GRF_MERGE) => (&merge.handle, merge.key.as_ref()),
            _ => (
                self.handle.as_ref().ok_or(Error::ContainerClosed)?,
                self.header.user_key(),
            ),
        };
        handle.if_saving_throw()?;

        if raw {
            entry.read_raw(handle)
        } else {
            entry.read(handle, key)
        }
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.table.contains(path)
    }

    /// Total size of the files once extracted
    pub fn decompressed_size(&self) -> Option<u128> {
        self.table.decompressed_size()
    }

    /// Folds the entries of `other` into this container, returning how many were taken
    ///
    /// Entries of `other` replace entries with the same path. Their bytes are copied on the
    /// next save.
    pub fn merge(&mut self, other: &Container) -> Result<usize> {
        self.ensure_readable()?;
        other.ensure_readable()?;
        if self.merge_source.is_some() {
            return Err(Error::CustomError(
                "another container is already being merged, save first".into(),
            ));
        }

        let mut merged = 0;
        for entry in other.table.entries().filter(|e| !e.is_key_marker()) {
            let mut entry = entry.clone();
            if !entry.is_pending() {
                entry.modification = Modification::GRF_MERGE;
            }
            self.table.insert(entry);
            merged += 1;
        }

        if let Some(handle) = &other.handle {
            self.merge_source = Some(ArchiveSource {
                handle: handle.clone(),
                version: other.header.version,
                key: other.header.user_key().cloned(),
            });
        }

        info!(merged, "entries merged");
        Ok(merged)
    }

    fn target_header(&self) -> Result<(Header, PendingChanges)> {
        let mut header = self.header.clone();
        let mut changes = PendingChanges::default();

        if let Some(version) = self.pending.version {
            header.version = version;
            changes.version_change = true;
        }
        match &self.pending.key {
            Some(KeyTransition::Set { key, encrypt_table }) => {
                header.is_encrypted = true;
                header.encrypt_file_table = *encrypt_table;
                header.set_user_key(Some(key.clone()));
                changes.key_transition = true;
            }
            Some(KeyTransition::Remove) => {
                header.is_encrypted = false;
                header.encrypt_file_table = false;
                header.set_user_key(None);
                changes.key_transition = true;
            }
            None => {}
        }

        if header.is_encrypted && !matches!(header.version.dialect()?, TableDialect::V2 | TableDialect::V3) {
            return Err(Error::CustomError(format!(
                "version {} cannot hold encrypted entries",
                header.version
            )));
        }
        Ok((header, changes))
    }

    /// Writes the container to `path`, or back to its own file
    ///
    /// The output is written to a temporary file next to the destination and moved in place once
    /// complete. On failure the original file is untouched and the edits are kept.
    #[instrument(skip(self, path), fields(path = ?path.map(Path::display)), err)]
    pub fn save(&mut self, path: Option<&Path>, mode: SaveMode) -> Result<()> {
        self.ensure_readable()?;
        self.cancel.reset();

        let destination = path
            .map(Path::to_path_buf)
            .or_else(|| self.path.clone())
            .ok_or_else(|| Error::CustomError("the container has no file, save it with a destination".into()))?;

        match self.save_to(&destination, mode) {
            Ok(()) => {
                self.cancel_reload = false;
                Ok(())
            }
            Err(e) => {
                error!("save failed, the edits are kept: {e}");
                self.cancel_reload = true;
                self.progress.set(Progress::INDETERMINATE);
                Err(e)
            }
        }
    }

    fn save_to(&mut self, destination: &Path, mode: SaveMode) -> Result<()> {
        let (mut header, changes) = self.target_header()?;
        let mut table = self.table.clone();
        let in_place = self.path.as_deref().is_some_and(|p| same_file(p, destination));

        let guard = self.handle.as_ref().map(ArchiveHandle::begin_save).transpose()?;
        let source = guard.as_ref().map(|guard| ArchiveSource {
            handle: guard.handle().clone(),
            version: self.header.version,
            key: self.header.user_key().cloned(),
        });
        let writer = GrfWriter::builder()
            .pool(&self.pool)
            .codec(self.options.codec)
            .maybe_source(source)
            .maybe_merge(self.merge_source.clone())
            .progress(&self.progress)
            .cancel(&self.cancel)
            .build();

        if mode == SaveMode::QuickMerge && in_place && guard.is_some() {
            let mut file = OpenOptions::new().read(true).write(true).open(destination)?;
            match writer.quick_merge(&mut file, &mut header, &mut table, changes)? {
                WriteOutcome::Written => {
                    drop(writer);
                    drop(guard);
                    return self.finish(header, table, destination);
                }
                WriteOutcome::RepackRequired => info!("falling back to a full rewrite"),
            }
        }

        let rewrite = match mode {
            SaveMode::Compact => RewriteMode::Compact,
            SaveMode::Full | SaveMode::QuickMerge => RewriteMode::Repack,
        };
        let directory = match destination.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let mut temp = NamedTempFile::new_in(&directory)?;
        writer.write(temp.as_file_mut(), &mut header, &mut table, rewrite)?;
        temp.as_file().sync_all()?;

        drop(writer);
        drop(guard);
        if in_place {
            self.handle = None;
        }
        if let Err(e) = temp.persist(destination) {
            if in_place {
                if let Some(path) = &self.path {
                    self.handle = Some(ArchiveHandle::open(path)?);
                }
            }
            return Err(e.error.into());
        }

        self.finish(header, table, destination)
    }

    fn finish(&mut self, header: Header, table: FileTable, destination: &Path) -> Result<()> {
        self.handle = Some(ArchiveHandle::open(destination)?);
        self.path = Some(destination.to_path_buf());
        self.header = header;
        self.table = table;
        self.pending = PendingCommands::default();
        self.merge_source = None;
        if self.state == ContainerState::Opened(OpenMode::New) {
            self.state = ContainerState::Opened(OpenMode::Normal);
        }
        info!(path = %destination.display(), files = self.table.len(), "container saved");
        Ok(())
    }

    /// Saves on the calling thread or on a dedicated one
    pub fn save_with(mut self, path: Option<PathBuf>, mode: SaveMode, execution: Execution) -> SaveTask {
        let progress = self.progress.clone();
        let cancel = self.cancel.clone();

        let state = match execution {
            Execution::Sync => {
                let result = self.save(path.as_deref(), mode);
                TaskState::Finished(Box::new((self, result)))
            }
            Execution::Async => TaskState::Running(thread::spawn(move || {
                let result = self.save(path.as_deref(), mode);
                (self, result)
            })),
        };

        SaveTask {
            progress,
            cancel,
            state,
        }
    }

    /// Saves on a dedicated thread, the container is handed back by [`SaveTask::join`]
    pub fn save_in_background(self, path: Option<PathBuf>, mode: SaveMode) -> SaveTask {
        self.save_with(path, mode, Execution::Async)
    }

    /// Rewrites the container in place, reclaiming wasted space
    pub fn repack(&mut self) -> Result<()> {
        self.save(None, SaveMode::Full)
    }

    /// Rewrites the container in place, storing identical payloads once
    pub fn compact(&mut self) -> Result<()> {
        self.save(None, SaveMode::Compact)
    }

    /// Removes from `newer` every entry identical in `self` and saves the rest to `output`
    ///
    /// Entries are identical when their stored or decompressed bytes hash the same. Returns how
    /// many entries were removed.
    #[instrument(skip(self, newer, output), fields(output = %output.as_ref().display()), err)]
    pub fn patch(&self, newer: &mut Container, output: impl AsRef<Path>) -> Result<usize> {
        self.ensure_readable()?;
        newer.ensure_readable()?;

        let candidates: Vec<(&FileEntry, &FileEntry)> = newer
            .table
            .entries()
            .filter(|e| e.is_file() && !e.is_key_marker())
            .filter_map(|e| self.table.get(e.name()).map(|old| (old, e)))
            .filter(|(old, new)| old.is_file() && old.size() == new.size())
            .collect();

        let unchanged = self.pool.parallel_for(
            &candidates,
            |p| self.progress.set(p),
            || self.cancel.is_cancelled(),
            |_, (old, new)| {
                let same_raw = Md5::digest(self.read_entry(old, true)?) == Md5::digest(newer.read_entry(new, true)?);
                if same_raw {
                    return Ok(true);
                }
                Ok(Md5::digest(self.read_entry(old, false)?) == Md5::digest(newer.read_entry(new, false)?))
            },
        )?;

        let removed: Vec<String> = candidates
            .iter()
            .zip(unchanged)
            .filter(|(_, same)| *same)
            .map(|((_, new), _)| new.name().to_owned())
            .collect();
        for name in &removed {
            newer.table.remove(name)?;
        }

        info!(removed = removed.len(), kept = newer.len(), "patch computed");
        newer.save(Some(output.as_ref()), SaveMode::Full)?;
        Ok(removed.len())
    }

    /// Writes entries below `destination`, every file when `paths` is empty
    ///
    /// Returns how many files were written.
    #[instrument(skip(self, paths, destination, options), fields(destination = %destination.as_ref().display()), err)]
    pub fn extract(&self, paths: &[&str], destination: impl AsRef<Path>, options: &ExtractOptions) -> Result<usize> {
        self.ensure_readable()?;
        self.cancel.reset();
        let destination = destination.as_ref();

        let entries: Vec<&FileEntry> = if paths.is_empty() {
            self.table.entries().filter(|e| e.is_file()).collect()
        } else {
            paths
                .iter()
                .map(|p| self.table.by_name(p))
                .collect::<Result<Vec<_>>>()?
        };

        let dedicated = options.workers.map(WorkerPool::new).transpose()?;
        let pool = dedicated.as_ref().unwrap_or(&self.pool);

        let written = pool.parallel_for(
            &entries,
            |p| self.progress.set(p),
            || self.cancel.is_cancelled(),
            |_, entry| {
                let target = destination.join(sanitize(entry.name())?);
                if target.exists() && !options.overwrite {
                    warn!(path = %target.display(), "file exists, skipped");
                    return Ok(false);
                }
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::write(&target, self.read_entry(entry, false)?)?;
                Ok(true)
            },
        )?;

        let written = written.into_iter().filter(|w| *w).count();
        info!(written, "entries extracted");
        Ok(written)
    }
}

/// Converts an entry path to a relative path that cannot leave the extraction root
fn sanitize(name: &str) -> Result<PathBuf> {
    let mut path = PathBuf::new();
    for part in name.split('\\').filter(|p| !p.is_empty() && *p != ".") {
        let mut components = Path::new(part).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(part)), None) => path.push(part),
            _ => return Err(Error::CustomError(format!("{name} cannot be extracted safely"))),
        }
    }
    if path.as_os_str().is_empty() {
        return Err(Error::CustomError(format!("{name} cannot be extracted safely")));
    }
    Ok(path)
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

enum TaskState {
    Running(JoinHandle<(Container, Result<()>)>),
    Finished(Box<(Container, Result<()>)>),
}

/// A save running on its own thread
pub struct SaveTask {
    progress: Progress,
    cancel: CancelToken,
    state: TaskState,
}

impl SaveTask {
    /// Progress of the save, in percent
    pub fn progress(&self) -> f32 {
        self.progress.get()
    }

    /// Asks the save to stop, the original file is left untouched
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        match &self.state {
            TaskState::Running(handle) => handle.is_finished(),
            TaskState::Finished(_) => true,
        }
    }

    /// Waits for the save, handing back the container and the outcome
    pub fn join(self) -> (Container, Result<()>) {
        match self.state {
            TaskState::Running(handle) => match handle.join() {
                Ok(done) => done,
                Err(panic) => std::panic::resume_unwind(panic),
            },
            TaskState::Finished(done) => *done,
        }
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::{sanitize, Container, ContainerOptions, ContainerState, OpenMode};
    use crate::error::{Error, Result};
    use crate::version::GrfVersion;

    #[test]
    fn closed_containers_refuse_work() -> Result<()> {
        let mut container = Container::new(ContainerOptions::default())?;
        container.add_buffer("a.txt", b"a".to_vec())?;
        container.close();

        assert_eq!(container.state(), ContainerState::Closed);
        assert!(matches!(container.read("a.txt"), Err(Error::ContainerClosed)));
        assert!(matches!(container.add_buffer("b.txt", b"b".to_vec()), Err(Error::ContainerClosed)));
        Ok(())
    }

    #[test]
    fn pending_entries_are_readable() -> Result<()> {
        let mut container = Container::new(ContainerOptions::default())?;
        container.add_buffer("data/Texture/a.bmp", b"pixels".to_vec())?;

        assert_eq!(container.read("DATA\\texture\\A.BMP")?, b"pixels");
        assert_eq!(container.entry("data\\texture\\a.bmp")?.name(), "data\\Texture\\a.bmp");
        assert_eq!(container.len(), 1);
        Ok(())
    }

    #[test]
    fn version_changes() -> Result<()> {
        let mut container = Container::new(ContainerOptions::default())?;
        assert!(container.set_version(GrfVersion::ALPHA).is_err());
        assert!(matches!(
            container.set_version(GrfVersion::from_raw(0x900)),
            Err(Error::UnsupportedVersion(0x900))
        ));

        container.set_version(GrfVersion::V0X300)?;
        assert_eq!(container.version(), GrfVersion::V0X300);

        container.set_version(GrfVersion::V0X103)?;
        assert!(container.set_encryption("secret", true).is_err());
        Ok(())
    }

    #[test]
    fn open_or_new_starts_empty() -> Result<()> {
        let directory = tempfile::tempdir()?;
        let path = directory.path().join("missing.grf");

        let container = Container::open_with(&path, OpenMode::OpenOrNew, ContainerOptions::default())?;
        assert!(container.is_empty());
        assert_eq!(container.path(), Some(path.as_path()));
        assert!(matches!(Container::open(&path), Err(Error::IOError(_))));
        Ok(())
    }

    #[test]
    fn extraction_paths_stay_inside_the_root() -> Result<()> {
        assert_eq!(sanitize("data\\sprite\\a.spr")?, std::path::PathBuf::from("data/sprite/a.spr"));
        assert!(sanitize("data\\..\\..\\etc\\passwd").is_err());
        assert!(sanitize("\\").is_err());
        Ok(())
    }
}
