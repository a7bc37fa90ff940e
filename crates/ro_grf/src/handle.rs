//! Shared, lock protected access to an opened container file.

use std::fmt;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Error, Result};

/// A reader over a container file, cheap to clone and shared by every entry read
///
/// The lock is only held for a seek and a read. Reads fail with [`Error::SaveInProgress`]
/// while a save to the same container runs, except through the handle given to the writer.
#[derive(Clone)]
pub struct ArchiveHandle {
    file: Arc<Mutex<File>>,
    saving: Arc<AtomicBool>,
    path: Arc<Path>,
    writer_view: bool,
}

impl fmt::Debug for ArchiveHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ArchiveHandle({})", self.path.display())
    }
}

impl ArchiveHandle {
    /// Opens `path` for reading
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        Ok(ArchiveHandle {
            file: Arc::new(Mutex::new(File::open(path)?)),
            saving: Arc::new(AtomicBool::new(false)),
            path: path.into(),
            writer_view: false,
        })
    }

    /// Path the handle was opened from
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Length of the underlying file
    pub fn len(&self) -> Result<u64> {
        self.if_saving_throw()?;
        Ok(self.file.lock().metadata()?.len())
    }

    /// Whether the file is empty
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Reads `len` bytes at the absolute position `position`
    pub fn read_at(&self, position: u64, len: usize) -> Result<Vec<u8>> {
        self.if_saving_throw()?;
        let mut data = vec![0u8; len];
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(position))?;
        file.read_exact(&mut data)?;
        Ok(data)
    }

    /// Runs `f` with exclusive access to the file
    pub fn with_file<T>(&self, f: impl FnOnce(&mut File) -> Result<T>) -> Result<T> {
        self.if_saving_throw()?;
        let mut file = self.file.lock();
        f(&mut file)
    }

    /// Fails when a save to this container is in progress
    pub fn if_saving_throw(&self) -> Result<()> {
        if !self.writer_view && self.saving.load(Ordering::Acquire) {
            return Err(Error::SaveInProgress);
        }
        Ok(())
    }

    /// Whether a save is running
    pub fn is_saving(&self) -> bool {
        self.saving.load(Ordering::Acquire)
    }

    /// Marks the container as being saved until the guard is dropped
    pub(crate) fn begin_save(&self) -> Result<SavingGuard> {
        if self.saving.swap(true, Ordering::AcqRel) {
            return Err(Error::SaveInProgress);
        }
        Ok(SavingGuard {
            handle: ArchiveHandle {
                writer_view: true,
                ..self.clone()
            },
        })
    }
}

/// Keeps other readers out while a save runs
pub(crate) struct SavingGuard {
    handle: ArchiveHandle,
}

impl SavingGuard {
    /// The handle the writer reads through
    pub(crate) fn handle(&self) -> &ArchiveHandle {
        &self.handle
    }
}

impl Drop for SavingGuard {
    fn drop(&mut self) {
        self.handle.saving.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod test {
    use std::io::Write;

    use pretty_assertions::assert_eq;

    use super::ArchiveHandle;
    use crate::error::{Error, Result};

    #[test]
    fn reads_are_refused_while_saving() -> Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        file.write_all(b"0123456789")?;

        let handle = ArchiveHandle::open(file.path())?;
        assert_eq!(handle.read_at(2, 3)?, b"234");

        {
            let guard = handle.begin_save()?;
            assert!(matches!(handle.read_at(0, 1), Err(Error::SaveInProgress)));
            assert!(matches!(handle.begin_save(), Err(Error::SaveInProgress)));
            assert_eq!(guard.handle().read_at(0, 2)?, b"01");
        }

        assert_eq!(handle.read_at(8, 2)?, b"89");
        Ok(())
    }
}
