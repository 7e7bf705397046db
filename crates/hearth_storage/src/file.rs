//! Backend over a single file on disk.

use crate::backend::{checked_range, StorageBackend};
use crate::error::{StorageError, StorageResult};
use parking_lot::Mutex;
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// A backend that stores its bytes in one file.
///
/// `flush` hands buffered bytes to the OS and `sync` waits for them to
/// reach the disk. `replace` writes `<name>.tmp` next to the file, syncs
/// it and renames it into place, so after a crash the file holds either
/// the old or the new content.
///
/// ```no_run
/// use hearth_storage::{FileBackend, StorageBackend};
///
/// let mut journal = FileBackend::open("store/journal.log").unwrap();
/// journal.append(b"record").unwrap();
/// journal.sync().unwrap();
/// ```
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    handle: Mutex<Handle>,
}

#[derive(Debug)]
struct Handle {
    file: File,
    len: u64,
}

impl Handle {
    fn open(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        let len = file.metadata()?.len();
        Ok(Self { file, len })
    }
}

impl FileBackend {
    /// Opens the file at `path`, creating it empty if absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or created.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();
        let handle = Handle::open(&path)?;
        Ok(Self {
            path,
            handle: Mutex::new(handle),
        })
    }

    /// Like [`open`](Self::open), creating missing parent directories first.
    pub fn open_with_create_dirs(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Self::open(path)
    }

    /// Returns the file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn staging_path(&self) -> PathBuf {
        let mut name: OsString = self.path.file_name().map(ToOwned::to_owned).unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl StorageBackend for FileBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let mut handle = self.handle.lock();
        checked_range(offset, len, handle.len)?;
        let mut buf = vec![0u8; len];
        if len > 0 {
            handle.file.seek(SeekFrom::Start(offset))?;
            handle.file.read_exact(&mut buf)?;
        }
        Ok(buf)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let handle = self.handle.get_mut();
        let offset = handle.len;
        if !data.is_empty() {
            handle.file.seek(SeekFrom::Start(offset))?;
            handle.file.write_all(data)?;
            handle.len += data.len() as u64;
        }
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.handle.get_mut().file.flush()?;
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.handle.lock().len)
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.handle.get_mut().file.sync_data()?;
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let handle = self.handle.get_mut();
        if new_size > handle.len {
            return Err(StorageError::InvalidTruncate {
                requested: new_size,
                size: handle.len,
            });
        }
        handle.file.set_len(new_size)?;
        handle.file.sync_data()?;
        handle.len = new_size;
        Ok(())
    }

    fn replace(&mut self, data: &[u8]) -> StorageResult<()> {
        let staging = self.staging_path();
        let mut tmp = File::create(&staging)?;
        tmp.write_all(data)?;
        tmp.sync_all()?;
        drop(tmp);

        fs::rename(&staging, &self.path)?;
        *self.handle.get_mut() = Handle::open(&self.path)?;
        Ok(())
    }
}
