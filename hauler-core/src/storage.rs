use std::path::{Path, PathBuf};

use tokio::{
    fs::{self, File, OpenOptions},
    io::AsyncWriteExt,
};

use tracing::warn;

use crate::{
    errors::{HaulerError, Result},
    result::Delivered,
};

/// Upper bound on the capacity reserved up front for an in-memory sink. The
/// declared length can be the whole ceiling, so it is only a hint.
const MAX_PREALLOCATION: u64 = 8 * 1024 * 1024;

/// Destination the pump writes into.
#[derive(Debug)]
pub enum Storage {
    InMemory(MemoryStorage),
    File(FileStorage),
}

#[derive(Debug, Default)]
pub struct MemoryStorage {
    pub buffer: Vec<u8>,
}

impl MemoryStorage {
    pub fn new(size_hint: u64) -> Self {
        let capacity = size_hint.min(MAX_PREALLOCATION);
        MemoryStorage {
            buffer: Vec::with_capacity(capacity.try_into().unwrap_or(0)),
        }
    }
}

#[derive(Debug)]
pub struct FileStorage {
    pub file: File,
    pub path: PathBuf,
}

impl FileStorage {
    /// Creates (or truncates) the file at `path`.
    pub async fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .await
            .map_err(|e| HaulerError::storage(&path, e))?;
        Ok(FileStorage { file, path })
    }
}

impl Storage {
    pub fn memory(size_hint: u64) -> Self {
        Storage::InMemory(MemoryStorage::new(size_hint))
    }

    pub async fn file(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Storage::File(FileStorage::create(path).await?))
    }

    pub fn path(&self) -> Option<&Path> {
        match self {
            Storage::InMemory(_) => None,
            Storage::File(f) => Some(&f.path),
        }
    }

    pub async fn write_chunk(&mut self, chunk: &[u8]) -> Result<()> {
        match self {
            Storage::InMemory(m) => {
                m.buffer.extend_from_slice(chunk);
                Ok(())
            }
            Storage::File(f) => f
                .file
                .write_all(chunk)
                .await
                .map_err(|e| HaulerError::storage(&f.path, e)),
        }
    }

    /// Flushes and closes a file sink, or hands over the buffered bytes.
    pub async fn finish(self) -> Result<Delivered> {
        match self {
            Storage::InMemory(m) => Ok(Delivered::Bytes(m.buffer)),
            Storage::File(FileStorage { mut file, path }) => {
                file.flush()
                    .await
                    .map_err(|e| HaulerError::storage(&path, e))?;
                file.sync_all()
                    .await
                    .map_err(|e| HaulerError::storage(&path, e))?;
                drop(file);
                Ok(Delivered::File(path))
            }
        }
    }

    /// Throws away whatever was written. A file sink is truncated, closed and
    /// removed from disk.
    pub async fn discard(self) -> Result<()> {
        match self {
            Storage::InMemory(_) => Ok(()),
            Storage::File(FileStorage { file, path }) => {
                let truncated = file.set_len(0).await;
                drop(file);
                remove_if_exists(&path).await?;
                truncated.map_err(|e| HaulerError::storage(&path, e))
            }
        }
    }

    /// Like [`Storage::discard`], but a failure is only logged. Used on paths
    /// that already carry an error of their own.
    pub(crate) async fn discard_quietly(self) {
        let path = self.path().map(Path::to_path_buf);
        if let Err(e) = self.discard().await {
            warn!(path = ?path, error = %e, "failed to remove partial output");
        }
    }
}

/// Deletes `path`, treating an already missing file as success.
pub async fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(HaulerError::storage(path, e)),
    }
}
