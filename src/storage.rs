//! Storage abstraction: named byte streams plus advisory locks.
//!
//! Every index file is read and written through a [`Storage`]; nothing in the
//! engine touches the filesystem directly. Two backends ship with the crate:
//!
//! - [`memory::MemoryStorage`] keeps files in process memory.
//! - [`file::FileStorage`] keeps files in a directory, reading through mmaps.
//!
//! [`compound::CompoundFileReader`] exposes the members of a compound segment
//! file as a read-only storage of its own.

use std::fmt::Debug;
use std::io::{Read, Seek, Write};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::{Result, TesseraError};

pub mod compound;
pub mod file;
pub mod memory;
pub mod structured;

use file::{FileStorage, FileStorageConfig};
use memory::{MemoryStorage, MemoryStorageConfig};

/// Interval between attempts while waiting for a held lock.
pub const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// A seekable, cheaply clonable input stream over one stored file.
pub trait StorageInput: Read + Seek + Send + Sync + Debug {
    /// Total length of the stream in bytes.
    fn size(&self) -> Result<u64>;

    /// An independent cursor over the same bytes, positioned at the start.
    fn clone_input(&self) -> Result<Box<dyn StorageInput>>;

    /// A cursor over `len` bytes starting at `offset`.
    fn slice(&self, offset: u64, len: u64) -> Result<Box<dyn StorageInput>>;
}

/// An append-only output stream. Contents become visible on `close`.
pub trait StorageOutput: Write + Send + Debug {
    /// Number of bytes written so far.
    fn position(&self) -> u64;

    /// Flush buffered bytes and make them durable.
    fn flush_and_sync(&mut self) -> Result<()>;

    /// Finish the file. Further writes are an error.
    fn close(&mut self) -> Result<()>;
}

/// An advisory, non-queued lock.
pub trait StorageLock: Send + Sync + Debug {
    fn name(&self) -> &str;

    /// Try once to take the lock.
    fn try_obtain(&mut self) -> Result<bool>;

    /// Release the lock if held.
    fn release(&mut self) -> Result<()>;

    /// Whether this handle currently holds the lock.
    fn is_held(&self) -> bool;

    /// Poll for the lock until `timeout` elapses.
    fn obtain(&mut self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.try_obtain()? {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(TesseraError::lock(format!(
                    "timed out after {timeout:?} waiting for {}",
                    self.name()
                )));
            }
            std::thread::sleep(LOCK_POLL_INTERVAL);
        }
    }
}

/// Named byte streams and locks.
pub trait Storage: Send + Sync + Debug {
    /// Open an existing file for reading.
    fn open_input(&self, name: &str) -> Result<Box<dyn StorageInput>>;

    /// Create (or truncate) a file for writing.
    fn create_output(&self, name: &str) -> Result<Box<dyn StorageOutput>>;

    fn file_exists(&self, name: &str) -> bool;

    fn delete_file(&self, name: &str) -> Result<()>;

    fn rename_file(&self, from: &str, to: &str) -> Result<()>;

    fn file_size(&self, name: &str) -> Result<u64>;

    /// Names of every file in the store.
    fn list_files(&self) -> Result<Vec<String>>;

    /// Create a lock handle. The lock is not taken until obtained.
    fn create_lock(&self, name: &str) -> Result<Box<dyn StorageLock>>;
}

/// Storage backend selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StorageConfig {
    Memory(MemoryStorageConfig),
    File(FileStorageConfig),
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Memory(MemoryStorageConfig::default())
    }
}

/// Creates storage backends from configuration.
pub struct StorageFactory;

impl StorageFactory {
    pub fn create(config: StorageConfig) -> Result<Arc<dyn Storage>> {
        match config {
            StorageConfig::Memory(config) => Ok(Arc::new(MemoryStorage::new(config))),
            StorageConfig::File(config) => Ok(Arc::new(FileStorage::open(config)?)),
        }
    }
}

/// Input over a shared, immutable byte buffer.
///
/// Both backends hand these out: the memory backend over its file vectors,
/// the file backend over memory maps.
#[derive(Clone)]
pub struct BytesInput {
    name: String,
    data: Arc<dyn AsRef<[u8]> + Send + Sync>,
    start: usize,
    len: usize,
    pos: usize,
}

impl BytesInput {
    pub fn new(name: impl Into<String>, data: Arc<dyn AsRef<[u8]> + Send + Sync>) -> Self {
        let len = AsRef::<[u8]>::as_ref(&*data).len();
        BytesInput {
            name: name.into(),
            data,
            start: 0,
            len,
            pos: 0,
        }
    }

    fn bytes(&self) -> &[u8] {
        &AsRef::<[u8]>::as_ref(&*self.data)[self.start..self.start + self.len]
    }
}

impl Debug for BytesInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BytesInput")
            .field("name", &self.name)
            .field("start", &self.start)
            .field("len", &self.len)
            .field("pos", &self.pos)
            .finish()
    }
}

impl Read for BytesInput {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let remaining = &BytesInput::bytes(self)[self.pos.min(self.len)..];
        let n = remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        self.pos += n;
        Ok(n)
    }
}

impl Seek for BytesInput {
    fn seek(&mut self, pos: std::io::SeekFrom) -> std::io::Result<u64> {
        let target = match pos {
            std::io::SeekFrom::Start(p) => p as i64,
            std::io::SeekFrom::End(delta) => self.len as i64 + delta,
            std::io::SeekFrom::Current(delta) => self.pos as i64 + delta,
        };
        if target < 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("seek before start of {}", self.name),
            ));
        }
        self.pos = target as usize;
        Ok(self.pos as u64)
    }
}

impl StorageInput for BytesInput {
    fn size(&self) -> Result<u64> {
        Ok(self.len as u64)
    }

    fn clone_input(&self) -> Result<Box<dyn StorageInput>> {
        let mut input = self.clone();
        input.pos = 0;
        Ok(Box::new(input))
    }

    fn slice(&self, offset: u64, len: u64) -> Result<Box<dyn StorageInput>> {
        let offset = offset as usize;
        let len = len as usize;
        if offset + len > self.len {
            return Err(TesseraError::corrupt(format!(
                "slice [{offset}, {}) out of bounds for {} ({} bytes)",
                offset + len,
                self.name,
                self.len
            )));
        }
        Ok(Box::new(BytesInput {
            name: self.name.clone(),
            data: Arc::clone(&self.data),
            start: self.start + offset,
            len,
            pos: 0,
        }))
    }
}
