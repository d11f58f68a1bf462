//! In-memory storage backend.
//!
//! Files live in a shared map and become visible when their output is closed
//! (or dropped), so a half-written file is never observable by readers.

use std::io::Write;
use std::sync::Arc;

use ahash::{AHashMap, AHashSet};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TesseraError};
use crate::storage::{BytesInput, Storage, StorageInput, StorageLock, StorageOutput};

/// Configuration for [`MemoryStorage`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryStorageConfig {
    /// Initial capacity reserved for each new output buffer.
    #[serde(default)]
    pub initial_buffer_capacity: usize,
}

type FileMap = Arc<RwLock<AHashMap<String, Arc<Vec<u8>>>>>;

/// Storage keeping every file in process memory.
#[derive(Debug, Clone)]
pub struct MemoryStorage {
    config: MemoryStorageConfig,
    files: FileMap,
    locks: Arc<Mutex<AHashSet<String>>>,
}

impl MemoryStorage {
    pub fn new(config: MemoryStorageConfig) -> Self {
        MemoryStorage {
            config,
            files: Arc::new(RwLock::new(AHashMap::new())),
            locks: Arc::new(Mutex::new(AHashSet::new())),
        }
    }

    /// Total bytes held across all files.
    pub fn total_size(&self) -> u64 {
        self.files.read().values().map(|f| f.len() as u64).sum()
    }

    /// Replace the contents of `name` directly, bypassing an output stream.
    pub fn put_file(&self, name: &str, bytes: Vec<u8>) {
        self.files.write().insert(name.to_string(), Arc::new(bytes));
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new(MemoryStorageConfig::default())
    }
}

impl Storage for MemoryStorage {
    fn open_input(&self, name: &str) -> Result<Box<dyn StorageInput>> {
        let files = self.files.read();
        let data = files
            .get(name)
            .cloned()
            .ok_or_else(|| TesseraError::not_found(name))?;
        Ok(Box::new(BytesInput::new(name, data)))
    }

    fn create_output(&self, name: &str) -> Result<Box<dyn StorageOutput>> {
        Ok(Box::new(MemoryOutput {
            name: name.to_string(),
            buffer: Vec::with_capacity(self.config.initial_buffer_capacity),
            files: Arc::clone(&self.files),
            closed: false,
        }))
    }

    fn file_exists(&self, name: &str) -> bool {
        self.files.read().contains_key(name)
    }

    fn delete_file(&self, name: &str) -> Result<()> {
        match self.files.write().remove(name) {
            Some(_) => Ok(()),
            None => Err(TesseraError::not_found(name)),
        }
    }

    fn rename_file(&self, from: &str, to: &str) -> Result<()> {
        let mut files = self.files.write();
        let data = files
            .remove(from)
            .ok_or_else(|| TesseraError::not_found(from))?;
        files.insert(to.to_string(), data);
        Ok(())
    }

    fn file_size(&self, name: &str) -> Result<u64> {
        self.files
            .read()
            .get(name)
            .map(|f| f.len() as u64)
            .ok_or_else(|| TesseraError::not_found(name))
    }

    fn list_files(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.files.read().keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    fn create_lock(&self, name: &str) -> Result<Box<dyn StorageLock>> {
        Ok(Box::new(MemoryLock {
            name: name.to_string(),
            locks: Arc::clone(&self.locks),
            held: false,
        }))
    }
}

/// Output buffering a file until close.
#[derive(Debug)]
pub struct MemoryOutput {
    name: String,
    buffer: Vec<u8>,
    files: FileMap,
    closed: bool,
}

impl MemoryOutput {
    fn publish(&mut self) {
        let bytes = std::mem::take(&mut self.buffer);
        self.files.write().insert(self.name.clone(), Arc::new(bytes));
    }
}

impl Write for MemoryOutput {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if self.closed {
            return Err(std::io::Error::other(format!(
                "write to closed output {}",
                self.name
            )));
        }
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl StorageOutput for MemoryOutput {
    fn position(&self) -> u64 {
        self.buffer.len() as u64
    }

    fn flush_and_sync(&mut self) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            self.publish();
        }
        Ok(())
    }
}

impl Drop for MemoryOutput {
    fn drop(&mut self) {
        if !self.closed {
            self.closed = true;
            self.publish();
        }
    }
}

/// Lock backed by a set shared between all handles of one storage.
#[derive(Debug)]
pub struct MemoryLock {
    name: String,
    locks: Arc<Mutex<AHashSet<String>>>,
    held: bool,
}

impl StorageLock for MemoryLock {
    fn name(&self) -> &str {
        &self.name
    }

    fn try_obtain(&mut self) -> Result<bool> {
        if self.held {
            return Ok(true);
        }
        self.held = self.locks.lock().insert(self.name.clone());
        Ok(self.held)
    }

    fn release(&mut self) -> Result<()> {
        if self.held {
            self.locks.lock().remove(&self.name);
            self.held = false;
        }
        Ok(())
    }

    fn is_held(&self) -> bool {
        self.held
    }
}

impl Drop for MemoryLock {
    fn drop(&mut self) {
        let _ = self.release();
    }
}
