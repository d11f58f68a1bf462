//! Filesystem storage backend.
//!
//! Inputs are memory-mapped, so cloning a cursor never reopens the file. Locks
//! are lock files created exclusively; a crashed process leaves its lock file
//! behind and it has to be removed by hand.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use memmap2::Mmap;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TesseraError};
use crate::storage::{BytesInput, Storage, StorageInput, StorageLock, StorageOutput};

/// Configuration for [`FileStorage`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileStorageConfig {
    /// Directory holding the index files.
    pub path: PathBuf,

    /// Create the directory when missing.
    #[serde(default = "default_true")]
    pub create_if_missing: bool,

    /// fsync every file when its output is closed.
    #[serde(default = "default_true")]
    pub sync_on_close: bool,
}

fn default_true() -> bool {
    true
}

impl FileStorageConfig {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        FileStorageConfig {
            path: path.as_ref().to_path_buf(),
            create_if_missing: true,
            sync_on_close: true,
        }
    }
}

/// Storage over a directory on the local filesystem.
#[derive(Debug)]
pub struct FileStorage {
    config: FileStorageConfig,
}

impl FileStorage {
    pub fn open(config: FileStorageConfig) -> Result<Self> {
        if !config.path.exists() {
            if config.create_if_missing {
                fs::create_dir_all(&config.path)?;
            } else {
                return Err(TesseraError::not_found(config.path.display().to_string()));
            }
        }
        if !config.path.is_dir() {
            return Err(TesseraError::invalid_argument(format!(
                "{} is not a directory",
                config.path.display()
            )));
        }
        Ok(FileStorage { config })
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    fn file_path(&self, name: &str) -> PathBuf {
        self.config.path.join(name)
    }
}

fn map_not_found(err: std::io::Error, name: &str) -> TesseraError {
    if err.kind() == std::io::ErrorKind::NotFound {
        TesseraError::not_found(name)
    } else {
        TesseraError::Io(err)
    }
}

impl Storage for FileStorage {
    fn open_input(&self, name: &str) -> Result<Box<dyn StorageInput>> {
        let file = File::open(self.file_path(name)).map_err(|e| map_not_found(e, name))?;
        let len = file.metadata()?.len();
        if len == 0 {
            // Zero-length files cannot be mapped on every platform.
            return Ok(Box::new(BytesInput::new(name, Arc::new(Vec::<u8>::new()))));
        }
        // SAFETY: index files are write-once; nothing rewrites a file in place
        // while readers hold a mapping of it.
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(Box::new(BytesInput::new(name, Arc::new(mmap))))
    }

    fn create_output(&self, name: &str) -> Result<Box<dyn StorageOutput>> {
        let file = File::create(self.file_path(name))?;
        Ok(Box::new(FileOutput {
            name: name.to_string(),
            writer: Some(BufWriter::new(file)),
            position: 0,
            sync_on_close: self.config.sync_on_close,
        }))
    }

    fn file_exists(&self, name: &str) -> bool {
        self.file_path(name).is_file()
    }

    fn delete_file(&self, name: &str) -> Result<()> {
        fs::remove_file(self.file_path(name)).map_err(|e| map_not_found(e, name))
    }

    fn rename_file(&self, from: &str, to: &str) -> Result<()> {
        fs::rename(self.file_path(from), self.file_path(to)).map_err(|e| map_not_found(e, from))
    }

    fn file_size(&self, name: &str) -> Result<u64> {
        let meta = fs::metadata(self.file_path(name)).map_err(|e| map_not_found(e, name))?;
        Ok(meta.len())
    }

    fn list_files(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.config.path)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    fn create_lock(&self, name: &str) -> Result<Box<dyn StorageLock>> {
        Ok(Box::new(FileLock {
            name: name.to_string(),
            path: self.file_path(name),
            held: false,
        }))
    }
}

/// Buffered output to a single file.
#[derive(Debug)]
pub struct FileOutput {
    name: String,
    writer: Option<BufWriter<File>>,
    position: u64,
    sync_on_close: bool,
}

impl Write for FileOutput {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let writer = self.writer.as_mut().ok_or_else(|| {
            std::io::Error::other(format!("write to closed output {}", self.name))
        })?;
        let n = writer.write(buf)?;
        self.position += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self.writer.as_mut() {
            Some(writer) => writer.flush(),
            None => Ok(()),
        }
    }
}

impl StorageOutput for FileOutput {
    fn position(&self) -> u64 {
        self.position
    }

    fn flush_and_sync(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.as_mut() {
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
            if self.sync_on_close {
                writer.get_ref().sync_all()?;
            }
        }
        Ok(())
    }
}

/// Lock implemented as an exclusively created file.
#[derive(Debug)]
pub struct FileLock {
    name: String,
    path: PathBuf,
    held: bool,
}

impl StorageLock for FileLock {
    fn name(&self) -> &str {
        &self.name
    }

    fn try_obtain(&mut self) -> Result<bool> {
        if self.held {
            return Ok(true);
        }
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
        {
            Ok(mut file) => {
                writeln!(file, "{}", std::process::id())?;
                self.held = true;
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(TesseraError::Io(e)),
        }
    }

    fn release(&mut self) -> Result<()> {
        if self.held {
            self.held = false;
            match fs::remove_file(&self.path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(TesseraError::Io(e)),
            }
        }
        Ok(())
    }

    fn is_held(&self) -> bool {
        self.held
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tempfile::TempDir;

    #[test]
    fn test_write_read_roundtrip() {
        let dir = TempDir::new().unwrap();
        let storage = FileStorage::open(FileStorageConfig::new(dir.path())).unwrap();

        let mut out = storage.create_output("data.bin").unwrap();
        out.write_all(b"tessera").unwrap();
        assert_eq!(out.position(), 7);
        out.close().unwrap();

        let mut input = storage.open_input("data.bin").unwrap();
        assert_eq!(input.size().unwrap(), 7);
        let mut s = String::new();
        input.read_to_string(&mut s).unwrap();
        assert_eq!(s, "tessera");

        let mut clone = input.clone_input().unwrap();
        let mut first = [0u8; 4];
        clone.read_exact(&mut first).unwrap();
        assert_eq!(&first, b"tess");
    }

    #[test]
    fn test_empty_file_and_missing_file() {
        let dir = TempDir::new().unwrap();
        let storage = FileStorage::open(FileStorageConfig::new(dir.path())).unwrap();
        storage.create_output("empty").unwrap().close().unwrap();
        assert_eq!(storage.open_input("empty").unwrap().size().unwrap(), 0);
        assert!(matches!(
            storage.open_input("nope"),
            Err(TesseraError::NotFound(_))
        ));
    }

    #[test]
    fn test_lock_file() {
        let dir = TempDir::new().unwrap();
        let storage = FileStorage::open(FileStorageConfig::new(dir.path())).unwrap();
        let mut a = storage.create_lock("write.lock").unwrap();
        let mut b = storage.create_lock("write.lock").unwrap();
        assert!(a.try_obtain().unwrap());
        assert!(storage.file_exists("write.lock"));
        assert!(!b.try_obtain().unwrap());
        a.release().unwrap();
        assert!(!storage.file_exists("write.lock"));
        assert!(b.try_obtain().unwrap());
    }
}
