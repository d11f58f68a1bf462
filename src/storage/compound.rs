//! Compound segment files.
//!
//! A compound file bundles the per-segment files into one container:
//!
//! ```text
//! [vint: entry count]
//! [entry: u64 data offset, string name] * count
//! [file data] * count
//! ```
//!
//! Entry lengths are implied by the next entry's offset (or the container
//! length for the last one).

use std::io::Read;
use std::sync::Arc;

use ahash::AHashMap;

use crate::error::{Result, TesseraError};
use crate::storage::structured::{StructReader, StructWriter};
use crate::storage::{Storage, StorageInput, StorageLock, StorageOutput};
use crate::util::varint;

/// Builds a compound file from files already present in a storage.
#[derive(Debug)]
pub struct CompoundFileWriter {
    storage: Arc<dyn Storage>,
    name: String,
    files: Vec<String>,
}

impl CompoundFileWriter {
    pub fn new(storage: Arc<dyn Storage>, name: impl Into<String>) -> Self {
        CompoundFileWriter {
            storage,
            name: name.into(),
            files: Vec::new(),
        }
    }

    pub fn add_file(&mut self, name: impl Into<String>) -> Result<()> {
        let name = name.into();
        if self.files.contains(&name) {
            return Err(TesseraError::invalid_argument(format!(
                "{name} already added to compound file {}",
                self.name
            )));
        }
        self.files.push(name);
        Ok(())
    }

    /// Write the container. The source files are left in place.
    pub fn close(self) -> Result<()> {
        if self.files.is_empty() {
            return Err(TesseraError::state(format!(
                "compound file {} has no entries",
                self.name
            )));
        }

        let mut header_len = varint::encoded_len(self.files.len() as u64) as u64;
        for file in &self.files {
            header_len += 8 + varint::encoded_len(file.len() as u64) as u64 + file.len() as u64;
        }

        let mut writer = StructWriter::new(self.storage.create_output(&self.name)?);
        writer.write_vint(self.files.len() as u32)?;
        let mut offset = header_len;
        for file in &self.files {
            writer.write_u64(offset)?;
            writer.write_string(file)?;
            offset += self.storage.file_size(file)?;
        }

        let mut buf = vec![0u8; 16 * 1024];
        for file in &self.files {
            let mut input = self.storage.open_input(file)?;
            loop {
                let n = input.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                writer.write_bytes(&buf[..n])?;
            }
        }

        if writer.position() != offset {
            return Err(TesseraError::corrupt(format!(
                "compound file {} length {} does not match expected {offset}",
                self.name,
                writer.position()
            )));
        }
        writer.close()
    }
}

/// Read-only storage over the entries of a compound file.
#[derive(Debug)]
pub struct CompoundFileReader {
    name: String,
    container: Box<dyn StorageInput>,
    entries: AHashMap<String, (u64, u64)>,
}

impl CompoundFileReader {
    pub fn open(storage: &dyn Storage, name: &str) -> Result<Self> {
        let input = storage.open_input(name)?;
        let total = input.size()?;
        let mut reader = StructReader::new(input);

        let count = reader.read_vint()? as usize;
        let mut raw = Vec::with_capacity(count);
        for _ in 0..count {
            let offset = reader.read_u64()?;
            let file = reader.read_string()?;
            raw.push((file, offset));
        }

        let mut entries = AHashMap::with_capacity(count);
        for i in 0..raw.len() {
            let (file, offset) = (&raw[i].0, raw[i].1);
            let end = raw.get(i + 1).map(|(_, o)| *o).unwrap_or(total);
            if end < offset || end > total {
                return Err(TesseraError::corrupt(format!(
                    "bad entry {file} in compound file {name}"
                )));
            }
            entries.insert(file.clone(), (offset, end - offset));
        }

        Ok(CompoundFileReader {
            name: name.to_string(),
            container: reader.into_inner(),
            entries,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn read_only(&self, op: &str) -> TesseraError {
        TesseraError::state(format!("cannot {op} inside compound file {}", self.name))
    }
}

impl Storage for CompoundFileReader {
    fn open_input(&self, name: &str) -> Result<Box<dyn StorageInput>> {
        let (offset, len) = self
            .entries
            .get(name)
            .copied()
            .ok_or_else(|| TesseraError::not_found(format!("{name} in {}", self.name)))?;
        self.container.slice(offset, len)
    }

    fn create_output(&self, _name: &str) -> Result<Box<dyn StorageOutput>> {
        Err(self.read_only("create files"))
    }

    fn file_exists(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    fn delete_file(&self, _name: &str) -> Result<()> {
        Err(self.read_only("delete files"))
    }

    fn rename_file(&self, _from: &str, _to: &str) -> Result<()> {
        Err(self.read_only("rename files"))
    }

    fn file_size(&self, name: &str) -> Result<u64> {
        self.entries
            .get(name)
            .map(|(_, len)| *len)
            .ok_or_else(|| TesseraError::not_found(name))
    }

    fn list_files(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.entries.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    fn create_lock(&self, _name: &str) -> Result<Box<dyn StorageLock>> {
        Err(self.read_only("create locks"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryStorage;

    #[test]
    fn test_compound_roundtrip() {
        let storage = Arc::new(MemoryStorage::default());
        storage.put_file("_1.tis", b"terms".to_vec());
        storage.put_file("_1.frq", b"".to_vec());
        storage.put_file("_1.fdt", b"stored fields".to_vec());

        let mut writer = CompoundFileWriter::new(storage.clone(), "_1.cfs");
        for f in ["_1.tis", "_1.frq", "_1.fdt"] {
            writer.add_file(f).unwrap();
        }
        assert!(writer.add_file("_1.tis").is_err());
        writer.close().unwrap();

        let cfs = CompoundFileReader::open(storage.as_ref(), "_1.cfs").unwrap();
        assert_eq!(cfs.list_files().unwrap(), vec!["_1.fdt", "_1.frq", "_1.tis"]);
        assert_eq!(cfs.file_size("_1.frq").unwrap(), 0);

        let mut s = String::new();
        cfs.open_input("_1.fdt")
            .unwrap()
            .read_to_string(&mut s)
            .unwrap();
        assert_eq!(s, "stored fields");
        assert!(cfs.create_output("x").is_err());
        assert!(matches!(
            cfs.open_input("_1.prx"),
            Err(TesseraError::NotFound(_))
        ));
    }
}
