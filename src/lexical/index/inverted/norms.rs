//! Norm files: one byte per document for one field.

use std::io::Read;
use std::sync::Arc;

use crate::error::{Result, TesseraError};
use crate::storage::structured::StructWriter;
use crate::storage::{Storage, StorageInput};

/// Write a norms file holding exactly `norms`.
pub fn write_norms(storage: &dyn Storage, file_name: &str, norms: &[u8]) -> Result<()> {
    let mut writer = StructWriter::new(storage.create_output(file_name)?);
    writer.write_bytes(norms)?;
    writer.close()
}

/// Read a norms file, checking it covers `max_doc` documents.
pub fn read_norms(mut input: Box<dyn StorageInput>, max_doc: u32, file_name: &str) -> Result<Vec<u8>> {
    let len = input.size()?;
    if len != max_doc as u64 {
        return Err(TesseraError::corrupt(format!(
            "{file_name} holds {len} norms for {max_doc} documents"
        )));
    }
    let mut bytes = Vec::with_capacity(max_doc as usize);
    input.read_to_end(&mut bytes)?;
    Ok(bytes)
}

/// Norms of one field of one segment, decoded on first use.
#[derive(Debug)]
pub struct Norm {
    file_name: String,
    input: Option<Box<dyn StorageInput>>,
    bytes: Option<Arc<Vec<u8>>>,
    dirty: bool,
}

impl Norm {
    /// Norms backed by an already opened file.
    pub fn open(file_name: String, input: Box<dyn StorageInput>) -> Self {
        Norm {
            file_name,
            input: Some(input),
            bytes: None,
            dirty: false,
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn bytes(&mut self, max_doc: u32) -> Result<Arc<Vec<u8>>> {
        if let Some(bytes) = &self.bytes {
            return Ok(Arc::clone(bytes));
        }
        let input = self
            .input
            .take()
            .ok_or_else(|| TesseraError::state(format!("norms {} unavailable", self.file_name)))?;
        let bytes = Arc::new(read_norms(input, max_doc, &self.file_name)?);
        self.bytes = Some(Arc::clone(&bytes));
        Ok(bytes)
    }

    /// Set the norm of `doc`. Readers holding earlier snapshots keep them.
    pub fn set(&mut self, doc: u32, value: u8, max_doc: u32) -> Result<()> {
        self.bytes(max_doc)?;
        if let Some(bytes) = self.bytes.as_mut() {
            let slot = Arc::make_mut(bytes).get_mut(doc as usize).ok_or_else(|| {
                TesseraError::invalid_argument(format!("document {doc} out of range"))
            })?;
            *slot = value;
            self.dirty = true;
        }
        Ok(())
    }

    /// Record that the current bytes now live in `file_name`.
    pub fn mark_written(&mut self, file_name: &str) {
        self.file_name = file_name.to_string();
        self.dirty = false;
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }
}
