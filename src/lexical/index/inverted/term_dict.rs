//! Term dictionary.
//!
//! Three files per segment:
//!
//! - `.tis` holds every term of every field. Terms are front-coded against
//!   the previous term of the same field:
//!   `vint shared prefix, vbytes suffix, vint doc freq, vlong frq delta,
//!   vlong prx delta[, vint skip offset when doc freq >= skip interval]`.
//! - `.tix` holds every `index_interval`-th term, front-coded against the
//!   previous index term, with its full [`TermInfo`] and the `.tis` pointer
//!   just past that term.
//! - `.tfx` is the header: index interval, skip interval, field count, then
//!   per field `field number, term count, index pointer, dictionary pointer,
//!   index size`.
//!
//! A reader loads a field's index the first time the field is looked up and
//! keeps it for its lifetime.

use std::sync::Arc;

use ahash::AHashMap;
use parking_lot::{Mutex, RwLock};

use crate::error::{Result, TesseraError};
use crate::lexical::core::term::TermInfo;
use crate::storage::structured::{StructReader, StructWriter};
use crate::storage::{Storage, StorageInput, StorageOutput};
use crate::util::id;

/// Sequential access to the terms of one field.
pub trait TermEnum: Send {
    /// Advance to the next term. Returns `false` once exhausted.
    fn next(&mut self) -> Result<bool>;

    /// Current term text. Empty before the first call to `next`.
    fn term(&self) -> &str;

    /// Documents containing the current term, deleted ones included.
    fn doc_freq(&self) -> u32;
}

#[derive(Debug, Clone, Copy)]
struct FieldEntry {
    field: u32,
    term_count: u64,
    index_ptr: u64,
    dict_ptr: u64,
    index_size: u32,
}

fn shared_prefix(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}

/// Writes the dictionary of one segment.
#[derive(Debug)]
pub struct TermDictWriter {
    tis: StructWriter<Box<dyn StorageOutput>>,
    tix: StructWriter<Box<dyn StorageOutput>>,
    tfx: StructWriter<Box<dyn StorageOutput>>,
    index_interval: u32,
    skip_interval: u32,
    fields: Vec<FieldEntry>,
    current: Option<FieldEntry>,
    last_term: Vec<u8>,
    last_info: TermInfo,
    last_index_term: Vec<u8>,
}

impl TermDictWriter {
    pub fn create(
        storage: &dyn Storage,
        segment: &str,
        index_interval: u32,
        skip_interval: u32,
    ) -> Result<Self> {
        if index_interval == 0 || skip_interval == 0 {
            return Err(TesseraError::invalid_argument(
                "term index and skip intervals must be positive",
            ));
        }
        Ok(TermDictWriter {
            tis: StructWriter::new(storage.create_output(&id::segment_file_name(segment, "tis"))?),
            tix: StructWriter::new(storage.create_output(&id::segment_file_name(segment, "tix"))?),
            tfx: StructWriter::new(storage.create_output(&id::segment_file_name(segment, "tfx"))?),
            index_interval,
            skip_interval,
            fields: Vec::new(),
            current: None,
            last_term: Vec::new(),
            last_info: TermInfo::default(),
            last_index_term: Vec::new(),
        })
    }

    /// Begin the terms of `field`. Fields must arrive in ascending order.
    pub fn start_field(&mut self, field: u32) -> Result<()> {
        self.finish_field();
        if let Some(last) = self.fields.last() {
            if last.field >= field {
                return Err(TesseraError::state(format!(
                    "field {field} added after field {}",
                    last.field
                )));
            }
        }
        self.current = Some(FieldEntry {
            field,
            term_count: 0,
            index_ptr: self.tix.position(),
            dict_ptr: self.tis.position(),
            index_size: 0,
        });
        self.last_term.clear();
        self.last_info = TermInfo::default();
        self.last_index_term.clear();
        Ok(())
    }

    /// Append a term of the current field. Terms must be strictly ascending.
    pub fn add(&mut self, text: &str, info: &TermInfo) -> Result<()> {
        let index_interval = self.index_interval as u64;
        let skip_interval = self.skip_interval;
        let entry = self
            .current
            .as_mut()
            .ok_or_else(|| TesseraError::state("term added before start_field"))?;
        let bytes = text.as_bytes();
        if entry.term_count > 0 && bytes <= self.last_term.as_slice() {
            return Err(TesseraError::state(format!(
                "term {text:?} is not greater than {:?}",
                String::from_utf8_lossy(&self.last_term)
            )));
        }
        if info.frq_ptr < self.last_info.frq_ptr || info.prx_ptr < self.last_info.prx_ptr {
            return Err(TesseraError::state(format!(
                "posting pointers of {text:?} go backwards"
            )));
        }

        let prefix = shared_prefix(&self.last_term, bytes);
        self.tis.write_vint(prefix as u32)?;
        self.tis.write_vbytes(&bytes[prefix..])?;
        self.tis.write_vint(info.doc_freq)?;
        self.tis.write_vlong(info.frq_ptr - self.last_info.frq_ptr)?;
        self.tis.write_vlong(info.prx_ptr - self.last_info.prx_ptr)?;
        if info.doc_freq >= skip_interval {
            self.tis.write_vint(info.skip_offset)?;
        }

        if entry.term_count % index_interval == 0 {
            let prefix = shared_prefix(&self.last_index_term, bytes);
            self.tix.write_vint(prefix as u32)?;
            self.tix.write_vbytes(&bytes[prefix..])?;
            self.tix.write_vint(info.doc_freq)?;
            self.tix.write_vlong(info.frq_ptr)?;
            self.tix.write_vlong(info.prx_ptr)?;
            self.tix.write_vint(info.skip_offset)?;
            self.tix.write_vlong(self.tis.position())?;
            entry.index_size += 1;
            self.last_index_term.clear();
            self.last_index_term.extend_from_slice(bytes);
        }

        entry.term_count += 1;
        self.last_term.clear();
        self.last_term.extend_from_slice(bytes);
        self.last_info = *info;
        Ok(())
    }

    fn finish_field(&mut self) {
        if let Some(entry) = self.current.take() {
            if entry.term_count > 0 {
                self.fields.push(entry);
            }
        }
    }

    pub fn close(mut self) -> Result<()> {
        self.finish_field();
        self.tfx.write_vint(self.index_interval)?;
        self.tfx.write_vint(self.skip_interval)?;
        self.tfx.write_vint(self.fields.len() as u32)?;
        for entry in &self.fields {
            self.tfx.write_vint(entry.field)?;
            self.tfx.write_vlong(entry.term_count)?;
            self.tfx.write_vlong(entry.index_ptr)?;
            self.tfx.write_vlong(entry.dict_ptr)?;
            self.tfx.write_vint(entry.index_size)?;
        }
        self.tis.close()?;
        self.tix.close()?;
        self.tfx.close()
    }
}

/// In-memory sparse index of one field.
#[derive(Debug, Default)]
struct FieldIndex {
    terms: Vec<String>,
    infos: Vec<TermInfo>,
    tis_ptrs: Vec<u64>,
}

/// Cursor over the `.tis` entries of one field.
#[derive(Debug)]
pub struct SegmentTermEnum {
    input: StructReader<Box<dyn StorageInput>>,
    field: u32,
    term_count: u64,
    skip_interval: u32,
    /// Ordinal of the current term, `None` before the first.
    ordinal: Option<u64>,
    term: Vec<u8>,
    info: TermInfo,
    /// The current term has been positioned but not yet returned by `next`.
    pending: bool,
}

impl SegmentTermEnum {
    fn new(
        mut input: StructReader<Box<dyn StorageInput>>,
        entry: Option<FieldEntry>,
        field: u32,
        skip_interval: u32,
    ) -> Result<Self> {
        let (term_count, dict_ptr) = entry.map_or((0, 0), |e| (e.term_count, e.dict_ptr));
        input.seek(dict_ptr)?;
        Ok(SegmentTermEnum {
            input,
            field,
            term_count,
            skip_interval,
            ordinal: None,
            term: Vec::new(),
            info: TermInfo::default(),
            pending: false,
        })
    }

    fn reset(&mut self, entry: Option<FieldEntry>, field: u32) -> Result<()> {
        let (term_count, dict_ptr) = entry.map_or((0, 0), |e| (e.term_count, e.dict_ptr));
        self.input.seek(dict_ptr)?;
        self.field = field;
        self.term_count = term_count;
        self.ordinal = None;
        self.term.clear();
        self.info = TermInfo::default();
        self.pending = false;
        Ok(())
    }

    pub fn field(&self) -> u32 {
        self.field
    }

    pub fn term_info(&self) -> &TermInfo {
        &self.info
    }

    /// Number of terms in the field.
    pub fn size(&self) -> u64 {
        self.term_count
    }

    fn position_at(&mut self, ptr: u64, ordinal: u64, term: &str, info: TermInfo) -> Result<()> {
        self.input.seek(ptr)?;
        self.ordinal = Some(ordinal);
        self.term.clear();
        self.term.extend_from_slice(term.as_bytes());
        self.info = info;
        Ok(())
    }

    fn read_next(&mut self) -> Result<bool> {
        let next = self.ordinal.map_or(0, |o| o + 1);
        if next >= self.term_count {
            self.ordinal = Some(self.term_count);
            return Ok(false);
        }
        let prefix = self.input.read_vint()? as usize;
        let suffix = self.input.read_vbytes()?;
        if prefix > self.term.len() {
            return Err(TesseraError::corrupt(format!(
                "term prefix {prefix} exceeds previous term length {}",
                self.term.len()
            )));
        }
        self.term.truncate(prefix);
        self.term.extend_from_slice(&suffix);
        std::str::from_utf8(&self.term)
            .map_err(|e| TesseraError::corrupt(format!("invalid UTF-8 term: {e}")))?;

        let doc_freq = self.input.read_vint()?;
        let frq_ptr = self.info.frq_ptr + self.input.read_vlong()?;
        let prx_ptr = self.info.prx_ptr + self.input.read_vlong()?;
        let skip_offset = if doc_freq >= self.skip_interval {
            self.input.read_vint()?
        } else {
            0
        };
        self.info = TermInfo::new(doc_freq, frq_ptr, prx_ptr, skip_offset);
        self.ordinal = Some(next);
        Ok(true)
    }

    /// Advance until the current term is `>= target`.
    fn scan_to(&mut self, target: &[u8]) -> Result<bool> {
        if self.ordinal.is_some() && self.term.as_slice() >= target {
            return Ok(true);
        }
        while self.read_next()? {
            if self.term.as_slice() >= target {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

impl TermEnum for SegmentTermEnum {
    fn next(&mut self) -> Result<bool> {
        if self.pending {
            self.pending = false;
            return Ok(true);
        }
        self.read_next()
    }

    fn term(&self) -> &str {
        // Validated in read_next and position_at.
        std::str::from_utf8(&self.term).unwrap_or("")
    }

    fn doc_freq(&self) -> u32 {
        self.info.doc_freq
    }
}

/// Reads the dictionary of one segment.
#[derive(Debug)]
pub struct TermDictReader {
    tis: Box<dyn StorageInput>,
    tix: Box<dyn StorageInput>,
    index_interval: u32,
    skip_interval: u32,
    fields: AHashMap<u32, FieldEntry>,
    indexes: RwLock<AHashMap<u32, Arc<FieldIndex>>>,
    cursors: Mutex<Vec<SegmentTermEnum>>,
}

impl TermDictReader {
    pub fn open(storage: &dyn Storage, segment: &str) -> Result<Self> {
        let mut tfx = StructReader::new(storage.open_input(&id::segment_file_name(segment, "tfx"))?);
        let index_interval = tfx.read_vint()?;
        let skip_interval = tfx.read_vint()?;
        if index_interval == 0 || skip_interval == 0 {
            return Err(TesseraError::corrupt(format!(
                "bad intervals in {segment}.tfx"
            )));
        }
        let count = tfx.read_vint()?;
        let mut fields = AHashMap::with_capacity(count as usize);
        for _ in 0..count {
            let entry = FieldEntry {
                field: tfx.read_vint()?,
                term_count: tfx.read_vlong()?,
                index_ptr: tfx.read_vlong()?,
                dict_ptr: tfx.read_vlong()?,
                index_size: tfx.read_vint()?,
            };
            fields.insert(entry.field, entry);
        }

        Ok(TermDictReader {
            tis: storage.open_input(&id::segment_file_name(segment, "tis"))?,
            tix: storage.open_input(&id::segment_file_name(segment, "tix"))?,
            index_interval,
            skip_interval,
            fields,
            indexes: RwLock::new(AHashMap::new()),
            cursors: Mutex::new(Vec::new()),
        })
    }

    pub fn index_interval(&self) -> u32 {
        self.index_interval
    }

    pub fn skip_interval(&self) -> u32 {
        self.skip_interval
    }

    /// Number of terms of `field` in this segment.
    pub fn term_count(&self, field: u32) -> u64 {
        self.fields.get(&field).map_or(0, |e| e.term_count)
    }

    /// Field numbers with at least one term.
    pub fn fields(&self) -> Vec<u32> {
        let mut fields: Vec<u32> = self.fields.keys().copied().collect();
        fields.sort_unstable();
        fields
    }

    fn field_index(&self, field: u32) -> Result<Arc<FieldIndex>> {
        if let Some(index) = self.indexes.read().get(&field) {
            return Ok(Arc::clone(index));
        }
        let mut indexes = self.indexes.write();
        if let Some(index) = indexes.get(&field) {
            return Ok(Arc::clone(index));
        }
        let index = Arc::new(self.load_index(field)?);
        indexes.insert(field, Arc::clone(&index));
        Ok(index)
    }

    fn load_index(&self, field: u32) -> Result<FieldIndex> {
        let Some(entry) = self.fields.get(&field) else {
            return Ok(FieldIndex::default());
        };
        let mut input = StructReader::new(self.tix.clone_input()?);
        input.seek(entry.index_ptr)?;
        let size = entry.index_size as usize;
        let mut index = FieldIndex {
            terms: Vec::with_capacity(size),
            infos: Vec::with_capacity(size),
            tis_ptrs: Vec::with_capacity(size),
        };
        let mut last: Vec<u8> = Vec::new();
        for _ in 0..size {
            let prefix = input.read_vint()? as usize;
            let suffix = input.read_vbytes()?;
            if prefix > last.len() {
                return Err(TesseraError::corrupt("index term prefix out of range"));
            }
            last.truncate(prefix);
            last.extend_from_slice(&suffix);
            let term = String::from_utf8(last.clone())
                .map_err(|e| TesseraError::corrupt(format!("invalid UTF-8 index term: {e}")))?;
            let info = TermInfo::new(
                input.read_vint()?,
                input.read_vlong()?,
                input.read_vlong()?,
                input.read_vint()?,
            );
            index.terms.push(term);
            index.infos.push(info);
            index.tis_ptrs.push(input.read_vlong()?);
        }
        Ok(index)
    }

    fn new_enum(&self, field: u32) -> Result<SegmentTermEnum> {
        SegmentTermEnum::new(
            StructReader::new(self.tis.clone_input()?),
            self.fields.get(&field).copied(),
            field,
            self.skip_interval,
        )
    }

    /// Position `cursor` on the first term of `field` that is `>= text`.
    fn seek(&self, cursor: &mut SegmentTermEnum, field: u32, text: &str) -> Result<bool> {
        let entry = self.fields.get(&field).copied();
        cursor.reset(entry, field)?;
        if entry.is_none() {
            return Ok(false);
        }
        let index = self.field_index(field)?;
        let slot = index.terms.partition_point(|t| t.as_str() <= text);
        if slot > 0 {
            let i = slot - 1;
            cursor.position_at(
                index.tis_ptrs[i],
                i as u64 * self.index_interval as u64,
                &index.terms[i],
                index.infos[i],
            )?;
        }
        cursor.scan_to(text.as_bytes())
    }

    fn take_cursor(&self, field: u32) -> Result<SegmentTermEnum> {
        match self.cursors.lock().pop() {
            Some(cursor) => Ok(cursor),
            None => self.new_enum(field),
        }
    }

    fn return_cursor(&self, cursor: SegmentTermEnum) {
        self.cursors.lock().push(cursor);
    }

    /// Dictionary entry of `text` in `field`.
    pub fn get_term_info(&self, field: u32, text: &str) -> Result<Option<TermInfo>> {
        if !self.fields.contains_key(&field) {
            return Ok(None);
        }
        let mut cursor = self.take_cursor(field)?;
        let found = self.seek(&mut cursor, field, text);
        let result = match found {
            Ok(true) if cursor.term.as_slice() == text.as_bytes() => Ok(Some(cursor.info)),
            Ok(_) => Ok(None),
            Err(e) => Err(e),
        };
        self.return_cursor(cursor);
        result
    }

    /// Enumerate every term of `field`.
    pub fn terms(&self, field: u32) -> Result<SegmentTermEnum> {
        self.new_enum(field)
    }

    /// Enumerate the terms of `field` starting at the first one `>= text`.
    pub fn terms_from(&self, field: u32, text: &str) -> Result<SegmentTermEnum> {
        let mut cursor = self.new_enum(field)?;
        if self.seek(&mut cursor, field, text)? {
            cursor.pending = true;
        }
        Ok(cursor)
    }
}
