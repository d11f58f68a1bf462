//! Stored fields and term vectors.
//!
//! `.fdx` holds one 12-byte entry per document: the `u64` start of the
//! document in `.fdt` and the `u32` offset, relative to that start, of the
//! document's term-vector index.
//!
//! `.fdt` holds per document:
//!
//! ```text
//! f32 doc boost, vint stored field count
//! per field: vint field number, f32 boost, vint value count,
//!            per value: vint stored length, u8 encoding
//! value bytes, in field then value order
//! term-vector blocks, ascending field number
//! vint block count, (vint field number, vint block size) in descending field order
//! ```
//!
//! A term-vector block is `vint term count, u8 flags`, then per term the
//! front-coded text, `vint freq`, optional position deltas and optional
//! offsets as `(vint start delta, vint length)`.

use std::io::{Read, Write};
use std::sync::{Arc, OnceLock};

use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use parking_lot::Mutex;

use crate::error::{Result, TesseraError};
use crate::lexical::core::document::{DocField, Document, FieldValue};
use crate::lexical::core::field::FieldInfos;
use crate::storage::structured::{StructReader, StructWriter};
use crate::storage::{Storage, StorageInput, StorageOutput};
use crate::util::id;

const VALUE_COMPRESSED: u8 = 0x01;
const VALUE_BINARY: u8 = 0x02;

const VECTOR_POSITIONS: u8 = 0x01;
const VECTOR_OFFSETS: u8 = 0x02;

const FDX_ENTRY_SIZE: u64 = 12;

/// Character offsets of one term occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TermVectorOffset {
    pub start: u32,
    pub end: u32,
}

/// One distinct term of a document field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TermVectorEntry {
    pub text: String,
    pub freq: u32,
    /// Empty unless the field stores positions.
    pub positions: Vec<u32>,
    /// Empty unless the field stores offsets.
    pub offsets: Vec<TermVectorOffset>,
}

/// Distinct terms of one document field, sorted by text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TermVector {
    pub field: String,
    pub terms: Vec<TermVectorEntry>,
}

impl TermVector {
    pub fn get(&self, text: &str) -> Option<&TermVectorEntry> {
        self.terms
            .binary_search_by(|e| e.text.as_str().cmp(text))
            .ok()
            .map(|i| &self.terms[i])
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }
}

/// A stored field handed to [`FieldsWriter::add_document`].
#[derive(Debug, Clone, Copy)]
pub struct StoredFieldInput<'a> {
    pub field: u32,
    pub boost: f32,
    pub values: &'a [FieldValue],
    pub compress: bool,
}

/// A term vector handed to [`FieldsWriter::add_document`].
#[derive(Debug, Clone, Copy)]
pub struct VectorInput<'a> {
    pub field: u32,
    pub with_positions: bool,
    pub with_offsets: bool,
    pub vector: &'a TermVector,
}

/// A stored value in its on-disk encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawValue {
    pub bytes: Vec<u8>,
    pub encoding: u8,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawStoredField {
    pub field: u32,
    pub boost: f32,
    pub values: Vec<RawValue>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawVectorBlock {
    pub field: u32,
    pub bytes: Vec<u8>,
}

/// A document record as stored, copied between segments without decoding
/// or recompressing its values.
#[derive(Debug, Clone, PartialEq)]
pub struct RawDocument {
    pub boost: f32,
    pub fields: Vec<RawStoredField>,
    pub vectors: Vec<RawVectorBlock>,
}

impl RawDocument {
    /// Renumber every field through `remap` (old number → new number).
    pub fn remap_fields(&mut self, remap: &[u32]) -> Result<()> {
        let lookup = |field: u32| {
            remap.get(field as usize).copied().ok_or_else(|| {
                TesseraError::corrupt(format!("field {field} missing from remap table"))
            })
        };
        for field in &mut self.fields {
            field.field = lookup(field.field)?;
        }
        for block in &mut self.vectors {
            block.field = lookup(block.field)?;
        }
        self.fields.sort_by_key(|f| f.field);
        self.vectors.sort_by_key(|b| b.field);
        Ok(())
    }
}

/// `len` as a record count or size, rejecting anything past `u32::MAX`.
fn checked_len(len: usize, what: &str) -> Result<u32> {
    u32::try_from(len).map_err(|_| TesseraError::invalid_argument(format!("too many {what}: {len}")))
}

fn encode_value(value: &FieldValue, compress: bool) -> Result<RawValue> {
    let mut encoding = if value.is_binary() { VALUE_BINARY } else { 0 };
    let bytes = if compress {
        encoding |= VALUE_COMPRESSED;
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(value.as_bytes())?;
        encoder.finish()?
    } else {
        value.as_bytes().to_vec()
    };
    Ok(RawValue { bytes, encoding })
}

fn decode_value(raw: &[u8], encoding: u8) -> Result<FieldValue> {
    let bytes = if encoding & VALUE_COMPRESSED != 0 {
        let mut out = Vec::new();
        ZlibDecoder::new(raw)
            .read_to_end(&mut out)
            .map_err(|e| TesseraError::corrupt(format!("bad compressed field value: {e}")))?;
        out
    } else {
        raw.to_vec()
    };
    if encoding & VALUE_BINARY != 0 {
        Ok(FieldValue::Binary(bytes))
    } else {
        String::from_utf8(bytes)
            .map(FieldValue::Text)
            .map_err(|e| TesseraError::corrupt(format!("invalid UTF-8 field value: {e}")))
    }
}

fn encode_vector(input: &VectorInput<'_>) -> Result<Vec<u8>> {
    let mut flags = 0;
    if input.with_positions {
        flags |= VECTOR_POSITIONS;
    }
    if input.with_offsets {
        flags |= VECTOR_OFFSETS;
    }
    let mut writer = StructWriter::in_memory();
    writer.write_vint(checked_len(input.vector.terms.len(), "term vector terms")?)?;
    writer.write_u8(flags)?;
    let mut last: &[u8] = &[];
    for entry in &input.vector.terms {
        let bytes = entry.text.as_bytes();
        if !last.is_empty() && bytes <= last {
            return Err(TesseraError::state(format!(
                "term vector of field {} is not sorted at {:?}",
                input.vector.field, entry.text
            )));
        }
        let prefix = last.iter().zip(bytes).take_while(|(a, b)| a == b).count();
        writer.write_vint(prefix as u32)?;
        writer.write_vbytes(&bytes[prefix..])?;
        writer.write_vint(entry.freq)?;
        if input.with_positions {
            let mut previous = 0;
            for &position in &entry.positions {
                let delta = position.checked_sub(previous).ok_or_else(|| {
                    TesseraError::state(format!("positions of {:?} are not sorted", entry.text))
                })?;
                writer.write_vint(delta)?;
                previous = position;
            }
        }
        if input.with_offsets {
            let mut previous = 0;
            for offset in &entry.offsets {
                let delta = offset.start.checked_sub(previous).ok_or_else(|| {
                    TesseraError::state(format!("offsets of {:?} are not sorted", entry.text))
                })?;
                writer.write_vint(delta)?;
                writer.write_vint(offset.end.saturating_sub(offset.start))?;
                previous = offset.start;
            }
        }
        last = bytes;
    }
    Ok(writer.into_inner())
}

fn decode_vector(field: String, bytes: &[u8]) -> Result<TermVector> {
    let mut reader = StructReader::new(std::io::Cursor::new(bytes));
    let count = reader.read_vint()? as usize;
    let flags = reader.read_u8()?;
    let mut terms = Vec::with_capacity(count);
    let mut text: Vec<u8> = Vec::new();
    for _ in 0..count {
        let prefix = reader.read_vint()? as usize;
        let suffix = reader.read_vbytes()?;
        if prefix > text.len() {
            return Err(TesseraError::corrupt("term vector prefix out of range"));
        }
        text.truncate(prefix);
        text.extend_from_slice(&suffix);
        let freq = reader.read_vint()?;

        let mut positions = Vec::new();
        if flags & VECTOR_POSITIONS != 0 {
            positions.reserve(freq as usize);
            let mut position = 0;
            for _ in 0..freq {
                position += reader.read_vint()?;
                positions.push(position);
            }
        }
        let mut offsets = Vec::new();
        if flags & VECTOR_OFFSETS != 0 {
            offsets.reserve(freq as usize);
            let mut start = 0;
            for _ in 0..freq {
                start += reader.read_vint()?;
                let len = reader.read_vint()?;
                offsets.push(TermVectorOffset {
                    start,
                    end: start + len,
                });
            }
        }
        terms.push(TermVectorEntry {
            text: String::from_utf8(text.clone())
                .map_err(|e| TesseraError::corrupt(format!("invalid UTF-8 vector term: {e}")))?,
            freq,
            positions,
            offsets,
        });
    }
    Ok(TermVector { field, terms })
}

/// Appends document records to a segment's `.fdt`/`.fdx`.
#[derive(Debug)]
pub struct FieldsWriter {
    fdt: StructWriter<Box<dyn StorageOutput>>,
    fdx: StructWriter<Box<dyn StorageOutput>>,
    doc_count: u32,
}

impl FieldsWriter {
    pub fn create(storage: &dyn Storage, segment: &str) -> Result<Self> {
        Ok(FieldsWriter {
            fdt: StructWriter::new(storage.create_output(&id::segment_file_name(segment, "fdt"))?),
            fdx: StructWriter::new(storage.create_output(&id::segment_file_name(segment, "fdx"))?),
            doc_count: 0,
        })
    }

    pub fn doc_count(&self) -> u32 {
        self.doc_count
    }

    /// Append the next document. Fields and vectors must be in ascending
    /// field-number order.
    pub fn add_document(
        &mut self,
        boost: f32,
        fields: &[StoredFieldInput<'_>],
        vectors: &[VectorInput<'_>],
    ) -> Result<()> {
        let mut raw = RawDocument {
            boost,
            fields: Vec::with_capacity(fields.len()),
            vectors: Vec::with_capacity(vectors.len()),
        };
        for field in fields {
            let values = field
                .values
                .iter()
                .map(|v| encode_value(v, field.compress))
                .collect::<Result<Vec<_>>>()?;
            raw.fields.push(RawStoredField {
                field: field.field,
                boost: field.boost,
                values,
            });
        }
        for vector in vectors {
            raw.vectors.push(RawVectorBlock {
                field: vector.field,
                bytes: encode_vector(vector)?,
            });
        }
        self.add_raw_document(&raw)
    }

    /// Append a document record copied from another segment.
    pub fn add_raw_document(&mut self, raw: &RawDocument) -> Result<()> {
        if raw.vectors.windows(2).any(|w| w[0].field >= w[1].field) {
            return Err(TesseraError::state("term vector blocks out of field order"));
        }

        let start = self.fdt.position();
        self.fdt.write_f32(raw.boost)?;
        self.fdt.write_vint(checked_len(raw.fields.len(), "stored fields")?)?;
        for field in &raw.fields {
            self.fdt.write_vint(field.field)?;
            self.fdt.write_f32(field.boost)?;
            self.fdt.write_vint(checked_len(field.values.len(), "field values")?)?;
            for value in &field.values {
                self.fdt.write_vint(checked_len(value.bytes.len(), "stored value bytes")?)?;
                self.fdt.write_u8(value.encoding)?;
            }
        }
        for field in &raw.fields {
            for value in &field.values {
                self.fdt.write_bytes(&value.bytes)?;
            }
        }

        for block in &raw.vectors {
            self.fdt.write_bytes(&block.bytes)?;
        }
        let index_pos = self.fdt.position();
        self.fdt.write_vint(checked_len(raw.vectors.len(), "term vectors")?)?;
        for block in raw.vectors.iter().rev() {
            self.fdt.write_vint(block.field)?;
            self.fdt.write_vint(checked_len(block.bytes.len(), "term vector bytes")?)?;
        }

        let vector_offset = u32::try_from(index_pos - start).map_err(|_| {
            TesseraError::invalid_argument("stored document exceeds 4GiB")
        })?;
        self.fdx.write_u64(start)?;
        self.fdx.write_u32(vector_offset)?;
        self.doc_count += 1;
        Ok(())
    }

    pub fn close(self) -> Result<()> {
        self.fdt.close()?;
        self.fdx.close()
    }
}

#[derive(Debug)]
struct Streams {
    fdt: StructReader<Box<dyn StorageInput>>,
    fdx: StructReader<Box<dyn StorageInput>>,
}

#[derive(Debug, Clone, Copy)]
struct ValueHeader {
    offset: u64,
    len: u32,
    encoding: u8,
}

#[derive(Debug)]
struct FieldHeader {
    field: u32,
    boost: f32,
    values: Vec<ValueHeader>,
}

#[derive(Debug)]
struct DocHeader {
    boost: f32,
    fields: Vec<FieldHeader>,
    vector_index: u64,
}

/// Random access to the documents of one segment.
#[derive(Debug)]
pub struct FieldsReader {
    fdt: Box<dyn StorageInput>,
    fdx: Box<dyn StorageInput>,
    size: u32,
    field_infos: Arc<FieldInfos>,
    pool: Mutex<Vec<Streams>>,
}

impl FieldsReader {
    pub fn open(storage: &dyn Storage, segment: &str, field_infos: Arc<FieldInfos>) -> Result<Self> {
        let fdt = storage.open_input(&id::segment_file_name(segment, "fdt"))?;
        let fdx = storage.open_input(&id::segment_file_name(segment, "fdx"))?;
        let fdx_len = fdx.size()?;
        if fdx_len % FDX_ENTRY_SIZE != 0 {
            return Err(TesseraError::corrupt(format!(
                "{segment}.fdx length {fdx_len} is not a multiple of {FDX_ENTRY_SIZE}"
            )));
        }
        Ok(FieldsReader {
            fdt,
            fdx,
            size: (fdx_len / FDX_ENTRY_SIZE) as u32,
            field_infos,
            pool: Mutex::new(Vec::new()),
        })
    }

    /// Number of document records.
    pub fn size(&self) -> u32 {
        self.size
    }

    fn with_streams<T>(&self, f: impl FnOnce(&mut Streams) -> Result<T>) -> Result<T> {
        let pooled = self.pool.lock().pop();
        let mut streams = match pooled {
            Some(streams) => streams,
            None => Streams {
                fdt: StructReader::new(self.fdt.clone_input()?),
                fdx: StructReader::new(self.fdx.clone_input()?),
            },
        };
        let result = f(&mut streams);
        self.pool.lock().push(streams);
        result
    }

    fn check_doc(&self, doc: u32) -> Result<()> {
        if doc >= self.size {
            return Err(TesseraError::invalid_argument(format!(
                "document {doc} out of range (max {})",
                self.size
            )));
        }
        Ok(())
    }

    fn read_header(&self, streams: &mut Streams, doc: u32) -> Result<DocHeader> {
        self.check_doc(doc)?;
        streams.fdx.seek(doc as u64 * FDX_ENTRY_SIZE)?;
        let start = streams.fdx.read_u64()?;
        let vector_index = start + streams.fdx.read_u32()? as u64;

        let fdt = &mut streams.fdt;
        fdt.seek(start)?;
        let boost = fdt.read_f32()?;
        let count = fdt.read_vint()?;
        let mut fields = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let field = fdt.read_vint()?;
            let field_boost = fdt.read_f32()?;
            let value_count = fdt.read_vint()?;
            let mut values = Vec::with_capacity(value_count as usize);
            for _ in 0..value_count {
                let len = fdt.read_vint()?;
                let encoding = fdt.read_u8()?;
                values.push(ValueHeader {
                    offset: 0,
                    len,
                    encoding,
                });
            }
            fields.push(FieldHeader {
                field,
                boost: field_boost,
                values,
            });
        }
        let mut offset = fdt.position()?;
        for field in &mut fields {
            for value in &mut field.values {
                value.offset = offset;
                offset += value.len as u64;
            }
        }
        if offset > vector_index {
            return Err(TesseraError::corrupt(format!(
                "stored values of document {doc} overlap its term vectors"
            )));
        }
        Ok(DocHeader {
            boost,
            fields,
            vector_index,
        })
    }

    /// (field, block start, block size) of every vector block, ascending.
    fn read_vector_index(
        streams: &mut Streams,
        vector_index: u64,
    ) -> Result<Vec<(u32, u64, u64)>> {
        streams.fdt.seek(vector_index)?;
        let count = streams.fdt.read_vint()?;
        let mut blocks = Vec::with_capacity(count as usize);
        let mut end = vector_index;
        for _ in 0..count {
            let field = streams.fdt.read_vint()?;
            let size = streams.fdt.read_vint()? as u64;
            let start = end
                .checked_sub(size)
                .ok_or_else(|| TesseraError::corrupt("term vector block size out of range"))?;
            blocks.push((field, start, size));
            end = start;
        }
        blocks.reverse();
        Ok(blocks)
    }

    fn field_name(&self, field: u32) -> Result<String> {
        self.field_infos
            .get_by_number(field)
            .map(|f| f.name().to_string())
            .ok_or_else(|| TesseraError::corrupt(format!("unknown field number {field}")))
    }

    /// The stored record of `doc`, values still encoded.
    pub fn raw_document(&self, doc: u32) -> Result<RawDocument> {
        self.with_streams(|streams| {
            let header = self.read_header(streams, doc)?;
            let mut fields = Vec::with_capacity(header.fields.len());
            for field in &header.fields {
                let mut values = Vec::with_capacity(field.values.len());
                for value in &field.values {
                    streams.fdt.seek(value.offset)?;
                    values.push(RawValue {
                        bytes: streams.fdt.read_bytes(value.len as usize)?,
                        encoding: value.encoding,
                    });
                }
                fields.push(RawStoredField {
                    field: field.field,
                    boost: field.boost,
                    values,
                });
            }
            let mut vectors = Vec::new();
            for (field, start, size) in Self::read_vector_index(streams, header.vector_index)? {
                streams.fdt.seek(start)?;
                vectors.push(RawVectorBlock {
                    field,
                    bytes: streams.fdt.read_bytes(size as usize)?,
                });
            }
            Ok(RawDocument {
                boost: header.boost,
                fields,
                vectors,
            })
        })
    }

    /// Every stored field of `doc`, decoded.
    pub fn document(&self, doc: u32) -> Result<Document> {
        let raw = self.raw_document(doc)?;
        let mut document = Document::new();
        document.set_boost(raw.boost);
        for field in raw.fields {
            let mut doc_field = DocField::new(self.field_name(field.field)?);
            doc_field.set_boost(field.boost);
            for value in field.values {
                doc_field.add_value(decode_value(&value.bytes, value.encoding)?);
            }
            document.add_field(doc_field);
        }
        Ok(document)
    }

    /// `doc` with value decoding deferred until a field is accessed.
    pub fn lazy_document(&self, doc: u32) -> Result<LazyDocument> {
        let header = self.with_streams(|streams| self.read_header(streams, doc))?;
        let input = Arc::new(Mutex::new(StructReader::new(self.fdt.clone_input()?)));
        let mut fields = Vec::with_capacity(header.fields.len());
        for field in header.fields {
            fields.push(LazyDocField {
                name: self.field_name(field.field)?,
                number: field.field,
                boost: field.boost,
                values: field.values,
                input: Arc::clone(&input),
                cache: OnceLock::new(),
            });
        }
        Ok(LazyDocument {
            doc,
            boost: header.boost,
            fields,
        })
    }

    /// Term vectors of every vectorized field of `doc`, ascending field order.
    pub fn term_vectors(&self, doc: u32) -> Result<Vec<TermVector>> {
        let raw = self.with_streams(|streams| {
            let header = self.read_header(streams, doc)?;
            let mut blocks = Vec::new();
            for (field, start, size) in Self::read_vector_index(streams, header.vector_index)? {
                streams.fdt.seek(start)?;
                blocks.push((field, streams.fdt.read_bytes(size as usize)?));
            }
            Ok(blocks)
        })?;
        raw.into_iter()
            .map(|(field, bytes)| decode_vector(self.field_name(field)?, &bytes))
            .collect()
    }

    /// Term vector of one field of `doc`.
    pub fn term_vector(&self, doc: u32, field: u32) -> Result<Option<TermVector>> {
        let block = self.with_streams(|streams| {
            self.check_doc(doc)?;
            streams.fdx.seek(doc as u64 * FDX_ENTRY_SIZE)?;
            let start = streams.fdx.read_u64()?;
            let vector_index = start + streams.fdx.read_u32()? as u64;
            let blocks = Self::read_vector_index(streams, vector_index)?;
            match blocks.iter().find(|(f, _, _)| *f == field) {
                Some(&(_, start, size)) => {
                    streams.fdt.seek(start)?;
                    Ok(Some(streams.fdt.read_bytes(size as usize)?))
                }
                None => Ok(None),
            }
        })?;
        match block {
            Some(bytes) => Ok(Some(decode_vector(self.field_name(field)?, &bytes)?)),
            None => Ok(None),
        }
    }
}

/// A stored document whose values are decoded on first access.
#[derive(Debug)]
pub struct LazyDocument {
    doc: u32,
    boost: f32,
    fields: Vec<LazyDocField>,
}

impl LazyDocument {
    pub fn doc(&self) -> u32 {
        self.doc
    }

    /// Renumber into the document space of a composite reader.
    pub(crate) fn with_doc(mut self, doc: u32) -> Self {
        self.doc = doc;
        self
    }

    pub fn boost(&self) -> f32 {
        self.boost
    }

    pub fn fields(&self) -> &[LazyDocField] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&LazyDocField> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    fn joined_bytes(&self) -> Result<Vec<u8>> {
        let mut values = Vec::new();
        for field in &self.fields {
            values.extend(field.values()?);
        }
        Ok(join_values(values))
    }

    /// Values of every field, in field order, joined with a single space.
    pub fn text(&self) -> Result<String> {
        Ok(String::from_utf8_lossy(&self.joined_bytes()?).into_owned())
    }

    /// `len` bytes starting at `start` of [`text`](Self::text).
    pub fn get_bytes(&self, start: usize, len: usize) -> Result<Vec<u8>> {
        byte_range(&self.joined_bytes()?, start, len, "document")
    }

    /// Decode every field.
    pub fn load(&self) -> Result<Document> {
        let mut document = Document::new();
        document.set_boost(self.boost);
        for field in &self.fields {
            let mut doc_field = DocField::new(field.name.clone());
            doc_field.set_boost(field.boost);
            for value in field.values()? {
                doc_field.add_value(value.clone());
            }
            document.add_field(doc_field);
        }
        Ok(document)
    }
}

/// One field of a [`LazyDocument`].
pub struct LazyDocField {
    name: String,
    number: u32,
    boost: f32,
    values: Vec<ValueHeader>,
    input: Arc<Mutex<StructReader<Box<dyn StorageInput>>>>,
    cache: OnceLock<Vec<FieldValue>>,
}

impl std::fmt::Debug for LazyDocField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LazyDocField")
            .field("name", &self.name)
            .field("number", &self.number)
            .field("boost", &self.boost)
            .field("value_count", &self.values.len())
            .field("loaded", &self.cache.get().is_some())
            .finish()
    }
}

impl LazyDocField {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn number(&self) -> u32 {
        self.number
    }

    pub fn boost(&self) -> f32 {
        self.boost
    }

    pub fn value_count(&self) -> usize {
        self.values.len()
    }

    /// Whether the values have been decoded yet.
    pub fn is_loaded(&self) -> bool {
        self.cache.get().is_some()
    }

    fn read_value(&self, header: &ValueHeader) -> Result<FieldValue> {
        let bytes = {
            let mut input = self.input.lock();
            input.seek(header.offset)?;
            input.read_bytes(header.len as usize)?
        };
        decode_value(&bytes, header.encoding)
    }

    /// Decode a single value without caching the others.
    pub fn value(&self, index: usize) -> Result<FieldValue> {
        if let Some(values) = self.cache.get() {
            return values.get(index).cloned().ok_or_else(|| {
                TesseraError::invalid_argument(format!("value {index} out of range"))
            });
        }
        let header = self.values.get(index).ok_or_else(|| {
            TesseraError::invalid_argument(format!("value {index} out of range"))
        })?;
        self.read_value(header)
    }

    /// All values, decoded once and cached.
    pub fn values(&self) -> Result<&[FieldValue]> {
        if self.cache.get().is_none() {
            let values = self
                .values
                .iter()
                .map(|h| self.read_value(h))
                .collect::<Result<Vec<_>>>()?;
            let _ = self.cache.set(values);
        }
        Ok(self.cache.get().map(|v| v.as_slice()).unwrap_or(&[]))
    }

    /// All values joined with a single space.
    pub fn text(&self) -> Result<String> {
        Ok(String::from_utf8_lossy(&join_values(self.values()?)).into_owned())
    }

    /// `len` bytes starting at `start` of the space-joined values.
    pub fn get_bytes(&self, start: usize, len: usize) -> Result<Vec<u8>> {
        byte_range(&join_values(self.values()?), start, len, &self.name)
    }
}

fn join_values<'a>(values: impl IntoIterator<Item = &'a FieldValue>) -> Vec<u8> {
    let mut joined = Vec::new();
    for (i, value) in values.into_iter().enumerate() {
        if i > 0 {
            joined.push(b' ');
        }
        joined.extend_from_slice(value.as_bytes());
    }
    joined
}

fn byte_range(joined: &[u8], start: usize, len: usize, what: &str) -> Result<Vec<u8>> {
    let end = start.checked_add(len).filter(|&end| end <= joined.len()).ok_or_else(|| {
        TesseraError::invalid_argument(format!(
            "range {start}+{len} exceeds {what} length {}",
            joined.len()
        ))
    })?;
    Ok(joined[start..end].to_vec())
}
