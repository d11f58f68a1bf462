//! The index writer.
//!
//! An [`IndexWriter`] owns the store's write lock for its whole life. Added
//! documents are inverted immediately: stored fields and term vectors go
//! straight to the fields files of the segment being built, postings and norms
//! are buffered in memory until the buffer is flushed as a new segment. After
//! every flush the segment list is checked against the tiered merge policy.
//!
//! Nothing a writer does is visible to readers until [`IndexWriter::commit`]
//! (or [`IndexWriter::close`]) writes the next `segments_N` generation.

use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::analysis::analyzer::{Analyzer, StandardAnalyzer};
use crate::error::{Result, TesseraError};
use crate::lexical::core::document::{DocField, Document, FieldValue};
use crate::lexical::core::field::{FieldDefaults, FieldInfo, FieldInfos};
use crate::lexical::core::similarity::{DefaultSimilarity, Similarity};
use crate::lexical::core::term::Term;
use crate::lexical::index::inverted::buffer::{FieldInversion, PostingBuffer};
use crate::lexical::index::inverted::fields_store::{FieldsWriter, StoredFieldInput, TermVector, VectorInput};
use crate::lexical::index::inverted::merger::SegmentMerger;
use crate::lexical::index::inverted::norms::write_norms;
use crate::lexical::index::inverted::posting::PostingWriter;
use crate::lexical::index::inverted::reader::{DEFAULT_WRITE_LOCK_TIMEOUT, IndexReader, SegmentReader};
use crate::lexical::index::inverted::segment::{SegmentInfo, SegmentInfos, max_listed_generation};
use crate::lexical::index::inverted::term_dict::TermDictWriter;
use crate::maintenance::deletion::IndexFileDeleter;
use crate::storage::compound::CompoundFileWriter;
use crate::storage::{Storage, StorageLock};
use crate::util::id::{self, WRITE_LOCK_NAME};

/// What to do with an index already present in the storage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpenMode {
    /// Start a new, empty index. An existing index is replaced by the first
    /// commit; readers already open on it keep working.
    Create,
    /// Open an existing index; fails if there is none.
    Append,
    /// Append when an index exists, create one otherwise.
    #[default]
    CreateOrAppend,
}

/// Index writer configuration.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexWriterConfig {
    pub open_mode: OpenMode,

    /// Maximum number of documents to buffer before flushing a segment.
    pub max_buffered_docs: usize,

    /// Maximum estimated memory for buffered postings (in bytes).
    pub max_buffer_memory: usize,

    /// How many segments of one size tier are merged together.
    pub merge_factor: u32,

    /// Segments at least this large are never merged by the policy.
    pub max_merge_docs: u32,

    /// Every n-th term of a segment is kept in the in-memory term index.
    pub term_index_interval: u32,

    /// Every n-th document of a posting list gets a skip entry.
    pub skip_interval: u32,

    /// Pack the files of new segments into a single compound file.
    pub use_compound_file: bool,

    /// How long to wait for the write lock.
    pub write_lock_timeout: Duration,

    /// Options for field names first seen in a document. Only applies when a
    /// new index is created; an existing index keeps its own defaults.
    pub field_defaults: FieldDefaults,

    /// Analyzer for text fields (can be PerFieldAnalyzer for field-specific analysis).
    #[serde(skip)]
    pub analyzer: Arc<dyn Analyzer>,

    #[serde(skip)]
    pub similarity: Arc<dyn Similarity>,
}

impl std::fmt::Debug for IndexWriterConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexWriterConfig")
            .field("open_mode", &self.open_mode)
            .field("max_buffered_docs", &self.max_buffered_docs)
            .field("max_buffer_memory", &self.max_buffer_memory)
            .field("merge_factor", &self.merge_factor)
            .field("max_merge_docs", &self.max_merge_docs)
            .field("term_index_interval", &self.term_index_interval)
            .field("skip_interval", &self.skip_interval)
            .field("use_compound_file", &self.use_compound_file)
            .field("write_lock_timeout", &self.write_lock_timeout)
            .field("field_defaults", &self.field_defaults)
            .field("analyzer", &self.analyzer.name())
            .field("similarity", &self.similarity)
            .finish()
    }
}

impl Default for IndexWriterConfig {
    fn default() -> Self {
        IndexWriterConfig {
            open_mode: OpenMode::default(),
            max_buffered_docs: 10_000,
            max_buffer_memory: 16 * 1024 * 1024, // 16MB
            merge_factor: 10,
            max_merge_docs: u32::MAX,
            term_index_interval: 128,
            skip_interval: 16,
            use_compound_file: true,
            write_lock_timeout: DEFAULT_WRITE_LOCK_TIMEOUT,
            field_defaults: FieldDefaults::default(),
            analyzer: Arc::new(StandardAnalyzer::new()),
            similarity: Arc::new(DefaultSimilarity),
        }
    }
}

impl IndexWriterConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_buffered_docs == 0 {
            return Err(TesseraError::invalid_argument("max_buffered_docs must be at least 1"));
        }
        if self.merge_factor < 2 {
            return Err(TesseraError::invalid_argument(format!(
                "merge_factor must be at least 2, got {}",
                self.merge_factor
            )));
        }
        if self.max_merge_docs == 0 {
            return Err(TesseraError::invalid_argument("max_merge_docs must be positive"));
        }
        if self.term_index_interval == 0 || self.skip_interval == 0 {
            return Err(TesseraError::invalid_argument(
                "term_index_interval and skip_interval must be positive",
            ));
        }
        Ok(())
    }
}

/// The segment currently receiving documents.
#[derive(Debug)]
struct OpenSegment {
    name: String,
    fields: FieldsWriter,
}

/// A term vector waiting to be written with its document.
struct PendingVector {
    field: u32,
    with_positions: bool,
    with_offsets: bool,
    vector: TermVector,
}

/// Adds, deletes and merges documents of one index.
#[derive(Debug)]
pub struct IndexWriter {
    storage: Arc<dyn Storage>,
    config: IndexWriterConfig,
    write_lock: Option<Box<dyn StorageLock>>,
    /// The last commit.
    committed: SegmentInfos,
    /// The working state: committed plus flushed, merged and deleted changes.
    infos: SegmentInfos,
    buffer: PostingBuffer,
    segment: Option<OpenSegment>,
    deleter: IndexFileDeleter,
    dirty: bool,
    closed: bool,
}

impl IndexWriter {
    /// Open a writer, taking the store's write lock.
    pub fn open(storage: Arc<dyn Storage>, config: IndexWriterConfig) -> Result<Self> {
        config.validate()?;

        let mut lock = storage.create_lock(WRITE_LOCK_NAME)?;
        lock.obtain(config.write_lock_timeout)?;

        match Self::load_infos(storage.as_ref(), &config) {
            Ok((infos, create)) => {
                let mut writer = IndexWriter {
                    deleter: IndexFileDeleter::new(Arc::clone(&storage)),
                    storage,
                    committed: infos.clone(),
                    infos,
                    buffer: PostingBuffer::new(),
                    segment: None,
                    write_lock: Some(lock),
                    dirty: create,
                    closed: false,
                    config,
                };
                if create {
                    writer.commit()?;
                } else {
                    writer.deleter.sweep(&[&writer.committed])?;
                }
                info!(
                    "Opened index writer at generation {} ({} segments)",
                    writer.committed.generation,
                    writer.committed.len()
                );
                Ok(writer)
            }
            Err(e) => {
                if let Err(release) = lock.release() {
                    warn!("Failed to release {WRITE_LOCK_NAME}: {release}");
                }
                Err(e)
            }
        }
    }

    /// The infos to start from and whether they describe a fresh index.
    fn load_infos(storage: &dyn Storage, config: &IndexWriterConfig) -> Result<(SegmentInfos, bool)> {
        let exists = SegmentInfos::exists(storage)?;
        match (config.open_mode, exists) {
            (OpenMode::Append, false) => Err(TesseraError::not_found("no index found in storage")),
            (OpenMode::Append | OpenMode::CreateOrAppend, true) => {
                Ok((SegmentInfos::read_current(storage)?, false))
            }
            (OpenMode::Create, true) => {
                // Keep the counters so new names never collide with files
                // still held by open readers.
                let mut infos = match SegmentInfos::read_current(storage) {
                    Ok(infos) => infos,
                    Err(e) => {
                        warn!("Replacing unreadable index: {e}");
                        let mut infos = SegmentInfos::new(FieldInfos::new(config.field_defaults));
                        infos.generation = max_listed_generation(storage)?.unwrap_or(0);
                        infos
                    }
                };
                infos.segments.clear();
                infos.field_infos = FieldInfos::new(config.field_defaults);
                Ok((infos, true))
            }
            (OpenMode::Create | OpenMode::CreateOrAppend, false) => {
                Ok((SegmentInfos::new(FieldInfos::new(config.field_defaults)), true))
            }
        }
    }

    pub fn config(&self) -> &IndexWriterConfig {
        &self.config
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// The working field catalog.
    pub fn field_infos(&self) -> &FieldInfos {
        &self.infos.field_infos
    }

    /// Documents in the index, deleted and buffered ones included.
    pub fn doc_count(&self) -> u64 {
        self.infos.doc_count() + self.buffer.doc_count() as u64
    }

    /// Segments written so far, not counting the buffered one.
    pub fn segment_count(&self) -> usize {
        self.infos.len()
    }

    /// Generation of the last commit.
    pub fn generation(&self) -> u64 {
        self.committed.generation
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(TesseraError::Closed("IndexWriter"));
        }
        Ok(())
    }

    /// Register a field with explicit options and return its number.
    pub fn add_field(&mut self, info: FieldInfo) -> Result<u32> {
        self.ensure_open()?;
        let number = self.infos.field_infos.add_field(info)?;
        self.dirty = true;
        Ok(number)
    }

    /// Add a document. Fields not yet in the catalog are registered with the
    /// index's default options.
    pub fn add_document(&mut self, doc: Document) -> Result<()> {
        self.ensure_open()?;
        let registered = self.infos.field_infos.len();
        if let Err(e) = self.buffer_document(&doc) {
            self.infos.field_infos.truncate(registered);
            return Err(e);
        }

        if self.buffer.doc_count() as usize >= self.config.max_buffered_docs
            || self.buffer.memory_usage() >= self.config.max_buffer_memory
        {
            self.flush()?;
        }
        Ok(())
    }

    /// Write the stored part of `doc` and buffer its postings and norms.
    /// Fields registered by a failed call are the caller's to unregister.
    fn buffer_document(&mut self, doc: &Document) -> Result<()> {
        let doc_id = self.buffer.next_doc();

        let mut stored: Vec<StoredFieldInput<'_>> = Vec::new();
        let mut inverted: Vec<(u32, FieldInversion, Option<u8>)> = Vec::new();
        let mut vectors: Vec<PendingVector> = Vec::new();

        // Everything that can fail on bad input happens before the buffer is
        // touched, so a rejected document leaves no trace in the postings.
        for field in doc.fields() {
            let number = self.infos.field_infos.get_or_add(field.name())?;
            let info = self
                .infos
                .field_infos
                .get_by_number(number)
                .cloned()
                .ok_or_else(|| TesseraError::state(format!("field {} not registered", field.name())))?;

            if info.is_stored() {
                stored.push(StoredFieldInput {
                    field: number,
                    boost: field.boost(),
                    values: field.values(),
                    compress: info.is_compressed(),
                });
            }
            if !info.is_indexed() {
                continue;
            }

            let inversion = self.invert(&info, field)?;
            if info.store_term_vector() && !inversion.is_empty() {
                vectors.push(PendingVector {
                    field: number,
                    with_positions: info.store_positions(),
                    with_offsets: info.store_offsets(),
                    vector: inversion.to_term_vector(
                        info.name(),
                        info.store_positions(),
                        info.store_offsets(),
                    ),
                });
            }
            let norm = info.has_norms().then(|| {
                let similarity = &self.config.similarity;
                let length_norm = similarity.length_norm(info.name(), inversion.length());
                similarity.encode_norm(doc.boost() * field.boost() * info.boost() * length_norm)
            });
            inverted.push((number, inversion, norm));
        }

        stored.sort_by_key(|s| s.field);
        vectors.sort_by_key(|v| v.field);
        let vector_inputs: Vec<VectorInput<'_>> = vectors
            .iter()
            .map(|v| VectorInput {
                field: v.field,
                with_positions: v.with_positions,
                with_offsets: v.with_offsets,
                vector: &v.vector,
            })
            .collect();

        let segment = self.open_segment()?;
        segment.fields.add_document(doc.boost(), &stored, &vector_inputs)?;

        for (number, inversion, norm) in &inverted {
            if !inversion.is_empty() {
                self.buffer.add_field(*number, doc_id, inversion);
            }
            if let Some(norm) = norm {
                self.buffer.set_norm(*number, doc_id, *norm);
            }
        }
        self.buffer.finish_document();
        self.dirty = true;
        Ok(())
    }

    fn invert(&self, info: &FieldInfo, field: &DocField) -> Result<FieldInversion> {
        let mut inversion = FieldInversion::new();
        for value in field.values() {
            let FieldValue::Text(text) = value else {
                continue;
            };
            if info.is_tokenized() {
                let tokens = self.config.analyzer.analyze(info.name(), text)?;
                inversion.add_tokens(tokens, text.len())?;
            } else {
                inversion.add_untokenized(text)?;
            }
        }
        Ok(inversion)
    }

    fn open_segment(&mut self) -> Result<&mut OpenSegment> {
        if self.segment.is_none() {
            let name = self.infos.next_segment_name();
            let fields = FieldsWriter::create(self.storage.as_ref(), &name)?;
            debug!("Started segment {name}");
            self.segment = Some(OpenSegment { name, fields });
        }
        self.segment
            .as_mut()
            .ok_or_else(|| TesseraError::state("no segment is open"))
    }

    /// Delete every document containing `term`, buffered ones included.
    /// Returns how many documents were newly deleted.
    pub fn delete_documents(&mut self, term: &Term) -> Result<u32> {
        self.ensure_open()?;
        self.flush()?;

        let field_infos = Arc::new(self.infos.field_infos.clone());
        let mut deleted = 0;
        for slot in 0..self.infos.segments.len() {
            let reader = SegmentReader::open(
                Arc::clone(&self.storage),
                self.infos.segments[slot].clone(),
                Arc::clone(&field_infos),
            )?;
            let count = reader.delete_docs_with_term(term)?;
            if count > 0 {
                self.infos.segments[slot] = reader.commit_changes()?;
                deleted += count;
            }
        }
        if deleted > 0 {
            self.dirty = true;
            debug!("Deleted {deleted} documents matching {term}");
        }
        Ok(deleted)
    }

    /// Replace the documents containing `term` with `doc`.
    pub fn update_document(&mut self, term: &Term, doc: Document) -> Result<()> {
        self.delete_documents(term)?;
        self.add_document(doc)
    }

    /// Write the buffered documents as a new segment.
    pub fn flush(&mut self) -> Result<()> {
        self.ensure_open()?;
        let Some(open) = self.segment.take() else {
            return Ok(());
        };
        let name = open.name.clone();

        if self.buffer.is_empty() {
            drop(open);
            self.remove_segment_files(&name);
            return Ok(());
        }

        let result = self.write_segment(open);
        let doc_count = self.buffer.doc_count();
        self.buffer.clear();
        match result {
            Ok(info) => {
                debug!("Flushed segment {name} ({doc_count} documents)");
                self.infos.segments.push(info);
                self.dirty = true;
                self.maybe_merge()
            }
            Err(e) => {
                warn!("Failed to flush segment {name}: {e}");
                self.remove_segment_files(&name);
                Err(e)
            }
        }
    }

    fn write_segment(&mut self, open: OpenSegment) -> Result<SegmentInfo> {
        let OpenSegment { name, fields } = open;
        fields.close()?;

        let storage = self.storage.as_ref();
        let mut postings = PostingWriter::create(storage, &name, self.config.skip_interval)?;
        let mut dict = TermDictWriter::create(
            storage,
            &name,
            self.config.term_index_interval,
            self.config.skip_interval,
        )?;
        for field in self.buffer.fields() {
            dict.start_field(field)?;
            for (text, docs) in self.buffer.sorted_terms(field) {
                postings.start_term();
                for posting in docs {
                    postings.add_doc(posting.doc, &posting.positions)?;
                }
                let term_info = postings.finish_term()?;
                dict.add(text, &term_info)?;
            }
        }
        postings.close()?;
        dict.close()?;

        let mut info = SegmentInfo::new(name, self.buffer.doc_count());
        for field in self.buffer.norm_fields() {
            let file = id::segment_file_name(&info.name, &format!("f{field}"));
            write_norms(storage, &file, &self.buffer.norms(field))?;
            if info.norm_gens.len() <= field as usize {
                info.norm_gens.resize(field as usize + 1, None);
            }
            info.norm_gens[field as usize] = Some(0);
        }

        if self.config.use_compound_file {
            self.pack_compound(&mut info)?;
        }
        Ok(info)
    }

    /// Copy the core files of a new segment into its compound file and
    /// remove the originals.
    fn pack_compound(&mut self, info: &mut SegmentInfo) -> Result<()> {
        let files = info.core_files();
        let mut compound = CompoundFileWriter::new(Arc::clone(&self.storage), info.compound_file_name());
        for file in &files {
            compound.add_file(file.as_str())?;
        }
        compound.close()?;
        info.use_compound_file = true;
        self.deleter.queue(files);
        self.deleter.delete_pending();
        Ok(())
    }

    /// Best effort removal of everything written under a segment name.
    fn remove_segment_files(&mut self, segment: &str) {
        match self.storage.list_files() {
            Ok(files) => {
                let owned = files.into_iter().filter(|file| {
                    id::parse_segment_file(file).is_some_and(|(name, _, _)| name == segment)
                });
                self.deleter.queue(owned);
                self.deleter.delete_pending();
            }
            Err(e) => warn!("Failed to list files while cleaning up {segment}: {e}"),
        }
    }

    /// Tiered merge policy.
    ///
    /// Starting with a target of `merge_factor` documents, the trailing run
    /// of segments each smaller than the target is merged once its total
    /// reaches the target. The target is then multiplied by the merge factor
    /// until it exceeds `max_merge_docs`.
    fn maybe_merge(&mut self) -> Result<()> {
        let factor = u64::from(self.config.merge_factor);
        let max_merge_docs = u64::from(self.config.max_merge_docs);
        let mut target = factor;

        while target <= max_merge_docs {
            let segments = &self.infos.segments;
            let end = segments.len();
            let mut start = end;
            let mut run_docs = 0u64;
            while start > 0 && u64::from(segments[start - 1].doc_count) < target {
                start -= 1;
                run_docs += u64::from(segments[start].doc_count);
            }

            if run_docs >= target {
                self.merge_segments(start..end)?;
            } else if start == 0 {
                break;
            }
            match target.checked_mul(factor) {
                Some(next) => target = next,
                None => break,
            }
        }
        Ok(())
    }

    /// Replace the segments in `range` with one merged segment.
    fn merge_segments(&mut self, range: Range<usize>) -> Result<()> {
        let field_infos = Arc::new(self.infos.field_infos.clone());
        let readers = self.infos.segments[range.clone()]
            .iter()
            .map(|info| SegmentReader::open(Arc::clone(&self.storage), info.clone(), Arc::clone(&field_infos)))
            .collect::<Result<Vec<_>>>()?;
        let refs: Vec<&SegmentReader> = readers.iter().collect();

        let merged = self.merge_readers(&refs)?;
        debug!(
            "Merged segments {:?} into {}",
            refs.iter().map(|r| r.name()).collect::<Vec<_>>(),
            merged.name
        );
        self.replace_segments(range, merged);
        Ok(())
    }

    /// Swap `range` for `merged`, dropping the merged segment when every
    /// document in it was deleted.
    fn replace_segments(&mut self, range: Range<usize>, merged: SegmentInfo) {
        if merged.doc_count == 0 {
            drop(self.infos.segments.drain(range));
            self.remove_segment_files(&merged.name);
        } else {
            self.infos.segments.splice(range, [merged]);
        }
        self.dirty = true;
    }

    /// Merge `readers` into a newly named segment, packing it when configured.
    fn merge_readers(&mut self, readers: &[&SegmentReader]) -> Result<SegmentInfo> {
        let name = self.infos.next_segment_name();
        let result = {
            let mut merger = SegmentMerger::new(
                Arc::clone(&self.storage),
                name.clone(),
                &self.infos.field_infos,
                self.config.term_index_interval,
                self.config.skip_interval,
            );
            for reader in readers {
                merger.add(reader);
            }
            merger.merge()
        };
        let result = result.and_then(|mut info| {
            if self.config.use_compound_file {
                self.pack_compound(&mut info)?;
            }
            Ok(info)
        });
        if let Err(e) = &result {
            warn!("Failed to merge into segment {name}: {e}");
            self.remove_segment_files(&name);
        }
        result
    }

    /// Merge the whole index into a single segment without deletions.
    pub fn optimize(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.flush()?;

        let needs_merge = self.infos.len() > 1
            || self
                .infos
                .segments
                .first()
                .is_some_and(|s| s.has_deletions() || s.use_compound_file != self.config.use_compound_file);
        if needs_merge {
            self.merge_segments(0..self.infos.len())?;
        }
        info!(
            "Optimized index to {} segment(s), {} documents",
            self.infos.len(),
            self.infos.doc_count()
        );
        Ok(())
    }

    /// Merge the live documents of other indexes into this one. The result
    /// is a single segment holding this index's documents followed by those
    /// of `readers` in order. Fields are matched by name.
    pub fn add_indexes(&mut self, readers: &[&IndexReader]) -> Result<()> {
        self.ensure_open()?;
        self.flush()?;

        for reader in readers {
            self.infos.field_infos.merge(&reader.field_infos())?;
        }
        let field_infos = Arc::new(self.infos.field_infos.clone());
        let own = self
            .infos
            .segments
            .iter()
            .map(|info| SegmentReader::open(Arc::clone(&self.storage), info.clone(), Arc::clone(&field_infos)))
            .collect::<Result<Vec<_>>>()?;

        let mut all: Vec<&SegmentReader> = own.iter().collect();
        for reader in readers {
            all.extend(reader.segment_readers());
        }
        if all.is_empty() {
            return Ok(());
        }

        let merged = self.merge_readers(&all)?;
        info!(
            "Added {} indexes into segment {} ({} documents)",
            readers.len(),
            merged.name,
            merged.doc_count
        );
        self.replace_segments(0..self.infos.len(), merged);
        Ok(())
    }

    /// Flush and write the next generation, then remove files no longer
    /// referenced.
    pub fn commit(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.flush()?;
        if !self.dirty {
            return Ok(());
        }

        let previous = self.committed.segments_file_name();
        let file_name = self.infos.write(self.storage.as_ref())?;
        self.committed = self.infos.clone();
        self.dirty = false;
        info!(
            "Committed {file_name} ({} segments, {} documents)",
            self.committed.len(),
            self.committed.doc_count()
        );

        if let Err(e) = self.deleter.sweep(&[&self.committed]) {
            warn!("Failed to remove files after replacing {previous}: {e}");
        }
        Ok(())
    }

    /// Discard everything since the last commit. The writer stays open.
    pub fn rollback(&mut self) -> Result<()> {
        self.ensure_open()?;
        if let Some(open) = self.segment.take() {
            drop(open);
        }
        self.buffer.clear();
        self.infos = self.committed.clone();
        self.dirty = false;
        self.deleter.sweep(&[&self.committed])?;
        info!("Rolled back to generation {}", self.committed.generation);
        Ok(())
    }

    /// Commit and release the write lock.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.commit()?;
        self.closed = true;
        if let Some(mut lock) = self.write_lock.take() {
            lock.release()?;
        }
        debug!("Closed index writer");
        Ok(())
    }
}

impl Drop for IndexWriter {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if let Err(e) = self.close() {
            warn!("Failed to close index writer: {e}");
            self.closed = true;
            if let Some(mut lock) = self.write_lock.take() {
                let _ = lock.release();
            }
        }
    }
}
