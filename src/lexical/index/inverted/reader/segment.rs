//! Reader over a single segment.
//!
//! Deletions file layout: `u32 max_doc, u32 deleted count`, then the deletion
//! bit vector packed eight documents per byte.

use std::sync::Arc;

use ahash::AHashMap;
use bit_vec::BitVec;
use log::{debug, warn};
use parking_lot::Mutex;

use crate::error::{Result, TesseraError};
use crate::lexical::core::document::{Document, LazyDocument};
use crate::lexical::core::field::FieldInfos;
use crate::lexical::core::term::Term;
use crate::lexical::index::inverted::fields_store::{FieldsReader, RawDocument, TermVector};
use crate::lexical::index::inverted::norms::{Norm, write_norms};
use crate::lexical::index::inverted::posting::{SegmentPostings, TermDocs};
use crate::lexical::index::inverted::segment::SegmentInfo;
use crate::lexical::index::inverted::term_dict::{SegmentTermEnum, TermDictReader};
use crate::storage::compound::CompoundFileReader;
use crate::storage::structured::{StructReader, StructWriter};
use crate::storage::{Storage, StorageInput};
use crate::util::id;

/// Mutable part of a segment reader.
#[derive(Debug)]
struct SegmentState {
    info: SegmentInfo,
    deleted: Option<Arc<BitVec>>,
    del_count: u32,
    deletions_dirty: bool,
    norms: AHashMap<u32, Norm>,
}

/// Read access to one segment plus its pending deletions and norm updates.
#[derive(Debug)]
pub struct SegmentReader {
    storage: Arc<dyn Storage>,
    name: String,
    max_doc: u32,
    field_infos: Arc<FieldInfos>,
    dict: Arc<TermDictReader>,
    frq: Box<dyn StorageInput>,
    prx: Box<dyn StorageInput>,
    fields: FieldsReader,
    state: Mutex<SegmentState>,
}

impl SegmentReader {
    /// Open the segment described by `info`. `field_infos` is the catalog of
    /// the commit the segment belongs to.
    pub fn open(
        storage: Arc<dyn Storage>,
        info: SegmentInfo,
        field_infos: Arc<FieldInfos>,
    ) -> Result<Self> {
        let compound = if info.use_compound_file {
            Some(CompoundFileReader::open(
                storage.as_ref(),
                &info.compound_file_name(),
            )?)
        } else {
            None
        };
        let dir: &dyn Storage = match &compound {
            Some(cfs) => cfs,
            None => storage.as_ref(),
        };

        let dict = Arc::new(TermDictReader::open(dir, &info.name)?);
        let frq = dir.open_input(&id::segment_file_name(&info.name, "frq"))?;
        let prx = dir.open_input(&id::segment_file_name(&info.name, "prx"))?;
        let fields = FieldsReader::open(dir, &info.name, Arc::clone(&field_infos))?;
        if fields.size() != info.doc_count {
            return Err(TesseraError::corrupt(format!(
                "segment {} stores {} documents but its descriptor records {}",
                info.name,
                fields.size(),
                info.doc_count
            )));
        }

        let mut norms = AHashMap::new();
        for field in 0..info.norm_gens.len() as u32 {
            let Some(file) = info.norm_file_name(field) else {
                continue;
            };
            let input = if info.norms_in_segment(field) {
                dir.open_input(&file)?
            } else {
                storage.open_input(&file)?
            };
            norms.insert(field, Norm::open(file, input));
        }

        let (deleted, del_count) = match info.del_file_name() {
            Some(file) => read_deletions(storage.as_ref(), &file, info.doc_count)?,
            None => (None, 0),
        };

        Ok(SegmentReader {
            name: info.name.clone(),
            max_doc: info.doc_count,
            storage,
            field_infos,
            dict,
            frq,
            prx,
            fields,
            state: Mutex::new(SegmentState {
                info,
                deleted,
                del_count,
                deletions_dirty: false,
                norms,
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The descriptor as last committed by this reader.
    pub fn info(&self) -> SegmentInfo {
        self.state.lock().info.clone()
    }

    pub fn field_infos(&self) -> &Arc<FieldInfos> {
        &self.field_infos
    }

    pub fn max_doc(&self) -> u32 {
        self.max_doc
    }

    pub fn num_docs(&self) -> u32 {
        self.max_doc - self.state.lock().del_count
    }

    pub fn has_deletions(&self) -> bool {
        self.state.lock().del_count > 0
    }

    pub fn is_deleted(&self, doc: u32) -> bool {
        self.state
            .lock()
            .deleted
            .as_ref()
            .is_some_and(|d| d.get(doc as usize).unwrap_or(false))
    }

    /// Snapshot of the deletion bit vector; later deletions do not show up in it.
    pub fn deleted_docs(&self) -> Option<Arc<BitVec>> {
        self.state.lock().deleted.clone()
    }

    fn check_doc(&self, doc: u32) -> Result<()> {
        if doc >= self.max_doc {
            return Err(TesseraError::invalid_argument(format!(
                "document {doc} out of range for segment {} ({} documents)",
                self.name, self.max_doc
            )));
        }
        Ok(())
    }

    fn check_live(&self, doc: u32) -> Result<()> {
        self.check_doc(doc)?;
        if self.is_deleted(doc) {
            return Err(TesseraError::invalid_argument(format!(
                "document {doc} of segment {} is deleted",
                self.name
            )));
        }
        Ok(())
    }

    pub fn document(&self, doc: u32) -> Result<Document> {
        self.check_live(doc)?;
        self.fields.document(doc)
    }

    pub fn lazy_document(&self, doc: u32) -> Result<LazyDocument> {
        self.check_live(doc)?;
        self.fields.lazy_document(doc)
    }

    pub(crate) fn raw_document(&self, doc: u32) -> Result<RawDocument> {
        self.check_doc(doc)?;
        self.fields.raw_document(doc)
    }

    pub fn term_vectors(&self, doc: u32) -> Result<Vec<TermVector>> {
        self.check_doc(doc)?;
        self.fields.term_vectors(doc)
    }

    pub fn term_vector(&self, doc: u32, field: &str) -> Result<Option<TermVector>> {
        self.check_doc(doc)?;
        match self.field_infos.number_of(field) {
            Some(number) => self.fields.term_vector(doc, number),
            None => Ok(None),
        }
    }

    /// Norm bytes of `field`, one per document, or `None` when the segment
    /// holds no norms for it.
    pub fn norms(&self, field: &str) -> Result<Option<Arc<Vec<u8>>>> {
        let Some(number) = self.field_infos.number_of(field) else {
            return Ok(None);
        };
        let mut state = self.state.lock();
        match state.norms.get_mut(&number) {
            Some(norm) => Ok(Some(norm.bytes(self.max_doc)?)),
            None => Ok(None),
        }
    }

    pub fn set_norm(&self, doc: u32, field: &str, value: u8) -> Result<()> {
        self.check_doc(doc)?;
        let number = self
            .field_infos
            .number_of(field)
            .ok_or_else(|| TesseraError::invalid_argument(format!("unknown field {field}")))?;
        let mut state = self.state.lock();
        let norm = state.norms.get_mut(&number).ok_or_else(|| {
            TesseraError::invalid_argument(format!(
                "field {field} has no norms in segment {}",
                self.name
            ))
        })?;
        norm.set(doc, value, self.max_doc)
    }

    /// Terms of `field`; empty when the field is unknown here.
    pub fn terms(&self, field: &str) -> Result<SegmentTermEnum> {
        self.dict
            .terms(self.field_infos.number_of(field).unwrap_or(u32::MAX))
    }

    /// Terms of `field` starting at the first one `>= text`.
    pub fn terms_from(&self, field: &str, text: &str) -> Result<SegmentTermEnum> {
        self.dict
            .terms_from(self.field_infos.number_of(field).unwrap_or(u32::MAX), text)
    }

    /// Dictionary document frequency, deleted documents included.
    pub fn doc_freq(&self, term: &Term) -> Result<u32> {
        let Some(number) = self.field_infos.number_of(term.field()) else {
            return Ok(0);
        };
        Ok(self
            .dict
            .get_term_info(number, term.text())?
            .map_or(0, |info| info.doc_freq))
    }

    /// Live documents containing `term`.
    pub fn live_doc_freq(&self, term: &Term) -> Result<u32> {
        if self.deleted_docs().is_none() {
            return self.doc_freq(term);
        }
        let mut docs = self.term_docs()?;
        docs.seek(term.field(), term.text())?;
        let mut count = 0;
        while docs.next()? {
            count += 1;
        }
        Ok(count)
    }

    /// Unpositioned document cursor; call `seek` before iterating.
    pub fn term_docs(&self) -> Result<SegmentPostings> {
        Ok(SegmentPostings::new(
            Arc::clone(&self.dict),
            Arc::clone(&self.field_infos),
            self.frq.clone_input()?,
            None,
            self.deleted_docs(),
        ))
    }

    /// Unpositioned cursor that also reads positions.
    pub fn term_positions(&self) -> Result<SegmentPostings> {
        Ok(SegmentPostings::new(
            Arc::clone(&self.dict),
            Arc::clone(&self.field_infos),
            self.frq.clone_input()?,
            Some(self.prx.clone_input()?),
            self.deleted_docs(),
        ))
    }

    /// Mark `doc` deleted. Returns whether it was live before.
    pub fn delete(&self, doc: u32) -> Result<bool> {
        self.check_doc(doc)?;
        let max_doc = self.max_doc as usize;
        let mut state = self.state.lock();
        let bits = state
            .deleted
            .get_or_insert_with(|| Arc::new(BitVec::from_elem(max_doc, false)));
        if bits.get(doc as usize).unwrap_or(false) {
            return Ok(false);
        }
        Arc::make_mut(bits).set(doc as usize, true);
        state.del_count += 1;
        state.deletions_dirty = true;
        Ok(true)
    }

    /// Delete every live document containing `term`; returns how many.
    pub fn delete_docs_with_term(&self, term: &Term) -> Result<u32> {
        let mut docs = self.term_docs()?;
        docs.seek(term.field(), term.text())?;
        let mut matched = Vec::new();
        while docs.next()? {
            matched.push(docs.doc());
        }
        let mut deleted = 0;
        for doc in matched {
            if self.delete(doc)? {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    pub fn undelete_all(&self) {
        let mut state = self.state.lock();
        if state.deleted.take().is_some() || state.del_count > 0 {
            state.del_count = 0;
            // Only a committed deletions file needs to be superseded.
            state.deletions_dirty = state.info.has_deletions();
        }
    }

    /// Whether deletions or norms changed since the last commit.
    pub fn has_changes(&self) -> bool {
        let state = self.state.lock();
        state.deletions_dirty || state.norms.values().any(Norm::is_dirty)
    }

    /// Write pending deletions and norms to new generation files and return
    /// the descriptor that references them.
    ///
    /// Nothing is overwritten: each change advances its generation. On
    /// failure the files written so far are removed and the reader keeps its
    /// pending changes.
    pub fn commit_changes(&self) -> Result<SegmentInfo> {
        let mut state = self.state.lock();
        let mut dirty_norms: Vec<u32> = state
            .norms
            .iter()
            .filter(|(_, norm)| norm.is_dirty())
            .map(|(field, _)| *field)
            .collect();
        dirty_norms.sort_unstable();
        if !state.deletions_dirty && dirty_norms.is_empty() {
            return Ok(state.info.clone());
        }

        let mut info = state.info.clone();
        let mut written: Vec<(Option<u32>, String)> = Vec::new();
        if let Err(e) = self.write_changes(&mut state, &mut info, &dirty_norms, &mut written) {
            for (_, file) in &written {
                if let Err(cleanup) = self.storage.delete_file(file) {
                    warn!("Could not remove partial {file}: {cleanup}");
                }
            }
            return Err(e);
        }

        for (field, file) in &written {
            if let Some(norm) = field.and_then(|f| state.norms.get_mut(&f)) {
                norm.mark_written(file);
            }
        }
        state.deletions_dirty = false;
        state.info = info.clone();
        debug!(
            "Committed segment {} at deletion generation {}",
            self.name, info.del_gen
        );
        Ok(info)
    }

    fn write_changes(
        &self,
        state: &mut SegmentState,
        info: &mut SegmentInfo,
        dirty_norms: &[u32],
        written: &mut Vec<(Option<u32>, String)>,
    ) -> Result<()> {
        if state.deletions_dirty {
            info.advance_del_gen();
            let file = info
                .del_file_name()
                .ok_or_else(|| TesseraError::state("deletion generation not advanced"))?;
            write_deletions(
                self.storage.as_ref(),
                &file,
                self.max_doc,
                state.del_count,
                state.deleted.as_deref(),
            )?;
            written.push((None, file));
        }
        for &field in dirty_norms {
            info.advance_norm_gen(field);
            let file = info
                .norm_file_name(field)
                .ok_or_else(|| TesseraError::state("norm generation not advanced"))?;
            let norm = state
                .norms
                .get_mut(&field)
                .ok_or_else(|| TesseraError::state(format!("norms of field {field} vanished")))?;
            let bytes = norm.bytes(self.max_doc)?;
            write_norms(self.storage.as_ref(), &file, &bytes)?;
            written.push((Some(field), file));
        }
        Ok(())
    }
}

fn read_deletions(
    storage: &dyn Storage,
    file: &str,
    max_doc: u32,
) -> Result<(Option<Arc<BitVec>>, u32)> {
    let mut reader = StructReader::new(storage.open_input(file)?);
    let size = reader.read_u32()?;
    if size != max_doc {
        return Err(TesseraError::corrupt(format!(
            "{file} covers {size} documents, segment has {max_doc}"
        )));
    }
    let count = reader.read_u32()?;
    let bytes = reader.read_bytes((max_doc as usize).div_ceil(8))?;
    let mut bits = BitVec::from_bytes(&bytes);
    bits.truncate(max_doc as usize);
    let actual = bits.iter().filter(|deleted| *deleted).count() as u32;
    if actual != count {
        return Err(TesseraError::corrupt(format!(
            "{file} records {count} deletions but marks {actual}"
        )));
    }
    if count == 0 {
        return Ok((None, 0));
    }
    Ok((Some(Arc::new(bits)), count))
}

fn write_deletions(
    storage: &dyn Storage,
    file: &str,
    max_doc: u32,
    count: u32,
    deleted: Option<&BitVec>,
) -> Result<()> {
    let bytes = match deleted {
        Some(bits) => bits.to_bytes(),
        None => vec![0; (max_doc as usize).div_ceil(8)],
    };
    let mut writer = StructWriter::new(storage.create_output(file)?);
    writer.write_u32(max_doc)?;
    writer.write_u32(count)?;
    writer.write_bytes(&bytes)?;
    writer.close()
}
