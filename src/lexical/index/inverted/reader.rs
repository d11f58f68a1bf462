//! Point-in-time readers over an index.
//!
//! A reader opened on a storage owns the commit it was opened at: it may
//! delete documents and rewrite norms, buffering the changes until
//! [`IndexReader::commit`] writes them as the next generation. The first
//! mutation takes the store's write lock and fails with
//! [`TesseraError::StaleReader`] if another process committed since the
//! reader was opened.
//!
//! Readers are reference counted. [`IndexReader::inc_ref`] and
//! [`IndexReader::dec_ref`] bracket shared use; the last release commits
//! pending changes and closes the reader.

pub mod multi;
pub mod segment;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use log::{debug, info, warn};
use parking_lot::Mutex;

use crate::error::{Result, TesseraError};
use crate::lexical::core::document::{Document, LazyDocument};
use crate::lexical::core::field::FieldInfos;
use crate::lexical::core::term::Term;
use crate::lexical::index::inverted::fields_store::TermVector;
use crate::lexical::index::inverted::posting::{TermDocs, TermPositions};
use crate::lexical::index::inverted::segment::{SegmentInfos, find_segments_file};
use crate::lexical::index::inverted::term_dict::TermEnum;
use crate::maintenance::deletion::IndexFileDeleter;
use crate::storage::{Storage, StorageLock};
use crate::util::id::WRITE_LOCK_NAME;

pub use multi::{MultiPostings, MultiReader, MultiTermEnum};
pub use segment::SegmentReader;

/// How long a reader waits for the write lock before giving up.
pub const DEFAULT_WRITE_LOCK_TIMEOUT: Duration = Duration::from_secs(1);

/// The concrete shape of a reader.
#[derive(Debug)]
pub enum ReaderKind {
    Segment(SegmentReader),
    Multi(MultiReader),
}

/// State of a reader that owns a commit.
#[derive(Debug)]
struct Ownership {
    storage: Arc<dyn Storage>,
    infos: SegmentInfos,
    write_lock: Option<Box<dyn StorageLock>>,
    lock_timeout: Duration,
    has_changes: bool,
    deleter: IndexFileDeleter,
}

impl Ownership {
    fn acquire_write_lock(&mut self) -> Result<()> {
        if self.write_lock.is_some() {
            return Ok(());
        }
        let mut lock = self.storage.create_lock(WRITE_LOCK_NAME)?;
        lock.obtain(self.lock_timeout)?;

        let current = match SegmentInfos::read_current_version(self.storage.as_ref()) {
            Ok(version) => version,
            Err(e) => {
                let _ = lock.release();
                return Err(e);
            }
        };
        if current > self.infos.version {
            let _ = lock.release();
            warn!(
                "Rejecting change from stale reader (opened at version {}, index at {current})",
                self.infos.version
            );
            return Err(TesseraError::StaleReader {
                opened: self.infos.version,
                current,
            });
        }
        self.write_lock = Some(lock);
        Ok(())
    }

    fn release_write_lock(&mut self) {
        if let Some(mut lock) = self.write_lock.take() {
            if let Err(e) = lock.release() {
                warn!("Failed to release {WRITE_LOCK_NAME}: {e}");
            }
        }
    }
}

/// Reader over one segment or a composition of readers.
#[derive(Debug)]
pub struct IndexReader {
    kind: ReaderKind,
    owner: Option<Mutex<Ownership>>,
    version: u64,
    ref_count: AtomicUsize,
    closed: AtomicBool,
}

impl IndexReader {
    /// Open the newest commit in `storage`.
    pub fn open(storage: Arc<dyn Storage>) -> Result<Self> {
        Self::open_with_timeout(storage, DEFAULT_WRITE_LOCK_TIMEOUT)
    }

    /// Open the newest commit, waiting up to `lock_timeout` for the write
    /// lock when the reader first mutates the index.
    pub fn open_with_timeout(storage: Arc<dyn Storage>, lock_timeout: Duration) -> Result<Self> {
        let shared = Arc::clone(&storage);
        let (infos, segments) = find_segments_file(storage.as_ref(), |dir, file| {
            let infos = SegmentInfos::read(dir, file)?;
            let field_infos = Arc::new(infos.field_infos.clone());
            let segments = infos
                .segments
                .iter()
                .map(|info| {
                    SegmentReader::open(Arc::clone(&shared), info.clone(), Arc::clone(&field_infos))
                })
                .collect::<Result<Vec<_>>>()?;
            Ok((infos, segments))
        })?;
        debug!(
            "Opened reader on {} ({} segments)",
            infos.segments_file_name(),
            segments.len()
        );

        let version = infos.version;
        let kind = Self::kind_for(segments, version)?;
        Ok(IndexReader {
            kind,
            owner: Some(Mutex::new(Ownership {
                deleter: IndexFileDeleter::new(Arc::clone(&storage)),
                storage,
                infos,
                write_lock: None,
                lock_timeout,
                has_changes: false,
            })),
            version,
            ref_count: AtomicUsize::new(1),
            closed: AtomicBool::new(false),
        })
    }

    fn kind_for(mut segments: Vec<SegmentReader>, version: u64) -> Result<ReaderKind> {
        if segments.len() == 1 {
            if let Some(segment) = segments.pop() {
                return Ok(ReaderKind::Segment(segment));
            }
        }
        let subs = segments
            .into_iter()
            .map(|segment| Self::unowned(ReaderKind::Segment(segment), version))
            .collect();
        Ok(ReaderKind::Multi(MultiReader::new(subs)?))
    }

    fn unowned(kind: ReaderKind, version: u64) -> Self {
        IndexReader {
            kind,
            owner: None,
            version,
            ref_count: AtomicUsize::new(1),
            closed: AtomicBool::new(false),
        }
    }

    /// Compose `readers` into one reader. Each keeps ownership of its own
    /// commit; committing or closing the composition does so for each.
    pub fn multi(readers: Vec<IndexReader>) -> Result<Self> {
        let version = readers.iter().map(IndexReader::version).max().unwrap_or(0);
        Ok(Self::unowned(ReaderKind::Multi(MultiReader::new(readers)?), version))
    }

    pub fn kind(&self) -> &ReaderKind {
        &self.kind
    }

    /// Segment readers in document order.
    pub fn segment_readers(&self) -> Vec<&SegmentReader> {
        match &self.kind {
            ReaderKind::Segment(segment) => vec![segment],
            ReaderKind::Multi(multi) => multi
                .subs()
                .iter()
                .flat_map(IndexReader::segment_readers)
                .collect(),
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TesseraError::Closed("IndexReader"));
        }
        Ok(())
    }

    /// Run a mutation under the ownership lock, taking the write lock first.
    fn mutate<T>(&self, f: impl FnOnce(&ReaderKind) -> Result<T>) -> Result<T> {
        self.ensure_open()?;
        match &self.owner {
            Some(owner) => {
                let mut owner = owner.lock();
                owner.acquire_write_lock()?;
                // A mutation failing partway through a multi reader may have
                // changed earlier subs already; those changes must commit.
                owner.has_changes = true;
                f(&self.kind)
            }
            None => f(&self.kind),
        }
    }

    pub fn max_doc(&self) -> u32 {
        match &self.kind {
            ReaderKind::Segment(segment) => segment.max_doc(),
            ReaderKind::Multi(multi) => multi.max_doc(),
        }
    }

    /// Live documents.
    pub fn num_docs(&self) -> u32 {
        match &self.kind {
            ReaderKind::Segment(segment) => segment.num_docs(),
            ReaderKind::Multi(multi) => multi.num_docs(),
        }
    }

    pub fn has_deletions(&self) -> bool {
        match &self.kind {
            ReaderKind::Segment(segment) => segment.has_deletions(),
            ReaderKind::Multi(multi) => multi.has_deletions(),
        }
    }

    pub fn is_deleted(&self, doc: u32) -> bool {
        match &self.kind {
            ReaderKind::Segment(segment) => segment.is_deleted(doc),
            ReaderKind::Multi(multi) => multi
                .locate(doc)
                .is_ok_and(|(i, local)| multi.subs()[i].is_deleted(local)),
        }
    }

    /// Stored fields of a live document.
    pub fn document(&self, doc: u32) -> Result<Document> {
        self.ensure_open()?;
        match &self.kind {
            ReaderKind::Segment(segment) => segment.document(doc),
            ReaderKind::Multi(multi) => {
                let (i, local) = multi.locate(doc)?;
                multi.subs()[i].document(local)
            }
        }
    }

    pub fn lazy_document(&self, doc: u32) -> Result<LazyDocument> {
        self.ensure_open()?;
        match &self.kind {
            ReaderKind::Segment(segment) => segment.lazy_document(doc),
            ReaderKind::Multi(multi) => {
                let (i, local) = multi.locate(doc)?;
                Ok(multi.subs()[i].lazy_document(local)?.with_doc(doc))
            }
        }
    }

    pub fn term_vectors(&self, doc: u32) -> Result<Vec<TermVector>> {
        self.ensure_open()?;
        match &self.kind {
            ReaderKind::Segment(segment) => segment.term_vectors(doc),
            ReaderKind::Multi(multi) => {
                let (i, local) = multi.locate(doc)?;
                multi.subs()[i].term_vectors(local)
            }
        }
    }

    pub fn term_vector(&self, doc: u32, field: &str) -> Result<Option<TermVector>> {
        self.ensure_open()?;
        match &self.kind {
            ReaderKind::Segment(segment) => segment.term_vector(doc, field),
            ReaderKind::Multi(multi) => {
                let (i, local) = multi.locate(doc)?;
                multi.subs()[i].term_vector(local, field)
            }
        }
    }

    /// One norm byte per document for `field`, or `None` when no segment
    /// holds norms for it.
    pub fn norms(&self, field: &str) -> Result<Option<Arc<Vec<u8>>>> {
        self.ensure_open()?;
        match &self.kind {
            ReaderKind::Segment(segment) => segment.norms(field),
            ReaderKind::Multi(multi) => multi.norms(field),
        }
    }

    pub fn set_norm(&self, doc: u32, field: &str, value: u8) -> Result<()> {
        self.mutate(|kind| match kind {
            ReaderKind::Segment(segment) => segment.set_norm(doc, field, value),
            ReaderKind::Multi(multi) => {
                let (i, local) = multi.locate(doc)?;
                multi.subs()[i].set_norm(local, field, value)?;
                multi.invalidate_norms(field);
                Ok(())
            }
        })
    }

    /// Terms of `field` in ascending order.
    pub fn terms(&self, field: &str) -> Result<Box<dyn TermEnum>> {
        self.ensure_open()?;
        Ok(match &self.kind {
            ReaderKind::Segment(segment) => Box::new(segment.terms(field)?),
            ReaderKind::Multi(multi) => Box::new(multi.terms(field, None)?),
        })
    }

    /// Terms of `field` starting at the first one `>= text`.
    pub fn terms_from(&self, field: &str, text: &str) -> Result<Box<dyn TermEnum>> {
        self.ensure_open()?;
        Ok(match &self.kind {
            ReaderKind::Segment(segment) => Box::new(segment.terms_from(field, text)?),
            ReaderKind::Multi(multi) => Box::new(multi.terms(field, Some(text))?),
        })
    }

    /// Live documents containing `term`.
    pub fn doc_freq(&self, term: &Term) -> Result<u32> {
        self.ensure_open()?;
        match &self.kind {
            ReaderKind::Segment(segment) => segment.live_doc_freq(term),
            ReaderKind::Multi(multi) => multi
                .subs()
                .iter()
                .map(|sub| sub.doc_freq(term))
                .sum(),
        }
    }

    /// Unpositioned document cursor.
    pub fn term_docs(&self) -> Result<Box<dyn TermDocs>> {
        self.ensure_open()?;
        Ok(match &self.kind {
            ReaderKind::Segment(segment) => Box::new(segment.term_docs()?),
            ReaderKind::Multi(multi) => Box::new(multi.term_docs()?),
        })
    }

    /// Unpositioned document and position cursor.
    pub fn term_positions(&self) -> Result<Box<dyn TermPositions>> {
        self.ensure_open()?;
        Ok(match &self.kind {
            ReaderKind::Segment(segment) => Box::new(segment.term_positions()?),
            ReaderKind::Multi(multi) => Box::new(multi.term_positions()?),
        })
    }

    /// Live documents containing `term`.
    pub fn term_docs_for(&self, term: &Term) -> Result<Box<dyn TermDocs>> {
        let mut docs = self.term_docs()?;
        docs.seek(term.field(), term.text())?;
        Ok(docs)
    }

    /// Live documents containing `term`, with positions.
    pub fn term_positions_for(&self, term: &Term) -> Result<Box<dyn TermPositions>> {
        let mut positions = self.term_positions()?;
        positions.seek(term.field(), term.text())?;
        Ok(positions)
    }

    /// Mark `doc` deleted. Deleting a deleted document is a no-op.
    pub fn delete(&self, doc: u32) -> Result<()> {
        self.mutate(|kind| match kind {
            ReaderKind::Segment(segment) => segment.delete(doc).map(|_| ()),
            ReaderKind::Multi(multi) => {
                let (i, local) = multi.locate(doc)?;
                multi.subs()[i].delete(local)
            }
        })
    }

    /// Delete every document containing `term`; returns how many were live.
    pub fn delete_docs_with_term(&self, term: &Term) -> Result<u32> {
        self.mutate(|kind| match kind {
            ReaderKind::Segment(segment) => segment.delete_docs_with_term(term),
            ReaderKind::Multi(multi) => multi
                .subs()
                .iter()
                .map(|sub| sub.delete_docs_with_term(term))
                .sum(),
        })
    }

    /// Restore every document deleted since the segments were written.
    pub fn undelete_all(&self) -> Result<()> {
        self.mutate(|kind| {
            match kind {
                ReaderKind::Segment(segment) => segment.undelete_all(),
                ReaderKind::Multi(multi) => {
                    for sub in multi.subs() {
                        sub.undelete_all()?;
                    }
                }
            }
            Ok(())
        })
    }

    pub fn field_infos(&self) -> Arc<FieldInfos> {
        match &self.kind {
            ReaderKind::Segment(segment) => Arc::clone(segment.field_infos()),
            ReaderKind::Multi(multi) => Arc::clone(multi.field_infos()),
        }
    }

    /// Version of the commit this reader reflects.
    pub fn version(&self) -> u64 {
        match &self.owner {
            Some(owner) => owner.lock().infos.version,
            None => self.version,
        }
    }

    /// Whether no commit happened since this reader was opened or last
    /// committed. A reader that does not own a commit reports on its parts.
    pub fn is_latest(&self) -> Result<bool> {
        self.ensure_open()?;
        match &self.owner {
            Some(owner) => {
                let owner = owner.lock();
                Ok(SegmentInfos::read_current_version(owner.storage.as_ref())? == owner.infos.version)
            }
            None => match &self.kind {
                ReaderKind::Segment(_) => Ok(true),
                ReaderKind::Multi(multi) => {
                    for sub in multi.subs() {
                        if !sub.is_latest()? {
                            return Ok(false);
                        }
                    }
                    Ok(true)
                }
            },
        }
    }

    /// Write pending deletions and norms as a new commit generation.
    pub fn commit(&self) -> Result<()> {
        self.ensure_open()?;
        self.commit_changes()
    }

    fn commit_changes(&self) -> Result<()> {
        let Some(owner) = &self.owner else {
            return match &self.kind {
                ReaderKind::Segment(_) => Ok(()),
                ReaderKind::Multi(multi) => {
                    for sub in multi.subs() {
                        sub.commit_changes()?;
                    }
                    Ok(())
                }
            };
        };

        let mut owner = owner.lock();
        if owner.has_changes {
            let mut infos = owner.infos.clone();
            for (slot, segment) in infos.segments.iter_mut().zip(self.segment_readers()) {
                *slot = segment.commit_changes()?;
            }
            let file = infos.write(owner.storage.as_ref())?;
            if let Err(e) = owner.deleter.sweep(&[&infos]) {
                warn!("Could not sweep unreferenced files after {file}: {e}");
            }
            info!("Committed reader changes as {file} (version {})", infos.version);
            owner.infos = infos;
            owner.has_changes = false;
        }
        owner.release_write_lock();
        Ok(())
    }

    /// Add a reference. Each call must be matched by [`dec_ref`](Self::dec_ref).
    pub fn inc_ref(&self) -> Result<()> {
        self.ensure_open()?;
        self.ref_count.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Drop a reference; the last one commits and closes the reader.
    pub fn dec_ref(&self) -> Result<()> {
        self.ensure_open()?;
        if self.ref_count.fetch_sub(1, Ordering::AcqRel) == 1 {
            return self.close_now();
        }
        Ok(())
    }

    pub fn ref_count(&self) -> usize {
        self.ref_count.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Release the caller's reference. Closing a closed reader is a no-op.
    pub fn close(&self) -> Result<()> {
        if self.is_closed() {
            return Ok(());
        }
        self.dec_ref()
    }

    fn close_now(&self) -> Result<()> {
        let result = self.commit_changes();
        self.closed.store(true, Ordering::Release);
        if let ReaderKind::Multi(multi) = &self.kind {
            for sub in multi.subs() {
                if let Err(e) = sub.close() {
                    warn!("Failed to close sub reader: {e}");
                }
            }
        }
        result
    }
}

impl Drop for IndexReader {
    fn drop(&mut self) {
        if self.is_closed() || self.owner.is_none() {
            return;
        }
        if let Err(e) = self.commit_changes() {
            warn!("Failed to commit reader changes on drop: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexical::index::inverted::{IndexWriter, IndexWriterConfig};
    use crate::storage::memory::MemoryStorage;

    fn index(docs: &[&str], max_buffered_docs: usize) -> Arc<dyn Storage> {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::default());
        let config = IndexWriterConfig {
            max_buffered_docs,
            merge_factor: 1000,
            ..IndexWriterConfig::default()
        };
        let mut writer = IndexWriter::open(Arc::clone(&storage), config).unwrap();
        for text in docs {
            writer
                .add_document(Document::new().with_field("f", *text))
                .unwrap();
        }
        writer.close().unwrap();
        storage
    }

    #[test]
    fn test_multi_segment_reader() {
        let storage = index(&["a b c", "a b", "a"], 1);
        let reader = IndexReader::open(storage).unwrap();
        assert!(matches!(reader.kind(), ReaderKind::Multi(_)));
        assert_eq!(reader.max_doc(), 3);
        assert_eq!(reader.doc_freq(&Term::new("f", "a")).unwrap(), 3);
        assert_eq!(reader.document(2).unwrap().get("f").and_then(|v| v.as_text()), Some("a"));
        assert_eq!(reader.lazy_document(1).unwrap().doc(), 1);

        let mut docs = reader.term_docs_for(&Term::new("f", "b")).unwrap();
        let mut found = Vec::new();
        while docs.next().unwrap() {
            found.push(docs.doc());
        }
        assert_eq!(found, vec![0, 1]);
        assert_eq!(reader.norms("f").unwrap().unwrap().len(), 3);
    }

    #[test]
    fn test_deletions_are_committed_on_close() {
        let storage = index(&["a b c", "a b", "a"], 10);
        let reader = IndexReader::open(Arc::clone(&storage)).unwrap();
        reader.delete(1).unwrap();
        reader.delete(1).unwrap();
        assert_eq!(reader.num_docs(), 2);
        assert!(reader.document(1).is_err());
        reader.close().unwrap();
        assert!(reader.is_closed());
        assert!(matches!(reader.document(0), Err(TesseraError::Closed(_))));

        let reopened = IndexReader::open(storage).unwrap();
        assert!(reopened.is_deleted(1));
        assert_eq!(reopened.doc_freq(&Term::new("f", "a")).unwrap(), 2);
        reopened.undelete_all().unwrap();
        assert_eq!(reopened.num_docs(), 3);
    }

    #[test]
    fn test_stale_reader_is_rejected() {
        let storage = index(&["a"], 10);
        let stale = IndexReader::open(Arc::clone(&storage)).unwrap();

        let fresh = IndexReader::open(Arc::clone(&storage)).unwrap();
        fresh.delete(0).unwrap();
        fresh.close().unwrap();

        assert!(!stale.is_latest().unwrap());
        let err = stale.delete(0).unwrap_err();
        assert!(matches!(err, TesseraError::StaleReader { .. }));
    }

    #[test]
    fn test_ref_counting() {
        let storage = index(&["a", "b"], 10);
        let reader = IndexReader::open(storage).unwrap();
        reader.inc_ref().unwrap();
        assert_eq!(reader.ref_count(), 2);
        reader.dec_ref().unwrap();
        assert!(!reader.is_closed());
        reader.dec_ref().unwrap();
        assert!(reader.is_closed());
        assert!(reader.inc_ref().is_err());
        reader.close().unwrap();
    }
}
