//! Deletion of index files that no commit references any more.
//!
//! Mutations never delete files inline. Superseded files are queued, and a
//! sweep after each commit removes everything the live commits do not
//! reference: files of merged-away segments, single files wrapped into a
//! compound file, older deletion and norm generations, older `segments_N`
//! descriptors and leftovers of failed flushes. A failed deletion (a file
//! still open on some platforms, for instance) is logged and retried on the
//! next sweep.

use std::sync::Arc;

use ahash::AHashSet;
use log::{debug, warn};

use crate::error::Result;
use crate::lexical::index::inverted::segment::SegmentInfos;
use crate::storage::Storage;
use crate::util::id;

/// Queues and deletes unreferenced index files.
#[derive(Debug)]
pub struct IndexFileDeleter {
    storage: Arc<dyn Storage>,
    pending: Vec<String>,
}

impl IndexFileDeleter {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        IndexFileDeleter {
            storage,
            pending: Vec::new(),
        }
    }

    /// Files waiting for a retry.
    pub fn pending(&self) -> &[String] {
        &self.pending
    }

    /// Queue files for deletion on the next [`delete_pending`](Self::delete_pending).
    pub fn queue<I, S>(&mut self, files: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for file in files {
            let file = file.into();
            if !self.pending.contains(&file) {
                self.pending.push(file);
            }
        }
    }

    /// Try every queued file once; failures stay queued.
    pub fn delete_pending(&mut self) {
        let files = std::mem::take(&mut self.pending);
        for file in files {
            self.delete_file(file);
        }
    }

    fn delete_file(&mut self, file: String) {
        if !self.storage.file_exists(&file) {
            return;
        }
        match self.storage.delete_file(&file) {
            Ok(()) => debug!("Deleted {file}"),
            Err(e) => {
                warn!("Could not delete {file}, will retry: {e}");
                self.pending.push(file);
            }
        }
    }

    /// Delete every index file not referenced by one of `live`.
    ///
    /// Only names that belong to the index are considered: per-segment files
    /// and commit descriptors. The generation pointer, the write lock and
    /// foreign files are left alone.
    pub fn sweep(&mut self, live: &[&SegmentInfos]) -> Result<()> {
        let referenced: AHashSet<String> = live.iter().flat_map(|infos| infos.files()).collect();

        let mut stale = Vec::new();
        for file in self.storage.list_files()? {
            if referenced.contains(&file) {
                continue;
            }
            let owned_by_index = id::parse_segments_generation(&file).is_some()
                || id::parse_segment_file(&file).is_some();
            if owned_by_index {
                stale.push(file);
            }
        }

        if !stale.is_empty() {
            debug!("Sweeping {} unreferenced files", stale.len());
        }
        self.queue(stale);
        self.delete_pending();
        Ok(())
    }
}
