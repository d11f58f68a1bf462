//! Merging several segments into a new one.
//!
//! Deleted documents are dropped and the survivors renumbered densely in
//! reader order. Terms are merged through a priority queue over the readers'
//! term enumerations; postings are re-encoded so skip data and dictionary
//! entries are rebuilt for the new numbering. Stored fields and term vectors
//! are copied as raw records with their field numbers translated by name.

use std::sync::Arc;

use log::debug;

use crate::error::{Result, TesseraError};
use crate::lexical::core::field::FieldInfos;
use crate::lexical::index::inverted::fields_store::FieldsWriter;
use crate::lexical::index::inverted::norms::write_norms;
use crate::lexical::index::inverted::posting::{PostingWriter, SegmentPostings, TermDocs, TermPositions};
use crate::lexical::index::inverted::reader::{MultiTermEnum, SegmentReader};
use crate::lexical::index::inverted::segment::SegmentInfo;
use crate::lexical::index::inverted::term_dict::{TermDictWriter, TermEnum};
use crate::storage::Storage;
use crate::util::id;

/// Old document number → new document number, `None` for deleted documents.
pub type DocMap = Vec<Option<u32>>;

/// Builds one segment out of the live documents of several readers.
#[derive(Debug)]
pub struct SegmentMerger<'a> {
    storage: Arc<dyn Storage>,
    segment: String,
    field_infos: &'a FieldInfos,
    readers: Vec<&'a SegmentReader>,
    term_index_interval: u32,
    skip_interval: u32,
}

impl<'a> SegmentMerger<'a> {
    /// `field_infos` is the catalog of the target index and must contain
    /// every field of every added reader.
    pub fn new(
        storage: Arc<dyn Storage>,
        segment: impl Into<String>,
        field_infos: &'a FieldInfos,
        term_index_interval: u32,
        skip_interval: u32,
    ) -> Self {
        SegmentMerger {
            storage,
            segment: segment.into(),
            field_infos,
            readers: Vec::new(),
            term_index_interval,
            skip_interval,
        }
    }

    pub fn add(&mut self, reader: &'a SegmentReader) {
        self.readers.push(reader);
    }

    /// Write the merged segment and return its descriptor. Files are written
    /// as separate files; compound wrapping is left to the caller.
    pub fn merge(&self) -> Result<SegmentInfo> {
        let (doc_maps, doc_count) = self.doc_maps();
        let remaps = self.field_remaps()?;

        self.merge_fields(&doc_maps, &remaps)?;
        self.merge_terms(&doc_maps)?;
        let norm_gens = self.merge_norms(&doc_maps)?;

        let mut info = SegmentInfo::new(self.segment.clone(), doc_count);
        info.norm_gens = norm_gens;
        debug!(
            "Merged {} segments into {} ({doc_count} documents)",
            self.readers.len(),
            self.segment
        );
        Ok(info)
    }

    /// Per reader document maps plus the merged document count.
    pub fn doc_maps(&self) -> (Vec<DocMap>, u32) {
        let mut next = 0u32;
        let maps: Vec<DocMap> = self
            .readers
            .iter()
            .map(|reader| {
                let deleted = reader.deleted_docs();
                (0..reader.max_doc())
                    .map(|doc| {
                        let is_deleted = deleted
                            .as_ref()
                            .is_some_and(|d| d.get(doc as usize).unwrap_or(false));
                        if is_deleted {
                            None
                        } else {
                            next += 1;
                            Some(next - 1)
                        }
                    })
                    .collect::<DocMap>()
            })
            .collect();
        (maps, next)
    }

    /// Per reader field-number translation into the target catalog.
    fn field_remaps(&self) -> Result<Vec<Vec<u32>>> {
        self.readers
            .iter()
            .map(|reader| {
                let infos = reader.field_infos();
                let mut remap = vec![0; infos.len()];
                for info in infos.iter() {
                    let number = self.field_infos.number_of(info.name()).ok_or_else(|| {
                        TesseraError::state(format!(
                            "field {} of segment {} missing from the target catalog",
                            info.name(),
                            reader.name()
                        ))
                    })?;
                    if let Some(slot) = remap.get_mut(info.number() as usize) {
                        *slot = number;
                    }
                }
                Ok(remap)
            })
            .collect()
    }

    fn merge_fields(&self, doc_maps: &[DocMap], remaps: &[Vec<u32>]) -> Result<()> {
        let mut writer = FieldsWriter::create(self.storage.as_ref(), &self.segment)?;
        for ((reader, map), remap) in self.readers.iter().zip(doc_maps).zip(remaps) {
            for (doc, target) in map.iter().enumerate() {
                if target.is_none() {
                    continue;
                }
                let mut raw = reader.raw_document(doc as u32)?;
                raw.remap_fields(remap)?;
                writer.add_raw_document(&raw)?;
            }
        }
        writer.close()
    }

    fn merge_terms(&self, doc_maps: &[DocMap]) -> Result<()> {
        let mut postings = PostingWriter::create(self.storage.as_ref(), &self.segment, self.skip_interval)?;
        let mut dict = TermDictWriter::create(
            self.storage.as_ref(),
            &self.segment,
            self.term_index_interval,
            self.skip_interval,
        )?;
        let mut cursors = self
            .readers
            .iter()
            .map(|reader| reader.term_positions())
            .collect::<Result<Vec<SegmentPostings>>>()?;

        for field in self.field_infos.iter().filter(|f| f.is_indexed()) {
            let name = field.name();
            let mut enums: Vec<Box<dyn TermEnum>> = Vec::new();
            let mut owners = Vec::new();
            for (i, reader) in self.readers.iter().enumerate() {
                if reader.field_infos().number_of(name).is_some() {
                    enums.push(Box::new(reader.terms(name)?));
                    owners.push(i);
                }
            }
            if enums.is_empty() {
                continue;
            }

            dict.start_field(field.number())?;
            let mut terms = MultiTermEnum::new(enums)?;
            let mut positions = Vec::new();
            while terms.next()? {
                postings.start_term();
                let mut added = 0u32;
                for &slot in terms.matching() {
                    let reader = owners[slot];
                    let cursor = &mut cursors[reader];
                    cursor.seek(name, terms.term())?;
                    while cursor.next()? {
                        let Some(doc) = doc_maps[reader][cursor.doc() as usize] else {
                            continue;
                        };
                        positions.clear();
                        for _ in 0..cursor.freq() {
                            positions.push(cursor.next_position()?);
                        }
                        postings.add_doc(doc, &positions)?;
                        added += 1;
                    }
                }
                if added > 0 {
                    let info = postings.finish_term()?;
                    dict.add(terms.term(), &info)?;
                }
            }
        }

        postings.close()?;
        dict.close()
    }

    fn merge_norms(&self, doc_maps: &[DocMap]) -> Result<Vec<Option<u64>>> {
        let mut norm_gens = Vec::new();
        for field in self.field_infos.iter().filter(|f| f.has_norms()) {
            let mut bytes = Vec::new();
            let mut found = false;
            for (reader, map) in self.readers.iter().zip(doc_maps) {
                let norms = reader.norms(field.name())?;
                found |= norms.is_some();
                for (doc, target) in map.iter().enumerate() {
                    if target.is_some() {
                        bytes.push(norms.as_ref().map_or(0, |n| n[doc]));
                    }
                }
            }
            if !found {
                continue;
            }
            let number = field.number();
            write_norms(
                self.storage.as_ref(),
                &id::segment_file_name(&self.segment, &format!("f{number}")),
                &bytes,
            )?;
            if norm_gens.len() <= number as usize {
                norm_gens.resize(number as usize + 1, None);
            }
            norm_gens[number as usize] = Some(0);
        }
        Ok(norm_gens)
    }
}
