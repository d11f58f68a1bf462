//! Composition of several readers into one document space.
//!
//! Sub reader `i` owns documents `starts[i]..starts[i + 1]`. Field numbers
//! are resolved per sub reader by name; `field_maps` records, for every
//! field of the union catalog, the sub reader's own number or `None` when
//! the sub reader never saw the field.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Arc;

use ahash::AHashMap;
use parking_lot::Mutex;

use crate::error::{Result, TesseraError};
use crate::lexical::core::field::FieldInfos;
use crate::lexical::index::inverted::posting::{TermDocs, TermPositions};
use crate::lexical::index::inverted::reader::IndexReader;
use crate::lexical::index::inverted::term_dict::TermEnum;

#[derive(Debug)]
pub struct MultiReader {
    subs: Vec<IndexReader>,
    starts: Vec<u32>,
    field_infos: Arc<FieldInfos>,
    field_maps: Vec<Vec<Option<u32>>>,
    norms_cache: Mutex<AHashMap<String, Arc<Vec<u8>>>>,
}

impl MultiReader {
    pub fn new(subs: Vec<IndexReader>) -> Result<Self> {
        let mut starts = Vec::with_capacity(subs.len() + 1);
        let mut max_doc: u32 = 0;
        let mut union = match subs.first() {
            Some(first) => FieldInfos::new(first.field_infos().defaults()),
            None => FieldInfos::default(),
        };
        for sub in &subs {
            starts.push(max_doc);
            max_doc = max_doc.checked_add(sub.max_doc()).ok_or_else(|| {
                TesseraError::invalid_argument("combined readers exceed u32::MAX documents")
            })?;
            union.merge(&sub.field_infos())?;
        }
        starts.push(max_doc);

        let field_maps = subs
            .iter()
            .map(|sub| {
                let sub_infos = sub.field_infos();
                union
                    .iter()
                    .map(|info| sub_infos.number_of(info.name()))
                    .collect()
            })
            .collect();

        Ok(MultiReader {
            subs,
            starts,
            field_infos: Arc::new(union),
            field_maps,
            norms_cache: Mutex::new(AHashMap::new()),
        })
    }

    pub fn subs(&self) -> &[IndexReader] {
        &self.subs
    }

    /// First document number of every sub reader, plus the total.
    pub fn starts(&self) -> &[u32] {
        &self.starts
    }

    pub fn field_infos(&self) -> &Arc<FieldInfos> {
        &self.field_infos
    }

    pub fn max_doc(&self) -> u32 {
        self.starts.last().copied().unwrap_or(0)
    }

    pub fn num_docs(&self) -> u32 {
        self.subs.iter().map(IndexReader::num_docs).sum()
    }

    pub fn has_deletions(&self) -> bool {
        self.subs.iter().any(IndexReader::has_deletions)
    }

    /// Sub reader index and local document number of `doc`.
    pub fn locate(&self, doc: u32) -> Result<(usize, u32)> {
        if doc >= self.max_doc() {
            return Err(TesseraError::invalid_argument(format!(
                "document {doc} out of range ({} documents)",
                self.max_doc()
            )));
        }
        let index = self.starts.partition_point(|&start| start <= doc) - 1;
        Ok((index, doc - self.starts[index]))
    }

    fn has_field(&self, sub: usize, field: &str) -> bool {
        self.field_infos
            .number_of(field)
            .and_then(|n| self.field_maps[sub].get(n as usize).copied().flatten())
            .is_some()
    }

    /// Norms of `field` across all sub readers. Sub readers without norms for
    /// the field contribute zero bytes.
    pub fn norms(&self, field: &str) -> Result<Option<Arc<Vec<u8>>>> {
        if let Some(cached) = self.norms_cache.lock().get(field) {
            return Ok(Some(Arc::clone(cached)));
        }
        let mut bytes = Vec::with_capacity(self.max_doc() as usize);
        let mut found = false;
        for (i, sub) in self.subs.iter().enumerate() {
            let norms = if self.has_field(i, field) {
                sub.norms(field)?
            } else {
                None
            };
            match norms {
                Some(norms) => {
                    found = true;
                    bytes.extend_from_slice(&norms);
                }
                None => bytes.resize(bytes.len() + sub.max_doc() as usize, 0),
            }
        }
        if !found {
            return Ok(None);
        }
        let bytes = Arc::new(bytes);
        self.norms_cache
            .lock()
            .insert(field.to_string(), Arc::clone(&bytes));
        Ok(Some(bytes))
    }

    pub(crate) fn invalidate_norms(&self, field: &str) {
        self.norms_cache.lock().remove(field);
    }

    /// Merged term enumeration over the sub readers that know `field`.
    pub fn terms(&self, field: &str, from: Option<&str>) -> Result<MultiTermEnum> {
        let mut enums = Vec::new();
        for (i, sub) in self.subs.iter().enumerate() {
            if !self.has_field(i, field) {
                continue;
            }
            enums.push(match from {
                Some(text) => sub.terms_from(field, text)?,
                None => sub.terms(field)?,
            });
        }
        MultiTermEnum::new(enums)
    }

    pub fn term_docs(&self) -> Result<MultiPostings<dyn TermDocs>> {
        let mut subs = Vec::with_capacity(self.subs.len());
        for (sub, &base) in self.subs.iter().zip(&self.starts) {
            subs.push((base, sub.term_docs()?));
        }
        Ok(MultiPostings::new(subs))
    }

    pub fn term_positions(&self) -> Result<MultiPostings<dyn TermPositions>> {
        let mut subs = Vec::with_capacity(self.subs.len());
        for (sub, &base) in self.subs.iter().zip(&self.starts) {
            subs.push((base, sub.term_positions()?));
        }
        Ok(MultiPostings::new(subs))
    }
}

/// Term enumeration merged from several sorted enumerations.
///
/// Ties are broken by enumeration index, so for any term the contributing
/// enumerations are reported in order.
pub struct MultiTermEnum {
    enums: Vec<Box<dyn TermEnum>>,
    queue: BinaryHeap<Reverse<(String, usize)>>,
    term: String,
    doc_freq: u32,
    matching: Vec<usize>,
}

impl std::fmt::Debug for MultiTermEnum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiTermEnum")
            .field("enums", &self.enums.len())
            .field("term", &self.term)
            .field("doc_freq", &self.doc_freq)
            .field("matching", &self.matching)
            .finish()
    }
}

impl MultiTermEnum {
    /// Merge `enums`, each positioned before its first term.
    pub fn new(mut enums: Vec<Box<dyn TermEnum>>) -> Result<Self> {
        let mut queue = BinaryHeap::with_capacity(enums.len());
        for (i, terms) in enums.iter_mut().enumerate() {
            if terms.next()? {
                queue.push(Reverse((terms.term().to_string(), i)));
            }
        }
        Ok(MultiTermEnum {
            enums,
            queue,
            term: String::new(),
            doc_freq: 0,
            matching: Vec::new(),
        })
    }

    /// Indices of the enumerations holding the current term, ascending.
    pub fn matching(&self) -> &[usize] {
        &self.matching
    }

    /// Dictionary document frequency of the current term in enumeration `i`.
    /// Only meaningful for indices in [`matching`](Self::matching).
    pub fn doc_freq_of(&self, i: usize) -> u32 {
        self.enums.get(i).map_or(0, |e| e.doc_freq())
    }

    fn advance(&mut self, i: usize) -> Result<()> {
        let terms = &mut self.enums[i];
        if terms.next()? {
            self.queue.push(Reverse((terms.term().to_string(), i)));
        }
        Ok(())
    }
}

impl TermEnum for MultiTermEnum {
    fn next(&mut self) -> Result<bool> {
        // Enumerations matched last round still sit on that term.
        for i in std::mem::take(&mut self.matching) {
            self.advance(i)?;
        }
        let Some(Reverse((term, first))) = self.queue.pop() else {
            self.term.clear();
            self.doc_freq = 0;
            return Ok(false);
        };
        self.term = term;
        self.matching.push(first);
        while self
            .queue
            .peek()
            .is_some_and(|Reverse((next, _))| *next == self.term)
        {
            if let Some(Reverse((_, i))) = self.queue.pop() {
                self.matching.push(i);
            }
        }
        self.doc_freq = self.matching.iter().map(|&i| self.enums[i].doc_freq()).sum();
        Ok(true)
    }

    fn term(&self) -> &str {
        &self.term
    }

    fn doc_freq(&self) -> u32 {
        self.doc_freq
    }
}

/// Postings cursor over several sub cursors, each shifted by its base.
pub struct MultiPostings<T: ?Sized> {
    subs: Vec<(u32, Box<T>)>,
    current: usize,
}

impl<T: ?Sized> std::fmt::Debug for MultiPostings<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiPostings")
            .field("subs", &self.subs.len())
            .field("current", &self.current)
            .finish()
    }
}

impl<T: ?Sized> MultiPostings<T> {
    pub fn new(subs: Vec<(u32, Box<T>)>) -> Self {
        MultiPostings { subs, current: 0 }
    }
}

impl<T: TermDocs + ?Sized> TermDocs for MultiPostings<T> {
    fn seek(&mut self, field: &str, text: &str) -> Result<()> {
        for (_, sub) in &mut self.subs {
            sub.seek(field, text)?;
        }
        self.current = 0;
        Ok(())
    }

    fn next(&mut self) -> Result<bool> {
        while let Some((_, sub)) = self.subs.get_mut(self.current) {
            if sub.next()? {
                return Ok(true);
            }
            self.current += 1;
        }
        Ok(false)
    }

    fn doc(&self) -> u32 {
        self.subs
            .get(self.current)
            .map_or(0, |(base, sub)| base + sub.doc())
    }

    fn freq(&self) -> u32 {
        self.subs.get(self.current).map_or(0, |(_, sub)| sub.freq())
    }

    fn skip_to(&mut self, target: u32) -> Result<bool> {
        while let Some((base, sub)) = self.subs.get_mut(self.current) {
            if sub.skip_to(target.saturating_sub(*base))? {
                return Ok(true);
            }
            self.current += 1;
        }
        Ok(false)
    }
}

impl TermPositions for MultiPostings<dyn TermPositions> {
    fn next_position(&mut self) -> Result<u32> {
        match self.subs.get_mut(self.current) {
            Some((_, sub)) => sub.next_position(),
            None => Err(TesseraError::state("next_position called on exhausted cursor")),
        }
    }
}
