//! In-memory accumulation of a segment before it is flushed.
//!
//! Each document field is first inverted into a [`FieldInversion`] (distinct
//! terms with positions and offsets). The inversion feeds the term vector of
//! the field and is then folded into the [`PostingBuffer`], which groups
//! postings per field in a hash keyed by term and keeps one norm byte per
//! document and field.

use ahash::AHashMap;

use crate::analysis::token::Token;
use crate::error::{Result, TesseraError};
use crate::lexical::index::inverted::fields_store::{TermVector, TermVectorEntry, TermVectorOffset};

/// Occurrences of one term within one document field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TermOccurrences {
    pub positions: Vec<u32>,
    pub offsets: Vec<TermVectorOffset>,
}

/// The distinct terms of one document field.
///
/// Several values of a field are inverted into the same instance: positions
/// continue across values and offsets address the values joined by a single
/// space.
#[derive(Debug, Clone, Default)]
pub struct FieldInversion {
    terms: AHashMap<String, TermOccurrences>,
    length: u32,
    next_position: u32,
    offset_base: usize,
}

impl FieldInversion {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tokens seen, used for length normalization.
    pub fn length(&self) -> u32 {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn terms(&self) -> &AHashMap<String, TermOccurrences> {
        &self.terms
    }

    fn push(&mut self, text: String, position: u32, start: usize, end: usize) -> Result<()> {
        let offset = |at: usize| {
            u32::try_from(self.offset_base + at).map_err(|_| {
                TesseraError::invalid_argument("field text exceeds 4GiB of offsets")
            })
        };
        let offsets = TermVectorOffset {
            start: offset(start)?,
            end: offset(end)?,
        };
        let occurrences = self.terms.entry(text).or_default();
        occurrences.positions.push(position);
        occurrences.offsets.push(offsets);
        self.length += 1;
        Ok(())
    }

    /// Add the tokens of one value whose text is `value_len` bytes long.
    pub fn add_tokens<I>(&mut self, tokens: I, value_len: usize) -> Result<()>
    where
        I: IntoIterator<Item = Token>,
    {
        let mut position = self.next_position;
        let mut first = true;
        for token in tokens {
            if first {
                // The first token of a value lands on the next free position
                // unless it asks to stack on the previous one.
                position = if token.position_increment == 0 && position > 0 {
                    position - 1
                } else {
                    position + token.position_increment.saturating_sub(1)
                };
                first = false;
            } else {
                position += token.position_increment;
            }
            self.push(token.text, position, token.start_offset, token.end_offset)?;
            self.next_position = position + 1;
        }
        self.offset_base += value_len + 1;
        Ok(())
    }

    /// Add one value as a single term.
    pub fn add_untokenized(&mut self, text: &str) -> Result<()> {
        let position = self.next_position;
        self.push(text.to_string(), position, 0, text.len())?;
        self.next_position = position + 1;
        self.offset_base += text.len() + 1;
        Ok(())
    }

    /// Term vector of the inverted field, terms sorted by text.
    pub fn to_term_vector(&self, field: &str, positions: bool, offsets: bool) -> TermVector {
        let mut terms: Vec<TermVectorEntry> = self
            .terms
            .iter()
            .map(|(text, occurrences)| TermVectorEntry {
                text: text.clone(),
                freq: occurrences.positions.len() as u32,
                positions: if positions {
                    occurrences.positions.clone()
                } else {
                    Vec::new()
                },
                offsets: if offsets {
                    occurrences.offsets.clone()
                } else {
                    Vec::new()
                },
            })
            .collect();
        terms.sort_by(|a, b| a.text.cmp(&b.text));
        TermVector {
            field: field.to_string(),
            terms,
        }
    }
}

/// Positions of one term in one buffered document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocPostings {
    pub doc: u32,
    pub positions: Vec<u32>,
}

/// Rough per-entry costs for the memory estimate.
const TERM_OVERHEAD: usize = 48;
const POSTING_OVERHEAD: usize = 32;

/// Postings and norms of the documents buffered for the next segment.
#[derive(Debug, Default)]
pub struct PostingBuffer {
    fields: AHashMap<u32, AHashMap<String, Vec<DocPostings>>>,
    norms: AHashMap<u32, Vec<u8>>,
    doc_count: u32,
    memory: usize,
}

impl PostingBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Documents buffered so far.
    pub fn doc_count(&self) -> u32 {
        self.doc_count
    }

    pub fn is_empty(&self) -> bool {
        self.doc_count == 0
    }

    /// Estimated heap usage in bytes.
    pub fn memory_usage(&self) -> usize {
        self.memory
    }

    /// Fold the inversion of `field` for document `doc` into the postings.
    pub fn add_field(&mut self, field: u32, doc: u32, inversion: &FieldInversion) {
        let terms = self.fields.entry(field).or_default();
        for (text, occurrences) in inversion.terms() {
            if !terms.contains_key(text.as_str()) {
                self.memory += TERM_OVERHEAD + text.len();
                terms.insert(text.clone(), Vec::new());
            }
            if let Some(postings) = terms.get_mut(text.as_str()) {
                self.memory += POSTING_OVERHEAD + occurrences.positions.len() * 4;
                postings.push(DocPostings {
                    doc,
                    positions: occurrences.positions.clone(),
                });
            }
        }
    }

    /// Record the norm byte of `field` for document `doc`.
    pub fn set_norm(&mut self, field: u32, doc: u32, norm: u8) {
        let norms = self.norms.entry(field).or_default();
        let idx = doc as usize;
        if norms.len() <= idx {
            self.memory += idx + 1 - norms.len();
            norms.resize(idx + 1, 0);
        }
        norms[idx] = norm;
    }

    /// Close the current document; returns its number.
    pub fn finish_document(&mut self) -> u32 {
        let doc = self.doc_count;
        self.doc_count += 1;
        doc
    }

    /// Number the next document will get.
    pub fn next_doc(&self) -> u32 {
        self.doc_count
    }

    /// Indexed field numbers, ascending.
    pub fn fields(&self) -> Vec<u32> {
        let mut fields: Vec<u32> = self.fields.keys().copied().collect();
        fields.sort_unstable();
        fields
    }

    /// Terms of `field` in ascending order with their postings.
    pub fn sorted_terms(&self, field: u32) -> Vec<(&str, &[DocPostings])> {
        let Some(terms) = self.fields.get(&field) else {
            return Vec::new();
        };
        let mut sorted: Vec<(&str, &[DocPostings])> = terms
            .iter()
            .map(|(text, postings)| (text.as_str(), postings.as_slice()))
            .collect();
        sorted.sort_unstable_by(|a, b| a.0.cmp(b.0));
        sorted
    }

    /// Fields with at least one norm byte, ascending.
    pub fn norm_fields(&self) -> Vec<u32> {
        let mut fields: Vec<u32> = self.norms.keys().copied().collect();
        fields.sort_unstable();
        fields
    }

    /// Norm bytes of `field`, one per buffered document. Documents that never
    /// had the field get zero.
    pub fn norms(&self, field: u32) -> Vec<u8> {
        let mut norms = self.norms.get(&field).cloned().unwrap_or_default();
        norms.resize(self.doc_count as usize, 0);
        norms
    }

    pub fn clear(&mut self) {
        self.fields.clear();
        self.norms.clear();
        self.doc_count = 0;
        self.memory = 0;
    }
}
