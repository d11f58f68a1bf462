//! Posting codec.
//!
//! `.frq` holds, per term, one entry per document: `vlong (delta << 1) | (freq
//! == 1)`, followed by `vint freq` when the frequency is above one. Once the
//! term's documents are written, skip data follows: one entry per
//! `skip_interval` documents (except after the last block) recording the state
//! after that document as `vint doc delta, vlong frq delta, vlong prx delta`.
//!
//! `.prx` holds, per term and document, the positions delta-encoded within
//! the document.

use std::sync::Arc;

use bit_vec::BitVec;

use crate::error::{Result, TesseraError};
use crate::lexical::core::field::FieldInfos;
use crate::lexical::core::term::TermInfo;
use crate::lexical::index::inverted::term_dict::TermDictReader;
use crate::storage::structured::{StructReader, StructWriter};
use crate::storage::{Storage, StorageInput, StorageOutput};
use crate::util::id;

/// Cursor over the documents containing a term.
pub trait TermDocs: Send {
    /// Reposition on the postings of `text` in `field`.
    fn seek(&mut self, field: &str, text: &str) -> Result<()>;

    /// Advance to the next live document.
    fn next(&mut self) -> Result<bool>;

    /// Current document number.
    fn doc(&self) -> u32;

    /// Occurrences of the term in the current document.
    fn freq(&self) -> u32;

    /// Advance to the first live document `>= target`, moving at least one
    /// document forward.
    fn skip_to(&mut self, target: u32) -> Result<bool>;

    /// Fill `docs` and `freqs` in bulk. Returns how many entries were filled;
    /// zero means the cursor is exhausted.
    fn read(&mut self, docs: &mut [u32], freqs: &mut [u32]) -> Result<usize> {
        let len = docs.len().min(freqs.len());
        let mut filled = 0;
        while filled < len && self.next()? {
            docs[filled] = self.doc();
            freqs[filled] = self.freq();
            filled += 1;
        }
        Ok(filled)
    }
}

/// [`TermDocs`] that also yields positions.
pub trait TermPositions: TermDocs {
    /// Next position of the term in the current document.
    fn next_position(&mut self) -> Result<u32>;
}

#[derive(Debug, Clone, Copy)]
struct SkipEntry {
    doc: u32,
    frq_ptr: u64,
    prx_ptr: u64,
}

/// Writes the postings of one segment, term by term.
#[derive(Debug)]
pub struct PostingWriter {
    frq: StructWriter<Box<dyn StorageOutput>>,
    prx: StructWriter<Box<dyn StorageOutput>>,
    skip_interval: u32,
    frq_start: u64,
    prx_start: u64,
    doc_freq: u32,
    last_doc: Option<u32>,
    skips: Vec<SkipEntry>,
}

impl PostingWriter {
    pub fn create(storage: &dyn Storage, segment: &str, skip_interval: u32) -> Result<Self> {
        if skip_interval == 0 {
            return Err(TesseraError::invalid_argument("skip interval must be positive"));
        }
        Ok(PostingWriter {
            frq: StructWriter::new(storage.create_output(&id::segment_file_name(segment, "frq"))?),
            prx: StructWriter::new(storage.create_output(&id::segment_file_name(segment, "prx"))?),
            skip_interval,
            frq_start: 0,
            prx_start: 0,
            doc_freq: 0,
            last_doc: None,
            skips: Vec::new(),
        })
    }

    pub fn start_term(&mut self) {
        self.frq_start = self.frq.position();
        self.prx_start = self.prx.position();
        self.doc_freq = 0;
        self.last_doc = None;
        self.skips.clear();
    }

    /// Append one document. `positions` must be non-empty and non-decreasing;
    /// its length is the frequency.
    pub fn add_doc(&mut self, doc: u32, positions: &[u32]) -> Result<()> {
        if positions.is_empty() {
            return Err(TesseraError::invalid_argument(format!(
                "document {doc} added without positions"
            )));
        }
        if let Some(last) = self.last_doc {
            if doc <= last {
                return Err(TesseraError::state(format!(
                    "document {doc} added after document {last}"
                )));
            }
            if self.doc_freq % self.skip_interval == 0 {
                self.skips.push(SkipEntry {
                    doc: last,
                    frq_ptr: self.frq.position(),
                    prx_ptr: self.prx.position(),
                });
            }
        }

        let delta = (doc - self.last_doc.unwrap_or(0)) as u64;
        let freq = positions.len() as u32;
        if freq == 1 {
            self.frq.write_vlong((delta << 1) | 1)?;
        } else {
            self.frq.write_vlong(delta << 1)?;
            self.frq.write_vint(freq)?;
        }

        let mut last_position = 0;
        for &position in positions {
            if position < last_position {
                return Err(TesseraError::state(format!(
                    "position {position} follows {last_position} in document {doc}"
                )));
            }
            self.prx.write_vint(position - last_position)?;
            last_position = position;
        }

        self.doc_freq += 1;
        self.last_doc = Some(doc);
        Ok(())
    }

    /// Write the term's skip data and return its dictionary entry.
    pub fn finish_term(&mut self) -> Result<TermInfo> {
        if self.doc_freq == 0 {
            return Err(TesseraError::state("term finished without documents"));
        }
        let mut skip_offset = 0;
        if !self.skips.is_empty() {
            let skip_start = self.frq.position();
            let mut last = SkipEntry {
                doc: 0,
                frq_ptr: self.frq_start,
                prx_ptr: self.prx_start,
            };
            for entry in &self.skips {
                self.frq.write_vint(entry.doc - last.doc)?;
                self.frq.write_vlong(entry.frq_ptr - last.frq_ptr)?;
                self.frq.write_vlong(entry.prx_ptr - last.prx_ptr)?;
                last = *entry;
            }
            skip_offset = u32::try_from(skip_start - self.frq_start).map_err(|_| {
                TesseraError::invalid_argument("postings of a single term exceed 4GiB")
            })?;
        }
        Ok(TermInfo::new(
            self.doc_freq,
            self.frq_start,
            self.prx_start,
            skip_offset,
        ))
    }

    pub fn close(self) -> Result<()> {
        self.frq.close()?;
        self.prx.close()
    }
}

/// Postings cursor over one segment.
///
/// Deleted documents are filtered through the deletion snapshot taken when
/// the cursor was created.
#[derive(Debug)]
pub struct SegmentPostings {
    dict: Arc<TermDictReader>,
    field_infos: Arc<FieldInfos>,
    frq: StructReader<Box<dyn StorageInput>>,
    prx: Option<StructReader<Box<dyn StorageInput>>>,
    skip: Option<StructReader<Box<dyn StorageInput>>>,
    deleted: Option<Arc<BitVec>>,
    skip_interval: u32,

    info: TermInfo,
    count: u32,
    doc: u32,
    freq: u32,
    started: bool,
    positions_left: u32,
    position: u32,

    num_skips: u32,
    skips_read: u32,
    skip_state: SkipEntry,
    pending_skip: Option<SkipEntry>,
}

impl SegmentPostings {
    pub fn new(
        dict: Arc<TermDictReader>,
        field_infos: Arc<FieldInfos>,
        frq: Box<dyn StorageInput>,
        prx: Option<Box<dyn StorageInput>>,
        deleted: Option<Arc<BitVec>>,
    ) -> Self {
        let skip_interval = dict.skip_interval();
        SegmentPostings {
            dict,
            field_infos,
            frq: StructReader::new(frq),
            prx: prx.map(StructReader::new),
            skip: None,
            deleted,
            skip_interval,
            info: TermInfo::default(),
            count: 0,
            doc: 0,
            freq: 0,
            started: false,
            positions_left: 0,
            position: 0,
            num_skips: 0,
            skips_read: 0,
            skip_state: SkipEntry {
                doc: 0,
                frq_ptr: 0,
                prx_ptr: 0,
            },
            pending_skip: None,
        }
    }

    /// Reposition on a dictionary entry; `None` yields an empty cursor.
    pub fn seek_info(&mut self, info: Option<TermInfo>) -> Result<()> {
        let info = info.unwrap_or_default();
        self.frq.seek(info.frq_ptr)?;
        if let Some(prx) = self.prx.as_mut() {
            prx.seek(info.prx_ptr)?;
        }
        self.info = info;
        self.count = 0;
        self.doc = 0;
        self.freq = 0;
        self.started = false;
        self.positions_left = 0;
        self.position = 0;
        self.num_skips = if info.doc_freq > 0 && info.skip_offset > 0 {
            (info.doc_freq - 1) / self.skip_interval
        } else {
            0
        };
        self.skips_read = 0;
        self.skip_state = SkipEntry {
            doc: 0,
            frq_ptr: info.frq_ptr,
            prx_ptr: info.prx_ptr,
        };
        self.pending_skip = None;
        if let Some(skip) = self.skip.as_mut() {
            skip.seek(info.frq_ptr + info.skip_offset as u64)?;
        }
        Ok(())
    }

    /// Documents containing the current term, deleted ones included.
    pub fn doc_freq(&self) -> u32 {
        self.info.doc_freq
    }

    fn is_deleted(&self, doc: u32) -> bool {
        self.deleted
            .as_ref()
            .is_some_and(|d| d.get(doc as usize).unwrap_or(false))
    }

    fn discard_positions(&mut self) -> Result<()> {
        if let Some(prx) = self.prx.as_mut() {
            for _ in 0..self.positions_left {
                prx.read_vint()?;
            }
        }
        self.positions_left = 0;
        Ok(())
    }

    fn read_skip_entry(&mut self) -> Result<SkipEntry> {
        if self.skip.is_none() {
            let mut skip = self.frq.try_clone()?;
            skip.seek(self.info.frq_ptr + self.info.skip_offset as u64)?;
            self.skip = Some(skip);
        }
        let skip = self
            .skip
            .as_mut()
            .ok_or_else(|| TesseraError::state("skip stream unavailable"))?;
        Ok(SkipEntry {
            doc: self.skip_state.doc + skip.read_vint()?,
            frq_ptr: self.skip_state.frq_ptr + skip.read_vlong()?,
            prx_ptr: self.skip_state.prx_ptr + skip.read_vlong()?,
        })
    }

    /// Apply every skip entry whose document precedes `target`.
    fn apply_skips(&mut self, target: u32) -> Result<()> {
        let mut moved = false;
        while self.skips_read < self.num_skips {
            let entry = match self.pending_skip.take() {
                Some(entry) => entry,
                None => self.read_skip_entry()?,
            };
            if entry.doc >= target {
                self.pending_skip = Some(entry);
                break;
            }
            self.skip_state = entry;
            self.skips_read += 1;
            moved = true;
        }

        let skipped_count = self.skips_read * self.skip_interval;
        if moved && skipped_count > self.count {
            self.frq.seek(self.skip_state.frq_ptr)?;
            if let Some(prx) = self.prx.as_mut() {
                prx.seek(self.skip_state.prx_ptr)?;
            }
            self.doc = self.skip_state.doc;
            self.count = skipped_count;
            self.positions_left = 0;
        }
        Ok(())
    }
}

impl TermDocs for SegmentPostings {
    fn seek(&mut self, field: &str, text: &str) -> Result<()> {
        let info = match self.field_infos.number_of(field) {
            Some(number) => self.dict.get_term_info(number, text)?,
            None => None,
        };
        self.seek_info(info)
    }

    fn next(&mut self) -> Result<bool> {
        loop {
            self.discard_positions()?;
            if self.count >= self.info.doc_freq {
                self.started = false;
                return Ok(false);
            }
            let code = self.frq.read_vlong()?;
            let delta = u32::try_from(code >> 1)
                .map_err(|_| TesseraError::corrupt(format!("doc delta {} overflows", code >> 1)))?;
            self.freq = if code & 1 == 1 {
                1
            } else {
                self.frq.read_vint()?
            };
            self.doc = if self.count == 0 { delta } else { self.doc + delta };
            self.count += 1;
            self.positions_left = self.freq;
            self.position = 0;
            if !self.is_deleted(self.doc) {
                self.started = true;
                return Ok(true);
            }
        }
    }

    fn doc(&self) -> u32 {
        self.doc
    }

    fn freq(&self) -> u32 {
        self.freq
    }

    fn skip_to(&mut self, target: u32) -> Result<bool> {
        if self.num_skips > 0 {
            self.apply_skips(target)?;
        }
        loop {
            if !self.next()? {
                return Ok(false);
            }
            if self.doc >= target {
                return Ok(true);
            }
        }
    }
}

impl TermPositions for SegmentPostings {
    fn next_position(&mut self) -> Result<u32> {
        if !self.started {
            return Err(TesseraError::state("next_position called before next"));
        }
        if self.positions_left == 0 {
            return Err(TesseraError::state(format!(
                "no positions left in document {}",
                self.doc
            )));
        }
        let prx = self
            .prx
            .as_mut()
            .ok_or_else(|| TesseraError::state("cursor was opened without positions"))?;
        self.position += prx.read_vint()?;
        self.positions_left -= 1;
        Ok(self.position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexical::core::field::{FieldInfo, IndexOption, StoreOption, TermVectorOption};
    use crate::lexical::index::inverted::term_dict::TermDictWriter;
    use crate::storage::memory::MemoryStorage;

    const SKIP: u32 = 4;

    /// Builds one segment where field "f" has term "t" in the given docs,
    /// with positions 0..freq and freq = doc % 3 + 1.
    fn build(docs: &[u32]) -> (MemoryStorage, Arc<TermDictReader>, Arc<FieldInfos>) {
        let storage = MemoryStorage::default();
        let mut postings = PostingWriter::create(&storage, "_0", SKIP).unwrap();
        let mut dict = TermDictWriter::create(&storage, "_0", 4, SKIP).unwrap();
        dict.start_field(0).unwrap();

        postings.start_term();
        postings.add_doc(0, &[3]).unwrap();
        let info = postings.finish_term().unwrap();
        dict.add("a", &info).unwrap();

        postings.start_term();
        for &doc in docs {
            let positions: Vec<u32> = (0..doc % 3 + 1).map(|p| p * 2).collect();
            postings.add_doc(doc, &positions).unwrap();
        }
        let info = postings.finish_term().unwrap();
        dict.add("t", &info).unwrap();
        postings.close().unwrap();
        dict.close().unwrap();

        let mut fields = FieldInfos::default();
        fields
            .add_field(
                FieldInfo::new("f", StoreOption::No, IndexOption::Yes, TermVectorOption::No)
                    .unwrap(),
            )
            .unwrap();
        let dict = Arc::new(TermDictReader::open(&storage, "_0").unwrap());
        (storage, dict, Arc::new(fields))
    }

    fn cursor(
        storage: &MemoryStorage,
        dict: &Arc<TermDictReader>,
        fields: &Arc<FieldInfos>,
        deleted: Option<Arc<BitVec>>,
    ) -> SegmentPostings {
        SegmentPostings::new(
            Arc::clone(dict),
            Arc::clone(fields),
            storage.open_input("_0.frq").unwrap(),
            Some(storage.open_input("_0.prx").unwrap()),
            deleted,
        )
    }

    #[test]
    fn test_docs_freqs_and_positions() {
        let docs: Vec<u32> = vec![1, 2, 5, 8, 13, 21, 34, 55, 89, 144];
        let (storage, dict, fields) = build(&docs);
        let mut postings = cursor(&storage, &dict, &fields, None);
        postings.seek("f", "t").unwrap();
        assert_eq!(postings.doc_freq(), docs.len() as u32);

        for &doc in &docs {
            assert!(postings.next().unwrap());
            assert_eq!(postings.doc(), doc);
            assert_eq!(postings.freq(), doc % 3 + 1);
            if doc % 2 == 0 {
                let positions: Vec<u32> = (0..postings.freq())
                    .map(|_| postings.next_position().unwrap())
                    .collect();
                let expected: Vec<u32> = (0..doc % 3 + 1).map(|p| p * 2).collect();
                assert_eq!(positions, expected);
            }
        }
        assert!(!postings.next().unwrap());

        postings.seek("f", "a").unwrap();
        assert!(postings.next().unwrap());
        assert_eq!((postings.doc(), postings.next_position().unwrap()), (0, 3));
    }

    #[test]
    fn test_next_position_before_next_is_state_error() {
        let (storage, dict, fields) = build(&[1, 2]);
        let mut postings = cursor(&storage, &dict, &fields, None);
        postings.seek("f", "t").unwrap();
        assert!(matches!(
            postings.next_position(),
            Err(TesseraError::State(_))
        ));
    }

    #[test]
    fn test_skip_to_matches_linear_scan() {
        let docs: Vec<u32> = (0..200).map(|i| i * 3 + 1).collect();
        let (storage, dict, fields) = build(&docs);
        assert!(dict.get_term_info(0, "t").unwrap().unwrap().skip_offset > 0);

        for target in [0u32, 2, 4, 50, 51, 299, 300, 598, 599, 600, 1000] {
            let mut skipping = cursor(&storage, &dict, &fields, None);
            skipping.seek("f", "t").unwrap();
            let found = skipping.skip_to(target).unwrap();
            let expected = docs.iter().copied().find(|&d| d >= target);
            assert_eq!(found, expected.is_some(), "target {target}");
            if let Some(doc) = expected {
                assert_eq!(skipping.doc(), doc);
                assert_eq!(skipping.freq(), doc % 3 + 1);
                assert_eq!(skipping.next_position().unwrap(), 0);
                if skipping.next().unwrap() {
                    let following = docs.iter().copied().find(|&d| d > doc).unwrap();
                    assert_eq!(skipping.doc(), following);
                }
            }
        }
    }

    #[test]
    fn test_successive_skips_and_deletions() {
        let docs: Vec<u32> = (0..100).collect();
        let (storage, dict, fields) = build(&docs);
        let mut deleted = BitVec::from_elem(100, false);
        for doc in (0..100).filter(|d| d % 10 == 0) {
            deleted.set(doc, true);
        }
        let mut postings = cursor(&storage, &dict, &fields, Some(Arc::new(deleted)));
        postings.seek("f", "t").unwrap();

        assert!(postings.skip_to(20).unwrap());
        assert_eq!(postings.doc(), 21);
        assert!(postings.skip_to(22).unwrap());
        assert_eq!(postings.doc(), 22);
        assert!(postings.skip_to(70).unwrap());
        assert_eq!(postings.doc(), 71);
        assert!(!postings.skip_to(100).unwrap());

        postings.seek("f", "t").unwrap();
        let mut docs_buf = [0u32; 8];
        let mut freqs_buf = [0u32; 8];
        let mut total = 0;
        loop {
            let n = postings.read(&mut docs_buf, &mut freqs_buf).unwrap();
            if n == 0 {
                break;
            }
            assert!(docs_buf[..n].iter().all(|d| d % 10 != 0));
            total += n;
        }
        assert_eq!(total, 90);
    }

    #[test]
    fn test_unknown_term_is_empty() {
        let (storage, dict, fields) = build(&[1]);
        let mut postings = cursor(&storage, &dict, &fields, None);
        postings.seek("f", "zzz").unwrap();
        assert!(!postings.next().unwrap());
        postings.seek("missing", "t").unwrap();
        assert!(!postings.skip_to(0).unwrap());
    }
}
