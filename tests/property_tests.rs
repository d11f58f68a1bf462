//! Property-based tests for the indexing core.
//!
//! These tests verify invariants that should hold regardless of input:
//! - Stored values, postings and positions survive a write/read cycle
//! - Terms of a field enumerate strictly ascending
//! - Merging indexes equals concatenating their documents
//! - Deleting twice equals deleting once

use std::collections::BTreeMap;
use std::sync::Arc;

use proptest::prelude::*;

use tessera::analysis::WhitespaceAnalyzer;
use tessera::storage::memory::MemoryStorage;
use tessera::{Document, IndexReader, IndexWriter, IndexWriterConfig, Storage, Term};

type Postings = BTreeMap<String, Vec<(u32, Vec<u32>)>>;

fn config(max_buffered_docs: usize, merge_factor: u32) -> IndexWriterConfig {
    IndexWriterConfig {
        max_buffered_docs,
        merge_factor,
        analyzer: Arc::new(WhitespaceAnalyzer::new()),
        ..IndexWriterConfig::default()
    }
}

fn build(docs: &[Vec<String>], config: IndexWriterConfig) -> Arc<dyn Storage> {
    let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::default());
    let mut writer = IndexWriter::open(Arc::clone(&storage), config).unwrap();
    for words in docs {
        writer
            .add_document(Document::new().with_field("f", words.join(" ")))
            .unwrap();
    }
    writer.close().unwrap();
    storage
}

/// Postings computed directly from the input, skipping `deleted` documents.
fn expected_postings(docs: &[Vec<String>], deleted: &[bool]) -> Postings {
    let mut expected = Postings::new();
    for (doc, words) in docs.iter().enumerate() {
        if deleted.get(doc).copied().unwrap_or(false) {
            continue;
        }
        let mut per_term: BTreeMap<&str, Vec<u32>> = BTreeMap::new();
        for (position, word) in words.iter().enumerate() {
            per_term.entry(word.as_str()).or_default().push(position as u32);
        }
        for (term, positions) in per_term {
            expected
                .entry(term.to_string())
                .or_default()
                .push((doc as u32, positions));
        }
    }
    expected
}

/// Every term of `f` with its live postings, read through the term enum.
fn actual_postings(reader: &IndexReader) -> Postings {
    let mut actual = Postings::new();
    let mut terms = reader.terms("f").unwrap();
    let mut previous: Option<String> = None;
    while terms.next().unwrap() {
        let term = terms.term().to_string();
        if let Some(previous) = &previous {
            assert!(previous < &term, "{previous} !< {term}");
        }
        let mut cursor = reader.term_positions_for(&Term::new("f", term.as_str())).unwrap();
        let mut docs = Vec::new();
        while cursor.next().unwrap() {
            let positions: Vec<u32> = (0..cursor.freq())
                .map(|_| cursor.next_position().unwrap())
                .collect();
            docs.push((cursor.doc(), positions));
        }
        if !docs.is_empty() {
            assert_eq!(reader.doc_freq(&Term::new("f", term.as_str())).unwrap(), docs.len() as u32);
            actual.insert(term.clone(), docs);
        }
        previous = Some(term);
    }
    actual
}

prop_compose! {
    fn arb_docs(max_docs: usize)(
        docs in prop::collection::vec(prop::collection::vec("[a-e]{1,3}", 0..6), 0..max_docs)
    ) -> Vec<Vec<String>> {
        docs
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn round_trip_preserves_documents_and_postings(
        docs in arb_docs(16),
        max_buffered in 1usize..5,
        merge_factor in 2u32..4,
    ) {
        let storage = build(&docs, config(max_buffered, merge_factor));
        let reader = IndexReader::open(storage).unwrap();

        prop_assert_eq!(reader.max_doc() as usize, docs.len());
        for (doc, words) in docs.iter().enumerate() {
            let stored = reader.document(doc as u32).unwrap();
            let expected = words.join(" ");
            prop_assert_eq!(stored.get("f").and_then(|v| v.as_text()), Some(expected.as_str()));
        }
        prop_assert_eq!(actual_postings(&reader), expected_postings(&docs, &[]));
    }

    #[test]
    fn merged_index_equals_concatenation(
        left in arb_docs(8),
        right in arb_docs(8),
    ) {
        let left_storage = build(&left, config(3, 1000));
        let right_storage = build(&right, config(2, 1000));

        let target: Arc<dyn Storage> = Arc::new(MemoryStorage::default());
        let mut writer = IndexWriter::open(Arc::clone(&target), config(4, 1000)).unwrap();
        let left_reader = IndexReader::open(left_storage).unwrap();
        let right_reader = IndexReader::open(right_storage).unwrap();
        writer.add_indexes(&[&left_reader, &right_reader]).unwrap();
        writer.close().unwrap();

        let all: Vec<Vec<String>> = left.iter().chain(right.iter()).cloned().collect();
        let merged = IndexReader::open(target).unwrap();
        prop_assert_eq!(merged.max_doc() as usize, all.len());
        prop_assert_eq!(actual_postings(&merged), expected_postings(&all, &[]));
    }

    #[test]
    fn deleting_twice_equals_deleting_once(
        docs in arb_docs(12),
        picks in prop::collection::vec(any::<bool>(), 12),
    ) {
        let deleted: Vec<bool> = picks.iter().take(docs.len()).copied().collect();

        let once = build(&docs, config(3, 1000));
        let twice = build(&docs, config(3, 1000));
        for (storage, rounds) in [(&once, 1), (&twice, 2)] {
            let reader = IndexReader::open(Arc::clone(storage)).unwrap();
            for _ in 0..rounds {
                for (doc, &delete) in deleted.iter().enumerate() {
                    if delete {
                        reader.delete(doc as u32).unwrap();
                    }
                }
            }
            reader.close().unwrap();
        }

        let once = IndexReader::open(once).unwrap();
        let twice = IndexReader::open(twice).unwrap();
        let live = deleted.iter().filter(|d| !**d).count();
        prop_assert_eq!(once.num_docs() as usize, live);
        prop_assert_eq!(twice.num_docs() as usize, live);
        let expected = expected_postings(&docs, &deleted);
        prop_assert_eq!(actual_postings(&once), expected.clone());
        prop_assert_eq!(actual_postings(&twice), expected);
    }

    #[test]
    fn optimize_preserves_live_postings(
        docs in arb_docs(12),
        picks in prop::collection::vec(any::<bool>(), 12),
    ) {
        let deleted: Vec<bool> = picks.iter().take(docs.len()).copied().collect();
        let storage = build(&docs, config(2, 1000));
        let reader = IndexReader::open(Arc::clone(&storage)).unwrap();
        for (doc, &delete) in deleted.iter().enumerate() {
            if delete {
                reader.delete(doc as u32).unwrap();
            }
        }
        reader.close().unwrap();

        let mut writer = IndexWriter::open(Arc::clone(&storage), config(2, 1000)).unwrap();
        writer.optimize().unwrap();
        writer.close().unwrap();

        // Survivors are renumbered densely in their original order
        let survivors: Vec<Vec<String>> = docs
            .iter()
            .zip(&deleted)
            .filter(|(_, d)| !**d)
            .map(|(words, _)| words.clone())
            .collect();
        let reader = IndexReader::open(storage).unwrap();
        prop_assert_eq!(reader.max_doc() as usize, survivors.len());
        prop_assert!(reader.segment_readers().len() <= 1);
        prop_assert_eq!(actual_postings(&reader), expected_postings(&survivors, &[]));
    }
}
