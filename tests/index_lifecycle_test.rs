use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use tessera::lexical::index::inverted::SegmentInfos;
use tessera::storage::file::FileStorageConfig;
use tessera::storage::memory::MemoryStorage;
use tessera::{
    Document, FieldInfo, IndexOption, IndexReader, IndexWriter, IndexWriterConfig, OpenMode, Storage,
    StorageConfig, StorageFactory, StoreOption, Term, TermVectorOption, TesseraError,
};

fn memory() -> Arc<dyn Storage> {
    Arc::new(MemoryStorage::default())
}

fn config(max_buffered_docs: usize, merge_factor: u32) -> IndexWriterConfig {
    IndexWriterConfig {
        max_buffered_docs,
        merge_factor,
        ..IndexWriterConfig::default()
    }
}

fn index(storage: &Arc<dyn Storage>, config: IndexWriterConfig, texts: &[&str]) -> tessera::Result<()> {
    let mut writer = IndexWriter::open(Arc::clone(storage), config)?;
    for text in texts {
        writer.add_document(Document::new().with_field("f", *text))?;
    }
    writer.close()
}

/// (doc, positions) of every live document containing `field:text`.
fn postings(reader: &IndexReader, field: &str, text: &str) -> tessera::Result<Vec<(u32, Vec<u32>)>> {
    let mut cursor = reader.term_positions_for(&Term::new(field, text))?;
    let mut found = Vec::new();
    while cursor.next()? {
        let positions = (0..cursor.freq())
            .map(|_| cursor.next_position())
            .collect::<tessera::Result<Vec<u32>>>()?;
        found.push((cursor.doc(), positions));
    }
    Ok(found)
}

#[test]
fn test_delete_is_visible_after_reopen() -> tessera::Result<()> {
    // 1. Index three documents in one segment
    let storage = memory();
    index(&storage, IndexWriterConfig::default(), &["a b c", "a b", "a"])?;

    // 2. Every document has `a` at position 0
    let reader = IndexReader::open(Arc::clone(&storage))?;
    assert_eq!(reader.doc_freq(&Term::new("f", "a"))?, 3);
    assert_eq!(
        postings(&reader, "f", "a")?,
        vec![(0, vec![0]), (1, vec![0]), (2, vec![0])]
    );
    assert_eq!(postings(&reader, "f", "c")?, vec![(0, vec![2])]);

    // 3. Delete the middle document and commit through close
    reader.delete(1)?;
    assert!(reader.is_deleted(1));
    reader.close()?;

    // 4. A fresh reader sees the deletion
    let reader = IndexReader::open(Arc::clone(&storage))?;
    assert_eq!(reader.max_doc(), 3);
    assert_eq!(reader.num_docs(), 2);
    assert_eq!(reader.doc_freq(&Term::new("f", "a"))?, 2);
    let mut docs = reader.term_docs_for(&Term::new("f", "a"))?;
    let mut live = Vec::new();
    while docs.next()? {
        live.push(docs.doc());
    }
    assert_eq!(live, vec![0, 2]);
    assert!(matches!(reader.document(1), Err(TesseraError::InvalidArgument(_))));
    Ok(())
}

#[test]
fn test_tiered_merge_segment_counts() -> tessera::Result<()> {
    let texts = ["one", "two", "three", "four", "five"];

    let unmerged = memory();
    index(&unmerged, config(2, 1000), &texts)?;
    let reader = IndexReader::open(Arc::clone(&unmerged))?;
    assert_eq!(reader.segment_readers().len(), 3);

    let merged = memory();
    index(&merged, config(2, 2), &texts)?;
    let reader = IndexReader::open(Arc::clone(&merged))?;
    let counts: Vec<u32> = reader.segment_readers().iter().map(|s| s.max_doc()).collect();
    assert_eq!(counts, vec![4, 1]);

    // Both layouts answer identically
    let flat = IndexReader::open(unmerged)?;
    for text in texts {
        assert_eq!(postings(&reader, "f", text)?, postings(&flat, "f", text)?);
    }
    Ok(())
}

#[test]
fn test_deletion_idempotence_and_undelete() -> tessera::Result<()> {
    let storage = memory();
    index(&storage, config(2, 1000), &["x", "x y", "y", "x"])?;

    let reader = IndexReader::open(Arc::clone(&storage))?;
    reader.delete(1)?;
    reader.delete(1)?;
    assert_eq!(reader.delete_docs_with_term(&Term::new("f", "x"))?, 2);
    assert_eq!(reader.delete_docs_with_term(&Term::new("f", "x"))?, 0);
    assert_eq!(reader.num_docs(), 1);
    reader.close()?;

    let reader = IndexReader::open(Arc::clone(&storage))?;
    assert_eq!(reader.num_docs(), 1);
    reader.undelete_all()?;
    assert_eq!(reader.num_docs(), 4);
    reader.close()?;

    let reader = IndexReader::open(storage)?;
    assert_eq!(reader.num_docs(), 4);
    assert!(!reader.has_deletions());
    assert_eq!(reader.doc_freq(&Term::new("f", "x"))?, 3);
    Ok(())
}

#[test]
fn test_unreadable_generation_falls_back() -> tessera::Result<()> {
    let memory = Arc::new(MemoryStorage::default());
    let storage: Arc<dyn Storage> = memory.clone();

    // 1. Commit one document and keep a copy of that descriptor
    let mut writer = IndexWriter::open(Arc::clone(&storage), IndexWriterConfig::default())?;
    writer.add_document(Document::new().with_field("f", "first"))?;
    writer.commit()?;
    let mut saved = Vec::new();
    storage.open_input("segments_2")?.read_to_end(&mut saved)?;

    // 2. Commit a second document; the old descriptor is swept
    writer.add_document(Document::new().with_field("f", "second"))?;
    writer.close()?;
    assert!(!storage.file_exists("segments_2"));

    // 3. Restore the old descriptor and damage the current one
    memory.put_file("segments_2", saved);
    memory.put_file("segments_3", b"not a descriptor".to_vec());

    let reader = IndexReader::open(storage)?;
    assert_eq!(reader.max_doc(), 1);
    assert_eq!(reader.doc_freq(&Term::new("f", "first"))?, 1);
    assert_eq!(reader.doc_freq(&Term::new("f", "second"))?, 0);
    Ok(())
}

#[test]
fn test_stale_reader_cannot_mutate() -> tessera::Result<()> {
    let storage = memory();
    index(&storage, IndexWriterConfig::default(), &["old"])?;

    let reader = IndexReader::open(Arc::clone(&storage))?;
    assert!(reader.is_latest()?);

    let append = IndexWriterConfig {
        open_mode: OpenMode::Append,
        ..IndexWriterConfig::default()
    };
    index(&storage, append, &["new"])?;

    assert!(!reader.is_latest()?);
    let err = reader.delete(0).unwrap_err();
    assert!(matches!(err, TesseraError::StaleReader { .. }));
    // Reading still works on the old snapshot
    assert_eq!(reader.max_doc(), 1);
    Ok(())
}

#[test]
fn test_reader_mutation_holds_write_lock() -> tessera::Result<()> {
    let storage = memory();
    index(&storage, IndexWriterConfig::default(), &["a", "b"])?;

    let reader = IndexReader::open(Arc::clone(&storage))?;
    reader.delete(0)?;

    let impatient = IndexWriterConfig {
        write_lock_timeout: Duration::from_millis(20),
        ..IndexWriterConfig::default()
    };
    let err = IndexWriter::open(Arc::clone(&storage), impatient.clone()).unwrap_err();
    assert!(matches!(err, TesseraError::Lock(_)));

    reader.commit()?;
    let mut writer = IndexWriter::open(storage, impatient)?;
    assert_eq!(writer.doc_count(), 2);
    writer.close()
}

#[test]
fn test_reference_counting() -> tessera::Result<()> {
    let storage = memory();
    index(&storage, IndexWriterConfig::default(), &["a", "b", "c"])?;

    let reader = IndexReader::open(Arc::clone(&storage))?;
    reader.inc_ref()?;
    assert_eq!(reader.ref_count(), 2);
    reader.delete(2)?;

    reader.dec_ref()?;
    assert!(!reader.is_closed());
    assert_eq!(reader.max_doc(), 3);

    // The last release commits the pending deletion
    reader.close()?;
    assert!(reader.is_closed());
    assert!(matches!(reader.document(0), Err(TesseraError::Closed(_))));
    reader.close()?;

    let reader = IndexReader::open(storage)?;
    assert_eq!(reader.num_docs(), 2);
    Ok(())
}

#[test]
fn test_file_storage_round_trip() -> tessera::Result<()> {
    // 1. Setup Storage
    let temp_dir = TempDir::new().unwrap();
    let storage = StorageFactory::create(StorageConfig::File(FileStorageConfig::new(temp_dir.path())))?;

    // 2. Index with explicit field options
    let mut writer = IndexWriter::open(Arc::clone(&storage), IndexWriterConfig::default())?;
    writer.add_field(FieldInfo::new(
        "id",
        StoreOption::Yes,
        IndexOption::Untokenized,
        TermVectorOption::No,
    )?)?;
    writer.add_field(FieldInfo::new(
        "body",
        StoreOption::Compressed,
        IndexOption::Yes,
        TermVectorOption::WithPositionsOffsets,
    )?)?;
    let body = "the quick brown fox jumps over the lazy dog";
    writer.add_document(
        Document::new()
            .with_field("id", "doc-1")
            .with_field("body", body)
            .with_field("raw", vec![0u8, 1, 2, 255]),
    )?;
    writer.close()?;
    drop(writer);

    // 3. Reopen from a fresh storage handle
    let storage = StorageFactory::create(StorageConfig::File(FileStorageConfig::new(temp_dir.path())))?;
    let reader = IndexReader::open(Arc::clone(&storage))?;
    let doc = reader.document(0)?;
    assert_eq!(doc.get("id").and_then(|v| v.as_text()), Some("doc-1"));
    assert_eq!(doc.get("body").and_then(|v| v.as_text()), Some(body));
    assert_eq!(doc.get("raw").map(|v| v.as_bytes()), Some(&[0u8, 1, 2, 255][..]));

    // 4. Lazy loading only decodes what is asked for
    let lazy = reader.lazy_document(0)?;
    let field = lazy.field("body").expect("body is stored");
    assert!(!field.is_loaded());
    assert_eq!(field.text()?, body);

    // 5. Term vectors keep positions and offsets
    let vector = reader.term_vector(0, "body")?.expect("body has a term vector");
    let the = vector.get("the").expect("the is a term");
    assert_eq!(the.freq, 2);
    assert_eq!(the.positions, vec![0, 6]);
    assert_eq!(the.offsets[1].start, 31);
    assert_eq!(reader.doc_freq(&Term::new("id", "doc-1"))?, 1);
    Ok(())
}

#[test]
fn test_norms_reflect_length_and_updates() -> tessera::Result<()> {
    let storage = memory();
    index(&storage, IndexWriterConfig::default(), &["a b c d", "a"])?;

    let reader = IndexReader::open(Arc::clone(&storage))?;
    let norms = reader.norms("f")?.expect("f has norms");
    assert_eq!(norms.len(), 2);
    assert!(norms[0] < norms[1]);

    reader.set_norm(0, "f", 7)?;
    reader.close()?;

    let reader = IndexReader::open(storage)?;
    let norms = reader.norms("f")?.expect("f has norms");
    assert_eq!(norms[0], 7);
    Ok(())
}

#[test]
fn test_add_indexes_matches_fields_by_name() -> tessera::Result<()> {
    // 1. Two sources with different field numbering
    let left = memory();
    let mut writer = IndexWriter::open(Arc::clone(&left), IndexWriterConfig::default())?;
    writer.add_document(Document::new().with_field("title", "left one").with_field("body", "alpha"))?;
    writer.add_document(Document::new().with_field("title", "left two").with_field("body", "beta"))?;
    writer.close()?;

    let right = memory();
    let mut writer = IndexWriter::open(Arc::clone(&right), IndexWriterConfig::default())?;
    writer.add_document(Document::new().with_field("tag", "gone").with_field("body", "alpha"))?;
    writer.add_document(Document::new().with_field("tag", "kept").with_field("body", "gamma"))?;
    writer.close()?;

    // 2. Import both into a target that already has a document
    let target = memory();
    let mut writer = IndexWriter::open(Arc::clone(&target), IndexWriterConfig::default())?;
    writer.add_document(Document::new().with_field("body", "alpha own"))?;

    let left_reader = IndexReader::open(left)?;
    let right_reader = IndexReader::open(right)?;
    right_reader.delete(0)?;
    writer.add_indexes(&[&left_reader, &right_reader])?;
    assert_eq!(writer.segment_count(), 1);
    writer.close()?;

    // 3. Own documents first, then the sources in order, minus deletions
    let reader = IndexReader::open(target)?;
    assert_eq!(reader.max_doc(), 4);
    assert_eq!(reader.doc_freq(&Term::new("body", "alpha"))?, 2);
    let docs: Vec<u32> = postings(&reader, "body", "alpha")?.into_iter().map(|(d, _)| d).collect();
    assert_eq!(docs, vec![0, 1]);
    assert_eq!(
        reader.document(2)?.get("title").and_then(|v| v.as_text()),
        Some("left two")
    );
    assert_eq!(reader.document(3)?.get("tag").and_then(|v| v.as_text()), Some("kept"));
    assert_eq!(reader.doc_freq(&Term::new("tag", "gone"))?, 0);
    Ok(())
}

#[test]
fn test_multi_reader_over_separate_indexes() -> tessera::Result<()> {
    let first = memory();
    index(&first, IndexWriterConfig::default(), &["shared one", "shared two"])?;
    let second = memory();
    let mut writer = IndexWriter::open(Arc::clone(&second), IndexWriterConfig::default())?;
    writer.add_document(Document::new().with_field("other", "x").with_field("f", "shared three"))?;
    writer.close()?;

    let reader = IndexReader::multi(vec![IndexReader::open(first)?, IndexReader::open(second)?])?;
    assert_eq!(reader.max_doc(), 3);
    assert_eq!(reader.doc_freq(&Term::new("f", "shared"))?, 3);
    assert_eq!(
        postings(&reader, "f", "three")?,
        vec![(2, vec![1])]
    );
    assert_eq!(
        reader.document(2)?.get("other").and_then(|v| v.as_text()),
        Some("x")
    );

    let mut terms = reader.terms("f")?;
    let mut seen = Vec::new();
    while terms.next()? {
        seen.push((terms.term().to_string(), terms.doc_freq()));
    }
    assert_eq!(
        seen,
        vec![
            ("one".to_string(), 1),
            ("shared".to_string(), 3),
            ("three".to_string(), 1),
            ("two".to_string(), 1)
        ]
    );

    let norms = reader.norms("other")?.expect("other has norms");
    assert_eq!(norms[0], 0);
    assert_ne!(norms[2], 0);
    Ok(())
}

#[test]
fn test_create_mode_replaces_index() -> tessera::Result<()> {
    let storage = memory();
    index(&storage, IndexWriterConfig::default(), &["before"])?;
    let old = IndexReader::open(Arc::clone(&storage))?;
    let old_version = old.version();

    let create = IndexWriterConfig {
        open_mode: OpenMode::Create,
        ..IndexWriterConfig::default()
    };
    index(&storage, create, &["after"])?;

    let infos = SegmentInfos::read_current(storage.as_ref())?;
    assert!(infos.version > old_version);
    assert_eq!(infos.segments.len(), 1);
    assert_ne!(infos.segments[0].name, "_0");

    let reader = IndexReader::open(storage)?;
    assert_eq!(reader.max_doc(), 1);
    assert_eq!(reader.doc_freq(&Term::new("f", "before"))?, 0);
    // The old snapshot keeps serving its documents
    assert_eq!(old.doc_freq(&Term::new("f", "before"))?, 1);
    Ok(())
}

#[test]
fn test_partially_applied_delete_is_committed() -> tessera::Result<()> {
    let memory = Arc::new(MemoryStorage::default());
    let storage: Arc<dyn Storage> = memory.clone();

    // 1. Two single-document segments kept as separate files
    let separate = IndexWriterConfig {
        use_compound_file: false,
        ..config(1, 1000)
    };
    index(&storage, separate, &["shared one", "shared two"])?;

    // 2. Empty the postings of the second segment
    memory.put_file("_1.frq", Vec::new());
    let reader = IndexReader::open(Arc::clone(&storage))?;
    assert_eq!(reader.segment_readers().len(), 2);

    // 3. The delete reaches the first segment before failing on the second
    assert!(reader.delete_docs_with_term(&Term::new("f", "shared")).is_err());
    assert!(reader.is_deleted(0));
    assert!(!reader.is_deleted(1));
    reader.close()?;

    // 4. What was applied is committed
    let reader = IndexReader::open(storage)?;
    assert!(reader.is_deleted(0));
    assert_eq!(reader.num_docs(), 1);
    Ok(())
}

#[test]
fn test_concurrent_lookups_on_shared_reader() -> tessera::Result<()> {
    let storage = memory();
    let texts: Vec<String> = (0..200)
        .map(|i| format!("w{} common w{}", i % 17, 20 + i % 5))
        .collect();
    let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
    let small_index = IndexWriterConfig {
        term_index_interval: 4,
        ..config(50, 1000)
    };
    index(&storage, small_index, &refs)?;

    let reader = IndexReader::open(storage)?;
    assert_eq!(reader.segment_readers().len(), 4);

    // Every thread races on the lazily loaded term index and shared cursors
    std::thread::scope(|scope| {
        let handles: Vec<_> = (0..8usize)
            .map(|t| {
                let reader = &reader;
                let texts = &texts;
                scope.spawn(move || -> tessera::Result<()> {
                    for round in 0..40 {
                        let word = format!("w{}", (t * 7 + round) % 25);
                        let expected = texts
                            .iter()
                            .filter(|text| text.split(' ').any(|w| w == word))
                            .count() as u32;
                        assert_eq!(reader.doc_freq(&Term::new("f", word.as_str()))?, expected);

                        let doc = (t * 31 + round * 13) % texts.len();
                        let stored = reader.document(doc as u32)?;
                        assert_eq!(
                            stored.get("f").and_then(|v| v.as_text()),
                            Some(texts[doc].as_str())
                        );
                    }
                    Ok(())
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("lookup thread panicked")?;
        }
        Ok(())
    })
}
