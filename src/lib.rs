//! # Tessera
//!
//! An embeddable, segment-based full-text indexing engine.
//!
//! ## Features
//!
//! - Immutable segments with a sparse term index and skip-listed postings
//! - Compressed stored fields and per-document term vectors
//! - Deletions and norm updates written as generation files
//! - Crash-safe generation commits with reference-counted readers
//! - Tiered background-free merging, optimize and index import
//! - Pluggable storage backends and analyzers
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use tessera::{Document, IndexReader, IndexWriter, IndexWriterConfig, Storage, Term};
//! use tessera::storage::memory::MemoryStorage;
//!
//! let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::default());
//! let mut writer = IndexWriter::open(Arc::clone(&storage), IndexWriterConfig::default()).unwrap();
//! writer
//!     .add_document(Document::new().with_field("title", "The quick brown fox"))
//!     .unwrap();
//! writer.close().unwrap();
//!
//! let reader = IndexReader::open(storage).unwrap();
//! assert_eq!(reader.doc_freq(&Term::new("title", "quick")).unwrap(), 1);
//! ```

pub mod analysis;
mod error;
pub mod lexical;
pub mod maintenance;
pub mod storage;
pub mod util;

// Re-exports for the public API
pub use analysis::{Analyzer, StandardAnalyzer};
pub use error::{Result, TesseraError};
pub use lexical::core::document::{DocField, Document, FieldValue};
pub use lexical::core::field::{FieldDefaults, FieldInfo, FieldInfos, IndexOption, StoreOption, TermVectorOption};
pub use lexical::core::similarity::{DefaultSimilarity, Similarity};
pub use lexical::core::term::Term;
pub use lexical::index::inverted::{IndexReader, IndexWriter, IndexWriterConfig, OpenMode};
pub use storage::{Storage, StorageConfig, StorageFactory};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
