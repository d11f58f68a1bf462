//! Text analysis consumed at flush time.
//!
//! The indexing core only needs one thing from analysis: given a field name and
//! its text, a sequence of [`Token`]s carrying the term text, byte offsets and a
//! position increment. Anything implementing [`Analyzer`] can be plugged into
//! the [`IndexWriter`](crate::lexical::index::inverted::IndexWriter).
//!
//! # Examples
//!
//! ```
//! use tessera::analysis::{Analyzer, StandardAnalyzer};
//!
//! let analyzer = StandardAnalyzer::new();
//! let tokens: Vec<_> = analyzer.analyze("body", "Hello, World!").unwrap().collect();
//! assert_eq!(tokens[0].text, "hello");
//! assert_eq!(tokens[1].start_offset, 7);
//! ```

pub mod analyzer;
pub mod token;

pub use analyzer::{Analyzer, PerFieldAnalyzer, StandardAnalyzer, WhitespaceAnalyzer};
pub use token::{Token, TokenStream};
