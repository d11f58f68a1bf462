//! Lexical (inverted) indexing.
//!
//! [`core`] holds the data model: documents, the field catalog, terms and
//! similarity. [`index`] holds the on-disk segment machinery: writer, readers,
//! merger and the file codecs underneath them.

pub mod core;
pub mod index;
