//! Segmented inverted index.
//!
//! An index is a set of immutable segments plus a deletion overlay, recorded
//! by a generation-numbered commit descriptor. Per segment:
//!
//! | file         | contents                                         |
//! |--------------|--------------------------------------------------|
//! | `.tis`       | term dictionary, front-coded                     |
//! | `.tix`       | sparse term index (every Nth term)               |
//! | `.tfx`       | per-field dictionary header                      |
//! | `.frq`       | doc deltas, frequencies and skip data            |
//! | `.prx`       | position deltas                                  |
//! | `.fdt`/`.fdx`| stored fields, term vectors and their doc index  |
//! | `.f<N>`      | norms of field N                                 |
//! | `_<g>.s<N>`  | norms of field N rewritten at generation g       |
//! | `_<g>.del`   | deletion bit vector of generation g              |
//! | `.cfs`       | compound container of the non-generational files |
//!
//! The directory also holds `segments_<gen>`, `segments.gen` and `write.lock`.

pub mod buffer;
pub mod fields_store;
pub mod merger;
pub mod norms;
pub mod posting;
pub mod reader;
pub mod segment;
pub mod term_dict;
pub mod writer;

pub use reader::IndexReader;
pub use segment::{SegmentInfo, SegmentInfos};
pub use writer::{IndexWriter, IndexWriterConfig, OpenMode};
