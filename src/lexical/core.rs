//! Core data types shared by the index writer, readers and merger.

pub mod document;
pub mod field;
pub mod similarity;
pub mod term;
