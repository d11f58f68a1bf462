//! Background housekeeping of index files.

pub mod deletion;
