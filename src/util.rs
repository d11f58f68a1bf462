//! Shared utility modules used across Tessera components.

pub mod id;
pub mod varint;
