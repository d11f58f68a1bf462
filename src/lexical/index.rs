//! Index implementations.

pub mod inverted;
