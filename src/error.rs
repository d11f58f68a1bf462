//! Error types for Tessera.
//!
//! Every public operation returns [`Result`]. Errors raised while discovering the
//! current commit generation are classified by [`TesseraError::is_transient`] and
//! retried; everything else unwinds to the caller.

use thiserror::Error;

/// Main error type for Tessera operations.
#[derive(Error, Debug)]
pub enum TesseraError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Illegal state: {0}")]
    State(String),

    #[error("Stale reader: index was modified after this reader was opened (version {opened}, now {current})")]
    StaleReader { opened: u64, current: u64 },

    #[error("Lock error: {0}")]
    Lock(String),

    #[error("Index corrupted: {0}")]
    Corrupt(String),

    #[error("Analysis error: {0}")]
    Analysis(String),

    #[error("{0} is closed")]
    Closed(&'static str),
}

/// Result type alias for Tessera operations.
pub type Result<T> = std::result::Result<T, TesseraError>;

impl TesseraError {
    pub fn not_found<S: Into<String>>(name: S) -> Self {
        TesseraError::NotFound(name.into())
    }

    pub fn invalid_argument<S: Into<String>>(msg: S) -> Self {
        TesseraError::InvalidArgument(msg.into())
    }

    pub fn state<S: Into<String>>(msg: S) -> Self {
        TesseraError::State(msg.into())
    }

    pub fn lock<S: Into<String>>(msg: S) -> Self {
        TesseraError::Lock(msg.into())
    }

    /// Index format or consistency violation. Never repaired automatically.
    pub fn corrupt<S: Into<String>>(msg: S) -> Self {
        TesseraError::Corrupt(msg.into())
    }

    pub fn analysis<S: Into<String>>(msg: S) -> Self {
        TesseraError::Analysis(msg.into())
    }

    /// Whether a failure while loading a commit may succeed on another attempt
    /// (for instance because a writer was committing concurrently).
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TesseraError::Io(_) | TesseraError::NotFound(_) | TesseraError::Corrupt(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TesseraError::not_found("segments_3");
        assert_eq!(err.to_string(), "File not found: segments_3");

        let err = TesseraError::StaleReader {
            opened: 2,
            current: 5,
        };
        assert!(err.to_string().contains("version 2, now 5"));
    }

    #[test]
    fn test_transient_errors() {
        let eof = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof");
        assert!(TesseraError::from(eof).is_transient());
        assert!(TesseraError::not_found("x").is_transient());
        assert!(TesseraError::corrupt("bad checksum").is_transient());
        assert!(!TesseraError::lock("write.lock").is_transient());
        assert!(!TesseraError::invalid_argument("x").is_transient());
    }
}
