//! Error types for the quaver library.
//!
//! All fallible operations return [`Result`], whose error type is the
//! [`QuaverError`] enum.

use std::io;

use thiserror::Error;

/// The main error type for quaver operations.
#[derive(Error, Debug)]
pub enum QuaverError {
    /// There is no index in the directory.
    #[error("index not found: {0}")]
    NotFound(String),

    /// On-disk data failed a checksum or format check.
    #[error("corrupt index data: {0}")]
    Corrupt(String),

    /// I/O errors from the underlying directory.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The writer lock is already held.
    #[error("index is locked: {0}")]
    Locked(String),

    /// A deadline elapsed before the operation could complete.
    #[error("operation timed out: {0}")]
    TimedOut(String),

    /// The index has been closed or was never opened.
    #[error("index is not open: {0}")]
    NotOpen(String),

    /// API misuse, e.g. inserting a document with no terms.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
}

/// Result type alias for operations that may fail with [`QuaverError`].
pub type Result<T> = std::result::Result<T, QuaverError>;

impl QuaverError {
    /// Create a new not-found error.
    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        QuaverError::NotFound(msg.into())
    }

    /// Create a new corruption error.
    pub fn corrupt<S: Into<String>>(msg: S) -> Self {
        QuaverError::Corrupt(msg.into())
    }

    /// Create a new lock error.
    pub fn locked<S: Into<String>>(msg: S) -> Self {
        QuaverError::Locked(msg.into())
    }

    /// Create a new timeout error.
    pub fn timed_out<S: Into<String>>(msg: S) -> Self {
        QuaverError::TimedOut(msg.into())
    }

    /// Create a new lifecycle error.
    pub fn not_open<S: Into<String>>(msg: S) -> Self {
        QuaverError::NotOpen(msg.into())
    }

    /// Create a new invalid-operation error.
    pub fn invalid_operation<S: Into<String>>(msg: S) -> Self {
        QuaverError::InvalidOperation(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_construction() {
        let error = QuaverError::corrupt("bad block header");
        assert_eq!(error.to_string(), "corrupt index data: bad block header");

        let error = QuaverError::locked("there already is an index writer open");
        assert_eq!(
            error.to_string(),
            "index is locked: there already is an index writer open"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let error = QuaverError::from(io_error);

        match error {
            QuaverError::Io(_) => {}
            _ => panic!("expected Io variant"),
        }
    }
}
