//! Error types for the container library.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for container operations.
#[derive(Error, Debug)]
pub enum Error {
    /// A path segment does not exist
    #[error("Name not found: {0}")]
    NameNotFound(String),

    /// A sibling with the same name already exists
    #[error("Duplicate name: {0}")]
    DuplicateName(String),

    /// Link resolution revisited a link that is still being resolved
    #[error("Link cycle detected while resolving {0}")]
    LinkCycle(String),

    /// The target file of an external link could not be opened
    #[error("External file unavailable: {file}: {reason}")]
    ExternalUnavailable { file: PathBuf, reason: String },

    /// Invalid magic bytes at start of file
    #[error("Invalid container file: bad magic bytes")]
    BadMagic,

    /// Unsupported file format version
    #[error("Unsupported container version: {0}")]
    UnsupportedVersion(u16),

    /// Fixed-length value longer than its declared length
    #[error("Value of {len} bytes exceeds declared length {max}")]
    ValueTooLong { len: usize, max: usize },

    /// Boolean stored as something other than 0 or 1
    #[error("Invalid boolean encoding: {0:#04x}")]
    InvalidBoolEncoding(u8),

    /// Allocation would overflow the addressable range
    #[error("Out of addressable space")]
    OutOfSpace,

    /// Resize not permitted for this layout or extent
    #[error("Unsupported resize: {0}")]
    UnsupportedResize(String),

    /// Data length or selection disagrees with the declared shape
    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    /// Name is empty or contains a path separator
    #[error("Invalid name: {0:?}")]
    InvalidName(String),

    /// Shape or chunk shape is not usable
    #[error("Invalid shape: {0}")]
    InvalidShape(String),

    /// Type mismatch when reading data
    #[error("Type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },

    /// Object is not a group
    #[error("Not a group: {0}")]
    NotAGroup(String),

    /// Object is not a dataset
    #[error("Not a dataset: {0}")]
    NotADataset(String),

    /// Container is closed and cannot be modified
    #[error("Container is closed and cannot be modified")]
    Frozen,

    /// File is truncated or corrupted
    #[error("Unexpected end of file at position {0}")]
    UnexpectedEof(u64),

    /// Invalid data structure in file
    #[error("Invalid file structure: {0}")]
    InvalidStructure(String),

    /// Memory mapping failed
    #[error("Memory mapping failed: {0}")]
    MmapFailed(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// UTF-8 conversion error
    #[error("Invalid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an "other" error from a string.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Create an invalid structure error.
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidStructure(msg.into())
    }

    /// Create a shape mismatch error.
    pub fn shape(msg: impl Into<String>) -> Self {
        Self::ShapeMismatch(msg.into())
    }
}

/// Result type alias for container operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let e = Error::BadMagic;
        assert!(e.to_string().contains("magic"));

        let e = Error::ValueTooLong { len: 7, max: 5 };
        assert!(e.to_string().contains('7'));
        assert!(e.to_string().contains('5'));

        let e = Error::InvalidBoolEncoding(2);
        assert!(e.to_string().contains("0x02"));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "test");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
