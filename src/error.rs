//! Error types for the hardscan detector.
//!
//! Every failure is returned as a `DetectorError` value; a failed run leaves
//! no state behind that could affect the next one.

use crate::rules::Feature;
use thiserror::Error;

/// Main error type for hardscan operations.
#[derive(Debug, Error)]
pub enum DetectorError {
    /// Structural parse failure; the input cannot be analyzed
    #[error("Malformed binary at offset {offset:#x}: {message}")]
    MalformedBinary { offset: u64, message: String },

    /// Recognized container that this detector does not handle
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Report requested without a successfully parsed image
    #[error("Incomplete analysis: {0}")]
    IncompleteAnalysis(String),

    /// Two rules registered for the same feature
    #[error("Duplicate rule for feature '{0}'")]
    DuplicateRule(Feature),

    /// Input file exceeds the configured size limit
    #[error("File too large: {found} bytes (limit {limit})")]
    FileTooLarge { limit: u64, found: u64 },

    /// Analysis did not finish within the caller's budget
    #[error("Analysis timeout after {millis}ms")]
    Timeout { millis: u64 },

    /// File I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl DetectorError {
    pub fn malformed(offset: u64, message: impl Into<String>) -> Self {
        Self::MalformedBinary {
            offset,
            message: message.into(),
        }
    }

    /// True when the input itself was rejected, as opposed to a caller or I/O fault.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            Self::MalformedBinary { .. } | Self::UnsupportedFormat(_) | Self::FileTooLarge { .. }
        )
    }
}

impl From<serde_json::Error> for DetectorError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result type alias for hardscan operations
pub type Result<T> = std::result::Result<T, DetectorError>;
