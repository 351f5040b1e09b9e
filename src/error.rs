//! Error types for container parsing, editing, and rewriting
//!
//! One crate-level enum covers the whole load/edit/validate/save cycle.
//! Validation findings are not errors: they are collected into a
//! [`ValidationReport`](crate::modelspec::ValidationReport) and returned to
//! the caller, since a file can be structurally valid while failing the
//! field specification.

use thiserror::Error;

use crate::scan::DuplicateKey;

/// Error type for all rotular operations
#[derive(Debug, Error)]
pub enum RotularError {
    /// Structural damage: truncated file, bad length prefix, invalid UTF-8,
    /// malformed header JSON, or a non-string metadata value
    #[error("Format error: {reason}")]
    FormatError {
        /// What was malformed and where
        reason: String,
    },

    /// Tensor byte ranges that are inverted, out of range, or overlapping
    #[error("Corrupt offsets for tensor '{tensor}': {reason}")]
    CorruptOffsets {
        /// Name of the offending tensor descriptor
        tensor: String,
        /// Which geometry rule was violated
        reason: String,
    },

    /// Repeated JSON keys found in the raw header bytes under the fatal
    /// duplicate policy
    #[error("Duplicate header keys: {}", format_duplicates(keys))]
    DuplicateKeys {
        /// Every repeated key with its occurrence count, in document order
        keys: Vec<DuplicateKey>,
    },

    /// Rejected metadata key (empty or all-whitespace)
    #[error("Invalid metadata key: {reason}")]
    InvalidKey {
        /// Why the key was rejected
        reason: String,
    },

    /// Metadata key absent from the map
    #[error("Metadata key not found: '{key}'")]
    NotFound {
        /// The key that was requested
        key: String,
    },

    /// Read-side filesystem failure
    #[error("IO error: {message}")]
    IoError {
        /// Underlying failure description
        message: String,
    },

    /// Save-time failure; the destination is untouched when this is returned
    #[error("Write error for '{path}': {message}")]
    WriteError {
        /// Destination path of the failed save
        path: String,
        /// Underlying failure description
        message: String,
    },
}

impl From<std::io::Error> for RotularError {
    fn from(err: std::io::Error) -> Self {
        RotularError::IoError {
            message: err.to_string(),
        }
    }
}

fn format_duplicates(keys: &[DuplicateKey]) -> String {
    let parts: Vec<String> = keys.iter().map(ToString::to_string).collect();
    parts.join(", ")
}

/// Result type alias for rotular operations
pub type Result<T> = std::result::Result<T, RotularError>;
