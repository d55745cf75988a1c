//! Error types for the confdialog wire layer.
//!
//! All errors are structured, testable, and provide actionable information.

use thiserror::Error;

/// Errors raised while encoding or decoding protocol data.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Payload exceeds maximum allowed size
    #[error("payload too large: {size} bytes exceeds maximum {max}")]
    PayloadTooLarge {
        /// Actual payload size
        size: usize,
        /// Maximum allowed size
        max: usize,
    },

    // CBOR errors (wrapped for testability)
    /// Failed to encode a wire message as CBOR
    #[error("failed to encode CBOR: {0}")]
    CborEncode(String),

    /// Failed to decode a wire message from CBOR
    #[error("failed to decode CBOR: {0}")]
    CborDecode(String),

    // JSON errors (lifecycle plaintext)
    /// Failed to encode a lifecycle message as JSON
    #[error("failed to encode JSON: {0}")]
    JsonEncode(String),

    /// Failed to decode a lifecycle message from JSON
    #[error("failed to decode JSON: {0}")]
    JsonDecode(String),

    /// Decrypted plaintext was not valid UTF-8
    #[error("invalid UTF-8 at byte {valid_up_to}")]
    InvalidUtf8 {
        /// Length of the valid prefix
        valid_up_to: usize,
    },

    /// A field had the wrong length
    #[error("invalid {field} length: expected {expected} bytes, got {actual}")]
    InvalidLength {
        /// Field name
        field: &'static str,
        /// Expected length
        expected: usize,
        /// Actual length
        actual: usize,
    },

    /// Schema tree is structurally unusable
    #[error("invalid schema at '{path}': {reason}")]
    InvalidSchema {
        /// Dotted path of the offending property
        path: String,
        /// What is wrong with it
        reason: String,
    },
}

/// Result type alias for protocol operations
pub type Result<T> = std::result::Result<T, ProtocolError>;
