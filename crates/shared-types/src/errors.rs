//! # Error Types
//!
//! Errors raised by the serialization collaborator.

use thiserror::Error;

/// Errors from encoding or decoding a payload for a given content type.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodecError {
    /// The content type is not one this codec understands.
    #[error("Unsupported content type: {0}")]
    UnsupportedContentType(String),

    /// The value could not be encoded.
    #[error("Failed to encode {content_type} payload: {reason}")]
    Encode {
        content_type: &'static str,
        reason: String,
    },

    /// The bytes could not be decoded into the requested type.
    #[error("Failed to decode {content_type} payload: {reason}")]
    Decode {
        content_type: &'static str,
        reason: String,
    },
}
