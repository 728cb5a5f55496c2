//! # Content-Type Codec
//!
//! The serialization collaborator: `serialize(value, content_type)` and
//! `deserialize(content_type, bytes)`. Content types are matched
//! case-insensitively and parameters after `;` are ignored, so
//! `Application/JSON; charset=utf-8` selects the JSON codec.

use crate::errors::CodecError;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Payload encodings understood by the codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentType {
    /// `application/json` via serde_json.
    Json,
    /// `application/x-bincode` via bincode.
    Bincode,
}

impl ContentType {
    pub const JSON: &'static str = "application/json";
    pub const BINCODE: &'static str = "application/x-bincode";

    /// Parse a content-type property value.
    pub fn parse(value: &str) -> Result<Self, CodecError> {
        let essence = value
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        match essence.as_str() {
            Self::JSON | "text/json" => Ok(Self::Json),
            Self::BINCODE | "application/bincode" => Ok(Self::Bincode),
            _ => Err(CodecError::UnsupportedContentType(value.to_string())),
        }
    }

    /// Canonical MIME string for this content type.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Json => Self::JSON,
            Self::Bincode => Self::BINCODE,
        }
    }

    /// Encode a value.
    pub fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Bytes, CodecError> {
        let encoded = match self {
            Self::Json => serde_json::to_vec(value).map_err(|e| e.to_string()),
            Self::Bincode => bincode::serialize(value).map_err(|e| e.to_string()),
        };

        encoded.map(Bytes::from).map_err(|reason| CodecError::Encode {
            content_type: self.as_str(),
            reason,
        })
    }

    /// Decode bytes into a value of type `T`.
    pub fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError> {
        let decoded = match self {
            Self::Json => serde_json::from_slice(bytes).map_err(|e| e.to_string()),
            Self::Bincode => bincode::deserialize(bytes).map_err(|e| e.to_string()),
        };

        decoded.map_err(|reason| CodecError::Decode {
            content_type: self.as_str(),
            reason,
        })
    }
}

impl Default for ContentType {
    fn default() -> Self {
        Self::Json
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentType {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Serialize `value` with the codec named by `content_type`.
pub fn serialize<T: Serialize + ?Sized>(value: &T, content_type: &str) -> Result<Bytes, CodecError> {
    ContentType::parse(content_type)?.encode(value)
}

/// Deserialize `bytes` into `T` with the codec named by `content_type`.
pub fn deserialize<T: DeserializeOwned>(content_type: &str, bytes: &[u8]) -> Result<T, CodecError> {
    ContentType::parse(content_type)?.decode(bytes)
}
