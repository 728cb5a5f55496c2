//! # Request/Reply Envelopes
//!
//! The message abstraction exchanged with the broker: a byte payload plus
//! `MessageProperties`. Request and reply envelopes are typed views over a
//! `BrokerMessage` that enforce the wire contract.
//!
//! ## Wire Properties
//!
//! | Property | Request | Success reply | Error reply |
//! |----------|---------|---------------|-------------|
//! | `message_id` | correlation key | fresh id | fresh id |
//! | `correlation_id` | correlation key | request's key | request's key |
//! | `reply_to` | reply destination | - | - |
//! | `content_type` | payload codec | request's codec | `text/plain` |
//! | `x-rpc-action` | handler action | - | - |
//! | `x-rpc-error` | - | - | `true` |
//! | `x-rpc-error-kind` | - | - | see `RemoteErrorKind` |

use crate::correlation::CorrelationKey;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Header names used by the RPC protocol.
pub mod headers {
    /// Routing/action identifier selecting the responder's handler.
    pub const ACTION: &str = "x-rpc-action";
    /// Present with value `true` on error replies.
    pub const ERROR: &str = "x-rpc-error";
    /// Machine readable category of an error reply.
    pub const ERROR_KIND: &str = "x-rpc-error-kind";
}

/// Content type of error reply payloads.
pub const ERROR_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

/// Broker-level properties carried next to a payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageProperties {
    pub message_id: Option<String>,
    pub correlation_id: Option<CorrelationKey>,
    pub reply_to: Option<String>,
    pub content_type: Option<String>,
    pub headers: BTreeMap<String, String>,
}

impl MessageProperties {
    /// Look up an application header.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// Builder-style header insertion.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// The action identifier of a request, if any.
    pub fn action(&self) -> Option<&str> {
        self.header(headers::ACTION).filter(|a| !a.is_empty())
    }

    /// Whether this message is flagged as an error reply.
    pub fn is_error_reply(&self) -> bool {
        self.header(headers::ERROR)
            .is_some_and(|v| v.eq_ignore_ascii_case("true"))
    }

    /// The key used to correlate this message.
    ///
    /// `correlation_id` wins; `message_id` is the fallback for peers that
    /// only set the latter. Empty values are treated as absent.
    pub fn correlation_key(&self) -> Option<CorrelationKey> {
        self.correlation_id
            .clone()
            .filter(|k| !k.is_empty())
            .or_else(|| {
                self.message_id
                    .as_deref()
                    .filter(|id| !id.is_empty())
                    .map(CorrelationKey::from)
            })
    }

    /// The reply destination of a request, if any.
    pub fn reply_destination(&self) -> Option<&str> {
        self.reply_to.as_deref().filter(|r| !r.is_empty())
    }
}

/// A payload plus its properties, as published to or delivered by a broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerMessage {
    pub payload: Bytes,
    pub properties: MessageProperties,
}

impl BrokerMessage {
    pub fn new(payload: impl Into<Bytes>, properties: MessageProperties) -> Self {
        Self {
            payload: payload.into(),
            properties,
        }
    }
}

/// Outgoing request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestEnvelope {
    pub correlation_key: CorrelationKey,
    pub action: String,
    pub reply_to: String,
    pub content_type: String,
    pub payload: Bytes,
}

impl RequestEnvelope {
    /// Convert into the broker representation.
    #[must_use]
    pub fn into_message(self) -> BrokerMessage {
        let properties = MessageProperties {
            message_id: Some(self.correlation_key.to_string()),
            correlation_id: Some(self.correlation_key),
            reply_to: Some(self.reply_to),
            content_type: Some(self.content_type),
            headers: BTreeMap::new(),
        }
        .with_header(headers::ACTION, self.action);

        BrokerMessage::new(self.payload, properties)
    }
}

/// Category of a remote failure, carried in `x-rpc-error-kind`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RemoteErrorKind {
    /// No handler registered for the request's action.
    HandlerNotFound,
    /// The request carried no action header.
    MissingAction,
    /// The request payload could not be decoded.
    Deserialization,
    /// The handler returned an error.
    HandlerFailed,
    /// The handler panicked.
    HandlerPanicked,
    /// The handler's response could not be encoded.
    Serialization,
}

impl RemoteErrorKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HandlerNotFound => "handler-not-found",
            Self::MissingAction => "missing-action",
            Self::Deserialization => "deserialization",
            Self::HandlerFailed => "handler-failed",
            Self::HandlerPanicked => "handler-panicked",
            Self::Serialization => "serialization",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "handler-not-found" => Some(Self::HandlerNotFound),
            "missing-action" => Some(Self::MissingAction),
            "deserialization" => Some(Self::Deserialization),
            "handler-failed" => Some(Self::HandlerFailed),
            "handler-panicked" => Some(Self::HandlerPanicked),
            "serialization" => Some(Self::Serialization),
            _ => None,
        }
    }

    /// Whether the request was rejected before reaching application logic.
    #[must_use]
    pub fn is_unroutable(&self) -> bool {
        matches!(
            self,
            Self::HandlerNotFound | Self::MissingAction | Self::Deserialization
        )
    }
}

impl fmt::Display for RemoteErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Body of a reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyOutcome {
    Success {
        content_type: Option<String>,
        payload: Bytes,
    },
    Error {
        kind: Option<RemoteErrorKind>,
        message: String,
    },
}

/// Incoming or outgoing reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyEnvelope {
    pub correlation_key: CorrelationKey,
    pub outcome: ReplyOutcome,
}

impl ReplyEnvelope {
    pub fn success(
        correlation_key: CorrelationKey,
        content_type: impl Into<String>,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self {
            correlation_key,
            outcome: ReplyOutcome::Success {
                content_type: Some(content_type.into()),
                payload: payload.into(),
            },
        }
    }

    pub fn error(
        correlation_key: CorrelationKey,
        kind: RemoteErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            correlation_key,
            outcome: ReplyOutcome::Error {
                kind: Some(kind),
                message: message.into(),
            },
        }
    }

    /// Convert into the broker representation.
    #[must_use]
    pub fn into_message(self) -> BrokerMessage {
        let mut properties = MessageProperties {
            message_id: Some(Uuid::now_v7().to_string()),
            correlation_id: Some(self.correlation_key),
            ..MessageProperties::default()
        };

        let payload = match self.outcome {
            ReplyOutcome::Success {
                content_type,
                payload,
            } => {
                properties.content_type = content_type;
                payload
            }
            ReplyOutcome::Error { kind, message } => {
                properties.content_type = Some(ERROR_CONTENT_TYPE.to_string());
                properties = properties.with_header(headers::ERROR, "true");
                if let Some(kind) = kind {
                    properties = properties.with_header(headers::ERROR_KIND, kind.as_str());
                }
                Bytes::from(message)
            }
        };

        BrokerMessage::new(payload, properties)
    }

    /// Interpret a delivered message as a reply.
    ///
    /// Returns `None` when the message carries no correlation key.
    pub fn from_message(message: BrokerMessage) -> Option<Self> {
        let BrokerMessage {
            payload,
            properties,
        } = message;
        let correlation_key = properties.correlation_key()?;

        let outcome = if properties.is_error_reply() {
            ReplyOutcome::Error {
                kind: properties
                    .header(headers::ERROR_KIND)
                    .and_then(RemoteErrorKind::parse),
                message: String::from_utf8_lossy(&payload).into_owned(),
            }
        } else {
            ReplyOutcome::Success {
                content_type: properties.content_type,
                payload,
            }
        };

        Some(Self {
            correlation_key,
            outcome,
        })
    }
}
