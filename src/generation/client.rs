//! Generation client boundary
//!
//! A client sends exactly one request per call. It never retries on its own;
//! every failure is reported as a [`TransportError`] so the retrying layer can
//! treat all of them uniformly.

use super::request::GenerationRequest;
use async_trait::async_trait;
use std::time::Duration;

/// Raw payload returned by the generation service
#[derive(Debug, Clone, PartialEq)]
pub enum RawPayload {
    /// Free-form text output
    Text(String),
    /// Output the service already returned as structured JSON
    Structured(serde_json::Value),
}

impl RawPayload {
    /// Text form of the payload, used for diagnostics and plain validators
    pub fn to_text(&self) -> String {
        match self {
            RawPayload::Text(text) => text.clone(),
            RawPayload::Structured(value) => value.to_string(),
        }
    }

    /// Whether the payload carries no usable content
    pub fn is_empty(&self) -> bool {
        match self {
            RawPayload::Text(text) => text.trim().is_empty(),
            RawPayload::Structured(value) => value.is_null(),
        }
    }
}

/// Transport-level failure signal from a generation client
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("generation service unreachable: {0}")]
    Unreachable(String),

    #[error("generation service timed out after {0:?}")]
    Timeout(Duration),

    #[error("generation service returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("could not decode generation response: {0}")]
    Decode(String),

    #[error("generation client misconfigured: {0}")]
    Misconfigured(String),
}

impl TransportError {
    /// Whether the failure is one a later attempt can plausibly fix
    pub fn is_transient(&self) -> bool {
        match self {
            TransportError::Unreachable(_) | TransportError::Timeout(_) => true,
            TransportError::Status { status, .. } => *status == 429 || *status >= 500,
            TransportError::Decode(_) => true,
            TransportError::Misconfigured(_) => false,
        }
    }
}

/// One-shot access to the external generation service
#[async_trait]
pub trait GenerationClient: Send + Sync {
    /// Send a single request and return the raw payload
    async fn complete(&self, request: &GenerationRequest) -> Result<RawPayload, TransportError>;
}
