//! Resilient access to the external generation service
//!
//! - `client` - one-shot client boundary and transport failure signal
//! - `http` - OpenAI-compatible completions client
//! - `mock` - scripted client for tests
//! - `schema` - structured-output parsing and coercion
//! - `handler` - per-call-site validator/transformer pairs
//! - `retry` - the bounded-retry generator every call site goes through

pub mod backoff;
pub mod client;
pub mod handler;
pub mod http;
pub mod mock;
pub mod request;
pub mod retry;
pub mod schema;

#[cfg(test)]
mod retry_tests;

pub use backoff::{BackoffConfig, BackoffStrategy};
pub use client::{GenerationClient, RawPayload, TransportError};
pub use handler::{
    handler, FnHandler, GenerationOutput, IntegerInRange, NonEmptyText, OneOf, OutputHandler,
    RequiredFields, TokenCount,
};
pub use http::HttpGenerationClient;
pub use mock::MockGenerationClient;
pub use request::{FieldKind, GenerationParams, GenerationRequest, SchemaDescriptor, SchemaField};
pub use retry::{
    AttemptFailure, CallSite, GenerationResult, GenerationStats, GeneratorOptions,
    RejectionReason, RetryingGenerator,
};
pub use schema::{SchemaAdapter, SchemaError, StructuredFields};
