//! Bounded-retry generation with validation and fail-safe fallback
//!
//! [`RetryingGenerator`] wraps every call to the generation service. Each
//! attempt goes through the same pipeline:
//!
//! 1. client call (transport failure or empty output rejects the attempt)
//! 2. schema parsing for structured requests (parse failure rejects)
//! 3. the call site's validator (semantic rejection)
//! 4. the call site's transformer (a failing transform rejects)
//!
//! The first attempt to clear all four stages wins and no further calls are
//! made. When the budget runs out, the caller's fail-safe value is returned.
//! Nothing raised below this layer ever reaches the caller.

use super::backoff::BackoffConfig;
use super::client::{GenerationClient, RawPayload};
use super::handler::{GenerationOutput, OutputHandler};
use super::request::{GenerationParams, GenerationRequest, SchemaDescriptor};
use super::schema::SchemaAdapter;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Why a single attempt was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    /// Client unreachable or erroring
    Transport,
    /// Client answered with nothing usable
    Empty,
    /// Structured output could not be parsed into the declared shape
    Schema,
    /// Well-formed output rejected by the call site's validator
    Validation,
    /// Transformer failed on validated output
    Transform,
}

impl RejectionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectionReason::Transport => "transport",
            RejectionReason::Empty => "empty",
            RejectionReason::Schema => "schema",
            RejectionReason::Validation => "validation",
            RejectionReason::Transform => "transform",
        }
    }
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Diagnostic record of one rejected attempt
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttemptFailure {
    pub attempt: u32,
    pub reason: RejectionReason,
    pub detail: String,
}

/// Outcome of a generation call
#[derive(Debug, Clone)]
pub struct GenerationResult<T> {
    /// Transformed output on success, the caller's fail-safe otherwise
    pub value: T,
    pub success: bool,
    /// Attempts actually made (0 only when the budget was 0)
    pub attempts: u32,
    /// Last raw output received, if any attempt got that far
    pub last_raw: Option<String>,
    pub prompt: String,
    pub failures: Vec<AttemptFailure>,
}

impl<T> GenerationResult<T> {
    pub fn into_value(self) -> T {
        self.value
    }

    pub fn is_fail_safe(&self) -> bool {
        !self.success
    }

    /// Number of rejected attempts with the given reason
    pub fn count(&self, reason: RejectionReason) -> usize {
        self.failures.iter().filter(|f| f.reason == reason).count()
    }
}

/// Aggregate counters across every call made through one generator
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GenerationStats {
    pub calls: u64,
    pub attempts: u64,
    pub successes: u64,
    pub fail_safes: u64,
    pub transport_failures: u64,
    pub empty_outputs: u64,
    pub schema_failures: u64,
    pub validation_failures: u64,
    pub transform_failures: u64,
}

impl GenerationStats {
    fn record_rejection(&mut self, reason: RejectionReason) {
        self.attempts += 1;
        match reason {
            RejectionReason::Transport => self.transport_failures += 1,
            RejectionReason::Empty => self.empty_outputs += 1,
            RejectionReason::Schema => self.schema_failures += 1,
            RejectionReason::Validation => self.validation_failures += 1,
            RejectionReason::Transform => self.transform_failures += 1,
        }
    }

    fn record_success(&mut self) {
        self.calls += 1;
        self.attempts += 1;
        self.successes += 1;
    }

    fn record_fail_safe(&mut self) {
        self.calls += 1;
        self.fail_safes += 1;
    }

    /// Fraction of calls that ended in the fail-safe
    pub fn fail_safe_ratio(&self) -> f64 {
        if self.calls == 0 {
            0.0
        } else {
            self.fail_safes as f64 / self.calls as f64
        }
    }
}

/// Construction-time options for a generator
#[derive(Debug, Clone, Default)]
pub struct GeneratorOptions {
    pub backoff: BackoffConfig,
    /// Log prompts and raw outputs of rejected attempts at info level
    pub verbose: bool,
}

/// Retrying front end to a generation client
#[derive(Clone)]
pub struct RetryingGenerator {
    client: Arc<dyn GenerationClient>,
    options: GeneratorOptions,
    stats: Arc<RwLock<GenerationStats>>,
}

struct Rejection {
    reason: RejectionReason,
    detail: String,
}

impl Rejection {
    fn new(reason: RejectionReason, detail: impl Into<String>) -> Self {
        Self {
            reason,
            detail: detail.into(),
        }
    }
}

impl RetryingGenerator {
    pub fn new(client: Arc<dyn GenerationClient>, options: GeneratorOptions) -> Self {
        Self {
            client,
            options,
            stats: Arc::new(RwLock::new(GenerationStats::default())),
        }
    }

    /// Generate a value, retrying up to `max_attempts` times
    pub async fn generate<T, H>(
        &self,
        request: &GenerationRequest,
        handler: &H,
        fail_safe: T,
        max_attempts: u32,
    ) -> GenerationResult<T>
    where
        H: OutputHandler<T> + ?Sized,
    {
        let mut failures = Vec::new();
        let mut last_raw = None;

        for attempt in 1..=max_attempts {
            let (raw, outcome) = self.attempt(request, handler).await;
            if raw.is_some() {
                last_raw = raw;
            }

            match outcome {
                Ok(value) => {
                    self.stats.write().await.record_success();
                    debug!("Generation accepted on attempt {}/{}", attempt, max_attempts);
                    return GenerationResult {
                        value,
                        success: true,
                        attempts: attempt,
                        last_raw,
                        prompt: request.prompt.clone(),
                        failures,
                    };
                }
                Err(rejection) => {
                    self.stats.write().await.record_rejection(rejection.reason);
                    self.log_rejection(request, attempt, max_attempts, &rejection, last_raw.as_deref());
                    failures.push(AttemptFailure {
                        attempt,
                        reason: rejection.reason,
                        detail: rejection.detail,
                    });

                    if attempt < max_attempts {
                        let delay = self.options.backoff.delay_after(attempt);
                        if !delay.is_zero() {
                            tokio::time::sleep(delay).await;
                        }
                    }
                }
            }
        }

        self.stats.write().await.record_fail_safe();
        if max_attempts > 0 {
            warn!(
                "Generation fell back to fail-safe after {} attempts",
                max_attempts
            );
        }

        GenerationResult {
            value: fail_safe,
            success: false,
            attempts: max_attempts,
            last_raw,
            prompt: request.prompt.clone(),
            failures,
        }
    }

    /// Run one attempt through client, schema, validator and transformer
    async fn attempt<T, H>(
        &self,
        request: &GenerationRequest,
        handler: &H,
    ) -> (Option<String>, Result<T, Rejection>)
    where
        H: OutputHandler<T> + ?Sized,
    {
        let payload = match self.client.complete(request).await {
            Ok(payload) => payload,
            Err(e) => return (None, Err(Rejection::new(RejectionReason::Transport, e.to_string()))),
        };

        let raw = payload.to_text();
        if payload.is_empty() {
            return (
                Some(raw),
                Err(Rejection::new(RejectionReason::Empty, "empty output")),
            );
        }

        let output = match Self::shape(request.schema.as_ref(), &payload, &raw) {
            Ok(output) => output,
            Err(rejection) => return (Some(raw), Err(rejection)),
        };

        if !handler.validate(&output) {
            return (
                Some(raw),
                Err(Rejection::new(
                    RejectionReason::Validation,
                    "output rejected by validator",
                )),
            );
        }

        let outcome = handler
            .transform(&output)
            .map_err(|e| Rejection::new(RejectionReason::Transform, format!("{:#}", e)));
        (Some(raw), outcome)
    }

    fn shape(
        schema: Option<&SchemaDescriptor>,
        payload: &RawPayload,
        raw: &str,
    ) -> Result<GenerationOutput, Rejection> {
        match schema {
            None => Ok(GenerationOutput::text_only(raw)),
            Some(schema) => SchemaAdapter::parse(schema, payload)
                .map(|fields| GenerationOutput::structured(raw, fields))
                .map_err(|e| Rejection::new(RejectionReason::Schema, e.to_string())),
        }
    }

    fn log_rejection(
        &self,
        request: &GenerationRequest,
        attempt: u32,
        max_attempts: u32,
        rejection: &Rejection,
        raw: Option<&str>,
    ) {
        warn!(
            "[{}] generation attempt {}/{} rejected: {}",
            rejection.reason, attempt, max_attempts, rejection.detail
        );
        if self.options.verbose {
            info!("Rejected prompt:\n{}", request.prompt);
            info!("Rejected output: {}", raw.unwrap_or("<none>"));
        } else {
            debug!("Rejected output: {}", raw.unwrap_or("<none>"));
        }
    }

    /// Snapshot of aggregate counters
    pub async fn stats(&self) -> GenerationStats {
        self.stats.read().await.clone()
    }
}

/// A reusable call site: request shape, acceptance rules, fallback and budget
pub struct CallSite<T, H> {
    pub name: String,
    pub params: GenerationParams,
    pub schema: Option<SchemaDescriptor>,
    pub handler: H,
    pub fail_safe: T,
    pub max_attempts: u32,
}

impl<T, H> CallSite<T, H>
where
    T: Clone,
    H: OutputHandler<T>,
{
    pub fn new(
        name: impl Into<String>,
        params: GenerationParams,
        handler: H,
        fail_safe: T,
        max_attempts: u32,
    ) -> Self {
        Self {
            name: name.into(),
            params,
            schema: None,
            handler,
            fail_safe,
            max_attempts,
        }
    }

    pub fn with_schema(mut self, schema: SchemaDescriptor) -> Self {
        self.schema = Some(schema);
        self
    }

    /// Build the request for a rendered prompt
    pub fn request(&self, prompt: impl Into<String>) -> GenerationRequest {
        GenerationRequest {
            prompt: prompt.into(),
            params: self.params.clone(),
            schema: self.schema.clone(),
        }
    }

    /// Issue this call site's request through a generator
    pub async fn invoke(
        &self,
        generator: &RetryingGenerator,
        prompt: impl Into<String>,
    ) -> GenerationResult<T> {
        self.invoke_or(generator, prompt, self.fail_safe.clone())
            .await
    }

    /// Like [`CallSite::invoke`] with a fail-safe that depends on the caller's state
    pub async fn invoke_or(
        &self,
        generator: &RetryingGenerator,
        prompt: impl Into<String>,
        fail_safe: T,
    ) -> GenerationResult<T> {
        let request = self.request(prompt);
        let result = generator
            .generate(&request, &self.handler, fail_safe, self.max_attempts)
            .await;
        if result.is_fail_safe() {
            debug!("Call site '{}' returned its fail-safe", self.name);
        }
        result
    }
}
