//! HTTP generation client for OpenAI-compatible completion endpoints

use super::client::{GenerationClient, RawPayload, TransportError};
use super::request::GenerationRequest;
use crate::accounting::UsageLedger;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    max_tokens: u32,
    temperature: f32,
    top_p: f32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    stop: Vec<&'a str>,
    frequency_penalty: f32,
    presence_penalty: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

/// Generation client that posts to a completions endpoint
pub struct HttpGenerationClient {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    timeout: Duration,
    ledger: Option<Arc<UsageLedger>>,
}

impl HttpGenerationClient {
    /// Create a new HTTP client
    pub fn new(
        endpoint: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                TransportError::Misconfigured(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key,
            timeout,
            ledger: None,
        })
    }

    /// Record token usage of every completed request into a ledger
    pub fn with_ledger(mut self, ledger: Arc<UsageLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    fn build_body<'a>(request: &'a GenerationRequest) -> CompletionRequest<'a> {
        let params = &request.params;
        CompletionRequest {
            model: &params.engine,
            prompt: &request.prompt,
            max_tokens: params.max_output_size,
            temperature: params.temperature,
            top_p: params.top_p,
            stop: params.stop_markers.iter().map(String::as_str).collect(),
            frequency_penalty: params.frequency_penalty,
            presence_penalty: params.presence_penalty,
            response_format: request
                .schema
                .as_ref()
                .map(|_| serde_json::json!({ "type": "json_object" })),
        }
    }

    fn map_send_error(&self, err: reqwest::Error) -> TransportError {
        if err.is_timeout() {
            TransportError::Timeout(self.timeout)
        } else {
            TransportError::Unreachable(err.to_string())
        }
    }
}

#[async_trait]
impl GenerationClient for HttpGenerationClient {
    async fn complete(&self, request: &GenerationRequest) -> Result<RawPayload, TransportError> {
        let body = Self::build_body(request);
        trace!("Posting completion request to {}", self.endpoint);

        let started = Instant::now();
        let mut builder = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| self.map_send_error(e))?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        let parsed: CompletionResponse = response
            .json()
            .await
            .map_err(|e| TransportError::Decode(e.to_string()))?;

        if let (Some(ledger), Some(usage)) = (&self.ledger, &parsed.usage) {
            ledger.record(usage.prompt_tokens, usage.completion_tokens, started.elapsed());
        }

        let text = parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.text)
            .unwrap_or_default();
        debug!(
            "Completion returned {} chars in {:?}",
            text.len(),
            started.elapsed()
        );

        Ok(RawPayload::Text(text))
    }
}
