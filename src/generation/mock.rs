use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use super::client::{GenerationClient, RawPayload, TransportError};
use super::request::GenerationRequest;

type Scripted = Result<RawPayload, TransportError>;

/// Generation client that replays scripted responses in order
#[derive(Clone, Default)]
pub struct MockGenerationClient {
    responses: Arc<Mutex<VecDeque<Scripted>>>,
    fallback: Arc<Mutex<Option<Scripted>>>,
    call_history: Arc<Mutex<Vec<GenerationRequest>>>,
}

impl MockGenerationClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a text response
    pub fn push_text(&self, text: impl Into<String>) -> &Self {
        self.push(Ok(RawPayload::Text(text.into())))
    }

    /// Queue an already-structured response
    pub fn push_structured(&self, value: serde_json::Value) -> &Self {
        self.push(Ok(RawPayload::Structured(value)))
    }

    /// Queue a transport failure
    pub fn push_failure(&self, error: TransportError) -> &Self {
        self.push(Err(error))
    }

    pub fn push(&self, response: Scripted) -> &Self {
        self.responses.lock().unwrap_or_else(PoisonError::into_inner).push_back(response);
        self
    }

    /// Response returned once the queue is drained
    pub fn set_fallback(&self, response: Scripted) -> &Self {
        *self.fallback.lock().unwrap_or_else(PoisonError::into_inner) = Some(response);
        self
    }

    pub fn call_count(&self) -> usize {
        self.call_history.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn get_call_history(&self) -> Vec<GenerationRequest> {
        self.call_history.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn remaining(&self) -> usize {
        self.responses.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn reset(&self) {
        self.responses.lock().unwrap_or_else(PoisonError::into_inner).clear();
        self.call_history.lock().unwrap_or_else(PoisonError::into_inner).clear();
        *self.fallback.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

#[async_trait]
impl GenerationClient for MockGenerationClient {
    async fn complete(&self, request: &GenerationRequest) -> Result<RawPayload, TransportError> {
        self.call_history.lock().unwrap_or_else(PoisonError::into_inner).push(request.clone());

        if let Some(next) = self.responses.lock().unwrap_or_else(PoisonError::into_inner).pop_front() {
            return next;
        }

        self.fallback.lock().unwrap_or_else(PoisonError::into_inner).clone().unwrap_or_else(|| {
            Err(TransportError::Unreachable(
                "mock has no scripted response".to_string(),
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::request::GenerationParams;

    #[tokio::test]
    async fn test_replays_in_order_then_fallback() {
        let mock = MockGenerationClient::new();
        mock.push_text("first")
            .push_failure(TransportError::Unreachable("down".to_string()));
        mock.set_fallback(Ok(RawPayload::Text("always".to_string())));

        let request = GenerationRequest::new("p", GenerationParams::default());
        assert_eq!(
            mock.complete(&request).await.unwrap(),
            RawPayload::Text("first".to_string())
        );
        assert!(mock.complete(&request).await.is_err());
        assert_eq!(
            mock.complete(&request).await.unwrap(),
            RawPayload::Text("always".to_string())
        );
        assert_eq!(mock.call_count(), 3);
    }

    #[tokio::test]
    async fn test_drained_without_fallback_is_transport_failure() {
        let mock = MockGenerationClient::new();
        let request = GenerationRequest::new("p", GenerationParams::default());
        assert!(matches!(
            mock.complete(&request).await,
            Err(TransportError::Unreachable(_))
        ));
    }
}
