//! Common test utilities and helpers

#![allow(dead_code)]

use assert_cmd::Command;
use async_trait::async_trait;
use simdrive::generation::{GenerationClient, GenerationRequest, RawPayload, TransportError};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;

/// Isolated working directory with its own storage root
pub struct TestContext {
    temp_dir: TempDir,
}

impl TestContext {
    pub fn new() -> Self {
        Self {
            temp_dir: TempDir::new().unwrap(),
        }
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn storage_dir(&self) -> PathBuf {
        self.path().join("storage")
    }

    pub fn write_file(&self, name: &str, content: &str) -> PathBuf {
        let path = self.path().join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    /// `simdrive` binary running in this context with a clean environment
    pub fn simdrive(&self) -> Command {
        let mut cmd = Command::cargo_bin("simdrive").unwrap();
        cmd.current_dir(self.path())
            .env("SIMDRIVE_STORAGE_DIR", self.storage_dir())
            .env_remove("SIMDRIVE_ENDPOINT")
            .env_remove("SIMDRIVE_MODEL")
            .env_remove("SIMDRIVE_LOG_LEVEL")
            .env_remove("OPENAI_API_KEY");
        cmd
    }
}

/// Answers structured requests with a valid action and plain ones with an importance
#[derive(Default)]
pub struct CooperativeClient {
    calls: AtomicUsize,
}

impl CooperativeClient {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GenerationClient for CooperativeClient {
    async fn complete(&self, request: &GenerationRequest) -> Result<RawPayload, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &request.schema {
            Some(_) => Ok(RawPayload::Structured(serde_json::json!({
                "action": "reading",
                "location": "library",
            }))),
            None => Ok(RawPayload::Text("7".to_string())),
        }
    }
}

/// Always fails with a transport error
pub struct UnreachableClient;

#[async_trait]
impl GenerationClient for UnreachableClient {
    async fn complete(&self, _request: &GenerationRequest) -> Result<RawPayload, TransportError> {
        Err(TransportError::Unreachable("connection refused".to_string()))
    }
}
