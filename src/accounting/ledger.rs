//! In-process usage ledger and the file-backed cumulative accounting service

use super::{AccountingService, CostReport, UsageTotals};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::fs;
use tracing::{debug, info};

/// Per-token pricing used to derive cost from usage
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Pricing {
    #[serde(default)]
    pub prompt_per_1k: f64,
    #[serde(default)]
    pub completion_per_1k: f64,
}

impl Pricing {
    pub fn cost(&self, prompt_tokens: u64, completion_tokens: u64) -> f64 {
        (prompt_tokens as f64 / 1000.0) * self.prompt_per_1k
            + (completion_tokens as f64 / 1000.0) * self.completion_per_1k
    }
}

/// Running usage totals for the current process
#[derive(Debug)]
pub struct UsageLedger {
    pricing: Pricing,
    totals: Mutex<UsageTotals>,
    started: Instant,
}

impl UsageLedger {
    pub fn new(pricing: Pricing) -> Self {
        Self {
            pricing,
            totals: Mutex::new(UsageTotals::default()),
            started: Instant::now(),
        }
    }

    /// Record one completed request
    pub fn record(&self, prompt_tokens: u64, completion_tokens: u64, elapsed: Duration) {
        let cost = self.pricing.cost(prompt_tokens, completion_tokens);
        let mut totals = self.totals.lock().unwrap_or_else(PoisonError::into_inner);
        totals.requests += 1;
        totals.prompt_tokens += prompt_tokens;
        totals.completion_tokens += completion_tokens;
        totals.cost_usd += cost;
        totals.service_time += elapsed;
    }

    pub fn snapshot(&self) -> UsageTotals {
        self.totals
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Wall time since the ledger was created
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CumulativeUsage {
    totals: UsageTotals,
    runs: u64,
    updated_at: Option<DateTime<Utc>>,
}

/// Merges each run's ledger into `usage.json` and reports both totals
pub struct LedgerAccounting {
    ledger: Arc<UsageLedger>,
    path: PathBuf,
    reported: tokio::sync::Mutex<Option<CostReport>>,
}

impl LedgerAccounting {
    pub fn new(ledger: Arc<UsageLedger>, storage_root: &Path) -> Self {
        Self {
            ledger,
            path: storage_root.join("usage.json"),
            reported: tokio::sync::Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<CumulativeUsage> {
        if !self.path.exists() {
            return Ok(CumulativeUsage::default());
        }
        let content = fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read usage file {}", self.path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse usage file {}", self.path.display()))
    }

    async fn store(&self, usage: &CumulativeUsage) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .await
                .context("Failed to create storage directory")?;
        }
        let temp_path = self.path.with_extension("tmp");
        fs::write(&temp_path, serde_json::to_string_pretty(usage)?)
            .await
            .context("Failed to write usage to temp file")?;
        fs::rename(&temp_path, &self.path)
            .await
            .context("Failed to move usage file into place")?;
        Ok(())
    }
}

#[async_trait]
impl AccountingService for LedgerAccounting {
    async fn report(&self, run_id: &str) -> Result<CostReport> {
        let mut reported = self.reported.lock().await;
        if let Some(report) = reported.as_ref() {
            debug!("Usage for run {} already merged, returning cached report", run_id);
            return Ok(report.clone());
        }

        let run = self.ledger.snapshot();
        let mut cumulative = self.load().await?;
        cumulative.totals.merge(&run);
        cumulative.runs += 1;
        cumulative.updated_at = Some(Utc::now());
        self.store(&cumulative).await?;
        info!("Recorded usage of run {} in {}", run_id, self.path.display());

        let report = CostReport {
            run_id: run_id.to_string(),
            run,
            cumulative: cumulative.totals,
            runs_recorded: cumulative.runs,
            wall_time: self.ledger.elapsed(),
            reported_at: Utc::now(),
        };
        *reported = Some(report.clone());
        Ok(report)
    }
}
