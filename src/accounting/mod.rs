//! Usage and cost accounting
//!
//! The generation client records token usage into a [`UsageLedger`] as it
//! goes. At the end of a run the executor asks an [`AccountingService`] for
//! the run's totals and the cumulative totals across all runs.

mod ledger;

pub use ledger::{LedgerAccounting, Pricing, UsageLedger};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use humantime_serde::re::humantime::format_duration;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Usage counters for one run or for all runs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageTotals {
    pub requests: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub cost_usd: f64,
    /// Time spent waiting on the generation service
    #[serde(with = "humantime_serde")]
    pub service_time: Duration,
}

impl UsageTotals {
    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }

    pub fn merge(&mut self, other: &UsageTotals) {
        self.requests += other.requests;
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.cost_usd += other.cost_usd;
        self.service_time += other.service_time;
    }
}

/// Per-run and cumulative totals reported at the end of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostReport {
    pub run_id: String,
    pub run: UsageTotals,
    pub cumulative: UsageTotals,
    pub runs_recorded: u64,
    #[serde(with = "humantime_serde")]
    pub wall_time: Duration,
    pub reported_at: DateTime<Utc>,
}

impl fmt::Display for CostReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Run {} usage:", self.run_id)?;
        writeln!(
            f,
            "  requests: {}  tokens: {} ({} prompt / {} completion)  cost: ${:.4}",
            self.run.requests,
            self.run.total_tokens(),
            self.run.prompt_tokens,
            self.run.completion_tokens,
            self.run.cost_usd
        )?;
        writeln!(
            f,
            "  wall time: {}  service time: {}",
            format_duration(round_secs(self.wall_time)),
            format_duration(round_secs(self.run.service_time))
        )?;
        write!(
            f,
            "Cumulative over {} runs: requests: {}  tokens: {}  cost: ${:.4}",
            self.runs_recorded,
            self.cumulative.requests,
            self.cumulative.total_tokens(),
            self.cumulative.cost_usd
        )
    }
}

fn round_secs(duration: Duration) -> Duration {
    Duration::from_secs(duration.as_secs())
}

/// External collaborator that reports cost/time totals
#[async_trait]
pub trait AccountingService: Send + Sync {
    async fn report(&self, run_id: &str) -> anyhow::Result<CostReport>;
}
