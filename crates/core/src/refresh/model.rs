//! Refresh run domain models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::Error;

/// How a refresh run decides what to fetch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefreshMode {
    /// Fetch every symbol, ignoring cached reads.
    Full,
    /// Fetch the stalest symbols first, bounded by size and headroom.
    Minimal,
    /// No provider calls.
    Cached,
    /// Pick one of the above from provider state and data freshness.
    #[default]
    Auto,
}

impl RefreshMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefreshMode::Full => "full",
            RefreshMode::Minimal => "minimal",
            RefreshMode::Cached => "cached",
            RefreshMode::Auto => "auto",
        }
    }
}

impl fmt::Display for RefreshMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RefreshMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "full" => Ok(RefreshMode::Full),
            "minimal" => Ok(RefreshMode::Minimal),
            "cached" => Ok(RefreshMode::Cached),
            "auto" => Ok(RefreshMode::Auto),
            other => Err(Error::Validation(format!("Unknown refresh mode: '{}'", other))),
        }
    }
}

/// Lifecycle of a run.
///
/// `PENDING -> RUNNING -> {SUCCESS, PARTIAL_SUCCESS, FAILED}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Pending,
    Running,
    PartialSuccess,
    Success,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::PartialSuccess | RunStatus::Success | RunStatus::Failed
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchStatus {
    Succeeded,
    Failed,
    Skipped,
}

/// Outcome of one provider batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResult {
    pub index: usize,
    pub symbols: Vec<String>,
    pub status: BatchStatus,
    /// Quotes returned for the batch.
    pub fetched: usize,
    pub inserted: usize,
    pub updated: usize,
    /// Some quotes were stale cache fallbacks.
    #[serde(default)]
    pub degraded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RunError>,
}

impl BatchResult {
    pub fn skipped(index: usize, symbols: Vec<String>, code: &str, message: String) -> Self {
        let error = RunError {
            batch: Some(index),
            symbols: symbols.clone(),
            code: code.to_string(),
            message,
        };
        Self {
            index,
            symbols,
            status: BatchStatus::Skipped,
            fetched: 0,
            inserted: 0,
            updated: 0,
            degraded: false,
            error: Some(error),
        }
    }

    pub fn failed(index: usize, symbols: Vec<String>, code: &str, message: String) -> Self {
        Self {
            status: BatchStatus::Failed,
            ..Self::skipped(index, symbols, code, message)
        }
    }
}

/// An error recorded on a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunError {
    /// Batch the error belongs to; `None` for run-level errors.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch: Option<usize>,
    pub symbols: Vec<String>,
    /// Stable error kind (`rate_limited`, `permanent_api_error`, ...).
    pub code: String,
    pub message: String,
}

/// One refresh run and everything it did.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRun {
    pub id: String,
    /// Universe key the run refreshes.
    pub target: String,
    /// Mode requested by the trigger.
    pub mode: RefreshMode,
    /// Mode actually executed once `auto` is resolved.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_mode: Option<RefreshMode>,
    pub force: bool,
    pub status: RunStatus,
    pub symbols: Vec<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub batches: Vec<BatchResult>,
    pub errors: Vec<RunError>,
    pub cancel_requested: bool,
}

impl RefreshRun {
    pub fn new(
        id: String,
        target: String,
        mode: RefreshMode,
        force: bool,
        symbols: Vec<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            target,
            mode,
            resolved_mode: None,
            force,
            status: RunStatus::Pending,
            symbols,
            created_at,
            started_at: None,
            completed_at: None,
            batches: Vec::new(),
            errors: Vec::new(),
            cancel_requested: false,
        }
    }

    /// Add a batch outcome, copying its error into the run error list.
    pub fn record_batch(&mut self, batch: BatchResult) {
        if let Some(err) = &batch.error {
            self.errors.push(err.clone());
        }
        self.batches.push(batch);
    }

    pub fn succeeded_batches(&self) -> usize {
        self.batches
            .iter()
            .filter(|b| b.status == BatchStatus::Succeeded)
            .count()
    }

    /// Status implied by the recorded batches.
    ///
    /// No batches ⇒ SUCCESS; none succeeded ⇒ FAILED; all succeeded ⇒
    /// SUCCESS; otherwise PARTIAL_SUCCESS. Skipped batches count as not
    /// succeeded.
    pub fn summary_status(&self) -> RunStatus {
        let succeeded = self.succeeded_batches();
        if self.batches.is_empty() {
            RunStatus::Success
        } else if succeeded == 0 {
            RunStatus::Failed
        } else if succeeded == self.batches.len() {
            RunStatus::Success
        } else {
            RunStatus::PartialSuccess
        }
    }

    pub fn totals(&self) -> RunTotals {
        self.batches.iter().fold(RunTotals::default(), |acc, b| RunTotals {
            fetched: acc.fetched + b.fetched,
            inserted: acc.inserted + b.inserted,
            updated: acc.updated + b.updated,
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunTotals {
    pub fetched: usize,
    pub inserted: usize,
    pub updated: usize,
}

/// Trigger input.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRefreshRequest {
    #[serde(default)]
    pub mode: RefreshMode,
    /// Explicit universe; the tracked symbols when absent.
    #[serde(default)]
    pub symbols: Option<Vec<String>>,
    /// Refresh even when stored data is still fresh.
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRefreshResponse {
    pub run_id: String,
    pub status: RunStatus,
    /// The trigger joined a run already in progress for the same universe.
    pub coalesced: bool,
}
