use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::proxy::models::ProxyCandidate;

/// Counters reported after every probe of a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressUpdate {
    pub total: usize,
    pub tested: usize,
    pub approved: usize,
    pub rejected: usize,
    pub remaining: usize,
    pub percent_complete: u8,
}

impl ProgressUpdate {
    pub fn new(total: usize, tested: usize, approved: usize) -> Self {
        let percent_complete = if total == 0 {
            100
        } else {
            (tested.min(total) * 100 / total) as u8
        };
        Self {
            total,
            tested,
            approved,
            rejected: tested - approved,
            remaining: total.saturating_sub(tested),
            percent_complete,
        }
    }
}

/// Lifecycle of the progress record the cache exposes during a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressState {
    Running,
    Cancelled,
    Failed,
    Done,
}

/// Live progress of the pass belonging to the current refresh cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationProgress {
    pub total: usize,
    pub tested: usize,
    pub approved: usize,
    pub rejected: usize,
    pub remaining: usize,
    pub percent_complete: u8,
    pub state: ProgressState,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub applied_limit: usize,
    pub configured_limit: Option<usize>,
    pub max_duration_ms: u64,
}

impl ValidationProgress {
    /// A fresh record for a pass over `total` candidates.
    pub fn start(
        total: usize,
        started_at: DateTime<Utc>,
        configured_limit: Option<usize>,
        max_duration_ms: u64,
    ) -> Self {
        let counters = ProgressUpdate::new(total, 0, 0);
        Self {
            total,
            tested: 0,
            approved: 0,
            rejected: 0,
            remaining: total,
            percent_complete: counters.percent_complete,
            state: ProgressState::Running,
            started_at,
            updated_at: started_at,
            applied_limit: total,
            configured_limit,
            max_duration_ms,
        }
    }

    /// Copies the engine's counters into the record.
    pub fn apply(&mut self, update: &ProgressUpdate, state: ProgressState, now: DateTime<Utc>) {
        self.total = update.total;
        self.tested = update.tested;
        self.approved = update.approved;
        self.rejected = update.rejected;
        self.remaining = update.remaining;
        self.percent_complete = update.percent_complete;
        self.state = state;
        self.updated_at = now;
    }
}

/// How a pass ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PassState {
    Completed,
    Cancelled,
}

/// A rejected candidate kept for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureSample {
    pub proxy: ProxyCandidate,
    pub reason: String,
    pub status: Option<u16>,
}

/// Result of one validation pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationSummary {
    pub total: usize,
    pub tested: usize,
    pub approved: usize,
    pub rejected: usize,
    pub duration_ms: u64,
    pub completed_at: DateTime<Utc>,
    pub target_url: String,
    pub timeout_ms: u64,
    /// Number of workers that actually ran.
    pub concurrency: usize,
    pub failure_samples: Vec<FailureSample>,
    pub state: PassState,
    pub aborted: bool,
    /// Approved candidates, deduplicated, in approval order.
    #[serde(skip)]
    pub approved_proxies: Vec<ProxyCandidate>,
}

/// Receives the engine's side effects while a pass runs.
///
/// Both hooks are called while the pass bookkeeping is locked, so calls
/// arrive in the order the counters changed. Implementations must not block.
#[allow(unused_variables)]
pub trait ValidationObserver: Send + Sync {
    /// Called after every probe unless the pass has been cancelled.
    fn on_progress(&self, progress: ProgressUpdate) {}

    /// Called for every newly approved candidate with the running count.
    fn on_approved(&self, proxy: &ProxyCandidate, approved: usize) {}
}

impl ValidationObserver for () {}
