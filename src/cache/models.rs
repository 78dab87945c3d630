use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{
    providers::SourceError,
    proxy::models::ProxyCandidate,
    validator::{ValidationProgress, ValidationSummary},
};

/// Last acquisition result, replaced wholesale on every successful cycle.
#[derive(Debug, Clone, Default)]
pub(crate) struct RawState {
    pub proxies: Arc<Vec<ProxyCandidate>>,
    pub errors: Arc<Vec<SourceError>>,
    pub last_success: Option<DateTime<Utc>>,
    pub last_attempt: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Validated list plus the display fields derived from the options.
#[derive(Debug, Clone, Default)]
pub(crate) struct ValidatedState {
    pub proxies: Arc<Vec<ProxyCandidate>>,
    pub raw_count: usize,
    pub errors: Arc<Vec<SourceError>>,
    pub summary: Option<Arc<ValidationSummary>>,
    pub last_success: Option<DateTime<Utc>>,
    pub last_attempt: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub last_validation_error: Option<String>,
    pub configured_limit: Option<usize>,
    pub applied_limit: usize,
    pub configured_concurrency: usize,
    pub configured_timeout_ms: u64,
    pub max_duration_ms: u64,
}

/// Point-in-time view of the raw candidate list.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RawSnapshot {
    pub proxies: Arc<Vec<ProxyCandidate>>,
    pub count: usize,
    pub errors: Arc<Vec<SourceError>>,
    pub last_success: Option<DateTime<Utc>>,
    pub last_attempt: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub next_refresh_seconds: Option<u64>,
    pub refreshing: bool,
}

/// Point-in-time view of the validated list, pushed to every subscriber.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidatedSnapshot {
    pub proxies: Arc<Vec<ProxyCandidate>>,
    pub count: usize,
    pub raw_count: usize,
    pub errors: Arc<Vec<SourceError>>,
    pub summary: Option<Arc<ValidationSummary>>,
    pub last_success: Option<DateTime<Utc>>,
    pub last_attempt: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub last_validation_error: Option<String>,
    pub configured_limit: Option<usize>,
    pub applied_limit: usize,
    pub configured_concurrency: usize,
    pub configured_timeout_ms: u64,
    pub max_duration_ms: u64,
    pub partial_progress: Option<ValidationProgress>,
    pub next_refresh_seconds: Option<u64>,
    pub refreshing: bool,
}

/// What a successful `refresh()` hands back to every caller of the cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RefreshOutcome {
    pub raw: RawSnapshot,
    pub validated: ValidatedSnapshot,
}

/// Seconds until the next scheduled refresh, rounded, never negative.
///
/// `None` until a raw update has succeeded once.
pub fn next_refresh_seconds(
    refresh_interval: Duration,
    last_success: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Option<u64> {
    let last_success = last_success?;
    let elapsed_ms = (now - last_success).num_milliseconds();
    let remaining_ms = refresh_interval.as_millis() as i64 - elapsed_ms;
    Some((remaining_ms as f64 / 1000.0).round().max(0.0) as u64)
}
