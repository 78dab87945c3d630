use std::time::Duration;

use crate::validator::ValidationOptions;

/// Shortest pass deadline the cache derives on its own.
const MIN_PASS_DEADLINE_MS: u64 = 60_000;

/// Options for configuring the refresh cycle.
#[derive(Debug, Clone)]
pub struct Config {
    /// Time between two scheduled refreshes.
    pub refresh_interval: Duration,
    /// Budget handed to the candidate supplier.
    pub fetch_timeout: Duration,
    /// Initial validation options; adjustable at runtime.
    pub validation: ValidationOptions,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(5 * 60),
            fetch_timeout: Duration::from_secs(15),
            validation: ValidationOptions::default(),
        }
    }
}

/// Deadline of a pass when none is configured: 85% of the refresh interval,
/// but never less than a minute.
///
/// With intervals shorter than ~70s this exceeds the interval itself; the
/// next scheduled refresh then simply joins the running cycle.
pub fn default_pass_deadline_ms(refresh_interval: Duration) -> u64 {
    let scaled = (refresh_interval.as_millis() as f64 * 0.85).floor() as u64;
    scaled.max(MIN_PASS_DEADLINE_MS)
}

/// Number of candidates a pass covers for a given raw count and limit.
pub fn applied_limit(raw_count: usize, max_proxies: Option<usize>) -> usize {
    match max_proxies {
        Some(limit) => raw_count.min(limit),
        None => raw_count,
    }
}
