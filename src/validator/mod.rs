//! The validation engine.
//!
//! A pass probes every candidate at most once with a fixed pool of workers
//! pulling indices from a shared cursor. Two cancellation layers apply: each
//! probe is bounded by `timeout_ms`, and the whole pass by the caller's
//! [`CancellationToken`], which also interrupts probes already in flight.

mod checker;
mod config;
mod models;

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use chrono::Utc;
use hashbrown::HashSet;
use hyper::Uri;
use parking_lot::Mutex;
use tokio::{task::JoinSet, time};
use tokio_util::sync::CancellationToken;

pub use checker::{is_live_status, HttpProber, Prober};
pub use config::{AppliedOptions, OptionsUpdate, ValidationOptions};
pub use models::{
    FailureSample, PassState, ProgressState, ProgressUpdate, ValidationObserver,
    ValidationProgress, ValidationSummary,
};

use crate::{
    error::{Error, Result},
    proxy::models::ProxyCandidate,
};

/// Runs validation passes with a given [`Prober`].
#[derive(Clone)]
pub struct ProxyValidator {
    prober: Arc<dyn Prober>,
}

impl Default for ProxyValidator {
    fn default() -> Self {
        Self::new(Arc::new(HttpProber))
    }
}

/// Bookkeeping shared by the workers of one pass.
#[derive(Default)]
struct Tally {
    tested: usize,
    approved: usize,
    approved_set: HashSet<ProxyCandidate>,
    approved_proxies: Vec<ProxyCandidate>,
    failure_samples: Vec<FailureSample>,
}

/// Everything a worker needs; shared behind an `Arc`.
struct Pass {
    candidates: Vec<ProxyCandidate>,
    cursor: AtomicUsize,
    tally: Mutex<Tally>,
    target: Uri,
    timeout: Duration,
    max_failure_samples: usize,
    prober: Arc<dyn Prober>,
    observer: Arc<dyn ValidationObserver>,
    cancel: CancellationToken,
}

impl Pass {
    /// Claims the next unprobed index, or `None` when the list is exhausted.
    fn claim(&self) -> Option<ProxyCandidate> {
        let index = self.cursor.fetch_add(1, Ordering::SeqCst);
        self.candidates.get(index).copied()
    }

    /// One probe bounded by the per-probe timeout.
    async fn probe(&self, proxy: &ProxyCandidate) -> Result<u16> {
        match time::timeout(self.timeout, self.prober.probe(proxy, &self.target)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(Error::probe(
                format!("timed out after {} ms", self.timeout.as_millis()),
                None,
            )),
        }
    }

    fn record(&self, proxy: ProxyCandidate, outcome: Result<u16>) {
        let mut tally = self.tally.lock();
        tally.tested += 1;

        match outcome {
            Ok(_) => {
                tally.approved += 1;
                if tally.approved_set.insert(proxy) {
                    tally.approved_proxies.push(proxy);
                    self.observer.on_approved(&proxy, tally.approved);
                }
            }
            Err(err) => {
                #[cfg(feature = "log")]
                log::trace!("{}: rejected: {}", proxy, err);
                if tally.failure_samples.len() < self.max_failure_samples {
                    let (reason, status) = match err {
                        Error::Probe { reason, status } => (reason, status),
                        other => (other.to_string(), None),
                    };
                    tally.failure_samples.push(FailureSample {
                        proxy,
                        reason,
                        status,
                    });
                }
            }
        }

        if !self.cancel.is_cancelled() {
            self.observer.on_progress(ProgressUpdate::new(
                self.candidates.len(),
                tally.tested,
                tally.approved,
            ));
        }
    }
}

async fn do_work(pass: Arc<Pass>) {
    loop {
        if pass.cancel.is_cancelled() {
            break;
        }
        let Some(proxy) = pass.claim() else {
            break;
        };

        // Dropping the probe future closes its sockets; an interrupted probe
        // is not counted as tested.
        let outcome = tokio::select! {
            biased;
            _ = pass.cancel.cancelled() => break,
            outcome = pass.probe(&proxy) => outcome,
        };
        pass.record(proxy, outcome);
    }
}

impl ProxyValidator {
    pub fn new(prober: Arc<dyn Prober>) -> Self {
        Self { prober }
    }

    /// Probes every candidate once and summarises the pass.
    ///
    /// Fails only on malformed options or when a worker task dies; probe
    /// failures end up in the summary. When `cancel` fires before every
    /// candidate was probed the summary is marked `aborted`.
    pub async fn validate(
        &self,
        candidates: Vec<ProxyCandidate>,
        options: &ValidationOptions,
        cancel: &CancellationToken,
        observer: Arc<dyn ValidationObserver>,
    ) -> Result<ValidationSummary> {
        let target = options.target_uri()?;
        let started = time::Instant::now();

        if candidates.is_empty() {
            return Ok(ValidationSummary {
                total: 0,
                tested: 0,
                approved: 0,
                rejected: 0,
                duration_ms: 0,
                completed_at: Utc::now(),
                target_url: options.target_url.clone(),
                timeout_ms: options.timeout_ms,
                concurrency: 0,
                failure_samples: vec![],
                state: PassState::Completed,
                aborted: false,
                approved_proxies: vec![],
            });
        }

        let total = candidates.len();
        let workers = options.concurrency.clamp(1, total);

        #[cfg(feature = "log")]
        log::debug!(
            "Validating {} proxies against {} with {} workers",
            total,
            target,
            workers
        );

        let pass = Arc::new(Pass {
            candidates,
            cursor: AtomicUsize::new(0),
            tally: Mutex::new(Tally::default()),
            target,
            timeout: Duration::from_millis(options.timeout_ms),
            max_failure_samples: options.max_failure_samples,
            prober: Arc::clone(&self.prober),
            observer,
            cancel: cancel.clone(),
        });

        let mut tasks = JoinSet::new();
        for _ in 0..workers {
            tasks.spawn(do_work(Arc::clone(&pass)));
        }

        // Drain every worker before deciding the outcome.
        let mut worker_error = None;
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                worker_error.get_or_insert(e);
            }
        }
        if let Some(e) = worker_error {
            return Err(Error::engine(format!("validation worker failed: {}", e)));
        }

        let mut tally = std::mem::take(&mut *pass.tally.lock());
        let aborted = tally.tested < total;

        let mut seen = HashSet::with_capacity(tally.approved_proxies.len());
        tally.approved_proxies.retain(|proxy| seen.insert(*proxy));

        #[cfg(feature = "log")]
        log::debug!(
            "Validation {} in {:?}: {}/{} approved, {} tested",
            if aborted { "aborted" } else { "finished" },
            started.elapsed(),
            tally.approved,
            total,
            tally.tested
        );

        Ok(ValidationSummary {
            total,
            tested: tally.tested,
            approved: tally.approved,
            rejected: tally.tested - tally.approved,
            duration_ms: started.elapsed().as_millis() as u64,
            completed_at: Utc::now(),
            target_url: options.target_url.clone(),
            timeout_ms: options.timeout_ms,
            concurrency: workers,
            failure_samples: tally.failure_samples,
            state: if aborted {
                PassState::Cancelled
            } else {
                PassState::Completed
            },
            aborted,
            approved_proxies: tally.approved_proxies,
        })
    }
}
