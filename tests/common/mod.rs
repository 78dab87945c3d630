//! Test doubles shared by the contract tests.
//!
//! Nothing here touches the network: probes and acquisitions are scripted.

#![allow(dead_code)]

use std::{
    collections::HashMap,
    net::Ipv4Addr,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use hyper::Uri;
use parking_lot::Mutex;
use proxywatch::{
    cache::{Config, ProxyCache, ValidatedSnapshot},
    error::{Error, Result},
    providers::{CandidateBatch, CandidateSupplier, SourceError},
    proxy::models::ProxyCandidate,
    validator::{is_live_status, Prober, ProxyValidator, ValidationOptions},
};

/// `n` distinct candidates, 10.0.x.y:8080.
pub fn candidates(n: usize) -> Vec<ProxyCandidate> {
    (0..n)
        .map(|i| ProxyCandidate::new(Ipv4Addr::new(10, 0, (i / 256) as u8, (i % 256) as u8), 8080))
        .collect()
}

/// Validation options with a fixed target and no derived deadline.
pub fn options(concurrency: usize, timeout_ms: u64) -> ValidationOptions {
    ValidationOptions {
        target_url: "http://target.test/".to_string(),
        timeout_ms,
        concurrency,
        max_failure_samples: 25,
        max_proxies: None,
        max_duration_ms: Some(60_000),
    }
}

/// What a scripted probe does.
#[derive(Debug, Clone, Copy)]
pub enum Script {
    /// Answers with this status after the delay.
    Status(u16, Duration),
    /// Never answers.
    Hang,
}

/// A prober following a per-candidate script.
pub struct ScriptedProber {
    scripts: HashMap<ProxyCandidate, Script>,
    fallback: Script,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedProber {
    pub fn new(fallback: Script) -> Self {
        Self {
            scripts: HashMap::new(),
            fallback,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn with(mut self, proxy: ProxyCandidate, script: Script) -> Self {
        self.scripts.insert(proxy, script);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of probes observed in flight at once.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Prober for ScriptedProber {
    async fn probe(&self, proxy: &ProxyCandidate, _target: &Uri) -> Result<u16> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        match self.scripts.get(proxy).copied().unwrap_or(self.fallback) {
            Script::Status(status, delay) => {
                tokio::time::sleep(delay).await;
                if is_live_status(status) {
                    Ok(status)
                } else {
                    Err(Error::probe(
                        format!("status {} received from target", status),
                        Some(status),
                    ))
                }
            }
            Script::Hang => std::future::pending().await,
        }
    }
}

/// A supplier returning a fixed batch, optionally after a delay.
pub struct StaticSupplier {
    batch: Mutex<CandidateBatch>,
    delay: Duration,
    failing: AtomicBool,
    calls: AtomicUsize,
}

impl StaticSupplier {
    pub fn new(candidates: Vec<ProxyCandidate>) -> Self {
        Self {
            batch: Mutex::new(CandidateBatch {
                candidates,
                errors: vec![],
            }),
            delay: Duration::ZERO,
            failing: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_source_error(self, source: &str, message: &str) -> Self {
        self.batch.lock().errors.push(SourceError::new(source, message));
        self
    }

    /// Makes every following acquisition fail.
    pub fn fail(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CandidateSupplier for StaticSupplier {
    async fn load_candidates(&self, _budget: Duration) -> Result<CandidateBatch> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::supplier("all proxy sources failed (scripted)"));
        }
        Ok(self.batch.lock().clone())
    }
}

/// Builds a cache over scripted collaborators.
pub fn cache(
    supplier: Arc<StaticSupplier>,
    prober: Arc<ScriptedProber>,
    validation: ValidationOptions,
) -> Arc<ProxyCache> {
    ProxyCache::new(
        Config {
            refresh_interval: Duration::from_secs(300),
            fetch_timeout: Duration::from_secs(15),
            validation,
        },
        supplier,
        ProxyValidator::new(prober),
    )
}

/// Records every snapshot it receives.
#[derive(Clone, Default)]
pub struct Recorder {
    snapshots: Arc<Mutex<Vec<ValidatedSnapshot>>>,
}

impl Recorder {
    pub fn attach(&self, cache: &ProxyCache) -> proxywatch::cache::Subscription {
        let snapshots = Arc::clone(&self.snapshots);
        cache.subscribe(move |snapshot| {
            snapshots.lock().push(snapshot.clone());
            Ok(())
        })
    }

    pub fn snapshots(&self) -> Vec<ValidatedSnapshot> {
        self.snapshots.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.snapshots.lock().len()
    }
}
