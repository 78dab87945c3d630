//! The refresh orchestrator.
//!
//! A [`ProxyCache`] owns the raw and validated candidate lists. Each refresh
//! cycle loads candidates from a [`CandidateSupplier`], truncates them to the
//! configured limit, validates them under a deadline and streams partial
//! results to subscribers as they arrive. At most one cycle runs at a time;
//! concurrent callers of [`ProxyCache::refresh`] share its outcome.
//!
//! Locks are always taken in the order dispatch, state, flight.

mod broadcast;
pub mod config;
pub mod models;
mod scheduler;

use std::{
    ops::{Deref, DerefMut},
    sync::Arc,
    time::Duration,
};

use chrono::Utc;
use hashbrown::HashSet;
use parking_lot::{Mutex, MutexGuard};
use tokio::{sync::watch, task::JoinHandle, time};
use tokio_util::sync::CancellationToken;

pub use broadcast::Subscription;
pub use config::{applied_limit, default_pass_deadline_ms, Config};
pub use models::{next_refresh_seconds, RawSnapshot, RefreshOutcome, ValidatedSnapshot};
pub use scheduler::Scheduler;

use broadcast::Subscribers;
use models::{RawState, ValidatedState};

use crate::{
    error::{Error, Result},
    providers::{CandidateSupplier, ProviderSupplier},
    proxy::models::ProxyCandidate,
    validator::{
        AppliedOptions, OptionsUpdate, ProgressState, ProgressUpdate, ProxyValidator,
        ValidationObserver, ValidationOptions, ValidationProgress,
    },
};

/// Reason recorded when a pass hit its deadline.
const PASS_ABORTED: &str = "validation interrupted after reaching the configured maximum duration";

struct State {
    raw: RawState,
    validated: ValidatedState,
    progress: Option<ValidationProgress>,
    options: ValidationOptions,
    approved: HashSet<ProxyCandidate>,
}

/// The state locked for a change subscribers will see.
///
/// Fields drop in declaration order, so the state lock goes before the
/// dispatch lock.
struct Transition<'a> {
    state: MutexGuard<'a, State>,
    dispatch: MutexGuard<'a, ()>,
}

impl Deref for Transition<'_> {
    type Target = State;

    fn deref(&self) -> &State {
        &self.state
    }
}

impl DerefMut for Transition<'_> {
    fn deref_mut(&mut self) -> &mut State {
        &mut self.state
    }
}

type Outcome = Option<Result<RefreshOutcome>>;

enum Flight {
    Idle,
    Running(watch::Receiver<Outcome>),
}

/// Resets the flight once the cycle task ends, even if it panicked.
struct Landing<'a>(&'a Mutex<Flight>);

impl Drop for Landing<'_> {
    fn drop(&mut self) {
        *self.0.lock() = Flight::Idle;
    }
}

/// Cancels the pass when the deadline elapses; disarmed on drop.
struct DeadlineTimer(JoinHandle<()>);

impl DeadlineTimer {
    fn arm(token: CancellationToken, after: Duration) -> Self {
        Self(tokio::spawn(async move {
            time::sleep(after).await;
            #[cfg(feature = "log")]
            log::warn!(
                "Validation deadline of {} ms reached, cancelling pass",
                after.as_millis()
            );
            token.cancel();
        }))
    }
}

impl Drop for DeadlineTimer {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Caches the raw and validated proxy lists and keeps them fresh.
pub struct ProxyCache {
    refresh_interval: Duration,
    fetch_timeout: Duration,
    supplier: Arc<dyn CandidateSupplier>,
    validator: ProxyValidator,
    state: Mutex<State>,
    flight: Mutex<Flight>,
    subscribers: Subscribers,
}

impl ProxyCache {
    /// Creates a cache; nothing is fetched until [`refresh`](Self::refresh)
    /// or [`start`](Self::start) is called.
    ///
    /// A missing `max_duration_ms` is resolved here from the refresh interval.
    pub fn new(
        config: Config,
        supplier: Arc<dyn CandidateSupplier>,
        validator: ProxyValidator,
    ) -> Arc<Self> {
        let mut options = config.validation;
        let max_duration_ms = *options
            .max_duration_ms
            .get_or_insert_with(|| default_pass_deadline_ms(config.refresh_interval));

        let validated = ValidatedState {
            configured_limit: options.max_proxies,
            configured_concurrency: options.concurrency,
            configured_timeout_ms: options.timeout_ms,
            max_duration_ms,
            ..Default::default()
        };

        Arc::new(Self {
            refresh_interval: config.refresh_interval,
            fetch_timeout: config.fetch_timeout,
            supplier,
            validator,
            state: Mutex::new(State {
                raw: RawState::default(),
                validated,
                progress: None,
                options,
                approved: HashSet::new(),
            }),
            flight: Mutex::new(Flight::Idle),
            subscribers: Subscribers::default(),
        })
    }

    /// A cache over the built-in proxy sources and the HTTP prober.
    pub fn with_defaults(config: Config) -> Result<Arc<Self>> {
        let supplier = ProviderSupplier::new()?;
        Ok(Self::new(
            config,
            Arc::new(supplier),
            ProxyValidator::default(),
        ))
    }

    /// Refreshes now, then every `refresh_interval` until stopped.
    pub fn start(self: &Arc<Self>) -> Scheduler {
        #[cfg(feature = "log")]
        log::info!(
            "Refreshing proxies every {} s",
            self.refresh_interval.as_secs()
        );
        Scheduler::spawn(Arc::clone(self), self.refresh_interval)
    }

    /// Runs a refresh cycle, or joins the one already running.
    ///
    /// Every caller attached to the same cycle receives the same outcome.
    pub async fn refresh(self: &Arc<Self>) -> Result<RefreshOutcome> {
        let mut outcome = {
            let mut flight = self.flight.lock();
            match &*flight {
                Flight::Running(outcome) => outcome.clone(),
                Flight::Idle => {
                    let (sender, receiver) = watch::channel(None);
                    *flight = Flight::Running(receiver.clone());

                    let cache = Arc::clone(self);
                    tokio::spawn(async move {
                        let landing = Landing(&cache.flight);
                        let result = cache.run_cycle().await;
                        drop(landing);
                        sender.send_replace(Some(result));
                    });
                    receiver
                }
            }
        };

        let result = outcome
            .wait_for(Option::is_some)
            .await
            .map_err(|_| Error::engine("refresh cycle ended without an outcome"))?
            .clone();
        result.unwrap_or_else(|| Err(Error::engine("refresh cycle ended without an outcome")))
    }

    /// Whether a refresh cycle is in flight.
    pub fn is_refreshing(&self) -> bool {
        matches!(*self.flight.lock(), Flight::Running(_))
    }

    /// The options the next pass will use.
    pub fn validation_options(&self) -> ValidationOptions {
        self.state.lock().options.clone()
    }

    /// Applies a runtime options update atomically.
    ///
    /// An invalid field rejects the whole update and leaves the options
    /// untouched. A running pass keeps the options it started with.
    pub fn update_validation_options(&self, update: &OptionsUpdate) -> Result<AppliedOptions> {
        let mut state = self.change();
        if update.is_empty() {
            return Ok(AppliedOptions::from(&state.options));
        }

        let options = match state.options.with_update(update) {
            Ok(options) => options,
            Err(e) => {
                #[cfg(feature = "log")]
                log::warn!("Rejected validation options update: {}", e);
                return Err(e);
            }
        };

        state.options = options;
        let State {
            validated,
            progress,
            options,
            ..
        } = &mut *state;
        validated.configured_limit = options.max_proxies;
        validated.applied_limit = applied_limit(validated.raw_count, options.max_proxies);
        validated.configured_concurrency = options.concurrency;
        validated.configured_timeout_ms = options.timeout_ms;
        if let Some(progress) = progress.as_mut() {
            progress.configured_limit = options.max_proxies;
        }

        let applied = AppliedOptions::from(&state.options);
        #[cfg(feature = "log")]
        log::info!(
            "Validation options updated: limit {:?}, concurrency {}, timeout {} ms",
            applied.max_proxies,
            applied.concurrency,
            applied.timeout_ms
        );
        self.publish(state);
        Ok(applied)
    }

    /// Registers `callback` for every future validated snapshot.
    ///
    /// Callbacks run synchronously and in order. They may read snapshots but
    /// must not call back into methods of the cache that change state.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&ValidatedSnapshot) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.subscribers.subscribe(callback)
    }

    pub fn raw_snapshot(&self) -> RawSnapshot {
        let state = self.state.lock();
        self.raw_view(&state)
    }

    pub fn validated_snapshot(&self) -> ValidatedSnapshot {
        let state = self.state.lock();
        self.validated_view(&state)
    }

    fn raw_view(&self, state: &State) -> RawSnapshot {
        let raw = &state.raw;
        RawSnapshot {
            proxies: Arc::clone(&raw.proxies),
            count: raw.proxies.len(),
            errors: Arc::clone(&raw.errors),
            last_success: raw.last_success,
            last_attempt: raw.last_attempt,
            last_error: raw.last_error.clone(),
            next_refresh_seconds: next_refresh_seconds(
                self.refresh_interval,
                raw.last_success,
                Utc::now(),
            ),
            refreshing: self.is_refreshing(),
        }
    }

    fn validated_view(&self, state: &State) -> ValidatedSnapshot {
        let validated = &state.validated;
        let refreshing = self.is_refreshing();
        ValidatedSnapshot {
            proxies: Arc::clone(&validated.proxies),
            count: validated.proxies.len(),
            raw_count: validated.raw_count,
            errors: Arc::clone(&validated.errors),
            summary: validated.summary.clone(),
            last_success: validated.last_success,
            last_attempt: validated.last_attempt,
            last_error: validated.last_error.clone(),
            last_validation_error: validated.last_validation_error.clone(),
            configured_limit: validated.configured_limit,
            applied_limit: validated.applied_limit,
            configured_concurrency: validated.configured_concurrency,
            configured_timeout_ms: validated.configured_timeout_ms,
            max_duration_ms: validated.max_duration_ms,
            partial_progress: state.progress.clone().filter(|_| refreshing),
            next_refresh_seconds: next_refresh_seconds(
                self.refresh_interval,
                state.raw.last_success.or(validated.last_success),
                Utc::now(),
            ),
            refreshing,
        }
    }

    fn change(&self) -> Transition<'_> {
        let dispatch = self.subscribers.dispatch();
        Transition {
            state: self.state.lock(),
            dispatch,
        }
    }

    /// Releases the state lock, then broadcasts the view it held.
    fn publish(&self, change: Transition<'_>) {
        let Transition { state, dispatch } = change;
        if self.subscribers.is_empty() {
            return;
        }
        let snapshot = self.validated_view(&state);
        drop(state);
        self.subscribers.broadcast(&dispatch, &snapshot);
    }

    fn outcome(&self) -> RefreshOutcome {
        let state = self.state.lock();
        RefreshOutcome {
            raw: self.raw_view(&state),
            validated: self.validated_view(&state),
        }
    }

    async fn run_cycle(self: &Arc<Self>) -> Result<RefreshOutcome> {
        let attempt = Utc::now();
        #[cfg(feature = "log")]
        log::info!("Refresh cycle started");

        let batch = match self.supplier.load_candidates(self.fetch_timeout).await {
            Ok(batch) => batch,
            Err(e) => {
                let message = e.to_string();
                #[cfg(feature = "log")]
                log::error!("Proxy acquisition failed: {}", message);

                let mut state = self.change();
                state.raw.last_attempt = Some(attempt);
                state.raw.last_error = Some(message.clone());
                state.validated.last_attempt = Some(attempt);
                state.validated.last_error = Some(message.clone());
                state.validated.proxies = Arc::default();
                state.progress = None;
                state.approved.clear();
                self.publish(state);
                return Err(match e {
                    Error::Supplier(_) => e,
                    _ => Error::Supplier(message),
                });
            }
        };

        let raw_count = batch.candidates.len();
        let (candidates, options, max_duration_ms) = {
            let mut state = self.change();
            let errors = Arc::new(batch.errors);
            state.raw = RawState {
                proxies: Arc::new(batch.candidates),
                errors: Arc::clone(&errors),
                last_success: Some(attempt),
                last_attempt: Some(attempt),
                last_error: None,
            };

            let options = state.options.clone();
            let max_duration_ms = options
                .max_duration_ms
                .unwrap_or_else(|| default_pass_deadline_ms(self.refresh_interval));
            let last_success = state.validated.last_success;
            state.validated = ValidatedState {
                proxies: Arc::default(),
                raw_count,
                errors,
                summary: None,
                last_success,
                last_attempt: Some(attempt),
                last_error: None,
                last_validation_error: None,
                configured_limit: options.max_proxies,
                applied_limit: applied_limit(raw_count, options.max_proxies),
                configured_concurrency: options.concurrency,
                configured_timeout_ms: options.timeout_ms,
                max_duration_ms,
            };
            state.progress = None;
            state.approved.clear();

            let take = applied_limit(raw_count, options.max_proxies);
            let candidates: Vec<ProxyCandidate> =
                state.raw.proxies.iter().take(take).copied().collect();
            self.publish(state);
            (candidates, options, max_duration_ms)
        };

        let cancel = CancellationToken::new();
        let _deadline = DeadlineTimer::arm(cancel.clone(), Duration::from_millis(max_duration_ms));
        {
            let mut state = self.change();
            state.progress = Some(ValidationProgress::start(
                candidates.len(),
                attempt,
                options.max_proxies,
                max_duration_ms,
            ));
            #[cfg(feature = "log")]
            log::info!(
                "Validating {} of {} proxies (deadline {} ms)",
                candidates.len(),
                raw_count,
                max_duration_ms
            );
            self.publish(state);
        }

        let observer = Arc::new(CycleObserver {
            cache: Arc::clone(self),
            cancel: cancel.clone(),
        });
        let result = self
            .validator
            .validate(candidates, &options, &cancel, observer)
            .await;

        match result {
            Ok(mut summary) => {
                let approved = std::mem::take(&mut summary.approved_proxies);
                #[cfg(feature = "log")]
                log::info!(
                    "Validation {}: {} approved, {} tested of {}",
                    if summary.aborted { "aborted" } else { "finished" },
                    approved.len(),
                    summary.tested,
                    summary.total
                );

                let mut state = self.change();
                let now = Utc::now();
                state.approved = approved.iter().copied().collect();
                let State {
                    validated,
                    options,
                    ..
                } = &mut *state;
                validated.last_validation_error = summary.aborted.then(|| PASS_ABORTED.to_string());
                validated.proxies = Arc::new(approved);
                validated.summary = Some(Arc::new(summary));
                validated.last_success = Some(now);
                validated.last_attempt = Some(attempt);
                validated.last_error = None;
                validated.configured_limit = options.max_proxies;
                validated.applied_limit = applied_limit(validated.raw_count, options.max_proxies);
                validated.configured_concurrency = options.concurrency;
                validated.configured_timeout_ms = options.timeout_ms;
                state.progress = None;
                self.publish(state);
                Ok(self.outcome())
            }
            Err(e) => {
                #[cfg(feature = "log")]
                log::error!("Validation failed: {}", e);

                let mut state = self.change();
                let now = Utc::now();
                state.validated.last_attempt = Some(attempt);
                state.validated.last_validation_error = Some(e.to_string());
                if let Some(progress) = state.progress.as_mut() {
                    progress.state = ProgressState::Failed;
                    progress.updated_at = now;
                }
                self.publish(state);
                Err(e)
            }
        }
    }
}

/// Streams the engine's callbacks of one cycle into the cache state.
struct CycleObserver {
    cache: Arc<ProxyCache>,
    cancel: CancellationToken,
}

impl ValidationObserver for CycleObserver {
    fn on_progress(&self, update: ProgressUpdate) {
        let mut state = self.cache.change();
        let phase = if self.cancel.is_cancelled() {
            ProgressState::Cancelled
        } else {
            ProgressState::Running
        };
        if let Some(progress) = state.progress.as_mut() {
            progress.apply(&update, phase, Utc::now());
        }
        self.cache.publish(state);
    }

    fn on_approved(&self, proxy: &ProxyCandidate, _approved: usize) {
        let mut state = self.cache.change();
        if !state.approved.insert(*proxy) {
            return;
        }
        Arc::make_mut(&mut state.validated.proxies).push(*proxy);
        state.validated.last_attempt = Some(Utc::now());
        self.cache.publish(state);
    }
}
