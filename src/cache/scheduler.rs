use std::{sync::Arc, time::Duration};

use tokio::{
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use super::ProxyCache;

/// Handle of the periodic refresh task started by [`ProxyCache::start`].
///
/// Dropping the handle leaves the task running until the runtime shuts down.
pub struct Scheduler {
    stop: CancellationToken,
    handle: JoinHandle<()>,
}

impl Scheduler {
    pub(super) fn spawn(cache: Arc<ProxyCache>, every: Duration) -> Self {
        let stop = CancellationToken::new();
        let handle = tokio::spawn(run(cache, every, stop.clone()));
        Self { stop, handle }
    }

    /// Stops scheduling new refreshes. A cycle already running completes.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.handle.is_finished()
    }
}

async fn run(cache: Arc<ProxyCache>, every: Duration, stop: CancellationToken) {
    // The first tick fires immediately.
    let mut ticker = time::interval(every.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            _ = ticker.tick() => {
                let cache = Arc::clone(&cache);
                tokio::spawn(async move {
                    if let Err(_e) = cache.refresh().await {
                        #[cfg(feature = "log")]
                        log::error!("Scheduled refresh failed: {}", _e);
                    }
                });
            }
        }
    }

    #[cfg(feature = "log")]
    log::debug!("Refresh scheduler stopped");
}
