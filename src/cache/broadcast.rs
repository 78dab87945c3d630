use std::{
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Weak,
    },
};

use parking_lot::{Mutex, MutexGuard};

use super::models::ValidatedSnapshot;
use crate::error::Error;

type Callback = Arc<dyn Fn(&ValidatedSnapshot) -> anyhow::Result<()> + Send + Sync>;

#[derive(Default)]
struct Registry {
    next_id: AtomicU64,
    callbacks: Mutex<Vec<(u64, Callback)>>,
}

/// Ordered, synchronous fan-out of validated snapshots.
///
/// A publisher takes the dispatch lock before it locks the state it changes
/// and keeps it until delivery ends, so every subscriber sees snapshots in
/// the order the state changed. Callbacks run after the state lock is
/// released and may read it again.
#[derive(Default)]
pub(crate) struct Subscribers {
    registry: Arc<Registry>,
    dispatch: Mutex<()>,
}

/// Handle returned by `subscribe`.
///
/// Dropping it keeps the subscription alive; call [`Subscription::unsubscribe`].
pub struct Subscription {
    id: u64,
    registry: Weak<Registry>,
}

impl Subscription {
    /// Removes the callback. Later broadcasts no longer reach it.
    pub fn unsubscribe(self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.callbacks.lock().retain(|(id, _)| *id != self.id);
        }
    }
}

impl Subscribers {
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&ValidatedSnapshot) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        self.registry
            .callbacks
            .lock()
            .push((id, Arc::new(callback)));
        Subscription {
            id,
            registry: Arc::downgrade(&self.registry),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.registry.callbacks.lock().is_empty()
    }

    /// Serializes publishers. Must be taken before the state lock.
    pub fn dispatch(&self) -> MutexGuard<'_, ()> {
        self.dispatch.lock()
    }

    /// Delivers `snapshot` to every subscriber while `_dispatch` is held.
    ///
    /// A failing or panicking subscriber is logged and skipped.
    pub fn broadcast(&self, _dispatch: &MutexGuard<'_, ()>, snapshot: &ValidatedSnapshot) {
        let callbacks: Vec<Callback> = self
            .registry
            .callbacks
            .lock()
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();

        for callback in callbacks {
            let outcome = match panic::catch_unwind(AssertUnwindSafe(|| callback(snapshot))) {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => Error::Subscriber(e.to_string()),
                Err(payload) => Error::Subscriber(panic_message(payload.as_ref())),
            };
            #[cfg(feature = "log")]
            log::error!("{}", outcome);
            #[cfg(not(feature = "log"))]
            drop(outcome);
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("panicked: {}", message)
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("panicked: {}", message)
    } else {
        "panicked".to_string()
    }
}
