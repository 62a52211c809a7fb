//! Keyed debounced timers
//!
//! [`DelayerByKey`] keeps at most one pending timer per key. Triggering a key
//! that already has a pending timer cancels the old timer and arms a new one,
//! so each arming cycle fires at most once.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::trace;

struct PendingTimer {
    generation: u64,
    token: CancellationToken,
}

/// One debounced timer per key.
///
/// Timers run on the tokio runtime; [`DelayerByKey::trigger`] must be called
/// from within one.
pub struct DelayerByKey<K> {
    timers: Arc<Mutex<HashMap<K, PendingTimer>>>,
    generation: AtomicU64,
}

impl<K> Default for DelayerByKey<K> {
    fn default() -> Self {
        Self { timers: Arc::new(Mutex::new(HashMap::new())), generation: AtomicU64::new(0) }
    }
}

impl<K> DelayerByKey<K>
where
    K: Hash + Eq + Clone + std::fmt::Debug + Send + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm the timer for `key`, replacing any pending one.
    ///
    /// `task` runs once `delay` has elapsed unless the timer is cancelled or
    /// replaced first. A task that has started running is not interrupted.
    pub fn trigger<F, Fut>(&self, key: K, delay: Duration, task: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst);
        let token = CancellationToken::new();

        let pending = PendingTimer { generation, token: token.clone() };
        if let Some(previous) = self.timers.lock().insert(key.clone(), pending) {
            trace!(?key, "replacing pending timer");
            previous.token.cancel();
        }

        let timers = Arc::clone(&self.timers);
        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }

            {
                let mut timers = timers.lock();
                match timers.get(&key) {
                    Some(pending) if pending.generation == generation => {
                        timers.remove(&key);
                    }
                    _ => return,
                }
            }

            task().await;
        });
    }

    /// Cancel the pending timer for `key`. Returns whether one was pending.
    pub fn cancel(&self, key: &K) -> bool {
        match self.timers.lock().remove(key) {
            Some(pending) => {
                pending.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every pending timer whose key matches `predicate`. Returns how
    /// many were cancelled.
    pub fn cancel_where<P>(&self, mut predicate: P) -> usize
    where
        P: FnMut(&K) -> bool,
    {
        let mut timers = self.timers.lock();
        let before = timers.len();
        timers.retain(|key, pending| {
            if predicate(key) {
                pending.token.cancel();
                false
            } else {
                true
            }
        });
        before - timers.len()
    }

    /// Cancel every pending timer.
    pub fn cancel_all(&self) {
        for (_, pending) in self.timers.lock().drain() {
            pending.token.cancel();
        }
    }

    pub fn pending_count(&self) -> usize {
        self.timers.lock().len()
    }

    pub fn is_pending(&self, key: &K) -> bool {
        self.timers.lock().contains_key(key)
    }
}

impl<K> Drop for DelayerByKey<K> {
    fn drop(&mut self) {
        for (_, pending) in self.timers.lock().drain() {
            pending.token.cancel();
        }
    }
}
