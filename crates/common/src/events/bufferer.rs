//! Event buffering and merging
//!
//! While at least one [`EventBufferer::buffer_events_async`] block is
//! running, pushed events are held back. When the outermost block finishes
//! (successfully, with an error, or by being dropped) the held events are
//! merged into one and delivered once.

use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use super::emitter::{Emitter, Subscription};

type MergeFn<T> = Arc<dyn Fn(Vec<T>) -> T + Send + Sync>;

struct BufferState<T> {
    depth: usize,
    held: Vec<T>,
}

/// Coalesces bursts of events.
pub struct EventBufferer<T> {
    state: Arc<Mutex<BufferState<T>>>,
    output: Emitter<T>,
    merge: MergeFn<T>,
}

impl<T> Clone for EventBufferer<T> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            output: self.output.clone(),
            merge: Arc::clone(&self.merge),
        }
    }
}

impl<T: Clone + Send + 'static> EventBufferer<T> {
    /// `merge` folds the events held during a buffered block into one.
    pub fn new<M>(merge: M) -> Self
    where
        M: Fn(Vec<T>) -> T + Send + Sync + 'static,
    {
        Self {
            state: Arc::new(Mutex::new(BufferState { depth: 0, held: Vec::new() })),
            output: Emitter::new(),
            merge: Arc::new(merge),
        }
    }

    /// Deliver `event` now, or hold it if a buffered block is running.
    pub fn push(&self, event: T) {
        {
            let mut state = self.state.lock();
            if state.depth > 0 {
                state.held.push(event);
                return;
            }
        }
        self.output.fire(&event);
    }

    /// Listen to the buffered output stream.
    #[must_use = "dropping the subscription unsubscribes the listener"]
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.output.subscribe(listener)
    }

    /// Feed every event fired by `source` through this bufferer.
    #[must_use = "dropping the subscription detaches the source"]
    pub fn attach(&self, source: &Emitter<T>) -> Subscription
    where
        T: Sync,
    {
        let this = self.clone();
        source.subscribe(move |event: &T| this.push(event.clone()))
    }

    /// Run `fut` with buffering enabled; nested calls flush only once, when
    /// the outermost call completes.
    pub async fn buffer_events_async<F, R>(&self, fut: F) -> R
    where
        F: Future<Output = R>,
    {
        self.state.lock().depth += 1;
        let _flush = FlushOnExit { bufferer: self };
        fut.await
    }

    fn exit(&self) {
        let held = {
            let mut state = self.state.lock();
            state.depth = state.depth.saturating_sub(1);
            if state.depth > 0 || state.held.is_empty() {
                return;
            }
            std::mem::take(&mut state.held)
        };
        trace!(count = held.len(), "flushing buffered events");
        let merged = (self.merge)(held);
        self.output.fire(&merged);
    }
}

struct FlushOnExit<'a, T: Clone + Send + 'static> {
    bufferer: &'a EventBufferer<T>,
}

impl<T: Clone + Send + 'static> Drop for FlushOnExit<'_, T> {
    fn drop(&mut self) {
        self.bufferer.exit();
    }
}
