//! FIFO task sequencer
//!
//! Tasks queued on one [`Sequencer`] never overlap and start in the order
//! they were queued. Backed by `tokio::sync::Mutex`, whose waiters are
//! served first-in first-out.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::Mutex;

/// Runs queued async tasks strictly one at a time.
#[derive(Debug, Default)]
pub struct Sequencer {
    lock: Mutex<()>,
    pending: AtomicUsize,
}

impl Sequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `task` and wait for its output.
    ///
    /// The task is not started until every previously queued task has
    /// finished. Dropping the returned future before it completes removes
    /// the task from the queue.
    pub async fn queue<F, Fut, T>(&self, task: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let _pending = PendingGuard::new(&self.pending);
        let _turn = self.lock.lock().await;
        task().await
    }

    /// Tasks queued or running.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }
}

struct PendingGuard<'a>(&'a AtomicUsize);

impl<'a> PendingGuard<'a> {
    fn new(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}
