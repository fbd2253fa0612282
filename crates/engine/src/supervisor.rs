//! Registry of in-flight cascade branches.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, warn};

use crate::error::EngineResult;

/// Tracks detached cascade branches so they can be counted, awaited, or
/// aborted.  Branch errors are logged and counted here and go no further.
pub struct CascadeSupervisor {
    tasks: Mutex<JoinSet<()>>,
    in_flight: Arc<AtomicUsize>,
    failures: Arc<AtomicUsize>,
    stop: watch::Sender<bool>,
}

impl Default for CascadeSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl CascadeSupervisor {
    pub fn new() -> Self {
        let (stop, _) = watch::channel(false);
        Self {
            tasks: Mutex::new(JoinSet::new()),
            in_flight: Arc::new(AtomicUsize::new(0)),
            failures: Arc::new(AtomicUsize::new(0)),
            stop,
        }
    }

    /// Start a branch.  Returns `false` once the supervisor has been shut
    /// down.  Must be called from inside a Tokio runtime.
    pub fn spawn<F>(&self, seed: u64, branch: F) -> bool
    where
        F: Future<Output = EngineResult<()>> + Send + 'static,
    {
        if self.is_shut_down() {
            debug!(seed, "supervisor shut down; branch dropped");
            return false;
        }

        let in_flight = self.in_flight.clone();
        let failures = self.failures.clone();
        let stop = self.stop.subscribe();
        in_flight.fetch_add(1, Ordering::SeqCst);

        let mut tasks = self.lock_tasks();
        while let Some(joined) = tasks.try_join_next() {
            self.settle(joined);
        }
        tasks.spawn(async move {
            let outcome = tokio::select! {
                result = branch => Some(result),
                _ = stopped(stop) => None,
            };
            match outcome {
                Some(Ok(())) => debug!(seed, "cascade branch finished"),
                Some(Err(err)) => {
                    failures.fetch_add(1, Ordering::SeqCst);
                    warn!(seed, error = %err, "cascade branch failed");
                }
                None => debug!(seed, "cascade branch cancelled"),
            }
            in_flight.fetch_sub(1, Ordering::SeqCst);
        });
        true
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn failures(&self) -> usize {
        self.failures.load(Ordering::SeqCst)
    }

    pub fn is_shut_down(&self) -> bool {
        *self.stop.borrow()
    }

    /// Wait for every branch, including branches spawned while draining.
    pub async fn drain(&self) {
        loop {
            let mut batch = std::mem::take(&mut *self.lock_tasks());
            if batch.is_empty() {
                break;
            }
            while let Some(joined) = batch.join_next().await {
                self.settle(joined);
            }
        }
    }

    /// Cancel every running branch and refuse new ones.
    pub fn shutdown(&self) {
        self.stop.send_replace(true);
        self.lock_tasks().abort_all();
    }

    /// Account for a branch that ended without reaching its own bookkeeping.
    fn settle(&self, joined: Result<(), JoinError>) {
        let Err(err) = joined else {
            return;
        };
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if err.is_panic() {
            self.failures.fetch_add(1, Ordering::SeqCst);
            warn!(?err, "cascade branch panicked");
        }
    }

    fn lock_tasks(&self) -> MutexGuard<'_, JoinSet<()>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn stopped(mut stop: watch::Receiver<bool>) {
    while !*stop.borrow_and_update() {
        if stop.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
