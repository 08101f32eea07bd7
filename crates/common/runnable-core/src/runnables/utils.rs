//! Fan-out helpers shared by `batch` and the Map combinator.

use std::future::Future;

use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::error::Error;

/// Run a future once a permit from `semaphore` is available.
pub async fn gated_coro<T>(semaphore: &Semaphore, fut: impl Future<Output = T>) -> T {
    // A closed semaphore only means no more gating, so run ungated.
    let _permit = semaphore.acquire().await.ok();
    fut.await
}

/// Gather futures, running at most `n` of them at a time.
///
/// Results are returned in the order of the input futures regardless of
/// completion order. `None` or `Some(0)` means no limit.
pub async fn gather_with_concurrency<F, T>(n: Option<usize>, futures: Vec<F>) -> Vec<T>
where
    F: Future<Output = T>,
{
    if futures.is_empty() {
        return Vec::new();
    }

    match n {
        Some(limit) if limit > 0 => {
            let semaphore = Semaphore::new(limit);
            let gated = futures
                .into_iter()
                .map(|fut| gated_coro(&semaphore, fut));
            futures::future::join_all(gated).await
        }
        _ => futures::future::join_all(futures).await,
    }
}

/// Keeps the first error raised by a group of sibling tasks.
///
/// Recording the first error cancels every sibling signal; later errors,
/// usually the resulting cancellations, are dropped.
#[derive(Debug)]
pub struct FirstError {
    error: Mutex<Option<Error>>,
    signals: Vec<CancellationToken>,
}

impl FirstError {
    pub fn new(signals: Vec<CancellationToken>) -> Self {
        Self {
            error: Mutex::new(None),
            signals,
        }
    }

    pub fn record(&self, error: Error) {
        let mut slot = self.error.lock();
        if slot.is_some() {
            return;
        }
        *slot = Some(error);
        drop(slot);
        for signal in &self.signals {
            signal.cancel();
        }
    }

    pub fn is_set(&self) -> bool {
        self.error.lock().is_some()
    }

    pub fn into_inner(self) -> Option<Error> {
        self.error.into_inner()
    }
}
