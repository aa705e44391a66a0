//! Deferred execution of the next signing step.
//!
//! At most one callback is ever outstanding: scheduling while a callback
//! is pending supersedes it. The callback runs on its own task after the
//! delay; an error from it is logged and isolated so a failing signing
//! step cannot take the scheduler down with it.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, error};

/// Owns the single pending pre-sign callback, if any.
#[derive(Debug, Default)]
pub struct PreSignScheduler {
    handle: Option<JoinHandle<()>>,
}

impl PreSignScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `callback` after `delay`, cancelling any previously scheduled
    /// callback that has not fired yet.
    pub fn schedule<F, Fut, E>(&mut self, delay: Duration, callback: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), E>> + Send,
        E: std::fmt::Display,
    {
        self.cancel();
        debug!(delay_ms = delay.as_millis() as u64, "scheduling pre-sign callback");
        self.handle = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = callback().await {
                error!("pre-sign callback failed: {e}");
            }
        }));
    }

    /// Cancel the pending callback, if any.
    pub fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    /// Whether a callback is still waiting to fire. Finished tasks count
    /// as no longer pending.
    pub fn is_pending(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for PreSignScheduler {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    async fn settle() {
        // Paused-clock tests need a few yields so spawned tasks get
        // polled, both to register their sleep before the clock is
        // advanced and to run the callback after the timer fires.
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_callback_fires_after_delay() {
        let fired = Arc::new(AtomicU32::new(0));
        let mut scheduler = PreSignScheduler::new();

        let counter = fired.clone();
        scheduler.schedule(Duration::from_millis(1500), move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<(), std::convert::Infallible>(())
        });
        settle().await;

        tokio::time::advance(Duration::from_millis(1499)).await;
        settle().await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::advance(Duration::from_millis(2)).await;
        settle().await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reschedule_supersedes_pending_callback() {
        let fired = Arc::new(AtomicU32::new(0));
        let mut scheduler = PreSignScheduler::new();

        let first = fired.clone();
        scheduler.schedule(Duration::from_millis(1000), move || async move {
            first.fetch_add(1, Ordering::SeqCst);
            Ok::<(), std::convert::Infallible>(())
        });
        settle().await;

        tokio::time::advance(Duration::from_millis(500)).await;
        settle().await;

        let second = fired.clone();
        scheduler.schedule(Duration::from_millis(1000), move || async move {
            second.fetch_add(10, Ordering::SeqCst);
            Ok::<(), std::convert::Infallible>(())
        });
        settle().await;

        tokio::time::advance(Duration::from_millis(2000)).await;
        settle().await;
        // Only the superseding callback ran.
        assert_eq!(fired.load(Ordering::SeqCst), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_prevents_invocation() {
        let fired = Arc::new(AtomicU32::new(0));
        let mut scheduler = PreSignScheduler::new();

        let counter = fired.clone();
        scheduler.schedule(Duration::from_millis(100), move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<(), std::convert::Infallible>(())
        });
        scheduler.cancel();
        assert!(!scheduler.is_pending());

        tokio::time::advance(Duration::from_millis(500)).await;
        settle().await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_cancels_pending_callback() {
        let fired = Arc::new(AtomicU32::new(0));
        {
            let mut scheduler = PreSignScheduler::new();
            let counter = fired.clone();
            scheduler.schedule(Duration::from_millis(100), move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<(), std::convert::Infallible>(())
            });
        }
        tokio::time::advance(Duration::from_millis(500)).await;
        settle().await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_callback_error_is_isolated() {
        let mut scheduler = PreSignScheduler::new();
        scheduler.schedule(Duration::from_millis(10), || async {
            Err(std::io::Error::other("signer unavailable"))
        });
        settle().await;
        tokio::time::advance(Duration::from_millis(20)).await;
        settle().await;
        assert!(!scheduler.is_pending());

        // The scheduler keeps working after a failed callback.
        let fired = Arc::new(AtomicU32::new(0));
        let counter = fired.clone();
        scheduler.schedule(Duration::from_millis(10), move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<(), std::convert::Infallible>(())
        });
        settle().await;
        tokio::time::advance(Duration::from_millis(20)).await;
        settle().await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
