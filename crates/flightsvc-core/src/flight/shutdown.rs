//! Delayed, cancellable shutdown signal for the serving loop.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Broadcasts "stop serving" to the accept loop and connection handlers.
///
/// Cloning is cheap; all clones share one signal.
#[derive(Debug, Clone)]
pub struct ShutdownController {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    tx: watch::Sender<bool>,
    pending: Mutex<Option<JoinHandle<()>>>,
    grace: Duration,
}

impl ShutdownController {
    pub fn new(grace: Duration) -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                tx,
                pending: Mutex::new(None),
                grace,
            }),
        }
    }

    pub fn grace(&self) -> Duration {
        self.inner.grace
    }

    /// Trigger shutdown after the grace period, without blocking the caller.
    ///
    /// Returns `false` if a shutdown is already pending or has fired.
    /// Must be called from within a tokio runtime.
    pub fn schedule(&self) -> bool {
        let mut pending = self
            .inner
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if pending.is_some() || self.is_triggered() {
            return false;
        }

        let grace = self.inner.grace;
        let controller = self.clone();
        info!("Shutting down in {:?}", grace);
        *pending = Some(tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            controller.trigger();
        }));
        true
    }

    /// Cancel a scheduled shutdown that has not fired yet.
    pub fn cancel(&self) -> bool {
        let task = self
            .inner
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match task {
            Some(task) if !self.is_triggered() => {
                task.abort();
                debug!("Scheduled shutdown cancelled");
                true
            }
            _ => false,
        }
    }

    /// Signal shutdown immediately.
    pub fn trigger(&self) {
        if !self.inner.tx.send_replace(true) {
            info!("Shutdown signalled");
        }
    }

    pub fn is_triggered(&self) -> bool {
        *self.inner.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.inner.tx.subscribe()
    }

    /// Resolve once shutdown has been signalled.
    pub async fn wait(&self) {
        let mut rx = self.subscribe();
        // The sender lives in `self`, so this only errors if it was dropped
        let _ = rx.wait_for(|stopped| *stopped).await;
    }
}
