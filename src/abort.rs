//! Cooperative cancellation handle shared between stream producers and
//! consumers.
//!
//! A handle can be cloned freely; any clone may trigger the abort and every
//! clone observes it. `aborted()` is usable inside `tokio::select!`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Clone-able abort signal.
#[derive(Clone, Debug, Default)]
pub struct AbortHandle {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    aborted: AtomicBool,
    notify: Notify,
}

impl AbortHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Trigger the abort. Idempotent; later calls are no-ops.
    pub fn abort(&self) {
        if !self.inner.aborted.swap(true, Ordering::AcqRel) {
            self.inner.notify.notify_waiters();
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.inner.aborted.load(Ordering::Acquire)
    }

    /// Resolve once the abort has been triggered.
    ///
    /// Registers interest before re-checking the flag, so a trigger racing
    /// with this call is never missed.
    pub async fn aborted(&self) {
        loop {
            if self.is_aborted() {
                return;
            }
            let notified = self.inner.notify.notified();
            if self.is_aborted() {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_abort_resolves_waiters() {
        let handle = AbortHandle::new();
        let waiter = handle.clone();
        let task = tokio::spawn(async move {
            waiter.aborted().await;
            true
        });

        assert!(!handle.is_aborted());
        handle.abort();
        assert!(task.await.unwrap());
        assert!(handle.is_aborted());
    }

    #[tokio::test]
    async fn test_abort_after_trigger_is_immediate() {
        let handle = AbortHandle::new();
        handle.abort();
        handle.abort();
        handle.aborted().await;
    }
}
