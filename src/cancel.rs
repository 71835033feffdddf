//! Cooperative cancellation & cleanup (C1): a reusable handle shared by every engine.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::FiledoError;

type CleanupFn = Box<dyn FnOnce() + Send>;

struct Inner {
    cancelled: AtomicBool,
    cleanups: Mutex<Vec<CleanupFn>>,
}

/// Process-wide cancellation handle. Clone to get a new handle to the same underlying state
/// (cheap `Arc` bump) for passing into workers.
#[derive(Clone)]
pub struct CancelHandle {
    inner: Arc<Inner>,
}

impl CancelHandle {
    pub fn new() -> Self {
        CancelHandle {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                cleanups: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Register a single process-wide Ctrl+C/SIGTERM handler that cancels this handle.
    /// Call once per process; a second call on a fresh handle is harmless but redundant.
    pub fn install_signal_handler(&self) -> Result<(), FiledoError> {
        let handle = self.clone();
        ctrlc::set_handler(move || handle.cancel())
            .map_err(|e| FiledoError::Config(format!("set Ctrl+C handler: {e}")))
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Relaxed)
    }

    /// Fail with `Cancelled` if cancellation has been requested. Engines call this at every
    /// I/O boundary and between files in any loop.
    pub fn check(&self) -> Result<(), FiledoError> {
        if self.is_cancelled() {
            return Err(FiledoError::Cancelled);
        }
        Ok(())
    }

    /// A cheap clone for passing into child operations/workers.
    pub fn context(&self) -> Self {
        self.clone()
    }

    /// Push a cleanup to run (in LIFO order with prior registrations) on first cancellation.
    pub fn register_cleanup<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.cleanups.lock().unwrap().push(Box::new(f));
    }

    /// Transition Running → Cancelling exactly once, then drain cleanups in reverse
    /// (LIFO) insertion order. A cleanup that panics is caught and logged, never stops the
    /// drain.
    pub fn cancel(&self) {
        let was_cancelled = self.inner.cancelled.swap(true, Ordering::SeqCst);
        if was_cancelled {
            return;
        }
        let mut cleanups = self.inner.cleanups.lock().unwrap();
        while let Some(cleanup) = cleanups.pop() {
            if std::panic::catch_unwind(std::panic::AssertUnwindSafe(cleanup)).is_err() {
                log::warn!("cleanup hook panicked during cancellation drain");
            }
        }
    }
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn cleanups_run_lifo_on_cancel() {
        let handle = CancelHandle::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let order = Arc::clone(&order);
            handle.register_cleanup(move || order.lock().unwrap().push(i));
        }
        handle.cancel();
        assert_eq!(*order.lock().unwrap(), vec![2, 1, 0]);
    }

    #[test]
    fn cancel_is_idempotent() {
        let handle = CancelHandle::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);
        handle.register_cleanup(move || {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });
        handle.cancel();
        handle.cancel();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn check_fails_after_cancel() {
        let handle = CancelHandle::new();
        assert!(handle.check().is_ok());
        handle.cancel();
        assert!(matches!(handle.check(), Err(FiledoError::Cancelled)));
    }
}
