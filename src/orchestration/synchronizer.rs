//! Keeps in-flight concurrent calls alive after their owner went away.
//!
//! An [`AsyncTask`](crate::orchestration::AsyncTask) dropped before its call
//! finished hands the call to its synchronizer instead of blocking. The
//! synchronizer optionally cancels it and waits for every such call when it
//! is flushed or dropped itself.

use std::sync::{Arc, Mutex, MutexGuard};

use crate::orchestration::future::Cancelable;
use crate::ttlog_debug;

struct SyncInner {
    futures: Mutex<Vec<Arc<dyn Cancelable>>>,
    cancel_on_wait: Mutex<bool>,
}

impl SyncInner {
    fn futures(&self) -> MutexGuard<'_, Vec<Arc<dyn Cancelable>>> {
        self.futures.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn cancel_on_wait(&self) -> bool {
        *self
            .cancel_on_wait
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn wait_all(&self) {
        let futures = std::mem::take(&mut *self.futures());
        if futures.is_empty() {
            return;
        }
        ttlog_debug!("FutureSynchronizer waiting for {} futures", futures.len());
        let cancel = self.cancel_on_wait();
        for future in &futures {
            if cancel {
                future.cancel();
            }
            future.wait_for_finished();
        }
    }
}

impl Drop for SyncInner {
    fn drop(&mut self) {
        self.wait_all();
    }
}

/// Collection of in-flight calls waited for on drop.
///
/// Clones share the same collection; waiting happens when the last clone
/// is dropped.
#[derive(Clone)]
pub struct FutureSynchronizer {
    inner: Arc<SyncInner>,
}

impl Default for FutureSynchronizer {
    fn default() -> Self {
        Self {
            inner: Arc::new(SyncInner {
                futures: Mutex::new(Vec::new()),
                cancel_on_wait: Mutex::new(true),
            }),
        }
    }
}

impl FutureSynchronizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add_future(&self, future: Arc<dyn Cancelable>) {
        self.inner.futures().push(future);
    }

    /// Number of calls currently held, finished or not.
    pub fn len(&self) -> usize {
        self.inner.futures().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget every held call that already finished.
    pub fn flush_finished_futures(&self) {
        self.inner.futures().retain(|future| !future.is_finished());
    }

    /// Block until every held call finished, canceling them first when
    /// [`cancel_on_wait`](Self::cancel_on_wait) is set.
    pub fn wait_for_finished(&self) {
        self.inner.wait_all();
    }

    /// Whether held calls are canceled before waiting. Defaults to true.
    pub fn cancel_on_wait(&self) -> bool {
        self.inner.cancel_on_wait()
    }

    pub fn set_cancel_on_wait(&self, enable: bool) {
        *self
            .inner
            .cancel_on_wait
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = enable;
    }
}

impl std::fmt::Debug for FutureSynchronizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FutureSynchronizer")
            .field("futures", &self.len())
            .field("cancel_on_wait", &self.cancel_on_wait())
            .finish()
    }
}
