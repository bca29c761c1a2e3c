//! Write observers.
//!
//! Observers are called synchronously, in registration order, after every
//! successful chronicle write and after every completed sync. Observers must
//! not call back into the datastore's lifecycle methods. An observer error is
//! logged and isolated: later observers still run and the triggering
//! operation still succeeds.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chronostore_error::Result;
use parking_lot::RwLock;
use tracing::warn;

use crate::chronicle::Chronicle;
use crate::sync::SyncReport;

/// Observer of store writes.
pub trait WriteObserver: Send + Sync {
    /// Called after `chronicle` has been stored.
    fn on_chronicle_written(&self, chronicle: &dyn Chronicle) -> Result<()>;

    /// Called after a flush has completed.
    fn on_sync(&self, _report: &SyncReport) -> Result<()> {
        Ok(())
    }
}

/// Handle returned by registration; used to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(u64);

impl ObserverId {
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

/// Ordered list of registered observers.
#[derive(Default)]
pub struct ObserverRegistry {
    observers: RwLock<Vec<(ObserverId, Arc<dyn WriteObserver>)>>,
    next_id: AtomicU64,
    failures: AtomicU64,
}

impl std::fmt::Debug for ObserverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverRegistry")
            .field("registered", &self.len())
            .field("failures", &self.failures())
            .finish()
    }
}

impl ObserverRegistry {
    pub fn register(&self, observer: Arc<dyn WriteObserver>) -> ObserverId {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.observers.write().push((id, observer));
        id
    }

    /// Remove `id`. Returns `false` if it was not registered.
    pub fn unregister(&self, id: ObserverId) -> bool {
        let mut observers = self.observers.write();
        let before = observers.len();
        observers.retain(|(registered, _)| *registered != id);
        observers.len() != before
    }

    pub fn clear(&self) {
        self.observers.write().clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.observers.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.observers.read().is_empty()
    }

    /// Observer calls that returned an error since creation.
    #[must_use]
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    pub fn notify_written(&self, chronicle: &dyn Chronicle) {
        for (id, observer) in self.snapshot() {
            if let Err(err) = observer.on_chronicle_written(chronicle) {
                self.failures.fetch_add(1, Ordering::Relaxed);
                warn!(
                    observer = id.get(),
                    nid = %chronicle.nid(),
                    error = %err,
                    "write observer failed"
                );
            }
        }
    }

    pub fn notify_sync(&self, report: &SyncReport) {
        for (id, observer) in self.snapshot() {
            if let Err(err) = observer.on_sync(report) {
                self.failures.fetch_add(1, Ordering::Relaxed);
                warn!(
                    observer = id.get(),
                    sync_id = report.sync_id,
                    error = %err,
                    "sync observer failed"
                );
            }
        }
    }

    // Observers run without the list lock held so they may register others.
    fn snapshot(&self) -> Vec<(ObserverId, Arc<dyn WriteObserver>)> {
        self.observers.read().clone()
    }
}
