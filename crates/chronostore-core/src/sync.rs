//! Coalesced background durability.
//!
//! One named worker thread performs flushes. Two gates control it:
//!
//! - **pending**: a single slot holding the flush that has been scheduled but
//!   not started. `sync()` either fills the empty slot and queues a flush, or
//!   hands back the flush already waiting there. A burst of `sync()` calls
//!   therefore queues at most one extra flush.
//! - **in progress**: held by whichever flush is actually running. The worker
//!   empties the pending slot only after taking this gate, so a request made
//!   while a flush runs coalesces into the *next* flush, never into the
//!   running one (which may already have passed the data it wants written).
//!
//! A failed flush is logged, counted and reported to that flush's waiters. It
//! never stops the worker; the next `sync()` schedules a fresh attempt, and
//! whatever the failed flush left dirty is written then.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chronostore_error::{ChronoError, Result};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info};

// ---------------------------------------------------------------------------
// Flush target
// ---------------------------------------------------------------------------

/// Whatever the coordinator flushes.
pub trait FlushTarget: Send + Sync {
    /// Write all dirty state. `sync_id` identifies the flush in logs and in
    /// the returned report.
    fn flush(&self, sync_id: u64) -> Result<SyncReport>;
}

/// Outcome of one completed flush.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct SyncReport {
    pub sync_id: u64,
    pub pages_written: u64,
    pub bytes_written: u64,
    pub duration_us: u64,
    /// Wall-clock completion time, milliseconds since the Unix epoch.
    pub completed_at_epoch_ms: u64,
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

/// Atomic counters for one coordinator.
#[derive(Debug, Default)]
pub struct SyncMetrics {
    pub requested_total: AtomicU64,
    /// Requests answered with an already-pending flush.
    pub coalesced_total: AtomicU64,
    pub completed_total: AtomicU64,
    pub failed_total: AtomicU64,
    pub flush_duration_us_total: AtomicU64,
}

impl SyncMetrics {
    fn record_request(&self, coalesced: bool) {
        self.requested_total.fetch_add(1, Ordering::Relaxed);
        if coalesced {
            self.coalesced_total.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn record_completed(&self, duration_us: u64) {
        self.completed_total.fetch_add(1, Ordering::Relaxed);
        self.flush_duration_us_total
            .fetch_add(duration_us, Ordering::Relaxed);
    }

    fn record_failed(&self, duration_us: u64) {
        self.failed_total.fetch_add(1, Ordering::Relaxed);
        self.flush_duration_us_total
            .fetch_add(duration_us, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> SyncMetricsSnapshot {
        SyncMetricsSnapshot {
            requested_total: self.requested_total.load(Ordering::Relaxed),
            coalesced_total: self.coalesced_total.load(Ordering::Relaxed),
            completed_total: self.completed_total.load(Ordering::Relaxed),
            failed_total: self.failed_total.load(Ordering::Relaxed),
            flush_duration_us_total: self.flush_duration_us_total.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time snapshot of [`SyncMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct SyncMetricsSnapshot {
    pub requested_total: u64,
    pub coalesced_total: u64,
    pub completed_total: u64,
    pub failed_total: u64,
    pub flush_duration_us_total: u64,
}

impl SyncMetricsSnapshot {
    /// Mean duration of finished flushes, in microseconds.
    #[must_use]
    pub fn avg_flush_duration_us(&self) -> u64 {
        let finished = self.completed_total + self.failed_total;
        if finished == 0 {
            return 0;
        }
        self.flush_duration_us_total / finished
    }
}

impl fmt::Display for SyncMetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "sync_requested={} sync_coalesced={} sync_completed={} sync_failed={} \
             sync_avg_flush_us={}",
            self.requested_total,
            self.coalesced_total,
            self.completed_total,
            self.failed_total,
            self.avg_flush_duration_us(),
        )
    }
}

// ---------------------------------------------------------------------------
// Tickets and handles
// ---------------------------------------------------------------------------

struct SyncTicket {
    id: u64,
    outcome: Mutex<Option<std::result::Result<SyncReport, String>>>,
    done: Condvar,
}

impl SyncTicket {
    fn new(id: u64) -> Self {
        Self {
            id,
            outcome: Mutex::new(None),
            done: Condvar::new(),
        }
    }

    fn complete(&self, outcome: std::result::Result<SyncReport, String>) {
        *self.outcome.lock() = Some(outcome);
        self.done.notify_all();
    }
}

/// Handle to one scheduled flush. Cloning shares the same flush.
#[derive(Clone)]
pub struct SyncHandle {
    ticket: Arc<SyncTicket>,
}

impl fmt::Debug for SyncHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncHandle")
            .field("id", &self.ticket.id)
            .field("complete", &self.is_complete())
            .finish()
    }
}

impl SyncHandle {
    #[must_use]
    pub fn id(&self) -> u64 {
        self.ticket.id
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.ticket.outcome.lock().is_some()
    }

    /// Whether both handles refer to the same scheduled flush.
    #[must_use]
    pub fn same_flush(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.ticket, &other.ticket)
    }

    /// Block until the flush finishes.
    pub fn wait(&self) -> Result<SyncReport> {
        let mut outcome = self.ticket.outcome.lock();
        loop {
            if let Some(result) = outcome.as_ref() {
                return self.to_result(result);
            }
            self.ticket.done.wait(&mut outcome);
        }
    }

    /// Block until the flush finishes or `timeout` elapses.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<SyncReport>> {
        let deadline = Instant::now() + timeout;
        let mut outcome = self.ticket.outcome.lock();
        loop {
            if let Some(result) = outcome.as_ref() {
                return Some(self.to_result(result));
            }
            if self
                .ticket
                .done
                .wait_until(&mut outcome, deadline)
                .timed_out()
            {
                return outcome.as_ref().map(|result| self.to_result(result));
            }
        }
    }

    fn to_result(&self, result: &std::result::Result<SyncReport, String>) -> Result<SyncReport> {
        result.clone().map_err(|detail| ChronoError::SyncFailed {
            sync_id: self.ticket.id,
            detail,
        })
    }
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

struct Shared {
    target: Arc<dyn FlushTarget>,
    pending: Mutex<Option<Arc<SyncTicket>>>,
    in_progress: Mutex<()>,
    next_id: AtomicU64,
    metrics: SyncMetrics,
}

impl Shared {
    fn new_ticket(&self) -> Arc<SyncTicket> {
        Arc::new(SyncTicket::new(
            self.next_id.fetch_add(1, Ordering::Relaxed) + 1,
        ))
    }

    /// Run one flush for `ticket`. Caller holds the in-progress gate.
    fn run(&self, ticket: &SyncTicket) {
        let started = Instant::now();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.target.flush(ticket.id)))
            .unwrap_or_else(|_| Err(ChronoError::internal("flush panicked")));
        let elapsed_us = u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX);
        match outcome {
            Ok(report) => {
                self.metrics.record_completed(report.duration_us);
                info!(
                    sync_id = ticket.id,
                    pages = report.pages_written,
                    bytes = report.bytes_written,
                    duration_us = report.duration_us,
                    "sync completed"
                );
                ticket.complete(Ok(report));
            }
            Err(err) => {
                self.metrics.record_failed(elapsed_us);
                error!(sync_id = ticket.id, error = %err, "sync failed");
                ticket.complete(Err(err.to_string()));
            }
        }
    }
}

/// Background flush scheduler.
pub struct SyncCoordinator {
    shared: Arc<Shared>,
    sender: Mutex<Option<mpsc::Sender<Arc<SyncTicket>>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for SyncCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncCoordinator")
            .field("running", &self.is_running())
            .field("metrics", &self.metrics())
            .finish_non_exhaustive()
    }
}

impl SyncCoordinator {
    /// Spawn the worker thread.
    pub fn start(target: Arc<dyn FlushTarget>, thread_name: &str) -> Result<Self> {
        let shared = Arc::new(Shared {
            target,
            pending: Mutex::new(None),
            in_progress: Mutex::new(()),
            next_id: AtomicU64::new(0),
            metrics: SyncMetrics::default(),
        });
        let (tx, rx) = mpsc::channel::<Arc<SyncTicket>>();

        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name(thread_name.to_owned())
            .spawn(move || {
                while let Ok(ticket) = rx.recv() {
                    let _running = worker_shared.in_progress.lock();
                    {
                        let mut pending = worker_shared.pending.lock();
                        if pending
                            .as_ref()
                            .is_some_and(|waiting| Arc::ptr_eq(waiting, &ticket))
                        {
                            pending.take();
                        }
                    }
                    worker_shared.run(&ticket);
                }
                debug!("sync worker exiting");
            })
            .map_err(|err| ChronoError::SyncUnavailable {
                detail: format!("failed to spawn sync worker thread: {err}"),
            })?;

        Ok(Self {
            shared,
            sender: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Schedule a flush, or join the one already waiting to start.
    ///
    /// Never blocks on the flush itself.
    pub fn sync(&self) -> Result<SyncHandle> {
        let mut pending = self.shared.pending.lock();
        if let Some(ticket) = pending.as_ref() {
            self.shared.metrics.record_request(true);
            return Ok(SyncHandle {
                ticket: Arc::clone(ticket),
            });
        }

        let sender = self.sender.lock();
        let sender = sender.as_ref().ok_or_else(|| ChronoError::SyncUnavailable {
            detail: "sync coordinator is shut down".to_owned(),
        })?;
        let ticket = self.shared.new_ticket();
        sender
            .send(Arc::clone(&ticket))
            .map_err(|_| ChronoError::SyncUnavailable {
                detail: "sync worker is disconnected".to_owned(),
            })?;
        *pending = Some(Arc::clone(&ticket));
        self.shared.metrics.record_request(false);
        debug!(sync_id = ticket.id, "sync scheduled");
        Ok(SyncHandle { ticket })
    }

    /// Drain queued flushes, stop the worker, then flush once more on the
    /// calling thread and return that flush's outcome.
    pub fn shutdown(&self) -> Result<SyncReport> {
        let sender = self.sender.lock().take();
        if sender.is_none() {
            return Err(ChronoError::SyncUnavailable {
                detail: "sync coordinator already shut down".to_owned(),
            });
        }
        drop(sender);
        self.join_worker()?;

        let ticket = self.shared.new_ticket();
        {
            let _running = self.shared.in_progress.lock();
            self.shared.run(&ticket);
        }
        SyncHandle { ticket }.wait()
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.sender.lock().is_some()
    }

    #[must_use]
    pub fn metrics(&self) -> SyncMetricsSnapshot {
        self.shared.metrics.snapshot()
    }

    fn join_worker(&self) -> Result<()> {
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            worker.join().map_err(|_| ChronoError::SyncUnavailable {
                detail: "sync worker thread panicked".to_owned(),
            })?;
        }
        Ok(())
    }
}

impl Drop for SyncCoordinator {
    fn drop(&mut self) {
        self.sender.get_mut().take();
        let _ = self.join_worker();
    }
}

/// Milliseconds since the Unix epoch.
pub(crate) fn epoch_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |elapsed| {
            u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
        })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;
    use std::sync::mpsc::{Receiver, Sender};

    use super::*;

    /// Target that blocks each flush until released.
    struct GatedTarget {
        entered: Mutex<Sender<u64>>,
        release: Mutex<Receiver<()>>,
        flushes: AtomicU64,
        fail_next: AtomicBool,
    }

    impl FlushTarget for GatedTarget {
        fn flush(&self, sync_id: u64) -> Result<SyncReport> {
            let _ = self.entered.lock().send(sync_id);
            let _ = self.release.lock().recv();
            self.flushes.fetch_add(1, Ordering::SeqCst);
            if self.fail_next.swap(false, Ordering::SeqCst) {
                return Err(ChronoError::internal("disk on fire"));
            }
            Ok(SyncReport {
                sync_id,
                pages_written: 1,
                ..SyncReport::default()
            })
        }
    }

    fn gated() -> (Arc<GatedTarget>, Receiver<u64>, Sender<()>) {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let target = Arc::new(GatedTarget {
            entered: Mutex::new(entered_tx),
            release: Mutex::new(release_rx),
            flushes: AtomicU64::new(0),
            fail_next: AtomicBool::new(false),
        });
        (target, entered_rx, release_tx)
    }

    struct CountingTarget(AtomicU64);

    impl FlushTarget for CountingTarget {
        fn flush(&self, sync_id: u64) -> Result<SyncReport> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(SyncReport {
                sync_id,
                ..SyncReport::default()
            })
        }
    }

    #[test]
    fn sync_completes_and_reports() {
        let target = Arc::new(CountingTarget(AtomicU64::new(0)));
        let coordinator = SyncCoordinator::start(target.clone(), "test-sync").unwrap();
        let handle = coordinator.sync().unwrap();
        let report = handle.wait().unwrap();
        assert_eq!(report.sync_id, handle.id());
        assert!(handle.is_complete());
        assert_eq!(target.0.load(Ordering::SeqCst), 1);
        assert_eq!(coordinator.metrics().completed_total, 1);
    }

    #[test]
    fn requests_during_a_running_flush_coalesce_into_one() {
        let (target, entered, release) = gated();
        let coordinator = SyncCoordinator::start(target.clone(), "test-sync").unwrap();

        let running = coordinator.sync().unwrap();
        assert_eq!(entered.recv().unwrap(), running.id());

        let second = coordinator.sync().unwrap();
        let third = coordinator.sync().unwrap();
        assert!(second.same_flush(&third));
        assert!(!second.same_flush(&running));

        release.send(()).unwrap();
        running.wait().unwrap();
        assert_eq!(entered.recv().unwrap(), second.id());
        release.send(()).unwrap();
        third.wait().unwrap();

        assert_eq!(target.flushes.load(Ordering::SeqCst), 2);
        let metrics = coordinator.metrics();
        assert_eq!(metrics.requested_total, 3);
        assert_eq!(metrics.coalesced_total, 1);
        assert_eq!(metrics.completed_total, 2);
    }

    #[test]
    fn failed_flush_reports_and_next_sync_still_runs() {
        let (target, entered, release) = gated();
        target.fail_next.store(true, Ordering::SeqCst);
        let coordinator = SyncCoordinator::start(target.clone(), "test-sync").unwrap();

        let failing = coordinator.sync().unwrap();
        entered.recv().unwrap();
        release.send(()).unwrap();
        let err = failing.wait().unwrap_err();
        assert!(matches!(err, ChronoError::SyncFailed { sync_id, .. } if sync_id == failing.id()));
        assert!(err.to_string().contains("disk on fire"));

        let retry = coordinator.sync().unwrap();
        entered.recv().unwrap();
        release.send(()).unwrap();
        retry.wait().unwrap();
        assert_eq!(coordinator.metrics().failed_total, 1);
        assert_eq!(coordinator.metrics().completed_total, 1);
    }

    #[test]
    fn wait_timeout_returns_none_while_running() {
        let (target, entered, release) = gated();
        let coordinator = SyncCoordinator::start(target, "test-sync").unwrap();
        let handle = coordinator.sync().unwrap();
        entered.recv().unwrap();
        assert!(handle.wait_timeout(Duration::from_millis(20)).is_none());
        release.send(()).unwrap();
        assert!(handle.wait().is_ok());
    }

    #[test]
    fn shutdown_runs_final_flush_and_refuses_new_syncs() {
        let target = Arc::new(CountingTarget(AtomicU64::new(0)));
        let coordinator = SyncCoordinator::start(target.clone(), "test-sync").unwrap();
        let queued = coordinator.sync().unwrap();

        let final_report = coordinator.shutdown().unwrap();
        assert!(queued.is_complete());
        assert!(final_report.sync_id > queued.id());
        assert_eq!(target.0.load(Ordering::SeqCst), 2);
        assert!(!coordinator.is_running());
        assert!(matches!(
            coordinator.sync().unwrap_err(),
            ChronoError::SyncUnavailable { .. }
        ));
        assert!(coordinator.shutdown().is_err());
    }

    #[test]
    fn metrics_display() {
        let snapshot = SyncMetricsSnapshot {
            requested_total: 4,
            coalesced_total: 1,
            completed_total: 2,
            failed_total: 0,
            flush_duration_us_total: 300,
        };
        assert_eq!(snapshot.avg_flush_duration_us(), 150);
        assert!(snapshot.to_string().contains("sync_coalesced=1"));
    }
}
