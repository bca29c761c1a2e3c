//! Concurrency behavior of a running store: sync coalescing, concurrent
//! taxonomy merges, concurrent allocation and observer isolation.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use chronostore_core::{
    Chronicle, ChronicleRecord, ChronoError, Datastore, Nid, ObjectType, Result, StoreConfig,
    SyncReport, VersionType, WriteObserver, union_merge,
};
use parking_lot::{Condvar, Mutex};

fn nid(raw: i32) -> Nid {
    Nid::new(raw).unwrap()
}

fn started(dir: &tempfile::TempDir) -> Datastore {
    let store = Datastore::new(StoreConfig::new(dir.path()));
    store.startup().unwrap();
    store
}

fn record(raw: i32, assemblage: i32) -> ChronicleRecord {
    ChronicleRecord::new(
        nid(raw),
        nid(assemblage),
        ObjectType::Concept,
        VersionType::Concept,
        b"c",
    )
    .with_version(&raw.to_be_bytes())
}

/// Blocks every `on_sync` until the gate is opened.
#[derive(Default)]
struct GatedObserver {
    open: Mutex<bool>,
    opened: Condvar,
    entered: AtomicUsize,
}

impl GatedObserver {
    fn release(&self) {
        *self.open.lock() = true;
        self.opened.notify_all();
    }

    fn wait_entered(&self, count: usize) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while self.entered.load(Ordering::SeqCst) < count {
            assert!(Instant::now() < deadline, "flush never reached observer");
            thread::sleep(Duration::from_millis(1));
        }
    }
}

impl WriteObserver for GatedObserver {
    fn on_chronicle_written(&self, _chronicle: &dyn Chronicle) -> Result<()> {
        Ok(())
    }

    fn on_sync(&self, _report: &SyncReport) -> Result<()> {
        self.entered.fetch_add(1, Ordering::SeqCst);
        let mut open = self.open.lock();
        while !*open {
            self.opened.wait(&mut open);
        }
        Ok(())
    }
}

#[test]
fn syncs_coalesce_while_a_flush_runs() {
    let dir = tempfile::tempdir().unwrap();
    let store = started(&dir);
    let gate = Arc::new(GatedObserver::default());
    store.register_write_observer(Arc::clone(&gate) as Arc<dyn WriteObserver>);

    store.put_chronicle(&record(-1, -100)).unwrap();
    let first = store.sync().unwrap();
    gate.wait_entered(1);

    // The first flush has started, so these queue behind it as one request.
    let second = store.sync().unwrap();
    let third = store.sync().unwrap();
    assert!(second.same_flush(&third));
    assert!(!first.same_flush(&second));
    assert!(!first.is_complete());
    assert!(first.wait_timeout(Duration::from_millis(20)).is_none());

    gate.release();
    let first_report = first.wait().unwrap();
    let second_report = second.wait().unwrap();
    assert!(second_report.sync_id > first_report.sync_id);
    assert_eq!(third.wait().unwrap(), second_report);

    let metrics = store.sync_metrics().unwrap();
    assert_eq!(metrics.requested_total, 3);
    assert_eq!(metrics.coalesced_total, 1);
    assert_eq!(metrics.completed_total, 2);
    assert_eq!(metrics.failed_total, 0);
    store.shutdown().unwrap();
}

#[test]
fn concurrent_taxonomy_merges_lose_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(started(&dir));
    let concept = nid(-50);
    store.element_sequence_for_nid(concept, nid(-10)).unwrap();

    let handles: Vec<_> = (0..8)
        .map(|worker| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for i in 0..25 {
                    store
                        .taxonomy_accumulate_and_get(
                            nid(-20),
                            concept,
                            vec![worker * 100 + i],
                            union_merge,
                        )
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let mut expected: Vec<i32> = (0..8)
        .flat_map(|worker| (0..25).map(move |i| worker * 100 + i))
        .collect();
    expected.sort_unstable();
    assert_eq!(store.taxonomy_get(nid(-20), concept).unwrap(), Some(expected));
    store.shutdown().unwrap();
}

#[test]
fn concurrent_allocation_is_dense_and_unique() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(started(&dir));

    // Every thread asks for the same 50 nids in a different order.
    let handles: Vec<_> = (0..4)
        .map(|worker| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                let mut seen = Vec::new();
                for step in 0..50 {
                    let raw = -1 - ((step + worker * 13) % 50);
                    let sequence = store.element_sequence_for_nid(nid(raw), nid(-100)).unwrap();
                    seen.push((raw, sequence));
                }
                seen
            })
        })
        .collect();
    let mut by_nid = std::collections::HashMap::new();
    for handle in handles {
        for (raw, sequence) in handle.join().unwrap() {
            let first = *by_nid.entry(raw).or_insert(sequence);
            assert_eq!(first, sequence, "nid {raw} got two sequences");
        }
    }

    let mut sequences: Vec<u32> = by_nid.values().map(|sequence| sequence.get()).collect();
    sequences.sort_unstable();
    assert_eq!(sequences, (1..=50).collect::<Vec<_>>());
    assert_eq!(store.nids_for_assemblage(nid(-100)).unwrap().len(), 50);
    store.shutdown().unwrap();
}

struct Failing;

impl WriteObserver for Failing {
    fn on_chronicle_written(&self, _chronicle: &dyn Chronicle) -> Result<()> {
        Err(ChronoError::internal("observer refused"))
    }

    fn on_sync(&self, _report: &SyncReport) -> Result<()> {
        Err(ChronoError::internal("observer refused"))
    }
}

#[derive(Default)]
struct Recording {
    written: Mutex<Vec<Nid>>,
    syncs: AtomicUsize,
}

impl WriteObserver for Recording {
    fn on_chronicle_written(&self, chronicle: &dyn Chronicle) -> Result<()> {
        self.written.lock().push(chronicle.nid());
        Ok(())
    }

    fn on_sync(&self, _report: &SyncReport) -> Result<()> {
        self.syncs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[test]
fn observer_failures_are_isolated() {
    let dir = tempfile::tempdir().unwrap();
    let store = started(&dir);
    store.register_write_observer(Arc::new(Failing));
    let recording = Arc::new(Recording::default());
    let id = store.register_write_observer(Arc::clone(&recording) as Arc<dyn WriteObserver>);

    store.put_chronicle(&record(-1, -100)).unwrap();
    store.sync().unwrap().wait().unwrap();
    assert_eq!(*recording.written.lock(), vec![nid(-1)]);
    assert_eq!(recording.syncs.load(Ordering::SeqCst), 1);
    assert_eq!(store.observer_failures(), 2);

    assert!(store.unregister_write_observer(id));
    assert!(!store.unregister_write_observer(id));
    store.put_chronicle(&record(-2, -100)).unwrap();
    assert_eq!(recording.written.lock().len(), 1);
    store.shutdown().unwrap();
}
