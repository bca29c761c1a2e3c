//! Store lifecycle and the public operation surface.
//!
//! ```text
//! NOT_YET_CHECKED ──startup──▶ NO_DATASTORE | EXISTING_DATASTORE
//!        ▲                                  │
//!        └────────────── shutdown ──────────┘
//! ```
//!
//! Every data operation requires a started store and fails with
//! `NotStarted` otherwise. `startup` and `shutdown` are serialized with each
//! other; data operations never block on them beyond taking a snapshot of the
//! running state.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use chronostore_error::{ChronoError, Result};
use chronostore_spine::{GLOBAL_SPINE_METRICS, IntArray};
use chronostore_types::{DatastoreStartState, ElementSequence, Nid, ObjectType, VersionType};
use parking_lot::{Mutex, RwLock};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::chronicle::Chronicle;
use crate::config::{DATASTORE_ID_FILE, PROPERTIES_FILE, StoreConfig};
use crate::observer::{ObserverId, ObserverRegistry, WriteObserver};
use crate::properties::{StoreProperties, read_datastore_id, write_datastore_id};
use crate::state::StoreState;
use crate::sync::{FlushTarget, SyncCoordinator, SyncHandle, SyncMetricsSnapshot, SyncReport};

struct Running {
    state: Arc<StoreState>,
    coordinator: SyncCoordinator,
    start_state: DatastoreStartState,
}

/// One embedded chronicle store rooted at a directory.
pub struct Datastore {
    config: StoreConfig,
    observers: Arc<ObserverRegistry>,
    running: RwLock<Option<Running>>,
    lifecycle: Mutex<()>,
}

impl std::fmt::Debug for Datastore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Datastore")
            .field("root", &self.config.root)
            .field("start_state", &self.start_state())
            .field("observers", &self.observers.len())
            .finish_non_exhaustive()
    }
}

/// Per-assemblage line of a [`StoreSummary`].
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct AssemblageSummary {
    pub nid: Nid,
    pub object_type: ObjectType,
    pub version_type: VersionType,
    pub element_count: u32,
}

/// Snapshot of a running store for reporting.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct StoreSummary {
    pub root: PathBuf,
    pub start_state: DatastoreStartState,
    pub datastore_id: Option<Uuid>,
    pub assemblages: Vec<AssemblageSummary>,
    pub size_on_disk: u64,
}

impl Datastore {
    /// A store that has not been started yet.
    #[must_use]
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config: config.validated(),
            observers: Arc::new(ObserverRegistry::default()),
            running: RwLock::new(None),
            lifecycle: Mutex::new(()),
        }
    }

    #[must_use]
    pub const fn config(&self) -> &StoreConfig {
        &self.config
    }

    // --- lifecycle --------------------------------------------------------

    /// Open or create the store and start the sync worker.
    pub fn startup(&self) -> Result<DatastoreStartState> {
        let _lifecycle = self.lifecycle.lock();
        if self.running.read().is_some() {
            return Err(ChronoError::AlreadyStarted);
        }

        let root = &self.config.root;
        fs::create_dir_all(root).map_err(|source| {
            error!(root = %root.display(), error = %source, "cannot create store root");
            ChronoError::IoWrite {
                path: root.clone(),
                source,
            }
        })?;

        let existing = StoreProperties::read(&self.config.path(PROPERTIES_FILE))?;
        let start_state = match &existing {
            Some(properties) => {
                properties.check_compatible(&self.config)?;
                DatastoreStartState::ExistingDatastore
            }
            None => DatastoreStartState::NoDatastore,
        };
        let datastore_id = self.resolve_datastore_id(existing.as_ref())?;

        let state = Arc::new(StoreState::open(
            self.config.clone(),
            Arc::clone(&self.observers),
            datastore_id,
        )?);
        let coordinator = SyncCoordinator::start(
            Arc::clone(&state) as Arc<dyn FlushTarget>,
            &self.config.sync_thread_name,
        )?;

        info!(
            root = %root.display(),
            start_state = %start_state,
            datastore_id = ?datastore_id,
            assemblages = state.types().len(),
            "datastore started"
        );
        *self.running.write() = Some(Running {
            state,
            coordinator,
            start_state,
        });
        Ok(start_state)
    }

    /// Flush everything one last time on this thread, then drop all
    /// in-memory state and observer registrations.
    ///
    /// The store is shut down even when the final flush fails; the flush
    /// error is returned.
    pub fn shutdown(&self) -> Result<SyncReport> {
        let _lifecycle = self.lifecycle.lock();
        let Some(running) = self.running.write().take() else {
            return Err(ChronoError::NotStarted);
        };
        let result = running.coordinator.shutdown();
        drop(running);
        self.observers.clear();

        match &result {
            Ok(report) => info!(
                root = %self.config.root.display(),
                pages = report.pages_written,
                spine_io = %GLOBAL_SPINE_METRICS.snapshot(),
                "datastore shut down"
            ),
            Err(err) => error!(
                root = %self.config.root.display(),
                error = %err,
                "final flush failed during shutdown"
            ),
        }
        result
    }

    /// `NotYetChecked` unless started.
    #[must_use]
    pub fn start_state(&self) -> DatastoreStartState {
        self.running
            .read()
            .as_ref()
            .map_or(DatastoreStartState::NotYetChecked, |running| {
                running.start_state
            })
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.read().is_some()
    }

    /// Identity of the running store, if known.
    #[must_use]
    pub fn datastore_id(&self) -> Option<Uuid> {
        self.running
            .read()
            .as_ref()
            .and_then(|running| running.state.datastore_id())
    }

    /// Assign the store identity, overwriting the identity file.
    pub fn set_datastore_id(&self, id: Uuid) -> Result<()> {
        self.state()?.set_datastore_id(id)
    }

    // --- chronicles -------------------------------------------------------

    pub fn put_chronicle(&self, chronicle: &dyn Chronicle) -> Result<ElementSequence> {
        self.state()?.put_chronicle(chronicle)
    }

    pub fn get_chronicle_data(&self, nid: Nid) -> Result<Option<Vec<u8>>> {
        self.state()?.get_chronicle_data(nid)
    }

    pub fn has_chronicle_data(&self, nid: Nid, expected: ObjectType) -> Result<bool> {
        self.state()?.has_chronicle_data(nid, expected)
    }

    // --- identifiers ------------------------------------------------------

    pub fn element_sequence_for_nid(&self, nid: Nid, assemblage: Nid) -> Result<ElementSequence> {
        self.state()?
            .allocator()
            .element_sequence_for_nid(nid, assemblage)
    }

    pub fn nid_for_element_sequence(
        &self,
        assemblage: Nid,
        sequence: ElementSequence,
    ) -> Result<Option<Nid>> {
        self.state()?
            .allocator()
            .nid_for_element_sequence(assemblage, sequence)
    }

    pub fn assemblage_of_nid(&self, nid: Nid) -> Result<Option<Nid>> {
        self.state()?.allocator().assemblage_of_nid(nid)
    }

    pub fn set_assemblage_for_nid(&self, nid: Nid, assemblage: Nid) -> Result<()> {
        self.state()?
            .allocator()
            .set_assemblage_for_nid(nid, assemblage)
    }

    /// Every nid allocated in `assemblage`, ascending by element sequence.
    pub fn nids_for_assemblage(&self, assemblage: Nid) -> Result<Vec<Nid>> {
        self.state()?.allocator().nids_for_assemblage(assemblage)
    }

    /// Every assemblage with a declared type, ascending.
    pub fn assemblage_nids(&self) -> Result<Vec<Nid>> {
        Ok(self.state()?.types().assemblages())
    }

    // --- types ------------------------------------------------------------

    /// Returns `true` when this call created the declaration.
    pub fn declare_assemblage_type(
        &self,
        assemblage: Nid,
        object_type: ObjectType,
        version_type: VersionType,
    ) -> Result<bool> {
        self.state()?
            .declare_assemblage_type(assemblage, object_type, version_type)
    }

    pub fn object_type_for_assemblage(&self, assemblage: Nid) -> Result<Option<ObjectType>> {
        Ok(self
            .state()?
            .types()
            .get(assemblage)
            .map(|types| types.object_type))
    }

    pub fn version_type_for_assemblage(&self, assemblage: Nid) -> Result<Option<VersionType>> {
        Ok(self
            .state()?
            .types()
            .get(assemblage)
            .map(|types| types.version_type))
    }

    // --- taxonomy ---------------------------------------------------------

    /// Atomically merge `data` into the taxonomy entry of `concept`.
    ///
    /// `concept` must already belong to an assemblage. Entries are keyed by
    /// the concept nid, so concepts from different assemblages never share one.
    pub fn taxonomy_accumulate_and_get<F>(
        &self,
        assemblage: Nid,
        concept: Nid,
        data: IntArray,
        merge: F,
    ) -> Result<IntArray>
    where
        F: FnOnce(Option<&IntArray>, IntArray) -> IntArray,
    {
        self.state()?
            .taxonomy_accumulate_and_get(assemblage, concept, data, merge)
    }

    pub fn taxonomy_get(&self, assemblage: Nid, concept: Nid) -> Result<Option<IntArray>> {
        self.state()?.taxonomy_get(assemblage, concept)
    }

    // --- reverse index ----------------------------------------------------

    pub fn add_semantic_reference(&self, referenced: Nid, referencing: Nid) -> Result<()> {
        self.state()?.add_semantic_reference(referenced, referencing)
    }

    pub fn semantic_nids_for_component(&self, referenced: Nid) -> Result<Vec<Nid>> {
        self.state()?.semantic_nids_for_component(referenced)
    }

    // --- durability -------------------------------------------------------

    /// Schedule a background flush, coalescing with one already pending.
    pub fn sync(&self) -> Result<SyncHandle> {
        self.running
            .read()
            .as_ref()
            .ok_or(ChronoError::NotStarted)?
            .coordinator
            .sync()
    }

    pub fn size_on_disk(&self) -> Result<u64> {
        self.state()?.size_on_disk()
    }

    pub fn sync_metrics(&self) -> Result<SyncMetricsSnapshot> {
        Ok(self
            .running
            .read()
            .as_ref()
            .ok_or(ChronoError::NotStarted)?
            .coordinator
            .metrics())
    }

    pub fn summary(&self) -> Result<StoreSummary> {
        let state = self.state()?;
        let assemblages = state
            .types()
            .assemblages()
            .into_iter()
            .filter_map(|nid| {
                state.types().get(nid).map(|types| AssemblageSummary {
                    nid,
                    object_type: types.object_type,
                    version_type: types.version_type,
                    element_count: state.allocator().element_count(nid),
                })
            })
            .collect();
        Ok(StoreSummary {
            root: self.config.root.clone(),
            start_state: self.start_state(),
            datastore_id: state.datastore_id(),
            assemblages,
            size_on_disk: state.size_on_disk()?,
        })
    }

    // --- observers --------------------------------------------------------

    pub fn register_write_observer(&self, observer: Arc<dyn WriteObserver>) -> ObserverId {
        self.observers.register(observer)
    }

    pub fn unregister_write_observer(&self, id: ObserverId) -> bool {
        self.observers.unregister(id)
    }

    /// Observer calls that returned an error since this handle was created.
    #[must_use]
    pub fn observer_failures(&self) -> u64 {
        self.observers.failures()
    }

    // --- internals --------------------------------------------------------

    fn state(&self) -> Result<Arc<StoreState>> {
        self.running
            .read()
            .as_ref()
            .map(|running| Arc::clone(&running.state))
            .ok_or(ChronoError::NotStarted)
    }

    fn resolve_datastore_id(&self, existing: Option<&StoreProperties>) -> Result<Option<Uuid>> {
        let path = self.config.path(DATASTORE_ID_FILE);
        let on_disk = read_datastore_id(&path)?;
        match (existing, on_disk) {
            (_, Some(id)) => {
                if let Some(recorded) = existing.and_then(|properties| properties.datastore_id) {
                    if recorded != id {
                        warn!(
                            identity_file = %id,
                            properties = %recorded,
                            "datastore id disagrees with properties; using identity file"
                        );
                    }
                }
                Ok(Some(id))
            }
            (None, None) => {
                let id = Uuid::new_v4();
                write_datastore_id(&path, id)?;
                Ok(Some(id))
            }
            (Some(_), None) => {
                warn!(
                    path = %path.display(),
                    "existing datastore has no identity file; id left unset"
                );
                Ok(None)
            }
        }
    }
}

impl Drop for Datastore {
    fn drop(&mut self) {
        if self.running.get_mut().is_some() {
            if let Err(err) = self.shutdown() {
                warn!(error = %err, "shutdown on drop failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chronicle::ChronicleRecord;

    fn nid(raw: i32) -> Nid {
        Nid::new(raw).unwrap()
    }

    #[test]
    fn operations_require_startup() {
        let dir = tempfile::tempdir().unwrap();
        let store = Datastore::new(StoreConfig::new(dir.path()));
        assert_eq!(store.start_state(), DatastoreStartState::NotYetChecked);
        assert!(matches!(
            store.get_chronicle_data(nid(-1)),
            Err(ChronoError::NotStarted)
        ));
        assert!(matches!(store.sync(), Err(ChronoError::NotStarted)));
        assert!(matches!(store.shutdown(), Err(ChronoError::NotStarted)));
        assert_eq!(store.datastore_id(), None);
    }

    #[test]
    fn fresh_root_then_existing() {
        let dir = tempfile::tempdir().unwrap();
        let store = Datastore::new(StoreConfig::new(dir.path()));
        assert_eq!(store.startup().unwrap(), DatastoreStartState::NoDatastore);
        assert!(matches!(store.startup(), Err(ChronoError::AlreadyStarted)));
        let id = store.datastore_id().unwrap();
        store.shutdown().unwrap();
        assert_eq!(store.start_state(), DatastoreStartState::NotYetChecked);

        assert_eq!(
            store.startup().unwrap(),
            DatastoreStartState::ExistingDatastore
        );
        assert_eq!(store.datastore_id(), Some(id));
        store.shutdown().unwrap();
    }

    #[test]
    fn missing_identity_file_is_a_warning() {
        let dir = tempfile::tempdir().unwrap();
        let store = Datastore::new(StoreConfig::new(dir.path()));
        store.startup().unwrap();
        store.shutdown().unwrap();
        fs::remove_file(dir.path().join(DATASTORE_ID_FILE)).unwrap();

        assert_eq!(
            store.startup().unwrap(),
            DatastoreStartState::ExistingDatastore
        );
        assert_eq!(store.datastore_id(), None);
        let id = Uuid::new_v4();
        store.set_datastore_id(id).unwrap();
        assert_eq!(store.datastore_id(), Some(id));
        assert_eq!(
            read_datastore_id(&dir.path().join(DATASTORE_ID_FILE)).unwrap(),
            Some(id)
        );
        store.shutdown().unwrap();
    }

    #[test]
    fn capacity_change_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let store = Datastore::new(StoreConfig::new(dir.path()).with_chronicle_spine_capacity(8));
        store.startup().unwrap();
        store.shutdown().unwrap();

        let other = Datastore::new(StoreConfig::new(dir.path()).with_chronicle_spine_capacity(16));
        let err = other.startup().unwrap_err();
        assert!(matches!(err, ChronoError::ConfigMismatch { .. }));
        assert!(!other.is_running());
    }

    #[test]
    fn summary_lists_assemblages() {
        let dir = tempfile::tempdir().unwrap();
        let store = Datastore::new(StoreConfig::new(dir.path()));
        store.startup().unwrap();
        let record = ChronicleRecord::new(
            nid(-5000),
            nid(-100),
            ObjectType::Semantic,
            VersionType::String,
            b"h",
        )
        .with_version(b"hello");
        store.put_chronicle(&record).unwrap();
        store.sync().unwrap().wait().unwrap();

        let summary = store.summary().unwrap();
        assert_eq!(summary.start_state, DatastoreStartState::NoDatastore);
        assert_eq!(
            summary.assemblages,
            vec![AssemblageSummary {
                nid: nid(-100),
                object_type: ObjectType::Semantic,
                version_type: VersionType::String,
                element_count: 1,
            }]
        );
        assert!(summary.size_on_disk > 0);
        store.shutdown().unwrap();
    }

    #[test]
    fn drop_flushes_a_running_store() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = Datastore::new(StoreConfig::new(dir.path()));
            store.startup().unwrap();
            store
                .declare_assemblage_type(nid(-9), ObjectType::Concept, VersionType::Concept)
                .unwrap();
        }
        let store = Datastore::new(StoreConfig::new(dir.path()));
        store.startup().unwrap();
        assert_eq!(
            store.object_type_for_assemblage(nid(-9)).unwrap(),
            Some(ObjectType::Concept)
        );
        store.shutdown().unwrap();
    }
}
