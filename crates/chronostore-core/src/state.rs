//! In-memory state of one running store.
//!
//! Built by `startup`, dropped by `shutdown`. Every structure here is owned by
//! exactly one [`StoreState`]; nothing is process-global.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chronostore_error::{ChronoError, Result};
use chronostore_spine::{FlushStats, IntArray};
use chronostore_types::{ElementSequence, Nid, ObjectType, VersionType};
use parking_lot::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::allocator::IdentifierAllocator;
use crate::chronicle::Chronicle;
use crate::chronicle_store::ChronicleStore;
use crate::codec::encode_chronicle;
use crate::config::{
    ASSEMBLAGE_TYPE_FILE, ASSEMBLAGE_VERSION_TYPE_FILE, CHRONOLOGIES_DIR, DATASTORE_ID_FILE,
    PROPERTIES_FILE, StoreConfig, TAXONOMY_DIR,
};
use crate::observer::ObserverRegistry;
use crate::properties::{StoreProperties, write_datastore_id};
use crate::reverse_index::ReverseIndex;
use crate::sync::{FlushTarget, SyncReport, epoch_millis};
use crate::taxonomy::TaxonomyStore;
use crate::type_registry::{AssemblageType, AssemblageTypes};

#[derive(Debug)]
pub struct StoreState {
    config: StoreConfig,
    types: AssemblageTypes,
    allocator: IdentifierAllocator,
    chronicles: ChronicleStore,
    taxonomy: TaxonomyStore,
    reverse_index: ReverseIndex,
    observers: Arc<ObserverRegistry>,
    datastore_id: RwLock<Option<Uuid>>,
}

impl StoreState {
    /// Read the small tables eagerly; leave every spine to load lazily.
    pub fn open(
        config: StoreConfig,
        observers: Arc<ObserverRegistry>,
        datastore_id: Option<Uuid>,
    ) -> Result<Self> {
        let root = config.root.clone();
        Ok(Self {
            types: AssemblageTypes::load(
                &root.join(ASSEMBLAGE_TYPE_FILE),
                &root.join(ASSEMBLAGE_VERSION_TYPE_FILE),
            )?,
            allocator: IdentifierAllocator::open(&root, config.index_spine_capacity)?,
            chronicles: ChronicleStore::new(
                root.join(CHRONOLOGIES_DIR),
                config.chronicle_spine_capacity,
            ),
            taxonomy: TaxonomyStore::new(root.join(TAXONOMY_DIR), config.index_spine_capacity),
            reverse_index: ReverseIndex::open(&root, config.index_spine_capacity)?,
            observers,
            datastore_id: RwLock::new(datastore_id),
            config,
        })
    }

    #[must_use]
    pub fn root(&self) -> &std::path::Path {
        &self.config.root
    }

    // --- chronicles -------------------------------------------------------

    /// Store `chronicle`, then notify observers.
    ///
    /// Framing and assemblage binding are checked before anything is mutated.
    pub fn put_chronicle(&self, chronicle: &dyn Chronicle) -> Result<ElementSequence> {
        let nid = chronicle.nid();
        let assemblage = chronicle.assemblage_nid();
        let encoded = encode_chronicle(chronicle.data(), chronicle.versions_start())?;

        if let Some(existing) = self.allocator.assemblage_of_nid(nid)? {
            if existing != assemblage {
                return Err(ChronoError::AssemblageConflict {
                    nid: nid.get(),
                    existing: existing.get(),
                    requested: assemblage.get(),
                });
            }
        }
        self.types.declare(
            assemblage,
            AssemblageType::new(chronicle.object_type(), chronicle.version_type()),
        )?;
        let sequence = self.allocator.element_sequence_for_nid(nid, assemblage)?;
        let versions = self.chronicles.write_encoded(assemblage, sequence, encoded)?;
        if let Some(referenced) = chronicle.referenced_component_nid() {
            self.reverse_index.add(referenced, nid)?;
        }
        debug!(
            nid = %nid,
            assemblage = %assemblage,
            sequence = %sequence,
            versions,
            "chronicle written"
        );

        self.observers.notify_written(chronicle);
        Ok(sequence)
    }

    pub fn get_chronicle_data(&self, nid: Nid) -> Result<Option<Vec<u8>>> {
        let Some((assemblage, sequence)) = self.locate(nid)? else {
            return Ok(None);
        };
        self.chronicles.read(assemblage, sequence)
    }

    /// Data exists for `nid` and its assemblage holds `expected` objects.
    pub fn has_chronicle_data(&self, nid: Nid, expected: ObjectType) -> Result<bool> {
        let Some((assemblage, sequence)) = self.locate(nid)? else {
            return Ok(false);
        };
        if self.types.get(assemblage).map(|types| types.object_type) != Some(expected) {
            return Ok(false);
        }
        self.chronicles.contains(assemblage, sequence)
    }

    fn locate(&self, nid: Nid) -> Result<Option<(Nid, ElementSequence)>> {
        let Some(assemblage) = self.allocator.assemblage_of_nid(nid)? else {
            return Ok(None);
        };
        Ok(self
            .allocator
            .sequence_of_nid(nid)?
            .map(|sequence| (assemblage, sequence)))
    }

    // --- identifiers ------------------------------------------------------

    #[must_use]
    pub const fn allocator(&self) -> &IdentifierAllocator {
        &self.allocator
    }

    // --- types ------------------------------------------------------------

    pub fn declare_assemblage_type(
        &self,
        assemblage: Nid,
        object_type: ObjectType,
        version_type: VersionType,
    ) -> Result<bool> {
        self.types
            .declare(assemblage, AssemblageType::new(object_type, version_type))
    }

    #[must_use]
    pub const fn types(&self) -> &AssemblageTypes {
        &self.types
    }

    // --- taxonomy ---------------------------------------------------------

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
        if self.allocator.assemblage_of_nid(concept)?.is_none() {
            return Err(ChronoError::NidNotRegistered { nid: concept.get() });
        }
        self.taxonomy
            .accumulate_and_get(assemblage, concept, data, merge)
    }

    pub fn taxonomy_get(&self, assemblage: Nid, concept: Nid) -> Result<Option<IntArray>> {
        self.taxonomy.get(assemblage, concept)
    }

    // --- reverse index ----------------------------------------------------

    pub fn add_semantic_reference(&self, referenced: Nid, referencing: Nid) -> Result<()> {
        self.reverse_index.add(referenced, referencing)
    }

    pub fn semantic_nids_for_component(&self, referenced: Nid) -> Result<Vec<Nid>> {
        self.reverse_index.get(referenced)
    }

    // --- identity ---------------------------------------------------------

    #[must_use]
    pub fn datastore_id(&self) -> Option<Uuid> {
        *self.datastore_id.read()
    }

    pub fn set_datastore_id(&self, id: Uuid) -> Result<()> {
        write_datastore_id(&self.config.path(DATASTORE_ID_FILE), id)?;
        *self.datastore_id.write() = Some(id);
        Ok(())
    }

    // --- capacity ---------------------------------------------------------

    /// Bytes held in spine page files across every map.
    pub fn size_on_disk(&self) -> Result<u64> {
        Ok(self.chronicles.size_on_disk()?
            + self.taxonomy.size_on_disk()?
            + self.reverse_index.size_on_disk()?
            + self.allocator.size_on_disk()?)
    }

    fn properties(&self, last_sync_epoch_ms: u64) -> StoreProperties {
        StoreProperties {
            datastore_id: self.datastore_id(),
            last_sync_epoch_ms,
            assemblage_count: self.types.len(),
            ..StoreProperties::for_config(&self.config)
        }
    }

    fn type_table_paths(&self) -> (PathBuf, PathBuf) {
        (
            self.config.path(ASSEMBLAGE_TYPE_FILE),
            self.config.path(ASSEMBLAGE_VERSION_TYPE_FILE),
        )
    }
}

impl FlushTarget for StoreState {
    fn flush(&self, sync_id: u64) -> Result<SyncReport> {
        let started = Instant::now();
        let mut stats = FlushStats::default();

        self.allocator.flush_generators()?;
        let (object_types, version_types) = self.type_table_paths();
        self.types.flush(&object_types, &version_types)?;
        stats.merge(self.reverse_index.flush()?);
        stats.merge(self.chronicles.flush_all()?);
        stats.merge(self.taxonomy.flush_all()?);
        stats.merge(self.allocator.flush_identifier_maps()?);
        // Sequences minted while the maps above were written must not be
        // reissued after a restart.
        self.allocator.flush_generators()?;

        let completed_at_epoch_ms = epoch_millis();
        self.properties(completed_at_epoch_ms)
            .write(&self.config.path(PROPERTIES_FILE))?;

        let report = SyncReport {
            sync_id,
            pages_written: stats.pages_written,
            bytes_written: stats.bytes_written,
            duration_us: u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX),
            completed_at_epoch_ms,
        };
        self.observers.notify_sync(&report);
        Ok(report)
    }
}
