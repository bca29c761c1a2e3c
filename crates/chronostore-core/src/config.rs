//! Store configuration and on-disk layout names.

use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Layout
// ---------------------------------------------------------------------------

pub const CHRONOLOGIES_DIR: &str = "chronologies";
pub const TAXONOMY_DIR: &str = "taxonomyMap";
pub const COMPONENT_TO_SEMANTIC_DIR: &str = "componentToSemanticMap";
pub const ASSEMBLAGE_TO_SEQUENCE_DIR: &str = "assemblageToSequenceMap";
pub const NID_TO_ASSEMBLAGE_DIR: &str = "nidToAssemblageMap";
pub const NID_TO_SEQUENCE_DIR: &str = "nidToElementSequenceMap";

pub const ASSEMBLAGE_TYPE_FILE: &str = "assemblageToTypeMap";
pub const ASSEMBLAGE_VERSION_TYPE_FILE: &str = "assemblageToVersionTypeMap";
pub const SEQUENCE_GENERATOR_FILE: &str = "sequenceGeneratorMap";
pub const PROPERTIES_FILE: &str = "properties.txt";
pub const DATASTORE_ID_FILE: &str = "dataStoreId.txt";

/// Default slots per spine page.
pub const DEFAULT_SPINE_CAPACITY: u32 = 1024;

/// Default name of the background sync thread.
pub const DEFAULT_SYNC_THREAD_NAME: &str = "chronostore-sync";

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Configuration for one store instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Store root directory. Created on startup if missing.
    pub root: PathBuf,

    /// Slots per chronicle page.
    ///
    /// Default: 1024. Fixed for the lifetime of a store.
    pub chronicle_spine_capacity: u32,

    /// Slots per taxonomy, identifier and reverse-index page.
    ///
    /// Default: 1024. Fixed for the lifetime of a store.
    pub index_spine_capacity: u32,

    /// Name given to the background sync thread.
    pub sync_thread_name: String,
}

impl StoreConfig {
    /// Default configuration rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            chronicle_spine_capacity: DEFAULT_SPINE_CAPACITY,
            index_spine_capacity: DEFAULT_SPINE_CAPACITY,
            sync_thread_name: DEFAULT_SYNC_THREAD_NAME.to_owned(),
        }
    }

    #[must_use]
    pub const fn with_chronicle_spine_capacity(mut self, capacity: u32) -> Self {
        self.chronicle_spine_capacity = capacity;
        self
    }

    #[must_use]
    pub const fn with_index_spine_capacity(mut self, capacity: u32) -> Self {
        self.index_spine_capacity = capacity;
        self
    }

    /// Validate and clamp configuration values.
    #[must_use]
    pub fn validated(mut self) -> Self {
        if self.chronicle_spine_capacity == 0 {
            self.chronicle_spine_capacity = 1;
        }
        if self.index_spine_capacity == 0 {
            self.index_spine_capacity = 1;
        }
        if self.sync_thread_name.is_empty() {
            DEFAULT_SYNC_THREAD_NAME.clone_into(&mut self.sync_thread_name);
        }
        self
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }
}
