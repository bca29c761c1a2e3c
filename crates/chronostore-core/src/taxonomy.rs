//! Taxonomy adjacency store.
//!
//! Per-assemblage int arrays keyed by the concept nid (`nid - i32::MIN`), so
//! concepts from any assemblage get distinct entries in one taxonomy. Updates
//! go through [`TaxonomyStore::accumulate_and_get`], which applies the merge
//! function while the page is write-locked, so concurrent writers adding
//! different edges to one concept never lose each other's work.

use std::path::PathBuf;

use chronostore_error::Result;
use chronostore_spine::{FlushStats, IntArray};
use chronostore_types::Nid;

use crate::config::TAXONOMY_DIR;
use crate::partition::PartitionedSpines;

#[derive(Debug)]
pub struct TaxonomyStore {
    spines: PartitionedSpines<IntArray>,
}

impl TaxonomyStore {
    #[must_use]
    pub fn new(base: PathBuf, capacity: u32) -> Self {
        Self {
            spines: PartitionedSpines::new(TAXONOMY_DIR, base, capacity),
        }
    }

    pub fn accumulate_and_get<F>(
        &self,
        assemblage: Nid,
        concept: Nid,
        data: IntArray,
        merge: F,
    ) -> Result<IntArray>
    where
        F: FnOnce(Option<&IntArray>, IntArray) -> IntArray,
    {
        self.spines
            .get_or_open(assemblage)?
            .accumulate_and_get(concept.spine_offset(), data, merge)
    }

    pub fn get(&self, assemblage: Nid, concept: Nid) -> Result<Option<IntArray>> {
        match self.spines.get_if_present(assemblage)? {
            Some(spines) => spines.get(concept.spine_offset()),
            None => Ok(None),
        }
    }

    #[must_use]
    pub fn is_open(&self, assemblage: Nid) -> bool {
        self.spines.is_open(assemblage)
    }

    pub fn flush_all(&self) -> Result<FlushStats> {
        self.spines.flush_all()
    }

    pub fn size_on_disk(&self) -> Result<u64> {
        self.spines.size_on_disk()
    }
}

/// Sorted, de-duplicated union of the stored array and `incoming`.
#[must_use]
pub fn union_merge(current: Option<&IntArray>, incoming: IntArray) -> IntArray {
    let mut merged = current.cloned().unwrap_or_default();
    merged.extend(incoming);
    merged.sort_unstable();
    merged.dedup();
    merged
}
