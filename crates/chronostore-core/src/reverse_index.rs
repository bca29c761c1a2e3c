//! Reverse component index: referenced nid -> nids of semantics referencing it.
//!
//! Global rather than per assemblage, keyed by `nid - i32::MIN`. Each entry is
//! kept sorted and free of duplicates; entries only grow.

use std::path::Path;

use chronostore_error::Result;
use chronostore_spine::{FlushStats, IntArray, SpinedArray};
use chronostore_types::Nid;

use crate::config::COMPONENT_TO_SEMANTIC_DIR;

#[derive(Debug)]
pub struct ReverseIndex {
    references: SpinedArray<IntArray>,
}

impl ReverseIndex {
    pub fn open(root: &Path, capacity: u32) -> Result<Self> {
        Ok(Self {
            references: SpinedArray::open(
                COMPONENT_TO_SEMANTIC_DIR,
                &root.join(COMPONENT_TO_SEMANTIC_DIR),
                capacity,
            )?,
        })
    }

    /// Record that `referencing` refers to `referenced`.
    pub fn add(&self, referenced: Nid, referencing: Nid) -> Result<()> {
        self.references.accumulate_and_get(
            referenced.spine_offset(),
            vec![referencing.get()],
            |current, incoming| {
                let mut set = current.cloned().unwrap_or_default();
                for nid in incoming {
                    if let Err(position) = set.binary_search(&nid) {
                        set.insert(position, nid);
                    }
                }
                set
            },
        )?;
        Ok(())
    }

    /// Nids referencing `referenced`, ascending. Empty when none.
    pub fn get(&self, referenced: Nid) -> Result<Vec<Nid>> {
        Ok(self
            .references
            .get(referenced.spine_offset())?
            .unwrap_or_default()
            .into_iter()
            .filter_map(Nid::new)
            .collect())
    }

    pub fn flush(&self) -> Result<FlushStats> {
        self.references.flush()
    }

    pub fn size_on_disk(&self) -> Result<u64> {
        self.references.size_on_disk()
    }
}
