//! Identifier and element-sequence allocator.
//!
//! Three maps back the two-level indirection from a nid to its slot in an
//! assemblage-partitioned array:
//!
//! | map                          | key               | value            |
//! |------------------------------|-------------------|------------------|
//! | `nidToAssemblageMap`         | nid               | assemblage nid   |
//! | `nidToElementSequenceMap`    | nid               | element sequence |
//! | `assemblageToSequenceMap/a/` | element sequence  | nid              |
//!
//! Nid-keyed arrays are indexed by `nid - i32::MIN`. Sequences come from a
//! per-assemblage counter persisted in `sequenceGeneratorMap`; the first value
//! is 1 and values are never reused.
//!
//! Allocation runs inside the nid -> sequence slot's compute-if-absent, so
//! two first writers of the same nid converge on one sequence. The inverse
//! entry is written inside the same step. Lock order is always
//! nid -> sequence spine, then sequence -> nid spine.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use chronostore_error::{ChronoError, Result};
use chronostore_spine::{FlushStats, SpinedArray};
use chronostore_types::{ElementSequence, Nid};
use parking_lot::Mutex;
use tracing::debug;

use crate::config::{
    ASSEMBLAGE_TO_SEQUENCE_DIR, NID_TO_ASSEMBLAGE_DIR, NID_TO_SEQUENCE_DIR,
    SEQUENCE_GENERATOR_FILE,
};
use crate::partition::PartitionedSpines;
use crate::tables::{read_int_table, write_int_table};

// ---------------------------------------------------------------------------
// Sequence generators
// ---------------------------------------------------------------------------

/// Per-assemblage monotonically increasing counters.
#[derive(Debug, Default)]
pub struct SequenceGenerators {
    /// Next sequence to hand out, per assemblage. Absent means 1.
    next: Mutex<HashMap<Nid, u32>>,
    dirty: AtomicBool,
}

impl SequenceGenerators {
    pub fn load(path: &Path) -> Result<Self> {
        let mut next = HashMap::new();
        for (key, value) in read_int_table(path)? {
            let assemblage = Nid::new(key).ok_or_else(|| {
                ChronoError::table_corrupt(path, format!("non-negative assemblage key {key}"))
            })?;
            let value = u32::try_from(value)
                .ok()
                .filter(|value| *value >= ElementSequence::FIRST.get())
                .ok_or_else(|| {
                    ChronoError::table_corrupt(
                        path,
                        format!("invalid next sequence {value} for assemblage {key}"),
                    )
                })?;
            next.insert(assemblage, value);
        }
        Ok(Self {
            next: Mutex::new(next),
            dirty: AtomicBool::new(false),
        })
    }

    /// Take the next sequence for `assemblage`.
    pub fn mint(&self, assemblage: Nid) -> Result<ElementSequence> {
        let mut next = self.next.lock();
        let counter = next
            .entry(assemblage)
            .or_insert(ElementSequence::FIRST.get());
        let sequence = ElementSequence::new(*counter).ok_or(ChronoError::SequenceExhausted {
            assemblage: assemblage.get(),
        })?;
        *counter += 1;
        self.dirty.store(true, Ordering::Release);
        Ok(sequence)
    }

    /// Number of sequences handed out for `assemblage`.
    #[must_use]
    pub fn issued(&self, assemblage: Nid) -> u32 {
        self.next
            .lock()
            .get(&assemblage)
            .map_or(0, |next| next - ElementSequence::FIRST.get())
    }

    /// Write the table if any counter moved since the last flush.
    pub fn flush(&self, path: &Path) -> Result<bool> {
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return Ok(false);
        }
        #[allow(clippy::cast_possible_wrap)]
        let entries: Vec<(i32, i32)> = self
            .next
            .lock()
            .iter()
            .map(|(assemblage, next)| (assemblage.get(), *next as i32))
            .collect();
        if let Err(err) = write_int_table(path, &entries) {
            self.dirty.store(true, Ordering::Release);
            return Err(err);
        }
        Ok(true)
    }
}

// ---------------------------------------------------------------------------
// Allocator
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct IdentifierAllocator {
    generators: SequenceGenerators,
    generator_path: PathBuf,
    nid_to_assemblage: SpinedArray<i32>,
    nid_to_sequence: SpinedArray<i32>,
    sequence_to_nid: PartitionedSpines<i32>,
}

impl IdentifierAllocator {
    /// Open the allocator under `root`. Only the generator table is read.
    pub fn open(root: &Path, capacity: u32) -> Result<Self> {
        let generator_path = root.join(SEQUENCE_GENERATOR_FILE);
        Ok(Self {
            generators: SequenceGenerators::load(&generator_path)?,
            generator_path,
            nid_to_assemblage: SpinedArray::open(
                NID_TO_ASSEMBLAGE_DIR,
                &root.join(NID_TO_ASSEMBLAGE_DIR),
                capacity,
            )?,
            nid_to_sequence: SpinedArray::open(
                NID_TO_SEQUENCE_DIR,
                &root.join(NID_TO_SEQUENCE_DIR),
                capacity,
            )?,
            sequence_to_nid: PartitionedSpines::new(
                ASSEMBLAGE_TO_SEQUENCE_DIR,
                root.join(ASSEMBLAGE_TO_SEQUENCE_DIR),
                capacity,
            ),
        })
    }

    /// The element sequence of `nid` within `assemblage`, allocating one on
    /// first use.
    ///
    /// Fails with `AssemblageConflict` if `nid` already belongs to another
    /// assemblage; nothing is allocated in that case.
    pub fn element_sequence_for_nid(&self, nid: Nid, assemblage: Nid) -> Result<ElementSequence> {
        self.set_assemblage_for_nid(nid, assemblage)?;
        let inverse = self.sequence_to_nid.get_or_open(assemblage)?;
        let (slot, minted) = self
            .nid_to_sequence
            .compute_if_absent(nid.spine_offset(), || {
                let sequence = self.generators.mint(assemblage)?;
                inverse.put(sequence.get(), nid.get())?;
                Ok(sequence.as_slot())
            })?;
        let sequence = self.decode_sequence(nid, slot)?;
        if minted {
            debug!(nid = %nid, assemblage = %assemblage, sequence = %sequence, "element sequence allocated");
        }
        Ok(sequence)
    }

    /// The sequence already assigned to `nid`, if any.
    pub fn sequence_of_nid(&self, nid: Nid) -> Result<Option<ElementSequence>> {
        self.nid_to_sequence
            .get(nid.spine_offset())?
            .map(|slot| self.decode_sequence(nid, slot))
            .transpose()
    }

    /// Inverse lookup. `None` when nothing was allocated at `sequence`.
    pub fn nid_for_element_sequence(
        &self,
        assemblage: Nid,
        sequence: ElementSequence,
    ) -> Result<Option<Nid>> {
        let Some(inverse) = self.sequence_to_nid.get_if_present(assemblage)? else {
            return Ok(None);
        };
        inverse
            .get(sequence.get())?
            .map(|raw| {
                Nid::new(raw).ok_or_else(|| {
                    ChronoError::spine_corrupt(
                        inverse.dir(),
                        format!("non-negative nid {raw} at sequence {sequence}"),
                    )
                })
            })
            .transpose()
    }

    pub fn assemblage_of_nid(&self, nid: Nid) -> Result<Option<Nid>> {
        self.nid_to_assemblage
            .get(nid.spine_offset())?
            .map(|raw| {
                Nid::new(raw).ok_or_else(|| {
                    ChronoError::spine_corrupt(
                        self.nid_to_assemblage.dir(),
                        format!("non-negative assemblage {raw} for nid {nid}"),
                    )
                })
            })
            .transpose()
    }

    /// Bind `nid` to `assemblage`. A no-op when already bound to it.
    pub fn set_assemblage_for_nid(&self, nid: Nid, assemblage: Nid) -> Result<()> {
        let (existing, _) = self
            .nid_to_assemblage
            .compute_if_absent(nid.spine_offset(), || Ok(assemblage.get()))?;
        if existing == assemblage.get() {
            Ok(())
        } else {
            Err(ChronoError::AssemblageConflict {
                nid: nid.get(),
                existing,
                requested: assemblage.get(),
            })
        }
    }

    /// Every nid allocated in `assemblage`, ascending by sequence.
    pub fn nids_for_assemblage(&self, assemblage: Nid) -> Result<Vec<Nid>> {
        let Some(inverse) = self.sequence_to_nid.get_if_present(assemblage)? else {
            return Ok(Vec::new());
        };
        Ok(inverse
            .populated()?
            .into_iter()
            .filter_map(|(_, raw)| Nid::new(raw))
            .collect())
    }

    /// Number of sequences handed out for `assemblage`.
    #[must_use]
    pub fn element_count(&self, assemblage: Nid) -> u32 {
        self.generators.issued(assemblage)
    }

    pub fn flush_generators(&self) -> Result<bool> {
        self.generators.flush(&self.generator_path)
    }

    /// Flush nid -> assemblage, nid -> sequence and every sequence -> nid map.
    pub fn flush_identifier_maps(&self) -> Result<FlushStats> {
        let mut stats = self.nid_to_assemblage.flush()?;
        stats.merge(self.nid_to_sequence.flush()?);
        stats.merge(self.sequence_to_nid.flush_all()?);
        Ok(stats)
    }

    pub fn size_on_disk(&self) -> Result<u64> {
        Ok(self.nid_to_assemblage.size_on_disk()?
            + self.nid_to_sequence.size_on_disk()?
            + self.sequence_to_nid.size_on_disk()?)
    }

    fn decode_sequence(&self, nid: Nid, slot: i32) -> Result<ElementSequence> {
        ElementSequence::from_slot(slot).ok_or_else(|| {
            ChronoError::spine_corrupt(
                self.nid_to_sequence.dir(),
                format!("invalid element sequence {slot} for nid {nid}"),
            )
        })
    }
}
