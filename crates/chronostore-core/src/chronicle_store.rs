//! Assemblage-partitioned chronicle storage keyed by element sequence.

use std::path::PathBuf;

use chronostore_error::Result;
use chronostore_spine::{ByteArrays, FlushStats};
use chronostore_types::{ElementSequence, Nid};

use crate::codec::{decode_chronicle, encode_chronicle, merge_chronicle};
use crate::config::CHRONOLOGIES_DIR;
use crate::partition::PartitionedSpines;

#[derive(Debug)]
pub struct ChronicleStore {
    chronologies: PartitionedSpines<ByteArrays>,
}

impl ChronicleStore {
    #[must_use]
    pub fn new(base: PathBuf, capacity: u32) -> Self {
        Self {
            chronologies: PartitionedSpines::new(CHRONOLOGIES_DIR, base, capacity),
        }
    }

    /// Encode `data` and merge it into the chronicle stored at `sequence`.
    ///
    /// Returns the number of version records held after the merge.
    pub fn write(
        &self,
        assemblage: Nid,
        sequence: ElementSequence,
        data: &[u8],
        versions_start: usize,
    ) -> Result<usize> {
        let encoded = encode_chronicle(data, versions_start)?;
        self.write_encoded(assemblage, sequence, encoded)
    }

    /// Merge an already encoded byte-array list into the stored chronicle.
    pub fn write_encoded(
        &self,
        assemblage: Nid,
        sequence: ElementSequence,
        encoded: ByteArrays,
    ) -> Result<usize> {
        let spines = self.chronologies.get_or_open(assemblage)?;
        let merged = spines.accumulate_and_get(sequence.get(), encoded, merge_chronicle)?;
        Ok(merged.len().saturating_sub(1))
    }

    /// The canonical buffer stored at `sequence`, if any.
    pub fn read(&self, assemblage: Nid, sequence: ElementSequence) -> Result<Option<Vec<u8>>> {
        let Some(spines) = self.chronologies.get_if_present(assemblage)? else {
            return Ok(None);
        };
        spines
            .get(sequence.get())?
            .map(|records| decode_chronicle(&records))
            .transpose()
    }

    pub fn contains(&self, assemblage: Nid, sequence: ElementSequence) -> Result<bool> {
        match self.chronologies.get_if_present(assemblage)? {
            Some(spines) => spines.contains(sequence.get()),
            None => Ok(false),
        }
    }

    pub fn flush_all(&self) -> Result<FlushStats> {
        self.chronologies.flush_all()
    }

    pub fn size_on_disk(&self) -> Result<u64> {
        self.chronologies.size_on_disk()
    }

    #[must_use]
    pub fn is_open(&self, assemblage: Nid) -> bool {
        self.chronologies.is_open(assemblage)
    }
}
