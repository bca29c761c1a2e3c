//! Assemblage-partitioned spined arrays.
//!
//! One [`SpinedArray`] per assemblage, each in its own `<base>/<assemblage>/`
//! directory. Arrays are opened on first use; an assemblage never touched
//! since startup never reads anything from disk.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chronostore_error::{ChronoError, Result};
use chronostore_spine::{FlushStats, SpineElement, SpineStore, SpinedArray};
use chronostore_types::Nid;
use parking_lot::RwLock;
use tracing::error;

pub struct PartitionedSpines<T: SpineElement> {
    name: &'static str,
    base: PathBuf,
    capacity: u32,
    partitions: RwLock<HashMap<Nid, Arc<SpinedArray<T>>>>,
}

impl<T: SpineElement> std::fmt::Debug for PartitionedSpines<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartitionedSpines")
            .field("name", &self.name)
            .field("base", &self.base)
            .field("open", &self.partitions.read().len())
            .finish_non_exhaustive()
    }
}

impl<T: SpineElement> PartitionedSpines<T> {
    #[must_use]
    pub fn new(name: &'static str, base: PathBuf, capacity: u32) -> Self {
        Self {
            name,
            base,
            capacity,
            partitions: RwLock::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn base(&self) -> &Path {
        &self.base
    }

    /// The array for `assemblage`, opening it if needed.
    ///
    /// Opening happens outside the map lock; if two callers race, the first
    /// insert wins and the other's array is dropped unused.
    pub fn get_or_open(&self, assemblage: Nid) -> Result<Arc<SpinedArray<T>>> {
        if let Some(array) = self.partitions.read().get(&assemblage) {
            return Ok(Arc::clone(array));
        }
        let opened = SpinedArray::open(
            format!("{}/{assemblage}", self.name),
            &self.partition_dir(assemblage),
            self.capacity,
        )?;
        let mut partitions = self.partitions.write();
        Ok(Arc::clone(
            partitions
                .entry(assemblage)
                .or_insert_with(|| Arc::new(opened)),
        ))
    }

    /// The array for `assemblage` when it is open or has a directory on
    /// disk. Read paths use this so lookups of unknown assemblages leave
    /// the partition map untouched.
    pub fn get_if_present(&self, assemblage: Nid) -> Result<Option<Arc<SpinedArray<T>>>> {
        if let Some(array) = self.partitions.read().get(&assemblage) {
            return Ok(Some(Arc::clone(array)));
        }
        if !self.partition_dir(assemblage).is_dir() {
            return Ok(None);
        }
        self.get_or_open(assemblage).map(Some)
    }

    #[must_use]
    pub fn partition_dir(&self, assemblage: Nid) -> PathBuf {
        self.base.join(assemblage.get().to_string())
    }

    /// Flush every open partition, stopping at the first failure.
    pub fn flush_all(&self) -> Result<FlushStats> {
        let mut open: Vec<(Nid, Arc<SpinedArray<T>>)> = self
            .partitions
            .read()
            .iter()
            .map(|(nid, array)| (*nid, Arc::clone(array)))
            .collect();
        open.sort_unstable_by_key(|(nid, _)| *nid);

        let mut stats = FlushStats::default();
        for (assemblage, array) in open {
            let flushed = array.flush().inspect_err(|err| {
                error!(
                    map = self.name,
                    assemblage = %assemblage,
                    error = %err,
                    "partition flush failed"
                );
            })?;
            stats.merge(flushed);
        }
        Ok(stats)
    }

    /// Assemblages with a partition directory on disk, ascending.
    pub fn assemblages_on_disk(&self) -> Result<Vec<Nid>> {
        let entries = match fs::read_dir(&self.base) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(ChronoError::IoRead {
                    path: self.base.clone(),
                    source,
                });
            }
        };
        let mut nids = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if let Some(nid) = entry
                .file_name()
                .to_str()
                .and_then(|name| name.parse::<i32>().ok())
                .and_then(Nid::new)
            {
                nids.push(nid);
            }
        }
        nids.sort_unstable();
        Ok(nids)
    }

    /// Page bytes on disk across every partition, open or not.
    pub fn size_on_disk(&self) -> Result<u64> {
        let mut total = 0;
        for assemblage in self.assemblages_on_disk()? {
            total += SpineStore::new(self.partition_dir(assemblage)).size_on_disk()?;
        }
        Ok(total)
    }

    #[must_use]
    pub fn open_count(&self) -> usize {
        self.partitions.read().len()
    }

    #[must_use]
    pub fn is_open(&self, assemblage: Nid) -> bool {
        self.partitions.read().contains_key(&assemblage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nid(raw: i32) -> Nid {
        Nid::new(raw).unwrap()
    }

    #[test]
    fn partitions_live_in_assemblage_directories() {
        let dir = tempfile::tempdir().unwrap();
        let spines: PartitionedSpines<i32> =
            PartitionedSpines::new("seq", dir.path().join("map"), 4);
        spines.get_or_open(nid(-100)).unwrap().put(1, -5000).unwrap();
        spines.get_or_open(nid(-7)).unwrap().put(6, -9).unwrap();
        assert_eq!(spines.open_count(), 2);

        let stats = spines.flush_all().unwrap();
        assert_eq!(stats.pages_written, 2);
        assert!(dir.path().join("map").join("-100").join("SPINE_0").exists());
        assert!(dir.path().join("map").join("-7").join("SPINE_1").exists());
        assert_eq!(spines.assemblages_on_disk().unwrap(), vec![nid(-100), nid(-7)]);
        assert_eq!(spines.size_on_disk().unwrap(), 2 * (4 + 4 * 4));
    }

    #[test]
    fn untouched_partitions_stay_closed() {
        let dir = tempfile::tempdir().unwrap();
        {
            let spines: PartitionedSpines<i32> =
                PartitionedSpines::new("seq", dir.path().to_path_buf(), 4);
            spines.get_or_open(nid(-1)).unwrap().put(0, -2).unwrap();
            spines.get_or_open(nid(-3)).unwrap().put(0, -4).unwrap();
            spines.flush_all().unwrap();
        }
        let spines: PartitionedSpines<i32> =
            PartitionedSpines::new("seq", dir.path().to_path_buf(), 4);
        assert_eq!(spines.get_or_open(nid(-1)).unwrap().get(0).unwrap(), Some(-2));
        assert!(spines.is_open(nid(-1)));
        assert!(!spines.is_open(nid(-3)));
    }

    #[test]
    fn lookups_of_unknown_assemblages_open_nothing() {
        let dir = tempfile::tempdir().unwrap();
        {
            let spines: PartitionedSpines<i32> =
                PartitionedSpines::new("seq", dir.path().to_path_buf(), 4);
            spines.get_or_open(nid(-1)).unwrap().put(0, -2).unwrap();
            spines.flush_all().unwrap();
        }
        let spines: PartitionedSpines<i32> =
            PartitionedSpines::new("seq", dir.path().to_path_buf(), 4);
        for raw in -500..-400 {
            assert!(spines.get_if_present(nid(raw)).unwrap().is_none());
        }
        assert_eq!(spines.open_count(), 0);
        assert!(!dir.path().join("-450").exists());

        let on_disk = spines.get_if_present(nid(-1)).unwrap().unwrap();
        assert_eq!(on_disk.get(0).unwrap(), Some(-2));
        assert_eq!(spines.open_count(), 1);

        // Opened for writing but not yet flushed still counts as present.
        spines.get_or_open(nid(-9)).unwrap().put(1, -3).unwrap();
        assert!(spines.get_if_present(nid(-9)).unwrap().is_some());
    }
}
