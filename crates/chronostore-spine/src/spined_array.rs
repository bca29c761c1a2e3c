//! Lazily loaded, paged sparse array.
//!
//! A [`SpinedArray`] maps a dense `u32` element index onto fixed-capacity
//! spines. Spines are materialized on first write, loaded from the backing
//! [`SpineStore`] on first read after a restart, and written back by
//! [`SpinedArray::flush`] only when dirty.
//!
//! Locking is two-level: the spine map is guarded by one `RwLock` that is
//! held only long enough to look up or insert an `Arc<Spine>`; each spine
//! carries its own `RwLock` over its slots. Disk loads happen outside both
//! locks and race with "first insert wins", so two threads faulting in the
//! same page converge on one resident copy.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use chronostore_error::{ChronoError, Result};
use chronostore_types::SpineIndex;
use parking_lot::RwLock;
use tracing::{debug, error};

use crate::element::SpineElement;
use crate::store::SpineStore;

struct Spine<T> {
    slots: RwLock<Vec<Option<T>>>,
    /// Set under the slot write lock whenever a slot changes.
    dirty: AtomicBool,
}

impl<T: SpineElement> Spine<T> {
    fn empty(capacity: u32) -> Self {
        Self {
            slots: RwLock::new(vec![None; capacity as usize]),
            dirty: AtomicBool::new(false),
        }
    }

    fn loaded(slots: Vec<Option<T>>) -> Self {
        Self {
            slots: RwLock::new(slots),
            dirty: AtomicBool::new(false),
        }
    }
}

/// Outcome of one [`SpinedArray::flush`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushStats {
    pub pages_written: u64,
    pub bytes_written: u64,
}

impl FlushStats {
    pub fn merge(&mut self, other: Self) {
        self.pages_written += other.pages_written;
        self.bytes_written += other.bytes_written;
    }
}

/// Paged sparse array of `T` backed by one spine directory.
pub struct SpinedArray<T: SpineElement> {
    name: String,
    capacity: u32,
    store: SpineStore,
    spines: RwLock<HashMap<SpineIndex, Arc<Spine<T>>>>,
    /// Persisted page-discovery bound (`spineCount`).
    spine_count: AtomicU32,
}

impl<T: SpineElement> std::fmt::Debug for SpinedArray<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpinedArray")
            .field("name", &self.name)
            .field("kind", &T::KIND)
            .field("capacity", &self.capacity)
            .field("dir", &self.store.dir())
            .field("loaded_spines", &self.loaded_spine_count())
            .finish_non_exhaustive()
    }
}

impl<T: SpineElement> SpinedArray<T> {
    /// Open the array over `dir`. No page is read; only the spine count.
    pub fn open(name: impl Into<String>, dir: &Path, capacity: u32) -> Result<Self> {
        let capacity = capacity.max(1);
        let store = SpineStore::new(dir);
        let spine_count = store.reconcile_spine_count()?;
        Ok(Self {
            name: name.into(),
            capacity,
            store,
            spines: RwLock::new(HashMap::new()),
            spine_count: AtomicU32::new(spine_count),
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn capacity(&self) -> u32 {
        self.capacity
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        self.store.dir()
    }

    /// Value at `index`, loading its spine if needed.
    pub fn get(&self, index: u32) -> Result<Option<T>> {
        let (spine_index, slot) = SpineIndex::locate(index, self.capacity);
        let Some(spine) = self.resident_or_load(spine_index)? else {
            return Ok(None);
        };
        let slots = spine.slots.read();
        Ok(slots[slot].clone())
    }

    pub fn contains(&self, index: u32) -> Result<bool> {
        let (spine_index, slot) = SpineIndex::locate(index, self.capacity);
        let Some(spine) = self.resident_or_load(spine_index)? else {
            return Ok(false);
        };
        let present = spine.slots.read()[slot].is_some();
        Ok(present)
    }

    /// Store `value` at `index`, replacing any previous value.
    pub fn put(&self, index: u32, value: T) -> Result<()> {
        self.check_storable(index, &value)?;
        let (spine_index, slot) = SpineIndex::locate(index, self.capacity);
        let spine = self.resident_or_create(spine_index)?;
        let mut slots = spine.slots.write();
        slots[slot] = Some(value);
        spine.dirty.store(true, Ordering::Release);
        Ok(())
    }

    /// Atomically replace the value at `index` with `merge(current, value)`
    /// and return the stored result.
    pub fn accumulate_and_get<F>(&self, index: u32, value: T, merge: F) -> Result<T>
    where
        F: FnOnce(Option<&T>, T) -> T,
    {
        let (spine_index, slot) = SpineIndex::locate(index, self.capacity);
        let spine = self.resident_or_create(spine_index)?;
        let mut slots = spine.slots.write();
        let merged = merge(slots[slot].as_ref(), value);
        self.check_storable(index, &merged)?;
        slots[slot] = Some(merged.clone());
        spine.dirty.store(true, Ordering::Release);
        Ok(merged)
    }

    /// Return the value at `index`, computing and storing it if absent.
    ///
    /// The spine stays write-locked while `compute` runs, so concurrent
    /// callers for the same index observe exactly one computed value. The
    /// boolean is `true` when this call stored the value. A failing `compute`
    /// leaves the slot untouched.
    pub fn compute_if_absent<F>(&self, index: u32, compute: F) -> Result<(T, bool)>
    where
        F: FnOnce() -> Result<T>,
    {
        let (spine_index, slot) = SpineIndex::locate(index, self.capacity);
        let spine = self.resident_or_create(spine_index)?;
        let mut slots = spine.slots.write();
        if let Some(existing) = &slots[slot] {
            return Ok((existing.clone(), false));
        }
        let value = compute()?;
        self.check_storable(index, &value)?;
        slots[slot] = Some(value.clone());
        spine.dirty.store(true, Ordering::Release);
        Ok((value, true))
    }

    /// Every populated `(index, value)` pair, ascending by index.
    ///
    /// Pages present on disk but not yet resident are loaded.
    pub fn populated(&self) -> Result<Vec<(u32, T)>> {
        let mut indexes: BTreeSet<SpineIndex> = self.store.page_indexes()?.into_iter().collect();
        indexes.extend(self.spines.read().keys().copied());

        let mut out = Vec::new();
        for spine_index in indexes {
            let Some(spine) = self.resident_or_load(spine_index)? else {
                continue;
            };
            let first = spine_index.first_element(self.capacity);
            let slots = spine.slots.read();
            for (offset, slot) in slots.iter().enumerate() {
                let Some(value) = slot else { continue };
                if let Ok(index) = u32::try_from(first + offset as u64) {
                    out.push((index, value.clone()));
                }
            }
        }
        Ok(out)
    }

    /// Write every dirty spine, then advance `spineCount` if needed.
    ///
    /// A spine whose write fails is marked dirty again and the error is
    /// returned; pages already written stay written.
    pub fn flush(&self) -> Result<FlushStats> {
        let mut resident: Vec<(SpineIndex, Arc<Spine<T>>)> = self
            .spines
            .read()
            .iter()
            .map(|(index, spine)| (*index, Arc::clone(spine)))
            .collect();
        resident.sort_unstable_by_key(|(index, _)| *index);

        let mut stats = FlushStats::default();
        let mut highest: Option<SpineIndex> = None;
        for (spine_index, spine) in resident {
            if !spine.dirty.swap(false, Ordering::AcqRel) {
                continue;
            }
            let snapshot = spine.slots.read().clone();
            match self.store.put(spine_index, &snapshot) {
                Ok(bytes) => {
                    stats.pages_written += 1;
                    stats.bytes_written += bytes;
                    highest = Some(highest.map_or(spine_index, |h| h.max(spine_index)));
                }
                Err(err) => {
                    spine.dirty.store(true, Ordering::Release);
                    error!(
                        array = %self.name,
                        spine = spine_index.get(),
                        error = %err,
                        "spine flush failed"
                    );
                    return Err(err);
                }
            }
        }

        if let Some(highest) = highest {
            let needed = highest.get().saturating_add(1);
            if needed > self.spine_count.load(Ordering::Acquire) {
                self.store.write_spine_count(needed)?;
                self.spine_count.fetch_max(needed, Ordering::AcqRel);
            }
        }
        if stats.pages_written > 0 {
            debug!(
                array = %self.name,
                pages = stats.pages_written,
                bytes = stats.bytes_written,
                "spined array flushed"
            );
        }
        Ok(stats)
    }

    /// Number of spines currently held in memory.
    #[must_use]
    pub fn loaded_spine_count(&self) -> usize {
        self.spines.read().len()
    }

    #[must_use]
    pub fn is_spine_loaded(&self, index: SpineIndex) -> bool {
        self.spines.read().contains_key(&index)
    }

    /// Number of resident spines with unflushed changes.
    #[must_use]
    pub fn dirty_spine_count(&self) -> usize {
        self.spines
            .read()
            .values()
            .filter(|spine| spine.dirty.load(Ordering::Acquire))
            .count()
    }

    /// Persisted page-discovery bound.
    #[must_use]
    pub fn spine_count(&self) -> u32 {
        self.spine_count.load(Ordering::Acquire)
    }

    pub fn size_on_disk(&self) -> Result<u64> {
        self.store.size_on_disk()
    }

    fn check_storable(&self, index: u32, value: &T) -> Result<()> {
        if value.is_storable() {
            Ok(())
        } else {
            Err(ChronoError::internal(format!(
                "{} value at index {index} of '{}' collides with the absent marker",
                T::KIND,
                self.name
            )))
        }
    }

    fn resident(&self, index: SpineIndex) -> Option<Arc<Spine<T>>> {
        self.spines.read().get(&index).cloned()
    }

    fn install(&self, index: SpineIndex, spine: Spine<T>) -> Arc<Spine<T>> {
        let mut spines = self.spines.write();
        Arc::clone(spines.entry(index).or_insert_with(|| Arc::new(spine)))
    }

    fn resident_or_load(&self, index: SpineIndex) -> Result<Option<Arc<Spine<T>>>> {
        if let Some(spine) = self.resident(index) {
            return Ok(Some(spine));
        }
        match self.store.get::<T>(index, self.capacity)? {
            Some(slots) => Ok(Some(self.install(index, Spine::loaded(slots)))),
            // A concurrent writer may have created the spine meanwhile.
            None => Ok(self.resident(index)),
        }
    }

    fn resident_or_create(&self, index: SpineIndex) -> Result<Arc<Spine<T>>> {
        if let Some(spine) = self.resident_or_load(index)? {
            return Ok(spine);
        }
        Ok(self.install(index, Spine::empty(self.capacity)))
    }
}
