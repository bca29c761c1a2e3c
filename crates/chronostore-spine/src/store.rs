//! Directory-backed page files for one spined array.
//!
//! ```text
//! <dir>/
//! ├── SPINE_0        i32 element count, then `count` encoded elements
//! ├── SPINE_1
//! ├── ...
//! └── spineCount     i32: highest spine index written + 1
//! ```
//!
//! Page writes are serialized per directory through a single-permit gate so
//! concurrent flushers never interleave writes to the same medium. Reads take
//! no lock.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chronostore_error::{ChronoError, Result};
use chronostore_types::SpineIndex;
use parking_lot::Mutex;
use tracing::{debug, error, warn};

use crate::element::SpineElement;
use crate::file_io::{ByteReader, put_i32, read_optional, write_atomic};
use crate::metrics::GLOBAL_SPINE_METRICS;

/// File name prefix of every page file.
pub const SPINE_FILE_PREFIX: &str = "SPINE_";

/// Name of the per-directory spine count file.
pub const SPINE_COUNT_FILE: &str = "spineCount";

/// Page file persistence for one directory.
#[derive(Debug)]
pub struct SpineStore {
    dir: PathBuf,
    write_gate: Mutex<()>,
}

impl SpineStore {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_gate: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub fn page_path(&self, index: SpineIndex) -> PathBuf {
        self.dir.join(format!("{SPINE_FILE_PREFIX}{}", index.get()))
    }

    /// Load one page, or `None` if it was never written.
    ///
    /// The returned vector always has exactly `capacity` slots. A page whose
    /// element count exceeds `capacity` is corrupt.
    pub fn get<T: SpineElement>(
        &self,
        index: SpineIndex,
        capacity: u32,
    ) -> Result<Option<Vec<Option<T>>>> {
        let path = self.page_path(index);
        let Some(bytes) = read_optional(&path)? else {
            GLOBAL_SPINE_METRICS.record_miss();
            return Ok(None);
        };

        let slots = decode_page::<T>(&bytes, &path, capacity).inspect_err(|err| {
            error!(path = %path.display(), kind = T::KIND, error = %err, "spine page decode failed");
        })?;

        GLOBAL_SPINE_METRICS.record_load(bytes.len() as u64);
        debug!(
            dir = %self.dir.display(),
            spine = index.get(),
            kind = T::KIND,
            bytes = bytes.len(),
            "spine page loaded"
        );
        Ok(Some(slots))
    }

    /// Serialize and persist one page. Returns the number of bytes written.
    pub fn put<T: SpineElement>(&self, index: SpineIndex, slots: &[Option<T>]) -> Result<u64> {
        let bytes = encode_page(slots);
        let path = self.page_path(index);
        {
            let _permit = self.write_gate.lock();
            write_atomic(&path, &bytes)?;
        }
        GLOBAL_SPINE_METRICS.record_write(bytes.len() as u64);
        debug!(
            dir = %self.dir.display(),
            spine = index.get(),
            kind = T::KIND,
            bytes = bytes.len(),
            "spine page written"
        );
        Ok(bytes.len() as u64)
    }

    /// Persist the page-discovery bound.
    pub fn write_spine_count(&self, count: u32) -> Result<()> {
        let mut bytes = Vec::with_capacity(4);
        #[allow(clippy::cast_possible_wrap)]
        put_i32(&mut bytes, count as i32);
        let _permit = self.write_gate.lock();
        write_atomic(&self.dir.join(SPINE_COUNT_FILE), &bytes)
    }

    /// Read the page-discovery bound; `0` when never written.
    pub fn spine_count(&self) -> Result<u32> {
        let path = self.dir.join(SPINE_COUNT_FILE);
        let Some(bytes) = read_optional(&path)? else {
            return Ok(0);
        };
        let mut reader = ByteReader::new(&bytes, &path);
        let count = reader.read_i32()?;
        reader.finish()?;
        u32::try_from(count).map_err(|_| reader.corrupt(format!("negative spine count {count}")))
    }

    /// Indexes of every page file present in the directory.
    pub fn page_indexes(&self) -> Result<Vec<SpineIndex>> {
        let mut indexes = Vec::new();
        for (name, _) in self.page_files()? {
            if let Some(index) = parse_page_name(&name) {
                indexes.push(index);
            }
        }
        indexes.sort_unstable();
        Ok(indexes)
    }

    /// Total byte length of all page files in the directory.
    pub fn size_on_disk(&self) -> Result<u64> {
        Ok(self
            .page_files()?
            .into_iter()
            .filter(|(name, _)| parse_page_name(name).is_some())
            .map(|(_, len)| len)
            .sum())
    }

    /// Compare the persisted spine count with the pages actually present.
    ///
    /// Returns the larger of the two; a disagreement is logged, not fatal.
    pub fn reconcile_spine_count(&self) -> Result<u32> {
        let recorded = self.spine_count()?;
        let discovered = self
            .page_indexes()?
            .last()
            .map_or(0, |index| index.get().saturating_add(1));
        if discovered > recorded {
            warn!(
                dir = %self.dir.display(),
                recorded,
                discovered,
                "spine count behind page files"
            );
        }
        Ok(recorded.max(discovered))
    }

    fn page_files(&self) -> Result<Vec<(String, u64)>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                error!(dir = %self.dir.display(), error = %source, "spine directory scan failed");
                return Err(ChronoError::IoRead {
                    path: self.dir.clone(),
                    source,
                });
            }
        };
        let mut files = Vec::new();
        for entry in entries {
            let entry = entry?;
            let meta = entry.metadata()?;
            if meta.is_file() {
                files.push((entry.file_name().to_string_lossy().into_owned(), meta.len()));
            }
        }
        Ok(files)
    }
}

fn parse_page_name(name: &str) -> Option<SpineIndex> {
    name.strip_prefix(SPINE_FILE_PREFIX)?
        .parse::<u32>()
        .ok()
        .map(SpineIndex::new)
}

fn encode_page<T: SpineElement>(slots: &[Option<T>]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + slots.len() * 4);
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    put_i32(&mut out, slots.len() as i32);
    for slot in slots {
        T::encode_slot(slot.as_ref(), &mut out);
    }
    out
}

fn decode_page<T: SpineElement>(
    bytes: &[u8],
    path: &Path,
    capacity: u32,
) -> Result<Vec<Option<T>>> {
    let mut reader = ByteReader::new(bytes, path);
    let count = reader.read_i32()?;
    let count = u32::try_from(count)
        .map_err(|_| reader.corrupt(format!("negative element count {count}")))?;
    if count > capacity {
        return Err(reader.corrupt(format!(
            "element count {count} exceeds capacity {capacity}"
        )));
    }
    let mut slots = Vec::with_capacity(capacity as usize);
    for _ in 0..count {
        slots.push(T::decode_slot(&mut reader)?);
    }
    reader.finish()?;
    slots.resize(capacity as usize, None);
    Ok(slots)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::{ByteArrays, IntArray};

    #[test]
    fn missing_page_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = SpineStore::new(dir.path().join("never"));
        assert!(store.get::<i32>(SpineIndex::new(0), 4).unwrap().is_none());
        assert_eq!(store.spine_count().unwrap(), 0);
        assert_eq!(store.size_on_disk().unwrap(), 0);
    }

    #[test]
    fn int_page_file_layout() {
        let dir = tempfile::tempdir().unwrap();
        let store = SpineStore::new(dir.path());
        let slots = vec![Some(7), None];
        let written = store.put(SpineIndex::new(2), &slots).unwrap();
        assert_eq!(written, 12);

        let raw = fs::read(dir.path().join("SPINE_2")).unwrap();
        assert_eq!(raw, [0, 0, 0, 2, 0, 0, 0, 7, 0x7F, 0xFF, 0xFF, 0xFF]);
        assert_eq!(
            store.get::<i32>(SpineIndex::new(2), 2).unwrap(),
            Some(vec![Some(7), None])
        );
    }

    #[test]
    fn short_page_is_padded_to_capacity() {
        let dir = tempfile::tempdir().unwrap();
        let store = SpineStore::new(dir.path());
        store
            .put::<IntArray>(SpineIndex::new(0), &[Some(vec![1, 2])])
            .unwrap();
        let slots = store.get::<IntArray>(SpineIndex::new(0), 3).unwrap().unwrap();
        assert_eq!(slots, vec![Some(vec![1, 2]), None, None]);
    }

    #[test]
    fn oversized_page_is_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let store = SpineStore::new(dir.path());
        store
            .put::<i32>(SpineIndex::new(0), &[Some(1), Some(2), Some(3)])
            .unwrap();
        let err = store.get::<i32>(SpineIndex::new(0), 2).unwrap_err();
        assert!(err.is_corruption());
        assert!(err.to_string().contains("SPINE_0"));
    }

    #[test]
    fn truncated_page_is_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let store = SpineStore::new(dir.path());
        let slots: Vec<Option<ByteArrays>> = vec![Some(vec![b"abc".to_vec()])];
        store.put(SpineIndex::new(0), &slots).unwrap();
        let path = store.page_path(SpineIndex::new(0));
        let mut raw = fs::read(&path).unwrap();
        raw.truncate(raw.len() - 1);
        fs::write(&path, raw).unwrap();
        assert!(
            store
                .get::<ByteArrays>(SpineIndex::new(0), 1)
                .unwrap_err()
                .is_corruption()
        );
    }

    #[test]
    fn spine_count_and_size_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = SpineStore::new(dir.path());
        store.put::<i32>(SpineIndex::new(0), &[Some(1)]).unwrap();
        store.put::<i32>(SpineIndex::new(5), &[Some(1)]).unwrap();
        store.write_spine_count(6).unwrap();
        // Unrelated files do not count toward size on disk.
        fs::write(dir.path().join("notes.txt"), b"hello world").unwrap();

        assert_eq!(store.spine_count().unwrap(), 6);
        assert_eq!(store.size_on_disk().unwrap(), 16);
        assert_eq!(
            store.page_indexes().unwrap(),
            vec![SpineIndex::new(0), SpineIndex::new(5)]
        );
    }

    #[test]
    fn reconcile_prefers_discovered_pages() {
        let dir = tempfile::tempdir().unwrap();
        let store = SpineStore::new(dir.path());
        store.put::<i32>(SpineIndex::new(3), &[Some(1)]).unwrap();
        store.write_spine_count(1).unwrap();
        assert_eq!(store.reconcile_spine_count().unwrap(), 4);
    }
}
