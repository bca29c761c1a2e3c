//! Assemblage type registry: assemblage nid -> (object type, version type).
//!
//! Read-mostly. Entries are created on first declaration and can never
//! change afterward; a conflicting declaration is rejected without touching
//! the stored entry.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use chronostore_error::{ChronoError, Result};
use chronostore_types::{Nid, ObjectType, VersionType};
use parking_lot::RwLock;
use tracing::debug;

use crate::tables::{read_token_table, write_token_table};

/// Declared types of one assemblage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct AssemblageType {
    pub object_type: ObjectType,
    pub version_type: VersionType,
}

impl AssemblageType {
    #[must_use]
    pub const fn new(object_type: ObjectType, version_type: VersionType) -> Self {
        Self {
            object_type,
            version_type,
        }
    }
}

impl std::fmt::Display for AssemblageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.object_type, self.version_type)
    }
}

#[derive(Debug, Default)]
pub struct AssemblageTypes {
    entries: RwLock<HashMap<Nid, AssemblageType>>,
    dirty: AtomicBool,
}

impl AssemblageTypes {
    /// Load both type tables. An assemblage present in only one table gets
    /// `Unknown` for the other.
    pub fn load(object_path: &Path, version_path: &Path) -> Result<Self> {
        let mut entries: HashMap<Nid, AssemblageType> = HashMap::new();
        for (key, token) in read_token_table(object_path)? {
            let assemblage = table_nid(object_path, key)?;
            let object_type = ObjectType::from_token(token).ok_or(ChronoError::UnknownToken {
                what: "object type",
                token,
            })?;
            entries
                .entry(assemblage)
                .or_insert(AssemblageType::new(ObjectType::Unknown, VersionType::Unknown))
                .object_type = object_type;
        }
        for (key, token) in read_token_table(version_path)? {
            let assemblage = table_nid(version_path, key)?;
            let version_type = VersionType::from_token(token).ok_or(ChronoError::UnknownToken {
                what: "version type",
                token,
            })?;
            entries
                .entry(assemblage)
                .or_insert(AssemblageType::new(ObjectType::Unknown, VersionType::Unknown))
                .version_type = version_type;
        }
        debug!(assemblages = entries.len(), "assemblage type tables loaded");
        Ok(Self {
            entries: RwLock::new(entries),
            dirty: AtomicBool::new(false),
        })
    }

    /// Declare `assemblage` as `declared`.
    ///
    /// Returns `true` when this call created the entry, `false` when an
    /// identical entry already existed.
    pub fn declare(&self, assemblage: Nid, declared: AssemblageType) -> Result<bool> {
        if let Some(existing) = self.entries.read().get(&assemblage) {
            return check_same(assemblage, *existing, declared).map(|()| false);
        }
        let mut entries = self.entries.write();
        if let Some(existing) = entries.get(&assemblage) {
            return check_same(assemblage, *existing, declared).map(|()| false);
        }
        entries.insert(assemblage, declared);
        self.dirty.store(true, Ordering::Release);
        drop(entries);
        debug!(assemblage = %assemblage, types = %declared, "assemblage declared");
        Ok(true)
    }

    #[must_use]
    pub fn get(&self, assemblage: Nid) -> Option<AssemblageType> {
        self.entries.read().get(&assemblage).copied()
    }

    /// Every declared assemblage, ascending.
    #[must_use]
    pub fn assemblages(&self) -> Vec<Nid> {
        let mut nids: Vec<Nid> = self.entries.read().keys().copied().collect();
        nids.sort_unstable();
        nids
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Write both tables if anything was declared since the last flush.
    pub fn flush(&self, object_path: &Path, version_path: &Path) -> Result<bool> {
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return Ok(false);
        }
        let (objects, versions): (Vec<_>, Vec<_>) = self
            .entries
            .read()
            .iter()
            .map(|(nid, types)| {
                (
                    (nid.get(), types.object_type.token()),
                    (nid.get(), types.version_type.token()),
                )
            })
            .unzip();
        let written = write_token_table(object_path, &objects)
            .and_then(|()| write_token_table(version_path, &versions));
        if let Err(err) = written {
            self.dirty.store(true, Ordering::Release);
            return Err(err);
        }
        Ok(true)
    }
}

fn check_same(assemblage: Nid, existing: AssemblageType, declared: AssemblageType) -> Result<()> {
    if existing == declared {
        Ok(())
    } else {
        Err(ChronoError::AssemblageRetyped {
            assemblage: assemblage.get(),
            existing: existing.to_string(),
            requested: declared.to_string(),
        })
    }
}

fn table_nid(path: &Path, key: i32) -> Result<Nid> {
    Nid::new(key).ok_or_else(|| {
        ChronoError::table_corrupt(path, format!("non-negative assemblage key {key}"))
    })
}
