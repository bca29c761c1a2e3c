//! The entity boundary: what a caller hands to `put_chronicle`.

use chronostore_types::{Nid, ObjectType, VersionType};

use crate::codec::LENGTH_FIELD;

/// An encoded entity ready to be stored.
///
/// `data()` is the canonical buffer: header bytes, then version records each
/// prefixed by a big-endian `i32` length that counts the record's own four
/// bytes, then a zero length. `versions_start()` is the offset of the first
/// version record.
pub trait Chronicle: Send + Sync {
    fn nid(&self) -> Nid;

    /// Assemblage the entity belongs to.
    fn assemblage_nid(&self) -> Nid;

    fn object_type(&self) -> ObjectType;

    fn version_type(&self) -> VersionType;

    fn data(&self) -> &[u8];

    fn versions_start(&self) -> usize;

    /// The component this entity annotates, for semantics.
    fn referenced_component_nid(&self) -> Option<Nid> {
        None
    }
}

/// Owned chronicle built from a header and a list of version payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChronicleRecord {
    nid: Nid,
    assemblage_nid: Nid,
    object_type: ObjectType,
    version_type: VersionType,
    referenced: Option<Nid>,
    data: Vec<u8>,
    versions_start: usize,
}

impl ChronicleRecord {
    /// A chronicle with `header` and no versions yet.
    #[must_use]
    pub fn new(
        nid: Nid,
        assemblage_nid: Nid,
        object_type: ObjectType,
        version_type: VersionType,
        header: &[u8],
    ) -> Self {
        let mut data = Vec::with_capacity(header.len() + LENGTH_FIELD);
        data.extend_from_slice(header);
        data.extend_from_slice(&[0; LENGTH_FIELD]);
        Self {
            nid,
            assemblage_nid,
            object_type,
            version_type,
            referenced: None,
            data,
            versions_start: header.len(),
        }
    }

    /// Wrap an already-encoded canonical buffer.
    #[must_use]
    pub const fn from_canonical(
        nid: Nid,
        assemblage_nid: Nid,
        object_type: ObjectType,
        version_type: VersionType,
        data: Vec<u8>,
        versions_start: usize,
    ) -> Self {
        Self {
            nid,
            assemblage_nid,
            object_type,
            version_type,
            referenced: None,
            data,
            versions_start,
        }
    }

    /// Append one version whose payload is `payload`.
    #[must_use]
    pub fn with_version(mut self, payload: &[u8]) -> Self {
        self.push_version(payload);
        self
    }

    /// Mark this chronicle as a semantic annotating `component`.
    #[must_use]
    pub const fn referencing(mut self, component: Nid) -> Self {
        self.referenced = Some(component);
        self
    }

    pub fn push_version(&mut self, payload: &[u8]) {
        let record_len = payload.len() + LENGTH_FIELD;
        let Ok(len) = i32::try_from(record_len) else {
            return;
        };
        let terminator = self.data.len() - LENGTH_FIELD;
        self.data.truncate(terminator);
        self.data.reserve(record_len + LENGTH_FIELD);
        self.data.extend_from_slice(&len.to_be_bytes());
        self.data.extend_from_slice(payload);
        self.data.extend_from_slice(&[0; LENGTH_FIELD]);
    }

    #[must_use]
    pub fn header(&self) -> &[u8] {
        &self.data[..self.versions_start]
    }

    #[must_use]
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }
}

impl Chronicle for ChronicleRecord {
    fn nid(&self) -> Nid {
        self.nid
    }

    fn assemblage_nid(&self) -> Nid {
        self.assemblage_nid
    }

    fn object_type(&self) -> ObjectType {
        self.object_type
    }

    fn version_type(&self) -> VersionType {
        self.version_type
    }

    fn data(&self) -> &[u8] {
        &self.data
    }

    fn versions_start(&self) -> usize {
        self.versions_start
    }

    fn referenced_component_nid(&self) -> Option<Nid> {
        self.referenced
    }
}
