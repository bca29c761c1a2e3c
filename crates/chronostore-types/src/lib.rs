//! Identifier newtypes and type tokens shared across chronostore crates.

pub mod kinds;

pub use kinds::{DatastoreStartState, ObjectType, VersionType};

use std::fmt;

/// Reserved "unassigned" value for nids and int spine slots.
pub const UNASSIGNED: i32 = i32::MAX;

/// A globally unique component identifier.
///
/// Nids are strictly negative. `0` and [`UNASSIGNED`] are reserved sentinels
/// and never wrap a `Nid`. Assemblage nids are ordinary nids used as
/// partition keys.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(try_from = "i32", into = "i32")]
#[repr(transparent)]
pub struct Nid(i32);

impl Nid {
    /// Smallest nid (first one an allocator would hand out).
    pub const MIN: Self = Self(i32::MIN + 1);

    /// Create a nid from a raw value.
    ///
    /// Returns `None` unless `raw` is strictly negative.
    #[inline]
    pub const fn new(raw: i32) -> Option<Self> {
        if raw < 0 { Some(Self(raw)) } else { None }
    }

    /// Get the raw i32 value.
    #[inline]
    pub const fn get(self) -> i32 {
        self.0
    }

    /// Dense offset used to key nid-indexed spines: `nid - i32::MIN`.
    #[inline]
    #[allow(clippy::cast_sign_loss)]
    pub const fn spine_offset(self) -> u32 {
        (self.0 as u32) ^ 0x8000_0000
    }

    /// Inverse of [`Self::spine_offset`].
    #[inline]
    #[allow(clippy::cast_possible_wrap)]
    pub const fn from_spine_offset(offset: u32) -> Option<Self> {
        Self::new((offset ^ 0x8000_0000) as i32)
    }
}

impl fmt::Display for Nid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<i32> for Nid {
    type Error = InvalidNid;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        Self::new(value).ok_or(InvalidNid(value))
    }
}

impl From<Nid> for i32 {
    fn from(nid: Nid) -> Self {
        nid.0
    }
}

/// Error returned when a non-negative value is used as a nid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidNid(pub i32);

impl fmt::Display for InvalidNid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid nid {}: nids must be negative", self.0)
    }
}

impl std::error::Error for InvalidNid {}

/// Dense per-assemblage index assigned to a nid.
///
/// Sequences are non-negative and strictly below [`UNASSIGNED`] so they fit in
/// an int spine slot.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[repr(transparent)]
pub struct ElementSequence(u32);

impl ElementSequence {
    /// First sequence minted by a fresh per-assemblage counter.
    pub const FIRST: Self = Self(1);

    /// Create a sequence from a raw value.
    #[inline]
    #[allow(clippy::cast_sign_loss)]
    pub const fn new(raw: u32) -> Option<Self> {
        if raw < UNASSIGNED as u32 {
            Some(Self(raw))
        } else {
            None
        }
    }

    /// Create a sequence from a stored int slot value.
    #[inline]
    #[allow(clippy::cast_sign_loss)]
    pub const fn from_slot(raw: i32) -> Option<Self> {
        if raw < 0 { None } else { Self::new(raw as u32) }
    }

    /// Get the raw value.
    #[inline]
    pub const fn get(self) -> u32 {
        self.0
    }

    /// The value as stored in an int spine slot.
    #[inline]
    #[allow(clippy::cast_possible_wrap)]
    pub const fn as_slot(self) -> i32 {
        self.0 as i32
    }
}

impl fmt::Display for ElementSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Index of one page in a paged sparse array.
///
/// Slot `i` of spine `s` holds element `s * capacity + i`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct SpineIndex(u32);

impl SpineIndex {
    #[inline]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn get(self) -> u32 {
        self.0
    }

    /// Split an element index into `(spine, slot)` for the given capacity.
    #[inline]
    pub const fn locate(element: u32, capacity: u32) -> (Self, usize) {
        (Self(element / capacity), (element % capacity) as usize)
    }

    /// First element index covered by this spine.
    #[inline]
    pub const fn first_element(self, capacity: u32) -> u64 {
        self.0 as u64 * capacity as u64
    }
}

impl fmt::Display for SpineIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
