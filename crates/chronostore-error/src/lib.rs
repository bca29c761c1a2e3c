use std::path::PathBuf;

use thiserror::Error;

/// Primary error type for chronostore operations.
///
/// Variants are grouped by the failure taxonomy the engine reports at its API
/// boundary: on-disk corruption, invariant violations, I/O, lifecycle misuse
/// and configuration mismatches. Missing data is never an error; lookups
/// return `Ok(None)` instead.
#[derive(Error, Debug)]
pub enum ChronoError {
    // === Corruption ===
    /// A spine page file could not be decoded.
    #[error("spine page '{path}' is malformed: {detail}")]
    SpineCorrupt { path: PathBuf, detail: String },

    /// A flat table file (type maps, sequence generators) could not be decoded.
    #[error("table file '{path}' is malformed: {detail}")]
    TableCorrupt { path: PathBuf, detail: String },

    /// A stored chronicle violates the record framing rules.
    #[error("chronicle data is malformed: {detail}")]
    ChronicleCorrupt { detail: String },

    /// An object-type or version-type token read from disk is unknown.
    #[error("unknown {what} token {token}")]
    UnknownToken { what: &'static str, token: u8 },

    // === Invariant violations ===
    /// A nid that must be negative was not.
    #[error("invalid nid {nid}: nids must be negative")]
    InvalidNid { nid: i32 },

    /// A nid is already bound to a different assemblage.
    #[error("nid {nid} belongs to assemblage {existing}, cannot rebind to {requested}")]
    AssemblageConflict {
        nid: i32,
        existing: i32,
        requested: i32,
    },

    /// An assemblage was re-declared with a different object or version type.
    #[error("assemblage {assemblage} declared as {existing}, cannot redeclare as {requested}")]
    AssemblageRetyped {
        assemblage: i32,
        existing: String,
        requested: String,
    },

    /// A nid was used where a registered (sequenced) nid is required.
    #[error("nid {nid} has no assemblage or element sequence")]
    NidNotRegistered { nid: i32 },

    /// A per-assemblage sequence counter ran out of positive values.
    #[error("element sequence space exhausted for assemblage {assemblage}")]
    SequenceExhausted { assemblage: i32 },

    // === I/O ===
    /// File I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// I/O error reading a specific file.
    #[error("I/O error reading '{path}': {source}")]
    IoRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// I/O error writing a specific file.
    #[error("I/O error writing '{path}': {source}")]
    IoWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // === Lifecycle ===
    /// The datastore has not been started, or was shut down.
    #[error("datastore is not started")]
    NotStarted,

    /// `startup` was called on a running datastore.
    #[error("datastore is already started")]
    AlreadyStarted,

    /// A background flush failed; the detail is the rendered cause.
    #[error("sync {sync_id} failed: {detail}")]
    SyncFailed { sync_id: u64, detail: String },

    /// The background sync worker is gone.
    #[error("sync worker unavailable: {detail}")]
    SyncUnavailable { detail: String },

    // === Configuration ===
    /// The store on disk was written with incompatible settings.
    #[error("configuration mismatch for {key}: store has {stored}, requested {requested}")]
    ConfigMismatch {
        key: String,
        stored: String,
        requested: String,
    },

    // === Internal ===
    /// Internal logic error (should never happen).
    #[error("internal error: {0}")]
    Internal(String),
}

/// Coarse classification of a [`ChronoError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// On-disk data does not match the expected framing.
    Corruption,
    /// The call would break a store invariant; nothing was mutated.
    InvariantViolation,
    /// Underlying file system failure.
    Io,
    /// The store is in the wrong lifecycle state for the call.
    Lifecycle,
    /// Persisted settings disagree with the requested configuration.
    Configuration,
    /// A bug.
    Internal,
}

impl ChronoError {
    /// Classify this error.
    #[allow(clippy::match_same_arms)]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::SpineCorrupt { .. }
            | Self::TableCorrupt { .. }
            | Self::ChronicleCorrupt { .. }
            | Self::UnknownToken { .. } => ErrorKind::Corruption,
            Self::InvalidNid { .. }
            | Self::AssemblageConflict { .. }
            | Self::AssemblageRetyped { .. }
            | Self::NidNotRegistered { .. }
            | Self::SequenceExhausted { .. } => ErrorKind::InvariantViolation,
            Self::Io(_) | Self::IoRead { .. } | Self::IoWrite { .. } => ErrorKind::Io,
            Self::NotStarted
            | Self::AlreadyStarted
            | Self::SyncFailed { .. }
            | Self::SyncUnavailable { .. } => ErrorKind::Lifecycle,
            Self::ConfigMismatch { .. } => ErrorKind::Configuration,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether this error indicates damaged on-disk data.
    pub const fn is_corruption(&self) -> bool {
        matches!(self.kind(), ErrorKind::Corruption)
    }

    /// Whether this error was raised to protect a store invariant.
    pub const fn is_invariant_violation(&self) -> bool {
        matches!(self.kind(), ErrorKind::InvariantViolation)
    }

    /// Human-friendly suggestion for fixing this error.
    pub const fn suggestion(&self) -> Option<&'static str> {
        match self {
            Self::SpineCorrupt { .. } | Self::TableCorrupt { .. } | Self::ChronicleCorrupt { .. } => {
                Some("Restore the store directory from a backup")
            }
            Self::NotStarted => Some("Call startup() before using the datastore"),
            Self::ConfigMismatch { .. } => {
                Some("Open the store with the spine capacities it was created with")
            }
            Self::SyncFailed { .. } => Some("Fix the underlying cause and request another sync"),
            _ => None,
        }
    }

    /// Process exit code for CLI use.
    pub const fn exit_code(&self) -> i32 {
        match self.kind() {
            ErrorKind::Corruption => 3,
            ErrorKind::InvariantViolation => 4,
            ErrorKind::Io => 5,
            ErrorKind::Lifecycle => 6,
            ErrorKind::Configuration => 7,
            ErrorKind::Internal => 2,
        }
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Create a chronicle framing error.
    pub fn chronicle_corrupt(detail: impl Into<String>) -> Self {
        Self::ChronicleCorrupt {
            detail: detail.into(),
        }
    }

    /// Create a spine page decoding error.
    pub fn spine_corrupt(path: impl Into<PathBuf>, detail: impl Into<String>) -> Self {
        Self::SpineCorrupt {
            path: path.into(),
            detail: detail.into(),
        }
    }

    /// Create a table file decoding error.
    pub fn table_corrupt(path: impl Into<PathBuf>, detail: impl Into<String>) -> Self {
        Self::TableCorrupt {
            path: path.into(),
            detail: detail.into(),
        }
    }
}

/// Result type alias using `ChronoError`.
pub type Result<T> = std::result::Result<T, ChronoError>;
