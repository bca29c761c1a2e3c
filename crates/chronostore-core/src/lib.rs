//! Chronicle storage engine.
//!
//! A [`Datastore`] maps negative component identifiers (nids) to versioned
//! byte chronicles, partitioned by assemblage and persisted as spine pages
//! under one root directory. Alongside the chronicles it keeps a taxonomy
//! map, a component-to-semantic reverse index and the identifier maps that
//! translate between nids and per-assemblage element sequences.
//!
//! Writes land in memory; [`Datastore::sync`] schedules a background flush
//! and [`Datastore::shutdown`] performs a final one.

pub mod allocator;
pub mod chronicle;
pub mod chronicle_store;
pub mod codec;
pub mod config;
pub mod datastore;
pub mod observer;
pub mod partition;
pub mod properties;
pub mod reverse_index;
pub mod state;
pub mod sync;
pub mod tables;
pub mod taxonomy;
pub mod type_registry;

pub use chronicle::{Chronicle, ChronicleRecord};
pub use codec::{decode_chronicle, encode_chronicle, merge_chronicle, version_payloads};
pub use config::StoreConfig;
pub use datastore::{AssemblageSummary, Datastore, StoreSummary};
pub use observer::{ObserverId, WriteObserver};
pub use properties::{FORMAT_VERSION, StoreProperties};
pub use sync::{SyncHandle, SyncMetricsSnapshot, SyncReport};
pub use taxonomy::union_merge;
pub use type_registry::AssemblageType;

pub use chronostore_error::{ChronoError, ErrorKind, Result};
pub use chronostore_spine::{ByteArrays, IntArray};
pub use chronostore_types::{
    DatastoreStartState, ElementSequence, Nid, ObjectType, VersionType,
};
