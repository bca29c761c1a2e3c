//! Paged sparse-array persistence ("spines").
//!
//! Every on-disk map in chronostore is a [`SpinedArray`]: a dense integer index
//! split into fixed-capacity pages, each page created lazily on first write,
//! loaded lazily on first read, and persisted as one `SPINE_<n>` file by a
//! [`SpineStore`].

pub mod element;
pub mod file_io;
pub mod metrics;
pub mod spined_array;
pub mod store;

pub use element::{ByteArrays, IntArray, SpineElement};
pub use file_io::{ByteReader, put_i32, read_optional, write_atomic};
pub use metrics::{GLOBAL_SPINE_METRICS, SpineMetrics, SpineMetricsSnapshot};
pub use spined_array::{FlushStats, SpinedArray};
pub use store::{SPINE_COUNT_FILE, SPINE_FILE_PREFIX, SpineStore};
