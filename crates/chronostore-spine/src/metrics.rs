//! Spine I/O observability metrics.
//!
//! Global `AtomicU64` counters for page loads and page writes. Thread-safe,
//! lock-free, suitable for concurrent readers and the sync worker.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Global spine metrics singleton.
pub static GLOBAL_SPINE_METRICS: SpineMetrics = SpineMetrics::new();

/// Atomic counters tracking spine page traffic.
pub struct SpineMetrics {
    /// Pages decoded from disk.
    pub pages_loaded_total: AtomicU64,
    /// Page lookups that found no file.
    pub page_misses_total: AtomicU64,
    /// Pages written to disk.
    pub pages_written_total: AtomicU64,
    /// Bytes read from page files.
    pub bytes_read_total: AtomicU64,
    /// Bytes written to page files.
    pub bytes_written_total: AtomicU64,
}

impl SpineMetrics {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            pages_loaded_total: AtomicU64::new(0),
            page_misses_total: AtomicU64::new(0),
            pages_written_total: AtomicU64::new(0),
            bytes_read_total: AtomicU64::new(0),
            bytes_written_total: AtomicU64::new(0),
        }
    }

    pub fn record_load(&self, bytes: u64) {
        self.pages_loaded_total.fetch_add(1, Ordering::Relaxed);
        self.bytes_read_total.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.page_misses_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_write(&self, bytes: u64) {
        self.pages_written_total.fetch_add(1, Ordering::Relaxed);
        self.bytes_written_total.fetch_add(bytes, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> SpineMetricsSnapshot {
        SpineMetricsSnapshot {
            pages_loaded_total: self.pages_loaded_total.load(Ordering::Relaxed),
            page_misses_total: self.page_misses_total.load(Ordering::Relaxed),
            pages_written_total: self.pages_written_total.load(Ordering::Relaxed),
            bytes_read_total: self.bytes_read_total.load(Ordering::Relaxed),
            bytes_written_total: self.bytes_written_total.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        self.pages_loaded_total.store(0, Ordering::Relaxed);
        self.page_misses_total.store(0, Ordering::Relaxed);
        self.pages_written_total.store(0, Ordering::Relaxed);
        self.bytes_read_total.store(0, Ordering::Relaxed);
        self.bytes_written_total.store(0, Ordering::Relaxed);
    }
}

impl Default for SpineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time snapshot of spine metrics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpineMetricsSnapshot {
    pub pages_loaded_total: u64,
    pub page_misses_total: u64,
    pub pages_written_total: u64,
    pub bytes_read_total: u64,
    pub bytes_written_total: u64,
}

impl fmt::Display for SpineMetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "spine_pages_loaded={} spine_page_misses={} spine_pages_written={} \
             spine_bytes_read={} spine_bytes_written={}",
            self.pages_loaded_total,
            self.page_misses_total,
            self.pages_written_total,
            self.bytes_read_total,
            self.bytes_written_total,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_counters_accumulate_and_reset() {
        let m = SpineMetrics::new();
        m.record_load(100);
        m.record_load(50);
        m.record_write(10);
        m.record_miss();
        let snap = m.snapshot();
        assert_eq!(snap.pages_loaded_total, 2);
        assert_eq!(snap.bytes_read_total, 150);
        assert_eq!(snap.pages_written_total, 1);
        assert_eq!(snap.page_misses_total, 1);
        assert!(snap.to_string().contains("spine_pages_loaded=2"));

        m.reset();
        assert_eq!(m.snapshot().bytes_read_total, 0);
    }
}
