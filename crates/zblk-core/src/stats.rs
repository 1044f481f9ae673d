//! Lock-free per-device statistics.
//!
//! Counters are plain relaxed atomics; they are observability, never
//! control flow, and are safe to bump from any thread without touching
//! entry locks.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Raw atomic counters for one device.
#[derive(Debug, Default)]
pub struct DeviceStats {
    pub(crate) num_reads: AtomicU64,
    pub(crate) num_writes: AtomicU64,
    pub(crate) failed_reads: AtomicU64,
    pub(crate) failed_writes: AtomicU64,
    pub(crate) invalid_io: AtomicU64,
    pub(crate) notify_free: AtomicU64,
    pub(crate) same_pages: AtomicU64,
    pub(crate) pages_stored: AtomicU64,
    pub(crate) compr_data_size: AtomicU64,
    pub(crate) max_used_pages: AtomicU64,
    pub(crate) writestall: AtomicU64,
    pub(crate) pages_compacted: AtomicU64,
}

impl DeviceStats {
    pub(crate) fn add(counter: &AtomicU64, val: u64) {
        counter.fetch_add(val, Ordering::Relaxed);
    }

    pub(crate) fn sub(counter: &AtomicU64, val: u64) {
        counter.fetch_sub(val, Ordering::Relaxed);
    }

    pub(crate) fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn dec(counter: &AtomicU64) {
        counter.fetch_sub(1, Ordering::Relaxed);
    }

    /// Record a new pool usage high-water mark.
    pub(crate) fn update_max_used(&self, pages: u64) {
        self.max_used_pages.fetch_max(pages, Ordering::Relaxed);
    }

    pub(crate) fn reset(&self) {
        for counter in [
            &self.num_reads,
            &self.num_writes,
            &self.failed_reads,
            &self.failed_writes,
            &self.invalid_io,
            &self.notify_free,
            &self.same_pages,
            &self.pages_stored,
            &self.compr_data_size,
            &self.max_used_pages,
            &self.writestall,
            &self.pages_compacted,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// I/O counter snapshot.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct IoStats {
    /// Completed page reads.
    pub reads: u64,
    /// Completed page writes.
    pub writes: u64,
    /// Per-page read failures (decompression errors).
    pub failed_reads: u64,
    /// Per-page write failures (codec or allocation errors).
    pub failed_writes: u64,
    /// Requests rejected at validation.
    pub invalid_io: u64,
    /// Pages released by discards.
    pub notify_free: u64,
    /// Write escalations that waited for pool growth.
    pub writestall: u64,
}

/// Memory accounting snapshot.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct MmStats {
    /// Uncompressed size of all stored pages.
    pub orig_data_size: u64,
    /// Compressed payload bytes in the pool.
    pub compr_data_size: u64,
    /// Backing memory held by the pool, in bytes.
    pub mem_used_total: u64,
    /// Configured memory ceiling in bytes (0 = unlimited).
    pub mem_limit: u64,
    /// High-water mark of pool memory, in bytes.
    pub mem_used_max: u64,
    /// Pages stored as a repeated fill word.
    pub same_pages: u64,
    /// Pages reclaimed by compaction.
    pub pages_compacted: u64,
}

impl MmStats {
    /// Compression ratio of stored data.
    #[must_use]
    pub fn compression_ratio(&self) -> f64 {
        if self.compr_data_size > 0 {
            #[allow(clippy::cast_precision_loss)]
            {
                self.orig_data_size as f64 / self.compr_data_size as f64
            }
        } else {
            0.0
        }
    }

    /// Space savings percentage.
    #[must_use]
    pub fn space_savings(&self) -> f64 {
        if self.orig_data_size > 0 {
            #[allow(clippy::cast_precision_loss)]
            {
                (1.0 - (self.compr_data_size as f64 / self.orig_data_size as f64)) * 100.0
            }
        } else {
            0.0
        }
    }
}
