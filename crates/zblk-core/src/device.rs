//! Device lifecycle, configuration and statistics snapshots.
//!
//! A device is created uninitialized (disk size 0). Setting the disk size
//! allocates the page table, object pool and stream pool; reset tears
//! them down and returns the device to the uninitialized state.
//!
//! In-flight I/O holds the state read lock, so `reset` taking the write
//! lock naturally drains outstanding requests before teardown.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use parking_lot::RwLock;
use serde::Serialize;

use crate::codec::{codec_for, Algorithm};
use crate::pool::Pool;
use crate::stats::{DeviceStats, IoStats, MmStats};
use crate::streams::StreamPool;
use crate::table::PageTable;
use crate::{Error, Result, PAGE_SIZE};

/// Initial configuration for a device.
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    /// Disk size in bytes (rounded up to a whole page).
    pub disksize: u64,
    /// Compression algorithm name.
    pub algorithm: String,
    /// Number of compression streams (0 = one per core).
    pub streams: u32,
    /// Memory ceiling in bytes (0 = unlimited).
    pub mem_limit: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            disksize: 0,
            algorithm: "lz4".to_string(),
            streams: 0,
            mem_limit: 0,
        }
    }
}

pub(crate) struct DeviceState {
    pub(crate) disksize: u64,
    pub(crate) table: PageTable,
    pub(crate) pool: Pool,
    pub(crate) streams: StreamPool,
}

/// One compressed block device.
pub struct Device {
    index: u32,
    algorithm: RwLock<Algorithm>,
    stream_count: AtomicU32,
    mem_limit_pages: AtomicU64,
    claimed: AtomicBool,
    pub(crate) stats: DeviceStats,
    pub(crate) state: RwLock<Option<DeviceState>>,
}

impl Device {
    /// Create an uninitialized device.
    #[must_use]
    pub fn new(index: u32) -> Self {
        Self {
            index,
            algorithm: RwLock::new(Algorithm::default()),
            stream_count: AtomicU32::new(0),
            mem_limit_pages: AtomicU64::new(0),
            claimed: AtomicBool::new(false),
            stats: DeviceStats::default(),
            state: RwLock::new(None),
        }
    }

    /// Device index within its registry.
    #[must_use]
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Apply a full configuration and initialize the device.
    ///
    /// # Errors
    ///
    /// Fails if the device is already initialized or the algorithm name
    /// is unknown.
    pub fn configure(&self, config: &DeviceConfig) -> Result<()> {
        self.set_compressor(&config.algorithm)?;
        self.set_streams(config.streams)?;
        self.set_mem_limit(config.mem_limit);
        self.set_disksize(config.disksize)
    }

    /// Set the disk size and bring the device online.
    ///
    /// The size is rounded up to a whole page. Immutable once set; use
    /// [`Device::reset`] first to resize.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Busy`] if already initialized, or
    /// [`Error::InvalidRequest`] for a zero size.
    pub fn set_disksize(&self, bytes: u64) -> Result<()> {
        if bytes == 0 {
            return Err(Error::InvalidRequest("disk size must be nonzero".into()));
        }
        let mut state = self.state.write();
        if state.is_some() {
            return Err(Error::Busy("disk size already set".into()));
        }

        let disksize = bytes.div_ceil(PAGE_SIZE as u64) * PAGE_SIZE as u64;
        let num_pages = usize::try_from(disksize / PAGE_SIZE as u64)
            .map_err(|_| Error::InvalidRequest(format!("disk size {bytes} too large")))?;

        let algorithm = *self.algorithm.read();
        let streams = self.stream_count.load(Ordering::Relaxed) as usize;
        tracing::debug!(
            index = self.index,
            disksize,
            algorithm = algorithm.name(),
            "initializing device"
        );

        *state = Some(DeviceState {
            disksize,
            table: PageTable::new(num_pages),
            pool: Pool::new(),
            streams: StreamPool::new(codec_for(algorithm), streams),
        });
        Ok(())
    }

    /// Configured disk size in bytes (0 while uninitialized).
    #[must_use]
    pub fn disksize(&self) -> u64 {
        self.state.read().as_ref().map_or(0, |s| s.disksize)
    }

    /// Select the compression algorithm by name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Busy`] once the device is initialized, or
    /// [`Error::UnknownCompressor`] for an unrecognized name.
    pub fn set_compressor(&self, name: &str) -> Result<()> {
        let algorithm: Algorithm = name.parse()?;
        if self.state.read().is_some() {
            return Err(Error::Busy("cannot change compressor while active".into()));
        }
        *self.algorithm.write() = algorithm;
        Ok(())
    }

    /// Current compression algorithm name.
    #[must_use]
    pub fn compressor(&self) -> &'static str {
        self.algorithm.read().name()
    }

    /// Set the stream count used at initialization (0 = one per core).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Busy`] once the device is initialized.
    pub fn set_streams(&self, count: u32) -> Result<()> {
        if self.state.read().is_some() {
            return Err(Error::Busy("cannot change streams while active".into()));
        }
        self.stream_count.store(count, Ordering::Relaxed);
        Ok(())
    }

    /// Set the memory ceiling in bytes (rounded up to pages, 0 disables).
    /// Takes effect on the next write.
    pub fn set_mem_limit(&self, bytes: u64) {
        let pages = bytes.div_ceil(PAGE_SIZE as u64);
        self.mem_limit_pages.store(pages, Ordering::Relaxed);
    }

    /// Memory ceiling in bytes (0 = unlimited).
    #[must_use]
    pub fn mem_limit(&self) -> u64 {
        self.mem_limit_pages.load(Ordering::Relaxed) * PAGE_SIZE as u64
    }

    pub(crate) fn mem_limit_pages(&self) -> u64 {
        self.mem_limit_pages.load(Ordering::Relaxed)
    }

    /// Claim the device, blocking a concurrent reset or removal.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Busy`] if already claimed.
    pub fn claim(&self) -> Result<()> {
        // Taken under the state read lock so the claim is ordered against
        // a concurrent reset: either the reset finished first, or its
        // claimed check below observes this claim.
        let _state = self.state.read();
        if self
            .claimed
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return Err(Error::Busy(format!("device {} already claimed", self.index)));
        }
        Ok(())
    }

    /// Release a claim taken with [`Device::claim`].
    pub fn unclaim(&self) {
        self.claimed.store(false, Ordering::Release);
    }

    /// Whether the device is currently claimed.
    #[must_use]
    pub fn is_claimed(&self) -> bool {
        self.claimed.load(Ordering::Relaxed)
    }

    /// Tear down the page table and pool, returning the device to the
    /// uninitialized state. Waits for in-flight I/O to drain.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Busy`] while the device is claimed.
    pub fn reset(&self) -> Result<()> {
        let mut state = self.state.write();
        // Checked under the write lock; [`Device::claim`] holds the read
        // lock, so any claim that won the race is visible here.
        if self.is_claimed() {
            return Err(Error::Busy(format!("device {} is claimed", self.index)));
        }
        if state.take().is_some() {
            tracing::debug!(index = self.index, "device reset");
        }
        self.stats.reset();
        Ok(())
    }

    /// Run a compaction pass on the object pool.
    ///
    /// Returns the number of pages reclaimed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotInitialized`] if no disk size is set.
    pub fn compact(&self) -> Result<u64> {
        let state = self.state.read();
        let state = state.as_ref().ok_or(Error::NotInitialized)?;
        let freed = state.pool.compact();
        DeviceStats::add(&self.stats.pages_compacted, freed);
        tracing::debug!(index = self.index, freed, "compaction pass");
        Ok(freed)
    }

    /// Snapshot of the I/O counters.
    #[must_use]
    pub fn io_stats(&self) -> IoStats {
        let s = &self.stats;
        IoStats {
            reads: s.num_reads.load(Ordering::Relaxed),
            writes: s.num_writes.load(Ordering::Relaxed),
            failed_reads: s.failed_reads.load(Ordering::Relaxed),
            failed_writes: s.failed_writes.load(Ordering::Relaxed),
            invalid_io: s.invalid_io.load(Ordering::Relaxed),
            notify_free: s.notify_free.load(Ordering::Relaxed),
            writestall: s.writestall.load(Ordering::Relaxed),
        }
    }

    /// Snapshot of the memory accounting counters.
    #[must_use]
    pub fn mm_stats(&self) -> MmStats {
        let s = &self.stats;
        let mem_used_total = self
            .state
            .read()
            .as_ref()
            .map_or(0, |st| st.pool.total_pages_used() * PAGE_SIZE as u64);
        MmStats {
            orig_data_size: s.pages_stored.load(Ordering::Relaxed) * PAGE_SIZE as u64,
            compr_data_size: s.compr_data_size.load(Ordering::Relaxed),
            mem_used_total,
            mem_limit: self.mem_limit(),
            mem_used_max: s.max_used_pages.load(Ordering::Relaxed) * PAGE_SIZE as u64,
            same_pages: s.same_pages.load(Ordering::Relaxed),
            pages_compacted: s.pages_compacted.load(Ordering::Relaxed),
        }
    }

    /// Combined status snapshot for reporting.
    #[must_use]
    pub fn status(&self) -> DeviceStatus {
        DeviceStatus {
            index: self.index,
            disksize: self.disksize(),
            algorithm: self.compressor().to_string(),
            io: self.io_stats(),
            mm: self.mm_stats(),
        }
    }
}

/// Point-in-time view of one device for reporting.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceStatus {
    /// Device index.
    pub index: u32,
    /// Configured disk size in bytes.
    pub disksize: u64,
    /// Compression algorithm name.
    pub algorithm: String,
    /// I/O counters.
    pub io: IoStats,
    /// Memory accounting.
    pub mm: MmStats,
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "zblk{}: {}B disksize, {}B data, {}B compressed ({:.2}x), {} algorithm",
            self.index,
            self.disksize,
            self.mm.orig_data_size,
            self.mm.compr_data_size,
            self.mm.compression_ratio(),
            self.algorithm
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_starts_uninitialized() {
        let dev = Device::new(0);
        assert_eq!(dev.disksize(), 0);
        assert_eq!(dev.compressor(), "lz4");
        assert!(matches!(dev.compact(), Err(Error::NotInitialized)));
    }

    #[test]
    fn test_disksize_rounds_up_to_page() {
        let dev = Device::new(0);
        dev.set_disksize(PAGE_SIZE as u64 + 1).unwrap();
        assert_eq!(dev.disksize(), 2 * PAGE_SIZE as u64);
    }

    #[test]
    fn test_disksize_immutable_once_set() {
        let dev = Device::new(0);
        dev.set_disksize(PAGE_SIZE as u64).unwrap();
        assert!(matches!(
            dev.set_disksize(PAGE_SIZE as u64),
            Err(Error::Busy(_))
        ));
    }

    #[test]
    fn test_zero_disksize_rejected() {
        let dev = Device::new(0);
        assert!(dev.set_disksize(0).is_err());
    }

    #[test]
    fn test_compressor_locked_after_init() {
        let dev = Device::new(0);
        dev.set_compressor("zstd").unwrap();
        assert_eq!(dev.compressor(), "zstd");
        dev.set_disksize(PAGE_SIZE as u64).unwrap();
        assert!(matches!(dev.set_compressor("lz4"), Err(Error::Busy(_))));
        assert_eq!(dev.compressor(), "zstd");
    }

    #[test]
    fn test_unknown_compressor_rejected_without_mutation() {
        let dev = Device::new(0);
        assert!(matches!(
            dev.set_compressor("lzo"),
            Err(Error::UnknownCompressor(_))
        ));
        assert_eq!(dev.compressor(), "lz4");
    }

    #[test]
    fn test_reset_restores_uninitialized() {
        let dev = Device::new(0);
        dev.set_disksize(4 * PAGE_SIZE as u64).unwrap();
        dev.reset().unwrap();
        assert_eq!(dev.disksize(), 0);
        // Resizing after reset is allowed.
        dev.set_disksize(8 * PAGE_SIZE as u64).unwrap();
        assert_eq!(dev.disksize(), 8 * PAGE_SIZE as u64);
    }

    #[test]
    fn test_claim_blocks_reset() {
        let dev = Device::new(0);
        dev.set_disksize(PAGE_SIZE as u64).unwrap();
        dev.claim().unwrap();
        assert!(matches!(dev.claim(), Err(Error::Busy(_))));
        assert!(matches!(dev.reset(), Err(Error::Busy(_))));
        dev.unclaim();
        dev.reset().unwrap();
    }

    #[test]
    fn test_reset_cannot_race_claim() {
        use std::sync::Arc;

        let dev = Arc::new(Device::new(0));
        dev.set_disksize(PAGE_SIZE as u64).unwrap();

        let claimer = {
            let dev = Arc::clone(&dev);
            std::thread::spawn(move || {
                for _ in 0..2_000 {
                    if dev.claim().is_ok() {
                        let before = dev.disksize();
                        assert!(matches!(dev.reset(), Err(Error::Busy(_))));
                        if before != 0 {
                            // A reset must never land between the claim
                            // succeeding and the unclaim.
                            assert_eq!(dev.disksize(), before, "reset raced a live claim");
                        }
                        dev.unclaim();
                    }
                }
            })
        };
        let resetter = {
            let dev = Arc::clone(&dev);
            std::thread::spawn(move || {
                for _ in 0..2_000 {
                    let _ = dev.reset();
                    let _ = dev.set_disksize(PAGE_SIZE as u64);
                }
            })
        };
        claimer.join().unwrap();
        resetter.join().unwrap();
    }

    #[test]
    fn test_mem_limit_rounding() {
        let dev = Device::new(0);
        dev.set_mem_limit(1);
        assert_eq!(dev.mem_limit(), PAGE_SIZE as u64);
        dev.set_mem_limit(0);
        assert_eq!(dev.mem_limit(), 0);
    }

    #[test]
    fn test_status_display() {
        let dev = Device::new(3);
        dev.set_disksize(PAGE_SIZE as u64).unwrap();
        let s = format!("{}", dev.status());
        assert!(s.contains("zblk3"));
        assert!(s.contains("lz4"));
    }
}
