//! Size-class object pool for compressed pages.
//!
//! Compressed pages are small (typically 40-2048 bytes) and short-lived;
//! a general-purpose allocator would lose a large fraction of the pool to
//! per-object overhead and external fragmentation. Instead the pool slices
//! multi-page backing blocks into fixed-size slots, one size class per
//! rounded-up object size, in the spirit of the kernel's zsmalloc.
//!
//! Handles are stable indices into an indirection table, never raw
//! pointers. Compaction relocates object bytes between blocks and rewrites
//! the table in place, so a handle stays valid across [`Pool::compact`].

use std::num::NonZeroU32;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, MutexGuard};

use crate::{Error, Result, PAGE_SIZE};

/// Size-class granularity in bytes.
const CHUNK: usize = 64;

/// Pages per backing block. A block spans several pages so large classes
/// still pack multiple slots per block.
const BLOCK_PAGES: usize = 4;

const BLOCK_SIZE: usize = BLOCK_PAGES * PAGE_SIZE;
const NUM_CLASSES: usize = PAGE_SIZE / CHUNK;

/// Opaque reference to one stored object.
///
/// Owned by exactly one page-table entry; never shared, never reused
/// until freed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handle(NonZeroU32);

impl Handle {
    fn id(self) -> usize {
        self.0.get() as usize - 1
    }

    fn from_id(id: usize) -> Self {
        // Slot ids are bounded by the number of live objects, which is
        // bounded by the page table size; u32 overflow is unreachable.
        #[allow(clippy::cast_possible_truncation)]
        Handle(NonZeroU32::new(id as u32 + 1).expect("slot id overflow"))
    }
}

/// Allocation escalation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocMode {
    /// Only reuse an existing free slot; fail rather than take new memory.
    /// This is the fast path taken while a compression stream is held.
    NoGrow,
    /// Allowed to grow the backing store by whole blocks.
    MayGrow,
}

#[derive(Debug, Clone, Copy)]
struct Location {
    class: u16,
    block: u32,
    slot: u32,
    len: u32,
}

struct SizeClass {
    slot_size: usize,
    slots_per_block: usize,
    blocks: Vec<Box<[u8]>>,
    /// Free slots packed as `(block << 16) | slot`.
    free_slots: Vec<u64>,
}

impl SizeClass {
    fn new(slot_size: usize) -> Self {
        Self {
            slot_size,
            slots_per_block: BLOCK_SIZE / slot_size,
            blocks: Vec::new(),
            free_slots: Vec::new(),
        }
    }

    fn grow(&mut self) {
        let block_idx = self.blocks.len() as u64;
        self.blocks.push(vec![0u8; BLOCK_SIZE].into_boxed_slice());
        // Push in reverse so low slots are handed out first.
        for slot in (0..self.slots_per_block as u64).rev() {
            self.free_slots.push(block_idx << 16 | slot);
        }
    }
}

struct PoolInner {
    /// Indirection table: handle id -> current location.
    slots: Vec<Option<Location>>,
    free_ids: Vec<u32>,
    classes: Vec<SizeClass>,
}

/// Compressed object pool.
pub struct Pool {
    inner: Mutex<PoolInner>,
    pages_used: AtomicU64,
}

impl Default for Pool {
    fn default() -> Self {
        Self::new()
    }
}

impl Pool {
    /// Create an empty pool. Backing blocks are allocated lazily per
    /// size class on first use.
    #[must_use]
    pub fn new() -> Self {
        let classes = (1..=NUM_CLASSES).map(|i| SizeClass::new(i * CHUNK)).collect();
        Self {
            inner: Mutex::new(PoolInner {
                slots: Vec::new(),
                free_ids: Vec::new(),
                classes,
            }),
            pages_used: AtomicU64::new(0),
        }
    }

    fn class_index(size: usize) -> Result<usize> {
        if size == 0 || size > PAGE_SIZE {
            return Err(Error::Internal(format!("bad object size {size}")));
        }
        Ok(size.div_ceil(CHUNK) - 1)
    }

    /// Allocate a slot for `size` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfSpace`] if `mode` is [`AllocMode::NoGrow`]
    /// and the size class has no free slot.
    pub fn alloc(&self, size: usize, mode: AllocMode) -> Result<Handle> {
        let class_idx = Self::class_index(size)?;
        let mut inner = self.inner.lock();

        let class = &mut inner.classes[class_idx];
        if class.free_slots.is_empty() {
            match mode {
                AllocMode::NoGrow => return Err(Error::OutOfSpace),
                AllocMode::MayGrow => {
                    class.grow();
                    self.pages_used
                        .fetch_add(BLOCK_PAGES as u64, Ordering::Relaxed);
                }
            }
        }
        let packed = class
            .free_slots
            .pop()
            .ok_or_else(|| Error::Internal("empty class after grow".into()))?;

        #[allow(clippy::cast_possible_truncation)]
        let loc = Location {
            class: class_idx as u16,
            block: (packed >> 16) as u32,
            slot: (packed & 0xFFFF) as u32,
            len: size as u32,
        };

        let id = match inner.free_ids.pop() {
            Some(id) => {
                inner.slots[id as usize] = Some(loc);
                id as usize
            }
            None => {
                inner.slots.push(Some(loc));
                inner.slots.len() - 1
            }
        };
        Ok(Handle::from_id(id))
    }

    /// Release an object's slot back to its size class.
    ///
    /// # Panics
    ///
    /// Panics if `handle` is not live; single ownership is the caller's
    /// contract and a double free is a page-table bug.
    pub fn free(&self, handle: Handle) {
        let mut inner = self.inner.lock();
        let loc = inner.slots[handle.id()]
            .take()
            .expect("pool free of dead handle");
        #[allow(clippy::cast_possible_truncation)]
        inner.free_ids.push(handle.id() as u32);
        inner.classes[loc.class as usize]
            .free_slots
            .push(u64::from(loc.block) << 16 | u64::from(loc.slot));
    }

    /// Map an object for reading. The guard holds the pool lock; drop it
    /// before calling [`Pool::compact`] or any allocation from the same
    /// thread.
    ///
    /// # Panics
    ///
    /// Panics if `handle` is not live.
    #[must_use]
    pub fn map(&self, handle: Handle) -> MapGuard<'_> {
        let inner = self.inner.lock();
        let loc = inner.slots[handle.id()].expect("pool map of dead handle");
        MapGuard { inner, loc }
    }

    /// Map an object for writing.
    ///
    /// # Panics
    ///
    /// Panics if `handle` is not live.
    #[must_use]
    pub fn map_mut(&self, handle: Handle) -> MapGuardMut<'_> {
        let inner = self.inner.lock();
        let loc = inner.slots[handle.id()].expect("pool map of dead handle");
        MapGuardMut { inner, loc }
    }

    /// Pages of backing memory currently held.
    #[must_use]
    pub fn total_pages_used(&self) -> u64 {
        self.pages_used.load(Ordering::Relaxed)
    }

    /// Best-effort defragmentation. Live objects are packed to the front
    /// of each class and empty backing blocks are released.
    ///
    /// Returns the number of pages reclaimed.
    pub fn compact(&self) -> u64 {
        let mut inner = self.inner.lock();
        let PoolInner { slots, classes, .. } = &mut *inner;

        // Live handles grouped per class, in current storage order.
        let mut per_class: Vec<Vec<u32>> = vec![Vec::new(); classes.len()];
        for (id, slot) in slots.iter().enumerate() {
            if let Some(loc) = slot {
                #[allow(clippy::cast_possible_truncation)]
                per_class[loc.class as usize].push(id as u32);
            }
        }

        let mut freed_pages = 0u64;
        for (class_idx, mut ids) in per_class.into_iter().enumerate() {
            let class = &mut classes[class_idx];
            if class.blocks.is_empty() {
                continue;
            }
            ids.sort_unstable_by_key(|&id| {
                let loc = slots[id as usize].expect("live id");
                (loc.block, loc.slot)
            });

            let spb = class.slots_per_block as u64;
            let slot_size = class.slot_size;

            // Moving in ascending source order to a cursor that never
            // exceeds the source position keeps every pending source slot
            // intact.
            for (dense, &id) in ids.iter().enumerate() {
                let dense = dense as u64;
                #[allow(clippy::cast_possible_truncation)]
                let (dst_block, dst_slot) = ((dense / spb) as u32, (dense % spb) as u32);
                let loc = slots[id as usize].as_mut().expect("live id");
                if (loc.block, loc.slot) == (dst_block, dst_slot) {
                    continue;
                }
                let src_off = loc.slot as usize * slot_size;
                let dst_off = dst_slot as usize * slot_size;
                if loc.block == dst_block {
                    class.blocks[dst_block as usize]
                        .copy_within(src_off..src_off + slot_size, dst_off);
                } else {
                    // Distinct blocks; dst is always the lower index.
                    let (head, tail) = class.blocks.split_at_mut(loc.block as usize);
                    head[dst_block as usize][dst_off..dst_off + slot_size]
                        .copy_from_slice(&tail[0][src_off..src_off + slot_size]);
                }
                loc.block = dst_block;
                loc.slot = dst_slot;
            }

            let live = ids.len() as u64;
            let needed = live.div_ceil(spb) as usize;
            let dropped = class.blocks.len() - needed;
            class.blocks.truncate(needed);
            freed_pages += (dropped * BLOCK_PAGES) as u64;

            class.free_slots.clear();
            let total = needed as u64 * spb;
            for dense in (live..total).rev() {
                class.free_slots.push((dense / spb) << 16 | (dense % spb));
            }
        }

        self.pages_used.fetch_sub(freed_pages, Ordering::Relaxed);
        freed_pages
    }
}

fn object_range(loc: Location, class: &SizeClass) -> std::ops::Range<usize> {
    let off = loc.slot as usize * class.slot_size;
    off..off + loc.len as usize
}

/// Read-only mapping of a pool object.
pub struct MapGuard<'a> {
    inner: MutexGuard<'a, PoolInner>,
    loc: Location,
}

impl Deref for MapGuard<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        let class = &self.inner.classes[self.loc.class as usize];
        &class.blocks[self.loc.block as usize][object_range(self.loc, class)]
    }
}

/// Writable mapping of a pool object.
pub struct MapGuardMut<'a> {
    inner: MutexGuard<'a, PoolInner>,
    loc: Location,
}

impl Deref for MapGuardMut<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        let class = &self.inner.classes[self.loc.class as usize];
        &class.blocks[self.loc.block as usize][object_range(self.loc, class)]
    }
}

impl DerefMut for MapGuardMut<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        let class = &self.inner.classes[self.loc.class as usize];
        let range = object_range(self.loc, class);
        &mut self.inner.classes[self.loc.class as usize].blocks[self.loc.block as usize][range]
    }
}
