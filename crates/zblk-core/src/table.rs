//! Page table: one entry per logical page.
//!
//! Each entry embeds its own lock as a bit in an atomic flags word, the
//! same trick the kernel uses for zram slots. A dedicated mutex per entry
//! would cost tens of bytes per page across millions of pages; the bit
//! lock costs nothing beyond the flags word the entry needs anyway.
//!
//! Critical sections are a handful of field updates, never I/O, so the
//! acquire loop spins rather than parking.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::pool::Handle;

const LOCKED: u64 = 1 << 0;
const SAME_FILLED: u64 = 1 << 1;

/// Fields guarded by the entry's lock bit.
#[derive(Debug, Default, Clone, Copy)]
pub struct EntryData {
    /// Pool handle; `None` means no stored object.
    pub handle: Option<Handle>,
    /// Stored byte length; only meaningful while `handle` is set.
    pub size: u32,
    /// Fill word for same-filled pages.
    pub element: u64,
}

struct Entry {
    flags: AtomicU64,
    data: UnsafeCell<EntryData>,
}

// SAFETY: `data` is only dereferenced through an EntryGuard, which holds
// the LOCKED bit for exactly one thread at a time.
unsafe impl Sync for Entry {}

impl Entry {
    fn new() -> Self {
        Self {
            flags: AtomicU64::new(0),
            data: UnsafeCell::new(EntryData::default()),
        }
    }
}

/// Dense table of per-page entries, indexed by logical page number.
pub struct PageTable {
    entries: Box<[Entry]>,
}

impl PageTable {
    /// Allocate a table of `num_pages` zeroed entries.
    #[must_use]
    pub fn new(num_pages: usize) -> Self {
        Self {
            entries: (0..num_pages).map(|_| Entry::new()).collect(),
        }
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Acquire the entry lock for `index`, spinning until free.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range; callers validate requests
    /// against the disk size before reaching the table.
    #[must_use]
    pub fn lock(&self, index: usize) -> EntryGuard<'_> {
        let entry = &self.entries[index];
        loop {
            let cur = entry.flags.load(Ordering::Relaxed);
            if cur & LOCKED == 0
                && entry
                    .flags
                    .compare_exchange_weak(cur, cur | LOCKED, Ordering::Acquire, Ordering::Relaxed)
                    .is_ok()
            {
                return EntryGuard { entry };
            }
            std::hint::spin_loop();
        }
    }
}

/// Exclusive access to one entry; unlocks on drop.
pub struct EntryGuard<'a> {
    entry: &'a Entry,
}

impl EntryGuard<'_> {
    fn data(&self) -> &EntryData {
        // SAFETY: the LOCKED bit is held for the guard's lifetime.
        unsafe { &*self.entry.data.get() }
    }

    fn data_mut(&mut self) -> &mut EntryData {
        // SAFETY: the LOCKED bit is held for the guard's lifetime, and
        // we have &mut self.
        unsafe { &mut *self.entry.data.get() }
    }

    /// Stored pool handle, if any.
    #[must_use]
    pub fn handle(&self) -> Option<Handle> {
        self.data().handle
    }

    /// Stored object length.
    #[must_use]
    pub fn size(&self) -> u32 {
        self.data().size
    }

    /// Fill word of a same-filled page.
    #[must_use]
    pub fn element(&self) -> u64 {
        self.data().element
    }

    /// Whether the page is stored as a repeated fill word.
    #[must_use]
    pub fn same_filled(&self) -> bool {
        self.entry.flags.load(Ordering::Relaxed) & SAME_FILLED != 0
    }

    /// Install a stored object, replacing all fields.
    pub fn set_stored(&mut self, handle: Handle, size: u32) {
        *self.data_mut() = EntryData {
            handle: Some(handle),
            size,
            element: 0,
        };
        self.entry.flags.fetch_and(!SAME_FILLED, Ordering::Relaxed);
    }

    /// Mark the page same-filled with `element`, dropping any handle.
    pub fn set_same_filled(&mut self, element: u64) {
        *self.data_mut() = EntryData {
            handle: None,
            size: 0,
            element,
        };
        self.entry.flags.fetch_or(SAME_FILLED, Ordering::Relaxed);
    }

    /// Clear the entry to the unwritten state, returning the previous
    /// handle for the caller to free.
    pub fn clear(&mut self) -> Option<Handle> {
        let prev = self.data_mut().handle.take();
        *self.data_mut() = EntryData::default();
        self.entry.flags.fetch_and(!SAME_FILLED, Ordering::Relaxed);
        prev
    }
}

impl Drop for EntryGuard<'_> {
    fn drop(&mut self) {
        self.entry.flags.fetch_and(!LOCKED, Ordering::Release);
    }
}
