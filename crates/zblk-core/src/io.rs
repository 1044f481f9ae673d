//! I/O engine: request validation and the per-page read/write/discard
//! pipeline.
//!
//! A request is validated as a whole, then decomposed into per-page
//! operations. Each page operation locks only its own table entry, so
//! operations on distinct pages run fully in parallel. Within one page,
//! free-then-install happens under the entry lock and a concurrent reader
//! sees either the old or the new content, never a torn mix.

use crate::device::{Device, DeviceState};
use crate::pool::AllocMode;
use crate::samefill::{fill_region_word, page_same_filled};
use crate::stats::DeviceStats;
use crate::table::EntryGuard;
use crate::{Error, Result, LOGICAL_BLOCK_SIZE, PAGE_SIZE};

/// A block-layer request addressed by byte offset.
pub enum Request<'a> {
    /// Read into the buffer.
    Read {
        /// Byte offset, sector aligned.
        offset: u64,
        /// Destination; its length is the request length.
        buf: &'a mut [u8],
    },
    /// Write from the buffer.
    Write {
        /// Byte offset, sector aligned.
        offset: u64,
        /// Source data; its length is the request length.
        data: &'a [u8],
    },
    /// Release stored pages in the range.
    Discard {
        /// Byte offset, sector aligned.
        offset: u64,
        /// Range length in bytes.
        len: u64,
    },
}

impl Device {
    /// Submit one request, completing it synchronously.
    ///
    /// # Errors
    ///
    /// Any per-page failure fails the whole request; see [`Device::read`],
    /// [`Device::write`] and [`Device::discard`].
    pub fn submit(&self, request: Request<'_>) -> Result<()> {
        match request {
            Request::Read { offset, buf } => self.read(offset, buf),
            Request::Write { offset, data } => self.write(offset, data),
            Request::Discard { offset, len } => self.discard(offset, len),
        }
    }

    /// Read `buf.len()` bytes starting at `offset`.
    ///
    /// Counts one read per page touched. A decompression failure counts a
    /// failed read and fails the request; bytes already read stay in the
    /// buffer.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidRequest`] for a misaligned or out-of-range request,
    /// [`Error::CorruptedData`] if a stored page fails to decompress,
    /// [`Error::NotInitialized`] before a disk size is set.
    pub fn read(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let state = self.state.read();
        let state = state.as_ref().ok_or(Error::NotInitialized)?;
        self.validate(offset, buf.len() as u64, state.disksize)?;

        let mut pos = usize::try_from(offset).map_err(|_| Error::InvalidRequest("offset".into()))?;
        let mut done = 0;
        while done < buf.len() {
            let page_idx = pos / PAGE_SIZE;
            let in_off = pos % PAGE_SIZE;
            let n = (PAGE_SIZE - in_off).min(buf.len() - done);
            match self.read_page_region(state, page_idx, in_off, &mut buf[done..done + n]) {
                Ok(()) => DeviceStats::inc(&self.stats.num_reads),
                Err(e) => {
                    DeviceStats::inc(&self.stats.failed_reads);
                    return Err(e);
                }
            }
            pos += n;
            done += n;
        }
        Ok(())
    }

    /// Write `data` starting at `offset`.
    ///
    /// Sub-page writes read-modify-write the affected page. Counts one
    /// write per page stored.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidRequest`] for a misaligned or out-of-range request,
    /// [`Error::OutOfSpace`] if the pool or memory limit cannot take the
    /// page (prior content of the page is left intact),
    /// [`Error::NotInitialized`] before a disk size is set.
    pub fn write(&self, offset: u64, data: &[u8]) -> Result<()> {
        let state = self.state.read();
        let state = state.as_ref().ok_or(Error::NotInitialized)?;
        self.validate(offset, data.len() as u64, state.disksize)?;

        let mut pos = usize::try_from(offset).map_err(|_| Error::InvalidRequest("offset".into()))?;
        let mut done = 0;
        while done < data.len() {
            let page_idx = pos / PAGE_SIZE;
            let in_off = pos % PAGE_SIZE;
            let n = (PAGE_SIZE - in_off).min(data.len() - done);
            let chunk = &data[done..done + n];

            if n == PAGE_SIZE {
                let page: &[u8; PAGE_SIZE] = chunk.try_into().expect("chunk is page sized");
                self.write_page(state, page_idx, page)?;
            } else {
                // Read-modify-write: merge the sub-range into the current
                // page content, then store the merged page.
                let mut page = [0u8; PAGE_SIZE];
                if let Err(e) = self.read_page_region(state, page_idx, 0, &mut page) {
                    DeviceStats::inc(&self.stats.failed_writes);
                    return Err(e);
                }
                page[in_off..in_off + n].copy_from_slice(chunk);
                self.write_page(state, page_idx, &page)?;
            }
            pos += n;
            done += n;
        }
        Ok(())
    }

    /// Release stored pages fully covered by the range.
    ///
    /// Boundary pages only partially covered are left untouched: freeing
    /// them would force a read-modify-write, defeating a discard issued
    /// to save memory.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidRequest`] for a misaligned or out-of-range request,
    /// [`Error::NotInitialized`] before a disk size is set.
    pub fn discard(&self, offset: u64, len: u64) -> Result<()> {
        let state = self.state.read();
        let state = state.as_ref().ok_or(Error::NotInitialized)?;
        self.validate(offset, len, state.disksize)?;

        let page = PAGE_SIZE as u64;
        let end = offset + len;
        let mut pos = offset.next_multiple_of(page);
        while pos + page <= end {
            #[allow(clippy::cast_possible_truncation)]
            let mut entry = state.table.lock((pos / page) as usize);
            self.free_entry_locked(&mut entry, state);
            DeviceStats::inc(&self.stats.notify_free);
            pos += page;
        }
        Ok(())
    }

    fn validate(&self, offset: u64, len: u64, disksize: u64) -> Result<()> {
        let sector = LOGICAL_BLOCK_SIZE as u64;
        let aligned = offset % sector == 0 && len % sector == 0;
        let in_range = offset
            .checked_add(len)
            .is_some_and(|end| end <= disksize);
        if !aligned || !in_range {
            DeviceStats::inc(&self.stats.invalid_io);
            return Err(Error::InvalidRequest(format!(
                "offset {offset} len {len} on {disksize}B device"
            )));
        }
        Ok(())
    }

    /// Read a sub-page region into `dst`; `in_off + dst.len()` must stay
    /// within one page. Leaves statistics to the caller.
    fn read_page_region(
        &self,
        state: &DeviceState,
        index: usize,
        in_off: usize,
        dst: &mut [u8],
    ) -> Result<()> {
        let entry = state.table.lock(index);

        if entry.same_filled() {
            fill_region_word(dst, in_off, entry.element());
            return Ok(());
        }
        let Some(handle) = entry.handle() else {
            // Never written: logically zero.
            dst.fill(0);
            return Ok(());
        };

        let size = entry.size() as usize;
        let mapped = state.pool.map(handle);
        if size == PAGE_SIZE {
            // Stored uncompressed.
            dst.copy_from_slice(&mapped[in_off..in_off + dst.len()]);
        } else if in_off == 0 && dst.len() == PAGE_SIZE {
            let page: &mut [u8; PAGE_SIZE] = dst.try_into().expect("dst is page sized");
            state.streams.decompress(&mapped, page)?;
        } else {
            let mut page = [0u8; PAGE_SIZE];
            state.streams.decompress(&mapped, &mut page)?;
            dst.copy_from_slice(&page[in_off..in_off + dst.len()]);
        }
        Ok(())
    }

    /// Store one full page.
    fn write_page(&self, state: &DeviceState, index: usize, page: &[u8; PAGE_SIZE]) -> Result<()> {
        // Uniform pages skip compression and the pool entirely.
        if let Some(element) = page_same_filled(page) {
            let mut entry = state.table.lock(index);
            self.free_entry_locked(&mut entry, state);
            entry.set_same_filled(element);
            drop(entry);
            DeviceStats::inc(&self.stats.same_pages);
            DeviceStats::inc(&self.stats.num_writes);
            return Ok(());
        }

        let mut stream = state.streams.get();
        let mut comp_len = match stream.compress(page) {
            Ok(len) => len,
            Err(e) => {
                DeviceStats::inc(&self.stats.failed_writes);
                return Err(e);
            }
        };
        // Incompressible pages are stored raw; worst case is one page,
        // never more.
        let alloc_len = comp_len.min(PAGE_SIZE);

        let handle = match state.pool.alloc(alloc_len, AllocMode::NoGrow) {
            Ok(handle) => handle,
            Err(_) => {
                // Slow path: growing the pool may block, so give the
                // stream back first. The scratch buffer may be reused by
                // another worker in the meantime, which is why the page
                // is recompressed after reacquiring a stream.
                drop(stream);
                DeviceStats::inc(&self.stats.writestall);
                tracing::trace!(index = self.index(), page = index, "write stall, growing pool");

                let handle = match state.pool.alloc(alloc_len, AllocMode::MayGrow) {
                    Ok(handle) => handle,
                    Err(e) => {
                        DeviceStats::inc(&self.stats.failed_writes);
                        return Err(e);
                    }
                };
                stream = state.streams.get();
                comp_len = match stream.compress(page) {
                    Ok(len) => len,
                    Err(e) => {
                        state.pool.free(handle);
                        DeviceStats::inc(&self.stats.failed_writes);
                        return Err(e);
                    }
                };
                if comp_len.min(PAGE_SIZE) != alloc_len {
                    // Deterministic codec, identical input: a different
                    // length means the page buffer was corrupted.
                    state.pool.free(handle);
                    DeviceStats::inc(&self.stats.failed_writes);
                    return Err(Error::Internal("recompressed size changed".into()));
                }
                handle
            }
        };

        // Enforce the memory ceiling before touching the old entry; a
        // rejected write leaves prior content fully intact.
        let limit = self.mem_limit_pages();
        let used = state.pool.total_pages_used();
        if limit != 0 && used > limit {
            state.pool.free(handle);
            DeviceStats::inc(&self.stats.failed_writes);
            return Err(Error::OutOfSpace);
        }
        self.stats.update_max_used(used);

        {
            let mut mapped = state.pool.map_mut(handle);
            if alloc_len == PAGE_SIZE {
                mapped.copy_from_slice(page);
            } else {
                mapped.copy_from_slice(&stream.buf[..comp_len]);
            }
        }
        drop(stream);

        let mut entry = state.table.lock(index);
        self.free_entry_locked(&mut entry, state);
        entry.set_stored(handle, alloc_len as u32);
        drop(entry);

        DeviceStats::add(&self.stats.compr_data_size, alloc_len as u64);
        DeviceStats::inc(&self.stats.pages_stored);
        DeviceStats::inc(&self.stats.num_writes);
        Ok(())
    }

    /// Release whatever the entry holds, with stats bookkeeping. No-op on
    /// an already-empty entry, so freeing twice is safe.
    pub(crate) fn free_entry_locked(&self, entry: &mut EntryGuard<'_>, state: &DeviceState) {
        if entry.same_filled() {
            entry.clear();
            DeviceStats::dec(&self.stats.same_pages);
            return;
        }
        let size = entry.size();
        if let Some(handle) = entry.clear() {
            state.pool.free(handle);
            DeviceStats::sub(&self.stats.compr_data_size, u64::from(size));
            DeviceStats::dec(&self.stats.pages_stored);
        }
    }
}
