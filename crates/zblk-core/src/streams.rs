//! Compression stream pool.
//!
//! A stream is a reusable scratch buffer for one in-flight compression.
//! The pool is bounded (typically one stream per available core); a
//! worker that finds every stream busy blocks on a condvar until one is
//! returned. Guards hand the stream back on drop, so the release happens
//! on every exit path including errors.
//!
//! Stream buffers are reused as soon as they are returned. A caller that
//! releases a stream and later reacquires one must recompress; the bytes
//! it produced earlier may already belong to another worker.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::codec::Codec;
use crate::{Result, PAGE_SIZE};

/// Scratch state for one in-flight compression.
pub struct Stream {
    /// Compressed output buffer, sized to the codec's worst case.
    pub buf: Box<[u8]>,
}

impl Stream {
    fn new(scratch_size: usize) -> Self {
        Self {
            buf: vec![0u8; scratch_size].into_boxed_slice(),
        }
    }
}

/// Bounded pool of compression streams sharing one codec.
pub struct StreamPool {
    codec: Arc<dyn Codec>,
    idle: Mutex<Vec<Stream>>,
    returned: Condvar,
}

impl StreamPool {
    /// Create a pool of `count` streams (0 selects one per core).
    #[must_use]
    pub fn new(codec: Arc<dyn Codec>, count: usize) -> Self {
        let count = if count == 0 {
            std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
        } else {
            count
        };
        let scratch = codec.max_compressed_size();
        let idle = (0..count).map(|_| Stream::new(scratch)).collect();
        Self {
            codec,
            idle: Mutex::new(idle),
            returned: Condvar::new(),
        }
    }

    /// Codec shared by all streams.
    #[must_use]
    pub fn codec(&self) -> &dyn Codec {
        &*self.codec
    }

    /// Acquire an exclusive stream, blocking until one is idle.
    #[must_use]
    pub fn get(&self) -> StreamGuard<'_> {
        let mut idle = self.idle.lock();
        loop {
            if let Some(stream) = idle.pop() {
                return StreamGuard {
                    pool: self,
                    stream: Some(stream),
                };
            }
            self.returned.wait(&mut idle);
        }
    }

    /// Decompress a stored object into a full page.
    ///
    /// Decompression needs no per-stream scratch for the supported
    /// codecs, so it bypasses stream acquisition; this keeps reads from
    /// blocking behind writers under an entry lock.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::CorruptedData`] if `src` does not decode
    /// to exactly one page.
    pub fn decompress(&self, src: &[u8], dst: &mut [u8; PAGE_SIZE]) -> Result<()> {
        self.codec.decompress(src, dst)
    }
}

/// Exclusive stream ownership; returns the stream to the pool on drop.
pub struct StreamGuard<'a> {
    pool: &'a StreamPool,
    stream: Option<Stream>,
}

impl StreamGuard<'_> {
    /// Compress `src` into this stream's buffer, returning the length.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::CompressionFailed`] on codec-internal
    /// failure.
    pub fn compress(&mut self, src: &[u8; PAGE_SIZE]) -> Result<usize> {
        let stream = self.stream.as_mut().expect("stream present until drop");
        self.pool.codec.compress(src, &mut stream.buf)
    }
}

impl Deref for StreamGuard<'_> {
    type Target = Stream;

    fn deref(&self) -> &Stream {
        self.stream.as_ref().expect("stream present until drop")
    }
}

impl DerefMut for StreamGuard<'_> {
    fn deref_mut(&mut self) -> &mut Stream {
        self.stream.as_mut().expect("stream present until drop")
    }
}

impl Drop for StreamGuard<'_> {
    fn drop(&mut self) {
        if let Some(stream) = self.stream.take() {
            self.pool.idle.lock().push(stream);
            self.pool.returned.notify_one();
        }
    }
}
