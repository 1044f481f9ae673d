//! Pluggable page codecs.
//!
//! The I/O path only sees the [`Codec`] trait; the concrete algorithms are
//! backed by `lz4_flex` and `zstd`. A codec compresses exactly one page at
//! a time into a caller-provided scratch buffer, so implementations must
//! not allocate per call.

use std::str::FromStr;
use std::sync::Arc;

use crate::{Error, Result, PAGE_SIZE};

/// Compression algorithm selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Algorithm {
    /// LZ4 block format, fastest.
    #[default]
    Lz4,
    /// Zstandard with configurable level.
    Zstd {
        /// Compression level (1-19).
        level: i32,
    },
}

impl Algorithm {
    /// Canonical name, as accepted by [`Algorithm::from_str`].
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Algorithm::Lz4 => "lz4",
            Algorithm::Zstd { .. } => "zstd",
        }
    }

    /// Names of all supported algorithms.
    #[must_use]
    pub fn known() -> &'static [&'static str] {
        &["lz4", "zstd"]
    }
}

impl FromStr for Algorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "lz4" => Ok(Algorithm::Lz4),
            "zstd" => Ok(Algorithm::Zstd { level: 3 }),
            other => Err(Error::UnknownCompressor(other.to_string())),
        }
    }
}

/// One-page compression codec.
pub trait Codec: Send + Sync {
    /// Algorithm name for reporting.
    fn name(&self) -> &'static str;

    /// Worst-case compressed size for one page; sizes the per-stream
    /// scratch buffer.
    fn max_compressed_size(&self) -> usize;

    /// Compress `src` into `dst`, returning the number of bytes written.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CompressionFailed`] on codec-internal failure.
    /// An incompressible page is not an error; the caller compares the
    /// returned length against [`PAGE_SIZE`] and stores raw if it does
    /// not win.
    fn compress(&self, src: &[u8; PAGE_SIZE], dst: &mut [u8]) -> Result<usize>;

    /// Decompress `src` into a full page.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CorruptedData`] if `src` does not decode to
    /// exactly one page.
    fn decompress(&self, src: &[u8], dst: &mut [u8; PAGE_SIZE]) -> Result<()>;
}

/// Build the codec for an algorithm.
#[must_use]
pub fn codec_for(algorithm: Algorithm) -> Arc<dyn Codec> {
    match algorithm {
        Algorithm::Lz4 => Arc::new(Lz4Codec),
        Algorithm::Zstd { level } => Arc::new(ZstdCodec { level }),
    }
}

/// LZ4 block-format codec.
struct Lz4Codec;

impl Codec for Lz4Codec {
    fn name(&self) -> &'static str {
        "lz4"
    }

    fn max_compressed_size(&self) -> usize {
        lz4_flex::block::get_maximum_output_size(PAGE_SIZE)
    }

    fn compress(&self, src: &[u8; PAGE_SIZE], dst: &mut [u8]) -> Result<usize> {
        lz4_flex::block::compress_into(src, dst)
            .map_err(|e| Error::CompressionFailed(format!("lz4: {e}")))
    }

    fn decompress(&self, src: &[u8], dst: &mut [u8; PAGE_SIZE]) -> Result<()> {
        let len = lz4_flex::block::decompress_into(src, dst)
            .map_err(|e| Error::CorruptedData(format!("lz4: {e}")))?;
        if len != PAGE_SIZE {
            return Err(Error::CorruptedData(format!(
                "lz4: decompressed {len} bytes, expected {PAGE_SIZE}"
            )));
        }
        Ok(())
    }
}

/// Zstandard codec.
struct ZstdCodec {
    level: i32,
}

impl Codec for ZstdCodec {
    fn name(&self) -> &'static str {
        "zstd"
    }

    fn max_compressed_size(&self) -> usize {
        zstd::zstd_safe::compress_bound(PAGE_SIZE)
    }

    fn compress(&self, src: &[u8; PAGE_SIZE], dst: &mut [u8]) -> Result<usize> {
        zstd::bulk::compress_to_buffer(src, dst, self.level)
            .map_err(|e| Error::CompressionFailed(format!("zstd: {e}")))
    }

    fn decompress(&self, src: &[u8], dst: &mut [u8; PAGE_SIZE]) -> Result<()> {
        let len = zstd::bulk::decompress_to_buffer(src, dst)
            .map_err(|e| Error::CorruptedData(format!("zstd: {e}")))?;
        if len != PAGE_SIZE {
            return Err(Error::CorruptedData(format!(
                "zstd: decompressed {len} bytes, expected {PAGE_SIZE}"
            )));
        }
        Ok(())
    }
}
