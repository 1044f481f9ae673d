//! Error types for zblk-core.

use thiserror::Error;

/// Errors that can occur during block-store operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Request is misaligned or lies outside the device.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The object pool or memory limit cannot accommodate the write.
    #[error("out of space")]
    OutOfSpace,

    /// Operation conflicts with the device's current state.
    #[error("device busy: {0}")]
    Busy(String),

    /// Device has no disk size configured yet.
    #[error("device not initialized")]
    NotInitialized,

    /// Compression algorithm name is not recognized.
    #[error("unknown compressor: {0}")]
    UnknownCompressor(String),

    /// Compressed data is corrupted or truncated.
    #[error("corrupted data: {0}")]
    CorruptedData(String),

    /// Codec failed to compress a page.
    #[error("compression failed: {0}")]
    CompressionFailed(String),

    /// No device registered at the given index.
    #[error("no device at index {0}")]
    DeviceNotFound(u32),

    /// A device already occupies the given index.
    #[error("device {0} already exists")]
    DeviceExists(u32),

    /// Internal error (should not happen).
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type for block-store operations.
pub type Result<T> = std::result::Result<T, Error>;
