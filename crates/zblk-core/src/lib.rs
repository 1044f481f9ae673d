//! In-memory compressed block store.
//!
//! A zblk device exposes fixed-size logical pages addressed by byte
//! offset. Every written page is compressed and packed into a size-class
//! object pool; pages consisting of one repeated word are stored as just
//! that word. Reads decompress transparently.
//!
//! # Example
//!
//! ```
//! use zblk_core::{Device, DeviceConfig, PAGE_SIZE};
//!
//! let device = Device::new(0);
//! device.configure(&DeviceConfig {
//!     disksize: 16 * PAGE_SIZE as u64,
//!     ..DeviceConfig::default()
//! }).unwrap();
//!
//! let page = [0x42u8; PAGE_SIZE];
//! device.write(0, &page).unwrap();
//!
//! let mut out = [0u8; PAGE_SIZE];
//! device.read(0, &mut out).unwrap();
//! assert_eq!(page, out);
//! ```

#![deny(missing_docs)]
#![deny(clippy::panic)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod codec;
mod device;
mod error;
mod io;
pub mod pool;
mod registry;
pub mod samefill;
mod stats;
pub mod streams;
pub mod table;

pub use codec::Algorithm;
pub use device::{Device, DeviceConfig, DeviceStatus};
pub use error::{Error, Result};
pub use io::Request;
pub use registry::DeviceRegistry;
pub use stats::{IoStats, MmStats};

/// Fixed size of one logical page.
pub const PAGE_SIZE: usize = 4096;

/// Sector granularity for request alignment.
pub const LOGICAL_BLOCK_SIZE: usize = 512;
