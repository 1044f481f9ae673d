//! # zblk
//!
//! In-memory compressed block store with a size-class object pool.
//!
//! This is the workspace root crate that re-exports core functionality.
//! For direct usage, depend on individual sub-crates:
//!
//! - [`zblk-core`] - device engine (pool, page table, compression pipeline)
//! - [`zblk-cli`] - CLI tool (`zblk` binary)
//!
//! [`zblk-core`]: https://crates.io/crates/zblk-core
//! [`zblk-cli`]: https://crates.io/crates/zblk-cli

pub use zblk_core::*;
