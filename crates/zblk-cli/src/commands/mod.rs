//! CLI command implementations.

mod bench;
mod info;
mod verify;

pub use bench::{bench, BenchArgs};
pub use info::info;
pub use verify::{verify, VerifyArgs};
