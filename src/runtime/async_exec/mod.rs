//! Thin wrapper over the async runtime backend, so the rest of the crate
//! never names `tokio` directly.

#[cfg(feature = "async_runtime_tokio")]
mod tokio;

#[cfg(feature = "async_runtime_tokio")]
pub use self::tokio::*;

use crate::runtime::error::*;

/// Initializes the global async runtime with `num_threads` worker
/// threads. Must be called once, before any task is spawned.
pub fn init(num_threads: usize) -> Result<()> {
    self::tokio::init(num_threads).simple(ErrorKind::Init)
}

/// Tears down the global async runtime.
pub fn drop() {
    self::tokio::drop();
}
