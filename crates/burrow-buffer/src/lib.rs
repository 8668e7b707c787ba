//! Buffer pool management for Burrow.
//!
//! This crate provides in-memory page caching with:
//! - Fixed-size buffer pool with configurable frame count
//! - Clock eviction policy with dirty-page write-back
//! - Pin counting so in-use pages stay resident
//! - RAII page guards that unpin on every exit path

mod frame;
mod pool;
mod replacer;

pub use frame::{BufferFrame, FrameId};
pub use pool::{BufferManager, PageGuard, PageIo};
pub use replacer::{ClockReplacer, Replacer};
