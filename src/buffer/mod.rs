//! Buffer pool: in-memory page cache with pinning and eviction.
//!
//! The buffer pool caches pages in memory to reduce disk I/O. Frames are
//! pinned through RAII guards, so a pin acquired anywhere in an operation
//! is released on every exit path. Every use of a frame stamps it from a
//! monotonic clock; a full pool evicts the unpinned frame with the oldest
//! stamp, writing dirty contents back first.

mod pool;

pub use pool::{BufferPool, BufferPoolImpl, PageGuard, PageGuardMut, PageRef, PageRefMut};
