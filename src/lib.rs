//! # Heap Storage Engine
//!
//! A disk-based heap-file storage manager: unordered collections of
//! variable-length records, addressed by stable record identifiers and
//! persisted across fixed-size pages organized by a linked directory.
//!
//! ## Architecture
//!
//! The storage engine is composed of modular, swappable components:
//!
//! - **Page Layer** (`page`): data pages (slotted records) and directory
//!   pages (packed data-page entries)
//! - **Storage Layer** (`storage`): disk I/O, page allocation, and the
//!   named-file registry
//! - **Buffer Pool** (`buffer`): page cache with pin guards, dirty
//!   tracking, and LRU eviction
//! - **Heap Layer** (`heap`): heap files, directory maintenance, and
//!   sequential scans
//!
//! ## Usage
//!
//! ```rust,ignore
//! use heap_storage::{Config, Storage};
//!
//! let storage = Storage::open(Config::new("records.db"))?;
//! let heap = storage.open_heap("events")?;
//!
//! // Insert a record and read it back
//! let rid = heap.insert_record(b"payload")?;
//! let bytes = heap.select_record(rid)?;
//!
//! // Walk every live record
//! for entry in heap.scan() {
//!     let (rid, bytes) = entry?;
//!     println!("{rid}: {} bytes", bytes.len());
//! }
//! ```

pub mod buffer;
pub mod error;
pub mod heap;
pub mod page;
pub mod storage;
pub mod types;

pub use error::{Result, StorageError};
pub use types::{PageId, RecordId, MAX_RECORD, PAGE_SIZE};

// Re-export main public API
pub use buffer::{BufferPool, BufferPoolImpl};
pub use heap::{HeapFile, HeapScan};
pub use storage::{DiskManager, DiskManagerImpl};

use std::path::PathBuf;
use std::sync::Arc;

/// Database configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the database file
    pub path: PathBuf,
    /// Buffer pool size in number of pages (default: 1000)
    pub buffer_pool_size: usize,
    /// Whether to sync writes immediately (default: false for performance)
    pub sync_on_write: bool,
}

impl Config {
    /// Create a new configuration with default settings
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            buffer_pool_size: 1000,
            sync_on_write: false,
        }
    }

    /// Set buffer pool size
    pub fn buffer_pool_size(mut self, size: usize) -> Self {
        self.buffer_pool_size = size;
        self
    }

    /// Enable sync on write for durability
    pub fn sync_on_write(mut self, enabled: bool) -> Self {
        self.sync_on_write = enabled;
        self
    }
}

/// Main database handle providing heap-file storage
///
/// This is the primary public interface for the storage engine: it owns
/// the disk manager and buffer pool and hands out heap-file handles.
pub struct Storage {
    disk_manager: Arc<DiskManagerImpl>,
    buffer_pool: Arc<BufferPoolImpl>,
    config: Config,
}

impl Storage {
    /// Open or create a database at the given path
    pub fn open(config: Config) -> Result<Self> {
        let disk_manager = Arc::new(DiskManagerImpl::open(&config.path, config.sync_on_write)?);
        let buffer_pool = Arc::new(BufferPoolImpl::new(
            disk_manager.clone(),
            config.buffer_pool_size,
        ));

        Ok(Self {
            disk_manager,
            buffer_pool,
            config,
        })
    }

    /// Open the heap file registered under `name`, creating and
    /// registering it first if the name is unknown
    pub fn open_heap(&self, name: &str) -> Result<HeapFile> {
        HeapFile::open(
            self.buffer_pool.clone(),
            self.disk_manager.clone(),
            Some(name),
        )
    }

    /// Create a temporary heap file. It has no registry entry and is
    /// destroyed when the returned handle is dropped.
    pub fn temp_heap(&self) -> Result<HeapFile> {
        HeapFile::open(self.buffer_pool.clone(), self.disk_manager.clone(), None)
    }

    /// Flush all dirty pages to disk
    pub fn flush(&self) -> Result<()> {
        self.buffer_pool.flush_all()
    }

    /// Get the current configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get statistics about the database
    pub fn stats(&self) -> StorageStats {
        StorageStats {
            page_count: self.buffer_pool.page_count(),
            buffer_pool_size: self.buffer_pool.capacity(),
        }
    }
}

/// Database statistics
#[derive(Debug, Clone)]
pub struct StorageStats {
    /// Total number of pages in the database file
    pub page_count: usize,
    /// Buffer pool capacity
    pub buffer_pool_size: usize,
}
