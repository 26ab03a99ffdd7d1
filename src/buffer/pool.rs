//! Buffer pool implementation.
//!
//! The buffer pool manages a fixed number of in-memory page frames,
//! caching pages read from disk and writing dirty pages back. Frames hold
//! raw page buffers; the page layer's views interpret them as data or
//! directory pages.
//!
//! Pins are represented by guard values. Dropping a guard unpins the
//! frame, so pin balance holds on every control-flow path.
//!
//! Eviction order lives on the frames themselves: every pin and unpin
//! stamps the frame from a monotonic clock, and a full pool drops the
//! unpinned frame with the oldest stamp. Eviction is the rare path, so a
//! scan over the frame table beats maintaining a separate recency
//! structure on every access.

use crate::error::{Result, StorageError};
use crate::page::PageBuf;
use crate::storage::DiskManager;
use crate::types::PageId;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Trait for buffer pool operations
pub trait BufferPool: Send + Sync {
    /// Pin a page for reading, loading it from disk on a miss
    fn fetch_page(&self, page_id: PageId) -> Result<PageGuard<'_>>;

    /// Pin a page for writing; the frame is marked dirty
    fn fetch_page_mut(&self, page_id: PageId) -> Result<PageGuardMut<'_>>;

    /// Allocate a page on disk and install a zeroed frame for it without
    /// a disk read. The caller formats the page before unpinning.
    fn new_page(&self) -> Result<(PageId, PageGuardMut<'_>)>;

    /// Write a specific page back to disk if dirty
    fn flush_page(&self, page_id: PageId) -> Result<()>;

    /// Write all dirty pages back to disk
    fn flush_all(&self) -> Result<()>;

    /// Drop the page's frame and free the page on disk. The page must
    /// not be pinned.
    fn free_page(&self, page_id: PageId) -> Result<()>;

    /// Get the total number of pages in the database
    fn page_count(&self) -> usize;

    /// Get the buffer pool capacity
    fn capacity(&self) -> usize;
}

/// A frame in the buffer pool
struct BufferFrame {
    /// The raw page contents
    buf: PageBuf,
    /// Whether the page has been modified since it was loaded
    dirty: bool,
    /// Pin count (number of live guards)
    pin_count: u32,
    /// Clock value of the most recent pin or unpin; the eviction victim
    /// is the unpinned frame with the smallest stamp
    last_used: u64,
}

impl BufferFrame {
    fn new(buf: PageBuf) -> Self {
        Self {
            buf,
            dirty: false,
            pin_count: 0,
            last_used: 0,
        }
    }
}

/// Buffer pool implementation
pub struct BufferPoolImpl {
    /// The disk manager for I/O
    disk_manager: Arc<dyn DiskManager>,
    /// Cached frames indexed by page ID
    frames: RwLock<HashMap<PageId, Arc<RwLock<BufferFrame>>>>,
    /// Monotonic clock handing out use stamps
    clock: AtomicU64,
    /// Maximum number of frames
    capacity: usize,
}

impl BufferPoolImpl {
    /// Create a new buffer pool
    pub fn new(disk_manager: Arc<dyn DiskManager>, capacity: usize) -> Self {
        Self {
            disk_manager,
            frames: RwLock::new(HashMap::with_capacity(capacity)),
            clock: AtomicU64::new(0),
            capacity,
        }
    }

    /// Number of pages currently held by at least one pin.
    ///
    /// Balanced operations leave this where they found it; tests lean on
    /// that to catch leaked pins.
    pub fn pinned_page_count(&self) -> usize {
        let frames = self.frames.read();
        frames
            .values()
            .filter(|frame| frame.read().pin_count > 0)
            .count()
    }

    /// Number of frames currently cached (test only)
    #[cfg(test)]
    fn cached_page_count(&self) -> usize {
        self.frames.read().len()
    }

    /// Take the next use stamp from the clock
    fn next_stamp(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    /// Get or load a frame for a page
    fn get_frame(&self, page_id: PageId) -> Result<Arc<RwLock<BufferFrame>>> {
        // Check if already in buffer
        {
            let frames = self.frames.read();
            if let Some(frame) = frames.get(&page_id) {
                return Ok(Arc::clone(frame));
            }
        }

        // Need to load from disk
        let buf = self.disk_manager.read_page(page_id)?;
        self.install_frame(page_id, BufferFrame::new(buf))
    }

    /// Insert a frame for a page, evicting if the pool is at capacity
    fn install_frame(
        &self,
        page_id: PageId,
        frame: BufferFrame,
    ) -> Result<Arc<RwLock<BufferFrame>>> {
        {
            let frames = self.frames.read();
            if frames.len() >= self.capacity {
                drop(frames);
                self.evict_one()?;
            }
        }

        let frame = Arc::new(RwLock::new(frame));
        let mut frames = self.frames.write();
        frames.insert(page_id, Arc::clone(&frame));
        Ok(frame)
    }

    /// Evict the unpinned frame with the oldest use stamp
    fn evict_one(&self) -> Result<()> {
        let victim = {
            let frames = self.frames.read();
            frames
                .iter()
                .filter_map(|(&page_id, frame)| {
                    let frame = frame.read();
                    (frame.pin_count == 0).then_some((frame.last_used, page_id))
                })
                .min()
                .map(|(_, page_id)| page_id)
        };

        let page_id = match victim {
            Some(page_id) => page_id,
            // Every frame is pinned: nothing can go.
            None => return Err(StorageError::BufferPoolExhausted),
        };

        // Write back if dirty, then drop the frame.
        self.flush_page(page_id)?;
        let mut frames = self.frames.write();
        frames.remove(&page_id);
        Ok(())
    }

    fn pin(&self, frame: &Arc<RwLock<BufferFrame>>, mark_dirty: bool) {
        let mut f = frame.write();
        f.pin_count += 1;
        f.last_used = self.next_stamp();
        if mark_dirty {
            f.dirty = true;
        }
    }
}

impl BufferPool for BufferPoolImpl {
    fn fetch_page(&self, page_id: PageId) -> Result<PageGuard<'_>> {
        let frame = self.get_frame(page_id)?;
        self.pin(&frame, false);
        Ok(PageGuard {
            frame,
            page_id,
            pool: self,
        })
    }

    fn fetch_page_mut(&self, page_id: PageId) -> Result<PageGuardMut<'_>> {
        let frame = self.get_frame(page_id)?;
        self.pin(&frame, true);
        Ok(PageGuardMut {
            frame,
            page_id,
            pool: self,
        })
    }

    fn new_page(&self) -> Result<(PageId, PageGuardMut<'_>)> {
        let page_id = self.disk_manager.allocate_page()?;

        // Fresh pages never touch disk on the way in; the frame starts
        // zeroed and dirty, and the caller formats it in place.
        let frame = self.install_frame(
            page_id,
            BufferFrame {
                buf: PageBuf::new(),
                dirty: true,
                pin_count: 1,
                last_used: self.next_stamp(),
            },
        )?;

        Ok((
            page_id,
            PageGuardMut {
                frame,
                page_id,
                pool: self,
            },
        ))
    }

    fn flush_page(&self, page_id: PageId) -> Result<()> {
        let frames = self.frames.read();
        if let Some(frame) = frames.get(&page_id) {
            let mut frame = frame.write();
            if frame.dirty {
                self.disk_manager.write_page(page_id, frame.buf.as_bytes())?;
                frame.dirty = false;
            }
        }
        Ok(())
    }

    fn flush_all(&self) -> Result<()> {
        let frames = self.frames.read();
        for (&page_id, frame) in frames.iter() {
            let mut frame = frame.write();
            if frame.dirty {
                self.disk_manager.write_page(page_id, frame.buf.as_bytes())?;
                frame.dirty = false;
            }
        }
        self.disk_manager.sync()?;
        Ok(())
    }

    fn free_page(&self, page_id: PageId) -> Result<()> {
        {
            let frames = self.frames.read();
            if let Some(frame) = frames.get(&page_id) {
                if frame.read().pin_count > 0 {
                    return Err(StorageError::invalid_operation(format!(
                        "cannot free pinned page {}",
                        page_id
                    )));
                }
            }
        }

        {
            let mut frames = self.frames.write();
            frames.remove(&page_id);
        }

        self.disk_manager.deallocate_page(page_id)?;
        Ok(())
    }

    fn page_count(&self) -> usize {
        self.disk_manager.page_count() as usize
    }

    fn capacity(&self) -> usize {
        self.capacity
    }
}

/// RAII guard for read access to a pinned page
pub struct PageGuard<'a> {
    frame: Arc<RwLock<BufferFrame>>,
    page_id: PageId,
    pool: &'a BufferPoolImpl,
}

impl<'a> PageGuard<'a> {
    /// Get the page ID
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Get a read lock on the page contents
    pub fn read(&self) -> PageRef<'_> {
        PageRef {
            guard: self.frame.read(),
        }
    }
}

impl<'a> Drop for PageGuard<'a> {
    fn drop(&mut self) {
        let mut frame = self.frame.write();
        frame.pin_count = frame.pin_count.saturating_sub(1);
        frame.last_used = self.pool.next_stamp();
    }
}

/// Reference to pinned page contents (through a read lock)
pub struct PageRef<'a> {
    guard: RwLockReadGuard<'a, BufferFrame>,
}

impl<'a> std::ops::Deref for PageRef<'a> {
    type Target = PageBuf;

    fn deref(&self) -> &Self::Target {
        &self.guard.buf
    }
}

/// RAII guard for write access to a pinned page
pub struct PageGuardMut<'a> {
    frame: Arc<RwLock<BufferFrame>>,
    page_id: PageId,
    pool: &'a BufferPoolImpl,
}

impl<'a> PageGuardMut<'a> {
    /// Get the page ID
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Get a write lock on the page contents
    pub fn write(&self) -> PageRefMut<'_> {
        let mut guard = self.frame.write();
        guard.dirty = true;
        PageRefMut { guard }
    }

    /// Get a read lock on the page contents
    pub fn read(&self) -> PageRef<'_> {
        PageRef {
            guard: self.frame.read(),
        }
    }
}

impl<'a> Drop for PageGuardMut<'a> {
    fn drop(&mut self) {
        let mut frame = self.frame.write();
        frame.pin_count = frame.pin_count.saturating_sub(1);
        frame.last_used = self.pool.next_stamp();
    }
}

/// Mutable reference to pinned page contents (through a write lock)
pub struct PageRefMut<'a> {
    guard: RwLockWriteGuard<'a, BufferFrame>,
}

impl<'a> std::ops::Deref for PageRefMut<'a> {
    type Target = PageBuf;

    fn deref(&self) -> &Self::Target {
        &self.guard.buf
    }
}

impl<'a> std::ops::DerefMut for PageRefMut<'a> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard.buf
    }
}
