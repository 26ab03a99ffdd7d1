//! Heap file handle and record operations.

use crate::buffer::{BufferPool, BufferPoolImpl};
use crate::error::{Result, StorageError};
use crate::heap::HeapScan;
use crate::page::{DataPage, DataPageMut, DirectoryPage, DirectoryPageMut};
use crate::storage::DiskManager;
use crate::types::{PageId, RecordId, MAX_RECORD};
use log::warn;
use std::fmt;
use std::sync::Arc;

/// A heap file: an unordered collection of variable-length records.
///
/// Named heap files are registered with the disk manager and persist
/// until [`HeapFile::destroy`] is called. Temporary heap files have no
/// registry entry and are destroyed when the handle is dropped.
pub struct HeapFile {
    pub(super) pool: Arc<BufferPoolImpl>,
    pub(super) disk: Arc<dyn DiskManager>,
    /// Head of the directory linked list. Never changes for the life of
    /// the file: the head directory page is never freed, even when empty.
    pub(super) head: PageId,
    pub(super) name: Option<String>,
    pub(super) temp: bool,
    pub(super) destroyed: bool,
}

impl HeapFile {
    /// Open a heap file.
    ///
    /// With a name, the registry decides: a registered name binds to its
    /// existing head directory page, an unregistered one creates a fresh
    /// file. Without a name, a temporary file is created; dropping the
    /// handle destroys it.
    pub fn open(
        pool: Arc<BufferPoolImpl>,
        disk: Arc<dyn DiskManager>,
        name: Option<&str>,
    ) -> Result<Self> {
        let (head, name, temp) = match name {
            Some(name) => match disk.get_file_entry(name) {
                Some(head) => {
                    // The registry is trusted but cheap to verify.
                    let guard = pool.fetch_page(head)?;
                    DirectoryPage::view(&guard.read())?;
                    (head, Some(name.to_string()), false)
                }
                None => {
                    let head = Self::create_head(&pool)?;
                    disk.add_file_entry(name, head)?;
                    (head, Some(name.to_string()), false)
                }
            },
            None => (Self::create_head(&pool)?, None, true),
        };

        Ok(Self {
            pool,
            disk,
            head,
            name,
            temp,
            destroyed: false,
        })
    }

    /// Allocate and format the head directory page of a new file
    fn create_head(pool: &BufferPoolImpl) -> Result<PageId> {
        let (page_id, guard) = pool.new_page()?;
        let mut buf = guard.write();
        DirectoryPageMut::format(&mut buf, page_id);
        Ok(page_id)
    }

    /// The file's registered name, if any
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// The head directory page id
    pub fn head_page(&self) -> PageId {
        self.head
    }

    /// Whether this is a temporary file
    pub fn is_temporary(&self) -> bool {
        self.temp
    }

    /// Insert a record, returning its RID.
    ///
    /// Fails with `RecordTooLarge` when the record cannot fit on a data
    /// page together with its slot.
    pub fn insert_record(&self, data: &[u8]) -> Result<RecordId> {
        if data.len() > MAX_RECORD {
            return Err(StorageError::RecordTooLarge {
                size: data.len(),
                max: MAX_RECORD,
            });
        }

        let page_id = self.find_avail_page(data.len())?;
        let (slot, new_free) = {
            let guard = self.pool.fetch_page_mut(page_id)?;
            let mut buf = guard.write();
            let mut page = DataPageMut::view(&mut buf)?;
            let slot = page.insert_record(data)?;
            (slot, page.as_read().free_space())
        };

        self.update_dir_entry(page_id, 1, new_free)?;
        Ok(RecordId::new(page_id, slot))
    }

    /// Read the record at the given RID.
    ///
    /// The bytes are copied out of the buffer frame, which may be reused
    /// for another page as soon as the pin drops.
    pub fn select_record(&self, rid: RecordId) -> Result<Vec<u8>> {
        let guard = self
            .pool
            .fetch_page(rid.page)
            .map_err(|e| rid_error(e, rid))?;
        let buf = guard.read();
        let page = DataPage::view(&buf).map_err(|e| rid_error(e, rid))?;
        Ok(page.record(rid.slot)?.to_vec())
    }

    /// Overwrite the record at the given RID in place. The new bytes
    /// must match the existing record's length, so the directory's free
    /// counts are unaffected.
    pub fn update_record(&self, rid: RecordId, data: &[u8]) -> Result<()> {
        let guard = self
            .pool
            .fetch_page_mut(rid.page)
            .map_err(|e| rid_error(e, rid))?;
        let mut buf = guard.write();
        let mut page = DataPageMut::view(&mut buf).map_err(|e| rid_error(e, rid))?;
        page.update_record(rid.slot, data)
    }

    /// Delete the record at the given RID. A data page left without
    /// records is freed, along with its directory entry.
    pub fn delete_record(&self, rid: RecordId) -> Result<()> {
        let new_free = {
            let guard = self
                .pool
                .fetch_page_mut(rid.page)
                .map_err(|e| rid_error(e, rid))?;
            let mut buf = guard.write();
            let mut page = DataPageMut::view(&mut buf).map_err(|e| rid_error(e, rid))?;
            page.delete_record(rid.slot)?;
            page.as_read().free_space()
        };

        self.update_dir_entry(rid.page, -1, new_free)
    }

    /// Count the live records by summing the directory's record counts
    pub fn record_count(&self) -> Result<u64> {
        let mut total = 0u64;
        let mut cur = self.head;
        while cur != PageId::INVALID {
            let guard = self.pool.fetch_page(cur)?;
            let buf = guard.read();
            let dir = DirectoryPage::view(&buf)?;
            for idx in 0..dir.entry_count() {
                if let Some(entry) = dir.entry(idx) {
                    total += entry.record_count as u64;
                }
            }
            cur = dir.next_page();
        }
        Ok(total)
    }

    /// Open a sequential scan over all live records
    pub fn scan(&self) -> HeapScan {
        HeapScan::new(Arc::clone(&self.pool), self.head)
    }

    /// Destroy the heap file, freeing every page it owns and removing
    /// its registry entry. Consumes the handle.
    pub fn destroy(mut self) -> Result<()> {
        self.destroy_inner()
    }

    fn destroy_inner(&mut self) -> Result<()> {
        let mut cur = self.head;
        while cur != PageId::INVALID {
            let (data_pages, next) = {
                let guard = self.pool.fetch_page(cur)?;
                let buf = guard.read();
                let dir = DirectoryPage::view(&buf)?;
                let pages: Vec<PageId> = (0..dir.entry_count())
                    .filter_map(|idx| dir.entry(idx))
                    .map(|entry| entry.page)
                    .collect();
                (pages, dir.next_page())
            };

            for page in data_pages {
                self.pool.free_page(page)?;
            }
            self.pool.free_page(cur)?;
            cur = next;
        }

        if let Some(name) = &self.name {
            self.disk.delete_file_entry(name)?;
        }
        self.destroyed = true;
        Ok(())
    }
}

impl fmt::Display for HeapFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{}", name),
            None => write!(f, "<temp>"),
        }
    }
}

impl Drop for HeapFile {
    fn drop(&mut self) {
        if self.temp && !self.destroyed {
            if let Err(e) = self.destroy_inner() {
                warn!("failed to destroy temporary heap file: {}", e);
            }
        }
    }
}

/// Errors that mean "this RID does not exist here" surface as `InvalidRid`
fn rid_error(err: StorageError, rid: RecordId) -> StorageError {
    match err {
        StorageError::PageNotFound(_) | StorageError::InvalidPage(_) => {
            StorageError::InvalidRid(rid)
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::DiskManagerImpl;
    use tempfile::TempDir;

    fn open_env(capacity: usize) -> (TempDir, Arc<BufferPoolImpl>, Arc<DiskManagerImpl>) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        let disk = Arc::new(DiskManagerImpl::open(&path, false).unwrap());
        let pool = Arc::new(BufferPoolImpl::new(disk.clone(), capacity));
        (dir, pool, disk)
    }

    fn open_named(
        pool: &Arc<BufferPoolImpl>,
        disk: &Arc<DiskManagerImpl>,
        name: &str,
    ) -> HeapFile {
        HeapFile::open(pool.clone(), disk.clone(), Some(name)).unwrap()
    }

    #[test]
    fn test_new_file_is_empty() {
        let (_dir, pool, disk) = open_env(16);
        let heap = open_named(&pool, &disk, "empty");

        assert_eq!(heap.record_count().unwrap(), 0);
        assert_eq!(heap.scan().count(), 0);
        assert_eq!(pool.pinned_page_count(), 0);
    }

    #[test]
    fn test_insert_select_roundtrip() {
        let (_dir, pool, disk) = open_env(16);
        let heap = open_named(&pool, &disk, "roundtrip");

        let rid = heap.insert_record(b"hello heap").unwrap();
        assert_eq!(heap.select_record(rid).unwrap(), b"hello heap");
        assert_eq!(heap.record_count().unwrap(), 1);
        assert_eq!(pool.pinned_page_count(), 0);
    }

    #[test]
    fn test_same_length_records_share_first_page() {
        let (_dir, pool, disk) = open_env(16);
        let heap = open_named(&pool, &disk, "sequential");

        let r1 = heap.insert_record(&[1u8; 64]).unwrap();
        let r2 = heap.insert_record(&[2u8; 64]).unwrap();
        let r3 = heap.insert_record(&[3u8; 64]).unwrap();

        assert_eq!(r1.page, r2.page);
        assert_eq!(r2.page, r3.page);
        assert_eq!((r1.slot, r2.slot, r3.slot), (0, 1, 2));
        assert_eq!(heap.record_count().unwrap(), 3);
    }

    #[test]
    fn test_record_size_boundaries() {
        let (_dir, pool, disk) = open_env(16);
        let heap = open_named(&pool, &disk, "bounds");

        let rid = heap.insert_record(&vec![7u8; MAX_RECORD]).unwrap();
        assert_eq!(heap.select_record(rid).unwrap().len(), MAX_RECORD);

        let err = heap.insert_record(&vec![7u8; MAX_RECORD + 1]).unwrap_err();
        assert!(matches!(err, StorageError::RecordTooLarge { .. }));
        assert_eq!(heap.record_count().unwrap(), 1);
    }

    #[test]
    fn test_select_rejects_dead_rids() {
        let (_dir, pool, disk) = open_env(16);
        let heap = open_named(&pool, &disk, "dead-rids");

        let rid = heap.insert_record(b"short lived").unwrap();
        heap.delete_record(rid).unwrap();

        // Deleted, unknown slot, and unknown page all surface the same way.
        assert!(matches!(
            heap.select_record(rid),
            Err(StorageError::InvalidRid(_))
        ));
        assert!(matches!(
            heap.select_record(RecordId::new(rid.page, 99)),
            Err(StorageError::InvalidRid(_))
        ));
        assert!(matches!(
            heap.select_record(RecordId::new(PageId::new(900), 0)),
            Err(StorageError::InvalidRid(_))
        ));
        // A directory page is not addressable as a record page.
        assert!(matches!(
            heap.select_record(RecordId::new(heap.head_page(), 0)),
            Err(StorageError::InvalidRid(_))
        ));
    }

    #[test]
    fn test_update_record() {
        let (_dir, pool, disk) = open_env(16);
        let heap = open_named(&pool, &disk, "update");

        let rid = heap.insert_record(b"before").unwrap();
        heap.update_record(rid, b"after!").unwrap();
        assert_eq!(heap.select_record(rid).unwrap(), b"after!");

        let err = heap.update_record(rid, b"a different length").unwrap_err();
        assert!(matches!(err, StorageError::RecordLengthMismatch { .. }));
        assert_eq!(heap.select_record(rid).unwrap(), b"after!");
        assert_eq!(heap.record_count().unwrap(), 1);
        assert_eq!(pool.pinned_page_count(), 0);
    }

    #[test]
    fn test_delete_and_slot_reuse() {
        let (_dir, pool, disk) = open_env(16);
        let heap = open_named(&pool, &disk, "reuse");

        let r1 = heap.insert_record(&[1u8; 32]).unwrap();
        let r2 = heap.insert_record(&[2u8; 32]).unwrap();
        heap.delete_record(r1).unwrap();
        assert_eq!(heap.record_count().unwrap(), 1);

        let r3 = heap.insert_record(&[3u8; 32]).unwrap();
        assert_eq!(r3, r1, "lowest empty slot is reused");
        assert_eq!(heap.select_record(r3).unwrap(), [3u8; 32]);
        assert_eq!(heap.select_record(r2).unwrap(), [2u8; 32]);
        assert_eq!(heap.record_count().unwrap(), 2);
    }

    #[test]
    fn test_full_page_spills_to_second_page() {
        let (_dir, pool, disk) = open_env(16);
        let heap = open_named(&pool, &disk, "spill");

        let r1 = heap.insert_record(&vec![1u8; MAX_RECORD]).unwrap();
        let r2 = heap.insert_record(&vec![2u8; MAX_RECORD]).unwrap();
        assert_ne!(r1.page, r2.page);
        assert_eq!(heap.record_count().unwrap(), 2);

        // Both pages are reachable by scan.
        let pages: Vec<PageId> = heap
            .scan()
            .map(|r| r.unwrap().0.page)
            .collect();
        assert_eq!(pages, vec![r1.page, r2.page]);
    }

    #[test]
    fn test_counts_track_inserts_and_deletes() {
        let (_dir, pool, disk) = open_env(16);
        let heap = open_named(&pool, &disk, "counts");

        let mut rids = Vec::new();
        for i in 0..50u8 {
            rids.push(heap.insert_record(&[i; 100]).unwrap());
        }
        assert_eq!(heap.record_count().unwrap(), 50);

        for rid in rids.drain(..20) {
            heap.delete_record(rid).unwrap();
        }
        assert_eq!(heap.record_count().unwrap(), 30);
        assert_eq!(heap.scan().count(), 30);
        assert_eq!(pool.pinned_page_count(), 0);
    }

    #[test]
    fn test_destroy_frees_pages_and_name() {
        let (_dir, pool, disk) = open_env(16);
        let heap = open_named(&pool, &disk, "doomed");
        for i in 0..30u8 {
            heap.insert_record(&vec![i; 600]).unwrap();
        }
        let pages_before = disk.page_count();

        heap.destroy().unwrap();
        assert_eq!(disk.get_file_entry("doomed"), None);

        // Everything the file owned is back on the free list, so a new
        // file of the same shape does not grow the database.
        let heap = open_named(&pool, &disk, "doomed");
        for i in 0..30u8 {
            heap.insert_record(&vec![i; 600]).unwrap();
        }
        assert_eq!(disk.page_count(), pages_before);
    }

    #[test]
    fn test_temp_file_destroyed_on_drop() {
        let (_dir, pool, disk) = open_env(32);

        let pages_used;
        {
            let heap = HeapFile::open(pool.clone(), disk.clone(), None).unwrap();
            assert!(heap.is_temporary());
            assert_eq!(format!("{}", heap), "<temp>");
            for i in 0..100u16 {
                heap.insert_record(&i.to_be_bytes()).unwrap();
            }
            pages_used = disk.page_count();
        }

        // The registry never saw the temp file, and the drop put every
        // page it owned back on the free list: an identical file fits
        // into the reclaimed pages without growing the database.
        let heap = HeapFile::open(pool.clone(), disk.clone(), None).unwrap();
        for i in 0..100u16 {
            heap.insert_record(&i.to_be_bytes()).unwrap();
        }
        assert_eq!(disk.page_count(), pages_used);
    }

    #[test]
    fn test_reopen_by_name_shares_state() {
        let (_dir, pool, disk) = open_env(16);

        let heap = open_named(&pool, &disk, "shared");
        let rid = heap.insert_record(b"persistent").unwrap();
        let head = heap.head_page();
        drop(heap);

        // Named files survive their handle; reopening binds the same head.
        let heap = open_named(&pool, &disk, "shared");
        assert_eq!(heap.head_page(), head);
        assert_eq!(heap.select_record(rid).unwrap(), b"persistent");
        assert_eq!(format!("{}", heap), "shared");
    }

    #[test]
    fn test_insert_after_emptying_file() {
        let (_dir, pool, disk) = open_env(16);
        let heap = open_named(&pool, &disk, "revived");

        let rid = heap.insert_record(b"only one").unwrap();
        heap.delete_record(rid).unwrap();
        assert_eq!(heap.record_count().unwrap(), 0);

        // The head directory page survived with zero entries; the file
        // keeps working.
        let rid = heap.insert_record(b"back again").unwrap();
        assert_eq!(heap.select_record(rid).unwrap(), b"back again");
        assert_eq!(heap.record_count().unwrap(), 1);
    }
}
