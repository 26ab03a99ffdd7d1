//! Sequential scan over the live records of a heap file.

use crate::buffer::{BufferPool, BufferPoolImpl};
use crate::error::Result;
use crate::page::{DataPage, DirectoryPage};
use crate::types::{PageId, RecordId};
use std::sync::Arc;

/// Iterates over every live record in a heap file.
///
/// Traversal order: directory pages in linked-list order, entries in
/// index order within each directory page, occupied slots in ascending
/// slot number within each data page.
///
/// The scan keeps positions (page ids and indices), not pins: each step
/// pins at most one directory page or one data page and releases it
/// before returning, so an idle scan holds nothing. Mutating the heap
/// file while a scan is active yields unspecified results.
pub struct HeapScan<P: BufferPool = BufferPoolImpl> {
    pool: Arc<P>,
    /// Directory page being walked, INVALID once the list is exhausted
    dir_page: PageId,
    /// Entry index on the current directory page
    entry_idx: u16,
    /// Data page being walked, INVALID when the next entry is needed
    data_page: PageId,
    /// Next slot to probe on the current data page
    next_slot: u16,
}

impl<P: BufferPool> HeapScan<P> {
    pub(super) fn new(pool: Arc<P>, head: PageId) -> Self {
        Self {
            pool,
            dir_page: head,
            entry_idx: 0,
            data_page: PageId::INVALID,
            next_slot: 0,
        }
    }

    /// Produce the next live record, or `None` at end of scan
    pub fn next_record(&mut self) -> Result<Option<(RecordId, Vec<u8>)>> {
        loop {
            if self.data_page != PageId::INVALID {
                if let Some(found) = self.next_on_data_page()? {
                    return Ok(Some(found));
                }
                // Data page exhausted: move to the following entry.
                self.data_page = PageId::INVALID;
                self.entry_idx += 1;
            } else {
                if self.dir_page == PageId::INVALID {
                    return Ok(None);
                }
                self.advance_directory()?;
            }
        }
    }

    /// Probe slots on the current data page from the saved position
    fn next_on_data_page(&mut self) -> Result<Option<(RecordId, Vec<u8>)>> {
        let guard = self.pool.fetch_page(self.data_page)?;
        let buf = guard.read();
        let page = DataPage::view(&buf)?;

        while self.next_slot < page.slot_count() {
            let slot = self.next_slot;
            self.next_slot += 1;
            if page.is_live(slot) {
                let rid = RecordId::new(self.data_page, slot);
                return Ok(Some((rid, page.record(slot)?.to_vec())));
            }
        }
        Ok(None)
    }

    /// Step to the next entry on the current directory page, or follow
    /// the list to the next directory page
    fn advance_directory(&mut self) -> Result<()> {
        let guard = self.pool.fetch_page(self.dir_page)?;
        let buf = guard.read();
        let dir = DirectoryPage::view(&buf)?;

        match dir.entry(self.entry_idx) {
            Some(entry) if entry.page != PageId::INVALID => {
                self.data_page = entry.page;
                self.next_slot = 0;
            }
            Some(_) => {
                self.entry_idx += 1;
            }
            None => {
                self.dir_page = dir.next_page();
                self.entry_idx = 0;
            }
        }
        Ok(())
    }
}

impl<P: BufferPool> Iterator for HeapScan<P> {
    type Item = Result<(RecordId, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::HeapFile;
    use crate::storage::DiskManagerImpl;
    use crate::types::MAX_RECORD;
    use std::collections::HashSet;
    use tempfile::TempDir;

    fn open_heap(name: &str) -> (TempDir, Arc<BufferPoolImpl>, HeapFile) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        let disk = Arc::new(DiskManagerImpl::open(&path, false).unwrap());
        let pool = Arc::new(BufferPoolImpl::new(disk.clone(), 16));
        let heap = HeapFile::open(pool.clone(), disk, Some(name)).unwrap();
        (dir, pool, heap)
    }

    #[test]
    fn test_scan_empty_file() {
        let (_dir, pool, heap) = open_heap("empty");
        let mut scan = heap.scan();
        assert!(scan.next_record().unwrap().is_none());
        // End of scan is sticky.
        assert!(scan.next_record().unwrap().is_none());
        assert_eq!(pool.pinned_page_count(), 0);
    }

    #[test]
    fn test_scan_yields_exactly_the_live_records() {
        let (_dir, pool, heap) = open_heap("exact");

        let mut expected = HashSet::new();
        let mut rids = Vec::new();
        for i in 0..20u8 {
            let data = vec![i; 50];
            let rid = heap.insert_record(&data).unwrap();
            rids.push(rid);
            expected.insert((rid, data));
        }
        for rid in &rids[5..10] {
            heap.delete_record(*rid).unwrap();
            expected.retain(|(r, _)| r != rid);
        }

        let scanned: HashSet<(RecordId, Vec<u8>)> =
            heap.scan().map(|r| r.unwrap()).collect();
        assert_eq!(scanned, expected);
        assert_eq!(pool.pinned_page_count(), 0);
    }

    #[test]
    fn test_scan_covers_multiple_pages_in_order() {
        let (_dir, _pool, heap) = open_heap("multi-page");

        // Three full pages plus a partial fourth.
        let mut rids = Vec::new();
        for _ in 0..3 {
            rids.push(heap.insert_record(&vec![1u8; MAX_RECORD]).unwrap());
        }
        rids.push(heap.insert_record(b"tail").unwrap());

        let scanned: Vec<RecordId> = heap.scan().map(|r| r.unwrap().0).collect();
        assert_eq!(scanned, rids);
    }

    #[test]
    fn test_scan_skips_holes_within_a_page() {
        let (_dir, _pool, heap) = open_heap("holes");

        let rids: Vec<RecordId> = (0..6u8)
            .map(|i| heap.insert_record(&[i; 40]).unwrap())
            .collect();
        heap.delete_record(rids[0]).unwrap();
        heap.delete_record(rids[2]).unwrap();
        heap.delete_record(rids[5]).unwrap();

        let scanned: Vec<RecordId> = heap.scan().map(|r| r.unwrap().0).collect();
        assert_eq!(scanned, vec![rids[1], rids[3], rids[4]]);
    }

    #[test]
    fn test_scan_is_an_iterator() {
        let (_dir, _pool, heap) = open_heap("iterator");
        for i in 0..4u8 {
            heap.insert_record(&[i; 10]).unwrap();
        }

        let lengths: Vec<usize> = heap
            .scan()
            .map(|r| r.unwrap().1.len())
            .collect();
        assert_eq!(lengths, vec![10; 4]);
    }
}
