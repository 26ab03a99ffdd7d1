//! Directory page: packed array of data-page entries.
//!
//! Directory pages form a doubly linked list; each page carries entries
//! describing the data pages it tracks. Layout:
//! ```text
//! Offset  Size  Description
//! 0       1     Page kind (0x02)
//! 1       1     Unused
//! 2       2     Entry count
//! 4       4     This page's id
//! 8       4     Prev directory page id (INVALID at the head)
//! 12      4     Next directory page id (INVALID at the tail)
//! 16      4     Reserved
//! 20      8×n   Entries: (data page id u32, record count u16, free count u16)
//! ```
//!
//! Entries are packed contiguously from index 0; removing one shifts the
//! tail left so no holes remain.

use crate::error::{Result, StorageError};
use crate::page::{get_u16, get_u32, put_u16, put_u32, PageBuf};
use crate::types::{PageId, PageKind, DIR_ENTRY_SIZE, DIR_HEADER_SIZE, MAX_DIR_ENTRIES};

const OFF_ENTRY_COUNT: usize = 2;
const OFF_PAGE_ID: usize = 4;
const OFF_PREV: usize = 8;
const OFF_NEXT: usize = 12;

/// One directory entry describing a data page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirEntry {
    /// The data page this entry describes
    pub page: PageId,
    /// Live records on the data page
    pub record_count: u16,
    /// Free bytes reported by the data page
    pub free_count: u16,
}

/// Read-only view of a directory page
pub struct DirectoryPage<'a> {
    buf: &'a PageBuf,
}

impl<'a> DirectoryPage<'a> {
    /// Interpret a raw buffer as a directory page
    pub fn view(buf: &'a PageBuf) -> Result<Self> {
        if buf.kind() != Some(PageKind::Directory) {
            return Err(StorageError::invalid_page("not a directory page"));
        }
        Ok(Self { buf })
    }

    /// The page id stamped into the header
    pub fn page_id(&self) -> PageId {
        PageId::new(get_u32(self.buf, OFF_PAGE_ID))
    }

    /// The previous directory page in the list
    pub fn prev_page(&self) -> PageId {
        PageId::new(get_u32(self.buf, OFF_PREV))
    }

    /// The next directory page in the list
    pub fn next_page(&self) -> PageId {
        PageId::new(get_u32(self.buf, OFF_NEXT))
    }

    /// Number of entries on this page
    pub fn entry_count(&self) -> u16 {
        get_u16(self.buf, OFF_ENTRY_COUNT)
    }

    /// The entry at the given index, or `None` past the entry array
    pub fn entry(&self, idx: u16) -> Option<DirEntry> {
        if idx >= self.entry_count() {
            return None;
        }
        let base = DIR_HEADER_SIZE + idx as usize * DIR_ENTRY_SIZE;
        Some(DirEntry {
            page: PageId::new(get_u32(self.buf, base)),
            record_count: get_u16(self.buf, base + 4),
            free_count: get_u16(self.buf, base + 6),
        })
    }

    /// Index of the entry describing the given data page
    pub fn find_entry(&self, data_page: PageId) -> Option<u16> {
        (0..self.entry_count()).find(|&i| {
            let base = DIR_HEADER_SIZE + i as usize * DIR_ENTRY_SIZE;
            get_u32(self.buf, base) == data_page.value()
        })
    }
}

/// Mutable view of a directory page
pub struct DirectoryPageMut<'a> {
    buf: &'a mut PageBuf,
}

impl<'a> DirectoryPageMut<'a> {
    /// Format a raw buffer as an empty directory page with no neighbours
    pub fn format(buf: &'a mut PageBuf, page_id: PageId) -> Self {
        buf.fill(0);
        buf[0] = PageKind::Directory as u8;
        put_u32(buf, OFF_PAGE_ID, page_id.value());
        put_u32(buf, OFF_PREV, PageId::INVALID.value());
        put_u32(buf, OFF_NEXT, PageId::INVALID.value());
        Self { buf }
    }

    /// Interpret a raw buffer as a directory page
    pub fn view(buf: &'a mut PageBuf) -> Result<Self> {
        if buf.kind() != Some(PageKind::Directory) {
            return Err(StorageError::invalid_page("not a directory page"));
        }
        Ok(Self { buf })
    }

    /// Read-only view of the same buffer
    pub fn as_read(&self) -> DirectoryPage<'_> {
        DirectoryPage { buf: self.buf }
    }

    /// Set the previous directory page in the list
    pub fn set_prev_page(&mut self, page_id: PageId) {
        put_u32(self.buf, OFF_PREV, page_id.value());
    }

    /// Set the next directory page in the list
    pub fn set_next_page(&mut self, page_id: PageId) {
        put_u32(self.buf, OFF_NEXT, page_id.value());
    }

    /// Append an entry at the tail of the entry array, returning its index
    pub fn push_entry(&mut self, entry: DirEntry) -> Result<u16> {
        let count = self.as_read().entry_count();
        if count as usize >= MAX_DIR_ENTRIES {
            return Err(StorageError::PageFull {
                page_id: self.as_read().page_id(),
                needed: DIR_ENTRY_SIZE,
                available: 0,
            });
        }
        self.write_entry(count, entry);
        put_u16(self.buf, OFF_ENTRY_COUNT, count + 1);
        Ok(count)
    }

    /// Overwrite the entry at the given index
    pub fn set_entry(&mut self, idx: u16, entry: DirEntry) -> Result<()> {
        if idx >= self.as_read().entry_count() {
            return Err(StorageError::invalid_operation(format!(
                "directory entry index {} out of bounds",
                idx
            )));
        }
        self.write_entry(idx, entry);
        Ok(())
    }

    /// Remove the entry at the given index, shifting later entries left
    /// to keep the array packed
    pub fn remove_entry(&mut self, idx: u16) -> Result<()> {
        let count = self.as_read().entry_count();
        if idx >= count {
            return Err(StorageError::invalid_operation(format!(
                "directory entry index {} out of bounds",
                idx
            )));
        }
        let from = DIR_HEADER_SIZE + (idx as usize + 1) * DIR_ENTRY_SIZE;
        let to = DIR_HEADER_SIZE + count as usize * DIR_ENTRY_SIZE;
        self.buf.copy_within(from..to, from - DIR_ENTRY_SIZE);
        // The vacated tail bytes are left as-is; the count bounds them out.
        put_u16(self.buf, OFF_ENTRY_COUNT, count - 1);
        Ok(())
    }

    fn write_entry(&mut self, idx: u16, entry: DirEntry) {
        let base = DIR_HEADER_SIZE + idx as usize * DIR_ENTRY_SIZE;
        put_u32(self.buf, base, entry.page.value());
        put_u16(self.buf, base + 4, entry.record_count);
        put_u16(self.buf, base + 6, entry.free_count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(page: u32, records: u16, free: u16) -> DirEntry {
        DirEntry {
            page: PageId::new(page),
            record_count: records,
            free_count: free,
        }
    }

    #[test]
    fn test_format_fresh_page() {
        let mut buf = PageBuf::new();
        DirectoryPageMut::format(&mut buf, PageId::new(1));

        let page = DirectoryPage::view(&buf).unwrap();
        assert_eq!(page.page_id(), PageId::new(1));
        assert_eq!(page.prev_page(), PageId::INVALID);
        assert_eq!(page.next_page(), PageId::INVALID);
        assert_eq!(page.entry_count(), 0);
        assert_eq!(page.entry(0), None);
    }

    #[test]
    fn test_push_and_find() {
        let mut buf = PageBuf::new();
        let mut page = DirectoryPageMut::format(&mut buf, PageId::new(1));

        assert_eq!(page.push_entry(entry(2, 0, 4076)).unwrap(), 0);
        assert_eq!(page.push_entry(entry(3, 5, 100)).unwrap(), 1);

        let read = page.as_read();
        assert_eq!(read.entry_count(), 2);
        assert_eq!(read.entry(1).unwrap(), entry(3, 5, 100));
        assert_eq!(read.find_entry(PageId::new(3)), Some(1));
        assert_eq!(read.find_entry(PageId::new(9)), None);
    }

    #[test]
    fn test_set_entry() {
        let mut buf = PageBuf::new();
        let mut page = DirectoryPageMut::format(&mut buf, PageId::new(1));
        page.push_entry(entry(2, 0, 4076)).unwrap();

        page.set_entry(0, entry(2, 1, 4000)).unwrap();
        assert_eq!(page.as_read().entry(0).unwrap(), entry(2, 1, 4000));

        assert!(page.set_entry(1, entry(4, 0, 0)).is_err());
    }

    #[test]
    fn test_remove_entry_compacts() {
        let mut buf = PageBuf::new();
        let mut page = DirectoryPageMut::format(&mut buf, PageId::new(1));
        page.push_entry(entry(2, 1, 10)).unwrap();
        page.push_entry(entry(3, 2, 20)).unwrap();
        page.push_entry(entry(4, 3, 30)).unwrap();

        page.remove_entry(1).unwrap();

        let read = page.as_read();
        assert_eq!(read.entry_count(), 2);
        assert_eq!(read.entry(0).unwrap(), entry(2, 1, 10));
        assert_eq!(read.entry(1).unwrap(), entry(4, 3, 30));
        assert_eq!(read.find_entry(PageId::new(3)), None);
    }

    #[test]
    fn test_remove_last_entry() {
        let mut buf = PageBuf::new();
        let mut page = DirectoryPageMut::format(&mut buf, PageId::new(1));
        page.push_entry(entry(2, 1, 10)).unwrap();

        page.remove_entry(0).unwrap();
        assert_eq!(page.as_read().entry_count(), 0);
        assert!(page.remove_entry(0).is_err());
    }

    #[test]
    fn test_capacity_limit() {
        let mut buf = PageBuf::new();
        let mut page = DirectoryPageMut::format(&mut buf, PageId::new(1));

        for i in 0..MAX_DIR_ENTRIES {
            page.push_entry(entry(i as u32 + 2, 0, 4076)).unwrap();
        }
        let err = page.push_entry(entry(999, 0, 4076)).unwrap_err();
        assert!(matches!(err, StorageError::PageFull { .. }));
        assert_eq!(page.as_read().entry_count() as usize, MAX_DIR_ENTRIES);
    }

    #[test]
    fn test_link_pointers() {
        let mut buf = PageBuf::new();
        let mut page = DirectoryPageMut::format(&mut buf, PageId::new(5));
        page.set_prev_page(PageId::new(1));
        page.set_next_page(PageId::new(9));

        let read = page.as_read();
        assert_eq!(read.prev_page(), PageId::new(1));
        assert_eq!(read.next_page(), PageId::new(9));
    }
}
