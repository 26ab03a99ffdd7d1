//! Directory maintenance for heap files.
//!
//! The directory is a doubly linked list of directory pages starting at
//! the file's head. These algorithms keep it consistent while the file
//! grows and shrinks:
//! - `find_avail_page`: first-fit search for a data page with room
//! - `alloc_data_page`: grow the file by one data page, chaining a new
//!   directory page when every existing one is full
//! - `find_dir_entry` / `update_dir_entry`: locate and reconcile the
//!   entry describing a data page
//! - `reclaim_page`: free an emptied data page and, when that empties a
//!   non-head directory page, splice it out of the list
//!
//! At most two pages are pinned at a time, except while splicing, where
//! the neighbours of the outgoing page are repaired as well.

use crate::buffer::{BufferPool, PageGuardMut};
use crate::error::{Result, StorageError};
use crate::heap::HeapFile;
use crate::page::{DataPageMut, DirEntry, DirectoryPage, DirectoryPageMut};
use crate::types::{PageId, MAX_DIR_ENTRIES, SLOT_SIZE};
use log::debug;

impl HeapFile {
    /// Find a data page with at least `record_len + SLOT_SIZE` free
    /// bytes, walking directory entries in linked-list order and taking
    /// the first fit. Allocates a new data page when none qualifies.
    pub(super) fn find_avail_page(&self, record_len: usize) -> Result<PageId> {
        let needed = (record_len + SLOT_SIZE) as u16;

        let mut cur = self.head;
        while cur != PageId::INVALID {
            let guard = self.pool.fetch_page(cur)?;
            let buf = guard.read();
            let dir = DirectoryPage::view(&buf)?;
            for idx in 0..dir.entry_count() {
                if let Some(entry) = dir.entry(idx) {
                    if entry.free_count >= needed {
                        return Ok(entry.page);
                    }
                }
            }
            cur = dir.next_page();
        }

        self.alloc_data_page()
    }

    /// Allocate one new data page and install its entry on the first
    /// directory page with spare capacity, chaining a new directory page
    /// at the tail if every existing one is full. Returns the new data
    /// page id with nothing left pinned.
    fn alloc_data_page(&self) -> Result<PageId> {
        let mut cur = self.head;
        loop {
            let (entry_count, next) = {
                let guard = self.pool.fetch_page(cur)?;
                let buf = guard.read();
                let dir = DirectoryPage::view(&buf)?;
                (dir.entry_count(), dir.next_page())
            };

            if (entry_count as usize) < MAX_DIR_ENTRIES {
                let (data_page, free) = {
                    let (page_id, guard) = self.pool.new_page()?;
                    let mut buf = guard.write();
                    let page = DataPageMut::format(&mut buf, page_id);
                    (page_id, page.as_read().free_space())
                };

                let guard = self.pool.fetch_page_mut(cur)?;
                let mut buf = guard.write();
                let mut dir = DirectoryPageMut::view(&mut buf)?;
                dir.push_entry(DirEntry {
                    page: data_page,
                    record_count: 0,
                    free_count: free,
                })?;
                debug!(
                    "allocated data page {} under directory page {}",
                    data_page, cur
                );
                return Ok(data_page);
            }

            if next != PageId::INVALID {
                cur = next;
                continue;
            }

            // Every directory page is full: chain a fresh one at the tail.
            let new_dir = {
                let (page_id, guard) = self.pool.new_page()?;
                let mut buf = guard.write();
                let mut dir = DirectoryPageMut::format(&mut buf, page_id);
                dir.set_prev_page(cur);
                page_id
            };
            {
                let guard = self.pool.fetch_page_mut(cur)?;
                let mut buf = guard.write();
                DirectoryPageMut::view(&mut buf)?.set_next_page(new_dir);
            }
            debug!("chained directory page {} after {}", new_dir, cur);
            cur = new_dir;
        }
    }

    /// Locate the directory entry for a data page.
    ///
    /// On a hit, the directory page is returned still pinned for writing
    /// together with the entry index; the caller owns the unpin (the
    /// usual next step is to mutate the entry, and handing the pin over
    /// avoids a second fetch).
    pub(super) fn find_dir_entry(
        &self,
        data_page: PageId,
    ) -> Result<Option<(PageGuardMut<'_>, u16)>> {
        let mut cur = self.head;
        while cur != PageId::INVALID {
            let (hit, next) = {
                let guard = self.pool.fetch_page(cur)?;
                let buf = guard.read();
                let dir = DirectoryPage::view(&buf)?;
                (dir.find_entry(data_page), dir.next_page())
            };

            if hit.is_some() {
                let guard = self.pool.fetch_page_mut(cur)?;
                return Ok(hit.map(|idx| (guard, idx)));
            }
            cur = next;
        }
        Ok(None)
    }

    /// Reconcile the directory entry for a data page after an insert or
    /// delete: apply the record-count delta and the page's new free
    /// count. A record count that drops below 1 triggers reclamation of
    /// the data page.
    pub(super) fn update_dir_entry(
        &self,
        data_page: PageId,
        delta: i32,
        new_free: u16,
    ) -> Result<()> {
        let (guard, idx) = match self.find_dir_entry(data_page)? {
            Some(found) => found,
            None => {
                return Err(StorageError::corruption(format!(
                    "no directory entry for data page {}",
                    data_page
                )))
            }
        };

        let record_count = {
            let mut buf = guard.write();
            let mut dir = DirectoryPageMut::view(&mut buf)?;
            let entry = dir.as_read().entry(idx).ok_or_else(|| {
                StorageError::corruption(format!(
                    "directory entry {} missing on page {}",
                    idx,
                    guard.page_id()
                ))
            })?;

            let updated = entry.record_count as i32 + delta;
            if updated < 0 {
                return Err(StorageError::corruption(format!(
                    "record count underflow on data page {}",
                    data_page
                )));
            }
            dir.set_entry(
                idx,
                DirEntry {
                    page: entry.page,
                    record_count: updated as u16,
                    free_count: new_free,
                },
            )?;
            updated as u16
        };

        if record_count == 0 {
            self.reclaim_page(data_page, guard, idx)?;
        }
        Ok(())
    }

    /// Reclaim a data page whose record count reached 0: remove its
    /// directory entry and free the page. A non-head directory page left
    /// without entries is spliced out of the list and freed; the head is
    /// kept alive for the life of the file, empty or not.
    fn reclaim_page(
        &self,
        data_page: PageId,
        dir_guard: PageGuardMut<'_>,
        idx: u16,
    ) -> Result<()> {
        let dir_id = dir_guard.page_id();
        let (entry_count, prev, next) = {
            let buf = dir_guard.read();
            let dir = DirectoryPage::view(&buf)?;
            (dir.entry_count(), dir.prev_page(), dir.next_page())
        };

        if entry_count >= 2 || dir_id == self.head {
            // The directory page stays: drop the entry and compact.
            {
                let mut buf = dir_guard.write();
                DirectoryPageMut::view(&mut buf)?.remove_entry(idx)?;
            }
            drop(dir_guard);
        } else {
            // Removing the last entry would leave a non-head directory
            // page empty: splice it out and free it. A non-head page
            // always has a valid prev, so only two link shapes exist.
            drop(dir_guard);
            {
                let guard = self.pool.fetch_page_mut(prev)?;
                let mut buf = guard.write();
                DirectoryPageMut::view(&mut buf)?.set_next_page(next);
            }
            if next != PageId::INVALID {
                let guard = self.pool.fetch_page_mut(next)?;
                let mut buf = guard.write();
                DirectoryPageMut::view(&mut buf)?.set_prev_page(prev);
            }
            self.pool.free_page(dir_id)?;
            debug!("spliced out directory page {}", dir_id);
        }

        self.pool.free_page(data_page)?;
        debug!("reclaimed data page {}", data_page);
        Ok(())
    }
}
