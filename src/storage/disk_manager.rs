//! Disk manager implementation.
//!
//! The disk manager is responsible for reading and writing pages to the
//! database file, for allocating and freeing page ids, and for the
//! named-file registry. It abstracts the file I/O operations behind a
//! trait so that the rest of the system can be tested with mock
//! implementations.

use crate::error::{Result, StorageError};
use crate::page::PageBuf;
use crate::storage::FileHeader;
use crate::types::{PageId, PAGE_SIZE};
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

/// Trait for disk I/O and the named-file registry
///
/// This abstraction allows swapping the storage backend or mocking for tests.
pub trait DiskManager: Send + Sync {
    /// Read a page from disk
    fn read_page(&self, page_id: PageId) -> Result<PageBuf>;

    /// Write a page to disk
    fn write_page(&self, page_id: PageId, data: &[u8]) -> Result<()>;

    /// Reserve a fresh page id, reusing a freed one when possible
    fn allocate_page(&self) -> Result<PageId>;

    /// Release a page id for reuse
    fn deallocate_page(&self, page_id: PageId) -> Result<()>;

    /// Sync all data to disk
    fn sync(&self) -> Result<()>;

    /// Total number of pages in the file, including the header page
    fn page_count(&self) -> u32;

    /// Look up the head page registered under a name
    fn get_file_entry(&self, name: &str) -> Option<PageId>;

    /// Register a name for a head page
    fn add_file_entry(&self, name: &str, head: PageId) -> Result<()>;

    /// Remove a name from the registry
    fn delete_file_entry(&self, name: &str) -> Result<()>;
}

/// File-based disk manager implementation
pub struct DiskManagerImpl {
    /// The database file
    file: RwLock<File>,
    /// The file header (cached)
    header: RwLock<FileHeader>,
    /// Freed page ids awaiting reuse. Kept in memory only: a reopened
    /// database extends the file instead of refilling holes.
    free_pages: RwLock<VecDeque<PageId>>,
    /// Whether to sync on each write
    sync_on_write: bool,
}

impl DiskManagerImpl {
    /// Open or create a database file
    pub fn open(path: &Path, sync_on_write: bool) -> Result<Self> {
        let exists = path.exists();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let header = if exists && file.metadata()?.len() >= PAGE_SIZE as u64 {
            // Read existing header
            let mut file_ref = &file;
            let mut buf = vec![0u8; PAGE_SIZE];
            file_ref.read_exact(&mut buf)?;
            FileHeader::read(&buf)?
        } else {
            // Create new database
            let header = FileHeader::new();
            let mut buf = vec![0u8; PAGE_SIZE];
            header.write(&mut buf);

            let mut file_ref = &file;
            file_ref.seek(SeekFrom::Start(0))?;
            file_ref.write_all(&buf)?;
            file_ref.sync_all()?;

            header
        };

        Ok(Self {
            file: RwLock::new(file),
            header: RwLock::new(header),
            free_pages: RwLock::new(VecDeque::new()),
            sync_on_write,
        })
    }

    /// Flush the header to disk
    fn flush_header(&self) -> Result<()> {
        let header = self.header.read();
        let mut buf = vec![0u8; PAGE_SIZE];
        header.write(&mut buf);

        let mut file = self.file.write();
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&buf)?;

        if self.sync_on_write {
            file.sync_data()?;
        }

        Ok(())
    }
}

impl DiskManager for DiskManagerImpl {
    fn read_page(&self, page_id: PageId) -> Result<PageBuf> {
        if page_id == PageId::HEADER {
            return Err(StorageError::invalid_operation(
                "cannot read header page directly",
            ));
        }

        {
            let header = self.header.read();
            if !page_id.is_valid() || page_id.value() >= header.page_count {
                return Err(StorageError::PageNotFound(page_id));
            }
        }

        let mut buf = vec![0u8; PAGE_SIZE];
        let mut file = self.file.write();
        file.seek(SeekFrom::Start(page_id.file_offset()))?;
        file.read_exact(&mut buf)?;

        Ok(PageBuf::from_bytes(&buf))
    }

    fn write_page(&self, page_id: PageId, data: &[u8]) -> Result<()> {
        if page_id == PageId::HEADER {
            return Err(StorageError::invalid_operation(
                "cannot write header page directly",
            ));
        }
        if data.len() != PAGE_SIZE {
            return Err(StorageError::invalid_operation(format!(
                "page data must be {} bytes, got {}",
                PAGE_SIZE,
                data.len()
            )));
        }

        let mut file = self.file.write();
        file.seek(SeekFrom::Start(page_id.file_offset()))?;
        file.write_all(data)?;

        if self.sync_on_write {
            file.sync_data()?;
        }

        Ok(())
    }

    fn allocate_page(&self) -> Result<PageId> {
        // First try the free list
        {
            let mut free_pages = self.free_pages.write();
            if let Some(page_id) = free_pages.pop_front() {
                let mut header = self.header.write();
                header.free_page_count = free_pages.len() as u32;
                drop(header);
                drop(free_pages);
                self.flush_header()?;
                return Ok(page_id);
            }
        }

        // Extend the file with a zeroed page
        let page_id = {
            let mut header = self.header.write();
            header.allocate_page()
        };

        let zeros = vec![0u8; PAGE_SIZE];
        {
            let mut file = self.file.write();
            file.seek(SeekFrom::Start(page_id.file_offset()))?;
            file.write_all(&zeros)?;
        }

        self.flush_header()?;
        Ok(page_id)
    }

    fn deallocate_page(&self, page_id: PageId) -> Result<()> {
        if page_id == PageId::HEADER {
            return Err(StorageError::invalid_operation(
                "cannot deallocate header page",
            ));
        }
        if !page_id.is_valid() || page_id.value() >= self.page_count() {
            return Err(StorageError::PageNotFound(page_id));
        }

        {
            let mut free_pages = self.free_pages.write();
            free_pages.push_back(page_id);
            let mut header = self.header.write();
            header.free_page_count = free_pages.len() as u32;
        }

        self.flush_header()
    }

    fn sync(&self) -> Result<()> {
        self.flush_header()?;
        let file = self.file.write();
        file.sync_all()?;
        Ok(())
    }

    fn page_count(&self) -> u32 {
        self.header.read().page_count
    }

    fn get_file_entry(&self, name: &str) -> Option<PageId> {
        self.header.read().file_entry(name)
    }

    fn add_file_entry(&self, name: &str, head: PageId) -> Result<()> {
        self.header.write().add_file_entry(name, head)?;
        self.flush_header()
    }

    fn delete_file_entry(&self, name: &str) -> Result<()> {
        self.header.write().remove_file_entry(name)?;
        self.flush_header()
    }
}
