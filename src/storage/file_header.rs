//! Database file header.
//!
//! The first page (page 0) of the database file holds metadata about the
//! database, including the named-file registry that maps a heap-file name
//! to the id of its head directory page.
//!
//! Layout:
//! ```text
//! Offset  Size  Description
//! 0       16    Magic string "HeapStorageV01\0\0"
//! 16      4     Page size (currently always 4096)
//! 20      4     Total page count
//! 24      4     Free page count
//! 28      4     Checksum (CRC32 of the rest of the page)
//! 32      2     File-registry entry count
//! 34      ...   Registry entries: (name length u8, name bytes, head page id u32)
//! ```

use crate::error::{Result, StorageError};
use crate::types::{PageId, PAGE_SIZE};

/// Magic bytes to identify a valid database file
pub const MAGIC: &[u8; 16] = b"HeapStorageV01\0\0";

/// Longest registrable heap-file name, in bytes
pub const MAX_FILE_NAME: usize = 128;

const OFF_PAGE_SIZE: usize = 16;
const OFF_PAGE_COUNT: usize = 20;
const OFF_FREE_COUNT: usize = 24;
const OFF_CHECKSUM: usize = 28;
const OFF_ENTRY_COUNT: usize = 32;
const OFF_ENTRIES: usize = 34;

/// Database file header
#[derive(Debug, Clone)]
pub struct FileHeader {
    /// Page size in bytes
    pub page_size: u32,
    /// Total number of pages in the file (including the header page)
    pub page_count: u32,
    /// Number of deallocated pages awaiting reuse
    pub free_page_count: u32,
    /// Named-file registry: heap-file name to head directory page id
    entries: Vec<(String, PageId)>,
}

impl FileHeader {
    /// Create a new file header for an empty database
    pub fn new() -> Self {
        Self {
            page_size: PAGE_SIZE as u32,
            page_count: 1, // Just the header page initially
            free_page_count: 0,
            entries: Vec::new(),
        }
    }

    /// Read a file header from a header-page buffer
    pub fn read(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < PAGE_SIZE {
            return Err(StorageError::invalid_db("header page too short"));
        }
        if &bytes[0..16] != MAGIC {
            return Err(StorageError::invalid_db("invalid magic bytes"));
        }

        let stored_checksum = u32::from_be_bytes([
            bytes[OFF_CHECKSUM],
            bytes[OFF_CHECKSUM + 1],
            bytes[OFF_CHECKSUM + 2],
            bytes[OFF_CHECKSUM + 3],
        ]);
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&bytes[..OFF_CHECKSUM]);
        hasher.update(&bytes[OFF_CHECKSUM + 4..PAGE_SIZE]);
        if stored_checksum != hasher.finalize() {
            return Err(StorageError::corruption("header checksum mismatch"));
        }

        let page_size = u32::from_be_bytes([bytes[16], bytes[17], bytes[18], bytes[19]]);
        if page_size != PAGE_SIZE as u32 {
            return Err(StorageError::invalid_db(format!(
                "unsupported page size: {} (expected {})",
                page_size, PAGE_SIZE
            )));
        }
        let page_count = u32::from_be_bytes([bytes[20], bytes[21], bytes[22], bytes[23]]);
        let free_page_count = u32::from_be_bytes([bytes[24], bytes[25], bytes[26], bytes[27]]);

        let entry_count =
            u16::from_be_bytes([bytes[OFF_ENTRY_COUNT], bytes[OFF_ENTRY_COUNT + 1]]) as usize;
        let mut entries = Vec::with_capacity(entry_count);
        let mut pos = OFF_ENTRIES;
        for _ in 0..entry_count {
            if pos + 1 > PAGE_SIZE {
                return Err(StorageError::corruption("truncated file registry"));
            }
            let name_len = bytes[pos] as usize;
            pos += 1;
            if name_len > MAX_FILE_NAME || pos + name_len + 4 > PAGE_SIZE {
                return Err(StorageError::corruption("truncated file registry"));
            }
            let name = std::str::from_utf8(&bytes[pos..pos + name_len])
                .map_err(|_| StorageError::corruption("file name is not valid UTF-8"))?
                .to_string();
            pos += name_len;
            let head = u32::from_be_bytes([
                bytes[pos],
                bytes[pos + 1],
                bytes[pos + 2],
                bytes[pos + 3],
            ]);
            pos += 4;
            entries.push((name, PageId::new(head)));
        }

        Ok(Self {
            page_size,
            page_count,
            free_page_count,
            entries,
        })
    }

    /// Write this header to a header-page buffer
    pub fn write(&self, bytes: &mut [u8]) {
        bytes[..PAGE_SIZE].fill(0);

        bytes[0..16].copy_from_slice(MAGIC);
        bytes[OFF_PAGE_SIZE..OFF_PAGE_SIZE + 4].copy_from_slice(&self.page_size.to_be_bytes());
        bytes[OFF_PAGE_COUNT..OFF_PAGE_COUNT + 4].copy_from_slice(&self.page_count.to_be_bytes());
        bytes[OFF_FREE_COUNT..OFF_FREE_COUNT + 4]
            .copy_from_slice(&self.free_page_count.to_be_bytes());
        bytes[OFF_ENTRY_COUNT..OFF_ENTRY_COUNT + 2]
            .copy_from_slice(&(self.entries.len() as u16).to_be_bytes());

        let mut pos = OFF_ENTRIES;
        for (name, head) in &self.entries {
            bytes[pos] = name.len() as u8;
            pos += 1;
            bytes[pos..pos + name.len()].copy_from_slice(name.as_bytes());
            pos += name.len();
            bytes[pos..pos + 4].copy_from_slice(&head.value().to_be_bytes());
            pos += 4;
        }

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&bytes[..OFF_CHECKSUM]);
        hasher.update(&bytes[OFF_CHECKSUM + 4..PAGE_SIZE]);
        let checksum = hasher.finalize();
        bytes[OFF_CHECKSUM..OFF_CHECKSUM + 4].copy_from_slice(&checksum.to_be_bytes());
    }

    /// Allocate a new page ID by extending the file
    pub fn allocate_page(&mut self) -> PageId {
        let page_id = PageId::new(self.page_count);
        self.page_count += 1;
        page_id
    }

    /// Look up the head page registered under a name
    pub fn file_entry(&self, name: &str) -> Option<PageId> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|&(_, head)| head)
    }

    /// Register a name for a head page
    pub fn add_file_entry(&mut self, name: &str, head: PageId) -> Result<()> {
        if name.is_empty() || name.len() > MAX_FILE_NAME {
            return Err(StorageError::invalid_operation(format!(
                "file name must be 1..={} bytes",
                MAX_FILE_NAME
            )));
        }
        if self.file_entry(name).is_some() {
            return Err(StorageError::invalid_operation(format!(
                "file entry '{}' already exists",
                name
            )));
        }
        let added = 1 + name.len() + 4;
        if self.registry_size() + added > PAGE_SIZE - OFF_ENTRIES {
            return Err(StorageError::invalid_operation(
                "file registry is full".to_string(),
            ));
        }
        self.entries.push((name.to_string(), head));
        Ok(())
    }

    /// Remove a name from the registry, returning the head page it mapped to
    pub fn remove_file_entry(&mut self, name: &str) -> Result<PageId> {
        let idx = self
            .entries
            .iter()
            .position(|(n, _)| n == name)
            .ok_or_else(|| {
                StorageError::invalid_operation(format!("no file entry '{}'", name))
            })?;
        Ok(self.entries.remove(idx).1)
    }

    fn registry_size(&self) -> usize {
        self.entries
            .iter()
            .map(|(name, _)| 1 + name.len() + 4)
            .sum()
    }
}

impl Default for FileHeader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_roundtrip() {
        let mut header = FileHeader::new();
        header.page_count = 12;
        header.free_page_count = 3;
        header.add_file_entry("orders", PageId::new(1)).unwrap();
        header.add_file_entry("customers", PageId::new(7)).unwrap();

        let mut bytes = vec![0u8; PAGE_SIZE];
        header.write(&mut bytes);

        let restored = FileHeader::read(&bytes).unwrap();
        assert_eq!(restored.page_size, PAGE_SIZE as u32);
        assert_eq!(restored.page_count, 12);
        assert_eq!(restored.free_page_count, 3);
        assert_eq!(restored.file_entry("orders"), Some(PageId::new(1)));
        assert_eq!(restored.file_entry("customers"), Some(PageId::new(7)));
        assert_eq!(restored.file_entry("missing"), None);
    }

    #[test]
    fn test_invalid_magic() {
        let mut bytes = vec![0u8; PAGE_SIZE];
        bytes[0..16].copy_from_slice(b"NotAHeapStorage\0");
        assert!(FileHeader::read(&bytes).is_err());
    }

    #[test]
    fn test_checksum_validation() {
        let header = FileHeader::new();
        let mut bytes = vec![0u8; PAGE_SIZE];
        header.write(&mut bytes);

        bytes[OFF_PAGE_COUNT] ^= 0xFF;
        assert!(matches!(
            FileHeader::read(&bytes),
            Err(StorageError::Corruption(_))
        ));
    }

    #[test]
    fn test_registry_rules() {
        let mut header = FileHeader::new();
        header.add_file_entry("a", PageId::new(1)).unwrap();

        // Duplicate names are rejected.
        assert!(header.add_file_entry("a", PageId::new(2)).is_err());
        // Over-long names are rejected.
        let long = "x".repeat(MAX_FILE_NAME + 1);
        assert!(header.add_file_entry(&long, PageId::new(2)).is_err());
        assert!(header.add_file_entry("", PageId::new(2)).is_err());

        assert_eq!(header.remove_file_entry("a").unwrap(), PageId::new(1));
        assert!(header.remove_file_entry("a").is_err());
        assert_eq!(header.file_entry("a"), None);
    }

    #[test]
    fn test_allocate_page() {
        let mut header = FileHeader::new();
        assert_eq!(header.page_count, 1);

        let p1 = header.allocate_page();
        let p2 = header.allocate_page();
        assert_eq!(p1, PageId::new(1));
        assert_eq!(p2, PageId::new(2));
        assert_eq!(header.page_count, 3);
    }
}
