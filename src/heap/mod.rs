//! Heap file layer: unordered record storage behind a linked directory.
//!
//! A heap file stores variable-length records across data pages and
//! tracks those pages through a doubly linked list of directory pages.
//! Each directory entry records a data page's id, its live-record count,
//! and its free space, so insertion can find room without touching the
//! data pages themselves.
//!
//! This module provides:
//! - `HeapFile`: open/create, insert, select, update, delete, count,
//!   destroy (`file`)
//! - the directory maintenance algorithms: free-space search, page
//!   allocation, entry upkeep, and page reclamation (`directory`)
//! - `HeapScan`: sequential iteration over all live records (`scan`)

mod directory;
mod file;
mod scan;

pub use file::HeapFile;
pub use scan::HeapScan;
