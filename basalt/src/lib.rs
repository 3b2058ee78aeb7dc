//! # Basalt Storage Engine
//! A paged relational storage engine: heap files of slotted pages, a bounded
//! buffer pool with NO-STEAL eviction and FORCE commits, and page-level
//! two-phase locking with deadlock detection.

/// The bounded page cache and transaction lifecycle.
pub mod buffer_pool;
/// The registry of tables, schemas and backing files.
pub mod catalog;
/// The error surface of the engine.
pub mod errors;
/// Heap files: page-granular file I/O, insert/delete, file scans.
pub mod heap_file;
/// The page-level lock manager for concurrency control.
pub mod lock_manager;
/// The slotted heap page layout.
pub mod page;
/// Transaction identifiers.
pub mod transaction;
/// Typed fields, tuples and schema descriptors.
pub mod tuple;

use std::sync::atomic::{AtomicUsize, Ordering};

/// The default size of a single page in bytes.
pub const DEFAULT_PAGE_SIZE: usize = 4096;

static PAGE_SIZE: AtomicUsize = AtomicUsize::new(DEFAULT_PAGE_SIZE);

/// The size of a single page in bytes.
pub fn page_size() -> usize {
    PAGE_SIZE.load(Ordering::Relaxed)
}

/// Overrides the process-wide page size. Only intended for tests, and only
/// at process start; pages parsed under one size cannot be written back under
/// another.
pub fn set_page_size(bytes: usize) {
    PAGE_SIZE.store(bytes, Ordering::Relaxed);
}

/// Restores the default page size. Only intended for tests.
pub fn reset_page_size() {
    PAGE_SIZE.store(DEFAULT_PAGE_SIZE, Ordering::Relaxed);
}

pub fn debug_logs_enabled() -> bool {
    std::env::var_os("BASALT_DEBUG_LOG").is_some()
}

#[macro_export]
macro_rules! basalt_debug_log {
    ($($arg:tt)*) => {
        if $crate::debug_logs_enabled() {
            println!($($arg)*);
        }
    };
}

pub use buffer_pool::{BufferPool, PageHandle};
pub use errors::DbError;
pub use page::{HeapPage, PageId};
pub use transaction::TransactionId;
