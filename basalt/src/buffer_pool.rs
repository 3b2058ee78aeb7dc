//! Manages the buffer pool, a bounded in-memory cache of heap pages.
//!
//! The pool is also the gate for locking: every page request goes through the
//! lock manager before the cache is touched, and transaction completion is
//! where pages are flushed (commit, FORCE) or reverted (abort) and where all
//! of a transaction's locks are released.

use crate::basalt_debug_log;
use crate::catalog::Catalog;
use crate::errors::DbError;
use crate::lock_manager::{LockManager, Permission};
use crate::page::{HeapPage, PageId};
use crate::transaction::TransactionId;
use crate::tuple::Tuple;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

/// Default number of cached pages for pools that don't choose a size.
pub const DEFAULT_PAGES: usize = 50;

/// The canonical in-memory instance of a cached page. Readers and writers
/// share one handle; the page-level lock in the lock manager serializes
/// logical access, the `RwLock` only guards the in-memory representation.
pub type PageHandle = Arc<RwLock<HeapPage>>;

pub struct BufferPool {
    num_pages: usize,
    catalog: Arc<Catalog>,
    lock_manager: LockManager,
    pages: Mutex<HashMap<PageId, PageHandle>>,
}

impl BufferPool {
    /// Creates a pool that caches up to `num_pages` pages, resolving table
    /// ids through `catalog`.
    pub fn new(num_pages: usize, catalog: Arc<Catalog>) -> Self {
        BufferPool {
            num_pages,
            catalog,
            lock_manager: LockManager::new(),
            pages: Mutex::new(HashMap::new()),
        }
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    /// Retrieves a page with the requested permission. Blocks inside the lock
    /// manager while an incompatible lock is held and fails with
    /// [`DbError::Aborted`] if waiting would deadlock.
    ///
    /// A cache miss reads the page through its heap file, evicting a clean
    /// page first when the pool is full ([`DbError::BufferFull`] if every
    /// cached page is dirty).
    pub fn get_page(
        &self,
        tid: TransactionId,
        pid: PageId,
        perm: Permission,
    ) -> Result<PageHandle, DbError> {
        // 1. The lock comes first; holding the cache mutex while blocking on
        //    a page lock would stall every other caller.
        self.lock_manager.acquire(tid, pid, perm)?;

        let mut pages = self.pages.lock().unwrap();

        // 2. Cached: hand out the canonical instance.
        if let Some(handle) = pages.get(&pid) {
            return Ok(Arc::clone(handle));
        }

        // 3. Miss: make room, then load through the heap file.
        if pages.len() >= self.num_pages {
            self.evict_page(&mut pages)?;
        }
        let file = self.catalog.database_file(pid.table_id())?;
        let page = file.read_page(pid)?;
        basalt_debug_log!("[BufferPool::get_page] Loaded page {} from disk", pid);
        let handle = Arc::new(RwLock::new(page));
        pages.insert(pid, Arc::clone(&handle));
        Ok(handle)
    }

    /// Drops `tid`'s lock on `pid` without any page bookkeeping. This
    /// breaks two-phase locking for that page; the only caller that can
    /// afford it is the heap file's insert probe, which re-requests the page
    /// at write permission immediately after.
    pub fn unsafe_release_page(&self, tid: TransactionId, pid: PageId) {
        self.lock_manager.release(tid, pid);
    }

    /// True if `tid` holds any lock on `pid`.
    pub fn holds_lock(&self, tid: TransactionId, pid: PageId) -> bool {
        self.lock_manager.holds_lock(tid, pid)
    }

    /// Number of pages currently cached. Never exceeds the pool size.
    pub fn num_cached(&self) -> usize {
        self.pages.lock().unwrap().len()
    }

    /// Adds `tuple` to `table_id` on behalf of `tid`, marking every page the
    /// heap file touched dirty. The tuple's record id is set on return.
    pub fn insert_tuple(
        &self,
        tid: TransactionId,
        table_id: u32,
        tuple: &mut Tuple,
    ) -> Result<(), DbError> {
        let file = self.catalog.database_file(table_id)?;
        let touched = file.insert_tuple(tid, tuple, self)?;
        for handle in touched {
            handle.write().unwrap().mark_dirty(true, tid);
        }
        Ok(())
    }

    /// Removes `tuple` from its table on behalf of `tid`. The tuple's record
    /// id names the page; it is cleared on return.
    pub fn delete_tuple(&self, tid: TransactionId, tuple: &mut Tuple) -> Result<(), DbError> {
        let rid = tuple.record_id().ok_or(DbError::NotFound)?;
        let file = self.catalog.database_file(rid.page_id().table_id())?;
        let touched = file.delete_tuple(tid, tuple, self)?;
        for handle in touched {
            handle.write().unwrap().mark_dirty(true, tid);
        }
        Ok(())
    }

    /// Commits or aborts `tid`. A commit flushes every page the transaction
    /// dirtied before returning (FORCE); an abort re-reads each such page
    /// from disk into the canonical cached instance, so every holder of the
    /// handle observes the reverted state. Locks are released only after the
    /// page work succeeded, so a failed flush does not abandon them.
    pub fn transaction_complete(&self, tid: TransactionId, commit: bool) -> Result<(), DbError> {
        {
            let pages = self.pages.lock().unwrap();
            let dirtied: Vec<PageId> = pages
                .iter()
                .filter(|(_, handle)| handle.read().unwrap().is_dirty() == Some(tid))
                .map(|(pid, _)| *pid)
                .collect();

            for pid in dirtied {
                let handle = pages.get(&pid).expect("dirty page is cached");
                let file = self.catalog.database_file(pid.table_id())?;
                if commit {
                    file.write_page(&handle.read().unwrap())?;
                    handle.write().unwrap().mark_dirty(false, tid);
                    basalt_debug_log!(
                        "[BufferPool::transaction_complete] tx {} flushed page {}",
                        tid,
                        pid
                    );
                } else {
                    let fresh = file.read_page(pid)?;
                    *handle.write().unwrap() = fresh;
                    basalt_debug_log!(
                        "[BufferPool::transaction_complete] tx {} reverted page {}",
                        tid,
                        pid
                    );
                }
            }
        }
        self.lock_manager.release_all(tid);
        Ok(())
    }

    /// Flushes every dirty page regardless of owner. Administrative use
    /// only; calling this mid-transaction puts uncommitted data on disk and
    /// breaks NO STEAL.
    pub fn flush_all_pages(&self) -> Result<(), DbError> {
        let pages = self.pages.lock().unwrap();
        for handle in pages.values() {
            Self::flush_page(&self.catalog, handle)?;
        }
        Ok(())
    }

    /// Removes `pid` from the cache without flushing and drops all locks on
    /// it.
    pub fn discard_page(&self, pid: PageId) {
        self.pages.lock().unwrap().remove(&pid);
        self.lock_manager.release_all_on_page(pid);
    }

    fn flush_page(catalog: &Catalog, handle: &PageHandle) -> Result<(), DbError> {
        let (pid, owner) = {
            let page = handle.read().unwrap();
            (page.id(), page.is_dirty())
        };
        let Some(owner) = owner else {
            return Ok(());
        };
        let file = catalog.database_file(pid.table_id())?;
        file.write_page(&handle.read().unwrap())?;
        handle.write().unwrap().mark_dirty(false, owner);
        Ok(())
    }

    /// NO STEAL: only clean pages may leave the pool, so eviction never
    /// writes. Evicting also drops all locks on the page; a clean page has
    /// no uncommitted writer, so no transaction loses protected state.
    fn evict_page(&self, pages: &mut HashMap<PageId, PageHandle>) -> Result<(), DbError> {
        let victim = pages
            .iter()
            .find(|(_, handle)| handle.read().unwrap().is_dirty().is_none())
            .map(|(pid, _)| *pid);
        match victim {
            Some(pid) => {
                basalt_debug_log!("[BufferPool::evict_page] Evicting clean page {}", pid);
                pages.remove(&pid);
                self.lock_manager.release_all_on_page(pid);
                Ok(())
            }
            None => Err(DbError::BufferFull),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap_file::HeapFile;
    use crate::tuple::{Field, FieldType, TupleDesc};
    use tempfile::TempDir;

    fn two_int_desc() -> Arc<TupleDesc> {
        Arc::new(TupleDesc::new(
            vec![FieldType::Int, FieldType::Int],
            vec![Some("a".to_string()), Some("b".to_string())],
        ))
    }

    fn tuple(desc: &Arc<TupleDesc>, a: i32, b: i32) -> Tuple {
        let mut t = Tuple::new(Arc::clone(desc));
        t.set_field(0, Field::Int(a));
        t.set_field(1, Field::Int(b));
        t
    }

    /// A catalog with one empty two-int-column table, plus a pool of the
    /// given capacity over it.
    fn setup(pool_pages: usize) -> (TempDir, Arc<Catalog>, BufferPool, u32) {
        let dir = TempDir::new().unwrap();
        let desc = two_int_desc();
        let file = Arc::new(HeapFile::open(dir.path().join("t.dat"), desc).unwrap());
        let table_id = file.id();
        let catalog = Arc::new(Catalog::new());
        catalog.add_table(file, "t", "a");
        let pool = BufferPool::new(pool_pages, Arc::clone(&catalog));
        (dir, catalog, pool, table_id)
    }

    /// Appends `n` empty pages to the table's backing file.
    fn grow_file(catalog: &Catalog, table_id: u32, n: usize) {
        let file = catalog.database_file(table_id).unwrap();
        for page_no in 0..n {
            let pid = PageId::new(table_id, page_no);
            let page = HeapPage::new(pid, &HeapPage::empty_page_data(), file.tuple_desc().clone())
                .unwrap();
            file.write_page(&page).unwrap();
        }
    }

    #[test]
    fn cache_size_stays_bounded() {
        let (_dir, catalog, pool, table_id) = setup(2);
        grow_file(&catalog, table_id, 4);

        let tid = TransactionId::new();
        for page_no in 0..4 {
            pool.get_page(tid, PageId::new(table_id, page_no), Permission::ReadOnly)
                .unwrap();
            assert!(pool.num_cached() <= 2);
        }
        pool.transaction_complete(tid, true).unwrap();
    }

    #[test]
    fn eviction_drops_locks_on_the_victim() {
        let (_dir, catalog, pool, table_id) = setup(1);
        grow_file(&catalog, table_id, 2);

        let tid = TransactionId::new();
        let first = PageId::new(table_id, 0);
        pool.get_page(tid, first, Permission::ReadOnly).unwrap();
        assert!(pool.holds_lock(tid, first));

        // Loading the second page evicts the first, locks included.
        pool.get_page(tid, PageId::new(table_id, 1), Permission::ReadOnly)
            .unwrap();
        assert!(!pool.holds_lock(tid, first));
        pool.transaction_complete(tid, true).unwrap();
    }

    #[test]
    fn full_pool_of_dirty_pages_rejects_new_loads() {
        let (_dir, catalog, pool, table_id) = setup(2);
        grow_file(&catalog, table_id, 3);

        let tid = TransactionId::new();
        for page_no in 0..2 {
            let handle = pool
                .get_page(tid, PageId::new(table_id, page_no), Permission::ReadWrite)
                .unwrap();
            handle.write().unwrap().mark_dirty(true, tid);
        }

        let err = pool.get_page(tid, PageId::new(table_id, 2), Permission::ReadOnly);
        assert!(matches!(err, Err(DbError::BufferFull)));

        // Committing cleans the pages, so the blocked load now succeeds.
        pool.transaction_complete(tid, true).unwrap();
        let tid2 = TransactionId::new();
        pool.get_page(tid2, PageId::new(table_id, 2), Permission::ReadOnly)
            .unwrap();
        pool.transaction_complete(tid2, true).unwrap();
    }

    #[test]
    fn commit_flushes_and_cleans_dirty_pages() {
        let (_dir, catalog, pool, table_id) = setup(4);

        let tid = TransactionId::new();
        let mut t = tuple(&two_int_desc(), 1, 10);
        pool.insert_tuple(tid, table_id, &mut t).unwrap();

        let pid = t.record_id().unwrap().page_id();
        {
            let handle = pool.get_page(tid, pid, Permission::ReadOnly).unwrap();
            assert_eq!(handle.read().unwrap().is_dirty(), Some(tid));
        }

        pool.transaction_complete(tid, true).unwrap();

        // The cached page is clean and the on-disk image carries the tuple.
        let tid2 = TransactionId::new();
        let handle = pool.get_page(tid2, pid, Permission::ReadOnly).unwrap();
        assert_eq!(handle.read().unwrap().is_dirty(), None);

        let on_disk = catalog.database_file(table_id).unwrap().read_page(pid).unwrap();
        assert_eq!(on_disk.iter().count(), 1);
        pool.transaction_complete(tid2, true).unwrap();
    }

    #[test]
    fn abort_reverts_to_the_disk_image() {
        let (_dir, catalog, pool, table_id) = setup(4);
        let desc = two_int_desc();

        // One committed tuple as the baseline.
        let tid = TransactionId::new();
        let mut base = tuple(&desc, 1, 10);
        pool.insert_tuple(tid, table_id, &mut base).unwrap();
        pool.transaction_complete(tid, true).unwrap();

        // A second insert that gets rolled back.
        let tid2 = TransactionId::new();
        let mut doomed = tuple(&desc, 2, 20);
        pool.insert_tuple(tid2, table_id, &mut doomed).unwrap();
        let pid = doomed.record_id().unwrap().page_id();
        pool.transaction_complete(tid2, false).unwrap();

        let tid3 = TransactionId::new();
        let handle = pool.get_page(tid3, pid, Permission::ReadOnly).unwrap();
        {
            let page = handle.read().unwrap();
            assert_eq!(page.is_dirty(), None);
            assert_eq!(page.iter().count(), 1);
        }
        let on_disk = catalog.database_file(table_id).unwrap().read_page(pid).unwrap();
        assert_eq!(on_disk.iter().count(), 1);
        pool.transaction_complete(tid3, true).unwrap();
    }

    #[test]
    fn delete_routes_through_the_tuple_record_id() {
        let (_dir, _catalog, pool, table_id) = setup(4);
        let desc = two_int_desc();

        let tid = TransactionId::new();
        let mut t = tuple(&desc, 1, 10);
        pool.insert_tuple(tid, table_id, &mut t).unwrap();
        let pid = t.record_id().unwrap().page_id();

        pool.delete_tuple(tid, &mut t).unwrap();
        assert!(t.record_id().is_none());

        let handle = pool.get_page(tid, pid, Permission::ReadOnly).unwrap();
        assert_eq!(handle.read().unwrap().iter().count(), 0);
        pool.transaction_complete(tid, true).unwrap();

        // Deleting a tuple that was never placed fails.
        let tid2 = TransactionId::new();
        let mut unplaced = tuple(&desc, 9, 90);
        assert!(matches!(
            pool.delete_tuple(tid2, &mut unplaced),
            Err(DbError::NotFound)
        ));
        pool.transaction_complete(tid2, false).unwrap();
    }

    #[test]
    fn discard_page_drops_cache_entry_and_locks() {
        let (_dir, catalog, pool, table_id) = setup(2);
        grow_file(&catalog, table_id, 1);

        let tid = TransactionId::new();
        let pid = PageId::new(table_id, 0);
        pool.get_page(tid, pid, Permission::ReadWrite).unwrap();
        assert_eq!(pool.num_cached(), 1);

        pool.discard_page(pid);
        assert_eq!(pool.num_cached(), 0);
        assert!(!pool.holds_lock(tid, pid));
    }
}
