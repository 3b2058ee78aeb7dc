//! Heap files: unordered collections of tuples persisted as fixed-size pages.

use crate::basalt_debug_log;
use crate::buffer_pool::{BufferPool, PageHandle};
use crate::errors::DbError;
use crate::lock_manager::Permission;
use crate::page::{HeapPage, PageId};
use crate::page_size;
use crate::transaction::TransactionId;
use crate::tuple::{Tuple, TupleDesc};
use std::collections::hash_map::DefaultHasher;
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::hash::{Hash, Hasher};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// A heap file backed by one on-disk file whose length is always a whole
/// number of pages. Page `k` occupies bytes `[k * page_size, (k+1) * page_size)`.
pub struct HeapFile {
    file: Mutex<File>,
    path: PathBuf,
    id: u32,
    desc: Arc<TupleDesc>,
    /// Serializes new-page allocation: two inserts that both found every page
    /// full must not both append.
    extend_lock: Mutex<()>,
}

impl HeapFile {
    /// Opens (creating if needed) the backing file in read-write mode. The
    /// table id is derived from the canonical path, so reopening the same
    /// file after a restart yields the same id.
    pub fn open<P: AsRef<Path>>(path: P, desc: Arc<TupleDesc>) -> Result<Self, DbError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.as_ref())?;
        let path = path.as_ref().canonicalize()?;
        let id = table_id_for_path(&path);
        basalt_debug_log!("[HeapFile::open] Opened {:?} as table {}", path, id);
        Ok(HeapFile {
            file: Mutex::new(file),
            path,
            id,
            desc,
            extend_lock: Mutex::new(()),
        })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn tuple_desc(&self) -> &Arc<TupleDesc> {
        &self.desc
    }

    /// Number of whole pages in the file.
    pub fn num_pages(&self) -> Result<usize, DbError> {
        let file = self.file.lock().unwrap();
        Ok(file.metadata()?.len() as usize / page_size())
    }

    /// Reads and parses the page at `pid`. Fails with
    /// [`DbError::PageOutOfRange`] if the file ends before a full page.
    pub fn read_page(&self, pid: PageId) -> Result<HeapPage, DbError> {
        let mut buf = vec![0u8; page_size()];
        {
            let mut file = self.file.lock().unwrap();
            file.seek(SeekFrom::Start((pid.page_no() * page_size()) as u64))?;
            if let Err(err) = file.read_exact(&mut buf) {
                return Err(match err.kind() {
                    ErrorKind::UnexpectedEof => DbError::PageOutOfRange(pid),
                    _ => DbError::Io(err),
                });
            }
        }
        HeapPage::new(pid, &buf, Arc::clone(&self.desc))
    }

    /// Writes the page's image at its offset and syncs; a flushed page is
    /// durable when this returns.
    pub fn write_page(&self, page: &HeapPage) -> Result<(), DbError> {
        let data = page.page_data();
        let mut file = self.file.lock().unwrap();
        file.seek(SeekFrom::Start((page.id().page_no() * page_size()) as u64))?;
        file.write_all(&data)?;
        file.sync_all()?;
        basalt_debug_log!("[HeapFile::write_page] Wrote page {}", page.id());
        Ok(())
    }

    /// Adds `tuple` to the first page with a free slot, extending the file by
    /// one empty page when every existing page is full. Returns the pages the
    /// insert dirtied.
    ///
    /// Pages are probed under `ReadOnly` first so full pages are never
    /// write-locked; a page that looks promising is released and re-acquired
    /// `ReadWrite`, re-checking its free count under the stronger lock.
    pub fn insert_tuple(
        &self,
        tid: TransactionId,
        tuple: &mut Tuple,
        pool: &BufferPool,
    ) -> Result<Vec<PageHandle>, DbError> {
        if let Some(handle) = self.find_free_page(tid, pool)? {
            return Self::place(handle, tid, tuple);
        }

        // Every page was full. Take the extension lock and rescan: another
        // insert may have appended a page while this one was probing.
        let _extend = self.extend_lock.lock().unwrap();
        if let Some(handle) = self.find_free_page(tid, pool)? {
            return Self::place(handle, tid, tuple);
        }

        let new_page_no = self.num_pages()?;
        {
            let mut file = self.file.lock().unwrap();
            file.seek(SeekFrom::End(0))?;
            file.write_all(&HeapPage::empty_page_data())?;
        }
        basalt_debug_log!(
            "[HeapFile::insert_tuple] Extended table {} to page {}",
            self.id,
            new_page_no
        );

        // Still under the extension lock, so the fresh page reaches the pool
        // before any competing insert can allocate past it.
        let pid = PageId::new(self.id, new_page_no);
        let handle = pool.get_page(tid, pid, Permission::ReadWrite)?;
        Self::place(handle, tid, tuple)
    }

    fn find_free_page(
        &self,
        tid: TransactionId,
        pool: &BufferPool,
    ) -> Result<Option<PageHandle>, DbError> {
        for page_no in 0..self.num_pages()? {
            let pid = PageId::new(self.id, page_no);
            let handle = pool.get_page(tid, pid, Permission::ReadOnly)?;
            let free_slots = handle.read().unwrap().num_empty_slots();
            pool.unsafe_release_page(tid, pid);
            if free_slots == 0 {
                continue;
            }

            let handle = pool.get_page(tid, pid, Permission::ReadWrite)?;
            if handle.read().unwrap().num_empty_slots() > 0 {
                return Ok(Some(handle));
            }
            // Filled up between the probe and the write lock.
            pool.unsafe_release_page(tid, pid);
        }
        Ok(None)
    }

    fn place(
        handle: PageHandle,
        tid: TransactionId,
        tuple: &mut Tuple,
    ) -> Result<Vec<PageHandle>, DbError> {
        {
            let mut page = handle.write().unwrap();
            page.insert_tuple(tuple)?;
            page.mark_dirty(true, tid);
        }
        Ok(vec![handle])
    }

    /// Removes `tuple` from the page named by its record id. Returns the
    /// dirtied page.
    pub fn delete_tuple(
        &self,
        tid: TransactionId,
        tuple: &mut Tuple,
        pool: &BufferPool,
    ) -> Result<Vec<PageHandle>, DbError> {
        let rid = tuple.record_id().ok_or(DbError::NotFound)?;
        if rid.page_id().table_id() != self.id {
            return Err(DbError::NotFound);
        }

        let handle = pool.get_page(tid, rid.page_id(), Permission::ReadWrite)?;
        {
            let mut page = handle.write().unwrap();
            page.delete_tuple(tuple)?;
            page.mark_dirty(true, tid);
        }
        Ok(vec![handle])
    }

    /// A rewindable scan over every tuple in the file, walking pages in
    /// order and acquiring a `ReadOnly` lock per page through the pool.
    pub fn iterator<'a>(
        self: &Arc<Self>,
        tid: TransactionId,
        pool: &'a BufferPool,
    ) -> HeapFileIterator<'a> {
        HeapFileIterator {
            file: Arc::clone(self),
            pool,
            tid,
            opened: false,
            next_page: 0,
            buffered: VecDeque::new(),
        }
    }
}

fn table_id_for_path(path: &Path) -> u32 {
    let mut hasher = DefaultHasher::new();
    path.hash(&mut hasher);
    hasher.finish() as u32
}

/// The pull-iterator contract for file scans. `next` yields `Ok(None)` at
/// end of stream; failures distinct from exhaustion surface as errors.
pub trait DbFileIterator {
    fn open(&mut self) -> Result<(), DbError>;
    fn next(&mut self) -> Result<Option<Tuple>, DbError>;
    fn rewind(&mut self) -> Result<(), DbError>;
    fn close(&mut self);
}

pub struct HeapFileIterator<'a> {
    file: Arc<HeapFile>,
    pool: &'a BufferPool,
    tid: TransactionId,
    opened: bool,
    next_page: usize,
    buffered: VecDeque<Tuple>,
}

impl DbFileIterator for HeapFileIterator<'_> {
    fn open(&mut self) -> Result<(), DbError> {
        self.opened = true;
        self.next_page = 0;
        self.buffered.clear();
        Ok(())
    }

    fn next(&mut self) -> Result<Option<Tuple>, DbError> {
        if !self.opened {
            return Ok(None);
        }
        loop {
            if let Some(tuple) = self.buffered.pop_front() {
                return Ok(Some(tuple));
            }
            if self.next_page >= self.file.num_pages()? {
                return Ok(None);
            }
            let pid = PageId::new(self.file.id(), self.next_page);
            self.next_page += 1;
            let handle = self.pool.get_page(self.tid, pid, Permission::ReadOnly)?;
            let page = handle.read().unwrap();
            self.buffered.extend(page.iter().cloned());
        }
    }

    fn rewind(&mut self) -> Result<(), DbError> {
        self.open()
    }

    fn close(&mut self) {
        self.opened = false;
        self.buffered.clear();
    }
}
