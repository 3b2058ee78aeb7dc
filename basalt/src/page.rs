use crate::errors::DbError;
use crate::page_size;
use crate::transaction::TransactionId;
use crate::tuple::{RecordId, Tuple, TupleDesc};
use std::fmt;
use std::io;
use std::sync::Arc;

/// A unique identifier for a page: which table, which page within its file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageId {
    table_id: u32,
    page_no: usize,
}

impl PageId {
    pub fn new(table_id: u32, page_no: usize) -> Self {
        PageId { table_id, page_no }
    }

    pub fn table_id(&self) -> u32 {
        self.table_id
    }

    pub fn page_no(&self) -> usize {
        self.page_no
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.table_id, self.page_no)
    }
}

/// A slotted heap page. The on-disk image is a header bitmap of
/// `ceil(N/8)` bytes followed by `N` fixed-size tuple slots, where
/// `N = floor(page_size * 8 / (tuple_size * 8 + 1))`. Within each header
/// byte the most significant bit covers the lowest slot index.
///
/// Unused slots hold zero bytes on disk, so serializing a parsed page
/// reproduces the original image byte for byte.
#[derive(Debug, Clone)]
pub struct HeapPage {
    pid: PageId,
    desc: Arc<TupleDesc>,
    header: Vec<u8>,
    slots: Vec<Option<Tuple>>,
    dirty: Option<TransactionId>,
}

impl HeapPage {
    /// Parses a page image of exactly [`page_size()`] bytes.
    pub fn new(pid: PageId, data: &[u8], desc: Arc<TupleDesc>) -> Result<Self, DbError> {
        if data.len() != page_size() {
            return Err(DbError::Io(io::Error::new(
                io::ErrorKind::InvalidData,
                "page image has the wrong length",
            )));
        }

        let num_slots = Self::slots_per_page(&desc);
        let header_len = Self::header_len(num_slots);
        let header = data[..header_len].to_vec();
        let tuple_size = desc.tuple_size();

        let mut page = HeapPage {
            pid,
            desc,
            header,
            slots: Vec::with_capacity(num_slots),
            dirty: None,
        };
        for i in 0..num_slots {
            if page.is_slot_used(i) {
                let start = header_len + i * tuple_size;
                let mut slice = &data[start..start + tuple_size];
                let mut tuple = Tuple::parse(&page.desc, &mut slice)?;
                tuple.set_record_id(Some(RecordId::new(pid, i)));
                page.slots.push(Some(tuple));
            } else {
                page.slots.push(None);
            }
        }
        Ok(page)
    }

    /// The number of tuple slots a page of the current page size holds for
    /// the given schema.
    pub fn slots_per_page(desc: &TupleDesc) -> usize {
        (page_size() * 8) / (desc.tuple_size() * 8 + 1)
    }

    fn header_len(num_slots: usize) -> usize {
        (num_slots + 7) / 8
    }

    /// An all-zero page image: every slot free, every slot zeroed.
    pub fn empty_page_data() -> Vec<u8> {
        vec![0; page_size()]
    }

    pub fn id(&self) -> PageId {
        self.pid
    }

    pub fn tuple_desc(&self) -> &Arc<TupleDesc> {
        &self.desc
    }

    /// Serializes to exactly [`page_size()`] bytes.
    pub fn page_data(&self) -> Vec<u8> {
        let mut data = vec![0u8; page_size()];
        data[..self.header.len()].copy_from_slice(&self.header);
        let tuple_size = self.desc.tuple_size();
        for (i, slot) in self.slots.iter().enumerate() {
            if let Some(tuple) = slot {
                let start = self.header.len() + i * tuple_size;
                let mut out = &mut data[start..start + tuple_size];
                tuple.serialize(&mut out);
            }
        }
        data
    }

    pub fn num_slots(&self) -> usize {
        self.slots.len()
    }

    pub fn num_empty_slots(&self) -> usize {
        (0..self.slots.len()).filter(|&i| !self.is_slot_used(i)).count()
    }

    pub fn is_slot_used(&self, slot: usize) -> bool {
        self.header[slot / 8] & (0x80 >> (slot % 8)) != 0
    }

    pub fn mark_slot_used(&mut self, slot: usize, used: bool) {
        if used {
            self.header[slot / 8] |= 0x80 >> (slot % 8);
        } else {
            self.header[slot / 8] &= !(0x80 >> (slot % 8));
        }
    }

    /// Places `tuple` in the lowest free slot, stamping its record id.
    pub fn insert_tuple(&mut self, tuple: &mut Tuple) -> Result<usize, DbError> {
        if tuple.tuple_desc().as_ref() != self.desc.as_ref() {
            return Err(DbError::SchemaMismatch);
        }
        let slot = (0..self.slots.len())
            .find(|&i| !self.is_slot_used(i))
            .ok_or(DbError::PageFull)?;
        tuple.set_record_id(Some(RecordId::new(self.pid, slot)));
        self.mark_slot_used(slot, true);
        self.slots[slot] = Some(tuple.clone());
        Ok(slot)
    }

    /// Clears the slot named by the tuple's record id and the record id
    /// itself.
    pub fn delete_tuple(&mut self, tuple: &mut Tuple) -> Result<(), DbError> {
        let rid = tuple.record_id().ok_or(DbError::NotFound)?;
        if rid.page_id() != self.pid || rid.slot() >= self.slots.len() || !self.is_slot_used(rid.slot()) {
            return Err(DbError::NotFound);
        }
        self.mark_slot_used(rid.slot(), false);
        self.slots[rid.slot()] = None;
        tuple.set_record_id(None);
        Ok(())
    }

    /// Occupied slots in ascending slot order.
    pub fn iter(&self) -> impl Iterator<Item = &Tuple> {
        self.slots.iter().flatten()
    }

    pub fn mark_dirty(&mut self, dirty: bool, tid: TransactionId) {
        self.dirty = if dirty { Some(tid) } else { None };
    }

    /// The transaction that dirtied this page, or `None` if it is clean.
    pub fn is_dirty(&self) -> Option<TransactionId> {
        self.dirty
    }
}
