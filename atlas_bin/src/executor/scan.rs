use super::Executor;
use crate::errors::ExecutionError;
use basalt::buffer_pool::BufferPool;
use basalt::heap_file::{DbFileIterator, HeapFileIterator};
use basalt::transaction::TransactionId;
use basalt::tuple::{Tuple, TupleDesc};

/// A sequential scan over one table, yielding tuples in page/slot order.
/// Column names in the exposed descriptor are prefixed with the table alias,
/// so downstream operators can tell same-named columns apart.
pub struct SeqScan<'a> {
    pool: &'a BufferPool,
    tid: TransactionId,
    table_id: u32,
    desc: TupleDesc,
    iter: Option<HeapFileIterator<'a>>,
}

impl<'a> SeqScan<'a> {
    pub fn new(
        pool: &'a BufferPool,
        tid: TransactionId,
        table_id: u32,
        alias: &str,
    ) -> Result<Self, ExecutionError> {
        let table_desc = pool.catalog().tuple_desc(table_id)?;
        let mut types = Vec::with_capacity(table_desc.num_fields());
        let mut names = Vec::with_capacity(table_desc.num_fields());
        for i in 0..table_desc.num_fields() {
            types.push(table_desc.field_type(i));
            names.push(
                table_desc
                    .field_name(i)
                    .map(|name| format!("{}.{}", alias, name)),
            );
        }
        Ok(SeqScan {
            pool,
            tid,
            table_id,
            desc: TupleDesc::new(types, names),
            iter: None,
        })
    }
}

impl Executor for SeqScan<'_> {
    fn tuple_desc(&self) -> &TupleDesc {
        &self.desc
    }

    fn open(&mut self) -> Result<(), ExecutionError> {
        let file = self.pool.catalog().database_file(self.table_id)?;
        let mut iter = file.iterator(self.tid, self.pool);
        iter.open()?;
        self.iter = Some(iter);
        Ok(())
    }

    fn next(&mut self) -> Result<Option<Tuple>, ExecutionError> {
        match self.iter.as_mut() {
            Some(iter) => Ok(iter.next()?),
            None => Ok(None),
        }
    }

    fn rewind(&mut self) -> Result<(), ExecutionError> {
        match self.iter.as_mut() {
            Some(iter) => {
                iter.rewind()?;
                Ok(())
            }
            None => self.open(),
        }
    }

    fn close(&mut self) {
        if let Some(mut iter) = self.iter.take() {
            iter.close();
        }
    }
}
