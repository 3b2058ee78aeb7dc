use super::Executor;
use crate::atlas_debug_log;
use crate::errors::ExecutionError;
use basalt::buffer_pool::BufferPool;
use basalt::errors::DbError;
use basalt::transaction::TransactionId;
use basalt::tuple::{Field, FieldType, Tuple, TupleDesc};
use std::sync::Arc;

fn count_desc(column: &str) -> Arc<TupleDesc> {
    Arc::new(TupleDesc::new(
        vec![FieldType::Int],
        vec![Some(column.to_string())],
    ))
}

fn count_tuple(desc: &Arc<TupleDesc>, count: i32) -> Tuple {
    let mut tuple = Tuple::new(Arc::clone(desc));
    tuple.set_field(0, Field::Int(count));
    tuple
}

/// Drains its child into a table through the buffer pool. Yields exactly one
/// tuple holding the number of inserted rows, then `None` until rewound.
pub struct Insert<'a> {
    pool: &'a BufferPool,
    tid: TransactionId,
    table_id: u32,
    child: Box<dyn Executor + 'a>,
    desc: Arc<TupleDesc>,
    done: bool,
}

impl<'a> Insert<'a> {
    /// Fails with a schema mismatch when the child's descriptor differs from
    /// the table's.
    pub fn new(
        pool: &'a BufferPool,
        tid: TransactionId,
        table_id: u32,
        child: Box<dyn Executor + 'a>,
    ) -> Result<Self, ExecutionError> {
        let table_desc = pool.catalog().tuple_desc(table_id)?;
        if child.tuple_desc() != table_desc.as_ref() {
            return Err(ExecutionError::Db(DbError::SchemaMismatch));
        }
        Ok(Insert {
            pool,
            tid,
            table_id,
            child,
            desc: count_desc("inserted_rows"),
            done: false,
        })
    }
}

impl Executor for Insert<'_> {
    fn tuple_desc(&self) -> &TupleDesc {
        &self.desc
    }

    fn open(&mut self) -> Result<(), ExecutionError> {
        self.child.open()
    }

    fn next(&mut self) -> Result<Option<Tuple>, ExecutionError> {
        if self.done {
            return Ok(None);
        }
        self.done = true;

        let mut count = 0;
        while let Some(mut tuple) = self.child.next()? {
            self.pool.insert_tuple(self.tid, self.table_id, &mut tuple)?;
            count += 1;
        }
        atlas_debug_log!(
            "[Insert::next] tx {} inserted {} tuples into table {}",
            self.tid,
            count,
            self.table_id
        );
        Ok(Some(count_tuple(&self.desc, count)))
    }

    fn rewind(&mut self) -> Result<(), ExecutionError> {
        self.child.rewind()?;
        self.done = false;
        Ok(())
    }

    fn close(&mut self) {
        self.child.close();
    }
}

/// Deletes every tuple its child yields, routing through the buffer pool so
/// the affected pages are locked and dirtied. Yields one count tuple.
pub struct Delete<'a> {
    pool: &'a BufferPool,
    tid: TransactionId,
    child: Box<dyn Executor + 'a>,
    desc: Arc<TupleDesc>,
    done: bool,
}

impl<'a> Delete<'a> {
    pub fn new(pool: &'a BufferPool, tid: TransactionId, child: Box<dyn Executor + 'a>) -> Self {
        Delete {
            pool,
            tid,
            child,
            desc: count_desc("deleted_rows"),
            done: false,
        }
    }
}

impl Executor for Delete<'_> {
    fn tuple_desc(&self) -> &TupleDesc {
        &self.desc
    }

    fn open(&mut self) -> Result<(), ExecutionError> {
        self.child.open()
    }

    fn next(&mut self) -> Result<Option<Tuple>, ExecutionError> {
        if self.done {
            return Ok(None);
        }
        self.done = true;

        let mut count = 0;
        while let Some(mut tuple) = self.child.next()? {
            self.pool.delete_tuple(self.tid, &mut tuple)?;
            count += 1;
        }
        atlas_debug_log!("[Delete::next] tx {} deleted {} tuples", self.tid, count);
        Ok(Some(count_tuple(&self.desc, count)))
    }

    fn rewind(&mut self) -> Result<(), ExecutionError> {
        self.child.rewind()?;
        self.done = false;
        Ok(())
    }

    fn close(&mut self) {
        self.child.close();
    }
}
