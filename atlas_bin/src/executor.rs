//! The query executors.

mod dml;
mod filter;
mod scan;

pub use dml::{Delete, Insert};
pub use filter::{CmpOp, Filter, Predicate};
pub use scan::SeqScan;

use crate::errors::ExecutionError;
use basalt::tuple::{Tuple, TupleDesc};

/// A pull-based relational operator. `next` yields `Ok(None)` once the
/// stream is exhausted; `rewind` restarts it from the top.
pub trait Executor {
    fn tuple_desc(&self) -> &TupleDesc;
    fn open(&mut self) -> Result<(), ExecutionError>;
    fn next(&mut self) -> Result<Option<Tuple>, ExecutionError>;
    fn rewind(&mut self) -> Result<(), ExecutionError>;
    fn close(&mut self);
}
