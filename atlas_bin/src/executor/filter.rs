use super::Executor;
use crate::errors::ExecutionError;
use basalt::tuple::{Field, Tuple, TupleDesc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Equals,
    GreaterThan,
    LessThan,
    LessThanOrEq,
    GreaterThanOrEq,
    NotEquals,
}

/// Compares one column of a tuple against a constant operand.
#[derive(Debug, Clone)]
pub struct Predicate {
    field: usize,
    op: CmpOp,
    operand: Field,
}

impl Predicate {
    pub fn new(field: usize, op: CmpOp, operand: Field) -> Self {
        Predicate { field, op, operand }
    }

    /// True if the tuple passes. A tuple whose tested field is unset never
    /// passes.
    pub fn matches(&self, tuple: &Tuple) -> bool {
        let Some(value) = tuple.field(self.field) else {
            return false;
        };
        match self.op {
            CmpOp::Equals => value == &self.operand,
            CmpOp::GreaterThan => value > &self.operand,
            CmpOp::LessThan => value < &self.operand,
            CmpOp::LessThanOrEq => value <= &self.operand,
            CmpOp::GreaterThanOrEq => value >= &self.operand,
            CmpOp::NotEquals => value != &self.operand,
        }
    }
}

/// Passes through the child's tuples that satisfy the predicate.
pub struct Filter<'a> {
    predicate: Predicate,
    child: Box<dyn Executor + 'a>,
}

impl<'a> Filter<'a> {
    pub fn new(predicate: Predicate, child: Box<dyn Executor + 'a>) -> Self {
        Filter { predicate, child }
    }
}

impl Executor for Filter<'_> {
    fn tuple_desc(&self) -> &TupleDesc {
        self.child.tuple_desc()
    }

    fn open(&mut self) -> Result<(), ExecutionError> {
        self.child.open()
    }

    fn next(&mut self) -> Result<Option<Tuple>, ExecutionError> {
        while let Some(tuple) = self.child.next()? {
            if self.predicate.matches(&tuple) {
                return Ok(Some(tuple));
            }
        }
        Ok(None)
    }

    fn rewind(&mut self) -> Result<(), ExecutionError> {
        self.child.rewind()
    }

    fn close(&mut self) {
        self.child.close();
    }
}
