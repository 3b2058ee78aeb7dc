//! Aggregation over a single column, optionally grouped by another.

use crate::errors::ExecutionError;
use crate::executor::Executor;
use basalt::errors::DbError;
use basalt::tuple::{Field, FieldType, Tuple, TupleDesc};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateOp {
    Min,
    Max,
    Sum,
    Avg,
    Count,
}

impl fmt::Display for AggregateOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AggregateOp::Min => "min",
            AggregateOp::Max => "max",
            AggregateOp::Sum => "sum",
            AggregateOp::Avg => "avg",
            AggregateOp::Count => "count",
        };
        write!(f, "{}", name)
    }
}

trait Aggregator {
    fn merge(&mut self, tuple: &Tuple) -> Result<(), ExecutionError>;
    fn results(&self, desc: &Arc<TupleDesc>) -> Vec<Tuple>;
}

/// Accumulates MIN/MAX/SUM/AVG/COUNT over an int column. Group keys live in
/// ordered maps so results come out in a stable group order.
struct IntegerAggregator {
    group_field: Option<usize>,
    agg_field: usize,
    op: AggregateOp,
    values: BTreeMap<Option<Field>, i64>,
    counts: BTreeMap<Option<Field>, i64>,
}

impl IntegerAggregator {
    fn new(group_field: Option<usize>, agg_field: usize, op: AggregateOp) -> Self {
        IntegerAggregator {
            group_field,
            agg_field,
            op,
            values: BTreeMap::new(),
            counts: BTreeMap::new(),
        }
    }

    fn group_keys(&self) -> Vec<Option<Field>> {
        match self.op {
            AggregateOp::Count => self.counts.keys().cloned().collect(),
            _ => self.values.keys().cloned().collect(),
        }
    }

    fn final_value(&self, key: &Option<Field>) -> i32 {
        match self.op {
            AggregateOp::Min | AggregateOp::Max | AggregateOp::Sum => self.values[key] as i32,
            AggregateOp::Avg => (self.values[key] / self.counts[key]) as i32,
            AggregateOp::Count => self.counts[key] as i32,
        }
    }
}

impl Aggregator for IntegerAggregator {
    fn merge(&mut self, tuple: &Tuple) -> Result<(), ExecutionError> {
        let key = self.group_field.and_then(|i| tuple.field(i).cloned());
        let value = match tuple.field(self.agg_field) {
            Some(Field::Int(v)) => *v as i64,
            _ => return Err(ExecutionError::Db(DbError::SchemaMismatch)),
        };
        match self.op {
            AggregateOp::Sum => *self.values.entry(key).or_insert(0) += value,
            AggregateOp::Avg => {
                *self.values.entry(key.clone()).or_insert(0) += value;
                *self.counts.entry(key).or_insert(0) += 1;
            }
            AggregateOp::Count => *self.counts.entry(key).or_insert(0) += 1,
            AggregateOp::Min => {
                self.values
                    .entry(key)
                    .and_modify(|m| *m = (*m).min(value))
                    .or_insert(value);
            }
            AggregateOp::Max => {
                self.values
                    .entry(key)
                    .and_modify(|m| *m = (*m).max(value))
                    .or_insert(value);
            }
        }
        Ok(())
    }

    fn results(&self, desc: &Arc<TupleDesc>) -> Vec<Tuple> {
        match self.group_field {
            None => {
                let key = None;
                let value = if self.group_keys().contains(&key) {
                    self.final_value(&key)
                } else if self.op == AggregateOp::Count {
                    0
                } else {
                    // MIN/MAX/SUM/AVG over no rows has no answer.
                    return Vec::new();
                };
                let mut tuple = Tuple::new(Arc::clone(desc));
                tuple.set_field(0, Field::Int(value));
                vec![tuple]
            }
            Some(_) => self
                .group_keys()
                .into_iter()
                .flatten()
                .map(|group| {
                    let value = self.final_value(&Some(group.clone()));
                    let mut tuple = Tuple::new(Arc::clone(desc));
                    tuple.set_field(0, group);
                    tuple.set_field(1, Field::Int(value));
                    tuple
                })
                .collect(),
        }
    }
}

/// String columns only support COUNT.
struct StringAggregator {
    group_field: Option<usize>,
    agg_field: usize,
    counts: BTreeMap<Option<Field>, i64>,
}

impl StringAggregator {
    fn new(group_field: Option<usize>, agg_field: usize) -> Self {
        StringAggregator {
            group_field,
            agg_field,
            counts: BTreeMap::new(),
        }
    }
}

impl Aggregator for StringAggregator {
    fn merge(&mut self, tuple: &Tuple) -> Result<(), ExecutionError> {
        if !matches!(tuple.field(self.agg_field), Some(Field::Str(_))) {
            return Err(ExecutionError::Db(DbError::SchemaMismatch));
        }
        let key = self.group_field.and_then(|i| tuple.field(i).cloned());
        *self.counts.entry(key).or_insert(0) += 1;
        Ok(())
    }

    fn results(&self, desc: &Arc<TupleDesc>) -> Vec<Tuple> {
        match self.group_field {
            None => {
                let count = self.counts.get(&None).copied().unwrap_or(0);
                let mut tuple = Tuple::new(Arc::clone(desc));
                tuple.set_field(0, Field::Int(count as i32));
                vec![tuple]
            }
            Some(_) => self
                .counts
                .iter()
                .filter_map(|(key, count)| key.clone().map(|group| (group, *count)))
                .map(|(group, count)| {
                    let mut tuple = Tuple::new(Arc::clone(desc));
                    tuple.set_field(0, group);
                    tuple.set_field(1, Field::Int(count as i32));
                    tuple
                })
                .collect(),
        }
    }
}

/// Computes one aggregate over its child, materializing the groups at open
/// time and then iterating the results. Output is `(group, value)` when
/// grouped, a single `(value)` otherwise.
pub struct Aggregate<'a> {
    child: Box<dyn Executor + 'a>,
    agg_field: usize,
    group_field: Option<usize>,
    op: AggregateOp,
    desc: Arc<TupleDesc>,
    results: Vec<Tuple>,
    cursor: usize,
}

impl<'a> Aggregate<'a> {
    pub fn new(
        child: Box<dyn Executor + 'a>,
        agg_field: usize,
        group_field: Option<usize>,
        op: AggregateOp,
    ) -> Result<Self, ExecutionError> {
        let child_desc = child.tuple_desc();
        let agg_type = child_desc.field_type(agg_field);
        if agg_type == FieldType::Str && op != AggregateOp::Count {
            return Err(ExecutionError::GenericError(
                "string columns only support count".to_string(),
            ));
        }

        let agg_name = format!(
            "{}({})",
            op,
            child_desc.field_name(agg_field).unwrap_or("")
        );
        let desc = match group_field {
            None => TupleDesc::new(vec![FieldType::Int], vec![Some(agg_name)]),
            Some(group) => TupleDesc::new(
                vec![child_desc.field_type(group), FieldType::Int],
                vec![
                    child_desc.field_name(group).map(str::to_string),
                    Some(agg_name),
                ],
            ),
        };

        Ok(Aggregate {
            child,
            agg_field,
            group_field,
            op,
            desc: Arc::new(desc),
            results: Vec::new(),
            cursor: 0,
        })
    }

    fn build_aggregator(&self) -> Box<dyn Aggregator> {
        match self.child.tuple_desc().field_type(self.agg_field) {
            FieldType::Int => Box::new(IntegerAggregator::new(
                self.group_field,
                self.agg_field,
                self.op,
            )),
            FieldType::Str => Box::new(StringAggregator::new(self.group_field, self.agg_field)),
        }
    }
}

impl Executor for Aggregate<'_> {
    fn tuple_desc(&self) -> &TupleDesc {
        &self.desc
    }

    fn open(&mut self) -> Result<(), ExecutionError> {
        self.child.open()?;
        let mut aggregator = self.build_aggregator();
        while let Some(tuple) = self.child.next()? {
            aggregator.merge(&tuple)?;
        }
        self.results = aggregator.results(&self.desc);
        self.cursor = 0;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<Tuple>, ExecutionError> {
        match self.results.get(self.cursor) {
            Some(tuple) => {
                self.cursor += 1;
                Ok(Some(tuple.clone()))
            }
            None => Ok(None),
        }
    }

    fn rewind(&mut self) -> Result<(), ExecutionError> {
        self.cursor = 0;
        Ok(())
    }

    fn close(&mut self) {
        self.child.close();
        self.results.clear();
        self.cursor = 0;
    }
}
