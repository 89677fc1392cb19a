//! The operator set: sequential scan, filter, hash equijoin, aggregate,
//! insert and delete.
//!
//! Operators are cursors over cursors. They follow the open-before-iterate,
//! close-after discipline and never swallow `TransactionAborted`; whoever
//! drives the plan owns the transaction and reacts to the abort.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::io;
use std::sync::Arc;

use granite::buffer_pool::BufferPool;
use granite::cursor::Cursor;
use granite::database::Database;
use granite::errors::DbError;
use granite::heap_file::HeapCursor;
use granite::transaction::TransactionId;
use granite::tuple::{Field, FieldType, Op, Tuple, TupleDesc};

/// A comparison of one tuple field against a constant.
#[derive(Debug, Clone)]
pub struct Predicate {
    field: usize,
    op: Op,
    operand: Field,
}

impl Predicate {
    pub fn new(field: usize, op: Op, operand: Field) -> Self {
        Self { field, op, operand }
    }

    pub fn matches(&self, t: &Tuple) -> bool {
        t.field(self.field).compare(self.op, &self.operand)
    }
}

/// Scans every tuple of a table in page order.
pub struct SeqScan {
    inner: HeapCursor,
    desc: Arc<TupleDesc>,
}

impl SeqScan {
    pub fn new(db: &Database, tx: TransactionId, table_id: u32) -> Result<Self, DbError> {
        let file = db.catalog().file(table_id)?;
        let desc = file.desc().clone();
        Ok(Self {
            inner: file.cursor(db.buffer_pool().clone(), tx),
            desc,
        })
    }
}

impl Cursor for SeqScan {
    fn open(&mut self) -> Result<(), DbError> {
        self.inner.open()
    }

    fn next(&mut self) -> Result<Option<Tuple>, DbError> {
        self.inner.next()
    }

    fn rewind(&mut self) -> Result<(), DbError> {
        self.inner.rewind()
    }

    fn close(&mut self) {
        self.inner.close()
    }

    fn tuple_desc(&self) -> &TupleDesc {
        &self.desc
    }
}

/// Passes through the child's tuples that satisfy a predicate.
pub struct Filter<C: Cursor> {
    predicate: Predicate,
    child: C,
}

impl<C: Cursor> Filter<C> {
    pub fn new(predicate: Predicate, child: C) -> Self {
        Self { predicate, child }
    }
}

impl<C: Cursor> Cursor for Filter<C> {
    fn open(&mut self) -> Result<(), DbError> {
        self.child.open()
    }

    fn next(&mut self) -> Result<Option<Tuple>, DbError> {
        while let Some(t) = self.child.next()? {
            if self.predicate.matches(&t) {
                return Ok(Some(t));
            }
        }
        Ok(None)
    }

    fn rewind(&mut self) -> Result<(), DbError> {
        self.child.rewind()
    }

    fn close(&mut self) {
        self.child.close()
    }

    fn tuple_desc(&self) -> &TupleDesc {
        self.child.tuple_desc()
    }
}

/// An equijoin of two children. On open the right child is drained into a
/// hash table keyed on its join column; every left tuple is then matched by
/// lookup and emitted as the concatenation of the two sides, so the join
/// column appears twice in the output.
pub struct HashJoin<L: Cursor, R: Cursor> {
    left: L,
    right: R,
    left_field: usize,
    right_field: usize,
    desc: Arc<TupleDesc>,
    joined: std::vec::IntoIter<Tuple>,
}

impl<L: Cursor, R: Cursor> HashJoin<L, R> {
    pub fn new(left: L, right: R, left_field: usize, right_field: usize) -> Self {
        let desc = Arc::new(TupleDesc::merge(left.tuple_desc(), right.tuple_desc()));
        Self {
            left,
            right,
            left_field,
            right_field,
            desc,
            joined: Vec::new().into_iter(),
        }
    }
}

impl<L: Cursor, R: Cursor> Cursor for HashJoin<L, R> {
    fn open(&mut self) -> Result<(), DbError> {
        self.left.open()?;
        self.right.open()?;

        let mut table: HashMap<Field, Vec<Tuple>> = HashMap::new();
        while let Some(t) = self.right.next()? {
            table
                .entry(t.field(self.right_field).clone())
                .or_default()
                .push(t);
        }

        let mut joined = Vec::new();
        while let Some(left_tuple) = self.left.next()? {
            let Some(matches) = table.get(left_tuple.field(self.left_field)) else {
                continue;
            };
            for right_tuple in matches {
                let mut fields = left_tuple.fields().to_vec();
                fields.extend(right_tuple.fields().iter().cloned());
                joined.push(Tuple::new(self.desc.clone(), fields));
            }
        }
        self.joined = joined.into_iter();
        Ok(())
    }

    fn next(&mut self) -> Result<Option<Tuple>, DbError> {
        Ok(self.joined.next())
    }

    fn rewind(&mut self) -> Result<(), DbError> {
        self.open()
    }

    fn close(&mut self) {
        self.joined = Vec::new().into_iter();
        self.right.close();
        self.left.close();
    }

    fn tuple_desc(&self) -> &TupleDesc {
        &self.desc
    }
}

/// The aggregates a column can be folded with. Strings support `Count`
/// only; the rest read integer columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggregateOp {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

fn aggregate_desc(group_type: Option<FieldType>) -> Arc<TupleDesc> {
    let mut columns = Vec::new();
    if let Some(ftype) = group_type {
        columns.push((ftype, Some("group".to_string())));
    }
    columns.push((FieldType::Int, Some("aggregate".to_string())));
    Arc::new(TupleDesc::new(columns))
}

fn result_tuple(desc: &Arc<TupleDesc>, key: Option<Field>, value: i32) -> Tuple {
    let mut fields = Vec::new();
    if let Some(group) = key {
        fields.push(group);
    }
    fields.push(Field::Int(value));
    Tuple::new(desc.clone(), fields)
}

/// A running aggregate over an integer column, optionally grouped by
/// another column. Sums accumulate in 64 bits; results are emitted as
/// 32-bit values.
pub struct IntAggregator {
    field: usize,
    group_by: Option<usize>,
    op: AggregateOp,
    desc: Arc<TupleDesc>,
    totals: HashMap<Option<Field>, i64>,
    counts: HashMap<Option<Field>, i64>,
}

impl IntAggregator {
    /// `group_by` carries the grouping column's index and type; `None`
    /// folds the whole input into one group.
    pub fn new(field: usize, group_by: Option<(usize, FieldType)>, op: AggregateOp) -> Self {
        Self {
            field,
            group_by: group_by.map(|(i, _)| i),
            op,
            desc: aggregate_desc(group_by.map(|(_, ftype)| ftype)),
            totals: HashMap::new(),
            counts: HashMap::new(),
        }
    }

    pub fn desc(&self) -> &Arc<TupleDesc> {
        &self.desc
    }

    /// Folds one tuple into its group.
    pub fn merge(&mut self, t: &Tuple) {
        let Field::Int(v) = *t.field(self.field) else {
            return;
        };
        let v = v as i64;
        let key = self.group_by.map(|i| t.field(i).clone());
        match self.totals.entry(key.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(match self.op {
                    AggregateOp::Count => 1,
                    _ => v,
                });
            }
            Entry::Occupied(mut slot) => {
                let old = *slot.get();
                slot.insert(match self.op {
                    AggregateOp::Count => old + 1,
                    AggregateOp::Sum | AggregateOp::Avg => old + v,
                    AggregateOp::Min => old.min(v),
                    AggregateOp::Max => old.max(v),
                });
            }
        }
        if self.op == AggregateOp::Avg {
            *self.counts.entry(key).or_insert(0) += 1;
        }
    }

    /// One result tuple per group: `(group, aggregate)`, or just the
    /// aggregate when ungrouped. Averages are integer-divided, like the
    /// sums and counts they come from.
    pub fn results(&self) -> Vec<Tuple> {
        self.totals
            .iter()
            .map(|(key, &total)| {
                let value = match self.op {
                    AggregateOp::Avg => total / self.counts[key],
                    _ => total,
                };
                result_tuple(&self.desc, key.clone(), value as i32)
            })
            .collect()
    }
}

/// Occurrence counts over a string column, optionally grouped. Counting is
/// the only aggregate defined for strings.
pub struct StringAggregator {
    group_by: Option<usize>,
    desc: Arc<TupleDesc>,
    counts: HashMap<Option<Field>, i64>,
}

impl StringAggregator {
    pub fn new(group_by: Option<(usize, FieldType)>) -> Self {
        Self {
            group_by: group_by.map(|(i, _)| i),
            desc: aggregate_desc(group_by.map(|(_, ftype)| ftype)),
            counts: HashMap::new(),
        }
    }

    pub fn desc(&self) -> &Arc<TupleDesc> {
        &self.desc
    }

    pub fn merge(&mut self, t: &Tuple) {
        let key = self.group_by.map(|i| t.field(i).clone());
        *self.counts.entry(key).or_insert(0) += 1;
    }

    pub fn results(&self) -> Vec<Tuple> {
        self.counts
            .iter()
            .map(|(key, &count)| result_tuple(&self.desc, key.clone(), count as i32))
            .collect()
    }
}

enum AggregatorState {
    Int(IntAggregator),
    Str(StringAggregator),
}

/// Folds the child into per-group aggregate values on open, then yields
/// one tuple per group.
pub struct Aggregate<C: Cursor> {
    child: C,
    field: usize,
    group_by: Option<usize>,
    op: AggregateOp,
    desc: Arc<TupleDesc>,
    results: std::vec::IntoIter<Tuple>,
}

impl<C: Cursor> Aggregate<C> {
    /// Aggregates the child's column `field` with `op`, grouped by the
    /// optional `group_by` column. A non-count aggregate over a string
    /// column is rejected up front.
    pub fn new(
        child: C,
        field: usize,
        group_by: Option<usize>,
        op: AggregateOp,
    ) -> Result<Self, DbError> {
        let child_desc = child.tuple_desc();
        if matches!(child_desc.field_type(field), FieldType::Str(_)) && op != AggregateOp::Count {
            return Err(DbError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                "only count is defined over string columns",
            )));
        }
        let desc = aggregate_desc(group_by.map(|i| child_desc.field_type(i)));
        Ok(Self {
            child,
            field,
            group_by,
            op,
            desc,
            results: Vec::new().into_iter(),
        })
    }
}

impl<C: Cursor> Cursor for Aggregate<C> {
    fn open(&mut self) -> Result<(), DbError> {
        self.child.open()?;
        let group = self
            .group_by
            .map(|i| (i, self.child.tuple_desc().field_type(i)));
        let mut state = match self.child.tuple_desc().field_type(self.field) {
            FieldType::Int => AggregatorState::Int(IntAggregator::new(self.field, group, self.op)),
            FieldType::Str(_) => AggregatorState::Str(StringAggregator::new(group)),
        };
        while let Some(t) = self.child.next()? {
            match &mut state {
                AggregatorState::Int(agg) => agg.merge(&t),
                AggregatorState::Str(agg) => agg.merge(&t),
            }
        }
        self.results = match &state {
            AggregatorState::Int(agg) => agg.results(),
            AggregatorState::Str(agg) => agg.results(),
        }
        .into_iter();
        Ok(())
    }

    fn next(&mut self) -> Result<Option<Tuple>, DbError> {
        Ok(self.results.next())
    }

    fn rewind(&mut self) -> Result<(), DbError> {
        self.open()
    }

    fn close(&mut self) {
        self.results = Vec::new().into_iter();
        self.child.close();
    }

    fn tuple_desc(&self) -> &TupleDesc {
        &self.desc
    }
}

fn count_desc() -> Arc<TupleDesc> {
    Arc::new(TupleDesc::new(vec![(
        FieldType::Int,
        Some("count".to_string()),
    )]))
}

/// Drains the child into a table and yields a single tuple holding the
/// number of tuples inserted.
pub struct Insert<C: Cursor> {
    pool: Arc<BufferPool>,
    tx: TransactionId,
    table_id: u32,
    child: C,
    desc: Arc<TupleDesc>,
    done: bool,
}

impl<C: Cursor> Insert<C> {
    pub fn new(db: &Database, tx: TransactionId, table_id: u32, child: C) -> Self {
        Self {
            pool: db.buffer_pool().clone(),
            tx,
            table_id,
            child,
            desc: count_desc(),
            done: false,
        }
    }
}

impl<C: Cursor> Cursor for Insert<C> {
    fn open(&mut self) -> Result<(), DbError> {
        self.done = false;
        self.child.open()
    }

    fn next(&mut self) -> Result<Option<Tuple>, DbError> {
        if self.done {
            return Ok(None);
        }
        let mut count = 0;
        while let Some(mut t) = self.child.next()? {
            self.pool.insert_tuple(self.tx, self.table_id, &mut t)?;
            count += 1;
        }
        self.done = true;
        Ok(Some(Tuple::new(self.desc.clone(), vec![Field::Int(count)])))
    }

    fn rewind(&mut self) -> Result<(), DbError> {
        self.done = false;
        self.child.rewind()
    }

    fn close(&mut self) {
        self.child.close()
    }

    fn tuple_desc(&self) -> &TupleDesc {
        &self.desc
    }
}

/// Drains the child, deleting each tuple from the table its record id
/// names, and yields a single tuple holding the deletion count.
pub struct Delete<C: Cursor> {
    pool: Arc<BufferPool>,
    tx: TransactionId,
    child: C,
    desc: Arc<TupleDesc>,
    done: bool,
}

impl<C: Cursor> Delete<C> {
    pub fn new(db: &Database, tx: TransactionId, child: C) -> Self {
        Self {
            pool: db.buffer_pool().clone(),
            tx,
            child,
            desc: count_desc(),
            done: false,
        }
    }
}

impl<C: Cursor> Cursor for Delete<C> {
    fn open(&mut self) -> Result<(), DbError> {
        self.done = false;
        self.child.open()
    }

    fn next(&mut self) -> Result<Option<Tuple>, DbError> {
        if self.done {
            return Ok(None);
        }
        let mut count = 0;
        while let Some(t) = self.child.next()? {
            self.pool.delete_tuple(self.tx, &t)?;
            count += 1;
        }
        self.done = true;
        Ok(Some(Tuple::new(self.desc.clone(), vec![Field::Int(count)])))
    }

    fn rewind(&mut self) -> Result<(), DbError> {
        self.done = false;
        self.child.rewind()
    }

    fn close(&mut self) {
        self.child.close()
    }

    fn tuple_desc(&self) -> &TupleDesc {
        &self.desc
    }
}

/// A cursor over an in-memory batch of tuples. Feeds `Insert` and makes
/// operator pipelines testable without a backing table.
pub struct MemoryCursor {
    desc: Arc<TupleDesc>,
    tuples: Vec<Tuple>,
    position: usize,
    open: bool,
}

impl MemoryCursor {
    pub fn new(desc: Arc<TupleDesc>, tuples: Vec<Tuple>) -> Self {
        Self {
            desc,
            tuples,
            position: 0,
            open: false,
        }
    }
}

impl Cursor for MemoryCursor {
    fn open(&mut self) -> Result<(), DbError> {
        self.open = true;
        self.position = 0;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<Tuple>, DbError> {
        if !self.open || self.position >= self.tuples.len() {
            return Ok(None);
        }
        self.position += 1;
        Ok(Some(self.tuples[self.position - 1].clone()))
    }

    fn rewind(&mut self) -> Result<(), DbError> {
        self.position = 0;
        Ok(())
    }

    fn close(&mut self) {
        self.open = false;
    }

    fn tuple_desc(&self) -> &TupleDesc {
        &self.desc
    }
}
