use crate::errors::DbError;
use crate::tuple::{Tuple, TupleDesc};

/// A stream of tuples with an open-before-iterate, close-after discipline.
///
/// `next` returning `Ok(None)` means the stream is exhausted; `rewind`
/// restarts it. An `Err(DbError::TransactionAborted)` from any method is
/// non-resumable and must be propagated to whoever owns the transaction,
/// never swallowed.
pub trait Cursor {
    fn open(&mut self) -> Result<(), DbError>;
    fn next(&mut self) -> Result<Option<Tuple>, DbError>;
    fn rewind(&mut self) -> Result<(), DbError>;
    fn close(&mut self);
    fn tuple_desc(&self) -> &TupleDesc;
}
