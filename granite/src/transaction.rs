use std::sync::atomic::{AtomicU64, Ordering};

/// A unique identifier for a transaction. Ids are never reused within a
/// process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionId(pub u64);

/// Vends transaction ids.
///
/// A transaction begins when an id is vended and ends when the buffer pool
/// completes it with a commit or an abort; there is no other per-transaction
/// state to manage here.
#[derive(Debug, Default)]
pub struct TransactionManager {
    next_transaction_id: AtomicU64,
}

impl TransactionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&self) -> TransactionId {
        TransactionId(self.next_transaction_id.fetch_add(1, Ordering::SeqCst))
    }
}
