//! The context object tying the engine together.
//!
//! There are no process-wide singletons here: a `Database` owns the catalog,
//! the buffer pool and the transaction-id source, and is passed explicitly
//! to whatever needs them. The only global in the crate is the page size.

use std::sync::Arc;

use crate::buffer_pool::{BufferPool, DEFAULT_POOL_PAGES};
use crate::catalog::Catalog;
use crate::transaction::{TransactionId, TransactionManager};

pub struct Database {
    catalog: Arc<Catalog>,
    buffer_pool: Arc<BufferPool>,
    transactions: TransactionManager,
}

impl Database {
    pub fn new() -> Self {
        Self::with_pool_capacity(DEFAULT_POOL_PAGES)
    }

    pub fn with_pool_capacity(capacity: usize) -> Self {
        let catalog = Arc::new(Catalog::new());
        let buffer_pool = Arc::new(BufferPool::with_capacity(catalog.clone(), capacity));
        Self {
            catalog,
            buffer_pool,
            transactions: TransactionManager::new(),
        }
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn buffer_pool(&self) -> &Arc<BufferPool> {
        &self.buffer_pool
    }

    pub fn begin_transaction(&self) -> TransactionId {
        self.transactions.begin()
    }
}

impl Default for Database {
    fn default() -> Self {
        Self::new()
    }
}
