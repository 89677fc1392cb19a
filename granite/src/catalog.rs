//! The table registry.
//!
//! The catalog owns every `HeapFile`; the buffer pool and the operators hold
//! only table ids and resolve them here, which keeps the ownership graph
//! acyclic.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::errors::DbError;
use crate::heap_file::HeapFile;
use crate::tuple::TupleDesc;

struct TableInfo {
    name: String,
    primary_key: Option<String>,
    file: Arc<HeapFile>,
}

#[derive(Default)]
struct CatalogInner {
    by_id: HashMap<u32, TableInfo>,
    by_name: HashMap<String, u32>,
}

#[derive(Default)]
pub struct Catalog {
    inner: RwLock<CatalogInner>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a table and returns its id. A table registered under an
    /// existing name or id replaces the previous entry.
    pub fn add_table(&self, file: Arc<HeapFile>, name: &str, primary_key: Option<&str>) -> u32 {
        let table_id = file.table_id();
        let mut inner = self.inner.write().unwrap();
        if let Some(old_id) = inner.by_name.insert(name.to_string(), table_id) {
            if old_id != table_id {
                inner.by_id.remove(&old_id);
            }
        }
        inner.by_id.insert(
            table_id,
            TableInfo {
                name: name.to_string(),
                primary_key: primary_key.map(str::to_string),
                file,
            },
        );
        table_id
    }

    pub fn file(&self, table_id: u32) -> Result<Arc<HeapFile>, DbError> {
        self.inner
            .read()
            .unwrap()
            .by_id
            .get(&table_id)
            .map(|info| info.file.clone())
            .ok_or(DbError::NoSuchTable(table_id))
    }

    pub fn tuple_desc(&self, table_id: u32) -> Result<Arc<TupleDesc>, DbError> {
        self.file(table_id).map(|file| file.desc().clone())
    }

    pub fn table_name(&self, table_id: u32) -> Option<String> {
        self.inner
            .read()
            .unwrap()
            .by_id
            .get(&table_id)
            .map(|info| info.name.clone())
    }

    pub fn table_id(&self, name: &str) -> Option<u32> {
        self.inner.read().unwrap().by_name.get(name).copied()
    }

    pub fn primary_key(&self, table_id: u32) -> Option<String> {
        self.inner
            .read()
            .unwrap()
            .by_id
            .get(&table_id)
            .and_then(|info| info.primary_key.clone())
    }

    pub fn table_ids(&self) -> Vec<u32> {
        self.inner.read().unwrap().by_id.keys().copied().collect()
    }
}
