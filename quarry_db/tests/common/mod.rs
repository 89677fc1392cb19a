#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use granite::cursor::Cursor;
use granite::database::Database;
use granite::heap_file::HeapFile;
use granite::transaction::TransactionId;
use granite::tuple::{Field, FieldType, Tuple, TupleDesc};
use tempfile::TempDir;

/// A scratch database with one registered table of integer columns. The
/// temp directory lives as long as the struct does.
pub struct TestDb {
    pub db: Arc<Database>,
    pub table_id: u32,
    pub desc: Arc<TupleDesc>,
    pub data_path: PathBuf,
    _dir: TempDir,
}

pub fn setup_table(test_name: &str, int_fields: usize, pool_capacity: usize) -> TestDb {
    let dir = tempfile::tempdir().unwrap();
    let data_path = dir.path().join(format!("{test_name}.dat"));
    let desc = Arc::new(TupleDesc::unnamed(vec![FieldType::Int; int_fields]));
    let db = Arc::new(Database::with_pool_capacity(pool_capacity));
    let file = HeapFile::open(&data_path, desc.clone()).unwrap();
    let table_id = db.catalog().add_table(Arc::new(file), test_name, None);
    TestDb {
        db,
        table_id,
        desc,
        data_path,
        _dir: dir,
    }
}

pub fn int_tuple(desc: &Arc<TupleDesc>, values: &[i32]) -> Tuple {
    Tuple::new(desc.clone(), values.iter().map(|&v| Field::Int(v)).collect())
}

/// Inserts one single-column tuple per value and commits.
pub fn insert_and_commit(t: &TestDb, values: &[i32]) {
    let rows: Vec<Vec<i32>> = values.iter().map(|&v| vec![v]).collect();
    insert_rows_and_commit(t, &rows);
}

/// Inserts one tuple per row and commits.
pub fn insert_rows_and_commit(t: &TestDb, rows: &[Vec<i32>]) {
    let tx = t.db.begin_transaction();
    for row in rows {
        let mut tuple = int_tuple(&t.desc, row);
        t.db
            .buffer_pool()
            .insert_tuple(tx, t.table_id, &mut tuple)
            .unwrap();
    }
    t.db.buffer_pool().transaction_complete(tx, true).unwrap();
}

/// Collects every tuple of the table under `tx`, leaving `tx` open.
pub fn scan_tuples(t: &TestDb, tx: TransactionId) -> Vec<Tuple> {
    let file = t.db.catalog().file(t.table_id).unwrap();
    let mut cursor = file.cursor(t.db.buffer_pool().clone(), tx);
    cursor.open().unwrap();
    let mut tuples = Vec::new();
    while let Some(tuple) = cursor.next().unwrap() {
        tuples.push(tuple);
    }
    cursor.close();
    tuples
}

/// Scans the table's first column under its own committed transaction,
/// returning the values sorted.
pub fn scan_first_column(t: &TestDb) -> Vec<i32> {
    let tx = t.db.begin_transaction();
    let mut values: Vec<i32> = scan_tuples(t, tx)
        .iter()
        .map(|tuple| match tuple.field(0) {
            Field::Int(v) => *v,
            Field::Str(_) => panic!("expected an int column"),
        })
        .collect();
    t.db.buffer_pool().transaction_complete(tx, true).unwrap();
    values.sort_unstable();
    values
}

/// Overrides the process-wide page size until dropped.
pub struct PageSizeGuard;

impl PageSizeGuard {
    pub fn set(bytes: usize) -> Self {
        granite::set_page_size(bytes);
        PageSizeGuard
    }
}

impl Drop for PageSizeGuard {
    fn drop(&mut self) {
        granite::reset_page_size();
    }
}
