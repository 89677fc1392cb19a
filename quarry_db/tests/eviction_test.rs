use granite::errors::DbError;
use granite::lock_manager::Permissions;
use granite::page::slots_per_page;
use granite::PageId;
use serial_test::serial;

mod common;

#[test]
#[serial]
fn test_lru_evicts_clean_pages_in_access_order() {
    let t = common::setup_table("lru_eviction", 1, 3);
    let file = t.db.catalog().file(t.table_id).unwrap();
    for _ in 0..5 {
        file.append_blank_page().unwrap();
    }

    let pids: Vec<PageId> = (0..5).map(|i| PageId::new(t.table_id, i)).collect();
    let tx = t.db.begin_transaction();
    let pool = t.db.buffer_pool();

    for pid in &pids[..3] {
        pool.get_page(tx, *pid, Permissions::ReadOnly).unwrap();
    }
    pool.get_page(tx, pids[3], Permissions::ReadOnly).unwrap();
    assert!(!pool.is_cached(pids[0]));
    assert!(pool.is_cached(pids[1]) && pool.is_cached(pids[2]) && pool.is_cached(pids[3]));

    // Touching p1 leaves p2 the oldest, so loading p4 evicts p2.
    pool.get_page(tx, pids[1], Permissions::ReadOnly).unwrap();
    pool.get_page(tx, pids[4], Permissions::ReadOnly).unwrap();
    assert!(!pool.is_cached(pids[2]));
    assert!(pool.is_cached(pids[1]) && pool.is_cached(pids[3]) && pool.is_cached(pids[4]));

    pool.transaction_complete(tx, true).unwrap();
}

#[test]
#[serial]
fn test_all_dirty_eviction_refuses() {
    let _guard = common::PageSizeGuard::set(128);
    let t = common::setup_table("all_dirty", 1, 2);

    // Fill page 0, then page 1, then start page 2, committing between
    // batches so the pool never holds two dirty pages during setup.
    let slots = slots_per_page(4) as i32;
    common::insert_and_commit(&t, &(0..slots).collect::<Vec<_>>());
    common::insert_and_commit(&t, &(slots..slots * 2).collect::<Vec<_>>());
    common::insert_and_commit(&t, &[slots * 2]);

    let reader = t.db.begin_transaction();
    let tuples = common::scan_tuples(&t, reader);
    t.db.buffer_pool().transaction_complete(reader, true).unwrap();
    let on_page = |page_no: u32| {
        tuples
            .iter()
            .find(|tuple| tuple.record_id().unwrap().page_id.page_no == page_no)
            .unwrap()
            .clone()
    };

    // Two uncommitted transactions dirty both frames.
    let tx1 = t.db.begin_transaction();
    t.db.buffer_pool().delete_tuple(tx1, &on_page(0)).unwrap();
    let tx2 = t.db.begin_transaction();
    t.db.buffer_pool().delete_tuple(tx2, &on_page(1)).unwrap();

    let tx3 = t.db.begin_transaction();
    let err = t
        .db
        .buffer_pool()
        .get_page(tx3, PageId::new(t.table_id, 2), Permissions::ReadOnly)
        .unwrap_err();
    assert!(matches!(err, DbError::AllPagesDirty));

    // Completing a writer frees its frame for eviction again.
    t.db.buffer_pool().transaction_complete(tx1, false).unwrap();
    t.db
        .buffer_pool()
        .get_page(tx3, PageId::new(t.table_id, 2), Permissions::ReadOnly)
        .unwrap();

    t.db.buffer_pool().transaction_complete(tx2, false).unwrap();
    t.db.buffer_pool().transaction_complete(tx3, true).unwrap();
}
