use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use granite::errors::DbError;
use granite::lock_manager::Permissions;
use granite::PageId;
use serial_test::serial;

mod common;

#[test]
#[serial]
fn test_read_then_write_upgrade_on_same_page() {
    let t = common::setup_table("upgrade", 1, 50);
    common::insert_and_commit(&t, &[1]);
    let pid = PageId::new(t.table_id, 0);

    let tx = t.db.begin_transaction();
    t.db
        .buffer_pool()
        .get_page(tx, pid, Permissions::ReadOnly)
        .unwrap();
    // The sole reader escalates to a writer without blocking.
    t.db
        .buffer_pool()
        .get_page(tx, pid, Permissions::ReadWrite)
        .unwrap();
    assert!(t.db.buffer_pool().holds_lock(tx, pid));

    t.db.buffer_pool().transaction_complete(tx, true).unwrap();
    assert!(!t.db.buffer_pool().holds_lock(tx, pid));
}

#[test]
#[serial]
fn test_release_page_lets_a_writer_in() {
    let t = common::setup_table("manual_release", 1, 50);
    common::insert_and_commit(&t, &[1]);
    let pid = PageId::new(t.table_id, 0);

    let reader = t.db.begin_transaction();
    t.db
        .buffer_pool()
        .get_page(reader, pid, Permissions::ReadOnly)
        .unwrap();
    t.db.buffer_pool().release_page(reader, pid);
    assert!(!t.db.buffer_pool().holds_lock(reader, pid));

    // With the shared lock gone the writer is admitted immediately.
    let writer = t.db.begin_transaction();
    t.db
        .buffer_pool()
        .get_page(writer, pid, Permissions::ReadWrite)
        .unwrap();
    t.db.buffer_pool().transaction_complete(writer, true).unwrap();
    t.db.buffer_pool().transaction_complete(reader, true).unwrap();
}

#[test]
#[serial]
fn test_writer_waits_for_reader_commit() {
    let t = common::setup_table("writer_waits", 1, 50);
    common::insert_and_commit(&t, &[1]);
    let pid = PageId::new(t.table_id, 0);

    let reader = t.db.begin_transaction();
    t.db
        .buffer_pool()
        .get_page(reader, pid, Permissions::ReadOnly)
        .unwrap();

    let db = t.db.clone();
    let writer_thread = thread::spawn(move || {
        let writer = db.begin_transaction();
        db.buffer_pool()
            .get_page(writer, pid, Permissions::ReadWrite)
            .unwrap();
        db.buffer_pool().transaction_complete(writer, true).unwrap();
    });

    // Give the writer time to park on the lock, then let it through.
    thread::sleep(Duration::from_millis(100));
    t.db.buffer_pool().transaction_complete(reader, true).unwrap();
    writer_thread.join().unwrap();
}

#[test]
#[serial]
fn test_opposite_order_deadlock_aborts_exactly_one() {
    let t = common::setup_table("deadlock", 1, 50);
    let file = t.db.catalog().file(t.table_id).unwrap();
    file.append_blank_page().unwrap();
    file.append_blank_page().unwrap();

    let p0 = PageId::new(t.table_id, 0);
    let p1 = PageId::new(t.table_id, 1);
    let barrier = Arc::new(Barrier::new(2));

    let mut handles = Vec::new();
    for (first, second) in [(p0, p1), (p1, p0)] {
        let db = t.db.clone();
        let barrier = barrier.clone();
        handles.push(thread::spawn(move || {
            let tx = db.begin_transaction();
            db.buffer_pool()
                .get_page(tx, first, Permissions::ReadWrite)
                .unwrap();
            barrier.wait();
            match db.buffer_pool().get_page(tx, second, Permissions::ReadWrite) {
                Ok(_) => {
                    db.buffer_pool().transaction_complete(tx, true).unwrap();
                    false
                }
                Err(DbError::TransactionAborted) => {
                    db.buffer_pool().transaction_complete(tx, false).unwrap();
                    true
                }
                Err(e) => panic!("unexpected error from get_page: {e:?}"),
            }
        }));
    }

    let aborts = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|&aborted| aborted)
        .count();
    assert_eq!(aborts, 1);

    // Both transactions are gone; the pages are free for anyone.
    let tx = t.db.begin_transaction();
    t.db
        .buffer_pool()
        .get_page(tx, p0, Permissions::ReadWrite)
        .unwrap();
    t.db
        .buffer_pool()
        .get_page(tx, p1, Permissions::ReadWrite)
        .unwrap();
    t.db.buffer_pool().transaction_complete(tx, true).unwrap();
}

#[test]
#[serial]
fn test_upgrade_deadlock_between_two_readers() {
    let t = common::setup_table("upgrade_deadlock", 1, 50);
    common::insert_and_commit(&t, &[1]);
    let pid = PageId::new(t.table_id, 0);
    let barrier = Arc::new(Barrier::new(2));

    let mut handles = Vec::new();
    for _ in 0..2 {
        let db = t.db.clone();
        let barrier = barrier.clone();
        handles.push(thread::spawn(move || {
            let tx = db.begin_transaction();
            db.buffer_pool()
                .get_page(tx, pid, Permissions::ReadOnly)
                .unwrap();
            barrier.wait();
            // Both sharers now want exclusivity; one has to die.
            match db.buffer_pool().get_page(tx, pid, Permissions::ReadWrite) {
                Ok(_) => {
                    db.buffer_pool().transaction_complete(tx, true).unwrap();
                    false
                }
                Err(DbError::TransactionAborted) => {
                    db.buffer_pool().transaction_complete(tx, false).unwrap();
                    true
                }
                Err(e) => panic!("unexpected error from get_page: {e:?}"),
            }
        }));
    }

    let aborts = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|&aborted| aborted)
        .count();
    assert_eq!(aborts, 1);
}
