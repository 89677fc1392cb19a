//! The buffer pool: a fixed set of frames caching heap pages in memory.
//!
//! Every page access goes through `get_page`, which takes the page lock
//! before touching the cache. Dirty pages never reach disk before their
//! transaction commits (NO STEAL); a commit writes all of the transaction's
//! dirty pages (FORCE); an abort restores each frame's before-image.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, RwLock};

use crate::catalog::Catalog;
use crate::errors::DbError;
use crate::lock_manager::{LockManager, Permissions};
use crate::page::HeapPage;
use crate::transaction::TransactionId;
use crate::tuple::Tuple;
use crate::{granite_debug_log, PageId};

/// Default number of frames in a pool.
pub const DEFAULT_POOL_PAGES: usize = 50;

/// A shared handle to a cached page.
pub type PageRef = Arc<RwLock<HeapPage>>;

struct Frame {
    page: PageRef,
    /// Snapshot of the page bytes taken when the page entered the pool and
    /// refreshed after each commit flush; restored verbatim on abort.
    before_image: Vec<u8>,
}

#[derive(Default)]
struct PoolState {
    frames: Vec<Option<Frame>>,
    page_table: HashMap<PageId, usize>,
    /// Cached page ids in access order, most recently used at the back.
    lru: VecDeque<PageId>,
}

pub struct BufferPool {
    catalog: Arc<Catalog>,
    lock_manager: LockManager,
    state: Mutex<PoolState>,
    pages_held: Mutex<HashMap<TransactionId, HashSet<PageId>>>,
}

impl BufferPool {
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self::with_capacity(catalog, DEFAULT_POOL_PAGES)
    }

    pub fn with_capacity(catalog: Arc<Catalog>, capacity: usize) -> Self {
        Self {
            catalog,
            lock_manager: LockManager::new(),
            state: Mutex::new(PoolState {
                frames: (0..capacity).map(|_| None).collect(),
                page_table: HashMap::new(),
                lru: VecDeque::new(),
            }),
            pages_held: Mutex::new(HashMap::new()),
        }
    }

    /// Fetches a page under the requested permission, taking the page lock
    /// first. Blocks while the lock conflicts; fails with
    /// `TransactionAborted` when waiting would deadlock. The returned handle
    /// stays valid even if the page is later evicted.
    pub fn get_page(
        &self,
        tx: TransactionId,
        pid: PageId,
        perm: Permissions,
    ) -> Result<PageRef, DbError> {
        self.lock_manager.acquire(tx, pid, perm)?;
        self.pages_held
            .lock()
            .unwrap()
            .entry(tx)
            .or_default()
            .insert(pid);

        let mut state = self.state.lock().unwrap();
        if let Some(&idx) = state.page_table.get(&pid) {
            touch_lru(&mut state.lru, pid);
            match &state.frames[idx] {
                Some(frame) => return Ok(frame.page.clone()),
                None => unreachable!("page table points at an empty frame"),
            }
        }

        granite_debug_log!("[BufferPool::get_page] Miss for {:?}", pid);
        let file = self.catalog.file(pid.table_id)?;
        let page = file.read_page(pid)?;
        let before_image = page.serialize();
        let idx = self.free_frame(&mut state)?;
        let page_ref: PageRef = Arc::new(RwLock::new(page));
        state.frames[idx] = Some(Frame {
            page: page_ref.clone(),
            before_image,
        });
        state.page_table.insert(pid, idx);
        state.lru.push_back(pid);
        Ok(page_ref)
    }

    /// Inserts `t` into `table_id` on behalf of `tx`, recording the dirtied
    /// pages in the cache.
    pub fn insert_tuple(
        &self,
        tx: TransactionId,
        table_id: u32,
        t: &mut Tuple,
    ) -> Result<(), DbError> {
        let file = self.catalog.file(table_id)?;
        let dirtied = file.insert_tuple(self, tx, t)?;
        self.record_dirty(dirtied)
    }

    /// Deletes `t` from the table its record id names, recording the dirtied
    /// pages in the cache.
    pub fn delete_tuple(&self, tx: TransactionId, t: &Tuple) -> Result<(), DbError> {
        let rid = t.record_id().ok_or(DbError::TupleNotOnPage)?;
        let file = self.catalog.file(rid.page_id.table_id)?;
        let dirtied = file.delete_tuple(self, tx, t)?;
        self.record_dirty(dirtied)
    }

    /// Makes dirtied pages current in the cache. A page evicted between its
    /// fetch and its modification is re-admitted here, with the last
    /// committed (on-disk) version as its before-image.
    fn record_dirty(&self, pages: Vec<(PageId, PageRef)>) -> Result<(), DbError> {
        let mut state = self.state.lock().unwrap();
        for (pid, page_ref) in pages {
            if let Some(&idx) = state.page_table.get(&pid) {
                if let Some(frame) = state.frames[idx].as_mut() {
                    frame.page = page_ref;
                }
                touch_lru(&mut state.lru, pid);
            } else {
                let file = self.catalog.file(pid.table_id)?;
                let before_image = file.read_page(pid)?.serialize();
                let idx = self.free_frame(&mut state)?;
                state.frames[idx] = Some(Frame {
                    page: page_ref,
                    before_image,
                });
                state.page_table.insert(pid, idx);
                state.lru.push_back(pid);
            }
        }
        Ok(())
    }

    /// Releases `tx`'s lock on one page without completing the transaction.
    /// Breaks two-phase locking; only tests and cursors that know a page is
    /// irrelevant should call it.
    pub fn release_page(&self, tx: TransactionId, pid: PageId) {
        self.lock_manager.release(tx, pid);
        if let Some(pids) = self.pages_held.lock().unwrap().get_mut(&tx) {
            pids.remove(&pid);
        }
    }

    pub fn holds_lock(&self, tx: TransactionId, pid: PageId) -> bool {
        self.lock_manager.holds_lock(tx, pid)
    }

    /// Commits or aborts `tx`. On commit every page the transaction dirtied
    /// is written to disk and snapshotted as the new before-image; on abort
    /// every such page is rolled back to its before-image in memory. All of
    /// the transaction's locks are released either way. Completing a
    /// transaction twice is a no-op.
    pub fn transaction_complete(&self, tx: TransactionId, commit: bool) -> Result<(), DbError> {
        granite_debug_log!(
            "[BufferPool::transaction_complete] tx {:?} commit={}",
            tx,
            commit
        );
        let held = self.pages_held.lock().unwrap().remove(&tx);
        let Some(pids) = held else {
            self.lock_manager.forget(tx);
            return Ok(());
        };

        for pid in pids {
            if self.lock_manager.holds_exclusive(tx, pid) {
                if commit {
                    self.commit_page(pid)?;
                } else {
                    self.restore_before_image(pid);
                }
            }
            self.lock_manager.release(tx, pid);
        }
        self.lock_manager.forget(tx);
        Ok(())
    }

    /// Writes a dirty cached page to disk, marks it clean and refreshes its
    /// before-image.
    fn commit_page(&self, pid: PageId) -> Result<(), DbError> {
        let mut state = self.state.lock().unwrap();
        let Some(&idx) = state.page_table.get(&pid) else {
            return Ok(());
        };
        let Some(frame) = state.frames[idx].as_mut() else {
            return Ok(());
        };
        let mut page = frame.page.write().unwrap();
        if page.dirtied_by().is_none() {
            return Ok(());
        }
        self.catalog.file(pid.table_id)?.write_page(&page)?;
        page.mark_dirty(None);
        frame.before_image = page.serialize();
        Ok(())
    }

    /// Rolls a cached page back to its before-image, leaving it clean.
    fn restore_before_image(&self, pid: PageId) {
        let mut state = self.state.lock().unwrap();
        if let Some(&idx) = state.page_table.get(&pid) {
            if let Some(frame) = state.frames[idx].as_mut() {
                let mut page = frame.page.write().unwrap();
                page.restore_from(&frame.before_image);
            }
        }
    }

    /// Writes every dirty cached page to disk. Breaks NO STEAL when dirty
    /// pages belong to live transactions; meant for shutdown.
    pub fn flush_all_pages(&self) -> Result<(), DbError> {
        let mut state = self.state.lock().unwrap();
        let pids: Vec<PageId> = state.page_table.keys().copied().collect();
        for pid in pids {
            self.flush_frame(&mut state, pid)?;
        }
        Ok(())
    }

    /// Writes one dirty cached page to disk and marks it clean.
    pub fn flush_page(&self, pid: PageId) -> Result<(), DbError> {
        let mut state = self.state.lock().unwrap();
        self.flush_frame(&mut state, pid)
    }

    fn flush_frame(&self, state: &mut PoolState, pid: PageId) -> Result<(), DbError> {
        let Some(&idx) = state.page_table.get(&pid) else {
            return Ok(());
        };
        let Some(frame) = state.frames[idx].as_mut() else {
            return Ok(());
        };
        let mut page = frame.page.write().unwrap();
        if page.dirtied_by().is_some() {
            self.catalog.file(pid.table_id)?.write_page(&page)?;
            page.mark_dirty(None);
        }
        Ok(())
    }

    /// Drops a cached page without writing it back, freeing its frame.
    pub fn discard_page(&self, pid: PageId) {
        let mut state = self.state.lock().unwrap();
        if let Some(idx) = state.page_table.remove(&pid) {
            state.frames[idx] = None;
            state.lru.retain(|p| *p != pid);
        }
    }

    pub fn is_cached(&self, pid: PageId) -> bool {
        self.state.lock().unwrap().page_table.contains_key(&pid)
    }

    fn free_frame(&self, state: &mut PoolState) -> Result<usize, DbError> {
        if let Some(idx) = state.frames.iter().position(|f| f.is_none()) {
            return Ok(idx);
        }
        self.evict_page(state)?;
        state
            .frames
            .iter()
            .position(|f| f.is_none())
            .ok_or(DbError::AllPagesDirty)
    }

    /// Evicts the least recently used clean page. Dirty pages are never
    /// victims; if every frame holds one, the pool is out of room until a
    /// transaction completes.
    fn evict_page(&self, state: &mut PoolState) -> Result<(), DbError> {
        let mut victim = None;
        for pid in state.lru.iter() {
            if let Some(&idx) = state.page_table.get(pid) {
                if let Some(frame) = &state.frames[idx] {
                    if frame.page.read().unwrap().dirtied_by().is_none() {
                        victim = Some((*pid, idx));
                        break;
                    }
                }
            }
        }
        let Some((pid, idx)) = victim else {
            return Err(DbError::AllPagesDirty);
        };
        granite_debug_log!("[BufferPool::evict_page] Evicting {:?}", pid);
        state.frames[idx] = None;
        state.page_table.remove(&pid);
        state.lru.retain(|p| *p != pid);
        Ok(())
    }
}

fn touch_lru(lru: &mut VecDeque<PageId>, pid: PageId) {
    if let Some(pos) = lru.iter().position(|p| *p == pid) {
        lru.remove(pos);
    }
    lru.push_back(pid);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap_file::HeapFile;
    use crate::tuple::{Field, FieldType, TupleDesc};
    use serial_test::serial;
    use tempfile::{tempdir, TempDir};

    fn setup(capacity: usize) -> (TempDir, Arc<Catalog>, Arc<BufferPool>, u32) {
        let dir = tempdir().unwrap();
        let catalog = Arc::new(Catalog::new());
        let desc = Arc::new(TupleDesc::unnamed(vec![FieldType::Int]));
        let file = Arc::new(HeapFile::open(dir.path().join("t.dat"), desc).unwrap());
        // Three pages on disk to play with.
        for _ in 0..3 {
            file.append_blank_page().unwrap();
        }
        let table_id = catalog.add_table(file, "t", None);
        let pool = Arc::new(BufferPool::with_capacity(catalog.clone(), capacity));
        (dir, catalog, pool, table_id)
    }

    #[test]
    #[serial]
    fn test_get_page_caches_and_rereads() {
        let (_dir, _catalog, pool, table_id) = setup(4);
        let tx = TransactionId(1);
        let pid = PageId::new(table_id, 0);

        let first = pool.get_page(tx, pid, Permissions::ReadOnly).unwrap();
        assert!(pool.is_cached(pid));
        let second = pool.get_page(tx, pid, Permissions::ReadOnly).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    #[serial]
    fn test_lru_evicts_oldest_clean_page() {
        let (_dir, _catalog, pool, table_id) = setup(2);
        let tx = TransactionId(1);
        let p0 = PageId::new(table_id, 0);
        let p1 = PageId::new(table_id, 1);
        let p2 = PageId::new(table_id, 2);

        pool.get_page(tx, p0, Permissions::ReadOnly).unwrap();
        pool.get_page(tx, p1, Permissions::ReadOnly).unwrap();
        pool.get_page(tx, p2, Permissions::ReadOnly).unwrap();
        assert!(!pool.is_cached(p0));
        assert!(pool.is_cached(p1) && pool.is_cached(p2));
    }

    #[test]
    #[serial]
    fn test_discard_frees_the_frame() {
        let (_dir, _catalog, pool, table_id) = setup(1);
        let tx = TransactionId(1);
        let p0 = PageId::new(table_id, 0);
        let p1 = PageId::new(table_id, 1);

        pool.get_page(tx, p0, Permissions::ReadOnly).unwrap();
        pool.discard_page(p0);
        assert!(!pool.is_cached(p0));
        // The frame is reusable without an eviction.
        pool.get_page(tx, p1, Permissions::ReadOnly).unwrap();
        assert!(pool.is_cached(p1));
    }

    #[test]
    #[serial]
    fn test_commit_writes_dirty_page_to_disk() {
        let (_dir, catalog, pool, table_id) = setup(2);
        let desc = catalog.tuple_desc(table_id).unwrap();
        let tx = TransactionId(1);

        let mut t = Tuple::new(desc, vec![Field::Int(99)]);
        pool.insert_tuple(tx, table_id, &mut t).unwrap();
        pool.transaction_complete(tx, true).unwrap();

        // A fresh read from disk sees the committed tuple.
        let pid = t.record_id().unwrap().page_id;
        let page = catalog.file(table_id).unwrap().read_page(pid).unwrap();
        assert_eq!(page.iter().count(), 1);
    }

    #[test]
    #[serial]
    fn test_abort_restores_before_image() {
        let (_dir, _catalog, pool, table_id) = setup(2);
        let desc = Arc::new(TupleDesc::unnamed(vec![FieldType::Int]));
        let tx = TransactionId(1);

        let mut t = Tuple::new(desc, vec![Field::Int(7)]);
        pool.insert_tuple(tx, table_id, &mut t).unwrap();
        let pid = t.record_id().unwrap().page_id;
        pool.transaction_complete(tx, false).unwrap();

        let reader = TransactionId(2);
        let page_ref = pool.get_page(reader, pid, Permissions::ReadOnly).unwrap();
        assert_eq!(page_ref.read().unwrap().iter().count(), 0);
        assert!(page_ref.read().unwrap().dirtied_by().is_none());
    }

    #[test]
    #[serial]
    fn test_double_completion_is_a_no_op() {
        let (_dir, _catalog, pool, table_id) = setup(2);
        let tx = TransactionId(1);
        let pid = PageId::new(table_id, 0);
        pool.get_page(tx, pid, Permissions::ReadWrite).unwrap();

        pool.transaction_complete(tx, false).unwrap();
        pool.transaction_complete(tx, false).unwrap();
        assert!(!pool.holds_lock(tx, pid));
    }
}
