//! Page-granularity two-phase locking.
//!
//! Transactions take shared or exclusive locks on pages and keep them until
//! they complete. Waiters block on a condvar; every failed attempt refreshes
//! the waiter's edges in a waits-for graph and searches it for a cycle, so a
//! deadlocked request fails instead of blocking forever.

use std::collections::{HashMap, HashSet};
use std::sync::{Condvar, Mutex};

use crate::transaction::TransactionId;
use crate::{granite_debug_log, PageId};

/// The two access modes a transaction can request on a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permissions {
    ReadOnly,
    ReadWrite,
}

#[derive(Debug)]
pub enum LockError {
    Deadlock,
}

/// The lock state of a single page: any number of shared holders, or one
/// exclusive holder, never both. A sole shared holder may upgrade in place.
#[derive(Debug, Default)]
pub struct PageLockState {
    shared: HashSet<TransactionId>,
    exclusive: Option<TransactionId>,
}

impl PageLockState {
    /// Attempts to grant `tx` the lock in `perm` mode. Returns whether `tx`
    /// now holds the lock in that mode; on `false` the caller waits.
    pub fn add_lock(&mut self, perm: Permissions, tx: TransactionId) -> bool {
        match perm {
            Permissions::ReadOnly => {
                if let Some(holder) = self.exclusive {
                    return holder == tx;
                }
                self.shared.insert(tx);
                true
            }
            Permissions::ReadWrite => {
                if let Some(holder) = self.exclusive {
                    return holder == tx;
                }
                if self.shared.len() > 1 {
                    return false;
                }
                if self.shared.is_empty() || self.shared.contains(&tx) {
                    self.exclusive = Some(tx);
                    self.shared.clear();
                    return true;
                }
                false
            }
        }
    }

    /// Removes `tx` from whichever side holds it.
    pub fn release(&mut self, tx: TransactionId) {
        if self.exclusive == Some(tx) {
            self.exclusive = None;
        } else {
            self.shared.remove(&tx);
        }
    }

    pub fn is_holding(&self, tx: TransactionId) -> bool {
        self.exclusive == Some(tx) || self.shared.contains(&tx)
    }

    pub fn is_exclusive(&self) -> bool {
        self.exclusive.is_some()
    }

    pub fn held_exclusively_by(&self, tx: TransactionId) -> bool {
        self.exclusive == Some(tx)
    }

    /// Every transaction currently holding this lock in either mode.
    pub fn related_txs(&self) -> HashSet<TransactionId> {
        let mut txs = self.shared.clone();
        if let Some(holder) = self.exclusive {
            txs.insert(holder);
        }
        txs
    }

    fn is_free(&self) -> bool {
        self.exclusive.is_none() && self.shared.is_empty()
    }
}

/// The lock manager: per-page lock states, a condvar for waiters, and the
/// waits-for graph used for deadlock detection.
#[derive(Debug, Default)]
pub struct LockManager {
    lock_table: Mutex<HashMap<PageId, PageLockState>>,
    cvar: Condvar,
    /// Maps a waiting transaction to the holders it is waiting behind.
    /// Edges exist only while a request is unsatisfied.
    waits_for: Mutex<HashMap<TransactionId, HashSet<TransactionId>>>,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires the page lock for `tx`, blocking while it conflicts.
    ///
    /// Fails with `LockError::Deadlock` when waiting would close a cycle in
    /// the waits-for graph; the caller must then abort the transaction,
    /// which releases its locks and lets the other party through.
    pub fn acquire(
        &self,
        tx: TransactionId,
        pid: PageId,
        perm: Permissions,
    ) -> Result<(), LockError> {
        let mut lock_table = self.lock_table.lock().unwrap();
        loop {
            let state = lock_table.entry(pid).or_default();
            if state.add_lock(perm, tx) {
                self.clear_waits(tx);
                return Ok(());
            }

            let holders = state.related_txs();
            self.update_waits(tx, &holders);
            if self.detect_deadlock(tx) {
                granite_debug_log!(
                    "[LockManager::acquire] Deadlock: tx {:?} waiting on {:?}",
                    tx,
                    pid
                );
                self.clear_waits(tx);
                self.cvar.notify_all();
                return Err(LockError::Deadlock);
            }

            lock_table = self.cvar.wait(lock_table).unwrap();
        }
    }

    /// Releases `tx`'s lock on a single page and wakes waiters.
    pub fn release(&self, tx: TransactionId, pid: PageId) {
        let mut lock_table = self.lock_table.lock().unwrap();
        if let Some(state) = lock_table.get_mut(&pid) {
            state.release(tx);
            if state.is_free() {
                lock_table.remove(&pid);
            }
        }
        self.cvar.notify_all();
    }

    pub fn holds_lock(&self, tx: TransactionId, pid: PageId) -> bool {
        self.lock_table
            .lock()
            .unwrap()
            .get(&pid)
            .is_some_and(|state| state.is_holding(tx))
    }

    pub fn holds_exclusive(&self, tx: TransactionId, pid: PageId) -> bool {
        self.lock_table
            .lock()
            .unwrap()
            .get(&pid)
            .is_some_and(|state| state.held_exclusively_by(tx))
    }

    /// Drops `tx` from the waits-for graph entirely, both its own edges and
    /// edges pointing at it. Called when a transaction completes.
    pub fn forget(&self, tx: TransactionId) {
        let mut waits_for = self.waits_for.lock().unwrap();
        waits_for.remove(&tx);
        for edges in waits_for.values_mut() {
            edges.remove(&tx);
        }
    }

    fn update_waits(&self, waiter: TransactionId, holders: &HashSet<TransactionId>) {
        let mut waits_for = self.waits_for.lock().unwrap();
        let edges = waits_for.entry(waiter).or_default();
        edges.clear();
        edges.extend(holders.iter().copied().filter(|&t| t != waiter));
    }

    fn clear_waits(&self, tx: TransactionId) {
        self.waits_for.lock().unwrap().remove(&tx);
    }

    fn detect_deadlock(&self, start: TransactionId) -> bool {
        let waits_for = self.waits_for.lock().unwrap();
        let mut visited = HashSet::new();
        let mut path = HashSet::new();
        Self::dfs_detect(start, &waits_for, &mut visited, &mut path)
    }

    fn dfs_detect(
        current: TransactionId,
        waits_for: &HashMap<TransactionId, HashSet<TransactionId>>,
        visited: &mut HashSet<TransactionId>,
        path: &mut HashSet<TransactionId>,
    ) -> bool {
        visited.insert(current);
        path.insert(current);

        if let Some(edges) = waits_for.get(&current) {
            for &next in edges {
                if path.contains(&next) {
                    return true;
                }
                if !visited.contains(&next) && Self::dfs_detect(next, waits_for, visited, path) {
                    return true;
                }
            }
        }

        path.remove(&current);
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T1: TransactionId = TransactionId(1);
    const T2: TransactionId = TransactionId(2);
    const T3: TransactionId = TransactionId(3);

    #[test]
    fn test_shared_locks_coexist() {
        let mut state = PageLockState::default();
        assert!(state.add_lock(Permissions::ReadOnly, T1));
        assert!(state.add_lock(Permissions::ReadOnly, T2));
        assert!(state.is_holding(T1) && state.is_holding(T2));
        assert!(!state.is_exclusive());
    }

    #[test]
    fn test_exclusive_excludes_everyone_else() {
        let mut state = PageLockState::default();
        assert!(state.add_lock(Permissions::ReadWrite, T1));
        assert!(!state.add_lock(Permissions::ReadOnly, T2));
        assert!(!state.add_lock(Permissions::ReadWrite, T2));
        // The holder itself re-acquires freely in either mode.
        assert!(state.add_lock(Permissions::ReadWrite, T1));
        assert!(state.add_lock(Permissions::ReadOnly, T1));
    }

    #[test]
    fn test_sole_shared_holder_upgrades() {
        let mut state = PageLockState::default();
        assert!(state.add_lock(Permissions::ReadOnly, T1));
        assert!(state.add_lock(Permissions::ReadWrite, T1));
        assert!(state.held_exclusively_by(T1));
        assert_eq!(state.related_txs().len(), 1);
    }

    #[test]
    fn test_upgrade_blocked_by_other_sharers() {
        let mut state = PageLockState::default();
        assert!(state.add_lock(Permissions::ReadOnly, T1));
        assert!(state.add_lock(Permissions::ReadOnly, T2));
        assert!(!state.add_lock(Permissions::ReadWrite, T1));
        // Once the other sharer leaves, the upgrade goes through.
        state.release(T2);
        assert!(state.add_lock(Permissions::ReadWrite, T1));
    }

    #[test]
    fn test_release_exclusive_frees_the_page() {
        let mut state = PageLockState::default();
        assert!(state.add_lock(Permissions::ReadWrite, T1));
        state.release(T1);
        assert!(state.add_lock(Permissions::ReadWrite, T2));
    }

    #[test]
    fn test_manager_tracks_holders() {
        let lm = LockManager::new();
        let pid = PageId::new(1, 0);
        lm.acquire(T1, pid, Permissions::ReadOnly).unwrap();
        assert!(lm.holds_lock(T1, pid));
        assert!(!lm.holds_exclusive(T1, pid));
        lm.acquire(T1, pid, Permissions::ReadWrite).unwrap();
        assert!(lm.holds_exclusive(T1, pid));
        lm.release(T1, pid);
        assert!(!lm.holds_lock(T1, pid));
    }

    #[test]
    fn test_detect_cycle_through_waits_for() {
        let lm = LockManager::new();
        lm.update_waits(T1, &[T2].into_iter().collect());
        lm.update_waits(T2, &[T3].into_iter().collect());
        assert!(!lm.detect_deadlock(T1));
        lm.update_waits(T3, &[T1].into_iter().collect());
        assert!(lm.detect_deadlock(T1));
        lm.forget(T3);
        assert!(!lm.detect_deadlock(T1));
    }
}
