//! Manages page-level locks for two-phase locking.

use crate::basalt_debug_log;
use crate::page::PageId;
use crate::transaction::TransactionId;
use std::collections::{HashMap, HashSet};
use std::sync::{Condvar, Mutex};

/// The permission a transaction requests on a page. `ReadOnly` maps to a
/// shared lock, `ReadWrite` to an exclusive one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    ReadOnly,
    ReadWrite,
}

#[derive(Debug)]
pub enum LockError {
    Deadlock,
}

/// The holders of locks on a single page: any number of shared holders, or
/// one exclusive holder.
#[derive(Debug, Default)]
struct PageLocks {
    shared: HashSet<TransactionId>,
    exclusive: Option<TransactionId>,
}

impl PageLocks {
    fn is_locked(&self) -> bool {
        self.exclusive.is_some() || !self.shared.is_empty()
    }

    fn holds(&self, tid: TransactionId) -> bool {
        self.exclusive == Some(tid) || self.shared.contains(&tid)
    }
}

#[derive(Debug, Default)]
struct LockTables {
    /// Lock holders per page.
    locks: HashMap<PageId, PageLocks>,
    /// The waits-for graph: a waiting transaction maps to the holders it is
    /// blocked on. A cycle here is a deadlock.
    waits_for: HashMap<TransactionId, HashSet<TransactionId>>,
}

/// The main lock manager struct. Both tables live behind a single mutex and
/// waiters park on one condition variable, so every grant, wait and release
/// observes a consistent view of holders and dependencies.
#[derive(Debug, Default)]
pub struct LockManager {
    tables: Mutex<LockTables>,
    cvar: Condvar,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires `perm` on `pid` for `tid`, blocking while an incompatible
    /// lock is held. A transaction that already holds an exclusive lock is
    /// granted either mode immediately; the sole shared holder of a page is
    /// upgraded in place on a `ReadWrite` request.
    ///
    /// Fails with [`LockError::Deadlock`] when waiting would close a cycle in
    /// the waits-for graph; the requester is always the victim.
    pub fn acquire(
        &self,
        tid: TransactionId,
        pid: PageId,
        perm: Permission,
    ) -> Result<(), LockError> {
        let mut tables = self.tables.lock().unwrap();
        loop {
            if Self::try_grant(&mut tables, tid, pid, perm) {
                // Only tid's own entry: edges pointing at tid stay valid, it
                // still holds everything it held before.
                tables.waits_for.remove(&tid);
                return Ok(());
            }

            let holders = Self::blockers(&tables, tid, pid, perm);
            tables.waits_for.insert(tid, holders);
            if Self::wait_cycle(&tables.waits_for, tid) {
                basalt_debug_log!("[LockManager::acquire] Deadlock detected for tx {}", tid);
                tables.waits_for.remove(&tid);
                self.cvar.notify_all();
                return Err(LockError::Deadlock);
            }

            tables = self.cvar.wait(tables).unwrap();
        }
    }

    /// Releases `tid`'s lock on `pid` and wakes all waiters. Used by the
    /// buffer pool's unsafe release; ordinary lock release happens wholesale
    /// at transaction end.
    pub fn release(&self, tid: TransactionId, pid: PageId) {
        let mut tables = self.tables.lock().unwrap();
        Self::release_one(&mut tables, tid, pid);
        Self::clear_waits(&mut tables, tid);
        self.cvar.notify_all();
    }

    /// Releases every lock `tid` holds.
    pub fn release_all(&self, tid: TransactionId) {
        let mut tables = self.tables.lock().unwrap();
        let held: Vec<PageId> = tables
            .locks
            .iter()
            .filter(|(_, state)| state.holds(tid))
            .map(|(pid, _)| *pid)
            .collect();
        for pid in held {
            Self::release_one(&mut tables, tid, pid);
        }
        Self::clear_waits(&mut tables, tid);
        self.cvar.notify_all();
    }

    /// Drops every holder of `pid`. Used when the page leaves the buffer
    /// pool; under NO STEAL an evicted page is clean, so no holder has
    /// uncommitted writes on it.
    pub fn release_all_on_page(&self, pid: PageId) {
        let mut tables = self.tables.lock().unwrap();
        tables.locks.remove(&pid);
        self.cvar.notify_all();
    }

    pub fn holds_lock(&self, tid: TransactionId, pid: PageId) -> bool {
        let tables = self.tables.lock().unwrap();
        tables
            .locks
            .get(&pid)
            .map_or(false, |state| state.holds(tid))
    }

    fn try_grant(
        tables: &mut LockTables,
        tid: TransactionId,
        pid: PageId,
        perm: Permission,
    ) -> bool {
        let state = tables.locks.entry(pid).or_default();
        match perm {
            Permission::ReadOnly => {
                if state.exclusive.is_none() || state.exclusive == Some(tid) {
                    state.shared.insert(tid);
                    true
                } else {
                    false
                }
            }
            Permission::ReadWrite => {
                if state.exclusive == Some(tid) {
                    true
                } else if state.exclusive.is_none()
                    && state.shared.iter().all(|holder| *holder == tid)
                {
                    // Unlocked, or an upgrade for the sole shared holder.
                    state.shared.remove(&tid);
                    state.exclusive = Some(tid);
                    true
                } else {
                    false
                }
            }
        }
    }

    /// The holders an incompatible request by `tid` would wait on.
    fn blockers(
        tables: &LockTables,
        tid: TransactionId,
        pid: PageId,
        perm: Permission,
    ) -> HashSet<TransactionId> {
        let mut holders = HashSet::new();
        if let Some(state) = tables.locks.get(&pid) {
            if let Some(exclusive) = state.exclusive {
                if exclusive != tid {
                    holders.insert(exclusive);
                }
            }
            if perm == Permission::ReadWrite {
                holders.extend(state.shared.iter().copied().filter(|h| *h != tid));
            }
        }
        holders
    }

    fn clear_waits(tables: &mut LockTables, tid: TransactionId) {
        tables.waits_for.remove(&tid);
        for waiting_on in tables.waits_for.values_mut() {
            waiting_on.remove(&tid);
        }
    }

    /// Depth-first search for a path from `start`'s dependencies back to
    /// `start`, on an explicit stack.
    fn wait_cycle(
        waits_for: &HashMap<TransactionId, HashSet<TransactionId>>,
        start: TransactionId,
    ) -> bool {
        let mut visited = HashSet::new();
        let mut stack: Vec<TransactionId> = waits_for
            .get(&start)
            .map(|deps| deps.iter().copied().collect())
            .unwrap_or_default();

        while let Some(tid) = stack.pop() {
            if tid == start {
                return true;
            }
            if visited.insert(tid) {
                if let Some(deps) = waits_for.get(&tid) {
                    stack.extend(deps.iter().copied());
                }
            }
        }
        false
    }

    fn release_one(tables: &mut LockTables, tid: TransactionId, pid: PageId) {
        if let Some(state) = tables.locks.get_mut(&pid) {
            state.shared.remove(&tid);
            if state.exclusive == Some(tid) {
                state.exclusive = None;
            }
            if !state.is_locked() {
                tables.locks.remove(&pid);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn pid(n: usize) -> PageId {
        PageId::new(1, n)
    }

    #[test]
    fn shared_locks_coexist() {
        let lm = LockManager::new();
        let t1 = TransactionId::new();
        let t2 = TransactionId::new();
        let t3 = TransactionId::new();

        lm.acquire(t1, pid(0), Permission::ReadOnly).unwrap();
        lm.acquire(t2, pid(0), Permission::ReadOnly).unwrap();
        lm.acquire(t3, pid(0), Permission::ReadOnly).unwrap();

        assert!(lm.holds_lock(t1, pid(0)));
        assert!(lm.holds_lock(t2, pid(0)));
        assert!(lm.holds_lock(t3, pid(0)));
    }

    #[test]
    fn locks_are_reentrant() {
        let lm = LockManager::new();
        let t1 = TransactionId::new();

        lm.acquire(t1, pid(0), Permission::ReadWrite).unwrap();
        lm.acquire(t1, pid(0), Permission::ReadWrite).unwrap();
        lm.acquire(t1, pid(0), Permission::ReadOnly).unwrap();

        lm.acquire(t1, pid(1), Permission::ReadOnly).unwrap();
        lm.acquire(t1, pid(1), Permission::ReadOnly).unwrap();
    }

    #[test]
    fn sole_shared_holder_upgrades_in_place() {
        let lm = LockManager::new();
        let t1 = TransactionId::new();

        lm.acquire(t1, pid(0), Permission::ReadOnly).unwrap();
        lm.acquire(t1, pid(0), Permission::ReadWrite).unwrap();
        assert!(lm.holds_lock(t1, pid(0)));

        // The upgraded lock excludes everyone else.
        let lm = Arc::new(lm);
        let lm2 = Arc::clone(&lm);
        let t2 = TransactionId::new();
        let (tx, rx) = mpsc::channel();
        let handle = thread::spawn(move || {
            lm2.acquire(t2, pid(0), Permission::ReadOnly).unwrap();
            tx.send(()).unwrap();
        });
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());

        lm.release_all(t1);
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn exclusive_blocks_until_release() {
        let lm = Arc::new(LockManager::new());
        let t1 = TransactionId::new();
        let t2 = TransactionId::new();

        lm.acquire(t1, pid(0), Permission::ReadWrite).unwrap();

        let lm2 = Arc::clone(&lm);
        let (tx, rx) = mpsc::channel();
        let handle = thread::spawn(move || {
            lm2.acquire(t2, pid(0), Permission::ReadWrite).unwrap();
            tx.send(()).unwrap();
        });

        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
        lm.release(t1, pid(0));
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        handle.join().unwrap();
        assert!(lm.holds_lock(t2, pid(0)));
        assert!(!lm.holds_lock(t1, pid(0)));
    }

    #[test]
    fn upgrade_race_aborts_exactly_one() {
        let lm = Arc::new(LockManager::new());
        let t1 = TransactionId::new();
        let t2 = TransactionId::new();

        lm.acquire(t1, pid(0), Permission::ReadOnly).unwrap();
        lm.acquire(t2, pid(0), Permission::ReadOnly).unwrap();

        // t1's upgrade parks behind t2's shared lock.
        let lm1 = Arc::clone(&lm);
        let waiter = thread::spawn(move || lm1.acquire(t1, pid(0), Permission::ReadWrite));
        thread::sleep(Duration::from_millis(100));

        // t2's upgrade closes the cycle, so t2 is the victim.
        let err = lm.acquire(t2, pid(0), Permission::ReadWrite);
        assert!(matches!(err, Err(LockError::Deadlock)));

        // The victim aborts; the survivor's upgrade goes through.
        lm.release_all(t2);
        waiter.join().unwrap().unwrap();
        assert!(lm.holds_lock(t1, pid(0)));
    }

    #[test]
    fn release_all_frees_every_page() {
        let lm = LockManager::new();
        let t1 = TransactionId::new();

        for n in 0..5 {
            lm.acquire(t1, pid(n), Permission::ReadWrite).unwrap();
        }
        lm.release_all(t1);
        for n in 0..5 {
            assert!(!lm.holds_lock(t1, pid(n)));
        }
    }

    #[test]
    fn release_all_on_page_drops_every_holder() {
        let lm = LockManager::new();
        let t1 = TransactionId::new();
        let t2 = TransactionId::new();

        lm.acquire(t1, pid(0), Permission::ReadOnly).unwrap();
        lm.acquire(t2, pid(0), Permission::ReadOnly).unwrap();
        lm.release_all_on_page(pid(0));

        assert!(!lm.holds_lock(t1, pid(0)));
        assert!(!lm.holds_lock(t2, pid(0)));
    }
}
