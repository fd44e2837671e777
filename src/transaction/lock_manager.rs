//! Tuple-level lock manager using wait-die deadlock prevention: an older
//! transaction (smaller id) waits for a lock, a younger one aborts on the
//! spot. Each record id keeps a list whose front is the cluster of granted
//! entries; waiters sit behind it sorted by transaction id and are granted
//! strictly when they reach the head.

use std::collections::{HashMap, VecDeque};

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::common::config::StorageConfig;
use crate::common::types::{Rid, TxnId};
use crate::transaction::transaction::{Transaction, TransactionState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

#[derive(Debug, Clone, Copy)]
struct LockEntry {
    txn_id: TxnId,
    mode: LockMode,
    held: bool,
}

#[derive(Debug)]
struct LockList {
    entries: VecDeque<LockEntry>,
    /// Smallest txn id among held entries; wait-die compares against this.
    oldest: TxnId,
}

impl LockList {
    fn new(txn_id: TxnId, mode: LockMode) -> Self {
        let mut entries = VecDeque::new();
        entries.push_back(LockEntry {
            txn_id,
            mode,
            held: true,
        });
        Self {
            entries,
            oldest: txn_id,
        }
    }

    fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn head_is(&self, txn_id: TxnId) -> bool {
        self.entries.front().is_some_and(|e| e.txn_id == txn_id)
    }

    fn head_is_shared(&self) -> bool {
        self.entries
            .front()
            .is_some_and(|e| e.mode == LockMode::Shared)
    }

    fn holds(&self, txn_id: TxnId, mode: LockMode) -> bool {
        self.entries
            .iter()
            .any(|e| e.txn_id == txn_id && e.mode == mode && e.held)
    }

    /// Grant immediately, joining the held cluster at the front.
    fn grant_front(&mut self, txn_id: TxnId, mode: LockMode) {
        self.entries.push_front(LockEntry {
            txn_id,
            mode,
            held: true,
        });
        if txn_id < self.oldest {
            self.oldest = txn_id;
        }
    }

    /// Queue behind the held cluster, keeping waiters sorted by txn id so
    /// older transactions get the lock first.
    fn add_waiter(&mut self, txn_id: TxnId, mode: LockMode) {
        let entry = LockEntry {
            txn_id,
            mode,
            held: false,
        };
        let position = self
            .entries
            .iter()
            .position(|e| !e.held && e.txn_id > txn_id);
        match position {
            Some(i) => self.entries.insert(i, entry),
            None => self.entries.push_back(entry),
        }
    }

    /// Promote the head waiter to held.
    fn hold_head(&mut self, txn_id: TxnId) {
        let front = self.entries.front_mut().expect("empty lock list");
        debug_assert_eq!(front.txn_id, txn_id);
        front.held = true;
        self.recompute_oldest();
    }

    /// Remove a transaction's entry; reports (entry, was at head).
    fn remove(&mut self, txn_id: TxnId) -> Option<(LockEntry, bool)> {
        let position = self.entries.iter().position(|e| e.txn_id == txn_id)?;
        let entry = self.entries.remove(position)?;
        self.recompute_oldest();
        Some((entry, position == 0))
    }

    /// Oldest holder other than `txn_id`; what an upgrade dies against.
    fn oldest_other_holder(&self, txn_id: TxnId) -> Option<TxnId> {
        self.entries
            .iter()
            .filter(|e| e.held && e.txn_id != txn_id)
            .map(|e| e.txn_id)
            .min()
    }

    fn recompute_oldest(&mut self) {
        self.oldest = self
            .entries
            .iter()
            .filter(|e| e.held)
            .map(|e| e.txn_id)
            .min()
            .unwrap_or(TxnId::MAX);
    }
}

type LockTable = HashMap<Rid, LockList>;

/// The lock manager. One mutex over the whole table, one shared condition
/// variable; every waiter re-checks its own list head after each wakeup.
pub struct LockManager {
    strict_two_phase: bool,
    table: Mutex<LockTable>,
    waiters: Condvar,
}

impl LockManager {
    pub fn new(strict_two_phase: bool) -> Self {
        Self {
            strict_two_phase,
            table: Mutex::new(HashMap::new()),
            waiters: Condvar::new(),
        }
    }

    pub fn with_config(config: &StorageConfig) -> Self {
        Self::new(config.strict_two_phase)
    }

    /// Acquire a shared lock. Returns false when the transaction aborts,
    /// either because it is past its growing phase or because wait-die
    /// chose it as the victim.
    pub fn lock_shared(&self, txn: &mut Transaction, rid: Rid) -> bool {
        let mut table = self.table.lock();
        if !Self::ensure_growable(txn) {
            return false;
        }

        match table.get_mut(&rid) {
            None => {
                table.insert(rid, LockList::new(txn.id(), LockMode::Shared));
                txn.shared_lock_set_mut().insert(rid);
                true
            }
            Some(list) if list.head_is_shared() => {
                list.grant_front(txn.id(), LockMode::Shared);
                txn.shared_lock_set_mut().insert(rid);
                true
            }
            Some(list) => {
                // Head holds exclusive: wait-die.
                if txn.id() > list.oldest {
                    txn.set_state(TransactionState::Aborted);
                    return false;
                }
                list.add_waiter(txn.id(), LockMode::Shared);
                self.wait_until_head(&mut table, txn.id(), rid);
                table
                    .get_mut(&rid)
                    .expect("lock list vanished while waiting")
                    .hold_head(txn.id());
                txn.shared_lock_set_mut().insert(rid);
                true
            }
        }
    }

    /// Acquire an exclusive lock. Any existing entry is incompatible, so
    /// a populated list always goes through wait-die.
    pub fn lock_exclusive(&self, txn: &mut Transaction, rid: Rid) -> bool {
        let mut table = self.table.lock();
        if !Self::ensure_growable(txn) {
            return false;
        }

        match table.get_mut(&rid) {
            None => {
                table.insert(rid, LockList::new(txn.id(), LockMode::Exclusive));
                txn.exclusive_lock_set_mut().insert(rid);
                true
            }
            Some(list) => {
                if txn.id() > list.oldest {
                    txn.set_state(TransactionState::Aborted);
                    return false;
                }
                list.add_waiter(txn.id(), LockMode::Exclusive);
                self.wait_until_head(&mut table, txn.id(), rid);
                table
                    .get_mut(&rid)
                    .expect("lock list vanished while waiting")
                    .hold_head(txn.id());
                txn.exclusive_lock_set_mut().insert(rid);
                true
            }
        }
    }

    /// Upgrade a held shared lock to exclusive. The upgrader re-enters the
    /// waiting region with no special priority, dying against the oldest
    /// of the other holders like any fresh exclusive request would.
    pub fn lock_upgrade(&self, txn: &mut Transaction, rid: Rid) -> bool {
        let mut table = self.table.lock();
        if !Self::ensure_growable(txn) {
            return false;
        }

        let list = match table.get_mut(&rid) {
            Some(list) if list.holds(txn.id(), LockMode::Shared) => list,
            _ => return false,
        };

        if let Some(oldest_other) = list.oldest_other_holder(txn.id()) {
            if txn.id() > oldest_other {
                txn.set_state(TransactionState::Aborted);
                return false;
            }
        }

        let (_, was_head) = list.remove(txn.id()).expect("held entry disappeared");
        txn.shared_lock_set_mut().remove(&rid);
        list.add_waiter(txn.id(), LockMode::Exclusive);
        if was_head {
            // The shared slot we gave up may make a new head grantable.
            self.waiters.notify_all();
        }

        self.wait_until_head(&mut table, txn.id(), rid);
        table
            .get_mut(&rid)
            .expect("lock list vanished while waiting")
            .hold_head(txn.id());
        txn.exclusive_lock_set_mut().insert(rid);
        true
    }

    /// Release a lock. Under strict 2PL this is only legal once the
    /// transaction is committed or aborted; violating that aborts it.
    pub fn unlock(&self, txn: &mut Transaction, rid: Rid) -> bool {
        let mut table = self.table.lock();

        if self.strict_two_phase {
            if !matches!(
                txn.state(),
                TransactionState::Committed | TransactionState::Aborted
            ) {
                txn.set_state(TransactionState::Aborted);
                return false;
            }
        } else if txn.state() == TransactionState::Growing {
            txn.set_state(TransactionState::Shrinking);
        }

        let list = match table.get_mut(&rid) {
            Some(list) => list,
            None => return false,
        };
        let (entry, was_head) = match list.remove(txn.id()) {
            Some(removed) => removed,
            None => return false,
        };
        txn.shared_lock_set_mut().remove(&rid);
        txn.exclusive_lock_set_mut().remove(&rid);
        if list.is_empty() {
            table.remove(&rid);
        }

        // A departing exclusive holder or a new head can make the next
        // waiter grantable.
        if entry.mode == LockMode::Exclusive || was_head {
            self.waiters.notify_all();
        }
        true
    }

    fn wait_until_head(&self, table: &mut MutexGuard<'_, LockTable>, txn_id: TxnId, rid: Rid) {
        loop {
            if table.get(&rid).is_some_and(|list| list.head_is(txn_id)) {
                return;
            }
            self.waiters.wait(table);
        }
    }

    fn ensure_growable(txn: &mut Transaction) -> bool {
        match txn.state() {
            TransactionState::Growing => true,
            TransactionState::Shrinking => {
                txn.set_state(TransactionState::Aborted);
                false
            }
            TransactionState::Committed | TransactionState::Aborted => false,
        }
    }
}
