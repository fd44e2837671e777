use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::transaction::lock_manager::LockManager;
use crate::transaction::transaction::{Transaction, TransactionState};
use crate::transaction::wal::log_manager::LogManager;

/// Hands out transactions and drives the primitive begin/commit/abort
/// lifecycle. Commit forces the log before the transaction's locks go, so
/// a committed transaction is durable by the time its effects become
/// visible to others.
pub struct TransactionManager {
    next_txn_id: AtomicU32,
    log_manager: Option<Arc<LogManager>>,
    lock_manager: Arc<LockManager>,
}

impl TransactionManager {
    pub fn new(log_manager: Option<Arc<LogManager>>, lock_manager: Arc<LockManager>) -> Self {
        Self {
            next_txn_id: AtomicU32::new(1),
            log_manager,
            lock_manager,
        }
    }

    pub fn lock_manager(&self) -> &Arc<LockManager> {
        &self.lock_manager
    }

    /// Start a transaction with the next dense id and a BEGIN record.
    pub fn begin(&self) -> Transaction {
        let txn_id = self.next_txn_id.fetch_add(1, Ordering::SeqCst);
        let mut txn = Transaction::new(txn_id, self.log_manager.clone());
        txn.log_begin();
        txn
    }

    /// Commit: COMMIT record, synchronous log flush, then release every
    /// lock the transaction holds.
    pub fn commit(&self, txn: &mut Transaction) {
        txn.log_commit();
        if let Some(log_manager) = &self.log_manager {
            log_manager.force_flush();
        }
        txn.set_state(TransactionState::Committed);
        self.release_locks(txn);
    }

    /// Abort: ABORT record and lock release. Reverting the transaction's
    /// data effects is the recovery path's job.
    pub fn abort(&self, txn: &mut Transaction) {
        txn.log_abort();
        txn.set_state(TransactionState::Aborted);
        self.release_locks(txn);
    }

    fn release_locks(&self, txn: &mut Transaction) {
        let rids: Vec<_> = txn
            .shared_lock_set()
            .iter()
            .chain(txn.exclusive_lock_set().iter())
            .copied()
            .collect();
        for rid in rids {
            self.lock_manager.unlock(txn, rid);
        }
    }
}
