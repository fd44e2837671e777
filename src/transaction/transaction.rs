use std::collections::HashSet;
use std::sync::Arc;

use crate::common::types::{Lsn, PageId, Rid, Tuple, TxnId, INVALID_LSN};
use crate::transaction::wal::log_manager::LogManager;
use crate::transaction::wal::log_record::LogRecord;

/// Two-phase locking lifecycle. A transaction grows until its first
/// unlock (or straight to a terminal state under strict 2PL).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Growing,
    Shrinking,
    Committed,
    Aborted,
}

/// An active transaction: its lock sets and the tail of its log-record
/// chain. Tree descents track their own latch path, so no page set lives
/// here.
pub struct Transaction {
    id: TxnId,
    state: TransactionState,
    shared_lock_set: HashSet<Rid>,
    exclusive_lock_set: HashSet<Rid>,
    log_manager: Option<Arc<LogManager>>,
    prev_lsn: Lsn,
}

impl Transaction {
    pub fn new(id: TxnId, log_manager: Option<Arc<LogManager>>) -> Self {
        Self {
            id,
            state: TransactionState::Growing,
            shared_lock_set: HashSet::new(),
            exclusive_lock_set: HashSet::new(),
            log_manager,
            prev_lsn: INVALID_LSN,
        }
    }

    pub fn id(&self) -> TxnId {
        self.id
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn set_state(&mut self, state: TransactionState) {
        self.state = state;
    }

    pub fn prev_lsn(&self) -> Lsn {
        self.prev_lsn
    }

    pub fn shared_lock_set(&self) -> &HashSet<Rid> {
        &self.shared_lock_set
    }

    pub fn exclusive_lock_set(&self) -> &HashSet<Rid> {
        &self.exclusive_lock_set
    }

    pub(crate) fn shared_lock_set_mut(&mut self) -> &mut HashSet<Rid> {
        &mut self.shared_lock_set
    }

    pub(crate) fn exclusive_lock_set_mut(&mut self) -> &mut HashSet<Rid> {
        &mut self.exclusive_lock_set
    }

    /// Append a BEGIN record. Called once by the transaction manager.
    pub(crate) fn log_begin(&mut self) -> Lsn {
        self.append(LogRecord::new_begin(self.id))
    }

    pub(crate) fn log_commit(&mut self) -> Lsn {
        self.append(LogRecord::new_commit(self.id, self.prev_lsn))
    }

    pub(crate) fn log_abort(&mut self) -> Lsn {
        self.append(LogRecord::new_abort(self.id, self.prev_lsn))
    }

    /// Log a tuple insert. Returns the LSN to stamp on the mutated page,
    /// or INVALID_LSN when logging is disabled.
    pub fn log_insert(&mut self, rid: Rid, tuple: &Tuple) -> Lsn {
        self.append(LogRecord::new_insert(
            self.id,
            self.prev_lsn,
            rid,
            tuple.clone(),
        ))
    }

    pub fn log_mark_delete(&mut self, rid: Rid, tuple: &Tuple) -> Lsn {
        self.append(LogRecord::new_mark_delete(
            self.id,
            self.prev_lsn,
            rid,
            tuple.clone(),
        ))
    }

    pub fn log_apply_delete(&mut self, rid: Rid, tuple: &Tuple) -> Lsn {
        self.append(LogRecord::new_apply_delete(
            self.id,
            self.prev_lsn,
            rid,
            tuple.clone(),
        ))
    }

    pub fn log_rollback_delete(&mut self, rid: Rid, tuple: &Tuple) -> Lsn {
        self.append(LogRecord::new_rollback_delete(
            self.id,
            self.prev_lsn,
            rid,
            tuple.clone(),
        ))
    }

    pub fn log_update(&mut self, rid: Rid, old_tuple: &Tuple, new_tuple: &Tuple) -> Lsn {
        self.append(LogRecord::new_update(
            self.id,
            self.prev_lsn,
            rid,
            old_tuple.clone(),
            new_tuple.clone(),
        ))
    }

    pub fn log_new_page(&mut self, page_id: PageId) -> Lsn {
        self.append(LogRecord::new_new_page(self.id, self.prev_lsn, page_id))
    }

    fn append(&mut self, mut record: LogRecord) -> Lsn {
        match &self.log_manager {
            Some(log_manager) => {
                let lsn = log_manager.append_record(&mut record);
                self.prev_lsn = lsn;
                lsn
            }
            None => INVALID_LSN,
        }
    }
}
