//! Crash recovery: a forward redo pass over the whole log, then a
//! backward undo pass over every transaction that never reached COMMIT or
//! ABORT.

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, info, warn};
use thiserror::Error;

use crate::common::types::{Lsn, TxnId, INVALID_LSN, INVALID_PAGE_ID};
use crate::storage::buffer::error::BufferPoolError;
use crate::storage::buffer::BufferPoolManager;
use crate::storage::disk::{DiskManager, DiskManagerError};
use crate::storage::page::table_page;
use crate::storage::page::table_page::PageError;
use crate::transaction::wal::log_record::{LogPayload, LogRecord, LogRecordType};

#[derive(Error, Debug)]
pub enum RecoveryError {
    #[error("Disk error: {0}")]
    Disk(#[from] DiskManagerError),
    #[error("Buffer pool error: {0}")]
    BufferPool(#[from] BufferPoolError),
    #[error("Page error: {0}")]
    Page(#[from] PageError),
    #[error("Corrupt log: {0}")]
    CorruptLog(String),
}

pub type Result<T> = std::result::Result<T, RecoveryError>;

/// Replays the log against the buffer pool after a crash. Holds the
/// active-transaction table (txn id → its last LSN) and the LSN → file
/// offset map that the undo pass navigates by.
pub struct LogRecovery {
    disk_manager: Arc<DiskManager>,
    buffer_pool: Arc<BufferPoolManager>,
    active_txn: HashMap<TxnId, Lsn>,
    lsn_mapping: HashMap<Lsn, u64>,
    log_buffer: Vec<u8>,
}

impl LogRecovery {
    pub fn new(
        disk_manager: Arc<DiskManager>,
        buffer_pool: Arc<BufferPoolManager>,
        log_buffer_size: usize,
    ) -> Self {
        Self {
            disk_manager,
            buffer_pool,
            active_txn: HashMap::new(),
            lsn_mapping: HashMap::new(),
            log_buffer: vec![0u8; log_buffer_size],
        }
    }

    /// Transactions with no COMMIT/ABORT in the log, mapped to their last
    /// LSN. Populated by `redo`.
    pub fn active_transactions(&self) -> &HashMap<TxnId, Lsn> {
        &self.active_txn
    }

    /// Forward pass: scan the log from offset 0 in windows, rebuild the
    /// active-transaction and LSN-offset tables, and reapply every data
    /// record the page does not already reflect. Reapplied pages get the
    /// record's LSN stamped, so running redo twice is a no-op the second
    /// time.
    pub fn redo(&mut self) -> Result<()> {
        info!("recovery: redo pass");
        self.active_txn.clear();
        self.lsn_mapping.clear();

        let mut offset = 0u64;
        while self.disk_manager.read_log(&mut self.log_buffer, offset)? {
            let mut pos = 0usize;
            while let Some(record) = LogRecord::deserialize(&self.log_buffer[pos..]) {
                self.lsn_mapping.insert(record.lsn, offset + pos as u64);
                pos += record.size as usize;

                match record.record_type {
                    LogRecordType::Begin => {
                        self.active_txn.insert(record.txn_id, record.lsn);
                    }
                    LogRecordType::Commit | LogRecordType::Abort => {
                        self.active_txn.remove(&record.txn_id);
                    }
                    _ => {
                        self.active_txn.insert(record.txn_id, record.lsn);
                        self.redo_record(&record)?;
                    }
                }
            }
            if pos == 0 {
                // Nothing in this window parses: truncated tail.
                break;
            }
            offset += pos as u64;
        }

        debug!(
            "redo complete: {} records mapped, {} loser txns",
            self.lsn_mapping.len(),
            self.active_txn.len()
        );
        Ok(())
    }

    /// Backward pass: for every loser transaction, walk its prev-LSN chain
    /// applying inverse operations until its BEGIN record.
    pub fn undo(&mut self) -> Result<()> {
        info!("recovery: undo pass, {} loser txns", self.active_txn.len());

        let losers: Vec<(TxnId, Lsn)> =
            self.active_txn.iter().map(|(&t, &l)| (t, l)).collect();
        for (txn_id, last_lsn) in losers {
            debug!("undoing txn {} from lsn {}", txn_id, last_lsn);
            let mut lsn = last_lsn;
            while lsn != INVALID_LSN {
                let record = self.read_record_at(lsn)?;
                if record.record_type == LogRecordType::Begin {
                    break;
                }
                self.undo_record(&record)?;
                lsn = record.prev_lsn;
            }
        }
        Ok(())
    }

    /// Reapply a data record unless the page already carries its effect.
    fn redo_record(&mut self, record: &LogRecord) -> Result<()> {
        let target_page = match &record.payload {
            LogPayload::TupleOp { rid, .. } => rid.page_id,
            LogPayload::Update { rid, .. } => rid.page_id,
            LogPayload::NewPage { page_id } => *page_id,
            LogPayload::Control => return Ok(()),
        };

        let page_ptr = self.buffer_pool.fetch_page(target_page)?;
        let mut page = page_ptr.write();
        if page.lsn() >= record.lsn {
            // Effect already durable before the crash.
            drop(page);
            self.buffer_pool.unpin_page(target_page, false)?;
            return Ok(());
        }

        let result = match (record.record_type, &record.payload) {
            (LogRecordType::Insert, LogPayload::TupleOp { rid, tuple }) => {
                table_page::insert_tuple_at(&mut page, rid.slot, tuple)
            }
            (LogRecordType::MarkDelete, LogPayload::TupleOp { rid, .. }) => {
                table_page::mark_delete(&mut page, rid.slot)
            }
            (LogRecordType::ApplyDelete, LogPayload::TupleOp { rid, .. }) => {
                table_page::apply_delete(&mut page, rid.slot)
            }
            (LogRecordType::RollbackDelete, LogPayload::TupleOp { rid, .. }) => {
                table_page::rollback_delete(&mut page, rid.slot)
            }
            (LogRecordType::Update, LogPayload::Update { rid, new_tuple, .. }) => {
                table_page::update_tuple(&mut page, rid.slot, new_tuple)
            }
            (LogRecordType::NewPage, LogPayload::NewPage { page_id }) => {
                table_page::init(&mut page, *page_id, INVALID_PAGE_ID);
                Ok(())
            }
            _ => {
                return Err(RecoveryError::CorruptLog(format!(
                    "payload does not match record type at lsn {}",
                    record.lsn
                )))
            }
        };

        if result.is_ok() {
            page.set_lsn(record.lsn);
        }
        drop(page);
        self.buffer_pool.unpin_page(target_page, result.is_ok())?;
        result.map_err(RecoveryError::from)
    }

    /// Apply the inverse of one data record, skipping it when the forward
    /// effect never reached the page.
    fn undo_record(&mut self, record: &LogRecord) -> Result<()> {
        let target_page = match &record.payload {
            LogPayload::TupleOp { rid, .. } => rid.page_id,
            LogPayload::Update { rid, .. } => rid.page_id,
            // A formatted page with no surviving tuples needs no inverse;
            // its space is tombstoned.
            LogPayload::NewPage { .. } => return Ok(()),
            LogPayload::Control => return Ok(()),
        };

        let page_ptr = self.buffer_pool.fetch_page(target_page)?;
        let mut page = page_ptr.write();
        if page.lsn() < record.lsn {
            // The forward effect was never persisted; nothing to revert.
            drop(page);
            self.buffer_pool.unpin_page(target_page, false)?;
            return Ok(());
        }

        let result = match (record.record_type, &record.payload) {
            // insert ↔ apply-delete
            (LogRecordType::Insert, LogPayload::TupleOp { rid, .. }) => {
                table_page::apply_delete(&mut page, rid.slot)
            }
            (LogRecordType::ApplyDelete, LogPayload::TupleOp { rid, tuple }) => {
                table_page::insert_tuple_at(&mut page, rid.slot, tuple)
            }
            // mark-delete ↔ rollback-delete
            (LogRecordType::MarkDelete, LogPayload::TupleOp { rid, .. }) => {
                table_page::rollback_delete(&mut page, rid.slot)
            }
            (LogRecordType::RollbackDelete, LogPayload::TupleOp { rid, .. }) => {
                table_page::mark_delete(&mut page, rid.slot)
            }
            // update(old, new) ↔ update(new, old)
            (LogRecordType::Update, LogPayload::Update { rid, old_tuple, .. }) => {
                table_page::update_tuple(&mut page, rid.slot, old_tuple)
            }
            _ => {
                return Err(RecoveryError::CorruptLog(format!(
                    "payload does not match record type at lsn {}",
                    record.lsn
                )))
            }
        };
        drop(page);
        self.buffer_pool.unpin_page(target_page, result.is_ok())?;
        result.map_err(RecoveryError::from)
    }

    /// Locate and deserialize the record with the given LSN using the
    /// offset map built during redo.
    fn read_record_at(&mut self, lsn: Lsn) -> Result<LogRecord> {
        let offset = match self.lsn_mapping.get(&lsn) {
            Some(&offset) => offset,
            None => {
                warn!("lsn {} missing from offset map", lsn);
                return Err(RecoveryError::CorruptLog(format!(
                    "no offset recorded for lsn {}",
                    lsn
                )));
            }
        };
        if !self.disk_manager.read_log(&mut self.log_buffer, offset)? {
            return Err(RecoveryError::CorruptLog(format!(
                "log truncated at offset {}",
                offset
            )));
        }
        LogRecord::deserialize(&self.log_buffer)
            .ok_or_else(|| RecoveryError::CorruptLog(format!("unreadable record at lsn {}", lsn)))
    }
}
