//! Log records with a fixed 20-byte header followed by a type-dependent
//! payload:
//!
//! ```text
//! size (4) | lsn (4) | txn-id (4) | prev-lsn (4) | type (4)
//! ```
//!
//! Tuple payloads carry an 8-byte RID and length-prefixed tuple bytes;
//! UPDATE carries both images; NEWPAGE carries the id of the page that was
//! formatted. BEGIN/COMMIT/ABORT are header-only.

use byteorder::{ByteOrder, LittleEndian};

use crate::common::types::{Lsn, PageId, Rid, Tuple, TxnId, INVALID_LSN};

/// Size of the fixed record header.
pub const HEADER_SIZE: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogRecordType {
    Invalid = 0,
    Insert = 1,
    MarkDelete = 2,
    ApplyDelete = 3,
    RollbackDelete = 4,
    Update = 5,
    Begin = 6,
    Commit = 7,
    Abort = 8,
    NewPage = 9,
}

impl LogRecordType {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            1 => Some(LogRecordType::Insert),
            2 => Some(LogRecordType::MarkDelete),
            3 => Some(LogRecordType::ApplyDelete),
            4 => Some(LogRecordType::RollbackDelete),
            5 => Some(LogRecordType::Update),
            6 => Some(LogRecordType::Begin),
            7 => Some(LogRecordType::Commit),
            8 => Some(LogRecordType::Abort),
            9 => Some(LogRecordType::NewPage),
            _ => None,
        }
    }
}

/// Type-dependent portion of a record.
#[derive(Debug, Clone, PartialEq)]
pub enum LogPayload {
    /// BEGIN/COMMIT/ABORT carry no payload
    Control,
    /// INSERT and the three delete flavors: the affected tuple
    TupleOp { rid: Rid, tuple: Tuple },
    /// UPDATE: before and after images
    Update {
        rid: Rid,
        old_tuple: Tuple,
        new_tuple: Tuple,
    },
    /// NEWPAGE: the page that was formatted
    NewPage { page_id: PageId },
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub size: u32,
    pub lsn: Lsn,
    pub txn_id: TxnId,
    pub prev_lsn: Lsn,
    pub record_type: LogRecordType,
    pub payload: LogPayload,
}

impl LogRecord {
    fn new(txn_id: TxnId, prev_lsn: Lsn, record_type: LogRecordType, payload: LogPayload) -> Self {
        let payload_size = match &payload {
            LogPayload::Control => 0,
            LogPayload::TupleOp { tuple, .. } => Rid::ENCODED_SIZE + tuple.serialized_size(),
            LogPayload::Update {
                old_tuple,
                new_tuple,
                ..
            } => Rid::ENCODED_SIZE + old_tuple.serialized_size() + new_tuple.serialized_size(),
            LogPayload::NewPage { .. } => 4,
        };
        Self {
            size: (HEADER_SIZE + payload_size) as u32,
            lsn: INVALID_LSN,
            txn_id,
            prev_lsn,
            record_type,
            payload,
        }
    }

    pub fn new_begin(txn_id: TxnId) -> Self {
        Self::new(txn_id, INVALID_LSN, LogRecordType::Begin, LogPayload::Control)
    }

    pub fn new_commit(txn_id: TxnId, prev_lsn: Lsn) -> Self {
        Self::new(txn_id, prev_lsn, LogRecordType::Commit, LogPayload::Control)
    }

    pub fn new_abort(txn_id: TxnId, prev_lsn: Lsn) -> Self {
        Self::new(txn_id, prev_lsn, LogRecordType::Abort, LogPayload::Control)
    }

    pub fn new_insert(txn_id: TxnId, prev_lsn: Lsn, rid: Rid, tuple: Tuple) -> Self {
        Self::new(
            txn_id,
            prev_lsn,
            LogRecordType::Insert,
            LogPayload::TupleOp { rid, tuple },
        )
    }

    pub fn new_mark_delete(txn_id: TxnId, prev_lsn: Lsn, rid: Rid, tuple: Tuple) -> Self {
        Self::new(
            txn_id,
            prev_lsn,
            LogRecordType::MarkDelete,
            LogPayload::TupleOp { rid, tuple },
        )
    }

    pub fn new_apply_delete(txn_id: TxnId, prev_lsn: Lsn, rid: Rid, tuple: Tuple) -> Self {
        Self::new(
            txn_id,
            prev_lsn,
            LogRecordType::ApplyDelete,
            LogPayload::TupleOp { rid, tuple },
        )
    }

    pub fn new_rollback_delete(txn_id: TxnId, prev_lsn: Lsn, rid: Rid, tuple: Tuple) -> Self {
        Self::new(
            txn_id,
            prev_lsn,
            LogRecordType::RollbackDelete,
            LogPayload::TupleOp { rid, tuple },
        )
    }

    pub fn new_update(
        txn_id: TxnId,
        prev_lsn: Lsn,
        rid: Rid,
        old_tuple: Tuple,
        new_tuple: Tuple,
    ) -> Self {
        Self::new(
            txn_id,
            prev_lsn,
            LogRecordType::Update,
            LogPayload::Update {
                rid,
                old_tuple,
                new_tuple,
            },
        )
    }

    pub fn new_new_page(txn_id: TxnId, prev_lsn: Lsn, page_id: PageId) -> Self {
        Self::new(
            txn_id,
            prev_lsn,
            LogRecordType::NewPage,
            LogPayload::NewPage { page_id },
        )
    }

    /// Serialize header then payload. `buf` must hold at least `size` bytes.
    pub fn serialize_into(&self, buf: &mut [u8]) {
        debug_assert!(buf.len() >= self.size as usize);
        LittleEndian::write_u32(&mut buf[0..4], self.size);
        LittleEndian::write_u32(&mut buf[4..8], self.lsn);
        LittleEndian::write_u32(&mut buf[8..12], self.txn_id);
        LittleEndian::write_u32(&mut buf[12..16], self.prev_lsn);
        LittleEndian::write_u32(&mut buf[16..20], self.record_type as u32);

        let mut pos = HEADER_SIZE;
        match &self.payload {
            LogPayload::Control => {}
            LogPayload::TupleOp { rid, tuple } => {
                rid.write_to(&mut buf[pos..pos + Rid::ENCODED_SIZE]);
                pos += Rid::ENCODED_SIZE;
                tuple.serialize_into(&mut buf[pos..pos + tuple.serialized_size()]);
            }
            LogPayload::Update {
                rid,
                old_tuple,
                new_tuple,
            } => {
                rid.write_to(&mut buf[pos..pos + Rid::ENCODED_SIZE]);
                pos += Rid::ENCODED_SIZE;
                old_tuple.serialize_into(&mut buf[pos..pos + old_tuple.serialized_size()]);
                pos += old_tuple.serialized_size();
                new_tuple.serialize_into(&mut buf[pos..pos + new_tuple.serialized_size()]);
            }
            LogPayload::NewPage { page_id } => {
                LittleEndian::write_u32(&mut buf[pos..pos + 4], *page_id);
            }
        }
    }

    /// Deserialize one record from the front of `buf`. Returns None on an
    /// invalid or truncated record, which recovery treats as the end of
    /// the current window.
    pub fn deserialize(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_SIZE {
            return None;
        }
        let size = LittleEndian::read_u32(&buf[0..4]);
        let lsn = LittleEndian::read_u32(&buf[4..8]);
        let txn_id = LittleEndian::read_u32(&buf[8..12]);
        let prev_lsn = LittleEndian::read_u32(&buf[12..16]);
        let record_type = LogRecordType::from_u32(LittleEndian::read_u32(&buf[16..20]))?;

        if lsn == INVALID_LSN || (size as usize) < HEADER_SIZE || (size as usize) > buf.len() {
            return None;
        }

        let body = &buf[HEADER_SIZE..size as usize];
        let payload = match record_type {
            LogRecordType::Begin | LogRecordType::Commit | LogRecordType::Abort => {
                LogPayload::Control
            }
            LogRecordType::Insert
            | LogRecordType::MarkDelete
            | LogRecordType::ApplyDelete
            | LogRecordType::RollbackDelete => {
                if body.len() < Rid::ENCODED_SIZE {
                    return None;
                }
                let rid = Rid::read_from(&body[..Rid::ENCODED_SIZE]);
                let tuple = Tuple::deserialize_from(&body[Rid::ENCODED_SIZE..])?;
                LogPayload::TupleOp { rid, tuple }
            }
            LogRecordType::Update => {
                if body.len() < Rid::ENCODED_SIZE {
                    return None;
                }
                let rid = Rid::read_from(&body[..Rid::ENCODED_SIZE]);
                let rest = &body[Rid::ENCODED_SIZE..];
                let old_tuple = Tuple::deserialize_from(rest)?;
                let new_tuple = Tuple::deserialize_from(&rest[old_tuple.serialized_size()..])?;
                LogPayload::Update {
                    rid,
                    old_tuple,
                    new_tuple,
                }
            }
            LogRecordType::NewPage => {
                if body.len() < 4 {
                    return None;
                }
                LogPayload::NewPage {
                    page_id: LittleEndian::read_u32(&body[0..4]),
                }
            }
            LogRecordType::Invalid => return None,
        };

        Some(Self {
            size,
            lsn,
            txn_id,
            prev_lsn,
            record_type,
            payload,
        })
    }
}
