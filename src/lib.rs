//! # araldb storage engine
//!
//! The storage core of an educational relational database: a paged disk
//! manager, a concurrent buffer pool with LRU replacement, a latch-coupled
//! B+ tree index, a tuple-level lock manager with wait-die deadlock
//! prevention, a write-ahead log with a background flusher, and
//! redo/undo crash recovery.

pub mod common;
pub mod index;
pub mod storage;
pub mod transaction;

// Re-export key items for convenient access
pub use common::config::StorageConfig;
pub use index::btree::BPlusTree;
pub use storage::buffer::{BufferPoolError, BufferPoolManager};
pub use storage::disk::DiskManager;
pub use transaction::lock_manager::LockManager;
pub use transaction::manager::TransactionManager;
pub use transaction::transaction::{Transaction, TransactionState};
pub use transaction::wal::log_manager::LogManager;
pub use transaction::wal::recovery::LogRecovery;
