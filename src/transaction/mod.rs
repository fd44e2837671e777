pub mod lock_manager;
pub mod manager;
pub mod transaction;
pub mod wal;

pub use lock_manager::{LockManager, LockMode};
pub use manager::TransactionManager;
pub use transaction::{Transaction, TransactionState};
