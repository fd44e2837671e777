use thiserror::Error;

use crate::storage::buffer::BufferPoolError;

#[derive(Error, Debug)]
pub enum BTreeError {
    #[error("Buffer pool error: {0}")]
    BufferPool(#[from] BufferPoolError),
    #[error("Index corrupted: {0}")]
    Corrupt(String),
}

pub type Result<T> = std::result::Result<T, BTreeError>;
