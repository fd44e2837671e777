use thiserror::Error;

use crate::common::types::PageId;
use crate::storage::disk::DiskManagerError;

#[derive(Error, Debug)]
pub enum BufferPoolError {
    #[error("Buffer pool is full: all frames are pinned")]
    BufferPoolFull,
    #[error("Page {0} not found in buffer pool")]
    PageNotFound(PageId),
    #[error("Page {0} is pinned")]
    PagePinned(PageId),
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
    #[error("Disk error: {0}")]
    Disk(#[from] DiskManagerError),
}

pub type Result<T> = std::result::Result<T, BufferPoolError>;
