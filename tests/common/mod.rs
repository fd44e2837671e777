use std::sync::Arc;

use anyhow::Result;
use tempfile::NamedTempFile;

use araldb::{BufferPoolManager, DiskManager};

// Create a temporary database file for testing
#[allow(dead_code)]
pub fn create_temp_db_file() -> Result<(NamedTempFile, String)> {
    let file = NamedTempFile::new()?;
    let path = file.path().to_str().unwrap().to_string();
    Ok((file, path))
}

// Create a buffer pool manager with a temporary database, logging off
#[allow(dead_code)]
pub fn create_test_buffer_pool(pool_size: usize) -> Result<(Arc<BufferPoolManager>, NamedTempFile)> {
    let (file, path) = create_temp_db_file()?;
    let buffer_pool = Arc::new(BufferPoolManager::new(pool_size, path)?);
    Ok((buffer_pool, file))
}

// Reopen an engine over an existing database file, as a restart would
#[allow(dead_code)]
pub fn reopen_engine(
    path: &str,
    pool_size: usize,
) -> Result<(Arc<DiskManager>, Arc<BufferPoolManager>)> {
    let disk = Arc::new(DiskManager::new(path)?);
    let buffer_pool = Arc::new(BufferPoolManager::with_disk_manager(
        pool_size,
        pool_size,
        Arc::clone(&disk),
        None,
    ));
    Ok((disk, buffer_pool))
}
