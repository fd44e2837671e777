use std::time::Duration;

use crate::common::types::PAGE_SIZE;

/// Engine-wide tuning knobs. Components take the pieces they need at
/// construction time; nothing reads global mutable state.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Number of frames in the buffer pool
    pub pool_size: usize,

    /// Initial capacity of the page-id to frame mapping
    pub bucket_size: usize,

    /// Size of each of the two log buffers in bytes
    pub log_buffer_size: usize,

    /// Deadline for the background log flusher
    pub log_timeout: Duration,

    /// Enforce strict two-phase locking in the lock manager
    pub strict_two_phase: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            pool_size: 64,
            bucket_size: 64,
            log_buffer_size: (64 + 1) * PAGE_SIZE,
            log_timeout: Duration::from_millis(300),
            strict_two_phase: true,
        }
    }
}
