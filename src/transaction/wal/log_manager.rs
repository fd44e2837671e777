//! Group-commit log manager. Records accumulate in an active in-memory
//! buffer; a background flusher swaps it against a second buffer of the
//! same size and writes the captured bytes out, so appenders never wait on
//! disk unless the active buffer is full.

use std::mem;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

use log::{debug, error};
use parking_lot::{Condvar, Mutex};

use crate::common::config::StorageConfig;
use crate::common::types::{Lsn, INVALID_LSN};
use crate::storage::disk::DiskManager;
use crate::transaction::wal::log_record::LogRecord;

/// State guarded by the log mutex: the active buffer, the append cursor,
/// and the LSN counter.
struct LogCore {
    buffer: Vec<u8>,
    offset: usize,
    next_lsn: Lsn,
    flush_requested: bool,
}

/// Manager for the write-ahead log. Owning one means logging is enabled;
/// components that run without logging hold `None` instead.
pub struct LogManager {
    disk_manager: Arc<DiskManager>,
    buffer_capacity: usize,
    timeout: Duration,
    core: Mutex<LogCore>,
    /// Wakes the flusher before its deadline
    flusher_cv: Condvar,
    /// Wakes appenders blocked on a full buffer
    space_cv: Condvar,
    /// Wakes force-flush callers when the durable LSN advances
    persist_cv: Condvar,
    persistent_lsn: AtomicU32,
    running: AtomicBool,
    flush_thread: Mutex<Option<JoinHandle<()>>>,
}

impl LogManager {
    /// Open the log over `disk_manager` and start the background flusher.
    /// Picks up the LSN counter from whatever the log file already holds,
    /// so a restarted engine keeps assigning fresh LSNs.
    pub fn new(
        disk_manager: Arc<DiskManager>,
        buffer_capacity: usize,
        timeout: Duration,
    ) -> Arc<Self> {
        let max_lsn = Self::scan_max_lsn(&disk_manager, buffer_capacity);

        let manager = Arc::new(Self {
            disk_manager,
            buffer_capacity,
            timeout,
            core: Mutex::new(LogCore {
                buffer: vec![0u8; buffer_capacity],
                offset: 0,
                next_lsn: max_lsn + 1,
                flush_requested: false,
            }),
            flusher_cv: Condvar::new(),
            space_cv: Condvar::new(),
            persist_cv: Condvar::new(),
            persistent_lsn: AtomicU32::new(max_lsn),
            running: AtomicBool::new(true),
            flush_thread: Mutex::new(None),
        });

        // The worker holds only a weak reference, so dropping the last
        // user-held Arc stops the loop even without an explicit shutdown.
        let worker = Arc::downgrade(&manager);
        let handle = std::thread::Builder::new()
            .name("wal-flusher".to_string())
            .spawn(move || Self::flusher_main(worker, buffer_capacity))
            .expect("failed to spawn wal flusher");
        *manager.flush_thread.lock() = Some(handle);
        manager
    }

    /// Open with the engine-wide configuration knobs.
    pub fn with_config(disk_manager: Arc<DiskManager>, config: &StorageConfig) -> Arc<Self> {
        Self::new(disk_manager, config.log_buffer_size, config.log_timeout)
    }

    /// Append a record, assigning its LSN. Blocks while the active buffer
    /// cannot take the record, signalling the flusher to drain it.
    /// Records are assigned LSNs in the order calls enter here.
    pub fn append_record(&self, record: &mut LogRecord) -> Lsn {
        let size = record.size as usize;
        debug_assert!(size <= self.buffer_capacity, "record exceeds log buffer");

        let mut core = self.core.lock();
        while size > self.buffer_capacity - core.offset {
            core.flush_requested = true;
            self.flusher_cv.notify_one();
            self.space_cv.wait(&mut core);
        }

        record.lsn = core.next_lsn;
        core.next_lsn += 1;
        let offset = core.offset;
        record.serialize_into(&mut core.buffer[offset..offset + size]);
        core.offset += size;
        record.lsn
    }

    /// Block until every record appended so far is durable.
    pub fn force_flush(&self) {
        let target = self.core.lock().next_lsn - 1;
        self.flush_until(target);
    }

    /// Block until `persistent_lsn >= target`. The buffer pool calls this
    /// before writing back a page whose LSN is past the durable horizon.
    pub fn flush_until(&self, target: Lsn) {
        if target == INVALID_LSN {
            return;
        }
        let mut core = self.core.lock();
        while self.persistent_lsn.load(Ordering::SeqCst) < target {
            core.flush_requested = true;
            self.flusher_cv.notify_one();
            self.persist_cv.wait(&mut core);
        }
    }

    /// Greatest LSN whose bytes are on disk. Monotone.
    pub fn persistent_lsn(&self) -> Lsn {
        self.persistent_lsn.load(Ordering::SeqCst)
    }

    /// The LSN the next appended record will receive.
    pub fn next_lsn(&self) -> Lsn {
        self.core.lock().next_lsn
    }

    /// Stop the flusher after a final drain. Idempotent; also runs on drop.
    pub fn shutdown(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        {
            let mut core = self.core.lock();
            core.flush_requested = true;
        }
        self.flusher_cv.notify_one();
        if let Some(handle) = self.flush_thread.lock().take() {
            // The last Arc can be dropped by the flusher itself; it must
            // not try to join its own thread.
            if handle.thread().id() != std::thread::current().id() {
                let _ = handle.join();
            }
        }
    }

    fn flusher_main(worker: Weak<Self>, buffer_capacity: usize) {
        let mut flush_buffer = vec![0u8; buffer_capacity];
        loop {
            let manager = match worker.upgrade() {
                Some(manager) => manager,
                None => break,
            };
            let keep_running = manager.flusher_round(&mut flush_buffer);
            drop(manager);
            if !keep_running {
                break;
            }
        }
        debug!("log flusher stopped");
    }

    /// One round per deadline or demand: capture the active buffer under
    /// the mutex, write it outside, then publish the new durable LSN.
    fn flusher_round(&self, flush_buffer: &mut Vec<u8>) -> bool {
        let mut core = self.core.lock();
        if self.running.load(Ordering::SeqCst) && !core.flush_requested {
            let timed_out = self
                .flusher_cv
                .wait_for(&mut core, self.timeout)
                .timed_out();
            if timed_out {
                debug!("log flusher deadline");
            }
        }

        let flush_size = core.offset;
        let flush_lsn = core.next_lsn - 1;
        if flush_size > 0 {
            mem::swap(&mut core.buffer, flush_buffer);
            core.offset = 0;
        }
        core.flush_requested = false;
        drop(core);
        self.space_cv.notify_all();

        if flush_size > 0 {
            if let Err(e) = self.disk_manager.write_log(&flush_buffer[..flush_size]) {
                error!("log flush failed: {}", e);
                return self.running.load(Ordering::SeqCst);
            }
        }

        if flush_lsn > self.persistent_lsn.load(Ordering::SeqCst) {
            let _guard = self.core.lock();
            self.persistent_lsn.store(flush_lsn, Ordering::SeqCst);
        }
        self.persist_cv.notify_all();

        self.running.load(Ordering::SeqCst) || self.core.lock().offset > 0
    }

    /// Find the largest LSN already in the log file so the counter resumes
    /// past it after a restart.
    fn scan_max_lsn(disk_manager: &DiskManager, buffer_capacity: usize) -> Lsn {
        let mut buf = vec![0u8; buffer_capacity];
        let mut max_lsn = INVALID_LSN;
        let mut offset = 0u64;
        while let Ok(true) = disk_manager.read_log(&mut buf, offset) {
            let mut pos = 0usize;
            while let Some(record) = LogRecord::deserialize(&buf[pos..]) {
                max_lsn = max_lsn.max(record.lsn);
                pos += record.size as usize;
            }
            if pos == 0 {
                break;
            }
            offset += pos as u64;
        }
        max_lsn
    }
}

impl Drop for LogManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}
