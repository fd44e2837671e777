use std::fs::{File, OpenOptions};
use std::io::{Read, Write, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use parking_lot::Mutex;
use thiserror::Error;

use crate::common::types::{Page, PageId, INVALID_PAGE_ID, PAGE_SIZE};

#[derive(Error, Debug)]
pub enum DiskManagerError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Invalid page ID: {0}")]
    InvalidPageId(PageId),
}

pub type Result<T> = std::result::Result<T, DiskManagerError>;

/// DiskManager owns the paged data file and the append-only log file.
/// Page reads and writes are positioned; log writes are appends and are
/// durable when `write_log` returns.
pub struct DiskManager {
    db_file: Mutex<File>,
    log_file: Mutex<File>,
    log_path: PathBuf,
}

impl DiskManager {
    /// Open (or create) the database file at `db_path` and its sibling log
    /// file `<db_path>.log`.
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&db_path)?;

        let mut log_path = db_path.as_ref().as_os_str().to_owned();
        log_path.push(".log");
        let log_path = PathBuf::from(log_path);
        let log_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&log_path)?;

        Ok(Self {
            db_file: Mutex::new(db_file),
            log_file: Mutex::new(log_file),
            log_path,
        })
    }

    /// Read a page from disk. A page past the end of the file comes back
    /// zeroed, which is the state a freshly allocated page has on disk.
    pub fn read_page(&self, page_id: PageId, page: &mut Page) -> Result<()> {
        if page_id == INVALID_PAGE_ID {
            return Err(DiskManagerError::InvalidPageId(page_id));
        }

        let offset = Self::page_offset(page_id);
        let mut file = self.db_file.lock();

        let file_size = file.metadata()?.len();
        if offset >= file_size {
            page.reset();
            page.id = page_id;
            return Ok(());
        }

        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(&mut page.data)?;
        page.id = page_id;
        Ok(())
    }

    /// Write a page to disk at its fixed offset.
    pub fn write_page(&self, page: &Page) -> Result<()> {
        if page.id == INVALID_PAGE_ID {
            return Err(DiskManagerError::InvalidPageId(page.id));
        }

        let mut file = self.db_file.lock();
        file.seek(SeekFrom::Start(Self::page_offset(page.id)))?;
        file.write_all(&page.data)?;
        file.flush()?;
        Ok(())
    }

    /// Allocate a new page by extending the data file with zeros. Page ids
    /// are dense; the first page is 1.
    pub fn allocate_page(&self) -> Result<PageId> {
        let mut file = self.db_file.lock();
        let file_size = file.metadata()?.len();
        let new_page_id = (file_size / PAGE_SIZE as u64) as PageId + 1;

        file.seek(SeekFrom::End(0))?;
        file.write_all(&[0u8; PAGE_SIZE])?;
        file.flush()?;
        Ok(new_page_id)
    }

    /// Deallocation leaves a tombstone; page ids are never reused.
    pub fn deallocate_page(&self, _page_id: PageId) {}

    /// Number of pages the data file currently holds.
    pub fn num_pages(&self) -> Result<u32> {
        let file = self.db_file.lock();
        Ok((file.metadata()?.len() / PAGE_SIZE as u64) as u32)
    }

    /// Fill `buf` from the log file starting at `offset`. Returns false
    /// once `offset` is at or past the end of the log. A partial window
    /// zero-fills the tail so a truncated record fails to deserialize
    /// instead of reading stale bytes.
    pub fn read_log(&self, buf: &mut [u8], offset: u64) -> Result<bool> {
        let mut file = self.log_file.lock();
        let file_size = file.metadata()?.len();
        if offset >= file_size {
            return Ok(false);
        }

        file.seek(SeekFrom::Start(offset))?;
        let available = (file_size - offset) as usize;
        let to_read = available.min(buf.len());
        file.read_exact(&mut buf[..to_read])?;
        for byte in &mut buf[to_read..] {
            *byte = 0;
        }
        Ok(true)
    }

    /// Append bytes to the log file. Durable on return.
    pub fn write_log(&self, buf: &[u8]) -> Result<()> {
        if buf.is_empty() {
            return Ok(());
        }
        let mut file = self.log_file.lock();
        file.seek(SeekFrom::End(0))?;
        file.write_all(buf)?;
        file.sync_data()?;
        Ok(())
    }

    /// Current size of the log file in bytes.
    pub fn log_size(&self) -> Result<u64> {
        Ok(self.log_file.lock().metadata()?.len())
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    fn page_offset(page_id: PageId) -> u64 {
        (page_id as u64 - 1) * PAGE_SIZE as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn test_disk() -> (DiskManager, NamedTempFile) {
        let file = NamedTempFile::new().unwrap();
        let disk = DiskManager::new(file.path()).unwrap();
        (disk, file)
    }

    #[test]
    fn page_write_read_round_trip() {
        let (disk, _file) = test_disk();
        let page_id = disk.allocate_page().unwrap();
        assert_eq!(page_id, 1);

        let mut page = Page::new(page_id);
        page.data[100] = 0xAB;
        disk.write_page(&page).unwrap();

        let mut read_back = Page::new(INVALID_PAGE_ID);
        disk.read_page(page_id, &mut read_back).unwrap();
        assert_eq!(read_back.id, page_id);
        assert_eq!(read_back.data[100], 0xAB);
    }

    #[test]
    fn unwritten_page_reads_zeroed() {
        let (disk, _file) = test_disk();
        let mut page = Page::new(INVALID_PAGE_ID);
        page.data[0] = 0xFF;
        disk.read_page(9, &mut page).unwrap();
        assert_eq!(page.id, 9);
        assert!(page.data.iter().all(|&b| b == 0));
    }

    #[test]
    fn allocation_is_dense() {
        let (disk, _file) = test_disk();
        assert_eq!(disk.allocate_page().unwrap(), 1);
        assert_eq!(disk.allocate_page().unwrap(), 2);
        assert_eq!(disk.allocate_page().unwrap(), 3);
    }

    #[test]
    fn log_append_and_windowed_read() {
        let (disk, _file) = test_disk();
        disk.write_log(b"abcdef").unwrap();
        disk.write_log(b"ghij").unwrap();

        let mut buf = [0u8; 8];
        assert!(disk.read_log(&mut buf, 0).unwrap());
        assert_eq!(&buf, b"abcdefgh");

        // Partial window zero-fills past the end
        assert!(disk.read_log(&mut buf, 6).unwrap());
        assert_eq!(&buf[..4], b"ghij");
        assert_eq!(&buf[4..], &[0, 0, 0, 0]);

        // Reads at or past EOF report exhaustion
        assert!(!disk.read_log(&mut buf, 10).unwrap());
    }
}
