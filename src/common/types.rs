use std::sync::Arc;
use byteorder::{ByteOrder, LittleEndian};
use parking_lot::RwLock;

/// Page size in bytes (4KB)
pub const PAGE_SIZE: usize = 4096;

/// Page ID type; page 0 is never a valid page
pub type PageId = u32;

/// Sentinel for "no page"
pub const INVALID_PAGE_ID: PageId = 0;

/// Buffer pool frame ID type
pub type FrameId = usize;

/// Transaction ID type
pub type TxnId = u32;

/// Log sequence number type
pub type Lsn = u32;

/// Sentinel for "no log record"
pub const INVALID_LSN: Lsn = 0;

/// Byte offset of the page-type tag within a page
const TYPE_OFFSET: usize = 0;
/// Byte offset of the page LSN within a page
const LSN_OFFSET: usize = 4;

/// Tag stored in the first four bytes of every page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageType {
    Invalid = 0,
    Header = 1,
    Internal = 2,
    Leaf = 3,
    Table = 4,
}

impl PageType {
    pub fn from_u32(value: u32) -> Self {
        match value {
            1 => PageType::Header,
            2 => PageType::Internal,
            3 => PageType::Leaf,
            4 => PageType::Table,
            _ => PageType::Invalid,
        }
    }
}

/// Record identifier: a page and a slot within it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Rid {
    pub page_id: PageId,
    pub slot: u32,
}

impl Rid {
    /// Size of the fixed binary encoding
    pub const ENCODED_SIZE: usize = 8;

    pub fn new(page_id: PageId, slot: u32) -> Self {
        Self { page_id, slot }
    }

    pub fn write_to(&self, buf: &mut [u8]) {
        LittleEndian::write_u32(&mut buf[0..4], self.page_id);
        LittleEndian::write_u32(&mut buf[4..8], self.slot);
    }

    pub fn read_from(buf: &[u8]) -> Self {
        Self {
            page_id: LittleEndian::read_u32(&buf[0..4]),
            slot: LittleEndian::read_u32(&buf[4..8]),
        }
    }
}

/// An owned tuple payload. The storage engine treats tuple contents as an
/// opaque byte blob; the wire form is a u32 length prefix followed by the
/// bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tuple {
    data: Vec<u8>,
}

impl Tuple {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn from_bytes(data: &[u8]) -> Self {
        Self { data: data.to_vec() }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Length of the serialized form (length prefix + payload)
    pub fn serialized_size(&self) -> usize {
        4 + self.data.len()
    }

    pub fn serialize_into(&self, buf: &mut [u8]) {
        LittleEndian::write_u32(&mut buf[0..4], self.data.len() as u32);
        buf[4..4 + self.data.len()].copy_from_slice(&self.data);
    }

    /// Read a length-prefixed tuple. Returns None when the buffer is too
    /// short to contain the full payload.
    pub fn deserialize_from(buf: &[u8]) -> Option<Self> {
        if buf.len() < 4 {
            return None;
        }
        let len = LittleEndian::read_u32(&buf[0..4]) as usize;
        if buf.len() < 4 + len {
            return None;
        }
        Some(Self {
            data: buf[4..4 + len].to_vec(),
        })
    }
}

/// Page structure. Every page starts with a common prefix of
/// page-type (4 bytes) and LSN (4 bytes); the rest of the layout depends
/// on the page type.
#[derive(Clone)]
pub struct Page {
    pub id: PageId,
    pub data: [u8; PAGE_SIZE],
}

impl Page {
    pub fn new(id: PageId) -> Self {
        Self {
            id,
            data: [0; PAGE_SIZE],
        }
    }

    /// Zero the payload and drop the identity, returning the page to its
    /// freshly-allocated state.
    pub fn reset(&mut self) {
        self.id = INVALID_PAGE_ID;
        self.data = [0; PAGE_SIZE];
    }

    pub fn page_type(&self) -> PageType {
        PageType::from_u32(LittleEndian::read_u32(&self.data[TYPE_OFFSET..TYPE_OFFSET + 4]))
    }

    pub fn set_page_type(&mut self, page_type: PageType) {
        LittleEndian::write_u32(
            &mut self.data[TYPE_OFFSET..TYPE_OFFSET + 4],
            page_type as u32,
        );
    }

    pub fn lsn(&self) -> Lsn {
        LittleEndian::read_u32(&self.data[LSN_OFFSET..LSN_OFFSET + 4])
    }

    pub fn set_lsn(&mut self, lsn: Lsn) {
        LittleEndian::write_u32(&mut self.data[LSN_OFFSET..LSN_OFFSET + 4], lsn);
    }
}

/// Smart pointer to a latched page. The RwLock is the page latch; the
/// buffer pool hands these out and callers latch the payload themselves.
pub type PagePtr = Arc<RwLock<Page>>;
