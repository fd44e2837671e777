//! Shared index-page header. Both node kinds start with:
//!
//! ```text
//! page-type (4) | lsn (4) | size (4) | max-size (4) | parent-page-id (4) | page-id (4)
//! ```
//!
//! Leaves append a next-page-id field. Operations dispatch on the type tag
//! in the first word; there is no dynamic dispatch.

use byteorder::{ByteOrder, LittleEndian};

use crate::common::types::{Page, PageId, PageType, INVALID_PAGE_ID};

const SIZE_OFFSET: usize = 8;
const MAX_SIZE_OFFSET: usize = 12;
const PARENT_OFFSET: usize = 16;
const PAGE_ID_OFFSET: usize = 20;

/// Header length for internal pages; the entry array starts here.
pub const INTERNAL_HEADER_SIZE: usize = 24;
/// Leaves carry one extra field (next-page-id) at offset 24.
pub const LEAF_HEADER_SIZE: usize = 28;

pub fn is_leaf(page: &Page) -> bool {
    page.page_type() == PageType::Leaf
}

pub fn size(page: &Page) -> usize {
    LittleEndian::read_u32(&page.data[SIZE_OFFSET..SIZE_OFFSET + 4]) as usize
}

pub fn set_size(page: &mut Page, size: usize) {
    LittleEndian::write_u32(&mut page.data[SIZE_OFFSET..SIZE_OFFSET + 4], size as u32);
}

pub fn max_size(page: &Page) -> usize {
    LittleEndian::read_u32(&page.data[MAX_SIZE_OFFSET..MAX_SIZE_OFFSET + 4]) as usize
}

pub fn set_max_size(page: &mut Page, max_size: usize) {
    LittleEndian::write_u32(
        &mut page.data[MAX_SIZE_OFFSET..MAX_SIZE_OFFSET + 4],
        max_size as u32,
    );
}

/// Lower occupancy bound for non-root nodes.
pub fn min_size(page: &Page) -> usize {
    (max_size(page) + 1) / 2
}

pub fn parent_page_id(page: &Page) -> PageId {
    LittleEndian::read_u32(&page.data[PARENT_OFFSET..PARENT_OFFSET + 4])
}

pub fn set_parent_page_id(page: &mut Page, parent: PageId) {
    LittleEndian::write_u32(&mut page.data[PARENT_OFFSET..PARENT_OFFSET + 4], parent);
}

pub fn is_root(page: &Page) -> bool {
    parent_page_id(page) == INVALID_PAGE_ID
}

pub fn page_id(page: &Page) -> PageId {
    LittleEndian::read_u32(&page.data[PAGE_ID_OFFSET..PAGE_ID_OFFSET + 4])
}

pub fn set_page_id(page: &mut Page, page_id: PageId) {
    LittleEndian::write_u32(&mut page.data[PAGE_ID_OFFSET..PAGE_ID_OFFSET + 4], page_id);
}
