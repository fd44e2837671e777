//! Slotted tuple page. Tuple bytes grow forward from the header, the slot
//! array grows backward from the page tail. Deleted tuples keep their slot:
//! a mark bit in the slot length records a pending (mark) delete, a zero
//! length records an applied delete, so recovery can re-insert at the same
//! slot.

use byteorder::{ByteOrder, LittleEndian};
use thiserror::Error;

use crate::common::types::{Page, PageId, PageType, Rid, Tuple, INVALID_PAGE_ID, PAGE_SIZE};

/// Fixed header: type (4) | lsn (4) | page-id (4) | prev-page-id (4) |
/// next-page-id (4) | free-space-offset (4) | slot-count (4)
pub const HEADER_SIZE: usize = 28;
/// One slot: tuple offset (4) | tuple length (4)
pub const SLOT_SIZE: usize = 8;

const PAGE_ID_OFFSET: usize = 8;
const PREV_PAGE_ID_OFFSET: usize = 12;
const NEXT_PAGE_ID_OFFSET: usize = 16;
const FREE_SPACE_OFFSET: usize = 20;
const SLOT_COUNT_OFFSET: usize = 24;

/// High bit of the slot length marks a tuple deleted-but-present.
const DELETE_MASK: u32 = 1 << 31;

#[derive(Error, Debug)]
pub enum PageError {
    #[error("Not enough space in page")]
    InsufficientSpace,
    #[error("Invalid slot {0}")]
    InvalidSlot(u32),
    #[error("Slot {0} is empty")]
    SlotEmpty(u32),
    #[error("Slot {0} is occupied")]
    SlotOccupied(u32),
    #[error("Tuple at slot {0} is marked deleted")]
    TupleMarkedDeleted(u32),
}

pub type Result<T> = std::result::Result<T, PageError>;

/// Format a fresh table page.
pub fn init(page: &mut Page, page_id: PageId, prev_page_id: PageId) {
    page.data[HEADER_SIZE..].iter_mut().for_each(|b| *b = 0);
    page.set_page_type(PageType::Table);
    page.set_lsn(0);
    write_u32(page, PAGE_ID_OFFSET, page_id);
    write_u32(page, PREV_PAGE_ID_OFFSET, prev_page_id);
    write_u32(page, NEXT_PAGE_ID_OFFSET, INVALID_PAGE_ID);
    write_u32(page, FREE_SPACE_OFFSET, HEADER_SIZE as u32);
    write_u32(page, SLOT_COUNT_OFFSET, 0);
}

pub fn page_id(page: &Page) -> PageId {
    read_u32(page, PAGE_ID_OFFSET)
}

pub fn prev_page_id(page: &Page) -> PageId {
    read_u32(page, PREV_PAGE_ID_OFFSET)
}

pub fn next_page_id(page: &Page) -> PageId {
    read_u32(page, NEXT_PAGE_ID_OFFSET)
}

pub fn set_prev_page_id(page: &mut Page, prev: PageId) {
    write_u32(page, PREV_PAGE_ID_OFFSET, prev);
}

pub fn set_next_page_id(page: &mut Page, next: PageId) {
    write_u32(page, NEXT_PAGE_ID_OFFSET, next);
}

/// Number of slots ever created on this page, deleted ones included.
pub fn slot_count(page: &Page) -> u32 {
    read_u32(page, SLOT_COUNT_OFFSET)
}

/// Bytes available between the tuple area and the slot array.
pub fn free_space(page: &Page) -> usize {
    let slots_start = PAGE_SIZE - slot_count(page) as usize * SLOT_SIZE;
    slots_start - read_u32(page, FREE_SPACE_OFFSET) as usize
}

/// Append a tuple into a fresh slot.
pub fn insert_tuple(page: &mut Page, tuple: &Tuple) -> Result<Rid> {
    if free_space(page) < tuple.len() + SLOT_SIZE {
        return Err(PageError::InsufficientSpace);
    }

    let slot = slot_count(page);
    let offset = read_u32(page, FREE_SPACE_OFFSET);
    page.data[offset as usize..offset as usize + tuple.len()].copy_from_slice(tuple.data());

    write_slot(page, slot, offset, tuple.len() as u32);
    write_u32(page, FREE_SPACE_OFFSET, offset + tuple.len() as u32);
    write_u32(page, SLOT_COUNT_OFFSET, slot + 1);
    Ok(Rid::new(page_id(page), slot))
}

/// Place a tuple at a known slot. Recovery uses this to restore a tuple to
/// the location its log record names: either re-filling an applied-delete
/// slot or appending the next slot in order.
pub fn insert_tuple_at(page: &mut Page, slot: u32, tuple: &Tuple) -> Result<()> {
    let count = slot_count(page);
    if slot > count {
        return Err(PageError::InvalidSlot(slot));
    }
    if slot == count {
        insert_tuple(page, tuple)?;
        return Ok(());
    }

    let (_, len) = read_slot(page, slot);
    if len != 0 {
        return Err(PageError::SlotOccupied(slot));
    }
    if free_space(page) < tuple.len() {
        return Err(PageError::InsufficientSpace);
    }

    let offset = read_u32(page, FREE_SPACE_OFFSET);
    page.data[offset as usize..offset as usize + tuple.len()].copy_from_slice(tuple.data());
    write_slot(page, slot, offset, tuple.len() as u32);
    write_u32(page, FREE_SPACE_OFFSET, offset + tuple.len() as u32);
    Ok(())
}

/// Read a live tuple.
pub fn get_tuple(page: &Page, slot: u32) -> Result<Tuple> {
    let (offset, len) = checked_slot(page, slot)?;
    if len & DELETE_MASK != 0 {
        return Err(PageError::TupleMarkedDeleted(slot));
    }
    Ok(Tuple::from_bytes(
        &page.data[offset as usize..offset as usize + len as usize],
    ))
}

/// Read a tuple regardless of its delete mark. Undo reads the before
/// image of a mark-deleted tuple through this.
pub fn get_tuple_raw(page: &Page, slot: u32) -> Result<Tuple> {
    let (offset, len) = checked_slot(page, slot)?;
    let len = len & !DELETE_MASK;
    Ok(Tuple::from_bytes(
        &page.data[offset as usize..offset as usize + len as usize],
    ))
}

/// First phase of a two-step delete: keep the bytes, set the mark bit.
pub fn mark_delete(page: &mut Page, slot: u32) -> Result<()> {
    let (offset, len) = checked_slot(page, slot)?;
    write_slot(page, slot, offset, len | DELETE_MASK);
    Ok(())
}

/// Revert a mark-delete.
pub fn rollback_delete(page: &mut Page, slot: u32) -> Result<()> {
    let (offset, len) = checked_slot(page, slot)?;
    write_slot(page, slot, offset, len & !DELETE_MASK);
    Ok(())
}

/// Second phase of a delete: the slot stays but its length drops to zero,
/// so the slot can be refilled by recovery.
pub fn apply_delete(page: &mut Page, slot: u32) -> Result<()> {
    let (offset, _) = checked_slot(page, slot)?;
    write_slot(page, slot, offset, 0);
    Ok(())
}

/// Overwrite a live tuple. In place when the new bytes fit the old slot,
/// otherwise relocated to the free area of the same page.
pub fn update_tuple(page: &mut Page, slot: u32, tuple: &Tuple) -> Result<()> {
    let (offset, len) = checked_slot(page, slot)?;
    if len & DELETE_MASK != 0 {
        return Err(PageError::TupleMarkedDeleted(slot));
    }

    let new_len = tuple.len() as u32;
    if new_len <= len {
        page.data[offset as usize..offset as usize + tuple.len()].copy_from_slice(tuple.data());
        write_slot(page, slot, offset, new_len);
        return Ok(());
    }

    if free_space(page) < tuple.len() {
        return Err(PageError::InsufficientSpace);
    }
    let new_offset = read_u32(page, FREE_SPACE_OFFSET);
    page.data[new_offset as usize..new_offset as usize + tuple.len()]
        .copy_from_slice(tuple.data());
    write_slot(page, slot, new_offset, new_len);
    write_u32(page, FREE_SPACE_OFFSET, new_offset + new_len);
    Ok(())
}

fn checked_slot(page: &Page, slot: u32) -> Result<(u32, u32)> {
    if slot >= slot_count(page) {
        return Err(PageError::InvalidSlot(slot));
    }
    let (offset, len) = read_slot(page, slot);
    if len == 0 {
        return Err(PageError::SlotEmpty(slot));
    }
    Ok((offset, len))
}

fn slot_position(slot: u32) -> usize {
    PAGE_SIZE - SLOT_SIZE * (slot as usize + 1)
}

fn read_slot(page: &Page, slot: u32) -> (u32, u32) {
    let pos = slot_position(slot);
    (
        LittleEndian::read_u32(&page.data[pos..pos + 4]),
        LittleEndian::read_u32(&page.data[pos + 4..pos + 8]),
    )
}

fn write_slot(page: &mut Page, slot: u32, offset: u32, len: u32) {
    let pos = slot_position(slot);
    LittleEndian::write_u32(&mut page.data[pos..pos + 4], offset);
    LittleEndian::write_u32(&mut page.data[pos + 4..pos + 8], len);
}

fn read_u32(page: &Page, offset: usize) -> u32 {
    LittleEndian::read_u32(&page.data[offset..offset + 4])
}

fn write_u32(page: &mut Page, offset: usize, value: u32) {
    LittleEndian::write_u32(&mut page.data[offset..offset + 4], value);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh_page() -> Page {
        let mut page = Page::new(5);
        init(&mut page, 5, INVALID_PAGE_ID);
        page
    }

    #[test]
    fn insert_and_get() {
        let mut page = fresh_page();
        let rid = insert_tuple(&mut page, &Tuple::from_bytes(b"first")).unwrap();
        assert_eq!(rid, Rid::new(5, 0));
        let rid2 = insert_tuple(&mut page, &Tuple::from_bytes(b"second")).unwrap();
        assert_eq!(rid2.slot, 1);

        assert_eq!(get_tuple(&page, 0).unwrap().data(), b"first");
        assert_eq!(get_tuple(&page, 1).unwrap().data(), b"second");
        assert!(matches!(get_tuple(&page, 2), Err(PageError::InvalidSlot(2))));
    }

    #[test]
    fn delete_mark_and_rollback() {
        let mut page = fresh_page();
        insert_tuple(&mut page, &Tuple::from_bytes(b"victim")).unwrap();

        mark_delete(&mut page, 0).unwrap();
        assert!(matches!(
            get_tuple(&page, 0),
            Err(PageError::TupleMarkedDeleted(0))
        ));
        assert_eq!(get_tuple_raw(&page, 0).unwrap().data(), b"victim");

        rollback_delete(&mut page, 0).unwrap();
        assert_eq!(get_tuple(&page, 0).unwrap().data(), b"victim");
    }

    #[test]
    fn apply_delete_frees_slot_for_reinsert() {
        let mut page = fresh_page();
        insert_tuple(&mut page, &Tuple::from_bytes(b"gone")).unwrap();
        insert_tuple(&mut page, &Tuple::from_bytes(b"stays")).unwrap();

        apply_delete(&mut page, 0).unwrap();
        assert!(matches!(get_tuple(&page, 0), Err(PageError::SlotEmpty(0))));

        // Recovery re-fills the same slot
        insert_tuple_at(&mut page, 0, &Tuple::from_bytes(b"back")).unwrap();
        assert_eq!(get_tuple(&page, 0).unwrap().data(), b"back");
        assert_eq!(get_tuple(&page, 1).unwrap().data(), b"stays");
        assert!(matches!(
            insert_tuple_at(&mut page, 0, &Tuple::from_bytes(b"dup")),
            Err(PageError::SlotOccupied(0))
        ));
    }

    #[test]
    fn update_in_place_and_relocated() {
        let mut page = fresh_page();
        insert_tuple(&mut page, &Tuple::from_bytes(b"abcdef")).unwrap();

        update_tuple(&mut page, 0, &Tuple::from_bytes(b"xyz")).unwrap();
        assert_eq!(get_tuple(&page, 0).unwrap().data(), b"xyz");

        update_tuple(&mut page, 0, &Tuple::from_bytes(b"longer than before")).unwrap();
        assert_eq!(get_tuple(&page, 0).unwrap().data(), b"longer than before");
    }

    #[test]
    fn page_fills_up() {
        let mut page = fresh_page();
        let big = Tuple::new(vec![7u8; 1000]);
        let mut inserted = 0;
        while insert_tuple(&mut page, &big).is_ok() {
            inserted += 1;
        }
        assert_eq!(inserted, 4);
        assert!(matches!(
            insert_tuple(&mut page, &big),
            Err(PageError::InsufficientSpace)
        ));
    }
}
