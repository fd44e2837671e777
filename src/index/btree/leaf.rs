//! Leaf-page operations. Entries are (key, rid) pairs packed contiguously
//! after the header, sorted by key. Leaves chain through next-page-id in
//! key order.

use byteorder::{ByteOrder, LittleEndian};

use crate::common::types::{Page, PageId, PageType, Rid, INVALID_PAGE_ID};
use crate::index::btree::codec::KeyCodec;
use crate::index::btree::node::{self, LEAF_HEADER_SIZE};

const NEXT_PAGE_ID_OFFSET: usize = 24;

fn entry_size<K: KeyCodec>() -> usize {
    K::ENCODED_SIZE + Rid::ENCODED_SIZE
}

fn entry_offset<K: KeyCodec>(index: usize) -> usize {
    LEAF_HEADER_SIZE + index * entry_size::<K>()
}

pub fn init<K: KeyCodec>(page: &mut Page, page_id: PageId, parent_id: PageId, max_size: usize) {
    page.set_page_type(PageType::Leaf);
    page.set_lsn(0);
    node::set_size(page, 0);
    node::set_max_size(page, max_size);
    node::set_parent_page_id(page, parent_id);
    node::set_page_id(page, page_id);
    set_next_page_id(page, INVALID_PAGE_ID);
}

pub fn next_page_id(page: &Page) -> PageId {
    LittleEndian::read_u32(&page.data[NEXT_PAGE_ID_OFFSET..NEXT_PAGE_ID_OFFSET + 4])
}

pub fn set_next_page_id(page: &mut Page, next: PageId) {
    LittleEndian::write_u32(&mut page.data[NEXT_PAGE_ID_OFFSET..NEXT_PAGE_ID_OFFSET + 4], next);
}

pub fn key_at<K: KeyCodec>(page: &Page, index: usize) -> K {
    debug_assert!(index < node::size(page));
    let offset = entry_offset::<K>(index);
    K::decode(&page.data[offset..offset + K::ENCODED_SIZE])
}

pub fn value_at<K: KeyCodec>(page: &Page, index: usize) -> Rid {
    debug_assert!(index < node::size(page));
    let offset = entry_offset::<K>(index) + K::ENCODED_SIZE;
    Rid::read_from(&page.data[offset..offset + Rid::ENCODED_SIZE])
}

fn write_entry<K: KeyCodec>(page: &mut Page, index: usize, key: K, value: Rid) {
    let offset = entry_offset::<K>(index);
    key.encode(&mut page.data[offset..offset + K::ENCODED_SIZE]);
    value.write_to(
        &mut page.data[offset + K::ENCODED_SIZE..offset + K::ENCODED_SIZE + Rid::ENCODED_SIZE],
    );
}

/// First index whose key is >= the probe, by binary search; equals the
/// page size when every key is smaller.
pub fn key_index<K: KeyCodec>(page: &Page, key: &K) -> usize {
    let mut begin = 0;
    let mut end = node::size(page);
    while begin < end {
        let mid = (begin + end) / 2;
        if key_at::<K>(page, mid) < *key {
            begin = mid + 1;
        } else {
            end = mid;
        }
    }
    begin
}

pub fn lookup<K: KeyCodec>(page: &Page, key: &K) -> Option<Rid> {
    let size = node::size(page);
    if size == 0 {
        return None;
    }
    let index = key_index::<K>(page, key);
    if index < size && key_at::<K>(page, index) == *key {
        Some(value_at::<K>(page, index))
    } else {
        None
    }
}

/// Insert in sorted position. The caller has already rejected duplicates
/// and guaranteed room. Returns the new size.
pub fn insert<K: KeyCodec>(page: &mut Page, key: K, value: Rid) -> usize {
    let size = node::size(page);
    debug_assert!(size < node::max_size(page));

    let index = key_index::<K>(page, &key);
    let start = entry_offset::<K>(index);
    let end = entry_offset::<K>(size);
    page.data.copy_within(start..end, start + entry_size::<K>());
    write_entry(page, index, key, value);
    node::set_size(page, size + 1);
    size + 1
}

/// Remove a key if present. Returns the size after the operation; an
/// unchanged size means the key was absent.
pub fn remove<K: KeyCodec>(page: &mut Page, key: &K) -> usize {
    let size = node::size(page);
    if size == 0 {
        return 0;
    }
    let index = key_index::<K>(page, key);
    if index >= size || key_at::<K>(page, index) != *key {
        return size;
    }

    let start = entry_offset::<K>(index + 1);
    let end = entry_offset::<K>(size);
    page.data.copy_within(start..end, entry_offset::<K>(index));
    node::set_size(page, size - 1);
    size - 1
}

/// Split support: move the entries from `at` onward into the empty page
/// `to`. The caller picks `at` so both halves respect the occupancy
/// bounds once the pending insert lands.
pub fn split_off<K: KeyCodec>(from: &mut Page, to: &mut Page, at: usize) {
    debug_assert_eq!(node::size(to), 0);
    let size = node::size(from);
    debug_assert!(at < size);

    let start = entry_offset::<K>(at);
    let end = entry_offset::<K>(size);
    let dest = entry_offset::<K>(0);
    let (from_data, to_data) = (&from.data[start..end], &mut to.data[dest..dest + (end - start)]);
    to_data.copy_from_slice(from_data);

    node::set_size(from, at);
    node::set_size(to, size - at);
}

/// Merge support: append every entry of `from` onto `to` and splice the
/// leaf chain past `from`.
pub fn move_all_to<K: KeyCodec>(from: &mut Page, to: &mut Page) {
    let from_size = node::size(from);
    let to_size = node::size(to);
    debug_assert!(from_size + to_size <= node::max_size(to));

    let start = entry_offset::<K>(0);
    let end = entry_offset::<K>(from_size);
    let dest = entry_offset::<K>(to_size);
    to.data[dest..dest + (end - start)].copy_from_slice(&from.data[start..end]);

    node::set_size(to, to_size + from_size);
    node::set_size(from, 0);
    let next = next_page_id(from);
    set_next_page_id(to, next);
}

/// Redistribution: move the first entry of `from` to the tail of `to`
/// (`to` is the left neighbor).
pub fn move_first_to_end_of<K: KeyCodec>(from: &mut Page, to: &mut Page) {
    let key = key_at::<K>(from, 0);
    let value = value_at::<K>(from, 0);

    let to_size = node::size(to);
    write_entry(to, to_size, key, value);
    node::set_size(to, to_size + 1);

    let from_size = node::size(from);
    let start = entry_offset::<K>(1);
    let end = entry_offset::<K>(from_size);
    from.data.copy_within(start..end, entry_offset::<K>(0));
    node::set_size(from, from_size - 1);
}

/// Redistribution: move the last entry of `from` to the head of `to`
/// (`to` is the right neighbor).
pub fn move_last_to_front_of<K: KeyCodec>(from: &mut Page, to: &mut Page) {
    let from_size = node::size(from);
    let key = key_at::<K>(from, from_size - 1);
    let value = value_at::<K>(from, from_size - 1);
    node::set_size(from, from_size - 1);

    let to_size = node::size(to);
    let start = entry_offset::<K>(0);
    let end = entry_offset::<K>(to_size);
    to.data.copy_within(start..end, start + entry_size::<K>());
    write_entry(to, 0, key, value);
    node::set_size(to, to_size + 1);
}
