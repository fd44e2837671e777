//! Internal-page operations. Entries are (key, child-page-id) pairs; the
//! key in slot 0 is an unused sentinel, so an internal page of size n has
//! n children separated by the keys in slots 1..n. The key at slot i is a
//! lower bound for everything under the child at slot i.

use byteorder::{ByteOrder, LittleEndian};

use crate::common::types::{Page, PageId, PageType};
use crate::index::btree::codec::KeyCodec;
use crate::index::btree::node::{self, INTERNAL_HEADER_SIZE};

fn entry_size<K: KeyCodec>() -> usize {
    K::ENCODED_SIZE + 4
}

fn entry_offset<K: KeyCodec>(index: usize) -> usize {
    INTERNAL_HEADER_SIZE + index * entry_size::<K>()
}

/// A fresh internal page has size 1: the sentinel slot whose child is
/// filled in by the first real insertion.
pub fn init<K: KeyCodec>(page: &mut Page, page_id: PageId, parent_id: PageId, max_size: usize) {
    page.set_page_type(PageType::Internal);
    page.set_lsn(0);
    node::set_size(page, 1);
    node::set_max_size(page, max_size);
    node::set_parent_page_id(page, parent_id);
    node::set_page_id(page, page_id);
}

pub fn key_at<K: KeyCodec>(page: &Page, index: usize) -> K {
    debug_assert!(index < node::size(page));
    let offset = entry_offset::<K>(index);
    K::decode(&page.data[offset..offset + K::ENCODED_SIZE])
}

pub fn set_key_at<K: KeyCodec>(page: &mut Page, index: usize, key: K) {
    debug_assert!(index < node::size(page));
    let offset = entry_offset::<K>(index);
    key.encode(&mut page.data[offset..offset + K::ENCODED_SIZE]);
}

pub fn value_at<K: KeyCodec>(page: &Page, index: usize) -> PageId {
    debug_assert!(index < node::size(page));
    let offset = entry_offset::<K>(index) + K::ENCODED_SIZE;
    LittleEndian::read_u32(&page.data[offset..offset + 4])
}

pub fn set_value_at<K: KeyCodec>(page: &mut Page, index: usize, value: PageId) {
    let offset = entry_offset::<K>(index) + K::ENCODED_SIZE;
    LittleEndian::write_u32(&mut page.data[offset..offset + 4], value);
}

fn write_entry<K: KeyCodec>(page: &mut Page, index: usize, key: K, value: PageId) {
    let offset = entry_offset::<K>(index);
    key.encode(&mut page.data[offset..offset + K::ENCODED_SIZE]);
    LittleEndian::write_u32(
        &mut page.data[offset + K::ENCODED_SIZE..offset + K::ENCODED_SIZE + 4],
        value,
    );
}

/// Slot of the given child page id; children are not sorted, so this is a
/// scan.
pub fn value_index<K: KeyCodec>(page: &Page, value: PageId) -> usize {
    let size = node::size(page);
    for i in 0..size {
        if value_at::<K>(page, i) == value {
            return i;
        }
    }
    size - 1
}

/// Child to descend into for `key`: the child left of the first strictly
/// greater separator. Equal keys descend right of their separator.
pub fn lookup<K: KeyCodec>(page: &Page, key: &K) -> PageId {
    let size = node::size(page);
    if size == 1 {
        return value_at::<K>(page, 0);
    }
    if *key < key_at::<K>(page, 1) {
        return value_at::<K>(page, 0);
    }
    for i in 1..size {
        if *key < key_at::<K>(page, i) {
            return value_at::<K>(page, i - 1);
        }
    }
    value_at::<K>(page, size - 1)
}

/// Turn an empty internal page into a root over exactly two children.
pub fn populate_new_root<K: KeyCodec>(page: &mut Page, left: PageId, key: K, right: PageId) {
    set_value_at::<K>(page, 0, left);
    write_entry(page, 1, key, right);
    node::set_size(page, 2);
}

/// Insert (key, new_child) immediately after the slot holding old_child.
/// Returns the new size.
pub fn insert_node_after<K: KeyCodec>(
    page: &mut Page,
    old_value: PageId,
    key: K,
    new_value: PageId,
) -> usize {
    let size = node::size(page);
    debug_assert!(size < node::max_size(page));

    let index = value_index::<K>(page, old_value);
    let start = entry_offset::<K>(index + 1);
    let end = entry_offset::<K>(size);
    page.data.copy_within(start..end, start + entry_size::<K>());
    write_entry(page, index + 1, key, new_value);
    node::set_size(page, size + 1);
    size + 1
}

/// Remove the entry at `index`, shifting the tail left.
pub fn remove_at<K: KeyCodec>(page: &mut Page, index: usize) {
    let size = node::size(page);
    debug_assert!(index < size && size > 1);
    let start = entry_offset::<K>(index + 1);
    let end = entry_offset::<K>(size);
    page.data.copy_within(start..end, entry_offset::<K>(index));
    node::set_size(page, size - 1);
}

/// Split support: move the entries from `at` onward into the freshly
/// initialized `to`; the first moved entry lands on `to`'s sentinel
/// slot. The caller picks `at` so both halves respect the occupancy
/// bounds once the pending insert lands. Returns the moved children so
/// the caller can update their parent pointers.
pub fn split_off<K: KeyCodec>(from: &mut Page, to: &mut Page, at: usize) -> Vec<PageId> {
    debug_assert_eq!(node::size(to), 1);
    let size = node::size(from);
    debug_assert!(at > 0 && at < size);

    let start = entry_offset::<K>(at);
    let end = entry_offset::<K>(size);
    let dest = entry_offset::<K>(0);
    to.data[dest..dest + (end - start)].copy_from_slice(&from.data[start..end]);

    node::set_size(from, at);
    node::set_size(to, size - at);
    (0..size - at).map(|i| value_at::<K>(to, i)).collect()
}

/// Prepend an entry, shifting the rest right. The key lands on the
/// sentinel slot, which is exactly what a split whose pushed-up
/// separator is the freshly inserted key expects. Returns the new size.
pub fn push_front<K: KeyCodec>(page: &mut Page, key: K, value: PageId) -> usize {
    let size = node::size(page);
    debug_assert!(size < node::max_size(page));

    let start = entry_offset::<K>(0);
    let end = entry_offset::<K>(size);
    page.data.copy_within(start..end, start + entry_size::<K>());
    write_entry(page, 0, key, value);
    node::set_size(page, size + 1);
    size + 1
}

/// Merge support: fold every entry of `from` onto the tail of `to`, with
/// the parent separator becoming the first moved key. Returns the moved
/// children.
pub fn move_all_to<K: KeyCodec>(from: &mut Page, to: &mut Page, separator: K) -> Vec<PageId> {
    let from_size = node::size(from);
    let to_size = node::size(to);
    debug_assert!(from_size + to_size <= node::max_size(to));

    set_key_at::<K>(from, 0, separator);
    let start = entry_offset::<K>(0);
    let end = entry_offset::<K>(from_size);
    let dest = entry_offset::<K>(to_size);
    to.data[dest..dest + (end - start)].copy_from_slice(&from.data[start..end]);

    node::set_size(to, to_size + from_size);
    node::set_size(from, 0);
    (to_size..to_size + from_size)
        .map(|i| value_at::<K>(to, i))
        .collect()
}

/// Redistribution toward the left neighbor: `from`'s first child moves to
/// the tail of `to`, keyed by the old parent separator. Returns the new
/// separator and the moved child.
pub fn move_first_to_end_of<K: KeyCodec>(from: &mut Page, to: &mut Page, separator: K) -> (K, PageId) {
    let moved_child = value_at::<K>(from, 0);
    let new_separator = key_at::<K>(from, 1);

    let to_size = node::size(to);
    write_entry(to, to_size, separator, moved_child);
    node::set_size(to, to_size + 1);

    let from_size = node::size(from);
    let start = entry_offset::<K>(1);
    let end = entry_offset::<K>(from_size);
    from.data.copy_within(start..end, entry_offset::<K>(0));
    node::set_size(from, from_size - 1);

    (new_separator, moved_child)
}

/// Redistribution toward the right neighbor: `from`'s last child moves to
/// the head of `to`, the old separator drops onto `to`'s former sentinel,
/// and the moved key becomes the new separator.
pub fn move_last_to_front_of<K: KeyCodec>(from: &mut Page, to: &mut Page, separator: K) -> (K, PageId) {
    let from_size = node::size(from);
    let new_separator = key_at::<K>(from, from_size - 1);
    let moved_child = value_at::<K>(from, from_size - 1);
    node::set_size(from, from_size - 1);

    set_key_at::<K>(to, 0, separator);
    let to_size = node::size(to);
    let start = entry_offset::<K>(0);
    let end = entry_offset::<K>(to_size);
    to.data.copy_within(start..end, start + entry_size::<K>());
    write_entry(to, 0, new_separator, moved_child);
    node::set_size(to, to_size + 1);

    (new_separator, moved_child)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::INVALID_PAGE_ID;

    fn internal(max: usize) -> Page {
        let mut page = Page::new(7);
        init::<i64>(&mut page, 7, INVALID_PAGE_ID, max);
        page
    }

    #[test]
    fn lookup_partitions_children() {
        let mut page = internal(8);
        populate_new_root::<i64>(&mut page, 10, 50, 11);
        insert_node_after::<i64>(&mut page, 11, 100, 12);

        assert_eq!(lookup::<i64>(&page, &7), 10);
        assert_eq!(lookup::<i64>(&page, &50), 11); // equal goes right
        assert_eq!(lookup::<i64>(&page, &99), 11);
        assert_eq!(lookup::<i64>(&page, &100), 12);
        assert_eq!(lookup::<i64>(&page, &500), 12);
    }

    #[test]
    fn insert_after_keeps_child_order() {
        let mut page = internal(8);
        populate_new_root::<i64>(&mut page, 10, 50, 11);
        insert_node_after::<i64>(&mut page, 10, 25, 15);

        assert_eq!(value_at::<i64>(&page, 0), 10);
        assert_eq!(value_at::<i64>(&page, 1), 15);
        assert_eq!(value_at::<i64>(&page, 2), 11);
        assert_eq!(key_at::<i64>(&page, 1), 25);
        assert_eq!(key_at::<i64>(&page, 2), 50);
    }

    #[test]
    fn split_off_hands_over_right_children() {
        let mut page = internal(5);
        populate_new_root::<i64>(&mut page, 10, 20, 11);
        insert_node_after::<i64>(&mut page, 11, 30, 12);
        insert_node_after::<i64>(&mut page, 12, 40, 13);
        insert_node_after::<i64>(&mut page, 13, 50, 14);
        assert_eq!(node::size(&page), 5);

        let mut sibling = internal(5);
        init::<i64>(&mut sibling, 8, INVALID_PAGE_ID, 5);
        let moved = split_off::<i64>(&mut page, &mut sibling, 2);

        assert_eq!(node::size(&page), 2);
        assert_eq!(node::size(&sibling), 3);
        assert_eq!(moved, vec![12, 13, 14]);
        // The first key of the new sibling is the separator pushed up.
        assert_eq!(key_at::<i64>(&sibling, 0), 30);
    }

    #[test]
    fn push_front_takes_the_sentinel_slot() {
        // Mirror the split case whose pushed-up separator is the newly
        // inserted key: the right half produced by split_off carries a
        // real key in every slot, then gains the new entry at the front.
        let mut page = internal(5);
        populate_new_root::<i64>(&mut page, 10, 20, 11);
        insert_node_after::<i64>(&mut page, 11, 60, 13);
        insert_node_after::<i64>(&mut page, 13, 80, 14);

        let mut right = internal(5);
        init::<i64>(&mut right, 8, INVALID_PAGE_ID, 5);
        split_off::<i64>(&mut page, &mut right, 2);

        push_front::<i64>(&mut right, 40, 12);
        assert_eq!(node::size(&right), 3);
        assert_eq!(value_at::<i64>(&right, 0), 12);
        assert_eq!(key_at::<i64>(&right, 0), 40);
        assert_eq!(key_at::<i64>(&right, 1), 60);
        assert_eq!(lookup::<i64>(&right, &50), 12);
        assert_eq!(lookup::<i64>(&right, &70), 13);
        assert_eq!(lookup::<i64>(&right, &90), 14);
    }

    #[test]
    fn merge_carries_separator_down() {
        let mut left = internal(8);
        populate_new_root::<i64>(&mut left, 10, 20, 11);
        let mut right = internal(8);
        init::<i64>(&mut right, 9, INVALID_PAGE_ID, 8);
        populate_new_root::<i64>(&mut right, 12, 60, 13);

        let moved = move_all_to::<i64>(&mut right, &mut left, 40);
        assert_eq!(moved, vec![12, 13]);
        assert_eq!(node::size(&left), 4);
        assert_eq!(key_at::<i64>(&left, 2), 40);
        assert_eq!(key_at::<i64>(&left, 3), 60);
        assert_eq!(lookup::<i64>(&left, &45), 12);
    }

    #[test]
    fn rotation_through_parent() {
        let mut left = internal(8);
        populate_new_root::<i64>(&mut left, 10, 20, 11);
        insert_node_after::<i64>(&mut left, 11, 30, 12);
        let mut right = internal(8);
        init::<i64>(&mut right, 9, INVALID_PAGE_ID, 8);
        populate_new_root::<i64>(&mut right, 13, 80, 14);

        // separator 50 rotates: left's last child 12 moves under right.
        let (new_separator, moved) = move_last_to_front_of::<i64>(&mut left, &mut right, 50);
        assert_eq!(new_separator, 30);
        assert_eq!(moved, 12);
        assert_eq!(node::size(&left), 2);
        assert_eq!(node::size(&right), 3);
        assert_eq!(value_at::<i64>(&right, 0), 12);
        assert_eq!(key_at::<i64>(&right, 1), 50);

        // and back again
        let (sep, moved) = move_first_to_end_of::<i64>(&mut right, &mut left, 30);
        assert_eq!(sep, 50);
        assert_eq!(moved, 12);
        assert_eq!(node::size(&left), 3);
        assert_eq!(value_at::<i64>(&left, 2), 12);
    }
}
