use std::sync::Arc;
use std::thread;

use anyhow::Result;

use araldb::common::types::Rid;
use araldb::BPlusTree;

mod common;
use common::create_test_buffer_pool;

fn rid_for(key: i64) -> Rid {
    Rid::new((key / 100) as u32 + 2, (key % 100) as u32)
}

#[test]
fn test_insert_then_point_lookups() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(64)?;
    let tree = BPlusTree::<i64>::new(buffer_pool.clone())?;

    for key in 1..=1000i64 {
        assert!(tree.insert(key, rid_for(key))?);
    }

    for key in [1i64, 500, 1000] {
        assert_eq!(tree.get(&key)?, Some(rid_for(key)));
    }
    assert_eq!(tree.get(&1001)?, None);

    tree.validate()?;
    assert_eq!(buffer_pool.pinned_page_count(), 0);
    Ok(())
}

#[test]
fn test_duplicate_insert_rejected() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(16)?;
    let tree = BPlusTree::<i64>::new(buffer_pool.clone())?;

    assert!(tree.insert(42, Rid::new(2, 0))?);
    assert!(!tree.insert(42, Rid::new(2, 1))?);
    // The original value survives the rejected insert.
    assert_eq!(tree.get(&42)?, Some(Rid::new(2, 0)));
    assert_eq!(buffer_pool.pinned_page_count(), 0);
    Ok(())
}

#[test]
fn test_remove_odds_iterate_evens() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(64)?;
    let tree = BPlusTree::<i64>::new(buffer_pool.clone())?;

    for key in 1..=2000i64 {
        assert!(tree.insert(key, rid_for(key))?);
    }
    for key in (1..=2000i64).step_by(2) {
        tree.remove(&key)?;
    }
    tree.validate()?;

    let entries: Vec<(i64, Rid)> = tree.begin()?.collect();
    assert_eq!(entries.len(), 1000);
    for (i, (key, value)) in entries.iter().enumerate() {
        let expected = (i as i64 + 1) * 2;
        assert_eq!(*key, expected);
        assert_eq!(*value, rid_for(expected));
    }

    assert_eq!(buffer_pool.pinned_page_count(), 0);
    Ok(())
}

#[test]
fn test_small_fanout_split_and_merge_shapes() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(64)?;
    // Tiny fan-out forces multi-level splits and merges with few keys.
    let tree = BPlusTree::<i64>::with_max_sizes(buffer_pool.clone(), 4, 4)?;

    // A shuffled-ish insertion order exercises splits at both ends.
    let keys: Vec<i64> = (0..200).map(|i| (i * 37) % 200).collect();
    for &key in &keys {
        assert!(tree.insert(key, rid_for(key))?);
        tree.validate()?;
    }

    for key in 0..200i64 {
        assert_eq!(tree.get(&key)?, Some(rid_for(key)));
    }

    // Remove in a different order, validating shape as the tree shrinks
    // through redistribution, merges, and finally root collapse.
    let removals: Vec<i64> = (0..200).map(|i| (i * 73) % 200).collect();
    for &key in &removals {
        tree.remove(&key)?;
        tree.validate()?;
    }
    assert!(tree.is_empty());
    assert_eq!(tree.get(&17)?, None);

    // The tree is usable again after collapsing to empty.
    assert!(tree.insert(7, rid_for(7))?);
    assert_eq!(tree.get(&7)?, Some(rid_for(7)));

    assert_eq!(buffer_pool.pinned_page_count(), 0);
    Ok(())
}

#[test]
fn test_odd_fanout_keeps_occupancy_bounds() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(64)?;
    // An odd fan-out makes the two split halves unequal; every node must
    // still come out at or above ⌈max/2⌉.
    let tree = BPlusTree::<i32>::with_max_sizes(buffer_pool.clone(), 3, 3)?;

    // Fill one leaf to its limit, then force the first split with a key
    // that lands in the right half.
    for key in [1i32, 2, 3, 4] {
        assert!(tree.insert(key, Rid::new(2, key as u32))?);
        tree.validate()?;
    }

    // Splits landing in the left half, and multi-level internal splits.
    for key in (5..120i32).rev() {
        assert!(tree.insert(key, Rid::new(2, key as u32))?);
        tree.validate()?;
    }
    for key in 1..120i32 {
        assert_eq!(tree.get(&key)?, Some(Rid::new(2, key as u32)));
    }

    // Tear the whole tree down at the same fan-out.
    for key in 1..120i32 {
        tree.remove(&key)?;
        tree.validate()?;
    }
    assert!(tree.is_empty());
    assert_eq!(buffer_pool.pinned_page_count(), 0);
    Ok(())
}

#[test]
fn test_i32_default_fanout_split() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(64)?;
    // 4-byte keys derive an odd leaf fan-out; crossing it exercises the
    // uneven split under the default constructor.
    let tree = BPlusTree::<i32>::new(buffer_pool.clone())?;

    for key in 0..800i32 {
        assert!(tree.insert(key, Rid::new(2, key as u32))?);
    }
    tree.validate()?;

    for key in [0i32, 399, 799] {
        assert_eq!(tree.get(&key)?, Some(Rid::new(2, key as u32)));
    }
    assert_eq!(tree.get(&800)?, None);
    assert_eq!(tree.begin()?.count(), 800);
    assert_eq!(buffer_pool.pinned_page_count(), 0);
    Ok(())
}

#[test]
fn test_iterator_from_key() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(32)?;
    let tree = BPlusTree::<i64>::with_max_sizes(buffer_pool.clone(), 4, 4)?;

    for key in (0..100i64).step_by(2) {
        tree.insert(key, rid_for(key))?;
    }

    // Start between keys: lands on the next larger one.
    let from_between: Vec<i64> = tree.begin_at(&31)?.map(|(k, _)| k).collect();
    assert_eq!(from_between.first(), Some(&32));
    assert_eq!(from_between.len(), 34);

    // Start on an existing key: included.
    let from_exact: Vec<i64> = tree.begin_at(&40)?.map(|(k, _)| k).collect();
    assert_eq!(from_exact.first(), Some(&40));

    // Start past the last key: empty scan.
    let mut past_end = tree.begin_at(&99)?;
    assert!(past_end.is_end());
    assert_eq!(past_end.next(), None);

    assert_eq!(buffer_pool.pinned_page_count(), 0);
    Ok(())
}

#[test]
fn test_empty_tree_operations() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(16)?;
    let tree = BPlusTree::<i64>::new(buffer_pool.clone())?;

    assert!(tree.is_empty());
    assert_eq!(tree.get(&1)?, None);
    tree.remove(&1)?;
    assert!(tree.begin()?.is_end());
    assert_eq!(buffer_pool.pinned_page_count(), 0);
    Ok(())
}

#[test]
fn test_concurrent_disjoint_inserts() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(128)?;
    let tree = Arc::new(BPlusTree::<i64>::with_max_sizes(
        buffer_pool.clone(),
        8,
        8,
    )?);

    const THREADS: i64 = 4;
    const PER_THREAD: i64 = 400;

    let mut handles = Vec::new();
    for t in 0..THREADS {
        let tree = Arc::clone(&tree);
        handles.push(thread::spawn(move || {
            for i in 0..PER_THREAD {
                let key = i * THREADS + t;
                assert!(tree.insert(key, rid_for(key)).unwrap());
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    tree.validate()?;
    let entries: Vec<i64> = tree.begin()?.map(|(k, _)| k).collect();
    assert_eq!(entries.len(), (THREADS * PER_THREAD) as usize);
    for (i, key) in entries.iter().enumerate() {
        assert_eq!(*key, i as i64);
    }
    assert_eq!(buffer_pool.pinned_page_count(), 0);
    Ok(())
}

#[test]
fn test_concurrent_readers_during_writes() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(128)?;
    // Default fan-out: the root settles during seeding, so the reads
    // below never race a root change (readers take no root latch).
    let tree = Arc::new(BPlusTree::<i64>::new(buffer_pool.clone())?);

    // Seed half the key space, then read it while the other half lands.
    for key in (0..1000i64).step_by(2) {
        tree.insert(key, rid_for(key))?;
    }

    let writer = {
        let tree = Arc::clone(&tree);
        thread::spawn(move || {
            for key in (1..1000i64).step_by(2) {
                tree.insert(key, rid_for(key)).unwrap();
            }
        })
    };
    let mut readers = Vec::new();
    for _ in 0..3 {
        let tree = Arc::clone(&tree);
        readers.push(thread::spawn(move || {
            for key in (0..1000i64).step_by(2) {
                // Seeded keys stay visible throughout.
                assert_eq!(tree.get(&key).unwrap(), Some(rid_for(key)));
            }
        }));
    }

    writer.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }

    tree.validate()?;
    assert_eq!(tree.begin()?.count(), 1000);
    assert_eq!(buffer_pool.pinned_page_count(), 0);
    Ok(())
}
