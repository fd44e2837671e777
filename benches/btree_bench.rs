use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tempfile::NamedTempFile;

use araldb::common::types::Rid;
use araldb::{BPlusTree, BufferPoolManager};

fn build_tree(keys: &[i64]) -> (Arc<BufferPoolManager>, BPlusTree<i64>, NamedTempFile) {
    let file = NamedTempFile::new().unwrap();
    let buffer_pool = Arc::new(BufferPoolManager::new(256, file.path()).unwrap());
    let tree = BPlusTree::<i64>::new(Arc::clone(&buffer_pool)).unwrap();
    for &key in keys {
        tree.insert(key, Rid::new(2, key as u32)).unwrap();
    }
    (buffer_pool, tree, file)
}

fn bench_insert(c: &mut Criterion) {
    let mut rng = rand::rngs::StdRng::seed_from_u64(7);
    let mut keys: Vec<i64> = (0..10_000).collect();
    keys.shuffle(&mut rng);

    c.bench_function("btree_insert_10k_shuffled", |b| {
        b.iter(|| {
            let (_pool, tree, _file) = build_tree(&[]);
            for &key in &keys {
                tree.insert(black_box(key), Rid::new(2, key as u32)).unwrap();
            }
        })
    });
}

fn bench_get(c: &mut Criterion) {
    let mut rng = rand::rngs::StdRng::seed_from_u64(7);
    let mut keys: Vec<i64> = (0..10_000).collect();
    keys.shuffle(&mut rng);
    let (_pool, tree, _file) = build_tree(&keys);

    c.bench_function("btree_get_hot", |b| {
        b.iter(|| {
            for key in (0..10_000i64).step_by(97) {
                black_box(tree.get(black_box(&key)).unwrap());
            }
        })
    });
}

fn bench_scan(c: &mut Criterion) {
    let keys: Vec<i64> = (0..10_000).collect();
    let (_pool, tree, _file) = build_tree(&keys);

    c.bench_function("btree_full_scan", |b| {
        b.iter(|| {
            let count = tree.begin().unwrap().count();
            assert_eq!(black_box(count), 10_000);
        })
    });
}

criterion_group!(benches, bench_insert, bench_get, bench_scan);
criterion_main!(benches);
