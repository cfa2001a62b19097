//! B+-tree behavior under point, range, and randomized workloads.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tempfile::TempDir;

use sable_common::config::EngineConfig;
use sable_common::types::{Iid, Rid};
use sable_storage::{BTreeIndex, BufferPool, DiskManager, KeyColumn, KeyKind, KeySchema};

struct Fixture {
    _dir: TempDir,
    index: Arc<BTreeIndex>,
}

/// Opens an index keyed by a single 4-byte INT column.
fn int_index() -> Fixture {
    open_index(KeySchema::new(vec![KeyColumn::new(KeyKind::Int, 4)]))
}

/// Opens an index whose key width forces a fan-out of exactly 4, so
/// splits and merges trigger after a handful of keys.
fn narrow_index() -> Fixture {
    open_index(KeySchema::new(vec![KeyColumn::new(KeyKind::Bytes, 1011)]))
}

fn open_index(schema: KeySchema) -> Fixture {
    let dir = TempDir::new().unwrap();
    let disk = Arc::new(DiskManager::new(dir.path()));
    let pool = Arc::new(BufferPool::new(&EngineConfig::default(), Arc::clone(&disk)));
    BTreeIndex::create(&disk, "t_id.idx", &schema).unwrap();
    let index = Arc::new(BTreeIndex::open(&disk, pool, "t_id.idx", schema).unwrap());
    Fixture { _dir: dir, index }
}

fn int_key(v: i32) -> Vec<u8> {
    v.to_le_bytes().to_vec()
}

/// Fixed-width key whose lexicographic order matches `v`'s numeric order.
fn wide_key(v: u32) -> Vec<u8> {
    let mut key = vec![0u8; 1011];
    key[..4].copy_from_slice(&v.to_be_bytes());
    key
}

fn collect_all(index: &Arc<BTreeIndex>) -> Vec<Rid> {
    let lower = index.leaf_begin().unwrap();
    let upper = index.leaf_end().unwrap();
    index.scan(lower, upper).map(|r| r.unwrap()).collect()
}

#[test]
fn test_get_returns_last_insert() {
    let fx = int_index();
    assert!(fx.index.insert(&int_key(7), Rid::new(1, 1)).unwrap());
    assert_eq!(fx.index.get(&int_key(7)).unwrap(), Some(Rid::new(1, 1)));
    assert_eq!(fx.index.get(&int_key(8)).unwrap(), None);

    assert!(fx.index.delete(&int_key(7)).unwrap());
    assert_eq!(fx.index.get(&int_key(7)).unwrap(), None);
}

#[test]
fn test_duplicate_insert_rejected() {
    let fx = int_index();
    assert!(fx.index.insert(&int_key(1), Rid::new(1, 0)).unwrap());
    assert!(!fx.index.insert(&int_key(1), Rid::new(2, 9)).unwrap());
    // The original pairing survives.
    assert_eq!(fx.index.get(&int_key(1)).unwrap(), Some(Rid::new(1, 0)));
}

#[test]
fn test_delete_missing_is_false() {
    let fx = int_index();
    assert!(!fx.index.delete(&int_key(42)).unwrap());
}

#[test]
fn test_bounds_coincide_iff_absent() {
    let fx = int_index();
    for v in [10, 20, 30] {
        fx.index.insert(&int_key(v), Rid::new(v, 0)).unwrap();
    }
    assert_ne!(
        fx.index.lower_bound(&int_key(20)).unwrap(),
        fx.index.upper_bound(&int_key(20)).unwrap()
    );
    assert_eq!(
        fx.index.lower_bound(&int_key(25)).unwrap(),
        fx.index.upper_bound(&int_key(25)).unwrap()
    );
}

#[test]
fn test_leaf_chain_yields_ascending_rids() {
    let fx = int_index();
    let mut rng = StdRng::seed_from_u64(7);
    let mut keys: Vec<i32> = (0..2000).collect();
    keys.shuffle(&mut rng);
    for &v in &keys {
        assert!(fx.index.insert(&int_key(v), Rid::new(v, v)).unwrap());
    }
    fx.index.validate().unwrap();

    let rids = collect_all(&fx.index);
    assert_eq!(rids.len(), 2000);
    for (i, rid) in rids.iter().enumerate() {
        assert_eq!(rid.page_no, i as i32);
    }
}

#[test]
fn test_root_split_produces_height_two() {
    let fx = int_index();
    let max_size = fx.index.max_size() as i32;

    let mut rng = StdRng::seed_from_u64(11);
    let mut keys: Vec<i32> = (0..2 * max_size + 1).collect();
    keys.shuffle(&mut rng);
    for &v in &keys {
        assert!(fx.index.insert(&int_key(v), Rid::new(v, 0)).unwrap());
    }
    assert_eq!(fx.index.height().unwrap(), 2);
    fx.index.validate().unwrap();

    let rids = collect_all(&fx.index);
    let got: Vec<i32> = rids.iter().map(|r| r.page_no).collect();
    let want: Vec<i32> = (0..2 * max_size + 1).collect();
    assert_eq!(got, want);
}

#[test]
fn test_delete_all_keys_leaves_empty_root() {
    let fx = narrow_index();
    let mut rng = StdRng::seed_from_u64(13);
    let n = 40u32;
    for v in 0..n {
        fx.index.insert(&wide_key(v), Rid::new(v as i32, 0)).unwrap();
    }
    assert!(fx.index.height().unwrap() > 1);

    let mut keys: Vec<u32> = (0..n).collect();
    keys.shuffle(&mut rng);
    for &v in &keys {
        assert!(fx.index.delete(&wide_key(v)).unwrap());
    }

    assert_eq!(fx.index.height().unwrap(), 1);
    let begin = fx.index.leaf_begin().unwrap();
    assert_eq!(fx.index.leaf_end().unwrap(), begin);
    assert_eq!(fx.index.lower_bound(&wide_key(17)).unwrap(), begin);
    assert_eq!(begin.slot_no, 0);
}

#[test]
fn test_random_workload_preserves_invariants() {
    let fx = narrow_index();
    let mut rng = StdRng::seed_from_u64(17);
    let mut live = std::collections::BTreeSet::new();

    for round in 0..600 {
        let v = rng.gen_range(0..200u32);
        if rng.gen_bool(0.6) || live.is_empty() {
            let inserted = fx.index.insert(&wide_key(v), Rid::new(v as i32, 0)).unwrap();
            assert_eq!(inserted, live.insert(v));
        } else if live.len() > 1 {
            let deleted = fx.index.delete(&wide_key(v)).unwrap();
            assert_eq!(deleted, live.remove(&v));
        }
        if round % 50 == 0 {
            fx.index.validate().unwrap();
        }
    }
    fx.index.validate().unwrap();

    // Exactly one entry per live key, in ascending order.
    let rids = collect_all(&fx.index);
    let got: Vec<u32> = rids.iter().map(|r| r.page_no as u32).collect();
    let want: Vec<u32> = live.iter().copied().collect();
    assert_eq!(got, want);

    for v in 0..200u32 {
        let found = fx.index.get(&wide_key(v)).unwrap();
        assert_eq!(found.is_some(), live.contains(&v), "key {v}");
    }
}

#[test]
fn test_range_scan_between_bounds() {
    let fx = int_index();
    for v in (0..100).step_by(2) {
        fx.index.insert(&int_key(v), Rid::new(v, 0)).unwrap();
    }
    // [>= 10, <= 30] == lower_bound(10) .. upper_bound(30)
    let lower = fx.index.lower_bound(&int_key(10)).unwrap();
    let upper = fx.index.upper_bound(&int_key(30)).unwrap();
    let got: Vec<i32> = fx
        .index
        .scan(lower, upper)
        .map(|r| r.unwrap().page_no)
        .collect();
    let want: Vec<i32> = (10..=30).step_by(2).collect();
    assert_eq!(got, want);
}

#[test]
fn test_bound_normalizes_across_leaf_boundary() {
    let fx = narrow_index();
    // Fan-out 4: inserting 0,2,4,6,8 leaves leaves [0,2] and [4,6,8].
    for v in (0..10u32).step_by(2) {
        fx.index.insert(&wide_key(v), Rid::new(v as i32, 0)).unwrap();
    }
    // 3 descends into the left leaf and falls past its end; the
    // position must be normalized to slot 0 of the right sibling.
    let pos = fx.index.lower_bound(&wide_key(3)).unwrap();
    assert_eq!(pos.slot_no, 0);
    let begin: Iid = fx.index.leaf_begin().unwrap();
    assert_ne!(pos.page_no, begin.page_no);
    assert_eq!(fx.index.rid_at(pos).unwrap().page_no, 4);
}

#[test]
fn test_reopen_preserves_tree() {
    let dir = TempDir::new().unwrap();
    let disk = Arc::new(DiskManager::new(dir.path()));
    let pool = Arc::new(BufferPool::new(&EngineConfig::default(), Arc::clone(&disk)));
    let schema = KeySchema::new(vec![KeyColumn::new(KeyKind::Int, 4)]);
    BTreeIndex::create(&disk, "t_id.idx", &schema).unwrap();
    {
        let index = BTreeIndex::open(&disk, Arc::clone(&pool), "t_id.idx", schema.clone()).unwrap();
        for v in 0..500 {
            index.insert(&int_key(v), Rid::new(v, 0)).unwrap();
        }
        pool.flush_file(index.file_id()).unwrap();
        pool.evict_file(index.file_id()).unwrap();
        disk.close_file(index.file_id()).unwrap();
    }
    let index = Arc::new(BTreeIndex::open(&disk, pool, "t_id.idx", schema).unwrap());
    index.validate().unwrap();
    assert_eq!(index.get(&int_key(123)).unwrap(), Some(Rid::new(123, 0)));
    assert_eq!(collect_all(&index).len(), 500);
}
