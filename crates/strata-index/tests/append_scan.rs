//! Append-order and traversal behavior.

use pretty_assertions::assert_eq;
use strata_index::{IndexError, IndexOptions, KvIndex};
use tempfile::TempDir;

/// Options producing the given row-block length at creation.
fn options(block_len: u64) -> IndexOptions {
    IndexOptions {
        key_count_hint: 1,
        record_count_hint: block_len,
        ..IndexOptions::default()
    }
}

fn collect_fwd(index: &KvIndex, key: u32) -> Vec<u64> {
    index.fwd_cursor(key).unwrap().collect::<Result<_, _>>().unwrap()
}

fn collect_rev(index: &KvIndex, key: u32) -> Vec<u64> {
    index.cursor(key).unwrap().collect::<Result<_, _>>().unwrap()
}

#[test]
fn test_values_keep_insertion_order() {
    let dir = TempDir::new().unwrap();
    let mut index = KvIndex::open(dir.path().join("sym"), &options(4)).unwrap();

    let rows = [100, 7, 205, 3, 900, 901, 902, 12, 13];
    for &row in &rows {
        index.add(11, row).unwrap();
    }
    index.commit().unwrap();

    assert_eq!(index.values(11).unwrap(), rows.to_vec());
    for (i, &row) in rows.iter().enumerate() {
        assert_eq!(index.value_at(11, i as u64).unwrap(), row);
    }
    assert_eq!(index.last_value(11).unwrap(), 13);
}

#[test]
fn test_five_values_across_two_blocks() {
    let dir = TempDir::new().unwrap();
    let mut index = KvIndex::open(dir.path().join("sym"), &options(4)).unwrap();

    for row in [100, 200, 300, 400, 500] {
        index.add(5, row).unwrap();
    }
    index.commit().unwrap();

    assert_eq!(index.value_count(5).unwrap(), 5);
    assert_eq!(index.value_at(5, 0).unwrap(), 100);
    // The fifth value crossed into the second block.
    assert_eq!(index.value_at(5, 4).unwrap(), 500);
    assert_eq!(collect_rev(&index, 5), vec![500, 400, 300, 200, 100]);
    assert_eq!(collect_fwd(&index, 5), vec![100, 200, 300, 400, 500]);

    let cursor = index.cursor(5).unwrap();
    assert_eq!(cursor.size(), 5);
}

#[test]
fn test_single_block_chain_on_both_cursors() {
    let dir = TempDir::new().unwrap();
    let mut index = KvIndex::open(dir.path().join("sym"), &options(4)).unwrap();

    // Exactly one full block: the tail's forward link stays zero and must
    // never be followed.
    for row in [10, 20, 30, 40] {
        index.add(9, row).unwrap();
    }
    index.commit().unwrap();

    assert_eq!(collect_fwd(&index, 9), vec![10, 20, 30, 40]);
    assert_eq!(collect_rev(&index, 9), vec![40, 30, 20, 10]);

    // A partially filled sole block behaves the same.
    let mut index = KvIndex::open(dir.path().join("sym2"), &options(4)).unwrap();
    for row in [1, 2, 3] {
        index.add(9, row).unwrap();
    }
    index.commit().unwrap();
    assert_eq!(collect_fwd(&index, 9), vec![1, 2, 3]);
    assert_eq!(collect_rev(&index, 9), vec![3, 2, 1]);
}

#[test]
fn test_block_len_one_degenerates_to_one_row_per_block() {
    let dir = TempDir::new().unwrap();
    let mut index = KvIndex::open(dir.path().join("sym"), &options(1)).unwrap();
    assert_eq!(index.row_block_len(), 1);

    for row in 0..10u64 {
        index.add(0, row * 3).unwrap();
    }
    index.commit().unwrap();

    assert_eq!(collect_fwd(&index, 0), (0..10).map(|r| r * 3).collect::<Vec<_>>());
    assert_eq!(collect_rev(&index, 0), (0..10).rev().map(|r| r * 3).collect::<Vec<_>>());
    assert_eq!(index.value_at(0, 7).unwrap(), 21);
}

#[test]
fn test_unseen_keys_read_as_empty() {
    let dir = TempDir::new().unwrap();
    let mut index = KvIndex::open(dir.path().join("sym"), &options(4)).unwrap();
    index.add(2, 50).unwrap();
    index.commit().unwrap();

    // Key 7 lies beyond every entry ever written.
    assert!(!index.contains(7).unwrap());
    assert_eq!(index.value_count(7).unwrap(), 0);
    assert_eq!(index.values(7).unwrap(), Vec::<u64>::new());
    assert_eq!(index.cursor(7).unwrap().count(), 0);
    assert_eq!(index.fwd_cursor(7).unwrap().count(), 0);
    assert!(matches!(index.value_at(7, 0), Err(IndexError::KeyNotFound(7))));
    assert!(matches!(index.last_value(7), Err(IndexError::KeyNotFound(7))));
}

#[test]
fn test_value_at_rejects_out_of_bounds_indices() {
    let dir = TempDir::new().unwrap();
    let mut index = KvIndex::open(dir.path().join("sym"), &options(4)).unwrap();
    index.add(2, 50).unwrap();
    index.add(2, 51).unwrap();
    index.commit().unwrap();

    match index.value_at(2, 2) {
        Err(IndexError::OutOfBounds { index: 2, count: 2 }) => {}
        other => panic!("expected OutOfBounds, got {other:?}"),
    }
}

#[test]
fn test_last_value_requires_contains_check() {
    let dir = TempDir::new().unwrap();
    let mut index = KvIndex::open(dir.path().join("sym"), &options(4)).unwrap();
    // Touching key 6 allocates entries up to it; key 4 now exists with no
    // values.
    index.add(6, 77).unwrap();
    index.commit().unwrap();

    assert!(!index.contains(4).unwrap());
    assert!(matches!(index.last_value(4), Err(IndexError::KeyNotFound(4))));
    assert!(index.contains(6).unwrap());
    assert_eq!(index.last_value(6).unwrap(), 77);
}

#[test]
fn test_sparse_key_gap_reads_as_zero_rows() {
    let dir = TempDir::new().unwrap();
    let mut index = KvIndex::open(dir.path().join("sym"), &options(4)).unwrap();

    index.add(0, 1).unwrap();
    // Jumping far ahead leaves hundreds of skipped entries, which must read
    // as empty rather than as stale bytes.
    index.add(900, 2).unwrap();
    index.commit().unwrap();

    for key in 1..900 {
        assert_eq!(index.value_count(key).unwrap(), 0, "key {key}");
    }
    assert_eq!(index.values(0).unwrap(), vec![1]);
    assert_eq!(index.values(900).unwrap(), vec![2]);
}

#[test]
fn test_values_into_reuses_the_buffer() {
    let dir = TempDir::new().unwrap();
    let mut index = KvIndex::open(dir.path().join("sym"), &options(2)).unwrap();
    for row in 0..5u64 {
        index.add(1, row).unwrap();
        index.add(2, 100 + row).unwrap();
    }
    index.commit().unwrap();

    let mut buffer = Vec::new();
    index.values_into(1, &mut buffer).unwrap();
    assert_eq!(buffer, vec![0, 1, 2, 3, 4]);

    index.values_into(2, &mut buffer).unwrap();
    assert_eq!(buffer, vec![100, 101, 102, 103, 104]);

    index.values_into(3, &mut buffer).unwrap();
    assert!(buffer.is_empty());
}

#[test]
fn test_interleaved_keys_keep_separate_chains() {
    let dir = TempDir::new().unwrap();
    let mut index = KvIndex::open(dir.path().join("sym"), &options(2)).unwrap();

    for row in 0..20u64 {
        index.add((row % 3) as u32, row).unwrap();
    }
    index.commit().unwrap();

    assert_eq!(collect_fwd(&index, 0), vec![0, 3, 6, 9, 12, 15, 18]);
    assert_eq!(collect_fwd(&index, 1), vec![1, 4, 7, 10, 13, 16, 19]);
    assert_eq!(collect_fwd(&index, 2), vec![2, 5, 8, 11, 14, 17]);
    assert_eq!(index.size(), 20);
}
