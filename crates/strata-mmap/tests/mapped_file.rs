//! Behavioral tests for extent-mapped files.

use strata_mmap::{AccessMode, MappedFile, StorageError};
use tempfile::TempDir;

fn open_rw(dir: &TempDir, name: &str) -> MappedFile {
    MappedFile::open(dir.path().join(name), AccessMode::Append, 1024, 32).unwrap()
}

#[test]
fn test_write_read_round_trip() {
    let dir = TempDir::new().unwrap();
    let mut file = open_rw(&dir, "data");

    file.write_u64(0, 0xdead_beef).unwrap();
    file.write_u64(8, 42).unwrap();
    assert_eq!(file.read_u64(0).unwrap(), 0xdead_beef);
    assert_eq!(file.read_u64(8).unwrap(), 42);

    let slice = file.get_mut(64, 32).unwrap();
    slice.copy_from_slice(&[7u8; 32]);
    assert_eq!(file.get(64, 32).unwrap(), &[7u8; 32]);
}

#[test]
fn test_append_offset_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("data");

    let mut file = MappedFile::open(&path, AccessMode::Append, 1024, 32).unwrap();
    file.write_u64(0, 1).unwrap();
    file.set_append_offset(4096).unwrap();
    let extent_size = file.extent_size();
    file.close().unwrap();

    let file = MappedFile::open(&path, AccessMode::Append, 1024, 32).unwrap();
    assert_eq!(file.append_offset(), 4096);
    assert_eq!(file.extent_size(), extent_size);
    assert_eq!(file.read_u64(0).unwrap(), 1);
}

#[test]
fn test_read_only_requires_initialized_file() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("missing");
    match MappedFile::open(&missing, AccessMode::ReadOnly, 1024, 32) {
        Err(StorageError::Uninitialized(path)) => assert_eq!(path, missing),
        other => panic!("expected Uninitialized, got {other:?}"),
    }
}

#[test]
fn test_read_only_rejects_writes() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("data");
    let file = MappedFile::open(&path, AccessMode::Append, 1024, 32).unwrap();
    file.close().unwrap();

    let mut file = MappedFile::open(&path, AccessMode::ReadOnly, 1024, 32).unwrap();
    assert!(matches!(file.get_mut(0, 8), Err(StorageError::ReadOnly)));
    assert!(matches!(file.set_append_offset(8), Err(StorageError::ReadOnly)));
}

#[test]
fn test_bad_magic_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("data");
    std::fs::write(&path, vec![0xffu8; 64]).unwrap();
    assert!(matches!(
        MappedFile::open(&path, AccessMode::Append, 1024, 32),
        Err(StorageError::InvalidHeader { .. })
    ));
}

#[test]
fn test_slice_never_straddles_an_extent() {
    let dir = TempDir::new().unwrap();
    let mut file = open_rw(&dir, "data");
    let extent = file.extent_size();

    // Fill the first extent so the boundary exists.
    file.write_u64(extent - 8, 7).unwrap();
    file.write_u64(extent, 8).unwrap();

    assert_eq!(file.extent_remaining(0), extent);
    assert_eq!(file.extent_remaining(extent - 8), 8);

    match file.get(extent - 8, 16) {
        Err(StorageError::StraddlesExtent { .. }) => {}
        other => panic!("expected StraddlesExtent, got {other:?}"),
    }
    // Both halves are reachable on their own.
    assert_eq!(file.read_u64(extent - 8).unwrap(), 7);
    assert_eq!(file.read_u64(extent).unwrap(), 8);
}

#[test]
fn test_reads_beyond_mapped_region_fail() {
    let dir = TempDir::new().unwrap();
    let file = open_rw(&dir, "data");
    assert!(matches!(
        file.read_u64(file.len() + 64),
        Err(StorageError::OutOfBounds { .. })
    ));
}

#[test]
fn test_copy_within_crosses_extent_boundaries() {
    let dir = TempDir::new().unwrap();
    let mut file = open_rw(&dir, "data");
    let extent = file.extent_size();

    // Source sits at the tail of extent 0 and spills into extent 1; the
    // destination starts misaligned inside extent 1.
    let src = extent - 64;
    let len = 128u64;
    for i in 0..len / 8 {
        file.write_u64(src + i * 8, i + 1).unwrap();
    }
    let dst = extent + 1000 * 8;
    file.copy_within(src, dst, len).unwrap();
    for i in 0..len / 8 {
        assert_eq!(file.read_u64(dst + i * 8).unwrap(), i + 1);
    }
}

#[test]
fn test_zero_range_crosses_extent_boundaries() {
    let dir = TempDir::new().unwrap();
    let mut file = open_rw(&dir, "data");
    let extent = file.extent_size();

    let start = extent - 32;
    for i in 0..8u64 {
        file.write_u64(start + i * 8, u64::MAX).unwrap();
    }
    file.zero_range(start, 64).unwrap();
    for i in 0..8u64 {
        assert_eq!(file.read_u64(start + i * 8).unwrap(), 0);
    }
}

#[test]
fn test_compact_trims_extent_slack() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("data");
    let mut file = MappedFile::open(&path, AccessMode::Append, 1024, 32).unwrap();

    file.write_u64(0, 99).unwrap();
    file.set_append_offset(8).unwrap();
    let before = std::fs::metadata(&path).unwrap().len();
    file.compact().unwrap();
    let after = std::fs::metadata(&path).unwrap().len();
    assert!(after < before);
    assert_eq!(file.read_u64(0).unwrap(), 99);
    file.close().unwrap();

    // The compacted file reopens and grows again.
    let mut file = MappedFile::open(&path, AccessMode::Append, 1024, 32).unwrap();
    assert_eq!(file.read_u64(0).unwrap(), 99);
    file.write_u64(1024, 7).unwrap();
    assert_eq!(file.read_u64(1024).unwrap(), 7);
}

#[test]
fn test_refresh_observes_writer_growth() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("data");
    let mut writer = MappedFile::open(&path, AccessMode::Append, 1024, 32).unwrap();
    writer.write_u64(0, 1).unwrap();
    writer.set_append_offset(8).unwrap();

    let mut reader = MappedFile::open(&path, AccessMode::ReadOnly, 1024, 32).unwrap();
    assert_eq!(reader.append_offset(), 8);

    // Writer grows the file past the reader's mapping.
    let far = writer.extent_size() * 2 + 8;
    writer.write_u64(far, 777).unwrap();
    writer.set_append_offset(far + 8).unwrap();

    assert!(reader.read_u64(far).is_err());
    reader.refresh().unwrap();
    assert_eq!(reader.append_offset(), far + 8);
    assert_eq!(reader.read_u64(far).unwrap(), 777);
}

#[test]
fn test_bulk_append_uses_larger_extents() {
    let dir = TempDir::new().unwrap();
    let plain = MappedFile::open(
        dir.path().join("plain"),
        AccessMode::Append,
        1 << 20,
        32,
    )
    .unwrap();
    let bulk = MappedFile::open(
        dir.path().join("bulk"),
        AccessMode::BulkAppend,
        1 << 20,
        32,
    )
    .unwrap();
    assert!(bulk.extent_size() > plain.extent_size());
}
