//! Tests for SSTable implementation
//!
//! These tests verify:
//! - SSTable creation and writing
//! - Point lookups through the index and bloom filter
//! - Ordered, bidirectional iteration across many blocks
//! - Snappy and uncompressed blocks
//! - Block cache population
//! - File format validation

use std::fs::{self, File};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use stratadb::cache::BlockCache;
use stratadb::iterator::InternalIterator;
use stratadb::storage::sstable::BlockReadOptions;
use stratadb::storage::{SSTable, SSTableBuilder, SSTableReader, TableOptions};
use stratadb::{BloomFilterPolicy, CompressionType, ErrorKind};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_temp_sstable() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("000007.ldb");
    (temp_dir, path)
}

fn key(i: usize) -> Vec<u8> {
    format!("key{:05}", i).into_bytes()
}

fn small_block_options() -> TableOptions {
    TableOptions {
        block_size: 256,
        ..TableOptions::default()
    }
}

/// Create an SSTable with numbered entries
fn create_sstable_with_entries(path: &PathBuf, count: usize, options: TableOptions) -> SSTable {
    let mut builder = SSTableBuilder::new(path, options).unwrap();
    for i in 0..count {
        let value = format!("value{}", i);
        builder.add(&key(i), value.as_bytes()).unwrap();
    }
    builder.finish().unwrap()
}

fn open(path: &PathBuf, table: &SSTable, options: TableOptions) -> Arc<SSTableReader> {
    Arc::new(SSTableReader::open(path, table.file_size, options, None).unwrap())
}

fn get(reader: &SSTableReader, k: &[u8]) -> Option<Vec<u8>> {
    match reader.internal_get(&BlockReadOptions::default(), k).unwrap() {
        Some((found, value)) if found == k => Some(value),
        _ => None,
    }
}

// =============================================================================
// SSTableBuilder Tests
// =============================================================================

#[test]
fn test_builder_creates_file() {
    let (_temp, path) = setup_temp_sstable();

    let sstable = create_sstable_with_entries(&path, 5, TableOptions::default());

    assert!(path.exists());
    assert_eq!(sstable.entry_count(), 5);
    assert_eq!(sstable.file_size, fs::metadata(&path).unwrap().len());
    assert_eq!(sstable.smallest, key(0));
    assert_eq!(sstable.largest, key(4));
}

#[test]
fn test_builder_rejects_unsorted_keys() {
    let (_temp, path) = setup_temp_sstable();

    let mut builder = SSTableBuilder::new(&path, TableOptions::default()).unwrap();
    builder.add(b"b", b"1").unwrap();
    let err = builder.add(b"a", b"2").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);

    // Duplicates are rejected too
    let err = builder.add(b"b", b"3").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}

#[test]
fn test_empty_table() {
    let (_temp, path) = setup_temp_sstable();

    let sstable = SSTableBuilder::new(&path, TableOptions::default())
        .unwrap()
        .finish()
        .unwrap();
    assert_eq!(sstable.entry_count(), 0);

    let reader = open(&path, &sstable, TableOptions::default());
    let mut iter = reader.iter(BlockReadOptions::default());
    iter.seek_to_first().unwrap();
    assert!(!iter.valid());
    assert_eq!(get(&reader, b"anything"), None);
}

#[test]
fn test_abandon_removes_file() {
    let (_temp, path) = setup_temp_sstable();

    let mut builder = SSTableBuilder::new(&path, TableOptions::default()).unwrap();
    builder.add(b"k", b"v").unwrap();
    builder.abandon().unwrap();

    assert!(!path.exists());
}

// =============================================================================
// SSTableReader Lookup Tests
// =============================================================================

#[test]
fn test_get_across_many_blocks() {
    let (_temp, path) = setup_temp_sstable();
    let sstable = create_sstable_with_entries(&path, 1000, small_block_options());
    let reader = open(&path, &sstable, small_block_options());

    for i in (0..1000).step_by(37) {
        assert_eq!(get(&reader, &key(i)), Some(format!("value{}", i).into_bytes()));
    }
    assert_eq!(get(&reader, b"key99999"), None);
    assert_eq!(get(&reader, b"aaa"), None);
}

#[test]
fn test_internal_get_returns_next_key_on_miss() {
    let (_temp, path) = setup_temp_sstable();
    let sstable = create_sstable_with_entries(&path, 10, TableOptions::default());
    let reader = open(&path, &sstable, TableOptions::default());

    let (found, _) = reader
        .internal_get(&BlockReadOptions::default(), b"key00003x")
        .unwrap()
        .unwrap();
    assert_eq!(found, key(4));
}

#[test]
fn test_filter_is_loaded_and_used() {
    let (_temp, path) = setup_temp_sstable();
    let options = TableOptions {
        filter_policy: Some(Arc::new(BloomFilterPolicy::new(10))),
        ..small_block_options()
    };
    let sstable = create_sstable_with_entries(&path, 500, options.clone());
    let reader = open(&path, &sstable, options);

    assert!(reader.has_filter());
    for i in 0..500 {
        assert!(get(&reader, &key(i)).is_some(), "filter dropped key {}", i);
    }
}

#[test]
fn test_filter_ignored_without_policy() {
    let (_temp, path) = setup_temp_sstable();
    let options = TableOptions {
        filter_policy: Some(Arc::new(BloomFilterPolicy::new(10))),
        ..TableOptions::default()
    };
    let sstable = create_sstable_with_entries(&path, 10, options);

    let reader = open(&path, &sstable, TableOptions::default());
    assert!(!reader.has_filter());
    assert!(get(&reader, &key(3)).is_some());
}

// =============================================================================
// Iterator Tests
// =============================================================================

#[test]
fn test_iterate_forward_and_backward() {
    let (_temp, path) = setup_temp_sstable();
    let sstable = create_sstable_with_entries(&path, 300, small_block_options());
    let reader = open(&path, &sstable, small_block_options());

    let mut iter = reader.iter(BlockReadOptions::default());
    iter.seek_to_first().unwrap();
    let mut count = 0;
    while iter.valid() {
        assert_eq!(iter.key(), key(count).as_slice());
        count += 1;
        iter.next().unwrap();
    }
    assert_eq!(count, 300);

    iter.seek_to_last().unwrap();
    let mut i = 300;
    while iter.valid() {
        i -= 1;
        assert_eq!(iter.key(), key(i).as_slice());
        iter.prev().unwrap();
    }
    assert_eq!(i, 0);
}

#[test]
fn test_iterator_seek() {
    let (_temp, path) = setup_temp_sstable();
    let sstable = create_sstable_with_entries(&path, 100, small_block_options());
    let reader = open(&path, &sstable, small_block_options());

    let mut iter = reader.iter(BlockReadOptions::default());
    iter.seek(b"key00050").unwrap();
    assert_eq!(iter.key(), key(50).as_slice());

    iter.seek(b"key00050a").unwrap();
    assert_eq!(iter.key(), key(51).as_slice());

    iter.seek(b"zzz").unwrap();
    assert!(!iter.valid());
}

// =============================================================================
// Compression Tests
// =============================================================================

#[test]
fn test_snappy_shrinks_compressible_data() {
    let (_temp, dir_path) = setup_temp_sstable();
    let dir = dir_path.parent().unwrap();
    let snappy_path = dir.join("snappy.ldb");
    let raw_path = dir.join("raw.ldb");

    let build = |path: &PathBuf, compression: CompressionType| {
        let options = TableOptions {
            compression,
            ..TableOptions::default()
        };
        let mut builder = SSTableBuilder::new(path, options).unwrap();
        for i in 0..200 {
            builder.add(&key(i), &[b'x'; 200]).unwrap();
        }
        builder.finish().unwrap()
    };

    let compressed = build(&snappy_path, CompressionType::Snappy);
    let raw = build(&raw_path, CompressionType::None);
    assert!(compressed.file_size < raw.file_size);

    let reader = open(&snappy_path, &compressed, TableOptions::default());
    assert_eq!(get(&reader, &key(150)), Some(vec![b'x'; 200]));
}

// =============================================================================
// Block Cache Tests
// =============================================================================

#[test]
fn test_reads_fill_block_cache() {
    let (_temp, path) = setup_temp_sstable();
    let sstable = create_sstable_with_entries(&path, 200, small_block_options());
    let cache = Arc::new(BlockCache::new(1 << 20));
    let reader = SSTableReader::open(&path, sstable.file_size, small_block_options(), Some(cache.clone())).unwrap();

    assert!(cache.is_empty());
    let opts = BlockReadOptions::default();
    reader.internal_get(&opts, &key(10)).unwrap();
    assert_eq!(cache.len(), 1);

    // Same block again is a hit
    reader.internal_get(&opts, &key(11)).unwrap();
    let (hits, _) = cache.stats();
    assert!(hits >= 1);
}

#[test]
fn test_fill_cache_false_leaves_cache_empty() {
    let (_temp, path) = setup_temp_sstable();
    let sstable = create_sstable_with_entries(&path, 200, small_block_options());
    let cache = Arc::new(BlockCache::new(1 << 20));
    let reader = SSTableReader::open(&path, sstable.file_size, small_block_options(), Some(cache.clone())).unwrap();

    let opts = BlockReadOptions {
        verify_checksums: true,
        fill_cache: false,
    };
    assert!(reader.internal_get(&opts, &key(10)).unwrap().is_some());
    assert!(cache.is_empty());
}

// =============================================================================
// File Format Validation Tests
// =============================================================================

#[test]
fn test_open_rejects_short_file() {
    let (_temp, path) = setup_temp_sstable();
    File::create(&path).unwrap().write_all(b"tiny").unwrap();

    let err = SSTableReader::open(&path, 4, TableOptions::default(), None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CorruptedData);
}

#[test]
fn test_open_rejects_bad_magic() {
    let (_temp, path) = setup_temp_sstable();
    let sstable = create_sstable_with_entries(&path, 10, TableOptions::default());

    let mut bytes = fs::read(&path).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;
    fs::write(&path, &bytes).unwrap();

    let err = SSTableReader::open(&path, sstable.file_size, TableOptions::default(), None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CorruptedData);
}

#[test]
fn test_verify_checksums_detects_flipped_data_byte() {
    let (_temp, path) = setup_temp_sstable();
    let options = TableOptions {
        compression: CompressionType::None,
        ..TableOptions::default()
    };
    let sstable = create_sstable_with_entries(&path, 10, options.clone());

    // First data block starts at offset 0
    let mut bytes = fs::read(&path).unwrap();
    bytes[5] ^= 0xFF;
    fs::write(&path, &bytes).unwrap();

    let reader = open(&path, &sstable, options);
    let opts = BlockReadOptions {
        verify_checksums: true,
        fill_cache: false,
    };
    let err = reader.internal_get(&opts, &key(0)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CorruptedData);
}
