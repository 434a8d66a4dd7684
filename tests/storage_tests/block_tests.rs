//! Tests for block encoding
//!
//! These tests verify:
//! - Prefix-compressed entries decode back to the full keys
//! - Restart points and binary search seeks
//! - Backward iteration across restart boundaries
//! - Rejection of malformed blocks

use std::sync::Arc;

use stratadb::iterator::InternalIterator;
use stratadb::storage::sstable::{Block, BlockBuilder};
use stratadb::{BytewiseComparator, ErrorKind};

// =============================================================================
// Helper Functions
// =============================================================================

fn build_block(keys: &[&[u8]], restart_interval: usize) -> Arc<Block> {
    let mut builder = BlockBuilder::new(restart_interval);
    for k in keys {
        builder.add(k, &[k.len() as u8]);
    }
    Arc::new(Block::new(builder.finish().to_vec()).unwrap())
}

fn numbered_keys(n: usize) -> Vec<Vec<u8>> {
    (0..n).map(|i| format!("prefix_shared_{:04}", i).into_bytes()).collect()
}

// =============================================================================
// Builder Tests
// =============================================================================

#[test]
fn test_empty_block() {
    let mut builder = BlockBuilder::new(16);
    assert!(builder.is_empty());
    let block = Arc::new(Block::new(builder.finish().to_vec()).unwrap());

    let mut iter = block.iter(Arc::new(BytewiseComparator));
    iter.seek_to_first().unwrap();
    assert!(!iter.valid());
    iter.seek(b"a").unwrap();
    assert!(!iter.valid());
}

#[test]
fn test_prefix_compression_saves_space() {
    let keys = numbered_keys(100);
    let total_key_bytes: usize = keys.iter().map(|k| k.len()).sum();

    let mut builder = BlockBuilder::new(16);
    for k in &keys {
        builder.add(k, b"");
    }
    assert!(builder.current_size_estimate() < total_key_bytes);
}

#[test]
fn test_reset_allows_reuse() {
    let mut builder = BlockBuilder::new(4);
    builder.add(b"old", b"1");
    builder.finish();
    builder.reset();
    builder.add(b"new", b"2");

    let block = Arc::new(Block::new(builder.finish().to_vec()).unwrap());
    let mut iter = block.iter(Arc::new(BytewiseComparator));
    iter.seek_to_first().unwrap();
    assert_eq!(iter.key(), b"new");
    iter.next().unwrap();
    assert!(!iter.valid());
}

// =============================================================================
// Iterator Tests
// =============================================================================

#[test]
fn test_forward_iteration_restores_keys() {
    for interval in [1, 2, 16] {
        let keys = numbered_keys(50);
        let refs: Vec<&[u8]> = keys.iter().map(|k| k.as_slice()).collect();
        let block = build_block(&refs, interval);

        let mut iter = block.iter(Arc::new(BytewiseComparator));
        iter.seek_to_first().unwrap();
        for k in &keys {
            assert!(iter.valid());
            assert_eq!(iter.key(), k.as_slice());
            assert_eq!(iter.value(), &[k.len() as u8]);
            iter.next().unwrap();
        }
        assert!(!iter.valid());
    }
}

#[test]
fn test_backward_iteration_crosses_restarts() {
    let keys = numbered_keys(40);
    let refs: Vec<&[u8]> = keys.iter().map(|k| k.as_slice()).collect();
    let block = build_block(&refs, 3);

    let mut iter = block.iter(Arc::new(BytewiseComparator));
    iter.seek_to_last().unwrap();
    for k in keys.iter().rev() {
        assert_eq!(iter.key(), k.as_slice());
        iter.prev().unwrap();
    }
    assert!(!iter.valid());
}

#[test]
fn test_seek_exact_between_and_past_end() {
    let block = build_block(&[b"apple", b"banana", b"cherry", b"date", b"fig"], 2);
    let mut iter = block.iter(Arc::new(BytewiseComparator));

    iter.seek(b"cherry").unwrap();
    assert_eq!(iter.key(), b"cherry");

    iter.seek(b"coconut").unwrap();
    assert_eq!(iter.key(), b"date");

    iter.seek(b"a").unwrap();
    assert_eq!(iter.key(), b"apple");

    iter.seek(b"grape").unwrap();
    assert!(!iter.valid());
}

#[test]
fn test_seek_then_prev() {
    let block = build_block(&[b"a", b"b", b"c", b"d", b"e"], 2);
    let mut iter = block.iter(Arc::new(BytewiseComparator));

    iter.seek(b"d").unwrap();
    iter.prev().unwrap();
    assert_eq!(iter.key(), b"c");
    iter.prev().unwrap();
    assert_eq!(iter.key(), b"b");
}

// =============================================================================
// Malformed Block Tests
// =============================================================================

#[test]
fn test_block_too_short() {
    let err = Block::new(vec![1, 2]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CorruptedData);
}

#[test]
fn test_block_with_impossible_restart_count() {
    // Claims 1000 restarts in an 8-byte block
    let mut data = vec![0u8; 4];
    data.extend_from_slice(&1000u32.to_le_bytes());
    let err = Block::new(data).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CorruptedData);
}

#[test]
fn test_garbage_entry_reports_corruption() {
    // One restart at offset 0 pointing at a truncated varint
    let mut data = vec![0x80, 0x80];
    data.extend_from_slice(&0u32.to_le_bytes());
    data.extend_from_slice(&1u32.to_le_bytes());
    let block = Arc::new(Block::new(data).unwrap());

    let mut iter = block.iter(Arc::new(BytewiseComparator));
    assert!(iter.seek_to_first().is_err());
    assert!(!iter.valid());
}
