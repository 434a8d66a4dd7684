//! MemTable Tests
//!
//! Tests verify:
//! - Basic put/get/delete through internal keys
//! - Sequence visibility (snapshot reads)
//! - Tombstone handling
//! - Sorted iteration in internal key order
//! - Size tracking
//! - Concurrent access patterns

use std::sync::Arc;
use std::thread;

use stratadb::comparator::InternalKeyComparator;
use stratadb::iterator::InternalIterator;
use stratadb::memtable::{MemTable, MemTableEntry};
use stratadb::types::{parse_internal_key, LookupKey, ValueType, MAX_SEQUENCE_NUMBER};
use stratadb::{BytewiseComparator, ReverseComparator};

// =============================================================================
// Helper Functions
// =============================================================================

fn new_memtable() -> Arc<MemTable> {
    Arc::new(MemTable::new(InternalKeyComparator::new(Arc::new(BytewiseComparator))))
}

fn latest(mem: &MemTable, key: &[u8]) -> Option<MemTableEntry> {
    mem.get(&LookupKey::new(key, MAX_SEQUENCE_NUMBER))
}

fn value(v: &[u8]) -> Option<MemTableEntry> {
    Some(MemTableEntry::Value(v.to_vec()))
}

/// Collect (user_key, sequence, type) triples in iteration order
fn collect(mem: &Arc<MemTable>) -> Vec<(Vec<u8>, u64, ValueType)> {
    let mut iter = mem.iter();
    iter.seek_to_first().unwrap();
    let mut out = Vec::new();
    while iter.valid() {
        let parsed = parse_internal_key(iter.key()).unwrap();
        out.push((parsed.user_key.to_vec(), parsed.sequence, parsed.value_type));
        iter.next().unwrap();
    }
    out
}

// =============================================================================
// Basic Operations Tests
// =============================================================================

#[test]
fn test_new_memtable_is_empty() {
    let mem = new_memtable();
    assert_eq!(mem.entry_count(), 0);
    assert!(mem.is_empty());
    assert_eq!(latest(&mem, b"anything"), None);
}

#[test]
fn test_put_and_get() {
    let mem = new_memtable();
    mem.add(1, ValueType::Value, b"key1", b"value1");

    assert_eq!(latest(&mem, b"key1"), value(b"value1"));
    assert_eq!(latest(&mem, b"key2"), None);
}

#[test]
fn test_newer_version_wins() {
    let mem = new_memtable();
    mem.add(1, ValueType::Value, b"key", b"old");
    mem.add(2, ValueType::Value, b"key", b"new");

    // Both versions are kept
    assert_eq!(mem.entry_count(), 2);
    assert_eq!(latest(&mem, b"key"), value(b"new"));
}

#[test]
fn test_delete_yields_tombstone() {
    let mem = new_memtable();
    mem.add(1, ValueType::Value, b"key", b"value");
    mem.add(2, ValueType::Deletion, b"key", b"");

    assert_eq!(latest(&mem, b"key"), Some(MemTableEntry::Tombstone));
}

#[test]
fn test_prefix_key_is_not_a_match() {
    let mem = new_memtable();
    mem.add(1, ValueType::Value, b"keyA", b"v");

    assert_eq!(latest(&mem, b"key"), None);
}

#[test]
fn test_empty_key_and_value() {
    let mem = new_memtable();
    mem.add(1, ValueType::Value, b"", b"");

    assert_eq!(latest(&mem, b""), value(b""));
}

// =============================================================================
// Sequence Visibility Tests
// =============================================================================

#[test]
fn test_get_at_older_sequence() {
    let mem = new_memtable();
    mem.add(5, ValueType::Value, b"key", b"v5");
    mem.add(10, ValueType::Value, b"key", b"v10");
    mem.add(15, ValueType::Deletion, b"key", b"");

    assert_eq!(mem.get(&LookupKey::new(b"key", 4)), None);
    assert_eq!(mem.get(&LookupKey::new(b"key", 5)), value(b"v5"));
    assert_eq!(mem.get(&LookupKey::new(b"key", 12)), value(b"v10"));
    assert_eq!(mem.get(&LookupKey::new(b"key", 15)), Some(MemTableEntry::Tombstone));
}

// =============================================================================
// Iteration Tests
// =============================================================================

#[test]
fn test_iteration_is_internal_key_order() {
    let mem = new_memtable();
    mem.add(3, ValueType::Value, b"b", b"b3");
    mem.add(1, ValueType::Value, b"a", b"a1");
    mem.add(4, ValueType::Deletion, b"b", b"");
    mem.add(2, ValueType::Value, b"c", b"c2");

    // User keys ascending, sequences descending within a key
    assert_eq!(
        collect(&mem),
        vec![
            (b"a".to_vec(), 1, ValueType::Value),
            (b"b".to_vec(), 4, ValueType::Deletion),
            (b"b".to_vec(), 3, ValueType::Value),
            (b"c".to_vec(), 2, ValueType::Value),
        ]
    );
}

#[test]
fn test_iterator_seek_and_prev() {
    let mem = new_memtable();
    for (i, k) in [b"a", b"c", b"e"].iter().enumerate() {
        mem.add(i as u64 + 1, ValueType::Value, *k, *k);
    }

    let mut iter = mem.iter();
    iter.seek(LookupKey::new(b"b", MAX_SEQUENCE_NUMBER).internal_key()).unwrap();
    assert!(iter.valid());
    assert_eq!(iter.value(), b"c");

    iter.prev().unwrap();
    assert_eq!(iter.value(), b"a");
    iter.prev().unwrap();
    assert!(!iter.valid());

    iter.seek_to_last().unwrap();
    assert_eq!(iter.value(), b"e");
}

#[test]
fn test_iterator_sees_later_inserts() {
    let mem = new_memtable();
    mem.add(1, ValueType::Value, b"a", b"1");

    let mut iter = mem.iter();
    iter.seek_to_first().unwrap();
    mem.add(2, ValueType::Value, b"b", b"2");
    iter.next().unwrap();

    assert!(iter.valid());
    assert_eq!(iter.value(), b"2");
}

#[test]
fn test_custom_comparator_order() {
    let mem = Arc::new(MemTable::new(InternalKeyComparator::new(Arc::new(ReverseComparator))));
    mem.add(1, ValueType::Value, b"a", b"");
    mem.add(2, ValueType::Value, b"c", b"");
    mem.add(3, ValueType::Value, b"b", b"");

    let keys: Vec<Vec<u8>> = collect(&mem).into_iter().map(|(k, _, _)| k).collect();
    assert_eq!(keys, vec![b"c".to_vec(), b"b".to_vec(), b"a".to_vec()]);
}

// =============================================================================
// Size Tracking Tests
// =============================================================================

#[test]
fn test_memory_usage_grows() {
    let mem = new_memtable();
    let before = mem.approximate_memory_usage();

    mem.add(1, ValueType::Value, b"key", &vec![0u8; 4096]);
    let after = mem.approximate_memory_usage();

    assert!(after >= before + 4096);
}

// =============================================================================
// Concurrency Tests
// =============================================================================

#[test]
fn test_concurrent_readers_with_writer() {
    let mem = new_memtable();
    for i in 0..100u64 {
        mem.add(i + 1, ValueType::Value, format!("key{:03}", i).as_bytes(), b"v");
    }

    let writer = {
        let mem = Arc::clone(&mem);
        thread::spawn(move || {
            for i in 100..200u64 {
                mem.add(i + 1, ValueType::Value, format!("key{:03}", i).as_bytes(), b"v");
            }
        })
    };

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let mem = Arc::clone(&mem);
            thread::spawn(move || {
                for i in 0..100u64 {
                    let key = format!("key{:03}", i);
                    assert_eq!(latest(&mem, key.as_bytes()), value(b"v"));
                }
            })
        })
        .collect();

    writer.join().unwrap();
    for r in readers {
        r.join().unwrap();
    }
    assert_eq!(mem.entry_count(), 200);
}
