//! Tests for comparators and internal key format
//!
//! These tests verify:
//! - Bytewise and reverse ordering
//! - Separator and successor shortening
//! - Closure-based comparators
//! - Internal key encoding and ordering

use std::cmp::Ordering;
use std::sync::Arc;

use stratadb::comparator::InternalKeyComparator;
use stratadb::types::{parse_internal_key, InternalKey, LookupKey, ValueType, MAX_SEQUENCE_NUMBER};
use stratadb::{BytewiseComparator, Comparator, FnComparator, ReverseComparator};

// =============================================================================
// Helper Functions
// =============================================================================

fn ikey(user_key: &[u8], seq: u64, value_type: ValueType) -> Vec<u8> {
    InternalKey::new(user_key, seq, value_type).encode().to_vec()
}

fn icmp() -> InternalKeyComparator {
    InternalKeyComparator::new(Arc::new(BytewiseComparator))
}

// =============================================================================
// Bytewise Comparator Tests
// =============================================================================

#[test]
fn test_bytewise_order() {
    let cmp = BytewiseComparator;
    assert_eq!(cmp.compare(b"a", b"b"), Ordering::Less);
    assert_eq!(cmp.compare(b"ab", b"a"), Ordering::Greater);
    assert_eq!(cmp.compare(b"", b""), Ordering::Equal);
    assert_eq!(cmp.compare(&[0xff], b"z"), Ordering::Greater);
}

#[test]
fn test_shortest_separator() {
    let cmp = BytewiseComparator;
    assert_eq!(cmp.find_shortest_separator(b"abcdefg", b"abzzz"), b"abd".to_vec());

    // Adjacent bytes leave nothing to shorten
    assert_eq!(cmp.find_shortest_separator(b"abc", b"abd"), b"abc".to_vec());

    // Prefix: unchanged
    assert_eq!(cmp.find_shortest_separator(b"abc", b"abcdef"), b"abc".to_vec());
}

#[test]
fn test_short_successor() {
    let cmp = BytewiseComparator;
    assert_eq!(cmp.find_short_successor(b"abc"), b"b".to_vec());
    assert_eq!(cmp.find_short_successor(&[0xff, 0xff, 0x01]), vec![0xff, 0xff, 0x02]);
    assert_eq!(cmp.find_short_successor(&[0xff, 0xff]), vec![0xff, 0xff]);
}

#[test]
fn test_reverse_order() {
    let cmp = ReverseComparator;
    assert_eq!(cmp.compare(b"a", b"b"), Ordering::Greater);
    assert_eq!(cmp.find_short_successor(b"abc"), b"abc".to_vec());
    assert_ne!(cmp.name(), BytewiseComparator.name());
}

// =============================================================================
// FnComparator Tests
// =============================================================================

#[test]
fn test_fn_comparator_uses_closures() {
    // Case-insensitive ASCII order
    let cmp = FnComparator::new("test.CaseInsensitive", |a, b| {
        a.to_ascii_lowercase().cmp(&b.to_ascii_lowercase())
    })
    .with_successor(|k| Some(k.to_vec()));

    assert_eq!(cmp.name(), "test.CaseInsensitive");
    assert_eq!(cmp.compare(b"ABC", b"abc"), Ordering::Equal);
    assert_eq!(cmp.compare(b"a", b"B"), Ordering::Less);
    // No separator closure: start is returned unchanged
    assert_eq!(cmp.find_shortest_separator(b"aaaa", b"zzzz"), b"aaaa".to_vec());
}

// =============================================================================
// Internal Key Tests
// =============================================================================

#[test]
fn test_internal_key_round_trip() {
    let encoded = ikey(b"user", 42, ValueType::Deletion);
    let parsed = parse_internal_key(&encoded).unwrap();

    assert_eq!(parsed.user_key, b"user");
    assert_eq!(parsed.sequence, 42);
    assert_eq!(parsed.value_type, ValueType::Deletion);
    assert_eq!(InternalKey::decode_from(&encoded).user_key(), b"user");
}

#[test]
fn test_parse_rejects_short_or_bad_type() {
    assert!(parse_internal_key(b"short").is_none());

    let mut encoded = ikey(b"k", 1, ValueType::Value);
    let type_byte = encoded.len() - 8;
    encoded[type_byte] = 7;
    assert!(parse_internal_key(&encoded).is_none());
}

#[test]
fn test_internal_order_user_key_then_newest_first() {
    let cmp = icmp();

    assert_eq!(
        cmp.compare(&ikey(b"a", 1, ValueType::Value), &ikey(b"b", 100, ValueType::Value)),
        Ordering::Less
    );
    assert_eq!(
        cmp.compare(&ikey(b"a", 10, ValueType::Value), &ikey(b"a", 5, ValueType::Value)),
        Ordering::Less
    );
    // Same sequence: Value sorts before Deletion
    assert_eq!(
        cmp.compare(&ikey(b"a", 5, ValueType::Value), &ikey(b"a", 5, ValueType::Deletion)),
        Ordering::Less
    );
}

#[test]
fn test_lookup_key_sorts_before_visible_entries() {
    let cmp = icmp();
    let lookup = LookupKey::new(b"k", 7);

    assert_eq!(lookup.user_key(), b"k");
    assert_eq!(cmp.compare(lookup.internal_key(), &ikey(b"k", 7, ValueType::Value)), Ordering::Equal);
    assert_eq!(cmp.compare(lookup.internal_key(), &ikey(b"k", 7, ValueType::Deletion)), Ordering::Less);
    assert_eq!(cmp.compare(lookup.internal_key(), &ikey(b"k", 6, ValueType::Value)), Ordering::Less);
    assert_eq!(cmp.compare(lookup.internal_key(), &ikey(b"k", 8, ValueType::Value)), Ordering::Greater);
}

#[test]
fn test_internal_separator_shortens_user_key() {
    let cmp = icmp();
    let start = ikey(b"foo_a_long_key", 100, ValueType::Value);
    let limit = ikey(b"foz", 200, ValueType::Value);

    let separator = cmp.find_shortest_separator(&start, &limit);
    assert!(separator.len() < start.len());
    assert_eq!(cmp.compare(&start, &separator), Ordering::Less);
    assert_eq!(cmp.compare(&separator, &limit), Ordering::Less);

    let parsed = parse_internal_key(&separator).unwrap();
    assert_eq!(parsed.sequence, MAX_SEQUENCE_NUMBER);
}

#[test]
fn test_internal_separator_same_user_key_unchanged() {
    let cmp = icmp();
    let start = ikey(b"foo", 100, ValueType::Value);
    let limit = ikey(b"foo", 99, ValueType::Value);

    assert_eq!(cmp.find_shortest_separator(&start, &limit), start);
}

#[test]
fn test_internal_successor() {
    let cmp = icmp();
    let key = ikey(b"foo", 100, ValueType::Value);

    let successor = cmp.find_short_successor(&key);
    assert_eq!(parse_internal_key(&successor).unwrap().user_key, b"g");
    assert_eq!(cmp.compare(&key, &successor), Ordering::Less);
}
