//! Tests for the LRU cache
//!
//! These tests verify:
//! - Insert and lookup
//! - Least-recently-used eviction by charge
//! - Pinned entries survive eviction until released
//! - Erase semantics with outstanding handles
//! - Hit/miss accounting

use stratadb::cache::LruCache;

// =============================================================================
// Helper Functions
// =============================================================================

fn cache_with_capacity(capacity: usize) -> LruCache<u64, String> {
    LruCache::new(capacity)
}

fn lookup_value(cache: &LruCache<u64, String>, key: u64) -> Option<String> {
    cache.lookup(&key).map(|h| (*h).clone())
}

// =============================================================================
// Basic Operations Tests
// =============================================================================

#[test]
fn test_insert_and_lookup() {
    let cache = cache_with_capacity(100);

    drop(cache.insert(1, "one".to_string(), 1));
    drop(cache.insert(2, "two".to_string(), 1));

    assert_eq!(lookup_value(&cache, 1), Some("one".to_string()));
    assert_eq!(lookup_value(&cache, 2), Some("two".to_string()));
    assert_eq!(lookup_value(&cache, 3), None);
    assert_eq!(cache.len(), 2);
    assert_eq!(cache.total_charge(), 2);
}

#[test]
fn test_insert_replaces_existing() {
    let cache = cache_with_capacity(100);

    drop(cache.insert(1, "old".to_string(), 10));
    drop(cache.insert(1, "new".to_string(), 3));

    assert_eq!(lookup_value(&cache, 1), Some("new".to_string()));
    assert_eq!(cache.len(), 1);
    assert_eq!(cache.total_charge(), 3);
}

#[test]
fn test_new_id_is_unique() {
    let cache = cache_with_capacity(10);
    let a = cache.new_id();
    let b = cache.new_id();
    assert_ne!(a, b);
}

// =============================================================================
// Eviction Tests
// =============================================================================

#[test]
fn test_evicts_least_recently_used() {
    let cache = cache_with_capacity(3);

    for i in 0..3 {
        drop(cache.insert(i, format!("v{}", i), 1));
    }
    // Touch 0 so that 1 becomes the oldest
    assert!(lookup_value(&cache, 0).is_some());

    drop(cache.insert(3, "v3".to_string(), 1));

    assert_eq!(lookup_value(&cache, 1), None);
    assert!(lookup_value(&cache, 0).is_some());
    assert!(lookup_value(&cache, 2).is_some());
    assert!(lookup_value(&cache, 3).is_some());
}

#[test]
fn test_large_charge_evicts_several() {
    let cache = cache_with_capacity(10);

    for i in 0..5 {
        drop(cache.insert(i, format!("v{}", i), 2));
    }
    drop(cache.insert(99, "big".to_string(), 7));

    assert!(cache.total_charge() <= 10);
    assert!(lookup_value(&cache, 99).is_some());
    assert_eq!(lookup_value(&cache, 0), None);
}

// =============================================================================
// Pinning Tests
// =============================================================================

#[test]
fn test_pinned_entry_is_not_evicted() {
    let cache = cache_with_capacity(2);

    let pinned = cache.insert(1, "pinned".to_string(), 1);
    drop(cache.insert(2, "a".to_string(), 1));
    drop(cache.insert(3, "b".to_string(), 1));
    drop(cache.insert(4, "c".to_string(), 1));

    assert_eq!(&*pinned, "pinned");
    assert_eq!(lookup_value(&cache, 1), Some("pinned".to_string()));
    drop(pinned);
}

#[test]
fn test_usage_may_exceed_capacity_while_pinned() {
    let cache = cache_with_capacity(2);

    let a = cache.insert(1, "a".to_string(), 2);
    let b = cache.insert(2, "b".to_string(), 2);
    assert_eq!(cache.total_charge(), 4);

    // Releasing makes the entries evictable again
    drop(a);
    assert_eq!(cache.total_charge(), 2);
    drop(b);
    assert_eq!(cache.total_charge(), 2);
    assert_eq!(lookup_value(&cache, 2), Some("b".to_string()));
}

// =============================================================================
// Erase Tests
// =============================================================================

#[test]
fn test_erase_keeps_outstanding_handle_valid() {
    let cache = cache_with_capacity(10);

    let handle = cache.insert(1, "value".to_string(), 1);
    cache.erase(&1);

    assert_eq!(lookup_value(&cache, 1), None);
    assert_eq!(&*handle, "value");
    assert_eq!(cache.total_charge(), 0);
}

#[test]
fn test_stale_handle_does_not_touch_new_entry() {
    let cache = cache_with_capacity(10);

    let old = cache.insert(1, "old".to_string(), 1);
    let new = cache.insert(1, "new".to_string(), 1);
    drop(old);

    // The replacement is still pinned by `new`
    assert_eq!(&*new, "new");
    drop(new);
    assert_eq!(lookup_value(&cache, 1), Some("new".to_string()));
}

// =============================================================================
// Statistics Tests
// =============================================================================

#[test]
fn test_hit_and_miss_counts() {
    let cache = cache_with_capacity(10);
    drop(cache.insert(1, "v".to_string(), 1));

    lookup_value(&cache, 1);
    lookup_value(&cache, 1);
    lookup_value(&cache, 2);

    assert_eq!(cache.stats(), (2, 1));
}
