//! Tests for versions and the manifest
//!
//! These tests verify:
//! - Applying edits adds and removes files per level
//! - The manifest and CURRENT survive a restart
//! - Comparator mismatches are rejected on recovery
//! - Overlap queries and memtable output placement
//! - Compaction scoring and live-file tracking

use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use stratadb::cache::BlockCache;
use stratadb::comparator::InternalKeyComparator;
use stratadb::filename::{current_file_name, descriptor_file_name, read_current_file};
use stratadb::storage::{TableCache, TableOptions};
use stratadb::types::{InternalKey, ValueType};
use stratadb::version::{FileMetaData, VersionEdit, VersionSet};
use stratadb::{ErrorKind, Options, ReverseComparator};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn version_set(dir: &Path, options: Options) -> VersionSet {
    let options = Arc::new(options);
    let icmp = InternalKeyComparator::new(Arc::clone(&options.comparator));
    let table_cache = Arc::new(TableCache::new(
        dir,
        TableOptions::for_database(&options, &icmp),
        Arc::new(BlockCache::new(1 << 20)),
        100,
    ));
    VersionSet::new(dir, options, icmp, table_cache)
}

fn setup_temp_versions() -> (TempDir, VersionSet) {
    let temp_dir = TempDir::new().unwrap();
    let versions = version_set(temp_dir.path(), Options::default());
    (temp_dir, versions)
}

/// Metadata-only file covering user keys `[smallest, largest]`
fn file(number: u64, smallest: &str, largest: &str) -> FileMetaData {
    FileMetaData::new(
        number,
        1000,
        InternalKey::new(smallest.as_bytes(), 100, ValueType::Value),
        InternalKey::new(largest.as_bytes(), 100, ValueType::Value),
    )
}

fn add_files(versions: &mut VersionSet, files: &[(usize, FileMetaData)]) {
    let mut edit = VersionEdit::new();
    for (level, f) in files {
        versions.mark_file_number_used(f.number);
        edit.add_file(*level, f.clone());
    }
    versions.log_and_apply(&mut edit).unwrap();
}

fn numbers(files: &[Arc<FileMetaData>]) -> Vec<u64> {
    files.iter().map(|f| f.number).collect()
}

fn ikey(user_key: &str) -> InternalKey {
    InternalKey::new(user_key.as_bytes(), 100, ValueType::Value)
}

// =============================================================================
// Log And Apply Tests
// =============================================================================

#[test]
fn test_log_and_apply_adds_files() {
    let (_temp, mut versions) = setup_temp_versions();

    add_files(&mut versions, &[(0, file(10, "a", "m")), (1, file(11, "n", "z"))]);

    let current = versions.current();
    assert_eq!(numbers(current.files(0)), vec![10]);
    assert_eq!(numbers(current.files(1)), vec![11]);
    assert_eq!(versions.level_summary(), "files[ 1 1 0 0 0 0 0 ]");
}

#[test]
fn test_log_and_apply_removes_files() {
    let (_temp, mut versions) = setup_temp_versions();
    add_files(&mut versions, &[(1, file(10, "a", "c")), (1, file(11, "d", "f"))]);

    let mut edit = VersionEdit::new();
    edit.remove_file(1, 10);
    versions.log_and_apply(&mut edit).unwrap();

    assert_eq!(numbers(versions.current().files(1)), vec![11]);
}

#[test]
fn test_first_apply_writes_manifest_and_current() {
    let (temp, mut versions) = setup_temp_versions();
    assert!(!current_file_name(temp.path()).exists());

    add_files(&mut versions, &[(0, file(10, "a", "b"))]);

    let manifest = read_current_file(temp.path()).unwrap();
    assert!(manifest.starts_with("MANIFEST-"));
    assert!(descriptor_file_name(temp.path(), versions.manifest_file_number()).exists());
}

#[test]
fn test_level0_files_ordered_by_number() {
    let (_temp, mut versions) = setup_temp_versions();
    add_files(&mut versions, &[(0, file(12, "a", "b")), (0, file(10, "x", "y")), (0, file(11, "c", "d"))]);

    assert_eq!(numbers(versions.current().files(0)), vec![10, 11, 12]);
}

#[test]
fn test_deeper_levels_ordered_by_smallest_key() {
    let (_temp, mut versions) = setup_temp_versions();
    add_files(&mut versions, &[(2, file(10, "x", "y")), (2, file(11, "a", "b")), (2, file(12, "m", "n"))]);

    assert_eq!(numbers(versions.current().files(2)), vec![11, 12, 10]);
}

// =============================================================================
// Recovery Tests
// =============================================================================

#[test]
fn test_recover_restores_state() {
    let temp = TempDir::new().unwrap();
    {
        let mut versions = version_set(temp.path(), Options::default());
        add_files(&mut versions, &[(0, file(20, "a", "k")), (3, file(21, "l", "p"))]);
        versions.set_last_sequence(777);

        let mut edit = VersionEdit::new();
        edit.set_log_number(19);
        edit.remove_file(0, 20);
        versions.log_and_apply(&mut edit).unwrap();
    }

    let mut versions = version_set(temp.path(), Options::default());
    let needs_new_manifest = versions.recover().unwrap();

    assert!(needs_new_manifest);
    let current = versions.current();
    assert_eq!(current.num_files(0), 0);
    assert_eq!(numbers(current.files(3)), vec![21]);
    assert_eq!(versions.last_sequence(), 777);
    assert_eq!(versions.log_number(), 19);
    assert!(versions.new_file_number() > 21);
}

#[test]
fn test_recover_reuses_manifest_when_allowed() {
    let temp = TempDir::new().unwrap();
    {
        let mut versions = version_set(temp.path(), Options::default());
        add_files(&mut versions, &[(1, file(5, "a", "b"))]);
    }

    let options = Options::builder().reuse_logs(true).build();
    let mut versions = version_set(temp.path(), options);
    assert!(!versions.recover().unwrap());

    // Appending goes to the same manifest
    let before = read_current_file(temp.path()).unwrap();
    add_files(&mut versions, &[(1, file(9, "c", "d"))]);
    assert_eq!(read_current_file(temp.path()).unwrap(), before);

    let mut reopened = version_set(temp.path(), Options::default());
    reopened.recover().unwrap();
    assert_eq!(numbers(reopened.current().files(1)), vec![5, 9]);
}

#[test]
fn test_recover_rejects_other_comparator() {
    let temp = TempDir::new().unwrap();
    {
        let mut versions = version_set(temp.path(), Options::default());
        add_files(&mut versions, &[(0, file(3, "a", "b"))]);
    }

    let options = Options::builder().comparator(Arc::new(ReverseComparator)).build();
    let mut versions = version_set(temp.path(), options);
    let err = versions.recover().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}

#[test]
fn test_recover_without_current_fails() {
    let (_temp, mut versions) = setup_temp_versions();
    assert!(versions.recover().is_err());
}

#[test]
fn test_recover_current_names_missing_manifest() {
    let temp = TempDir::new().unwrap();
    fs::write(current_file_name(temp.path()), "MANIFEST-000099\n").unwrap();

    let mut versions = version_set(temp.path(), Options::default());
    let err = versions.recover().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CorruptedData);
}

// =============================================================================
// Overlap Tests
// =============================================================================

#[test]
fn test_overlapping_inputs_in_sorted_level() {
    let (_temp, mut versions) = setup_temp_versions();
    add_files(
        &mut versions,
        &[(1, file(10, "a", "c")), (1, file(11, "e", "g")), (1, file(12, "i", "k"))],
    );
    let current = versions.current();

    let hits = current.get_overlapping_inputs(1, Some(&ikey("b")), Some(&ikey("f")));
    assert_eq!(numbers(&hits), vec![10, 11]);

    let hits = current.get_overlapping_inputs(1, Some(&ikey("d")), Some(&ikey("d")));
    assert!(hits.is_empty());

    let hits = current.get_overlapping_inputs(1, None, None);
    assert_eq!(hits.len(), 3);
}

#[test]
fn test_level0_overlap_widens_range() {
    let (_temp, mut versions) = setup_temp_versions();
    add_files(
        &mut versions,
        &[(0, file(10, "a", "d")), (0, file(11, "c", "h")), (0, file(12, "g", "k")), (0, file(13, "x", "z"))],
    );
    let current = versions.current();

    // "b" touches file 10, which pulls in 11, which pulls in 12
    let hits = current.get_overlapping_inputs(0, Some(&ikey("b")), Some(&ikey("b")));
    let mut got = numbers(&hits);
    got.sort_unstable();
    assert_eq!(got, vec![10, 11, 12]);
}

#[test]
fn test_overlap_in_level_with_open_bounds() {
    let (_temp, mut versions) = setup_temp_versions();
    add_files(&mut versions, &[(1, file(10, "m", "p"))]);
    let current = versions.current();

    assert!(current.overlap_in_level(1, None, Some(b"n")));
    assert!(current.overlap_in_level(1, Some(b"o"), None));
    assert!(!current.overlap_in_level(1, Some(b"q"), None));
    assert!(!current.overlap_in_level(1, None, Some(b"l")));
    assert!(!current.overlap_in_level(2, None, None));
}

#[test]
fn test_memtable_output_level() {
    let (_temp, mut versions) = setup_temp_versions();

    // Nothing below: pushed as deep as memtable output may go
    assert_eq!(versions.current().pick_level_for_memtable_output(b"a", b"b"), 2);

    add_files(&mut versions, &[(0, file(10, "a", "c"))]);
    assert_eq!(versions.current().pick_level_for_memtable_output(b"b", b"b"), 0);

    add_files(&mut versions, &[(2, file(11, "x", "z"))]);
    assert_eq!(versions.current().pick_level_for_memtable_output(b"y", b"y"), 1);
}

// =============================================================================
// Compaction Score And Live File Tests
// =============================================================================

#[test]
fn test_level0_file_count_triggers_compaction() {
    let temp = TempDir::new().unwrap();
    let options = Options::builder().level0_compaction_trigger(2).build();
    let mut versions = version_set(temp.path(), options);

    add_files(&mut versions, &[(0, file(10, "a", "b"))]);
    assert!(!versions.needs_compaction());

    add_files(&mut versions, &[(0, file(11, "c", "d"))]);
    assert!(versions.needs_compaction());
}

#[test]
fn test_old_versions_keep_files_live() {
    let (_temp, mut versions) = setup_temp_versions();
    add_files(&mut versions, &[(1, file(10, "a", "b"))]);

    let pinned = versions.current();
    let mut edit = VersionEdit::new();
    edit.remove_file(1, 10);
    edit.add_file(2, file(11, "a", "b"));
    versions.mark_file_number_used(11);
    versions.log_and_apply(&mut edit).unwrap();

    let mut live = HashSet::new();
    versions.add_live_files(&mut live);
    assert!(live.contains(&10));
    assert!(live.contains(&11));

    drop(pinned);
    let mut live = HashSet::new();
    versions.add_live_files(&mut live);
    assert!(!live.contains(&10));
    assert_eq!(versions.live_version_count(), 1);
}
