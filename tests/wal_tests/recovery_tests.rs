//! Tests for WAL Recovery
//!
//! These tests verify:
//! - Recovery from a clean WAL (no corruption)
//! - Recovery from an empty WAL
//! - Recovery with partial writes (truncated tail)
//! - Recovery with corrupted entries (CRC mismatch)
//! - Damaged length fields in the middle of a log are skipped, never truncated
//! - Paranoid mode rejecting corruption
//! - Verify mode (stats only, file untouched)

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use stratadb::batch::WriteBatch;
use stratadb::wal::{WalEntry, WalRecovery, WalWriter, HEADER_SIZE};
use stratadb::ErrorKind;
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_temp_wal() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let wal_path = temp_dir.path().join("000005.log");
    (temp_dir, wal_path)
}

/// Write `count` single-put entries with sequences 1..=count
fn write_entries(path: &PathBuf, count: usize) -> Vec<u64> {
    let mut writer = WalWriter::create(path).unwrap();
    let mut offsets = Vec::new();
    for i in 0..count {
        let mut batch = WriteBatch::new();
        batch.put(format!("key{}", i).as_bytes(), format!("value{}", i).as_bytes());
        let entry = WalEntry::new(i as u64 + 1, &batch);
        offsets.push(writer.add_record(&entry.serialize().unwrap()).unwrap());
    }
    writer.sync().unwrap();
    offsets
}

fn flip_byte(path: &PathBuf, offset: usize) {
    let mut bytes = fs::read(path).unwrap();
    bytes[offset] ^= 0xFF;
    File::create(path).unwrap().write_all(&bytes).unwrap();
}

// =============================================================================
// Recover: Clean WAL Tests
// =============================================================================

#[test]
fn test_recover_empty_file() {
    let (_temp, wal_path) = setup_temp_wal();
    File::create(&wal_path).unwrap();

    let (entries, result) = WalRecovery::recover(&wal_path, false).unwrap();

    assert_eq!(entries.len(), 0);
    assert_eq!(result.entries_recovered, 0);
    assert_eq!(result.entries_corrupted, 0);
    assert_eq!(result.last_sequence, 0);
    assert!(!result.was_truncated);
}

#[test]
fn test_recover_multiple_entries_in_order() {
    let (_temp, wal_path) = setup_temp_wal();
    write_entries(&wal_path, 20);

    let (entries, result) = WalRecovery::recover(&wal_path, false).unwrap();

    assert_eq!(entries.len(), 20);
    assert_eq!(result.entries_recovered, 20);
    assert_eq!(result.last_sequence, 20);
    for (i, entry) in entries.iter().enumerate() {
        assert_eq!(entry.sequence, i as u64 + 1);
    }
}

#[test]
fn test_last_sequence_counts_every_operation() {
    let (_temp, wal_path) = setup_temp_wal();

    let mut batch = WriteBatch::new();
    batch.put(b"a", b"1").put(b"b", b"2").delete(b"c");
    {
        let mut writer = WalWriter::create(&wal_path).unwrap();
        writer.add_record(&WalEntry::new(10, &batch).serialize().unwrap()).unwrap();
    }

    let (_, result) = WalRecovery::recover(&wal_path, false).unwrap();
    assert_eq!(result.last_sequence, 12);
}

// =============================================================================
// Recover: Truncation Tests
// =============================================================================

#[test]
fn test_recover_truncates_partial_tail() {
    let (_temp, wal_path) = setup_temp_wal();
    let offsets = write_entries(&wal_path, 5);

    let full_len = fs::metadata(&wal_path).unwrap().len();
    OpenOptions::new().write(true).open(&wal_path).unwrap().set_len(full_len - 3).unwrap();

    let (entries, result) = WalRecovery::recover(&wal_path, false).unwrap();

    assert_eq!(entries.len(), 4);
    assert!(result.was_truncated);
    assert_eq!(result.last_sequence, 4);
    // The torn record is cut off so the next append starts on a boundary
    assert_eq!(fs::metadata(&wal_path).unwrap().len(), offsets[4]);
}

#[test]
fn test_recover_header_only_tail() {
    let (_temp, wal_path) = setup_temp_wal();
    write_entries(&wal_path, 2);

    let clean_len = fs::metadata(&wal_path).unwrap().len();
    OpenOptions::new()
        .append(true)
        .open(&wal_path)
        .unwrap()
        .write_all(&[0u8; HEADER_SIZE / 2])
        .unwrap();

    let (entries, result) = WalRecovery::recover(&wal_path, false).unwrap();
    assert_eq!(entries.len(), 2);
    assert!(result.was_truncated);
    assert_eq!(fs::metadata(&wal_path).unwrap().len(), clean_len);
}

// =============================================================================
// Recover: Corruption Tests
// =============================================================================

#[test]
fn test_recover_skips_corrupted_record() {
    let (_temp, wal_path) = setup_temp_wal();
    let offsets = write_entries(&wal_path, 3);

    flip_byte(&wal_path, offsets[1] as usize + HEADER_SIZE + 2);

    let (entries, result) = WalRecovery::recover(&wal_path, false).unwrap();

    assert_eq!(entries.len(), 2);
    assert_eq!(result.entries_recovered, 2);
    assert_eq!(result.entries_corrupted, 1);
    assert_eq!(entries[0].sequence, 1);
    assert_eq!(entries[1].sequence, 3);
    assert!(!result.was_truncated);
}

#[test]
fn test_recover_paranoid_rejects_corruption() {
    let (_temp, wal_path) = setup_temp_wal();
    let offsets = write_entries(&wal_path, 3);

    flip_byte(&wal_path, offsets[1] as usize + HEADER_SIZE);

    let err = WalRecovery::recover(&wal_path, true).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CorruptedData);
}

#[test]
fn test_recover_skips_bad_length_mid_log() {
    let (_temp, wal_path) = setup_temp_wal();
    write_entries(&wal_path, 3);
    let full_len = fs::metadata(&wal_path).unwrap().len();

    // High byte of the first record's length
    flip_byte(&wal_path, 7);

    let (entries, result) = WalRecovery::recover(&wal_path, false).unwrap();

    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].sequence, 2);
    assert_eq!(entries[1].sequence, 3);
    assert_eq!(result.entries_corrupted, 1);
    assert!(!result.was_truncated);
    assert_eq!(fs::metadata(&wal_path).unwrap().len(), full_len);
}

#[test]
fn test_recover_paranoid_rejects_bad_length_mid_log() {
    let (_temp, wal_path) = setup_temp_wal();
    write_entries(&wal_path, 3);
    let full_len = fs::metadata(&wal_path).unwrap().len();

    flip_byte(&wal_path, 7);

    let err = WalRecovery::recover(&wal_path, true).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CorruptedData);
    // Committed records after the damage are still on disk
    assert_eq!(fs::metadata(&wal_path).unwrap().len(), full_len);
}

#[test]
fn test_recover_bad_length_in_last_record_is_torn_tail() {
    let (_temp, wal_path) = setup_temp_wal();
    let offsets = write_entries(&wal_path, 3);

    flip_byte(&wal_path, offsets[2] as usize + 7);

    let (entries, result) = WalRecovery::recover(&wal_path, true).unwrap();

    assert_eq!(entries.len(), 2);
    assert!(result.was_truncated);
    assert_eq!(fs::metadata(&wal_path).unwrap().len(), offsets[2]);
}

#[test]
fn test_recover_skips_undecodable_payload() {
    let (_temp, wal_path) = setup_temp_wal();

    {
        let mut writer = WalWriter::create(&wal_path).unwrap();
        // Well framed, but not a valid entry
        writer.add_record(&[0xFF; 3]).unwrap();
        let mut batch = WriteBatch::new();
        batch.put(b"k", b"v");
        writer.add_record(&WalEntry::new(9, &batch).serialize().unwrap()).unwrap();
    }

    let (entries, result) = WalRecovery::recover(&wal_path, false).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].sequence, 9);
    assert_eq!(result.entries_corrupted, 1);
}

// =============================================================================
// Verify Tests
// =============================================================================

#[test]
fn test_verify_leaves_file_untouched() {
    let (_temp, wal_path) = setup_temp_wal();
    write_entries(&wal_path, 4);

    let full_len = fs::metadata(&wal_path).unwrap().len();
    OpenOptions::new().write(true).open(&wal_path).unwrap().set_len(full_len - 1).unwrap();

    let result = WalRecovery::verify(&wal_path).unwrap();
    assert_eq!(result.entries_recovered, 3);
    assert!(result.was_truncated);
    assert_eq!(fs::metadata(&wal_path).unwrap().len(), full_len - 1);
}

#[test]
fn test_recover_missing_file_is_error() {
    let (_temp, wal_path) = setup_temp_wal();
    assert!(WalRecovery::recover(&wal_path, false).is_err());
}
