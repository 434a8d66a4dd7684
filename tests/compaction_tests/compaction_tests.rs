//! Tests for compaction
//!
//! These tests verify:
//! - Flushes place tables at the right level
//! - Manual range compaction moves data down and drops obsolete entries
//! - Size-triggered compaction keeps level 0 bounded
//! - Obsolete files are deleted after compaction
//! - Data stays readable throughout

use std::fs;
use std::path::Path;

use stratadb::{Db, KeyRange, Options, ReadOptions};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_temp_db(options: Options) -> (TempDir, Db) {
    let temp_dir = TempDir::new().unwrap();
    let db = Db::open(temp_dir.path(), options).unwrap();
    (temp_dir, db)
}

fn small_buffer_options() -> Options {
    Options::builder()
        .create_if_missing(true)
        .write_buffer_size(64 * 1024)
        .level0_compaction_trigger(2)
        .max_file_size(64 * 1024)
        .build()
}

fn key(i: usize) -> Vec<u8> {
    format!("key{:06}", i).into_bytes()
}

/// Incompressible filler so table sizes track the data written
fn payload(i: usize, len: usize) -> Vec<u8> {
    let mut state = (i as u64).wrapping_mul(0x9e37_79b9_7f4a_7c15).wrapping_add(1);
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            state as u8
        })
        .collect()
}

fn total_files(db: &Db) -> usize {
    (0..7).map(|level| db.num_files_at_level(level)).sum()
}

fn table_files_on_disk(dir: &Path) -> usize {
    fs::read_dir(dir)
        .unwrap()
        .filter(|e| e.as_ref().unwrap().path().extension().and_then(|x| x.to_str()) == Some("ldb"))
        .count()
}

fn count_entries(db: &Db) -> usize {
    db.iter(&ReadOptions::default())
        .unwrap()
        .entries()
        .map(|e| e.unwrap())
        .count()
}

// =============================================================================
// Flush Placement Tests
// =============================================================================

#[test]
fn test_overlapping_flushes_stay_in_level0() {
    let (_temp, db) = setup_temp_db(Options::builder().create_if_missing(true).build());

    db.put(b"a", b"1").unwrap();
    db.put(b"z", b"1").unwrap();
    db.flush().unwrap();
    assert_eq!(db.num_files_at_level(2), 1);

    // Overlaps the level-2 file, so it can only go one level down
    db.put(b"m", b"2").unwrap();
    db.flush().unwrap();
    assert_eq!(db.num_files_at_level(1), 1);

    // Overlaps level 1 now, so it stays in level 0
    db.put(b"m", b"3").unwrap();
    db.flush().unwrap();
    assert_eq!(db.num_files_at_level(0), 1);
    assert_eq!(total_files(&db), 3);
    assert_eq!(db.get(b"m").unwrap(), Some(b"3".to_vec()));
}

// =============================================================================
// Manual Compaction Tests
// =============================================================================

#[test]
fn test_compact_range_moves_everything_down() {
    let (temp, db) = setup_temp_db(Options::builder().create_if_missing(true).build());

    for round in 0..3 {
        for i in 0..200 {
            db.put(&key(i), format!("round{}", round).as_bytes()).unwrap();
        }
        db.flush().unwrap();
    }
    assert!(total_files(&db) >= 2);

    db.compact_range(None, None).unwrap();

    assert_eq!(db.num_files_at_level(0), 0);
    assert_eq!(db.num_files_at_level(1), 0);
    assert!(db.num_files_at_level(2) >= 1);
    for i in 0..200 {
        assert_eq!(db.get(&key(i)).unwrap(), Some(b"round2".to_vec()));
    }
    // Replaced tables were removed from disk
    assert_eq!(table_files_on_disk(temp.path()), total_files(&db));
}

#[test]
fn test_compact_range_drops_deleted_keys() {
    let (_temp, db) = setup_temp_db(Options::builder().create_if_missing(true).build());

    for i in 0..1000 {
        db.put(&key(i), &payload(i, 100)).unwrap();
    }
    db.flush().unwrap();
    for i in 0..1000 {
        db.delete(&key(i)).unwrap();
    }
    db.put(&key(5000), b"survivor").unwrap();

    let before = db.get_approximate_sizes(&[KeyRange::new(&key(0), &key(1000))])[0];
    db.compact_range(None, None).unwrap();
    let after = db.get_approximate_sizes(&[KeyRange::new(&key(0), &key(1000))])[0];

    assert!(after < before, "size {} -> {}", before, after);
    assert_eq!(count_entries(&db), 1);
    assert_eq!(db.get(&key(0)).unwrap(), None);
    assert_eq!(db.get(&key(5000)).unwrap(), Some(b"survivor".to_vec()));
}

#[test]
fn test_compact_partial_range() {
    let (_temp, db) = setup_temp_db(Options::builder().create_if_missing(true).build());
    for i in 0..100 {
        db.put(&key(i), b"v1").unwrap();
    }
    db.flush().unwrap();
    for i in 0..100 {
        db.put(&key(i), b"v2").unwrap();
    }
    db.flush().unwrap();

    db.compact_range(Some(&key(10)), Some(&key(20))).unwrap();

    for i in 0..100 {
        assert_eq!(db.get(&key(i)).unwrap(), Some(b"v2".to_vec()));
    }
}

#[test]
fn test_compact_range_on_empty_db() {
    let (_temp, db) = setup_temp_db(Options::builder().create_if_missing(true).build());

    db.compact_range(None, None).unwrap();

    assert_eq!(total_files(&db), 0);
}

// =============================================================================
// Automatic Compaction Tests
// =============================================================================

#[test]
fn test_size_triggered_compaction_bounds_level0() {
    let (_temp, db) = setup_temp_db(small_buffer_options());

    // Interleaved keys make every flush overlap the previous ones
    for round in 0..8 {
        for i in (round..2000).step_by(8) {
            db.put(&key(i), &payload(i, 200)).unwrap();
        }
    }
    db.wait_for_background_work().unwrap();

    assert!(db.num_files_at_level(0) < 2, "{}", db.get_property("strata.sstables").unwrap());
    assert!(total_files(&db) > 1);
    for i in (0..2000).step_by(7) {
        assert_eq!(db.get(&key(i)).unwrap(), Some(payload(i, 200)), "key {}", i);
    }
}

#[test]
fn test_compaction_preserves_latest_values() {
    let (_temp, db) = setup_temp_db(small_buffer_options());

    for round in 0..5u8 {
        for i in 0..500 {
            let mut value = payload(i, 150);
            value[0] = round;
            db.put(&key(i), &value).unwrap();
        }
    }
    db.wait_for_background_work().unwrap();
    db.compact_range(None, None).unwrap();

    assert_eq!(count_entries(&db), 500);
    for i in 0..500 {
        let value = db.get(&key(i)).unwrap().unwrap();
        assert_eq!(value[0], 4, "key {}", i);
    }
}

#[test]
fn test_compacted_db_survives_reopen() {
    let temp_dir = TempDir::new().unwrap();
    {
        let db = Db::open(temp_dir.path(), small_buffer_options()).unwrap();
        for i in 0..1500 {
            db.put(&key(i), &payload(i, 200)).unwrap();
        }
        db.compact_range(None, None).unwrap();
        db.close().unwrap();
    }

    let db = Db::open(temp_dir.path(), small_buffer_options()).unwrap();
    db.wait_for_background_work().unwrap();
    assert_eq!(count_entries(&db), 1500);
    assert_eq!(table_files_on_disk(temp_dir.path()), total_files(&db));
    assert!(db.get_property("strata.stats").unwrap().contains("Level"));
}
