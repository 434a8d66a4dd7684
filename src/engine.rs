//! Engine Module
//!
//! The database handle that coordinates all components.
//!
//! ## Responsibilities
//! - Route writes through the WAL into the memtable (with group commit)
//! - Serve point reads and iterators from memtables and table files
//! - Freeze full memtables and flush them to level 0
//! - Run compactions on the background worker
//! - Recover state from the manifest and WAL on open
//! - Delete files no live version references
//!
//! ## Locking
//! One `parking_lot::Mutex` guards all mutable state. Slow I/O (WAL appends,
//! table builds, compaction merges) runs with the mutex released; only the
//! writer at the head of the queue touches the WAL, so releasing the lock
//! does not open a race on it.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::fs::{self, File, OpenOptions, TryLockError};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::batch::WriteBatch;
use crate::cache::BlockCache;
use crate::comparator::{Comparator, InternalKeyComparator};
use crate::compaction::{
    build_table, compact_range, pick_compaction, BackgroundWorker, Compaction, CompactionEnv,
    CompactionJob, CompactionStats,
};
use crate::config::{Options, ReadOptions, WriteOptions, NUM_LEVELS};
use crate::error::{Result, StrataError};
use crate::filename::{
    current_file_name, descriptor_file_name, lock_file_name, log_file_name, parse_file_name,
    set_current_file, FileType,
};
use crate::iterator::{DbIterator, InternalIterator, MergingIterator};
use crate::memtable::{MemTable, MemTableEntry};
use crate::snapshot::{Snapshot, SnapshotList};
use crate::storage::sstable::BlockReadOptions;
use crate::storage::{TableCache, TableOptions};
use crate::types::{InternalKey, LookupKey, SequenceNumber, ValueType, MAX_SEQUENCE_NUMBER, VALUE_TYPE_FOR_SEEK};
use crate::version::{new_level_iterator, Version, VersionEdit, VersionSet};
use crate::wal::{WalEntry, WalRecovery, WalWriter};

// =============================================================================
// Group Commit Limits
// =============================================================================

/// Upper bound on the bytes merged into one WAL record
const MAX_GROUP_COMMIT_BYTES: usize = 1 << 20;

/// A leader write this small only pulls in this many more bytes, so small
/// writes are not slowed down by large ones
const SMALL_WRITE_BYTES: usize = 128 << 10;

/// Table cache slots kept free for other open files
const NUM_NON_TABLE_CACHE_FILES: usize = 10;

// =============================================================================
// Public Types
// =============================================================================

/// Introspection properties understood by [`Db::get_property`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbProperty {
    /// Number of table files at a level
    NumFilesAtLevel(usize),

    /// Per-level file counts, sizes and compaction statistics
    Stats,

    /// Every table file, level by level
    SSTables,

    /// Bytes held by memtables and the block cache
    ApproximateMemoryUsage,
}

impl DbProperty {
    const PREFIX: &'static str = "strata.";

    /// Full property name, e.g. `strata.num-files-at-level2`
    pub fn name(&self) -> String {
        match self {
            DbProperty::NumFilesAtLevel(level) => format!("{}num-files-at-level{}", Self::PREFIX, level),
            DbProperty::Stats => format!("{}stats", Self::PREFIX),
            DbProperty::SSTables => format!("{}sstables", Self::PREFIX),
            DbProperty::ApproximateMemoryUsage => format!("{}approximate-memory-usage", Self::PREFIX),
        }
    }

    /// Parse a property name; `None` for unknown names
    pub fn parse(name: &str) -> Option<Self> {
        let rest = name.strip_prefix(Self::PREFIX)?;
        if let Some(level) = rest.strip_prefix("num-files-at-level") {
            let level: usize = level.parse().ok()?;
            return (level < NUM_LEVELS).then_some(DbProperty::NumFilesAtLevel(level));
        }
        match rest {
            "stats" => Some(DbProperty::Stats),
            "sstables" => Some(DbProperty::SSTables),
            "approximate-memory-usage" => Some(DbProperty::ApproximateMemoryUsage),
            _ => None,
        }
    }
}

/// Half-open user key range `[start, limit)`
#[derive(Debug, Clone, Copy)]
pub struct KeyRange<'a> {
    pub start: &'a [u8],
    pub limit: &'a [u8],
}

impl<'a> KeyRange<'a> {
    pub fn new(start: &'a [u8], limit: &'a [u8]) -> Self {
        Self { start, limit }
    }
}

// =============================================================================
// Internal State
// =============================================================================

struct PendingWriter {
    id: u64,
    /// `None` requests a memtable switch without writing anything
    batch: Option<WriteBatch>,
    sync: bool,
}

struct ManualCompaction {
    level: usize,
    begin: Option<InternalKey>,
    end: Option<InternalKey>,
    done: bool,
}

/// Everything guarded by the database mutex
struct DbState {
    mem: Arc<MemTable>,
    imm: Option<Arc<MemTable>>,
    /// `None` only while the head writer is appending to it
    log: Option<WalWriter>,
    log_number: u64,
    versions: VersionSet,

    writers: VecDeque<PendingWriter>,
    /// Results for writers committed as part of another writer's group
    completed: HashMap<u64, Result<()>>,
    next_writer_id: u64,

    bg_compaction_scheduled: bool,
    /// Sticky background failure; every later write returns it
    bg_error: Option<StrataError>,
    manual_compaction: Option<ManualCompaction>,
    /// Tables being written that no version references yet
    pending_outputs: HashSet<u64>,
    stats: [CompactionStats; NUM_LEVELS],
}

/// Exclusive lock on the database directory, held until drop
pub(crate) struct DbLock {
    file: File,
}

impl DbLock {
    pub(crate) fn acquire(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        match file.try_lock() {
            Ok(()) => Ok(Self { file }),
            Err(TryLockError::WouldBlock) => Err(StrataError::Io(std::io::Error::new(
                std::io::ErrorKind::WouldBlock,
                format!("lock {}: already held by another instance", path.display()),
            ))),
            Err(TryLockError::Error(e)) => Err(StrataError::Io(e)),
        }
    }
}

impl Drop for DbLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

struct DbInner {
    dbname: PathBuf,
    options: Arc<Options>,
    icmp: InternalKeyComparator,
    table_options: TableOptions,
    table_cache: Arc<TableCache>,
    block_cache: Arc<BlockCache>,
    snapshots: Arc<Mutex<SnapshotList>>,

    state: Mutex<DbState>,
    /// Signalled when background work finishes a step
    bg_cv: Condvar,
    /// Signalled when the writer queue changes
    writers_cv: Condvar,

    shutting_down: AtomicBool,
    /// Mirrors `state.imm.is_some()` for lock-free checks during compaction
    has_imm: AtomicBool,
    worker: BackgroundWorker,
    _lock: DbLock,
}

// =============================================================================
// Db
// =============================================================================

/// An open database
///
/// ## Concurrency Model
/// - **Writes** queue up; the writer at the head commits the whole queue
///   (up to a size limit) as one WAL record
/// - **Reads** grab the current memtables and version under a brief lock
///   and then proceed without it
/// - **Compactions** run on one background thread
///
/// `Db` is `Send + Sync`; share it with `Arc<Db>`.
pub struct Db {
    inner: Arc<DbInner>,
}

impl fmt::Debug for Db {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Db").field("path", &self.inner.dbname).finish()
    }
}

impl Db {
    /// Open the database in directory `path`
    ///
    /// On startup:
    /// 1. Create the directory and take the LOCK file
    /// 2. Create a new database or replay the manifest
    /// 3. Replay WAL files newer than the manifest's log number
    /// 4. Start a fresh WAL (unless the last one is reused)
    /// 5. Delete obsolete files and schedule any needed compaction
    pub fn open(path: impl AsRef<Path>, options: Options) -> Result<Self> {
        options.validate()?;

        // Step 1: Directory and lock
        let dbname = path.as_ref().to_path_buf();
        fs::create_dir_all(&dbname)?;
        let lock = DbLock::acquire(&lock_file_name(&dbname))?;

        // Step 2: Shared components
        let options = Arc::new(options);
        let icmp = InternalKeyComparator::new(Arc::clone(&options.comparator));
        let table_options = TableOptions::for_database(&options, &icmp);
        let block_cache = Arc::new(BlockCache::new(options.block_cache_capacity));
        let table_cache = Arc::new(TableCache::new(
            &dbname,
            table_options.clone(),
            Arc::clone(&block_cache),
            options.max_open_files - NUM_NON_TABLE_CACHE_FILES,
        ));
        let versions = VersionSet::new(
            &dbname,
            Arc::clone(&options),
            icmp.clone(),
            Arc::clone(&table_cache),
        );

        let inner = Arc::new(DbInner {
            state: Mutex::new(DbState {
                mem: Arc::new(MemTable::new(icmp.clone())),
                imm: None,
                log: None,
                log_number: 0,
                versions,
                writers: VecDeque::new(),
                completed: HashMap::new(),
                next_writer_id: 0,
                bg_compaction_scheduled: false,
                bg_error: None,
                manual_compaction: None,
                pending_outputs: HashSet::new(),
                stats: [CompactionStats::default(); NUM_LEVELS],
            }),
            dbname,
            options,
            icmp,
            table_options,
            table_cache,
            block_cache,
            snapshots: Arc::new(Mutex::new(SnapshotList::default())),
            bg_cv: Condvar::new(),
            writers_cv: Condvar::new(),
            shutting_down: AtomicBool::new(false),
            has_imm: AtomicBool::new(false),
            worker: BackgroundWorker::new(),
            _lock: lock,
        });

        // Steps 3-4: Recovery
        {
            let mut state = inner.state.lock();
            let mut edit = VersionEdit::new();
            let save_manifest = inner.recover(&mut state, &mut edit)?;

            if state.log.is_none() {
                let number = state.versions.new_file_number();
                let log = WalWriter::create(&log_file_name(&inner.dbname, number))?;
                state.log = Some(log);
                state.log_number = number;
                edit.set_log_number(number);
            }
            if save_manifest {
                edit.set_prev_log_number(0);
                edit.set_log_number(state.log_number);
                state.versions.log_and_apply(&mut edit)?;
            }

            // Step 5: Cleanup
            inner.delete_obsolete_files(&mut state);
        }

        let weak = Arc::downgrade(&inner);
        inner.worker.start("stratadb-compaction", move || {
            if let Some(db) = weak.upgrade() {
                db.background_call();
            }
        })?;
        {
            let mut state = inner.state.lock();
            inner.maybe_schedule_compaction(&mut state);
            tracing::info!(
                path = %inner.dbname.display(),
                last_sequence = state.versions.last_sequence(),
                levels = %state.versions.level_summary(),
                "Database opened"
            );
        }

        Ok(Self { inner })
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Set `key` to `value`
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.put_opt(&WriteOptions::default(), key, value)
    }

    pub fn put_opt(&self, opts: &WriteOptions, key: &[u8], value: &[u8]) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.put(key, value);
        self.write_opt(opts, batch)
    }

    /// Remove `key`. Removing a missing key is not an error.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        self.delete_opt(&WriteOptions::default(), key)
    }

    pub fn delete_opt(&self, opts: &WriteOptions, key: &[u8]) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.delete(key);
        self.write_opt(opts, batch)
    }

    /// Apply every operation of `batch` atomically
    pub fn write(&self, batch: WriteBatch) -> Result<()> {
        self.write_opt(&WriteOptions::default(), batch)
    }

    pub fn write_opt(&self, opts: &WriteOptions, batch: WriteBatch) -> Result<()> {
        self.inner.write(opts, Some(batch))
    }

    /// Flush the memtable to a level-0 table and wait for it to finish
    ///
    /// Forces a flush regardless of memtable size
    pub fn flush(&self) -> Result<()> {
        self.inner.flush_memtable()
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Get a value by key
    ///
    /// Search order:
    /// 1. Active memtable
    /// 2. Immutable memtable awaiting flush
    /// 3. Table files, level 0 newest first, then one file per deeper level
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.get_opt(&ReadOptions::default(), key)
    }

    pub fn get_opt(&self, opts: &ReadOptions, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let (mem, imm, version, sequence) = {
            let state = self.inner.state.lock();
            let sequence = match &opts.snapshot {
                Some(snapshot) => snapshot.sequence(),
                None => state.versions.last_sequence(),
            };
            (
                Arc::clone(&state.mem),
                state.imm.clone(),
                state.versions.current(),
                sequence,
            )
        };

        let lookup = LookupKey::new(key, sequence);
        let entry = match mem.get(&lookup) {
            Some(entry) => Some(entry),
            None => match imm.as_ref().and_then(|imm| imm.get(&lookup)) {
                Some(entry) => Some(entry),
                None => version.get(&block_read_options(opts), &lookup)?,
            },
        };

        Ok(match entry {
            Some(MemTableEntry::Value(value)) => Some(value),
            Some(MemTableEntry::Tombstone) | None => None,
        })
    }

    /// Ordered iterator over the database as of now (or `opts.snapshot`)
    pub fn iter(&self, opts: &ReadOptions) -> Result<DbIterator> {
        let (mut children, version, sequence) = {
            let state = self.inner.state.lock();
            let sequence = match &opts.snapshot {
                Some(snapshot) => snapshot.sequence(),
                None => state.versions.last_sequence(),
            };
            let mut children: Vec<Box<dyn InternalIterator>> = vec![Box::new(state.mem.iter())];
            if let Some(imm) = &state.imm {
                children.push(Box::new(imm.iter()));
            }
            (children, state.versions.current(), sequence)
        };

        version.add_iterators(block_read_options(opts), &mut children)?;
        let merged = MergingIterator::new(Arc::new(self.inner.icmp.clone()), children);
        Ok(DbIterator::new(Arc::clone(&self.inner.options.comparator), Box::new(merged), sequence)
            .pin_version(version))
    }

    /// Capture the current state for repeatable reads
    pub fn snapshot(&self) -> Snapshot {
        let state = self.inner.state.lock();
        Snapshot::new(
            state.versions.last_sequence(),
            state.versions.current(),
            Arc::clone(&self.inner.snapshots),
        )
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    /// Value of an introspection property, or `None` for unknown names
    pub fn get_property(&self, name: &str) -> Option<String> {
        let property = DbProperty::parse(name)?;
        let state = self.inner.state.lock();
        let value = match property {
            DbProperty::NumFilesAtLevel(level) => state.versions.num_level_files(level).to_string(),
            DbProperty::Stats => {
                let mut out = String::from(
                    "                               Compactions\n\
                     Level  Files Size(MB) Time(sec) Read(MB) Write(MB)\n\
                     --------------------------------------------------\n",
                );
                for (level, stats) in state.stats.iter().enumerate() {
                    let files = state.versions.num_level_files(level);
                    if stats.micros > 0 || files > 0 {
                        out.push_str(&format!(
                            "{:3} {:8} {:8.0} {:9.0} {:8.0} {:9.0}\n",
                            level,
                            files,
                            state.versions.num_level_bytes(level) as f64 / 1048576.0,
                            stats.micros as f64 / 1e6,
                            stats.bytes_read as f64 / 1048576.0,
                            stats.bytes_written as f64 / 1048576.0,
                        ));
                    }
                }
                out
            }
            DbProperty::SSTables => state.versions.current().debug_string(),
            DbProperty::ApproximateMemoryUsage => {
                let mut total = self.inner.block_cache.total_charge() + state.mem.approximate_memory_usage();
                if let Some(imm) = &state.imm {
                    total += imm.approximate_memory_usage();
                }
                total.to_string()
            }
        };
        Some(value)
    }

    /// Approximate on-disk bytes used by each key range
    ///
    /// Data still in memtables is not counted.
    pub fn get_approximate_sizes(&self, ranges: &[KeyRange<'_>]) -> Vec<u64> {
        let version = self.inner.state.lock().versions.current();
        ranges
            .iter()
            .map(|range| {
                let start = InternalKey::new(range.start, MAX_SEQUENCE_NUMBER, VALUE_TYPE_FOR_SEEK);
                let limit = InternalKey::new(range.limit, MAX_SEQUENCE_NUMBER, VALUE_TYPE_FOR_SEEK);
                let start = version.approximate_offset_of(&start);
                let limit = version.approximate_offset_of(&limit);
                limit.saturating_sub(start)
            })
            .collect()
    }

    /// Compact all data in `[begin, end]` (`None` means unbounded) down to
    /// the deepest level that holds any of it
    pub fn compact_range(&self, begin: Option<&[u8]>, end: Option<&[u8]>) -> Result<()> {
        let max_level_with_files = {
            let state = self.inner.state.lock();
            let version = state.versions.current();
            (1..NUM_LEVELS)
                .filter(|&level| version.overlap_in_level(level, begin, end))
                .max()
                .unwrap_or(1)
        };

        self.inner.flush_memtable()?;
        for level in 0..max_level_with_files {
            self.inner.manual_compact(level, begin, end)?;
        }
        Ok(())
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Close the database gracefully
    ///
    /// Waits for background work, syncs the WAL and releases the lock.
    pub fn close(self) -> Result<()> {
        let result = {
            let mut state = self.inner.state.lock();
            match state.log.as_mut() {
                Some(log) => log.sync(),
                None => Ok(()),
            }
        };
        drop(self);
        result
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    /// Get the database directory path
    pub fn path(&self) -> &Path {
        &self.inner.dbname
    }

    pub fn options(&self) -> &Options {
        &self.inner.options
    }

    /// Sequence number of the most recent write
    pub fn last_sequence(&self) -> SequenceNumber {
        self.inner.state.lock().versions.last_sequence()
    }

    /// Number of table files at `level`
    pub fn num_files_at_level(&self, level: usize) -> usize {
        self.inner.state.lock().versions.num_level_files(level)
    }

    /// Number of snapshots not yet released
    pub fn live_snapshot_count(&self) -> usize {
        self.inner.snapshots.lock().len()
    }

    /// Block until no background work is scheduled
    pub fn wait_for_background_work(&self) -> Result<()> {
        let mut state = self.inner.state.lock();
        while state.bg_compaction_scheduled && state.bg_error.is_none() {
            self.inner.bg_cv.wait(&mut state);
        }
        match &state.bg_error {
            Some(e) => Err(e.duplicate()),
            None => Ok(()),
        }
    }
}

impl Drop for Db {
    fn drop(&mut self) {
        self.inner.shutting_down.store(true, AtomicOrdering::Release);
        {
            let mut state = self.inner.state.lock();
            while state.bg_compaction_scheduled {
                self.inner.bg_cv.wait(&mut state);
            }
        }
        self.inner.worker.shutdown();
        tracing::debug!(path = %self.inner.dbname.display(), "Database closed");
    }
}

fn block_read_options(opts: &ReadOptions) -> BlockReadOptions {
    BlockReadOptions {
        verify_checksums: opts.verify_checksums,
        fill_cache: opts.fill_cache,
    }
}

// =============================================================================
// Write Path
// =============================================================================

impl DbInner {
    fn write(&self, opts: &WriteOptions, batch: Option<WriteBatch>) -> Result<()> {
        let mut state = self.state.lock();
        let id = state.next_writer_id;
        state.next_writer_id += 1;
        state.writers.push_back(PendingWriter {
            id,
            batch,
            sync: opts.sync,
        });

        // Wait until another leader commits us or we reach the head
        loop {
            if let Some(result) = state.completed.remove(&id) {
                return result;
            }
            if state.writers.front().map(|w| w.id) == Some(id) {
                break;
            }
            self.writers_cv.wait(&mut state);
        }

        let force = state.writers.front().map_or(false, |w| w.batch.is_none());
        let mut result = self.make_room_for_write(&mut state, force);
        let mut last_id = id;

        if result.is_ok() && !force {
            let (group, group_last_id, sync) = build_group(&mut state);
            last_id = group_last_id;

            let last_sequence = state.versions.last_sequence();
            let base = last_sequence + 1;
            let mem = Arc::clone(&state.mem);
            let mut log = state.log.take();

            let write_result = MutexGuard::unlocked_fair(&mut state, || -> Result<()> {
                let payload = WalEntry::new(base, &group).serialize()?;
                let log = log
                    .as_mut()
                    .ok_or_else(|| StrataError::Corruption("WAL writer missing".into()))?;
                log.add_record(&payload)?;
                if sync {
                    log.sync()?;
                }
                group.insert_into(base, &mem)
            });
            state.log = log;

            match write_result {
                Ok(()) => state.versions.set_last_sequence(last_sequence + group.len() as u64),
                Err(e) => {
                    // The WAL may now hold a partial record; refuse further writes
                    self.record_background_error(&mut state, e.duplicate());
                    result = Err(e);
                }
            }
        }

        while let Some(writer) = state.writers.pop_front() {
            if writer.id != id {
                let shared = match &result {
                    Ok(()) => Ok(()),
                    Err(e) => Err(e.duplicate()),
                };
                state.completed.insert(writer.id, shared);
            }
            if writer.id == last_id {
                break;
            }
        }
        self.writers_cv.notify_all();
        result
    }

    /// Ensure the memtable has room, switching to a new one (and a new WAL)
    /// when it is full. Called by the head writer only.
    fn make_room_for_write(&self, state: &mut MutexGuard<'_, DbState>, mut force: bool) -> Result<()> {
        let mut allow_delay = !force;
        loop {
            if let Some(e) = &state.bg_error {
                return Err(e.duplicate());
            }

            let level0_files = state.versions.num_level_files(0);
            if allow_delay && level0_files >= self.options.level0_slowdown_writes_trigger {
                // Delay this write once by 1ms to let compaction catch up
                MutexGuard::unlocked_fair(state, || thread::sleep(Duration::from_millis(1)));
                allow_delay = false;
            } else if !force && state.mem.approximate_memory_usage() <= self.options.write_buffer_size {
                break;
            } else if force && state.mem.is_empty() && state.imm.is_none() {
                break;
            } else if state.imm.is_some() {
                self.options.log("Current memtable full; waiting...");
                self.bg_cv.wait(state);
            } else if level0_files >= self.options.level0_stop_writes_trigger {
                self.options.log("Too many L0 files; waiting...");
                self.bg_cv.wait(state);
            } else {
                // Switch to a fresh memtable and WAL
                let number = state.versions.new_file_number();
                let log = match WalWriter::create(&log_file_name(&self.dbname, number)) {
                    Ok(log) => log,
                    Err(e) => {
                        state.versions.reuse_file_number(number);
                        return Err(e);
                    }
                };
                state.log = Some(log);
                state.log_number = number;
                let full = std::mem::replace(&mut state.mem, Arc::new(MemTable::new(self.icmp.clone())));
                tracing::debug!(
                    log_number = number,
                    bytes = full.approximate_memory_usage(),
                    "Switched memtable"
                );
                state.imm = Some(full);
                self.has_imm.store(true, AtomicOrdering::Release);
                force = false;
                self.maybe_schedule_compaction(state);
            }
        }
        Ok(())
    }

    fn flush_memtable(&self) -> Result<()> {
        self.write(&WriteOptions::default(), None)?;
        let mut state = self.state.lock();
        while state.imm.is_some()
            && state.bg_error.is_none()
            && !self.shutting_down.load(AtomicOrdering::Acquire)
        {
            self.bg_cv.wait(&mut state);
        }
        match &state.bg_error {
            Some(e) => Err(e.duplicate()),
            None => Ok(()),
        }
    }

    fn record_background_error(&self, state: &mut DbState, error: StrataError) {
        if state.bg_error.is_none() {
            tracing::warn!(error = %error, "Background error; database is now read-only");
            state.bg_error = Some(error);
            self.bg_cv.notify_all();
        }
    }
}

/// Merge the head writer's batch with those queued behind it.
///
/// Returns the combined batch, the id of the last writer included and
/// whether the WAL must be synced.
fn build_group(state: &mut DbState) -> (WriteBatch, u64, bool) {
    let mut writers = state.writers.iter_mut();
    let Some(leader) = writers.next() else {
        return (WriteBatch::new(), 0, false);
    };
    let mut group = leader.batch.take().unwrap_or_default();
    let mut last_id = leader.id;
    let sync = leader.sync;

    let mut size = group.approximate_size();
    let max_size = if size <= SMALL_WRITE_BYTES {
        size + SMALL_WRITE_BYTES
    } else {
        MAX_GROUP_COMMIT_BYTES
    };

    for writer in writers {
        // A sync write must not ride along with a non-sync leader
        if writer.sync && !sync {
            break;
        }
        let Some(batch) = writer.batch.as_ref() else {
            break;
        };
        size += batch.approximate_size();
        if size > max_size {
            break;
        }
        group.append(batch);
        last_id = writer.id;
    }
    (group, last_id, sync)
}

// =============================================================================
// Background Work
// =============================================================================

impl DbInner {
    fn maybe_schedule_compaction(&self, state: &mut DbState) {
        if state.bg_compaction_scheduled
            || self.shutting_down.load(AtomicOrdering::Acquire)
            || state.bg_error.is_some()
        {
            return;
        }
        let manual_pending = state.manual_compaction.as_ref().map_or(false, |m| !m.done);
        if state.imm.is_none() && !manual_pending && !state.versions.needs_compaction() {
            return;
        }
        state.bg_compaction_scheduled = true;
        self.worker.schedule();
    }

    fn background_call(&self) {
        let mut state = self.state.lock();
        debug_assert!(state.bg_compaction_scheduled);
        if !self.shutting_down.load(AtomicOrdering::Acquire) && state.bg_error.is_none() {
            self.background_compaction(&mut state);
        }
        state.bg_compaction_scheduled = false;

        // The previous compaction may have produced too many files in a level
        self.maybe_schedule_compaction(&mut state);
        self.bg_cv.notify_all();
    }

    fn background_compaction(&self, state: &mut MutexGuard<'_, DbState>) {
        if state.imm.is_some() {
            if let Err(e) = self.compact_memtable(state) {
                self.handle_background_failure(state, e);
            }
            return;
        }

        let is_manual = state.manual_compaction.as_ref().map_or(false, |m| !m.done);
        let compaction = if is_manual {
            let (level, begin, end) = match &state.manual_compaction {
                Some(m) => (m.level, m.begin.clone(), m.end.clone()),
                None => return,
            };
            let compaction = compact_range(&mut state.versions, level, begin.as_ref(), end.as_ref());
            let resume_key = compaction.as_ref().map(|c| {
                let last = c.num_input_files(0) - 1;
                c.input(0, last).largest.clone()
            });
            self.options.log(format!(
                "Manual compaction at level-{} from {} .. {}; will stop at {}",
                level,
                describe_key(begin.as_ref()),
                describe_key(end.as_ref()),
                resume_key.as_ref().map_or("(end)".to_string(), |k| describe_key(Some(k))),
            ));
            if let Some(m) = state.manual_compaction.as_mut() {
                match resume_key {
                    Some(key) => m.begin = Some(key),
                    None => m.done = true,
                }
            }
            compaction
        } else {
            pick_compaction(&mut state.versions)
        };

        let result = match compaction {
            None => Ok(()),
            Some(mut c) if !is_manual && c.is_trivial_move() => {
                // Relink the file one level down without rewriting it
                let file = Arc::clone(c.input(0, 0));
                c.edit.remove_file(c.level(), file.number);
                c.edit.add_file(c.level() + 1, (*file).clone());
                let result = state.versions.log_and_apply(&mut c.edit);
                self.options.log(format!(
                    "Moved #{} to level-{} {} bytes {}: {}",
                    file.number,
                    c.level() + 1,
                    file.file_size,
                    if result.is_ok() { "OK" } else { "failed" },
                    state.versions.level_summary(),
                ));
                result
            }
            Some(c) => {
                let result = self.do_compaction_work(state, c);
                self.delete_obsolete_files(state);
                result
            }
        };

        if let Err(e) = result {
            if is_manual {
                if let Some(m) = state.manual_compaction.as_mut() {
                    m.done = true;
                }
            }
            self.handle_background_failure(state, e);
        }
    }

    fn handle_background_failure(&self, state: &mut DbState, error: StrataError) {
        if self.shutting_down.load(AtomicOrdering::Acquire) {
            // Abandoned work is redone after the next open
            tracing::debug!(error = %error, "Background work abandoned at shutdown");
            return;
        }
        self.options.log(format!("Compaction error: {}", error));
        self.record_background_error(state, error);
    }

    /// Flush the immutable memtable to a table and install it
    fn compact_memtable(&self, state: &mut MutexGuard<'_, DbState>) -> Result<()> {
        let Some(imm) = state.imm.clone() else {
            return Ok(());
        };

        let mut edit = VersionEdit::new();
        let base = state.versions.current();
        self.write_level0_table(state, &imm, &mut edit, Some(&base))?;
        drop(base);

        if self.shutting_down.load(AtomicOrdering::Acquire) {
            return Err(StrataError::ShuttingDown);
        }

        // Earlier logs are no longer needed once this edit is durable
        edit.set_prev_log_number(0);
        edit.set_log_number(state.log_number);
        state.versions.log_and_apply(&mut edit)?;

        state.imm = None;
        self.has_imm.store(false, AtomicOrdering::Release);
        self.delete_obsolete_files(state);
        Ok(())
    }

    /// Write `mem` to a new table and record it in `edit`
    ///
    /// With a `base` version the table may be placed below level 0 when it
    /// overlaps nothing there.
    fn write_level0_table(
        &self,
        state: &mut MutexGuard<'_, DbState>,
        mem: &Arc<MemTable>,
        edit: &mut VersionEdit,
        base: Option<&Arc<Version>>,
    ) -> Result<()> {
        let start = Instant::now();
        let number = state.versions.new_file_number();
        state.pending_outputs.insert(number);
        self.options.log(format!("Level-0 table #{}: started", number));

        let iter: Box<dyn InternalIterator> = Box::new(mem.iter());
        let result = MutexGuard::unlocked_fair(state, || {
            build_table(&self.dbname, &self.table_options, &self.table_cache, iter, number)
        });
        state.pending_outputs.remove(&number);

        let meta = result?;
        let bytes = meta.as_ref().map_or(0, |m| m.file_size);
        self.options.log(format!("Level-0 table #{}: {} bytes OK", number, bytes));

        let mut level = 0;
        if let Some(meta) = meta {
            if let Some(base) = base {
                level = base.pick_level_for_memtable_output(meta.smallest.user_key(), meta.largest.user_key());
            }
            tracing::debug!(file_number = number, level, bytes, "Flushed memtable");
            edit.add_file(level, meta);
        }

        state.stats[level].add(&CompactionStats {
            micros: start.elapsed().as_micros() as u64,
            bytes_read: 0,
            bytes_written: bytes,
        });
        Ok(())
    }

    fn do_compaction_work(&self, state: &mut MutexGuard<'_, DbState>, mut c: Compaction) -> Result<()> {
        self.options.log(format!(
            "Compacting {}@{} + {}@{} files",
            c.num_input_files(0),
            c.level(),
            c.num_input_files(1),
            c.level() + 1,
        ));

        let smallest_snapshot = self
            .snapshots
            .lock()
            .oldest()
            .unwrap_or_else(|| state.versions.last_sequence());
        let input = self.make_input_iterator(&c)?;
        let job = CompactionJob::new(
            &self.dbname,
            self.table_options.clone(),
            Arc::clone(&self.table_cache),
            smallest_snapshot,
        );
        let env = CompactionContext {
            db: self,
            outputs: Mutex::new(Vec::new()),
        };

        let result = MutexGuard::unlocked_fair(state, || job.run(&env, &mut c, input));
        for number in env.outputs.lock().drain(..) {
            state.pending_outputs.remove(&number);
        }
        let outcome = result?;

        let mut edit = std::mem::take(&mut c.edit);
        c.add_input_deletions(&mut edit);
        let output_level = c.level() + 1;
        for output in &outcome.outputs {
            edit.add_file(output_level, output.clone());
        }
        state.versions.log_and_apply(&mut edit)?;
        state.stats[output_level].add(&outcome.stats);

        self.options.log(format!(
            "Compacted {}@{} + {}@{} files => {} bytes ({} entries dropped): {}",
            c.num_input_files(0),
            c.level(),
            c.num_input_files(1),
            output_level,
            outcome.stats.bytes_written,
            outcome.entries_dropped,
            state.versions.level_summary(),
        ));
        Ok(())
    }

    /// Merged view over every input file of `c`
    fn make_input_iterator(&self, c: &Compaction) -> Result<Box<dyn InternalIterator>> {
        let opts = BlockReadOptions {
            verify_checksums: self.options.paranoid_checks,
            fill_cache: false,
        };
        let mut children: Vec<Box<dyn InternalIterator>> = Vec::new();
        for (which, files) in c.inputs.iter().enumerate() {
            if files.is_empty() {
                continue;
            }
            if c.level() + which == 0 {
                for file in files {
                    children.push(Box::new(self.table_cache.iter(opts, file.number, file.file_size)?));
                }
            } else {
                children.push(Box::new(new_level_iterator(
                    self.icmp.clone(),
                    files.clone(),
                    Arc::clone(&self.table_cache),
                    opts,
                )));
            }
        }
        Ok(Box::new(MergingIterator::new(Arc::new(self.icmp.clone()), children)))
    }

    /// Run one manual compaction of `level` over `[begin, end]` to completion
    fn manual_compact(&self, level: usize, begin: Option<&[u8]>, end: Option<&[u8]>) -> Result<()> {
        debug_assert!(level + 1 < NUM_LEVELS);
        let begin = begin.map(|k| InternalKey::new(k, MAX_SEQUENCE_NUMBER, VALUE_TYPE_FOR_SEEK));
        let end = end.map(|k| InternalKey::new(k, 0, ValueType::Deletion));

        let mut state = self.state.lock();
        while state.manual_compaction.is_some() && !self.shutting_down.load(AtomicOrdering::Acquire) {
            self.bg_cv.wait(&mut state);
        }
        state.manual_compaction = Some(ManualCompaction {
            level,
            begin,
            end,
            done: false,
        });

        let result = loop {
            if self.shutting_down.load(AtomicOrdering::Acquire) {
                break Err(StrataError::ShuttingDown);
            }
            if let Some(e) = &state.bg_error {
                break Err(e.duplicate());
            }
            if state.manual_compaction.as_ref().map_or(true, |m| m.done) {
                break Ok(());
            }
            self.maybe_schedule_compaction(&mut state);
            self.bg_cv.wait(&mut state);
        };
        state.manual_compaction = None;
        self.bg_cv.notify_all();
        result
    }

    // =========================================================================
    // File Garbage Collection
    // =========================================================================

    /// Delete every file in the directory no longer needed by any version,
    /// pending output, or live log
    fn delete_obsolete_files(&self, state: &mut DbState) {
        if state.bg_error.is_some() {
            // The state of the latest edit is unknown; keep everything
            return;
        }

        let mut live = state.pending_outputs.clone();
        state.versions.add_live_files(&mut live);

        let entries = match fs::read_dir(&self.dbname) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(error = %e, "Cannot list database directory");
                return;
            }
        };

        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some((file_type, number)) = name.to_str().and_then(parse_file_name) else {
                continue;
            };
            let keep = match file_type {
                FileType::Log => {
                    number >= state.versions.log_number() || number == state.versions.prev_log_number()
                }
                // Keep the current manifest and any newer one being written
                FileType::Descriptor => number >= state.versions.manifest_file_number(),
                FileType::Table | FileType::Temp => live.contains(&number),
                FileType::Current | FileType::DbLock | FileType::InfoLog => true,
            };
            if keep {
                continue;
            }

            if file_type == FileType::Table {
                self.table_cache.evict(number);
            }
            self.options.log(format!("Delete type={:?} #{}", file_type, number));
            if let Err(e) = fs::remove_file(entry.path()) {
                tracing::warn!(file = ?name, error = %e, "Failed to delete obsolete file");
            }
        }
    }
}

fn describe_key(key: Option<&InternalKey>) -> String {
    match key {
        Some(key) => format!("'{}'", String::from_utf8_lossy(key.user_key())),
        None => "(begin)".to_string(),
    }
}

/// Hooks a running compaction job uses to reach back into the database
struct CompactionContext<'a> {
    db: &'a DbInner,
    outputs: Mutex<Vec<u64>>,
}

impl CompactionEnv for CompactionContext<'_> {
    fn new_output_number(&self) -> u64 {
        let mut state = self.db.state.lock();
        let number = state.versions.new_file_number();
        state.pending_outputs.insert(number);
        self.outputs.lock().push(number);
        number
    }

    fn is_shutting_down(&self) -> bool {
        self.db.shutting_down.load(AtomicOrdering::Acquire)
    }

    fn flush_pending_memtable(&self) -> Result<()> {
        if !self.db.has_imm.load(AtomicOrdering::Acquire) {
            return Ok(());
        }
        let mut state = self.db.state.lock();
        let result = if state.imm.is_some() {
            self.db.compact_memtable(&mut state)
        } else {
            Ok(())
        };
        // Wake writers waiting for room in the memtable
        self.db.bg_cv.notify_all();
        result
    }
}

// =============================================================================
// Recovery
// =============================================================================

impl DbInner {
    /// Load the manifest and replay the WAL files it does not cover
    ///
    /// Returns true if the recovered state must be written to a new manifest.
    fn recover(&self, state: &mut MutexGuard<'_, DbState>, edit: &mut VersionEdit) -> Result<bool> {
        if !current_file_name(&self.dbname).exists() {
            if !self.options.create_if_missing {
                return Err(StrataError::InvalidArgument(format!(
                    "{}: does not exist (create_if_missing is false)",
                    self.dbname.display()
                )));
            }
            self.options.log(format!("Creating DB {}", self.dbname.display()));
            self.new_db()?;
        } else if self.options.error_if_exists {
            return Err(StrataError::InvalidArgument(format!(
                "{}: exists (error_if_exists is true)",
                self.dbname.display()
            )));
        }

        let mut save_manifest = state.versions.recover()?;

        // Every table the manifest names must exist; collect newer logs
        let min_log = state.versions.log_number();
        let prev_log = state.versions.prev_log_number();
        let mut expected = HashSet::new();
        state.versions.add_live_files(&mut expected);

        let mut logs = Vec::new();
        for entry in fs::read_dir(&self.dbname)?.flatten() {
            let name = entry.file_name();
            if let Some((file_type, number)) = name.to_str().and_then(parse_file_name) {
                expected.remove(&number);
                if file_type == FileType::Log && (number >= min_log || number == prev_log) {
                    logs.push(number);
                }
            }
        }
        if let Some(missing) = expected.iter().min() {
            return Err(StrataError::Corruption(format!(
                "{} missing files; e.g. {}",
                expected.len(),
                crate::filename::table_file_name(&self.dbname, *missing).display()
            )));
        }

        logs.sort_unstable();
        let mut max_sequence = 0;
        for (i, &number) in logs.iter().enumerate() {
            let last_log = i + 1 == logs.len();
            self.recover_log_file(state, number, last_log, &mut save_manifest, edit, &mut max_sequence)?;
            // The log's own number may be newer than the manifest's counter
            state.versions.mark_file_number_used(number);
        }
        if state.versions.last_sequence() < max_sequence {
            state.versions.set_last_sequence(max_sequence);
        }
        Ok(save_manifest)
    }

    /// Write an empty manifest and point CURRENT at it
    fn new_db(&self) -> Result<()> {
        let mut edit = VersionEdit::new();
        edit.set_comparator_name(self.icmp.user_comparator().name());
        edit.set_log_number(0);
        edit.set_next_file(2);
        edit.set_last_sequence(0);

        let manifest = descriptor_file_name(&self.dbname, 1);
        let result = (|| -> Result<()> {
            let mut writer = WalWriter::create(&manifest)?;
            writer.add_record(&edit.encode()?)?;
            writer.sync()?;
            set_current_file(&self.dbname, 1)
        })();
        if result.is_err() {
            let _ = fs::remove_file(&manifest);
        }
        result
    }

    /// Replay one WAL file into memtables, flushing each to level 0 when it
    /// fills up
    fn recover_log_file(
        &self,
        state: &mut MutexGuard<'_, DbState>,
        number: u64,
        last_log: bool,
        save_manifest: &mut bool,
        edit: &mut VersionEdit,
        max_sequence: &mut SequenceNumber,
    ) -> Result<()> {
        let path = log_file_name(&self.dbname, number);
        let (entries, recovery) = WalRecovery::recover(&path, self.options.paranoid_checks)?;
        self.options.log(format!(
            "Recovering log #{}: {} batches, {} corrupted",
            number, recovery.entries_recovered, recovery.entries_corrupted
        ));

        let mut mem: Option<Arc<MemTable>> = None;
        let mut compactions = 0;
        for entry in entries {
            let base = entry.sequence;
            let last = entry.last_sequence();
            let batch = entry.into_batch();
            if batch.is_empty() {
                continue;
            }

            let table = mem.get_or_insert_with(|| Arc::new(MemTable::new(self.icmp.clone())));
            batch.insert_into(base, table)?;
            *max_sequence = (*max_sequence).max(last);

            if table.approximate_memory_usage() > self.options.write_buffer_size {
                compactions += 1;
                *save_manifest = true;
                if let Some(full) = mem.take() {
                    self.write_level0_table(state, &full, edit, None)?;
                }
            }
        }

        // Keep appending to the last log when it was not flushed midway
        if self.options.reuse_logs && last_log && compactions == 0 {
            match WalWriter::open_append(&path) {
                Ok(writer) => {
                    self.options.log(format!("Reusing old log {}", path.display()));
                    state.log = Some(writer);
                    state.log_number = number;
                    if let Some(table) = mem.take() {
                        state.mem = table;
                    }
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(log_number = number, error = %e, "Cannot reuse log");
                }
            }
        }

        if let Some(table) = mem {
            *save_manifest = true;
            self.write_level0_table(state, &table, edit, None)?;
        }
        Ok(())
    }
}
