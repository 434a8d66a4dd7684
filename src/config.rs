//! Configuration for StrataDB
//!
//! Centralized configuration with sensible defaults.

use std::fmt;
use std::sync::Arc;

use crate::comparator::{BytewiseComparator, Comparator};
use crate::error::{Result, StrataError};
use crate::filter::FilterPolicy;
use crate::logger::{Logger, TracingLogger};
use crate::snapshot::Snapshot;

/// Number of levels in the LSM tree
pub const NUM_LEVELS: usize = 7;

/// Block compression applied to SSTable data blocks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionType {
    None = 0,
    Snappy = 1,
}

impl CompressionType {
    pub fn from_u8(b: u8) -> Option<Self> {
        match b {
            0 => Some(CompressionType::None),
            1 => Some(CompressionType::Snappy),
            _ => None,
        }
    }
}

/// Main configuration for a database instance
#[derive(Clone)]
pub struct Options {
    // -------------------------------------------------------------------------
    // Open Behavior
    // -------------------------------------------------------------------------
    /// Create the database if the directory holds none
    pub create_if_missing: bool,

    /// Fail to open if a database already exists
    pub error_if_exists: bool,

    /// Treat any detected corruption as fatal (WAL replay, table reads)
    pub paranoid_checks: bool,

    /// Continue appending to the last WAL on reopen instead of flushing it
    pub reuse_logs: bool,

    // -------------------------------------------------------------------------
    // Write Buffer
    // -------------------------------------------------------------------------
    /// Max size of the memtable before it is frozen and flushed (in bytes)
    pub write_buffer_size: usize,

    // -------------------------------------------------------------------------
    // SSTable Layout
    // -------------------------------------------------------------------------
    /// Number of open table readers kept in the table cache
    pub max_open_files: usize,

    /// Approximate uncompressed size of a data block (in bytes)
    pub block_size: usize,

    /// Entries between restart points inside a block
    pub block_restart_interval: usize,

    /// Target size of a compaction output file (in bytes)
    pub max_file_size: u64,

    pub compression: CompressionType,

    /// Capacity of the shared decompressed-block cache (in bytes)
    pub block_cache_capacity: usize,

    // -------------------------------------------------------------------------
    // Pluggable Behavior
    // -------------------------------------------------------------------------
    pub comparator: Arc<dyn Comparator>,

    pub filter_policy: Option<Arc<dyn FilterPolicy>>,

    pub info_log: Arc<dyn Logger>,

    // -------------------------------------------------------------------------
    // Compaction Tuning
    // -------------------------------------------------------------------------
    /// Level-0 file count that triggers a compaction
    pub level0_compaction_trigger: usize,

    /// Level-0 file count at which each write is delayed by 1ms
    pub level0_slowdown_writes_trigger: usize,

    /// Level-0 file count at which writes wait for compaction
    pub level0_stop_writes_trigger: usize,

    /// Byte budget of level 1; level N gets base * multiplier^(N-1)
    pub max_bytes_for_level_base: u64,

    pub level_size_multiplier: u64,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            create_if_missing: false,
            error_if_exists: false,
            paranoid_checks: false,
            reuse_logs: false,
            write_buffer_size: 4 * 1024 * 1024, // 4 MB
            max_open_files: 1000,
            block_size: 4 * 1024,
            block_restart_interval: 16,
            max_file_size: 2 * 1024 * 1024, // 2 MB
            compression: CompressionType::Snappy,
            block_cache_capacity: 8 * 1024 * 1024, // 8 MB
            comparator: Arc::new(BytewiseComparator),
            filter_policy: None,
            info_log: Arc::new(TracingLogger),
            level0_compaction_trigger: 4,
            level0_slowdown_writes_trigger: 8,
            level0_stop_writes_trigger: 12,
            max_bytes_for_level_base: 10 * 1024 * 1024, // 10 MB
            level_size_multiplier: 10,
        }
    }
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("create_if_missing", &self.create_if_missing)
            .field("error_if_exists", &self.error_if_exists)
            .field("paranoid_checks", &self.paranoid_checks)
            .field("reuse_logs", &self.reuse_logs)
            .field("write_buffer_size", &self.write_buffer_size)
            .field("max_open_files", &self.max_open_files)
            .field("block_size", &self.block_size)
            .field("block_restart_interval", &self.block_restart_interval)
            .field("max_file_size", &self.max_file_size)
            .field("compression", &self.compression)
            .field("block_cache_capacity", &self.block_cache_capacity)
            .field("comparator", &self.comparator.name())
            .field("filter_policy", &self.filter_policy.as_ref().map(|p| p.name().to_string()))
            .field("level0_compaction_trigger", &self.level0_compaction_trigger)
            .field("max_bytes_for_level_base", &self.max_bytes_for_level_base)
            .field("level_size_multiplier", &self.level_size_multiplier)
            .finish()
    }
}

impl Options {
    /// Create a new options builder
    pub fn builder() -> OptionsBuilder {
        OptionsBuilder::default()
    }

    /// Reject configurations the engine cannot operate with
    pub fn validate(&self) -> Result<()> {
        if self.block_size == 0 {
            return Err(StrataError::InvalidArgument("block_size must be > 0".into()));
        }
        if self.block_restart_interval < 1 {
            return Err(StrataError::InvalidArgument(
                "block_restart_interval must be >= 1".into(),
            ));
        }
        if self.write_buffer_size < 64 * 1024 {
            return Err(StrataError::InvalidArgument(
                "write_buffer_size must be >= 64 KiB".into(),
            ));
        }
        if self.max_open_files < 20 {
            return Err(StrataError::InvalidArgument("max_open_files must be >= 20".into()));
        }
        if self.max_file_size == 0 {
            return Err(StrataError::InvalidArgument("max_file_size must be > 0".into()));
        }
        if self.level_size_multiplier < 2 {
            return Err(StrataError::InvalidArgument(
                "level_size_multiplier must be >= 2".into(),
            ));
        }
        if self.level0_compaction_trigger == 0
            || self.level0_slowdown_writes_trigger < self.level0_compaction_trigger
            || self.level0_stop_writes_trigger < self.level0_slowdown_writes_trigger
        {
            return Err(StrataError::InvalidArgument(
                "level-0 triggers must satisfy 0 < compaction <= slowdown <= stop".into(),
            ));
        }
        Ok(())
    }

    /// Byte budget for `level` (level >= 1)
    pub fn max_bytes_for_level(&self, level: usize) -> f64 {
        let mut result = self.max_bytes_for_level_base as f64;
        for _ in 1..level {
            result *= self.level_size_multiplier as f64;
        }
        result
    }

    /// Bytes of grandparent overlap after which a compaction output is cut
    pub(crate) fn max_grandparent_overlap_bytes(&self) -> u64 {
        10 * self.max_file_size
    }

    /// Upper bound on total input bytes when expanding a compaction
    pub(crate) fn expanded_compaction_byte_limit(&self) -> u64 {
        25 * self.max_file_size
    }

    pub(crate) fn log(&self, message: impl AsRef<str>) {
        self.info_log.log(message.as_ref());
    }
}

/// Builder for Options
#[derive(Default)]
pub struct OptionsBuilder {
    options: Options,
}

impl OptionsBuilder {
    pub fn create_if_missing(mut self, yes: bool) -> Self {
        self.options.create_if_missing = yes;
        self
    }

    pub fn error_if_exists(mut self, yes: bool) -> Self {
        self.options.error_if_exists = yes;
        self
    }

    pub fn paranoid_checks(mut self, yes: bool) -> Self {
        self.options.paranoid_checks = yes;
        self
    }

    pub fn reuse_logs(mut self, yes: bool) -> Self {
        self.options.reuse_logs = yes;
        self
    }

    /// Set the memtable size limit (in bytes)
    pub fn write_buffer_size(mut self, size: usize) -> Self {
        self.options.write_buffer_size = size;
        self
    }

    pub fn max_open_files(mut self, count: usize) -> Self {
        self.options.max_open_files = count;
        self
    }

    pub fn block_size(mut self, size: usize) -> Self {
        self.options.block_size = size;
        self
    }

    pub fn block_restart_interval(mut self, interval: usize) -> Self {
        self.options.block_restart_interval = interval;
        self
    }

    pub fn max_file_size(mut self, size: u64) -> Self {
        self.options.max_file_size = size;
        self
    }

    pub fn compression(mut self, compression: CompressionType) -> Self {
        self.options.compression = compression;
        self
    }

    pub fn block_cache_capacity(mut self, bytes: usize) -> Self {
        self.options.block_cache_capacity = bytes;
        self
    }

    pub fn comparator(mut self, comparator: Arc<dyn Comparator>) -> Self {
        self.options.comparator = comparator;
        self
    }

    pub fn filter_policy(mut self, policy: Arc<dyn FilterPolicy>) -> Self {
        self.options.filter_policy = Some(policy);
        self
    }

    pub fn info_log(mut self, logger: Arc<dyn Logger>) -> Self {
        self.options.info_log = logger;
        self
    }

    pub fn level0_compaction_trigger(mut self, files: usize) -> Self {
        self.options.level0_compaction_trigger = files;
        self
    }

    pub fn level0_slowdown_writes_trigger(mut self, files: usize) -> Self {
        self.options.level0_slowdown_writes_trigger = files;
        self
    }

    pub fn level0_stop_writes_trigger(mut self, files: usize) -> Self {
        self.options.level0_stop_writes_trigger = files;
        self
    }

    pub fn max_bytes_for_level_base(mut self, bytes: u64) -> Self {
        self.options.max_bytes_for_level_base = bytes;
        self
    }

    pub fn level_size_multiplier(mut self, multiplier: u64) -> Self {
        self.options.level_size_multiplier = multiplier;
        self
    }

    pub fn build(self) -> Options {
        self.options
    }
}

// =============================================================================
// Per-Operation Options
// =============================================================================

/// Options for reads and iterators
#[derive(Clone)]
pub struct ReadOptions {
    /// Verify block checksums on every read
    pub verify_checksums: bool,

    /// Insert blocks read by this operation into the block cache
    pub fill_cache: bool,

    /// Read as of this snapshot instead of the latest state
    pub snapshot: Option<Snapshot>,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            verify_checksums: false,
            fill_cache: true,
            snapshot: None,
        }
    }
}

impl fmt::Debug for ReadOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadOptions")
            .field("verify_checksums", &self.verify_checksums)
            .field("fill_cache", &self.fill_cache)
            .field("snapshot", &self.snapshot.as_ref().map(|s| s.sequence()))
            .finish()
    }
}

impl ReadOptions {
    pub fn with_snapshot(snapshot: &Snapshot) -> Self {
        Self {
            snapshot: Some(snapshot.clone()),
            ..Self::default()
        }
    }
}

/// Options for writes
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteOptions {
    /// fsync the WAL before acknowledging the write
    pub sync: bool,
}

impl WriteOptions {
    pub fn sync() -> Self {
        Self { sync: true }
    }
}
