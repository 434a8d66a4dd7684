//! # StrataDB
//!
//! An embedded, ordered key-value store built as a log-structured merge tree:
//! - Write-Ahead Logging (WAL) with group commit for durability
//! - Sorted table files with prefix-compressed blocks, bloom filters and
//!   snappy compression
//! - Leveled background compaction
//! - Snapshots and iterators over a consistent view
//! - Pluggable comparators, filter policies and loggers
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Db                                  │
//! │        (group commit writer queue / lock-free readers)       │
//! └──────────┬───────────────────────────────┬──────────────────┘
//!            │ write                         │ read
//!            ▼                               ▼
//!   ┌─────────────┐   ┌─────────────┐   ┌─────────────┐
//!   │     WAL     │──▶│  MemTable   │──▶│  Immutable  │
//!   │  (Append)   │   │ (skip list) │   │  MemTable   │
//!   └─────────────┘   └─────────────┘   └──────┬──────┘
//!                                              │ flush
//!                                              ▼
//!   ┌─────────────┐   ┌─────────────────────────────────┐
//!   │   Version   │──▶│  Level 0 .. Level 6 (SSTables)  │◀── compaction
//!   │  (manifest) │   │   table cache + block cache     │    (background)
//!   └─────────────┘   └─────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use stratadb::{Db, Options};
//!
//! # fn main() -> stratadb::Result<()> {
//! let db = Db::open("/tmp/strata-example", Options::builder().create_if_missing(true).build())?;
//! db.put(b"hello", b"world")?;
//! assert_eq!(db.get(b"hello")?, Some(b"world".to_vec()));
//! db.close()?;
//! # Ok(())
//! # }
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;
pub mod comparator;
pub mod types;
pub mod coding;
pub mod filter;
pub mod logger;
pub mod filename;

pub mod batch;
pub mod wal;
pub mod memtable;
pub mod cache;
pub mod storage;
pub mod iterator;
pub mod version;
pub mod compaction;
pub mod snapshot;
pub mod engine;
pub mod repair;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use batch::WriteBatch;
pub use comparator::{BytewiseComparator, Comparator, FnComparator, ReverseComparator};
pub use config::{CompressionType, Options, OptionsBuilder, ReadOptions, WriteOptions};
pub use engine::{Db, DbProperty, KeyRange};
pub use error::{ErrorKind, Result, StrataError};
pub use filter::{BloomFilterPolicy, FilterPolicy};
pub use iterator::DbIterator;
pub use logger::{FnLogger, Logger, TracingLogger, VoidLogger};
pub use repair::{destroy_db, repair_db};
pub use snapshot::Snapshot;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of StrataDB
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
