//! MemTable Module
//!
//! Recent writes, ordered by internal key, until they are flushed to a
//! level-0 table.
//!
//! ## Responsibilities
//! - Every version of a key is kept; lookups pick the newest one visible at
//!   the reader's sequence number
//! - One writer (the group commit leader) with any number of readers
//! - Memory accounting against `write_buffer_size`
//!
//! ## Data Structure Choice
//! An arena skip list keyed by internal key behind a `parking_lot::RwLock`.
//! A `BTreeMap` cannot be used because the key order comes from a runtime
//! comparator rather than `Ord`.

pub mod skiplist;
mod table;

pub use table::{MemTable, MemTableIterator};

/// Result of a memtable point lookup
#[derive(Debug, Clone, PartialEq)]
pub enum MemTableEntry {
    /// A live value
    Value(Vec<u8>),

    /// A tombstone (deleted key)
    Tombstone,
}
