//! Storage Module
//!
//! Persistent storage layer: immutable sorted table files and the cache of
//! open table readers.
//!
//! ## Responsibilities
//! - Persist sorted internal keys to disk in block format
//! - Point lookups through the index and filter blocks
//! - Ordered, bidirectional scans over a table
//! - Bound the number of open table files

pub mod sstable;
mod table_cache;

pub use sstable::{SSTable, SSTableBuilder, SSTableIterator, SSTableReader, TableOptions};
pub use table_cache::TableCache;
