//! SSTable Module
//!
//! Sorted String Table - immutable on-disk sorted key-value storage.
//!
//! ## File Format
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │ Data Block 0 .. N-1   (prefix-compressed, maybe snappy) │
//! │   each followed by [type: u8][masked crc32: u32]        │
//! ├─────────────────────────────────────────────────────────┤
//! │ Filter Block          (optional, uncompressed)          │
//! ├─────────────────────────────────────────────────────────┤
//! │ Metaindex Block       "filter.<policy>" → handle        │
//! ├─────────────────────────────────────────────────────────┤
//! │ Index Block           separator key → data block handle │
//! ├─────────────────────────────────────────────────────────┤
//! │ Footer (48 bytes)                                       │
//! │   metaindex handle | index handle | padding | magic u64 │
//! └─────────────────────────────────────────────────────────┘
//! ```

mod block;
mod builder;
mod filter_block;
mod format;
mod iterator;
mod reader;

use std::path::PathBuf;
use std::sync::Arc;

use crate::comparator::{BytewiseComparator, Comparator, InternalKeyComparator};
use crate::config::{CompressionType, Options};
use crate::filter::FilterPolicy;
use crate::types::extract_user_key;

pub use block::{Block, BlockBuilder, BlockIterator};
pub use builder::SSTableBuilder;
pub use filter_block::{FilterBlockBuilder, FilterBlockReader};
pub use format::{BlockHandle, Footer, FOOTER_SIZE, TABLE_MAGIC_NUMBER};
pub use iterator::SSTableIterator;
pub use reader::SSTableReader;

/// Metaindex key prefix for the filter block
pub(crate) const FILTER_META_PREFIX: &str = "filter.";

// =============================================================================
// Table Options
// =============================================================================

/// Settings a table is written and read with
#[derive(Clone)]
pub struct TableOptions {
    /// Orders the keys stored in the table
    pub comparator: Arc<dyn Comparator>,
    pub filter_policy: Option<Arc<dyn FilterPolicy>>,
    pub block_size: usize,
    pub block_restart_interval: usize,
    pub compression: CompressionType,
    /// Verify checksums of index and meta blocks on open
    pub paranoid_checks: bool,
}

impl Default for TableOptions {
    fn default() -> Self {
        Self {
            comparator: Arc::new(BytewiseComparator),
            filter_policy: None,
            block_size: 4 * 1024,
            block_restart_interval: 16,
            compression: CompressionType::Snappy,
            paranoid_checks: false,
        }
    }
}

impl TableOptions {
    /// Table settings for a database whose tables hold internal keys
    pub fn for_database(options: &Options, icmp: &InternalKeyComparator) -> Self {
        Self {
            comparator: Arc::new(icmp.clone()),
            filter_policy: options.filter_policy.as_ref().map(|policy| {
                Arc::new(InternalFilterPolicy::new(policy.clone())) as Arc<dyn FilterPolicy>
            }),
            block_size: options.block_size,
            block_restart_interval: options.block_restart_interval,
            compression: options.compression,
            paranoid_checks: options.paranoid_checks,
        }
    }
}

/// Applies a user-key filter policy to internal keys by stripping the trailer
pub(crate) struct InternalFilterPolicy {
    user_policy: Arc<dyn FilterPolicy>,
}

impl InternalFilterPolicy {
    pub(crate) fn new(user_policy: Arc<dyn FilterPolicy>) -> Self {
        Self { user_policy }
    }
}

impl FilterPolicy for InternalFilterPolicy {
    fn name(&self) -> &str {
        self.user_policy.name()
    }

    fn create_filter(&self, keys: &[&[u8]], dst: &mut Vec<u8>) {
        let user_keys: Vec<&[u8]> = keys.iter().map(|k| extract_user_key(k)).collect();
        self.user_policy.create_filter(&user_keys, dst);
    }

    fn key_may_match(&self, key: &[u8], filter: &[u8]) -> bool {
        self.user_policy.key_may_match(extract_user_key(key), filter)
    }
}

/// Per-read knobs passed down from `ReadOptions`
#[derive(Debug, Clone, Copy)]
pub struct BlockReadOptions {
    pub verify_checksums: bool,
    pub fill_cache: bool,
}

impl Default for BlockReadOptions {
    fn default() -> Self {
        Self {
            verify_checksums: false,
            fill_cache: true,
        }
    }
}

// =============================================================================
// SSTable Metadata
// =============================================================================

/// Metadata describing a finished SSTable
#[derive(Debug, Clone)]
pub struct SSTable {
    /// Path to the SSTable file
    pub path: PathBuf,
    /// Number of entries in this SSTable
    pub entry_count: u64,
    /// Smallest key (empty if the table has no entries)
    pub smallest: Vec<u8>,
    /// Largest key (empty if the table has no entries)
    pub largest: Vec<u8>,
    /// File size in bytes
    pub file_size: u64,
}

impl SSTable {
    /// Get the number of entries
    pub fn entry_count(&self) -> u64 {
        self.entry_count
    }
}
