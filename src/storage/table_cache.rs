//! Table Cache
//!
//! Keeps a bounded number of SSTable readers open. A reader is opened on
//! first use and closed when it falls out of the LRU (or its file is deleted).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::cache::{BlockCache, CacheHandle, LruCache};
use crate::error::{Result, StrataError};
use crate::filename::{sst_table_file_name, table_file_name};

use super::sstable::{BlockReadOptions, SSTableIterator, SSTableReader, TableOptions};

/// Cache of open SSTable readers, keyed by file number
pub struct TableCache {
    dbname: PathBuf,
    options: TableOptions,
    block_cache: Arc<BlockCache>,
    cache: LruCache<u64, SSTableReader>,
}

impl TableCache {
    pub fn new(dbname: &Path, options: TableOptions, block_cache: Arc<BlockCache>, entries: usize) -> Self {
        Self {
            dbname: dbname.to_path_buf(),
            options,
            block_cache,
            cache: LruCache::new(entries),
        }
    }

    /// Pinned reader for a table, opening it if needed
    pub fn find_table(&self, file_number: u64, file_size: u64) -> Result<CacheHandle<u64, SSTableReader>> {
        if let Some(handle) = self.cache.lookup(&file_number) {
            return Ok(handle);
        }

        let path = table_file_name(&self.dbname, file_number);
        let reader = match self.open(&path, file_size) {
            Ok(reader) => reader,
            Err(StrataError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                let legacy = sst_table_file_name(&self.dbname, file_number);
                self.open(&legacy, file_size).map_err(|_| StrataError::Io(e))?
            }
            Err(e) => return Err(e),
        };
        tracing::debug!(file_number, "Opened table");
        Ok(self.cache.insert(file_number, reader, 1))
    }

    fn open(&self, path: &Path, file_size: u64) -> Result<SSTableReader> {
        SSTableReader::open(
            path,
            file_size,
            self.options.clone(),
            Some(Arc::clone(&self.block_cache)),
        )
    }

    /// Iterator over a table; the table stays pinned until it is dropped
    pub fn iter(&self, opts: BlockReadOptions, file_number: u64, file_size: u64) -> Result<SSTableIterator> {
        let handle = self.find_table(file_number, file_size)?;
        let iter = handle.value().iter(opts);
        Ok(iter.with_pin(handle))
    }

    /// First entry >= `internal_key` in the block that could hold it
    pub fn get(
        &self,
        opts: &BlockReadOptions,
        internal_key: &[u8],
        file_number: u64,
        file_size: u64,
    ) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        let handle = self.find_table(file_number, file_size)?;
        handle.internal_get(opts, internal_key)
    }

    /// Approximate offset of `internal_key` within a table
    pub fn approximate_offset_of(&self, internal_key: &[u8], file_number: u64, file_size: u64) -> u64 {
        match self.find_table(file_number, file_size) {
            Ok(handle) => handle.approximate_offset_of(internal_key),
            Err(_) => 0,
        }
    }

    /// Close the reader for a deleted file
    pub fn evict(&self, file_number: u64) {
        self.cache.erase(&file_number);
    }

    /// Number of readers currently open
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}
