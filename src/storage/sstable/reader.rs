//! SSTable Reader
//!
//! Opens an SSTable file, loads its index and filter blocks into memory and
//! serves point lookups and iterators. Data blocks are read on demand and
//! shared through the block cache.

use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::cache::BlockCache;
use crate::comparator::BytewiseComparator;
use crate::error::{Result, StrataError};
use crate::iterator::{InternalIterator, TwoLevelIterator};

use super::block::{Block, BlockIterator};
use super::filter_block::FilterBlockReader;
use super::format::{read_at, read_block, BlockHandle, Footer, FOOTER_SIZE};
use super::iterator::SSTableIterator;
use super::{BlockReadOptions, TableOptions, FILTER_META_PREFIX};

/// Reader for an immutable SSTable file
pub struct SSTableReader {
    path: PathBuf,
    file: File,
    file_size: u64,
    options: TableOptions,
    index_block: Arc<Block>,
    metaindex_handle: BlockHandle,
    filter: Option<FilterBlockReader>,
    block_cache: Option<Arc<BlockCache>>,
    /// Namespace of this table's blocks in the block cache
    cache_id: u64,
}

impl fmt::Debug for SSTableReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SSTableReader")
            .field("path", &self.path)
            .field("file_size", &self.file_size)
            .finish()
    }
}

impl SSTableReader {
    /// Open an existing SSTable of `file_size` bytes
    pub fn open(
        path: &Path,
        file_size: u64,
        options: TableOptions,
        block_cache: Option<Arc<BlockCache>>,
    ) -> Result<Self> {
        if file_size < FOOTER_SIZE as u64 {
            return Err(StrataError::Corruption(format!(
                "file {} is too short to be a table",
                path.display()
            )));
        }
        let file = File::open(path)?;

        let mut footer_buf = [0u8; FOOTER_SIZE];
        read_at(&file, file_size - FOOTER_SIZE as u64, &mut footer_buf)?;
        let footer = Footer::decode(&footer_buf)?;

        let index_contents = read_block(&file, &footer.index_handle, options.paranoid_checks)?;
        let index_block = Arc::new(Block::new(index_contents)?);

        let cache_id = block_cache.as_ref().map(|c| c.new_id()).unwrap_or(0);

        let mut reader = Self {
            path: path.to_path_buf(),
            file,
            file_size,
            options,
            index_block,
            metaindex_handle: footer.metaindex_handle,
            filter: None,
            block_cache,
            cache_id,
        };
        reader.read_meta(&footer)?;
        Ok(reader)
    }

    /// Load the filter block named by the metaindex, if it matches our policy.
    /// Failures only disable filtering.
    fn read_meta(&mut self, footer: &Footer) -> Result<()> {
        let Some(policy) = self.options.filter_policy.clone() else {
            return Ok(());
        };

        let meta = match read_block(&self.file, &footer.metaindex_handle, self.options.paranoid_checks)
            .and_then(Block::new)
        {
            Ok(block) => Arc::new(block),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Ignoring unreadable metaindex block");
                return Ok(());
            }
        };

        let mut iter = meta.iter(Arc::new(BytewiseComparator));
        let key = format!("{}{}", FILTER_META_PREFIX, policy.name());
        iter.seek(key.as_bytes())?;
        if iter.valid() && iter.key() == key.as_bytes() {
            let (handle, _) = BlockHandle::decode_from(iter.value())?;
            match read_block(&self.file, &handle, self.options.paranoid_checks) {
                Ok(data) => self.filter = Some(FilterBlockReader::new(policy, data)),
                Err(e) => {
                    tracing::warn!(path = %self.path.display(), error = %e, "Ignoring unreadable filter block");
                }
            }
        }
        Ok(())
    }

    /// Iterator over the data block named by an encoded index value
    pub(crate) fn block_iter(&self, opts: &BlockReadOptions, index_value: &[u8]) -> Result<BlockIterator> {
        let (handle, _) = BlockHandle::decode_from(index_value)?;
        let cmp = self.options.comparator.clone();

        let Some(cache) = self.block_cache.as_ref() else {
            let block = Block::new(read_block(&self.file, &handle, opts.verify_checksums)?)?;
            return Ok(BlockIterator::new(Arc::new(block), cmp, None));
        };

        let key = (self.cache_id, handle.offset);
        if let Some(pinned) = cache.lookup(&key) {
            let block = Arc::clone(pinned.value());
            return Ok(BlockIterator::new(block, cmp, Some(pinned)));
        }

        let block = Block::new(read_block(&self.file, &handle, opts.verify_checksums)?)?;
        if opts.fill_cache {
            let charge = block.size();
            let pinned = cache.insert(key, block, charge);
            let block = Arc::clone(pinned.value());
            Ok(BlockIterator::new(block, cmp, Some(pinned)))
        } else {
            Ok(BlockIterator::new(Arc::new(block), cmp, None))
        }
    }

    /// First entry with key >= `key` in the block that could hold `key`.
    ///
    /// Returns `None` when the filter rules the key out or the table has no
    /// such entry. The caller decides whether the returned key matches.
    pub fn internal_get(&self, opts: &BlockReadOptions, key: &[u8]) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        let mut index_iter = self.index_block.iter(self.options.comparator.clone());
        index_iter.seek(key)?;
        if !index_iter.valid() {
            return Ok(None);
        }

        if let Some(filter) = &self.filter {
            let (handle, _) = BlockHandle::decode_from(index_iter.value())?;
            if !filter.key_may_match(handle.offset, key) {
                return Ok(None);
            }
        }

        let mut block_iter = self.block_iter(opts, index_iter.value())?;
        block_iter.seek(key)?;
        if block_iter.valid() {
            return Ok(Some((block_iter.key().to_vec(), block_iter.value().to_vec())));
        }
        Ok(None)
    }

    /// Ordered iterator over every entry in the table
    pub fn iter(self: &Arc<Self>, opts: BlockReadOptions) -> SSTableIterator {
        let index_iter = self.index_block.iter(self.options.comparator.clone());
        let reader = Arc::clone(self);
        let inner = TwoLevelIterator::new(
            Box::new(index_iter),
            Box::new(move |index_value: &[u8]| {
                let iter = reader.block_iter(&opts, index_value)?;
                Ok(Box::new(iter) as Box<dyn InternalIterator>)
            }),
        );
        SSTableIterator::new(inner)
    }

    /// Approximate file offset where data for `key` begins (or would begin)
    pub fn approximate_offset_of(&self, key: &[u8]) -> u64 {
        let mut index_iter = self.index_block.iter(self.options.comparator.clone());
        if index_iter.seek(key).is_ok() && index_iter.valid() {
            if let Ok((handle, _)) = BlockHandle::decode_from(index_iter.value()) {
                return handle.offset;
            }
        }
        // Past the last key: the metaindex sits close to the end of the file
        self.metaindex_handle.offset
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn has_filter(&self) -> bool {
        self.filter.is_some()
    }
}
