//! SSTable Builder
//!
//! Writes sorted key-value entries to a new SSTable file.

use std::cmp::Ordering;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::config::CompressionType;
use crate::error::{Result, StrataError};

use super::block::BlockBuilder;
use super::filter_block::FilterBlockBuilder;
use super::format::{block_checksum, BlockHandle, Footer, BLOCK_TRAILER_SIZE};
use super::{SSTable, TableOptions, FILTER_META_PREFIX};

/// Builder for creating new SSTables from sorted entries
pub struct SSTableBuilder {
    path: PathBuf,
    writer: BufWriter<File>,
    options: TableOptions,
    /// Bytes handed to the writer so far
    offset: u64,
    data_block: BlockBuilder,
    index_block: BlockBuilder,
    filter_block: Option<FilterBlockBuilder>,
    last_key: Vec<u8>,
    smallest: Option<Vec<u8>>,
    num_entries: u64,
    /// An index entry for the last flushed data block is owed. It is written
    /// once the next key is known so the separator can be shortened.
    pending_index_entry: bool,
    pending_handle: BlockHandle,
}

impl SSTableBuilder {
    /// Create a new SSTable builder
    ///
    /// Call `add()` in sorted key order, then `finish()` to write the
    /// filter, index and footer.
    pub fn new(path: &Path, options: TableOptions) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        let mut filter_block = options
            .filter_policy
            .as_ref()
            .map(|policy| FilterBlockBuilder::new(policy.clone()));
        if let Some(fb) = filter_block.as_mut() {
            fb.start_block(0);
        }

        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
            data_block: BlockBuilder::new(options.block_restart_interval),
            index_block: BlockBuilder::new(1),
            options,
            offset: 0,
            filter_block,
            last_key: Vec::new(),
            smallest: None,
            num_entries: 0,
            pending_index_entry: false,
            pending_handle: BlockHandle::default(),
        })
    }

    /// Add a key-value pair (must be called in sorted key order)
    pub fn add(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        if self.num_entries > 0
            && self.options.comparator.compare(key, &self.last_key) != Ordering::Greater
        {
            return Err(StrataError::InvalidArgument(
                "table keys must be added in strictly increasing order".into(),
            ));
        }

        if self.pending_index_entry {
            debug_assert!(self.data_block.is_empty());
            let separator = self
                .options
                .comparator
                .find_shortest_separator(&self.last_key, key);
            self.index_block
                .add(&separator, &self.pending_handle.encode());
            self.pending_index_entry = false;
        }

        if let Some(fb) = self.filter_block.as_mut() {
            fb.add_key(key);
        }
        if self.smallest.is_none() {
            self.smallest = Some(key.to_vec());
        }

        self.last_key.clear();
        self.last_key.extend_from_slice(key);
        self.num_entries += 1;
        self.data_block.add(key, value);

        if self.data_block.current_size_estimate() >= self.options.block_size {
            self.flush()?;
        }
        Ok(())
    }

    /// Close the current data block
    fn flush(&mut self) -> Result<()> {
        if self.data_block.is_empty() {
            return Ok(());
        }
        debug_assert!(!self.pending_index_entry);

        let contents = self.data_block.finish().to_vec();
        self.data_block.reset();
        self.pending_handle = self.write_block(&contents, self.options.compression)?;
        self.pending_index_entry = true;
        self.writer.flush()?;

        if let Some(fb) = self.filter_block.as_mut() {
            fb.start_block(self.offset);
        }
        Ok(())
    }

    /// Compress if worthwhile, then write contents and trailer
    fn write_block(&mut self, raw: &[u8], compression: CompressionType) -> Result<BlockHandle> {
        let compressed = match compression {
            CompressionType::Snappy => snap::raw::Encoder::new()
                .compress_vec(raw)
                .ok()
                // Keep the raw block unless snappy saves at least 12.5%
                .filter(|c| c.len() < raw.len() - raw.len() / 8),
            CompressionType::None => None,
        };
        match compressed {
            Some(c) => self.write_raw_block(&c, CompressionType::Snappy),
            None => self.write_raw_block(raw, CompressionType::None),
        }
    }

    fn write_raw_block(&mut self, contents: &[u8], compression: CompressionType) -> Result<BlockHandle> {
        let handle = BlockHandle::new(self.offset, contents.len() as u64);
        let type_byte = compression as u8;
        self.writer.write_all(contents)?;
        self.writer.write_all(&[type_byte])?;
        self.writer
            .write_all(&block_checksum(contents, type_byte).to_le_bytes())?;
        self.offset += (contents.len() + BLOCK_TRAILER_SIZE) as u64;
        Ok(handle)
    }

    /// Number of entries added so far
    pub fn num_entries(&self) -> u64 {
        self.num_entries
    }

    /// Size of the file so far, excluding the unflushed data block
    pub fn file_size(&self) -> u64 {
        self.offset
    }

    /// Finish building: write filter, metaindex, index and footer, and return
    /// metadata for the synced file
    pub fn finish(mut self) -> Result<SSTable> {
        self.flush()?;

        // Filter block
        let mut filter_handle = None;
        if let Some(fb) = self.filter_block.take() {
            let contents = fb.finish();
            filter_handle = Some(self.write_raw_block(&contents, CompressionType::None)?);
        }

        // Metaindex block
        let mut metaindex = BlockBuilder::new(self.options.block_restart_interval);
        if let (Some(handle), Some(policy)) = (filter_handle, self.options.filter_policy.as_ref()) {
            let key = format!("{}{}", FILTER_META_PREFIX, policy.name());
            metaindex.add(key.as_bytes(), &handle.encode());
        }
        let contents = metaindex.finish().to_vec();
        let metaindex_handle = self.write_block(&contents, self.options.compression)?;

        // Index block
        if self.pending_index_entry {
            let successor = self.options.comparator.find_short_successor(&self.last_key);
            self.index_block
                .add(&successor, &self.pending_handle.encode());
            self.pending_index_entry = false;
        }
        let contents = self.index_block.finish().to_vec();
        let index_handle = self.write_block(&contents, self.options.compression)?;

        let footer = Footer {
            metaindex_handle,
            index_handle,
        };
        let encoded = footer.encode();
        self.writer.write_all(&encoded)?;
        self.offset += encoded.len() as u64;

        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;

        Ok(SSTable {
            path: self.path,
            entry_count: self.num_entries,
            smallest: self.smallest.unwrap_or_default(),
            largest: self.last_key,
            file_size: self.offset,
        })
    }

    /// Give up on the table and remove the partial file
    pub fn abandon(self) -> Result<()> {
        let path = self.path.clone();
        drop(self);
        fs::remove_file(&path)?;
        Ok(())
    }
}
