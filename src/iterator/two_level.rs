//! Two-level iteration
//!
//! An index iterator yields handles; a block function turns each handle into
//! a data iterator. Used for tables (index block → data blocks) and for
//! sorted levels (file list → tables).

use crate::error::Result;

use super::InternalIterator;

/// Opens the data iterator named by an index value
pub type BlockFunction = Box<dyn Fn(&[u8]) -> Result<Box<dyn InternalIterator>> + Send>;

pub struct TwoLevelIterator {
    index_iter: Box<dyn InternalIterator>,
    block_fn: BlockFunction,
    data_iter: Option<Box<dyn InternalIterator>>,
    /// Index value `data_iter` was opened from
    data_handle: Vec<u8>,
}

impl TwoLevelIterator {
    pub fn new(index_iter: Box<dyn InternalIterator>, block_fn: BlockFunction) -> Self {
        Self {
            index_iter,
            block_fn,
            data_iter: None,
            data_handle: Vec::new(),
        }
    }

    fn init_data_block(&mut self) -> Result<()> {
        if !self.index_iter.valid() {
            self.data_iter = None;
            return Ok(());
        }
        let handle = self.index_iter.value();
        if self.data_iter.is_some() && handle == self.data_handle.as_slice() {
            // Already positioned on this block
            return Ok(());
        }
        let iter = (self.block_fn)(handle)?;
        self.data_handle.clear();
        self.data_handle.extend_from_slice(handle);
        self.data_iter = Some(iter);
        Ok(())
    }

    fn data_valid(&self) -> bool {
        self.data_iter.as_ref().is_some_and(|it| it.valid())
    }

    fn skip_empty_data_blocks_forward(&mut self) -> Result<()> {
        while !self.data_valid() {
            if !self.index_iter.valid() {
                self.data_iter = None;
                return Ok(());
            }
            self.index_iter.next()?;
            self.init_data_block()?;
            if let Some(it) = self.data_iter.as_mut() {
                it.seek_to_first()?;
            }
        }
        Ok(())
    }

    fn skip_empty_data_blocks_backward(&mut self) -> Result<()> {
        while !self.data_valid() {
            if !self.index_iter.valid() {
                self.data_iter = None;
                return Ok(());
            }
            self.index_iter.prev()?;
            self.init_data_block()?;
            if let Some(it) = self.data_iter.as_mut() {
                it.seek_to_last()?;
            }
        }
        Ok(())
    }
}

impl InternalIterator for TwoLevelIterator {
    fn valid(&self) -> bool {
        self.data_valid()
    }

    fn seek_to_first(&mut self) -> Result<()> {
        self.index_iter.seek_to_first()?;
        self.init_data_block()?;
        if let Some(it) = self.data_iter.as_mut() {
            it.seek_to_first()?;
        }
        self.skip_empty_data_blocks_forward()
    }

    fn seek_to_last(&mut self) -> Result<()> {
        self.index_iter.seek_to_last()?;
        self.init_data_block()?;
        if let Some(it) = self.data_iter.as_mut() {
            it.seek_to_last()?;
        }
        self.skip_empty_data_blocks_backward()
    }

    fn seek(&mut self, target: &[u8]) -> Result<()> {
        self.index_iter.seek(target)?;
        self.init_data_block()?;
        if let Some(it) = self.data_iter.as_mut() {
            it.seek(target)?;
        }
        self.skip_empty_data_blocks_forward()
    }

    fn next(&mut self) -> Result<()> {
        if let Some(it) = self.data_iter.as_mut() {
            it.next()?;
        }
        self.skip_empty_data_blocks_forward()
    }

    fn prev(&mut self) -> Result<()> {
        if let Some(it) = self.data_iter.as_mut() {
            it.prev()?;
        }
        self.skip_empty_data_blocks_backward()
    }

    fn key(&self) -> &[u8] {
        match &self.data_iter {
            Some(it) => it.key(),
            None => &[],
        }
    }

    fn value(&self) -> &[u8] {
        match &self.data_iter {
            Some(it) => it.value(),
            None => &[],
        }
    }
}
