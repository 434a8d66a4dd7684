//! Data/index block encoding
//!
//! Entries are prefix-compressed against the previous key. Every
//! `restart_interval` entries the full key is stored again (a *restart
//! point*), and the offsets of all restart points are appended to the block
//! so a reader can binary search them.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ Entry: [shared (varint)][non_shared (varint)][value_len (varint)]
//! │        [key delta][value]                                    │
//! │ ... repeated ...                                             │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Restart offsets: [u32] * num_restarts                        │
//! │ num_restarts: u32                                            │
//! └──────────────────────────────────────────────────────────────┘
//! ```

use std::cmp::Ordering;
use std::sync::Arc;

use bytes::BufMut;

use crate::cache::{BlockCacheKey, CacheHandle};
use crate::coding::{decode_fixed32, get_varint32, put_varint32};
use crate::comparator::Comparator;
use crate::error::{Result, StrataError};
use crate::iterator::InternalIterator;

// =============================================================================
// Builder
// =============================================================================

/// Accumulates sorted entries and serializes them into a block
pub struct BlockBuilder {
    buffer: Vec<u8>,
    restarts: Vec<u32>,
    restart_interval: usize,
    /// Entries emitted since the last restart
    counter: usize,
    last_key: Vec<u8>,
    finished: bool,
}

impl BlockBuilder {
    pub fn new(restart_interval: usize) -> Self {
        debug_assert!(restart_interval >= 1);
        Self {
            buffer: Vec::new(),
            restarts: vec![0],
            restart_interval,
            counter: 0,
            last_key: Vec::new(),
            finished: false,
        }
    }

    /// Add an entry. Keys MUST be added in increasing order.
    pub fn add(&mut self, key: &[u8], value: &[u8]) {
        debug_assert!(!self.finished);
        let shared = if self.counter < self.restart_interval {
            self.last_key
                .iter()
                .zip(key.iter())
                .take_while(|(a, b)| a == b)
                .count()
        } else {
            self.restarts.push(self.buffer.len() as u32);
            self.counter = 0;
            0
        };
        let non_shared = key.len() - shared;

        put_varint32(&mut self.buffer, shared as u32);
        put_varint32(&mut self.buffer, non_shared as u32);
        put_varint32(&mut self.buffer, value.len() as u32);
        self.buffer.put_slice(&key[shared..]);
        self.buffer.put_slice(value);

        self.last_key.truncate(shared);
        self.last_key.extend_from_slice(&key[shared..]);
        self.counter += 1;
    }

    /// Append the restart array and return the finished block contents
    pub fn finish(&mut self) -> &[u8] {
        for restart in &self.restarts {
            self.buffer.put_u32_le(*restart);
        }
        self.buffer.put_u32_le(self.restarts.len() as u32);
        self.finished = true;
        &self.buffer
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
        self.restarts.clear();
        self.restarts.push(0);
        self.counter = 0;
        self.last_key.clear();
        self.finished = false;
    }

    /// Size of the block if it were finished now
    pub fn current_size_estimate(&self) -> usize {
        self.buffer.len() + self.restarts.len() * 4 + 4
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

// =============================================================================
// Block
// =============================================================================

/// An immutable, decoded-in-place block
#[derive(Debug)]
pub struct Block {
    data: Vec<u8>,
    restart_offset: usize,
    num_restarts: usize,
}

impl Block {
    pub fn new(data: Vec<u8>) -> Result<Self> {
        if data.len() < 4 {
            return Err(StrataError::Corruption("block too short".into()));
        }
        let num_restarts = decode_fixed32(&data[data.len() - 4..]) as usize;
        let max_restarts = (data.len() - 4) / 4;
        if num_restarts > max_restarts {
            return Err(StrataError::Corruption(format!(
                "block claims {} restarts but holds at most {}",
                num_restarts, max_restarts
            )));
        }
        let restart_offset = data.len() - (1 + num_restarts) * 4;
        Ok(Self {
            data,
            restart_offset,
            num_restarts,
        })
    }

    /// Bytes charged against the block cache
    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn iter(self: &Arc<Self>, cmp: Arc<dyn Comparator>) -> BlockIterator {
        BlockIterator::new(Arc::clone(self), cmp, None)
    }

    fn restart_point(&self, index: usize) -> usize {
        decode_fixed32(&self.data[self.restart_offset + index * 4..]) as usize
    }
}

// =============================================================================
// Iterator
// =============================================================================

/// Cursor over one block
pub struct BlockIterator {
    block: Arc<Block>,
    cmp: Arc<dyn Comparator>,
    /// Keeps the block pinned in the block cache while iterating
    _pin: Option<CacheHandle<BlockCacheKey, Block>>,
    /// Offset of the current entry; `restart_offset` when invalid
    current: usize,
    /// Offset just past the current entry
    next_offset: usize,
    /// Restart block containing `current`
    restart_index: usize,
    key: Vec<u8>,
    value_start: usize,
    value_len: usize,
}

impl BlockIterator {
    pub(crate) fn new(
        block: Arc<Block>,
        cmp: Arc<dyn Comparator>,
        pin: Option<CacheHandle<BlockCacheKey, Block>>,
    ) -> Self {
        let restart_offset = block.restart_offset;
        let num_restarts = block.num_restarts;
        Self {
            block,
            cmp,
            _pin: pin,
            current: restart_offset,
            next_offset: restart_offset,
            restart_index: num_restarts,
            key: Vec::new(),
            value_start: 0,
            value_len: 0,
        }
    }

    fn mark_invalid(&mut self) {
        self.current = self.block.restart_offset;
        self.restart_index = self.block.num_restarts;
    }

    fn corruption(&mut self, what: &str) -> StrataError {
        self.mark_invalid();
        self.key.clear();
        StrataError::Corruption(format!("bad entry in block: {}", what))
    }

    fn seek_to_restart_point(&mut self, index: usize) {
        self.key.clear();
        self.restart_index = index;
        self.next_offset = self.block.restart_point(index);
    }

    /// Decode the entry at `next_offset`; `Ok(false)` at end of block
    fn parse_next_key(&mut self) -> Result<bool> {
        self.current = self.next_offset;
        let limit = self.block.restart_offset;
        if self.current >= limit {
            self.mark_invalid();
            return Ok(false);
        }

        let data = &self.block.data[self.current..limit];
        let Some((shared, n1)) = get_varint32(data) else {
            return Err(self.corruption("shared length"));
        };
        let Some((non_shared, n2)) = get_varint32(&data[n1..]) else {
            return Err(self.corruption("key length"));
        };
        let Some((value_len, n3)) = get_varint32(&data[n1 + n2..]) else {
            return Err(self.corruption("value length"));
        };
        let (shared, non_shared, value_len) = (shared as usize, non_shared as usize, value_len as usize);
        let header = n1 + n2 + n3;
        if shared > self.key.len() || header + non_shared + value_len > data.len() {
            return Err(self.corruption("lengths out of range"));
        }

        let delta_start = self.current + header;
        self.key.truncate(shared);
        self.key
            .extend_from_slice(&self.block.data[delta_start..delta_start + non_shared]);
        self.value_start = delta_start + non_shared;
        self.value_len = value_len;
        self.next_offset = self.value_start + value_len;

        while self.restart_index + 1 < self.block.num_restarts
            && self.block.restart_point(self.restart_index + 1) < self.current
        {
            self.restart_index += 1;
        }
        Ok(true)
    }

    /// Full key stored at restart point `index`
    fn restart_key(&self, index: usize) -> Result<&[u8]> {
        let offset = self.block.restart_point(index);
        let data = &self.block.data[offset..self.block.restart_offset];
        let parsed = get_varint32(data).and_then(|(shared, n1)| {
            let (non_shared, n2) = get_varint32(&data[n1..])?;
            let (_, n3) = get_varint32(&data[n1 + n2..])?;
            Some((shared, non_shared as usize, n1 + n2 + n3))
        });
        match parsed {
            Some((0, non_shared, header)) if header + non_shared <= data.len() => {
                Ok(&data[header..header + non_shared])
            }
            _ => Err(StrataError::Corruption("bad restart point in block".into())),
        }
    }
}

impl InternalIterator for BlockIterator {
    fn valid(&self) -> bool {
        self.current < self.block.restart_offset
    }

    fn seek_to_first(&mut self) -> Result<()> {
        if self.block.num_restarts == 0 {
            self.mark_invalid();
            return Ok(());
        }
        self.seek_to_restart_point(0);
        self.parse_next_key()?;
        Ok(())
    }

    fn seek_to_last(&mut self) -> Result<()> {
        if self.block.num_restarts == 0 {
            self.mark_invalid();
            return Ok(());
        }
        self.seek_to_restart_point(self.block.num_restarts - 1);
        while self.parse_next_key()? && self.next_offset < self.block.restart_offset {}
        Ok(())
    }

    fn seek(&mut self, target: &[u8]) -> Result<()> {
        if self.block.num_restarts == 0 {
            self.mark_invalid();
            return Ok(());
        }

        // Binary search for the last restart point with key < target
        let mut left = 0;
        let mut right = self.block.num_restarts - 1;
        while left < right {
            let mid = (left + right).div_ceil(2);
            let ord = self
                .restart_key(mid)
                .map(|mid_key| self.cmp.compare(mid_key, target));
            let ord = match ord {
                Ok(ord) => ord,
                Err(e) => {
                    self.mark_invalid();
                    return Err(e);
                }
            };
            if ord == Ordering::Less {
                left = mid;
            } else {
                right = mid - 1;
            }
        }

        // Linear scan within the restart block
        self.seek_to_restart_point(left);
        loop {
            if !self.parse_next_key()? {
                return Ok(());
            }
            if self.cmp.compare(&self.key, target) != Ordering::Less {
                return Ok(());
            }
        }
    }

    fn next(&mut self) -> Result<()> {
        debug_assert!(self.valid());
        self.parse_next_key()?;
        Ok(())
    }

    fn prev(&mut self) -> Result<()> {
        debug_assert!(self.valid());
        // Back up to a restart point strictly before the current entry
        let original = self.current;
        while self.block.restart_point(self.restart_index) >= original {
            if self.restart_index == 0 {
                self.mark_invalid();
                return Ok(());
            }
            self.restart_index -= 1;
        }

        self.seek_to_restart_point(self.restart_index);
        while self.parse_next_key()? && self.next_offset < original {}
        Ok(())
    }

    fn key(&self) -> &[u8] {
        &self.key
    }

    fn value(&self) -> &[u8] {
        if !self.valid() {
            return &[];
        }
        &self.block.data[self.value_start..self.value_start + self.value_len]
    }
}
