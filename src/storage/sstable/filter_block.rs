//! Filter block
//!
//! One filter is generated for every 2KiB range of data-block offsets, so a
//! reader can map a data block's offset straight to its filter.
//!
//! ```text
//! [filter 0][filter 1]...[filter N-1]
//! [offset of filter 0: u32]...[offset of filter N-1: u32]
//! [offset of the offset array: u32]
//! [base_lg: u8]
//! ```

use std::sync::Arc;

use bytes::BufMut;

use crate::coding::decode_fixed32;
use crate::filter::FilterPolicy;

/// log2 of the data-offset range covered by one filter
const FILTER_BASE_LG: u8 = 11;
const FILTER_BASE: u64 = 1 << FILTER_BASE_LG;

pub struct FilterBlockBuilder {
    policy: Arc<dyn FilterPolicy>,
    /// Flattened keys for the filter in progress
    keys: Vec<u8>,
    starts: Vec<usize>,
    result: Vec<u8>,
    filter_offsets: Vec<u32>,
}

impl FilterBlockBuilder {
    pub fn new(policy: Arc<dyn FilterPolicy>) -> Self {
        Self {
            policy,
            keys: Vec::new(),
            starts: Vec::new(),
            result: Vec::new(),
            filter_offsets: Vec::new(),
        }
    }

    /// Called before a data block starting at `block_offset` is filled
    pub fn start_block(&mut self, block_offset: u64) {
        let filter_index = block_offset / FILTER_BASE;
        debug_assert!(filter_index >= self.filter_offsets.len() as u64);
        while filter_index > self.filter_offsets.len() as u64 {
            self.generate_filter();
        }
    }

    pub fn add_key(&mut self, key: &[u8]) {
        self.starts.push(self.keys.len());
        self.keys.extend_from_slice(key);
    }

    pub fn finish(mut self) -> Vec<u8> {
        if !self.starts.is_empty() {
            self.generate_filter();
        }
        let array_offset = self.result.len() as u32;
        for offset in &self.filter_offsets {
            self.result.put_u32_le(*offset);
        }
        self.result.put_u32_le(array_offset);
        self.result.put_u8(FILTER_BASE_LG);
        self.result
    }

    fn generate_filter(&mut self) {
        self.filter_offsets.push(self.result.len() as u32);
        if self.starts.is_empty() {
            return;
        }

        let mut keys: Vec<&[u8]> = Vec::with_capacity(self.starts.len());
        for (i, &start) in self.starts.iter().enumerate() {
            let end = self.starts.get(i + 1).copied().unwrap_or(self.keys.len());
            keys.push(&self.keys[start..end]);
        }
        self.policy.create_filter(&keys, &mut self.result);

        self.keys.clear();
        self.starts.clear();
    }
}

pub struct FilterBlockReader {
    policy: Arc<dyn FilterPolicy>,
    data: Vec<u8>,
    /// Start of the offset array
    offset: usize,
    num: usize,
    base_lg: u8,
}

impl FilterBlockReader {
    /// A malformed block yields a reader that matches everything
    pub fn new(policy: Arc<dyn FilterPolicy>, data: Vec<u8>) -> Self {
        let mut reader = Self {
            policy,
            data,
            offset: 0,
            num: 0,
            base_lg: 0,
        };
        let n = reader.data.len();
        if n < 5 {
            return reader;
        }
        let base_lg = reader.data[n - 1];
        let last_word = decode_fixed32(&reader.data[n - 5..]) as usize;
        if last_word > n - 5 {
            return reader;
        }
        reader.base_lg = base_lg;
        reader.offset = last_word;
        reader.num = (n - 5 - last_word) / 4;
        reader
    }

    pub fn key_may_match(&self, block_offset: u64, key: &[u8]) -> bool {
        let index = (block_offset >> self.base_lg) as usize;
        if index >= self.num {
            // Errors are treated as potential matches
            return true;
        }
        let start = decode_fixed32(&self.data[self.offset + index * 4..]) as usize;
        let limit = decode_fixed32(&self.data[self.offset + index * 4 + 4..]) as usize;
        if start < limit && limit <= self.offset {
            self.policy.key_may_match(key, &self.data[start..limit])
        } else if start == limit {
            // Empty filters do not match any keys
            false
        } else {
            true
        }
    }
}
