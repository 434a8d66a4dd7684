//! Arena-backed skip list
//!
//! Nodes live in a `Vec` and link to each other by index, so there is no
//! unsafe pointer juggling and node indices stay stable for iterators.
//! Nodes are never removed; the whole list is dropped after a flush.
//!
//! ```text
//! Level 3:  HEAD ──────────────────────────────► 50 ──────────► NIL
//! Level 2:  HEAD ──────────► 20 ────────────────► 50 ──────────► NIL
//! Level 1:  HEAD ──► 10 ──► 20 ────► 35 ────────► 50 ──► 60 ──► NIL
//! Level 0:  HEAD ──► 10 ──► 20 ──► 25 ──► 35 ──► 50 ──► 60 ──► 70 ► NIL
//! ```

use std::cmp::Ordering;

use rand::Rng;

use crate::comparator::{Comparator, InternalKeyComparator};

/// Maximum height of the skip list
pub const MAX_HEIGHT: usize = 12;

/// Each level has a 1-in-BRANCHING chance of promotion
const BRANCHING: u32 = 4;

const HEAD: usize = 0;

struct SkipNode {
    key: Vec<u8>,
    value: Vec<u8>,
    forward: Vec<Option<usize>>,
}

/// Sorted map from internal key to value
pub struct SkipList {
    nodes: Vec<SkipNode>,
    height: usize,
    len: usize,
    size_bytes: usize,
    cmp: InternalKeyComparator,
}

impl SkipList {
    pub fn new(cmp: InternalKeyComparator) -> Self {
        let head = SkipNode {
            key: Vec::new(),
            value: Vec::new(),
            forward: vec![None; MAX_HEIGHT],
        };
        Self {
            nodes: vec![head],
            height: 1,
            len: 0,
            size_bytes: 0,
            cmp,
        }
    }

    /// Insert a key-value pair. Overwrites the value if the key exists.
    pub fn insert(&mut self, key: Vec<u8>, value: Vec<u8>) {
        let mut prev = [HEAD; MAX_HEIGHT];
        let found = self.find_greater_or_equal_with_prev(&key, &mut prev);

        if let Some(idx) = found {
            if self.cmp.compare(&self.nodes[idx].key, &key) == Ordering::Equal {
                self.size_bytes = self.size_bytes - self.nodes[idx].value.len() + value.len();
                self.nodes[idx].value = value;
                return;
            }
        }

        // Levels above the current height keep HEAD as predecessor
        let height = Self::random_height();
        self.height = self.height.max(height);

        let idx = self.nodes.len();
        self.size_bytes += key.len() + value.len() + height * std::mem::size_of::<usize>();
        let mut node = SkipNode {
            key,
            value,
            forward: vec![None; height],
        };
        for (level, slot) in node.forward.iter_mut().enumerate() {
            *slot = self.nodes[prev[level]].forward[level];
        }
        self.nodes.push(node);
        for (level, &p) in prev.iter().enumerate().take(height) {
            self.nodes[p].forward[level] = Some(idx);
        }
        self.len += 1;
    }

    /// First node with key >= `key`
    pub fn find_greater_or_equal(&self, key: &[u8]) -> Option<usize> {
        let mut prev = [HEAD; MAX_HEIGHT];
        self.find_greater_or_equal_with_prev(key, &mut prev)
    }

    /// Last node with key < `key`
    pub fn find_less_than(&self, key: &[u8]) -> Option<usize> {
        let mut x = HEAD;
        for level in (0..self.height).rev() {
            while let Some(next) = self.nodes[x].forward[level] {
                if self.cmp.compare(&self.nodes[next].key, key) == Ordering::Less {
                    x = next;
                } else {
                    break;
                }
            }
        }
        (x != HEAD).then_some(x)
    }

    pub fn first(&self) -> Option<usize> {
        self.nodes[HEAD].forward[0]
    }

    pub fn last(&self) -> Option<usize> {
        let mut x = HEAD;
        for level in (0..self.height).rev() {
            while let Some(next) = self.nodes[x].forward[level] {
                x = next;
            }
        }
        (x != HEAD).then_some(x)
    }

    pub fn next(&self, idx: usize) -> Option<usize> {
        self.nodes[idx].forward[0]
    }

    pub fn key(&self, idx: usize) -> &[u8] {
        &self.nodes[idx].key
    }

    pub fn value(&self, idx: usize) -> &[u8] {
        &self.nodes[idx].value
    }

    /// Number of entries in the skip list.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Approximate memory usage in bytes.
    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    fn find_greater_or_equal_with_prev(
        &self,
        key: &[u8],
        prev: &mut [usize; MAX_HEIGHT],
    ) -> Option<usize> {
        let mut x = HEAD;
        for level in (0..self.height).rev() {
            loop {
                match self.nodes[x].forward[level] {
                    Some(next) if self.cmp.compare(&self.nodes[next].key, key) == Ordering::Less => {
                        x = next;
                    }
                    _ => break,
                }
            }
            prev[level] = x;
        }
        self.nodes[x].forward[0]
    }

    fn random_height() -> usize {
        let mut rng = rand::thread_rng();
        let mut height = 1;
        while height < MAX_HEIGHT && rng.gen_range(0..BRANCHING) == 0 {
            height += 1;
        }
        height
    }
}
