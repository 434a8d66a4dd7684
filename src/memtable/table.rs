//! MemTable implementation
//!
//! Skip-list memtable with RwLock for concurrency.

use std::cmp::Ordering;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::comparator::{Comparator, InternalKeyComparator};
use crate::error::Result;
use crate::iterator::InternalIterator;
use crate::types::{append_internal_key, parse_internal_key, LookupKey, SequenceNumber, ValueType};

use super::skiplist::SkipList;
use super::MemTableEntry;

/// In-memory table for recent writes
///
/// Entries are internal keys, so several versions of the same user key can
/// coexist; lookups pick the newest one visible at the read sequence.
pub struct MemTable {
    list: RwLock<SkipList>,
    cmp: InternalKeyComparator,
}

impl MemTable {
    /// Create a new empty MemTable
    pub fn new(cmp: InternalKeyComparator) -> Self {
        Self {
            list: RwLock::new(SkipList::new(cmp.clone())),
            cmp,
        }
    }

    /// Record a put (`ValueType::Value`) or a tombstone (`ValueType::Deletion`)
    pub fn add(&self, sequence: SequenceNumber, value_type: ValueType, key: &[u8], value: &[u8]) {
        let mut internal_key = Vec::with_capacity(key.len() + 8);
        append_internal_key(&mut internal_key, key, sequence, value_type);
        self.list.write().insert(internal_key, value.to_vec());
    }

    /// Look up the newest version of `key.user_key()` with sequence <= the
    /// lookup sequence.
    ///
    /// Returns:
    /// - `Some(Value)`: live value found
    /// - `Some(Tombstone)`: key deleted; older sources must not be consulted
    /// - `None`: no visible version here
    pub fn get(&self, key: &LookupKey) -> Option<MemTableEntry> {
        let list = self.list.read();
        let idx = list.find_greater_or_equal(key.internal_key())?;
        let parsed = parse_internal_key(list.key(idx))?;
        if self.cmp.user_comparator().compare(parsed.user_key, key.user_key()) != Ordering::Equal {
            return None;
        }
        match parsed.value_type {
            ValueType::Value => Some(MemTableEntry::Value(list.value(idx).to_vec())),
            ValueType::Deletion => Some(MemTableEntry::Tombstone),
        }
    }

    /// Get approximate size in bytes
    pub fn approximate_memory_usage(&self) -> usize {
        self.list.read().size_bytes()
    }

    /// Get entry count (every version counts)
    pub fn entry_count(&self) -> usize {
        self.list.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.read().is_empty()
    }

    /// Ordered iterator over internal keys
    pub fn iter(self: &Arc<Self>) -> MemTableIterator {
        MemTableIterator {
            table: Arc::clone(self),
            current: None,
            key: Vec::new(),
            value: Vec::new(),
        }
    }
}

/// Iterator over MemTable entries
///
/// Holds the table alive and takes the read lock only for each step, so an
/// open iterator never blocks writers.
pub struct MemTableIterator {
    table: Arc<MemTable>,
    current: Option<usize>,
    key: Vec<u8>,
    value: Vec<u8>,
}

impl MemTableIterator {
    fn load(&mut self, list: &SkipList, idx: Option<usize>) {
        self.current = idx;
        if let Some(i) = idx {
            self.key.clear();
            self.key.extend_from_slice(list.key(i));
            self.value.clear();
            self.value.extend_from_slice(list.value(i));
        }
    }
}

impl InternalIterator for MemTableIterator {
    fn valid(&self) -> bool {
        self.current.is_some()
    }

    fn seek_to_first(&mut self) -> Result<()> {
        let table = Arc::clone(&self.table);
        let list = table.list.read();
        self.load(&list, list.first());
        Ok(())
    }

    fn seek_to_last(&mut self) -> Result<()> {
        let table = Arc::clone(&self.table);
        let list = table.list.read();
        self.load(&list, list.last());
        Ok(())
    }

    fn seek(&mut self, target: &[u8]) -> Result<()> {
        let table = Arc::clone(&self.table);
        let list = table.list.read();
        self.load(&list, list.find_greater_or_equal(target));
        Ok(())
    }

    fn next(&mut self) -> Result<()> {
        if let Some(idx) = self.current {
            let table = Arc::clone(&self.table);
            let list = table.list.read();
            self.load(&list, list.next(idx));
        }
        Ok(())
    }

    fn prev(&mut self) -> Result<()> {
        if self.current.is_some() {
            let table = Arc::clone(&self.table);
            let list = table.list.read();
            let key = std::mem::take(&mut self.key);
            self.load(&list, list.find_less_than(&key));
            if self.current.is_none() {
                self.key = key;
            }
        }
        Ok(())
    }

    fn key(&self) -> &[u8] {
        &self.key
    }

    fn value(&self) -> &[u8] {
        &self.value
    }
}
