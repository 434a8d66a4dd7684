//! Write batches
//!
//! A batch is an ordered list of puts and deletes applied atomically: one
//! WAL record, one run of consecutive sequence numbers, one memtable update.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::memtable::MemTable;
use crate::types::{SequenceNumber, ValueType};

/// Operations that can be batched and logged
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    /// Put a key-value pair
    Put { key: Vec<u8>, value: Vec<u8> },

    /// Delete a key
    Delete { key: Vec<u8> },
}

impl Operation {
    pub fn key(&self) -> &[u8] {
        match self {
            Operation::Put { key, .. } | Operation::Delete { key } => key,
        }
    }
}

/// Ordered collection of pending mutations
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    operations: Vec<Operation>,
    approximate_size: usize,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: &[u8], value: &[u8]) -> &mut Self {
        self.approximate_size += key.len() + value.len() + 2;
        self.operations.push(Operation::Put {
            key: key.to_vec(),
            value: value.to_vec(),
        });
        self
    }

    pub fn delete(&mut self, key: &[u8]) -> &mut Self {
        self.approximate_size += key.len() + 1;
        self.operations.push(Operation::Delete { key: key.to_vec() });
        self
    }

    /// Append all operations of `other`, preserving order
    pub fn append(&mut self, other: &WriteBatch) {
        self.operations.extend(other.operations.iter().cloned());
        self.approximate_size += other.approximate_size;
    }

    pub fn clear(&mut self) {
        self.operations.clear();
        self.approximate_size = 0;
    }

    /// Number of operations (each consumes one sequence number)
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Rough payload size, used to bound group commits
    pub fn approximate_size(&self) -> usize {
        self.approximate_size
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    pub(crate) fn from_operations(operations: Vec<Operation>) -> Self {
        let approximate_size = operations
            .iter()
            .map(|op| match op {
                Operation::Put { key, value } => key.len() + value.len() + 2,
                Operation::Delete { key } => key.len() + 1,
            })
            .sum();
        Self {
            operations,
            approximate_size,
        }
    }

    pub(crate) fn into_operations(self) -> Vec<Operation> {
        self.operations
    }

    /// Apply to `mem`, assigning `base_sequence`, `base_sequence + 1`, ...
    pub(crate) fn insert_into(&self, base_sequence: SequenceNumber, mem: &MemTable) -> Result<()> {
        for (i, op) in self.operations.iter().enumerate() {
            let sequence = base_sequence + i as u64;
            match op {
                Operation::Put { key, value } => mem.add(sequence, ValueType::Value, key, value),
                Operation::Delete { key } => mem.add(sequence, ValueType::Deletion, key, &[]),
            }
        }
        Ok(())
    }
}
