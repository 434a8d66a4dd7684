//! WAL Entry definitions
//!
//! Defines the payload of individual WAL records.

use serde::{Deserialize, Serialize};

use crate::batch::{Operation, WriteBatch};
use crate::error::Result;
use crate::types::SequenceNumber;

/// Record header: CRC (4) + Len (4)
pub const HEADER_SIZE: usize = 8;

/// A single entry in the WAL: one atomically applied write batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalEntry {
    /// Sequence number of the first operation; operation `i` uses `sequence + i`
    pub sequence: SequenceNumber,

    /// The operations to apply, in order
    pub operations: Vec<Operation>,
}

impl WalEntry {
    pub fn new(sequence: SequenceNumber, batch: &WriteBatch) -> Self {
        Self {
            sequence,
            operations: batch.operations().to_vec(),
        }
    }

    /// Last sequence number consumed by this entry
    pub fn last_sequence(&self) -> SequenceNumber {
        self.sequence + self.operations.len().saturating_sub(1) as u64
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }

    pub fn into_batch(self) -> WriteBatch {
        WriteBatch::from_operations(self.operations)
    }
}
