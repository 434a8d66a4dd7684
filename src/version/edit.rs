//! Version edits
//!
//! A `VersionEdit` is the delta between two versions. The manifest is a log
//! of bincode-encoded edits framed like WAL records; replaying it from the
//! start reconstructs the current version.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::{InternalKey, SequenceNumber};

/// Metadata of one table file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetaData {
    pub number: u64,
    pub file_size: u64,
    /// Smallest internal key stored in the table
    pub smallest: InternalKey,
    /// Largest internal key stored in the table
    pub largest: InternalKey,
}

impl FileMetaData {
    pub fn new(number: u64, file_size: u64, smallest: InternalKey, largest: InternalKey) -> Self {
        Self {
            number,
            file_size,
            smallest,
            largest,
        }
    }
}

/// Changes applied atomically to produce the next version
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VersionEdit {
    pub(crate) comparator: Option<String>,
    pub(crate) log_number: Option<u64>,
    pub(crate) prev_log_number: Option<u64>,
    pub(crate) next_file_number: Option<u64>,
    pub(crate) last_sequence: Option<SequenceNumber>,
    pub(crate) compact_pointers: Vec<(usize, InternalKey)>,
    pub(crate) deleted_files: BTreeSet<(usize, u64)>,
    pub(crate) new_files: Vec<(usize, FileMetaData)>,
}

impl VersionEdit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn set_comparator_name(&mut self, name: &str) {
        self.comparator = Some(name.to_string());
    }

    /// Logs numbered below this are no longer needed
    pub fn set_log_number(&mut self, number: u64) {
        self.log_number = Some(number);
    }

    pub fn set_prev_log_number(&mut self, number: u64) {
        self.prev_log_number = Some(number);
    }

    pub fn set_next_file(&mut self, number: u64) {
        self.next_file_number = Some(number);
    }

    pub fn set_last_sequence(&mut self, sequence: SequenceNumber) {
        self.last_sequence = Some(sequence);
    }

    /// Where the next size compaction of `level` should start
    pub fn set_compact_pointer(&mut self, level: usize, key: InternalKey) {
        self.compact_pointers.push((level, key));
    }

    /// Add a table at `level`
    pub fn add_file(&mut self, level: usize, file: FileMetaData) {
        self.new_files.push((level, file));
    }

    /// Remove table `number` from `level`
    pub fn remove_file(&mut self, level: usize, number: u64) {
        self.deleted_files.insert((level, number));
    }

    pub fn new_files(&self) -> &[(usize, FileMetaData)] {
        &self.new_files
    }

    pub fn deleted_files(&self) -> &BTreeSet<(usize, u64)> {
        &self.deleted_files
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}
