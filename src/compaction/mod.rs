//! Compaction Module
//!
//! Merges table files from one level into the next to bound read fan-out
//! and reclaim space held by overwritten and deleted entries.
//!
//! ## Responsibilities
//! - Choose what to compact (`picker`)
//! - Run the merge and write output tables (`job`)
//! - Run compactions off the foreground path (`worker`)
//!
//! ## Level Invariants
//! ```text
//! L0:  [a..k] [c..z] [b..f]      overlapping, flushed memtables
//! L1:  [a..d] [e..h] [i..z]      disjoint, sorted by key
//! L2+: same as L1, each ~10x larger than the previous
//! ```

mod job;
mod picker;
mod worker;

use std::cmp::Ordering;
use std::sync::Arc;

use crate::comparator::{Comparator, InternalKeyComparator};
use crate::config::NUM_LEVELS;
use crate::version::{total_file_size, FileMetaData, Version, VersionEdit};

pub(crate) use job::{build_table, CompactionEnv, CompactionJob, CompactionOutcome};
pub(crate) use picker::{compact_range, pick_compaction};
pub(crate) use worker::BackgroundWorker;

/// Per-level compaction statistics
#[derive(Debug, Clone, Copy, Default)]
pub struct CompactionStats {
    pub micros: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
}

impl CompactionStats {
    pub fn add(&mut self, other: &CompactionStats) {
        self.micros += other.micros;
        self.bytes_read += other.bytes_read;
        self.bytes_written += other.bytes_written;
    }
}

/// A chosen compaction: files of `level` and overlapping files of `level + 1`
pub struct Compaction {
    level: usize,
    max_output_file_size: u64,
    max_grandparent_overlap_bytes: u64,
    pub(crate) input_version: Arc<Version>,
    pub(crate) edit: VersionEdit,
    /// `inputs[0]` from `level`, `inputs[1]` from `level + 1`
    pub(crate) inputs: [Vec<Arc<FileMetaData>>; 2],
    /// Files of `level + 2` overlapping the compaction range
    pub(crate) grandparents: Vec<Arc<FileMetaData>>,
    grandparent_index: usize,
    seen_key: bool,
    overlapped_bytes: u64,
    /// Per level, files before this index end before the keys seen so far
    level_ptrs: [usize; NUM_LEVELS],
}

impl Compaction {
    pub(crate) fn new(
        level: usize,
        input_version: Arc<Version>,
        max_output_file_size: u64,
        max_grandparent_overlap_bytes: u64,
    ) -> Self {
        Self {
            level,
            max_output_file_size,
            max_grandparent_overlap_bytes,
            input_version,
            edit: VersionEdit::new(),
            inputs: [Vec::new(), Vec::new()],
            grandparents: Vec::new(),
            grandparent_index: 0,
            seen_key: false,
            overlapped_bytes: 0,
            level_ptrs: [0; NUM_LEVELS],
        }
    }

    /// Level being compacted; outputs go to `level() + 1`
    pub fn level(&self) -> usize {
        self.level
    }

    pub fn num_input_files(&self, which: usize) -> usize {
        self.inputs[which].len()
    }

    pub fn input(&self, which: usize, i: usize) -> &Arc<FileMetaData> {
        &self.inputs[which][i]
    }

    pub fn max_output_file_size(&self) -> u64 {
        self.max_output_file_size
    }

    fn icmp(&self) -> &InternalKeyComparator {
        &self.input_version.icmp
    }

    /// A single input file with nothing to merge against can simply be
    /// relinked one level down, unless that would leave it overlapping too
    /// much of the grandparent level
    pub fn is_trivial_move(&self) -> bool {
        self.num_input_files(0) == 1
            && self.num_input_files(1) == 0
            && total_file_size(&self.grandparents) <= self.max_grandparent_overlap_bytes
    }

    /// Record the removal of every input file in `edit`
    pub fn add_input_deletions(&self, edit: &mut VersionEdit) {
        for (which, files) in self.inputs.iter().enumerate() {
            for file in files {
                edit.remove_file(self.level + which, file.number);
            }
        }
    }

    /// True if no level below the output level holds `user_key`, so a
    /// deletion marker for it can be dropped.
    ///
    /// Keys must be passed in increasing order.
    pub fn is_base_level_for_key(&mut self, user_key: &[u8]) -> bool {
        let version = Arc::clone(&self.input_version);
        let ucmp = version.icmp.user_comparator();
        for level in self.level + 2..NUM_LEVELS {
            let files = version.files(level);
            while self.level_ptrs[level] < files.len() {
                let f = &files[self.level_ptrs[level]];
                if ucmp.compare(user_key, f.largest.user_key()) != Ordering::Greater {
                    if ucmp.compare(user_key, f.smallest.user_key()) != Ordering::Less {
                        return false;
                    }
                    break;
                }
                self.level_ptrs[level] += 1;
            }
        }
        true
    }

    /// True if the current output should be closed before adding
    /// `internal_key`, because it would overlap too much of the grandparent
    /// level
    pub fn should_stop_before(&mut self, internal_key: &[u8]) -> bool {
        let icmp = self.icmp().clone();
        while self.grandparent_index < self.grandparents.len()
            && icmp.compare(
                internal_key,
                self.grandparents[self.grandparent_index].largest.encode(),
            ) == Ordering::Greater
        {
            if self.seen_key {
                self.overlapped_bytes += self.grandparents[self.grandparent_index].file_size;
            }
            self.grandparent_index += 1;
        }
        self.seen_key = true;

        if self.overlapped_bytes > self.max_grandparent_overlap_bytes {
            self.overlapped_bytes = 0;
            true
        } else {
            false
        }
    }

    /// Total size of all input files
    pub fn input_bytes(&self) -> u64 {
        total_file_size(&self.inputs[0]) + total_file_size(&self.inputs[1])
    }
}
