//! Compaction job
//!
//! Merges the inputs of a [`Compaction`] and writes the surviving entries to
//! new tables one level down. Also builds level-0 tables from memtables.
//!
//! ## Drop Rules
//! For each user key, versions arrive newest first. A version is dropped if
//! - a newer version of the same key is already visible to the oldest
//!   snapshot (it is shadowed for every reader), or
//! - it is a deletion visible to the oldest snapshot and no deeper level
//!   holds the key (nothing is left for it to hide).

use std::cmp::Ordering;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use crate::comparator::Comparator;
use crate::error::{Result, StrataError};
use crate::filename::table_file_name;
use crate::iterator::InternalIterator;
use crate::storage::sstable::BlockReadOptions;
use crate::storage::{SSTableBuilder, TableCache, TableOptions};
use crate::types::{parse_internal_key, InternalKey, SequenceNumber, ValueType, MAX_SEQUENCE_NUMBER};
use crate::version::FileMetaData;

use super::{Compaction, CompactionStats};

/// Services a running compaction needs from the database
pub(crate) trait CompactionEnv {
    /// Allocate a number for an output table and protect it from deletion
    fn new_output_number(&self) -> u64;

    fn is_shutting_down(&self) -> bool;

    /// Give a waiting immutable memtable priority over the compaction
    fn flush_pending_memtable(&self) -> Result<()>;
}

/// Outputs and statistics of a finished compaction
#[derive(Debug, Default)]
pub(crate) struct CompactionOutcome {
    pub outputs: Vec<FileMetaData>,
    pub stats: CompactionStats,
    pub entries_dropped: u64,
}

struct OpenOutput {
    number: u64,
    builder: SSTableBuilder,
    smallest: Vec<u8>,
    largest: Vec<u8>,
}

pub(crate) struct CompactionJob {
    dbname: PathBuf,
    table_options: TableOptions,
    table_cache: Arc<TableCache>,
    /// Entries visible to this sequence must be kept
    smallest_snapshot: SequenceNumber,
    current: Option<OpenOutput>,
    outcome: CompactionOutcome,
}

impl CompactionJob {
    pub(crate) fn new(
        dbname: &Path,
        table_options: TableOptions,
        table_cache: Arc<TableCache>,
        smallest_snapshot: SequenceNumber,
    ) -> Self {
        Self {
            dbname: dbname.to_path_buf(),
            table_options,
            table_cache,
            smallest_snapshot,
            current: None,
            outcome: CompactionOutcome::default(),
        }
    }

    /// Merge `input` (an iterator over all compaction inputs) into new tables
    pub(crate) fn run(
        mut self,
        env: &dyn CompactionEnv,
        compaction: &mut Compaction,
        input: Box<dyn InternalIterator>,
    ) -> Result<CompactionOutcome> {
        let start = Instant::now();
        let result = self.merge(env, compaction, input);
        if let Err(e) = result {
            if let Some(output) = self.current.take() {
                let _ = output.builder.abandon();
            }
            return Err(e);
        }

        self.outcome.stats.micros = start.elapsed().as_micros() as u64;
        self.outcome.stats.bytes_read = compaction.input_bytes();
        self.outcome.stats.bytes_written = self.outcome.outputs.iter().map(|f| f.file_size).sum();
        Ok(self.outcome)
    }

    fn merge(
        &mut self,
        env: &dyn CompactionEnv,
        compaction: &mut Compaction,
        mut input: Box<dyn InternalIterator>,
    ) -> Result<()> {
        let ucmp = Arc::clone(compaction.input_version.icmp.user_comparator());
        let mut current_user_key: Option<Vec<u8>> = None;
        let mut last_sequence_for_key = MAX_SEQUENCE_NUMBER;

        input.seek_to_first()?;
        while input.valid() {
            if env.is_shutting_down() {
                return Err(StrataError::ShuttingDown);
            }
            env.flush_pending_memtable()?;

            let key = input.key();
            if compaction.should_stop_before(key) && self.current.is_some() {
                self.finish_output()?;
            }

            let mut drop = false;
            match parse_internal_key(key) {
                None => {
                    // Keep corrupted keys rather than hide them
                    current_user_key = None;
                    last_sequence_for_key = MAX_SEQUENCE_NUMBER;
                }
                Some(parsed) => {
                    let first_occurrence = current_user_key
                        .as_deref()
                        .map_or(true, |k| ucmp.compare(parsed.user_key, k) != Ordering::Equal);
                    if first_occurrence {
                        current_user_key = Some(parsed.user_key.to_vec());
                        last_sequence_for_key = MAX_SEQUENCE_NUMBER;
                    }

                    if last_sequence_for_key <= self.smallest_snapshot {
                        // Shadowed by a newer entry for the same key
                        drop = true;
                    } else if parsed.value_type == ValueType::Deletion
                        && parsed.sequence <= self.smallest_snapshot
                        && compaction.is_base_level_for_key(parsed.user_key)
                    {
                        drop = true;
                    }
                    last_sequence_for_key = parsed.sequence;
                }
            }

            if drop {
                self.outcome.entries_dropped += 1;
            } else {
                if self.current.is_none() {
                    self.open_output(env)?;
                }
                let value = input.value();
                if let Some(output) = self.current.as_mut() {
                    if output.builder.num_entries() == 0 {
                        output.smallest = key.to_vec();
                    }
                    output.largest.clear();
                    output.largest.extend_from_slice(key);
                    output.builder.add(key, value)?;
                    if output.builder.file_size() >= compaction.max_output_file_size() {
                        self.finish_output()?;
                    }
                }
            }

            input.next()?;
        }

        if self.current.is_some() {
            self.finish_output()?;
        }
        Ok(())
    }

    fn open_output(&mut self, env: &dyn CompactionEnv) -> Result<()> {
        let number = env.new_output_number();
        let path = table_file_name(&self.dbname, number);
        let builder = SSTableBuilder::new(&path, self.table_options.clone())?;
        self.current = Some(OpenOutput {
            number,
            builder,
            smallest: Vec::new(),
            largest: Vec::new(),
        });
        Ok(())
    }

    fn finish_output(&mut self) -> Result<()> {
        let Some(output) = self.current.take() else {
            return Ok(());
        };
        let entries = output.builder.num_entries();
        let table = output.builder.finish()?;

        if entries > 0 {
            // Make sure the table is usable before it is installed
            let mut iter = self.table_cache.iter(BlockReadOptions::default(), output.number, table.file_size)?;
            iter.seek_to_first()?;
            tracing::debug!(
                file_number = output.number,
                entries,
                bytes = table.file_size,
                "Generated compaction output"
            );
        }

        self.outcome.outputs.push(FileMetaData::new(
            output.number,
            table.file_size,
            InternalKey::decode_from(&output.smallest),
            InternalKey::decode_from(&output.largest),
        ));
        Ok(())
    }
}

/// Write the contents of `iter` to table `number`.
///
/// Returns `None` (and leaves no file behind) if the iterator is empty.
pub(crate) fn build_table(
    dbname: &Path,
    table_options: &TableOptions,
    table_cache: &TableCache,
    mut iter: Box<dyn InternalIterator>,
    number: u64,
) -> Result<Option<FileMetaData>> {
    let path = table_file_name(dbname, number);
    iter.seek_to_first()?;
    if !iter.valid() {
        return Ok(None);
    }

    let result = (|| -> Result<FileMetaData> {
        let mut builder = SSTableBuilder::new(&path, table_options.clone())?;
        let smallest = InternalKey::decode_from(iter.key());
        let mut largest = Vec::new();
        while iter.valid() {
            largest.clear();
            largest.extend_from_slice(iter.key());
            builder.add(iter.key(), iter.value())?;
            iter.next()?;
        }
        let table = builder.finish()?;

        // Verify that the table is usable
        let mut check = table_cache.iter(BlockReadOptions::default(), number, table.file_size)?;
        check.seek_to_first()?;

        Ok(FileMetaData::new(
            number,
            table.file_size,
            smallest,
            InternalKey::decode_from(&largest),
        ))
    })();

    match result {
        Ok(meta) => Ok(Some(meta)),
        Err(e) => {
            let _ = fs::remove_file(&path);
            Err(e)
        }
    }
}
