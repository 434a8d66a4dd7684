//! Version Set
//!
//! Owns the current version, the manifest writer and the counters that must
//! survive restarts (next file number, last sequence, live log number).
//!
//! ## Manifest
//! The manifest is a log of `VersionEdit` records. A new manifest starts with
//! a snapshot edit describing the whole current version; every flush or
//! compaction appends one more edit. CURRENT names the live manifest.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use crate::comparator::{Comparator, InternalKeyComparator};
use crate::config::{Options, NUM_LEVELS};
use crate::error::{Result, StrataError};
use crate::filename::{descriptor_file_name, read_current_file, set_current_file};
use crate::storage::TableCache;
use crate::types::{InternalKey, SequenceNumber};
use crate::wal::{RecordRead, WalReader, WalWriter};

use super::edit::{FileMetaData, VersionEdit};
use super::version::{total_file_size, Version};

pub struct VersionSet {
    dbname: PathBuf,
    options: Arc<Options>,
    icmp: InternalKeyComparator,
    table_cache: Arc<TableCache>,

    next_file_number: u64,
    manifest_file_number: u64,
    last_sequence: SequenceNumber,
    log_number: u64,
    /// Log being compacted when the previous instance crashed (0 if none)
    prev_log_number: u64,

    descriptor_log: Option<WalWriter>,
    current: Arc<Version>,
    /// Every version handed out; dead entries are pruned lazily
    live_versions: Vec<Weak<Version>>,

    /// Per level, where the next size compaction starts
    pub(crate) compact_pointer: [InternalKey; NUM_LEVELS],
}

impl VersionSet {
    pub fn new(
        dbname: &Path,
        options: Arc<Options>,
        icmp: InternalKeyComparator,
        table_cache: Arc<TableCache>,
    ) -> Self {
        let current = Arc::new(Version::new(
            icmp.clone(),
            Arc::clone(&table_cache),
            options.max_grandparent_overlap_bytes(),
        ));
        Self {
            dbname: dbname.to_path_buf(),
            options,
            icmp,
            table_cache,
            next_file_number: 2,
            manifest_file_number: 0,
            last_sequence: 0,
            log_number: 0,
            prev_log_number: 0,
            descriptor_log: None,
            live_versions: vec![Arc::downgrade(&current)],
            current,
            compact_pointer: Default::default(),
        }
    }

    pub fn current(&self) -> Arc<Version> {
        Arc::clone(&self.current)
    }

    pub(crate) fn options(&self) -> &Arc<Options> {
        &self.options
    }

    pub(crate) fn icmp(&self) -> &InternalKeyComparator {
        &self.icmp
    }

    pub(crate) fn table_cache(&self) -> &Arc<TableCache> {
        &self.table_cache
    }

    pub fn new_file_number(&mut self) -> u64 {
        let number = self.next_file_number;
        self.next_file_number += 1;
        number
    }

    /// Give back a number from `new_file_number` that ended up unused
    pub fn reuse_file_number(&mut self, number: u64) {
        if self.next_file_number == number + 1 {
            self.next_file_number = number;
        }
    }

    pub fn mark_file_number_used(&mut self, number: u64) {
        if self.next_file_number <= number {
            self.next_file_number = number + 1;
        }
    }

    pub fn last_sequence(&self) -> SequenceNumber {
        self.last_sequence
    }

    pub fn set_last_sequence(&mut self, sequence: SequenceNumber) {
        debug_assert!(sequence >= self.last_sequence);
        self.last_sequence = sequence;
    }

    pub fn log_number(&self) -> u64 {
        self.log_number
    }

    pub fn prev_log_number(&self) -> u64 {
        self.prev_log_number
    }

    pub fn manifest_file_number(&self) -> u64 {
        self.manifest_file_number
    }

    pub fn num_level_files(&self, level: usize) -> usize {
        self.current.num_files(level)
    }

    pub fn num_level_bytes(&self, level: usize) -> u64 {
        self.current.level_bytes(level)
    }

    /// True if the current version has a level scoring >= 1
    pub fn needs_compaction(&self) -> bool {
        self.current.compaction_score >= 1.0
    }

    /// "files[ 3 1 0 0 0 0 0 ]"
    pub fn level_summary(&self) -> String {
        let counts: Vec<String> = (0..NUM_LEVELS)
            .map(|level| self.current.num_files(level).to_string())
            .collect();
        format!("files[ {} ]", counts.join(" "))
    }

    /// Apply `edit` to the current version, persist it to the manifest and
    /// install the result as the new current version
    pub fn log_and_apply(&mut self, edit: &mut VersionEdit) -> Result<()> {
        match edit.log_number {
            Some(n) => {
                debug_assert!(n >= self.log_number && n < self.next_file_number);
            }
            None => edit.set_log_number(self.log_number),
        }
        if edit.prev_log_number.is_none() {
            edit.set_prev_log_number(self.prev_log_number);
        }
        edit.set_next_file(self.next_file_number);
        edit.set_last_sequence(self.last_sequence);

        let mut builder = VersionBuilder::new(&self.icmp, &self.current);
        builder.apply(edit, &mut self.compact_pointer);
        let mut version = builder.save_to(Version::new(
            self.icmp.clone(),
            Arc::clone(&self.table_cache),
            self.options.max_grandparent_overlap_bytes(),
        ));
        finalize(&self.options, &mut version);

        // First edit of this instance: start a fresh manifest that begins
        // with a snapshot of the current state
        let mut new_manifest = None;
        if self.descriptor_log.is_none() {
            let number = self.new_file_number();
            self.manifest_file_number = number;
            edit.set_next_file(self.next_file_number);
            let path = descriptor_file_name(&self.dbname, number);
            let result = WalWriter::create(&path).and_then(|mut writer| {
                self.write_snapshot(&mut writer)?;
                Ok(writer)
            });
            match result {
                Ok(writer) => {
                    self.descriptor_log = Some(writer);
                    new_manifest = Some(path);
                }
                Err(e) => {
                    let _ = fs::remove_file(&path);
                    return Err(e);
                }
            }
        }

        let result = (|| -> Result<()> {
            let record = edit.encode()?;
            let log = self
                .descriptor_log
                .as_mut()
                .ok_or_else(|| StrataError::Corruption("manifest writer missing".into()))?;
            log.add_record(&record)?;
            log.sync()?;
            if new_manifest.is_some() {
                set_current_file(&self.dbname, self.manifest_file_number)?;
            }
            Ok(())
        })();

        if let Err(e) = result {
            tracing::warn!(error = %e, "Manifest write failed");
            if let Some(path) = new_manifest {
                self.descriptor_log = None;
                let _ = fs::remove_file(path);
            }
            return Err(e);
        }

        if let Some(n) = edit.log_number {
            self.log_number = n;
        }
        if let Some(n) = edit.prev_log_number {
            self.prev_log_number = n;
        }
        self.append_version(version);
        Ok(())
    }

    fn write_snapshot(&self, writer: &mut WalWriter) -> Result<()> {
        let mut edit = VersionEdit::new();
        edit.set_comparator_name(self.icmp.user_comparator().name());
        for (level, key) in self.compact_pointer.iter().enumerate() {
            if !key.is_empty() {
                edit.set_compact_pointer(level, key.clone());
            }
        }
        for level in 0..NUM_LEVELS {
            for file in self.current.files(level) {
                edit.add_file(level, FileMetaData::clone(file));
            }
        }
        writer.add_record(&edit.encode()?)?;
        Ok(())
    }

    fn append_version(&mut self, version: Version) {
        let version = Arc::new(version);
        self.live_versions.retain(|v| v.strong_count() > 0);
        self.live_versions.push(Arc::downgrade(&version));
        self.current = version;
    }

    /// Rebuild state from CURRENT and the manifest it names.
    ///
    /// Returns true if a new manifest must be written (the old one is not
    /// being appended to).
    pub fn recover(&mut self) -> Result<bool> {
        let manifest_name = read_current_file(&self.dbname)?;
        let manifest_path = self.dbname.join(&manifest_name);
        let mut reader = WalReader::open(&manifest_path).map_err(|e| match e {
            StrataError::Io(io) if io.kind() == std::io::ErrorKind::NotFound => {
                StrataError::Corruption(format!("CURRENT points to a non-existent file: {}", manifest_name))
            }
            other => other,
        })?;

        let mut builder = VersionBuilder::new(&self.icmp, &self.current);
        let mut compact_pointer = self.compact_pointer.clone();
        let mut log_number = None;
        let mut prev_log_number = None;
        let mut next_file = None;
        let mut last_sequence = None;
        let mut edits = 0usize;

        loop {
            let record = match reader.read_record()? {
                RecordRead::Record(r) => r,
                RecordRead::Eof => break,
                RecordRead::Truncated => {
                    tracing::warn!(manifest = %manifest_name, "Manifest ends with a partial record");
                    break;
                }
                RecordRead::Corrupted { length } => {
                    return Err(StrataError::Corruption(format!(
                        "checksum mismatch in manifest record of {} bytes",
                        length
                    )));
                }
                RecordRead::Damaged { skipped } => {
                    return Err(StrataError::Corruption(format!(
                        "bad record length in manifest, {} bytes unreadable",
                        skipped
                    )));
                }
            };
            let edit = VersionEdit::decode(&record)?;
            if let Some(name) = &edit.comparator {
                let expected = self.icmp.user_comparator().name();
                if name != expected {
                    return Err(StrataError::InvalidArgument(format!(
                        "{} does not match existing comparator {}",
                        expected, name
                    )));
                }
            }

            builder.apply(&edit, &mut compact_pointer);
            edits += 1;

            log_number = edit.log_number.or(log_number);
            prev_log_number = edit.prev_log_number.or(prev_log_number);
            next_file = edit.next_file_number.or(next_file);
            last_sequence = edit.last_sequence.or(last_sequence);
        }

        let next_file = next_file
            .ok_or_else(|| StrataError::Corruption("no meta-nextfile entry in descriptor".into()))?;
        let log_number = log_number
            .ok_or_else(|| StrataError::Corruption("no meta-lognumber entry in descriptor".into()))?;
        let last_sequence = last_sequence
            .ok_or_else(|| StrataError::Corruption("no last-sequence-number entry in descriptor".into()))?;
        let prev_log_number = prev_log_number.unwrap_or(0);

        let mut version = builder.save_to(Version::new(
            self.icmp.clone(),
            Arc::clone(&self.table_cache),
            self.options.max_grandparent_overlap_bytes(),
        ));
        finalize(&self.options, &mut version);

        self.compact_pointer = compact_pointer;
        self.append_version(version);
        self.manifest_file_number = next_file;
        self.next_file_number = next_file + 1;
        self.mark_file_number_used(prev_log_number);
        self.mark_file_number_used(log_number);
        self.last_sequence = last_sequence;
        self.log_number = log_number;
        self.prev_log_number = prev_log_number;

        tracing::debug!(manifest = %manifest_name, edits, "Recovered manifest");

        if self.reuse_manifest(&manifest_path, &manifest_name) {
            return Ok(false);
        }
        Ok(true)
    }

    /// Keep appending to the recovered manifest when allowed and small
    fn reuse_manifest(&mut self, path: &Path, name: &str) -> bool {
        if !self.options.reuse_logs {
            return false;
        }
        let Some(number) = name
            .strip_prefix("MANIFEST-")
            .and_then(|n| n.parse::<u64>().ok())
        else {
            return false;
        };
        let Ok(meta) = fs::metadata(path) else {
            return false;
        };
        if meta.len() >= self.options.max_file_size {
            return false;
        }
        match WalWriter::open_append(path) {
            Ok(writer) => {
                tracing::debug!(manifest = %name, "Reusing manifest");
                self.descriptor_log = Some(writer);
                self.manifest_file_number = number;
                true
            }
            Err(e) => {
                tracing::warn!(manifest = %name, error = %e, "Cannot reuse manifest");
                false
            }
        }
    }

    /// Numbers of all table files referenced by any live version
    pub fn add_live_files(&mut self, live: &mut HashSet<u64>) {
        self.live_versions.retain(|v| v.strong_count() > 0);
        for version in self.live_versions.iter().filter_map(Weak::upgrade) {
            for level in 0..NUM_LEVELS {
                for file in version.files(level) {
                    live.insert(file.number);
                }
            }
        }
    }

    /// Number of versions still referenced somewhere
    pub fn live_version_count(&self) -> usize {
        self.live_versions.iter().filter(|v| v.strong_count() > 0).count()
    }
}

/// Compute the level most in need of compaction
fn finalize(options: &Options, version: &mut Version) {
    let mut best_level = 0;
    let mut best_score = -1.0;
    for level in 0..NUM_LEVELS - 1 {
        let score = if level == 0 {
            // Level 0 is bounded by file count: every file may need to be
            // read on each lookup
            version.num_files(0) as f64 / options.level0_compaction_trigger as f64
        } else {
            total_file_size(version.files(level)) as f64 / options.max_bytes_for_level(level)
        };
        if score > best_score {
            best_level = level;
            best_score = score;
        }
    }
    version.compaction_level = best_level;
    version.compaction_score = best_score;
}

// =============================================================================
// Builder
// =============================================================================

/// Accumulates edits on top of a base version
struct VersionBuilder<'a> {
    icmp: &'a InternalKeyComparator,
    base: &'a Version,
    levels: Vec<LevelState>,
}

#[derive(Default)]
struct LevelState {
    deleted: HashSet<u64>,
    added: BTreeMap<u64, Arc<FileMetaData>>,
}

impl<'a> VersionBuilder<'a> {
    fn new(icmp: &'a InternalKeyComparator, base: &'a Version) -> Self {
        Self {
            icmp,
            base,
            levels: (0..NUM_LEVELS).map(|_| LevelState::default()).collect(),
        }
    }

    fn apply(&mut self, edit: &VersionEdit, compact_pointer: &mut [InternalKey; NUM_LEVELS]) {
        for (level, key) in &edit.compact_pointers {
            if *level < NUM_LEVELS {
                compact_pointer[*level] = key.clone();
            }
        }
        for &(level, number) in &edit.deleted_files {
            if level < NUM_LEVELS {
                self.levels[level].deleted.insert(number);
                self.levels[level].added.remove(&number);
            }
        }
        for (level, file) in &edit.new_files {
            if *level < NUM_LEVELS {
                self.levels[*level].deleted.remove(&file.number);
                self.levels[*level]
                    .added
                    .insert(file.number, Arc::new(file.clone()));
            }
        }
    }

    fn save_to(self, mut version: Version) -> Version {
        for level in 0..NUM_LEVELS {
            let state = &self.levels[level];
            let mut files: Vec<Arc<FileMetaData>> = self
                .base
                .files(level)
                .iter()
                .chain(state.added.values())
                .filter(|f| !state.deleted.contains(&f.number))
                .cloned()
                .collect();

            if level == 0 {
                files.sort_by_key(|f| f.number);
            } else {
                let icmp = self.icmp;
                files.sort_by(|a, b| match icmp.compare(a.smallest.encode(), b.smallest.encode()) {
                    Ordering::Equal => a.number.cmp(&b.number),
                    other => other,
                });
                debug_assert!(files.windows(2).all(|w| {
                    icmp.compare(w[0].largest.encode(), w[1].smallest.encode()) == Ordering::Less
                }));
            }
            version.files[level] = files;
        }
        version
    }
}
