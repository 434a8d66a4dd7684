//! Version
//!
//! An immutable view of which table files make up each level. Level-0 files
//! may overlap and are ordered by file number; files of every other level
//! are disjoint and sorted by smallest key.

use std::cmp::Ordering;
use std::fmt::Write as _;
use std::sync::Arc;

use bytes::BufMut;

use crate::comparator::{Comparator, InternalKeyComparator};
use crate::config::NUM_LEVELS;
use crate::error::{Result, StrataError};
use crate::iterator::{InternalIterator, TwoLevelIterator};
use crate::memtable::MemTableEntry;
use crate::storage::sstable::BlockReadOptions;
use crate::storage::TableCache;
use crate::types::{
    parse_internal_key, InternalKey, LookupKey, ValueType, MAX_SEQUENCE_NUMBER,
    VALUE_TYPE_FOR_SEEK,
};

use super::edit::FileMetaData;

/// Memtable output may be pushed down to this level when it overlaps nothing
pub(crate) const MAX_MEM_COMPACT_LEVEL: usize = 2;

pub struct Version {
    pub(crate) files: [Vec<Arc<FileMetaData>>; NUM_LEVELS],
    pub(crate) icmp: InternalKeyComparator,
    pub(crate) table_cache: Arc<TableCache>,
    /// Level most in need of compaction and its score (>= 1 means needed)
    pub(crate) compaction_level: usize,
    pub(crate) compaction_score: f64,
    /// Bytes of grandparent overlap a flush may push down past
    pub(crate) max_grandparent_overlap_bytes: u64,
}

impl Version {
    pub(crate) fn new(
        icmp: InternalKeyComparator,
        table_cache: Arc<TableCache>,
        max_grandparent_overlap_bytes: u64,
    ) -> Self {
        Self {
            files: Default::default(),
            icmp,
            table_cache,
            compaction_level: 0,
            compaction_score: -1.0,
            max_grandparent_overlap_bytes,
        }
    }

    pub fn num_files(&self, level: usize) -> usize {
        self.files[level].len()
    }

    pub fn files(&self, level: usize) -> &[Arc<FileMetaData>] {
        &self.files[level]
    }

    pub fn level_bytes(&self, level: usize) -> u64 {
        total_file_size(&self.files[level])
    }

    /// Look up `key` in the table files.
    ///
    /// Level 0 is searched newest file first; each deeper level holds at
    /// most one candidate file. The first version found wins.
    pub fn get(&self, opts: &BlockReadOptions, key: &LookupKey) -> Result<Option<MemTableEntry>> {
        let ucmp = self.icmp.user_comparator();
        let user_key = key.user_key();

        let mut level0: Vec<&Arc<FileMetaData>> = self.files[0]
            .iter()
            .filter(|f| {
                ucmp.compare(user_key, f.smallest.user_key()) != Ordering::Less
                    && ucmp.compare(user_key, f.largest.user_key()) != Ordering::Greater
            })
            .collect();
        level0.sort_by(|a, b| b.number.cmp(&a.number));

        for file in level0 {
            if let Some(entry) = self.search_file(opts, file, key)? {
                return Ok(Some(entry));
            }
        }

        for level in 1..NUM_LEVELS {
            let files = &self.files[level];
            let index = find_file(&self.icmp, files, key.internal_key());
            let Some(file) = files.get(index) else {
                continue;
            };
            if ucmp.compare(user_key, file.smallest.user_key()) == Ordering::Less {
                continue;
            }
            if let Some(entry) = self.search_file(opts, file, key)? {
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }

    fn search_file(
        &self,
        opts: &BlockReadOptions,
        file: &FileMetaData,
        key: &LookupKey,
    ) -> Result<Option<MemTableEntry>> {
        let Some((found_key, value)) =
            self.table_cache
                .get(opts, key.internal_key(), file.number, file.file_size)?
        else {
            return Ok(None);
        };
        let parsed = parse_internal_key(&found_key).ok_or_else(|| {
            StrataError::Corruption(format!("corrupted key in table {}", file.number))
        })?;
        if self
            .icmp
            .user_comparator()
            .compare(parsed.user_key, key.user_key())
            != Ordering::Equal
        {
            return Ok(None);
        }
        Ok(Some(match parsed.value_type {
            ValueType::Value => MemTableEntry::Value(value),
            ValueType::Deletion => MemTableEntry::Tombstone,
        }))
    }

    /// True if some file in `level` overlaps the user key range
    /// `[smallest, largest]`; `None` bounds are unbounded
    pub fn overlap_in_level(&self, level: usize, smallest: Option<&[u8]>, largest: Option<&[u8]>) -> bool {
        some_file_overlaps_range(&self.icmp, level > 0, &self.files[level], smallest, largest)
    }

    /// Level a freshly flushed memtable covering `[smallest, largest]` should
    /// be placed at
    pub fn pick_level_for_memtable_output(&self, smallest: &[u8], largest: &[u8]) -> usize {
        let mut level = 0;
        if self.overlap_in_level(0, Some(smallest), Some(largest)) {
            return level;
        }

        // Push to the next level while it does not overlap and the level
        // after it does not overlap too many bytes
        let start = InternalKey::new(smallest, MAX_SEQUENCE_NUMBER, VALUE_TYPE_FOR_SEEK);
        let limit = InternalKey::new(largest, 0, ValueType::Deletion);
        while level < MAX_MEM_COMPACT_LEVEL {
            if self.overlap_in_level(level + 1, Some(smallest), Some(largest)) {
                break;
            }
            if level + 2 < NUM_LEVELS {
                let overlaps = self.get_overlapping_inputs(level + 2, Some(&start), Some(&limit));
                if total_file_size(&overlaps) > self.max_grandparent_overlap_bytes {
                    break;
                }
            }
            level += 1;
        }
        level
    }

    /// Files in `level` overlapping `[begin, end]` (user-key comparison).
    ///
    /// For level 0 the range is widened to the union of all overlapping
    /// files, since those may overlap each other.
    pub fn get_overlapping_inputs(
        &self,
        level: usize,
        begin: Option<&InternalKey>,
        end: Option<&InternalKey>,
    ) -> Vec<Arc<FileMetaData>> {
        let ucmp = self.icmp.user_comparator();
        let mut user_begin = begin.map(|k| k.user_key().to_vec());
        let mut user_end = end.map(|k| k.user_key().to_vec());

        let mut inputs = Vec::new();
        let mut i = 0;
        while i < self.files[level].len() {
            let file = &self.files[level][i];
            i += 1;
            let file_start = file.smallest.user_key();
            let file_limit = file.largest.user_key();

            let before = user_begin
                .as_deref()
                .is_some_and(|b| ucmp.compare(file_limit, b) == Ordering::Less);
            let after = user_end
                .as_deref()
                .is_some_and(|e| ucmp.compare(file_start, e) == Ordering::Greater);
            if before || after {
                continue;
            }

            inputs.push(Arc::clone(file));
            if level == 0 {
                // Restart the search if this file widens the range
                let widens_begin = user_begin
                    .as_deref()
                    .is_some_and(|b| ucmp.compare(file_start, b) == Ordering::Less);
                let widens_end = user_end
                    .as_deref()
                    .is_some_and(|e| ucmp.compare(file_limit, e) == Ordering::Greater);
                if widens_begin {
                    user_begin = Some(file_start.to_vec());
                }
                if widens_end {
                    user_end = Some(file_limit.to_vec());
                }
                if widens_begin || widens_end {
                    inputs.clear();
                    i = 0;
                }
            }
        }
        inputs
    }

    /// Push one iterator per level-0 file and one concatenating iterator per
    /// deeper non-empty level
    pub fn add_iterators(&self, opts: BlockReadOptions, iters: &mut Vec<Box<dyn InternalIterator>>) -> Result<()> {
        for file in &self.files[0] {
            let iter = self.table_cache.iter(opts, file.number, file.file_size)?;
            iters.push(Box::new(iter));
        }
        for level in 1..NUM_LEVELS {
            if !self.files[level].is_empty() {
                iters.push(Box::new(self.concatenating_iterator(opts, level)));
            }
        }
        Ok(())
    }

    /// Lazily opens each file of a sorted level as the cursor reaches it
    pub(crate) fn concatenating_iterator(&self, opts: BlockReadOptions, level: usize) -> TwoLevelIterator {
        new_level_iterator(
            self.icmp.clone(),
            self.files[level].clone(),
            Arc::clone(&self.table_cache),
            opts,
        )
    }

    /// Approximate byte offset of `key` in the whole database
    pub fn approximate_offset_of(&self, key: &InternalKey) -> u64 {
        let mut result = 0;
        for (level, files) in self.files.iter().enumerate() {
            for file in files {
                if self.icmp.compare(file.largest.encode(), key.encode()) != Ordering::Greater {
                    // Entire file is before key
                    result += file.file_size;
                } else if self.icmp.compare(file.smallest.encode(), key.encode()) == Ordering::Greater {
                    // Entire file is after key; sorted levels have nothing more
                    if level > 0 {
                        break;
                    }
                } else {
                    result += self.table_cache.approximate_offset_of(
                        key.encode(),
                        file.number,
                        file.file_size,
                    );
                }
            }
        }
        result
    }

    /// One line per level listing `number:size[smallest .. largest]`
    pub fn debug_string(&self) -> String {
        let mut out = String::new();
        for (level, files) in self.files.iter().enumerate() {
            let _ = writeln!(out, "--- level {} ---", level);
            for f in files {
                let _ = writeln!(
                    out,
                    " {}:{}[{} .. {}]",
                    f.number,
                    f.file_size,
                    String::from_utf8_lossy(f.smallest.user_key()),
                    String::from_utf8_lossy(f.largest.user_key()),
                );
            }
        }
        out
    }
}

pub(crate) fn total_file_size(files: &[Arc<FileMetaData>]) -> u64 {
    files.iter().map(|f| f.file_size).sum()
}

/// Index of the first file whose largest key is >= `key`, or `files.len()`
pub(crate) fn find_file(icmp: &InternalKeyComparator, files: &[Arc<FileMetaData>], key: &[u8]) -> usize {
    files.partition_point(|f| icmp.compare(f.largest.encode(), key) == Ordering::Less)
}

fn some_file_overlaps_range(
    icmp: &InternalKeyComparator,
    disjoint_sorted_files: bool,
    files: &[Arc<FileMetaData>],
    smallest: Option<&[u8]>,
    largest: Option<&[u8]>,
) -> bool {
    let ucmp = icmp.user_comparator();
    let after_file = |key: Option<&[u8]>, f: &FileMetaData| {
        key.is_some_and(|k| ucmp.compare(k, f.largest.user_key()) == Ordering::Greater)
    };
    let before_file = |key: Option<&[u8]>, f: &FileMetaData| {
        key.is_some_and(|k| ucmp.compare(k, f.smallest.user_key()) == Ordering::Less)
    };

    if !disjoint_sorted_files {
        return files
            .iter()
            .any(|f| !after_file(smallest, f) && !before_file(largest, f));
    }

    let index = match smallest {
        Some(s) => {
            let key = InternalKey::new(s, MAX_SEQUENCE_NUMBER, VALUE_TYPE_FOR_SEEK);
            find_file(icmp, files, key.encode())
        }
        None => 0,
    };
    match files.get(index) {
        Some(f) => !before_file(largest, f),
        None => false,
    }
}

// =============================================================================
// Level iteration
// =============================================================================

/// Cursor over the files of a sorted level.
///
/// Key: the file's largest internal key. Value: file number and size as two
/// little-endian u64s.
pub(crate) struct LevelFileNumIterator {
    icmp: InternalKeyComparator,
    files: Vec<Arc<FileMetaData>>,
    /// `files.len()` when invalid
    index: usize,
    value: [u8; 16],
}

impl LevelFileNumIterator {
    pub(crate) fn new(icmp: InternalKeyComparator, files: Vec<Arc<FileMetaData>>) -> Self {
        let index = files.len();
        Self {
            icmp,
            files,
            index,
            value: [0; 16],
        }
    }

    fn fill_value(&mut self) {
        if let Some(f) = self.files.get(self.index) {
            let mut buf = Vec::with_capacity(16);
            buf.put_u64_le(f.number);
            buf.put_u64_le(f.file_size);
            self.value.copy_from_slice(&buf);
        }
    }
}

impl InternalIterator for LevelFileNumIterator {
    fn valid(&self) -> bool {
        self.index < self.files.len()
    }

    fn seek_to_first(&mut self) -> Result<()> {
        self.index = 0;
        self.fill_value();
        Ok(())
    }

    fn seek_to_last(&mut self) -> Result<()> {
        self.index = if self.files.is_empty() { 0 } else { self.files.len() - 1 };
        self.fill_value();
        Ok(())
    }

    fn seek(&mut self, target: &[u8]) -> Result<()> {
        self.index = find_file(&self.icmp, &self.files, target);
        self.fill_value();
        Ok(())
    }

    fn next(&mut self) -> Result<()> {
        self.index += 1;
        self.fill_value();
        Ok(())
    }

    fn prev(&mut self) -> Result<()> {
        self.index = if self.index == 0 { self.files.len() } else { self.index - 1 };
        self.fill_value();
        Ok(())
    }

    fn key(&self) -> &[u8] {
        match self.files.get(self.index) {
            Some(f) => f.largest.encode(),
            None => &[],
        }
    }

    fn value(&self) -> &[u8] {
        &self.value
    }
}

/// Two-level iterator over a sorted run of table files
pub(crate) fn new_level_iterator(
    icmp: InternalKeyComparator,
    files: Vec<Arc<FileMetaData>>,
    table_cache: Arc<TableCache>,
    opts: BlockReadOptions,
) -> TwoLevelIterator {
    TwoLevelIterator::new(
        Box::new(LevelFileNumIterator::new(icmp, files)),
        Box::new(move |value: &[u8]| {
            if value.len() != 16 {
                return Err(StrataError::Corruption(
                    "file reader invoked with unexpected value".into(),
                ));
            }
            let number = crate::coding::decode_fixed64(&value[..8]);
            let size = crate::coding::decode_fixed64(&value[8..]);
            let iter = table_cache.iter(opts, number, size)?;
            Ok(Box::new(iter) as Box<dyn InternalIterator>)
        }),
    )
}
