//! Destroy and repair
//!
//! Standalone entry points that operate on a closed database directory.
//!
//! ## Repair
//! Rebuilds a usable database from whatever table and log files survive:
//! 1. Convert every WAL file into a level-0 table
//! 2. Scan every table for its key range and largest sequence number
//! 3. Write a fresh manifest placing all tables at level 0
//!
//! Unreadable files and the old manifests are moved to `lost/`. Some data
//! may be lost, and deleted keys may reappear if the table holding their
//! tombstone is lost.

use std::cmp::Ordering;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::cache::BlockCache;
use crate::comparator::{Comparator, InternalKeyComparator};
use crate::compaction::build_table;
use crate::config::Options;
use crate::engine::DbLock;
use crate::error::{Result, StrataError};
use crate::filename::{
    descriptor_file_name, lock_file_name, log_file_name, parse_file_name, set_current_file,
    sst_table_file_name, table_file_name, FileType,
};
use crate::iterator::InternalIterator;
use crate::memtable::MemTable;
use crate::storage::sstable::BlockReadOptions;
use crate::storage::{TableCache, TableOptions};
use crate::types::{parse_internal_key, InternalKey, SequenceNumber};
use crate::version::{FileMetaData, VersionEdit};
use crate::wal::{WalRecovery, WalWriter};

/// Tables opened at once while scanning
const REPAIR_TABLE_CACHE_ENTRIES: usize = 10;

/// Delete every database file in `path`, then the directory itself if empty
///
/// A missing directory is not an error. Fails if another instance holds
/// the database open.
pub fn destroy_db(path: impl AsRef<Path>, options: &Options) -> Result<()> {
    let dbname = path.as_ref();
    let entries = match fs::read_dir(dbname) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };

    let lock_path = lock_file_name(dbname);
    let lock = DbLock::acquire(&lock_path)?;
    let mut result = Ok(());
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some((file_type, _)) = name.to_str().and_then(parse_file_name) else {
            continue;
        };
        if file_type == FileType::DbLock {
            continue;
        }
        if let Err(e) = fs::remove_file(entry.path()) {
            if result.is_ok() {
                result = Err(e.into());
            }
        }
    }

    drop(lock);
    let _ = fs::remove_file(&lock_path);
    // Fails harmlessly if unrelated files remain
    let _ = fs::remove_dir(dbname);
    options.log(format!("Destroyed {}", dbname.display()));
    result
}

/// Rebuild the manifest of the database in `path` from its surviving files
pub fn repair_db(path: impl AsRef<Path>, options: &Options) -> Result<()> {
    let dbname = path.as_ref();
    let _lock = DbLock::acquire(&lock_file_name(dbname))?;
    let mut repairer = Repairer::new(dbname, options);
    repairer.run()
}

struct TableInfo {
    meta: FileMetaData,
    max_sequence: SequenceNumber,
}

struct Repairer<'a> {
    dbname: PathBuf,
    options: &'a Options,
    icmp: InternalKeyComparator,
    table_options: TableOptions,
    table_cache: Arc<TableCache>,

    manifests: Vec<String>,
    table_numbers: Vec<u64>,
    logs: Vec<u64>,
    tables: Vec<TableInfo>,
    next_file_number: u64,
}

impl<'a> Repairer<'a> {
    fn new(dbname: &Path, options: &'a Options) -> Self {
        let icmp = InternalKeyComparator::new(Arc::clone(&options.comparator));
        let table_options = TableOptions::for_database(options, &icmp);
        let block_cache = Arc::new(BlockCache::new(options.block_cache_capacity));
        let table_cache = Arc::new(TableCache::new(
            dbname,
            table_options.clone(),
            block_cache,
            REPAIR_TABLE_CACHE_ENTRIES,
        ));
        Self {
            dbname: dbname.to_path_buf(),
            options,
            icmp,
            table_options,
            table_cache,
            manifests: Vec::new(),
            table_numbers: Vec::new(),
            logs: Vec::new(),
            tables: Vec::new(),
            next_file_number: 1,
        }
    }

    fn run(&mut self) -> Result<()> {
        self.find_files()?;
        self.convert_logs_to_tables();
        self.extract_metadata();
        self.write_descriptor()?;

        let bytes: u64 = self.tables.iter().map(|t| t.meta.file_size).sum();
        self.options.log(format!(
            "**** Repaired database {}; recovered {} files; {} bytes. \
             Some data may have been lost. ****",
            self.dbname.display(),
            self.tables.len(),
            bytes
        ));
        Ok(())
    }

    fn find_files(&mut self) -> Result<()> {
        let entries = fs::read_dir(&self.dbname)?;
        let mut found_any = false;
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            let Some((file_type, number)) = parse_file_name(name) else {
                continue;
            };
            if file_type != FileType::DbLock {
                found_any = true;
            }
            match file_type {
                FileType::Descriptor => self.manifests.push(name.to_string()),
                FileType::Log => self.logs.push(number),
                FileType::Table => self.table_numbers.push(number),
                _ => {}
            }
            if number + 1 > self.next_file_number {
                self.next_file_number = number + 1;
            }
        }
        if !found_any {
            return Err(StrataError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("repair found no files in {}", self.dbname.display()),
            )));
        }
        self.logs.sort_unstable();
        Ok(())
    }

    fn new_file_number(&mut self) -> u64 {
        let number = self.next_file_number;
        self.next_file_number += 1;
        number
    }

    fn convert_logs_to_tables(&mut self) {
        for number in std::mem::take(&mut self.logs) {
            if let Err(e) = self.convert_log_to_table(number) {
                self.options.log(format!("Log #{}: ignoring conversion error: {}", number, e));
            }
            self.archive_file(&log_file_name(&self.dbname, number));
        }
    }

    fn convert_log_to_table(&mut self, log_number: u64) -> Result<()> {
        let path = log_file_name(&self.dbname, log_number);
        let (entries, recovery) = WalRecovery::recover(&path, false)?;

        let mem = Arc::new(MemTable::new(self.icmp.clone()));
        for entry in entries {
            let base = entry.sequence;
            entry.into_batch().insert_into(base, &mem)?;
        }

        // Produce a table even if the log had errors; whatever was
        // readable is worth keeping
        let number = self.new_file_number();
        let iter: Box<dyn InternalIterator> = Box::new(mem.iter());
        let meta = build_table(&self.dbname, &self.table_options, &self.table_cache, iter, number)?;
        self.options.log(format!(
            "Log #{}: {} ops saved to Table #{} ({} records dropped)",
            log_number,
            mem.entry_count(),
            number,
            recovery.entries_corrupted
        ));
        if meta.is_some() {
            self.table_numbers.push(number);
        }
        Ok(())
    }

    fn extract_metadata(&mut self) {
        for number in std::mem::take(&mut self.table_numbers) {
            match self.scan_table(number) {
                Ok(Some(info)) => self.tables.push(info),
                Ok(None) => {
                    self.options.log(format!("Table #{}: empty, archived", number));
                    self.archive_table(number);
                }
                Err(e) => {
                    self.options.log(format!("Table #{}: ignoring {}", number, e));
                    self.archive_table(number);
                }
            }
        }
    }

    /// Key range and largest sequence number of a table, or `None` if empty
    fn scan_table(&self, number: u64) -> Result<Option<TableInfo>> {
        let file_size = match fs::metadata(table_file_name(&self.dbname, number)) {
            Ok(meta) => meta.len(),
            Err(_) => fs::metadata(sst_table_file_name(&self.dbname, number))?.len(),
        };

        let opts = BlockReadOptions {
            verify_checksums: self.options.paranoid_checks,
            fill_cache: false,
        };
        let mut iter = self.table_cache.iter(opts, number, file_size)?;
        iter.seek_to_first()?;

        let mut smallest: Option<InternalKey> = None;
        let mut largest = InternalKey::default();
        let mut max_sequence = 0;
        let mut counter = 0u64;
        while iter.valid() {
            let key = iter.key();
            match parse_internal_key(key) {
                Some(parsed) => {
                    counter += 1;
                    if smallest.is_none() {
                        smallest = Some(InternalKey::decode_from(key));
                    }
                    largest = InternalKey::decode_from(key);
                    max_sequence = max_sequence.max(parsed.sequence);
                }
                None => {
                    self.options.log(format!(
                        "Table #{}: unparsable key {:?}",
                        number,
                        String::from_utf8_lossy(key)
                    ));
                }
            }
            iter.next()?;
        }
        self.options.log(format!("Table #{}: {} entries", number, counter));

        Ok(smallest.map(|smallest| TableInfo {
            meta: FileMetaData::new(number, file_size, smallest, largest),
            max_sequence,
        }))
    }

    fn write_descriptor(&mut self) -> Result<()> {
        let max_sequence = self.tables.iter().map(|t| t.max_sequence).max().unwrap_or(0);
        self.tables.sort_by(|a, b| {
            match self.icmp.compare(a.meta.smallest.encode(), b.meta.smallest.encode()) {
                Ordering::Equal => a.meta.number.cmp(&b.meta.number),
                other => other,
            }
        });

        let manifest_number = self.new_file_number();
        let mut edit = VersionEdit::new();
        edit.set_comparator_name(self.icmp.user_comparator().name());
        edit.set_log_number(0);
        edit.set_next_file(self.next_file_number);
        edit.set_last_sequence(max_sequence);
        for table in &self.tables {
            // All tables at level 0; the next compaction sorts them out
            edit.add_file(0, table.meta.clone());
        }

        let manifest = descriptor_file_name(&self.dbname, manifest_number);
        let result = (|| -> Result<()> {
            let mut writer = WalWriter::create(&manifest)?;
            writer.add_record(&edit.encode()?)?;
            writer.sync()?;
            Ok(())
        })();
        if let Err(e) = result {
            let _ = fs::remove_file(&manifest);
            return Err(e);
        }

        for name in std::mem::take(&mut self.manifests) {
            self.archive_file(&self.dbname.join(name));
        }
        set_current_file(&self.dbname, manifest_number)
    }

    fn archive_table(&self, number: u64) {
        self.table_cache.evict(number);
        let path = table_file_name(&self.dbname, number);
        if path.exists() {
            self.archive_file(&path);
        } else {
            self.archive_file(&sst_table_file_name(&self.dbname, number));
        }
    }

    /// Move `path` into `<db>/lost/`
    fn archive_file(&self, path: &Path) {
        let lost = self.dbname.join("lost");
        let _ = fs::create_dir_all(&lost);
        let Some(name) = path.file_name() else {
            return;
        };
        let result = fs::rename(path, lost.join(name));
        self.options.log(format!(
            "Archiving {}: {}",
            path.display(),
            if result.is_ok() { "OK" } else { "failed" }
        ));
    }
}
