//! Database directory layout
//!
//! ```text
//! <db>/CURRENT           name of the live manifest
//! <db>/LOCK              advisory lock held by the open instance
//! <db>/LOG               info log (when a file logger is used)
//! <db>/MANIFEST-000005   version edits
//! <db>/000007.log        write-ahead log
//! <db>/000009.ldb        table file
//! <db>/000011.dbtmp      temporary file
//! ```

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{Result, StrataError};

/// Kind of a file found in the database directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Log,
    DbLock,
    Table,
    Descriptor,
    Current,
    Temp,
    InfoLog,
}

pub fn log_file_name(dbname: &Path, number: u64) -> PathBuf {
    dbname.join(format!("{:06}.log", number))
}

pub fn table_file_name(dbname: &Path, number: u64) -> PathBuf {
    dbname.join(format!("{:06}.ldb", number))
}

/// Older table extension, still accepted when opening
pub fn sst_table_file_name(dbname: &Path, number: u64) -> PathBuf {
    dbname.join(format!("{:06}.sst", number))
}

pub fn descriptor_file_name(dbname: &Path, number: u64) -> PathBuf {
    dbname.join(format!("MANIFEST-{:06}", number))
}

pub fn current_file_name(dbname: &Path) -> PathBuf {
    dbname.join("CURRENT")
}

pub fn lock_file_name(dbname: &Path) -> PathBuf {
    dbname.join("LOCK")
}

pub fn temp_file_name(dbname: &Path, number: u64) -> PathBuf {
    dbname.join(format!("{:06}.dbtmp", number))
}

/// Classify a file name, returning its type and number (0 for unnumbered)
pub fn parse_file_name(name: &str) -> Option<(FileType, u64)> {
    match name {
        "CURRENT" => return Some((FileType::Current, 0)),
        "LOCK" => return Some((FileType::DbLock, 0)),
        "LOG" | "LOG.old" => return Some((FileType::InfoLog, 0)),
        _ => {}
    }

    if let Some(rest) = name.strip_prefix("MANIFEST-") {
        return parse_number(rest).map(|n| (FileType::Descriptor, n));
    }

    let (stem, ext) = name.split_once('.')?;
    let number = parse_number(stem)?;
    let file_type = match ext {
        "log" => FileType::Log,
        "ldb" | "sst" => FileType::Table,
        "dbtmp" => FileType::Temp,
        _ => return None,
    };
    Some((file_type, number))
}

fn parse_number(s: &str) -> Option<u64> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

/// Atomically point CURRENT at `MANIFEST-<descriptor_number>`
pub fn set_current_file(dbname: &Path, descriptor_number: u64) -> Result<()> {
    let manifest = descriptor_file_name(dbname, descriptor_number);
    let contents = manifest
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| StrataError::InvalidArgument("bad manifest file name".into()))?;

    let tmp = temp_file_name(dbname, descriptor_number);
    let result = (|| -> Result<()> {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(contents.as_bytes())?;
        file.write_all(b"\n")?;
        file.sync_all()?;
        fs::rename(&tmp, current_file_name(dbname))?;
        Ok(())
    })();
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

/// Manifest file name recorded in CURRENT
pub fn read_current_file(dbname: &Path) -> Result<String> {
    let contents = fs::read_to_string(current_file_name(dbname))?;
    let Some(name) = contents.strip_suffix('\n') else {
        return Err(StrataError::Corruption(
            "CURRENT file does not end with newline".into(),
        ));
    };
    if name.is_empty() {
        return Err(StrataError::Corruption("CURRENT file is empty".into()));
    }
    Ok(name.to_string())
}
