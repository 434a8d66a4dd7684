//! WAL Recovery
//!
//! Handles crash recovery by replaying the WAL.

use std::fs::OpenOptions;
use std::path::Path;

use crate::error::{Result, StrataError};

use super::{RecordRead, WalEntry, WalReader};

/// Handles WAL recovery after crash
pub struct WalRecovery;

/// Result of a recovery operation
#[derive(Debug, Default)]
pub struct RecoveryResult {
    /// Number of entries successfully recovered
    pub entries_recovered: u64,

    /// Number of corrupted entries skipped
    pub entries_corrupted: u64,

    /// Highest sequence number consumed by a recovered entry
    pub last_sequence: u64,

    /// Whether the WAL was truncated (partial writes removed)
    pub was_truncated: bool,
}

impl WalRecovery {
    /// Recover entries from a WAL file
    ///
    /// This will:
    /// 1. Read all valid entries
    /// 2. Skip corrupted entries and damaged regions (or fail when `paranoid` is set)
    /// 3. Truncate a partial write at the end, but only when no intact record follows it
    /// 4. Return all valid entries in order
    pub fn recover(path: &Path, paranoid: bool) -> Result<(Vec<WalEntry>, RecoveryResult)> {
        let (entries, result, valid_len) = Self::scan(path, paranoid)?;

        if result.was_truncated {
            tracing::warn!(
                path = %path.display(),
                valid_len,
                "dropping torn record at WAL tail"
            );
            let file = OpenOptions::new().write(true).open(path)?;
            file.set_len(valid_len)?;
            file.sync_all()?;
        }

        Ok((entries, result))
    }

    /// Verify integrity of a WAL file without modifying it
    pub fn verify(path: &Path) -> Result<RecoveryResult> {
        let (_, result, _) = Self::scan(path, false)?;
        Ok(result)
    }

    fn scan(path: &Path, paranoid: bool) -> Result<(Vec<WalEntry>, RecoveryResult, u64)> {
        let mut reader = WalReader::open(path)?;
        let mut entries = Vec::new();
        let mut result = RecoveryResult::default();
        let mut valid_len = 0u64;

        loop {
            match reader.read_record()? {
                RecordRead::Record(payload) => match WalEntry::deserialize(&payload) {
                    Ok(entry) => {
                        result.entries_recovered += 1;
                        result.last_sequence = result.last_sequence.max(entry.last_sequence());
                        entries.push(entry);
                    }
                    Err(e) if paranoid => return Err(e),
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "undecodable WAL entry skipped");
                        result.entries_corrupted += 1;
                    }
                },
                RecordRead::Corrupted { length } => {
                    if paranoid {
                        return Err(StrataError::Corruption(format!(
                            "{}: checksum mismatch in {}-byte record at offset {}",
                            path.display(),
                            length,
                            valid_len
                        )));
                    }
                    tracing::warn!(path = %path.display(), length, "corrupted WAL record skipped");
                    result.entries_corrupted += 1;
                }
                RecordRead::Damaged { skipped } => {
                    if paranoid {
                        return Err(StrataError::Corruption(format!(
                            "{}: bad record length at offset {}, {} bytes unreadable",
                            path.display(),
                            valid_len,
                            skipped
                        )));
                    }
                    tracing::warn!(path = %path.display(), offset = valid_len, skipped, "damaged WAL region skipped");
                    result.entries_corrupted += 1;
                }
                RecordRead::Truncated => {
                    result.was_truncated = true;
                    break;
                }
                RecordRead::Eof => break,
            }
            valid_len = reader.position();
        }

        Ok((entries, result, valid_len))
    }
}
