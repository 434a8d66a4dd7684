//! WAL Writer
//!
//! Handles appending framed records to a log file.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use bytes::BufMut;

use crate::error::{Result, StrataError};

use super::{mask_crc, HEADER_SIZE};

/// Appends records to a WAL or manifest file
pub struct WalWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    /// Bytes written so far, including any pre-existing content
    offset: u64,
}

impl WalWriter {
    /// Create a new, empty log file (truncating any existing file)
    pub fn create(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
            offset: 0,
        })
    }

    /// Open an existing log file and continue appending at its end
    pub fn open_append(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let offset = file.metadata()?.len();
        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
            offset,
        })
    }

    /// Append one record. The bytes reach the OS before this returns; call
    /// [`sync`](Self::sync) for durability against power loss.
    pub fn add_record(&mut self, payload: &[u8]) -> Result<u64> {
        if payload.len() > u32::MAX as usize {
            return Err(StrataError::InvalidArgument(format!(
                "log record of {} bytes exceeds the 4 GiB limit",
                payload.len()
            )));
        }

        let len_bytes = (payload.len() as u32).to_le_bytes();
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&len_bytes);
        hasher.update(payload);
        let crc = mask_crc(hasher.finalize());

        let mut header = Vec::with_capacity(HEADER_SIZE);
        header.put_u32_le(crc);
        header.put_slice(&len_bytes);

        let record_offset = self.offset;
        self.writer.write_all(&header)?;
        self.writer.write_all(payload)?;
        self.writer.flush()?;
        self.offset += (HEADER_SIZE + payload.len()) as u64;

        Ok(record_offset)
    }

    /// Force sync to disk
    pub fn sync(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_data()?;
        Ok(())
    }

    /// Current file size in bytes
    pub fn file_size(&self) -> u64 {
        self.offset
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
