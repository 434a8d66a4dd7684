//! WAL Reader
//!
//! Handles reading framed records from a log file.

use std::fs::File;
use std::io::{BufReader, ErrorKind, Read, Seek, SeekFrom};
use std::path::Path;

use crate::coding::decode_fixed32;
use crate::error::Result;

use super::{unmask_crc, HEADER_SIZE};

/// Outcome of reading one record
#[derive(Debug, PartialEq, Eq)]
pub enum RecordRead {
    /// A complete, checksum-verified record
    Record(Vec<u8>),

    /// Clean end of file
    Eof,

    /// The file ends partway through a record (torn write)
    Truncated,

    /// A complete record whose checksum does not match; it was skipped
    Corrupted { length: usize },

    /// A record header whose length runs past the end of file, followed by
    /// intact records. The damaged bytes were skipped and reading resumes at
    /// the next intact record.
    Damaged { skipped: usize },
}

/// Reads records from a log file
pub struct WalReader {
    reader: BufReader<File>,
    position: u64,
    file_size: u64,
}

impl WalReader {
    /// Open a log file for reading
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let file_size = file.metadata()?.len();
        Ok(Self {
            reader: BufReader::new(file),
            position: 0,
            file_size,
        })
    }

    /// Read the next record
    pub fn read_record(&mut self) -> Result<RecordRead> {
        let start = self.position;
        let mut header = [0u8; HEADER_SIZE];
        match read_full(&mut self.reader, &mut header)? {
            0 => return Ok(RecordRead::Eof),
            n if n < HEADER_SIZE => {
                self.position += n as u64;
                return Ok(RecordRead::Truncated);
            }
            _ => {}
        }
        self.position += HEADER_SIZE as u64;

        let stored_crc = unmask_crc(decode_fixed32(&header[0..4]));
        let length = decode_fixed32(&header[4..8]) as usize;

        // A length running past the end of file is either a torn tail or a
        // damaged header in the middle of the log
        if self.position + length as u64 > self.file_size {
            return self.resync(start);
        }

        let mut payload = vec![0u8; length];
        let n = read_full(&mut self.reader, &mut payload)?;
        self.position += n as u64;
        if n < length {
            return Ok(RecordRead::Truncated);
        }

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&header[4..8]);
        hasher.update(&payload);
        if hasher.finalize() != stored_crc {
            return Ok(RecordRead::Corrupted { length });
        }

        Ok(RecordRead::Record(payload))
    }

    /// Look for an intact record after a bad header at `start`.
    ///
    /// Only when nothing intact follows is the region a torn tail.
    fn resync(&mut self, start: u64) -> Result<RecordRead> {
        self.reader.seek(SeekFrom::Start(start))?;
        let mut rest = Vec::new();
        self.reader.read_to_end(&mut rest)?;

        match (1..rest.len()).find(|&skip| is_intact_record(&rest[skip..])) {
            Some(skip) => {
                self.position = start + skip as u64;
                self.reader.seek(SeekFrom::Start(self.position))?;
                Ok(RecordRead::Damaged { skipped: skip })
            }
            None => {
                self.position = self.file_size;
                Ok(RecordRead::Truncated)
            }
        }
    }

    /// Byte offset just past the last record read
    pub fn position(&self) -> u64 {
        self.position
    }
}

/// Whether `buf` starts with a complete record whose checksum matches
fn is_intact_record(buf: &[u8]) -> bool {
    if buf.len() < HEADER_SIZE {
        return false;
    }
    let length = decode_fixed32(&buf[4..8]) as usize;
    let Some(payload) = buf.get(HEADER_SIZE..HEADER_SIZE + length) else {
        return false;
    };
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&buf[4..8]);
    hasher.update(payload);
    hasher.finalize() == unmask_crc(decode_fixed32(&buf[0..4]))
}

/// Fill `buf` as far as possible, returning the number of bytes read
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}
