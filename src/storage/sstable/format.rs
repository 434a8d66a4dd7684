//! On-disk framing shared by the table builder and reader
//!
//! Every block is followed by a 5-byte trailer:
//! `[compression type (1)][masked CRC32 over contents + type (4)]`.
//! The file ends with a fixed-size footer pointing at the metaindex and
//! index blocks.

use std::fs::File;

use bytes::BufMut;

use crate::coding::{decode_fixed32, decode_fixed64, get_varint64, put_varint64};
use crate::config::CompressionType;
use crate::error::{Result, StrataError};
use crate::wal::{mask_crc, unmask_crc};

/// Magic number closing every table file
pub const TABLE_MAGIC_NUMBER: u64 = 0x5374_7261_7461_4442; // "StrataDB"

/// Upper bound on an encoded BlockHandle (two varint64s)
pub const MAX_ENCODED_HANDLE_LENGTH: usize = 10 + 10;

/// Footer: two padded handles followed by the magic number
pub const FOOTER_SIZE: usize = 2 * MAX_ENCODED_HANDLE_LENGTH + 8;

/// Compression type byte plus masked CRC
pub const BLOCK_TRAILER_SIZE: usize = 5;

/// Location of a block inside a table file
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockHandle {
    pub offset: u64,
    pub size: u64,
}

impl BlockHandle {
    pub fn new(offset: u64, size: u64) -> Self {
        Self { offset, size }
    }

    pub fn encode_to(&self, dst: &mut Vec<u8>) {
        put_varint64(dst, self.offset);
        put_varint64(dst, self.size);
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(MAX_ENCODED_HANDLE_LENGTH);
        self.encode_to(&mut buf);
        buf
    }

    /// Decode a handle, returning it with the bytes consumed
    pub fn decode_from(src: &[u8]) -> Result<(Self, usize)> {
        let (offset, n1) =
            get_varint64(src).ok_or_else(|| StrataError::Corruption("bad block handle".into()))?;
        let (size, n2) = get_varint64(&src[n1..])
            .ok_or_else(|| StrataError::Corruption("bad block handle".into()))?;
        Ok((Self { offset, size }, n1 + n2))
    }
}

/// Fixed-size table footer
#[derive(Debug, Clone, Copy, Default)]
pub struct Footer {
    pub metaindex_handle: BlockHandle,
    pub index_handle: BlockHandle,
}

impl Footer {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(FOOTER_SIZE);
        self.metaindex_handle.encode_to(&mut buf);
        self.index_handle.encode_to(&mut buf);
        buf.resize(2 * MAX_ENCODED_HANDLE_LENGTH, 0);
        buf.put_u64_le(TABLE_MAGIC_NUMBER);
        buf
    }

    pub fn decode(src: &[u8]) -> Result<Self> {
        if src.len() < FOOTER_SIZE {
            return Err(StrataError::Corruption("footer too short".into()));
        }
        let magic = decode_fixed64(&src[FOOTER_SIZE - 8..]);
        if magic != TABLE_MAGIC_NUMBER {
            return Err(StrataError::Corruption(
                "not a table file (bad magic number)".into(),
            ));
        }
        let (metaindex_handle, n) = BlockHandle::decode_from(src)?;
        let (index_handle, _) = BlockHandle::decode_from(&src[n..])?;
        Ok(Self {
            metaindex_handle,
            index_handle,
        })
    }
}

/// Checksum stored in a block trailer
pub(crate) fn block_checksum(contents: &[u8], compression: u8) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(contents);
    hasher.update(&[compression]);
    mask_crc(hasher.finalize())
}

/// Positional read that leaves the file cursor alone
pub(crate) fn read_at(file: &File, offset: u64, buf: &mut [u8]) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::FileExt;
        file.read_exact_at(buf, offset)?;
    }
    #[cfg(windows)]
    {
        use std::os::windows::fs::FileExt;
        let mut done = 0;
        while done < buf.len() {
            let n = file.seek_read(&mut buf[done..], offset + done as u64)?;
            if n == 0 {
                return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into());
            }
            done += n;
        }
    }
    Ok(())
}

/// Read a block and its trailer, verify and decompress it
pub(crate) fn read_block(file: &File, handle: &BlockHandle, verify_checksums: bool) -> Result<Vec<u8>> {
    let n = handle.size as usize;
    let mut buf = vec![0u8; n + BLOCK_TRAILER_SIZE];
    read_at(file, handle.offset, &mut buf).map_err(|e| match e {
        StrataError::Io(io) if io.kind() == std::io::ErrorKind::UnexpectedEof => {
            StrataError::Corruption("truncated block read".into())
        }
        other => other,
    })?;

    let compression = buf[n];
    if verify_checksums {
        let expected = unmask_crc(decode_fixed32(&buf[n + 1..]));
        let actual = unmask_crc(block_checksum(&buf[..n], compression));
        if expected != actual {
            return Err(StrataError::Corruption(format!(
                "block checksum mismatch at offset {}",
                handle.offset
            )));
        }
    }

    match CompressionType::from_u8(compression) {
        Some(CompressionType::None) => {
            buf.truncate(n);
            Ok(buf)
        }
        Some(CompressionType::Snappy) => Ok(snap::raw::Decoder::new().decompress_vec(&buf[..n])?),
        None => Err(StrataError::Corruption(format!(
            "unknown block compression type {}",
            compression
        ))),
    }
}
