//! Write-Ahead Log (WAL) Module
//!
//! Provides durability guarantees through append-only logging.
//!
//! ## Responsibilities
//! - Append one record per write batch before the memtable is touched
//! - CRC32 checksums for corruption detection
//! - Base sequence numbers for ordering
//! - Crash recovery and replay
//!
//! The same record framing carries manifest version edits.
//!
//! ## File Format
//! ```text
//! ┌─────────────────────────────────────────┐
//! │ Record 1                                │
//! │ ┌─────────┬─────────┬─────────────────┐ │
//! │ │ CRC (4) │ Len (4) │     Payload     │ │
//! │ └─────────┴─────────┴─────────────────┘ │
//! ├─────────────────────────────────────────┤
//! │ Record 2                                │
//! │ ┌─────────┬─────────┬─────────────────┐ │
//! │ │ CRC (4) │ Len (4) │     Payload     │ │
//! │ └─────────┴─────────┴─────────────────┘ │
//! └─────────────────────────────────────────┘
//! ```
//!
//! The CRC covers the length field and the payload. A WAL payload is a
//! bincode-encoded [`WalEntry`].

mod entry;
mod reader;
mod recovery;
mod writer;

pub use entry::{WalEntry, HEADER_SIZE};
pub use reader::{RecordRead, WalReader};
pub use recovery::{RecoveryResult, WalRecovery};
pub use writer::WalWriter;

/// CRC masking, so that a CRC stored inside checksummed data does not
/// produce a trivially predictable checksum of its own
pub(crate) fn mask_crc(crc: u32) -> u32 {
    crc.rotate_right(15).wrapping_add(0xa282_ead8)
}

pub(crate) fn unmask_crc(masked: u32) -> u32 {
    masked.wrapping_sub(0xa282_ead8).rotate_left(15)
}
