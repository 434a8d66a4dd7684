//! Internal key format
//!
//! Every entry stored by the engine is addressed by an *internal key*:
//!
//! ```text
//! ┌───────────────────────┬──────────────────────────────────────┐
//! │ user key (N bytes)    │ trailer: (sequence << 8) | type (8B) │
//! └───────────────────────┴──────────────────────────────────────┘
//! ```
//!
//! Ordering: user key ascending (per the user comparator), then trailer
//! descending, so the newest version of a key always sorts first.

use serde::{Deserialize, Serialize};

/// Monotonically increasing write sequence number
pub type SequenceNumber = u64;

/// Sequence numbers occupy the upper 56 bits of the trailer
pub const MAX_SEQUENCE_NUMBER: SequenceNumber = (1u64 << 56) - 1;

/// Size of the packed (sequence, type) trailer
pub const TRAILER_SIZE: usize = 8;

/// Kind of mutation recorded for a key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ValueType {
    /// Tombstone
    Deletion = 0,
    /// Live value
    Value = 1,
}

impl ValueType {
    pub fn from_u8(b: u8) -> Option<Self> {
        match b {
            0 => Some(ValueType::Deletion),
            1 => Some(ValueType::Value),
            _ => None,
        }
    }
}

/// Type used when building seek keys. `Value` is the highest type, so a seek
/// key sorts before every entry for the same user key and sequence.
pub const VALUE_TYPE_FOR_SEEK: ValueType = ValueType::Value;

pub fn pack_sequence_and_type(sequence: SequenceNumber, value_type: ValueType) -> u64 {
    debug_assert!(sequence <= MAX_SEQUENCE_NUMBER);
    (sequence << 8) | value_type as u64
}

/// Append the internal key encoding of `(user_key, sequence, value_type)` to `dst`
pub fn append_internal_key(
    dst: &mut Vec<u8>,
    user_key: &[u8],
    sequence: SequenceNumber,
    value_type: ValueType,
) {
    dst.extend_from_slice(user_key);
    dst.extend_from_slice(&pack_sequence_and_type(sequence, value_type).to_le_bytes());
}

/// Borrowed, decoded view of an internal key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedInternalKey<'a> {
    pub user_key: &'a [u8],
    pub sequence: SequenceNumber,
    pub value_type: ValueType,
}

/// Decode an internal key; `None` if it is too short or has an unknown type
pub fn parse_internal_key(internal_key: &[u8]) -> Option<ParsedInternalKey<'_>> {
    if internal_key.len() < TRAILER_SIZE {
        return None;
    }
    let split = internal_key.len() - TRAILER_SIZE;
    let mut trailer = [0u8; 8];
    trailer.copy_from_slice(&internal_key[split..]);
    let packed = u64::from_le_bytes(trailer);
    let value_type = ValueType::from_u8((packed & 0xff) as u8)?;
    Some(ParsedInternalKey {
        user_key: &internal_key[..split],
        sequence: packed >> 8,
        value_type,
    })
}

/// User key portion of an internal key
pub fn extract_user_key(internal_key: &[u8]) -> &[u8] {
    let split = internal_key.len().saturating_sub(TRAILER_SIZE);
    &internal_key[..split]
}

/// Packed trailer of an internal key (0 when malformed)
pub fn extract_trailer(internal_key: &[u8]) -> u64 {
    if internal_key.len() < TRAILER_SIZE {
        return 0;
    }
    let mut trailer = [0u8; 8];
    trailer.copy_from_slice(&internal_key[internal_key.len() - TRAILER_SIZE..]);
    u64::from_le_bytes(trailer)
}

/// Owned internal key
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InternalKey {
    rep: Vec<u8>,
}

impl InternalKey {
    pub fn new(user_key: &[u8], sequence: SequenceNumber, value_type: ValueType) -> Self {
        let mut rep = Vec::with_capacity(user_key.len() + TRAILER_SIZE);
        append_internal_key(&mut rep, user_key, sequence, value_type);
        Self { rep }
    }

    /// Wrap already-encoded internal key bytes
    pub fn decode_from(encoded: &[u8]) -> Self {
        Self {
            rep: encoded.to_vec(),
        }
    }

    pub fn encode(&self) -> &[u8] {
        &self.rep
    }

    pub fn user_key(&self) -> &[u8] {
        extract_user_key(&self.rep)
    }

    pub fn is_empty(&self) -> bool {
        self.rep.is_empty()
    }
}

/// Key used for point lookups: the user key tagged with the read sequence
#[derive(Debug, Clone)]
pub struct LookupKey {
    rep: Vec<u8>,
    user_key_len: usize,
}

impl LookupKey {
    pub fn new(user_key: &[u8], sequence: SequenceNumber) -> Self {
        let mut rep = Vec::with_capacity(user_key.len() + TRAILER_SIZE);
        append_internal_key(&mut rep, user_key, sequence, VALUE_TYPE_FOR_SEEK);
        Self {
            rep,
            user_key_len: user_key.len(),
        }
    }

    pub fn internal_key(&self) -> &[u8] {
        &self.rep
    }

    pub fn user_key(&self) -> &[u8] {
        &self.rep[..self.user_key_len]
    }
}
