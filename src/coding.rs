//! Variable-length integer coding
//!
//! LEB128 varints: 7 payload bits per byte, high bit set on every byte
//! except the last. Used for block entry lengths and block handles.

use bytes::BufMut;

/// Maximum encoded length of a u64 varint
pub const MAX_VARINT64_LEN: usize = 10;

pub fn put_varint32(dst: &mut Vec<u8>, value: u32) {
    put_varint64(dst, value as u64);
}

pub fn put_varint64(dst: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        dst.put_u8((value as u8) | 0x80);
        value >>= 7;
    }
    dst.put_u8(value as u8);
}

/// Decode a varint from the front of `src`, returning `(value, bytes_read)`
pub fn get_varint64(src: &[u8]) -> Option<(u64, usize)> {
    let mut result = 0u64;
    for (i, &byte) in src.iter().enumerate().take(MAX_VARINT64_LEN) {
        result |= ((byte & 0x7f) as u64) << (7 * i);
        if byte & 0x80 == 0 {
            return Some((result, i + 1));
        }
    }
    None
}

pub fn get_varint32(src: &[u8]) -> Option<(u32, usize)> {
    let (value, n) = get_varint64(src)?;
    if n > 5 || value > u32::MAX as u64 {
        return None;
    }
    Some((value as u32, n))
}

pub fn varint_length(mut value: u64) -> usize {
    let mut len = 1;
    while value >= 0x80 {
        value >>= 7;
        len += 1;
    }
    len
}

pub fn put_length_prefixed_slice(dst: &mut Vec<u8>, value: &[u8]) {
    put_varint32(dst, value.len() as u32);
    dst.put_slice(value);
}

/// Decode a length-prefixed slice, returning `(slice, bytes_read)`
pub fn get_length_prefixed_slice(src: &[u8]) -> Option<(&[u8], usize)> {
    let (len, n) = get_varint32(src)?;
    let end = n.checked_add(len as usize)?;
    if end > src.len() {
        return None;
    }
    Some((&src[n..end], end))
}

pub fn decode_fixed32(src: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&src[..4]);
    u32::from_le_bytes(buf)
}

pub fn decode_fixed64(src: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&src[..8]);
    u64::from_le_bytes(buf)
}
