//! Filter policies
//!
//! A filter summarizes a set of keys so that a reader can skip a data block
//! that definitely does not hold a key. Filters are built over user keys.

use std::fmt;

use xxhash_rust::xxh3::xxh3_128;

/// Pluggable summary of a key set
pub trait FilterPolicy: Send + Sync {
    /// Name persisted in each SSTable's metaindex block. Tables written with
    /// a differently named policy simply have their filters ignored.
    fn name(&self) -> &str;

    /// Append a filter summarizing `keys` to `dst`
    fn create_filter(&self, keys: &[&[u8]], dst: &mut Vec<u8>);

    /// `false` only if `key` was definitely not among the filtered keys
    fn key_may_match(&self, key: &[u8], filter: &[u8]) -> bool;
}

/// Probabilistic data structure: "is this key in the set?"
///
/// - If any probed bit is 0 → key is DEFINITELY NOT in the set
/// - If all probed bits are 1 → key is PROBABLY in the set
///
/// Double hashing: `h_i(key) = h1 + i * h2 (mod m)`, with `h1`, `h2` taken
/// from the two halves of a 128-bit xxh3 hash.
///
/// Encoded filter: `[bit array][num_probes: u8]`
#[derive(Clone)]
pub struct BloomFilterPolicy {
    bits_per_key: usize,
    num_probes: u8,
}

impl BloomFilterPolicy {
    /// `bits_per_key` of 10 gives roughly a 1% false positive rate
    pub fn new(bits_per_key: usize) -> Self {
        // ln(2) * bits_per_key minimizes the false positive rate
        let num_probes = ((bits_per_key as f64) * 0.69) as usize;
        Self {
            bits_per_key,
            num_probes: num_probes.clamp(1, 30) as u8,
        }
    }

    pub fn bits_per_key(&self) -> usize {
        self.bits_per_key
    }

    fn hash_key(key: &[u8]) -> (u64, u64) {
        let hash = xxh3_128(key);
        let h1 = hash as u64;
        // Odd step keeps the probe sequence from collapsing
        let h2 = ((hash >> 64) as u64) | 1;
        (h1, h2)
    }
}

impl fmt::Debug for BloomFilterPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BloomFilterPolicy")
            .field("bits_per_key", &self.bits_per_key)
            .field("num_probes", &self.num_probes)
            .finish()
    }
}

impl FilterPolicy for BloomFilterPolicy {
    fn name(&self) -> &str {
        "strata.BuiltinBloomFilter"
    }

    fn create_filter(&self, keys: &[&[u8]], dst: &mut Vec<u8>) {
        // Small key sets would otherwise see a very high false positive rate
        let bits = (keys.len() * self.bits_per_key).max(64);
        let bytes = bits.div_ceil(8);
        let bits = (bytes * 8) as u64;

        let start = dst.len();
        dst.resize(start + bytes, 0);
        dst.push(self.num_probes);

        let array = &mut dst[start..start + bytes];
        for key in keys {
            let (h1, h2) = Self::hash_key(key);
            for i in 0..self.num_probes as u64 {
                let pos = h1.wrapping_add(i.wrapping_mul(h2)) % bits;
                array[(pos / 8) as usize] |= 1 << (pos % 8);
            }
        }
    }

    fn key_may_match(&self, key: &[u8], filter: &[u8]) -> bool {
        if filter.len() < 2 {
            return false;
        }
        let bytes = filter.len() - 1;
        let bits = (bytes * 8) as u64;
        let num_probes = filter[bytes];
        if num_probes > 30 {
            // Reserved for future encodings: treat as a match
            return true;
        }

        let (h1, h2) = Self::hash_key(key);
        (0..num_probes as u64).all(|i| {
            let pos = h1.wrapping_add(i.wrapping_mul(h2)) % bits;
            filter[(pos / 8) as usize] & (1 << (pos % 8)) != 0
        })
    }
}
