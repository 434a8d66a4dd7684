//! Key comparators
//!
//! A comparator defines the total order over user keys. It also supplies two
//! optional key-shortening hooks used when building SSTable index blocks:
//! index entries only need to separate adjacent blocks, so a short key
//! between the two is enough.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use crate::types::{extract_trailer, extract_user_key, pack_sequence_and_type, MAX_SEQUENCE_NUMBER, VALUE_TYPE_FOR_SEEK};

/// Total order over byte keys
pub trait Comparator: Send + Sync {
    /// Name persisted in the manifest. Reopening a database with a comparator
    /// of a different name is rejected.
    fn name(&self) -> &str;

    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering;

    /// Return a key `k` with `start <= k < limit`, preferably shorter than
    /// `start`. The default returns `start` unchanged.
    fn find_shortest_separator(&self, start: &[u8], _limit: &[u8]) -> Vec<u8> {
        start.to_vec()
    }

    /// Return a key `k >= key`, preferably short. The default returns `key`.
    fn find_short_successor(&self, key: &[u8]) -> Vec<u8> {
        key.to_vec()
    }
}

// =============================================================================
// Built-in Comparators
// =============================================================================

/// Byte-lexicographic ascending order (the default)
#[derive(Debug, Clone, Copy, Default)]
pub struct BytewiseComparator;

impl Comparator for BytewiseComparator {
    fn name(&self) -> &str {
        "strata.BytewiseComparator"
    }

    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }

    fn find_shortest_separator(&self, start: &[u8], limit: &[u8]) -> Vec<u8> {
        let min_len = start.len().min(limit.len());
        let diff_index = start
            .iter()
            .zip(limit.iter())
            .take_while(|(a, b)| a == b)
            .count();

        if diff_index >= min_len {
            // One key is a prefix of the other
            return start.to_vec();
        }

        let diff_byte = start[diff_index];
        if diff_byte < 0xff && diff_byte + 1 < limit[diff_index] {
            let mut separator = start[..=diff_index].to_vec();
            separator[diff_index] += 1;
            debug_assert_eq!(self.compare(&separator, limit), Ordering::Less);
            return separator;
        }
        start.to_vec()
    }

    fn find_short_successor(&self, key: &[u8]) -> Vec<u8> {
        for (i, &byte) in key.iter().enumerate() {
            if byte != 0xff {
                let mut successor = key[..=i].to_vec();
                successor[i] += 1;
                return successor;
            }
        }
        // All 0xff: no shorter successor exists
        key.to_vec()
    }
}

/// Byte-lexicographic descending order
#[derive(Debug, Clone, Copy, Default)]
pub struct ReverseComparator;

impl Comparator for ReverseComparator {
    fn name(&self) -> &str {
        "strata.ReverseBytewiseComparator"
    }

    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        b.cmp(a)
    }
}

type CompareFn = dyn Fn(&[u8], &[u8]) -> Ordering + Send + Sync;
type SeparatorFn = dyn Fn(&[u8], &[u8]) -> Option<Vec<u8>> + Send + Sync;
type SuccessorFn = dyn Fn(&[u8]) -> Option<Vec<u8>> + Send + Sync;

/// Comparator assembled from closures.
///
/// The shortening closures are optional; returning `None` from either keeps
/// the input key unchanged.
pub struct FnComparator {
    name: String,
    compare: Box<CompareFn>,
    separator: Option<Box<SeparatorFn>>,
    successor: Option<Box<SuccessorFn>>,
}

impl FnComparator {
    pub fn new<F>(name: impl Into<String>, compare: F) -> Self
    where
        F: Fn(&[u8], &[u8]) -> Ordering + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            compare: Box::new(compare),
            separator: None,
            successor: None,
        }
    }

    pub fn with_separator<F>(mut self, f: F) -> Self
    where
        F: Fn(&[u8], &[u8]) -> Option<Vec<u8>> + Send + Sync + 'static,
    {
        self.separator = Some(Box::new(f));
        self
    }

    pub fn with_successor<F>(mut self, f: F) -> Self
    where
        F: Fn(&[u8]) -> Option<Vec<u8>> + Send + Sync + 'static,
    {
        self.successor = Some(Box::new(f));
        self
    }
}

impl fmt::Debug for FnComparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnComparator").field("name", &self.name).finish()
    }
}

impl Comparator for FnComparator {
    fn name(&self) -> &str {
        &self.name
    }

    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        (self.compare)(a, b)
    }

    fn find_shortest_separator(&self, start: &[u8], limit: &[u8]) -> Vec<u8> {
        self.separator
            .as_ref()
            .and_then(|f| f(start, limit))
            .unwrap_or_else(|| start.to_vec())
    }

    fn find_short_successor(&self, key: &[u8]) -> Vec<u8> {
        self.successor
            .as_ref()
            .and_then(|f| f(key))
            .unwrap_or_else(|| key.to_vec())
    }
}

// =============================================================================
// Internal Key Comparator
// =============================================================================

/// Orders internal keys: user key ascending, then (sequence, type) descending
#[derive(Clone)]
pub struct InternalKeyComparator {
    user: Arc<dyn Comparator>,
}

impl InternalKeyComparator {
    pub fn new(user: Arc<dyn Comparator>) -> Self {
        Self { user }
    }

    pub fn user_comparator(&self) -> &Arc<dyn Comparator> {
        &self.user
    }
}

impl fmt::Debug for InternalKeyComparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InternalKeyComparator")
            .field("user", &self.user.name())
            .finish()
    }
}

impl Comparator for InternalKeyComparator {
    fn name(&self) -> &str {
        "strata.InternalKeyComparator"
    }

    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        match self.user.compare(extract_user_key(a), extract_user_key(b)) {
            Ordering::Equal => extract_trailer(b).cmp(&extract_trailer(a)),
            other => other,
        }
    }

    fn find_shortest_separator(&self, start: &[u8], limit: &[u8]) -> Vec<u8> {
        let user_start = extract_user_key(start);
        let user_limit = extract_user_key(limit);
        let tmp = self.user.find_shortest_separator(user_start, user_limit);
        if tmp.len() < user_start.len()
            && self.user.compare(user_start, &tmp) == Ordering::Less
            && self.user.compare(&tmp, user_limit) == Ordering::Less
        {
            // Earliest possible trailer so the separator sorts before any
            // real entry with the same user key
            let mut separator = tmp;
            separator.extend_from_slice(
                &pack_sequence_and_type(MAX_SEQUENCE_NUMBER, VALUE_TYPE_FOR_SEEK).to_le_bytes(),
            );
            return separator;
        }
        start.to_vec()
    }

    fn find_short_successor(&self, key: &[u8]) -> Vec<u8> {
        let user_key = extract_user_key(key);
        let tmp = self.user.find_short_successor(user_key);
        if tmp.len() < user_key.len() && self.user.compare(user_key, &tmp) == Ordering::Less {
            let mut successor = tmp;
            successor.extend_from_slice(
                &pack_sequence_and_type(MAX_SEQUENCE_NUMBER, VALUE_TYPE_FOR_SEEK).to_le_bytes(),
            );
            return successor;
        }
        key.to_vec()
    }
}
