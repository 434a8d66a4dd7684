//! User-facing database iterator
//!
//! Wraps a merged stream of internal keys and exposes only user keys:
//! - entries newer than the read sequence are invisible
//! - only the newest visible version of each user key is returned
//! - keys whose newest visible version is a deletion are skipped
//!
//! Moving forward, the inner iterator sits ON the returned entry. Moving
//! backward, it sits just BEFORE all entries for the returned key, which is
//! kept in `saved_key`/`saved_value`.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::comparator::Comparator;
use crate::error::{Result, StrataError};
use crate::types::{
    append_internal_key, extract_user_key, parse_internal_key, ParsedInternalKey, SequenceNumber,
    ValueType, VALUE_TYPE_FOR_SEEK,
};
use crate::version::Version;

use super::InternalIterator;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Forward,
    Reverse,
}

/// Ordered view of the database as of one sequence number
pub struct DbIterator {
    user_cmp: Arc<dyn Comparator>,
    iter: Box<dyn InternalIterator>,
    sequence: SequenceNumber,
    direction: Direction,
    valid: bool,
    positioned: bool,
    saved_key: Vec<u8>,
    saved_value: Vec<u8>,
    status: Option<StrataError>,
    /// Keeps the files of the version being read from alive
    _version: Option<Arc<Version>>,
}

impl DbIterator {
    pub(crate) fn new(
        user_cmp: Arc<dyn Comparator>,
        iter: Box<dyn InternalIterator>,
        sequence: SequenceNumber,
    ) -> Self {
        Self {
            user_cmp,
            iter,
            sequence,
            direction: Direction::Forward,
            valid: false,
            positioned: false,
            saved_key: Vec::new(),
            saved_value: Vec::new(),
            status: None,
            _version: None,
        }
    }

    pub(crate) fn pin_version(mut self, version: Arc<Version>) -> Self {
        self._version = Some(version);
        self
    }

    /// True if positioned at a visible entry
    pub fn valid(&self) -> bool {
        self.valid
    }

    /// Current user key. Only meaningful when `valid()`.
    pub fn key(&self) -> &[u8] {
        match self.direction {
            Direction::Forward => extract_user_key(self.iter.key()),
            Direction::Reverse => &self.saved_key,
        }
    }

    /// Current value. Only meaningful when `valid()`.
    pub fn value(&self) -> &[u8] {
        match self.direction {
            Direction::Forward => self.iter.value(),
            Direction::Reverse => &self.saved_value,
        }
    }

    /// First error the iterator ran into, if any
    pub fn status(&self) -> Result<()> {
        match &self.status {
            Some(e) => Err(e.duplicate()),
            None => Ok(()),
        }
    }

    pub fn seek_to_first(&mut self) -> Result<()> {
        self.positioned = true;
        self.direction = Direction::Forward;
        self.saved_value.clear();
        let result = self
            .iter
            .seek_to_first()
            .and_then(|_| self.find_next_user_entry(false, Vec::new()));
        self.track(result)
    }

    pub fn seek_to_last(&mut self) -> Result<()> {
        self.positioned = true;
        self.direction = Direction::Reverse;
        self.saved_value.clear();
        let result = self
            .iter
            .seek_to_last()
            .and_then(|_| self.find_prev_user_entry());
        self.track(result)
    }

    /// Position at the first key >= `target`
    pub fn seek(&mut self, target: &[u8]) -> Result<()> {
        self.positioned = true;
        self.direction = Direction::Forward;
        self.saved_value.clear();
        let mut internal_key = Vec::with_capacity(target.len() + 8);
        append_internal_key(&mut internal_key, target, self.sequence, VALUE_TYPE_FOR_SEEK);
        let result = self
            .iter
            .seek(&internal_key)
            .and_then(|_| self.find_next_user_entry(false, Vec::new()));
        self.track(result)
    }

    /// Advance to the next visible key. Requires `valid()`.
    pub fn next(&mut self) -> Result<()> {
        if !self.valid {
            return self.status();
        }
        let result = self.step_forward();
        self.track(result)
    }

    /// Step back to the previous visible key. Requires `valid()`.
    pub fn prev(&mut self) -> Result<()> {
        if !self.valid {
            return self.status();
        }
        let result = self.step_backward();
        self.track(result)
    }

    /// Consume the iterator as a Rust iterator of `(key, value)` pairs.
    /// Starts at the first key unless already positioned by a seek.
    pub fn entries(self) -> DbEntries {
        DbEntries {
            inner: self,
            started: false,
            done: false,
        }
    }

    fn track(&mut self, result: Result<()>) -> Result<()> {
        if let Err(e) = result {
            self.valid = false;
            if self.status.is_none() {
                self.status = Some(e.duplicate());
            }
            return Err(e);
        }
        Ok(())
    }

    fn parse_current(&self) -> Result<ParsedInternalKey<'_>> {
        parse_internal_key(self.iter.key())
            .ok_or_else(|| StrataError::Corruption("corrupted internal key in iterator".into()))
    }

    fn step_forward(&mut self) -> Result<()> {
        if self.direction == Direction::Reverse {
            self.direction = Direction::Forward;
            // The inner iterator is before all entries for `saved_key`;
            // move into them so they get skipped below.
            if self.iter.valid() {
                self.iter.next()?;
            } else {
                self.iter.seek_to_first()?;
            }
            if !self.iter.valid() {
                self.valid = false;
                self.saved_key.clear();
                return Ok(());
            }
        } else {
            self.saved_key.clear();
            self.saved_key
                .extend_from_slice(extract_user_key(self.iter.key()));
            self.iter.next()?;
            if !self.iter.valid() {
                self.valid = false;
                self.saved_key.clear();
                return Ok(());
            }
        }
        let skip = std::mem::take(&mut self.saved_key);
        self.find_next_user_entry(true, skip)
    }

    fn step_backward(&mut self) -> Result<()> {
        if self.direction == Direction::Forward {
            // Back up past every entry for the current key
            self.saved_key.clear();
            self.saved_key
                .extend_from_slice(extract_user_key(self.iter.key()));
            loop {
                self.iter.prev()?;
                if !self.iter.valid() {
                    self.valid = false;
                    self.saved_key.clear();
                    self.saved_value.clear();
                    return Ok(());
                }
                if self
                    .user_cmp
                    .compare(extract_user_key(self.iter.key()), &self.saved_key)
                    == Ordering::Less
                {
                    break;
                }
            }
            self.direction = Direction::Reverse;
        }
        self.find_prev_user_entry()
    }

    /// Forward scan to the next visible entry. Entries for user keys <= `skip`
    /// are hidden while `skipping`.
    fn find_next_user_entry(&mut self, mut skipping: bool, mut skip: Vec<u8>) -> Result<()> {
        debug_assert_eq!(self.direction, Direction::Forward);
        while self.iter.valid() {
            let parsed = self.parse_current()?;
            if parsed.sequence <= self.sequence {
                match parsed.value_type {
                    ValueType::Deletion => {
                        // Hide all later entries for this key
                        skip.clear();
                        skip.extend_from_slice(parsed.user_key);
                        skipping = true;
                    }
                    ValueType::Value => {
                        let hidden = skipping
                            && self.user_cmp.compare(parsed.user_key, &skip) != Ordering::Greater;
                        if !hidden {
                            self.valid = true;
                            self.saved_key.clear();
                            return Ok(());
                        }
                    }
                }
            }
            self.iter.next()?;
        }
        self.saved_key.clear();
        self.valid = false;
        Ok(())
    }

    /// Backward scan collecting the newest visible version of the previous
    /// user key into `saved_key`/`saved_value`
    fn find_prev_user_entry(&mut self) -> Result<()> {
        debug_assert_eq!(self.direction, Direction::Reverse);
        let mut value_type = ValueType::Deletion;
        while self.iter.valid() {
            let parsed = self.parse_current()?;
            if parsed.sequence <= self.sequence {
                if value_type != ValueType::Deletion
                    && self.user_cmp.compare(parsed.user_key, &self.saved_key) == Ordering::Less
                {
                    // Passed the key we collected; it is visible
                    break;
                }
                value_type = parsed.value_type;
                match value_type {
                    ValueType::Deletion => {
                        self.saved_key.clear();
                        self.saved_value.clear();
                    }
                    ValueType::Value => {
                        let user_key = parsed.user_key.to_vec();
                        self.saved_key = user_key;
                        self.saved_value.clear();
                        self.saved_value.extend_from_slice(self.iter.value());
                    }
                }
            }
            self.iter.prev()?;
        }

        if value_type == ValueType::Deletion {
            // Ran off the beginning
            self.valid = false;
            self.saved_key.clear();
            self.saved_value.clear();
            self.direction = Direction::Forward;
        } else {
            self.valid = true;
        }
        Ok(())
    }
}

/// `Iterator` adapter returned by [`DbIterator::entries`]
pub struct DbEntries {
    inner: DbIterator,
    started: bool,
    done: bool,
}

impl Iterator for DbEntries {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let step = if !self.started {
            self.started = true;
            if self.inner.positioned {
                self.inner.status()
            } else {
                self.inner.seek_to_first()
            }
        } else {
            self.inner.next()
        };
        if let Err(e) = step {
            self.done = true;
            return Some(Err(e));
        }
        if !self.inner.valid() {
            self.done = true;
            return None;
        }
        Some(Ok((self.inner.key().to_vec(), self.inner.value().to_vec())))
    }
}
