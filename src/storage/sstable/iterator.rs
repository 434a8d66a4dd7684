//! SSTable Iterator
//!
//! Ordered, bidirectional iteration over all entries in an SSTable: an index
//! block cursor selects data blocks, a block cursor walks each one.

use crate::cache::CacheHandle;
use crate::error::Result;
use crate::iterator::{InternalIterator, TwoLevelIterator};

use super::SSTableReader;

/// Iterator over SSTable entries in comparator order
pub struct SSTableIterator {
    inner: TwoLevelIterator,
    /// Keeps the table pinned in the table cache while iterating
    _pin: Option<CacheHandle<u64, SSTableReader>>,
}

impl SSTableIterator {
    pub(super) fn new(inner: TwoLevelIterator) -> Self {
        Self { inner, _pin: None }
    }

    pub(crate) fn with_pin(mut self, pin: CacheHandle<u64, SSTableReader>) -> Self {
        self._pin = Some(pin);
        self
    }
}

impl InternalIterator for SSTableIterator {
    fn valid(&self) -> bool {
        self.inner.valid()
    }

    fn seek_to_first(&mut self) -> Result<()> {
        self.inner.seek_to_first()
    }

    fn seek_to_last(&mut self) -> Result<()> {
        self.inner.seek_to_last()
    }

    fn seek(&mut self, target: &[u8]) -> Result<()> {
        self.inner.seek(target)
    }

    fn next(&mut self) -> Result<()> {
        self.inner.next()
    }

    fn prev(&mut self) -> Result<()> {
        self.inner.prev()
    }

    fn key(&self) -> &[u8] {
        self.inner.key()
    }

    fn value(&self) -> &[u8] {
        self.inner.value()
    }
}
