//! Snapshots
//!
//! A snapshot pins a sequence number: reads through it see exactly the
//! writes with smaller or equal sequence numbers. It also pins the version
//! that was current when it was taken, so the files of that version are not
//! deleted while the snapshot lives.
//!
//! Compaction keeps every entry some live snapshot may still observe; the
//! oldest registered sequence number bounds what it may drop.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::types::SequenceNumber;
use crate::version::Version;

/// Live snapshot sequence numbers with multiplicity
#[derive(Debug, Default)]
pub(crate) struct SnapshotList {
    counts: BTreeMap<SequenceNumber, usize>,
}

impl SnapshotList {
    pub(crate) fn acquire(&mut self, sequence: SequenceNumber) {
        *self.counts.entry(sequence).or_insert(0) += 1;
    }

    pub(crate) fn release(&mut self, sequence: SequenceNumber) {
        if let Some(count) = self.counts.get_mut(&sequence) {
            *count -= 1;
            if *count == 0 {
                self.counts.remove(&sequence);
            }
        }
    }

    /// Smallest sequence number any live snapshot reads at
    pub(crate) fn oldest(&self) -> Option<SequenceNumber> {
        self.counts.keys().next().copied()
    }

    pub(crate) fn len(&self) -> usize {
        self.counts.values().sum()
    }
}

struct SnapshotInner {
    sequence: SequenceNumber,
    /// Held only so the files of this version stay live
    _version: Arc<Version>,
    list: Arc<Mutex<SnapshotList>>,
}

impl Drop for SnapshotInner {
    fn drop(&mut self) {
        self.list.lock().release(self.sequence);
    }
}

/// Handle to a consistent point-in-time view of the database
///
/// Clones share one registration; the snapshot is released when the last
/// clone is dropped (or passed to [`Snapshot::release`]).
#[derive(Clone)]
pub struct Snapshot {
    inner: Arc<SnapshotInner>,
}

impl Snapshot {
    pub(crate) fn new(
        sequence: SequenceNumber,
        version: Arc<Version>,
        list: Arc<Mutex<SnapshotList>>,
    ) -> Self {
        list.lock().acquire(sequence);
        Self {
            inner: Arc::new(SnapshotInner {
                sequence,
                _version: version,
                list,
            }),
        }
    }

    /// Sequence number this snapshot reads at
    pub fn sequence(&self) -> SequenceNumber {
        self.inner.sequence
    }

    /// Release this handle
    pub fn release(self) {
        drop(self);
    }
}

impl fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Snapshot")
            .field("sequence", &self.inner.sequence)
            .finish()
    }
}
