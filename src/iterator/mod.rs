//! Iterator Module
//!
//! The central iteration abstraction for the storage engine.
//!
//! Every sorted source (memtable, block, SSTable, level, merged view)
//! implements [`InternalIterator`], so the merging iterator can combine them
//! behind `Box<dyn InternalIterator>`. Keys are internal keys except for the
//! user-facing [`DbIterator`].

mod db_iter;
mod merge;
mod two_level;

use crate::error::Result;

pub use db_iter::{DbEntries, DbIterator};
pub use merge::MergingIterator;
pub use two_level::{BlockFunction, TwoLevelIterator};

/// Bidirectional cursor over a sorted source
pub trait InternalIterator: Send {
    /// True if positioned at an entry
    fn valid(&self) -> bool;

    /// Position at the first entry
    fn seek_to_first(&mut self) -> Result<()>;

    /// Position at the last entry
    fn seek_to_last(&mut self) -> Result<()>;

    /// Position at the first entry with key >= `target`
    fn seek(&mut self, target: &[u8]) -> Result<()>;

    /// Advance. Requires `valid()`.
    fn next(&mut self) -> Result<()>;

    /// Step back. Requires `valid()`.
    fn prev(&mut self) -> Result<()>;

    /// Current key. Only meaningful when `valid()`.
    fn key(&self) -> &[u8];

    /// Current value. Only meaningful when `valid()`.
    fn value(&self) -> &[u8];
}
