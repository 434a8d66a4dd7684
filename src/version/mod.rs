//! Version Module
//!
//! Tracks which table files belong to which level over time.
//!
//! ## Responsibilities
//! - Immutable `Version`s shared by readers, iterators and snapshots
//! - `VersionEdit` deltas persisted to the manifest
//! - Crash recovery by replaying the manifest named in CURRENT
//! - Reporting which files are still referenced so obsolete ones can go

mod edit;
mod set;
#[allow(clippy::module_inception)]
mod version;

pub use edit::{FileMetaData, VersionEdit};
pub use set::VersionSet;
pub use version::Version;

pub(crate) use version::{find_file, new_level_iterator, total_file_size};
