//! Compaction picking
//!
//! Size-triggered compactions go to the level with the highest score:
//! - level 0 scores by file count against `level0_compaction_trigger`
//! - deeper levels score by total bytes against their byte budget
//!
//! Within level 0 the file with the smallest number (the oldest flush) is
//! chosen and the input grows to every level-0 file overlapping it. Within
//! deeper levels the level is walked round-robin starting after
//! `compact_pointer[level]`.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::comparator::{Comparator, InternalKeyComparator};
use crate::config::NUM_LEVELS;
use crate::types::InternalKey;
use crate::version::{total_file_size, FileMetaData, VersionSet};

use super::Compaction;

/// Choose the next size-triggered compaction, if any level needs one
pub(crate) fn pick_compaction(versions: &mut VersionSet) -> Option<Compaction> {
    let current = versions.current();
    if current.compaction_score < 1.0 {
        return None;
    }
    let level = current.compaction_level;
    debug_assert!(level + 1 < NUM_LEVELS);

    let options = Arc::clone(versions.options());
    let mut c = Compaction::new(
        level,
        Arc::clone(&current),
        options.max_file_size,
        options.max_grandparent_overlap_bytes(),
    );

    if level == 0 {
        let oldest = current.files(0).iter().min_by_key(|f| f.number)?;
        c.inputs[0].push(Arc::clone(oldest));
    } else {
        let icmp = versions.icmp();
        let pointer = &versions.compact_pointer[level];
        let next = current.files(level).iter().find(|f| {
            pointer.is_empty() || icmp.compare(f.largest.encode(), pointer.encode()) == Ordering::Greater
        });
        // Wrap around to the beginning of the key space
        let file = next.or_else(|| current.files(level).first())?;
        c.inputs[0].push(Arc::clone(file));
    }

    if level == 0 {
        // Level-0 files may overlap each other, so pull in every overlapping one
        let (smallest, largest) = get_range(versions.icmp(), &c.inputs[0]);
        c.inputs[0] = current.get_overlapping_inputs(0, Some(&smallest), Some(&largest));
        debug_assert!(!c.inputs[0].is_empty());
    }

    setup_other_inputs(versions, &mut c);
    Some(c)
}

/// Compaction of `level` restricted to `[begin, end]`, or `None` if nothing
/// in that level overlaps the range
pub(crate) fn compact_range(
    versions: &mut VersionSet,
    level: usize,
    begin: Option<&InternalKey>,
    end: Option<&InternalKey>,
) -> Option<Compaction> {
    let current = versions.current();
    let mut inputs = current.get_overlapping_inputs(level, begin, end);
    if inputs.is_empty() {
        return None;
    }

    let options = Arc::clone(versions.options());

    // Bound a single manual compaction of a sorted level; level 0 must take
    // every overlapping file to keep newer entries above older ones
    if level > 0 {
        let limit = options.max_file_size;
        let mut total = 0;
        for i in 0..inputs.len() {
            total += inputs[i].file_size;
            if total >= limit {
                inputs.truncate(i + 1);
                break;
            }
        }
    }

    let mut c = Compaction::new(
        level,
        current,
        options.max_file_size,
        options.max_grandparent_overlap_bytes(),
    );
    c.inputs[0] = inputs;
    setup_other_inputs(versions, &mut c);
    Some(c)
}

fn setup_other_inputs(versions: &mut VersionSet, c: &mut Compaction) {
    let level = c.level();
    let icmp = versions.icmp().clone();
    let version = Arc::clone(&c.input_version);
    let options = Arc::clone(versions.options());

    add_boundary_inputs(&icmp, version.files(level), &mut c.inputs[0]);
    let (smallest, largest) = get_range(&icmp, &c.inputs[0]);

    c.inputs[1] = version.get_overlapping_inputs(level + 1, Some(&smallest), Some(&largest));
    add_boundary_inputs(&icmp, version.files(level + 1), &mut c.inputs[1]);

    let (mut all_start, mut all_limit) = get_range2(&icmp, &c.inputs[0], &c.inputs[1]);
    let mut largest = largest;

    // Grow the level inputs if that does not pull in more level+1 files
    if !c.inputs[1].is_empty() {
        let mut expanded0 = version.get_overlapping_inputs(level, Some(&all_start), Some(&all_limit));
        add_boundary_inputs(&icmp, version.files(level), &mut expanded0);
        let inputs1_size = total_file_size(&c.inputs[1]);
        let expanded0_size = total_file_size(&expanded0);
        if expanded0.len() > c.inputs[0].len()
            && inputs1_size + expanded0_size < options.expanded_compaction_byte_limit()
        {
            let (new_start, new_limit) = get_range(&icmp, &expanded0);
            let mut expanded1 =
                version.get_overlapping_inputs(level + 1, Some(&new_start), Some(&new_limit));
            add_boundary_inputs(&icmp, version.files(level + 1), &mut expanded1);
            if expanded1.len() == c.inputs[1].len() {
                tracing::debug!(
                    level,
                    from = c.inputs[0].len(),
                    to = expanded0.len(),
                    "Expanding compaction inputs"
                );
                largest = new_limit;
                c.inputs[0] = expanded0;
                c.inputs[1] = expanded1;
                (all_start, all_limit) = get_range2(&icmp, &c.inputs[0], &c.inputs[1]);
            }
        }
    }

    if level + 2 < NUM_LEVELS {
        c.grandparents = version.get_overlapping_inputs(level + 2, Some(&all_start), Some(&all_limit));
    }

    // The next compaction of this level starts after this one, even if this
    // one fails
    versions.compact_pointer[level] = largest.clone();
    c.edit.set_compact_pointer(level, largest);
}

/// Smallest and largest internal keys across `files`
fn get_range(icmp: &InternalKeyComparator, files: &[Arc<FileMetaData>]) -> (InternalKey, InternalKey) {
    let mut smallest: Option<&InternalKey> = None;
    let mut largest: Option<&InternalKey> = None;
    for f in files {
        if smallest.map_or(true, |s| icmp.compare(f.smallest.encode(), s.encode()) == Ordering::Less) {
            smallest = Some(&f.smallest);
        }
        if largest.map_or(true, |l| icmp.compare(f.largest.encode(), l.encode()) == Ordering::Greater) {
            largest = Some(&f.largest);
        }
    }
    (
        smallest.cloned().unwrap_or_default(),
        largest.cloned().unwrap_or_default(),
    )
}

fn get_range2(
    icmp: &InternalKeyComparator,
    a: &[Arc<FileMetaData>],
    b: &[Arc<FileMetaData>],
) -> (InternalKey, InternalKey) {
    let all: Vec<Arc<FileMetaData>> = a.iter().chain(b.iter()).cloned().collect();
    get_range(icmp, &all)
}

/// Pull in files of the same level whose smallest key shares a user key with
/// the largest key already in `compaction_files`.
///
/// Otherwise an older version of a user key could stay behind in `level`
/// while a newer one moves down, and reads would find the older one first.
pub(crate) fn add_boundary_inputs(
    icmp: &InternalKeyComparator,
    level_files: &[Arc<FileMetaData>],
    compaction_files: &mut Vec<Arc<FileMetaData>>,
) {
    if compaction_files.is_empty() {
        return;
    }
    let (_, mut largest_key) = get_range(icmp, compaction_files);

    loop {
        let ucmp = icmp.user_comparator();
        let boundary = level_files
            .iter()
            .filter(|f| {
                icmp.compare(f.smallest.encode(), largest_key.encode()) == Ordering::Greater
                    && ucmp.compare(f.smallest.user_key(), largest_key.user_key()) == Ordering::Equal
            })
            .min_by(|a, b| icmp.compare(a.smallest.encode(), b.smallest.encode()));

        match boundary {
            Some(f) => {
                largest_key = f.largest.clone();
                compaction_files.push(Arc::clone(f));
            }
            None => break,
        }
    }
}
