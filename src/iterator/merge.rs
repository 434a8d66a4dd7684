//! Merging iterator
//!
//! Merges N sorted children into one sorted stream. Duplicates are NOT
//! removed: equal internal keys cannot occur across sources, and versions of
//! the same user key come out newest first because the internal key order
//! already puts higher sequences first.
//!
//! Children are scanned linearly to find the smallest (or largest) key.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::comparator::Comparator;
use crate::error::Result;

use super::InternalIterator;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Forward,
    Reverse,
}

pub struct MergingIterator {
    cmp: Arc<dyn Comparator>,
    children: Vec<Box<dyn InternalIterator>>,
    current: Option<usize>,
    direction: Direction,
}

impl MergingIterator {
    pub fn new(cmp: Arc<dyn Comparator>, children: Vec<Box<dyn InternalIterator>>) -> Self {
        Self {
            cmp,
            children,
            current: None,
            direction: Direction::Forward,
        }
    }

    fn find_smallest(&mut self) {
        let mut smallest: Option<usize> = None;
        for (i, child) in self.children.iter().enumerate() {
            if !child.valid() {
                continue;
            }
            smallest = match smallest {
                Some(s) if self.cmp.compare(child.key(), self.children[s].key()) != Ordering::Less => Some(s),
                _ => Some(i),
            };
        }
        self.current = smallest;
    }

    fn find_largest(&mut self) {
        let mut largest: Option<usize> = None;
        for (i, child) in self.children.iter().enumerate().rev() {
            if !child.valid() {
                continue;
            }
            largest = match largest {
                Some(l) if self.cmp.compare(child.key(), self.children[l].key()) != Ordering::Greater => Some(l),
                _ => Some(i),
            };
        }
        self.current = largest;
    }
}

impl InternalIterator for MergingIterator {
    fn valid(&self) -> bool {
        self.current.is_some()
    }

    fn seek_to_first(&mut self) -> Result<()> {
        for child in self.children.iter_mut() {
            child.seek_to_first()?;
        }
        self.find_smallest();
        self.direction = Direction::Forward;
        Ok(())
    }

    fn seek_to_last(&mut self) -> Result<()> {
        for child in self.children.iter_mut() {
            child.seek_to_last()?;
        }
        self.find_largest();
        self.direction = Direction::Reverse;
        Ok(())
    }

    fn seek(&mut self, target: &[u8]) -> Result<()> {
        for child in self.children.iter_mut() {
            child.seek(target)?;
        }
        self.find_smallest();
        self.direction = Direction::Forward;
        Ok(())
    }

    fn next(&mut self) -> Result<()> {
        let Some(current) = self.current else {
            return Ok(());
        };

        // After moving backward, every non-current child sits before key().
        // Reposition them at the first entry after key().
        if self.direction != Direction::Forward {
            let key = self.children[current].key().to_vec();
            for (i, child) in self.children.iter_mut().enumerate() {
                if i == current {
                    continue;
                }
                child.seek(&key)?;
                if child.valid() && self.cmp.compare(&key, child.key()) == Ordering::Equal {
                    child.next()?;
                }
            }
            self.direction = Direction::Forward;
        }

        self.children[current].next()?;
        self.find_smallest();
        Ok(())
    }

    fn prev(&mut self) -> Result<()> {
        let Some(current) = self.current else {
            return Ok(());
        };

        // After moving forward, every non-current child sits after key().
        // Reposition them at the last entry before key().
        if self.direction != Direction::Reverse {
            let key = self.children[current].key().to_vec();
            for (i, child) in self.children.iter_mut().enumerate() {
                if i == current {
                    continue;
                }
                child.seek(&key)?;
                if child.valid() {
                    child.prev()?;
                } else {
                    // Every entry is before key()
                    child.seek_to_last()?;
                }
            }
            self.direction = Direction::Reverse;
        }

        self.children[current].prev()?;
        self.find_largest();
        Ok(())
    }

    fn key(&self) -> &[u8] {
        match self.current {
            Some(i) => self.children[i].key(),
            None => &[],
        }
    }

    fn value(&self) -> &[u8] {
        match self.current {
            Some(i) => self.children[i].value(),
            None => &[],
        }
    }
}
