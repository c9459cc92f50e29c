//! Sparse frame -> input maps.
//!
//! A [`Diff`] holds only the frames an invocation changed. Diffs compose by
//! straight key-wise overlay: entries of the later diff replace entries of the
//! earlier one at the same frame, every other entry is kept. Overlaying the
//! same diff twice is the same as overlaying it once.

use std::collections::btree_map;
use std::collections::BTreeMap;

use crate::inputs::Inputs;

/// Ordered frame -> [`Inputs`] overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diff {
    frames: BTreeMap<u32, Inputs>,
}

impl Diff {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the inputs of `frame`, returning the previous entry.
    pub fn insert(&mut self, frame: u32, inputs: Inputs) -> Option<Inputs> {
        self.frames.insert(frame, inputs)
    }

    /// Drop the entry of `frame`, returning it.
    pub fn remove(&mut self, frame: u32) -> Option<Inputs> {
        self.frames.remove(&frame)
    }

    pub fn get(&self, frame: u32) -> Option<Inputs> {
        self.frames.get(&frame).copied()
    }

    pub fn contains(&self, frame: u32) -> bool {
        self.frames.contains_key(&frame)
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Earliest frame with an entry.
    pub fn first_frame(&self) -> Option<u32> {
        self.frames.keys().next().copied()
    }

    /// Latest frame with an entry.
    pub fn last_frame(&self) -> Option<u32> {
        self.frames.keys().next_back().copied()
    }

    /// Entries in frame order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, Inputs)> + '_ {
        self.frames.iter().map(|(&frame, &inputs)| (frame, inputs))
    }

    /// Write every entry of `other` over this diff.
    pub fn overlay(&mut self, other: &Diff) {
        self.frames
            .extend(other.frames.iter().map(|(&frame, &inputs)| (frame, inputs)));
    }

    /// `self` with `other` overlaid on top.
    pub fn overlaid(&self, other: &Diff) -> Diff {
        let mut merged = self.clone();
        merged.overlay(other);
        merged
    }
}

impl FromIterator<(u32, Inputs)> for Diff {
    fn from_iter<I: IntoIterator<Item = (u32, Inputs)>>(iter: I) -> Self {
        Self {
            frames: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for Diff {
    type Item = (u32, Inputs);
    type IntoIter = btree_map::IntoIter<u32, Inputs>;

    fn into_iter(self) -> Self::IntoIter {
        self.frames.into_iter()
    }
}
