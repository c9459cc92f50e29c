//! Explicit frame -> snapshot saves.
//!
//! A [`SaveBank`] belongs to one invocation. Entries are only ever added by a
//! save call; a later save at the same frame supersedes the earlier one. A
//! save at frame `F` holds the state at the *start* of `F`, before the inputs
//! of `F` are applied, so it stays valid as long as no input before `F`
//! changes.
//!
//! Removed snapshots are handed back to the caller so their storage can be
//! returned to the [`Game`](tasfw_resource::game::Game) that made them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tasfw_resource::snapshot::Snapshot;

// ---------------------------------------------------------------------------
// SaveBank
// ---------------------------------------------------------------------------

/// Ordered frame -> [`Snapshot`] map.
#[derive(Debug, Default)]
pub struct SaveBank {
    saves: BTreeMap<u32, Snapshot>,
}

impl SaveBank {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `snapshot` at `frame`, returning the superseded save.
    pub fn insert(&mut self, frame: u32, snapshot: Snapshot) -> Option<Snapshot> {
        self.saves.insert(frame, snapshot)
    }

    pub fn get(&self, frame: u32) -> Option<&Snapshot> {
        self.saves.get(&frame)
    }

    /// The latest save at or before `frame`.
    pub fn latest_at_or_before(&self, frame: u32) -> Option<(u32, &Snapshot)> {
        self.saves
            .range(..=frame)
            .next_back()
            .map(|(&f, snapshot)| (f, snapshot))
    }

    /// Remove every save after `frame`.
    pub fn invalidate_after(&mut self, frame: u32) -> Vec<Snapshot> {
        match frame.checked_add(1) {
            Some(next) => self.saves.split_off(&next).into_values().collect(),
            None => Vec::new(),
        }
    }

    /// Saved frames in order.
    pub fn frames(&self) -> impl Iterator<Item = u32> + '_ {
        self.saves.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.saves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.saves.is_empty()
    }
}

impl IntoIterator for SaveBank {
    type Item = (u32, Snapshot);
    type IntoIter = std::collections::btree_map::IntoIter<u32, Snapshot>;

    fn into_iter(self) -> Self::IntoIter {
        self.saves.into_iter()
    }
}

// ---------------------------------------------------------------------------
// SavePolicy
// ---------------------------------------------------------------------------

/// When [`Session::optional_save`](crate::session::Session::optional_save)
/// actually saves.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SavePolicy {
    /// Every call saves.
    Always,
    /// No call saves.
    Never,
    /// Save on frames that are a multiple of `n`.
    Every(u32),
    /// Save when replaying from the latest valid save is estimated to cost
    /// more than capturing and later restoring a new one.
    #[default]
    Adaptive,
}
