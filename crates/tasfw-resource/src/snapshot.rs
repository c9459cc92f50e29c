//! Savestate capture and restore over raw simulation memory.
//!
//! Two strategies implement [`SnapshotStrategy`]:
//!
//! - [`PageDiffStrategy`] keeps a baseline copy of the tracked memory taken
//!   when the resource was opened. A capture stores only the pages that
//!   differ from that baseline; a restore writes those pages back and resets
//!   every other page that has drifted from the baseline.
//! - [`FullBufferStrategy`] copies the whole tracked extent on every capture.
//!   Buffers come from a pool of two pre-allocated buffers and go back into
//!   it when a snapshot is released, so steady-state saving alternates
//!   between them without allocating.
//!
//! Every [`Snapshot`] owns its data: capturing again never invalidates an
//! earlier snapshot, and any snapshot can be restored any number of times.
//!
//! The strategy is picked once per [`Game`](crate::game::Game) from
//! [`SnapshotMode`]; callers only ever see `capture` / `restore`.

use std::collections::BTreeMap;
use std::ops::Range;

use serde::{Deserialize, Serialize};

/// Granularity of page-diff snapshots, in bytes.
pub const PAGE_SIZE: usize = 4096;

/// Number of buffers the full-buffer pool pre-allocates.
const FULL_BUFFER_POOL: usize = 2;

// ---------------------------------------------------------------------------
// SnapshotMode
// ---------------------------------------------------------------------------

/// Which snapshot strategy a resource uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SnapshotMode {
    /// Store only pages that differ from the load-time baseline.
    PageDiff,
    /// Copy the whole tracked extent into a pooled buffer.
    FullBuffer,
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Captured memory contents, in the representation of the strategy that
/// produced them.
#[derive(Debug, Clone)]
pub(crate) enum SnapshotData {
    /// Page start address -> page contents, for pages that differ from the
    /// baseline.
    Pages(BTreeMap<usize, Box<[u8]>>),
    /// All tracked segments, concatenated in order.
    Full(Vec<u8>),
}

/// An opaque, immutable capture of a resource's tracked memory.
///
/// Snapshots are bound to the [`Game`](crate::game::Game) that captured them.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub(crate) owner: u64,
    pub(crate) frame: u32,
    pub(crate) generation: u64,
    pub(crate) data: SnapshotData,
}

impl Snapshot {
    /// The frame counter value at capture time.
    pub fn frame(&self) -> u32 {
        self.frame
    }

    /// Capture generation of the strategy that produced this snapshot.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Bytes of memory content held by this snapshot.
    pub fn size_bytes(&self) -> usize {
        match &self.data {
            SnapshotData::Pages(pages) => pages.values().map(|p| p.len()).sum(),
            SnapshotData::Full(buf) => buf.len(),
        }
    }

    /// Number of stored pages (page-diff) or `1` for a full buffer.
    pub fn region_count(&self) -> usize {
        match &self.data {
            SnapshotData::Pages(pages) => pages.len(),
            SnapshotData::Full(_) => 1,
        }
    }
}

// ---------------------------------------------------------------------------
// SnapshotStrategy
// ---------------------------------------------------------------------------

/// One way of capturing and restoring tracked memory.
pub(crate) trait SnapshotStrategy {
    /// Which mode this strategy implements.
    fn mode(&self) -> SnapshotMode;

    /// Capture the tracked segments of `memory`.
    fn capture(&mut self, memory: &[u8], segments: &[Range<usize>]) -> SnapshotData;

    /// Write `data` back over the tracked segments of `memory`.
    fn restore(&mut self, memory: &mut [u8], segments: &[Range<usize>], data: &SnapshotData);

    /// Take back the storage of a snapshot that is no longer referenced.
    fn recycle(&mut self, data: SnapshotData) {
        drop(data);
    }

    /// Number of captures taken so far.
    fn generation(&self) -> u64;
}

/// Build the strategy for `mode` over the current contents of `memory`.
pub(crate) fn strategy_for(
    mode: SnapshotMode,
    memory: &[u8],
    segments: &[Range<usize>],
) -> Box<dyn SnapshotStrategy> {
    match mode {
        SnapshotMode::PageDiff => Box::new(PageDiffStrategy::new(memory)),
        SnapshotMode::FullBuffer => {
            let extent = segments.iter().map(|s| s.len()).sum();
            Box::new(FullBufferStrategy::new(extent))
        }
    }
}

/// Split the tracked segments into page-sized ranges. The last page of a
/// segment may be shorter than [`PAGE_SIZE`].
fn pages(segments: &[Range<usize>]) -> impl Iterator<Item = Range<usize>> + '_ {
    segments.iter().flat_map(|segment| {
        segment
            .clone()
            .step_by(PAGE_SIZE)
            .map(move |start| start..(start + PAGE_SIZE).min(segment.end))
    })
}

// ---------------------------------------------------------------------------
// PageDiffStrategy
// ---------------------------------------------------------------------------

/// Page-granularity copy-on-write diffing against a load-time baseline.
pub(crate) struct PageDiffStrategy {
    baseline: Vec<u8>,
    generation: u64,
    /// Pages that differed from the baseline at the last capture or restore.
    regions_at_last_sync: usize,
}

impl PageDiffStrategy {
    pub(crate) fn new(memory: &[u8]) -> Self {
        Self {
            baseline: memory.to_vec(),
            generation: 0,
            regions_at_last_sync: 0,
        }
    }
}

impl SnapshotStrategy for PageDiffStrategy {
    fn mode(&self) -> SnapshotMode {
        SnapshotMode::PageDiff
    }

    fn capture(&mut self, memory: &[u8], segments: &[Range<usize>]) -> SnapshotData {
        let mut changed = BTreeMap::new();
        for page in pages(segments) {
            let current = &memory[page.clone()];
            if current != &self.baseline[page.clone()] {
                changed.insert(page.start, Box::<[u8]>::from(current));
            }
        }
        self.generation += 1;
        self.regions_at_last_sync = changed.len();
        tracing::trace!(
            generation = self.generation,
            pages = changed.len(),
            "page-diff capture"
        );
        SnapshotData::Pages(changed)
    }

    fn restore(&mut self, memory: &mut [u8], segments: &[Range<usize>], data: &SnapshotData) {
        match data {
            SnapshotData::Pages(changed) => {
                tracing::trace!(
                    stored = changed.len(),
                    previously_dirty = self.regions_at_last_sync,
                    "page-diff restore"
                );
                for page in pages(segments) {
                    let current = &mut memory[page.clone()];
                    match changed.get(&page.start) {
                        Some(stored) => current.copy_from_slice(stored),
                        None => {
                            let original = &self.baseline[page];
                            if current != original {
                                current.copy_from_slice(original);
                            }
                        }
                    }
                }
                self.regions_at_last_sync = changed.len();
            }
            SnapshotData::Full(_) => unreachable!("a game only restores snapshots it captured"),
        }
    }

    fn generation(&self) -> u64 {
        self.generation
    }
}

// ---------------------------------------------------------------------------
// FullBufferStrategy
// ---------------------------------------------------------------------------

/// Whole-extent copies backed by a small pool of reusable buffers.
pub(crate) struct FullBufferStrategy {
    pool: Vec<Vec<u8>>,
    extent: usize,
    generation: u64,
}

impl FullBufferStrategy {
    pub(crate) fn new(extent: usize) -> Self {
        let pool = (0..FULL_BUFFER_POOL)
            .map(|_| Vec::with_capacity(extent))
            .collect();
        Self {
            pool,
            extent,
            generation: 0,
        }
    }

    /// Buffers currently available for reuse.
    #[cfg(test)]
    pub(crate) fn available(&self) -> usize {
        self.pool.len()
    }
}

impl SnapshotStrategy for FullBufferStrategy {
    fn mode(&self) -> SnapshotMode {
        SnapshotMode::FullBuffer
    }

    fn capture(&mut self, memory: &[u8], segments: &[Range<usize>]) -> SnapshotData {
        let mut buf = self.pool.pop().unwrap_or_else(|| {
            tracing::trace!(extent = self.extent, "snapshot buffer pool empty, allocating");
            Vec::with_capacity(self.extent)
        });
        buf.clear();
        for segment in segments {
            buf.extend_from_slice(&memory[segment.clone()]);
        }
        self.generation += 1;
        SnapshotData::Full(buf)
    }

    fn restore(&mut self, memory: &mut [u8], segments: &[Range<usize>], data: &SnapshotData) {
        match data {
            SnapshotData::Full(buf) => restore_full(memory, segments, buf),
            SnapshotData::Pages(_) => unreachable!("a game only restores snapshots it captured"),
        }
    }

    fn recycle(&mut self, data: SnapshotData) {
        if let SnapshotData::Full(buf) = data {
            if self.pool.len() < FULL_BUFFER_POOL && buf.capacity() <= self.extent * 2 {
                self.pool.push(buf);
            }
        }
    }

    fn generation(&self) -> u64 {
        self.generation
    }
}

fn restore_full(memory: &mut [u8], segments: &[Range<usize>], buf: &[u8]) {
    let mut offset = 0;
    for segment in segments {
        let len = segment.len();
        memory[segment.clone()].copy_from_slice(&buf[offset..offset + len]);
        offset += len;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
