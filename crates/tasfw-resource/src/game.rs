//! The owned handle to one loaded simulation.
//!
//! [`Game`] bundles a [`Resource`] with:
//!
//! - the snapshot strategy selected for it at construction,
//! - the addresses of the frame counter and controller symbols, resolved once,
//! - timing statistics used by save heuristics.
//!
//! # Usage
//!
//! ```
//! use tasfw_resource::prelude::*;
//!
//! let resource = MemoryResource::builder(8 * PAGE_SIZE)
//!     .symbol("gGlobalTimer", 0x0)
//!     .symbol("gControllerPads", 0x10)
//!     .frame_counter("gGlobalTimer")
//!     .build()
//!     .unwrap();
//! let mut game = Game::new(resource, &Layout::default()).unwrap();
//!
//! game.advance().unwrap();
//! let snapshot = game.capture();
//! let hash = game.state_hash();
//!
//! game.advance().unwrap();
//! assert_ne!(game.state_hash(), hash);
//!
//! game.restore(&snapshot);
//! assert_eq!(game.state_hash(), hash);
//! assert_eq!(game.current_frame(), 1);
//! ```

use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use bytemuck::Pod;
use serde::{Deserialize, Serialize};

use crate::snapshot::{strategy_for, Snapshot, SnapshotMode, SnapshotStrategy};
use crate::{Resource, ResourceError};

/// Source of unique ids binding snapshots to the game that captured them.
static NEXT_GAME_ID: AtomicU64 = AtomicU64::new(1);

// ---------------------------------------------------------------------------
// Layout
// ---------------------------------------------------------------------------

/// Names of the symbols the framework itself needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Layout {
    /// `u32` incremented once per frame by the simulation.
    pub frame_counter: String,
    /// Controller pad the framework writes inputs into before each frame.
    pub controller: String,
}

impl Default for Layout {
    fn default() -> Self {
        Self {
            frame_counter: "gGlobalTimer".to_owned(),
            controller: "gControllerPads".to_owned(),
        }
    }
}

// ---------------------------------------------------------------------------
// GameStats
// ---------------------------------------------------------------------------

/// Cumulative counts and wall-clock cost of the expensive operations.
#[derive(Debug, Clone, Default)]
pub struct GameStats {
    /// Frames advanced.
    pub advances: u64,
    /// Snapshots captured.
    pub captures: u64,
    /// Snapshots restored.
    pub restores: u64,
    /// Total time spent advancing.
    pub advance_time: Duration,
    /// Total time spent capturing.
    pub capture_time: Duration,
    /// Total time spent restoring.
    pub restore_time: Duration,
}

impl GameStats {
    /// Mean time per advance, if any advance happened.
    pub fn mean_advance(&self) -> Option<Duration> {
        mean(self.advance_time, self.advances)
    }

    /// Mean time per capture, if any capture happened.
    pub fn mean_capture(&self) -> Option<Duration> {
        mean(self.capture_time, self.captures)
    }

    /// Mean time per restore, if any restore happened.
    pub fn mean_restore(&self) -> Option<Duration> {
        mean(self.restore_time, self.restores)
    }
}

fn mean(total: Duration, count: u64) -> Option<Duration> {
    let count = u32::try_from(count).ok().filter(|&c| c > 0)?;
    Some(total / count)
}

// ---------------------------------------------------------------------------
// Game
// ---------------------------------------------------------------------------

/// A loaded simulation plus its savestate machinery.
pub struct Game<R: Resource> {
    id: u64,
    resource: R,
    strategy: Box<dyn SnapshotStrategy>,
    segments: Vec<Range<usize>>,
    memory_len: usize,
    frame_addr: usize,
    controller_addr: usize,
    stats: GameStats,
}

impl<R: Resource> Game<R> {
    /// Wrap `resource` using the snapshot mode the resource prefers.
    ///
    /// # Errors
    ///
    /// As for [`with_mode`](Self::with_mode).
    pub fn new(resource: R, layout: &Layout) -> Result<Self, ResourceError> {
        let mode = resource.snapshot_mode();
        Self::with_mode(resource, layout, mode)
    }

    /// Wrap `resource` with an explicit snapshot mode.
    ///
    /// The page-diff baseline is the memory as it is right now.
    ///
    /// # Errors
    ///
    /// - A [`Layout`] symbol is missing or does not fit in memory.
    /// - [`ResourceError::UntrackedFrameCounter`] if the frame counter is not
    ///   wholly inside one tracked segment.
    pub fn with_mode(resource: R, layout: &Layout, mode: SnapshotMode) -> Result<Self, ResourceError> {
        let memory_len = resource.memory().len();
        let frame_addr = resource.addr(&layout.frame_counter)?;
        let controller_addr = resource.addr(&layout.controller)?;
        check_bounds(frame_addr, 4, memory_len)?;
        check_bounds(controller_addr, 4, memory_len)?;

        let segments = resource.tracked_segments();
        for segment in &segments {
            check_bounds(segment.start, segment.len(), memory_len)?;
        }
        if !segments
            .iter()
            .any(|s| s.start <= frame_addr && frame_addr + 4 <= s.end)
        {
            return Err(ResourceError::UntrackedFrameCounter { addr: frame_addr });
        }

        let strategy = strategy_for(mode, resource.memory(), &segments);
        tracing::debug!(
            ?mode,
            memory_len,
            segments = segments.len(),
            frame_addr,
            controller_addr,
            "game handle created"
        );

        Ok(Self {
            id: NEXT_GAME_ID.fetch_add(1, Ordering::Relaxed),
            resource,
            strategy,
            segments,
            memory_len,
            frame_addr,
            controller_addr,
            stats: GameStats::default(),
        })
    }

    // -- stepping -----------------------------------------------------------

    /// Advance the simulation by one frame.
    ///
    /// # Errors
    ///
    /// - Whatever the resource reports for a failed step.
    /// - [`ResourceError::ExtentChanged`] if the step resized the memory.
    /// - [`ResourceError::FrameCounterStalled`] if the frame counter did not
    ///   go up by exactly one.
    pub fn advance(&mut self) -> Result<(), ResourceError> {
        let start = Instant::now();
        let before = self.current_frame();
        self.resource.advance()?;
        let actual = self.resource.memory().len();
        if actual != self.memory_len {
            return Err(ResourceError::ExtentChanged {
                expected: self.memory_len,
                actual,
            });
        }
        let after = self.current_frame();
        if before.checked_add(1) != Some(after) {
            return Err(ResourceError::FrameCounterStalled {
                before,
                actual: after,
            });
        }
        self.stats.advances += 1;
        self.stats.advance_time += start.elapsed();
        Ok(())
    }

    /// The simulation's frame counter.
    pub fn current_frame(&self) -> u32 {
        let addr = self.frame_addr;
        bytemuck::pod_read_unaligned(&self.resource.memory()[addr..addr + 4])
    }

    // -- snapshots ----------------------------------------------------------

    /// Capture the tracked memory.
    pub fn capture(&mut self) -> Snapshot {
        let start = Instant::now();
        let frame = self.current_frame();
        let data = self.strategy.capture(self.resource.memory(), &self.segments);
        self.stats.captures += 1;
        self.stats.capture_time += start.elapsed();
        Snapshot {
            owner: self.id,
            frame,
            generation: self.strategy.generation(),
            data,
        }
    }

    /// Restore tracked memory (and with it the frame counter) to `snapshot`.
    ///
    /// # Panics
    ///
    /// Panics if `snapshot` was captured by a different `Game`.
    pub fn restore(&mut self, snapshot: &Snapshot) {
        assert_eq!(
            snapshot.owner, self.id,
            "snapshot was captured by a different game handle"
        );
        let start = Instant::now();
        self.strategy
            .restore(self.resource.memory_mut(), &self.segments, &snapshot.data);
        self.stats.restores += 1;
        self.stats.restore_time += start.elapsed();
        tracing::trace!(frame = snapshot.frame, "snapshot restored");
    }

    /// Hand a snapshot that is no longer needed back to the strategy so its
    /// storage can be reused.
    pub fn release(&mut self, snapshot: Snapshot) {
        if snapshot.owner == self.id {
            self.strategy.recycle(snapshot.data);
        }
    }

    /// The snapshot mode in use.
    pub fn snapshot_mode(&self) -> SnapshotMode {
        self.strategy.mode()
    }

    /// BLAKE3 hex digest of the tracked memory.
    pub fn state_hash(&self) -> String {
        let memory = self.resource.memory();
        let mut hasher = blake3::Hasher::new();
        for segment in &self.segments {
            hasher.update(&memory[segment.clone()]);
        }
        hasher.finalize().to_hex().to_string()
    }

    // -- memory access ------------------------------------------------------

    /// Resolve a symbol through the resource's cached table.
    pub fn addr(&self, symbol: &str) -> Result<usize, ResourceError> {
        self.resource.addr(symbol)
    }

    /// Address of the controller pad.
    pub fn controller_addr(&self) -> usize {
        self.controller_addr
    }

    /// Borrow `len` bytes at `addr`.
    pub fn read_bytes(&self, addr: usize, len: usize) -> Result<&[u8], ResourceError> {
        check_bounds(addr, len, self.memory_len)?;
        Ok(&self.resource.memory()[addr..addr + len])
    }

    /// Read a plain value at `addr` (native little-endian layout).
    pub fn read_value<T: Pod>(&self, addr: usize) -> Result<T, ResourceError> {
        let bytes = self.read_bytes(addr, std::mem::size_of::<T>())?;
        Ok(bytemuck::pod_read_unaligned(bytes))
    }

    /// Read a plain value at the address of `symbol` plus `offset`.
    pub fn read_symbol<T: Pod>(&self, symbol: &str, offset: usize) -> Result<T, ResourceError> {
        let base = self.addr(symbol)?;
        let addr = base.checked_add(offset).ok_or(ResourceError::OutOfBounds {
            addr: base,
            len: offset,
            size: self.memory_len,
        })?;
        self.read_value(addr)
    }

    /// Overwrite `bytes.len()` bytes at `addr`.
    pub fn write_bytes(&mut self, addr: usize, bytes: &[u8]) -> Result<(), ResourceError> {
        check_bounds(addr, bytes.len(), self.memory_len)?;
        self.resource.memory_mut()[addr..addr + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    /// Write a plain value at `addr`.
    pub fn write_value<T: Pod>(&mut self, addr: usize, value: T) -> Result<(), ResourceError> {
        self.write_bytes(addr, bytemuck::bytes_of(&value))
    }

    // -- accessors ----------------------------------------------------------

    /// The wrapped resource.
    pub fn resource(&self) -> &R {
        &self.resource
    }

    /// Mutable access to the wrapped resource.
    ///
    /// Writes made through this bypass nothing: they are part of the state
    /// the next capture sees.
    pub fn resource_mut(&mut self) -> &mut R {
        &mut self.resource
    }

    /// Timing statistics.
    pub fn stats(&self) -> &GameStats {
        &self.stats
    }

    /// Total bytes of tracked memory.
    pub fn tracked_len(&self) -> usize {
        self.segments.iter().map(|s| s.len()).sum()
    }

    /// Consume the handle and return the resource.
    pub fn into_resource(self) -> R {
        self.resource
    }
}

impl<R: Resource> std::fmt::Debug for Game<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Game")
            .field("id", &self.id)
            .field("mode", &self.strategy.mode())
            .field("memory_len", &self.memory_len)
            .field("frame", &self.current_frame())
            .finish_non_exhaustive()
    }
}

fn check_bounds(addr: usize, len: usize, size: usize) -> Result<(), ResourceError> {
    match addr.checked_add(len) {
        Some(end) if end <= size => Ok(()),
        _ => Err(ResourceError::OutOfBounds { addr, len, size }),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
