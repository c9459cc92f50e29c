//! Tasfw Resource -- live simulation memory, symbol lookup, and savestates.
//!
//! This crate owns the boundary to an opaque, byte-addressable simulation.
//! A [`Resource`] is anything that exposes a block of mutable memory, a symbol
//! table resolved once at load time, and a single-step `advance()` primitive.
//! [`Game`](game::Game) wraps a resource together with the snapshot strategy
//! chosen for it, and is the handle the script engine passes down its
//! invocation stack.
//!
//! # Quick Start
//!
//! ```
//! use tasfw_resource::prelude::*;
//!
//! let resource = MemoryResource::builder(64 * 1024)
//!     .symbol("gGlobalTimer", 0x0)
//!     .symbol("gControllerPads", 0x10)
//!     .frame_counter("gGlobalTimer")
//!     .build()
//!     .unwrap();
//! let mut game = Game::new(resource, &Layout::default()).unwrap();
//!
//! let start = game.capture();
//! game.advance().unwrap();
//! game.advance().unwrap();
//! assert_eq!(game.current_frame(), 2);
//!
//! game.restore(&start);
//! assert_eq!(game.current_frame(), 0);
//! ```

#![deny(unsafe_code)]

pub mod game;
pub mod memory;
pub mod snapshot;

use std::ops::Range;

use crate::snapshot::SnapshotMode;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced at the resource boundary.
///
/// Every variant is fatal for the session that owns the resource: the
/// framework never attempts to resume a resource after one of these.
#[derive(Debug, thiserror::Error)]
pub enum ResourceError {
    /// A symbol was requested that the simulation module does not export.
    #[error("symbol '{name}' is not exported by the simulation module")]
    UnknownSymbol {
        /// The requested symbol name.
        name: String,
    },

    /// A memory access fell outside the resource's memory.
    #[error("access of {len} bytes at {addr:#x} is outside simulation memory ({size} bytes)")]
    OutOfBounds {
        /// Start address of the access.
        addr: usize,
        /// Length of the access in bytes.
        len: usize,
        /// Size of the resource memory.
        size: usize,
    },

    /// The simulation changed the size of its memory after load, so earlier
    /// snapshots can no longer be restored exactly.
    #[error("simulation memory changed size from {expected} to {actual} bytes")]
    ExtentChanged {
        /// Memory size recorded at load.
        expected: usize,
        /// Memory size observed after the last advance.
        actual: usize,
    },

    /// A step left the frame counter somewhere other than one past where it
    /// started.
    #[error("frame counter read {actual} after advancing from {before}")]
    FrameCounterStalled {
        /// Counter value before the step.
        before: u32,
        /// Counter value after the step.
        actual: u32,
    },

    /// The frame counter lies outside every tracked segment, so restoring a
    /// snapshot would not restore it.
    #[error("frame counter at {addr:#x} is not in tracked memory")]
    UntrackedFrameCounter {
        /// Address of the counter.
        addr: usize,
    },

    /// The simulation module failed while stepping.
    #[error("simulation module crashed: {0}")]
    Crashed(String),

    /// The simulation module could not be loaded or instantiated.
    #[error("failed to load simulation module: {0}")]
    Load(String),
}

// ---------------------------------------------------------------------------
// Resource trait
// ---------------------------------------------------------------------------

/// A loaded simulation whose entire mutable state lives in one byte buffer.
///
/// Addresses returned by [`addr`](Resource::addr) are offsets into
/// [`memory`](Resource::memory). Implementations resolve their symbol table
/// once when loading and answer lookups from that cache.
pub trait Resource {
    /// Resolve a named symbol to its address in [`memory`](Resource::memory).
    fn addr(&self, symbol: &str) -> Result<usize, ResourceError>;

    /// Read-only view of the simulation memory.
    fn memory(&self) -> &[u8];

    /// Mutable view of the simulation memory.
    fn memory_mut(&mut self) -> &mut [u8];

    /// Step the simulation by exactly one frame.
    fn advance(&mut self) -> Result<(), ResourceError>;

    /// Address ranges that make up the mutable state. Defaults to the whole
    /// memory.
    fn tracked_segments(&self) -> Vec<Range<usize>> {
        vec![0..self.memory().len()]
    }

    /// The snapshot strategy this kind of resource should use.
    ///
    /// Resources that cannot cheaply compare pages (native modules on
    /// Windows, in practice) prefer full-buffer snapshots.
    fn snapshot_mode(&self) -> SnapshotMode {
        if cfg!(windows) {
            SnapshotMode::FullBuffer
        } else {
            SnapshotMode::PageDiff
        }
    }
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::game::{Game, GameStats, Layout};
    pub use crate::memory::{MemoryResource, MemoryResourceBuilder, StepFn, SymbolTable};
    pub use crate::snapshot::{Snapshot, SnapshotMode, PAGE_SIZE};
    pub use crate::{Resource, ResourceError};
}
