//! Tasfw Engine -- transactional script execution over a savestate-capable
//! simulation.
//!
//! This crate builds on [`tasfw_resource`] to provide the search driver: a
//! [`Session`](session::Session) owns one [`Game`](tasfw_resource::game::Game)
//! and a strictly nested stack of script invocations. Each invocation
//! accumulates a [`Diff`](diff::Diff) of the inputs it changed and a
//! [`SaveBank`](save_bank::SaveBank) of snapshots it chose to keep; the
//! composition verbs decide whether a child's diff and end state are
//! committed, discarded, or left live for comparison.
//!
//! # Quick Start
//!
//! ```
//! use tasfw_engine::prelude::*;
//! use tasfw_resource::prelude::*;
//!
//! let resource = MemoryResource::builder(16 * PAGE_SIZE)
//!     .symbol("gGlobalTimer", 0x0)
//!     .symbol("gControllerPads", 0x10)
//!     .frame_counter("gGlobalTimer")
//!     .build()
//!     .unwrap();
//! let game = Game::new(resource, &Layout::default()).unwrap();
//! let mut session = Session::new(game, Diff::new());
//!
//! let status = session.modify(HoldInputs::new(Inputs::stick(0, 64), 3)).unwrap();
//! assert!(status.asserted());
//! assert_eq!(session.diff().len(), 3);
//! assert_eq!(session.current_frame(), 3);
//! ```

#![deny(unsafe_code)]

pub mod diff;
pub mod inputs;
pub mod probe;
pub mod quantizer;
pub mod recording;
pub mod replay;
pub mod save_bank;
pub mod script;
pub mod scripts;
pub mod session;
pub mod status;

use tasfw_resource::ResourceError;

use crate::recording::RecordingError;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Fatal errors that terminate a session.
///
/// Expected failures (a precondition that does not hold, an execution that
/// gives up, a postcondition that is not met) are never errors: they are
/// reported through an unasserted [`Status`](status::Status).
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The simulation failed.
    #[error(transparent)]
    Resource(#[from] ResourceError),

    /// A frame before the session's base snapshot was requested.
    #[error("frame {frame} is before the base snapshot at frame {base}")]
    BeforeBase {
        /// The requested frame.
        frame: u32,
        /// Frame of the base snapshot.
        base: u32,
    },

    /// Reading or writing the recording failed.
    #[error(transparent)]
    Recording(#[from] RecordingError),

    /// A script reported a fault it cannot express as an unasserted status.
    #[error("script '{script}' failed: {message}")]
    Script {
        /// Name of the failing script.
        script: &'static str,
        /// Description of the fault.
        message: String,
    },
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::diff::Diff;
    pub use crate::inputs::{buttons, Inputs};
    pub use crate::probe::{Goal, Objective, Probe, ValueKind};
    pub use crate::quantizer::{intended_yaw, quantize, StickChoice, StickQuery, TieBreak};
    pub use crate::recording::{Recording, RecordingError};
    pub use crate::replay::{ReplayDivergence, ReplayReport};
    pub use crate::save_bank::{SaveBank, SavePolicy};
    pub use crate::script::Script;
    pub use crate::scripts::{
        FaceYaw, FaceYawStatus, GreedySearch, HoldInputs, ProbeStatus, ProbeStep, SearchStatus,
    };
    pub use crate::session::Session;
    pub use crate::status::{BaseStatus, Counters, FailureKind, InvocationState, Status};
    pub use crate::EngineError;
}
