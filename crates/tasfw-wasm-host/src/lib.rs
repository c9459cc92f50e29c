//! Tasfw WASM Host -- Wasmtime hosting for simulation modules.
//!
//! A simulation module is a WASM module that keeps its entire mutable state in
//! its exported linear memory. The host resolves the module's exported `i32`
//! globals as named symbols, steps it through an exported advance function
//! under a fuel budget, and exposes it as a
//! [`Resource`](tasfw_resource::Resource) so the snapshot engine can capture
//! and restore it.
//!
//! # Sandbox Guarantees
//!
//! - No imports: the module cannot reach the filesystem, clock or network,
//!   so every advance is a pure function of memory.
//! - Fuel metering turns runaway frames into [`WasmError::OutOfFuel`].
//! - Memory is capped at [`WasmConfig::memory_limit_bytes`].
//!
//! # Example
//!
//! ```no_run
//! use tasfw_resource::Resource;
//! use tasfw_wasm_host::{WasmConfig, WasmSimulation};
//!
//! let wat = r#"(module
//!     (memory (export "memory") 1)
//!     (global (export "gGlobalTimer") i32 (i32.const 0))
//!     (func (export "advance")))"#;
//! let mut sim = WasmSimulation::from_bytes(&WasmConfig::default(), wat.as_bytes()).unwrap();
//! assert_eq!(sim.addr("gGlobalTimer").unwrap(), 0);
//! sim.advance().unwrap();
//! ```

#![deny(unsafe_code)]

mod module;

use std::path::PathBuf;

use tasfw_resource::ResourceError;

pub use module::{WasmConfig, WasmSimulation, MEMORY_EXPORT};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced while loading or stepping a simulation module.
#[derive(Debug, thiserror::Error)]
pub enum WasmError {
    /// The module file could not be read.
    #[error("failed to read simulation module {}: {source}", path.display())]
    Read {
        /// Path that was read.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The WASM binary could not be compiled (invalid bytecode or WAT syntax).
    #[error("WASM compilation failed: {0}")]
    CompileError(String),

    /// The module does not export something the host requires.
    #[error("missing required export '{name}'")]
    MissingExport {
        /// The name of the missing export.
        name: String,
    },

    /// A frame exhausted its fuel budget.
    #[error("simulation ran out of fuel (budget: {budget} units) in a single advance")]
    OutOfFuel {
        /// The fuel budget that was exceeded.
        budget: u64,
    },

    /// A WASM trap occurred during execution.
    #[error("WASM trap: {0}")]
    Trap(String),

    /// A general runtime error from the Wasmtime engine.
    #[error("WASM runtime error: {0}")]
    Runtime(String),
}

impl From<WasmError> for ResourceError {
    fn from(err: WasmError) -> Self {
        match err {
            WasmError::OutOfFuel { .. } | WasmError::Trap(_) => {
                ResourceError::Crashed(err.to_string())
            }
            WasmError::Read { .. } | WasmError::CompileError(_) | WasmError::MissingExport { .. } => {
                ResourceError::Load(err.to_string())
            }
            WasmError::Runtime(_) => ResourceError::Crashed(err.to_string()),
        }
    }
}

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::{WasmConfig, WasmError, WasmSimulation};
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
