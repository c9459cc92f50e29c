//! Simulation module loading, symbol resolution, and stepping.
//!
//! [`WasmSimulation`] wraps a Wasmtime instance of a simulation module. The
//! module's exported linear memory named `memory` is the simulation state,
//! every exported `i32` global is a symbol whose value is an address into
//! that memory, and a no-argument export (default `advance`) steps the
//! simulation by one frame under a fuel budget.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tasfw_resource::{Resource, ResourceError};
use wasmtime::{
    Engine, ExternType, Instance, Linker, Memory, Module, Store, StoreLimits, StoreLimitsBuilder,
    TypedFunc, Val, ValType,
};

use crate::WasmError;

/// Name of the exported memory holding the simulation state.
pub const MEMORY_EXPORT: &str = "memory";

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Configuration for hosting a simulation module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WasmConfig {
    /// Fuel units granted per advance. Exhausting it is a crash.
    /// Default: 50,000,000.
    pub fuel_per_advance: u64,

    /// Export stepping the simulation by one frame. Default: `advance`.
    pub advance_export: String,

    /// Optional export called once after instantiation.
    pub init_export: Option<String>,

    /// Maximum linear memory the module may allocate, in bytes.
    /// Default: 256 MiB.
    pub memory_limit_bytes: usize,
}

impl Default for WasmConfig {
    fn default() -> Self {
        Self {
            fuel_per_advance: 50_000_000,
            advance_export: "advance".to_owned(),
            init_export: None,
            memory_limit_bytes: 256 * 1024 * 1024,
        }
    }
}

// ---------------------------------------------------------------------------
// WasmSimulation
// ---------------------------------------------------------------------------

/// A loaded simulation module.
///
/// Symbols are resolved once at load. Each [`advance`](Resource::advance)
/// resets the fuel budget, so the fuel a frame may burn does not depend on
/// earlier frames.
pub struct WasmSimulation {
    store: Store<StoreLimits>,
    instance: Instance,
    memory: Memory,
    advance: TypedFunc<(), ()>,
    symbols: HashMap<String, usize>,
    config: WasmConfig,
    last_fuel: u64,
}

impl WasmSimulation {
    /// Load a module (binary `.wasm` or text `.wat`) from disk.
    ///
    /// # Errors
    ///
    /// [`WasmError::Read`] if the file cannot be read, otherwise as
    /// [`from_bytes`](Self::from_bytes).
    pub fn from_file(config: &WasmConfig, path: &Path) -> Result<Self, WasmError> {
        let bytes = std::fs::read(path).map_err(|source| WasmError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::info!(path = %path.display(), bytes = bytes.len(), "loading simulation module");
        Self::from_bytes(config, &bytes)
    }

    /// Compile, validate and instantiate a module from raw bytes.
    ///
    /// # Validation
    ///
    /// - The module must compile and import nothing.
    /// - It must export a memory named `memory` and the configured advance
    ///   function with signature `() -> ()`.
    ///
    /// # Errors
    ///
    /// - [`WasmError::CompileError`] if the bytes are not valid WASM/WAT.
    /// - [`WasmError::MissingExport`] if a required export is absent.
    /// - [`WasmError::Runtime`] if instantiation or the init export fails.
    pub fn from_bytes(config: &WasmConfig, bytes: &[u8]) -> Result<Self, WasmError> {
        let mut engine_config = wasmtime::Config::new();
        engine_config.consume_fuel(true);
        let engine = Engine::new(&engine_config)
            .map_err(|e| WasmError::Runtime(format!("failed to create Wasmtime engine: {e}")))?;

        let module =
            Module::new(&engine, bytes).map_err(|e| WasmError::CompileError(format!("{e}")))?;

        for required in [MEMORY_EXPORT, config.advance_export.as_str()] {
            if !module.exports().any(|export| export.name() == required) {
                return Err(WasmError::MissingExport {
                    name: required.to_owned(),
                });
            }
        }
        let global_names: Vec<String> = module
            .exports()
            .filter(|export| {
                matches!(export.ty(), ExternType::Global(ref g) if matches!(g.content(), ValType::I32))
            })
            .map(|export| export.name().to_owned())
            .collect();

        let limits = StoreLimitsBuilder::new()
            .memory_size(config.memory_limit_bytes)
            .build();
        let mut store = Store::new(&engine, limits);
        store.limiter(|limits| limits);
        store
            .set_fuel(config.fuel_per_advance)
            .map_err(|e| WasmError::Runtime(format!("failed to set fuel: {e}")))?;

        let linker = Linker::new(&engine);
        let instance = linker
            .instantiate(&mut store, &module)
            .map_err(|e| WasmError::Runtime(format!("{e}")))?;

        let memory = instance
            .get_memory(&mut store, MEMORY_EXPORT)
            .ok_or_else(|| WasmError::MissingExport {
                name: MEMORY_EXPORT.to_owned(),
            })?;
        let advance = instance
            .get_typed_func::<(), ()>(&mut store, &config.advance_export)
            .map_err(|e| {
                WasmError::Runtime(format!(
                    "export '{}' is not a `() -> ()` function: {e}",
                    config.advance_export
                ))
            })?;

        let mut symbols = HashMap::with_capacity(global_names.len());
        for name in global_names {
            let Some(global) = instance.get_global(&mut store, &name) else {
                continue;
            };
            if let Val::I32(value) = global.get(&mut store) {
                symbols.insert(name, value as u32 as usize);
            }
        }

        let mut sim = Self {
            store,
            instance,
            memory,
            advance,
            symbols,
            config: config.clone(),
            last_fuel: 0,
        };

        if let Some(init) = sim.config.init_export.clone() {
            sim.call_export(&init)?;
        }

        tracing::debug!(
            memory_bytes = sim.memory.data_size(&sim.store),
            symbols = sim.symbols.len(),
            fuel_per_advance = sim.config.fuel_per_advance,
            "simulation module instantiated"
        );

        Ok(sim)
    }

    /// Step the simulation once, returning the fuel consumed.
    ///
    /// # Errors
    ///
    /// - [`WasmError::OutOfFuel`] if the step exhausts its fuel budget.
    /// - [`WasmError::Trap`] if the module traps.
    pub fn step(&mut self) -> Result<u64, WasmError> {
        self.reset_fuel()?;
        self.advance
            .call(&mut self.store, ())
            .map_err(|e| self.classify_trap(e))?;
        let consumed = self.fuel_consumed()?;
        self.last_fuel = consumed;
        tracing::trace!(fuel_consumed = consumed, "advance completed");
        Ok(consumed)
    }

    /// Call a named `() -> ()` export with a fresh fuel budget.
    ///
    /// # Errors
    ///
    /// - [`WasmError::Runtime`] if the export does not exist or has the
    ///   wrong signature.
    /// - [`WasmError::Trap`] or [`WasmError::OutOfFuel`] on failure.
    pub fn call_export(&mut self, name: &str) -> Result<u64, WasmError> {
        let func = self
            .instance
            .get_typed_func::<(), ()>(&mut self.store, name)
            .map_err(|e| WasmError::Runtime(format!("failed to resolve export '{name}': {e}")))?;
        self.reset_fuel()?;
        func.call(&mut self.store, ())
            .map_err(|e| self.classify_trap(e))?;
        self.fuel_consumed()
    }

    /// Fuel consumed by the most recent advance.
    pub fn last_fuel_consumed(&self) -> u64 {
        self.last_fuel
    }

    /// The configuration used to load this module.
    pub fn config(&self) -> &WasmConfig {
        &self.config
    }

    /// All resolved symbol names.
    pub fn symbol_names(&self) -> impl Iterator<Item = &str> {
        self.symbols.keys().map(String::as_str)
    }

    // -- Internal helpers ---------------------------------------------------

    fn reset_fuel(&mut self) -> Result<(), WasmError> {
        self.store
            .set_fuel(self.config.fuel_per_advance)
            .map_err(|e| WasmError::Runtime(format!("failed to set fuel: {e}")))
    }

    fn fuel_consumed(&self) -> Result<u64, WasmError> {
        let remaining = self
            .store
            .get_fuel()
            .map_err(|e| WasmError::Runtime(format!("failed to read fuel: {e}")))?;
        Ok(self.config.fuel_per_advance.saturating_sub(remaining))
    }

    /// Map a Wasmtime error onto [`WasmError`], looking through wrapped
    /// causes for a trap.
    fn classify_trap(&self, error: anyhow::Error) -> WasmError {
        for cause in error.chain() {
            if let Some(trap) = cause.downcast_ref::<wasmtime::Trap>() {
                if *trap == wasmtime::Trap::OutOfFuel {
                    return WasmError::OutOfFuel {
                        budget: self.config.fuel_per_advance,
                    };
                }
                return WasmError::Trap(format!("{error}"));
            }
        }
        WasmError::Runtime(format!("{error}"))
    }
}

impl Resource for WasmSimulation {
    fn addr(&self, symbol: &str) -> Result<usize, ResourceError> {
        self.symbols
            .get(symbol)
            .copied()
            .ok_or_else(|| ResourceError::UnknownSymbol {
                name: symbol.to_owned(),
            })
    }

    fn memory(&self) -> &[u8] {
        self.memory.data(&self.store)
    }

    fn memory_mut(&mut self) -> &mut [u8] {
        self.memory.data_mut(&mut self.store)
    }

    fn advance(&mut self) -> Result<(), ResourceError> {
        self.step()?;
        Ok(())
    }
}

impl std::fmt::Debug for WasmSimulation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WasmSimulation")
            .field("config", &self.config)
            .field("memory_bytes", &self.memory.data_size(&self.store))
            .field("symbols", &self.symbols.len())
            .finish_non_exhaustive()
    }
}
