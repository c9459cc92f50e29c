//! Session configuration file.
//!
//! A JSON object naming the simulation module and the recording, plus
//! optional knobs. Relative paths are resolved against the directory the
//! file lives in.
//!
//! ```json
//! {
//!   "simulationModule": "sim.wasm",
//!   "recording": "run.m64",
//!   "startFrame": 120,
//!   "savePolicy": { "every": 30 },
//!   "search": {
//!     "candidates": [{ "stickX": 0, "stickY": 64 }, { "stickX": 64, "stickY": 0 }],
//!     "metric": { "symbol": "gMarioSpeed", "kind": "f32" },
//!     "goal": { "atLeast": 32.0 },
//!     "maxFrames": 60
//!   }
//! }
//! ```

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tasfw_engine::prelude::*;
use tasfw_resource::game::Layout;
use tasfw_resource::snapshot::SnapshotMode;
use tasfw_wasm_host::WasmConfig;

/// Name of the config file looked up beside the executable.
pub const DEFAULT_CONFIG: &str = "config.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    /// Compiled simulation module.
    #[serde(alias = "libSM64")]
    pub simulation_module: PathBuf,
    /// M64 recording read as the base inputs and written back on exit.
    #[serde(alias = "m64File")]
    pub recording: PathBuf,
    #[serde(default)]
    pub layout: Layout,
    /// Overrides the mode the module would pick for itself.
    #[serde(default)]
    pub snapshot_mode: Option<SnapshotMode>,
    #[serde(default)]
    pub wasm: WasmConfig,
    #[serde(default)]
    pub save_policy: SavePolicy,
    /// Frame reached (and saved) before anything else runs.
    #[serde(default)]
    pub start_frame: u32,
    #[serde(default)]
    pub search: Option<SearchConfig>,
    /// Tracing filter used when `RUST_LOG` is unset.
    #[serde(default)]
    pub log_filter: Option<String>,
}

/// Greedy search run after the start frame is reached.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchConfig {
    /// Inputs tried on every frame.
    pub candidates: Vec<Inputs>,
    /// Value the search optimizes.
    pub metric: Probe,
    #[serde(default)]
    pub objective: Objective,
    #[serde(default)]
    pub goal: Option<Goal>,
    #[serde(default = "default_max_frames")]
    pub max_frames: u32,
}

fn default_max_frames() -> u32 {
    60
}

impl SearchConfig {
    pub fn to_script(&self) -> GreedySearch {
        GreedySearch {
            candidates: self.candidates.clone(),
            metric: self.metric.clone(),
            objective: self.objective,
            goal: self.goal,
            max_frames: self.max_frames,
        }
    }
}

impl SessionConfig {
    /// Read and parse `path`, resolving relative paths against its directory.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let mut config: Self = serde_json::from_str(&text)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        if let Some(dir) = path.parent() {
            config.resolve_paths(dir);
        }
        Ok(config)
    }

    fn resolve_paths(&mut self, dir: &Path) {
        for path in [&mut self.simulation_module, &mut self.recording] {
            if path.is_relative() {
                *path = dir.join(&*path);
            }
        }
    }
}

/// `config.json` in the directory holding the running executable.
pub fn default_config_path() -> anyhow::Result<PathBuf> {
    let exe = std::env::current_exe().context("failed to locate the executable")?;
    let dir = exe
        .parent()
        .context("executable path has no parent directory")?;
    Ok(dir.join(DEFAULT_CONFIG))
}
