//! `tasfw`: run a search against a hosted simulation and write the result
//! back into the recording.
//!
//! Exit status is 0 when the top-level script asserted and 2 when it did
//! not. The recording is written in both cases. Fatal errors (missing
//! module, crashed simulation, unreadable recording) exit with 1; if the
//! failure happens while the script runs, whatever it had recorded is still
//! written first.

#![deny(unsafe_code)]

mod config;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tasfw_engine::prelude::*;
use tasfw_resource::prelude::*;
use tasfw_wasm_host::WasmSimulation;

use crate::config::{default_config_path, SessionConfig};

#[derive(Parser, Debug)]
#[command(name = "tasfw")]
#[command(about = "Scripted input search over a savestate-capable simulation")]
#[command(version)]
struct Args {
    /// Session config (JSON). Defaults to config.json beside the executable.
    config: Option<PathBuf>,

    /// After the run, replay the committed inputs twice from the base
    /// snapshot and compare state hashes every N frames.
    #[arg(long, value_name = "N")]
    verify_interval: Option<u32>,
}

// ---------------------------------------------------------------------------
// Top-level script
// ---------------------------------------------------------------------------

/// Reaches the start frame, then runs the configured search.
///
/// The search runs through `execute` and its inputs are applied whether or
/// not it reached its goal, so partial progress still ends up in the
/// recording.
struct MainScript {
    start_frame: u32,
    search: Option<GreedySearch>,
}

#[derive(Debug, Default)]
struct MainStatus {
    search: Option<SearchStatus>,
    search_asserted: bool,
}

impl<R: Resource> Script<R> for MainScript {
    type Status = MainStatus;

    fn validation(&self, session: &Session<R>) -> Result<bool, EngineError> {
        Ok(self.start_frame >= session.base_frame())
    }

    fn execution(
        &mut self,
        session: &mut Session<R>,
        status: &mut MainStatus,
    ) -> Result<bool, EngineError> {
        session.long_load(self.start_frame)?;
        let Some(search) = self.search.take() else {
            status.search_asserted = true;
            return Ok(true);
        };

        let result = session.execute(search)?;
        session.apply(result.diff())?;
        status.search_asserted = result.asserted();
        status.search = Some(result.custom);
        Ok(true)
    }

    fn assertion(&self, _session: &Session<R>, status: &MainStatus) -> Result<bool, EngineError> {
        Ok(status.search_asserted)
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

fn init_tracing(config_filter: Option<&str>) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(config_filter.unwrap_or("info"))
            }),
        )
        .init();
}

fn run(args: Args) -> anyhow::Result<ExitCode> {
    let config_path = match args.config {
        Some(path) => path,
        None => default_config_path()?,
    };
    let config = SessionConfig::load(&config_path)?;
    init_tracing(config.log_filter.as_deref());
    tracing::info!(config = %config_path.display(), "config loaded");

    let simulation = WasmSimulation::from_file(&config.wasm, &config.simulation_module)
        .with_context(|| format!("failed to load {}", config.simulation_module.display()))?;
    let game = match config.snapshot_mode {
        Some(mode) => Game::with_mode(simulation, &config.layout, mode),
        None => Game::new(simulation, &config.layout),
    }
    .context("simulation does not expose the required symbols")?;
    tracing::info!(
        mode = ?game.snapshot_mode(),
        tracked_bytes = game.tracked_len(),
        frame = game.current_frame(),
        "simulation ready"
    );

    let mut recording = Recording::load(&config.recording)?;
    let mut session =
        Session::new(game, recording.to_diff()).with_save_policy(config.save_policy);

    let script = MainScript {
        start_frame: config.start_frame,
        search: config.search.as_ref().map(|s| s.to_script()),
    };
    let status = match session.run(script) {
        Ok(status) => status,
        Err(err) => {
            recording.apply_diff(session.interrupted_diff());
            recording.save(&config.recording)?;
            tracing::warn!(
                frames = session.interrupted_diff().len(),
                recording = %config.recording.display(),
                "saved partial progress before failing"
            );
            return Err(err.into());
        }
    };

    if let Some(search) = &status.custom.search {
        tracing::info!(
            frames = search.frames_searched,
            best = ?search.best_value,
            reached_goal = search.reached_goal,
            "search summary"
        );
    }

    recording.apply_diff(status.diff());
    recording.save(&config.recording)?;

    if let Some(interval) = args.verify_interval {
        let end = session.current_frame();
        let report = session.verify_replay(end, interval)?;
        if let Some(divergence) = report.first_divergence {
            anyhow::bail!(
                "replay diverged at frame {}: {} != {}",
                divergence.frame,
                divergence.expected_hash,
                divergence.actual_hash
            );
        }
    }

    let stats = session.game().stats();
    tracing::info!(
        advances = stats.advances,
        captures = stats.captures,
        restores = stats.restores,
        "session finished"
    );

    Ok(if status.asserted() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(2)
    })
}

fn main() -> anyhow::Result<ExitCode> {
    run(Args::parse())
}
