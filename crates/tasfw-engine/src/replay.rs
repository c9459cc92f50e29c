//! Determinism verification of the committed inputs.
//!
//! [`Session::verify_replay`] restores the base snapshot, replays the current
//! view up to a frame while recording BLAKE3 state hashes at checkpoints,
//! then does it again and compares. A mismatch means either the simulation
//! is not deterministic or a snapshot restore was incomplete.

use serde::{Deserialize, Serialize};
use tasfw_resource::Resource;

use crate::session::Session;
use crate::EngineError;

/// Outcome of a replay verification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayReport {
    /// Frames advanced per pass.
    pub frames_replayed: u32,
    /// (frame, state hash) of the first pass.
    pub checkpoints: Vec<(u32, String)>,
    /// First checkpoint where the second pass disagreed.
    pub first_divergence: Option<ReplayDivergence>,
}

impl ReplayReport {
    pub fn deterministic(&self) -> bool {
        self.first_divergence.is_none()
    }
}

/// Details about a determinism failure detected during replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayDivergence {
    /// First checkpoint frame whose hashes differ.
    pub frame: u32,
    /// Hash from the first pass.
    pub expected_hash: String,
    /// Hash from the second pass.
    pub actual_hash: String,
}

impl<R: Resource> Session<R> {
    /// Replay the current view from the base snapshot to `end` twice,
    /// comparing state hashes every `interval` frames and at `end`.
    ///
    /// The simulation is returned to the frame it was on.
    ///
    /// # Errors
    ///
    /// [`EngineError::BeforeBase`] if `end` is before the base snapshot.
    pub fn verify_replay(&mut self, end: u32, interval: u32) -> Result<ReplayReport, EngineError> {
        if end < self.base_frame {
            return Err(EngineError::BeforeBase {
                frame: end,
                base: self.base_frame,
            });
        }
        let origin = self.current_frame();
        let interval = interval.max(1);

        let expected = self.replay_pass(end, interval)?;
        let actual = self.replay_pass(end, interval)?;

        let first_divergence = expected
            .iter()
            .zip(&actual)
            .find(|(e, a)| e.1 != a.1)
            .map(|(e, a)| ReplayDivergence {
                frame: e.0,
                expected_hash: e.1.clone(),
                actual_hash: a.1.clone(),
            });

        match &first_divergence {
            Some(d) => tracing::warn!(frame = d.frame, "replay diverged"),
            None => tracing::info!(end, checkpoints = expected.len(), "replay verified"),
        }

        self.load_inner(origin, true)?;

        Ok(ReplayReport {
            frames_replayed: end - self.base_frame,
            checkpoints: expected,
            first_divergence,
        })
    }

    fn replay_pass(&mut self, end: u32, interval: u32) -> Result<Vec<(u32, String)>, EngineError> {
        self.load_inner(self.base_frame, true)?;
        let mut hashes = Vec::new();
        loop {
            let frame = self.current_frame();
            if (frame - self.base_frame) % interval == 0 || frame == end {
                hashes.push((frame, self.game.state_hash()));
            }
            if frame >= end {
                break;
            }
            self.advance_frame_read()?;
        }
        Ok(hashes)
    }
}
