//! General-purpose scripts built only from the session verbs.

use tasfw_resource::Resource;

use crate::diff::Diff;
use crate::inputs::Inputs;
use crate::probe::{Goal, Objective, Probe, ValueKind};
use crate::quantizer::{quantize, StickChoice, StickQuery, TieBreak, MAX_MAGNITUDE};
use crate::script::Script;
use crate::session::Session;
use crate::EngineError;

// ---------------------------------------------------------------------------
// HoldInputs
// ---------------------------------------------------------------------------

/// Writes a fixed sequence of inputs, one per frame, from the current frame.
#[derive(Debug, Clone)]
pub struct HoldInputs {
    sequence: Vec<Inputs>,
}

impl HoldInputs {
    /// Hold `inputs` for `frames` frames.
    pub fn new(inputs: Inputs, frames: u32) -> Self {
        Self {
            sequence: vec![inputs; frames as usize],
        }
    }

    /// Play `sequence` in order.
    pub fn sequence(sequence: Vec<Inputs>) -> Self {
        Self { sequence }
    }
}

impl<R: Resource> Script<R> for HoldInputs {
    type Status = ();

    fn execution(&mut self, session: &mut Session<R>, _status: &mut ()) -> Result<bool, EngineError> {
        for &inputs in &self.sequence {
            session.advance_frame_write(inputs)?;
        }
        Ok(true)
    }
}

// ---------------------------------------------------------------------------
// FaceYaw
// ---------------------------------------------------------------------------

/// Spends one frame pushing the stick towards a target yaw.
///
/// The camera yaw is read from `camera` (an `i16` probe) or taken as 0.
/// Run it through [`Session::test`] to only ask which stick coordinate
/// would be used.
#[derive(Debug, Clone)]
pub struct FaceYaw {
    /// World yaw to face.
    pub target_yaw: i16,
    /// Where to read the camera yaw from.
    pub camera: Option<Probe>,
    /// Preference between equally close coordinates.
    pub tie_break: TieBreak,
    /// Largest processed stick magnitude allowed.
    pub max_magnitude: f32,
    /// Buttons held during the frame.
    pub buttons: u16,
}

/// What [`FaceYaw`] decided.
#[derive(Debug, Clone, Default)]
pub struct FaceYawStatus {
    /// Chosen coordinate, `None` if nothing fit the constraints.
    pub choice: Option<StickChoice>,
    /// Camera yaw the choice was computed against.
    pub camera_yaw: i16,
}

impl FaceYaw {
    pub fn new(target_yaw: i16, tie_break: TieBreak) -> Self {
        Self {
            target_yaw,
            camera: None,
            tie_break,
            max_magnitude: MAX_MAGNITUDE,
            buttons: 0,
        }
    }

    /// Read the camera yaw from `probe` before quantizing.
    pub fn with_camera(mut self, probe: Probe) -> Self {
        self.camera = Some(probe);
        self
    }
}

impl<R: Resource> Script<R> for FaceYaw {
    type Status = FaceYawStatus;

    fn validation(&self, _session: &Session<R>) -> Result<bool, EngineError> {
        Ok(self
            .camera
            .as_ref()
            .map_or(true, |probe| probe.kind == ValueKind::I16))
    }

    fn execution(
        &mut self,
        session: &mut Session<R>,
        status: &mut FaceYawStatus,
    ) -> Result<bool, EngineError> {
        let camera_yaw = match &self.camera {
            Some(probe) => probe.read(session.game())? as i16,
            None => 0,
        };
        let mut query = StickQuery::new(self.target_yaw, camera_yaw, self.tie_break);
        query.max_magnitude = self.max_magnitude;

        status.camera_yaw = camera_yaw;
        status.choice = quantize(&query);
        let Some(choice) = status.choice else {
            return Ok(false);
        };
        session.advance_frame_write(Inputs::new(self.buttons, choice.stick_x, choice.stick_y))?;
        Ok(true)
    }
}

// ---------------------------------------------------------------------------
// ProbeStep
// ---------------------------------------------------------------------------

/// Holds one input for a few frames and measures a metric afterwards.
#[derive(Debug, Clone)]
pub struct ProbeStep {
    /// Inputs held on every frame.
    pub inputs: Inputs,
    /// How many frames to hold them.
    pub frames: u32,
    /// Value read after the last frame.
    pub metric: Probe,
    /// Asserts only when the value reaches this.
    pub goal: Option<Goal>,
}

#[derive(Debug, Clone, Default)]
pub struct ProbeStatus {
    /// Metric after the last frame.
    pub value: f64,
    /// Frame the simulation ended on.
    pub end_frame: u32,
}

impl<R: Resource> Script<R> for ProbeStep {
    type Status = ProbeStatus;

    fn execution(
        &mut self,
        session: &mut Session<R>,
        status: &mut ProbeStatus,
    ) -> Result<bool, EngineError> {
        for _ in 0..self.frames {
            session.advance_frame_write(self.inputs)?;
        }
        status.value = self.metric.read(session.game())?;
        status.end_frame = session.current_frame();
        Ok(true)
    }

    fn assertion(&self, _session: &Session<R>, status: &ProbeStatus) -> Result<bool, EngineError> {
        Ok(self.goal.map_or(true, |goal| goal.reached(status.value)))
    }
}

// ---------------------------------------------------------------------------
// GreedySearch
// ---------------------------------------------------------------------------

/// Frame-by-frame greedy search over a fixed candidate set.
///
/// On every frame each candidate runs through [`Session::execute`] as a
/// one-frame [`ProbeStep`]; the best metric wins and is committed with a
/// single [`Session::apply`]. The search stops once `goal` is reached or after
/// `max_frames` frames.
#[derive(Debug, Clone)]
pub struct GreedySearch {
    /// Inputs tried on every frame, in order. Earlier entries win ties.
    pub candidates: Vec<Inputs>,
    /// Value compared between candidates.
    pub metric: Probe,
    /// Which way the metric should move.
    pub objective: Objective,
    /// Stop, asserted, once the metric reaches this.
    pub goal: Option<Goal>,
    /// Frames searched before giving up.
    pub max_frames: u32,
}

#[derive(Debug, Clone, Default)]
pub struct SearchStatus {
    /// Frames committed so far.
    pub frames_searched: u32,
    /// Metric after the last committed frame.
    pub best_value: Option<f64>,
    /// Whether the goal was reached.
    pub reached_goal: bool,
    /// Winning candidate index per frame.
    pub choices: Vec<usize>,
}

impl<R: Resource> Script<R> for GreedySearch {
    type Status = SearchStatus;

    fn validation(&self, _session: &Session<R>) -> Result<bool, EngineError> {
        Ok(!self.candidates.is_empty())
    }

    fn execution(
        &mut self,
        session: &mut Session<R>,
        status: &mut SearchStatus,
    ) -> Result<bool, EngineError> {
        for _ in 0..self.max_frames {
            let start = session.current_frame();
            let mut best: Option<(usize, f64, Diff)> = None;

            for (index, &inputs) in self.candidates.iter().enumerate() {
                let step = ProbeStep {
                    inputs,
                    frames: 1,
                    metric: self.metric.clone(),
                    goal: None,
                };
                let result = session.execute(step)?;
                if !result.asserted() {
                    continue;
                }
                let value = result.custom.value;
                let improves = best
                    .as_ref()
                    .map_or(true, |(_, incumbent, _)| self.objective.better(value, *incumbent));
                if improves {
                    best = Some((index, value, result.base.diff));
                }
            }

            let Some((index, value, diff)) = best else {
                tracing::debug!(frame = start, "no candidate asserted");
                return Ok(false);
            };
            session.apply(&diff)?;
            // An empty winning diff means the frame keeps its inherited
            // inputs; step over it with those.
            session.load(start + 1)?;
            session.optional_save()?;

            status.frames_searched += 1;
            status.best_value = Some(value);
            status.choices.push(index);
            tracing::debug!(frame = start, candidate = index, value, "greedy step committed");

            if self.goal.is_some_and(|goal| goal.reached(value)) {
                status.reached_goal = true;
                break;
            }
        }
        Ok(true)
    }

    fn assertion(&self, _session: &Session<R>, status: &SearchStatus) -> Result<bool, EngineError> {
        Ok(self.goal.is_none() || status.reached_goal)
    }
}
