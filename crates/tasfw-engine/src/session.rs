//! The invocation stack and its composition verbs.
//!
//! A [`Session`] owns the [`Game`] for its whole lifetime and a stack of
//! invocation frames. The bottom frame holds the base inputs (usually a
//! recording) and the base snapshot; every running script adds a frame on
//! top with its own [`Diff`] and [`SaveBank`].
//!
//! # Views
//!
//! The inputs a frame sees at step `f` are taken from the topmost stack frame
//! whose diff has an entry at `f`, falling back to neutral inputs. A save in
//! a lower frame is only usable while no frame above it changed an input
//! before the save.
//!
//! # Verbs
//!
//! | verb | child diff | child end state |
//! |---|---|---|
//! | [`test`](Session::test) | discarded | restored to entry |
//! | [`modify`](Session::modify) | merged if asserted | kept if asserted, else restored |
//! | [`execute`](Session::execute) | returned, not merged | left live until the next state change |
//!
//! [`apply`](Session::apply) merges a diff produced earlier (typically by
//! `execute`) and brings the simulation to the frame after its last entry.
//! When the diff is the one of the branch still live, and nothing changed
//! since, the branch's saves are adopted instead of replaying from scratch.
//!
//! A live branch survives `test`: the tested child starts from the branch's
//! end state and the branch is still live afterwards. Every other verb that
//! moves the simulation, and every save, discards it first.

use std::time::Instant;

use tasfw_resource::game::Game;
use tasfw_resource::snapshot::Snapshot;
use tasfw_resource::Resource;

use crate::diff::Diff;
use crate::inputs::Inputs;
use crate::save_bank::{SaveBank, SavePolicy};
use crate::script::Script;
use crate::status::{BaseStatus, Counters, FailureKind, InvocationState, Status};
use crate::EngineError;

// ---------------------------------------------------------------------------
// Internal state
// ---------------------------------------------------------------------------

/// One level of the invocation stack.
#[derive(Debug)]
pub(crate) struct Frame {
    pub(crate) script: &'static str,
    pub(crate) diff: Diff,
    pub(crate) bank: SaveBank,
    /// Changes whenever `diff` changes.
    pub(crate) revision: u64,
    pub(crate) counters: Counters,
}

/// A child run through `execute` whose end state is still live.
#[derive(Debug)]
struct PendingBranch {
    /// Stack height of the parent that ran the child.
    depth: usize,
    /// Parent revision at the time.
    revision: u64,
    diff: Diff,
    saves: SaveBank,
    /// Parent state from before the child ran.
    rollback: Snapshot,
}

/// A finished child, before the verb decides what to keep.
struct Finished<S> {
    status: Status<S>,
    saves: SaveBank,
    entry: Snapshot,
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// One simulation plus the stack of scripts running against it.
pub struct Session<R: Resource> {
    pub(crate) game: Game<R>,
    pub(crate) frames: Vec<Frame>,
    pending: Option<PendingBranch>,
    /// Diff of the last top-level invocation that failed fatally.
    interrupted: Diff,
    policy: SavePolicy,
    next_revision: u64,
    pub(crate) base_frame: u32,
}

impl<R: Resource> Session<R> {
    /// Start a session at the game's current frame.
    ///
    /// `base` supplies the inputs of every frame no script overrides. The
    /// current state becomes the base snapshot; frames before it can never
    /// be loaded.
    pub fn new(mut game: Game<R>, base: Diff) -> Self {
        let snapshot = game.capture();
        let base_frame = snapshot.frame();
        let mut bank = SaveBank::new();
        bank.insert(base_frame, snapshot);
        tracing::debug!(base_frame, base_inputs = base.len(), "session started");

        Self {
            game,
            frames: vec![Frame {
                script: "base",
                diff: base,
                bank,
                revision: 0,
                counters: Counters::default(),
            }],
            pending: None,
            interrupted: Diff::new(),
            policy: SavePolicy::default(),
            next_revision: 0,
            base_frame,
        }
    }

    /// Use `policy` for [`optional_save`](Self::optional_save).
    pub fn with_save_policy(mut self, policy: SavePolicy) -> Self {
        self.policy = policy;
        self
    }

    // -- inspection ---------------------------------------------------------

    /// The simulation.
    pub fn game(&self) -> &Game<R> {
        &self.game
    }

    /// Frame counter of the simulation.
    pub fn current_frame(&self) -> u32 {
        self.game.current_frame()
    }

    /// Frame of the base snapshot.
    pub fn base_frame(&self) -> u32 {
        self.base_frame
    }

    /// Diff of the innermost running invocation.
    pub fn diff(&self) -> &Diff {
        &self.top().diff
    }

    /// The inputs the session started with, plus whatever top-level runs
    /// committed into them.
    pub fn base_diff(&self) -> &Diff {
        &self.frames[0].diff
    }

    /// Number of running invocations.
    pub fn depth(&self) -> usize {
        self.frames.len() - 1
    }

    /// Saves held by the innermost running invocation.
    pub fn saves(&self) -> &SaveBank {
        &self.top().bank
    }

    pub fn save_policy(&self) -> SavePolicy {
        self.policy
    }

    /// The inputs frame `frame` is simulated with in the current view.
    pub fn inputs_at(&self, frame: u32) -> Inputs {
        Self::lookup(&self.frames, frame)
    }

    /// What the last top-level invocation had recorded (its own writes plus
    /// the children it committed) when it failed with an error.
    ///
    /// Empty until a top-level invocation fails, and reset by each
    /// [`run`](Self::run). The base diff itself is never changed by a failed
    /// run, so overlaying this on it recovers the partial progress.
    pub fn interrupted_diff(&self) -> &Diff {
        &self.interrupted
    }

    /// Every input override in the current view, merged.
    pub fn view(&self) -> Diff {
        self.frames.iter().fold(Diff::new(), |mut view, frame| {
            view.overlay(&frame.diff);
            view
        })
    }

    /// Consume the session and hand back the simulation.
    pub fn into_game(mut self) -> Game<R> {
        self.settle_pending();
        self.game
    }

    // -- verbs --------------------------------------------------------------

    /// Run `script` as the top-level script.
    ///
    /// Behaves like [`modify`](Self::modify); the returned status carries
    /// the script's diff whether or not it asserted.
    ///
    /// # Errors
    ///
    /// Any fatal error from the script or the simulation. What the script
    /// had recorded by then stays available through
    /// [`interrupted_diff`](Self::interrupted_diff).
    pub fn run<S: Script<R>>(&mut self, script: S) -> Result<Status<S::Status>, EngineError> {
        self.interrupted = Diff::new();
        let status = self.modify(script)?;
        tracing::info!(
            script = status.base.script,
            asserted = status.asserted(),
            failure = ?status.base.failure,
            frames_changed = status.diff().len(),
            terminal_frame = status.base.terminal_frame,
            advances = status.base.counters.advances,
            loads = status.base.counters.loads,
            "top-level script finished"
        );
        Ok(status)
    }

    /// Run `script` and return the state to exactly what it was before.
    ///
    /// The returned status carries an empty diff. A branch left live by
    /// [`execute`](Self::execute) is what the child starts from, and is
    /// still live afterwards.
    pub fn test<S: Script<R>>(&mut self, script: S) -> Result<Status<S::Status>, EngineError> {
        let branch = self.pending.take();
        let finished = self.invoke(script);
        self.pending = branch;
        let Finished {
            mut status,
            saves,
            entry,
        } = finished?;

        self.game.restore(&entry);
        self.game.release(entry);
        self.release_bank(saves);
        status.base.diff = Diff::new();

        tracing::debug!(
            script = status.base.script,
            asserted = status.asserted(),
            "test finished, state restored"
        );
        Ok(status)
    }

    /// Run `script`; keep its diff and end state if it asserts, otherwise
    /// restore the state from before the call.
    pub fn modify<S: Script<R>>(&mut self, script: S) -> Result<Status<S::Status>, EngineError> {
        let Finished {
            status,
            saves,
            entry,
        } = self.invoke(script)?;

        if status.asserted() {
            self.commit(status.diff(), saves);
            self.game.release(entry);
        } else {
            self.game.restore(&entry);
            self.game.release(entry);
            self.release_bank(saves);
        }

        tracing::debug!(
            script = status.base.script,
            asserted = status.asserted(),
            committed = status.asserted() && !status.diff().is_empty(),
            frame = self.current_frame(),
            "modify finished"
        );
        Ok(status)
    }

    /// Run `script` and leave its end state live without merging its diff.
    ///
    /// Pass the returned diff to [`apply`](Self::apply) to keep it.
    /// [`test`](Self::test) leaves the branch live; any other operation that
    /// moves the simulation or saves first restores the state from before
    /// this call.
    pub fn execute<S: Script<R>>(&mut self, script: S) -> Result<Status<S::Status>, EngineError> {
        let Finished {
            status,
            saves,
            entry,
        } = self.invoke(script)?;

        self.pending = Some(PendingBranch {
            depth: self.frames.len(),
            revision: self.top().revision,
            diff: status.diff().clone(),
            saves,
            rollback: entry,
        });

        tracing::debug!(
            script = status.base.script,
            asserted = status.asserted(),
            frame = self.current_frame(),
            "execute finished, branch live"
        );
        Ok(status)
    }

    /// Merge `diff` into the current invocation's diff and bring the
    /// simulation to the frame after its last entry.
    ///
    /// Saves after the first changed frame are dropped. An empty diff only
    /// discards a live branch.
    ///
    /// # Errors
    ///
    /// [`EngineError::BeforeBase`] if `diff` touches a frame before the base
    /// snapshot.
    pub fn apply(&mut self, diff: &Diff) -> Result<(), EngineError> {
        let (Some(first), Some(last)) = (diff.first_frame(), diff.last_frame()) else {
            self.settle_pending();
            return Ok(());
        };
        if first < self.base_frame {
            return Err(EngineError::BeforeBase {
                frame: first,
                base: self.base_frame,
            });
        }

        if let Some(branch) = self.pending.take() {
            if branch.depth == self.frames.len()
                && branch.revision == self.top().revision
                && branch.diff == *diff
            {
                self.game.release(branch.rollback);
                self.commit(diff, branch.saves);
                tracing::debug!(first, last, frame = self.current_frame(), "adopted live branch");
                return self.load_inner(last.saturating_add(1), false);
            }
            self.pending = Some(branch);
        }

        self.settle_pending();
        self.commit(diff, SaveBank::new());
        let stale = self.current_frame() > first;
        tracing::debug!(first, last, stale, "applying diff");
        self.load_inner(last.saturating_add(1), stale)
    }

    // -- frames -------------------------------------------------------------

    /// Bring the simulation to the start of `frame`, restoring the latest
    /// usable save when moving backwards and advancing with the current view.
    ///
    /// # Errors
    ///
    /// [`EngineError::BeforeBase`] for frames before the base snapshot, or
    /// any simulation fault while advancing.
    pub fn load(&mut self, frame: u32) -> Result<(), EngineError> {
        self.load_inner(frame, false)
    }

    /// Advance one frame with the inputs of the current view.
    pub fn advance_frame_read(&mut self) -> Result<(), EngineError> {
        self.settle_pending();
        let frame = self.current_frame();
        let inputs = self.inputs_at(frame);
        self.step(frame, inputs)
    }

    /// Advance `n` frames with the inputs of the current view.
    pub fn advance_frames_read(&mut self, n: u32) -> Result<(), EngineError> {
        for _ in 0..n {
            self.advance_frame_read()?;
        }
        Ok(())
    }

    /// Advance one frame with `inputs`, recording them in the current
    /// invocation's diff.
    ///
    /// Inputs identical to what the frame would have used anyway are not
    /// stored.
    pub fn advance_frame_write(&mut self, inputs: Inputs) -> Result<(), EngineError> {
        self.settle_pending();
        let frame = self.current_frame();
        let top = self.frames.len() - 1;
        let inherited = Self::lookup(&self.frames[..top], frame);

        let diff = &mut self.frames[top].diff;
        let changed = if inputs == inherited {
            diff.remove(frame).is_some()
        } else {
            diff.insert(frame, inputs) != Some(inputs)
        };
        if changed {
            self.next_revision += 1;
            self.frames[top].revision = self.next_revision;
            let invalid = self.frames[top].bank.invalidate_after(frame);
            self.release_all(invalid);
        }

        self.step(frame, inputs)
    }

    /// Save the current state in the current invocation's save bank.
    ///
    /// A live branch is discarded first, so this saves the state the
    /// current view leads to.
    pub fn save(&mut self) -> Result<(), EngineError> {
        self.settle_pending();
        let frame = self.current_frame();
        self.save_at(frame)
    }

    /// Load `frame` and save it in the current invocation's save bank.
    pub fn save_at(&mut self, frame: u32) -> Result<(), EngineError> {
        self.load(frame)?;
        let snapshot = self.game.capture();
        let top = self.top_mut();
        top.counters.saves += 1;
        let superseded = top.bank.insert(frame, snapshot);
        if let Some(old) = superseded {
            self.game.release(old);
        }
        tracing::debug!(frame, pages = ?self.top().bank.get(frame).map(|s| s.region_count()), "saved");
        Ok(())
    }

    /// Save if the session's [`SavePolicy`] says so. Returns whether a save
    /// was taken.
    pub fn optional_save(&mut self) -> Result<bool, EngineError> {
        self.settle_pending();
        let frame = self.current_frame();
        let wanted = match self.policy {
            SavePolicy::Always => true,
            SavePolicy::Never => false,
            SavePolicy::Every(n) => n != 0 && frame % n == 0,
            SavePolicy::Adaptive => self.save_pays_off(frame),
        };
        if wanted {
            self.save_at(frame)?;
        }
        Ok(wanted)
    }

    /// Load `frame` and save there.
    pub fn long_load(&mut self, frame: u32) -> Result<(), EngineError> {
        let start = Instant::now();
        let from = self.current_frame();
        self.load(frame)?;
        self.save()?;
        tracing::info!(from, frame, elapsed = ?start.elapsed(), "long load finished");
        Ok(())
    }

    // -- invocation ---------------------------------------------------------

    /// Run `script` on a new stack frame. Callers that want to keep a live
    /// branch take it out of `pending` beforehand.
    fn invoke<S: Script<R>>(&mut self, mut script: S) -> Result<Finished<S::Status>, EngineError> {
        self.settle_pending();
        let name = script.name();
        let entry = self.game.capture();
        self.next_revision += 1;
        self.frames.push(Frame {
            script: name,
            diff: Diff::new(),
            bank: SaveBank::new(),
            revision: self.next_revision,
            counters: Counters::default(),
        });
        let depth = self.depth();
        tracing::debug!(script = name, depth, frame = entry.frame(), "invocation started");

        let started = Instant::now();
        let mut custom = S::Status::default();
        let outcome = self.run_phases(&mut script, &mut custom);

        // A branch a child of this invocation left live ends with it.
        self.settle_pending();
        let mut frame = self
            .frames
            .pop()
            .expect("invocation frame is pushed before the phases run");
        frame.counters.duration = started.elapsed();
        self.top_mut().counters.absorb(&frame.counters);

        let (state, failure) = match outcome {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::error!(
                    script = name,
                    depth,
                    frames_recorded = frame.diff.len(),
                    error = %err,
                    "invocation failed fatally"
                );
                if self.frames.len() == 1 {
                    self.interrupted = frame.diff;
                }
                self.release_bank(frame.bank);
                self.game.release(entry);
                return Err(err);
            }
        };

        let asserted = state == InvocationState::Asserted;
        let diff = if failure == Some(FailureKind::Precondition) {
            Diff::new()
        } else {
            frame.diff
        };
        tracing::debug!(
            script = name,
            depth,
            asserted,
            ?failure,
            frames_changed = diff.len(),
            "invocation finished"
        );

        Ok(Finished {
            status: Status {
                base: BaseStatus {
                    script: name,
                    asserted,
                    failure,
                    diff,
                    terminal_frame: self.game.current_frame(),
                    counters: frame.counters,
                },
                custom,
            },
            saves: frame.bank,
            entry,
        })
    }

    fn run_phases<S: Script<R>>(
        &mut self,
        script: &mut S,
        custom: &mut S::Status,
    ) -> Result<(InvocationState, Option<FailureKind>), EngineError> {
        let mut state = InvocationState::Created.next(true);
        let mut failure = None;
        while !state.is_terminal() {
            let passed = match state {
                InvocationState::Validating => script.validation(self)?,
                InvocationState::Executing => script.execution(self, custom)?,
                InvocationState::Asserting => script.assertion(self, custom)?,
                _ => false,
            };
            if !passed && failure.is_none() {
                failure = state.failure_if_rejected();
            }
            let next = state.next(passed);
            tracing::trace!(from = ?state, to = ?next, "invocation state");
            state = next;
        }
        Ok((state, failure))
    }

    // -- internals ----------------------------------------------------------

    fn top(&self) -> &Frame {
        &self.frames[self.frames.len() - 1]
    }

    fn top_mut(&mut self) -> &mut Frame {
        let top = self.frames.len() - 1;
        &mut self.frames[top]
    }

    fn lookup(frames: &[Frame], frame: u32) -> Inputs {
        frames
            .iter()
            .rev()
            .find_map(|f| f.diff.get(frame))
            .unwrap_or_default()
    }

    /// Latest save usable for reaching `target`, as (stack level, frame).
    pub(crate) fn find_save(&self, target: u32) -> Option<(usize, u32)> {
        let mut bound = target;
        let mut best: Option<(usize, u32)> = None;
        for (level, frame) in self.frames.iter().enumerate().rev() {
            if let Some((saved, _)) = frame.bank.latest_at_or_before(bound) {
                if best.map_or(true, |(_, b)| saved > b) {
                    best = Some((level, saved));
                }
            }
            if let Some(first) = frame.diff.first_frame() {
                bound = bound.min(first);
            }
        }
        best
    }

    pub(crate) fn load_inner(&mut self, target: u32, force_restore: bool) -> Result<(), EngineError> {
        self.settle_pending();
        let current = self.current_frame();
        if !force_restore && current == target {
            return Ok(());
        }

        let (level, saved) = self.find_save(target).ok_or(EngineError::BeforeBase {
            frame: target,
            base: self.base_frame,
        })?;
        if force_restore || current < saved || current > target {
            let snapshot = self.frames[level]
                .bank
                .get(saved)
                .expect("find_save returns an existing save");
            self.game.restore(snapshot);
            self.top_mut().counters.loads += 1;
            tracing::trace!(target, saved, level, "restored save");
        }

        while self.current_frame() < target {
            self.advance_frame_read()?;
        }
        Ok(())
    }

    fn step(&mut self, frame: u32, inputs: Inputs) -> Result<(), EngineError> {
        let addr = self.game.controller_addr();
        self.game.write_bytes(addr, &inputs.to_pad_bytes())?;
        self.game.advance()?;
        self.top_mut().counters.advances += 1;
        tracing::trace!(frame, ?inputs, "advanced");
        Ok(())
    }

    /// Overlay `diff` on the current invocation, drop its saves made stale
    /// by the change, and take over `saves`.
    fn commit(&mut self, diff: &Diff, saves: SaveBank) {
        let mut released = Vec::new();
        self.next_revision += 1;
        let revision = self.next_revision;
        let top = self.top_mut();

        if let Some(first) = diff.first_frame() {
            top.diff.overlay(diff);
            top.revision = revision;
            released.extend(top.bank.invalidate_after(first));
        }
        for (frame, snapshot) in saves {
            released.extend(top.bank.insert(frame, snapshot));
        }
        self.release_all(released);
    }

    /// Throw away a live branch, restoring the state from before it.
    fn settle_pending(&mut self) {
        if let Some(branch) = self.pending.take() {
            debug_assert_eq!(branch.depth, self.frames.len());
            self.game.restore(&branch.rollback);
            self.game.release(branch.rollback);
            self.release_bank(branch.saves);
            tracing::trace!(frame = self.current_frame(), "discarded live branch");
        }
    }

    /// Whether replaying from the latest usable save to `frame` is expected
    /// to cost more than saving now and restoring later.
    fn save_pays_off(&self, frame: u32) -> bool {
        let since = match self.find_save(frame) {
            Some((_, saved)) => frame - saved,
            None => return true,
        };
        if since == 0 {
            return false;
        }
        let stats = self.game.stats();
        match (stats.mean_advance(), stats.mean_capture()) {
            (Some(advance), Some(capture)) => {
                advance * since >= capture + stats.mean_restore().unwrap_or_default()
            }
            _ => true,
        }
    }

    fn release_bank(&mut self, bank: SaveBank) {
        for (_, snapshot) in bank {
            self.game.release(snapshot);
        }
    }

    fn release_all(&mut self, snapshots: Vec<Snapshot>) {
        for snapshot in snapshots {
            self.game.release(snapshot);
        }
    }
}

impl<R: Resource> std::fmt::Debug for Session<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("frame", &self.current_frame())
            .field("base_frame", &self.base_frame)
            .field(
                "stack",
                &self.frames.iter().map(|f| f.script).collect::<Vec<_>>(),
            )
            .field("branch_live", &self.pending.is_some())
            .finish_non_exhaustive()
    }
}
