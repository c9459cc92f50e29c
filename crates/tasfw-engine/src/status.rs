//! Invocation outcomes.
//!
//! Every invocation produces a [`Status`]: a [`BaseStatus`] common to all
//! scripts plus the script's own custom payload. The parent receives it by
//! value once the invocation is over.

use std::time::Duration;

use crate::diff::Diff;

// ---------------------------------------------------------------------------
// InvocationState
// ---------------------------------------------------------------------------

/// Lifecycle of one invocation.
///
/// ```text
/// Created -> Validating -> Aborted ---------------------> Unasserted
///                       -> Executing -> Failed ---------> Unasserted
///                                    -> Asserting -> Asserted
///                                                 -> Unasserted
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InvocationState {
    Created,
    Validating,
    Aborted,
    Executing,
    Failed,
    Asserting,
    Asserted,
    Unasserted,
}

impl InvocationState {
    /// The next state, given the result of the phase that just ran.
    ///
    /// `passed` is ignored outside the three phase states.
    pub fn next(self, passed: bool) -> Self {
        use InvocationState::*;
        match (self, passed) {
            (Created, _) => Validating,
            (Validating, true) => Executing,
            (Validating, false) => Aborted,
            (Executing, true) => Asserting,
            (Executing, false) => Failed,
            (Asserting, true) => Asserted,
            (Asserting, false) | (Aborted, _) | (Failed, _) => Unasserted,
            (terminal @ (Asserted | Unasserted), _) => terminal,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Asserted | Self::Unasserted)
    }

    /// The failure recorded if the phase run in this state returns false.
    pub fn failure_if_rejected(self) -> Option<FailureKind> {
        match self {
            Self::Validating => Some(FailureKind::Precondition),
            Self::Executing => Some(FailureKind::Execution),
            Self::Asserting => Some(FailureKind::Postcondition),
            _ => None,
        }
    }
}

/// Why an invocation ended unasserted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Validation returned false; execution never ran.
    Precondition,
    /// Execution returned false.
    Execution,
    /// Assertion returned false after a successful execution.
    Postcondition,
}

// ---------------------------------------------------------------------------
// Counters
// ---------------------------------------------------------------------------

/// Work done by an invocation, including its children.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters {
    /// Snapshot restores performed to reach a frame.
    pub loads: u64,
    /// Saves taken.
    pub saves: u64,
    /// Frames advanced.
    pub advances: u64,
    /// Wall-clock time between entry and exit.
    pub duration: Duration,
}

impl Counters {
    /// Fold a finished child's work into this one. Durations are not summed:
    /// the child's time is already inside the parent's.
    pub(crate) fn absorb(&mut self, child: &Counters) {
        self.loads += child.loads;
        self.saves += child.saves;
        self.advances += child.advances;
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// The part of a status every script shares.
#[derive(Debug, Clone)]
pub struct BaseStatus {
    /// Name of the script that ran.
    pub script: &'static str,
    /// Execution and assertion both returned true.
    pub asserted: bool,
    /// Failing phase when unasserted.
    pub failure: Option<FailureKind>,
    /// Inputs the invocation changed. Empty for Test and aborted runs.
    pub diff: Diff,
    /// Frame the simulation was on when the invocation finished.
    pub terminal_frame: u32,
    /// Work done by the invocation and its children.
    pub counters: Counters,
}

/// Result of one invocation.
#[derive(Debug, Clone)]
pub struct Status<S> {
    /// Fields every script reports.
    pub base: BaseStatus,
    /// The script's own status type.
    pub custom: S,
}

impl<S> Status<S> {
    pub fn asserted(&self) -> bool {
        self.base.asserted
    }

    pub fn diff(&self) -> &Diff {
        &self.base.diff
    }
}
