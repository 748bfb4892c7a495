//! Run execution events.
//!
//! This module provides [`RunEvent`] for observing runs. Events are
//! broadcast through a channel obtained from
//! [`Pipeline::subscribe`](crate::Pipeline::subscribe) and can be used for
//! monitoring, logging, or building UIs. Sending never blocks a run; a
//! lagging subscriber simply misses events.

use crate::StepName;

/// An event emitted while a run executes.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum RunEvent {
    /// A run was created and is about to execute its first step.
    RunStarted {
        /// The run identifier.
        run_id: String,
    },

    /// A step has started executing.
    StepStarted {
        /// The run identifier.
        run_id: String,
        /// The step.
        step: StepName,
    },

    /// A step completed and the snapshot was saved.
    StepCompleted {
        /// The run identifier.
        run_id: String,
        /// The step.
        step: StepName,
    },

    /// A step returned an error.
    StepFailed {
        /// The run identifier.
        run_id: String,
        /// The step.
        step: StepName,
        /// Error message describing the failure.
        error: String,
    },

    /// The run is waiting for a review decision.
    RunSuspended {
        /// The run identifier.
        run_id: String,
        /// Number of records awaiting review.
        records: usize,
    },

    /// A review decision was accepted and the run continues.
    RunResumed {
        /// The run identifier.
        run_id: String,
        /// The step the run continues at.
        next_step: StepName,
    },

    /// A rejection sent the run back to generation.
    RetryScheduled {
        /// The run identifier.
        run_id: String,
        /// Rejections so far.
        attempt: u32,
    },

    /// The run finished and the artifact exists.
    RunSucceeded {
        /// The run identifier.
        run_id: String,
    },

    /// The run ended in failure.
    RunFailed {
        /// The run identifier.
        run_id: String,
        /// The run's `last_error`.
        error: String,
    },
}

impl RunEvent {
    /// Returns the run ID for this event.
    pub fn run_id(&self) -> &str {
        match self {
            Self::RunStarted { run_id }
            | Self::StepStarted { run_id, .. }
            | Self::StepCompleted { run_id, .. }
            | Self::StepFailed { run_id, .. }
            | Self::RunSuspended { run_id, .. }
            | Self::RunResumed { run_id, .. }
            | Self::RetryScheduled { run_id, .. }
            | Self::RunSucceeded { run_id }
            | Self::RunFailed { run_id, .. } => run_id,
        }
    }

    /// Returns the step for this event, if applicable.
    pub fn step(&self) -> Option<StepName> {
        match self {
            Self::StepStarted { step, .. }
            | Self::StepCompleted { step, .. }
            | Self::StepFailed { step, .. } => Some(*step),
            Self::RunResumed { next_step, .. } => Some(*next_step),
            _ => None,
        }
    }

    /// Returns true if this is an error event.
    pub fn is_error(&self) -> bool {
        matches!(self, Self::StepFailed { .. } | Self::RunFailed { .. })
    }

    /// Returns true if the run has ended with this event.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::RunSucceeded { .. } | Self::RunFailed { .. })
    }
}
