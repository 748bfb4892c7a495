//! Run status reporting and visualization.
//!
//! This module provides [`RunReport`] for inspecting where a run is in the
//! fixed step sequence.

use std::fmt;

use chrono::{DateTime, Utc};

use crate::run::{StepRecord, StepRecordOutcome};
use crate::{RunState, RunStatus, StepName};

/// Where a single step stands within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    /// Not reached in the current round.
    Pending,
    /// Completed.
    Complete,
    /// Failed, ending the run.
    Failed,
    /// Waiting for a review decision.
    AwaitingReview,
}

/// Status entry for a single step of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct StepEntry {
    /// The step.
    pub step: StepName,
    /// Its status.
    pub status: StepStatus,
    /// How many times the step has run.
    pub attempts: u32,
    /// When the latest attempt started.
    pub started_at: Option<DateTime<Utc>>,
    /// When the latest attempt ended.
    pub completed_at: Option<DateTime<Utc>>,
    /// Error message if the step failed.
    pub error: Option<String>,
}

impl StepEntry {
    /// Creates a pending entry.
    pub fn pending(step: StepName) -> Self {
        Self {
            step,
            status: StepStatus::Pending,
            attempts: 0,
            started_at: None,
            completed_at: None,
            error: None,
        }
    }

    /// Returns a status indicator character.
    pub fn status_char(&self) -> char {
        match self.status {
            StepStatus::Pending => '⏳',
            StepStatus::Complete => '✅',
            StepStatus::Failed => '❌',
            StepStatus::AwaitingReview => '👀',
        }
    }
}

/// The status of every step of one run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    /// The run identifier.
    pub run_id: String,
    /// Lifecycle status of the run.
    pub run_status: RunStatus,
    /// Rejected reviews so far.
    pub retry_count: u32,
    /// The run's `last_error`.
    pub last_error: Option<String>,
    /// One entry per step, in execution order.
    pub steps: Vec<StepEntry>,
    progress: u8,
}

impl RunReport {
    /// Builds a report from a run snapshot.
    pub fn from_state(state: &RunState) -> Self {
        let last_record = state.history.last();
        let steps = StepName::ALL
            .iter()
            .map(|&step| Self::entry(state, step, last_record))
            .collect();

        Self {
            run_id: state.run_id.clone(),
            run_status: state.status,
            retry_count: state.retry_count,
            last_error: state.last_error.clone(),
            steps,
            progress: state.progress(),
        }
    }

    fn entry(state: &RunState, step: StepName, last_record: Option<&StepRecord>) -> StepEntry {
        let records: Vec<&StepRecord> = state.history.iter().filter(|r| r.step == step).collect();
        let Some(latest) = records.last().copied() else {
            return StepEntry::pending(step);
        };

        // Steps at or after the next step belong to a round not yet reached.
        let not_reached = !state.is_terminal()
            && state.next_step.is_some_and(|next| step.index() >= next.index());

        let is_final_record = last_record.is_some_and(|r| std::ptr::eq(r, latest));
        let (status, error) = if not_reached {
            (StepStatus::Pending, None)
        } else {
            match &latest.outcome {
                StepRecordOutcome::Failed { error } => (StepStatus::Failed, Some(error.clone())),
                StepRecordOutcome::Suspended if state.status == RunStatus::Suspended => {
                    (StepStatus::AwaitingReview, None)
                }
                _ if state.status == RunStatus::Failed && is_final_record => {
                    (StepStatus::Failed, state.last_error.clone())
                }
                _ => (StepStatus::Complete, None),
            }
        };

        StepEntry {
            step,
            status,
            attempts: records.len() as u32,
            started_at: Some(latest.started_at),
            completed_at: Some(latest.completed_at),
            error,
        }
    }

    /// Returns true once the run has succeeded.
    pub fn is_complete(&self) -> bool {
        self.run_status == RunStatus::Succeeded
    }

    /// Returns true if any step has failed.
    pub fn has_failures(&self) -> bool {
        self.steps.iter().any(|s| s.status == StepStatus::Failed)
    }

    /// Returns true if the run waits for a review decision.
    pub fn is_awaiting_review(&self) -> bool {
        self.steps
            .iter()
            .any(|s| s.status == StepStatus::AwaitingReview)
    }

    /// Returns the steps that have failed.
    pub fn failed_steps(&self) -> Vec<StepName> {
        self.steps
            .iter()
            .filter(|s| s.status == StepStatus::Failed)
            .map(|s| s.step)
            .collect()
    }

    /// Returns the overall progress as a percentage.
    pub fn progress_percent(&self) -> u8 {
        self.progress
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Run status for \"{}\":", self.run_id)?;
        writeln!(f)?;

        for entry in &self.steps {
            let status_str = format!("{:?}", entry.status);
            let time_str = entry
                .completed_at
                .or(entry.started_at)
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "-".to_string());

            write!(
                f,
                "  {} {:<26} {:<15} {}",
                entry.status_char(),
                entry.step.as_str(),
                status_str,
                time_str
            )?;

            if let Some(ref error) = entry.error {
                write!(f, "  Error: {}", error)?;
            }

            if entry.attempts > 1 {
                write!(f, "  (ran {} times)", entry.attempts)?;
            }

            writeln!(f)?;
        }

        writeln!(f)?;
        writeln!(f, "Progress: {}%", self.progress_percent())?;
        if self.retry_count > 0 {
            writeln!(f, "Rejections: {}", self.retry_count)?;
        }

        match self.run_status {
            RunStatus::Succeeded => writeln!(f, "Status: Complete")?,
            RunStatus::Failed => writeln!(
                f,
                "Status: Failed ({})",
                self.last_error.as_deref().unwrap_or("unknown error")
            )?,
            RunStatus::Suspended => writeln!(f, "Status: Awaiting review")?,
            RunStatus::Initialized | RunStatus::Running => writeln!(f, "Status: In progress")?,
        }

        Ok(())
    }
}
