//! The review gate: turns a human decision into the next step of a run.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::validation::{Validator, DEFAULT_SUGGESTION_LIMIT};
use crate::{EngineConfig, GeneratedRecord, HeddleError, Result, RunState, RunStatus, StepName};

/// Failure message when rejections use up every retry.
pub const RETRY_LIMIT_EXCEEDED: &str = "retry limit exceeded";

/// Failure message for a cancelled review.
pub const CANCELLED_BY_REVIEWER: &str = "cancelled by reviewer";

/// A reviewer's verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    /// Use the generated records as they are.
    Approved,
    /// Use the reviewer's corrected records.
    Modified,
    /// Generate again, with feedback.
    Rejected,
    /// Stop the run.
    Cancelled,
}

impl ReviewStatus {
    /// Returns the snake_case name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Approved => "approved",
            Self::Modified => "modified",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReviewStatus {
    type Err = HeddleError;

    /// Parses a status name, ignoring ASCII case and surrounding spaces.
    ///
    /// Unknown names are an error, never an implicit approval.
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "approved" => Ok(Self::Approved),
            "modified" => Ok(Self::Modified),
            "rejected" => Ok(Self::Rejected),
            "cancelled" | "canceled" => Ok(Self::Cancelled),
            _ => Err(HeddleError::InvalidDecision(format!(
                "unknown review status '{}'",
                s
            ))),
        }
    }
}

/// A human decision on a suspended run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewDecision {
    /// The verdict.
    pub status: ReviewStatus,
    /// Replacement records, used with `Modified`.
    #[serde(default)]
    pub corrected_records: Option<Vec<GeneratedRecord>>,
    /// Free-text feedback, fed into the next generation on `Rejected`.
    #[serde(default)]
    pub feedback: Option<String>,
}

impl ReviewDecision {
    /// Approves the generated records.
    pub fn approve() -> Self {
        Self {
            status: ReviewStatus::Approved,
            corrected_records: None,
            feedback: None,
        }
    }

    /// Replaces the generated records with `records`.
    pub fn modify(records: Vec<GeneratedRecord>) -> Self {
        Self {
            status: ReviewStatus::Modified,
            corrected_records: Some(records),
            feedback: None,
        }
    }

    /// Rejects the generated records.
    pub fn reject(feedback: impl Into<String>) -> Self {
        Self {
            status: ReviewStatus::Rejected,
            corrected_records: None,
            feedback: Some(feedback.into()),
        }
    }

    /// Cancels the run.
    pub fn cancel() -> Self {
        Self {
            status: ReviewStatus::Cancelled,
            corrected_records: None,
            feedback: None,
        }
    }

    /// Builds a decision from a status name.
    ///
    /// # Errors
    ///
    /// Returns [`HeddleError::InvalidDecision`] for an unknown status.
    pub fn parse(
        status: &str,
        corrected_records: Option<Vec<GeneratedRecord>>,
        feedback: Option<String>,
    ) -> Result<Self> {
        Ok(Self {
            status: status.parse()?,
            corrected_records,
            feedback,
        })
    }
}

/// Where a run goes after review.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReviewRoute {
    /// Create the artifact.
    CreateArtifact,
    /// Generate again; `attempt` is the new retry count.
    Regenerate {
        /// Rejections so far.
        attempt: u32,
    },
    /// The run has failed.
    Abort {
        /// The failure message.
        reason: String,
    },
}

impl ReviewRoute {
    /// The step the run continues with, if any.
    pub fn next_step(&self) -> Option<StepName> {
        match self {
            Self::CreateArtifact => Some(StepName::CreateArtifact),
            Self::Regenerate { .. } => Some(StepName::GenerateData),
            Self::Abort { .. } => None,
        }
    }
}

/// Applies review decisions to suspended runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReviewGate {
    max_retries: u32,
    suggestion_limit: usize,
}

impl ReviewGate {
    /// Creates a gate that fails a run on its `max_retries`-th rejection.
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            suggestion_limit: DEFAULT_SUGGESTION_LIMIT,
        }
    }

    /// Creates a gate from engine configuration.
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            suggestion_limit: config.enum_suggestion_limit,
        }
    }

    /// The retry bound.
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Applies `decision` to a suspended run and positions it on the
    /// resulting branch.
    ///
    /// Corrected records replace the generated ones wholesale and are
    /// revalidated against the run's field metadata. An empty correction
    /// keeps the generated records.
    ///
    /// # Errors
    ///
    /// Returns [`HeddleError::InvalidTransition`] if the run is not
    /// suspended. The state is left untouched in that case.
    pub fn apply(&self, state: &mut RunState, decision: ReviewDecision) -> Result<ReviewRoute> {
        if state.status != RunStatus::Suspended {
            return Err(HeddleError::InvalidTransition {
                run_id: state.run_id.clone(),
                status: state.status,
                operation: "apply a review decision",
            });
        }

        state.derived.review_status = Some(decision.status);
        if decision.feedback.is_some() {
            state.derived.review_feedback = decision.feedback;
        }

        let route = match decision.status {
            ReviewStatus::Approved | ReviewStatus::Modified => {
                if decision.status == ReviewStatus::Modified {
                    if let Some(records) = decision.corrected_records.filter(|r| !r.is_empty()) {
                        self.replace_records(state, records);
                    }
                }
                ReviewRoute::CreateArtifact
            }
            ReviewStatus::Rejected => {
                state.retry_count = (state.retry_count + 1).min(self.max_retries);
                if state.retry_count >= self.max_retries {
                    ReviewRoute::Abort {
                        reason: RETRY_LIMIT_EXCEEDED.to_string(),
                    }
                } else {
                    ReviewRoute::Regenerate {
                        attempt: state.retry_count,
                    }
                }
            }
            ReviewStatus::Cancelled => ReviewRoute::Abort {
                reason: CANCELLED_BY_REVIEWER.to_string(),
            },
        };

        match &route {
            ReviewRoute::Abort { reason } => state.mark_failed(None, reason.clone()),
            other => {
                state.next_step = other.next_step();
                state.mark_running();
            }
        }
        Ok(route)
    }

    fn replace_records(&self, state: &mut RunState, records: Vec<GeneratedRecord>) {
        let report = match &state.derived.field_metadata {
            Some(model) if !model.is_empty() => Validator::new(model)
                .with_suggestion_limit(self.suggestion_limit)
                .validate_all(&records),
            _ => crate::ValidationReport::skipped(&records),
        };
        state.derived.generated_records = records;
        state.derived.validation_report = Some(report);
    }
}

impl Default for ReviewGate {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_MAX_RETRIES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RunInputs;
    use chrono::Utc;

    fn suspended() -> RunState {
        let mut state = RunState::new("run-1", RunInputs::new("S1"));
        state.derived.generated_records = vec![
            GeneratedRecord::new("a").with_value("x", "1"),
            GeneratedRecord::new("b").with_value("x", "2"),
        ];
        state.mark_suspended(StepName::HumanReview, Utc::now());
        state
    }

    #[test]
    fn test_parse_status() {
        assert_eq!("approved".parse::<ReviewStatus>().unwrap(), ReviewStatus::Approved);
        assert_eq!(" Rejected ".parse::<ReviewStatus>().unwrap(), ReviewStatus::Rejected);
        assert_eq!("canceled".parse::<ReviewStatus>().unwrap(), ReviewStatus::Cancelled);
    }

    #[test]
    fn test_unknown_status_is_an_error() {
        let err = "pending".parse::<ReviewStatus>().unwrap_err();
        assert!(matches!(err, HeddleError::InvalidDecision(_)));
        assert!(ReviewDecision::parse("lgtm", None, None).is_err());
    }

    #[test]
    fn test_approve_routes_to_create_artifact() {
        let mut state = suspended();
        let route = ReviewGate::new(3)
            .apply(&mut state, ReviewDecision::approve())
            .unwrap();

        assert_eq!(route, ReviewRoute::CreateArtifact);
        assert_eq!(state.status, RunStatus::Running);
        assert_eq!(state.next_step, Some(StepName::CreateArtifact));
        assert_eq!(state.derived.generated_records.len(), 2);
        assert_eq!(state.derived.review_status, Some(ReviewStatus::Approved));
    }

    #[test]
    fn test_modify_replaces_records_and_revalidates() {
        let mut state = suspended();
        let corrected = vec![GeneratedRecord::new("fixed").with_value("x", "9")];
        let route = ReviewGate::new(3)
            .apply(&mut state, ReviewDecision::modify(corrected.clone()))
            .unwrap();

        assert_eq!(route, ReviewRoute::CreateArtifact);
        assert_eq!(state.derived.generated_records, corrected);
        let report = state.derived.validation_report.unwrap();
        assert_eq!(report.total, 1);
        assert!(!report.metadata_available);
    }

    #[test]
    fn test_modify_without_records_keeps_generated() {
        let mut state = suspended();
        let decision = ReviewDecision {
            status: ReviewStatus::Modified,
            corrected_records: None,
            feedback: None,
        };
        ReviewGate::new(3).apply(&mut state, decision).unwrap();
        assert_eq!(state.derived.generated_records.len(), 2);
    }

    #[test]
    fn test_modify_with_empty_records_keeps_generated() {
        let mut state = suspended();
        let route = ReviewGate::new(3)
            .apply(&mut state, ReviewDecision::modify(Vec::new()))
            .unwrap();

        assert_eq!(route, ReviewRoute::CreateArtifact);
        assert_eq!(state.derived.generated_records.len(), 2);
        assert_eq!(state.derived.review_status, Some(ReviewStatus::Modified));
        assert_eq!(state.next_step, Some(StepName::CreateArtifact));
    }

    #[test]
    fn test_reject_routes_back_to_generation() {
        let mut state = suspended();
        let route = ReviewGate::new(3)
            .apply(&mut state, ReviewDecision::reject("use monthly plans"))
            .unwrap();

        assert_eq!(route, ReviewRoute::Regenerate { attempt: 1 });
        assert_eq!(state.retry_count, 1);
        assert_eq!(state.status, RunStatus::Running);
        assert_eq!(state.next_step, Some(StepName::GenerateData));
        assert_eq!(
            state.derived.review_feedback.as_deref(),
            Some("use monthly plans")
        );
    }

    #[test]
    fn test_reject_at_limit_fails() {
        let gate = ReviewGate::new(3);
        let mut state = suspended();
        state.retry_count = 2;

        let route = gate
            .apply(&mut state, ReviewDecision::reject("still wrong"))
            .unwrap();

        assert_eq!(
            route,
            ReviewRoute::Abort {
                reason: RETRY_LIMIT_EXCEEDED.to_string()
            }
        );
        assert_eq!(state.status, RunStatus::Failed);
        assert_eq!(state.retry_count, 3);
        assert_eq!(state.last_error.as_deref(), Some(RETRY_LIMIT_EXCEEDED));
        assert!(state.next_step.is_none());
    }

    #[test]
    fn test_cancel_fails_run() {
        let mut state = suspended();
        let route = ReviewGate::default()
            .apply(&mut state, ReviewDecision::cancel())
            .unwrap();
        assert!(matches!(route, ReviewRoute::Abort { .. }));
        assert_eq!(state.status, RunStatus::Failed);
        assert_eq!(state.last_error.as_deref(), Some(CANCELLED_BY_REVIEWER));
        assert_eq!(state.retry_count, 0);
    }

    #[test]
    fn test_requires_suspended_run() {
        let mut state = RunState::new("run-1", RunInputs::new("S1"));
        state.mark_running();
        let err = ReviewGate::new(3)
            .apply(&mut state, ReviewDecision::approve())
            .unwrap_err();
        assert!(matches!(err, HeddleError::InvalidTransition { .. }));
        assert_eq!(state.status, RunStatus::Running);
        assert!(state.derived.review_status.is_none());
    }

    #[test]
    fn test_decision_deserializes() {
        let json = r#"{"status": "modified", "corrected_records": [{"casedesc": "x", "var": {"a": 1}}]}"#;
        let decision: ReviewDecision = serde_json::from_str(json).unwrap();
        assert_eq!(decision.status, ReviewStatus::Modified);
        assert_eq!(
            decision.corrected_records.unwrap()[0].value("a"),
            Some("1")
        );
    }
}
