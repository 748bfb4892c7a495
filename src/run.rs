//! Run records for the Heddle pipeline.
//!
//! A [`RunState`] is the one record threaded through every step of a run.
//! It is what the checkpoint store persists and what callers inspect.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::collaborators::{
    ArtifactResult, Candidate, Circulation, HeaderField, Scenario, Subject, TemplateDetail,
};
use crate::metadata::{FieldMetadataModel, LinkageRule};
use crate::review::ReviewStatus;
use crate::validation::ValidationReport;
use crate::StepName;

/// The lifecycle status of a run.
///
/// Only `Suspended`, `Succeeded` and `Failed` are observable across a
/// process boundary; `Running` is transient within one pipeline call unless
/// the process died mid-run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Created, no step has run yet.
    Initialized,

    /// Steps are executing.
    Running,

    /// Paused awaiting a human review decision.
    Suspended,

    /// The artifact was created.
    Succeeded,

    /// A step failed, retries ran out, or the reviewer cancelled.
    Failed,
}

impl RunStatus {
    /// Returns true for `Succeeded` and `Failed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    /// Returns the snake_case name used in storage and status reports.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initialized => "initialized",
            Self::Running => "running",
            Self::Suspended => "suspended",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Facts supplied when a run starts. Never modified afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunInputs {
    /// Identifier of the manually authored test case.
    pub subject_id: String,

    /// Free-text description carried onto the artifact.
    #[serde(default)]
    pub description: String,

    /// Artifact name; derived from the subject title when absent.
    #[serde(default)]
    pub name: Option<String>,

    /// Pre-selected scene; skips scenario matching.
    #[serde(default)]
    pub scene_id: Option<String>,

    /// Pre-selected destination module.
    #[serde(default)]
    pub module_id: Option<String>,

    /// Scenario type for the artifact (`API` when absent).
    #[serde(default)]
    pub scenario_type: Option<String>,
}

impl RunInputs {
    /// Creates inputs for the given subject.
    pub fn new(subject_id: impl Into<String>) -> Self {
        Self {
            subject_id: subject_id.into(),
            ..Self::default()
        }
    }

    /// Sets the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Sets the artifact name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Pre-selects the scene.
    pub fn with_scene(mut self, scene_id: impl Into<String>) -> Self {
        self.scene_id = Some(scene_id.into());
        self
    }

    /// Pre-selects the destination module.
    pub fn with_module(mut self, module_id: impl Into<String>) -> Self {
        self.module_id = Some(module_id.into());
        self
    }
}

/// Fields populated by steps. Each field has exactly one writer step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunDerived {
    /// Written by `load_subject`.
    pub subject: Option<Subject>,
    /// Written by `load_subject`.
    pub artifact_name: Option<String>,
    /// Written by `match_target_context`.
    pub scene_id: Option<String>,
    /// Written by `match_target_context`.
    pub matched_scenario: Option<Scenario>,
    /// Written by `load_destination_config`.
    pub module_id: Option<String>,
    /// Written by `fetch_candidate_templates`.
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    /// Written by `select_template`.
    pub selected_template: Option<Candidate>,
    /// Written by `fetch_template_detail`.
    pub template_detail: Option<TemplateDetail>,
    /// Written by `fetch_template_detail`.
    #[serde(default)]
    pub header_fields: Vec<HeaderField>,
    /// Written by `fetch_template_detail`.
    #[serde(default)]
    pub circulation: Vec<Circulation>,
    /// Written by `fetch_template_detail`.
    pub field_metadata: Option<FieldMetadataModel>,
    /// Written by `fetch_template_detail`.
    #[serde(default)]
    pub linkage_rules: Vec<LinkageRule>,
    /// Written by `generate_data`; replaced wholesale by a `modified` review.
    #[serde(default)]
    pub generated_records: Vec<GeneratedRecord>,
    /// Written by `validate_data`.
    pub validation_report: Option<ValidationReport>,
    /// Written by the review gate.
    pub review_status: Option<ReviewStatus>,
    /// Written by the review gate.
    pub review_feedback: Option<String>,
    /// Written by `create_artifact`.
    pub artifact: Option<ArtifactResult>,
}

/// How a recorded step attempt ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StepRecordOutcome {
    /// The step ran to completion.
    Completed,
    /// The step asked for human review.
    Suspended,
    /// The step failed.
    Failed {
        /// The failure message.
        error: String,
    },
}

/// One entry in a run's step history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    /// The step that ran.
    pub step: StepName,
    /// The retry round the step ran in.
    pub attempt: u32,
    /// How it ended.
    #[serde(flatten)]
    pub outcome: StepRecordOutcome,
    /// When it started.
    pub started_at: DateTime<Utc>,
    /// When it ended.
    pub completed_at: DateTime<Utc>,
}

/// The mutable record threaded through all steps of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    /// Caller-chosen identifier; the checkpoint key.
    pub run_id: String,

    /// Immutable start facts.
    pub inputs: RunInputs,

    /// Step outputs.
    #[serde(default)]
    pub derived: RunDerived,

    /// The last step that completed (or suspended).
    pub current_step: Option<StepName>,

    /// The step that runs next; `None` while suspended or terminal.
    pub next_step: Option<StepName>,

    /// Lifecycle status.
    pub status: RunStatus,

    /// Rejected reviews so far.
    pub retry_count: u32,

    /// Human-readable failure description.
    pub last_error: Option<String>,

    /// Every step attempt, oldest first.
    #[serde(default)]
    pub history: Vec<StepRecord>,

    /// When the run was started.
    pub created_at: DateTime<Utc>,

    /// When the record last changed.
    pub updated_at: DateTime<Utc>,
}

impl RunState {
    /// Creates a run in `Initialized`, positioned before the first step.
    pub fn new(run_id: impl Into<String>, inputs: RunInputs) -> Self {
        let now = Utc::now();
        Self {
            run_id: run_id.into(),
            inputs,
            derived: RunDerived::default(),
            current_step: None,
            next_step: Some(StepName::first()),
            status: RunStatus::Initialized,
            retry_count: 0,
            last_error: None,
            history: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Returns true once the run has succeeded or failed.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Marks the run as executing steps.
    pub fn mark_running(&mut self) {
        self.status = RunStatus::Running;
        self.touch();
    }

    /// Records a completed step and positions the run at its successor.
    pub fn record_completed(&mut self, step: StepName, started_at: DateTime<Utc>) {
        self.push_history(step, StepRecordOutcome::Completed, started_at);
        self.current_step = Some(step);
        self.next_step = step.successor();
    }

    /// Records a suspension request from `step`.
    pub fn mark_suspended(&mut self, step: StepName, started_at: DateTime<Utc>) {
        self.push_history(step, StepRecordOutcome::Suspended, started_at);
        self.current_step = Some(step);
        self.next_step = None;
        self.status = RunStatus::Suspended;
    }

    /// Records a failure. `current_step` keeps pointing at the last step
    /// that succeeded, so callers can tell which side effects happened.
    pub fn mark_failed(&mut self, step: Option<StepName>, error: impl Into<String>) {
        let error = error.into();
        if let Some(step) = step {
            let started_at = Utc::now();
            self.push_history(
                step,
                StepRecordOutcome::Failed {
                    error: error.clone(),
                },
                started_at,
            );
        } else {
            self.touch();
        }
        self.last_error = Some(error);
        self.next_step = None;
        self.status = RunStatus::Failed;
    }

    /// Same as [`mark_failed`](Self::mark_failed) but keeps the real start
    /// time of the failed step.
    pub(crate) fn mark_step_failed(
        &mut self,
        step: StepName,
        error: impl Into<String>,
        started_at: DateTime<Utc>,
    ) {
        let error = error.into();
        self.push_history(
            step,
            StepRecordOutcome::Failed {
                error: error.clone(),
            },
            started_at,
        );
        self.last_error = Some(error);
        self.next_step = None;
        self.status = RunStatus::Failed;
    }

    /// Marks the run as finished successfully.
    pub fn mark_succeeded(&mut self) {
        self.status = RunStatus::Succeeded;
        self.next_step = None;
        self.touch();
    }

    /// Progress as a 0-100 percentage.
    pub fn progress(&self) -> u8 {
        match self.status {
            RunStatus::Succeeded => 100,
            RunStatus::Suspended => StepName::HumanReview
                .predecessor()
                .map(StepName::progress_percent)
                .unwrap_or(0),
            _ => self
                .current_step
                .map(StepName::progress_percent)
                .unwrap_or(0),
        }
    }

    /// The name shown to reviewers: the artifact name, else the run id.
    pub fn display_name(&self) -> &str {
        self.derived
            .artifact_name
            .as_deref()
            .or(self.inputs.name.as_deref())
            .unwrap_or(&self.run_id)
    }

    fn push_history(
        &mut self,
        step: StepName,
        outcome: StepRecordOutcome,
        started_at: DateTime<Utc>,
    ) {
        let now = Utc::now();
        self.history.push(StepRecord {
            step,
            attempt: self.retry_count,
            outcome,
            started_at,
            completed_at: now,
        });
        self.updated_at = now;
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// One candidate row of test data.
///
/// Accepts the automation platform's wire names (`casedesc`, `var`,
/// `hoperesult`, `iscaserun`, `casezf`) as well as its own. Values are
/// always strings; numbers and booleans on the wire are stringified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedRecord {
    /// What the row exercises.
    #[serde(default, alias = "casedesc")]
    pub case_description: String,

    /// Field id to value.
    #[serde(default, alias = "var", deserialize_with = "string_values")]
    pub values: BTreeMap<String, String>,

    /// What the row should produce.
    #[serde(default, alias = "hoperesult")]
    pub expected_outcome: String,

    /// Whether the row runs; copied through to the artifact.
    #[serde(default = "default_true", alias = "iscaserun")]
    pub should_execute: bool,

    /// Positive or negative case marker.
    #[serde(default, alias = "casezf", skip_serializing_if = "Option::is_none")]
    pub polarity: Option<String>,
}

impl Default for GeneratedRecord {
    fn default() -> Self {
        Self {
            case_description: String::new(),
            values: BTreeMap::new(),
            expected_outcome: String::new(),
            should_execute: true,
            polarity: None,
        }
    }
}

impl GeneratedRecord {
    /// Creates a record with a description and no values.
    pub fn new(case_description: impl Into<String>) -> Self {
        Self {
            case_description: case_description.into(),
            ..Self::default()
        }
    }

    /// Adds a field value.
    pub fn with_value(mut self, field_id: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(field_id.into(), value.into());
        self
    }

    /// Sets the expected outcome.
    pub fn with_expected(mut self, expected: impl Into<String>) -> Self {
        self.expected_outcome = expected.into();
        self
    }

    /// Returns a non-empty value for `field_id`.
    pub fn value(&self, field_id: &str) -> Option<&str> {
        self.values
            .get(field_id)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }
}

fn default_true() -> bool {
    true
}

fn string_values<'de, D>(deserializer: D) -> std::result::Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<BTreeMap<String, serde_json::Value>>::deserialize(deserializer)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .map(|(k, v)| (k, crate::metadata::value_to_string(&v)))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_status_serialize() {
        let json = serde_json::to_string(&RunStatus::Suspended).unwrap();
        assert_eq!(json, r#""suspended""#);
    }

    #[test]
    fn test_run_status_terminal() {
        assert!(RunStatus::Succeeded.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(!RunStatus::Suspended.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
    }

    #[test]
    fn test_run_state_new() {
        let state = RunState::new("run-1", RunInputs::new("S1"));
        assert_eq!(state.status, RunStatus::Initialized);
        assert_eq!(state.next_step, Some(StepName::LoadSubject));
        assert!(state.current_step.is_none());
        assert_eq!(state.retry_count, 0);
        assert_eq!(state.progress(), 0);
    }

    #[test]
    fn test_record_completed_advances() {
        let mut state = RunState::new("run-1", RunInputs::new("S1"));
        state.mark_running();
        state.record_completed(StepName::LoadSubject, Utc::now());

        assert_eq!(state.current_step, Some(StepName::LoadSubject));
        assert_eq!(state.next_step, Some(StepName::MatchTargetContext));
        assert_eq!(state.history.len(), 1);
        assert_eq!(state.history[0].outcome, StepRecordOutcome::Completed);
        assert_eq!(state.progress(), 10);
    }

    #[test]
    fn test_mark_failed_keeps_last_successful_step() {
        let mut state = RunState::new("run-1", RunInputs::new("S1"));
        state.record_completed(StepName::LoadSubject, Utc::now());
        state.mark_failed(Some(StepName::MatchTargetContext), "no scenarios");

        assert_eq!(state.status, RunStatus::Failed);
        assert_eq!(state.current_step, Some(StepName::LoadSubject));
        assert_eq!(state.last_error.as_deref(), Some("no scenarios"));
        assert!(state.next_step.is_none());
        assert!(matches!(
            state.history.last().unwrap().outcome,
            StepRecordOutcome::Failed { .. }
        ));
    }

    #[test]
    fn test_suspended_progress() {
        let mut state = RunState::new("run-1", RunInputs::new("S1"));
        state.mark_suspended(StepName::HumanReview, Utc::now());
        assert_eq!(state.status, RunStatus::Suspended);
        assert_eq!(state.progress(), 80);
    }

    #[test]
    fn test_run_state_round_trip() {
        let mut state = RunState::new("run-1", RunInputs::new("S1").with_scene("scene-9"));
        state.record_completed(StepName::LoadSubject, Utc::now());
        let json = serde_json::to_string(&state).unwrap();
        let back: RunState = serde_json::from_str(&json).unwrap();
        assert_eq!(back.run_id, "run-1");
        assert_eq!(back.inputs.scene_id.as_deref(), Some("scene-9"));
        assert_eq!(back.current_step, Some(StepName::LoadSubject));
        assert_eq!(back.history, state.history);
    }

    #[test]
    fn test_generated_record_accepts_platform_names() {
        let json = r#"{
            "casezf": "positive",
            "casedesc": "monthly premium",
            "var": { "plan": "A", "age": 30, "vip": true },
            "hoperesult": "policy issued"
        }"#;
        let record: GeneratedRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.case_description, "monthly premium");
        assert_eq!(record.value("plan"), Some("A"));
        assert_eq!(record.value("age"), Some("30"));
        assert_eq!(record.value("vip"), Some("true"));
        assert_eq!(record.expected_outcome, "policy issued");
        assert!(record.should_execute);
        assert_eq!(record.polarity.as_deref(), Some("positive"));
    }

    #[test]
    fn test_generated_record_default_executes() {
        assert!(GeneratedRecord::default().should_execute);
        assert!(GeneratedRecord::new("row").should_execute);
        let record: GeneratedRecord = serde_json::from_str(r#"{"casedesc": "row"}"#).unwrap();
        assert_eq!(record, GeneratedRecord::new("row"));
    }

    #[test]
    fn test_generated_record_empty_value_is_none() {
        let record = GeneratedRecord::new("row").with_value("plan", "");
        assert_eq!(record.value("plan"), None);
        assert_eq!(record.value("missing"), None);
    }

    #[test]
    fn test_display_name_falls_back_to_run_id() {
        let state = RunState::new("run-7", RunInputs::new("S1"));
        assert_eq!(state.display_name(), "run-7");
    }
}
