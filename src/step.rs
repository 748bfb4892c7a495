//! Step types for the Heddle pipeline.
//!
//! This module defines the fixed step sequence, the [`Step`] trait each
//! step implements, what a step can return, and the review package a
//! suspending step hands to humans.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Debug};
use std::str::FromStr;

use crate::collaborators::{Collaborators, HeaderField, Scenario, Subject};
use crate::metadata::FieldMetadataModel;
use crate::validation::ValidationReport;
use crate::{EngineConfig, GeneratedRecord, HeddleError, Result, RunState};

/// The ten steps of a run, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepName {
    /// Fetch the subject test case.
    LoadSubject,
    /// Pick the scenario the artifact belongs to.
    MatchTargetContext,
    /// Pick the destination module.
    LoadDestinationConfig,
    /// List template candidates for the scenario.
    FetchCandidateTemplates,
    /// Choose one candidate.
    SelectTemplate,
    /// Fetch the template definition and the scene schema.
    FetchTemplateDetail,
    /// Produce candidate records.
    GenerateData,
    /// Annotate records with a validation report.
    ValidateData,
    /// Suspend for human review.
    HumanReview,
    /// Create the artifact on the automation platform.
    CreateArtifact,
}

impl StepName {
    /// Every step, in order.
    pub const ALL: [StepName; 10] = [
        StepName::LoadSubject,
        StepName::MatchTargetContext,
        StepName::LoadDestinationConfig,
        StepName::FetchCandidateTemplates,
        StepName::SelectTemplate,
        StepName::FetchTemplateDetail,
        StepName::GenerateData,
        StepName::ValidateData,
        StepName::HumanReview,
        StepName::CreateArtifact,
    ];

    /// The first step of every run.
    pub fn first() -> Self {
        Self::ALL[0]
    }

    /// Position in [`ALL`](Self::ALL).
    pub fn index(self) -> usize {
        self as usize
    }

    /// The snake_case name used in logs and storage.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LoadSubject => "load_subject",
            Self::MatchTargetContext => "match_target_context",
            Self::LoadDestinationConfig => "load_destination_config",
            Self::FetchCandidateTemplates => "fetch_candidate_templates",
            Self::SelectTemplate => "select_template",
            Self::FetchTemplateDetail => "fetch_template_detail",
            Self::GenerateData => "generate_data",
            Self::ValidateData => "validate_data",
            Self::HumanReview => "human_review",
            Self::CreateArtifact => "create_artifact",
        }
    }

    /// The step that unconditionally follows this one.
    ///
    /// `None` after `human_review` (the review gate decides) and after
    /// `create_artifact` (the run is done).
    pub fn successor(self) -> Option<Self> {
        match self {
            Self::HumanReview | Self::CreateArtifact => None,
            other => Self::ALL.get(other.index() + 1).copied(),
        }
    }

    /// The step before this one in the fixed order.
    pub fn predecessor(self) -> Option<Self> {
        self.index().checked_sub(1).map(|i| Self::ALL[i])
    }

    /// Progress once this step has completed, 10 to 100.
    pub fn progress_percent(self) -> u8 {
        ((self.index() + 1) * 100 / Self::ALL.len()) as u8
    }
}

impl fmt::Display for StepName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StepName {
    type Err = HeddleError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|step| step.as_str() == s)
            .ok_or_else(|| HeddleError::StepExecution(format!("unknown step '{}'", s)))
    }
}

/// What a human needs to decide on a suspended run.
///
/// Persisted separately from the run snapshot so it can be fetched without
/// resuming, and pushed to the review notifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewPackage {
    /// The run awaiting review.
    pub run_id: String,
    /// Name shown to the reviewer.
    pub display_name: String,
    /// The generated records.
    pub records: Vec<GeneratedRecord>,
    /// Their validation report.
    pub validation_report: Option<ValidationReport>,
    /// The scene schema, for editing enum fields.
    pub field_metadata: Option<FieldMetadataModel>,
    /// Template columns.
    #[serde(default)]
    pub header_fields: Vec<HeaderField>,
    /// The matched scenario.
    pub matched_scenario: Option<Scenario>,
    /// The subject test case.
    pub subject: Option<Subject>,
    /// Rejections so far.
    #[serde(default)]
    pub retry_count: u32,
    /// When review was requested.
    pub requested_at: DateTime<Utc>,
}

impl ReviewPackage {
    /// Builds the package from a run's current state.
    pub fn from_state(state: &RunState) -> Self {
        let derived = &state.derived;
        Self {
            run_id: state.run_id.clone(),
            display_name: state.display_name().to_string(),
            records: derived.generated_records.clone(),
            validation_report: derived.validation_report.clone(),
            field_metadata: derived.field_metadata.clone(),
            header_fields: derived.header_fields.clone(),
            matched_scenario: derived.matched_scenario.clone(),
            subject: derived.subject.clone(),
            retry_count: state.retry_count,
            requested_at: Utc::now(),
        }
    }
}

/// The outcome of executing a step.
///
/// A step that fails returns `Err`; the pipeline records it on the run.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// Step completed, proceed to the next one.
    Continue,

    /// Pause the run until a human decides.
    Suspend(Box<ReviewPackage>),
}

/// Per-process context handed to every step.
#[derive(Debug, Clone)]
pub struct StepContext {
    /// Engine configuration.
    pub config: EngineConfig,

    /// External systems.
    pub collaborators: Collaborators,
}

impl StepContext {
    /// Creates a step context.
    pub fn new(config: EngineConfig, collaborators: Collaborators) -> Self {
        Self {
            config,
            collaborators,
        }
    }
}

/// A single named unit of work in the pipeline.
///
/// A step reads and writes [`RunState`] and may call collaborators. The
/// pipeline runs it against a working copy of the state and only keeps the
/// changes when it returns `Ok`, so a failing step never leaves partial
/// writes behind in the snapshot.
///
/// # Examples
///
/// ```
/// use heddle::{Result, RunState, Step, StepContext, StepName, StepOutcome};
/// use async_trait::async_trait;
///
/// #[derive(Debug)]
/// struct FixedModule;
///
/// #[async_trait]
/// impl Step for FixedModule {
///     fn name(&self) -> StepName {
///         StepName::LoadDestinationConfig
///     }
///
///     async fn execute(&self, state: &mut RunState, _ctx: &StepContext) -> Result<StepOutcome> {
///         state.derived.module_id = Some("42".to_string());
///         Ok(StepOutcome::Continue)
///     }
/// }
/// ```
#[async_trait]
pub trait Step: Debug + Send + Sync {
    /// Which of the ten steps this implements.
    fn name(&self) -> StepName;

    /// Executes the step.
    ///
    /// # Errors
    ///
    /// Any error fails the run with the error's message as `last_error`.
    async fn execute(&self, state: &mut RunState, ctx: &StepContext) -> Result<StepOutcome>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RunInputs;

    #[test]
    fn test_step_order() {
        assert_eq!(StepName::first(), StepName::LoadSubject);
        for (i, step) in StepName::ALL.iter().enumerate() {
            assert_eq!(step.index(), i);
        }
        assert_eq!(
            StepName::GenerateData.successor(),
            Some(StepName::ValidateData)
        );
        assert_eq!(StepName::HumanReview.successor(), None);
        assert_eq!(StepName::CreateArtifact.successor(), None);
        assert_eq!(StepName::LoadSubject.predecessor(), None);
        assert_eq!(
            StepName::HumanReview.predecessor(),
            Some(StepName::ValidateData)
        );
    }

    #[test]
    fn test_progress_percent() {
        assert_eq!(StepName::LoadSubject.progress_percent(), 10);
        assert_eq!(StepName::ValidateData.progress_percent(), 80);
        assert_eq!(StepName::CreateArtifact.progress_percent(), 100);
    }

    #[test]
    fn test_step_name_round_trip() {
        for step in StepName::ALL {
            assert_eq!(step.as_str().parse::<StepName>().unwrap(), step);
            let json = serde_json::to_string(&step).unwrap();
            assert_eq!(json, format!("\"{}\"", step.as_str()));
        }
        assert!("unknown".parse::<StepName>().is_err());
    }

    #[test]
    fn test_review_package_from_state() {
        let mut state = RunState::new("run-1", RunInputs::new("S1"));
        state.derived.artifact_name = Some("Premium_auto".to_string());
        state.derived.generated_records = vec![GeneratedRecord::new("a")];
        state.retry_count = 1;

        let package = ReviewPackage::from_state(&state);
        assert_eq!(package.run_id, "run-1");
        assert_eq!(package.display_name, "Premium_auto");
        assert_eq!(package.records.len(), 1);
        assert_eq!(package.retry_count, 1);
        assert!(package.validation_report.is_none());
    }

    #[test]
    fn test_step_trait_object() {
        #[derive(Debug)]
        struct Noop;

        #[async_trait]
        impl Step for Noop {
            fn name(&self) -> StepName {
                StepName::ValidateData
            }

            async fn execute(&self, _state: &mut RunState, _ctx: &StepContext) -> Result<StepOutcome> {
                Ok(StepOutcome::Continue)
            }
        }

        let step: Box<dyn Step> = Box::new(Noop);
        assert_eq!(step.name(), StepName::ValidateData);
    }
}
