//! # Heddle
//!
//! A resumable, human-in-the-loop pipeline that turns a manually authored
//! test case into an automation artifact.
//!
//! A run moves through ten fixed steps: it loads the subject test case,
//! matches it to a scenario and a destination module, picks a template
//! among the scene's existing automation cases, asks a text-completion
//! service for test data rows, validates those rows against the scene's
//! field constraints, and then **suspends** until a human approves,
//! corrects, or rejects them. Approval creates the artifact; rejection
//! regenerates the rows, up to a bounded number of times.
//!
//! Every step boundary is checkpointed, so a suspended run survives process
//! restarts and can be resumed days later from a different process.
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use heddle::{Collaborators, MemoryCheckpointStore, Pipeline, ReviewDecision, RunInputs};
//!
//! let pipeline = Pipeline::builder()
//!     .collaborators(Collaborators::new(completion, platform, subjects, metadata))
//!     .build()?;
//! let mut store = MemoryCheckpointStore::new();
//!
//! // Runs until the records need review.
//! let state = pipeline.start("run-1", RunInputs::new("TC-42"), &mut store).await?;
//!
//! // A reviewer looks at the pending records...
//! let snapshot = pipeline.inspect("run-1", &store).await?;
//!
//! // ...and approves them.
//! let state = pipeline.resume("run-1", ReviewDecision::approve(), &mut store).await?;
//! ```
//!
//! ## Design Philosophy
//!
//! The name comes from the **heddle**, the loom part that lifts warp threads
//! so the weft can pass. Each step lifts one more piece of the artifact into
//! place, and the human reviewer decides when the shuttle goes through.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![forbid(unsafe_code)]

pub mod checkpoint;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod event;
pub mod extract;
pub mod metadata;
pub mod pipeline;
pub mod review;
pub mod run;
pub mod status;
pub mod step;
pub mod steps;
pub mod validation;

pub use checkpoint::{CheckpointStore, MemoryCheckpointStore};
#[cfg(feature = "sqlite")]
pub use checkpoint::SqliteCheckpointStore;
pub use collaborators::{
    ArtifactResult, ArtifactSpec, AutomationPlatform, Candidate, Circulation, Collaborators,
    HeaderField, MetadataSource, ReviewNotifier, Scenario, Subject, SubjectRepository,
    TaskStatusSink, TaskStatusUpdate, TemplateDetail, TextCompletion,
};
pub use config::EngineConfig;
pub use error::{HeddleError, Result};
pub use event::RunEvent;
pub use metadata::{FieldDefinition, FieldMetadataModel, LinkageRule, MetadataCache};
pub use pipeline::{Pipeline, PipelineBuilder, RunSnapshot};
pub use review::{ReviewDecision, ReviewGate, ReviewRoute, ReviewStatus};
pub use run::{GeneratedRecord, RunDerived, RunInputs, RunState, RunStatus};
pub use status::{RunReport, StepEntry, StepStatus};
pub use step::{ReviewPackage, Step, StepContext, StepName, StepOutcome};
pub use validation::{ValidationError, ValidationErrorKind, ValidationReport, Validator};

/// Returns the crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_returns_valid_semver() {
        let version = version();
        assert!(!version.is_empty());
        assert!(version.contains('.'));
    }
}
