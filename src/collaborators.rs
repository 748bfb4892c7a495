//! Contracts for the external systems a run talks to.
//!
//! Steps never reach outside the process directly; they call these traits
//! through the [`Collaborators`] bundle in their
//! [`StepContext`](crate::StepContext). Implementations are expected to
//! apply their own timeouts and surface them as ordinary errors.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::sync::Arc;

use crate::metadata::{lenient_string, lenient_vec, FieldMetadataModel, MetadataCache};
use crate::{GeneratedRecord, Result, ReviewPackage, RunStatus, StepName};

/// The manually authored test case a run starts from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Subject {
    /// Repository identifier.
    pub id: String,
    /// Title, used to name the artifact.
    pub title: String,
    /// Free-text description.
    pub description: String,
    /// Preconditions.
    pub preconditions: String,
    /// Steps, as authored.
    pub test_steps: String,
    /// Expected result.
    pub expected_result: String,
    /// Kind of test.
    pub test_type: String,
    /// Priority label.
    pub priority: String,
    /// Owning business line.
    pub business_line: String,
}

/// A target scenario a subject can be matched to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Scenario {
    /// The scene id used by the automation platform.
    #[serde(alias = "scenario_code", deserialize_with = "lenient_string")]
    pub code: String,
    /// Display name.
    pub name: String,
    /// Free-text description.
    pub description: String,
    /// Owning business line.
    pub business_line: String,
    /// Sales channel.
    pub channel: String,
    /// Product module.
    pub module: String,
}

impl Scenario {
    /// Creates a scenario with a code and a name.
    pub fn new(code: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
            ..Self::default()
        }
    }
}

/// A variable group attached to a template, turned into an artifact tag.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Circulation {
    /// Group name.
    pub name: String,
    /// Variable group key.
    #[serde(deserialize_with = "lenient_string")]
    pub vargroup: String,
}

impl Circulation {
    /// The artifact tag for this group: `name(vargroup)`.
    pub fn tag(&self) -> String {
        format!("{}({})", self.name, self.vargroup)
    }
}

/// An existing automation case that may serve as the template.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Candidate {
    /// Platform identifier.
    #[serde(alias = "usercaseId", deserialize_with = "lenient_string")]
    pub id: String,
    /// Display name.
    pub name: String,
    /// Free-text description.
    #[serde(deserialize_with = "lenient_string")]
    pub description: String,
    /// Variable groups.
    #[serde(deserialize_with = "lenient_vec")]
    pub circulation: Vec<Circulation>,
}

impl Candidate {
    /// Creates a candidate with an id and a name.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            ..Self::default()
        }
    }
}

/// One column of a template's data table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HeaderField {
    /// Field id; keys of [`GeneratedRecord::values`].
    #[serde(alias = "row")]
    pub field_id: String,
    /// Column label.
    #[serde(default, alias = "rowName")]
    pub display_name: String,
    /// Widget type hint.
    #[serde(default, alias = "type", skip_serializing_if = "Option::is_none")]
    pub field_type: Option<String>,
    /// Platform attributes this crate does not interpret.
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

impl HeaderField {
    /// Creates a column.
    pub fn new(field_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            field_id: field_id.into(),
            display_name: display_name.into(),
            ..Self::default()
        }
    }
}

/// The data table of a template: columns and example rows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CaseDefinition {
    /// Columns.
    #[serde(default, deserialize_with = "lenient_vec")]
    pub header: Vec<HeaderField>,
    /// Rows.
    #[serde(default, deserialize_with = "lenient_vec")]
    pub body: Vec<GeneratedRecord>,
    /// Platform attributes this crate does not interpret.
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

/// Full definition of the selected template.
///
/// The new artifact is this document with its body replaced, so every
/// attribute the platform sent is kept in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TemplateDetail {
    /// Platform identifier.
    #[serde(default, alias = "usercaseId", deserialize_with = "lenient_string")]
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Columns and example rows.
    #[serde(default, rename = "caseDefine")]
    pub definition: CaseDefinition,
    /// Platform attributes this crate does not interpret.
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

impl TemplateDetail {
    /// The first example row, used to show the completion the expected shape.
    pub fn example_record(&self) -> Option<&GeneratedRecord> {
        self.definition.body.first()
    }

    /// A copy whose body is `records`.
    pub fn with_body(&self, records: Vec<GeneratedRecord>) -> Self {
        let mut detail = self.clone();
        detail.definition.body = records;
        detail
    }
}

/// Everything the platform needs to create the new automation case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactSpec {
    /// Case name.
    pub name: String,
    /// Destination module.
    pub module_id: String,
    /// Scene the case belongs to.
    pub scene_id: String,
    /// Scenario type, e.g. `API`.
    pub scenario_type: String,
    /// Free-text description.
    pub description: String,
    /// Tags derived from the template's variable groups.
    pub tags: Vec<String>,
    /// The template with its body replaced by the final records.
    pub template: TemplateDetail,
}

impl ArtifactSpec {
    /// The records the artifact will carry.
    pub fn records(&self) -> &[GeneratedRecord] {
        &self.template.definition.body
    }
}

/// What the platform returned after creating the case.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArtifactResult {
    /// Identifier of the new case, when the platform reported one.
    #[serde(default, alias = "usercaseId", skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// The rest of the platform response.
    #[serde(flatten)]
    pub data: Map<String, JsonValue>,
}

/// A task-tracker update sent after every transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStatusUpdate {
    /// The run.
    pub run_id: String,
    /// Its status.
    pub status: RunStatus,
    /// The last step that ran.
    pub current_step: Option<StepName>,
    /// 0-100.
    pub progress: u8,
    /// Failure description, for failed runs.
    pub error: Option<String>,
    /// When the transition happened.
    pub updated_at: DateTime<Utc>,
}

/// Opaque text completion. Output is untrusted text.
#[async_trait]
pub trait TextCompletion: Send + Sync {
    /// Completes `prompt`.
    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// The automation platform that owns templates and the created artifact.
#[async_trait]
pub trait AutomationPlatform: Send + Sync {
    /// Lists template candidates for a scene.
    async fn list_candidates(&self, scene_id: &str) -> Result<Vec<Candidate>>;

    /// Fetches the full definition of one candidate.
    async fn fetch_detail(&self, candidate_id: &str) -> Result<TemplateDetail>;

    /// Creates the artifact. Not idempotent.
    async fn create_artifact(&self, spec: &ArtifactSpec) -> Result<ArtifactResult>;
}

/// Where scene schemas come from.
#[async_trait]
pub trait MetadataSource: Send + Sync {
    /// Fetches the schema of one scene.
    async fn fetch_schema(&self, scene_id: &str) -> Result<FieldMetadataModel>;
}

/// Read access to the test-case repository and its settings.
#[async_trait]
pub trait SubjectRepository: Send + Sync {
    /// Loads a subject, `None` when it does not exist.
    async fn load_subject(&self, subject_id: &str) -> Result<Option<Subject>>;

    /// Lists the active scenarios a subject can be matched to.
    async fn list_scenarios(&self) -> Result<Vec<Scenario>>;

    /// The configured default destination module, if any.
    async fn default_module_id(&self) -> Result<Option<String>> {
        Ok(None)
    }
}

/// Write-only task tracker. Failures never fail a run.
#[async_trait]
pub trait TaskStatusSink: Send + Sync {
    /// Records a transition.
    async fn report(&self, update: &TaskStatusUpdate) -> Result<()>;
}

/// Push channel for review-ready runs. Delivery is best-effort.
#[async_trait]
pub trait ReviewNotifier: Send + Sync {
    /// Announces that a run awaits review.
    async fn notify(&self, package: &ReviewPackage) -> Result<()>;
}

/// The collaborators every step can reach.
#[derive(Clone)]
pub struct Collaborators {
    /// Text completion.
    pub completion: Arc<dyn TextCompletion>,
    /// Automation platform.
    pub platform: Arc<dyn AutomationPlatform>,
    /// Test-case repository.
    pub subjects: Arc<dyn SubjectRepository>,
    /// Scene schemas, cached per process.
    pub metadata: MetadataCache,
}

impl Collaborators {
    /// Bundles collaborators, putting a fresh cache in front of `metadata`.
    pub fn new(
        completion: Arc<dyn TextCompletion>,
        platform: Arc<dyn AutomationPlatform>,
        subjects: Arc<dyn SubjectRepository>,
        metadata: Arc<dyn MetadataSource>,
    ) -> Self {
        Self {
            completion,
            platform,
            subjects,
            metadata: MetadataCache::new(metadata),
        }
    }

    /// Replaces the metadata cache, e.g. to share one across pipelines.
    pub fn with_metadata_cache(mut self, cache: MetadataCache) -> Self {
        self.metadata = cache;
        self
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators")
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}
