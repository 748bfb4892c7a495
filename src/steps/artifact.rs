//! Step 10: artifact creation.

use async_trait::async_trait;
use tracing::info;

use crate::collaborators::{ArtifactSpec, Circulation};
use crate::{HeddleError, Result, RunState, Step, StepContext, StepName, StepOutcome};

fn missing(what: &str) -> HeddleError {
    HeddleError::StepExecution(format!("cannot create artifact without {}", what))
}

/// Creates the automation case from the template and the final records.
///
/// This is the only non-idempotent call of a run. It is reached once per
/// approved review.
#[derive(Debug, Clone, Copy, Default)]
pub struct CreateArtifact;

impl CreateArtifact {
    /// Assembles what the platform receives.
    pub fn build_spec(state: &RunState, ctx: &StepContext) -> Result<ArtifactSpec> {
        let derived = &state.derived;
        if derived.generated_records.is_empty() {
            return Err(missing("records"));
        }
        let detail = derived
            .template_detail
            .as_ref()
            .ok_or_else(|| missing("a template"))?;
        let scene_id = derived.scene_id.clone().ok_or_else(|| missing("a scene"))?;
        let module_id = derived
            .module_id
            .clone()
            .ok_or_else(|| missing("a module"))?;

        Ok(ArtifactSpec {
            name: state.display_name().to_string(),
            module_id,
            scene_id,
            scenario_type: state
                .inputs
                .scenario_type
                .clone()
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| ctx.config.default_scenario_type.clone()),
            description: state.inputs.description.clone(),
            tags: derived.circulation.iter().map(Circulation::tag).collect(),
            template: detail.with_body(derived.generated_records.clone()),
        })
    }
}

#[async_trait]
impl Step for CreateArtifact {
    fn name(&self) -> StepName {
        StepName::CreateArtifact
    }

    async fn execute(&self, state: &mut RunState, ctx: &StepContext) -> Result<StepOutcome> {
        let spec = Self::build_spec(state, ctx)?;
        let result = ctx.collaborators.platform.create_artifact(&spec).await?;

        info!(
            artifact_id = result.id.as_deref().unwrap_or("unknown"),
            records = spec.records().len(),
            "created artifact"
        );
        state.derived.artifact = Some(result);
        Ok(StepOutcome::Continue)
    }
}
