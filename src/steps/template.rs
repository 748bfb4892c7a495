//! Steps 4-6: candidate templates, selection, template detail.

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::{match_reply, prompt};
use crate::extract::truncate_chars;
use crate::{HeddleError, Result, RunState, Step, StepContext, StepName, StepOutcome};

fn require_scene(state: &RunState) -> Result<String> {
    state
        .derived
        .scene_id
        .clone()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HeddleError::StepExecution("no scene selected".to_string()))
}

/// Lists the automation cases of the scene.
#[derive(Debug, Clone, Copy, Default)]
pub struct FetchCandidateTemplates;

#[async_trait]
impl Step for FetchCandidateTemplates {
    fn name(&self) -> StepName {
        StepName::FetchCandidateTemplates
    }

    async fn execute(&self, state: &mut RunState, ctx: &StepContext) -> Result<StepOutcome> {
        let scene_id = require_scene(state)?;
        let candidates = ctx.collaborators.platform.list_candidates(&scene_id).await?;
        if candidates.is_empty() {
            return Err(HeddleError::StepExecution(format!(
                "scene {} has no template candidates",
                scene_id
            )));
        }

        info!(scene_id = %scene_id, count = candidates.len(), "fetched candidates");
        state.derived.candidates = candidates;
        Ok(StepOutcome::Continue)
    }
}

/// Chooses one candidate as the template.
#[derive(Debug, Clone, Copy, Default)]
pub struct SelectTemplate;

#[async_trait]
impl Step for SelectTemplate {
    fn name(&self) -> StepName {
        StepName::SelectTemplate
    }

    async fn execute(&self, state: &mut RunState, ctx: &StepContext) -> Result<StepOutcome> {
        let candidates = &state.derived.candidates;
        let Some(first) = candidates.first() else {
            return Err(HeddleError::StepExecution(
                "no candidates to select from".to_string(),
            ));
        };

        let selected = if candidates.len() == 1 {
            first.clone()
        } else {
            let shown = &candidates[..candidates.len().min(ctx.config.candidate_prompt_limit.max(1))];
            let subject = state.derived.subject.clone().unwrap_or_default();
            let prompt = prompt::template_prompt(&subject, shown, &ctx.config);
            match ctx.collaborators.completion.complete(&prompt).await {
                Ok(reply) => match match_reply(&reply, shown, |c| c.id.as_str()) {
                    Some(candidate) => candidate.clone(),
                    None => {
                        warn!(
                            reply = %truncate_chars(&reply, 80),
                            "completion named no known template, using the first"
                        );
                        first.clone()
                    }
                },
                Err(e) => {
                    warn!(error = %e, "template selection unavailable, using the first");
                    first.clone()
                }
            }
        };

        info!(template_id = %selected.id, template = %selected.name, "selected template");
        state.derived.selected_template = Some(selected);
        Ok(StepOutcome::Continue)
    }
}

/// Fetches the template definition and the scene schema.
///
/// A schema that cannot be fetched leaves an empty model behind; validation
/// later reports itself as skipped instead of failing the run.
#[derive(Debug, Clone, Copy, Default)]
pub struct FetchTemplateDetail;

#[async_trait]
impl Step for FetchTemplateDetail {
    fn name(&self) -> StepName {
        StepName::FetchTemplateDetail
    }

    async fn execute(&self, state: &mut RunState, ctx: &StepContext) -> Result<StepOutcome> {
        let selected = state
            .derived
            .selected_template
            .clone()
            .ok_or_else(|| HeddleError::StepExecution("no template selected".to_string()))?;
        let scene_id = require_scene(state)?;

        let detail = ctx.collaborators.platform.fetch_detail(&selected.id).await?;
        let metadata = ctx.collaborators.metadata.load(&scene_id).await;
        if metadata.is_empty() {
            warn!(scene_id = %scene_id, degraded = true, "scene schema unavailable");
        } else {
            debug!(scene_id = %scene_id, fields = metadata.fields.len(), "scene schema loaded");
        }

        let derived = &mut state.derived;
        derived.header_fields = detail.definition.header.clone();
        derived.circulation = selected.circulation.clone();
        derived.linkage_rules = metadata.linkage_rules();
        derived.field_metadata = Some(metadata.as_ref().clone());
        derived.template_detail = Some(detail);
        Ok(StepOutcome::Continue)
    }
}
