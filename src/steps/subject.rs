//! Steps 1-3: subject, target scenario, destination module.

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::{match_reply, prompt};
use crate::extract::truncate_chars;
use crate::{HeddleError, Result, RunState, Step, StepContext, StepName, StepOutcome};

/// Loads the subject test case and names the artifact.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoadSubject;

#[async_trait]
impl Step for LoadSubject {
    fn name(&self) -> StepName {
        StepName::LoadSubject
    }

    async fn execute(&self, state: &mut RunState, ctx: &StepContext) -> Result<StepOutcome> {
        let subject_id = state.inputs.subject_id.clone();
        let subject = ctx
            .collaborators
            .subjects
            .load_subject(&subject_id)
            .await?
            .ok_or_else(|| {
                HeddleError::StepExecution(format!("subject {} does not exist", subject_id))
            })?;

        let name = match state.inputs.name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => format!("{}{}", subject.title, ctx.config.artifact_name_suffix),
        };

        info!(subject_id = %subject_id, artifact_name = %name, "loaded subject");
        state.derived.artifact_name = Some(name);
        state.derived.subject = Some(subject);
        Ok(StepOutcome::Continue)
    }
}

/// Picks the scenario: the pre-selected scene, else the completion's
/// choice among active scenarios, else the first one.
#[derive(Debug, Clone, Copy, Default)]
pub struct MatchTargetContext;

#[async_trait]
impl Step for MatchTargetContext {
    fn name(&self) -> StepName {
        StepName::MatchTargetContext
    }

    async fn execute(&self, state: &mut RunState, ctx: &StepContext) -> Result<StepOutcome> {
        if let Some(scene_id) = state.inputs.scene_id.clone().filter(|s| !s.is_empty()) {
            debug!(scene_id = %scene_id, "scene pre-selected");
            state.derived.scene_id = Some(scene_id);
            return Ok(StepOutcome::Continue);
        }

        let scenarios = ctx.collaborators.subjects.list_scenarios().await?;
        let Some(first) = scenarios.first() else {
            return Err(HeddleError::StepExecution(
                "no active scenarios to match against".to_string(),
            ));
        };

        let chosen = if scenarios.len() == 1 {
            first
        } else {
            let subject = state.derived.subject.clone().unwrap_or_default();
            let prompt = prompt::scenario_prompt(&subject, &scenarios, &ctx.config);
            match ctx.collaborators.completion.complete(&prompt).await {
                Ok(reply) => match match_reply(&reply, &scenarios, |s| s.code.as_str()) {
                    Some(scenario) => scenario,
                    None => {
                        warn!(
                            reply = %truncate_chars(&reply, 80),
                            "completion named no known scenario, using the first"
                        );
                        first
                    }
                },
                Err(e) => {
                    warn!(error = %e, "scenario matching unavailable, using the first");
                    first
                }
            }
        };

        info!(scene_id = %chosen.code, scenario = %chosen.name, "matched scenario");
        state.derived.scene_id = Some(chosen.code.clone());
        state.derived.matched_scenario = Some(chosen.clone());
        Ok(StepOutcome::Continue)
    }
}

/// Picks the destination module: pre-selected, else the repository
/// default, else the configured default.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoadDestinationConfig;

#[async_trait]
impl Step for LoadDestinationConfig {
    fn name(&self) -> StepName {
        StepName::LoadDestinationConfig
    }

    async fn execute(&self, state: &mut RunState, ctx: &StepContext) -> Result<StepOutcome> {
        let module_id = match state.inputs.module_id.clone().filter(|m| !m.is_empty()) {
            Some(module_id) => module_id,
            None => match ctx.collaborators.subjects.default_module_id().await {
                Ok(Some(module_id)) if !module_id.is_empty() => module_id,
                Ok(_) => ctx.config.default_module_id.clone(),
                Err(e) => {
                    warn!(error = %e, "could not read the default module, using configuration");
                    ctx.config.default_module_id.clone()
                }
            },
        };

        debug!(module_id = %module_id, "destination module");
        state.derived.module_id = Some(module_id);
        Ok(StepOutcome::Continue)
    }
}
