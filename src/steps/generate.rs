//! Step 7: record generation.

use async_trait::async_trait;
use tracing::{info, warn};

use super::prompt::GenerationPrompt;
use crate::extract::extract_json_array;
use crate::{
    GeneratedRecord, HeddleError, Result, RunState, Step, StepContext, StepName, StepOutcome,
};

/// Asks the completion for records that fill the template's columns.
///
/// On a regeneration the reviewer's feedback goes into the prompt. A reply
/// with no parseable records fails the run.
#[derive(Debug, Clone, Copy, Default)]
pub struct GenerateData;

#[async_trait]
impl Step for GenerateData {
    fn name(&self) -> StepName {
        StepName::GenerateData
    }

    async fn execute(&self, state: &mut RunState, ctx: &StepContext) -> Result<StepOutcome> {
        let derived = &state.derived;
        let subject = derived.subject.clone().unwrap_or_default();
        let prompt = GenerationPrompt {
            subject: &subject,
            header_fields: &derived.header_fields,
            metadata: derived.field_metadata.as_ref().filter(|m| !m.is_empty()),
            linkage_rules: &derived.linkage_rules,
            circulation: &derived.circulation,
            example: derived
                .template_detail
                .as_ref()
                .and_then(|d| d.example_record()),
            feedback: derived.review_feedback.as_deref(),
            attempt: state.retry_count,
        }
        .render(&ctx.config);

        let reply = ctx.collaborators.completion.complete(&prompt).await?;
        let records: Vec<GeneratedRecord> = extract_json_array(&reply).map_err(|e| {
            warn!(error = %e, "generation reply was not a record array");
            HeddleError::StepExecution(format!("generation produced no records: {}", e))
        })?;
        if records.is_empty() {
            return Err(HeddleError::StepExecution(
                "generation produced no records".to_string(),
            ));
        }

        info!(
            count = records.len(),
            attempt = state.retry_count,
            "generated records"
        );
        state.derived.generated_records = records;
        state.derived.validation_report = None;
        Ok(StepOutcome::Continue)
    }
}
