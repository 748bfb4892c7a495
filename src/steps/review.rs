//! Steps 8-9: validation and the human review suspension.

use async_trait::async_trait;
use tracing::{info, warn};

use crate::{
    Result, ReviewPackage, RunState, Step, StepContext, StepName, StepOutcome, ValidationReport,
    Validator,
};

/// Annotates the generated records with a validation report.
///
/// Invalid records do not fail the run; the report travels to the reviewer.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidateData;

#[async_trait]
impl Step for ValidateData {
    fn name(&self) -> StepName {
        StepName::ValidateData
    }

    async fn execute(&self, state: &mut RunState, ctx: &StepContext) -> Result<StepOutcome> {
        let records = &state.derived.generated_records;
        let report = match state.derived.field_metadata.as_ref() {
            Some(model) if !model.is_empty() => Validator::new(model)
                .with_suggestion_limit(ctx.config.enum_suggestion_limit)
                .validate_all(records),
            _ => {
                warn!(degraded = true, "no scene schema, validation skipped");
                ValidationReport::skipped(records)
            }
        };

        info!(
            total = report.total,
            invalid = report.invalid_count,
            errors = report.total_errors,
            "validated records"
        );
        state.derived.validation_report = Some(report);
        Ok(StepOutcome::Continue)
    }
}

/// Suspends the run until a reviewer decides.
#[derive(Debug, Clone, Copy, Default)]
pub struct HumanReview;

#[async_trait]
impl Step for HumanReview {
    fn name(&self) -> StepName {
        StepName::HumanReview
    }

    async fn execute(&self, state: &mut RunState, _ctx: &StepContext) -> Result<StepOutcome> {
        Ok(StepOutcome::Suspend(Box::new(ReviewPackage::from_state(state))))
    }
}
