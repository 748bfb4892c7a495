//! Basic Heddle pipeline example.
//!
//! This example demonstrates:
//! - Wiring collaborators into a pipeline
//! - Running until the records need review
//! - Inspecting the pending review package
//! - Rejecting once, then approving the regenerated records
//! - Observing run events and printing the status report
//!
//! Run with: `cargo run --example basic_pipeline`

use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use heddle::{
    ArtifactResult, ArtifactSpec, AutomationPlatform, Candidate, Collaborators, FieldDefinition,
    FieldMetadataModel, MemoryCheckpointStore, MetadataSource, Pipeline, Result, ReviewDecision,
    RunEvent, RunInputs, Scenario, Subject, SubjectRepository, TemplateDetail, TextCompletion,
};

/// A stand-in language model with canned answers.
#[derive(Debug, Default)]
struct CannedModel {
    generations: AtomicU32,
}

#[async_trait]
impl TextCompletion for CannedModel {
    async fn complete(&self, prompt: &str) -> Result<String> {
        if prompt.contains("Pick the scenario") {
            return Ok("PAY".to_string());
        }
        if prompt.contains("Pick the template") {
            return Ok(r#"{"id": "T-100"}"#.to_string());
        }

        let attempt = self.generations.fetch_add(1, Ordering::SeqCst);
        println!("  🤖 Generating records (attempt {})", attempt + 1);
        let plan = if attempt == 0 { "A" } else { "B" };
        Ok(format!(
            "Here are the rows [1 total]:\n[{{\"casedesc\": \"pay plan {plan}\", \
             \"var\": {{\"plan\": \"{plan}\"}}, \"hoperesult\": \"premium accepted\"}}]"
        ))
    }
}

/// An in-memory automation platform.
#[derive(Debug, Default)]
struct DemoPlatform;

#[async_trait]
impl AutomationPlatform for DemoPlatform {
    async fn list_candidates(&self, _scene_id: &str) -> Result<Vec<Candidate>> {
        Ok(vec![
            Candidate::new("T-100", "Premium payment"),
            Candidate::new("T-200", "Claims intake"),
        ])
    }

    async fn fetch_detail(&self, candidate_id: &str) -> Result<TemplateDetail> {
        let value = json!({
            "usercaseId": candidate_id,
            "name": "Premium payment",
            "caseDefine": {
                "header": [{"row": "plan", "rowName": "Plan"}],
                "body": [{"casedesc": "example", "var": {"plan": "A"}}]
            }
        });
        Ok(serde_json::from_value(value)?)
    }

    async fn create_artifact(&self, spec: &ArtifactSpec) -> Result<ArtifactResult> {
        println!(
            "  📦 Creating '{}' in module {} with {} record(s)",
            spec.name,
            spec.module_id,
            spec.records().len()
        );
        Ok(serde_json::from_value(json!({"usercaseId": "A-1"}))?)
    }
}

/// Subject test cases and scenarios.
#[derive(Debug, Default)]
struct DemoRepository;

#[async_trait]
impl SubjectRepository for DemoRepository {
    async fn load_subject(&self, subject_id: &str) -> Result<Option<Subject>> {
        Ok(Some(Subject {
            id: subject_id.to_string(),
            title: "Monthly premium payment".to_string(),
            description: "A policy holder pays the premium every month".to_string(),
            ..Subject::default()
        }))
    }

    async fn list_scenarios(&self) -> Result<Vec<Scenario>> {
        Ok(vec![
            Scenario::new("PAY", "Payments"),
            Scenario::new("CLM", "Claims"),
        ])
    }

    async fn default_module_id(&self) -> Result<Option<String>> {
        Ok(Some("M-1".to_string()))
    }
}

/// Field constraints for every scene.
#[derive(Debug, Default)]
struct DemoSchemas;

#[async_trait]
impl MetadataSource for DemoSchemas {
    async fn fetch_schema(&self, scene_id: &str) -> Result<FieldMetadataModel> {
        Ok(FieldMetadataModel::new(
            scene_id,
            vec![FieldDefinition::new("plan", "Plan")
                .required()
                .with_enum("A", "Basic")
                .with_enum("B", "Plus")],
        ))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    println!("🧵 Heddle Basic Pipeline Example\n");

    let pipeline = Pipeline::builder()
        .collaborators(Collaborators::new(
            Arc::new(CannedModel::default()),
            Arc::new(DemoPlatform),
            Arc::new(DemoRepository),
            Arc::new(DemoSchemas),
        ))
        .build()?;
    let mut store = MemoryCheckpointStore::new();

    let mut events = pipeline.subscribe();
    let listener = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match &event {
                RunEvent::StepCompleted { step, .. } => println!("  ✓ {}", step),
                RunEvent::RunSuspended { records, .. } => {
                    println!("  ⏸  Suspended with {} record(s) for review", records)
                }
                RunEvent::RetryScheduled { attempt, .. } => {
                    println!("  🔁 Regenerating (rejection {})", attempt)
                }
                other if other.is_terminal() => {
                    println!("  🏁 {:?}", other);
                    break;
                }
                _ => {}
            }
        }
    });

    println!("▶️  Starting run-1");
    let state = pipeline
        .start("run-1", RunInputs::new("TC-42"), &mut store)
        .await?;
    println!("   Status: {}\n", state.status);

    let snapshot = pipeline.inspect("run-1", &store).await?;
    if let Some(package) = &snapshot.pending {
        println!("👀 Review package for '{}':", package.display_name);
        for record in &package.records {
            println!("   - {} (plan {:?})", record.case_description, record.value("plan"));
        }
        println!();
    }

    println!("❌ Rejecting: the test case is about the Plus plan");
    let state = pipeline
        .resume(
            "run-1",
            ReviewDecision::reject("use plan B"),
            &mut store,
        )
        .await?;
    println!("   Status: {}\n", state.status);

    println!("✅ Approving the regenerated records");
    let state = pipeline
        .resume("run-1", ReviewDecision::approve(), &mut store)
        .await?;
    println!("   Status: {}\n", state.status);

    let _ = listener.await;

    println!("{}", pipeline.status("run-1", &store).await?);
    Ok(())
}
