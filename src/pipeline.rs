//! The step executor.
//!
//! A [`Pipeline`] owns the ten steps and drives one run at a time through
//! them, persisting a snapshot after every step. It stops when a step
//! suspends for review, when a step fails, or when the artifact exists.

use chrono::Utc;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::collaborators::{Collaborators, ReviewNotifier, TaskStatusSink, TaskStatusUpdate};
use crate::event::RunEvent;
use crate::status::RunReport;
use crate::{
    CheckpointStore, EngineConfig, HeddleError, Result, ReviewDecision, ReviewGate,
    ReviewPackage, ReviewRoute, RunInputs, RunState, RunStatus, Step, StepContext, StepName,
    StepOutcome,
};

/// A read-only view of a run as stored.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSnapshot {
    /// The latest snapshot.
    pub state: RunState,
    /// The review package, while the run is suspended.
    pub pending: Option<ReviewPackage>,
}

/// Executes runs through the fixed step sequence.
///
/// # Example
///
/// ```no_run
/// use heddle::{Collaborators, MemoryCheckpointStore, Pipeline, ReviewDecision, RunInputs};
///
/// # async fn example(collaborators: Collaborators) -> heddle::Result<()> {
/// let pipeline = Pipeline::builder().collaborators(collaborators).build()?;
/// let mut store = MemoryCheckpointStore::new();
///
/// let state = pipeline.start("run-1", RunInputs::new("S1"), &mut store).await?;
/// println!("{} is {}", state.run_id, state.status);
///
/// // Later, once a reviewer has looked at the records:
/// let state = pipeline.resume("run-1", ReviewDecision::approve(), &mut store).await?;
/// # Ok(())
/// # }
/// ```
///
/// # Concurrency
///
/// Calls for different runs may proceed concurrently. Calls for the same
/// run must be serialized by the caller; the pipeline takes no per-run lock.
pub struct Pipeline {
    /// One step per [`StepName`], indexed by [`StepName::index`].
    steps: Vec<Arc<dyn Step>>,
    /// Context handed to every step.
    ctx: StepContext,
    /// Applies review decisions.
    gate: ReviewGate,
    status_sink: Option<Arc<dyn TaskStatusSink>>,
    notifier: Option<Arc<dyn ReviewNotifier>>,
    /// Event broadcast channel sender.
    event_tx: broadcast::Sender<RunEvent>,
}

impl Pipeline {
    /// Creates a new pipeline builder.
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    /// Subscribes to run events.
    ///
    /// Events are not persisted; if the receiver is too slow, events may be
    /// dropped.
    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.event_tx.subscribe()
    }

    /// Emits an event to all subscribers.
    ///
    /// Ignores send errors (no subscribers or channel full).
    fn emit(&self, event: RunEvent) {
        let _ = self.event_tx.send(event);
    }

    /// The configuration the pipeline was built with.
    pub fn config(&self) -> &EngineConfig {
        &self.ctx.config
    }

    /// The step registered for `name`.
    pub fn step(&self, name: StepName) -> &Arc<dyn Step> {
        &self.steps[name.index()]
    }

    /// Starts a new run and executes it until it suspends or ends.
    ///
    /// Step failures do not surface as `Err`; they leave the returned state
    /// `Failed` with `last_error` set.
    ///
    /// # Errors
    ///
    /// - [`HeddleError::InvalidTransition`] if `run_id` already exists
    /// - any error from the checkpoint store
    pub async fn start<S: CheckpointStore>(
        &self,
        run_id: &str,
        inputs: RunInputs,
        store: &mut S,
    ) -> Result<RunState> {
        let span = info_span!("start", run_id = %run_id);
        async {
            if let Some(existing) = store.load(run_id).await? {
                return Err(HeddleError::InvalidTransition {
                    run_id: run_id.to_string(),
                    status: existing.status,
                    operation: "start",
                });
            }

            let mut state = RunState::new(run_id, inputs);
            state.mark_running();
            store.save(run_id, &state).await?;
            info!(subject_id = %state.inputs.subject_id, "run started");
            self.emit(RunEvent::RunStarted {
                run_id: run_id.to_string(),
            });
            self.report_status(&state).await;

            self.drive(state, store).await
        }
        .instrument(span)
        .await
    }

    /// Applies a review decision to a suspended run and continues it.
    ///
    /// # Errors
    ///
    /// - [`HeddleError::RunNotFound`] if the run does not exist
    /// - [`HeddleError::InvalidTransition`] if the run is not suspended
    /// - any error from the checkpoint store
    pub async fn resume<S: CheckpointStore>(
        &self,
        run_id: &str,
        decision: ReviewDecision,
        store: &mut S,
    ) -> Result<RunState> {
        let span = info_span!("resume", run_id = %run_id, decision = %decision.status);
        async {
            let mut state = self.load(run_id, store).await?;
            let route = self.gate.apply(&mut state, decision)?;
            info!(route = ?route, retry_count = state.retry_count, "review decision applied");

            store.save(run_id, &state).await?;
            store.clear_pending_payload(run_id).await?;

            match route {
                ReviewRoute::Abort { .. } => {
                    self.finish_failed(&state).await;
                    return Ok(state);
                }
                ReviewRoute::Regenerate { attempt } => {
                    self.emit(RunEvent::RetryScheduled {
                        run_id: run_id.to_string(),
                        attempt,
                    });
                }
                ReviewRoute::CreateArtifact => {}
            }

            if let Some(next_step) = state.next_step {
                self.emit(RunEvent::RunResumed {
                    run_id: run_id.to_string(),
                    next_step,
                });
            }
            self.report_status(&state).await;

            self.drive(state, store).await
        }
        .instrument(span)
        .await
    }

    /// Continues a run whose last snapshot is `Running`, e.g. after the
    /// process died between two steps.
    ///
    /// The step that was executing when the process died runs again.
    ///
    /// # Errors
    ///
    /// - [`HeddleError::RunNotFound`] if the run does not exist
    /// - [`HeddleError::InvalidTransition`] if the run is not running
    /// - any error from the checkpoint store
    pub async fn recover<S: CheckpointStore>(&self, run_id: &str, store: &mut S) -> Result<RunState> {
        let span = info_span!("recover", run_id = %run_id);
        async {
            let state = self.load(run_id, store).await?;
            if state.status != RunStatus::Running {
                return Err(HeddleError::InvalidTransition {
                    run_id: run_id.to_string(),
                    status: state.status,
                    operation: "recover",
                });
            }

            info!(next_step = ?state.next_step, "recovering run");
            self.drive(state, store).await
        }
        .instrument(span)
        .await
    }

    /// Returns the stored snapshot and, while suspended, the review package.
    ///
    /// Never modifies anything.
    ///
    /// # Errors
    ///
    /// Returns [`HeddleError::RunNotFound`] if the run does not exist.
    pub async fn inspect<S: CheckpointStore>(&self, run_id: &str, store: &S) -> Result<RunSnapshot> {
        let state = store
            .load(run_id)
            .await?
            .ok_or_else(|| HeddleError::RunNotFound(run_id.to_string()))?;
        let pending = if state.status == RunStatus::Suspended {
            store.load_pending_payload(run_id).await?
        } else {
            None
        };
        Ok(RunSnapshot { state, pending })
    }

    /// Returns a per-step report of a run.
    ///
    /// # Errors
    ///
    /// Returns [`HeddleError::RunNotFound`] if the run does not exist.
    pub async fn status<S: CheckpointStore>(&self, run_id: &str, store: &S) -> Result<RunReport> {
        let snapshot = self.inspect(run_id, store).await?;
        Ok(RunReport::from_state(&snapshot.state))
    }

    async fn load<S: CheckpointStore>(&self, run_id: &str, store: &S) -> Result<RunState> {
        let state = store
            .load(run_id)
            .await?
            .ok_or_else(|| HeddleError::RunNotFound(run_id.to_string()))?;
        Ok(state)
    }

    /// Runs steps from `state.next_step` until the run suspends or ends.
    async fn drive<S: CheckpointStore>(&self, mut state: RunState, store: &mut S) -> Result<RunState> {
        while let Some(step_name) = state.next_step {
            let step = self.step(step_name);
            let span = info_span!("step", step = %step_name);
            let started_at = Utc::now();

            self.emit(RunEvent::StepStarted {
                run_id: state.run_id.clone(),
                step: step_name,
            });

            // Steps run against a copy; a failing step leaves no partial writes.
            let mut working = state.clone();
            let result = step
                .execute(&mut working, &self.ctx)
                .instrument(span.clone())
                .await;

            match result {
                Ok(StepOutcome::Continue) => {
                    working.record_completed(step_name, started_at);
                    state = working;
                    store.save(&state.run_id, &state).await?;
                    span.in_scope(|| debug!("step completed"));
                    self.emit(RunEvent::StepCompleted {
                        run_id: state.run_id.clone(),
                        step: step_name,
                    });
                    self.report_status(&state).await;
                }
                Ok(StepOutcome::Suspend(package)) => {
                    working.mark_suspended(step_name, started_at);
                    state = working;
                    store.save_pending_payload(&state.run_id, &package).await?;
                    store.save(&state.run_id, &state).await?;
                    span.in_scope(|| info!(records = package.records.len(), "awaiting review"));
                    self.emit(RunEvent::RunSuspended {
                        run_id: state.run_id.clone(),
                        records: package.records.len(),
                    });
                    self.report_status(&state).await;
                    self.notify_review(&package).await;
                    return Ok(state);
                }
                Err(e) => {
                    let error = e.to_string();
                    span.in_scope(|| warn!(error = %error, "step failed"));
                    state.mark_step_failed(step_name, error.clone(), started_at);
                    store.save(&state.run_id, &state).await?;
                    self.emit(RunEvent::StepFailed {
                        run_id: state.run_id.clone(),
                        step: step_name,
                        error,
                    });
                    self.finish_failed(&state).await;
                    return Ok(state);
                }
            }
        }

        if state.current_step == Some(StepName::CreateArtifact) {
            state.mark_succeeded();
            store.save(&state.run_id, &state).await?;
            info!("run succeeded");
            self.emit(RunEvent::RunSucceeded {
                run_id: state.run_id.clone(),
            });
            self.report_status(&state).await;
        } else if !state.is_terminal() {
            let stopped_at = state.current_step.map_or("start", StepName::as_str);
            state.mark_failed(None, format!("run stopped after {} with no next step", stopped_at));
            store.save(&state.run_id, &state).await?;
            self.finish_failed(&state).await;
        }

        Ok(state)
    }

    async fn finish_failed(&self, state: &RunState) {
        let error = state.last_error.clone().unwrap_or_default();
        warn!(error = %error, "run failed");
        self.emit(RunEvent::RunFailed {
            run_id: state.run_id.clone(),
            error,
        });
        self.report_status(state).await;
    }

    /// Sends a task-status update. Failures are logged and ignored.
    async fn report_status(&self, state: &RunState) {
        let Some(sink) = &self.status_sink else {
            return;
        };
        let update = TaskStatusUpdate {
            run_id: state.run_id.clone(),
            status: state.status,
            current_step: state.current_step,
            progress: state.progress(),
            error: state.last_error.clone(),
            updated_at: state.updated_at,
        };
        if let Err(e) = sink.report(&update).await {
            warn!(error = %e, status = %state.status, "task status update failed");
        }
    }

    /// Announces a suspended run. Failures are logged and ignored.
    async fn notify_review(&self, package: &ReviewPackage) {
        let Some(notifier) = &self.notifier else {
            return;
        };
        if let Err(e) = notifier.notify(package).await {
            warn!(error = %e, "review notification failed");
        }
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("steps", &self.steps)
            .field("config", &self.ctx.config)
            .field("status_sink", &self.status_sink.is_some())
            .field("notifier", &self.notifier.is_some())
            .finish()
    }
}

/// Builder for constructing [`Pipeline`] instances.
///
/// Collaborators are required. Every step defaults to the implementation
/// in [`steps`](crate::steps); [`step`](Self::step) replaces one of them.
pub struct PipelineBuilder {
    collaborators: Option<Collaborators>,
    config: EngineConfig,
    status_sink: Option<Arc<dyn TaskStatusSink>>,
    notifier: Option<Arc<dyn ReviewNotifier>>,
    overrides: Vec<Arc<dyn Step>>,
}

impl PipelineBuilder {
    /// Creates a builder with the default configuration.
    fn new() -> Self {
        Self {
            collaborators: None,
            config: EngineConfig::default(),
            status_sink: None,
            notifier: None,
            overrides: Vec::new(),
        }
    }

    /// Sets the collaborators every step can reach.
    pub fn collaborators(mut self, collaborators: Collaborators) -> Self {
        self.collaborators = Some(collaborators);
        self
    }

    /// Sets the engine configuration.
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the task tracker that receives status updates.
    pub fn status_sink(mut self, sink: Arc<dyn TaskStatusSink>) -> Self {
        self.status_sink = Some(sink);
        self
    }

    /// Sets the channel that announces review-ready runs.
    pub fn notifier(mut self, notifier: Arc<dyn ReviewNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Replaces the default implementation of the step `step.name()`.
    pub fn step(mut self, step: impl Step + 'static) -> Self {
        self.overrides.push(Arc::new(step));
        self
    }

    /// Builds the pipeline.
    ///
    /// # Errors
    ///
    /// Returns [`HeddleError::Config`] if collaborators are missing, the
    /// configuration is invalid, or one step is overridden twice.
    pub fn build(self) -> Result<Pipeline> {
        let collaborators = self
            .collaborators
            .ok_or_else(|| HeddleError::Config("collaborators are required".to_string()))?;
        self.config.validate()?;

        let mut steps = crate::steps::default_steps();
        let mut overridden = [false; StepName::ALL.len()];
        for step in self.overrides {
            let index = step.name().index();
            if overridden[index] {
                return Err(HeddleError::Config(format!(
                    "step {} registered more than once",
                    step.name()
                )));
            }
            overridden[index] = true;
            steps[index] = step;
        }

        if let Some((index, step)) = steps
            .iter()
            .enumerate()
            .find(|(index, step)| step.name() != StepName::ALL[*index])
        {
            return Err(HeddleError::Config(format!(
                "slot {} holds step {}",
                StepName::ALL[index],
                step.name()
            )));
        }

        let (event_tx, _) = broadcast::channel(self.config.event_channel_capacity);
        let gate = ReviewGate::from_config(&self.config);

        Ok(Pipeline {
            steps,
            ctx: StepContext::new(self.config, collaborators),
            gate,
            status_sink: self.status_sink,
            notifier: self.notifier,
            event_tx,
        })
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{
        ArtifactResult, ArtifactSpec, AutomationPlatform, Candidate, MetadataSource, Scenario,
        Subject, SubjectRepository, TemplateDetail, TextCompletion,
    };
    use crate::{FieldMetadataModel, MemoryCheckpointStore};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Unreachable;

    #[async_trait]
    impl TextCompletion for Unreachable {
        async fn complete(&self, _prompt: &str) -> Result<String> {
            Err(HeddleError::Completion("offline".to_string()))
        }
    }

    #[async_trait]
    impl AutomationPlatform for Unreachable {
        async fn list_candidates(&self, _scene_id: &str) -> Result<Vec<Candidate>> {
            Err(HeddleError::External("offline".to_string()))
        }

        async fn fetch_detail(&self, _candidate_id: &str) -> Result<TemplateDetail> {
            Err(HeddleError::External("offline".to_string()))
        }

        async fn create_artifact(&self, _spec: &ArtifactSpec) -> Result<ArtifactResult> {
            Err(HeddleError::External("offline".to_string()))
        }
    }

    #[async_trait]
    impl SubjectRepository for Unreachable {
        async fn load_subject(&self, _subject_id: &str) -> Result<Option<Subject>> {
            Ok(None)
        }

        async fn list_scenarios(&self) -> Result<Vec<Scenario>> {
            Ok(Vec::new())
        }
    }

    #[async_trait]
    impl MetadataSource for Unreachable {
        async fn fetch_schema(&self, _scene_id: &str) -> Result<FieldMetadataModel> {
            Err(HeddleError::External("offline".to_string()))
        }
    }

    fn collaborators() -> Collaborators {
        let unreachable = Arc::new(Unreachable);
        Collaborators::new(
            unreachable.clone(),
            unreachable.clone(),
            unreachable.clone(),
            unreachable,
        )
    }

    /// A step that counts its executions and optionally fails.
    #[derive(Debug)]
    struct Scripted {
        name: StepName,
        calls: Arc<AtomicU32>,
        fail: bool,
    }

    #[async_trait]
    impl Step for Scripted {
        fn name(&self) -> StepName {
            self.name
        }

        async fn execute(&self, state: &mut RunState, _ctx: &StepContext) -> Result<StepOutcome> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            state.derived.module_id = Some("partial".to_string());
            if self.fail {
                Err(HeddleError::StepExecution("scripted failure".to_string()))
            } else {
                Ok(StepOutcome::Continue)
            }
        }
    }

    #[test]
    fn test_build_requires_collaborators() {
        let result = Pipeline::builder().build();
        assert!(matches!(result, Err(HeddleError::Config(_))));
    }

    #[test]
    fn test_build_rejects_invalid_config() {
        let config = EngineConfig {
            max_retries: 0,
            ..EngineConfig::default()
        };
        let result = Pipeline::builder()
            .collaborators(collaborators())
            .config(config)
            .build();
        assert!(matches!(result, Err(HeddleError::Config(_))));
    }

    #[test]
    fn test_build_rejects_duplicate_override() {
        let calls = Arc::new(AtomicU32::new(0));
        let result = Pipeline::builder()
            .collaborators(collaborators())
            .step(Scripted {
                name: StepName::SelectTemplate,
                calls: calls.clone(),
                fail: false,
            })
            .step(Scripted {
                name: StepName::SelectTemplate,
                calls,
                fail: false,
            })
            .build();
        assert!(matches!(result, Err(HeddleError::Config(_))));
    }

    #[test]
    fn test_override_replaces_default() {
        let pipeline = Pipeline::builder()
            .collaborators(collaborators())
            .step(Scripted {
                name: StepName::LoadSubject,
                calls: Arc::new(AtomicU32::new(0)),
                fail: false,
            })
            .build()
            .unwrap();
        assert!(format!("{:?}", pipeline.step(StepName::LoadSubject)).contains("Scripted"));
        assert_eq!(
            pipeline.step(StepName::CreateArtifact).name(),
            StepName::CreateArtifact
        );
    }

    #[tokio::test]
    async fn test_missing_subject_fails_run() {
        let pipeline = Pipeline::builder()
            .collaborators(collaborators())
            .build()
            .unwrap();
        let mut store = MemoryCheckpointStore::new();
        let mut events = pipeline.subscribe();

        let state = pipeline
            .start("run-1", RunInputs::new("missing"), &mut store)
            .await
            .unwrap();

        assert_eq!(state.status, RunStatus::Failed);
        assert_eq!(state.current_step, None);
        assert!(state.last_error.as_deref().unwrap().contains("missing"));

        let stored = store.load("run-1").await.unwrap().unwrap();
        assert_eq!(stored, state);

        assert!(matches!(events.recv().await.unwrap(), RunEvent::RunStarted { .. }));
        assert!(matches!(events.recv().await.unwrap(), RunEvent::StepStarted { .. }));
        assert!(matches!(events.recv().await.unwrap(), RunEvent::StepFailed { .. }));
        assert!(matches!(events.recv().await.unwrap(), RunEvent::RunFailed { .. }));
    }

    #[tokio::test]
    async fn test_failed_step_discards_partial_writes() {
        let calls = Arc::new(AtomicU32::new(0));
        let pipeline = Pipeline::builder()
            .collaborators(collaborators())
            .step(Scripted {
                name: StepName::LoadSubject,
                calls: calls.clone(),
                fail: true,
            })
            .build()
            .unwrap();
        let mut store = MemoryCheckpointStore::new();

        let state = pipeline
            .start("run-1", RunInputs::new("S1"), &mut store)
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(state.status, RunStatus::Failed);
        assert_eq!(state.derived.module_id, None);
        assert_eq!(state.history.len(), 1);
    }

    #[tokio::test]
    async fn test_start_rejects_existing_run() {
        let pipeline = Pipeline::builder()
            .collaborators(collaborators())
            .build()
            .unwrap();
        let mut store = MemoryCheckpointStore::new();
        pipeline
            .start("run-1", RunInputs::new("S1"), &mut store)
            .await
            .unwrap();

        let err = pipeline
            .start("run-1", RunInputs::new("S1"), &mut store)
            .await
            .unwrap_err();
        assert!(matches!(err, HeddleError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_unknown_run() {
        let pipeline = Pipeline::builder()
            .collaborators(collaborators())
            .build()
            .unwrap();
        let mut store = MemoryCheckpointStore::new();

        assert!(matches!(
            pipeline.inspect("nope", &store).await,
            Err(HeddleError::RunNotFound(_))
        ));
        assert!(matches!(
            pipeline
                .resume("nope", ReviewDecision::approve(), &mut store)
                .await,
            Err(HeddleError::RunNotFound(_))
        ));
        assert!(matches!(
            pipeline.recover("nope", &mut store).await,
            Err(HeddleError::RunNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_resume_requires_suspended() {
        let pipeline = Pipeline::builder()
            .collaborators(collaborators())
            .build()
            .unwrap();
        let mut store = MemoryCheckpointStore::new();
        pipeline
            .start("run-1", RunInputs::new("missing"), &mut store)
            .await
            .unwrap();

        let err = pipeline
            .resume("run-1", ReviewDecision::approve(), &mut store)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            HeddleError::InvalidTransition {
                status: RunStatus::Failed,
                ..
            }
        ));
    }
}
