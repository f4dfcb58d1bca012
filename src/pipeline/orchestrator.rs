//! Sequential research-cycle orchestrator.
//!
//! # Failure isolation
//!
//! - A stage error is logged, reported as [`PipelineEvent::StageFailed`] and
//!   replaced with the stage's degraded default. The iteration continues.
//! - If a degraded default cannot be produced, or anything panics, the
//!   iteration is recorded as failed and the next one starts.
//! - Only setup can fail the whole cycle: an invalid configuration or an
//!   unusable store directory from [`Orchestrator::new`], or output
//!   directories that cannot be created from [`Orchestrator::run_cycle`].

use std::any::Any;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use serde_json::Map;
use tokio::sync::mpsc;

use crate::capabilities::Capabilities;
use crate::error::PipelineError;
use crate::memory::StructuredStore;
use crate::stages::{standard_stages, Stage, StageContext, StageOutput, StageStatus};
use crate::utils::preview;

use super::config::PipelineConfig;
use super::events::PipelineEvent;
use super::summary::{IterationRecord, RunSummary};

/// Maximum characters of a stage output kept in its recall note.
const NOTE_PREVIEW_CHARS: usize = 600;

/// Runs the stage sequence for a number of iterations over one store.
pub struct Orchestrator {
    config: Arc<PipelineConfig>,
    store: StructuredStore,
    stages: Vec<Arc<dyn Stage>>,
    event_tx: Option<mpsc::Sender<PipelineEvent>>,
}

impl Orchestrator {
    /// Creates an orchestrator with the six standard stages.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::Config` for an invalid configuration and
    /// `PipelineError::Store` when the store directory cannot be used.
    pub fn new(config: PipelineConfig, capabilities: Capabilities) -> Result<Self, PipelineError> {
        config.validate()?;
        let config = Arc::new(config);
        let store = StructuredStore::open(config.memory_dir())?;
        let stages = standard_stages(config.clone(), &capabilities);

        tracing::info!(
            output_dir = %config.output_dir.display(),
            online = capabilities.llm.is_some(),
            "Orchestrator initialized"
        );

        Ok(Self {
            config,
            store,
            stages,
            event_tx: None,
        })
    }

    /// Replaces the stage sequence.
    pub fn with_stages(mut self, stages: Vec<Arc<dyn Stage>>) -> Self {
        self.stages = stages;
        self
    }

    /// Sets a channel that receives progress events.
    pub fn with_event_sender(mut self, event_tx: mpsc::Sender<PipelineEvent>) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn store(&self) -> &StructuredStore {
        &self.store
    }

    /// Runs `iterations` iterations and persists the run summary.
    ///
    /// Iteration failures are recorded in the summary, never returned.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::Setup` if the output directories cannot be
    /// created.
    pub async fn run_cycle(&mut self, iterations: usize) -> Result<RunSummary, PipelineError> {
        self.prepare_directories()?;

        let mut summary = RunSummary::new();
        tracing::info!(run_id = %summary.run_id, iterations, "Starting research cycle");
        self.send_event(PipelineEvent::cycle_started(summary.run_id, iterations))
            .await;

        for iteration in 1..=iterations {
            tracing::info!(iteration, "Starting iteration");
            self.send_event(PipelineEvent::iteration_started(iteration)).await;

            let outcome = AssertUnwindSafe(self.run_once(iteration))
                .catch_unwind()
                .await;
            let record = match outcome {
                Ok(Ok(record)) => record,
                Ok(Err(e)) => {
                    tracing::error!(iteration, error = %e, "Iteration failed");
                    IterationRecord::failed(iteration, e.to_string())
                }
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    tracing::error!(iteration, error = %message, "Iteration panicked");
                    IterationRecord::failed(iteration, message)
                }
            };

            tracing::info!(iteration, status = %record.status, "Iteration finished");
            self.send_event(PipelineEvent::iteration_completed(iteration, record.status))
                .await;
            summary.push(record);
        }

        summary.complete();

        let path = self.config.run_summary_path();
        match summary.save(&path) {
            Ok(()) => tracing::info!(path = %path.display(), "Run summary saved"),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to persist run summary")
            }
        }

        tracing::info!(
            run_id = %summary.run_id,
            succeeded = summary.succeeded(),
            failed = summary.failed(),
            "Research cycle completed"
        );
        self.send_event(PipelineEvent::cycle_completed(
            summary.run_id,
            summary.succeeded(),
            summary.failed(),
        ))
        .await;

        Ok(summary)
    }

    /// Runs every stage once, in order, storing each output before the next
    /// stage starts.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::DegradedDefault` when a stage fails and its
    /// degraded default cannot be produced.
    pub async fn run_once(&mut self, iteration: usize) -> Result<IterationRecord, PipelineError> {
        let mut outputs = Map::new();
        let mut statuses = BTreeMap::new();

        for stage in self.stages.clone() {
            let kind = stage.kind();
            tracing::info!(iteration, stage = %kind, "Running stage");
            self.send_event(PipelineEvent::stage_started(iteration, kind)).await;

            let result = {
                let ctx = StageContext::new(iteration, &self.store);
                stage.execute(&ctx).await
            };

            let StageOutput { value, status } = match result {
                Ok(output) => output,
                Err(e) => {
                    tracing::warn!(
                        iteration,
                        stage = %kind,
                        error = %e,
                        "Stage failed; storing degraded default"
                    );
                    self.send_event(PipelineEvent::stage_failed(iteration, kind, e.to_string()))
                        .await;
                    let value = stage
                        .degraded(&e)
                        .map_err(|default_err| PipelineError::DegradedDefault {
                            stage: kind.to_string(),
                            reason: format!("{e}; default: {default_err}"),
                        })?;
                    StageOutput {
                        value,
                        status: StageStatus::Failed,
                    }
                }
            };

            self.store.add(kind.store_key(), value.clone());
            self.store.add_summary(
                format!(
                    "[{}] {}",
                    kind.display_name(),
                    preview(&value.to_string(), NOTE_PREVIEW_CHARS)
                ),
                BTreeMap::from([
                    ("iteration".to_string(), iteration.to_string()),
                    ("stage".to_string(), kind.store_key().to_string()),
                    ("status".to_string(), status.as_str().to_string()),
                ]),
            );

            self.send_event(PipelineEvent::stage_completed(iteration, kind, status))
                .await;
            statuses.insert(kind.summary_key().to_string(), status);
            outputs.insert(kind.summary_key().to_string(), value);
        }

        Ok(IterationRecord::success(iteration, outputs, statuses))
    }

    fn prepare_directories(&self) -> Result<(), PipelineError> {
        for dir in [
            self.config.results_dir(),
            self.config.experiments_dir(),
            self.config.paper_dir(),
            self.config.data_dir(),
        ] {
            std::fs::create_dir_all(&dir)
                .map_err(|e| {
                    PipelineError::Setup(format!("cannot create {}: {e}", dir.display()))
                })?;
        }
        Ok(())
    }

    async fn send_event(&self, event: PipelineEvent) {
        if let Some(tx) = &self.event_tx {
            // Ignore send errors - receiver may have been dropped
            let _ = tx.send(event).await;
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panic: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panic: {s}")
    } else {
        "panic: unknown payload".to_string()
    }
}
