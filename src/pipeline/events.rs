//! Progress events emitted by the orchestrator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::stages::{StageKind, StageStatus};

use super::summary::IterationStatus;

/// Events emitted during a research cycle for progress reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PipelineEvent {
    /// A cycle of `iterations` iterations has started.
    CycleStarted {
        run_id: Uuid,
        iterations: usize,
        timestamp: DateTime<Utc>,
    },
    /// An iteration has started (1-based).
    IterationStarted {
        iteration: usize,
        timestamp: DateTime<Utc>,
    },
    /// A stage has started.
    StageStarted {
        iteration: usize,
        stage: StageKind,
        timestamp: DateTime<Utc>,
    },
    /// A stage output (real or degraded) has been stored.
    StageCompleted {
        iteration: usize,
        stage: StageKind,
        status: StageStatus,
        timestamp: DateTime<Utc>,
    },
    /// A stage failed; its degraded default is stored next.
    StageFailed {
        iteration: usize,
        stage: StageKind,
        error: String,
        timestamp: DateTime<Utc>,
    },
    /// An iteration has finished, successfully or not.
    IterationCompleted {
        iteration: usize,
        status: IterationStatus,
        timestamp: DateTime<Utc>,
    },
    /// The cycle has finished and the summary was assembled.
    CycleCompleted {
        run_id: Uuid,
        succeeded: usize,
        failed: usize,
        timestamp: DateTime<Utc>,
    },
}

impl PipelineEvent {
    pub fn cycle_started(run_id: Uuid, iterations: usize) -> Self {
        PipelineEvent::CycleStarted {
            run_id,
            iterations,
            timestamp: Utc::now(),
        }
    }

    pub fn iteration_started(iteration: usize) -> Self {
        PipelineEvent::IterationStarted {
            iteration,
            timestamp: Utc::now(),
        }
    }

    /// Creates a stage started event.
    pub fn stage_started(iteration: usize, stage: StageKind) -> Self {
        PipelineEvent::StageStarted {
            iteration,
            stage,
            timestamp: Utc::now(),
        }
    }

    /// Creates a stage completed event.
    pub fn stage_completed(iteration: usize, stage: StageKind, status: StageStatus) -> Self {
        PipelineEvent::StageCompleted {
            iteration,
            stage,
            status,
            timestamp: Utc::now(),
        }
    }

    /// Creates a stage failed event.
    pub fn stage_failed(iteration: usize, stage: StageKind, error: impl Into<String>) -> Self {
        PipelineEvent::StageFailed {
            iteration,
            stage,
            error: error.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn iteration_completed(iteration: usize, status: IterationStatus) -> Self {
        PipelineEvent::IterationCompleted {
            iteration,
            status,
            timestamp: Utc::now(),
        }
    }

    pub fn cycle_completed(run_id: Uuid, succeeded: usize, failed: usize) -> Self {
        PipelineEvent::CycleCompleted {
            run_id,
            succeeded,
            failed,
            timestamp: Utc::now(),
        }
    }

    /// Timestamp of the event.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            PipelineEvent::CycleStarted { timestamp, .. }
            | PipelineEvent::IterationStarted { timestamp, .. }
            | PipelineEvent::StageStarted { timestamp, .. }
            | PipelineEvent::StageCompleted { timestamp, .. }
            | PipelineEvent::StageFailed { timestamp, .. }
            | PipelineEvent::IterationCompleted { timestamp, .. }
            | PipelineEvent::CycleCompleted { timestamp, .. } => *timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_constructors() {
        let event = PipelineEvent::stage_failed(2, StageKind::Critique, "timeout");
        match &event {
            PipelineEvent::StageFailed {
                iteration,
                stage,
                error,
                ..
            } => {
                assert_eq!(*iteration, 2);
                assert_eq!(*stage, StageKind::Critique);
                assert_eq!(error, "timeout");
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert!(event.timestamp() <= Utc::now());
    }

    #[test]
    fn test_event_serializes_with_variant_name() {
        let event = PipelineEvent::stage_completed(1, StageKind::DomainDiscovery, StageStatus::Ok);
        let json = serde_json::to_value(&event).expect("serialize");
        assert_eq!(json["StageCompleted"]["stage"], "domain_discovery");
        assert_eq!(json["StageCompleted"]["status"], "ok");
    }
}
