//! Research-cycle orchestration.
//!
//! # Architecture
//!
//! - **Orchestrator**: runs the stage sequence for each iteration over one
//!   structured store and isolates stage and iteration failures
//! - **Config**: output layout, model settings and heuristic thresholds
//! - **Events**: progress events for any subscriber
//! - **Summary**: the persisted per-iteration record of a cycle
//!
//! # Cycle Flow
//!
//! 1. **Setup**: validate configuration, open the store, create output directories
//! 2. **Iteration**: run the six stages in order; each output is written to the
//!    store before the next stage reads it
//! 3. **Isolation**: a failed stage stores its degraded default; a failed
//!    iteration is recorded and the next one starts
//! 4. **Summary**: the run summary is written to `results/run_summary.json`
//!
//! # Example
//!
//! ```rust,ignore
//! use autoresearch::capabilities::Capabilities;
//! use autoresearch::pipeline::{Orchestrator, PipelineConfig};
//!
//! let config = PipelineConfig::new().with_output_dir("./out");
//! let mut orchestrator = Orchestrator::new(config, Capabilities::offline())?;
//! let summary = orchestrator.run_cycle(3).await?;
//!
//! for record in &summary.results {
//!     println!("iteration {}: {}", record.iteration, record.status);
//! }
//! ```

pub mod config;
pub mod events;
pub mod orchestrator;
pub mod summary;

// Re-export main types for convenience
pub use config::{ConfigError, PipelineConfig};
pub use events::PipelineEvent;
pub use orchestrator::Orchestrator;
pub use summary::{IterationRecord, IterationStatus, RunStatus, RunSummary};
