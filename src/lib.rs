//! autoresearch: iterative multi-stage research pipeline.
//!
//! Each iteration runs six stages in order (domain discovery, question
//! generation, dataset discovery, experiment design, critique and report
//! synthesis) over a shared structured store. Every stage that depends on a
//! remote text-generation capability also has a deterministic local
//! fallback, so a cycle always produces a complete record.

// Core modules
pub mod capabilities;
pub mod cli;
pub mod decider;
pub mod error;
pub mod llm;
pub mod memory;
pub mod normalize;
pub mod pipeline;
pub mod records;
pub mod stages;
pub mod utils;

// Re-export commonly used types
pub use capabilities::Capabilities;
pub use error::{CapabilityError, LlmError, PipelineError, StageError};
pub use memory::{SemanticMemory, StructuredStore};
pub use pipeline::{Orchestrator, PipelineConfig, RunSummary};
