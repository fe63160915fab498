//! Pipeline orchestration: execution plan, orchestrator, and shared types.

pub mod pipeline;
pub mod plan;
pub mod types;

pub use pipeline::PipelineOrchestrator;
pub use plan::ExecutionPlan;
pub use types::{AgentSnapshot, AgentSpec, PipelineResult, PipelineState};
