//! The agent contract and its shared run context.

pub mod context;
pub mod contract;

pub use context::PipelineContext;
pub use contract::{
    Agent, AgentBody, AgentResult, AgentStatus, FnBody, LogEntry, LogLevel, RunHandle,
};
