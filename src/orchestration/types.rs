//! Type definitions for the pipeline orchestration subsystem.
//!
//! These types form the shared vocabulary between the
//! [`super::pipeline::PipelineOrchestrator`], the event bus, and embedding
//! hosts answering state queries. Query types are snapshots: callers see
//! [`AgentSnapshot`] clones, never live registry entries.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;

use crate::agent::{Agent, AgentBody, AgentResult, AgentStatus, LogEntry};
use crate::aggregator::Verdict;

/// Everything needed to register one agent with the orchestrator.
pub struct AgentSpec {
    pub name: String,
    pub description: String,
    /// Initial instruction text; may be overridden before any later run.
    pub instructions: String,
    pub body: Arc<dyn AgentBody>,
}

impl AgentSpec {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        instructions: impl Into<String>,
        body: Arc<dyn AgentBody>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            instructions: instructions.into(),
            body,
        }
    }
}

/// Read-only view of one agent's state, returned by status queries and
/// embedded in the final [`PipelineResult`].
#[derive(Clone, Debug, Serialize)]
pub struct AgentSnapshot {
    pub name: String,
    pub description: String,
    pub instructions: String,
    pub status: AgentStatus,
    pub logs: Vec<LogEntry>,
    pub result: Option<AgentResult>,
    pub elapsed_secs: f64,
}

impl AgentSnapshot {
    pub fn of(agent: &Agent) -> Self {
        Self {
            name: agent.name.clone(),
            description: agent.description.clone(),
            instructions: agent.instructions().to_string(),
            status: agent.status,
            logs: agent.logs.clone(),
            result: agent.result.clone(),
            elapsed_secs: agent.elapsed_secs(),
        }
    }
}

/// Live view of the whole pipeline, valid at any point in its lifecycle.
#[derive(Clone, Debug, Serialize)]
pub struct PipelineState {
    pub pipeline_id: String,
    pub session_id: String,
    pub is_running: bool,
    pub agents: HashMap<String, AgentSnapshot>,
}

/// The terminal outcome of one pipeline run. Constructed exactly once, after
/// the final stage settles, and cached for later synchronous retrieval.
#[derive(Clone, Debug, Serialize)]
pub struct PipelineResult {
    pub pipeline_id: String,
    pub session_id: String,
    /// Wall-clock duration of the whole run in seconds, rounded to two
    /// decimals.
    pub total_secs: f64,
    pub verdict: Verdict,
    pub verdict_category: Option<i64>,
    pub agents: HashMap<String, AgentSnapshot>,
}
