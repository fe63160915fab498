//! Shared read-only context passed to every agent run.

use std::collections::HashMap;

use super::contract::AgentResult;

/// The input bundle plus a snapshot of previously completed results.
///
/// `results` is fixed at the moment an agent starts: it contains every agent
/// from earlier waves and nothing from the agent's own wave (wave-local
/// isolation). Agents never mutate the context; the orchestrator builds a
/// fresh one per wave via [`PipelineContext::with_results`].
#[derive(Clone, Debug, Default)]
pub struct PipelineContext {
    /// Immutable input bag supplied by the caller.
    pub input: serde_json::Map<String, serde_json::Value>,
    /// Completed results from all earlier waves, keyed by agent name.
    pub results: HashMap<String, AgentResult>,
    /// Per-agent instruction overrides supplied with the input bundle.
    pub instruction_overrides: HashMap<String, String>,
}

impl PipelineContext {
    pub fn new(input: serde_json::Map<String, serde_json::Value>) -> Self {
        Self {
            input,
            ..Self::default()
        }
    }

    /// Convenience accessor into the input bag.
    pub fn input_value(&self, key: &str) -> Option<&serde_json::Value> {
        self.input.get(key)
    }

    /// Completed result of a named agent from an earlier wave, if any.
    pub fn result_of(&self, agent: &str) -> Option<&AgentResult> {
        self.results.get(agent)
    }

    /// A copy of this context carrying the given settled-result snapshot.
    pub fn with_results(&self, results: HashMap<String, AgentResult>) -> Self {
        Self {
            input: self.input.clone(),
            results,
            instruction_overrides: self.instruction_overrides.clone(),
        }
    }
}
