//! The execution plan: a partition of agent names into dependency-ordered
//! waves.
//!
//! Agents within one wave have no dependency on each other and may run
//! concurrently under the pipeline's semaphore. A later wave's agents see
//! the settled results of every earlier wave. The final stage is never part
//! of a plan; the orchestrator always runs it last, alone.

use std::collections::HashSet;

use crate::error::PlanError;

/// Ordered waves of agent names.
#[derive(Clone, Debug, Default)]
pub struct ExecutionPlan {
    waves: Vec<Vec<String>>,
}

impl ExecutionPlan {
    /// A plan with all agents in one wave (no inter-agent dependencies).
    pub fn single_wave(names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            waves: vec![names.into_iter().map(Into::into).collect()],
        }
    }

    pub fn from_waves(waves: Vec<Vec<String>>) -> Self {
        Self { waves }
    }

    /// Append a wave that depends on everything scheduled before it.
    pub fn then(mut self, names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.waves.push(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn waves(&self) -> &[Vec<String>] {
        &self.waves
    }

    pub fn agent_names(&self) -> impl Iterator<Item = &String> {
        self.waves.iter().flatten()
    }

    /// Check this plan against the registered agent set: every registered
    /// non-final agent appears exactly once, no unknown names, and the final
    /// agent never appears in a wave.
    pub fn validate(
        &self,
        registered: &HashSet<String>,
        final_agent: &str,
    ) -> Result<(), PlanError> {
        let mut seen = HashSet::new();
        for name in self.agent_names() {
            if name == final_agent {
                return Err(PlanError::FinalAgentInPlan(name.clone()));
            }
            if !registered.contains(name) {
                return Err(PlanError::UnknownAgent(name.clone()));
            }
            if !seen.insert(name.clone()) {
                return Err(PlanError::DuplicateAgent(name.clone()));
            }
        }
        for name in registered {
            if name != final_agent && !seen.contains(name) {
                return Err(PlanError::MissingAgent(name.clone()));
            }
        }
        Ok(())
    }
}
