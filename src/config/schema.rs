use serde::Deserialize;

/// The TOML file structure for propcheck.toml.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFile {
    pub pipeline: Option<PipelineSection>,
    pub agents: Option<AgentsSection>,
}

#[derive(Debug, Deserialize)]
pub struct PipelineSection {
    pub concurrency: Option<usize>,
    pub session_ttl_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct AgentsSection {
    /// Name of the final aggregation stage.
    pub final_agent: Option<String>,
    /// Designated agent whose `Fail` status blocks unconditionally.
    pub completeness: Option<String>,
    /// Designated agent supplying the effective age.
    pub age: Option<String>,
    /// Designated agent supplying the condition score.
    pub condition: Option<String>,
}

impl ConfigFile {
    pub fn to_partial(&self) -> PartialConfig {
        PartialConfig {
            concurrency: self.pipeline.as_ref().and_then(|p| p.concurrency),
            session_ttl_secs: self.pipeline.as_ref().and_then(|p| p.session_ttl_secs),
            final_agent: self.agents.as_ref().and_then(|a| a.final_agent.clone()),
            completeness_agent: self.agents.as_ref().and_then(|a| a.completeness.clone()),
            age_agent: self.agents.as_ref().and_then(|a| a.age.clone()),
            condition_agent: self.agents.as_ref().and_then(|a| a.condition.clone()),
        }
    }
}

/// Fully-resolved runtime configuration. All fields have values.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Wave-internal concurrency limit `K`; `1` degrades to sequential runs.
    pub concurrency: usize,
    pub session_ttl_secs: u64,
    pub final_agent: String,
    pub completeness_agent: String,
    pub age_agent: String,
    pub condition_agent: String,
}

/// Partial config used during merge. All fields are Option so that missing
/// fields don't override lower-priority values.
#[derive(Debug, Clone, Default)]
pub struct PartialConfig {
    pub concurrency: Option<usize>,
    pub session_ttl_secs: Option<u64>,
    pub final_agent: Option<String>,
    pub completeness_agent: Option<String>,
    pub age_agent: Option<String>,
    pub condition_agent: Option<String>,
}
