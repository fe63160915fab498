mod cli;

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;

use propcheck::agent::{AgentResult, FnBody, PipelineContext};
use propcheck::aggregator::{Aggregator, AggregatorConfig};
use propcheck::broadcast::PipelineEvent;
use propcheck::config::{self, AppConfig, PartialConfig};
use propcheck::matrix;
use propcheck::orchestration::{AgentSpec, ExecutionPlan, PipelineOrchestrator};
use propcheck::session::SessionStore;

/// A replay bundle: precomputed per-agent findings plus the shared input,
/// fed through the full pipeline to produce a verdict.
#[derive(Debug, Deserialize)]
struct FindingsBundle {
    #[serde(default)]
    input: serde_json::Map<String, serde_json::Value>,
    /// Per-agent instruction overrides, applied before the run.
    #[serde(default)]
    custom_prompts: HashMap<String, String>,
    /// Each agent's result, keyed by name.
    agents: BTreeMap<String, AgentResult>,
    /// Optional wave layout; defaults to one wave with every agent.
    #[serde(default)]
    waves: Option<Vec<Vec<String>>>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = cli::Cli::parse();

    match cli.command {
        cli::Commands::Run {
            input,
            session,
            concurrency,
            config: config_path,
        } => {
            let cli_partial = PartialConfig {
                concurrency,
                ..Default::default()
            };
            let config = config::load_config(config_path.as_deref(), cli_partial);
            let session_id = session.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            run_bundle(&input, session_id, &config).await?;
        }
        cli::Commands::Matrix { age, score } => {
            anyhow::ensure!(
                score <= matrix::MAX_CONDITION_SCORE,
                "condition score must be 0..={}",
                matrix::MAX_CONDITION_SCORE
            );
            let cell = matrix::lookup(age, score);
            println!("{}", serde_json::to_string_pretty(&cell)?);
        }
    }

    Ok(())
}

async fn run_bundle(path: &Path, session_id: String, config: &AppConfig) -> anyhow::Result<()> {
    let raw = tokio::fs::read_to_string(path).await?;
    let bundle: FindingsBundle = serde_json::from_str(&raw)?;

    let mut ctx = PipelineContext::new(bundle.input);
    ctx.instruction_overrides = bundle.custom_prompts;

    let mut specs = Vec::with_capacity(bundle.agents.len() + 1);
    for (name, result) in &bundle.agents {
        let result = result.clone();
        specs.push(AgentSpec::new(
            name,
            format!("replayed findings for {name}"),
            "",
            Arc::new(FnBody::new(move |_ctx| Ok(result.clone()))),
        ));
    }
    specs.push(AgentSpec::new(
        &config.final_agent,
        "final aggregation and verdict",
        "",
        Arc::new(Aggregator::new(AggregatorConfig {
            completeness_agent: config.completeness_agent.clone(),
            age_agent: config.age_agent.clone(),
            condition_agent: config.condition_agent.clone(),
        })),
    ));

    let plan = match bundle.waves {
        Some(waves) => ExecutionPlan::from_waves(waves),
        None => ExecutionPlan::single_wave(bundle.agents.keys().cloned()),
    };

    let orchestrator = Arc::new(PipelineOrchestrator::new(
        session_id.clone(),
        specs,
        plan,
        &config.final_agent,
        config.concurrency,
    )?);

    let store = SessionStore::new(Duration::from_secs(config.session_ttl_secs));
    store.insert(orchestrator.clone());

    // Mirror lifecycle events to the log while the pipeline runs.
    let (_sub, mut events) = orchestrator.bus().subscribe();
    let mirror = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                PipelineEvent::PipelineStart { pipeline_id, agents, .. } => {
                    tracing::info!(%pipeline_id, agents = agents.len(), "pipeline started");
                }
                PipelineEvent::AgentStatus { agent, status, elapsed_secs, .. } => {
                    tracing::info!(%agent, ?status, ?elapsed_secs, "agent status");
                }
                PipelineEvent::AgentLog { agent, message, .. } => {
                    tracing::debug!(%agent, "{message}");
                }
                PipelineEvent::PipelineComplete { .. } => break,
            }
        }
    });

    let result = orchestrator.run(ctx).await;
    store.mark_completed(&session_id);
    let _ = mirror.await;

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
