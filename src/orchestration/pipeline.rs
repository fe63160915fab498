//! The pipeline orchestrator: owns the agent registry and the execution
//! plan, drives every agent through the contract, and reduces the run into
//! one cached [`PipelineResult`].
//!
//! **Concurrency model:** agents of one wave run as spawned tasks gated by a
//! counting [`Semaphore`] of size `K`; `K = 1` degrades to strict sequential
//! execution with no change to the verdict. The registry is an
//! `Arc<Mutex<HashMap>>`; locks are held only around state transitions,
//! never across a body's await.
//!
//! **Failure model:** body faults are already absorbed by the agent
//! contract. Anything that still escapes a task (a panic, i.e. a defect in
//! the machinery itself) surfaces as a join error, is synthesized into a
//! `Fail` result for that agent, and the pipeline continues. A wave is
//! drained only when every sibling has settled; one agent's failure never
//! cancels its siblings. The pipeline as a whole never errors: worst case is
//! a fully-failed result set with the verdict forced to `Return`.
//!
//! **Cancellation model:** each run owns a [`CancellationToken`]. Cancelling
//! it makes every in-flight body settle as `Fail`; already-settled results
//! are kept, and the run still completes with a result.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::plan::ExecutionPlan;
use super::types::{AgentSnapshot, AgentSpec, PipelineResult, PipelineState};
use crate::agent::{Agent, AgentBody, AgentResult, AgentStatus, PipelineContext};
use crate::aggregator::Verdict;
use crate::broadcast::{EventBus, PipelineEvent};
use crate::error::PlanError;

type Registry = Arc<Mutex<HashMap<String, Agent>>>;

/// Orchestrates one pipeline run over a fixed agent set.
///
/// Designed to be wrapped in `Arc` so embedding hosts can answer
/// [`PipelineOrchestrator::get_state`] queries while `run` is in flight.
pub struct PipelineOrchestrator {
    pipeline_id: String,
    session_id: String,
    concurrency: usize,
    plan: ExecutionPlan,
    final_agent: String,
    registry: Registry,
    bodies: HashMap<String, Arc<dyn AgentBody>>,
    bus: EventBus,
    cancel: CancellationToken,
    is_running: Arc<AtomicBool>,
    completed: Arc<Mutex<Option<PipelineResult>>>,
}

impl std::fmt::Debug for PipelineOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineOrchestrator")
            .field("pipeline_id", &self.pipeline_id)
            .field("session_id", &self.session_id)
            .field("concurrency", &self.concurrency)
            .field("final_agent", &self.final_agent)
            .finish_non_exhaustive()
    }
}

impl PipelineOrchestrator {
    /// Build an orchestrator for the given agent set and plan.
    ///
    /// `final_agent` names the aggregation stage; it must be registered but
    /// never appear in the plan -- it always runs last, alone. Validates the
    /// plan up front so a running pipeline can never hit a planning error.
    pub fn new(
        session_id: impl Into<String>,
        specs: Vec<AgentSpec>,
        plan: ExecutionPlan,
        final_agent: impl Into<String>,
        concurrency: usize,
    ) -> Result<Self, PlanError> {
        let final_agent = final_agent.into();

        let mut registry = HashMap::new();
        let mut bodies = HashMap::new();
        for spec in specs {
            if registry.contains_key(&spec.name) {
                return Err(PlanError::DuplicateRegistration(spec.name));
            }
            bodies.insert(spec.name.clone(), spec.body);
            registry.insert(
                spec.name.clone(),
                Agent::new(spec.name, spec.description, spec.instructions),
            );
        }

        if !registry.contains_key(&final_agent) {
            return Err(PlanError::FinalAgentNotRegistered(final_agent));
        }
        let registered: HashSet<String> = registry.keys().cloned().collect();
        plan.validate(&registered, &final_agent)?;

        Ok(Self {
            // Short ids keep logs and event streams readable.
            pipeline_id: Uuid::new_v4().to_string()[..8].to_string(),
            session_id: session_id.into(),
            concurrency: concurrency.max(1),
            plan,
            final_agent,
            registry: Arc::new(Mutex::new(registry)),
            bodies,
            bus: EventBus::new(),
            cancel: CancellationToken::new(),
            is_running: Arc::new(AtomicBool::new(false)),
            completed: Arc::new(Mutex::new(None)),
        })
    }

    pub fn pipeline_id(&self) -> &str {
        &self.pipeline_id
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    /// The bus delivering this pipeline's lifecycle events.
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Token for cooperative cancellation of the whole run. In-flight agent
    /// bodies are abandoned and settle as `Fail`; settled results are kept.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Queue new instruction text for a named agent, effective from that
    /// agent's next execute. Returns `false` if the agent is unknown.
    pub fn override_instructions(&self, agent: &str, instructions: impl Into<String>) -> bool {
        let mut registry = self.registry.lock().unwrap();
        match registry.get_mut(agent) {
            Some(agent) => {
                agent.queue_instructions(instructions);
                true
            }
            None => false,
        }
    }

    /// Live snapshot of the pipeline. Valid at any time: before, during, and
    /// after a run.
    pub fn get_state(&self) -> PipelineState {
        let registry = self.registry.lock().unwrap();
        PipelineState {
            pipeline_id: self.pipeline_id.clone(),
            session_id: self.session_id.clone(),
            is_running: self.is_running(),
            agents: registry
                .iter()
                .map(|(name, agent)| (name.clone(), AgentSnapshot::of(agent)))
                .collect(),
        }
    }

    /// The cached terminal result, once the run has completed.
    pub fn result(&self) -> Option<PipelineResult> {
        self.completed.lock().unwrap().clone()
    }

    /// Execute the full pipeline: every wave of the plan, then the final
    /// stage alone. Never fails; the worst case is a result whose verdict is
    /// `Return`. Calling `run` again after completion returns the cached
    /// result.
    pub async fn run(&self, ctx: PipelineContext) -> PipelineResult {
        if let Some(cached) = self.result() {
            return cached;
        }
        self.is_running.store(true, Ordering::SeqCst);
        let started = Instant::now();

        tracing::info!(
            pipeline_id = %self.pipeline_id,
            session_id = %self.session_id,
            concurrency = self.concurrency,
            "pipeline starting"
        );

        let mut agent_names: Vec<String> = self.plan.agent_names().cloned().collect();
        agent_names.push(self.final_agent.clone());
        self.bus.broadcast(&PipelineEvent::PipelineStart {
            pipeline_id: self.pipeline_id.clone(),
            session_id: self.session_id.clone(),
            agents: agent_names,
            timestamp: Utc::now(),
        });

        // Bundle-supplied overrides queue exactly like programmatic ones.
        {
            let mut registry = self.registry.lock().unwrap();
            for (name, text) in &ctx.instruction_overrides {
                if let Some(agent) = registry.get_mut(name) {
                    agent.queue_instructions(text.clone());
                }
            }
        }

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut settled: HashMap<String, AgentResult> = HashMap::new();

        for wave in self.plan.waves() {
            // Copy-on-complete: the wave sees only fully-settled results
            // from earlier waves, never its siblings.
            let wave_ctx = Arc::new(ctx.with_results(settled.clone()));

            let mut handles = Vec::with_capacity(wave.len());
            for name in wave {
                handles.push((name.clone(), self.spawn_agent(name, &wave_ctx, &semaphore)));
            }
            for (name, handle) in handles {
                let result = match handle.await {
                    Ok(result) => result,
                    Err(e) => self.contain_task_fault(&name, &e.to_string()),
                };
                settled.insert(name, result);
            }
        }

        // Final wave: the aggregation stage, alone, over the complete set.
        let final_ctx = Arc::new(ctx.with_results(settled));
        let final_handle = self.spawn_agent(&self.final_agent, &final_ctx, &semaphore);
        let final_result = match final_handle.await {
            Ok(result) => result,
            Err(e) => self.contain_task_fault(&self.final_agent, &e.to_string()),
        };

        // A failed final stage carries no verdict; force the safe one.
        let verdict = final_result
            .details
            .get("verdict")
            .and_then(|v| serde_json::from_value::<Verdict>(v.clone()).ok())
            .unwrap_or(Verdict::Return);

        let result = PipelineResult {
            pipeline_id: self.pipeline_id.clone(),
            session_id: self.session_id.clone(),
            total_secs: round2(started.elapsed().as_secs_f64()),
            verdict,
            verdict_category: final_result.category,
            agents: self
                .registry
                .lock()
                .unwrap()
                .iter()
                .map(|(name, agent)| (name.clone(), AgentSnapshot::of(agent)))
                .collect(),
        };

        *self.completed.lock().unwrap() = Some(result.clone());
        self.is_running.store(false, Ordering::SeqCst);

        self.bus.broadcast(&PipelineEvent::PipelineComplete {
            pipeline_id: self.pipeline_id.clone(),
            result: result.clone(),
            timestamp: Utc::now(),
        });
        tracing::info!(
            pipeline_id = %self.pipeline_id,
            verdict = verdict.label(),
            total_secs = result.total_secs,
            "pipeline complete"
        );

        result
    }

    /// Spawn one agent's run as a task: acquire a permit, drive the contract
    /// with lock-free awaiting, and mirror lifecycle events onto the bus.
    fn spawn_agent(
        &self,
        name: &str,
        ctx: &Arc<PipelineContext>,
        semaphore: &Arc<Semaphore>,
    ) -> tokio::task::JoinHandle<AgentResult> {
        let name = name.to_string();
        let body = self.bodies[&name].clone();
        let registry = self.registry.clone();
        let ctx = ctx.clone();
        let semaphore = semaphore.clone();
        let bus = self.bus.clone();
        let pipeline_id = self.pipeline_id.clone();
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .expect("pipeline semaphore never closes");

            let run = {
                let mut reg = registry.lock().unwrap();
                match reg.get_mut(&name) {
                    Some(agent) => agent.begin_run(),
                    // Unreachable after plan validation; settle as Fail anyway.
                    None => return AgentResult::from_error("agent not registered"),
                }
            };

            bus.broadcast(&PipelineEvent::AgentStatus {
                pipeline_id: pipeline_id.clone(),
                agent: name.clone(),
                status: AgentStatus::Processing,
                elapsed_secs: None,
                timestamp: Utc::now(),
            });

            let outcome = tokio::select! {
                outcome = body.run(&ctx, &run) => outcome,
                _ = cancel.cancelled() => Err(anyhow::anyhow!("pipeline cancelled")),
            };

            let (result, logs, elapsed) = {
                let mut reg = registry.lock().unwrap();
                let agent = reg
                    .get_mut(&name)
                    .expect("agent present for the whole run");
                let result = agent.finish_run(run, outcome);
                (result, agent.logs.clone(), agent.elapsed_secs())
            };

            for entry in logs {
                bus.broadcast(&PipelineEvent::AgentLog {
                    pipeline_id: pipeline_id.clone(),
                    agent: name.clone(),
                    message: entry.message,
                    level: entry.level,
                    timestamp: entry.timestamp,
                });
            }
            bus.broadcast(&PipelineEvent::AgentStatus {
                pipeline_id,
                agent: name,
                status: result.status,
                elapsed_secs: Some(elapsed),
                timestamp: Utc::now(),
            });

            result
        })
    }

    /// Contain a fault that escaped the agent contract (a panicked task):
    /// synthesize a `Fail` result for the agent, log it, broadcast it, and
    /// let the pipeline continue.
    fn contain_task_fault(&self, name: &str, message: &str) -> AgentResult {
        tracing::error!(agent = name, %message, "agent task escaped the contract");
        let result = {
            let mut registry = self.registry.lock().unwrap();
            match registry.get_mut(name) {
                Some(agent) => agent.fail(message),
                None => AgentResult::from_error(message),
            }
        };
        self.bus.broadcast(&PipelineEvent::AgentLog {
            pipeline_id: self.pipeline_id.clone(),
            agent: name.to_string(),
            message: format!("Agent failed: {message}"),
            level: crate::agent::LogLevel::Error,
            timestamp: Utc::now(),
        });
        self.bus.broadcast(&PipelineEvent::AgentStatus {
            pipeline_id: self.pipeline_id.clone(),
            agent: name.to_string(),
            status: AgentStatus::Fail,
            elapsed_secs: None,
            timestamp: Utc::now(),
        });
        result
    }
}

fn round2(secs: f64) -> f64 {
    (secs * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::FnBody;
    use crate::aggregator::{Aggregator, AggregatorConfig};

    fn spec_fixed(name: &str, result: AgentResult) -> AgentSpec {
        AgentSpec::new(
            name,
            format!("{name} check"),
            "",
            Arc::new(FnBody::new(move |_ctx| Ok(result.clone()))),
        )
    }

    fn strategist_spec() -> AgentSpec {
        AgentSpec::new(
            "strategist",
            "final aggregation",
            "",
            Arc::new(Aggregator::new(AggregatorConfig::default())),
        )
    }

    fn two_agent_orchestrator() -> PipelineOrchestrator {
        PipelineOrchestrator::new(
            "session-1",
            vec![
                spec_fixed("guardian", AgentResult::new(AgentStatus::Success, "complete")),
                spec_fixed("forensic", AgentResult::new(AgentStatus::Success, "clean")),
                strategist_spec(),
            ],
            ExecutionPlan::single_wave(["guardian", "forensic"]),
            "strategist",
            2,
        )
        .unwrap()
    }

    #[test]
    fn construction_rejects_duplicate_registration() {
        let err = PipelineOrchestrator::new(
            "s",
            vec![
                spec_fixed("guardian", AgentResult::new(AgentStatus::Success, "")),
                spec_fixed("guardian", AgentResult::new(AgentStatus::Success, "")),
                strategist_spec(),
            ],
            ExecutionPlan::single_wave(["guardian"]),
            "strategist",
            1,
        )
        .unwrap_err();
        assert!(matches!(err, PlanError::DuplicateRegistration(_)));
    }

    #[test]
    fn construction_rejects_missing_final_agent() {
        let err = PipelineOrchestrator::new(
            "s",
            vec![spec_fixed("guardian", AgentResult::new(AgentStatus::Success, ""))],
            ExecutionPlan::single_wave(["guardian"]),
            "strategist",
            1,
        )
        .unwrap_err();
        assert!(matches!(err, PlanError::FinalAgentNotRegistered(_)));
    }

    #[tokio::test]
    async fn state_machine_not_started_running_completed() {
        let orch = two_agent_orchestrator();

        let before = orch.get_state();
        assert!(!before.is_running);
        assert!(before.agents.values().all(|a| a.status == AgentStatus::Idle));
        assert!(orch.result().is_none());

        let result = orch.run(PipelineContext::default()).await;

        assert!(!orch.is_running());
        assert_eq!(result.verdict, Verdict::Online);
        let cached = orch.result().unwrap();
        assert_eq!(cached.pipeline_id, result.pipeline_id);
        assert_eq!(cached.verdict, result.verdict);
    }

    #[tokio::test]
    async fn second_run_returns_cached_result() {
        let orch = two_agent_orchestrator();
        let first = orch.run(PipelineContext::default()).await;
        let second = orch.run(PipelineContext::default()).await;
        assert_eq!(first.total_secs, second.total_secs);
        assert_eq!(first.verdict, second.verdict);
    }

    #[tokio::test]
    async fn panicking_agent_is_contained_and_siblings_settle() {
        let panicker = AgentSpec::new(
            "geovalidator",
            "gps check",
            "",
            Arc::new(FnBody::new(|_ctx| -> anyhow::Result<AgentResult> {
                panic!("index out of bounds in machinery")
            })),
        );
        let orch = PipelineOrchestrator::new(
            "session-2",
            vec![
                spec_fixed("guardian", AgentResult::new(AgentStatus::Success, "complete")),
                panicker,
                strategist_spec(),
            ],
            ExecutionPlan::single_wave(["guardian", "geovalidator"]),
            "strategist",
            2,
        )
        .unwrap();

        let result = orch.run(PipelineContext::default()).await;

        let geo = &result.agents["geovalidator"];
        assert_eq!(geo.status, AgentStatus::Fail);
        assert!(geo.result.as_ref().is_some_and(|r| !r.errors.is_empty()));
        // Sibling settled normally and the pipeline still produced a verdict.
        assert_eq!(result.agents["guardian"].status, AgentStatus::Success);
        assert_eq!(result.verdict, Verdict::Return);
    }

    #[tokio::test]
    async fn later_waves_see_earlier_results_but_not_siblings() {
        let observer = AgentSpec::new(
            "geovalidator",
            "",
            "",
            Arc::new(FnBody::new(|ctx| {
                let saw_guardian = ctx.result_of("guardian").is_some();
                let saw_sibling = ctx.result_of("cadastral").is_some();
                Ok(AgentResult::new(AgentStatus::Success, "ok")
                    .with_detail("saw_guardian", serde_json::json!(saw_guardian))
                    .with_detail("saw_sibling", serde_json::json!(saw_sibling)))
            })),
        );
        let orch = PipelineOrchestrator::new(
            "session-3",
            vec![
                spec_fixed("guardian", AgentResult::new(AgentStatus::Success, "complete")),
                spec_fixed("cadastral", AgentResult::new(AgentStatus::Success, "parsed")),
                observer,
                strategist_spec(),
            ],
            ExecutionPlan::single_wave(["guardian"]).then(["cadastral", "geovalidator"]),
            "strategist",
            2,
        )
        .unwrap();

        let result = orch.run(PipelineContext::default()).await;

        let details = &result.agents["geovalidator"].result.as_ref().unwrap().details;
        assert_eq!(details["saw_guardian"], serde_json::json!(true));
        assert_eq!(details["saw_sibling"], serde_json::json!(false));
    }

    #[tokio::test]
    async fn cancellation_fails_in_flight_agents_but_still_completes() {
        let hanging = AgentSpec::new(
            "geovalidator",
            "",
            "",
            Arc::new(HangingBody),
        );
        let orch = Arc::new(
            PipelineOrchestrator::new(
                "session-4",
                vec![
                    spec_fixed("guardian", AgentResult::new(AgentStatus::Success, "complete")),
                    hanging,
                    strategist_spec(),
                ],
                ExecutionPlan::single_wave(["guardian"]).then(["geovalidator"]),
                "strategist",
                1,
            )
            .unwrap(),
        );

        let runner = {
            let orch = orch.clone();
            tokio::spawn(async move { orch.run(PipelineContext::default()).await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        orch.cancel();

        let result = runner.await.unwrap();
        // The settled first-wave result survives; the hanging agent fails.
        assert_eq!(result.agents["guardian"].status, AgentStatus::Success);
        assert_eq!(result.agents["geovalidator"].status, AgentStatus::Fail);
        assert_eq!(result.verdict, Verdict::Return);
    }

    struct HangingBody;

    #[async_trait::async_trait]
    impl crate::agent::AgentBody for HangingBody {
        async fn run(
            &self,
            _ctx: &PipelineContext,
            _run: &crate::agent::RunHandle,
        ) -> anyhow::Result<AgentResult> {
            // Parks forever; only cancellation can settle this agent.
            futures::future::pending::<()>().await;
            unreachable!()
        }
    }

    #[tokio::test]
    async fn override_instructions_queues_for_next_run() {
        let orch = two_agent_orchestrator();
        assert!(orch.override_instructions("guardian", "stricter photo policy"));
        assert!(!orch.override_instructions("ghost", "x"));

        orch.run(PipelineContext::default()).await;

        let state = orch.get_state();
        assert_eq!(state.agents["guardian"].instructions, "stricter photo policy");
    }
}
