//! The agent contract: the uniform shape every analysis unit implements.
//!
//! An [`Agent`] owns its own lifecycle state (status, logs, result, timing)
//! while the analysis logic lives behind the [`AgentBody`] trait. The contract
//! guarantees that every body is driven identically and that **no fault inside
//! a body ever escapes**: [`Agent::execute`] absorbs body errors into a
//! `Fail` result, so the orchestrator needs no per-agent error handling.
//!
//! `execute` is split internally into [`Agent::begin_run`] and
//! [`Agent::finish_run`] so the orchestrator can hold its registry lock only
//! around the state transitions, never across the body's await. Calling
//! `execute` directly (as tests do) composes the same two halves.

use std::sync::Mutex;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::context::PipelineContext;

/// Lifecycle status of an agent. `Idle` is the only initial value;
/// `Processing` is transient; the rest are terminal for a single run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Idle,
    Processing,
    Success,
    Warn,
    Fail,
}

/// Severity of a single agent log line.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
    /// Reasoning/progress chatter, rendered dimmed by subscribers.
    Thinking,
}

/// A single log entry produced during an agent run.
///
/// Append-only per run; the whole sequence is cleared at the start of each
/// `execute` so stale lines from a previous run can never leak.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub level: LogLevel,
}

impl LogEntry {
    pub fn new(message: impl Into<String>, level: LogLevel) -> Self {
        Self {
            timestamp: Utc::now(),
            message: message.into(),
            level,
        }
    }
}

/// The typed result of one agent run. Immutable once produced.
///
/// `category` and `score` are agent-specific scales (e.g. a 1-5 severity
/// tier, a 0-30 condition score); the orchestration core treats them as
/// opaque until the final stage consumes them.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentResult {
    pub status: AgentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(default)]
    pub summary: String,
    /// Ordered string-keyed map of arbitrary structured data.
    #[serde(default)]
    pub details: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub errors: Vec<String>,
}

impl AgentResult {
    /// A result with the given status and summary, everything else empty.
    pub fn new(status: AgentStatus, summary: impl Into<String>) -> Self {
        Self {
            status,
            category: None,
            score: None,
            summary: summary.into(),
            details: serde_json::Map::new(),
            warnings: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// The failure-synthesized result used whenever a body fault is absorbed.
    pub fn from_error(message: &str) -> Self {
        Self {
            errors: vec![message.to_string()],
            ..Self::new(AgentStatus::Fail, format!("Agent error: {message}"))
        }
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.details.insert(key.into(), value);
        self
    }
}

/// Log sink handed to an [`AgentBody`] for the duration of one run.
///
/// Bodies may run concurrently with state queries, so buffered entries live
/// behind a `Mutex` and are merged into the agent's log at settle time. The
/// instruction text is the immutable snapshot taken when the run began;
/// overrides queued mid-run apply to the next invocation only.
pub struct RunHandle {
    /// Instruction snapshot for this run.
    pub instructions: String,
    entries: Mutex<Vec<LogEntry>>,
}

impl RunHandle {
    pub fn new(instructions: String) -> Self {
        Self {
            instructions,
            entries: Mutex::new(Vec::new()),
        }
    }

    pub fn log(&self, message: impl Into<String>, level: LogLevel) {
        self.entries
            .lock()
            .unwrap()
            .push(LogEntry::new(message, level));
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(message, LogLevel::Info);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.log(message, LogLevel::Warn);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.log(message, LogLevel::Error);
    }

    pub fn thinking(&self, message: impl Into<String>) {
        self.log(message, LogLevel::Thinking);
    }

    fn drain(&self) -> Vec<LogEntry> {
        std::mem::take(&mut self.entries.lock().unwrap())
    }
}

/// The analysis routine behind an agent. Supplied per named agent; may
/// perform arbitrary I/O, must not mutate shared context, and must be safely
/// abandon-able (the orchestrator may drop the future on cancellation).
#[async_trait]
pub trait AgentBody: Send + Sync {
    async fn run(&self, ctx: &PipelineContext, run: &RunHandle) -> anyhow::Result<AgentResult>;
}

/// Adapter turning a plain closure over the context into an [`AgentBody`].
///
/// Handy for replay-style agents whose result is a pure function of the
/// input bundle, and for tests.
pub struct FnBody<F>
where
    F: Fn(&PipelineContext) -> anyhow::Result<AgentResult> + Send + Sync,
{
    f: F,
}

impl<F> FnBody<F>
where
    F: Fn(&PipelineContext) -> anyhow::Result<AgentResult> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F> AgentBody for FnBody<F>
where
    F: Fn(&PipelineContext) -> anyhow::Result<AgentResult> + Send + Sync,
{
    async fn run(&self, ctx: &PipelineContext, _run: &RunHandle) -> anyhow::Result<AgentResult> {
        (self.f)(ctx)
    }
}

/// Lifecycle state for one named analysis unit.
///
/// Constructed once per pipeline run (no cross-run reuse) and owned
/// exclusively by the orchestrator's registry; no agent holds a reference to
/// another agent. The analysis logic itself is kept separately as an
/// `Arc<dyn AgentBody>` so state transitions never hold a lock across I/O.
pub struct Agent {
    pub name: String,
    pub description: String,
    /// Instruction text snapshotted at the start of each run.
    instructions: String,
    /// Override queued for the next run; applied by `begin_run`.
    queued_instructions: Option<String>,
    pub status: AgentStatus,
    pub logs: Vec<LogEntry>,
    pub result: Option<AgentResult>,
    start_time: Option<Instant>,
    end_time: Option<Instant>,
}

impl Agent {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        instructions: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            instructions: instructions.into(),
            queued_instructions: None,
            status: AgentStatus::Idle,
            logs: Vec::new(),
            result: None,
            start_time: None,
            end_time: None,
        }
    }

    pub fn instructions(&self) -> &str {
        &self.instructions
    }

    /// Queue new instruction text. Takes effect at the agent's next
    /// `begin_run`, never retroactively, so concurrent reads during a wave
    /// are race-free.
    pub fn queue_instructions(&mut self, instructions: impl Into<String>) {
        self.queued_instructions = Some(instructions.into());
    }

    fn log(&mut self, message: impl Into<String>, level: LogLevel) {
        self.logs.push(LogEntry::new(message, level));
    }

    /// Elapsed processing time in seconds, rounded to two decimals.
    /// Returns `0.0` if the agent never started.
    pub fn elapsed_secs(&self) -> f64 {
        let Some(start) = self.start_time else {
            return 0.0;
        };
        let elapsed = match self.end_time {
            Some(end) => end.duration_since(start),
            None => start.elapsed(),
        };
        (elapsed.as_secs_f64() * 100.0).round() / 100.0
    }

    /// Transition into a run: apply any queued instruction override, reset
    /// logs and timestamps, set `Processing`, and return the [`RunHandle`]
    /// carrying this run's instruction snapshot.
    pub fn begin_run(&mut self) -> RunHandle {
        if let Some(next) = self.queued_instructions.take() {
            self.instructions = next;
        }
        self.status = AgentStatus::Processing;
        self.logs.clear();
        self.result = None;
        self.start_time = Some(Instant::now());
        self.end_time = None;
        self.log(format!("Agent {} started processing.", self.name), LogLevel::Info);
        RunHandle::new(self.instructions.clone())
    }

    /// Settle a run: merge buffered body logs, absorb an `Err` outcome into a
    /// failure-synthesized result, and record the end timestamp. Returns the
    /// settled result (also retained on the agent).
    pub fn finish_run(
        &mut self,
        run: RunHandle,
        outcome: anyhow::Result<AgentResult>,
    ) -> AgentResult {
        self.logs.extend(run.drain());

        let result = match outcome {
            Ok(result) => {
                self.status = result.status;
                self.log(
                    format!(
                        "Agent {} finished with status: {}",
                        self.name,
                        status_label(result.status)
                    ),
                    LogLevel::Info,
                );
                result
            }
            Err(e) => {
                let message = format!("{e:#}");
                self.status = AgentStatus::Fail;
                self.log(
                    format!("Agent {} encountered error: {message}", self.name),
                    LogLevel::Error,
                );
                AgentResult::from_error(&message)
            }
        };

        self.end_time = Some(Instant::now());
        self.result = Some(result.clone());
        result
    }

    /// Settle an agent whose task died outside the contract (e.g. a panic in
    /// the body caught as a task join error). Synthesizes the same
    /// failure-shaped result `finish_run` would have produced.
    pub fn fail(&mut self, message: &str) -> AgentResult {
        self.status = AgentStatus::Fail;
        self.log(
            format!("Agent {} encountered error: {message}", self.name),
            LogLevel::Error,
        );
        self.end_time = Some(Instant::now());
        let result = AgentResult::from_error(message);
        self.result = Some(result.clone());
        result
    }

    /// Drive the body through one full run. Never propagates body faults;
    /// the worst case is a `Fail` result with a populated `errors` list.
    /// Safe to re-invoke: each call resets logs, timestamps, and status.
    pub async fn execute(&mut self, body: &dyn AgentBody, ctx: &PipelineContext) -> AgentResult {
        let run = self.begin_run();
        let outcome = body.run(ctx, &run).await;
        self.finish_run(run, outcome)
    }
}

pub(crate) fn status_label(status: AgentStatus) -> &'static str {
    match status {
        AgentStatus::Idle => "idle",
        AgentStatus::Processing => "processing",
        AgentStatus::Success => "success",
        AgentStatus::Warn => "warn",
        AgentStatus::Fail => "fail",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedBody(AgentResult);

    #[async_trait]
    impl AgentBody for FixedBody {
        async fn run(&self, _ctx: &PipelineContext, run: &RunHandle) -> anyhow::Result<AgentResult> {
            run.info("inspecting input");
            Ok(self.0.clone())
        }
    }

    struct FailingBody;

    #[async_trait]
    impl AgentBody for FailingBody {
        async fn run(
            &self,
            _ctx: &PipelineContext,
            _run: &RunHandle,
        ) -> anyhow::Result<AgentResult> {
            anyhow::bail!("upstream service unreachable")
        }
    }

    #[tokio::test]
    async fn execute_records_lifecycle_and_result() {
        let mut agent = Agent::new("inspector", "condition check", "grade the photos");
        let body = FixedBody(AgentResult::new(AgentStatus::Success, "all good"));
        let ctx = PipelineContext::default();

        let result = agent.execute(&body, &ctx).await;

        assert_eq!(result.status, AgentStatus::Success);
        assert_eq!(agent.status, AgentStatus::Success);
        assert!(agent.result.is_some());
        // start log + body log + completion log
        assert_eq!(agent.logs.len(), 3);
        assert!(agent.logs[0].message.contains("started"));
        assert!(agent.logs[2].message.contains("status: success"));
    }

    #[tokio::test]
    async fn execute_absorbs_body_errors() {
        let mut agent = Agent::new("geovalidator", "gps check", "");
        let ctx = PipelineContext::default();

        let result = agent.execute(&FailingBody, &ctx).await;

        assert_eq!(result.status, AgentStatus::Fail);
        assert_eq!(agent.status, AgentStatus::Fail);
        assert!(result.summary.starts_with("Agent error:"));
        assert_eq!(result.errors, vec!["upstream service unreachable"]);
        assert!(agent
            .logs
            .iter()
            .any(|l| l.level == LogLevel::Error && l.message.contains("unreachable")));
    }

    #[tokio::test]
    async fn execute_is_idempotent_for_always_failing_bodies() {
        let mut agent = Agent::new("flaky", "", "");
        let ctx = PipelineContext::default();

        for _ in 0..3 {
            let result = agent.execute(&FailingBody, &ctx).await;
            assert_eq!(result.status, AgentStatus::Fail);
            assert!(!result.errors.is_empty());
            // Logs are reset each run, never accumulated across runs.
            assert_eq!(
                agent.logs.iter().filter(|l| l.level == LogLevel::Error).count(),
                1
            );
        }
    }

    #[tokio::test]
    async fn queued_instructions_apply_on_next_run_only() {
        let mut agent = Agent::new("historian", "", "original prompt");
        let body = FixedBody(AgentResult::new(AgentStatus::Success, "ok"));
        let ctx = PipelineContext::default();

        agent.execute(&body, &ctx).await;
        assert_eq!(agent.instructions(), "original prompt");

        agent.queue_instructions("revised prompt");
        assert_eq!(agent.instructions(), "original prompt");

        let run = agent.begin_run();
        assert_eq!(run.instructions, "revised prompt");
        assert_eq!(agent.instructions(), "revised prompt");
    }

    #[test]
    fn elapsed_is_zero_before_first_run() {
        let agent = Agent::new("idle", "", "");
        assert_eq!(agent.elapsed_secs(), 0.0);
        assert_eq!(agent.status, AgentStatus::Idle);
    }

    #[test]
    fn from_error_populates_errors_list() {
        let result = AgentResult::from_error("boom");
        assert_eq!(result.status, AgentStatus::Fail);
        assert_eq!(result.summary, "Agent error: boom");
        assert_eq!(result.errors, vec!["boom"]);
    }
}
