//! The final pipeline stage: deterministic reduction of all agent results
//! into a single graded verdict.
//!
//! The [`Aggregator`] is itself an [`AgentBody`], always scheduled by the
//! orchestrator as the sole final wave so it observes the complete, settled
//! result set (failure-synthesized results included). It counts warnings,
//! applies the blocking and override precedence rules, cross-checks the age
//! and condition signals through the [decision matrix](crate::matrix), and
//! writes a human-readable narrative. Narrative generation may delegate to an
//! external collaborator, but a failing collaborator never changes the
//! computed verdict: the deterministic fallback is always available.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::agent::{AgentBody, AgentResult, AgentStatus, PipelineContext, RunHandle};
use crate::matrix::{self, Agreement};

/// The pipeline's terminal three-valued decision.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    /// Fully automated pass.
    Online,
    /// Needs human sign-off.
    Supervised,
    /// Send back to the client.
    Return,
}

impl Verdict {
    /// Traffic-light color subscribers use to render the verdict.
    pub fn color(self) -> &'static str {
        match self {
            Verdict::Online => "green",
            Verdict::Supervised => "orange",
            Verdict::Return => "red",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Verdict::Online => "online",
            Verdict::Supervised => "supervised",
            Verdict::Return => "return",
        }
    }
}

/// Names of the designated agents the aggregator gives special treatment.
#[derive(Clone, Debug)]
pub struct AggregatorConfig {
    /// The completeness agent; its `Fail` status blocks unconditionally.
    pub completeness_agent: String,
    /// The agent whose `effective_age` detail feeds the matrix row.
    pub age_agent: String,
    /// The agent whose score feeds the matrix column and which may carry the
    /// `critical_override` detail.
    pub condition_agent: String,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            completeness_agent: "guardian".to_string(),
            age_agent: "historian".to_string(),
            condition_agent: "inspector".to_string(),
        }
    }
}

/// Structured findings handed to a [`NarrativeGenerator`].
#[derive(Clone, Debug, Serialize)]
pub struct ReportFindings {
    pub verdict: Verdict,
    pub category: Option<i64>,
    pub effective_age: Option<u32>,
    pub condition_score: Option<u32>,
    pub total_warnings: usize,
    pub has_fail: bool,
    /// Per-agent one-line summaries, in stable name order.
    pub summaries: BTreeMap<String, String>,
}

/// Optional collaborator producing the human-readable report text.
///
/// Failure here is an availability problem, not a correctness problem: the
/// aggregator logs it at warn level and falls back to
/// [`fallback_report`], so the verdict computation never depends on this
/// call succeeding.
#[async_trait]
pub trait NarrativeGenerator: Send + Sync {
    async fn generate(&self, findings: &ReportFindings) -> anyhow::Result<String>;
}

/// Deterministic narrative used when no generator is configured or the
/// configured one fails: the verdict, the category, then one summary line
/// per agent.
pub fn fallback_report(findings: &ReportFindings) -> String {
    let mut lines = vec![format!("Verdict: {}", findings.verdict.label())];
    if let Some(category) = findings.category {
        lines.push(format!("Assigned category: {category}"));
    }
    lines.push(String::new());
    for (name, summary) in &findings.summaries {
        let text = if summary.is_empty() { "-" } else { summary.as_str() };
        lines.push(format!("{name}: {text}"));
    }
    lines.join("\n")
}

/// The final-stage agent body.
pub struct Aggregator {
    config: AggregatorConfig,
    generator: Option<Arc<dyn NarrativeGenerator>>,
}

impl Aggregator {
    pub fn new(config: AggregatorConfig) -> Self {
        Self {
            config,
            generator: None,
        }
    }

    pub fn with_generator(mut self, generator: Arc<dyn NarrativeGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    async fn narrative(&self, findings: &ReportFindings, run: &RunHandle) -> String {
        let Some(generator) = &self.generator else {
            return fallback_report(findings);
        };
        run.thinking("Generating final report...");
        match generator.generate(findings).await {
            Ok(report) => {
                run.info("Report generated.");
                report
            }
            Err(e) => {
                run.warn(format!("Report generation failed: {e:#}"));
                fallback_report(findings)
            }
        }
    }
}

#[async_trait]
impl AgentBody for Aggregator {
    async fn run(&self, ctx: &PipelineContext, run: &RunHandle) -> anyhow::Result<AgentResult> {
        run.info("Aggregating results of all checks...");

        let mut total_warnings = 0usize;
        let mut has_fail = false;
        let mut all_warnings = Vec::new();
        let mut all_errors = Vec::new();
        let mut summaries = BTreeMap::new();
        let mut agent_summaries = serde_json::Map::new();

        let mut names: Vec<&String> = ctx.results.keys().collect();
        names.sort();
        for name in names {
            let result = &ctx.results[name];
            summaries.insert(name.clone(), result.summary.clone());
            agent_summaries.insert(
                name.clone(),
                json!({
                    "status": result.status,
                    "summary": result.summary,
                    "warnings": result.warnings,
                    "errors": result.errors,
                    "score": result.score,
                    "category": result.category,
                }),
            );
            total_warnings += result.warnings.len();
            all_warnings.extend(result.warnings.iter().cloned());
            all_errors.extend(result.errors.iter().cloned());
            match result.status {
                AgentStatus::Fail => {
                    has_fail = true;
                    run.error(format!("FAIL: {name} - {}", result.summary));
                }
                _ if !result.warnings.is_empty() => {
                    run.warn(format!("WARN: {name} - {} warning(s)", result.warnings.len()));
                }
                _ => run.info(format!("OK: {name}")),
            }
        }

        // Highest-precedence blocker: incomplete documentation.
        let completeness_fail = ctx
            .result_of(&self.config.completeness_agent)
            .is_some_and(|r| r.status == AgentStatus::Fail);
        if completeness_fail {
            run.error("BLOCKING: documentation incomplete");
        }

        // Cross-check effective age against the condition score.
        let effective_age = ctx
            .result_of(&self.config.age_agent)
            .and_then(|r| r.details.get("effective_age"))
            .and_then(|v| v.as_u64())
            .map(|v| v as u32);
        let condition_score = ctx
            .result_of(&self.config.condition_agent)
            .and_then(|r| r.score)
            .filter(|s| *s >= 0.0 && *s <= matrix::MAX_CONDITION_SCORE as f64)
            .map(|s| s as u32);

        let mut matrix_detail = None;
        let mut matrix_category = None;
        if let (Some(age), Some(score)) = (effective_age, condition_score) {
            let cell = matrix::lookup(age, score);
            matrix_category = Some(cell.category);
            run.info(format!(
                "Matrix: age={age}, score={score} -> category {} ({:?})",
                cell.category, cell.agreement
            ));
            if cell.agreement == Agreement::Conflict {
                total_warnings += 1;
                run.warn("Matrix: CONFLICT - warning added");
            }
            matrix_detail = Some(json!({
                "effective_age": age,
                "condition_score": score,
                "category": cell.category,
                "agreement": cell.agreement,
            }));
        }

        // Fall back to the age agent's own category when the matrix had no input.
        let mut final_category = matrix_category.or_else(|| {
            ctx.result_of(&self.config.age_agent)
                .and_then(|r| r.category)
        });

        // Critical finding from the condition agent overrides everything the
        // matrix produced.
        let critical_override = ctx
            .result_of(&self.config.condition_agent)
            .and_then(|r| r.details.get("critical_override"))
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        if critical_override {
            final_category = Some(5);
            has_fail = true;
            run.error("Critical finding from condition check -> category 5");
        }

        // Ordered verdict policy, first match wins.
        let verdict = if has_fail || completeness_fail || total_warnings >= 3 {
            Verdict::Return
        } else if total_warnings >= 1 {
            Verdict::Supervised
        } else {
            Verdict::Online
        };

        run.info(format!(
            "Verdict: {} | category: {:?}",
            verdict.label(),
            final_category
        ));

        let findings = ReportFindings {
            verdict,
            category: final_category,
            effective_age,
            condition_score,
            total_warnings,
            has_fail,
            summaries,
        };
        let narrative = self.narrative(&findings, run).await;

        let status = match verdict {
            Verdict::Return => AgentStatus::Fail,
            Verdict::Supervised => AgentStatus::Warn,
            Verdict::Online => AgentStatus::Success,
        };

        let mut details = serde_json::Map::new();
        details.insert("verdict".into(), json!(verdict));
        details.insert("verdict_color".into(), json!(verdict.color()));
        details.insert("final_category".into(), json!(final_category));
        details.insert("total_warnings".into(), json!(total_warnings));
        details.insert("has_fail".into(), json!(has_fail));
        details.insert("narrative".into(), json!(narrative));
        if let Some(matrix_detail) = matrix_detail {
            details.insert("matrix".into(), matrix_detail);
        }
        details.insert("agent_summaries".into(), agent_summaries.into());

        Ok(AgentResult {
            status,
            category: final_category,
            score: None,
            summary: narrative,
            details,
            warnings: all_warnings,
            errors: all_errors,
        })
    }
}
