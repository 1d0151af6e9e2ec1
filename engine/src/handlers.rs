//! Command handlers for CLI operations
//!
//! `handle_run` wires the configured clients together, drives one benchmark
//! session end to end and prints the aggregate.

use anyhow::{Context, Result};
use chrono::Utc;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

use crate::agent::{DecisionEngine, RunResult};
use crate::cli::Cli;
use crate::config::Config;
use crate::guardrails::Guardrails;
use crate::llm::openrouter::OpenRouterModel;
use crate::runner::{pool_limiter, select_tasks, RunMode, TaskRunner};
use crate::secrets::SecretManager;
use crate::task_api::{HttpPlatform, TaskEnvironment, TaskInfo};
use crate::trace::{
    session_hash, write_error_report, SessionMetadata, SessionReport, Statistics,
};

/// Keychain service holding the API keys
pub const KEYCHAIN_SERVICE: &str = "ooda";

/// Output format for command results
#[derive(Debug, Clone, Copy)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for machine consumption
    Json,
}

/// Run a benchmark session.
///
/// CLI flags override the loaded configuration for this run only.
pub fn handle_run(cli: &Cli, config: &Config, format: OutputFormat) -> Result<()> {
    let mut config = config.clone();
    if let Some(workers) = cli.workers {
        config.runner.workers = workers.max(1);
    }
    let mode = RunMode::new(config.runner.workers, cli.sequential);
    let model = config.resolve_model(cli.model.as_deref())?;

    info!("Model: {} | Workers: {}", model.id, mode.workers());
    if let OutputFormat::Text = format {
        println!("[config] Model: {} | Workers: {}", model.id, mode.workers());
    }

    let secrets = SecretManager::new(KEYCHAIN_SERVICE);
    let llm_key = secrets
        .resolve(&config.llm.api_key_env)
        .context("Model API key required")?;
    let platform_key = secrets
        .resolve(&config.platform.api_key_env)
        .context("Platform API key required")?;

    let decision_model = OpenRouterModel::new(
        &config.llm,
        model.clone(),
        llm_key,
        config.agent.max_completion_tokens,
    )
    .context("Failed to build the model client")?;
    let platform = Arc::new(
        HttpPlatform::new(&config.platform, platform_key)
            .context("Failed to build the platform client")?,
    );
    let limiter = Arc::new(pool_limiter(config.runner.rate_limit_rps, mode));
    let guardrails = Arc::new(
        Guardrails::new(config.agent.block_escalation_threshold)
            .context("Failed to compile guardrail patterns")?,
    );
    let engine = DecisionEngine::new(
        Arc::new(decision_model),
        guardrails,
        Arc::clone(&limiter),
        config.agent.clone(),
    );

    let hash = session_hash(&Uuid::new_v4().to_string());
    let benchmark = cli.benchmark.platform_name();
    let architecture = format!("[{}] {}", hash, config.platform.architecture);
    let name = format!("[{}] OODA Agent ({}) [{}]", hash, model.id, benchmark);

    let session = platform
        .start_session(benchmark, &name, &architecture)
        .context("Failed to start the benchmark session")?;
    let status = platform
        .session_status(&session.session_id)
        .context("Failed to fetch the session task list")?;
    let tasks = select_tasks(&status.tasks, &cli.tasks);

    info!("Session {} with {} tasks", session.session_id, tasks.len());
    if let OutputFormat::Text = format {
        println!("Session {} with {} tasks", session.session_id, tasks.len());
    }

    let started_at = Utc::now();
    let clock = Instant::now();
    let environment: Arc<dyn TaskEnvironment> = platform.clone();
    let runner = TaskRunner::new(engine, environment, limiter)
        .with_trace_dir(config.core.trace_dir.clone());
    let results = runner.run(&tasks, mode);
    let duration_sec = clock.elapsed().as_secs_f64();

    let metadata = SessionMetadata {
        benchmark: benchmark.to_string(),
        model_id: model.id.clone(),
        architecture,
        workers: mode.workers(),
        started_at,
        finished_at: Utc::now(),
        duration_sec,
    };
    let report = SessionReport::build(&session.session_id, &hash, metadata, &results);

    if let Some(dir) = &config.core.trace_dir {
        write_reports(dir, &report, &results, &tasks);
    }

    platform
        .submit_session(&session.session_id)
        .context("Failed to submit the benchmark session")?;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        OutputFormat::Text => {
            println!("{}", "=".repeat(50));
            for line in summary_lines(&report.statistics, duration_sec) {
                println!("{}", line);
            }
        }
    }

    Ok(())
}

/// Session report plus one error report per failed task. Write failures
/// are logged and never fail the run.
fn write_reports(dir: &Path, report: &SessionReport, results: &[RunResult], tasks: &[TaskInfo]) {
    match report.write(dir) {
        Ok(path) => info!("Session report written to {}", path.display()),
        Err(e) => warn!("Could not write the session report: {}", e),
    }

    for result in results.iter().filter(|r| !r.passed()) {
        let task_text = tasks
            .iter()
            .find(|t| t.task_id == result.task_id)
            .map(|t| t.task_text.as_str())
            .unwrap_or_default();
        if let Err(e) = write_error_report(dir, &report.session_hash, result, task_text) {
            warn!("Could not write the error report for {}: {}", result.task_id, e);
        }
    }
}

/// Closing console lines: pass rate, then pacing
pub fn summary_lines(stats: &Statistics, duration_sec: f64) -> Vec<String> {
    let mut lines = vec![format!(
        "Done: {}/{} ({:.0}%) in {:.1}s",
        stats.successful, stats.total_tasks, stats.success_rate, duration_sec
    )];
    if stats.total_tasks > 0 && duration_sec > 0.0 {
        let per_task = duration_sec / stats.total_tasks as f64;
        let per_minute = stats.total_tasks as f64 * 60.0 / duration_sec;
        lines.push(format!(
            "Avg: {:.1}s/task | Throughput: {:.1} tasks/min",
            per_task, per_minute
        ));
    }
    lines
}
