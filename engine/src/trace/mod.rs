//! Structured trace output
//!
//! Every task keeps a [`TraceLog`] of decision events. Events are always kept
//! in memory (they end up in the run result and the error reports) and are
//! appended to `{trace_dir}/{task_id}.jsonl` when a trace directory is
//! configured. After a session the runner writes a [`SessionReport`].

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::agent::RunResult;
use sdk::errors::EngineError;

/// Longest string kept in an event field
pub const MAX_FIELD_LEN: usize = 4000;

/// Longest list kept in an event field
pub const MAX_LIST_LEN: usize = 50;

/// One trace record
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraceEvent {
    pub ts: DateTime<Utc>,
    pub task: String,
    pub event: String,
    pub data: Value,
}

/// Event log for a single task
#[derive(Debug)]
pub struct TraceLog {
    task_id: String,
    events: Vec<TraceEvent>,
    file: Option<File>,
}

impl TraceLog {
    pub fn in_memory(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            events: Vec::new(),
            file: None,
        }
    }

    /// Log that also appends JSON lines to `{dir}/{task_id}.jsonl`
    pub fn with_dir(task_id: impl Into<String>, dir: &Path) -> Result<Self, EngineError> {
        let task_id = task_id.into();
        fs::create_dir_all(dir)
            .map_err(|e| EngineError::Trace(format!("{}: {}", dir.display(), e)))?;
        let path = dir.join(format!("{}.jsonl", task_id));
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| EngineError::Trace(format!("{}: {}", path.display(), e)))?;

        Ok(Self {
            task_id,
            events: Vec::new(),
            file: Some(file),
        })
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Record an event. Disk failures disable the file sink but never the log.
    pub fn log(&mut self, event: &str, data: Value) {
        let record = TraceEvent {
            ts: Utc::now(),
            task: self.task_id.clone(),
            event: event.to_string(),
            data: truncate_value(data, MAX_FIELD_LEN),
        };
        debug!(task = %self.task_id, event, data = %record.data, "trace");

        if let Some(file) = self.file.as_mut() {
            let written = serde_json::to_string(&record)
                .map_err(std::io::Error::other)
                .and_then(|line| writeln!(file, "{}", line));
            if let Err(e) = written {
                warn!("Trace file for {} disabled: {}", self.task_id, e);
                self.file = None;
            }
        }
        self.events.push(record);
    }

    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    pub fn into_events(self) -> Vec<TraceEvent> {
        self.events
    }

    /// Number of events with the given name
    pub fn count(&self, event: &str) -> usize {
        self.events.iter().filter(|e| e.event == event).count()
    }
}

/// Shorten long strings and lists, recursing into objects and arrays
pub fn truncate_value(value: Value, max_len: usize) -> Value {
    match value {
        Value::String(s) if s.chars().count() > max_len => {
            let mut cut: String = s.chars().take(max_len.saturating_sub(1)).collect();
            cut.push('…');
            Value::String(cut)
        }
        Value::Array(items) => {
            let total = items.len();
            let mut kept: Vec<Value> = items
                .into_iter()
                .take(MAX_LIST_LEN)
                .map(|v| truncate_value(v, max_len))
                .collect();
            if total > MAX_LIST_LEN {
                kept.push(Value::String(format!(
                    "... trimmed {} items ...",
                    total - MAX_LIST_LEN
                )));
            }
            Value::Array(kept)
        }
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, truncate_value(v, max_len)))
                .collect::<Map<String, Value>>(),
        ),
        other => other,
    }
}

/// Four lowercase letters derived from `seed`, used to tag session files
pub fn session_hash(seed: &str) -> String {
    let digest = Sha256::digest(seed.as_bytes());
    digest
        .iter()
        .take(4)
        .map(|b| char::from(b'a' + b % 26))
        .collect()
}

/// Rough cause of a failed evaluation, read from the platform's log
pub fn classify_failure(log: &str) -> &'static str {
    let lower = log.to_lowercase();
    let has = |s: &str| lower.contains(s);

    if has("unexpected") && has("event") {
        "unintended_side_effect"
    } else if has("expected project link") || has("expected employee link") {
        "wrong_entity"
    } else if has("expected outcome") {
        "wrong_outcome"
    } else if has("expected event of type") || (has("not found") && has("expected")) {
        "action_not_called"
    } else if has("not found") {
        "not_found"
    } else if has("wrong") || has("unexpected") {
        "wrong_entity"
    } else if has("not called") || has("missing") {
        "action_not_called"
    } else {
        "other"
    }
}

/// Session-level facts written at the top of the report
#[derive(Debug, Clone, Serialize)]
pub struct SessionMetadata {
    pub benchmark: String,
    pub model_id: String,
    pub architecture: String,
    pub workers: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_sec: f64,
}

/// One row per task
#[derive(Debug, Clone, Serialize)]
pub struct TaskRow {
    pub index: usize,
    pub task_id: String,
    pub spec_id: String,
    pub outcome: String,
    pub success: bool,
    pub score: Option<f64>,
    pub steps: usize,
    pub duration_sec: f64,
    pub failure_type: Option<&'static str>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Statistics {
    pub total_tasks: usize,
    pub successful: usize,
    pub failed: usize,
    pub success_rate: f64,
    pub avg_score: Option<f64>,
}

impl Statistics {
    pub fn from_results(results: &[RunResult]) -> Self {
        let total_tasks = results.len();
        let successful = results.iter().filter(|r| r.passed()).count();
        let scores: Vec<f64> = results
            .iter()
            .filter_map(|r| r.evaluation.as_ref().map(|e| e.score))
            .collect();
        let avg_score = if scores.is_empty() {
            None
        } else {
            Some(round(scores.iter().sum::<f64>() / scores.len() as f64, 3))
        };
        let success_rate = if total_tasks == 0 {
            0.0
        } else {
            round(successful as f64 * 100.0 / total_tasks as f64, 1)
        };

        Self {
            total_tasks,
            successful,
            failed: total_tasks - successful,
            success_rate,
            avg_score,
        }
    }
}

fn round(value: f64, digits: i32) -> f64 {
    let factor = 10f64.powi(digits);
    (value * factor).round() / factor
}

/// Summary of a whole benchmark session
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub session_id: String,
    pub session_hash: String,
    pub metadata: SessionMetadata,
    pub tasks: Vec<TaskRow>,
    pub statistics: Statistics,
}

impl SessionReport {
    pub fn build(
        session_id: impl Into<String>,
        session_hash: impl Into<String>,
        metadata: SessionMetadata,
        results: &[RunResult],
    ) -> Self {
        let tasks = results
            .iter()
            .map(|r| {
                let log = r.evaluation.as_ref().map(|e| e.logs.as_str()).unwrap_or("");
                TaskRow {
                    index: r.index,
                    task_id: r.task_id.clone(),
                    spec_id: r.spec_id.clone(),
                    outcome: r.outcome.to_string(),
                    success: r.passed(),
                    score: r.evaluation.as_ref().map(|e| e.score),
                    steps: r.steps,
                    duration_sec: round(r.elapsed_ms as f64 / 1000.0, 2),
                    failure_type: (!r.passed() && !log.is_empty()).then(|| classify_failure(log)),
                    error: r.error.clone(),
                }
            })
            .collect();

        Self {
            session_id: session_id.into(),
            session_hash: session_hash.into(),
            metadata,
            tasks,
            statistics: Statistics::from_results(results),
        }
    }

    /// Write `{dir}/sessions/{hash}_session.json`
    pub fn write(&self, dir: &Path) -> Result<PathBuf, EngineError> {
        let sessions = dir.join("sessions");
        fs::create_dir_all(&sessions)?;
        let path = sessions.join(format!("{}_session.json", self.session_hash));
        let body =
            serde_json::to_string_pretty(self).map_err(|e| EngineError::Trace(e.to_string()))?;
        fs::write(&path, body)?;
        Ok(path)
    }
}

/// Write `{dir}/errors/{hash}_error_task_{NNN}.txt` for one failed task
pub fn write_error_report(
    dir: &Path,
    session_hash: &str,
    result: &RunResult,
    task_text: &str,
) -> Result<PathBuf, EngineError> {
    let errors = dir.join("errors");
    fs::create_dir_all(&errors)?;
    let path = errors.join(format!(
        "{}_error_task_{:03}.txt",
        session_hash, result.index
    ));

    let mut lines = vec![
        format!("Task: {} ({})", result.task_id, result.spec_id),
        format!("Task text: {}", task_text),
        format!("Outcome: {} after {} steps", result.outcome, result.steps),
        format!("Answer: {}", result.message),
    ];
    if let Some(eval) = &result.evaluation {
        lines.push(String::new());
        lines.push(format!("Score: {}", eval.score));
        lines.push(eval.logs.clone());
    }
    if let Some(error) = &result.error {
        lines.push(String::new());
        lines.push(format!("Error: {}", error));
    }
    if !result.events.is_empty() {
        lines.push(String::new());
        lines.push("Last trace events:".to_string());
        let skip = result.events.len().saturating_sub(20);
        for event in &result.events[skip..] {
            lines.push(format!(
                "- [{}] {}: {}",
                event.ts.format("%H:%M:%S%.3f"),
                event.event,
                event.data
            ));
        }
    }

    fs::write(&path, lines.join("\n"))?;
    Ok(path)
}
