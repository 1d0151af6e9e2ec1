//! Per-task state owned by the decision engine

use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;
use std::time::Instant;

use crate::task_api::{TaskInfo, WhoAmI};

/// Facts gathered in Observe plus the step counter
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub task: TaskInfo,
    pub identity: WhoAmI,
    pub started: Instant,
    pub step: usize,
    pub max_steps: usize,
}

impl TaskContext {
    pub fn new(task: TaskInfo, identity: WhoAmI, max_steps: usize) -> Self {
        Self {
            task,
            identity,
            started: Instant::now(),
            step: 0,
            max_steps,
        }
    }

    pub fn current_user(&self) -> Option<&str> {
        if self.identity.is_public {
            None
        } else {
            self.identity.current_user.as_deref()
        }
    }

    pub fn steps_exhausted(&self) -> bool {
        self.step >= self.max_steps
    }
}

/// One dispatched operation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallRecord {
    pub operation: &'static str,
    pub key: String,
    pub success: bool,
}

/// Ordered record of every dispatch in the task
#[derive(Debug, Clone, Default)]
pub struct CallHistory {
    records: Vec<CallRecord>,
}

impl CallHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, operation: &'static str, key: impl Into<String>, success: bool) {
        self.records.push(CallRecord {
            operation,
            key: key.into(),
            success,
        });
    }

    /// Whether `operation` has succeeded at least once
    pub fn succeeded(&self, operation: &str) -> bool {
        self.records
            .iter()
            .any(|r| r.success && r.operation == operation)
    }

    pub fn records(&self) -> &[CallRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Stops the model from re-proposing the same call over and over.
///
/// The first `threshold` consecutive identical proposals go through; the
/// ones after that are blocked until the proposal changes.
#[derive(Debug, Clone)]
pub struct LoopGuard {
    threshold: usize,
    last_key: Option<String>,
    repeats: usize,
}

impl LoopGuard {
    pub fn new(threshold: usize) -> Self {
        Self {
            threshold: threshold.max(1),
            last_key: None,
            repeats: 0,
        }
    }

    /// Register a proposal; `false` means it must not be dispatched.
    pub fn admit(&mut self, key: &str) -> bool {
        if self.last_key.as_deref() == Some(key) {
            self.repeats += 1;
        } else {
            self.last_key = Some(key.to_string());
            self.repeats = 1;
        }
        self.repeats <= self.threshold
    }

    /// Forget the last proposal; a step without one breaks the run
    pub fn reset(&mut self) {
        self.last_key = None;
        self.repeats = 0;
    }

    /// Consecutive proposals of the current key
    pub fn repeats(&self) -> usize {
        self.repeats
    }
}

static ID_PATTERN: OnceLock<Regex> = OnceLock::new();

fn id_pattern() -> &'static Regex {
    ID_PATTERN.get_or_init(|| {
        Regex::new(r"(proj_[A-Za-z0-9_]+|emp_[A-Za-z0-9_]+|cust_[A-Za-z0-9_]+)")
            .expect("Invalid entity id pattern")
    })
}

/// Entity identifiers seen so far, distinct, in first-seen order
#[derive(Debug, Clone, Default)]
pub struct IdLedger {
    ids: Vec<String>,
}

impl IdLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pull every `proj_`/`emp_`/`cust_` identifier out of `text`
    pub fn extract(&mut self, text: &str) {
        for m in id_pattern().find_iter(text) {
            if !self.ids.iter().any(|id| id == m.as_str()) {
                self.ids.push(m.as_str().to_string());
            }
        }
    }

    /// The `n` most recently discovered identifiers
    pub fn recent(&self, n: usize) -> &[String] {
        let start = self.ids.len().saturating_sub(n);
        &self.ids[start..]
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}
