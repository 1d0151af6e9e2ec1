//! Task Runner
//!
//! Runs a batch of tasks, one decision engine run per task, either one after
//! another or on a fixed pool of worker threads pulling from a shared queue.
//! Every task produces exactly one [`RunResult`]: start failures and panics
//! become `error_internal` results instead of taking the pool down.

use serde_json::json;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Instant;
use tracing::{error, info, warn};

use crate::agent::{DecisionEngine, RunResult};
use crate::rate_limiter::RateLimiter;
use crate::task_api::{TaskApi, TaskEnvironment, TaskInfo};
use crate::trace::TraceLog;
use sdk::errors::EngineError;
use sdk::{AgentResponse, Outcome};

/// How the batch is scheduled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Sequential,
    Concurrent { workers: usize },
}

impl RunMode {
    /// `sequential` wins; one worker is sequential too
    pub fn new(workers: usize, sequential: bool) -> Self {
        if sequential || workers <= 1 {
            RunMode::Sequential
        } else {
            RunMode::Concurrent { workers }
        }
    }

    pub fn workers(&self) -> usize {
        match self {
            RunMode::Sequential => 1,
            RunMode::Concurrent { workers } => *workers,
        }
    }
}

/// Shared limiter sized for the pool: `rps` per worker, enforced in aggregate
pub fn pool_limiter(rps: f64, mode: RunMode) -> RateLimiter {
    RateLimiter::new(rps * mode.workers() as f64)
}

/// Pick tasks by 1-based index or by task/spec id.
///
/// Selectors are applied in order and duplicates dropped. No selectors, or
/// none matching, selects every task.
pub fn select_tasks(all: &[TaskInfo], selectors: &[String]) -> Vec<TaskInfo> {
    let mut selected: Vec<TaskInfo> = Vec::new();
    let mut add = |task: &TaskInfo| {
        if !selected.iter().any(|t| t.task_id == task.task_id) {
            selected.push(task.clone());
        }
    };

    for selector in selectors {
        let token = selector.trim();
        match token.parse::<usize>() {
            Ok(index) => {
                if let Some(task) = index.checked_sub(1).and_then(|i| all.get(i)) {
                    add(task);
                }
            }
            Err(_) => all
                .iter()
                .filter(|t| t.task_id == token || t.spec_id == token)
                .for_each(&mut add),
        }
    }

    if selected.is_empty() {
        all.to_vec()
    } else {
        selected
    }
}

pub struct TaskRunner {
    engine: DecisionEngine,
    environment: Arc<dyn TaskEnvironment>,
    limiter: Arc<RateLimiter>,
    trace_dir: Option<PathBuf>,
    console: Mutex<()>,
}

impl TaskRunner {
    pub fn new(
        engine: DecisionEngine,
        environment: Arc<dyn TaskEnvironment>,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            engine,
            environment,
            limiter,
            trace_dir: None,
            console: Mutex::new(()),
        }
    }

    /// Write per-task JSONL traces under `dir`
    pub fn with_trace_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.trace_dir = dir;
        self
    }

    /// Run every task and return the results sorted by submission index.
    pub fn run(&self, tasks: &[TaskInfo], mode: RunMode) -> Vec<RunResult> {
        let total = tasks.len();
        info!("Running {} tasks ({:?})", total, mode);

        let mut results = match mode {
            RunMode::Sequential => tasks
                .iter()
                .enumerate()
                .map(|(i, task)| self.execute(i + 1, total, task))
                .collect(),
            RunMode::Concurrent { workers } => self.run_pool(tasks, workers),
        };
        results.sort_by_key(|r| r.index);
        results
    }

    fn run_pool(&self, tasks: &[TaskInfo], workers: usize) -> Vec<RunResult> {
        let total = tasks.len();
        let (job_tx, job_rx) = crossbeam_channel::unbounded::<(usize, &TaskInfo)>();
        let (result_tx, result_rx) = crossbeam_channel::unbounded::<RunResult>();

        for (i, task) in tasks.iter().enumerate() {
            // The receiver is alive until the scope below ends
            let _ = job_tx.send((i + 1, task));
        }
        drop(job_tx);

        thread::scope(|scope| {
            let mut spawned = 0;
            for worker in 0..workers.min(total) {
                let jobs = job_rx.clone();
                let results = result_tx.clone();
                let spawn = thread::Builder::new()
                    .name(format!("ooda-worker-{}", worker))
                    .spawn_scoped(scope, move || {
                        for (index, task) in jobs.iter() {
                            let _ = results.send(self.execute(index, total, task));
                        }
                    });
                match spawn {
                    Ok(_) => spawned += 1,
                    Err(e) => warn!("Could not spawn worker {}: {}", worker, e),
                }
            }

            if spawned == 0 && total > 0 {
                error!("No worker thread could be started; running tasks inline");
                for (index, task) in job_rx.iter() {
                    let _ = result_tx.send(self.execute(index, total, task));
                }
            }
        });
        drop(result_tx);

        result_rx.iter().collect()
    }

    /// Run a single task end to end. Never panics and never fails.
    fn execute(&self, index: usize, total: usize, task: &TaskInfo) -> RunResult {
        let started = Instant::now();
        let mut trace = self.open_trace(task);

        self.limiter.acquire();
        let mut result = match self.environment.start_task(task) {
            Ok(api) => self.run_guarded(index, task, api.as_ref(), &mut trace),
            Err(e) => {
                warn!("Task {} could not start: {}", task.task_id, e);
                RunResult::failed(task, index, format!("start_task failed: {}", e))
            }
        };

        match self.environment.complete_task(task) {
            Ok(evaluation) => result.evaluation = evaluation,
            Err(e) => {
                warn!("Task {} could not be completed: {}", task.task_id, e);
                let note = format!("complete_task failed: {}", e);
                result.error = Some(match result.error.take() {
                    Some(previous) => format!("{}; {}", previous, note),
                    None => note,
                });
            }
        }

        result.elapsed_ms = started.elapsed().as_millis() as u64;
        result.events = trace.into_events();
        self.report(total, &result);
        result
    }

    /// Run the engine, turning a panic into an `error_internal` answer
    fn run_guarded(
        &self,
        index: usize,
        task: &TaskInfo,
        api: &dyn TaskApi,
        trace: &mut TraceLog,
    ) -> RunResult {
        let attempt = catch_unwind(AssertUnwindSafe(|| {
            self.engine.run(index, task, api, &mut *trace)
        }));
        match attempt {
            Ok(result) => result,
            Err(panic) => {
                let detail = panic_message(panic.as_ref());
                error!("Task {} panicked: {}", task.task_id, detail);

                let response = AgentResponse::bare("System error.", Outcome::ErrorInternal);
                trace.log("final", json!({ "outcome": response.outcome, "panic": detail }));
                if let Err(e) = api.respond(&response) {
                    warn!("Reporting the answer for {} failed: {}", task.task_id, e);
                }

                let err = EngineError::WorkerPanicked(task.task_id.clone());
                RunResult::failed(task, index, format!("{}: {}", err, detail))
            }
        }
    }

    fn open_trace(&self, task: &TaskInfo) -> TraceLog {
        match &self.trace_dir {
            Some(dir) => TraceLog::with_dir(&task.task_id, dir).unwrap_or_else(|e| {
                warn!("{}; keeping the trace in memory only", e);
                TraceLog::in_memory(&task.task_id)
            }),
            None => TraceLog::in_memory(&task.task_id),
        }
    }

    /// One console line per finished task
    fn report(&self, total: usize, result: &RunResult) {
        let _console = self
            .console
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let mark = if result.passed() { "✓" } else { "✗" };
        let score = result
            .evaluation
            .as_ref()
            .map_or_else(|| "-".to_string(), |e| e.score.to_string());
        println!(
            "[{:02}/{}] {} {} ({:.1}s) outcome={} score={}",
            result.index,
            total,
            mark,
            result.spec_id,
            result.elapsed_ms as f64 / 1000.0,
            result.outcome,
            score
        );
        if let Some(eval) = result.evaluation.as_ref().filter(|e| !e.passed()) {
            if !eval.logs.is_empty() {
                let excerpt: String = eval.logs.chars().take(100).collect();
                println!("         {}...", excerpt);
            }
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
