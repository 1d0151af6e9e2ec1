//! Decision Engine
//!
//! Drives one task through the OODA cycle:
//!
//! 1. Observe: compress memory, advance the step counter, stop at the ceiling
//! 2. Orient: build the per-step context (memory, scratch tail, recent IDs)
//! 3. Decide: one rate-limited model call, parsed into a [`StepDecision`]
//! 4. Act: gate the proposed action, dispatch it, fold the result back
//!
//! Before the loop starts the task text goes through the pre-generation
//! filters, the identity is resolved and guests are confined to date
//! questions. Every task ends with exactly one `respond` call.

use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::config::AgentConfig;
use crate::error_classifier::{classify, ErrorCategory, FailureTracker, FailureVerdict};
use crate::guardrails::{GateVerdict, Guardrails};
use crate::llm::{parse_decision, DecisionModel, Message};
use crate::rate_limiter::RateLimiter;
use crate::secrets::scrub;
use crate::task_api::{LlmUsage, TaskApi, TaskEvaluation, TaskInfo, WhoAmI};
use crate::trace::{TraceEvent, TraceLog};
use sdk::types::GetById;
use sdk::{Action, AgentResponse, EntityLink, Outcome, StepDecision};

use super::advisor::advise;
use super::context::{CallHistory, CallRecord, IdLedger, LoopGuard, TaskContext};
use super::memory::{head_chars, Memory, Scratch};
use super::prompt::{customer_code, customer_code_hint, system_prompt};
use super::Transcript;

/// Corrective turn appended after an unusable model reply
pub const INVALID_JSON_NOTICE: &str = "Return valid JSON for StepDecision schema.";

/// Longest tool output kept in the transcript, in characters
const TOOL_OUTPUT_CHARS: usize = 2000;

/// Tool output excerpt folded into memory
const MEMORY_EXCERPT_CHARS: usize = 200;

/// Scratch tail shown in the Orient context
const SCRATCH_TAIL_CHARS: usize = 400;

/// Identifiers listed in the Orient context
const RECENT_IDS: usize = 10;

/// Identifiers linked when the step ceiling is hit
const EXHAUSTED_LINKS: usize = 3;

/// Words that mark a project status task when the step ceiling is hit
const STATUS_WORDS: &[&str] = &["status", "pause", "archive", "resume", "switch"];

/// Model name reported for answers produced by the filters
const RULE_BASED_MODEL: &str = "rule-based";

/// Terminal record of one task
#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub task_id: String,
    pub spec_id: String,
    /// 1-based submission index
    pub index: usize,
    pub outcome: Outcome,
    pub message: String,
    pub links: Vec<EntityLink>,
    pub steps: usize,
    pub elapsed_ms: u64,
    pub memory: Vec<String>,
    pub scratch: String,
    pub calls: Vec<CallRecord>,
    pub model_calls: usize,
    pub dispatches: usize,
    pub error: Option<String>,
    pub evaluation: Option<TaskEvaluation>,
    #[serde(skip)]
    pub events: Vec<TraceEvent>,
}

impl RunResult {
    /// Result carrying only the reported answer
    pub fn answered(task: &TaskInfo, index: usize, response: AgentResponse) -> Self {
        Self {
            task_id: task.task_id.clone(),
            spec_id: task.spec_id.clone(),
            index,
            outcome: response.outcome,
            message: response.message,
            links: response.links,
            steps: 0,
            elapsed_ms: 0,
            memory: Vec::new(),
            scratch: String::new(),
            calls: Vec::new(),
            model_calls: 0,
            dispatches: 0,
            error: None,
            evaluation: None,
            events: Vec::new(),
        }
    }

    /// `error_internal` result for a task that never produced an answer
    pub fn failed(task: &TaskInfo, index: usize, error: impl Into<String>) -> Self {
        let mut result = Self::answered(
            task,
            index,
            AgentResponse::bare("System error.", Outcome::ErrorInternal),
        );
        result.error = Some(error.into());
        result
    }

    /// Whether the platform scored the task as fully correct
    pub fn passed(&self) -> bool {
        self.evaluation.as_ref().is_some_and(TaskEvaluation::passed)
    }
}

/// Loop states; data needed by the next state travels inside the variant
enum Phase {
    Observing,
    Orienting,
    Deciding(Message),
    Acting(Box<StepDecision>),
    Terminal(AgentResponse),
}

/// Mutable per-task state, owned by the worker running the task
struct RunState {
    ctx: TaskContext,
    transcript: Transcript,
    memory: Memory,
    scratch: Scratch,
    ids: IdLedger,
    history: CallHistory,
    loop_guard: LoopGuard,
    failures: FailureTracker,
    model_failures: u32,
    refusals: u32,
}

/// Counters that exist before the run state does
#[derive(Default)]
struct Counters {
    model_calls: usize,
    dispatches: usize,
}

/// Shared, immutable decision engine. One instance serves every worker.
#[derive(Clone)]
pub struct DecisionEngine {
    model: Arc<dyn DecisionModel>,
    guardrails: Arc<Guardrails>,
    limiter: Arc<RateLimiter>,
    config: AgentConfig,
}

impl DecisionEngine {
    pub fn new(
        model: Arc<dyn DecisionModel>,
        guardrails: Arc<Guardrails>,
        limiter: Arc<RateLimiter>,
        config: AgentConfig,
    ) -> Self {
        Self {
            model,
            guardrails,
            limiter,
            config,
        }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Run one task to its terminal state and report the answer.
    pub fn run(
        &self,
        index: usize,
        task: &TaskInfo,
        api: &dyn TaskApi,
        trace: &mut TraceLog,
    ) -> RunResult {
        let started = Instant::now();
        let mut counters = Counters::default();
        trace.log("start", json!({ "task": task.task_text, "spec": task.spec_id }));

        let mut result = match self.setup(task, api, trace, &mut counters) {
            Setup::Finished(response) => {
                let error = self.respond(api, trace, &response);
                let mut result = RunResult::answered(task, index, response);
                result.error = error;
                result
            }
            Setup::Failed(error) => {
                let response = AgentResponse::bare("System error.", Outcome::ErrorInternal);
                let error = match self.respond(api, trace, &response) {
                    Some(extra) => format!("{}; {}", error, extra),
                    None => error,
                };
                RunResult::failed(task, index, error)
            }
            Setup::Ready(state) => self.run_loop(index, *state, api, trace, &mut counters),
        };

        result.model_calls = counters.model_calls;
        result.dispatches = counters.dispatches;
        result.elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            "Task {} finished: {} after {} steps",
            task.task_id, result.outcome, result.steps
        );
        result
    }

    fn setup(
        &self,
        task: &TaskInfo,
        api: &dyn TaskApi,
        trace: &mut TraceLog,
        counters: &mut Counters,
    ) -> Setup {
        // Filters first: a filtered task costs no model call and no lookup
        if let GateVerdict::Reject(response) = self.guardrails.prefilter.check(&task.task_text) {
            trace.log(
                "deny",
                json!({ "outcome": response.outcome, "message": response.message }),
            );
            self.record_rule_based(api);
            return Setup::Finished(response);
        }

        let identity = match api.who_am_i() {
            Ok(identity) => identity,
            Err(e) => return Setup::Failed(format!("who_am_i failed: {}", scrub(&e.to_string()))),
        };
        trace.log(
            "identity",
            json!({
                "user": identity.current_user.as_deref().unwrap_or("GUEST"),
                "public": identity.is_public,
                "today": identity.today,
            }),
        );

        if identity.is_public {
            if let GateVerdict::Reject(response) = self.guardrails.prefilter.check_guest(
                &task.task_text,
                identity.is_public,
                &identity.today,
            ) {
                trace.log(
                    "deny",
                    json!({ "outcome": response.outcome, "message": response.message, "guest": true }),
                );
                self.record_rule_based(api);
                return Setup::Finished(response);
            }
        }

        let profile = self.fetch_profile(&identity, api, counters);
        let ctx = TaskContext::new(task.clone(), identity, self.config.max_steps);

        let mut transcript = Transcript::new();
        transcript.pin(Message::system(system_prompt(
            &ctx.identity.today,
            ctx.current_user(),
            profile.as_deref(),
        )));
        transcript.pin(Message::user(&task.task_text));
        if let Some(code) = customer_code(&task.task_text) {
            transcript.pin(Message::system(customer_code_hint(code)));
        }

        Setup::Ready(Box::new(RunState {
            ctx,
            transcript,
            memory: Memory::new(self.config.memory_window, self.config.memory_retain),
            scratch: Scratch::new(self.config.scratch_cap),
            ids: IdLedger::new(),
            history: CallHistory::new(),
            loop_guard: LoopGuard::new(self.config.loop_threshold),
            failures: FailureTracker::new(self.config.system_failure_threshold),
            model_failures: 0,
            refusals: 0,
        }))
    }

    /// The acting user's own employee record; lookup failures are ignored.
    fn fetch_profile(
        &self,
        identity: &WhoAmI,
        api: &dyn TaskApi,
        counters: &mut Counters,
    ) -> Option<String> {
        if identity.is_public {
            return None;
        }
        let user = identity.current_user.as_deref()?;
        self.limiter.acquire();
        counters.dispatches += 1;
        match api.dispatch(&Action::GetEmployee(GetById {
            id: user.to_string(),
        })) {
            Ok(profile) => Some(profile.to_string()),
            Err(e) => {
                debug!("Profile lookup for {} failed: {}", user, e);
                None
            }
        }
    }

    fn run_loop(
        &self,
        index: usize,
        mut state: RunState,
        api: &dyn TaskApi,
        trace: &mut TraceLog,
        counters: &mut Counters,
    ) -> RunResult {
        let mut phase = Phase::Observing;
        let response = loop {
            phase = match phase {
                Phase::Observing => self.observe(&mut state, trace),
                Phase::Orienting => Phase::Deciding(self.orient(&state)),
                Phase::Deciding(context) => self.decide(&mut state, api, trace, counters, context),
                Phase::Acting(decision) => {
                    self.act(&mut state, api, trace, counters, *decision)
                }
                Phase::Terminal(response) => break response,
            };
        };

        let error = self.respond(api, trace, &response);
        RunResult {
            task_id: state.ctx.task.task_id.clone(),
            spec_id: state.ctx.task.spec_id.clone(),
            index,
            outcome: response.outcome,
            message: response.message,
            links: response.links,
            steps: state.ctx.step,
            elapsed_ms: 0,
            memory: state.memory.entries().to_vec(),
            scratch: state.scratch.as_str().to_string(),
            calls: state.history.records().to_vec(),
            model_calls: 0,
            dispatches: 0,
            error,
            evaluation: None,
            events: Vec::new(),
        }
    }

    fn observe(&self, state: &mut RunState, trace: &mut TraceLog) -> Phase {
        state.memory.compress();
        if state.ctx.steps_exhausted() {
            return Phase::Terminal(self.exhausted(state));
        }
        state.ctx.step += 1;
        trace.log("step", json!({ "n": state.ctx.step }));
        Phase::Orienting
    }

    fn orient(&self, state: &RunState) -> Message {
        let mut context = format!("[Step {}/{}]", state.ctx.step, state.ctx.max_steps);
        if !state.memory.is_empty() {
            context.push_str(&format!("\nMemory: {}", state.memory.render()));
        }
        if !state.scratch.is_empty() {
            context.push_str(&format!(
                "\nScratch: {}",
                state.scratch.tail(SCRATCH_TAIL_CHARS)
            ));
        }
        if !state.ids.is_empty() {
            context.push_str(&format!(
                "\nIDs: {}",
                state.ids.recent(RECENT_IDS).join(", ")
            ));
        }
        Message::system(context)
    }

    fn decide(
        &self,
        state: &mut RunState,
        api: &dyn TaskApi,
        trace: &mut TraceLog,
        counters: &mut Counters,
        context: Message,
    ) -> Phase {
        self.limiter.acquire();
        counters.model_calls += 1;

        let outcome = self
            .model
            .complete(&state.transcript.with_context(context))
            .and_then(|output| {
                let usage = LlmUsage {
                    model: self.model.name().to_string(),
                    prompt_tokens: output.usage.prompt_tokens,
                    completion_tokens: output.usage.completion_tokens,
                };
                if let Err(e) = api.record_llm_usage(&usage) {
                    debug!("Usage report failed: {}", e);
                }
                trace.log("llm", json!({ "raw": head_chars(&output.content, 600) }));
                parse_decision(&output.content)
            });

        match outcome {
            Ok(decision) => {
                state.model_failures = 0;
                Phase::Acting(Box::new(decision))
            }
            Err(e) => {
                state.model_failures += 1;
                let error = scrub(&e.to_string());
                warn!(
                    "Model failure {}/{} on task {}: {}",
                    state.model_failures,
                    self.config.model_failure_threshold,
                    state.ctx.task.task_id,
                    error
                );
                trace.log(
                    "llm_error",
                    json!({ "error": error, "consecutive": state.model_failures }),
                );
                if state.model_failures >= self.config.model_failure_threshold {
                    return Phase::Terminal(AgentResponse::bare(
                        "System error.",
                        Outcome::ErrorInternal,
                    ));
                }
                state.loop_guard.reset();
                state.transcript.push(Message::assistant(INVALID_JSON_NOTICE));
                Phase::Observing
            }
        }
    }

    fn act(
        &self,
        state: &mut RunState,
        api: &dyn TaskApi,
        trace: &mut TraceLog,
        counters: &mut Counters,
        decision: StepDecision,
    ) -> Phase {
        if !decision.memory.trim().is_empty() {
            state.memory.absorb(&decision.memory);
        }
        state.scratch.append(&decision.scratch);
        state.ids.extract(&decision.memory);
        state.ids.extract(&decision.scratch);

        let echoed = serde_json::to_string(&decision).unwrap_or_else(|_| decision.think.clone());
        state.transcript.push(Message::assistant(echoed));

        match decision.action {
            Some(action) => {
                if let Some(next) = self.dispatch(state, api, trace, counters, action) {
                    return next;
                }
            }
            None => state.loop_guard.reset(),
        }

        match decision.completion {
            Some(completion) => self.complete(state, trace, completion),
            None => Phase::Observing,
        }
    }

    /// Gate and execute one action. `None` lets the decision's completion
    /// be considered; `Some` ends the Act phase.
    fn dispatch(
        &self,
        state: &mut RunState,
        api: &dyn TaskApi,
        trace: &mut TraceLog,
        counters: &mut Counters,
        mut action: Action,
    ) -> Option<Phase> {
        let name = action.name();

        if let Some(original) = action.clamp_page_limit(self.config.page_limit) {
            trace.log(
                "limit_override",
                json!({ "operation": name, "original": original, "new": self.config.page_limit }),
            );
        }

        if let GateVerdict::Reject(text) = self.guardrails.hallucination.check(&action) {
            trace.log(
                "guard",
                json!({ "gate": "hallucination", "decision": "reject", "reason": text }),
            );
            state.transcript.push(Message::system(text));
            return Some(Phase::Observing);
        }

        let key = action.loop_key();
        if !state.loop_guard.admit(&key) {
            let repeats = state.loop_guard.repeats();
            trace.log(
                "guard",
                json!({ "gate": "loop", "decision": "reject", "operation": name, "repeats": repeats }),
            );
            state.memory.push(format!("LOOP: {} x{}", name, repeats));
            state.transcript.push(Message::system(format!(
                "⚠️ You proposed {} with the same arguments {} times in a row. Change approach or complete the task now.",
                name, repeats
            )));
            return Some(Phase::Observing);
        }

        action.apply_defaults(state.ctx.current_user());
        trace.log("tool_call", json!({ "name": name, "args": &action }));

        self.limiter.acquire();
        counters.dispatches += 1;

        match api.dispatch(&action) {
            Ok(result) => {
                state.failures.record_success();
                state.history.record(name, key, true);

                let output = result.to_string();
                trace.log(
                    "tool_result",
                    json!({ "ok": true, "name": name, "output": head_chars(&output, 300) }),
                );
                if action.is_mutating() {
                    state.memory.push(format!("✓{}", name));
                }
                state
                    .transcript
                    .push(Message::tool_result(head_chars(&output, TOOL_OUTPUT_CHARS), name));
                state.ids.extract(&output);
                state.memory.push(head_chars(&output, MEMORY_EXCERPT_CHARS));

                let advice = advise(&state.ctx.task.task_text, &action, &result);
                for note in advice.notes {
                    state.transcript.push(Message::system(note));
                }
                if let Some(line) = advice.scratch {
                    state.scratch.append(&line);
                }
                None
            }
            Err(e) => {
                let error = scrub(&e.to_string());
                let category = classify(&error);
                state.history.record(name, key, false);
                state.memory.push(format!(
                    "ERR[{}]: {}",
                    category,
                    head_chars(&error, 60)
                ));
                state.transcript.push(Message::tool_result(
                    format!("ERROR[{}]: {}", category, error),
                    name,
                ));
                trace.log(
                    "tool_result",
                    json!({ "ok": false, "name": name, "error": error, "category": category.as_str() }),
                );

                match state.failures.record(category, action.is_mutating()) {
                    FailureVerdict::Deny => {
                        let message = if category == ErrorCategory::Permission {
                            "Permission denied."
                        } else {
                            "You are not authorized to modify this project."
                        };
                        Some(Phase::Terminal(AgentResponse::bare(
                            message,
                            Outcome::DeniedSecurity,
                        )))
                    }
                    FailureVerdict::Abort => Some(Phase::Terminal(AgentResponse::bare(
                        "System error.",
                        Outcome::ErrorInternal,
                    ))),
                    FailureVerdict::Continue => Some(Phase::Observing),
                }
            }
        }
    }

    fn complete(
        &self,
        state: &mut RunState,
        trace: &mut TraceLog,
        completion: sdk::Completion,
    ) -> Phase {
        let outcome = match completion.outcome {
            Outcome::OkNotFound => Outcome::OkAnswer,
            other => other,
        };

        if outcome == Outcome::OkAnswer {
            if let GateVerdict::Reject(text) = self.guardrails.verifier.check(
                &state.ctx.task.task_text,
                &state.history,
                state.refusals,
                &state.memory.render(),
            ) {
                state.refusals += 1;
                trace.log(
                    "guard",
                    json!({
                        "gate": "verification",
                        "decision": "reject",
                        "refusals": state.refusals,
                        "reason": text,
                    }),
                );
                state.transcript.push(Message::system(text));
                return Phase::Observing;
            }
        }

        let links = if outcome == Outcome::ErrorInternal || state.failures.system_broken() {
            Vec::new()
        } else {
            completion.links
        };
        Phase::Terminal(AgentResponse::new(completion.message, outcome, links))
    }

    /// Answer used when the step ceiling is reached
    fn exhausted(&self, state: &RunState) -> AgentResponse {
        let lower = state.ctx.task.task_text.to_lowercase();
        if state.failures.system_broken() {
            AgentResponse::bare("System error.", Outcome::ErrorInternal)
        } else if STATUS_WORDS.iter().any(|w| lower.contains(w)) {
            AgentResponse::bare(
                "Project not found or not authorized.",
                Outcome::DeniedSecurity,
            )
        } else {
            let links = state
                .ids
                .recent(EXHAUSTED_LINKS)
                .iter()
                .filter_map(|id| EntityLink::from_id(id))
                .collect();
            AgentResponse::new("Could not complete.", Outcome::ErrorInternal, links)
        }
    }

    /// Report the answer; returns the failure text if the report failed.
    fn respond(
        &self,
        api: &dyn TaskApi,
        trace: &mut TraceLog,
        response: &AgentResponse,
    ) -> Option<String> {
        trace.log(
            "final",
            json!({
                "outcome": response.outcome,
                "message": response.message,
                "links": &response.links,
            }),
        );
        match api.respond(response) {
            Ok(()) => None,
            Err(e) => {
                let error = scrub(&e.to_string());
                warn!("Reporting the answer failed: {}", error);
                Some(format!("respond failed: {}", error))
            }
        }
    }

    fn record_rule_based(&self, api: &dyn TaskApi) {
        let usage = LlmUsage {
            model: RULE_BASED_MODEL.to_string(),
            prompt_tokens: 1,
            completion_tokens: 1,
        };
        if let Err(e) = api.record_llm_usage(&usage) {
            debug!("Usage report failed: {}", e);
        }
    }
}

enum Setup {
    /// Answered before the loop (filters, guest gate)
    Finished(AgentResponse),
    /// Could not establish the task context
    Failed(String),
    Ready(Box<RunState>),
}
