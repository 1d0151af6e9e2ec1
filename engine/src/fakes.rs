//! In-memory fakes for the model and task API seams (testing only)
//!
//! `ScriptedModel` replays canned completions, `FakeTaskApi` answers
//! dispatches from per-operation scripts and records everything it is asked
//! to do, and `FakeEnvironment` hands out one `FakeTaskApi` per task.

use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::llm::{DecisionModel, LLMError, Message, ModelOutput, TokenUsage};
use crate::task_api::{
    ApiError, LlmUsage, TaskApi, TaskEnvironment, TaskEvaluation, TaskInfo, WhoAmI,
};
use sdk::{Action, AgentResponse, Outcome, StepDecision};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ---------------------------------------------------------------------------
// ScriptedModel
// ---------------------------------------------------------------------------

type Responder = Box<dyn Fn(&[Message]) -> Result<String, LLMError> + Send + Sync>;

enum Script {
    Queue(Mutex<VecDeque<Result<String, LLMError>>>),
    Responder(Responder),
}

/// Model that replays scripted replies in order
pub struct ScriptedModel {
    script: Script,
    calls: AtomicUsize,
    requests: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedModel {
    /// Raw replies, returned in order; an exhausted script fails every call
    pub fn new(replies: Vec<Result<String, LLMError>>) -> Self {
        Self::with_script(Script::Queue(Mutex::new(replies.into())))
    }

    /// Well-formed decisions, serialized the way a model would send them
    pub fn decisions(decisions: Vec<StepDecision>) -> Self {
        Self::new(
            decisions
                .iter()
                .map(|d| serde_json::to_string(d).map_err(|e| LLMError::ParseError(e.to_string())))
                .collect(),
        )
    }

    /// Reply computed from the request; useful when many tasks share a model
    pub fn from_fn<F>(responder: F) -> Self
    where
        F: Fn(&[Message]) -> Result<String, LLMError> + Send + Sync + 'static,
    {
        Self::with_script(Script::Responder(Box::new(responder)))
    }

    fn with_script(script: Script) -> Self {
        Self {
            script,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Every message list the model was called with
    pub fn requests(&self) -> Vec<Vec<Message>> {
        lock(&self.requests).clone()
    }
}

impl DecisionModel for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    fn complete(&self, messages: &[Message]) -> crate::llm::Result<ModelOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.requests).push(messages.to_vec());

        let reply = match &self.script {
            Script::Queue(queue) => lock(queue).pop_front().unwrap_or_else(|| {
                Err(LLMError::ProviderUnavailable("script exhausted".to_string()))
            }),
            Script::Responder(responder) => responder(messages),
        }?;

        Ok(ModelOutput {
            content: reply,
            usage: TokenUsage {
                prompt_tokens: 100,
                completion_tokens: 20,
            },
        })
    }
}

// ---------------------------------------------------------------------------
// FakeTaskApi
// ---------------------------------------------------------------------------

/// Task API answering from per-operation scripts.
///
/// Unscripted operations succeed with `{"ok": true}`.
pub struct FakeTaskApi {
    identity: Result<WhoAmI, ApiError>,
    scripted: Mutex<HashMap<&'static str, VecDeque<Result<Value, ApiError>>>>,
    always: HashMap<&'static str, Result<Value, ApiError>>,
    dispatched: Mutex<Vec<Action>>,
    responses: Mutex<Vec<AgentResponse>>,
    usage: Mutex<Vec<LlmUsage>>,
}

impl FakeTaskApi {
    pub fn new(identity: WhoAmI) -> Self {
        Self {
            identity: Ok(identity),
            scripted: Mutex::new(HashMap::new()),
            always: HashMap::new(),
            dispatched: Mutex::new(Vec::new()),
            responses: Mutex::new(Vec::new()),
            usage: Mutex::new(Vec::new()),
        }
    }

    /// API whose `who_am_i` fails
    pub fn unreachable(error: &str) -> Self {
        let mut api = Self::new(WhoAmI::guest(""));
        api.identity = Err(ApiError::Transport(error.to_string()));
        api
    }

    fn push(self, operation: &'static str, reply: Result<Value, ApiError>) -> Self {
        lock(&self.scripted)
            .entry(operation)
            .or_default()
            .push_back(reply);
        self
    }

    /// Next call of `operation` returns `value`
    pub fn reply(self, operation: &'static str, value: Value) -> Self {
        self.push(operation, Ok(value))
    }

    /// Next call of `operation` fails with `message`
    pub fn fail(self, operation: &'static str, message: &str) -> Self {
        self.push(operation, Err(ApiError::rejected(400, message)))
    }

    /// Every call of `operation` fails with `message` once its script is empty
    pub fn fail_always(mut self, operation: &'static str, message: &str) -> Self {
        self.always
            .insert(operation, Err(ApiError::rejected(500, message)));
        self
    }

    pub fn dispatched(&self) -> Vec<Action> {
        lock(&self.dispatched).clone()
    }

    pub fn dispatch_count(&self) -> usize {
        lock(&self.dispatched).len()
    }

    /// Dispatches of one operation
    pub fn count_of(&self, operation: &str) -> usize {
        lock(&self.dispatched)
            .iter()
            .filter(|a| a.name() == operation)
            .count()
    }

    pub fn responses(&self) -> Vec<AgentResponse> {
        lock(&self.responses).clone()
    }

    /// The last reported answer
    pub fn response(&self) -> Option<AgentResponse> {
        lock(&self.responses).last().cloned()
    }

    pub fn usage(&self) -> Vec<LlmUsage> {
        lock(&self.usage).clone()
    }
}

impl TaskApi for FakeTaskApi {
    fn who_am_i(&self) -> Result<WhoAmI, ApiError> {
        self.identity.clone()
    }

    fn dispatch(&self, action: &Action) -> Result<Value, ApiError> {
        lock(&self.dispatched).push(action.clone());
        let operation = action.name();

        if let Some(reply) = lock(&self.scripted)
            .get_mut(operation)
            .and_then(VecDeque::pop_front)
        {
            return reply;
        }
        match self.always.get(operation) {
            Some(reply) => reply.clone(),
            None => Ok(json!({ "ok": true, "operation": operation })),
        }
    }

    fn respond(&self, response: &AgentResponse) -> Result<(), ApiError> {
        lock(&self.responses).push(response.clone());
        Ok(())
    }

    fn record_llm_usage(&self, usage: &LlmUsage) -> Result<(), ApiError> {
        lock(&self.usage).push(usage.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FakeEnvironment
// ---------------------------------------------------------------------------

/// Platform fake: one `FakeTaskApi` per started task.
///
/// A task scores 1.0 when its reported outcome matches the expected one
/// (`ok_answer` unless set with [`FakeEnvironment::expect`]).
pub struct FakeEnvironment {
    identity: WhoAmI,
    expected: HashMap<String, Outcome>,
    refuse_start: Vec<String>,
    apis: Mutex<HashMap<String, Arc<FakeTaskApi>>>,
    started: Mutex<Vec<String>>,
}

impl FakeEnvironment {
    pub fn new(identity: WhoAmI) -> Self {
        Self {
            identity,
            expected: HashMap::new(),
            refuse_start: Vec::new(),
            apis: Mutex::new(HashMap::new()),
            started: Mutex::new(Vec::new()),
        }
    }

    pub fn expect(mut self, task_id: &str, outcome: Outcome) -> Self {
        self.expected.insert(task_id.to_string(), outcome);
        self
    }

    /// `start_task` fails for this task
    pub fn refuse_start(mut self, task_id: &str) -> Self {
        self.refuse_start.push(task_id.to_string());
        self
    }

    /// The API handed out for a task, once started
    pub fn api(&self, task_id: &str) -> Option<Arc<FakeTaskApi>> {
        lock(&self.apis).get(task_id).cloned()
    }

    /// Task ids in start order
    pub fn started(&self) -> Vec<String> {
        lock(&self.started).clone()
    }
}

impl TaskEnvironment for FakeEnvironment {
    fn start_task(&self, task: &TaskInfo) -> Result<Box<dyn TaskApi>, ApiError> {
        if self.refuse_start.contains(&task.task_id) {
            return Err(ApiError::rejected(503, "service unavailable"));
        }
        lock(&self.started).push(task.task_id.clone());
        let api = Arc::new(FakeTaskApi::new(self.identity.clone()));
        lock(&self.apis).insert(task.task_id.clone(), Arc::clone(&api));
        Ok(Box::new(api))
    }

    fn complete_task(&self, task: &TaskInfo) -> Result<Option<TaskEvaluation>, ApiError> {
        let Some(api) = self.api(&task.task_id) else {
            return Ok(None);
        };
        let expected = self
            .expected
            .get(&task.task_id)
            .copied()
            .unwrap_or(Outcome::OkAnswer);

        let evaluation = match api.response() {
            Some(r) if r.outcome == expected => TaskEvaluation {
                score: 1.0,
                logs: String::new(),
            },
            Some(r) => TaskEvaluation {
                score: 0.0,
                logs: format!("Expected outcome {}, got {}", expected, r.outcome),
            },
            None => TaskEvaluation {
                score: 0.0,
                logs: "No answer reported".to_string(),
            },
        };
        Ok(Some(evaluation))
    }
}
