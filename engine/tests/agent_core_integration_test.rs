//! Integration tests for the decision loop
//!
//! Each test drives `DecisionEngine::run` against a scripted model and an
//! in-memory task API and checks the terminal answer plus what was (and was
//! not) dispatched on the way.

use serde_json::json;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use ooda_engine::agent::{DecisionEngine, RunResult, INVALID_JSON_NOTICE};
use ooda_engine::config::{AgentConfig, Config};
use ooda_engine::fakes::{FakeTaskApi, ScriptedModel};
use ooda_engine::guardrails::Guardrails;
use ooda_engine::llm::LLMError;
use ooda_engine::rate_limiter::RateLimiter;
use ooda_engine::task_api::{TaskInfo, WhoAmI};
use ooda_engine::trace::TraceLog;
use sdk::types::{GetById, ListPage, LogTimeEntry, UpdateProjectStatus};
use sdk::{Action, EntityKind, EntityLink, Outcome, StepDecision};

const CV_PROJECT: &str = "proj_scandifoods_packaging_cv_poc";

fn agent_config() -> AgentConfig {
    Config::default().agent
}

fn engine_with(model: Arc<ScriptedModel>, config: AgentConfig) -> DecisionEngine {
    DecisionEngine::new(
        model,
        Arc::new(Guardrails::new(config.block_escalation_threshold).unwrap()),
        Arc::new(RateLimiter::unlimited()),
        config,
    )
}

fn engine(model: Arc<ScriptedModel>) -> DecisionEngine {
    engine_with(model, agent_config())
}

fn ana() -> WhoAmI {
    WhoAmI::user("emp_ana_kovac", "2025-04-01")
}

fn run(engine: &DecisionEngine, text: &str, api: &FakeTaskApi) -> (RunResult, TraceLog) {
    let mut trace = TraceLog::in_memory("t-1");
    let result = engine.run(1, &TaskInfo::new("t-1", "spec", text), api, &mut trace);
    (result, trace)
}

fn log_hours(project: &str) -> Action {
    Action::LogTimeEntry(LogTimeEntry {
        employee: "emp_ana_kovac".into(),
        project: project.into(),
        customer: None,
        date: "2025-04-01".into(),
        hours: 3.0,
        work_category: None,
        notes: None,
        billable: None,
        status: None,
        logged_by: None,
    })
}

/// A model that pages through projects forever, never repeating itself
fn paging_model() -> Arc<ScriptedModel> {
    let page = AtomicU32::new(0);
    Arc::new(ScriptedModel::from_fn(move |_| {
        let offset = page.fetch_add(1, Ordering::SeqCst) * 5;
        let decision = StepDecision::act("next page", Action::ListProjects(ListPage { offset, limit: 5 }));
        serde_json::to_string(&decision).map_err(|e| LLMError::ParseError(e.to_string()))
    }))
}

#[test]
fn test_salary_question_denied_without_model_or_api() {
    let model = Arc::new(ScriptedModel::new(vec![]));
    let engine = engine(model.clone());
    let api = FakeTaskApi::new(ana());

    let (result, trace) = run(&engine, "What is the total salary of my team?", &api);

    assert_eq!(result.outcome, Outcome::DeniedSecurity);
    assert_eq!(result.steps, 0);
    assert_eq!(result.model_calls, 0);
    assert_eq!(result.dispatches, 0);
    assert_eq!(model.calls(), 0);
    assert_eq!(api.dispatch_count(), 0);
    assert_eq!(api.responses().len(), 1);
    assert_eq!(trace.count("deny"), 1);

    let usage = api.usage();
    assert_eq!(usage.len(), 1);
    assert_eq!(usage[0].model, "rule-based");
}

#[test]
fn test_log_then_complete() {
    let model = Arc::new(ScriptedModel::decisions(vec![
        StepDecision::act("log the hours", log_hours(CV_PROJECT)),
        StepDecision::complete("done", Outcome::OkAnswer, "Logged 3 hours.").with_links(vec![
            EntityLink::new(EntityKind::Project, CV_PROJECT),
        ]),
    ]));
    let engine = engine(model.clone());
    let api = FakeTaskApi::new(ana());

    let (result, _) = run(&engine, "Log 3 hours for me on the CV project", &api);

    assert_eq!(result.outcome, Outcome::OkAnswer);
    assert_eq!(result.steps, 2);
    assert_eq!(result.links.len(), 1);
    assert_eq!(model.calls(), 2);
    assert!(result
        .calls
        .iter()
        .any(|c| c.operation == "log_time_entry" && c.success));

    // profile lookup, then the time entry with user defaults filled in
    assert_eq!(api.dispatch_count(), 2);
    match &api.dispatched()[1] {
        Action::LogTimeEntry(entry) => {
            assert_eq!(entry.logged_by.as_deref(), Some("emp_ana_kovac"));
            assert_eq!(entry.status.as_deref(), Some("draft"));
        }
        other => panic!("unexpected dispatch {:?}", other),
    }

    let reported = api.response().unwrap();
    assert_eq!(reported.outcome, Outcome::OkAnswer);
}

#[test]
fn test_permission_failure_terminates() {
    let model = Arc::new(ScriptedModel::decisions(vec![StepDecision::act(
        "archive it",
        Action::UpdateProjectStatus(UpdateProjectStatus {
            id: CV_PROJECT.into(),
            status: "archived".into(),
            changed_by: None,
        }),
    )]));
    let engine = engine(model.clone());
    let api = FakeTaskApi::new(ana())
        .fail("update_project_status", "Permission denied: only lead can change status");

    let (result, _) = run(&engine, "Archive the CV project", &api);

    assert_eq!(result.outcome, Outcome::DeniedSecurity);
    assert_eq!(result.message, "Permission denied.");
    assert_eq!(result.steps, 1);
    assert_eq!(model.calls(), 1);
}

#[test]
fn test_invented_id_never_dispatched() {
    let model = Arc::new(ScriptedModel::decisions(vec![
        StepDecision::act("look it up", Action::GetProject(GetById { id: "proj_105".into() })),
        StepDecision::complete("give up", Outcome::OkAnswer, "Unknown."),
    ]));
    let engine = engine(model.clone());
    let api = FakeTaskApi::new(ana());

    let (result, trace) = run(&engine, "Who leads the CV project?", &api);

    assert_eq!(result.outcome, Outcome::OkAnswer);
    assert_eq!(api.count_of("get_project"), 0);
    assert_eq!(trace.count("guard"), 1);

    let second = &model.requests()[1];
    assert!(second.iter().any(|m| m.content.contains("'proj_105' looks invented")));
}

#[test]
fn test_loop_guard_blocks_third_identical_proposal() {
    let lookup = || Action::GetProject(GetById { id: CV_PROJECT.into() });
    let model = Arc::new(ScriptedModel::decisions(vec![
        StepDecision::act("look", lookup()),
        StepDecision::act("look again", lookup()),
        StepDecision::act("and again", lookup()),
        StepDecision::complete("ok", Outcome::OkAnswer, "Ana leads it."),
    ]));
    let engine = engine(model.clone());
    let api = FakeTaskApi::new(ana());

    let (result, trace) = run(&engine, "Who leads the CV project?", &api);

    assert_eq!(result.outcome, Outcome::OkAnswer);
    assert_eq!(api.count_of("get_project"), 2);
    assert_eq!(trace.count("guard"), 1);
    assert!(model.requests()[3]
        .iter()
        .any(|m| m.content.contains("same arguments 3 times")));
}

#[test]
fn test_refused_completion_breaks_repeated_proposals() {
    let lookup = || Action::GetProject(GetById { id: CV_PROJECT.into() });
    let model = Arc::new(ScriptedModel::decisions(vec![
        StepDecision::act("look", lookup()),
        StepDecision::act("look again", lookup()),
        StepDecision::complete("done?", Outcome::OkAnswer, "Logged."),
        StepDecision::act("check once more", lookup()),
        StepDecision::act("log the hours", log_hours(CV_PROJECT)),
        StepDecision::complete("done", Outcome::OkAnswer, "Logged 3 hours."),
    ]));
    let engine = engine(model.clone());
    let api = FakeTaskApi::new(ana());

    let (result, trace) = run(&engine, "Log 3 hours for me on the CV project", &api);

    assert_eq!(result.outcome, Outcome::OkAnswer);
    assert_eq!(result.steps, 6);
    // the refused completion sits between the second and third lookup
    assert_eq!(api.count_of("get_project"), 3);
    assert_eq!(api.count_of("log_time_entry"), 1);
    assert_eq!(trace.count("guard"), 1);
}

#[test]
fn test_step_ceiling_links_recent_ids() {
    let mut config = agent_config();
    config.max_steps = 3;
    let model = paging_model();
    let engine = engine_with(model.clone(), config);
    let api = FakeTaskApi::new(ana()).reply(
        "list_projects",
        json!({ "projects": [{ "id": CV_PROJECT, "lead": "emp_ana_kovac" }] }),
    );

    let (result, _) = run(&engine, "Find the wiki owner", &api);

    assert_eq!(result.outcome, Outcome::ErrorInternal);
    assert_eq!(result.message, "Could not complete.");
    assert_eq!(result.steps, 3);
    assert_eq!(model.calls(), 3);
    assert!(result.links.iter().any(|l| l.id == CV_PROJECT));
}

#[test]
fn test_step_ceiling_on_status_task_is_denial() {
    let mut config = agent_config();
    config.max_steps = 2;
    let engine = engine_with(paging_model(), config);
    let api = FakeTaskApi::new(ana());

    let (result, _) = run(&engine, "Pause the CV project", &api);

    assert_eq!(result.outcome, Outcome::DeniedSecurity);
    assert_eq!(result.message, "Project not found or not authorized.");
}

#[test]
fn test_system_failures_abort_at_threshold() {
    let model = paging_model();
    let engine = engine(model.clone());
    let api = FakeTaskApi::new(ana()).fail_always("list_projects", "503 Service Unavailable");

    let (result, trace) = run(&engine, "Which projects are active?", &api);

    assert_eq!(result.outcome, Outcome::ErrorInternal);
    assert_eq!(result.message, "System error.");
    assert!(result.links.is_empty());
    assert_eq!(result.steps, 3);
    assert_eq!(api.count_of("list_projects"), 3);
    assert_eq!(trace.count("tool_result"), 3);
}

#[test]
fn test_read_only_not_found_keeps_going() {
    let model = Arc::new(ScriptedModel::decisions(vec![
        StepDecision::act("look", Action::GetProject(GetById { id: CV_PROJECT.into() })),
        StepDecision::complete("nothing", Outcome::OkNotFound, "No such project."),
    ]));
    let engine = engine(model);
    let api = FakeTaskApi::new(ana()).fail("get_project", "project not found");

    let (result, _) = run(&engine, "Who leads the CV project?", &api);

    // ok_not_found is reported as ok_answer
    assert_eq!(result.outcome, Outcome::OkAnswer);
    assert_eq!(result.steps, 2);
}

#[test]
fn test_completion_without_mutation_never_accepted() {
    let mut config = agent_config();
    config.max_steps = 5;
    let model = Arc::new(ScriptedModel::from_fn(|_| {
        let decision = StepDecision::complete("all good", Outcome::OkAnswer, "Done.");
        serde_json::to_string(&decision).map_err(|e| LLMError::ParseError(e.to_string()))
    }));
    let engine = engine_with(model.clone(), config);
    let api = FakeTaskApi::new(ana());

    let (result, trace) = run(&engine, "Log 2 hours for me on the CV project", &api);

    assert_ne!(result.outcome, Outcome::OkAnswer);
    assert_eq!(trace.count("guard"), 5);

    let last = model.requests().pop().unwrap();
    assert!(last.iter().any(|m| m.content.contains("CRITICAL")));
}

#[test]
fn test_model_failures_abort_at_threshold() {
    let model = Arc::new(ScriptedModel::new(vec![
        Ok("I think we should look at projects".into()),
        Ok("{\"think\": \"no action\"}".into()),
        Err(LLMError::Timeout),
    ]));
    let engine = engine(model.clone());
    let api = FakeTaskApi::new(ana());

    let (result, trace) = run(&engine, "Who leads the CV project?", &api);

    assert_eq!(result.outcome, Outcome::ErrorInternal);
    assert_eq!(result.message, "System error.");
    assert_eq!(model.calls(), 3);
    assert_eq!(trace.count("llm_error"), 3);
    assert!(model.requests()[1]
        .iter()
        .any(|m| m.content == INVALID_JSON_NOTICE));
}

#[test]
fn test_guest_may_only_ask_for_the_date() {
    let model = Arc::new(ScriptedModel::new(vec![]));
    let engine = engine(model.clone());

    let api = FakeTaskApi::new(WhoAmI::guest("2025-04-01"));
    let (result, _) = run(&engine, "What is today's date?", &api);
    assert_eq!(result.outcome, Outcome::OkAnswer);
    assert_eq!(result.message, "2025-04-01");

    let api = FakeTaskApi::new(WhoAmI::guest("2025-04-01"));
    let (result, _) = run(&engine, "List all projects", &api);
    assert_eq!(result.outcome, Outcome::DeniedSecurity);
    assert_eq!(api.dispatch_count(), 0);

    assert_eq!(model.calls(), 0);
}

#[test]
fn test_identity_failure_is_internal_error() {
    let engine = engine(Arc::new(ScriptedModel::new(vec![])));
    let api = FakeTaskApi::unreachable("connection reset by peer");

    let (result, _) = run(&engine, "Who leads the CV project?", &api);

    assert_eq!(result.outcome, Outcome::ErrorInternal);
    assert!(result.error.unwrap().contains("who_am_i failed"));
    assert_eq!(api.response().unwrap().outcome, Outcome::ErrorInternal);
}

#[test]
fn test_page_size_clamped_before_dispatch() {
    let model = Arc::new(ScriptedModel::decisions(vec![
        StepDecision::act("list", Action::ListProjects(ListPage { offset: 0, limit: 50 })),
        StepDecision::complete("ok", Outcome::OkAnswer, "Listed."),
    ]));
    let engine = engine(model);
    let api = FakeTaskApi::new(ana());

    let (_, trace) = run(&engine, "List the projects", &api);

    assert_eq!(trace.count("limit_override"), 1);
    match &api.dispatched()[1] {
        Action::ListProjects(page) => assert_eq!(page.limit, 5),
        other => panic!("unexpected dispatch {:?}", other),
    }
}
