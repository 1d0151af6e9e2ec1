//! HTTP client tests against a mock server
//!
//! The clients are blocking, so every call runs inside `spawn_blocking` while
//! wiremock serves from the async test runtime.

use serde_json::json;
use std::time::Duration;
use wiremock::{
    matchers::{body_partial_json, header, method, path},
    Mock, MockServer, ResponseTemplate,
};

use ooda_engine::config::{LLMConfig, PlatformConfig, ResolvedModel};
use ooda_engine::error_classifier::{classify, ErrorCategory};
use ooda_engine::llm::openrouter::OpenRouterModel;
use ooda_engine::llm::{DecisionModel, LLMError, Message};
use ooda_engine::secrets::SecretString;
use ooda_engine::task_api::{ApiError, HttpPlatform, TaskApi, TaskEnvironment, TaskInfo};
use sdk::types::GetById;
use sdk::{Action, AgentResponse, Outcome};

/// Clients are built inside the blocking closure; a blocking reqwest
/// client must not be created or dropped on the async runtime.
fn model_for(uri: &str) -> OpenRouterModel {
    let config = LLMConfig {
        base_url: format!("{}/api/v1", uri),
        timeout_secs: 5,
        ..LLMConfig::default()
    };
    OpenRouterModel::new(
        &config,
        ResolvedModel {
            id: "qwen/qwen3-235b-a22b-2507".to_string(),
            provider: None,
        },
        SecretString::new("sk-or-test-key"),
        256,
    )
    .unwrap()
}

fn platform_for(uri: &str) -> HttpPlatform {
    platform_with_timeout(uri, 5)
}

fn platform_with_timeout(uri: &str, timeout_secs: u64) -> HttpPlatform {
    let config = PlatformConfig {
        base_url: uri.to_string(),
        timeout_secs,
        ..PlatformConfig::default()
    };
    HttpPlatform::new(&config, SecretString::new("platform-key")).unwrap()
}

fn task() -> TaskInfo {
    TaskInfo::new("t-42", "project_lead", "Who leads the CV project?")
}

#[tokio::test]
async fn test_model_returns_content_and_usage() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/chat/completions"))
        .and(header("Authorization", "Bearer sk-or-test-key"))
        .and(body_partial_json(json!({ "model": "qwen/qwen3-235b-a22b-2507" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{ "message": { "content": "{\"think\":\"x\"}" } }],
            "usage": { "prompt_tokens": 812, "completion_tokens": 64 }
        })))
        .mount(&server)
        .await;

    let uri = server.uri();
    let output = tokio::task::spawn_blocking(move || {
        model_for(&uri).complete(&[Message::system("rules"), Message::user("task")])
    })
    .await
    .unwrap()
    .unwrap();

    assert_eq!(output.content, "{\"think\":\"x\"}");
    assert_eq!(output.usage.prompt_tokens, 812);
    assert_eq!(output.usage.completion_tokens, 64);
}

#[tokio::test]
async fn test_model_status_mapping() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
        .mount(&server)
        .await;

    let uri = server.uri();
    let result = tokio::task::spawn_blocking(move || model_for(&uri).complete(&[Message::user("hi")]))
        .await
        .unwrap();
    assert!(matches!(result, Err(LLMError::RateLimitExceeded)));
}

#[tokio::test]
async fn test_model_auth_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
        .mount(&server)
        .await;

    let uri = server.uri();
    let result = tokio::task::spawn_blocking(move || model_for(&uri).complete(&[Message::user("hi")]))
        .await
        .unwrap();
    assert!(matches!(result, Err(LLMError::AuthenticationFailed(_))));
}

#[tokio::test]
async fn test_task_api_round_trip() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/tasks/start"))
        .and(body_partial_json(json!({ "task_id": "t-42" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/tasks/t-42/whoami"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "current_user": "emp_ana_kovac",
            "is_public": false,
            "today": "2025-04-01"
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/tasks/t-42/projects/get"))
        .and(body_partial_json(json!({ "id": "proj_scandifoods_packaging_cv_poc" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "project": { "id": "proj_scandifoods_packaging_cv_poc", "lead": "emp_ana_kovac" }
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/tasks/t-42/respond"))
        .and(body_partial_json(json!({ "outcome": "ok_answer" })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/tasks/complete"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "eval": { "score": 1.0, "logs": "" }
        })))
        .mount(&server)
        .await;

    let uri = server.uri();
    let (identity, project, evaluation) = tokio::task::spawn_blocking(move || {
        let platform = platform_for(&uri);
        let api = platform.start_task(&task()).unwrap();
        let identity = api.who_am_i().unwrap();
        let project = api
            .dispatch(&Action::GetProject(GetById {
                id: "proj_scandifoods_packaging_cv_poc".into(),
            }))
            .unwrap();
        api.respond(&AgentResponse::bare("Ana Kovac leads it.", Outcome::OkAnswer))
            .unwrap();
        let evaluation = platform.complete_task(&task()).unwrap();
        (identity, project, evaluation)
    })
    .await
    .unwrap();

    assert_eq!(identity.current_user.as_deref(), Some("emp_ana_kovac"));
    assert_eq!(project["project"]["lead"], "emp_ana_kovac");
    assert!(evaluation.unwrap().passed());
}

#[tokio::test]
async fn test_task_api_failure_carries_error_text() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/tasks/start"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/tasks/t-42/projects/status/update"))
        .respond_with(
            ResponseTemplate::new(403)
                .set_body_json(json!({ "error": "Only the project lead can change status" })),
        )
        .mount(&server)
        .await;

    let uri = server.uri();
    let error = tokio::task::spawn_blocking(move || {
        let platform = platform_for(&uri);
        let api = platform.start_task(&task()).unwrap();
        api.dispatch(&Action::UpdateProjectStatus(sdk::types::UpdateProjectStatus {
            id: "proj_scandifoods_packaging_cv_poc".into(),
            status: "archived".into(),
            changed_by: Some("emp_ana_kovac".into()),
        }))
        .unwrap_err()
    })
    .await
    .unwrap();

    match &error {
        ApiError::Rejected { status, message } => {
            assert_eq!(*status, 403);
            assert_eq!(message, "Only the project lead can change status");
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert!(error.to_string().contains("HTTP 403"));
}

#[tokio::test]
async fn test_slow_dispatch_is_a_system_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/tasks/start"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/tasks/t-42/projects/get"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "project": {} }))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let uri = server.uri();
    let error = tokio::task::spawn_blocking(move || {
        let platform = platform_with_timeout(&uri, 1);
        let api = platform.start_task(&task()).unwrap();
        api.dispatch(&Action::GetProject(GetById {
            id: "proj_scandifoods_packaging_cv_poc".into(),
        }))
        .unwrap_err()
    })
    .await
    .unwrap();

    assert!(matches!(error, ApiError::Timeout(_)));
    assert_eq!(classify(&error.to_string()), ErrorCategory::System);
}

#[tokio::test]
async fn test_bare_not_found_status_classifies() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/tasks/start"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/tasks/t-42/customers/get"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let uri = server.uri();
    let error = tokio::task::spawn_blocking(move || {
        let platform = platform_for(&uri);
        let api = platform.start_task(&task()).unwrap();
        api.dispatch(&Action::GetCustomer(GetById {
            id: "cust_nordic_foods".into(),
        }))
        .unwrap_err()
    })
    .await
    .unwrap();

    assert_eq!(classify(&error.to_string()), ErrorCategory::NotFound);
}

#[tokio::test]
async fn test_session_lifecycle() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sessions/start"))
        .and(body_partial_json(json!({ "benchmark": "erc3-dev", "flags": ["compete_local"] })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "session_id": "ses-1" })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/sessions/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "session_id": "ses-1",
            "tasks": [
                { "task_id": "t-1", "spec_id": "project_lead", "task_text": "Who leads CV?" },
                { "task_id": "t-2", "spec_id": "wipe", "task_text": "Wipe my data" }
            ]
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/sessions/submit"))
        .and(body_partial_json(json!({ "session_id": "ses-1" })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let uri = server.uri();
    let status = tokio::task::spawn_blocking(move || {
        let platform = platform_for(&uri);
        let session = platform
            .start_session("erc3-dev", "[abcd] OODA Agent (qwen) [erc3-dev]", "[abcd] OODA")
            .unwrap();
        let status = platform.session_status(&session.session_id).unwrap();
        platform.submit_session(&session.session_id).unwrap();
        status
    })
    .await
    .unwrap();

    assert_eq!(status.session_id, "ses-1");
    assert_eq!(status.tasks.len(), 2);
    assert_eq!(status.tasks[1].spec_id, "wipe");
}
