// crates/cybernodes/tests/nodes_test.rs

use async_trait::async_trait;
use cybercore::services::{
    ChatRequest, HttpCall, HttpResponse, IntegrationClient, LanguageModel, Scheduler,
    TransportError,
};
use cybercore::{
    EventBus, NodeConfig, NodeContext, NodeError, NodeExecutor, NodeSpec, NodeType, SandboxLimit,
    Value,
};
use cybernodes::{
    ChatExecutor, DeliveryStatus, Destination, DestinationOutcome, InMemoryDashboard,
    IntegrationExecutor, LogMailer, PinnedInputExecutor, QuickJsSandbox, ReportExecutor,
    SchedulerTriggerExecutor, TaskExecutor,
};
use cyberruntime::CronScheduler;
use serde_json::json;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

fn node(node_type: NodeType, overrides: Value) -> NodeSpec {
    NodeSpec::from_config(NodeConfig::with_overrides(node_type, &overrides).unwrap())
}

fn context(node: &NodeSpec) -> NodeContext {
    let bus = EventBus::default();
    let run_id = Uuid::new_v4();
    NodeContext::new(Uuid::new_v4(), run_id, node.id, bus.create_emitter(run_id, node.id))
}

/// Records every call and answers with a fixed response.
struct RecordingClient {
    calls: Mutex<Vec<HttpCall>>,
    response: Result<HttpResponse, TransportError>,
}

impl RecordingClient {
    fn answering(status_code: u16, body: Value) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            response: Ok(HttpResponse { status_code, body }),
        }
    }

    fn unreachable() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            response: Err(TransportError("connection refused".to_string())),
        }
    }

    fn calls(&self) -> Vec<HttpCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl IntegrationClient for RecordingClient {
    async fn call(&self, call: HttpCall) -> Result<HttpResponse, TransportError> {
        self.calls.lock().unwrap().push(call);
        self.response.clone()
    }
}

#[derive(Default)]
struct RecordingModel {
    requests: Mutex<Vec<ChatRequest>>,
}

#[async_trait]
impl LanguageModel for RecordingModel {
    async fn generate(&self, request: ChatRequest) -> Result<String, NodeError> {
        let reply = format!("echo: {}", request.messages[0].content);
        self.requests.lock().unwrap().push(request);
        Ok(reply)
    }
}

#[tokio::test]
async fn pinned_input_returns_its_value() {
    let spec = node(NodeType::PinnedInput, json!({ "value": { "k": [1, 2] } }));

    let result = PinnedInputExecutor.execute(&spec, context(&spec)).await.unwrap();

    assert_eq!(result, json!({ "k": [1, 2] }));
}

#[tokio::test]
async fn chat_forwards_config_and_defaults_to_hello() {
    let model = Arc::new(RecordingModel::default());
    let executor = ChatExecutor::new(model.clone());
    let spec = node(
        NodeType::Chat,
        json!({ "model": "gpt-4o", "system_prompt": "Be brief.", "temperature": 0.2 }),
    );

    let reply = executor.execute(&spec, context(&spec)).await.unwrap();
    assert_eq!(reply, json!("echo: Hello"));

    let structured = executor
        .execute(&spec, context(&spec).with_input("a", json!({ "n": 1 })))
        .await
        .unwrap();
    assert_eq!(structured, json!(r#"echo: {"n":1}"#));

    let requests = model.requests.lock().unwrap();
    assert_eq!(requests[0].model, "gpt-4o");
    assert_eq!(requests[0].system_prompt, "Be brief.");
    assert!((requests[0].temperature - 0.2).abs() < f32::EPSILON);
    assert_eq!(requests[0].max_tokens, 500);
}

#[tokio::test]
async fn integration_injects_bearer_and_content_type() {
    let client = Arc::new(RecordingClient::answering(200, json!({ "ok": true })));
    let executor = IntegrationExecutor::new(client.clone());
    let spec = node(
        NodeType::Integration,
        json!({
            "integration_type": "rest",
            "endpoint": "https://api.example.com/items",
            "method": "put",
            "api_key": "secret",
        }),
    );

    let result = executor
        .execute(&spec, context(&spec).with_input("src", json!({ "id": 7 })))
        .await
        .unwrap();

    assert_eq!(result, json!({ "success": true, "data": { "ok": true } }));
    let calls = client.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].method, "PUT");
    assert_eq!(calls[0].headers["Authorization"], "Bearer secret");
    assert_eq!(calls[0].headers["Content-Type"], "application/json");
    assert_eq!(calls[0].body, Some(json!({ "id": 7 })));
}

#[tokio::test]
async fn graphql_sends_query_and_get_sends_nothing() {
    let client = Arc::new(RecordingClient::answering(200, Value::Null));
    let executor = IntegrationExecutor::new(client.clone());

    let graphql = node(
        NodeType::Integration,
        json!({
            "integration_type": "graphql",
            "endpoint": "https://api.example.com/graphql",
            "query": "{ items { id } }",
        }),
    );
    executor.execute(&graphql, context(&graphql)).await.unwrap();

    let get = node(
        NodeType::Integration,
        json!({ "endpoint": "https://api.example.com/items", "method": "GET" }),
    );
    executor
        .execute(&get, context(&get).with_input("x", json!(1)))
        .await
        .unwrap();

    let calls = client.calls();
    assert_eq!(
        calls[0].body,
        Some(json!({ "query": "{ items { id } }", "variables": {} }))
    );
    assert!(!calls[0].headers.contains_key("Authorization"));
    assert_eq!(calls[1].body, None);
}

#[tokio::test]
async fn integration_failures_carry_the_upstream_message() {
    let spec = node(NodeType::Integration, json!({ "endpoint": "https://api.example.com" }));

    let upstream = IntegrationExecutor::new(Arc::new(RecordingClient::answering(
        502,
        json!({ "error": "bad gateway upstream" }),
    )));
    let err = upstream.execute(&spec, context(&spec)).await.unwrap_err();
    assert_eq!(
        err,
        NodeError::Upstream {
            status: 502,
            message: "bad gateway upstream".to_string()
        }
    );

    let down = IntegrationExecutor::new(Arc::new(RecordingClient::unreachable()));
    let err = down.execute(&spec, context(&spec)).await.unwrap_err();
    assert_eq!(err, NodeError::Transport("connection refused".to_string()));
}

#[tokio::test]
async fn integration_without_endpoint_is_a_config_error() {
    let client = Arc::new(RecordingClient::answering(200, Value::Null));
    let executor = IntegrationExecutor::new(client.clone());
    let spec = node(NodeType::Integration, Value::Null);

    let err = executor.execute(&spec, context(&spec)).await.unwrap_err();

    assert!(matches!(err, NodeError::Configuration(_)));
    assert!(client.calls().is_empty());
}

#[tokio::test]
async fn scheduler_node_reuses_its_job() {
    let scheduler = Arc::new(CronScheduler::new());
    let executor = SchedulerTriggerExecutor::new(scheduler.clone());
    let mut spec = node(
        NodeType::Scheduler,
        json!({ "schedule_type": "interval", "expression": "15m" }),
    );
    let ctx = context(&spec);
    let workflow_id = ctx.workflow_id;

    let first = executor.execute(&spec, ctx).await.unwrap();
    let job_id = first["job_id"].as_str().unwrap().to_string();
    assert_eq!(first["success"], json!(true));
    assert!(first["next_run"].is_string());

    spec.config = NodeConfig::with_overrides(
        NodeType::Scheduler,
        &json!({ "schedule_type": "interval", "expression": "1h" }),
    )
    .unwrap();
    let second = executor.execute(&spec, context(&spec)).await.unwrap();

    assert_eq!(second["job_id"], json!(job_id));
    assert_eq!(scheduler.list_jobs().await.len(), 1);
    let job = scheduler.get_job(&job_id).await.unwrap();
    assert_eq!(job.spec.expression, "1h");
    assert_eq!(job.spec.workflow_id, Some(workflow_id));
    assert_eq!(executor.job_for(spec.id).await, Some(job_id));
    scheduler.shutdown();
}

#[tokio::test]
async fn scheduler_node_rejects_bad_expressions() {
    let executor = SchedulerTriggerExecutor::new(Arc::new(CronScheduler::new()));
    let spec = node(NodeType::Scheduler, json!({ "expression": "at some point" }));

    let err = executor.execute(&spec, context(&spec)).await.unwrap_err();

    assert!(matches!(err, NodeError::Configuration(_)));
}

#[tokio::test]
async fn task_script_sees_inputs_by_port() {
    let executor = TaskExecutor::new(Arc::new(QuickJsSandbox::default()));
    let spec = node(
        NodeType::Task,
        json!({ "script": "return { total: input.a + input.b, keys: Object.keys(input).length };" }),
    );

    let result = executor
        .execute(&spec, context(&spec).with_input("a", json!(2)).with_input("b", json!(3)))
        .await
        .unwrap();

    assert_eq!(result, json!({ "total": 5, "keys": 2 }));
}

#[tokio::test]
async fn task_script_errors_are_node_errors() {
    let executor = TaskExecutor::new(Arc::new(QuickJsSandbox::default()));
    let spec = node(NodeType::Task, json!({ "script": "throw new Error('bad row');" }));

    let err = executor.execute(&spec, context(&spec)).await.unwrap_err();

    assert_eq!(err, NodeError::ExecutionFailed("script error: bad row".to_string()));
}

#[tokio::test]
async fn runaway_script_hits_the_time_limit() {
    let executor = TaskExecutor::new(Arc::new(QuickJsSandbox::default()));
    let spec = node(
        NodeType::Task,
        json!({ "script": "while (true) {}", "sandbox_options": { "timeout_ms": 500 } }),
    );

    let err = executor.execute(&spec, context(&spec)).await.unwrap_err();

    assert!(
        matches!(err, NodeError::SandboxLimitExceeded { limit: SandboxLimit::Timeout, .. }),
        "{:?}",
        err
    );
}

#[tokio::test]
async fn script_heap_is_capped_by_memory_limit() {
    let executor = TaskExecutor::new(Arc::new(QuickJsSandbox::default()));
    let spec = node(
        NodeType::Task,
        json!({
            "script": "var parts = []; for (var i = 0; i < 64; i++) { parts.push('x'.repeat(1 << 20) + i); } return parts.length;",
            "sandbox_options": { "memory_limit_mb": 4 }
        }),
    );

    let err = executor.execute(&spec, context(&spec)).await.unwrap_err();

    assert!(
        matches!(err, NodeError::SandboxLimitExceeded { limit: SandboxLimit::Memory, .. }),
        "{:?}",
        err
    );
}

#[tokio::test]
async fn same_script_fits_a_larger_memory_limit() {
    let executor = TaskExecutor::new(Arc::new(QuickJsSandbox::default()));
    let spec = node(
        NodeType::Task,
        json!({
            "script": "var parts = []; for (var i = 0; i < 4; i++) { parts.push('x'.repeat(1 << 20) + i); } return parts.length;",
            "sandbox_options": { "memory_limit_mb": 64 }
        }),
    );

    let result = executor.execute(&spec, context(&spec)).await.unwrap();

    assert_eq!(result, json!(4));
}

#[tokio::test]
async fn thrown_messages_never_look_like_limits() {
    let executor = TaskExecutor::new(Arc::new(QuickJsSandbox::default()));

    for message in ["stack is empty", "loop iteration 3 failed", "out of memory"] {
        let spec = node(
            NodeType::Task,
            json!({ "script": format!("throw new Error('{}');", message) }),
        );

        let err = executor.execute(&spec, context(&spec)).await.unwrap_err();

        assert_eq!(err, NodeError::ExecutionFailed(format!("script error: {}", message)));
    }
}

#[tokio::test]
async fn deep_recursion_is_a_memory_breach() {
    let executor = TaskExecutor::new(Arc::new(QuickJsSandbox::new(256 * 1024)));
    let spec = node(
        NodeType::Task,
        json!({ "script": "function down(n) { return down(n + 1) + 1; } return down(0);" }),
    );

    let err = executor.execute(&spec, context(&spec)).await.unwrap_err();

    assert!(
        matches!(err, NodeError::SandboxLimitExceeded { limit: SandboxLimit::Memory, .. }),
        "{:?}",
        err
    );
}

#[tokio::test]
async fn require_is_limited_to_allowed_imports() {
    let sandbox = QuickJsSandbox::default()
        .with_module("lodash", "{ upper: function (s) { return s.toUpperCase(); } }");
    let executor = TaskExecutor::new(Arc::new(sandbox));

    let allowed = node(
        NodeType::Task,
        json!({ "script": "return require('lodash').upper(input.x);" }),
    );
    let result = executor
        .execute(&allowed, context(&allowed).with_input("x", json!("ok")))
        .await
        .unwrap();
    assert_eq!(result, json!("OK"));

    let denied = node(
        NodeType::Task,
        json!({ "script": "const fs = require('fs'); return 1;" }),
    );
    let err = executor.execute(&denied, context(&denied)).await.unwrap_err();
    assert!(
        matches!(&err, NodeError::ExecutionFailed(msg) if msg.contains("'fs' is not allowed")),
        "{:?}",
        err
    );
}

#[tokio::test]
async fn report_records_each_destination_independently() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("report.csv");
    let dashboard = Arc::new(InMemoryDashboard::new());
    let webhook = Arc::new(RecordingClient::unreachable());
    let executor = ReportExecutor::new(webhook.clone(), Arc::new(LogMailer), dashboard.clone());
    let spec = node(
        NodeType::Report,
        json!({
            "format": "csv",
            "dest_file": true,
            "file_path": path.to_str().unwrap(),
            "dest_email": true,
            "dest_webhook": true,
            "webhook_url": "https://hooks.example.com/report",
            "dashboard_section": "Ops",
        }),
    );

    let result = executor
        .execute(&spec, context(&spec).with_input("rows", json!([{ "a": 1 }, { "a": 2 }])))
        .await
        .unwrap();

    assert_eq!(result["success"], json!(true));
    assert_eq!(result["report"], json!("a\n1\n2"));
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "a\n1\n2");
    assert_eq!(dashboard.section("Ops").await, vec!["a\n1\n2".to_string()]);

    let outcomes: Vec<DestinationOutcome> =
        serde_json::from_value(result["destinations"].clone()).unwrap();
    let status_of = |d: Destination| outcomes.iter().find(|o| o.destination == d).unwrap().status;
    assert_eq!(outcomes.len(), 4);
    assert_eq!(status_of(Destination::File), DeliveryStatus::Ok);
    assert_eq!(status_of(Destination::Email), DeliveryStatus::Error);
    assert_eq!(status_of(Destination::Webhook), DeliveryStatus::Error);
    assert_eq!(status_of(Destination::Dashboard), DeliveryStatus::Ok);

    let calls = webhook.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].body.as_ref().unwrap()["report"], json!("a\n1\n2"));
    assert_eq!(calls[0].body.as_ref().unwrap()["node"], json!("Report"));
}
