// crates/cyberruntime/tests/scheduler_test.rs

use async_trait::async_trait;
use cybercore::services::{JobSpec, Scheduler, SchedulerError};
use cybercore::{
    NodeContext, NodeError, NodeExecutor, NodeSpec, NodeType, Role, ScheduleType, Value,
};
use cyberruntime::{CronScheduler, FlowRuntime, NodeRegistry, RuntimeConfig};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

fn spec(schedule_type: ScheduleType, expression: &str) -> JobSpec {
    JobSpec {
        name: "nightly".to_string(),
        workflow_id: None,
        schedule_type,
        expression: expression.to_string(),
        timezone: "UTC".to_string(),
        enabled: true,
    }
}

#[tokio::test]
async fn schedule_job_reports_next_run() {
    let scheduler = CronScheduler::new();
    let before = chrono::Utc::now();

    let job = scheduler
        .schedule_job(spec(ScheduleType::Interval, "1h"))
        .await
        .unwrap();

    let next = job.next_run.unwrap();
    assert!(next > before + chrono::Duration::minutes(59));
    assert_eq!(scheduler.get_job(&job.id).await, Some(job.clone()));
    assert_eq!(scheduler.list_jobs().await, vec![job]);
}

#[tokio::test]
async fn invalid_expression_is_rejected() {
    let scheduler = CronScheduler::new();

    let err = scheduler
        .schedule_job(spec(ScheduleType::Onetime, "tomorrow-ish"))
        .await
        .unwrap_err();

    assert!(matches!(err, SchedulerError::InvalidExpression { .. }));
    assert!(scheduler.list_jobs().await.is_empty());
}

#[tokio::test]
async fn update_replaces_the_schedule() {
    let scheduler = CronScheduler::new();
    let job = scheduler
        .schedule_job(spec(ScheduleType::Cron, "0 9 * * *"))
        .await
        .unwrap();

    let updated = scheduler
        .update_job(&job.id, spec(ScheduleType::Interval, "30s"))
        .await
        .unwrap();

    assert_eq!(updated.id, job.id);
    assert_eq!(updated.spec.schedule_type, ScheduleType::Interval);
    assert!(updated.next_run.unwrap() <= chrono::Utc::now() + chrono::Duration::seconds(30));

    let err = scheduler
        .update_job("missing", spec(ScheduleType::Interval, "30s"))
        .await
        .unwrap_err();
    assert_eq!(err, SchedulerError::JobNotFound("missing".to_string()));
}

#[tokio::test]
async fn disabled_jobs_have_no_next_run() {
    let scheduler = CronScheduler::new();
    let job = scheduler
        .schedule_job(spec(ScheduleType::Interval, "5m"))
        .await
        .unwrap();

    let disabled = scheduler.set_job_enabled(&job.id, false).await.unwrap();
    assert!(!disabled.spec.enabled);
    assert!(disabled.next_run.is_none());

    scheduler.delete_job(&job.id).await.unwrap();
    assert!(scheduler.get_job(&job.id).await.is_none());
    assert!(scheduler.delete_job(&job.id).await.is_err());
}

#[tokio::test]
async fn run_job_now_broadcasts_a_trigger() {
    let scheduler = CronScheduler::new();
    let workflow_id = Uuid::new_v4();
    let job = scheduler
        .schedule_job(JobSpec {
            workflow_id: Some(workflow_id),
            ..spec(ScheduleType::Cron, "0 9 * * *")
        })
        .await
        .unwrap();
    let mut triggers = scheduler.subscribe();

    scheduler.run_job_now(&job.id).await.unwrap();

    let trigger = triggers.recv().await.unwrap();
    assert_eq!(trigger.job_id, job.id);
    assert_eq!(trigger.workflow_id, Some(workflow_id));
    assert!(scheduler.get_job(&job.id).await.unwrap().last_run.is_some());
}

#[tokio::test]
async fn interval_job_fires_on_its_own() {
    let scheduler = CronScheduler::new();
    let mut triggers = scheduler.subscribe();
    let job = scheduler
        .schedule_job(spec(ScheduleType::Interval, "1s"))
        .await
        .unwrap();

    let trigger = tokio::time::timeout(Duration::from_secs(5), triggers.recv())
        .await
        .expect("job should fire within its interval")
        .unwrap();

    assert_eq!(trigger.job_id, job.id);
    scheduler.shutdown();
}

struct Constant;

#[async_trait]
impl NodeExecutor for Constant {
    fn node_type(&self) -> NodeType {
        NodeType::PinnedInput
    }

    async fn execute(&self, _node: &NodeSpec, _ctx: NodeContext) -> Result<Value, NodeError> {
        Ok(json!("tick"))
    }
}

#[tokio::test]
async fn trigger_listener_starts_runs_for_its_workflow() {
    let mut registry = NodeRegistry::new();
    registry.register(Arc::new(Constant));
    let runtime = Arc::new(FlowRuntime::new(registry, RuntimeConfig::default()));
    runtime
        .create_node(Role::Editor, NodeType::PinnedInput, &Value::Null)
        .await
        .unwrap();

    let scheduler = CronScheduler::new();
    let listener = runtime.spawn_trigger_listener(scheduler.subscribe());

    let ours = scheduler
        .schedule_job(JobSpec {
            workflow_id: Some(runtime.workflow_id().await),
            ..spec(ScheduleType::Cron, "0 9 * * *")
        })
        .await
        .unwrap();
    let theirs = scheduler
        .schedule_job(JobSpec {
            workflow_id: Some(Uuid::new_v4()),
            ..spec(ScheduleType::Cron, "0 9 * * *")
        })
        .await
        .unwrap();

    scheduler.run_job_now(&theirs.id).await.unwrap();
    scheduler.run_job_now(&ours.id).await.unwrap();

    let mut runs = Vec::new();
    for _ in 0..50 {
        runs = runtime.run_analytics().await;
        if !runs.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    assert_eq!(runs.len(), 1);
    listener.abort();
}
