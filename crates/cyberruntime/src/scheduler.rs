//! In-process job scheduler.
//!
//! Each enabled job owns a tokio timer task that sleeps until the job's next
//! fire time and then broadcasts a [`JobTriggered`]. Updating, disabling or
//! deleting a job cancels its timer; shutting the scheduler down cancels all
//! of them.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use cron::Schedule;
use cybercore::services::{Job, JobId, JobSpec, JobTriggered, Scheduler, SchedulerError};
use cybercore::ScheduleType;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A parsed schedule expression.
#[derive(Debug, Clone)]
pub enum ScheduleExpr {
    Cron(Box<Schedule>),
    Interval(ChronoDuration),
    Once(DateTime<Utc>),
}

impl ScheduleExpr {
    /// Parse `expression` according to `schedule_type`.
    ///
    /// Cron accepts the classic five fields (a leading seconds field of `0`
    /// is assumed) or six/seven fields. Intervals are `<n>s`, `<n>m`, `<n>h`,
    /// `<n>d` or a bare number of minutes. One-time schedules are RFC 3339
    /// timestamps.
    pub fn parse(schedule_type: ScheduleType, expression: &str) -> Result<Self, SchedulerError> {
        let invalid = |reason: String| SchedulerError::InvalidExpression {
            schedule_type,
            expression: expression.to_string(),
            reason,
        };
        let expr = expression.trim();

        match schedule_type {
            ScheduleType::Cron => {
                let normalized = if expr.split_whitespace().count() == 5 {
                    format!("0 {}", expr)
                } else {
                    expr.to_string()
                };
                Schedule::from_str(&normalized)
                    .map(|s| ScheduleExpr::Cron(Box::new(s)))
                    .map_err(|e| invalid(e.to_string()))
            }
            ScheduleType::Interval => parse_interval(expr)
                .map(ScheduleExpr::Interval)
                .ok_or_else(|| invalid("expected a positive duration like 30s, 15m, 1h or 2d".into())),
            ScheduleType::Onetime => DateTime::parse_from_rfc3339(expr)
                .map(|t| ScheduleExpr::Once(t.with_timezone(&Utc)))
                .map_err(|e| invalid(e.to_string())),
        }
    }

    /// First fire time strictly after `after`, if any.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            ScheduleExpr::Cron(schedule) => schedule.after(&after).next(),
            ScheduleExpr::Interval(every) => after.checked_add_signed(*every),
            ScheduleExpr::Once(at) => (*at > after).then_some(*at),
        }
    }
}

fn parse_interval(expr: &str) -> Option<ChronoDuration> {
    let (digits, unit) = match expr.find(|c: char| !c.is_ascii_digit()) {
        Some(idx) => expr.split_at(idx),
        None => (expr, "m"),
    };
    let amount: i64 = digits.parse().ok()?;
    if amount <= 0 {
        return None;
    }
    match unit.trim() {
        "s" => ChronoDuration::try_seconds(amount),
        "m" => ChronoDuration::try_minutes(amount),
        "h" => ChronoDuration::try_hours(amount),
        "d" => ChronoDuration::try_days(amount),
        _ => None,
    }
}

struct JobEntry {
    job: Job,
    expr: ScheduleExpr,
    timer: Option<CancellationToken>,
}

/// Tokio-timer backed implementation of [`Scheduler`].
pub struct CronScheduler {
    jobs: Arc<Mutex<HashMap<JobId, JobEntry>>>,
    sender: broadcast::Sender<JobTriggered>,
    shutdown: CancellationToken,
}

impl CronScheduler {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(256);
        Self {
            jobs: Arc::new(Mutex::new(HashMap::new())),
            sender,
            shutdown: CancellationToken::new(),
        }
    }

    /// Register a new job. Enabled jobs start ticking immediately.
    pub async fn add_job(&self, spec: JobSpec) -> Result<Job, SchedulerError> {
        let expr = ScheduleExpr::parse(spec.schedule_type, &spec.expression)?;
        warn_on_timezone(&spec);

        let now = Utc::now();
        let job = Job {
            id: uuid::Uuid::new_v4().to_string(),
            next_run: if spec.enabled { expr.next_after(now) } else { None },
            spec,
            last_run: None,
            created_at: now,
            updated_at: now,
        };

        info!(
            job = %job.id,
            name = %job.spec.name,
            schedule = %job.spec.expression,
            "Scheduled {} job",
            job.spec.schedule_type
        );

        let mut jobs = self.jobs.lock().await;
        let timer = self.arm(&job);
        jobs.insert(
            job.id.clone(),
            JobEntry {
                job: job.clone(),
                expr,
                timer,
            },
        );
        Ok(job)
    }

    /// Replace a job's definition and restart its timer.
    pub async fn replace_job(&self, id: &str, spec: JobSpec) -> Result<Job, SchedulerError> {
        let expr = ScheduleExpr::parse(spec.schedule_type, &spec.expression)?;
        warn_on_timezone(&spec);

        let mut jobs = self.jobs.lock().await;
        let entry = jobs
            .get_mut(id)
            .ok_or_else(|| SchedulerError::JobNotFound(id.to_string()))?;

        if let Some(timer) = entry.timer.take() {
            timer.cancel();
        }

        let now = Utc::now();
        entry.job.next_run = if spec.enabled { expr.next_after(now) } else { None };
        entry.job.spec = spec;
        entry.job.updated_at = now;
        entry.expr = expr;
        entry.timer = self.arm(&entry.job);

        debug!(job = %id, next_run = ?entry.job.next_run, "Updated job");
        Ok(entry.job.clone())
    }

    pub async fn delete_job(&self, id: &str) -> Result<(), SchedulerError> {
        let entry = self
            .jobs
            .lock()
            .await
            .remove(id)
            .ok_or_else(|| SchedulerError::JobNotFound(id.to_string()))?;
        if let Some(timer) = entry.timer {
            timer.cancel();
        }
        info!(job = %id, "Deleted job");
        Ok(())
    }

    pub async fn set_job_enabled(&self, id: &str, enabled: bool) -> Result<Job, SchedulerError> {
        let mut spec = self
            .get_job(id)
            .await
            .ok_or_else(|| SchedulerError::JobNotFound(id.to_string()))?
            .spec;
        spec.enabled = enabled;
        self.replace_job(id, spec).await
    }

    /// Fire a job right away, regardless of its schedule or enabled flag.
    pub async fn run_job_now(&self, id: &str) -> Result<JobTriggered, SchedulerError> {
        let trigger = {
            let mut jobs = self.jobs.lock().await;
            let entry = jobs
                .get_mut(id)
                .ok_or_else(|| SchedulerError::JobNotFound(id.to_string()))?;
            let now = Utc::now();
            entry.job.last_run = Some(now);
            JobTriggered {
                job_id: entry.job.id.clone(),
                workflow_id: entry.job.spec.workflow_id,
                timestamp: now,
            }
        };
        info!(job = %id, "Running job manually");
        // No receivers is fine.
        let _ = self.sender.send(trigger.clone());
        Ok(trigger)
    }

    pub async fn list_jobs(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self
            .jobs
            .lock()
            .await
            .values()
            .map(|e| e.job.clone())
            .collect();
        jobs.sort_by_key(|j| j.created_at);
        jobs
    }

    /// Stop every timer. Jobs stay registered but no longer fire.
    pub fn shutdown(&self) {
        info!("Scheduler shutting down");
        self.shutdown.cancel();
    }

    /// Spawn the timer task for `job`, if it has a next fire time.
    fn arm(&self, job: &Job) -> Option<CancellationToken> {
        job.next_run?;
        let cancel = self.shutdown.child_token();
        tokio::spawn(run_timer(
            job.id.clone(),
            self.jobs.clone(),
            self.sender.clone(),
            cancel.clone(),
        ));
        Some(cancel)
    }
}

impl Default for CronScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for CronScheduler {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn run_timer(
    id: JobId,
    jobs: Arc<Mutex<HashMap<JobId, JobEntry>>>,
    sender: broadcast::Sender<JobTriggered>,
    cancel: CancellationToken,
) {
    loop {
        let next = match jobs.lock().await.get(&id) {
            Some(entry) => entry.job.next_run,
            None => break,
        };
        let Some(fire_at) = next else {
            break;
        };
        let delay = (fire_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = cancel.cancelled() => break,
        }

        let trigger = {
            let mut jobs = jobs.lock().await;
            // The job may have been replaced while we held no lock.
            if cancel.is_cancelled() {
                break;
            }
            let Some(entry) = jobs.get_mut(&id) else {
                break;
            };
            let now = Utc::now();
            entry.job.last_run = Some(now);
            entry.job.next_run = entry.expr.next_after(now);
            JobTriggered {
                job_id: id.clone(),
                workflow_id: entry.job.spec.workflow_id,
                timestamp: now,
            }
        };

        info!(job = %id, "Firing scheduled job");
        let _ = sender.send(trigger);
    }
    debug!(job = %id, "Timer stopped");
}

fn warn_on_timezone(spec: &JobSpec) {
    if !spec.timezone.eq_ignore_ascii_case("utc") {
        warn!(
            timezone = %spec.timezone,
            "Only UTC schedules are supported, evaluating '{}' in UTC",
            spec.expression
        );
    }
}

#[async_trait]
impl Scheduler for CronScheduler {
    async fn schedule_job(&self, spec: JobSpec) -> Result<Job, SchedulerError> {
        self.add_job(spec).await
    }

    async fn update_job(&self, id: &str, spec: JobSpec) -> Result<Job, SchedulerError> {
        self.replace_job(id, spec).await
    }

    async fn get_job(&self, id: &str) -> Option<Job> {
        self.jobs.lock().await.get(id).map(|e| e.job.clone())
    }

    fn subscribe(&self) -> broadcast::Receiver<JobTriggered> {
        self.sender.subscribe()
    }
}
