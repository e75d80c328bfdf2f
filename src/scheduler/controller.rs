//! Scheduler background loop.
//!
//! Spawns a tokio task that sleeps until the earliest due job, plans which
//! firings to honor (misfire grace, coalescing, instance caps) and hands
//! each run to the [`Runner`] on a bounded worker pool.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use cadence_watch::activity::{ActivitySink, TracingSink};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use futures::FutureExt;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::jobs::{make_job_spec, JobDefaults, JobSpec};
use crate::error::CadenceError;
use crate::runner::{RunRequest, Runner};

/// Upper bound on the sleep between scheduler wake-ups.
const MAX_IDLE: Duration = Duration::from_secs(60);

/// Missed firings walked per job before skipping straight to the present.
const MAX_CATCHUP: usize = 1000;

/// Default size of the worker pool.
pub const DEFAULT_WORKERS: usize = 10;

/// Number of run-history entries to keep.
const DEFAULT_HISTORY_LIMIT: usize = 400;

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Ok,
    Error,
    Timeout,
    /// Not started because `max_instances` runs were active.
    Skipped,
}

impl RunOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Error => "error",
            Self::Timeout => "timeout",
            Self::Skipped => "skipped",
        }
    }
}

/// One entry of the in-memory run history.
#[derive(Debug, Clone, Serialize)]
pub struct JobRunRecord {
    pub job_id: String,
    pub run_id: Option<String>,
    pub scheduled_for: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub outcome: RunOutcome,
    pub summary: String,
}

type History = Arc<Mutex<VecDeque<JobRunRecord>>>;

/// Job plus its mutable firing state.
struct ScheduledJob {
    spec: Arc<JobSpec>,
    /// Nominal next fire time.
    next_fire: Option<DateTime<Utc>>,
    /// `next_fire` with jitter applied.
    due_at: Option<DateTime<Utc>>,
    running: Arc<AtomicUsize>,
}

/// Firings selected by [`ScheduledJob::plan_due`].
#[derive(Debug, Default, PartialEq)]
struct DuePlan {
    runs: Vec<DateTime<Utc>>,
    /// Dropped for exceeding the misfire grace time.
    misfired: Vec<DateTime<Utc>>,
    /// Folded into a later run by coalescing.
    coalesced: usize,
}

impl ScheduledJob {
    fn new(spec: Arc<JobSpec>, now: DateTime<Utc>) -> Self {
        let next_fire = spec.trigger.next_fire_time(None, now);
        let due_at = next_fire.map(|t| spec.trigger.jittered(t));
        Self {
            spec,
            next_fire,
            due_at,
            running: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Walk every firing due at `now` and advance the job past them.
    fn plan_due(&mut self, now: DateTime<Utc>) -> DuePlan {
        let mut plan = DuePlan::default();
        let mut walked = 0;
        while let (Some(nominal), Some(due)) = (self.next_fire, self.due_at) {
            if due > now {
                break;
            }
            let late = (now - due).num_seconds();
            match self.spec.misfire_grace_time {
                Some(grace) if late > i64::try_from(grace).unwrap_or(i64::MAX) => {
                    plan.misfired.push(due);
                }
                _ => plan.runs.push(due),
            }

            walked += 1;
            self.next_fire = if walked >= MAX_CATCHUP {
                self.spec
                    .trigger
                    .next_fire_time(Some(nominal), now)
                    .map(|next| next.max(now))
                    .and_then(|floor| self.spec.trigger.next_fire_time(None, floor))
            } else {
                self.spec.trigger.next_fire_time(Some(nominal), now)
            };
            // only the current firing is jittered; missed ones are replayed nominally
            self.due_at = self.next_fire.map(|t| {
                if t > now {
                    self.spec.trigger.jittered(t)
                } else {
                    t
                }
            });
        }

        if self.spec.coalesce && plan.runs.len() > 1 {
            plan.coalesced = plan.runs.len() - 1;
            plan.runs.drain(..plan.coalesced);
        }
        plan
    }
}

/// Decrements a job's running count when the run ends, panics included.
struct InstanceGuard(Arc<AtomicUsize>);

impl Drop for InstanceGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Builder for the scheduler loop.
pub struct Scheduler {
    jobs: Vec<JobSpec>,
    runner: Arc<dyn Runner>,
    activity: Arc<dyn ActivitySink>,
    workers: usize,
    history_limit: usize,
}

impl Scheduler {
    /// Create a scheduler dispatching runs to `runner`.
    pub fn new(runner: Arc<dyn Runner>) -> Self {
        Self {
            jobs: Vec::new(),
            runner,
            activity: Arc::new(TracingSink),
            workers: DEFAULT_WORKERS,
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }

    /// Record job runs through `sink`.
    pub fn with_activity(mut self, sink: Arc<dyn ActivitySink>) -> Self {
        self.activity = sink;
        self
    }

    /// Bound concurrently executing runs across all jobs.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Override the in-memory run-history limit.
    pub fn with_history_limit(mut self, max_entries: usize) -> Self {
        self.history_limit = max_entries.max(1);
        self
    }

    /// Add (or replace) a job.
    pub fn add_job(&mut self, job: JobSpec) {
        if let Some(existing) = self.jobs.iter_mut().find(|j| j.id == job.id) {
            *existing = job;
        } else {
            self.jobs.push(job);
        }
    }

    /// Validate and add raw job objects. A job that fails validation is
    /// logged and skipped; the others are still registered.
    pub fn register_jobs(
        &mut self,
        raw_jobs: &[Value],
        defaults: &JobDefaults,
        tz: Tz,
    ) -> Vec<CadenceError> {
        let mut failures = Vec::new();
        for (index, raw) in raw_jobs.iter().enumerate() {
            let result = match raw.as_object() {
                Some(obj) => make_job_spec(obj, index, defaults, tz),
                None => Err(CadenceError::InvalidJob {
                    job_id: format!("job_{index}"),
                    reason: "job must be an object".into(),
                }),
            };
            match result {
                Ok(job) => self.add_job(job),
                Err(e) => {
                    error!(error = %e, "skipping job due to config error");
                    self.activity.record_error(json!({
                        "source": "scheduler",
                        "event": "job_config_error",
                        "index": index,
                        "error": e.to_string(),
                    }));
                    failures.push(e);
                }
            }
        }
        failures
    }

    /// Returns registered jobs.
    pub fn jobs(&self) -> &[JobSpec] {
        &self.jobs
    }

    /// Start the background loop.
    pub fn run(self) -> SchedulerController {
        let cancel = CancellationToken::new();
        let history: History = Arc::new(Mutex::new(VecDeque::new()));
        let job_ids = self.jobs.iter().map(|j| j.id.clone()).collect();

        let now = Utc::now();
        let scheduled: Vec<ScheduledJob> = self
            .jobs
            .into_iter()
            .map(|spec| ScheduledJob::new(Arc::new(spec), now))
            .collect();
        for job in &scheduled {
            log_registration(job, now);
        }

        let state = LoopState {
            runner: self.runner,
            activity: self.activity,
            permits: Arc::new(Semaphore::new(self.workers)),
            history: Arc::clone(&history),
            history_limit: self.history_limit,
        };
        let handle = tokio::spawn(run_loop(scheduled, state, cancel.clone()));

        SchedulerController {
            cancel,
            handle: Some(handle),
            job_ids,
            history,
        }
    }
}

fn log_registration(job: &ScheduledJob, now: DateTime<Utc>) {
    let spec = &job.spec;
    match job.next_fire {
        Some(next) => info!(
            job_id = %spec.id,
            module = %spec.module,
            trigger = %spec.trigger,
            next_run = %next.to_rfc3339(),
            "registered job"
        ),
        None => warn!(
            job_id = %spec.id,
            trigger = %spec.trigger,
            "registered job will never fire"
        ),
    }
    debug!(
        job_id = %spec.id,
        summary = ?spec.summary,
        max_instances = spec.max_instances,
        coalesce = spec.coalesce,
        misfire_grace_time = ?spec.misfire_grace_time,
        preview = ?spec
            .trigger
            .preview(6, now)
            .iter()
            .map(DateTime::to_rfc3339)
            .collect::<Vec<_>>(),
        "job policy"
    );
}

/// Shared by every dispatched run.
#[derive(Clone)]
struct LoopState {
    runner: Arc<dyn Runner>,
    activity: Arc<dyn ActivitySink>,
    permits: Arc<Semaphore>,
    history: History,
    history_limit: usize,
}

impl LoopState {
    fn push_history(&self, record: JobRunRecord) {
        let mut history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
        history.push_back(record);
        while history.len() > self.history_limit {
            history.pop_front();
        }
    }
}

async fn run_loop(mut jobs: Vec<ScheduledJob>, state: LoopState, cancel: CancellationToken) {
    info!("scheduler started with {} job(s)", jobs.len());
    let mut in_flight = JoinSet::new();

    loop {
        while in_flight.try_join_next().is_some() {}

        let now = Utc::now();
        for job in &mut jobs {
            let plan = job.plan_due(now);
            for missed in &plan.misfired {
                warn!(
                    job_id = %job.spec.id,
                    scheduled_for = %missed.to_rfc3339(),
                    "run time missed by more than the misfire grace time"
                );
            }
            if plan.coalesced > 0 {
                debug!(job_id = %job.spec.id, coalesced = plan.coalesced, "coalesced missed runs");
            }
            for scheduled_for in plan.runs {
                dispatch(job, scheduled_for, &state, &mut in_flight);
            }
        }

        let wait = jobs
            .iter()
            .filter_map(|j| j.due_at)
            .min()
            .map_or(MAX_IDLE, |due| {
                (due - Utc::now()).to_std().unwrap_or(Duration::ZERO).min(MAX_IDLE)
            });

        tokio::select! {
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(wait) => {}
        }
    }

    info!(in_flight = in_flight.len(), "scheduler stopping");
    while in_flight.join_next().await.is_some() {}
    info!("scheduler stopped");
}

fn dispatch(
    job: &ScheduledJob,
    scheduled_for: DateTime<Utc>,
    state: &LoopState,
    in_flight: &mut JoinSet<()>,
) {
    let spec = Arc::clone(&job.spec);
    if job.running.load(Ordering::SeqCst) >= spec.max_instances {
        warn!(
            job_id = %spec.id,
            max_instances = spec.max_instances,
            "skipping run: maximum number of running instances reached"
        );
        state.activity.record(json!({
            "source": "scheduler",
            "event": "job_skipped",
            "job_id": spec.id,
            "module": spec.module,
            "reason": "max_instances",
            "max_instances": spec.max_instances,
            "scheduled_for": scheduled_for.to_rfc3339(),
        }));
        state.push_history(JobRunRecord {
            job_id: spec.id.clone(),
            run_id: None,
            scheduled_for,
            finished_at: Utc::now(),
            duration_ms: 0,
            outcome: RunOutcome::Skipped,
            summary: format!("{} instance(s) already running", spec.max_instances),
        });
        return;
    }

    job.running.fetch_add(1, Ordering::SeqCst);
    let guard = InstanceGuard(Arc::clone(&job.running));
    let state = state.clone();
    in_flight.spawn(async move {
        let _guard = guard;
        let Ok(_permit) = Arc::clone(&state.permits).acquire_owned().await else {
            return;
        };
        execute(spec, scheduled_for, &state).await;
    });
}

async fn execute(spec: Arc<JobSpec>, scheduled_for: DateTime<Utc>, state: &LoopState) {
    let request = RunRequest::for_job(&spec, scheduled_for);
    let run_id = request.run_id.clone();
    info!(job_id = %spec.id, module = %spec.module, run_id = %run_id, "job starting");

    let started = Instant::now();
    let result = std::panic::AssertUnwindSafe(state.runner.invoke(request))
        .catch_unwind()
        .await
        .unwrap_or_else(|_| Err(CadenceError::Runner(format!("module '{}' panicked", spec.module))));
    let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

    let (outcome, summary, error) = match &result {
        Ok(report) => {
            info!(job_id = %spec.id, duration_ms, "job finished");
            (RunOutcome::Ok, report.describe(), None)
        }
        Err(e) => {
            error!(job_id = %spec.id, duration_ms, error = %e, "job failed");
            let outcome = match e {
                CadenceError::Timeout { .. } => RunOutcome::Timeout,
                _ => RunOutcome::Error,
            };
            (outcome, e.to_string(), Some(e.to_string()))
        }
    };

    let mut record = json!({
        "source": "scheduler",
        "event": "job_run",
        "job_id": spec.id,
        "module": spec.module,
        "status": outcome.as_str(),
        "duration_ms": duration_ms,
        "summary": spec.summary,
        "run_id": run_id,
        "scheduled_for": scheduled_for.to_rfc3339(),
    });
    match error {
        Some(message) => {
            record["error"] = Value::String(message);
            state.activity.record(record.clone());
            state.activity.record_error(record);
        }
        None => state.activity.record(record),
    }

    state.push_history(JobRunRecord {
        job_id: spec.id.clone(),
        run_id: Some(run_id),
        scheduled_for,
        finished_at: Utc::now(),
        duration_ms,
        outcome,
        summary,
    });
}

/// Handle to a running scheduler loop.
pub struct SchedulerController {
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
    job_ids: Vec<String>,
    history: History,
}

impl SchedulerController {
    /// Signal shutdown. In-flight runs are allowed to finish.
    pub fn stop(&self) {
        info!("scheduler stop requested");
        self.cancel.cancel();
    }

    /// Wait for the loop to end. Returns `false` if `timeout` elapsed first.
    pub async fn join(&mut self, timeout: Option<Duration>) -> bool {
        let Some(handle) = self.handle.as_mut() else {
            return true;
        };
        let finished = match timeout {
            Some(limit) => match tokio::time::timeout(limit, &mut *handle).await {
                Ok(joined) => Some(joined),
                Err(_) => None,
            },
            None => Some(handle.await),
        };
        match finished {
            Some(joined) => {
                if let Err(e) = joined {
                    error!(error = %e, "scheduler loop ended abnormally");
                }
                self.handle = None;
                true
            }
            None => false,
        }
    }

    pub fn job_ids(&self) -> &[String] {
        &self.job_ids
    }

    /// Whether the loop is still running.
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Snapshot of recent runs, oldest first.
    pub fn history(&self) -> Vec<JobRunRecord> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }
}
