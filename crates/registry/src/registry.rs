//! The Job Registry: submission, dispatch, cancellation, the queue
//! drain, the timeout watchdog, and graceful shutdown.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use parking_lot::Mutex;
use tokio::task::JoinHandle;

use bg_domain::error::Result;
use bg_domain::job::{Job, JobStatus, JobType};
use bg_domain::ws::ServerMessage;
use bg_store::Db;

use crate::cancel::CancelMap;
use crate::handler::{HandlerContext, JobHandler, ProgressReporter};
use crate::rate::{check_hourly_quota, effective_limits, ConcurrencyTracker};
use crate::ws::WsHub;

const WATCHDOG_INTERVAL: StdDuration = StdDuration::from_secs(60);
const SHUTDOWN_GRACE: StdDuration = StdDuration::from_millis(500);

/// Denial reason for `submit`, surfaced by the caller as HTTP 429.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitDenial {
    HourlyQuotaExceeded,
}

/// Outcome of a `cancel` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// Job was pending/queued and is now cancelled.
    CancelledImmediately,
    /// Job was running with a live handler; the signal was set, the
    /// background task's cleanup step will finalize the status.
    SignalSent,
    /// Job was running but no in-memory handler was found (a ghost, e.g.
    /// after a crash-restart) and has been force-marked `interrupted`.
    ForcedInterrupted { was_orphan: bool },
}

#[derive(Debug, thiserror::Error)]
pub enum CancelError {
    #[error("job not found")]
    NotFound,
    #[error("not authorized to cancel this job")]
    NotOwner,
    #[error("job is already in a terminal state")]
    AlreadyTerminal,
}

pub struct JobRegistry {
    db: Arc<Db>,
    hub: Arc<WsHub>,
    handlers: HashMap<JobType, Arc<dyn JobHandler>>,
    cancel_map: CancelMap,
    concurrency: ConcurrencyTracker,
    running: Mutex<HashMap<String, JoinHandle<()>>>,
    watchdog: Mutex<Option<JoinHandle<()>>>,
}

impl JobRegistry {
    pub fn new(db: Arc<Db>, hub: Arc<WsHub>, handlers: HashMap<JobType, Arc<dyn JobHandler>>) -> Arc<Self> {
        Arc::new(Self {
            db,
            hub,
            handlers,
            cancel_map: CancelMap::new(),
            concurrency: ConcurrencyTracker::new(),
            running: Mutex::new(HashMap::new()),
            watchdog: Mutex::new(None),
        })
    }

    /// Spawns the 60s timeout watchdog. Call once at startup.
    pub fn spawn_watchdog(self: &Arc<Self>) {
        let registry = Arc::clone(self);
        let task = tokio::spawn(async move {
            loop {
                tokio::time::sleep(WATCHDOG_INTERVAL).await;
                registry.sweep_timeouts();
            }
        });
        *self.watchdog.lock() = Some(task);
    }

    fn sweep_timeouts(self: &Arc<Self>) {
        let timed_out = match self.db.list_timed_out_jobs(Utc::now()) {
            Ok(jobs) => jobs,
            Err(err) => {
                tracing::warn!(%err, "watchdog failed to list timed-out jobs");
                return;
            }
        };
        for job in timed_out {
            self.cancel_map.signal(&job.id);
            self.cancel_map.remove(&job.id);
            if let Some(task) = self.running.lock().remove(&job.id) {
                task.abort();
            }
            if let Err(err) = self.db.mark_failed(&job.id, "Timeout exceeded") {
                tracing::warn!(job_id = %job.id, %err, "failed to mark timed-out job failed");
                continue;
            }
            self.concurrency.decrement(&job.user_id);
            self.hub.send_to_user(
                &job.user_id,
                ServerMessage::JobFailed { job_id: job.id.clone(), error: "Timeout exceeded".into() },
            );
            self.process_queue(&job.user_id);
        }
    }

    /// submit(job_type, user_id, params, timeout_s, progress_detail)
    pub fn submit(
        self: &Arc<Self>,
        job_type: JobType,
        user_id: &str,
        params: serde_json::Value,
        timeout_seconds: i64,
        progress_detail: &str,
    ) -> Result<std::result::Result<Job, SubmitDenial>> {
        if check_hourly_quota(&self.db, user_id)?.is_err() {
            return Ok(Err(SubmitDenial::HourlyQuotaExceeded));
        }
        let (_, concurrency_limit) = effective_limits(&self.db, user_id)?;

        let mut job = Job::new(user_id, job_type, params, timeout_seconds, progress_detail);
        let can_start_now = self.concurrency.try_acquire(user_id, concurrency_limit);
        if !can_start_now {
            job.status = JobStatus::Queued;
        }

        self.db.insert_job(&job)?;
        if job.status == JobStatus::Queued {
            self.db.mark_queued(&job.id)?;
        }
        self.hub.send_to_user(
            user_id,
            ServerMessage::JobCreated { job_id: job.id.clone(), job_type: job.job_type.as_str().to_string() },
        );

        if job.status == JobStatus::Pending {
            self.start_job(job.clone());
        }

        Ok(Ok(job))
    }

    /// Runs a job that already holds a reserved concurrency slot — either
    /// just-submitted (`submit`) or promoted off the queue
    /// (`process_queue`). Never acquires a slot itself.
    fn start_job(self: &Arc<Self>, job: Job) {
        let Some(handler) = self.handlers.get(&job.job_type).cloned() else {
            tracing::error!(job_id = %job.id, job_type = job.job_type.as_str(), "no handler registered for job type");
            if let Err(err) = self.db.mark_failed(&job.id, "no handler registered for this job type") {
                tracing::warn!(job_id = %job.id, %err, "failed to mark unhandled job failed");
            }
            self.concurrency.decrement(&job.user_id);
            self.hub.send_to_user(
                &job.user_id,
                ServerMessage::JobFailed { job_id: job.id.clone(), error: "no handler registered".into() },
            );
            return;
        };

        let cancel_event = self.cancel_map.install(&job.id);
        let timeout_at = Utc::now() + Duration::seconds(job.timeout_seconds);
        if let Err(err) = self.db.mark_running(&job.id, timeout_at) {
            tracing::warn!(job_id = %job.id, %err, "failed to mark job running");
        }
        self.hub.send_to_user(&job.user_id, ServerMessage::JobStarted { job_id: job.id.clone() });

        let registry = Arc::clone(self);
        let job_id = job.id.clone();
        let user_id = job.user_id.clone();

        let progress = ProgressReporter::new(Arc::clone(&self.db), Arc::clone(&self.hub), job_id.clone(), user_id.clone());
        let ctx = HandlerContext {
            job_id: job_id.clone(),
            user_id: user_id.clone(),
            params: job.params_json.clone(),
            cancel_event: cancel_event.clone(),
            progress,
            db: Arc::clone(&self.db),
        };

        let task = tokio::spawn(async move {
            let outcome = handler.run(ctx).await;
            let final_message = match outcome {
                Ok(result_ref) => {
                    if cancel_event.is_set() {
                        let _ = registry.db.mark_cancelled(&job_id);
                        ServerMessage::JobCancelled { job_id: job_id.clone() }
                    } else {
                        let _ = registry.db.mark_done(&job_id, result_ref.as_deref());
                        ServerMessage::JobCompleted { job_id: job_id.clone(), result_ref }
                    }
                }
                Err(message) => {
                    let truncated: String = message.chars().take(2000).collect();
                    let _ = registry.db.mark_failed(&job_id, &truncated);
                    ServerMessage::JobFailed { job_id: job_id.clone(), error: truncated }
                }
            };
            registry.hub.send_to_user(&user_id, final_message);

            // Guaranteed cleanup: runs regardless of which branch above fired.
            registry.running.lock().remove(&job_id);
            registry.cancel_map.remove(&job_id);
            registry.concurrency.decrement(&user_id);
            registry.process_queue(&user_id);
        });

        self.running.lock().insert(job.id.clone(), task);
    }

    /// cancel(job_id, requester, is_admin)
    pub fn cancel(
        &self,
        job_id: &str,
        requester: &str,
        is_admin: bool,
    ) -> Result<std::result::Result<CancelOutcome, CancelError>> {
        let Some(job) = self.db.get_job(job_id)? else {
            return Ok(Err(CancelError::NotFound));
        };
        if !is_admin && job.user_id != requester {
            return Ok(Err(CancelError::NotOwner));
        }

        match job.status {
            JobStatus::Pending | JobStatus::Queued => {
                self.db.mark_cancelled(&job.id)?;
                self.hub.send_to_user(&job.user_id, ServerMessage::JobCancelled { job_id: job.id.clone() });
                Ok(Ok(CancelOutcome::CancelledImmediately))
            }
            JobStatus::Running => {
                if self.cancel_map.signal(&job.id) {
                    Ok(Ok(CancelOutcome::SignalSent))
                } else {
                    // Ghost: DB says running, no in-memory handler exists
                    // (e.g. after a crash-restart before reconciliation ran).
                    self.db.mark_interrupted(&job.id)?;
                    self.hub.send_to_user(
                        &job.user_id,
                        ServerMessage::JobFailed { job_id: job.id.clone(), error: "orphaned job interrupted".into() },
                    );
                    Ok(Ok(CancelOutcome::ForcedInterrupted { was_orphan: true }))
                }
            }
            JobStatus::Done | JobStatus::Failed | JobStatus::Cancelled | JobStatus::Interrupted => {
                Ok(Err(CancelError::AlreadyTerminal))
            }
        }
    }

    /// _process_queue(user_id): promote queued jobs while slots remain.
    /// Each iteration acquires one slot, then either spends it on a queued
    /// job or releases it immediately if the queue is empty.
    fn process_queue(self: &Arc<Self>, user_id: &str) {
        loop {
            let (_, concurrency_limit) = match effective_limits(&self.db, user_id) {
                Ok(limits) => limits,
                Err(err) => {
                    tracing::warn!(%err, user_id, "failed to resolve rate limits while draining queue");
                    return;
                }
            };
            if !self.concurrency.try_acquire(user_id, concurrency_limit) {
                return;
            }
            match self.db.oldest_queued_job_for_user(user_id) {
                Ok(Some(job)) => self.start_job(job),
                Ok(None) => {
                    self.concurrency.decrement(user_id);
                    return;
                }
                Err(err) => {
                    tracing::warn!(%err, user_id, "failed to fetch oldest queued job");
                    self.concurrency.decrement(user_id);
                    return;
                }
            }
        }
    }

    /// Cancels the watchdog and every in-flight task, waits briefly for
    /// their cleanup steps, then force-marks any rows still `running`.
    pub async fn shutdown(&self) {
        if let Some(task) = self.watchdog.lock().take() {
            task.abort();
        }

        let job_ids: Vec<String> = self.running.lock().keys().cloned().collect();
        for job_id in &job_ids {
            self.cancel_map.signal(job_id);
        }
        tokio::time::sleep(SHUTDOWN_GRACE).await;

        let leftover: Vec<JoinHandle<()>> = self.running.lock().drain().map(|(_, task)| task).collect();
        for task in leftover {
            task.abort();
        }

        // Same sweep the next startup would otherwise have to perform: any
        // row still non-terminal at this point means its task was aborted
        // before persisting a terminal status.
        if let Err(err) = self.db.reconcile_interrupted_jobs_at_startup() {
            tracing::warn!(%err, "failed to reconcile running jobs during shutdown");
        }
    }
}
