//! Background tick loop that fires due schedules: a plain
//! `tokio::time::interval` loop spawned once at startup, independent of
//! request handling.

use std::time::Duration;

use bg_domain::job::JobType;
use serde_json::json;

use crate::state::AppState;

const TICK_SECONDS: u64 = 30;

/// Spawns the runner as a detached task. Errors for a single schedule are
/// logged and skipped so one bad row can't stall every other user's
/// schedules.
pub fn spawn(state: AppState) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(TICK_SECONDS));
        loop {
            interval.tick().await;
            tick(&state).await;
        }
    });
}

async fn tick(state: &AppState) {
    let now = chrono::Utc::now();
    let due = match state.db.list_due_schedules(now) {
        Ok(due) => due,
        Err(err) => {
            tracing::error!(error = %err, "failed to list due schedules");
            return;
        }
    };

    for schedule in due {
        let next_run_at = bg_domain::cron::next_after(&schedule.cron_expr, &now);
        if let Err(err) = state.db.mark_schedule_ran(&schedule.id, now, next_run_at) {
            tracing::error!(error = %err, schedule_id = %schedule.id, "failed to mark schedule as ran");
            continue;
        }

        fire(state, &schedule);
    }
}

fn fire(state: &AppState, schedule: &bg_store::Schedule) {
    let params = json!({
        "target_job_type": schedule.job_type,
        "target_params": schedule.params_json,
    });

    match state.registry.submit(JobType::Schedule, &schedule.user_id, params, bg_domain::job::DEFAULT_TIMEOUT_SECONDS, "schedule fired") {
        Ok(Ok(job)) => {
            tracing::info!(schedule_id = %schedule.id, job_id = %job.id, "schedule fired");
        }
        Ok(Err(denial)) => {
            tracing::warn!(schedule_id = %schedule.id, denial = ?denial, "schedule fire denied by quota");
        }
        Err(err) => {
            tracing::error!(error = %err, schedule_id = %schedule.id, "failed to submit scheduled job");
        }
    }
}
