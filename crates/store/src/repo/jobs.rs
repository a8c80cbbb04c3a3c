//! Job rows: the durable half of the Job Registry's state — everything
//! in-memory (tasks, cancel events, slot counts) is rebuilt from here on
//! restart.

use bg_domain::error::Result;
use bg_domain::job::{is_valid_transition, Job, JobStatus, JobType};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use crate::db::{store_err, Db};
use crate::util::{opt_ts, parse_ts, ts};

fn row_to_job(row: &rusqlite::Row<'_>) -> rusqlite::Result<Job> {
    let job_type: String = row.get("job_type")?;
    let status: String = row.get("status")?;
    let params_json: String = row.get("params_json")?;
    let created_at: String = row.get("created_at")?;
    let started_at: Option<String> = row.get("started_at")?;
    let completed_at: Option<String> = row.get("completed_at")?;
    let timeout_at: Option<String> = row.get("timeout_at")?;

    Ok(Job {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        job_type: job_type.parse().unwrap_or(JobType::Benchmark),
        status: status.parse().unwrap_or(JobStatus::Failed),
        progress_pct: row.get::<_, i64>("progress_pct")? as u8,
        progress_detail: row.get("progress_detail")?,
        params_json: serde_json::from_str(&params_json).unwrap_or(serde_json::Value::Null),
        result_ref: row.get("result_ref")?,
        experiment_id: row.get("experiment_id")?,
        created_at: parse_ts(&created_at).unwrap_or_else(|_| Utc::now()),
        started_at: started_at.and_then(|s| parse_ts(&s).ok()),
        completed_at: completed_at.and_then(|s| parse_ts(&s).ok()),
        timeout_at: timeout_at.and_then(|s| parse_ts(&s).ok()),
        timeout_seconds: row.get("timeout_seconds")?,
        error: row.get("error")?,
    })
}

impl Db {
    pub fn insert_job(&self, job: &Job) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO jobs (id, user_id, job_type, status, progress_pct, progress_detail,
                    params_json, result_ref, experiment_id, created_at, started_at, completed_at,
                    timeout_at, timeout_seconds, error)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
                params![
                    job.id,
                    job.user_id,
                    job.job_type.as_str(),
                    job.status.as_str(),
                    job.progress_pct as i64,
                    job.progress_detail,
                    job.params_json.to_string(),
                    job.result_ref,
                    job.experiment_id,
                    ts(job.created_at),
                    opt_ts(job.started_at),
                    opt_ts(job.completed_at),
                    opt_ts(job.timeout_at),
                    job.timeout_seconds,
                    job.error,
                ],
            )
            .map_err(store_err)?;
        Ok(())
    }

    pub fn get_job(&self, id: &str) -> Result<Option<Job>> {
        self.conn()
            .query_row("SELECT * FROM jobs WHERE id = ?1", params![id], row_to_job)
            .optional()
            .map_err(store_err)
    }

    fn current_status(&self, job_id: &str) -> Result<JobStatus> {
        let raw: String = self
            .conn()
            .query_row("SELECT status FROM jobs WHERE id = ?1", params![job_id], |r| r.get(0))
            .map_err(store_err)?;
        raw.parse()
    }

    /// Applies a status transition. An invalid transition (per
    /// [`is_valid_transition`]) is logged at `warn` but the write still
    /// happens — a job stuck mid-transition must never block on a registry
    /// bug, per the allowed-transitions contract.
    fn transition(&self, job_id: &str, to: JobStatus) -> Result<()> {
        let from = self.current_status(job_id)?;
        if !is_valid_transition(from, to) {
            tracing::warn!(
                job_id,
                from = from.as_str(),
                to = to.as_str(),
                "accepting out-of-contract job status transition"
            );
        }
        Ok(())
    }

    pub fn mark_queued(&self, job_id: &str) -> Result<()> {
        self.transition(job_id, JobStatus::Queued)?;
        self.conn()
            .execute(
                "UPDATE jobs SET status = 'queued' WHERE id = ?1",
                params![job_id],
            )
            .map_err(store_err)?;
        Ok(())
    }

    pub fn mark_running(&self, job_id: &str, timeout_at: DateTime<Utc>) -> Result<()> {
        self.transition(job_id, JobStatus::Running)?;
        self.conn()
            .execute(
                "UPDATE jobs SET status = 'running', started_at = ?1, timeout_at = ?2 WHERE id = ?3",
                params![ts(Utc::now()), ts(timeout_at), job_id],
            )
            .map_err(store_err)?;
        Ok(())
    }

    fn mark_terminal(&self, job_id: &str, to: JobStatus, error: Option<&str>) -> Result<()> {
        self.transition(job_id, to)?;
        self.conn()
            .execute(
                "UPDATE jobs SET status = ?1, completed_at = ?2, timeout_at = NULL, error = ?3 WHERE id = ?4",
                params![to.as_str(), ts(Utc::now()), error, job_id],
            )
            .map_err(store_err)?;
        Ok(())
    }

    pub fn mark_done(&self, job_id: &str, result_ref: Option<&str>) -> Result<()> {
        if let Some(r) = result_ref {
            self.set_result_ref(job_id, r)?;
        }
        self.mark_terminal(job_id, JobStatus::Done, None)
    }

    pub fn mark_failed(&self, job_id: &str, error: &str) -> Result<()> {
        self.mark_terminal(job_id, JobStatus::Failed, Some(error))
    }

    pub fn mark_cancelled(&self, job_id: &str) -> Result<()> {
        self.mark_terminal(job_id, JobStatus::Cancelled, None)
    }

    pub fn mark_interrupted(&self, job_id: &str) -> Result<()> {
        self.mark_terminal(job_id, JobStatus::Interrupted, None)
    }

    pub fn set_progress(&self, job_id: &str, pct: u8, detail: &str) -> Result<()> {
        self.conn()
            .execute(
                "UPDATE jobs SET progress_pct = ?1, progress_detail = ?2 WHERE id = ?3",
                params![pct.min(100) as i64, detail, job_id],
            )
            .map_err(store_err)?;
        Ok(())
    }

    /// May be called while `status = running` (invariant iv: eager
    /// publication so a reconnecting client can discover the ref before the
    /// job finishes).
    pub fn set_result_ref(&self, job_id: &str, result_ref: &str) -> Result<()> {
        self.conn()
            .execute(
                "UPDATE jobs SET result_ref = ?1 WHERE id = ?2",
                params![result_ref, job_id],
            )
            .map_err(store_err)?;
        Ok(())
    }

    /// Hourly quota: jobs created by `user_id` in the last hour.
    pub fn count_jobs_since(&self, user_id: &str, since: DateTime<Utc>) -> Result<i64> {
        self.conn()
            .query_row(
                "SELECT COUNT(*) FROM jobs WHERE user_id = ?1 AND created_at > ?2",
                params![user_id, ts(since)],
                |r| r.get(0),
            )
            .map_err(store_err)
    }

    pub fn list_active_jobs_for_user(&self, user_id: &str) -> Result<Vec<Job>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT * FROM jobs WHERE user_id = ?1 AND status IN ('pending', 'queued', 'running') ORDER BY created_at")
            .map_err(store_err)?;
        let rows = stmt.query_map(params![user_id], row_to_job).map_err(store_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(store_err)
    }

    /// WS sync message payload: the `<=10` most recent terminal jobs.
    pub fn list_recent_terminal_jobs(&self, user_id: &str, limit: u32) -> Result<Vec<Job>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT * FROM jobs WHERE user_id = ?1 AND status IN ('done', 'failed', 'cancelled', 'interrupted')
                 ORDER BY completed_at DESC LIMIT ?2",
            )
            .map_err(store_err)?;
        let rows = stmt.query_map(params![user_id, limit], row_to_job).map_err(store_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(store_err)
    }

    pub fn oldest_queued_job_for_user(&self, user_id: &str) -> Result<Option<Job>> {
        self.conn()
            .query_row(
                "SELECT * FROM jobs WHERE user_id = ?1 AND status = 'queued' ORDER BY created_at LIMIT 1",
                params![user_id],
                row_to_job,
            )
            .optional()
            .map_err(store_err)
    }

    /// Watchdog sweep: running jobs whose deadline has passed.
    pub fn list_timed_out_jobs(&self, now: DateTime<Utc>) -> Result<Vec<Job>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT * FROM jobs WHERE status = 'running' AND timeout_at < ?1")
            .map_err(store_err)?;
        let rows = stmt.query_map(params![ts(now)], row_to_job).map_err(store_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(store_err)
    }

    /// Startup reconciliation: every non-terminal job is transitioned to
    /// `interrupted` — the process that was supposed to run it is gone.
    pub fn reconcile_interrupted_jobs_at_startup(&self) -> Result<usize> {
        let conn = self.conn();
        let n = conn
            .execute(
                "UPDATE jobs SET status = 'interrupted', completed_at = ?1, timeout_at = NULL
                 WHERE status IN ('pending', 'queued', 'running')",
                params![ts(Utc::now())],
            )
            .map_err(store_err)?;
        Ok(n)
    }

    /// Process-wide job counts grouped by status, for the admin metrics
    /// endpoint — the only place this binary looks across every user's jobs.
    pub fn count_jobs_by_status(&self) -> Result<Vec<(String, i64)>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT status, COUNT(*) FROM jobs GROUP BY status")
            .map_err(store_err)?;
        let rows = stmt
            .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)))
            .map_err(store_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(store_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bg_domain::user::{Role, User};
    use chrono::Duration;

    fn db_with_user() -> (Db, String) {
        let db = Db::open_in_memory().unwrap();
        let u = User::new("u@example.com", "h", Role::User);
        db.insert_user(&u).unwrap();
        (db, u.id)
    }

    fn job(user_id: &str) -> Job {
        Job::new(user_id, JobType::Benchmark, serde_json::json!({}), 60, "queued")
    }

    #[test]
    fn insert_and_fetch_round_trip() {
        let (db, user_id) = db_with_user();
        let j = job(&user_id);
        db.insert_job(&j).unwrap();
        let fetched = db.get_job(&j.id).unwrap().unwrap();
        assert_eq!(fetched.status, JobStatus::Pending);
        assert_eq!(fetched.job_type, JobType::Benchmark);
    }

    #[test]
    fn mark_running_then_done_sets_timestamps() {
        let (db, user_id) = db_with_user();
        let j = job(&user_id);
        db.insert_job(&j).unwrap();

        db.mark_running(&j.id, Utc::now() + Duration::seconds(60)).unwrap();
        let running = db.get_job(&j.id).unwrap().unwrap();
        assert_eq!(running.status, JobStatus::Running);
        assert!(running.started_at.is_some());
        assert!(running.timeout_at.is_some());

        db.mark_done(&j.id, Some("tune_abc")).unwrap();
        let done = db.get_job(&j.id).unwrap().unwrap();
        assert_eq!(done.status, JobStatus::Done);
        assert!(done.completed_at.is_some());
        assert!(done.timeout_at.is_none());
        assert_eq!(done.result_ref.as_deref(), Some("tune_abc"));
    }

    #[test]
    fn set_result_ref_works_while_running() {
        let (db, user_id) = db_with_user();
        let j = job(&user_id);
        db.insert_job(&j).unwrap();
        db.mark_running(&j.id, Utc::now() + Duration::seconds(60)).unwrap();
        db.set_result_ref(&j.id, "early-ref").unwrap();
        let running = db.get_job(&j.id).unwrap().unwrap();
        assert_eq!(running.status, JobStatus::Running);
        assert_eq!(running.result_ref.as_deref(), Some("early-ref"));
    }

    #[test]
    fn invalid_transition_is_accepted_not_rejected() {
        let (db, user_id) = db_with_user();
        let j = job(&user_id);
        db.insert_job(&j).unwrap();
        // pending -> done is not in the allowed-transitions table.
        assert!(db.mark_done(&j.id, None).is_ok());
        assert_eq!(db.get_job(&j.id).unwrap().unwrap().status, JobStatus::Done);
    }

    #[test]
    fn hourly_quota_counts_recent_jobs_only() {
        let (db, user_id) = db_with_user();
        db.insert_job(&job(&user_id)).unwrap();
        db.insert_job(&job(&user_id)).unwrap();

        let count = db.count_jobs_since(&user_id, Utc::now() - Duration::hours(1)).unwrap();
        assert_eq!(count, 2);

        let none_yet = db.count_jobs_since(&user_id, Utc::now() + Duration::hours(1)).unwrap();
        assert_eq!(none_yet, 0);
    }

    #[test]
    fn queue_draining_picks_oldest_first() {
        let (db, user_id) = db_with_user();
        let mut first = job(&user_id);
        first.id = "a-first".into();
        let mut second = job(&user_id);
        second.id = "b-second".into();
        db.insert_job(&first).unwrap();
        db.insert_job(&second).unwrap();
        db.mark_queued(&first.id).unwrap();
        db.mark_queued(&second.id).unwrap();

        let picked = db.oldest_queued_job_for_user(&user_id).unwrap().unwrap();
        assert_eq!(picked.id, first.id);
    }

    #[test]
    fn watchdog_finds_only_expired_running_jobs() {
        let (db, user_id) = db_with_user();
        let j = job(&user_id);
        db.insert_job(&j).unwrap();
        db.mark_running(&j.id, Utc::now() - Duration::seconds(1)).unwrap();

        let expired = db.list_timed_out_jobs(Utc::now()).unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, j.id);
    }

    #[test]
    fn startup_reconciliation_interrupts_non_terminal_jobs() {
        let (db, user_id) = db_with_user();
        let pending = job(&user_id);
        let mut running = job(&user_id);
        running.id = "running-job".into();
        db.insert_job(&pending).unwrap();
        db.insert_job(&running).unwrap();
        db.mark_running(&running.id, Utc::now() + Duration::seconds(60)).unwrap();

        let n = db.reconcile_interrupted_jobs_at_startup().unwrap();
        assert_eq!(n, 2);
        assert_eq!(db.get_job(&pending.id).unwrap().unwrap().status, JobStatus::Interrupted);
        assert_eq!(db.get_job(&running.id).unwrap().unwrap().status, JobStatus::Interrupted);
    }

    #[test]
    fn counts_jobs_by_status_across_users() {
        let (db, user_id) = db_with_user();
        let a = job(&user_id);
        let mut b = job(&user_id);
        b.id = "job-b".into();
        db.insert_job(&a).unwrap();
        db.insert_job(&b).unwrap();
        db.mark_queued(&b.id).unwrap();

        let counts = db.count_jobs_by_status().unwrap();
        let pending = counts.iter().find(|(s, _)| s == "pending").map(|(_, n)| *n).unwrap_or(0);
        let queued = counts.iter().find(|(s, _)| s == "queued").map(|(_, n)| *n).unwrap_or(0);
        assert_eq!(pending, 1);
        assert_eq!(queued, 1);
    }
}
