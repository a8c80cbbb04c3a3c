//! Judge reports (and their revision chains) and per-subject verdicts.

use bg_domain::error::Result;
use bg_domain::judge::{JudgeReport, JudgeVerdict};
use rusqlite::{params, OptionalExtension};

use crate::db::{store_err, Db};
use crate::util::{parse_ts, to_json, ts};

fn row_to_report(row: &rusqlite::Row<'_>) -> rusqlite::Result<JudgeReport> {
    let created_at: String = row.get("created_at")?;
    Ok(JudgeReport {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        job_id: row.get("job_id")?,
        experiment_id: row.get("experiment_id")?,
        subject_ref: row.get("subject_ref")?,
        judge_provider_key: row.get("judge_provider_key")?,
        judge_model_id: row.get("judge_model_id")?,
        criteria: row.get("criteria")?,
        parent_report_id: row.get("parent_report_id")?,
        version: row.get::<_, i64>("version")? as u32,
        summary: row.get("summary")?,
        created_at: parse_ts(&created_at).unwrap_or_else(|_| chrono::Utc::now()),
    })
}

fn row_to_verdict(row: &rusqlite::Row<'_>) -> rusqlite::Result<JudgeVerdict> {
    let raw_response: Option<String> = row.get("raw_response")?;
    Ok(JudgeVerdict {
        id: row.get("id")?,
        report_id: row.get("report_id")?,
        target_ref: row.get("target_ref")?,
        score: row.get("score")?,
        rationale: row.get("rationale")?,
        raw_response: raw_response.map(|s| serde_json::from_str(&s).unwrap_or(serde_json::Value::Null)),
    })
}

impl Db {
    /// Inserts a report and all of its verdicts in one transaction. For a
    /// revision, `report.parent_report_id` should already point at the chain
    /// root (never at the immediately preceding version).
    pub fn insert_judge_report(&self, report: &JudgeReport, verdicts: &[JudgeVerdict]) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.unchecked_transaction().map_err(store_err)?;
        tx.execute(
            "INSERT INTO judge_reports (id, user_id, job_id, experiment_id, subject_ref,
                judge_provider_key, judge_model_id, criteria, parent_report_id, version, summary, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                report.id,
                report.user_id,
                report.job_id,
                report.experiment_id,
                report.subject_ref,
                report.judge_provider_key,
                report.judge_model_id,
                report.criteria,
                report.parent_report_id,
                report.version as i64,
                report.summary,
                ts(report.created_at),
            ],
        )
        .map_err(store_err)?;
        for v in verdicts {
            tx.execute(
                "INSERT INTO judge_verdicts (id, report_id, target_ref, score, rationale, raw_response)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![v.id, v.report_id, v.target_ref, v.score, v.rationale, v.raw_response.as_ref().map(to_json)],
            )
            .map_err(store_err)?;
        }
        tx.commit().map_err(store_err)?;
        Ok(())
    }

    /// Inserts just the report row, with no verdicts and no summary yet, so
    /// a client can bind to its id the moment the handler starts.
    pub fn insert_judge_report_header(&self, report: &JudgeReport) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO judge_reports (id, user_id, job_id, experiment_id, subject_ref,
                    judge_provider_key, judge_model_id, criteria, parent_report_id, version, summary, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    report.id,
                    report.user_id,
                    report.job_id,
                    report.experiment_id,
                    report.subject_ref,
                    report.judge_provider_key,
                    report.judge_model_id,
                    report.criteria,
                    report.parent_report_id,
                    report.version as i64,
                    report.summary,
                    ts(report.created_at),
                ],
            )
            .map_err(store_err)?;
        Ok(())
    }

    /// Appends verdicts to an already-inserted report, in one transaction.
    pub fn insert_judge_verdicts(&self, verdicts: &[JudgeVerdict]) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.unchecked_transaction().map_err(store_err)?;
        for v in verdicts {
            tx.execute(
                "INSERT INTO judge_verdicts (id, report_id, target_ref, score, rationale, raw_response)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![v.id, v.report_id, v.target_ref, v.score, v.rationale, v.raw_response.as_ref().map(to_json)],
            )
            .map_err(store_err)?;
        }
        tx.commit().map_err(store_err)?;
        Ok(())
    }

    /// Sets the final summary once every verdict has been scored.
    pub fn set_judge_summary(&self, report_id: &str, summary: &str) -> Result<()> {
        self.conn()
            .execute(
                "UPDATE judge_reports SET summary = ?2 WHERE id = ?1",
                params![report_id, summary],
            )
            .map_err(store_err)?;
        Ok(())
    }

    /// Verdicts and any child reports (`parent_report_id`) cascade.
    pub fn delete_judge_report(&self, id: &str) -> Result<()> {
        self.conn()
            .execute("DELETE FROM judge_reports WHERE id = ?1", params![id])
            .map_err(store_err)?;
        Ok(())
    }

    pub fn list_judge_reports_for_experiment(&self, experiment_id: &str) -> Result<Vec<JudgeReport>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT * FROM judge_reports WHERE experiment_id = ?1 ORDER BY created_at")
            .map_err(store_err)?;
        let rows = stmt.query_map(params![experiment_id], row_to_report).map_err(store_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(store_err)
    }

    pub fn list_judge_reports_for_user(&self, user_id: &str) -> Result<Vec<JudgeReport>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT * FROM judge_reports WHERE user_id = ?1 ORDER BY created_at DESC")
            .map_err(store_err)?;
        let rows = stmt.query_map(params![user_id], row_to_report).map_err(store_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(store_err)
    }

    pub fn get_judge_report(&self, id: &str) -> Result<Option<JudgeReport>> {
        self.conn()
            .query_row("SELECT * FROM judge_reports WHERE id = ?1", params![id], row_to_report)
            .optional()
            .map_err(store_err)
    }

    pub fn list_verdicts(&self, report_id: &str) -> Result<Vec<JudgeVerdict>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT * FROM judge_verdicts WHERE report_id = ?1")
            .map_err(store_err)?;
        let rows = stmt.query_map(params![report_id], row_to_verdict).map_err(store_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(store_err)
    }

    /// Every report in a version chain: the root plus every report whose
    /// `parent_report_id` equals the root, ordered by version.
    pub fn list_version_chain(&self, report_id: &str) -> Result<Vec<JudgeReport>> {
        let root = match self.get_judge_report(report_id)? {
            Some(r) => r.parent_report_id.unwrap_or(r.id),
            None => return Ok(Vec::new()),
        };
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT * FROM judge_reports WHERE id = ?1 OR parent_report_id = ?1 ORDER BY version",
            )
            .map_err(store_err)?;
        let rows = stmt.query_map(params![root], row_to_report).map_err(store_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(store_err)
    }

    /// Reports stuck in a non-terminal state long enough to be considered
    /// abandoned by a crashed worker. Judge reports have no status column —
    /// "running" here means present in `jobs` with `status = 'running'` and
    /// older than `older_than_seconds`; callers pass the threshold already
    /// resolved against job `started_at`.
    pub fn list_stale_judge_job_ids(&self, older_than_seconds: i64) -> Result<Vec<String>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT j.id FROM jobs j
                 JOIN judge_reports r ON r.job_id = j.id
                 WHERE j.status = 'running'
                   AND j.started_at IS NOT NULL
                   AND (strftime('%s', 'now') - strftime('%s', j.started_at)) > ?1",
            )
            .map_err(store_err)?;
        let rows = stmt
            .query_map(params![older_than_seconds], |r| r.get::<_, String>(0))
            .map_err(store_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(store_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bg_domain::ids::new_id;
    use bg_domain::job::{Job, JobType};
    use bg_domain::user::{Role, User};

    fn db_with_job() -> (Db, String, String) {
        let db = Db::open_in_memory().unwrap();
        let u = User::new("u@example.com", "h", Role::User);
        db.insert_user(&u).unwrap();
        let job = Job::new(&u.id, JobType::Judge, serde_json::json!({}), 60, "");
        db.insert_job(&job).unwrap();
        (db, u.id, job.id)
    }

    fn report(user_id: &str, job_id: &str, parent: Option<&str>, version: u32) -> JudgeReport {
        JudgeReport {
            id: new_id(),
            user_id: user_id.to_string(),
            job_id: job_id.to_string(),
            experiment_id: None,
            subject_ref: "run-1".into(),
            judge_provider_key: "openai".into(),
            judge_model_id: "gpt-4o".into(),
            criteria: "accuracy".into(),
            parent_report_id: parent.map(String::from),
            version,
            summary: Some("looks good".into()),
            created_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn report_with_verdicts_round_trips() {
        let (db, user_id, job_id) = db_with_job();
        let r = report(&user_id, &job_id, None, 1);
        let verdict = JudgeVerdict {
            id: new_id(),
            report_id: r.id.clone(),
            target_ref: "candidate-1".into(),
            score: 0.85,
            rationale: "clear and correct".into(),
            raw_response: None,
        };
        db.insert_judge_report(&r, &[verdict]).unwrap();

        let fetched = db.get_judge_report(&r.id).unwrap().unwrap();
        assert_eq!(fetched.version, 1);
        let verdicts = db.list_verdicts(&r.id).unwrap();
        assert_eq!(verdicts.len(), 1);
        assert_eq!(verdicts[0].score, 0.85);
    }

    #[test]
    fn version_chain_spans_root_and_revisions() {
        let (db, user_id, job_id) = db_with_job();
        let root = report(&user_id, &job_id, None, 1);
        db.insert_judge_report(&root, &[]).unwrap();

        let job2 = Job::new(&user_id, JobType::Judge, serde_json::json!({}), 60, "");
        db.insert_job(&job2).unwrap();
        let rev = report(&user_id, &job2.id, Some(&root.id), 2);
        db.insert_judge_report(&rev, &[]).unwrap();

        let chain = db.list_version_chain(&rev.id).unwrap();
        assert_eq!(chain.iter().map(|r| r.id.clone()).collect::<Vec<_>>(), vec![root.id.clone(), rev.id.clone()]);

        let chain_from_root = db.list_version_chain(&root.id).unwrap();
        assert_eq!(chain_from_root.len(), 2);
    }

    #[test]
    fn deleting_root_cascades_to_revision() {
        let (db, user_id, job_id) = db_with_job();
        let root = report(&user_id, &job_id, None, 1);
        db.insert_judge_report(&root, &[]).unwrap();
        db.conn().execute("DELETE FROM judge_reports WHERE id = ?1", params![root.id]).unwrap();
        assert!(db.get_judge_report(&root.id).unwrap().is_none());
    }
}
