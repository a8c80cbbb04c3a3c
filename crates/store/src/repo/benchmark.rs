//! Benchmark run headers and their per-(model, tier, ordinal) result rows.

use bg_domain::benchmark::{BenchmarkResult, BenchmarkRun};
use bg_domain::error::Result;
use rusqlite::{params, OptionalExtension};

use crate::db::{store_err, Db};
use crate::util::{parse_ts, to_json, ts};

fn row_to_run(row: &rusqlite::Row<'_>) -> rusqlite::Result<BenchmarkRun> {
    let created_at: String = row.get("created_at")?;
    let config_json: String = row.get("config_json")?;
    Ok(BenchmarkRun {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        job_id: row.get("job_id")?,
        experiment_id: row.get("experiment_id")?,
        created_at: parse_ts(&created_at).unwrap_or_else(|_| chrono::Utc::now()),
        config_json: serde_json::from_str(&config_json).unwrap_or(serde_json::Value::Null),
    })
}

fn row_to_result(row: &rusqlite::Row<'_>) -> rusqlite::Result<BenchmarkResult> {
    Ok(BenchmarkResult {
        id: row.get("id")?,
        run_id: row.get("run_id")?,
        provider_key: row.get("provider_key")?,
        model_id: row.get("model_id")?,
        context_tier: row.get::<_, i64>("context_tier")? as u32,
        run_ordinal: row.get::<_, i64>("run_ordinal")? as u32,
        ttft_ms: row.get::<_, Option<i64>>("ttft_ms")?.map(|v| v as u64),
        total_time_s: row.get("total_time_s")?,
        output_tokens: row.get::<_, Option<i64>>("output_tokens")?.map(|v| v as u32),
        input_tokens: row.get::<_, Option<i64>>("input_tokens")?.map(|v| v as u32),
        tokens_per_second: row.get("tokens_per_second")?,
        input_tokens_per_second: row.get("input_tokens_per_second")?,
        cost: row.get("cost")?,
        success: row.get::<_, i64>("success")? != 0,
        error: row.get("error")?,
    })
}

impl Db {
    pub fn insert_benchmark_run(&self, run: &BenchmarkRun) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO benchmark_runs (id, user_id, job_id, experiment_id, created_at, config_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    run.id,
                    run.user_id,
                    run.job_id,
                    run.experiment_id,
                    ts(run.created_at),
                    to_json(&run.config_json),
                ],
            )
            .map_err(store_err)?;
        Ok(())
    }

    pub fn get_benchmark_run(&self, id: &str) -> Result<Option<BenchmarkRun>> {
        self.conn()
            .query_row("SELECT * FROM benchmark_runs WHERE id = ?1", params![id], row_to_run)
            .optional()
            .map_err(store_err)
    }

    /// Writes every result row for a run atomically — a run is either fully
    /// recorded or not recorded at all, never half-populated.
    pub fn insert_benchmark_results(&self, results: &[BenchmarkResult]) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.unchecked_transaction().map_err(store_err)?;
        for r in results {
            tx.execute(
                "INSERT INTO benchmark_results (id, run_id, provider_key, model_id, context_tier,
                    run_ordinal, ttft_ms, total_time_s, output_tokens, input_tokens,
                    tokens_per_second, input_tokens_per_second, cost, success, error)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
                params![
                    r.id,
                    r.run_id,
                    r.provider_key,
                    r.model_id,
                    r.context_tier as i64,
                    r.run_ordinal as i64,
                    r.ttft_ms.map(|v| v as i64),
                    r.total_time_s,
                    r.output_tokens.map(|v| v as i64),
                    r.input_tokens.map(|v| v as i64),
                    r.tokens_per_second,
                    r.input_tokens_per_second,
                    r.cost,
                    r.success as i64,
                    r.error,
                ],
            )
            .map_err(store_err)?;
        }
        tx.commit().map_err(store_err)?;
        Ok(())
    }

    pub fn list_benchmark_results(&self, run_id: &str) -> Result<Vec<BenchmarkResult>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT * FROM benchmark_results WHERE run_id = ?1 ORDER BY provider_key, model_id, context_tier, run_ordinal")
            .map_err(store_err)?;
        let rows = stmt.query_map(params![run_id], row_to_result).map_err(store_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(store_err)
    }

    pub fn list_benchmark_runs_for_user(&self, user_id: &str) -> Result<Vec<BenchmarkRun>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT * FROM benchmark_runs WHERE user_id = ?1 ORDER BY created_at DESC")
            .map_err(store_err)?;
        let rows = stmt.query_map(params![user_id], row_to_run).map_err(store_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(store_err)
    }

    /// Results cascade via `ON DELETE CASCADE` on `benchmark_results.run_id`.
    pub fn delete_benchmark_run(&self, id: &str) -> Result<()> {
        self.conn()
            .execute("DELETE FROM benchmark_runs WHERE id = ?1", params![id])
            .map_err(store_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bg_domain::ids::new_id;
    use bg_domain::user::{Role, User};

    fn db_with_job() -> (Db, String, String) {
        let db = Db::open_in_memory().unwrap();
        let u = User::new("u@example.com", "h", Role::User);
        db.insert_user(&u).unwrap();
        let job = bg_domain::job::Job::new(&u.id, bg_domain::job::JobType::Benchmark, serde_json::json!({}), 60, "");
        db.insert_job(&job).unwrap();
        (db, u.id, job.id)
    }

    fn sample_result(run_id: &str) -> BenchmarkResult {
        BenchmarkResult {
            id: new_id(),
            run_id: run_id.to_string(),
            provider_key: "openai".into(),
            model_id: "gpt-4o".into(),
            context_tier: 1000,
            run_ordinal: 0,
            ttft_ms: Some(200),
            total_time_s: Some(2.0),
            output_tokens: Some(100),
            input_tokens: Some(1000),
            tokens_per_second: Some(50.0),
            input_tokens_per_second: Some(5000.0),
            cost: Some(0.01),
            success: true,
            error: None,
        }
    }

    #[test]
    fn run_and_results_round_trip() {
        let (db, user_id, job_id) = db_with_job();
        let run = BenchmarkRun {
            id: new_id(),
            user_id,
            job_id,
            experiment_id: None,
            created_at: chrono::Utc::now(),
            config_json: serde_json::json!({"tiers": [1000, 4000]}),
        };
        db.insert_benchmark_run(&run).unwrap();

        let results = vec![sample_result(&run.id), sample_result(&run.id)];
        db.insert_benchmark_results(&results).unwrap();

        let fetched = db.list_benchmark_results(&run.id).unwrap();
        assert_eq!(fetched.len(), 2);
        assert!(fetched[0].success);

        let fetched_run = db.get_benchmark_run(&run.id).unwrap().unwrap();
        assert_eq!(fetched_run.config_json["tiers"][1], 4000);
    }

    #[test]
    fn results_insert_is_all_or_nothing() {
        let (db, user_id, job_id) = db_with_job();
        let run = BenchmarkRun {
            id: new_id(),
            user_id,
            job_id,
            experiment_id: None,
            created_at: chrono::Utc::now(),
            config_json: serde_json::json!({}),
        };
        db.insert_benchmark_run(&run).unwrap();

        let mut bad = sample_result(&run.id);
        bad.run_id = "does-not-exist".into();
        let batch = vec![sample_result(&run.id), bad];
        assert!(db.insert_benchmark_results(&batch).is_err());
        assert!(db.list_benchmark_results(&run.id).unwrap().is_empty());
    }
}
