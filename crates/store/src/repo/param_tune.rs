//! Parameter-sweep run headers and their sampled combos.

use bg_domain::error::Result;
use bg_domain::param_tune::{ParamTuneCombo, ParamTuneRun};
use rusqlite::{params, OptionalExtension};

use crate::db::{store_err, Db};
use crate::util::{parse_ts, to_json, ts};

fn row_to_run(row: &rusqlite::Row<'_>) -> rusqlite::Result<ParamTuneRun> {
    let created_at: String = row.get("created_at")?;
    Ok(ParamTuneRun {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        job_id: row.get("job_id")?,
        experiment_id: row.get("experiment_id")?,
        provider_key: row.get("provider_key")?,
        model_id: row.get("model_id")?,
        search_strategy: row.get("search_strategy")?,
        objective: row.get("objective")?,
        prompt_text: row.get("prompt_text")?,
        created_at: parse_ts(&created_at).unwrap_or_else(|_| chrono::Utc::now()),
    })
}

fn row_to_combo(row: &rusqlite::Row<'_>) -> rusqlite::Result<ParamTuneCombo> {
    let params_json: String = row.get("params_json")?;
    Ok(ParamTuneCombo {
        id: row.get("id")?,
        run_id: row.get("run_id")?,
        params_json: serde_json::from_str(&params_json).unwrap_or(serde_json::Value::Null),
        objective_value: row.get("objective_value")?,
        ttft_ms: row.get::<_, Option<i64>>("ttft_ms")?.map(|v| v as u64),
        total_time_s: row.get("total_time_s")?,
        tokens_per_second: row.get("tokens_per_second")?,
        output_sample: row.get("output_sample")?,
        success: row.get::<_, i64>("success")? != 0,
        error: row.get("error")?,
        is_best: row.get::<_, i64>("is_best")? != 0,
    })
}

impl Db {
    pub fn insert_param_tune_run(&self, run: &ParamTuneRun) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO param_tune_runs (id, user_id, job_id, experiment_id, provider_key,
                    model_id, search_strategy, objective, prompt_text, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    run.id,
                    run.user_id,
                    run.job_id,
                    run.experiment_id,
                    run.provider_key,
                    run.model_id,
                    run.search_strategy,
                    run.objective,
                    run.prompt_text,
                    ts(run.created_at),
                ],
            )
            .map_err(store_err)?;
        Ok(())
    }

    pub fn list_param_tune_runs_for_experiment(&self, experiment_id: &str) -> Result<Vec<ParamTuneRun>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT * FROM param_tune_runs WHERE experiment_id = ?1 ORDER BY created_at")
            .map_err(store_err)?;
        let rows = stmt.query_map(params![experiment_id], row_to_run).map_err(store_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(store_err)
    }

    pub fn list_param_tune_runs_for_user(&self, user_id: &str) -> Result<Vec<ParamTuneRun>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT * FROM param_tune_runs WHERE user_id = ?1 ORDER BY created_at DESC")
            .map_err(store_err)?;
        let rows = stmt.query_map(params![user_id], row_to_run).map_err(store_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(store_err)
    }

    pub fn get_param_tune_run(&self, id: &str) -> Result<Option<ParamTuneRun>> {
        self.conn()
            .query_row("SELECT * FROM param_tune_runs WHERE id = ?1", params![id], row_to_run)
            .optional()
            .map_err(store_err)
    }

    pub fn insert_param_tune_combo(&self, combo: &ParamTuneCombo) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO param_tune_combos (id, run_id, params_json, objective_value, ttft_ms,
                    total_time_s, tokens_per_second, output_sample, success, error, is_best)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    combo.id,
                    combo.run_id,
                    to_json(&combo.params_json),
                    combo.objective_value,
                    combo.ttft_ms.map(|v| v as i64),
                    combo.total_time_s,
                    combo.tokens_per_second,
                    combo.output_sample,
                    combo.success as i64,
                    combo.error,
                    combo.is_best as i64,
                ],
            )
            .map_err(store_err)?;
        Ok(())
    }

    pub fn list_param_tune_combos(&self, run_id: &str) -> Result<Vec<ParamTuneCombo>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT * FROM param_tune_combos WHERE run_id = ?1 ORDER BY rowid")
            .map_err(store_err)?;
        let rows = stmt.query_map(params![run_id], row_to_combo).map_err(store_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(store_err)
    }

    /// Clears any previous winner and marks `combo_id` as the best, in one
    /// transaction so a run never momentarily has zero or two winners.
    /// Combos cascade via `ON DELETE CASCADE` on `param_tune_combos.run_id`.
    pub fn delete_param_tune_run(&self, id: &str) -> Result<()> {
        self.conn()
            .execute("DELETE FROM param_tune_runs WHERE id = ?1", params![id])
            .map_err(store_err)?;
        Ok(())
    }

    pub fn set_best_combo(&self, run_id: &str, combo_id: &str) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.unchecked_transaction().map_err(store_err)?;
        tx.execute(
            "UPDATE param_tune_combos SET is_best = 0 WHERE run_id = ?1",
            params![run_id],
        )
        .map_err(store_err)?;
        tx.execute(
            "UPDATE param_tune_combos SET is_best = 1 WHERE id = ?1",
            params![combo_id],
        )
        .map_err(store_err)?;
        tx.commit().map_err(store_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bg_domain::ids::new_id;
    use bg_domain::job::{Job, JobType};
    use bg_domain::user::{Role, User};

    fn db_with_run() -> (Db, ParamTuneRun) {
        let db = Db::open_in_memory().unwrap();
        let u = User::new("u@example.com", "h", Role::User);
        db.insert_user(&u).unwrap();
        let job = Job::new(&u.id, JobType::ParamTune, serde_json::json!({}), 60, "");
        db.insert_job(&job).unwrap();
        let run = ParamTuneRun {
            id: new_id(),
            user_id: u.id,
            job_id: job.id,
            experiment_id: None,
            provider_key: "openai".into(),
            model_id: "gpt-4o".into(),
            search_strategy: "grid".into(),
            objective: "tokens_per_second".into(),
            prompt_text: "summarize this".into(),
            created_at: chrono::Utc::now(),
        };
        db.insert_param_tune_run(&run).unwrap();
        (db, run)
    }

    fn combo(run_id: &str, objective_value: Option<f64>) -> ParamTuneCombo {
        ParamTuneCombo {
            id: new_id(),
            run_id: run_id.to_string(),
            params_json: serde_json::json!({"temperature": 0.7}),
            objective_value,
            ttft_ms: Some(100),
            total_time_s: Some(1.0),
            tokens_per_second: Some(50.0),
            output_sample: Some("sample".into()),
            success: true,
            error: None,
            is_best: false,
        }
    }

    #[test]
    fn combos_round_trip_and_list_in_order() {
        let (db, run) = db_with_run();
        let c1 = combo(&run.id, Some(1.0));
        let c2 = combo(&run.id, Some(2.0));
        db.insert_param_tune_combo(&c1).unwrap();
        db.insert_param_tune_combo(&c2).unwrap();

        let listed = db.list_param_tune_combos(&run.id).unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, c1.id);
    }

    #[test]
    fn set_best_combo_is_exclusive() {
        let (db, run) = db_with_run();
        let c1 = combo(&run.id, Some(1.0));
        let c2 = combo(&run.id, Some(2.0));
        db.insert_param_tune_combo(&c1).unwrap();
        db.insert_param_tune_combo(&c2).unwrap();

        db.set_best_combo(&run.id, &c1.id).unwrap();
        db.set_best_combo(&run.id, &c2.id).unwrap();

        let listed = db.list_param_tune_combos(&run.id).unwrap();
        let best: Vec<_> = listed.iter().filter(|c| c.is_best).collect();
        assert_eq!(best.len(), 1);
        assert_eq!(best[0].id, c2.id);
    }
}
