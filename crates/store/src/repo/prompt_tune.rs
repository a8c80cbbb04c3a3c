//! Evolutionary prompt-search run headers, generations, and candidates.

use bg_domain::error::Result;
use bg_domain::prompt_tune::{PromptTuneCandidate, PromptTuneGeneration, PromptTuneRun};
use rusqlite::{params, OptionalExtension};

use crate::db::{store_err, Db};
use crate::util::{parse_ts, ts};

fn row_to_run(row: &rusqlite::Row<'_>) -> rusqlite::Result<PromptTuneRun> {
    let created_at: String = row.get("created_at")?;
    Ok(PromptTuneRun {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        job_id: row.get("job_id")?,
        experiment_id: row.get("experiment_id")?,
        provider_key: row.get("provider_key")?,
        model_id: row.get("model_id")?,
        base_prompt: row.get("base_prompt")?,
        eval_criteria: row.get("eval_criteria")?,
        generations: row.get::<_, i64>("generations")? as u32,
        population_size: row.get::<_, i64>("population_size")? as u32,
        created_at: parse_ts(&created_at).unwrap_or_else(|_| chrono::Utc::now()),
    })
}

fn row_to_generation(row: &rusqlite::Row<'_>) -> rusqlite::Result<PromptTuneGeneration> {
    let created_at: String = row.get("created_at")?;
    Ok(PromptTuneGeneration {
        id: row.get("id")?,
        run_id: row.get("run_id")?,
        generation_index: row.get::<_, i64>("generation_index")? as u32,
        best_score: row.get("best_score")?,
        created_at: parse_ts(&created_at).unwrap_or_else(|_| chrono::Utc::now()),
    })
}

fn row_to_candidate(row: &rusqlite::Row<'_>) -> rusqlite::Result<PromptTuneCandidate> {
    Ok(PromptTuneCandidate {
        id: row.get("id")?,
        generation_id: row.get("generation_id")?,
        prompt_text: row.get("prompt_text")?,
        parent_candidate_id: row.get("parent_candidate_id")?,
        mutation_kind: row.get("mutation_kind")?,
        score: row.get("score")?,
        judge_rationale: row.get("judge_rationale")?,
        output_sample: row.get("output_sample")?,
        success: row.get::<_, i64>("success")? != 0,
        error: row.get("error")?,
        is_best_overall: row.get::<_, i64>("is_best_overall")? != 0,
    })
}

impl Db {
    pub fn insert_prompt_tune_run(&self, run: &PromptTuneRun) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO prompt_tune_runs (id, user_id, job_id, experiment_id, provider_key,
                    model_id, base_prompt, eval_criteria, generations, population_size, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    run.id,
                    run.user_id,
                    run.job_id,
                    run.experiment_id,
                    run.provider_key,
                    run.model_id,
                    run.base_prompt,
                    run.eval_criteria,
                    run.generations as i64,
                    run.population_size as i64,
                    ts(run.created_at),
                ],
            )
            .map_err(store_err)?;
        Ok(())
    }

    pub fn list_prompt_tune_runs_for_experiment(&self, experiment_id: &str) -> Result<Vec<PromptTuneRun>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT * FROM prompt_tune_runs WHERE experiment_id = ?1 ORDER BY created_at")
            .map_err(store_err)?;
        let rows = stmt.query_map(params![experiment_id], row_to_run).map_err(store_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(store_err)
    }

    pub fn list_prompt_tune_runs_for_user(&self, user_id: &str) -> Result<Vec<PromptTuneRun>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT * FROM prompt_tune_runs WHERE user_id = ?1 ORDER BY created_at DESC")
            .map_err(store_err)?;
        let rows = stmt.query_map(params![user_id], row_to_run).map_err(store_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(store_err)
    }

    pub fn get_prompt_tune_run(&self, id: &str) -> Result<Option<PromptTuneRun>> {
        self.conn()
            .query_row("SELECT * FROM prompt_tune_runs WHERE id = ?1", params![id], row_to_run)
            .optional()
            .map_err(store_err)
    }

    pub fn insert_prompt_tune_generation(&self, gen: &PromptTuneGeneration) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO prompt_tune_generations (id, run_id, generation_index, best_score, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![gen.id, gen.run_id, gen.generation_index as i64, gen.best_score, ts(gen.created_at)],
            )
            .map_err(store_err)?;
        Ok(())
    }

    pub fn set_generation_best_score(&self, generation_id: &str, best_score: Option<f64>) -> Result<()> {
        self.conn()
            .execute(
                "UPDATE prompt_tune_generations SET best_score = ?1 WHERE id = ?2",
                params![best_score, generation_id],
            )
            .map_err(store_err)?;
        Ok(())
    }

    pub fn list_prompt_tune_generations(&self, run_id: &str) -> Result<Vec<PromptTuneGeneration>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT * FROM prompt_tune_generations WHERE run_id = ?1 ORDER BY generation_index")
            .map_err(store_err)?;
        let rows = stmt.query_map(params![run_id], row_to_generation).map_err(store_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(store_err)
    }

    pub fn insert_prompt_tune_candidate(&self, candidate: &PromptTuneCandidate) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO prompt_tune_candidates (id, generation_id, prompt_text, parent_candidate_id,
                    mutation_kind, score, judge_rationale, output_sample, success, error, is_best_overall)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    candidate.id,
                    candidate.generation_id,
                    candidate.prompt_text,
                    candidate.parent_candidate_id,
                    candidate.mutation_kind,
                    candidate.score,
                    candidate.judge_rationale,
                    candidate.output_sample,
                    candidate.success as i64,
                    candidate.error,
                    candidate.is_best_overall as i64,
                ],
            )
            .map_err(store_err)?;
        Ok(())
    }

    pub fn list_prompt_tune_candidates(&self, generation_id: &str) -> Result<Vec<PromptTuneCandidate>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT * FROM prompt_tune_candidates WHERE generation_id = ?1 ORDER BY rowid")
            .map_err(store_err)?;
        let rows = stmt.query_map(params![generation_id], row_to_candidate).map_err(store_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(store_err)
    }

    /// Clears any previous winner across every generation of `run_id` and
    /// marks `candidate_id` as the best, in one transaction — same
    /// exclusive-winner shape as `set_best_combo`.
    /// Generations and candidates cascade via `ON DELETE CASCADE`.
    pub fn delete_prompt_tune_run(&self, id: &str) -> Result<()> {
        self.conn()
            .execute("DELETE FROM prompt_tune_runs WHERE id = ?1", params![id])
            .map_err(store_err)?;
        Ok(())
    }

    pub fn mark_best_overall_for_run(&self, run_id: &str, candidate_id: &str) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.unchecked_transaction().map_err(store_err)?;
        tx.execute(
            "UPDATE prompt_tune_candidates SET is_best_overall = 0
             WHERE generation_id IN (SELECT id FROM prompt_tune_generations WHERE run_id = ?1)",
            params![run_id],
        )
        .map_err(store_err)?;
        tx.execute(
            "UPDATE prompt_tune_candidates SET is_best_overall = 1 WHERE id = ?1",
            params![candidate_id],
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

    fn db_with_run() -> (Db, PromptTuneRun) {
        let db = Db::open_in_memory().unwrap();
        let u = User::new("u@example.com", "h", Role::User);
        db.insert_user(&u).unwrap();
        let job = Job::new(&u.id, JobType::PromptTune, serde_json::json!({}), 60, "");
        db.insert_job(&job).unwrap();
        let run = PromptTuneRun {
            id: new_id(),
            user_id: u.id,
            job_id: job.id,
            experiment_id: None,
            provider_key: "openai".into(),
            model_id: "gpt-4o".into(),
            base_prompt: "summarize".into(),
            eval_criteria: "clarity".into(),
            generations: 3,
            population_size: 4,
            created_at: chrono::Utc::now(),
        };
        db.insert_prompt_tune_run(&run).unwrap();
        (db, run)
    }

    #[test]
    fn generation_and_candidate_chain_round_trips() {
        let (db, run) = db_with_run();
        let gen0 = PromptTuneGeneration {
            id: new_id(),
            run_id: run.id.clone(),
            generation_index: 0,
            best_score: None,
            created_at: chrono::Utc::now(),
        };
        db.insert_prompt_tune_generation(&gen0).unwrap();

        let root = PromptTuneCandidate {
            id: new_id(),
            generation_id: gen0.id.clone(),
            prompt_text: "summarize briefly".into(),
            parent_candidate_id: None,
            mutation_kind: None,
            score: Some(0.6),
            judge_rationale: Some("decent".into()),
            output_sample: None,
            success: true,
            error: None,
            is_best_overall: false,
        };
        db.insert_prompt_tune_candidate(&root).unwrap();

        let child = PromptTuneCandidate {
            id: new_id(),
            generation_id: gen0.id.clone(),
            prompt_text: "summarize briefly, be concise".into(),
            parent_candidate_id: Some(root.id.clone()),
            mutation_kind: Some("expand".into()),
            score: Some(0.9),
            judge_rationale: None,
            output_sample: None,
            success: true,
            error: None,
            is_best_overall: false,
        };
        db.insert_prompt_tune_candidate(&child).unwrap();

        let listed = db.list_prompt_tune_candidates(&gen0.id).unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[1].parent_candidate_id.as_deref(), Some(root.id.as_str()));

        db.mark_best_overall_for_run(&run.id, &child.id).unwrap();
        let refreshed = db.list_prompt_tune_candidates(&gen0.id).unwrap();
        assert!(refreshed.iter().find(|c| c.id == child.id).unwrap().is_best_overall);
    }

    #[test]
    fn set_generation_best_score_updates_in_place() {
        let (db, run) = db_with_run();
        let gen0 = PromptTuneGeneration { id: new_id(), run_id: run.id.clone(), generation_index: 0, best_score: None, created_at: chrono::Utc::now() };
        db.insert_prompt_tune_generation(&gen0).unwrap();

        db.set_generation_best_score(&gen0.id, Some(0.75)).unwrap();
        let listed = db.list_prompt_tune_generations(&run.id).unwrap();
        assert_eq!(listed[0].best_score, Some(0.75));
    }

    #[test]
    fn mark_best_overall_is_exclusive_across_generations() {
        let (db, run) = db_with_run();
        let gen0 = PromptTuneGeneration { id: new_id(), run_id: run.id.clone(), generation_index: 0, best_score: None, created_at: chrono::Utc::now() };
        let gen1 = PromptTuneGeneration { id: new_id(), run_id: run.id.clone(), generation_index: 1, best_score: None, created_at: chrono::Utc::now() };
        db.insert_prompt_tune_generation(&gen0).unwrap();
        db.insert_prompt_tune_generation(&gen1).unwrap();

        let c0 = PromptTuneCandidate {
            id: new_id(), generation_id: gen0.id.clone(), prompt_text: "a".into(), parent_candidate_id: None,
            mutation_kind: None, score: Some(0.5), judge_rationale: None, output_sample: None, success: true, error: None, is_best_overall: false,
        };
        let c1 = PromptTuneCandidate {
            id: new_id(), generation_id: gen1.id.clone(), prompt_text: "b".into(), parent_candidate_id: None,
            mutation_kind: None, score: Some(0.9), judge_rationale: None, output_sample: None, success: true, error: None, is_best_overall: false,
        };
        db.insert_prompt_tune_candidate(&c0).unwrap();
        db.insert_prompt_tune_candidate(&c1).unwrap();

        db.mark_best_overall_for_run(&run.id, &c0.id).unwrap();
        db.mark_best_overall_for_run(&run.id, &c1.id).unwrap();

        let gen0_listed = db.list_prompt_tune_candidates(&gen0.id).unwrap();
        let gen1_listed = db.list_prompt_tune_candidates(&gen1.id).unwrap();
        assert!(!gen0_listed[0].is_best_overall);
        assert!(gen1_listed[0].is_best_overall);
    }

    #[test]
    fn deleting_parent_candidate_sets_child_ref_null() {
        let (db, run) = db_with_run();
        let gen0 = PromptTuneGeneration {
            id: new_id(),
            run_id: run.id.clone(),
            generation_index: 0,
            best_score: None,
            created_at: chrono::Utc::now(),
        };
        db.insert_prompt_tune_generation(&gen0).unwrap();

        let root = PromptTuneCandidate {
            id: new_id(),
            generation_id: gen0.id.clone(),
            prompt_text: "p".into(),
            parent_candidate_id: None,
            mutation_kind: None,
            score: None,
            judge_rationale: None,
            output_sample: None,
            success: true,
            error: None,
            is_best_overall: false,
        };
        db.insert_prompt_tune_candidate(&root).unwrap();
        let child = PromptTuneCandidate {
            id: new_id(),
            generation_id: gen0.id.clone(),
            prompt_text: "p2".into(),
            parent_candidate_id: Some(root.id.clone()),
            mutation_kind: None,
            score: None,
            judge_rationale: None,
            output_sample: None,
            success: true,
            error: None,
            is_best_overall: false,
        };
        db.insert_prompt_tune_candidate(&child).unwrap();

        db.conn().execute("DELETE FROM prompt_tune_candidates WHERE id = ?1", params![root.id]).unwrap();

        let remaining = db.list_prompt_tune_candidates(&gen0.id).unwrap();
        assert_eq!(remaining.len(), 1);
        assert!(remaining[0].parent_candidate_id.is_none());
    }
}
