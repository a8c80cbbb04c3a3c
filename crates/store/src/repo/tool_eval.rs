//! Tool suites (their definitions and test cases) and tool-eval run results.

use bg_domain::error::Result;
use bg_domain::tool_eval::{CaseResult, ToolDefinition, ToolEvalRun, ToolSuite, ToolTestCase};
use rusqlite::{params, OptionalExtension};

use crate::db::{store_err, Db};
use crate::util::{parse_ts, to_json, ts};

fn row_to_suite(row: &rusqlite::Row<'_>) -> rusqlite::Result<ToolSuite> {
    let created_at: String = row.get("created_at")?;
    Ok(ToolSuite {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        name: row.get("name")?,
        description: row.get("description")?,
        created_at: parse_ts(&created_at).unwrap_or_else(|_| chrono::Utc::now()),
    })
}

fn row_to_tool_def(row: &rusqlite::Row<'_>) -> rusqlite::Result<ToolDefinition> {
    let parameters_json: String = row.get("parameters_json")?;
    Ok(ToolDefinition {
        id: row.get("id")?,
        suite_id: row.get("suite_id")?,
        sort_order: row.get("sort_order")?,
        name: row.get("name")?,
        description: row.get("description")?,
        parameters_json: serde_json::from_str(&parameters_json).unwrap_or(serde_json::Value::Null),
    })
}

fn row_to_test_case(row: &rusqlite::Row<'_>) -> rusqlite::Result<ToolTestCase> {
    let expected_tool: String = row.get("expected_tool")?;
    let expected_params_json: Option<String> = row.get("expected_params_json")?;
    let param_scoring: String = row.get("param_scoring")?;
    let multi_turn_config_json: Option<String> = row.get("multi_turn_config_json")?;
    let scoring_config_json: Option<String> = row.get("scoring_config_json")?;
    Ok(ToolTestCase {
        id: row.get("id")?,
        suite_id: row.get("suite_id")?,
        prompt: row.get("prompt")?,
        expected_tool: serde_json::from_str(&expected_tool).unwrap_or(serde_json::Value::Null),
        expected_params_json: expected_params_json.map(|s| serde_json::from_str(&s).unwrap_or(serde_json::Value::Null)),
        param_scoring: param_scoring.parse().unwrap_or(bg_domain::tool_eval::ParamScoring::Exact),
        multi_turn_config_json: multi_turn_config_json.map(|s| serde_json::from_str(&s).unwrap_or(serde_json::Value::Null)),
        scoring_config_json: scoring_config_json.map(|s| serde_json::from_str(&s).unwrap_or(serde_json::Value::Null)),
        should_call_tool: row.get::<_, i64>("should_call_tool")? != 0,
        category: row.get("category")?,
    })
}

fn row_to_run(row: &rusqlite::Row<'_>) -> rusqlite::Result<ToolEvalRun> {
    let created_at: String = row.get("created_at")?;
    Ok(ToolEvalRun {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        job_id: row.get("job_id")?,
        suite_id: row.get("suite_id")?,
        experiment_id: row.get("experiment_id")?,
        created_at: parse_ts(&created_at).unwrap_or_else(|_| chrono::Utc::now()),
    })
}

fn row_to_case_result(row: &rusqlite::Row<'_>) -> rusqlite::Result<CaseResult> {
    let actual_params_json: Option<String> = row.get("actual_params_json")?;
    let raw_request: Option<String> = row.get("raw_request")?;
    let raw_response: Option<String> = row.get("raw_response")?;
    let tool_chain_json: Option<String> = row.get("tool_chain_json")?;
    Ok(CaseResult {
        id: row.get("id")?,
        run_id: row.get("run_id")?,
        test_case_id: row.get("test_case_id")?,
        provider_key: row.get("provider_key")?,
        model_id: row.get("model_id")?,
        tool_selection_score: row.get("tool_selection_score")?,
        param_accuracy: row.get("param_accuracy")?,
        overall_score: row.get("overall_score")?,
        irrelevance_score: row.get("irrelevance_score")?,
        actual_tool: row.get("actual_tool")?,
        actual_params_json: actual_params_json.map(|s| serde_json::from_str(&s).unwrap_or(serde_json::Value::Null)),
        success: row.get::<_, i64>("success")? != 0,
        error: row.get("error")?,
        latency_ms: row.get::<_, i64>("latency_ms")? as u64,
        raw_request: raw_request.map(|s| serde_json::from_str(&s).unwrap_or(serde_json::Value::Null)),
        raw_response: raw_response.map(|s| serde_json::from_str(&s).unwrap_or(serde_json::Value::Null)),
        completion_score: row.get("completion_score")?,
        efficiency_score: row.get("efficiency_score")?,
        redundancy_penalty: row.get("redundancy_penalty")?,
        detour_penalty: row.get("detour_penalty")?,
        tool_chain_json: tool_chain_json.map(|s| serde_json::from_str(&s).unwrap_or(serde_json::Value::Null)),
    })
}

impl Db {
    /// Inserts a suite with all of its tool definitions and test cases in one
    /// transaction — a suite is never visible half-populated.
    pub fn insert_tool_suite(
        &self,
        suite: &ToolSuite,
        tools: &[ToolDefinition],
        cases: &[ToolTestCase],
    ) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.unchecked_transaction().map_err(store_err)?;
        tx.execute(
            "INSERT INTO tool_suites (id, user_id, name, description, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![suite.id, suite.user_id, suite.name, suite.description, ts(suite.created_at)],
        )
        .map_err(store_err)?;
        for t in tools {
            tx.execute(
                "INSERT INTO tool_definitions (id, suite_id, sort_order, name, description, parameters_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![t.id, t.suite_id, t.sort_order, t.name, t.description, to_json(&t.parameters_json)],
            )
            .map_err(store_err)?;
        }
        for c in cases {
            tx.execute(
                "INSERT INTO tool_test_cases (id, suite_id, prompt, expected_tool, expected_params_json,
                    param_scoring, multi_turn_config_json, scoring_config_json, should_call_tool, category)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    c.id,
                    c.suite_id,
                    c.prompt,
                    to_json(&c.expected_tool),
                    c.expected_params_json.as_ref().map(to_json),
                    c.param_scoring.as_str(),
                    c.multi_turn_config_json.as_ref().map(to_json),
                    c.scoring_config_json.as_ref().map(to_json),
                    c.should_call_tool as i64,
                    c.category,
                ],
            )
            .map_err(store_err)?;
        }
        tx.commit().map_err(store_err)?;
        Ok(())
    }

    pub fn get_tool_suite(&self, id: &str) -> Result<Option<ToolSuite>> {
        self.conn()
            .query_row("SELECT * FROM tool_suites WHERE id = ?1", params![id], row_to_suite)
            .optional()
            .map_err(store_err)
    }

    pub fn list_tool_suites_for_user(&self, user_id: &str) -> Result<Vec<ToolSuite>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT * FROM tool_suites WHERE user_id = ?1 ORDER BY created_at")
            .map_err(store_err)?;
        let rows = stmt.query_map(params![user_id], row_to_suite).map_err(store_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(store_err)
    }

    pub fn list_tool_definitions(&self, suite_id: &str) -> Result<Vec<ToolDefinition>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT * FROM tool_definitions WHERE suite_id = ?1 ORDER BY sort_order")
            .map_err(store_err)?;
        let rows = stmt.query_map(params![suite_id], row_to_tool_def).map_err(store_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(store_err)
    }

    pub fn list_tool_test_cases(&self, suite_id: &str) -> Result<Vec<ToolTestCase>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT * FROM tool_test_cases WHERE suite_id = ?1")
            .map_err(store_err)?;
        let rows = stmt.query_map(params![suite_id], row_to_test_case).map_err(store_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(store_err)
    }

    pub fn delete_tool_suite(&self, suite_id: &str) -> Result<()> {
        self.conn()
            .execute("DELETE FROM tool_suites WHERE id = ?1", params![suite_id])
            .map_err(store_err)?;
        Ok(())
    }

    /// Case results cascade via `ON DELETE CASCADE` on `case_results.run_id`.
    pub fn delete_tool_eval_run(&self, id: &str) -> Result<()> {
        self.conn()
            .execute("DELETE FROM tool_eval_runs WHERE id = ?1", params![id])
            .map_err(store_err)?;
        Ok(())
    }

    pub fn insert_tool_eval_run(&self, run: &ToolEvalRun) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO tool_eval_runs (id, user_id, job_id, suite_id, experiment_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![run.id, run.user_id, run.job_id, run.suite_id, run.experiment_id, ts(run.created_at)],
            )
            .map_err(store_err)?;
        Ok(())
    }

    pub fn get_tool_eval_run(&self, id: &str) -> Result<Option<ToolEvalRun>> {
        self.conn()
            .query_row("SELECT * FROM tool_eval_runs WHERE id = ?1", params![id], row_to_run)
            .optional()
            .map_err(store_err)
    }

    pub fn list_tool_eval_runs_for_experiment(&self, experiment_id: &str) -> Result<Vec<ToolEvalRun>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT * FROM tool_eval_runs WHERE experiment_id = ?1 ORDER BY created_at")
            .map_err(store_err)?;
        let rows = stmt.query_map(params![experiment_id], row_to_run).map_err(store_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(store_err)
    }

    pub fn list_tool_eval_runs_for_user(&self, user_id: &str) -> Result<Vec<ToolEvalRun>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT * FROM tool_eval_runs WHERE user_id = ?1 ORDER BY created_at DESC")
            .map_err(store_err)?;
        let rows = stmt.query_map(params![user_id], row_to_run).map_err(store_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(store_err)
    }

    /// Writes every case result for a run atomically, same rationale as
    /// benchmark results: a run is either fully scored or not recorded.
    pub fn insert_case_results(&self, results: &[CaseResult]) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.unchecked_transaction().map_err(store_err)?;
        for r in results {
            tx.execute(
                "INSERT INTO case_results (id, run_id, test_case_id, provider_key, model_id,
                    tool_selection_score, param_accuracy, overall_score, irrelevance_score,
                    actual_tool, actual_params_json, success, error, latency_ms, raw_request,
                    raw_response, completion_score, efficiency_score, redundancy_penalty,
                    detour_penalty, tool_chain_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21)",
                params![
                    r.id,
                    r.run_id,
                    r.test_case_id,
                    r.provider_key,
                    r.model_id,
                    r.tool_selection_score,
                    r.param_accuracy,
                    r.overall_score,
                    r.irrelevance_score,
                    r.actual_tool,
                    r.actual_params_json.as_ref().map(to_json),
                    r.success as i64,
                    r.error,
                    r.latency_ms as i64,
                    r.raw_request.as_ref().map(to_json),
                    r.raw_response.as_ref().map(to_json),
                    r.completion_score,
                    r.efficiency_score,
                    r.redundancy_penalty,
                    r.detour_penalty,
                    r.tool_chain_json.as_ref().map(to_json),
                ],
            )
            .map_err(store_err)?;
        }
        tx.commit().map_err(store_err)?;
        Ok(())
    }

    pub fn list_case_results(&self, run_id: &str) -> Result<Vec<CaseResult>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT * FROM case_results WHERE run_id = ?1")
            .map_err(store_err)?;
        let rows = stmt.query_map(params![run_id], row_to_case_result).map_err(store_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(store_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bg_domain::ids::new_id;
    use bg_domain::job::{Job, JobType};
    use bg_domain::tool_eval::ParamScoring;
    use bg_domain::user::{Role, User};

    fn db_with_user() -> (Db, String) {
        let db = Db::open_in_memory().unwrap();
        let u = User::new("u@example.com", "h", Role::User);
        db.insert_user(&u).unwrap();
        (db, u.id)
    }

    fn sample_suite(user_id: &str) -> (ToolSuite, Vec<ToolDefinition>, Vec<ToolTestCase>) {
        let suite = ToolSuite {
            id: new_id(),
            user_id: user_id.to_string(),
            name: "basic".into(),
            description: None,
            created_at: chrono::Utc::now(),
        };
        let tool = ToolDefinition {
            id: new_id(),
            suite_id: suite.id.clone(),
            sort_order: 0,
            name: "search_web".into(),
            description: "search".into(),
            parameters_json: serde_json::json!({"type": "object"}),
        };
        let case = ToolTestCase {
            id: new_id(),
            suite_id: suite.id.clone(),
            prompt: "find cats".into(),
            expected_tool: serde_json::json!("search_web"),
            expected_params_json: None,
            param_scoring: ParamScoring::Exact,
            multi_turn_config_json: None,
            scoring_config_json: None,
            should_call_tool: true,
            category: None,
        };
        (suite, vec![tool], vec![case])
    }

    #[test]
    fn suite_with_tools_and_cases_round_trips() {
        let (db, user_id) = db_with_user();
        let (suite, tools, cases) = sample_suite(&user_id);
        db.insert_tool_suite(&suite, &tools, &cases).unwrap();

        let fetched_tools = db.list_tool_definitions(&suite.id).unwrap();
        assert_eq!(fetched_tools.len(), 1);
        let fetched_cases = db.list_tool_test_cases(&suite.id).unwrap();
        assert_eq!(fetched_cases.len(), 1);
        assert!(fetched_cases[0].matches_expected_tool("search_web"));
    }

    #[test]
    fn deleting_suite_cascades_to_tools_and_cases() {
        let (db, user_id) = db_with_user();
        let (suite, tools, cases) = sample_suite(&user_id);
        db.insert_tool_suite(&suite, &tools, &cases).unwrap();
        db.delete_tool_suite(&suite.id).unwrap();
        assert!(db.list_tool_definitions(&suite.id).unwrap().is_empty());
        assert!(db.list_tool_test_cases(&suite.id).unwrap().is_empty());
    }

    #[test]
    fn eval_run_and_case_results_round_trip() {
        let (db, user_id) = db_with_user();
        let (suite, tools, cases) = sample_suite(&user_id);
        db.insert_tool_suite(&suite, &tools, &cases).unwrap();

        let job = Job::new(&user_id, JobType::ToolEval, serde_json::json!({}), 60, "");
        db.insert_job(&job).unwrap();

        let run = ToolEvalRun {
            id: new_id(),
            user_id: user_id.clone(),
            job_id: job.id,
            suite_id: suite.id.clone(),
            experiment_id: None,
            created_at: chrono::Utc::now(),
        };
        db.insert_tool_eval_run(&run).unwrap();

        let result = CaseResult {
            id: new_id(),
            run_id: run.id.clone(),
            test_case_id: cases[0].id.clone(),
            provider_key: "openai".into(),
            model_id: "gpt-4o".into(),
            tool_selection_score: 1.0,
            param_accuracy: Some(0.8),
            overall_score: 0.8,
            irrelevance_score: None,
            actual_tool: Some("search_web".into()),
            actual_params_json: None,
            success: true,
            error: None,
            latency_ms: 500,
            raw_request: None,
            raw_response: None,
            completion_score: None,
            efficiency_score: None,
            redundancy_penalty: None,
            detour_penalty: None,
            tool_chain_json: None,
        };
        db.insert_case_results(&[result]).unwrap();

        let fetched = db.list_case_results(&run.id).unwrap();
        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched[0].overall_score, 0.8);
    }
}
