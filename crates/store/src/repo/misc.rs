//! Smaller supporting tables that don't carry enough domain logic to
//! warrant their own module: rate limit overrides, schedules, model
//! profiles, prompt versions, and per-user judge defaults.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

use bg_domain::error::Result;

use crate::db::{store_err, Db};
use crate::util::{opt_ts, parse_ts, to_json, ts};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RateLimitOverride {
    pub user_id: String,
    pub benchmarks_per_hour: Option<i64>,
    pub max_concurrent: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    pub id: String,
    pub user_id: String,
    pub job_type: String,
    pub params_json: serde_json::Value,
    pub cron_expr: String,
    pub enabled: bool,
    pub last_run_at: Option<DateTime<Utc>>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelProfile {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub targets_json: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptVersion {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub prompt_text: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserJudgeSettings {
    pub user_id: String,
    pub default_judge_provider_key: Option<String>,
    pub default_judge_model_id: Option<String>,
    pub default_criteria: Option<String>,
}

fn row_to_rate_limit(row: &rusqlite::Row<'_>) -> rusqlite::Result<RateLimitOverride> {
    Ok(RateLimitOverride {
        user_id: row.get("user_id")?,
        benchmarks_per_hour: row.get("benchmarks_per_hour")?,
        max_concurrent: row.get("max_concurrent")?,
    })
}

fn row_to_schedule(row: &rusqlite::Row<'_>) -> rusqlite::Result<Schedule> {
    let params_json: String = row.get("params_json")?;
    let created_at: String = row.get("created_at")?;
    let last_run_at: Option<String> = row.get("last_run_at")?;
    let next_run_at: Option<String> = row.get("next_run_at")?;
    Ok(Schedule {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        job_type: row.get("job_type")?,
        params_json: serde_json::from_str(&params_json).unwrap_or(serde_json::Value::Null),
        cron_expr: row.get("cron_expr")?,
        enabled: row.get::<_, i64>("enabled")? != 0,
        last_run_at: last_run_at.and_then(|s| parse_ts(&s).ok()),
        next_run_at: next_run_at.and_then(|s| parse_ts(&s).ok()),
        created_at: parse_ts(&created_at).unwrap_or_else(|_| Utc::now()),
    })
}

fn row_to_model_profile(row: &rusqlite::Row<'_>) -> rusqlite::Result<ModelProfile> {
    let targets_json: String = row.get("targets_json")?;
    let created_at: String = row.get("created_at")?;
    Ok(ModelProfile {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        name: row.get("name")?,
        targets_json: serde_json::from_str(&targets_json).unwrap_or(serde_json::Value::Null),
        created_at: parse_ts(&created_at).unwrap_or_else(|_| Utc::now()),
    })
}

fn row_to_prompt_version(row: &rusqlite::Row<'_>) -> rusqlite::Result<PromptVersion> {
    let created_at: String = row.get("created_at")?;
    Ok(PromptVersion {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        name: row.get("name")?,
        prompt_text: row.get("prompt_text")?,
        created_at: parse_ts(&created_at).unwrap_or_else(|_| Utc::now()),
    })
}

fn row_to_judge_settings(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserJudgeSettings> {
    Ok(UserJudgeSettings {
        user_id: row.get("user_id")?,
        default_judge_provider_key: row.get("default_judge_provider_key")?,
        default_judge_model_id: row.get("default_judge_model_id")?,
        default_criteria: row.get("default_criteria")?,
    })
}

impl Db {
    pub fn get_rate_limit_override(&self, user_id: &str) -> Result<Option<RateLimitOverride>> {
        self.conn()
            .query_row(
                "SELECT * FROM rate_limits WHERE user_id = ?1",
                params![user_id],
                row_to_rate_limit,
            )
            .optional()
            .map_err(store_err)
    }

    pub fn set_rate_limit_override(&self, o: &RateLimitOverride) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO rate_limits (user_id, benchmarks_per_hour, max_concurrent) VALUES (?1, ?2, ?3)
                 ON CONFLICT(user_id) DO UPDATE SET benchmarks_per_hour = excluded.benchmarks_per_hour, max_concurrent = excluded.max_concurrent",
                params![o.user_id, o.benchmarks_per_hour, o.max_concurrent],
            )
            .map_err(store_err)?;
        Ok(())
    }

    pub fn insert_schedule(&self, s: &Schedule) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO schedules (id, user_id, job_type, params_json, cron_expr, enabled,
                    last_run_at, next_run_at, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    s.id,
                    s.user_id,
                    s.job_type,
                    to_json(&s.params_json),
                    s.cron_expr,
                    s.enabled as i64,
                    opt_ts(s.last_run_at),
                    opt_ts(s.next_run_at),
                    ts(s.created_at),
                ],
            )
            .map_err(store_err)?;
        Ok(())
    }

    pub fn list_schedules_for_user(&self, user_id: &str) -> Result<Vec<Schedule>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT * FROM schedules WHERE user_id = ?1 ORDER BY created_at")
            .map_err(store_err)?;
        let rows = stmt.query_map(params![user_id], row_to_schedule).map_err(store_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(store_err)
    }

    /// Enabled schedules whose `next_run_at` has passed — the scheduler's poll query.
    pub fn list_due_schedules(&self, now: DateTime<Utc>) -> Result<Vec<Schedule>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT * FROM schedules WHERE enabled = 1 AND next_run_at IS NOT NULL AND next_run_at <= ?1")
            .map_err(store_err)?;
        let rows = stmt.query_map(params![ts(now)], row_to_schedule).map_err(store_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(store_err)
    }

    pub fn mark_schedule_ran(&self, id: &str, ran_at: DateTime<Utc>, next_run_at: Option<DateTime<Utc>>) -> Result<()> {
        self.conn()
            .execute(
                "UPDATE schedules SET last_run_at = ?1, next_run_at = ?2 WHERE id = ?3",
                params![ts(ran_at), opt_ts(next_run_at), id],
            )
            .map_err(store_err)?;
        Ok(())
    }

    pub fn set_schedule_enabled(&self, id: &str, enabled: bool) -> Result<()> {
        self.conn()
            .execute(
                "UPDATE schedules SET enabled = ?1 WHERE id = ?2",
                params![enabled as i64, id],
            )
            .map_err(store_err)?;
        Ok(())
    }

    pub fn get_schedule(&self, id: &str) -> Result<Option<Schedule>> {
        self.conn()
            .query_row("SELECT * FROM schedules WHERE id = ?1", params![id], row_to_schedule)
            .optional()
            .map_err(store_err)
    }

    pub fn delete_schedule(&self, id: &str) -> Result<()> {
        self.conn()
            .execute("DELETE FROM schedules WHERE id = ?1", params![id])
            .map_err(store_err)?;
        Ok(())
    }

    pub fn insert_model_profile(&self, p: &ModelProfile) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO model_profiles (id, user_id, name, targets_json, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![p.id, p.user_id, p.name, to_json(&p.targets_json), ts(p.created_at)],
            )
            .map_err(store_err)?;
        Ok(())
    }

    pub fn list_model_profiles_for_user(&self, user_id: &str) -> Result<Vec<ModelProfile>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT * FROM model_profiles WHERE user_id = ?1 ORDER BY name")
            .map_err(store_err)?;
        let rows = stmt.query_map(params![user_id], row_to_model_profile).map_err(store_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(store_err)
    }

    pub fn delete_model_profile(&self, id: &str) -> Result<()> {
        self.conn()
            .execute("DELETE FROM model_profiles WHERE id = ?1", params![id])
            .map_err(store_err)?;
        Ok(())
    }

    pub fn insert_prompt_version(&self, p: &PromptVersion) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO prompt_versions (id, user_id, name, prompt_text, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![p.id, p.user_id, p.name, p.prompt_text, ts(p.created_at)],
            )
            .map_err(store_err)?;
        Ok(())
    }

    pub fn list_prompt_versions_for_user(&self, user_id: &str) -> Result<Vec<PromptVersion>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT * FROM prompt_versions WHERE user_id = ?1 ORDER BY created_at DESC")
            .map_err(store_err)?;
        let rows = stmt.query_map(params![user_id], row_to_prompt_version).map_err(store_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(store_err)
    }

    pub fn get_user_judge_settings(&self, user_id: &str) -> Result<Option<UserJudgeSettings>> {
        self.conn()
            .query_row(
                "SELECT * FROM user_judge_settings WHERE user_id = ?1",
                params![user_id],
                row_to_judge_settings,
            )
            .optional()
            .map_err(store_err)
    }

    pub fn set_user_judge_settings(&self, s: &UserJudgeSettings) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO user_judge_settings (user_id, default_judge_provider_key, default_judge_model_id, default_criteria)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(user_id) DO UPDATE SET
                    default_judge_provider_key = excluded.default_judge_provider_key,
                    default_judge_model_id = excluded.default_judge_model_id,
                    default_criteria = excluded.default_criteria",
                params![s.user_id, s.default_judge_provider_key, s.default_judge_model_id, s.default_criteria],
            )
            .map_err(store_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bg_domain::ids::new_id;
    use bg_domain::user::{Role, User};

    fn db_with_user() -> (Db, String) {
        let db = Db::open_in_memory().unwrap();
        let u = User::new("u@example.com", "h", Role::User);
        db.insert_user(&u).unwrap();
        (db, u.id)
    }

    #[test]
    fn rate_limit_override_upserts() {
        let (db, user_id) = db_with_user();
        assert!(db.get_rate_limit_override(&user_id).unwrap().is_none());

        db.set_rate_limit_override(&RateLimitOverride {
            user_id: user_id.clone(),
            benchmarks_per_hour: Some(50),
            max_concurrent: Some(2),
        })
        .unwrap();
        db.set_rate_limit_override(&RateLimitOverride {
            user_id: user_id.clone(),
            benchmarks_per_hour: Some(100),
            max_concurrent: Some(4),
        })
        .unwrap();

        let fetched = db.get_rate_limit_override(&user_id).unwrap().unwrap();
        assert_eq!(fetched.benchmarks_per_hour, Some(100));
        assert_eq!(fetched.max_concurrent, Some(4));
    }

    #[test]
    fn schedule_due_query_respects_enabled_and_time() {
        let (db, user_id) = db_with_user();
        let now = Utc::now();
        db.insert_schedule(&Schedule {
            id: new_id(),
            user_id: user_id.clone(),
            job_type: "benchmark".into(),
            params_json: serde_json::json!({}),
            cron_expr: "0 * * * *".into(),
            enabled: true,
            last_run_at: None,
            next_run_at: Some(now - chrono::Duration::minutes(1)),
            created_at: now,
        })
        .unwrap();
        db.insert_schedule(&Schedule {
            id: new_id(),
            user_id: user_id.clone(),
            job_type: "benchmark".into(),
            params_json: serde_json::json!({}),
            cron_expr: "0 * * * *".into(),
            enabled: false,
            last_run_at: None,
            next_run_at: Some(now - chrono::Duration::minutes(1)),
            created_at: now,
        })
        .unwrap();

        let due = db.list_due_schedules(now).unwrap();
        assert_eq!(due.len(), 1);
    }

    #[test]
    fn model_profile_and_prompt_version_round_trip() {
        let (db, user_id) = db_with_user();
        db.insert_model_profile(&ModelProfile {
            id: new_id(),
            user_id: user_id.clone(),
            name: "fast-tier".into(),
            targets_json: serde_json::json!([{"provider_key": "openai", "model_id": "gpt-4o"}]),
            created_at: Utc::now(),
        })
        .unwrap();
        assert_eq!(db.list_model_profiles_for_user(&user_id).unwrap().len(), 1);

        db.insert_prompt_version(&PromptVersion {
            id: new_id(),
            user_id: user_id.clone(),
            name: "v1".into(),
            prompt_text: "summarize concisely".into(),
            created_at: Utc::now(),
        })
        .unwrap();
        assert_eq!(db.list_prompt_versions_for_user(&user_id).unwrap().len(), 1);
    }

    #[test]
    fn judge_settings_upsert() {
        let (db, user_id) = db_with_user();
        db.set_user_judge_settings(&UserJudgeSettings {
            user_id: user_id.clone(),
            default_judge_provider_key: Some("openai".into()),
            default_judge_model_id: Some("gpt-4o".into()),
            default_criteria: Some("accuracy".into()),
        })
        .unwrap();

        let fetched = db.get_user_judge_settings(&user_id).unwrap().unwrap();
        assert_eq!(fetched.default_criteria.as_deref(), Some("accuracy"));
    }
}
