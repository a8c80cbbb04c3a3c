//! Experiments: pure-domain mutation lives in `bg_domain::experiment`, this
//! module only persists the resulting rows.

use bg_domain::error::Result;
use bg_domain::experiment::Experiment;
use rusqlite::{params, OptionalExtension};

use crate::db::{store_err, Db};
use crate::util::{parse_ts, to_json, ts};

fn row_to_experiment(row: &rusqlite::Row<'_>) -> rusqlite::Result<Experiment> {
    let created_at: String = row.get("created_at")?;
    let best_config_json: Option<String> = row.get("best_config_json")?;
    let best_source: Option<String> = row.get("best_source")?;
    Ok(Experiment {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        name: row.get("name")?,
        suite_id: row.get("suite_id")?,
        baseline_run_id: row.get("baseline_run_id")?,
        baseline_score: row.get("baseline_score")?,
        best_score: row.get("best_score")?,
        best_config_json: best_config_json.map(|s| serde_json::from_str(&s).unwrap_or(serde_json::Value::Null)),
        best_source: best_source.and_then(|s| s.parse().ok()),
        best_source_id: row.get("best_source_id")?,
        created_at: parse_ts(&created_at).unwrap_or_else(|_| chrono::Utc::now()),
    })
}

impl Db {
    pub fn insert_experiment(&self, exp: &Experiment) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO experiments (id, user_id, name, suite_id, baseline_run_id, baseline_score,
                    best_score, best_config_json, best_source, best_source_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    exp.id,
                    exp.user_id,
                    exp.name,
                    exp.suite_id,
                    exp.baseline_run_id,
                    exp.baseline_score,
                    exp.best_score,
                    exp.best_config_json.as_ref().map(to_json),
                    exp.best_source.map(|s| s.as_str()),
                    exp.best_source_id,
                    ts(exp.created_at),
                ],
            )
            .map_err(store_err)?;
        Ok(())
    }

    pub fn get_experiment(&self, id: &str) -> Result<Option<Experiment>> {
        self.conn()
            .query_row("SELECT * FROM experiments WHERE id = ?1", params![id], row_to_experiment)
            .optional()
            .map_err(store_err)
    }

    pub fn list_experiments_for_user(&self, user_id: &str) -> Result<Vec<Experiment>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT * FROM experiments WHERE user_id = ?1 ORDER BY created_at DESC")
            .map_err(store_err)?;
        let rows = stmt.query_map(params![user_id], row_to_experiment).map_err(store_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(store_err)
    }

    /// Persists the baseline fields after a successful `Experiment::pin_baseline` call.
    pub fn update_baseline(&self, exp: &Experiment) -> Result<()> {
        self.conn()
            .execute(
                "UPDATE experiments SET baseline_run_id = ?1, baseline_score = ?2 WHERE id = ?3",
                params![exp.baseline_run_id, exp.baseline_score, exp.id],
            )
            .map_err(store_err)?;
        Ok(())
    }

    /// Persists the best-score fields after a successful `Experiment::maybe_update_best` call.
    pub fn update_best(&self, exp: &Experiment) -> Result<()> {
        self.conn()
            .execute(
                "UPDATE experiments SET best_score = ?1, best_config_json = ?2, best_source = ?3, best_source_id = ?4 WHERE id = ?5",
                params![
                    exp.best_score,
                    exp.best_config_json.as_ref().map(to_json),
                    exp.best_source.map(|s| s.as_str()),
                    exp.best_source_id,
                    exp.id,
                ],
            )
            .map_err(store_err)?;
        Ok(())
    }

    pub fn delete_experiment(&self, id: &str) -> Result<()> {
        self.conn()
            .execute("DELETE FROM experiments WHERE id = ?1", params![id])
            .map_err(store_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bg_domain::experiment::TimelineSource;
    use bg_domain::user::{Role, User};

    fn db_with_user() -> (Db, String) {
        let db = Db::open_in_memory().unwrap();
        let u = User::new("u@example.com", "h", Role::User);
        db.insert_user(&u).unwrap();
        (db, u.id)
    }

    #[test]
    fn insert_and_fetch_round_trip() {
        let (db, user_id) = db_with_user();
        let exp = Experiment::new(&user_id, "my experiment", "suite-1");
        db.insert_experiment(&exp).unwrap();

        let fetched = db.get_experiment(&exp.id).unwrap().unwrap();
        assert_eq!(fetched.name, "my experiment");
        assert!(fetched.best_source.is_none());
    }

    #[test]
    fn baseline_and_best_updates_persist() {
        let (db, user_id) = db_with_user();
        let mut exp = Experiment::new(&user_id, "exp", "suite-1");
        db.insert_experiment(&exp).unwrap();

        exp.pin_baseline("run-1", "suite-1", 0.5).unwrap();
        db.update_baseline(&exp).unwrap();

        exp.maybe_update_best(0.9, serde_json::json!({"temp": 0.7}), TimelineSource::ParamTune, "combo-1");
        db.update_best(&exp).unwrap();

        let fetched = db.get_experiment(&exp.id).unwrap().unwrap();
        assert_eq!(fetched.baseline_score, Some(0.5));
        assert_eq!(fetched.best_score, Some(0.9));
        assert_eq!(fetched.best_source, Some(TimelineSource::ParamTune));
        assert_eq!(fetched.best_source_id.as_deref(), Some("combo-1"));
        assert_eq!(fetched.best_config_json.unwrap()["temp"], 0.7);
    }

    #[test]
    fn list_for_user_orders_newest_first() {
        let (db, user_id) = db_with_user();
        let e1 = Experiment::new(&user_id, "first", "s1");
        db.insert_experiment(&e1).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let e2 = Experiment::new(&user_id, "second", "s1");
        db.insert_experiment(&e2).unwrap();

        let listed = db.list_experiments_for_user(&user_id).unwrap();
        assert_eq!(listed[0].id, e2.id);
    }
}
