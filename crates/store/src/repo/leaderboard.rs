//! Public leaderboard: one row per model, updated by a weighted-average
//! upsert so concurrent writers never race a read-then-write.

use bg_domain::error::Result;
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::db::{store_err, Db};
use crate::util::{parse_ts, ts};

/// A public leaderboard row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub model_db_id: String,
    pub display_name: String,
    pub accuracy: f64,
    pub tokens_per_second: f64,
    pub ttft_ms: f64,
    pub sample_count: i64,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<LeaderboardEntry> {
    let updated_at: String = row.get("updated_at")?;
    Ok(LeaderboardEntry {
        model_db_id: row.get("model_db_id")?,
        display_name: row.get("display_name")?,
        accuracy: row.get("accuracy")?,
        tokens_per_second: row.get("tokens_per_second")?,
        ttft_ms: row.get("ttft_ms")?,
        sample_count: row.get("sample_count")?,
        updated_at: parse_ts(&updated_at).unwrap_or_else(|_| chrono::Utc::now()),
    })
}

impl Db {
    /// Merges `sample_count` new observations into the running weighted
    /// average for `model_db_id`, creating the row if absent. The update
    /// clause does the averaging in SQL so two concurrent upserts for the
    /// same model serialize through SQLite's writer lock instead of racing
    /// a separate read-modify-write.
    pub fn leaderboard_upsert(
        &self,
        model_db_id: &str,
        display_name: &str,
        accuracy: f64,
        tokens_per_second: f64,
        ttft_ms: f64,
        sample_count: i64,
    ) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO public_leaderboard_entries
                    (model_db_id, display_name, accuracy, tokens_per_second, ttft_ms, sample_count, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(model_db_id) DO UPDATE SET
                    display_name = excluded.display_name,
                    accuracy = (public_leaderboard_entries.accuracy * public_leaderboard_entries.sample_count
                        + excluded.accuracy * excluded.sample_count)
                        / (public_leaderboard_entries.sample_count + excluded.sample_count),
                    tokens_per_second = (public_leaderboard_entries.tokens_per_second * public_leaderboard_entries.sample_count
                        + excluded.tokens_per_second * excluded.sample_count)
                        / (public_leaderboard_entries.sample_count + excluded.sample_count),
                    ttft_ms = (public_leaderboard_entries.ttft_ms * public_leaderboard_entries.sample_count
                        + excluded.ttft_ms * excluded.sample_count)
                        / (public_leaderboard_entries.sample_count + excluded.sample_count),
                    sample_count = public_leaderboard_entries.sample_count + excluded.sample_count,
                    updated_at = excluded.updated_at",
                params![model_db_id, display_name, accuracy, tokens_per_second, ttft_ms, sample_count, ts(chrono::Utc::now())],
            )
            .map_err(store_err)?;
        Ok(())
    }

    pub fn get_leaderboard_entry(&self, model_db_id: &str) -> Result<Option<LeaderboardEntry>> {
        self.conn()
            .query_row(
                "SELECT * FROM public_leaderboard_entries WHERE model_db_id = ?1",
                params![model_db_id],
                row_to_entry,
            )
            .optional()
            .map_err(store_err)
    }

    pub fn list_leaderboard(&self) -> Result<Vec<LeaderboardEntry>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT * FROM public_leaderboard_entries ORDER BY accuracy DESC")
            .map_err(store_err)?;
        let rows = stmt.query_map([], row_to_entry).map_err(store_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(store_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bg_domain::user::{Model, Provider, Role, User};

    fn db_with_model() -> (Db, String) {
        let db = Db::open_in_memory().unwrap();
        let u = User::new("u@example.com", "h", Role::User);
        db.insert_user(&u).unwrap();
        let provider = Provider {
            id: bg_domain::ids::new_id(),
            user_id: u.id,
            key: "openai".into(),
            display_name: "OpenAI".into(),
            kind: "openai_compat".into(),
            api_base: None,
            created_at: chrono::Utc::now(),
        };
        db.insert_provider(&provider).unwrap();
        let model = Model {
            id: bg_domain::ids::new_id(),
            provider_id: provider.id,
            litellm_id: "gpt-4o".into(),
            display_name: "GPT-4o".into(),
            context_window: 128_000,
            max_output_tokens: None,
            skip_params: vec![],
        };
        db.insert_model(&model).unwrap();
        (db, model.id)
    }

    #[test]
    fn first_upsert_creates_row_verbatim() {
        let (db, model_id) = db_with_model();
        db.leaderboard_upsert(&model_id, "GPT-4o", 0.8, 50.0, 200.0, 10).unwrap();
        let entry = db.get_leaderboard_entry(&model_id).unwrap().unwrap();
        assert_eq!(entry.accuracy, 0.8);
        assert_eq!(entry.sample_count, 10);
    }

    #[test]
    fn second_upsert_weights_by_sample_count() {
        let (db, model_id) = db_with_model();
        db.leaderboard_upsert(&model_id, "GPT-4o", 0.8, 50.0, 200.0, 10).unwrap();
        db.leaderboard_upsert(&model_id, "GPT-4o", 0.6, 40.0, 250.0, 10).unwrap();

        let entry = db.get_leaderboard_entry(&model_id).unwrap().unwrap();
        assert_eq!(entry.sample_count, 20);
        assert!((entry.accuracy - 0.7).abs() < 1e-9);
        assert!((entry.tokens_per_second - 45.0).abs() < 1e-9);
    }

    #[test]
    fn sample_count_sums_regardless_of_order() {
        let (db1, model_id_1) = db_with_model();
        db1.leaderboard_upsert(&model_id_1, "GPT-4o", 0.8, 50.0, 200.0, 3).unwrap();
        db1.leaderboard_upsert(&model_id_1, "GPT-4o", 0.6, 40.0, 250.0, 7).unwrap();
        let forward = db1.get_leaderboard_entry(&model_id_1).unwrap().unwrap();

        let (db2, model_id_2) = db_with_model();
        db2.leaderboard_upsert(&model_id_2, "GPT-4o", 0.6, 40.0, 250.0, 7).unwrap();
        db2.leaderboard_upsert(&model_id_2, "GPT-4o", 0.8, 50.0, 200.0, 3).unwrap();
        let reversed = db2.get_leaderboard_entry(&model_id_2).unwrap().unwrap();

        assert_eq!(forward.sample_count, reversed.sample_count);
        assert!((forward.accuracy - reversed.accuracy).abs() < 1e-9);
    }
}
