//! Per-user provider credentials and the models registered under them.

use bg_domain::error::Result;
use bg_domain::user::{Model, Provider};
use rusqlite::{params, OptionalExtension};

use crate::db::{store_err, Db};
use crate::util::{parse_ts, to_json, ts};

fn row_to_provider(row: &rusqlite::Row<'_>) -> rusqlite::Result<Provider> {
    let created_at: String = row.get("created_at")?;
    Ok(Provider {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        key: row.get("key")?,
        display_name: row.get("display_name")?,
        kind: row.get("kind")?,
        api_base: row.get("api_base")?,
        created_at: parse_ts(&created_at).unwrap_or_else(|_| chrono::Utc::now()),
    })
}

fn row_to_model(row: &rusqlite::Row<'_>) -> rusqlite::Result<Model> {
    let skip_params: String = row.get("skip_params")?;
    let skip_params: Vec<String> = serde_json::from_str(&skip_params).unwrap_or_default();
    Ok(Model {
        id: row.get("id")?,
        provider_id: row.get("provider_id")?,
        litellm_id: row.get("litellm_id")?,
        display_name: row.get("display_name")?,
        context_window: row.get::<_, i64>("context_window")? as u32,
        max_output_tokens: row.get::<_, Option<i64>>("max_output_tokens")?.map(|v| v as u32),
        skip_params,
    })
}

impl Db {
    pub fn insert_provider(&self, p: &Provider) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO providers (id, user_id, key, display_name, kind, api_base, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![p.id, p.user_id, p.key, p.display_name, p.kind, p.api_base, ts(p.created_at)],
            )
            .map_err(store_err)?;
        Ok(())
    }

    pub fn list_providers_for_user(&self, user_id: &str) -> Result<Vec<Provider>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT * FROM providers WHERE user_id = ?1 ORDER BY created_at")
            .map_err(store_err)?;
        let rows = stmt
            .query_map(params![user_id], row_to_provider)
            .map_err(store_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(store_err)
    }

    pub fn get_provider_by_key(&self, user_id: &str, key: &str) -> Result<Option<Provider>> {
        self.conn()
            .query_row(
                "SELECT * FROM providers WHERE user_id = ?1 AND key = ?2",
                params![user_id, key],
                row_to_provider,
            )
            .optional()
            .map_err(store_err)
    }

    pub fn delete_provider(&self, provider_id: &str) -> Result<()> {
        self.conn()
            .execute("DELETE FROM providers WHERE id = ?1", params![provider_id])
            .map_err(store_err)?;
        Ok(())
    }

    pub fn insert_model(&self, m: &Model) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO models (id, provider_id, litellm_id, display_name, context_window, max_output_tokens, skip_params)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    m.id,
                    m.provider_id,
                    m.litellm_id,
                    m.display_name,
                    m.context_window as i64,
                    m.max_output_tokens.map(|v| v as i64),
                    to_json(&serde_json::Value::from(m.skip_params.clone())),
                ],
            )
            .map_err(store_err)?;
        Ok(())
    }

    pub fn list_models_for_provider(&self, provider_id: &str) -> Result<Vec<Model>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT * FROM models WHERE provider_id = ?1 ORDER BY litellm_id")
            .map_err(store_err)?;
        let rows = stmt.query_map(params![provider_id], row_to_model).map_err(store_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(store_err)
    }

    pub fn get_model(&self, provider_id: &str, litellm_id: &str) -> Result<Option<Model>> {
        self.conn()
            .query_row(
                "SELECT * FROM models WHERE provider_id = ?1 AND litellm_id = ?2",
                params![provider_id, litellm_id],
                row_to_model,
            )
            .optional()
            .map_err(store_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bg_domain::user::{Role, User};

    fn db_with_user() -> (Db, String) {
        let db = Db::open_in_memory().unwrap();
        let u = User::new("u@example.com", "h", Role::User);
        db.insert_user(&u).unwrap();
        (db, u.id)
    }

    #[test]
    fn provider_and_model_round_trip() {
        let (db, user_id) = db_with_user();
        let provider = Provider {
            id: bg_domain::ids::new_id(),
            user_id: user_id.clone(),
            key: "openai".into(),
            display_name: "OpenAI".into(),
            kind: "openai_compat".into(),
            api_base: None,
            created_at: chrono::Utc::now(),
        };
        db.insert_provider(&provider).unwrap();

        let model = Model {
            id: bg_domain::ids::new_id(),
            provider_id: provider.id.clone(),
            litellm_id: "gpt-4o".into(),
            display_name: "GPT-4o".into(),
            context_window: 128_000,
            max_output_tokens: Some(16_384),
            skip_params: vec!["top_k".into()],
        };
        db.insert_model(&model).unwrap();

        let fetched = db.get_model(&provider.id, "gpt-4o").unwrap().unwrap();
        assert_eq!(fetched.context_window, 128_000);
        assert_eq!(fetched.skip_params, vec!["top_k".to_string()]);

        let found = db.get_provider_by_key(&user_id, "openai").unwrap().unwrap();
        assert_eq!(found.id, provider.id);
    }

    #[test]
    fn same_key_across_users_does_not_collide() {
        let db = Db::open_in_memory().unwrap();
        let u1 = User::new("a@example.com", "h", Role::User);
        let u2 = User::new("b@example.com", "h", Role::User);
        db.insert_user(&u1).unwrap();
        db.insert_user(&u2).unwrap();

        for u in [&u1, &u2] {
            db.insert_provider(&Provider {
                id: bg_domain::ids::new_id(),
                user_id: u.id.clone(),
                key: "openai".into(),
                display_name: "OpenAI".into(),
                kind: "openai_compat".into(),
                api_base: None,
                created_at: chrono::Utc::now(),
            })
            .unwrap();
        }

        assert!(db.get_provider_by_key(&u1.id, "openai").unwrap().is_some());
        assert!(db.get_provider_by_key(&u2.id, "openai").unwrap().is_some());
    }

    #[test]
    fn deleting_provider_cascades_to_models() {
        let (db, user_id) = db_with_user();
        let provider = Provider {
            id: bg_domain::ids::new_id(),
            user_id,
            key: "openai".into(),
            display_name: "OpenAI".into(),
            kind: "openai_compat".into(),
            api_base: None,
            created_at: chrono::Utc::now(),
        };
        db.insert_provider(&provider).unwrap();
        db.insert_model(&Model {
            id: bg_domain::ids::new_id(),
            provider_id: provider.id.clone(),
            litellm_id: "gpt-4o".into(),
            display_name: "GPT-4o".into(),
            context_window: 1000,
            max_output_tokens: None,
            skip_params: vec![],
        })
        .unwrap();

        db.delete_provider(&provider.id).unwrap();
        assert!(db.list_models_for_provider(&provider.id).unwrap().is_empty());
    }
}
