//! Audit trail: append-only, survives the account it describes
//! (`user_id` is the schema's sole SET NULL exception).

use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::{Deserialize, Serialize};

use bg_domain::error::Result;

use crate::db::{store_err, Db};
use crate::util::{parse_ts, to_json, ts};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: String,
    pub user_id: Option<String>,
    pub action: String,
    pub detail_json: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<AuditEntry> {
    let created_at: String = row.get("created_at")?;
    let detail_json: Option<String> = row.get("detail_json")?;
    Ok(AuditEntry {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        action: row.get("action")?,
        detail_json: detail_json.map(|s| serde_json::from_str(&s).unwrap_or(serde_json::Value::Null)),
        created_at: parse_ts(&created_at).unwrap_or_else(|_| Utc::now()),
    })
}

impl Db {
    pub fn insert_audit_entry(&self, entry: &AuditEntry) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO audit_log (id, user_id, action, detail_json, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![entry.id, entry.user_id, entry.action, entry.detail_json.as_ref().map(to_json), ts(entry.created_at)],
            )
            .map_err(store_err)?;
        Ok(())
    }

    pub fn list_audit_entries_for_user(&self, user_id: &str, limit: u32) -> Result<Vec<AuditEntry>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT * FROM audit_log WHERE user_id = ?1 ORDER BY created_at DESC LIMIT ?2")
            .map_err(store_err)?;
        let rows = stmt
            .query_map(params![user_id, limit], row_to_entry)
            .map_err(store_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(store_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bg_domain::ids::new_id;
    use bg_domain::user::{Role, User};

    #[test]
    fn entry_survives_user_deletion() {
        let db = Db::open_in_memory().unwrap();
        let u = User::new("u@example.com", "h", Role::User);
        db.insert_user(&u).unwrap();

        let entry = AuditEntry {
            id: new_id(),
            user_id: Some(u.id.clone()),
            action: "login".into(),
            detail_json: Some(serde_json::json!({"ip": "127.0.0.1"})),
            created_at: Utc::now(),
        };
        db.insert_audit_entry(&entry).unwrap();

        db.delete_user(&u.id).unwrap();

        let entries = db.list_audit_entries_for_user(&u.id, 10).unwrap();
        // FK is SET NULL, so the row is orphaned, not gone — but it no
        // longer matches a `user_id` filter on the deleted id.
        assert!(entries.is_empty());

        let conn = db.conn();
        let remaining: i64 = conn.query_row("SELECT COUNT(*) FROM audit_log", [], |r| r.get(0)).unwrap();
        assert_eq!(remaining, 1);
    }

    #[test]
    fn list_respects_limit_and_order() {
        let db = Db::open_in_memory().unwrap();
        let u = User::new("u@example.com", "h", Role::User);
        db.insert_user(&u).unwrap();

        for i in 0..5 {
            db.insert_audit_entry(&AuditEntry {
                id: new_id(),
                user_id: Some(u.id.clone()),
                action: format!("action-{i}"),
                detail_json: None,
                created_at: Utc::now() + chrono::Duration::seconds(i),
            })
            .unwrap();
        }

        let entries = db.list_audit_entries_for_user(&u.id, 3).unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].action, "action-4");
    }
}
