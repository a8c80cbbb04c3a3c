//! Refresh tokens and password-reset tokens. Both tables only ever store a
//! hash of the token — the plaintext never reaches disk.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use bg_domain::error::Result;

use crate::db::{store_err, Db};
use crate::util::{opt_ts, parse_ts, ts};

#[derive(Debug, Clone)]
pub struct RefreshToken {
    pub id: String,
    pub user_id: String,
    pub token_hash: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct PasswordResetToken {
    pub id: String,
    pub user_id: String,
    pub token_hash: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
}

fn row_to_refresh(row: &rusqlite::Row<'_>) -> rusqlite::Result<RefreshToken> {
    let created_at: String = row.get("created_at")?;
    let expires_at: String = row.get("expires_at")?;
    let revoked_at: Option<String> = row.get("revoked_at")?;
    Ok(RefreshToken {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        token_hash: row.get("token_hash")?,
        created_at: parse_ts(&created_at).unwrap_or_else(|_| Utc::now()),
        expires_at: parse_ts(&expires_at).unwrap_or_else(|_| Utc::now()),
        revoked_at: revoked_at.and_then(|s| parse_ts(&s).ok()),
    })
}

fn row_to_reset(row: &rusqlite::Row<'_>) -> rusqlite::Result<PasswordResetToken> {
    let created_at: String = row.get("created_at")?;
    let expires_at: String = row.get("expires_at")?;
    let used_at: Option<String> = row.get("used_at")?;
    Ok(PasswordResetToken {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        token_hash: row.get("token_hash")?,
        created_at: parse_ts(&created_at).unwrap_or_else(|_| Utc::now()),
        expires_at: parse_ts(&expires_at).unwrap_or_else(|_| Utc::now()),
        used_at: used_at.and_then(|s| parse_ts(&s).ok()),
    })
}

impl Db {
    pub fn insert_refresh_token(&self, t: &RefreshToken) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO refresh_tokens (id, user_id, token_hash, created_at, expires_at, revoked_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![t.id, t.user_id, t.token_hash, ts(t.created_at), ts(t.expires_at), opt_ts(t.revoked_at)],
            )
            .map_err(store_err)?;
        Ok(())
    }

    pub fn get_refresh_token_by_hash(&self, token_hash: &str) -> Result<Option<RefreshToken>> {
        self.conn()
            .query_row(
                "SELECT * FROM refresh_tokens WHERE token_hash = ?1",
                params![token_hash],
                row_to_refresh,
            )
            .optional()
            .map_err(store_err)
    }

    pub fn revoke_refresh_token(&self, id: &str) -> Result<()> {
        self.conn()
            .execute(
                "UPDATE refresh_tokens SET revoked_at = ?1 WHERE id = ?2",
                params![ts(Utc::now()), id],
            )
            .map_err(store_err)?;
        Ok(())
    }

    /// Revokes every live refresh token for a user — used on password change
    /// and logout-everywhere.
    pub fn revoke_all_refresh_tokens(&self, user_id: &str) -> Result<usize> {
        let n = self
            .conn()
            .execute(
                "UPDATE refresh_tokens SET revoked_at = ?1 WHERE user_id = ?2 AND revoked_at IS NULL",
                params![ts(Utc::now()), user_id],
            )
            .map_err(store_err)?;
        Ok(n)
    }

    pub fn insert_password_reset_token(&self, t: &PasswordResetToken) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO password_reset_tokens (id, user_id, token_hash, created_at, expires_at, used_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![t.id, t.user_id, t.token_hash, ts(t.created_at), ts(t.expires_at), opt_ts(t.used_at)],
            )
            .map_err(store_err)?;
        Ok(())
    }

    pub fn get_password_reset_token_by_hash(&self, token_hash: &str) -> Result<Option<PasswordResetToken>> {
        self.conn()
            .query_row(
                "SELECT * FROM password_reset_tokens WHERE token_hash = ?1",
                params![token_hash],
                row_to_reset,
            )
            .optional()
            .map_err(store_err)
    }

    pub fn mark_password_reset_token_used(&self, id: &str) -> Result<()> {
        self.conn()
            .execute(
                "UPDATE password_reset_tokens SET used_at = ?1 WHERE id = ?2",
                params![ts(Utc::now()), id],
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
    use chrono::Duration;

    fn db_with_user() -> (Db, String) {
        let db = Db::open_in_memory().unwrap();
        let u = User::new("u@example.com", "h", Role::User);
        db.insert_user(&u).unwrap();
        (db, u.id)
    }

    #[test]
    fn refresh_token_round_trip_and_revoke() {
        let (db, user_id) = db_with_user();
        let t = RefreshToken {
            id: new_id(),
            user_id: user_id.clone(),
            token_hash: "hash1".into(),
            created_at: Utc::now(),
            expires_at: Utc::now() + Duration::days(30),
            revoked_at: None,
        };
        db.insert_refresh_token(&t).unwrap();

        let fetched = db.get_refresh_token_by_hash("hash1").unwrap().unwrap();
        assert!(fetched.revoked_at.is_none());

        db.revoke_refresh_token(&t.id).unwrap();
        let revoked = db.get_refresh_token_by_hash("hash1").unwrap().unwrap();
        assert!(revoked.revoked_at.is_some());
    }

    #[test]
    fn revoke_all_only_touches_live_tokens() {
        let (db, user_id) = db_with_user();
        for i in 0..3 {
            db.insert_refresh_token(&RefreshToken {
                id: new_id(),
                user_id: user_id.clone(),
                token_hash: format!("hash{i}"),
                created_at: Utc::now(),
                expires_at: Utc::now() + Duration::days(30),
                revoked_at: None,
            })
            .unwrap();
        }
        let n = db.revoke_all_refresh_tokens(&user_id).unwrap();
        assert_eq!(n, 3);
        assert_eq!(db.revoke_all_refresh_tokens(&user_id).unwrap(), 0);
    }

    #[test]
    fn password_reset_token_round_trip_and_use() {
        let (db, user_id) = db_with_user();
        let t = PasswordResetToken {
            id: new_id(),
            user_id,
            token_hash: "reset-hash".into(),
            created_at: Utc::now(),
            expires_at: Utc::now() + Duration::hours(1),
            used_at: None,
        };
        db.insert_password_reset_token(&t).unwrap();
        db.mark_password_reset_token_used(&t.id).unwrap();

        let fetched = db.get_password_reset_token_by_hash("reset-hash").unwrap().unwrap();
        assert!(fetched.used_at.is_some());
    }
}
