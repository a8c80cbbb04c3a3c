//! User accounts and the per-user override rows that hang off them.

use bg_domain::error::Result;
use bg_domain::user::{Role, User};
use rusqlite::{params, OptionalExtension};

use crate::db::{store_err, Db};
use crate::util::{parse_ts, ts};

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    let role: String = row.get("role")?;
    let created_at: String = row.get("created_at")?;
    Ok(User {
        id: row.get("id")?,
        email: row.get("email")?,
        password_hash: row.get("password_hash")?,
        role: role.parse().unwrap_or(Role::User),
        leaderboard_opt_in: row.get::<_, i64>("leaderboard_opt_in")? != 0,
        onboarding_completed: row.get::<_, i64>("onboarding_completed")? != 0,
        created_at: parse_ts(&created_at).unwrap_or_else(|_| chrono::Utc::now()),
    })
}

impl Db {
    pub fn insert_user(&self, user: &User) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO users (id, email, password_hash, role, leaderboard_opt_in, onboarding_completed, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    user.id,
                    user.email,
                    user.password_hash,
                    user.role.as_str(),
                    user.leaderboard_opt_in as i64,
                    user.onboarding_completed as i64,
                    ts(user.created_at),
                ],
            )
            .map_err(store_err)?;
        Ok(())
    }

    pub fn get_user(&self, id: &str) -> Result<Option<User>> {
        self.conn()
            .query_row("SELECT * FROM users WHERE id = ?1", params![id], row_to_user)
            .optional()
            .map_err(store_err)
    }

    /// Emails are stored lowercase (`User::new` normalizes); lookup matches
    /// case-insensitively by lowercasing the query side too.
    pub fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        self.conn()
            .query_row(
                "SELECT * FROM users WHERE email = ?1",
                params![email.to_lowercase()],
                row_to_user,
            )
            .optional()
            .map_err(store_err)
    }

    pub fn set_leaderboard_opt_in(&self, user_id: &str, opt_in: bool) -> Result<()> {
        self.conn()
            .execute(
                "UPDATE users SET leaderboard_opt_in = ?1 WHERE id = ?2",
                params![opt_in as i64, user_id],
            )
            .map_err(store_err)?;
        Ok(())
    }

    pub fn set_onboarding_completed(&self, user_id: &str) -> Result<()> {
        self.conn()
            .execute(
                "UPDATE users SET onboarding_completed = 1 WHERE id = ?1",
                params![user_id],
            )
            .map_err(store_err)?;
        Ok(())
    }

    pub fn update_password_hash(&self, user_id: &str, password_hash: &str) -> Result<()> {
        self.conn()
            .execute(
                "UPDATE users SET password_hash = ?1 WHERE id = ?2",
                params![password_hash, user_id],
            )
            .map_err(store_err)?;
        Ok(())
    }

    /// Deleting a user cascades through every owned table via FK CASCADE;
    /// `audit_log.user_id` is the sole SET NULL exception.
    pub fn delete_user(&self, user_id: &str) -> Result<()> {
        self.conn()
            .execute("DELETE FROM users WHERE id = ?1", params![user_id])
            .map_err(store_err)?;
        Ok(())
    }

    pub fn count_users(&self) -> Result<i64> {
        self.conn()
            .query_row("SELECT COUNT(*) FROM users", [], |r| r.get(0))
            .map_err(store_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db() -> Db {
        Db::open_in_memory().unwrap()
    }

    #[test]
    fn insert_and_fetch_round_trip() {
        let db = db();
        let u = User::new("Foo@Example.com", "hash", Role::Admin);
        db.insert_user(&u).unwrap();

        let fetched = db.get_user(&u.id).unwrap().unwrap();
        assert_eq!(fetched.email, "foo@example.com");
        assert_eq!(fetched.role, Role::Admin);

        let by_email = db.get_user_by_email("FOO@example.com").unwrap().unwrap();
        assert_eq!(by_email.id, u.id);
    }

    #[test]
    fn missing_user_is_none() {
        let db = db();
        assert!(db.get_user("nope").unwrap().is_none());
    }

    #[test]
    fn email_uniqueness_is_enforced_at_storage_layer() {
        let db = db();
        let u1 = User::new("dup@example.com", "h1", Role::User);
        let mut u2 = User::new("dup@example.com", "h2", Role::User);
        u2.id = bg_domain::ids::new_id();
        db.insert_user(&u1).unwrap();
        assert!(db.insert_user(&u2).is_err());
    }

    #[test]
    fn delete_user_cascades() {
        let db = db();
        let u = User::new("gone@example.com", "h", Role::User);
        db.insert_user(&u).unwrap();
        db.delete_user(&u.id).unwrap();
        assert!(db.get_user(&u.id).unwrap().is_none());
    }

    #[test]
    fn role_check_constraint_rejects_invalid_role() {
        let db = db();
        let err = db
            .conn()
            .execute(
                "INSERT INTO users (id, email, password_hash, role, created_at) VALUES ('x','x@x.com','h','superuser', '2024-01-01T00:00:00Z')",
                [],
            )
            .unwrap_err();
        assert!(err.to_string().contains("CHECK"));
    }
}
