use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    User,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::User => "user",
        }
    }
}

impl std::str::FromStr for Role {
    type Err = crate::error::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Role::Admin),
            "user" => Ok(Role::User),
            other => Err(crate::error::Error::Validation(format!("unknown role: {other}"))),
        }
    }
}

/// An account. `password_hash` is opaque — hashing itself is an external
/// collaborator; this crate only stores and compares it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub leaderboard_opt_in: bool,
    pub onboarding_completed: bool,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(email: impl Into<String>, password_hash: impl Into<String>, role: Role) -> Self {
        Self {
            id: crate::ids::new_id(),
            email: email.into().to_lowercase(),
            password_hash: password_hash.into(),
            role,
            leaderboard_opt_in: false,
            onboarding_completed: false,
            created_at: Utc::now(),
        }
    }
}

/// Normalized `(user_id, key) -> provider`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provider {
    pub id: String,
    pub user_id: String,
    pub key: String,
    pub display_name: String,
    pub kind: String,
    pub api_base: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Normalized `(provider_id, litellm_id) -> model`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Model {
    pub id: String,
    pub provider_id: String,
    pub litellm_id: String,
    pub display_name: String,
    pub context_window: u32,
    pub max_output_tokens: Option<u32>,
    pub skip_params: Vec<String>,
}

impl Model {
    /// A target is identified by `(provider_key, model_id)`, never by
    /// `model_id` alone — the same `model_id` can live under multiple
    /// providers. This is the cross-provider index key.
    pub fn target_key(provider_key: &str, model_id: &str) -> String {
        format!("{provider_key}::{model_id}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_user_lowercases_email_and_defaults() {
        let u = User::new("Foo@Example.com", "hash", Role::User);
        assert_eq!(u.email, "foo@example.com");
        assert!(!u.leaderboard_opt_in);
        assert!(!u.onboarding_completed);
        assert_eq!(u.role, Role::User);
    }

    #[test]
    fn target_key_is_compound() {
        let k1 = Model::target_key("openai", "gpt-4o");
        let k2 = Model::target_key("azure", "gpt-4o");
        assert_ne!(k1, k2, "same model_id under different providers must not collide");
    }

    #[test]
    fn role_round_trip() {
        assert_eq!("admin".parse::<Role>().unwrap(), Role::Admin);
        assert_eq!("user".parse::<Role>().unwrap(), Role::User);
        assert!("nope".parse::<Role>().is_err());
    }
}
