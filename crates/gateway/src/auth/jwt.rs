//! Access-token issuance and verification. HS256 over `JwtConfig.secret`,
//! carrying just enough to authorize a request without a DB round-trip:
//! `sub` (user id) and `role`. Refresh tokens are deliberately not JWTs —
//! they're opaque random strings, hashed before they ever touch disk, same
//! shape as `bg_store::repo::auth::RefreshToken`.

use bg_domain::config::JwtConfig;
use bg_domain::error::{Error, Result};
use bg_domain::user::{Role, User};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub role: String,
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
}

pub struct IssuedToken {
    pub token: String,
    pub expires_at: chrono::DateTime<chrono::Utc>,
}

pub fn issue_access_token(cfg: &JwtConfig, user: &User) -> Result<IssuedToken> {
    let now = chrono::Utc::now();
    let exp = now + chrono::Duration::seconds(cfg.access_token_ttl_secs);
    let claims = Claims {
        sub: user.id.clone(),
        role: user.role.as_str().to_string(),
        iss: cfg.issuer.clone(),
        iat: now.timestamp(),
        exp: exp.timestamp(),
    };
    let token = encode(&Header::default(), &claims, &EncodingKey::from_secret(cfg.secret.as_bytes()))
        .map_err(|e| Error::Internal(format!("failed to sign access token: {e}")))?;
    Ok(IssuedToken { token, expires_at: exp })
}

/// Verifies signature, expiry, and issuer. Role is trusted from the token
/// rather than re-fetched, matching the rest of this layer's "a valid
/// bearer token is the whole authorization decision" design.
pub fn verify_access_token(cfg: &JwtConfig, token: &str) -> Result<Claims> {
    let mut validation = Validation::new(jsonwebtoken::Algorithm::HS256);
    validation.set_issuer(&[cfg.issuer.clone()]);
    let data = decode::<Claims>(token, &DecodingKey::from_secret(cfg.secret.as_bytes()), &validation)
        .map_err(|e| Error::Auth(format!("invalid access token: {e}")))?;
    Ok(data.claims)
}

pub fn claims_role(claims: &Claims) -> Role {
    claims.role.parse().unwrap_or(Role::User)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> JwtConfig {
        let mut c = JwtConfig::default();
        c.secret = "test-secret".into();
        c.access_token_ttl_secs = 86400;
        c
    }

    #[test]
    fn round_trips() {
        let user = User::new("u@example.com", "h", Role::Admin);
        let issued = issue_access_token(&cfg(), &user).unwrap();
        let claims = verify_access_token(&cfg(), &issued.token).unwrap();
        assert_eq!(claims.sub, user.id);
        assert_eq!(claims_role(&claims), Role::Admin);
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let user = User::new("u@example.com", "h", Role::User);
        let issued = issue_access_token(&cfg(), &user).unwrap();
        let mut other = cfg();
        other.secret = "different".into();
        assert!(verify_access_token(&other, &issued.token).is_err());
    }
}
