//! Password hashing.
//!
//! Password hashing algorithm choice is an external collaborator this
//! platform's domain model treats as opaque (`User::password_hash` is just a
//! stored string, never interpreted by `bg_domain`/`bg_store`). No
//! password-hashing crate (bcrypt/argon2) lives in the workspace dependency
//! stack, so this builds an iterated HMAC-SHA256 derivation from `sha2` and
//! `hmac`, both already present for the store's token-hashing use. Salted,
//! constant-time compared on verify.

use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

const ITERATIONS: u32 = 100_000;
const SALT_BYTES: usize = 16;

fn derive(password: &str, salt_hex: &str) -> Vec<u8> {
    let mut block = {
        let mut mac = HmacSha256::new_from_slice(password.as_bytes()).expect("hmac accepts any key length");
        mac.update(salt_hex.as_bytes());
        mac.finalize().into_bytes().to_vec()
    };
    for _ in 1..ITERATIONS {
        let mut mac = HmacSha256::new_from_slice(password.as_bytes()).expect("hmac accepts any key length");
        mac.update(&block);
        block = mac.finalize().into_bytes().to_vec();
    }
    block
}

/// Produces `"<salt_hex>$<derived_hex>"`, ready to store in `User::password_hash`.
pub fn hash_password(password: &str) -> String {
    let mut salt = [0u8; SALT_BYTES];
    rand::thread_rng().fill_bytes(&mut salt);
    let salt_hex = hex::encode(salt);
    let derived = derive(password, &salt_hex);
    format!("{salt_hex}${}", hex::encode(derived))
}

/// Constant-time verification against a `"<salt_hex>$<derived_hex>"` hash.
pub fn verify_password(password: &str, stored: &str) -> bool {
    let Some((salt_hex, expected_hex)) = stored.split_once('$') else {
        return false;
    };
    let Ok(expected) = hex::decode(expected_hex) else {
        return false;
    };
    let actual = derive(password, salt_hex);
    actual.ct_eq(&expected).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let hash = hash_password("correct horse battery staple");
        assert!(verify_password("correct horse battery staple", &hash));
        assert!(!verify_password("wrong password", &hash));
    }

    #[test]
    fn same_password_hashes_differ_by_salt() {
        let a = hash_password("same");
        let b = hash_password("same");
        assert_ne!(a, b);
    }

    #[test]
    fn malformed_stored_hash_never_verifies() {
        assert!(!verify_password("anything", "not-a-valid-hash"));
    }
}
