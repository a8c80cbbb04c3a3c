//! Opaque bearer tokens for refresh sessions and password resets. Only a
//! SHA-256 hash of the token ever reaches `bg_store` — the plaintext is
//! handed to the client once and never persisted.

use rand::RngCore;
use sha2::{Digest, Sha256};

pub fn generate_opaque_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}
