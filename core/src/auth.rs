use rand::Rng;
use sha2::{Digest, Sha256};

pub const API_KEY_PREFIX: &str = "hth_sk_";

const KEY_BYTES: usize = 32;
const DISPLAY_PREFIX_LEN: usize = 8;

/// A fresh `hth_sk_<64 hex>` key and the sha256 hash that gets stored.
/// Only the hash is persisted; the key is shown once.
pub fn generate_api_key() -> (String, String) {
    let mut secret = [0u8; KEY_BYTES];
    rand::thread_rng().fill(&mut secret);
    let full_key = format!("{API_KEY_PREFIX}{}", hex::encode(secret));
    let hash = hash_token(&full_key);
    (full_key, hash)
}

pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// The characters after `hth_sk_` that identify a key in listings. Empty for
/// tokens that are not Hearth keys.
pub fn key_prefix(full_key: &str) -> String {
    full_key
        .strip_prefix(API_KEY_PREFIX)
        .map(|rest| rest.chars().take(DISPLAY_PREFIX_LEN).collect())
        .unwrap_or_default()
}
