//! Password hashing
//!
//! PBKDF2-HMAC-SHA256 with a 32-byte output.
//! Stored form: `pbkdf2_sha256$<iterations>$<salt hex>$<hash hex>`.

use pbkdf2::pbkdf2_hmac_array;
use rand::RngCore;
use sha2::Sha256;

use crate::types::AppResult;

const SCHEME: &str = "pbkdf2_sha256";
pub const DEFAULT_ITERATIONS: u32 = 100_000;
const SALT_LEN: usize = 16;

fn derive(password: &[u8], salt: &[u8], iterations: u32) -> [u8; 32] {
    pbkdf2_hmac_array::<Sha256, 32>(password, salt, iterations)
}

pub fn hash_password(password: &str) -> AppResult<String> {
    hash_password_with(password, DEFAULT_ITERATIONS)
}

pub fn hash_password_with(password: &str, iterations: u32) -> AppResult<String> {
    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    let hash = derive(password.as_bytes(), &salt, iterations.max(1));
    Ok(format!(
        "{}${}${}${}",
        SCHEME,
        iterations.max(1),
        hex::encode(salt),
        hex::encode(hash)
    ))
}

/// Check `password` against a stored hash. Malformed hashes never verify.
pub fn verify_password(password: &str, stored: &str) -> bool {
    let parts: Vec<&str> = stored.split('$').collect();
    let [scheme, iterations, salt, expected] = parts.as_slice() else {
        return false;
    };
    if *scheme != SCHEME {
        return false;
    }
    let (Ok(iterations), Ok(salt), Ok(expected)) = (
        iterations.parse::<u32>(),
        hex::decode(salt),
        hex::decode(expected),
    ) else {
        return false;
    };

    let actual = derive(password.as_bytes(), &salt, iterations.max(1));
    constant_time_compare(&actual, &expected)
}

/// Byte comparison whose running time does not depend on where the inputs differ
pub fn constant_time_compare(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut result = 0u8;
    for (byte_a, byte_b) in a.iter().zip(b.iter()) {
        result |= byte_a ^ byte_b;
    }
    result == 0
}
