//! Salted password hashing.
//!
//! Each user gets a fresh random salt; the stored hash is raw Argon2id output
//! for `(password, salt)`.  Salt and hash are kept as separate hex columns so
//! the legacy user list can be imported verbatim.

use argon2::Argon2;
use rand::RngCore;
use subtle::ConstantTimeEq;

use crate::error::ServerError;

const SALT_LEN: usize = 16;
const HASH_LEN: usize = 32;

/// Salt and derived hash, both hex encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswordDigest {
    pub salt_hex: String,
    pub hash_hex: String,
}

/// Hash `password` under a fresh random salt.
pub fn hash_password(password: &str) -> Result<PasswordDigest, ServerError> {
    let mut salt = [0u8; SALT_LEN];
    rand::rngs::OsRng.fill_bytes(&mut salt);

    let hash = derive(password, &salt)?;
    Ok(PasswordDigest {
        salt_hex: hex::encode(salt),
        hash_hex: hex::encode(hash),
    })
}

/// Check `password` against a stored salt/hash pair.
///
/// Undecodable stored values are treated as a mismatch.
pub fn verify_password(password: &str, salt_hex: &str, hash_hex: &str) -> bool {
    let (Ok(salt), Ok(expected)) = (hex::decode(salt_hex), hex::decode(hash_hex)) else {
        return false;
    };
    match derive(password, &salt) {
        Ok(actual) => constant_time_eq(&actual, &expected),
        Err(_) => false,
    }
}

/// Constant-time equality.  Buffers of different length are unequal without
/// comparing any bytes.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).unwrap_u8() == 1
}

fn derive(password: &str, salt: &[u8]) -> Result<[u8; HASH_LEN], ServerError> {
    let mut out = [0u8; HASH_LEN];
    Argon2::default()
        .hash_password_into(password.as_bytes(), salt, &mut out)
        .map_err(|e| ServerError::Internal(format!("Password hashing failed: {e}")))?;
    Ok(out)
}
