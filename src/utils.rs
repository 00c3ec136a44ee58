use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::{DateTime, Utc};
use rand_core::OsRng;

use crate::errors::GateError;

const MIN_PASSWORD_LENGTH: usize = 8;

pub fn hash_password(password: &str) -> Result<String, GateError> {
    if password.len() < MIN_PASSWORD_LENGTH {
        return Err(GateError::internal(format!(
            "password must be at least {} characters",
            MIN_PASSWORD_LENGTH
        )));
    }

    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|err| GateError::internal(format!("failed to hash password: {err}")))
}

pub fn verify_password(password: &str, password_hash: &str) -> Result<bool, GateError> {
    let parsed_hash = PasswordHash::new(password_hash)
        .map_err(|err| GateError::internal(format!("invalid password hash: {err}")))?;

    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

/// True when a stored digest predates the argon2 rollout (legacy bcrypt or
/// bare sha variants) and should be re-hashed on the next successful login.
pub fn needs_upgrade(password_hash: &str) -> bool {
    !password_hash.starts_with("$argon2")
}

pub fn utc_now() -> DateTime<Utc> {
    Utc::now()
}
