//! Password hashing with Argon2id (PHC string format).

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};

#[derive(Debug, thiserror::Error)]
pub enum PasswordError {
    #[error("Failed to hash password: {0}")]
    Hashing(String),
    #[error("Stored password hash is malformed: {0}")]
    MalformedHash(String),
}

/// Hash a password with a fresh random salt.
pub fn hash_password(password: &str) -> Result<String, PasswordError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| PasswordError::Hashing(e.to_string()))
}

/// Check a password against a stored PHC hash. A wrong password is `Ok(false)`.
pub fn verify_password(password: &str, stored_hash: &str) -> Result<bool, PasswordError> {
    let parsed =
        PasswordHash::new(stored_hash).map_err(|e| PasswordError::MalformedHash(e.to_string()))?;

    match Argon2::default().verify_password(password.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(PasswordError::Hashing(e.to_string())),
    }
}

/// Hash on the blocking pool so request tasks are not stalled.
pub async fn hash_password_blocking(password: String) -> Result<String, PasswordError> {
    tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .map_err(|e| PasswordError::Hashing(e.to_string()))?
}

pub async fn verify_password_blocking(
    password: String,
    stored_hash: String,
) -> Result<bool, PasswordError> {
    tokio::task::spawn_blocking(move || verify_password(&password, &stored_hash))
        .await
        .map_err(|e| PasswordError::Hashing(e.to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify() {
        let hash = hash_password("Secret1!").unwrap();
        assert!(hash.starts_with("$argon2id$"));

        assert!(verify_password("Secret1!", &hash).unwrap());
        assert!(!verify_password("secret1!", &hash).unwrap());
    }

    #[test]
    fn test_salted() {
        let first = hash_password("Secret1!").unwrap();
        let second = hash_password("Secret1!").unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn test_malformed_hash() {
        assert!(matches!(
            verify_password("Secret1!", "not-a-hash"),
            Err(PasswordError::MalformedHash(_))
        ));
    }

    #[tokio::test]
    async fn test_blocking_variants() {
        let hash = hash_password_blocking("Secret1!".into()).await.unwrap();
        assert!(verify_password_blocking("Secret1!".into(), hash).await.unwrap());
    }
}
