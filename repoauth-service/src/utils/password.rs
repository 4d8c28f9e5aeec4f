use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use std::fmt;

/// Plaintext password. `Debug` never prints the content.
#[derive(Clone)]
pub struct Password(String);

impl Password {
    pub fn new(password: String) -> Self {
        Self(password)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Password(<redacted>)")
    }
}

/// Stored password hash in PHC string format.
#[derive(Debug, Clone)]
pub struct PasswordHashString(String);

impl PasswordHashString {
    pub fn new(hash: String) -> Self {
        Self(hash)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

/// Hash a password with Argon2id and a fresh random salt.
pub fn hash_password(password: &Password) -> Result<PasswordHashString, anyhow::Error> {
    let salt = SaltString::generate(&mut OsRng);

    let password_hash = Argon2::default()
        .hash_password(password.as_str().as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("Failed to hash password: {}", e))?
        .to_string();

    Ok(PasswordHashString::new(password_hash))
}

/// Verify a password against a stored hash.
///
/// The salt and parameters come from the PHC string; the digest comparison
/// is constant-time.
pub fn verify_password(
    password: &Password,
    password_hash: &PasswordHashString,
) -> Result<(), anyhow::Error> {
    let parsed_hash = PasswordHash::new(password_hash.as_str())
        .map_err(|e| anyhow::anyhow!("Invalid password hash format: {}", e))?;

    Argon2::default()
        .verify_password(password.as_str().as_bytes(), &parsed_hash)
        .map_err(|_| anyhow::anyhow!("Password verification failed"))
}

/// Whether `hash` parses as a PHC string this service can verify against.
pub fn is_well_formed(hash: &str) -> bool {
    !hash.is_empty() && PasswordHash::new(hash).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_argon2_phc() {
        let password = Password::new("s3cret".to_string());
        let hash = hash_password(&password).unwrap();

        assert!(hash.as_str().starts_with("$argon2"));
        assert!(is_well_formed(hash.as_str()));
    }

    #[test]
    fn correct_password_verifies() {
        let password = Password::new("s3cret".to_string());
        let hash = hash_password(&password).unwrap();

        assert!(verify_password(&password, &hash).is_ok());
    }

    #[test]
    fn wrong_password_fails() {
        let hash = hash_password(&Password::new("s3cret".to_string())).unwrap();

        assert!(verify_password(&Password::new("wrong".to_string()), &hash).is_err());
    }

    #[test]
    fn salts_differ_between_hashes() {
        let password = Password::new("s3cret".to_string());
        let first = hash_password(&password).unwrap();
        let second = hash_password(&password).unwrap();

        assert_ne!(first.as_str(), second.as_str());
        assert!(verify_password(&password, &first).is_ok());
        assert!(verify_password(&password, &second).is_ok());
    }

    #[test]
    fn malformed_hashes_are_detected() {
        assert!(!is_well_formed(""));
        assert!(!is_well_formed("plaintext"));
        assert!(verify_password(
            &Password::new("x".to_string()),
            &PasswordHashString::new("plaintext".to_string())
        )
        .is_err());
    }

    #[test]
    fn debug_hides_plaintext() {
        let password = Password::new("hunter2".to_string());
        assert!(!format!("{:?}", password).contains("hunter2"));
    }
}
