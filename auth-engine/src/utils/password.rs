use bcrypt::DEFAULT_COST;

/// Newtype for password to prevent accidental logging
#[derive(Clone)]
pub struct Password(String);

impl Password {
    pub fn new(password: String) -> Self {
        Self(password)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Password {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Password(<redacted>)")
    }
}

/// Newtype for password hash
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

/// Hash a password using bcrypt.
///
/// Salt is generated per call and embedded in the resulting hash string.
pub fn hash_password(password: &Password) -> Result<PasswordHashString, anyhow::Error> {
    let hash = bcrypt::hash(password.as_str(), DEFAULT_COST)
        .map_err(|e| anyhow::anyhow!("Failed to hash password: {}", e))?;

    Ok(PasswordHashString::new(hash))
}

/// Verify a password against a stored bcrypt hash.
///
/// Returns Ok(()) if the password matches, Err otherwise.
pub fn verify_password(
    password: &Password,
    password_hash: &PasswordHashString,
) -> Result<(), anyhow::Error> {
    match bcrypt::verify(password.as_str(), password_hash.as_str()) {
        Ok(true) => Ok(()),
        Ok(false) => Err(anyhow::anyhow!("Password verification failed")),
        Err(e) => Err(anyhow::anyhow!("Invalid password hash format: {}", e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_password() {
        let password = Password::new("mySecurePassword123".to_string());
        let hash = hash_password(&password).expect("Failed to hash password");

        assert!(!hash.as_str().is_empty());
        assert!(hash.as_str().starts_with("$2"));
    }

    #[test]
    fn test_verify_password_correct() {
        let password = Password::new("mySecurePassword123".to_string());
        let hash = hash_password(&password).expect("Failed to hash password");

        assert!(verify_password(&password, &hash).is_ok());
    }

    #[test]
    fn test_verify_password_incorrect() {
        let password = Password::new("mySecurePassword123".to_string());
        let hash = hash_password(&password).expect("Failed to hash password");

        let wrong_password = Password::new("wrongPassword".to_string());

        assert!(verify_password(&wrong_password, &hash).is_err());
    }

    #[test]
    fn test_debug_never_prints_password() {
        let password = Password::new("topsecret".to_string());
        assert!(!format!("{:?}", password).contains("topsecret"));
    }
}
