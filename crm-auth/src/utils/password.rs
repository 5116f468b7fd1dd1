use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use std::fmt;

use crate::config::PasswordHashConfig;

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

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Password(***)")
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

/// Argon2id hasher with fixed cost parameters.
///
/// Hashing and verification run on the blocking pool. `verify` never returns
/// an error: malformed hashes and internal failures count as a mismatch.
#[derive(Clone)]
pub struct CredentialHasher {
    argon2: Argon2<'static>,
    /// Hash of a random throwaway password, verified against when the account
    /// does not exist so both login paths pay the same cost.
    dummy_hash: String,
}

impl CredentialHasher {
    pub fn new(config: &PasswordHashConfig) -> Result<Self, anyhow::Error> {
        let params = Params::new(
            config.memory_kib,
            config.iterations,
            config.parallelism,
            None,
        )
        .map_err(|e| anyhow::anyhow!("Invalid Argon2 parameters: {}", e))?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

        let salt = SaltString::generate(&mut OsRng);
        let dummy_hash = argon2
            .hash_password(uuid::Uuid::new_v4().as_bytes(), &salt)
            .map_err(|e| anyhow::anyhow!("Failed to prepare dummy hash: {}", e))?
            .to_string();

        Ok(Self { argon2, dummy_hash })
    }

    fn hash_blocking(&self, password: &Password) -> Result<PasswordHashString, anyhow::Error> {
        let salt = SaltString::generate(&mut OsRng);

        let password_hash = self
            .argon2
            .hash_password(password.as_str().as_bytes(), &salt)
            .map_err(|e| anyhow::anyhow!("Failed to hash password: {}", e))?
            .to_string();

        Ok(PasswordHashString::new(password_hash))
    }

    fn verify_blocking(&self, password: &Password, password_hash: &str) -> bool {
        let parsed_hash = match PasswordHash::new(password_hash) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!(error = %e, "Stored password hash is malformed");
                return false;
            }
        };

        self.argon2
            .verify_password(password.as_str().as_bytes(), &parsed_hash)
            .is_ok()
    }

    /// Hash with a fresh random salt.
    pub async fn hash(&self, password: &Password) -> Result<PasswordHashString, anyhow::Error> {
        let hasher = self.clone();
        let password = password.clone();
        tokio::task::spawn_blocking(move || hasher.hash_blocking(&password))
            .await
            .map_err(|e| anyhow::anyhow!("Password hashing task failed: {}", e))?
    }

    pub async fn verify(&self, password: &Password, password_hash: &PasswordHashString) -> bool {
        let hasher = self.clone();
        let password = password.clone();
        let password_hash = password_hash.clone();
        match tokio::task::spawn_blocking(move || {
            hasher.verify_blocking(&password, password_hash.as_str())
        })
        .await
        {
            Ok(matched) => matched,
            Err(e) => {
                tracing::error!(error = %e, "Password verification task failed");
                false
            }
        }
    }

    /// Burns one verification worth of work and always reports a mismatch.
    pub async fn verify_against_dummy(&self, password: &Password) -> bool {
        let dummy = PasswordHashString::new(self.dummy_hash.clone());
        let _ = self.verify(password, &dummy).await;
        false
    }
}

/// Rules a new password must satisfy.
#[derive(Debug, Clone)]
pub struct PasswordPolicy {
    pub min_length: usize,
    pub require_uppercase: bool,
    pub require_lowercase: bool,
    pub require_digit: bool,
    pub require_symbol: bool,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self {
            min_length: 8,
            require_uppercase: true,
            require_lowercase: true,
            require_digit: true,
            require_symbol: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswordStrength {
    pub is_valid: bool,
    pub errors: Vec<String>,
}

impl PasswordPolicy {
    pub fn with_symbol(mut self) -> Self {
        self.require_symbol = true;
        self
    }

    /// Every violated rule, in a stable order.
    pub fn validate_strength(&self, password: &str) -> PasswordStrength {
        let mut errors = Vec::new();

        if password.chars().count() < self.min_length {
            errors.push(format!(
                "Password must be at least {} characters long",
                self.min_length
            ));
        }
        if self.require_uppercase && !password.chars().any(|c| c.is_uppercase()) {
            errors.push("Password must contain at least one uppercase letter".to_string());
        }
        if self.require_lowercase && !password.chars().any(|c| c.is_lowercase()) {
            errors.push("Password must contain at least one lowercase letter".to_string());
        }
        if self.require_digit && !password.chars().any(|c| c.is_ascii_digit()) {
            errors.push("Password must contain at least one number".to_string());
        }
        if self.require_symbol && password.chars().all(|c| c.is_alphanumeric()) {
            errors.push("Password must contain at least one special character".to_string());
        }

        PasswordStrength {
            is_valid: errors.is_empty(),
            errors,
        }
    }
}
