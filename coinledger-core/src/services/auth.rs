//! Auth service - registration, password login and the second factor step

use std::sync::Arc;

use anyhow::{Context, Result};
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use rand::{rngs::OsRng, RngCore};
use serde::Serialize;
use uuid::Uuid;

use crate::adapters::duckdb::DuckDbRepository;
use crate::domain::result::Error;
use crate::domain::user::{validate_email, validate_username};
use crate::domain::User;
use crate::services::two_factor::verify_code;

/// Same message for unknown user and wrong password
const INVALID_LOGIN: &str = "Invalid username or password";

/// Result of the password step
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LoginOutcome {
    Authenticated(User),
    TwoFactorRequired { user_id: Uuid },
}

pub struct AuthService {
    repository: Arc<DuckDbRepository>,
    min_password_length: usize,
}

impl AuthService {
    pub fn new(repository: Arc<DuckDbRepository>, min_password_length: usize) -> Self {
        Self {
            repository,
            min_password_length,
        }
    }

    /// Create an account. Username and email must not be taken.
    pub fn register(&self, username: &str, email: &str, password: &str) -> Result<User> {
        let username = username.trim();
        let email = email.trim();

        validate_username(username).map_err(Error::Validation)?;
        validate_email(email).map_err(Error::Validation)?;
        self.check_password_strength(password)?;

        if self.repository.get_user_by_username(username)?.is_some() {
            return Err(Error::conflict("Username already exists").into());
        }
        if self.repository.get_user_by_email(email)?.is_some() {
            return Err(Error::conflict("Email already registered").into());
        }

        let user = User::new(username, email, hash_password(password)?);
        self.repository
            .insert_user(&user)
            .context("Failed to create user")?;
        Ok(user)
    }

    /// Check the password. Users with 2FA enabled still need
    /// [`verify_login_code`](Self::verify_login_code).
    pub fn login(&self, username: &str, password: &str) -> Result<LoginOutcome> {
        let user = self
            .repository
            .get_user_by_username(username.trim())?
            .ok_or_else(|| Error::authentication(INVALID_LOGIN))?;

        if !self.verify_password(&user, password) {
            return Err(Error::authentication(INVALID_LOGIN).into());
        }

        if user.two_factor_enabled() {
            Ok(LoginOutcome::TwoFactorRequired { user_id: user.id })
        } else {
            Ok(LoginOutcome::Authenticated(user))
        }
    }

    /// Second login step for users with a TOTP secret
    pub fn verify_login_code(&self, user_id: &Uuid, code: &str) -> Result<User> {
        let user = self
            .repository
            .get_user_by_id(user_id)?
            .ok_or_else(|| Error::not_found(format!("User not found: {}", user_id)))?;

        let Some(secret) = user.totp_secret.as_deref().filter(|s| !s.is_empty()) else {
            return Err(Error::authentication("Two-factor authentication is not enabled").into());
        };

        if !verify_code(secret, code)? {
            return Err(Error::authentication("Invalid verification code").into());
        }
        Ok(user)
    }

    /// Constant-time check of `password` against the stored hash
    pub fn verify_password(&self, user: &User, password: &str) -> bool {
        PasswordHash::new(&user.password_hash)
            .map(|parsed| {
                Argon2::default()
                    .verify_password(password.as_bytes(), &parsed)
                    .is_ok()
            })
            .unwrap_or(false)
    }

    pub fn check_password_strength(&self, password: &str) -> Result<()> {
        if password.chars().count() < self.min_password_length {
            return Err(Error::validation(format!(
                "Password must be at least {} characters",
                self.min_password_length
            ))
            .into());
        }
        Ok(())
    }
}

/// Argon2id PHC string with a random 16-byte salt
pub fn hash_password(password: &str) -> Result<String> {
    let mut salt_bytes = [0u8; 16];
    OsRng.fill_bytes(&mut salt_bytes);
    let salt = SaltString::encode_b64(&salt_bytes)
        .map_err(|e| anyhow::anyhow!("Failed to encode salt: {}", e))?;

    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("Failed to hash password: {}", e))?;
    Ok(hash.to_string())
}
