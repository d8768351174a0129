//! Two-factor service - TOTP enrollment and code verification
//!
//! Codes are 6 digits, SHA-1, 30 second step, and one step of clock skew is
//! accepted either way.

use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use totp_rs::{Algorithm, Secret, TOTP};
use uuid::Uuid;

use crate::adapters::duckdb::DuckDbRepository;
use crate::domain::result::Error;
use crate::domain::User;

const DIGITS: usize = 6;
const SKEW: u8 = 1;
const STEP_SECS: u64 = 30;

/// Secret and provisioning URI for an authenticator app
#[derive(Debug, Clone, Serialize)]
pub struct TwoFactorSetup {
    pub secret: String,
    pub otpauth_uri: String,
}

pub struct TwoFactorService {
    repository: Arc<DuckDbRepository>,
    issuer: String,
}

impl TwoFactorService {
    pub fn new(repository: Arc<DuckDbRepository>, issuer: impl Into<String>) -> Self {
        Self {
            repository,
            issuer: issuer.into(),
        }
    }

    /// Generate a fresh secret for `user`. Nothing is stored until
    /// [`confirm_setup`](Self::confirm_setup) succeeds.
    pub fn begin_setup(&self, user: &User) -> Result<TwoFactorSetup> {
        let secret = Secret::generate_secret().to_encoded().to_string();
        let totp = build_totp(&secret, Some(self.issuer.clone()), &user.username)?;
        Ok(TwoFactorSetup {
            otpauth_uri: totp.get_url(),
            secret,
        })
    }

    /// Store `secret` on the user once `code` proves the authenticator has it
    pub fn confirm_setup(&self, user_id: &Uuid, secret: &str, code: &str) -> Result<()> {
        if self.repository.get_user_by_id(user_id)?.is_none() {
            return Err(Error::not_found(format!("User not found: {}", user_id)).into());
        }
        if !self.verify(secret, code)? {
            return Err(Error::authentication("Invalid verification code").into());
        }
        self.repository
            .update_user_totp_secret(user_id, Some(secret))?;
        Ok(())
    }

    pub fn disable(&self, user_id: &Uuid) -> Result<()> {
        if !self.repository.update_user_totp_secret(user_id, None)? {
            return Err(Error::not_found(format!("User not found: {}", user_id)).into());
        }
        Ok(())
    }

    /// Check `code` against `secret` at the current time
    pub fn verify(&self, secret: &str, code: &str) -> Result<bool> {
        verify_code(secret, code)
    }

    pub fn current_code(&self, secret: &str) -> Result<String> {
        let totp = build_totp(secret, None, "coinledger")?;
        totp.generate_current()
            .context("System clock is before the unix epoch")
    }

    pub fn code_at(&self, secret: &str, unix_time: u64) -> Result<String> {
        Ok(build_totp(secret, None, "coinledger")?.generate(unix_time))
    }
}

/// Check a 6-digit code against a base32 secret, allowing one step of skew
pub fn verify_code(secret: &str, code: &str) -> Result<bool> {
    let code = code.trim();
    if code.len() != DIGITS || !code.chars().all(|c| c.is_ascii_digit()) {
        return Ok(false);
    }
    let totp = build_totp(secret, None, "coinledger")?;
    totp.check_current(code)
        .context("System clock is before the unix epoch")
}

fn build_totp(secret: &str, issuer: Option<String>, account_name: &str) -> Result<TOTP> {
    let bytes = Secret::Encoded(secret.trim().to_string())
        .to_bytes()
        .map_err(|e| Error::validation(format!("Invalid TOTP secret: {:?}", e)))?;
    TOTP::new(
        Algorithm::SHA1,
        DIGITS,
        SKEW,
        STEP_SECS,
        bytes,
        issuer,
        account_name.to_string(),
    )
    .map_err(|e| Error::validation(format!("Invalid TOTP parameters: {:?}", e)).into())
}
