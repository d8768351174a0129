//! User domain model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A registered ledger user
///
/// Exchange credentials are kept in their encrypted form; the settings
/// service is the only place that decrypts them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    /// Base32 TOTP secret, `None` when two-factor is disabled
    #[serde(skip_serializing)]
    pub totp_secret: Option<String>,
    #[serde(skip_serializing)]
    pub coinbase_api_key: Option<String>,
    #[serde(skip_serializing)]
    pub coinbase_api_secret: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn new(
        username: impl Into<String>,
        email: impl Into<String>,
        password_hash: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            username: username.into(),
            email: email.into(),
            password_hash: password_hash.into(),
            totp_secret: None,
            coinbase_api_key: None,
            coinbase_api_secret: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn two_factor_enabled(&self) -> bool {
        self.totp_secret.as_deref().is_some_and(|s| !s.is_empty())
    }

    pub fn has_coinbase_credentials(&self) -> bool {
        self.coinbase_api_key.is_some() && self.coinbase_api_secret.is_some()
    }
}

/// Validate a username for registration
pub fn validate_username(username: &str) -> Result<(), String> {
    let trimmed = username.trim();
    if trimmed.len() < 3 {
        return Err("Username must be at least 3 characters".to_string());
    }
    if trimmed.len() > 80 {
        return Err("Username must be at most 80 characters".to_string());
    }
    // Appears in the otpauth label, where ':' separates issuer and account
    if trimmed.contains(':') {
        return Err("Username cannot contain ':'".to_string());
    }
    if trimmed.chars().any(char::is_whitespace) {
        return Err("Username cannot contain whitespace".to_string());
    }
    Ok(())
}

/// Minimal structural check: one '@', non-empty local part, dotted domain
pub fn validate_email(email: &str) -> Result<(), String> {
    let email = email.trim();
    let Some((local, domain)) = email.split_once('@') else {
        return Err("Invalid email address".to_string());
    };
    if local.is_empty() || domain.contains('@') {
        return Err("Invalid email address".to_string());
    }
    match domain.split_once('.') {
        Some((host, tld)) if !host.is_empty() && !tld.is_empty() && !domain.ends_with('.') => Ok(()),
        _ => Err("Invalid email address".to_string()),
    }
}
