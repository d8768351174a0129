//! Settings service - account email, password and exchange credentials

use std::sync::Arc;

use anyhow::Result;
use uuid::Uuid;

use crate::adapters::duckdb::DuckDbRepository;
use crate::domain::result::Error;
use crate::domain::user::validate_email;
use crate::domain::User;
use crate::services::auth::{hash_password, AuthService};
use crate::services::credentials::CredentialCipher;

/// Decrypted Coinbase API key pair
#[derive(Clone, PartialEq, Eq)]
pub struct CoinbaseCredentials {
    pub api_key: String,
    pub api_secret: String,
}

impl std::fmt::Debug for CoinbaseCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoinbaseCredentials")
            .field("api_key", &"***")
            .field("api_secret", &"***")
            .finish()
    }
}

pub struct SettingsService {
    repository: Arc<DuckDbRepository>,
    auth: Arc<AuthService>,
    cipher: CredentialCipher,
}

impl SettingsService {
    pub fn new(
        repository: Arc<DuckDbRepository>,
        auth: Arc<AuthService>,
        cipher: CredentialCipher,
    ) -> Self {
        Self {
            repository,
            auth,
            cipher,
        }
    }

    fn require_user(&self, user_id: &Uuid) -> Result<User> {
        self.repository
            .get_user_by_id(user_id)?
            .ok_or_else(|| Error::not_found(format!("User not found: {}", user_id)).into())
    }

    /// Change the email address; re-saving your own address is allowed
    pub fn update_email(&self, user_id: &Uuid, email: &str) -> Result<()> {
        let email = email.trim();
        validate_email(email).map_err(Error::Validation)?;
        self.require_user(user_id)?;

        if let Some(existing) = self.repository.get_user_by_email(email)? {
            if existing.id != *user_id {
                return Err(Error::conflict("Email already in use by another account").into());
            }
        }

        self.repository.update_user_email(user_id, email)?;
        Ok(())
    }

    pub fn update_password(
        &self,
        user_id: &Uuid,
        current: &str,
        new: &str,
        confirm: &str,
    ) -> Result<()> {
        let user = self.require_user(user_id)?;

        if !self.auth.verify_password(&user, current) {
            return Err(Error::authentication("Current password is incorrect").into());
        }
        if new != confirm {
            return Err(Error::validation("New passwords do not match").into());
        }
        self.auth.check_password_strength(new)?;

        self.repository
            .update_user_password(user_id, &hash_password(new)?)?;
        Ok(())
    }

    /// Encrypt and store the Coinbase key pair
    pub fn set_coinbase_credentials(&self, user_id: &Uuid, api_key: &str, api_secret: &str) -> Result<()> {
        let api_key = api_key.trim();
        let api_secret = api_secret.trim();
        if api_key.is_empty() || api_secret.is_empty() {
            return Err(Error::validation("API key and secret are both required").into());
        }
        self.require_user(user_id)?;

        let sealed_key = self.cipher.encrypt(api_key)?;
        let sealed_secret = self.cipher.encrypt(api_secret)?;
        self.repository.update_user_coinbase_credentials(
            user_id,
            Some(&sealed_key),
            Some(&sealed_secret),
        )?;
        Ok(())
    }

    /// Decrypted credentials, or None when none are stored
    pub fn coinbase_credentials(&self, user_id: &Uuid) -> Result<Option<CoinbaseCredentials>> {
        let user = self.require_user(user_id)?;
        match (&user.coinbase_api_key, &user.coinbase_api_secret) {
            (Some(key), Some(secret)) => Ok(Some(CoinbaseCredentials {
                api_key: self.cipher.decrypt(key)?,
                api_secret: self.cipher.decrypt(secret)?,
            })),
            _ => Ok(None),
        }
    }

    pub fn clear_coinbase_credentials(&self, user_id: &Uuid) -> Result<()> {
        self.require_user(user_id)?;
        self.repository
            .update_user_coinbase_credentials(user_id, None, None)?;
        Ok(())
    }
}
