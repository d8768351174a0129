//! Session store - login state persisted between CLI invocations
//!
//! `session.json` in the data directory holds who is logged in, whether the
//! second factor is still outstanding, and a 2FA secret that has been shown
//! to the user but not yet confirmed.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::result::Error;

const SESSION_FILE: &str = "session.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionState {
    /// Password accepted, TOTP code still required
    Pending2fa { user_id: Uuid },
    Authenticated { user_id: Uuid },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<SessionState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_totp_secret: Option<String>,
}

impl Session {
    pub fn authenticated(user_id: Uuid) -> Self {
        Self {
            state: Some(SessionState::Authenticated { user_id }),
            pending_totp_secret: None,
        }
    }

    pub fn pending_2fa(user_id: Uuid) -> Self {
        Self {
            state: Some(SessionState::Pending2fa { user_id }),
            pending_totp_secret: None,
        }
    }

    pub fn authenticated_user(&self) -> Option<Uuid> {
        match self.state {
            Some(SessionState::Authenticated { user_id }) => Some(user_id),
            _ => None,
        }
    }

    pub fn pending_user(&self) -> Option<Uuid> {
        match self.state {
            Some(SessionState::Pending2fa { user_id }) => Some(user_id),
            _ => None,
        }
    }
}

pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join(SESSION_FILE),
        }
    }

    /// Load the session; a missing or corrupt file is an empty session
    pub fn load(&self) -> Result<Session> {
        if !self.path.exists() {
            return Ok(Session::default());
        }
        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read {}", self.path.display()))?;
        Ok(serde_json::from_str(&content).unwrap_or_default())
    }

    pub fn save(&self, session: &Session) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(session)?;
        fs::write(&self.path, content)
            .with_context(|| format!("Failed to write {}", self.path.display()))?;
        Ok(())
    }

    /// Log out
    pub fn clear(&self) -> Result<()> {
        if self.path.exists() {
            fs::remove_file(&self.path)?;
        }
        Ok(())
    }

    /// The logged-in user id, or an Authentication error
    pub fn require_user(&self) -> Result<Uuid> {
        let session = self.load()?;
        if let Some(user_id) = session.authenticated_user() {
            return Ok(user_id);
        }
        let message = if session.pending_user().is_some() {
            "Two-factor verification pending. Run 'coinledger verify-2fa <code>' first."
        } else {
            "Not logged in. Run 'coinledger login' first."
        };
        Err(Error::authentication(message).into())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
