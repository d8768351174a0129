//! Credential cipher - encrypts exchange API keys at rest
//!
//! Values are sealed with ChaCha20-Poly1305 and stored as
//! `base64(nonce || ciphertext)` in the users table. The key comes from
//! `COINLEDGER_SECRET_KEY` when set, otherwise from `credentials.key` in the
//! data directory (created on first use).

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Key, Nonce,
};
use rand::{rngs::OsRng, RngCore};

use crate::domain::result::Error;

const KEY_FILE: &str = "credentials.key";
const NONCE_LEN: usize = 12;

/// Symmetric cipher for stored exchange credentials
#[derive(Clone)]
pub struct CredentialCipher {
    key: [u8; 32],
}

impl std::fmt::Debug for CredentialCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialCipher").finish_non_exhaustive()
    }
}

impl CredentialCipher {
    pub fn from_key(key: [u8; 32]) -> Self {
        Self { key }
    }

    /// Resolve the key from the environment value or the key file
    pub fn load_or_create(data_dir: &Path, env_key: Option<&str>) -> Result<Self> {
        if let Some(raw) = env_key.filter(|k| !k.trim().is_empty()) {
            return Ok(Self::from_key(decode_encryption_key(raw)?));
        }

        let key_path = data_dir.join(KEY_FILE);
        if key_path.exists() {
            let raw = fs::read_to_string(&key_path)
                .with_context(|| format!("Failed to read {}", key_path.display()))?;
            return Ok(Self::from_key(decode_encryption_key(&raw)?));
        }

        let mut key = [0u8; 32];
        OsRng.fill_bytes(&mut key);
        fs::create_dir_all(data_dir)?;
        write_key_file(&key_path, &BASE64.encode(key))
            .with_context(|| format!("Failed to write {}", key_path.display()))?;

        Ok(Self::from_key(key))
    }

    /// Encrypt a value; every call uses a fresh nonce
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);

        let cipher = ChaCha20Poly1305::new(Key::from_slice(&self.key));
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| Error::credentials("Failed to encrypt credential"))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(sealed))
    }

    pub fn decrypt(&self, encoded: &str) -> Result<String> {
        let sealed = BASE64
            .decode(encoded.trim())
            .map_err(|e| Error::credentials(format!("Failed to decode credential: {}", e)))?;
        if sealed.len() <= NONCE_LEN {
            return Err(Error::credentials("Stored credential is truncated").into());
        }

        let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&self.key));
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| {
                Error::credentials("Failed to decrypt credential; was the secret key changed?")
            })?;

        String::from_utf8(plaintext)
            .map_err(|_| Error::credentials("Decrypted credential is not valid UTF-8").into())
    }
}

/// Create the key file readable by the owner only from the start
fn write_key_file(path: &Path, contents: &str) -> std::io::Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(contents.as_bytes())?;
    file.sync_all()
}

/// Accept either base64 of 32 bytes or a raw 32-character ascii key
fn decode_encryption_key(raw: &str) -> Result<[u8; 32]> {
    let trimmed = raw.trim();
    let decoded = match BASE64.decode(trimmed) {
        Ok(bytes) if bytes.len() == 32 => bytes,
        // A raw key may also happen to be valid base64 of the wrong length
        _ if trimmed.len() == 32 => trimmed.as_bytes().to_vec(),
        Ok(_) => {
            return Err(Error::credentials("Secret key must decode to exactly 32 bytes").into())
        }
        Err(_) => {
            return Err(Error::credentials(
                "Secret key must be a base64 string or 32-byte ascii value",
            )
            .into())
        }
    };

    let mut key = [0u8; 32];
    key.copy_from_slice(&decoded);
    Ok(key)
}
