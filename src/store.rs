/// Access credentials and pluggable token storage
use crate::error::{ApiError, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use keyring::Entry;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Tokens issued by the service for the signed-in user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessCredential {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl AccessCredential {
    /// Build a credential that expires `expires_in_secs` from now
    pub fn issued_now(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        token_type: impl Into<String>,
        expires_in_secs: u64,
    ) -> Self {
        let lifetime = i64::try_from(expires_in_secs)
            .ok()
            .and_then(ChronoDuration::try_seconds)
            .unwrap_or(ChronoDuration::MAX);
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            token_type: token_type.into(),
            expires_at: Utc::now().checked_add_signed(lifetime),
        }
    }

    /// Check if the token expires within `margin` of `now`
    ///
    /// An empty access token always counts as expiring. A credential
    /// without a known expiry is trusted until the server rejects it.
    pub fn expires_within(&self, margin: Duration, now: DateTime<Utc>) -> bool {
        if self.access_token.is_empty() {
            return true;
        }
        match self.expires_at {
            Some(expires_at) => {
                let margin = ChronoDuration::from_std(margin).unwrap_or(ChronoDuration::MAX);
                expires_at.signed_duration_since(now) < margin
            }
            None => false,
        }
    }
}

/// Storage interface for the signed-in user's tokens
///
/// Implementations only need `load`, `save` and `clear_tokens`; `save` must
/// replace the whole credential at once so readers never observe a
/// half-written refresh.
pub trait TokenStore: Send + Sync {
    fn load(&self) -> Result<Option<AccessCredential>>;

    fn save(&self, credential: AccessCredential) -> Result<()>;

    fn clear_tokens(&self) -> Result<()>;

    fn access_token(&self) -> Result<Option<String>> {
        Ok(self
            .load()?
            .map(|c| c.access_token)
            .filter(|t| !t.is_empty()))
    }

    fn refresh_token(&self) -> Result<Option<String>> {
        Ok(self
            .load()?
            .map(|c| c.refresh_token)
            .filter(|t| !t.is_empty()))
    }

    fn token_type(&self) -> Result<Option<String>> {
        Ok(self.load()?.map(|c| c.token_type))
    }

    fn expires_at(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(self.load()?.and_then(|c| c.expires_at))
    }

    fn save_tokens(
        &self,
        access_token: &str,
        refresh_token: &str,
        token_type: &str,
        expires_in_secs: u64,
    ) -> Result<()> {
        self.save(AccessCredential::issued_now(
            access_token,
            refresh_token,
            token_type,
            expires_in_secs,
        ))
    }
}

impl<T: TokenStore + ?Sized> TokenStore for Arc<T> {
    fn load(&self) -> Result<Option<AccessCredential>> {
        (**self).load()
    }

    fn save(&self, credential: AccessCredential) -> Result<()> {
        (**self).save(credential)
    }

    fn clear_tokens(&self) -> Result<()> {
        (**self).clear_tokens()
    }
}

/// In-memory token store
///
/// Thread-safe, process-local. Suitable for testing and short-lived tools.
#[derive(Debug, Default, Clone)]
pub struct MemoryTokenStore {
    credential: Arc<RwLock<Option<AccessCredential>>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that already holds `credential`
    pub fn with_credential(credential: AccessCredential) -> Self {
        Self {
            credential: Arc::new(RwLock::new(Some(credential))),
        }
    }
}

impl TokenStore for MemoryTokenStore {
    fn load(&self) -> Result<Option<AccessCredential>> {
        Ok(self.credential.read().clone())
    }

    fn save(&self, credential: AccessCredential) -> Result<()> {
        *self.credential.write() = Some(credential);
        Ok(())
    }

    fn clear_tokens(&self) -> Result<()> {
        *self.credential.write() = None;
        Ok(())
    }
}

/// File-based token store using XDG conventions
///
/// Keeps the credential as JSON in `<data_dir>/<app_name>/credential.json`.
/// Writes go to a sibling temporary file first and are renamed into place,
/// so another process never reads a partial credential.
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    base_path: PathBuf,
}

impl FileTokenStore {
    /// Create a file store for an application
    ///
    /// Respects `$XDG_DATA_HOME` first, then the platform data directory.
    pub fn new(app_name: &str) -> Result<Self> {
        let base_dir = if let Ok(xdg_data) = std::env::var("XDG_DATA_HOME") {
            PathBuf::from(xdg_data)
        } else {
            dirs::data_dir()
                .ok_or_else(|| ApiError::Storage("Could not determine data directory".into()))?
        };

        Self::with_path(base_dir.join(app_name))
    }

    /// Create a file store rooted at a custom directory
    pub fn with_path(path: PathBuf) -> Result<Self> {
        fs::create_dir_all(&path)
            .map_err(|e| ApiError::Storage(format!("Failed to create storage directory: {}", e)))?;

        Ok(Self { base_path: path })
    }

    pub fn path(&self) -> &Path {
        &self.base_path
    }

    fn credential_path(&self) -> PathBuf {
        self.base_path.join("credential.json")
    }
}

impl TokenStore for FileTokenStore {
    fn load(&self) -> Result<Option<AccessCredential>> {
        let path = self.credential_path();
        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&path)
            .map_err(|e| ApiError::Storage(format!("Failed to read credential file: {}", e)))?;

        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| ApiError::Storage(format!("Failed to parse credential: {}", e)))
    }

    fn save(&self, credential: AccessCredential) -> Result<()> {
        let content = serde_json::to_string_pretty(&credential)
            .map_err(|e| ApiError::Storage(format!("Failed to serialize credential: {}", e)))?;

        let staging = self.base_path.join("credential.json.tmp");
        fs::write(&staging, content)
            .map_err(|e| ApiError::Storage(format!("Failed to write credential file: {}", e)))?;
        fs::rename(&staging, self.credential_path())
            .map_err(|e| ApiError::Storage(format!("Failed to replace credential file: {}", e)))
    }

    fn clear_tokens(&self) -> Result<()> {
        match fs::remove_file(self.credential_path()) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ApiError::Storage(format!(
                "Failed to remove credential file: {}",
                e
            ))),
        }
    }
}

/// Token store backed by the OS credential manager
///
/// - macOS: Keychain
/// - Windows: Credential Manager
/// - Linux: Secret Service API (libsecret)
#[derive(Debug, Clone)]
pub struct KeyringTokenStore {
    service: String,
    account: String,
}

impl KeyringTokenStore {
    /// Create a keyring store
    ///
    /// `account` distinguishes several signed-in users of the same app.
    pub fn new(app_name: &str, account: &str) -> Self {
        Self {
            service: format!("shelfmark-{}", app_name),
            account: account.to_string(),
        }
    }

    fn entry(&self) -> Result<Entry> {
        Entry::new(&self.service, &self.account)
            .map_err(|e| ApiError::Storage(format!("Failed to create keyring entry: {}", e)))
    }
}

impl TokenStore for KeyringTokenStore {
    fn load(&self) -> Result<Option<AccessCredential>> {
        match self.entry()?.get_password() {
            Ok(json) => serde_json::from_str(&json)
                .map(Some)
                .map_err(|e| ApiError::Storage(format!("Failed to deserialize credential: {}", e))),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(ApiError::Storage(format!(
                "Failed to retrieve credential from keyring: {}",
                e
            ))),
        }
    }

    fn save(&self, credential: AccessCredential) -> Result<()> {
        let json = serde_json::to_string(&credential)
            .map_err(|e| ApiError::Storage(format!("Failed to serialize credential: {}", e)))?;

        self.entry()?
            .set_password(&json)
            .map_err(|e| ApiError::Storage(format!("Failed to save credential to keyring: {}", e)))
    }

    fn clear_tokens(&self) -> Result<()> {
        match self.entry()?.delete_credential() {
            Ok(()) => Ok(()),
            Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(ApiError::Storage(format!(
                "Failed to delete credential from keyring: {}",
                e
            ))),
        }
    }
}
