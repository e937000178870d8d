/// Token issuance and refresh with single-flight concurrency control
use crate::codec::{Encode, Form, JsonDecoder};
use crate::config::ClientCredential;
use crate::error::{ApiError, Result};
use crate::executor::{Executor, TransferControl};
use crate::lock::{RefreshLock, RefreshLockManager};
use crate::request::RequestDescriptor;
use crate::store::AccessCredential;
use chrono::Utc;
use parking_lot::Mutex;
use reqwest::Method;
use serde::Deserialize;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

const LOCK_KEY: &str = "access-token";

/// Ways of obtaining tokens from the token endpoint
#[derive(Clone, PartialEq, Eq)]
pub enum TokenGrant {
    RefreshToken(String),
    Password { username: String, password: String },
    /// Code returned to the registered redirect URI
    AuthorizationCode(String),
}

impl TokenGrant {
    pub fn grant_type(&self) -> &'static str {
        match self {
            TokenGrant::RefreshToken(_) => "refresh_token",
            TokenGrant::Password { .. } => "password",
            TokenGrant::AuthorizationCode(_) => "authorization_code",
        }
    }

    fn form(&self, client: &ClientCredential) -> Form {
        let form = Form::new()
            .field("grant_type", self.grant_type())
            .field("client_id", client.client_id.as_str())
            .field("client_secret", client.client_secret.as_str());

        match self {
            TokenGrant::RefreshToken(token) => form.field("refresh_token", token.as_str()),
            TokenGrant::Password { username, password } => form
                .field("username", username.as_str())
                .field("password", password.as_str()),
            TokenGrant::AuthorizationCode(code) => form
                .field("code", code.as_str())
                .field("redirect_uri", client.redirect_uri.as_str()),
        }
    }
}

// Secrets stay out of logs and panics.
impl std::fmt::Debug for TokenGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TokenGrant({})", self.grant_type())
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    token_type: Option<String>,
    expires_in: u64,
}

/// Keeps the stored access token usable
///
/// All refreshes of one client pass through a single mutex: a caller that
/// finds the token expiring waits for any refresh already underway, then
/// re-reads the store and only calls the token endpoint if the token is
/// still stale. With file locking enabled the same holds across processes.
pub struct TokenRefresher {
    gate: Mutex<()>,
    file_locks: Option<RefreshLockManager>,
    refreshes: AtomicU64,
}

impl Default for TokenRefresher {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenRefresher {
    pub fn new() -> Self {
        Self {
            gate: Mutex::new(()),
            file_locks: None,
            refreshes: AtomicU64::new(0),
        }
    }

    /// Also hold a cross-process file lock while refreshing
    pub fn with_file_locking(manager: RefreshLockManager) -> Self {
        Self {
            file_locks: Some(manager),
            ..Self::new()
        }
    }

    /// Number of token-endpoint calls this refresher has made
    pub fn refresh_count(&self) -> u64 {
        self.refreshes.load(Ordering::SeqCst)
    }

    /// Return a usable access token, refreshing it when it expires soon
    ///
    /// Fails with [`ApiError::NotSignedIn`] without touching the network
    /// when no access token is stored.
    pub fn ensure_valid_token(&self, executor: &Executor) -> Result<String> {
        let margin = executor.config().refresh_margin;
        let current = signed_in_credential(executor)?;
        if !current.expires_within(margin, Utc::now()) {
            return Ok(current.access_token);
        }

        let _gate = self.gate.lock();
        let _file = self.file_lock()?;

        // Whoever held the gate before us may already have refreshed.
        let current = signed_in_credential(executor)?;
        if !current.expires_within(margin, Utc::now()) {
            debug!("token refreshed by a concurrent caller");
            return Ok(current.access_token);
        }

        debug!(expires_at = ?current.expires_at, "access token expires soon, refreshing");
        self.redeem(executor, &current).map(|c| c.access_token)
    }

    /// Refresh after the server rejected `rejected` as expired
    ///
    /// When the stored token already differs from the rejected one, another
    /// caller refreshed in the meantime and that token is returned as is.
    pub fn refresh_rejected(&self, executor: &Executor, rejected: &str) -> Result<String> {
        let _gate = self.gate.lock();
        let _file = self.file_lock()?;

        let current = signed_in_credential(executor)?;
        if current.access_token != rejected {
            debug!("rejected token already replaced");
            return Ok(current.access_token);
        }

        self.redeem(executor, &current).map(|c| c.access_token)
    }

    /// Obtain and store new tokens with an explicit grant
    pub fn issue(&self, executor: &Executor, grant: &TokenGrant) -> Result<AccessCredential> {
        let _gate = self.gate.lock();
        let _file = self.file_lock()?;
        self.request_tokens(executor, grant, None)
    }

    fn redeem(&self, executor: &Executor, current: &AccessCredential) -> Result<AccessCredential> {
        if current.refresh_token.is_empty() {
            return Err(ApiError::Authentication(
                "access token expired and no refresh token is stored".to_string(),
            ));
        }

        let grant = TokenGrant::RefreshToken(current.refresh_token.clone());
        self.request_tokens(executor, &grant, Some(&current.refresh_token))
    }

    /// Call the token endpoint and persist the answer
    fn request_tokens(
        &self,
        executor: &Executor,
        grant: &TokenGrant,
        previous_refresh: Option<&str>,
    ) -> Result<AccessCredential> {
        let config = executor.config();
        let form = grant.form(&config.credential);
        let descriptor = RequestDescriptor::builder(Method::POST, config.token_endpoint.clone())
            .header("Content-Type", form.content_type())
            .header("Accept", "application/json")
            .body(form.encode()?)
            .build();

        self.refreshes.fetch_add(1, Ordering::SeqCst);
        let response = executor
            .execute(
                &descriptor,
                false,
                &JsonDecoder::<TokenResponse>::new(),
                &TransferControl::default(),
            )
            .map_err(|err| {
                warn!(grant = grant.grant_type(), "token request failed: {}", err);
                match err {
                    ApiError::Storage(_) => err,
                    ApiError::Http { code, message, .. } => ApiError::Authentication(format!(
                        "token endpoint answered {}: {}",
                        code, message
                    )),
                    other => ApiError::Authentication(other.to_string()),
                }
            })?;

        let issued = response.into_resource();
        let refresh_token = issued
            .refresh_token
            .filter(|t| !t.is_empty())
            .or_else(|| previous_refresh.map(str::to_string))
            .unwrap_or_default();
        let credential = AccessCredential::issued_now(
            issued.access_token,
            refresh_token,
            issued.token_type.unwrap_or_else(|| "Bearer".to_string()),
            issued.expires_in,
        );

        executor.store().save(credential.clone())?;
        info!(
            grant = grant.grant_type(),
            expires_in = issued.expires_in,
            "access token issued"
        );
        Ok(credential)
    }

    fn file_lock(&self) -> Result<Option<RefreshLock>> {
        match &self.file_locks {
            Some(manager) => manager.acquire(LOCK_KEY).map(Some),
            None => Ok(None),
        }
    }
}

fn signed_in_credential(executor: &Executor) -> Result<AccessCredential> {
    executor
        .store()
        .load()?
        .filter(|c| !c.access_token.is_empty())
        .ok_or(ApiError::NotSignedIn)
}
