/// Client configuration
use crate::error::{ApiError, Result};
use std::time::Duration;
use url::Url;

/// Seconds before expiry at which a stored token is refreshed proactively
pub const DEFAULT_REFRESH_MARGIN_SECS: u64 = 300;

/// Retries after an I/O failure; zero means a single attempt
pub const DEFAULT_MAX_RETRIES: u32 = 0;

pub const DEFAULT_MAX_REDIRECTS: usize = 10;

/// Application credentials registered with the service
///
/// Only used to authenticate calls to the token endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientCredential {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
}

impl ClientCredential {
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            redirect_uri: redirect_uri.into(),
        }
    }
}

/// Configuration for an [`ApiClient`](crate::client::ApiClient)
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Root of the API; relative request paths resolve against it and its
    /// host decides whether a redirect may carry the bearer token
    pub base_url: Url,
    pub token_endpoint: Url,
    pub credential: ClientCredential,
    pub max_retries: u32,
    /// Base delay between retries, multiplied by the attempt number
    pub retry_backoff: Duration,
    pub max_redirects: usize,
    pub refresh_margin: Duration,
    pub timeout: Option<Duration>,
    pub user_agent: String,
    /// Response header carrying the server-side trace id, reported in errors
    pub trace_id_header: String,
}

impl ClientConfig {
    /// Create a configuration with default policies
    ///
    /// The token endpoint defaults to `<base_url>/oauth/token`.
    pub fn new(base_url: &str, credential: ClientCredential) -> Result<Self> {
        let base_url = parse_base_url(base_url)?;
        let token_endpoint = base_url
            .join("oauth/token")
            .map_err(|e| ApiError::InvalidLocator(format!("token endpoint: {}", e)))?;

        Ok(Self {
            base_url,
            token_endpoint,
            credential,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_backoff: Duration::from_millis(500),
            max_redirects: DEFAULT_MAX_REDIRECTS,
            refresh_margin: Duration::from_secs(DEFAULT_REFRESH_MARGIN_SECS),
            timeout: Some(Duration::from_secs(60)),
            user_agent: format!("shelfmark/{}", env!("CARGO_PKG_VERSION")),
            trace_id_header: "X-Trace-Id".to_string(),
        })
    }

    /// Preset for the public reference-management API
    pub fn public_api(credential: ClientCredential) -> Result<Self> {
        let mut config = Self::new("https://api.mendeley.com", credential)?;
        config.trace_id_header = "X-Mendeley-Trace-Id".to_string();
        Ok(config)
    }

    pub fn with_token_endpoint(mut self, endpoint: &str) -> Result<Self> {
        self.token_endpoint = Url::parse(endpoint)
            .map_err(|e| ApiError::InvalidLocator(format!("{}: {}", endpoint, e)))?;
        Ok(self)
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn with_refresh_margin(mut self, margin: Duration) -> Self {
        self.refresh_margin = margin;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Host used for the same-origin check on redirects
    pub fn api_host(&self) -> Option<&str> {
        self.base_url.host_str()
    }

    /// Resolve a request target against the base URL
    ///
    /// Absolute URLs (for example a next-page link) are used unchanged.
    pub fn resolve(&self, target: &str) -> Result<Url> {
        match Url::parse(target) {
            Ok(url) => Ok(url),
            Err(url::ParseError::RelativeUrlWithoutBase) => self
                .base_url
                .join(target.trim_start_matches('/'))
                .map_err(|e| ApiError::InvalidLocator(format!("{}: {}", target, e))),
            Err(e) => Err(ApiError::InvalidLocator(format!("{}: {}", target, e))),
        }
    }
}

fn parse_base_url(raw: &str) -> Result<Url> {
    // A trailing slash keeps `join` from replacing the last path segment.
    let normalized = if raw.ends_with('/') {
        raw.to_string()
    } else {
        format!("{}/", raw)
    };
    let url = Url::parse(&normalized)
        .map_err(|e| ApiError::InvalidLocator(format!("{}: {}", raw, e)))?;
    if url.host_str().is_none() {
        return Err(ApiError::InvalidLocator(format!("{}: missing host", raw)));
    }
    Ok(url)
}
