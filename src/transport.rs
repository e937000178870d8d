/// HTTP transport abstraction and the reqwest-backed implementation
use crate::config::ClientConfig;
use crate::error::{ApiError, Result};
use reqwest::header::HeaderMap;
use reqwest::Method;
use std::io::{self, Read};
use url::Url;

/// One wire-level exchange as handed to a [`Transport`]
pub struct TransportRequest {
    pub method: Method,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: Option<OutgoingBody>,
}

/// Request body stream with its length when known
pub struct OutgoingBody {
    pub reader: Box<dyn Read + Send>,
    pub len: Option<u64>,
}

/// Status line, headers and the still-unread body of a response
///
/// Dropping the response closes the underlying connection.
pub struct TransportResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub content_length: Option<u64>,
    pub body: Box<dyn Read + Send>,
}

impl TransportResponse {
    /// First value of a header, if it is valid visible ASCII
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// All values of a header
    pub fn header_values<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a str> + 'a {
        self.headers
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok())
    }
}

impl std::fmt::Debug for TransportResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// Sends a single request without following redirects
///
/// Implementations must be safe to share between threads; one instance
/// serves every request of a client. Any failure to connect, send, or read
/// the response head is reported as an `io::Error`.
pub trait Transport: Send + Sync {
    fn send(&self, request: TransportRequest) -> io::Result<TransportResponse>;
}

/// Transport over a blocking reqwest client with redirects disabled
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::blocking::Client,
}

impl ReqwestTransport {
    /// Build the client once from the configured timeout and user agent
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| ApiError::Io(io::Error::other(e)))?;

        Ok(Self { client })
    }

    /// Wrap an existing client
    ///
    /// The client must be built with `redirect::Policy::none()`, otherwise
    /// the bearer token could follow a redirect to another host.
    pub fn with_client(client: reqwest::blocking::Client) -> Self {
        Self { client }
    }
}

impl Transport for ReqwestTransport {
    fn send(&self, request: TransportRequest) -> io::Result<TransportResponse> {
        let mut builder = self.client.request(request.method, request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = match body.len {
                Some(len) => builder.body(reqwest::blocking::Body::sized(body.reader, len)),
                None => builder.body(reqwest::blocking::Body::new(body.reader)),
            };
        }

        let response = builder.send().map_err(io::Error::other)?;

        Ok(TransportResponse {
            status: response.status().as_u16(),
            headers: response.headers().clone(),
            content_length: response.content_length(),
            body: Box::new(response),
        })
    }
}
