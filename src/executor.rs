/// Request execution engine
use crate::codec::Decode;
use crate::config::ClientConfig;
use crate::error::{ApiError, Cancelled, CodecError, Result};
use crate::headers::{next_page, parse_http_date};
use crate::lock::RefreshLockManager;
use crate::refresh::TokenRefresher;
use crate::request::{RequestDescriptor, ResponseEnvelope};
use crate::store::TokenStore;
use crate::stream::{CancellableReader, CancellationToken, ProgressListener, ProgressReader};
use crate::transport::{OutgoingBody, Transport, TransportRequest, TransportResponse};
use rand::Rng;
use reqwest::Method;
use std::io::{self, Read};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// Largest error body kept for diagnostics
const ERROR_BODY_LIMIT: u64 = 64 * 1024;

/// Per-call transfer controls
#[derive(Clone, Default)]
pub struct TransferControl {
    pub cancel: CancellationToken,
    pub progress: Option<ProgressListener>,
}

impl TransferControl {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            progress: None,
        }
    }

    pub fn with_progress(mut self, listener: ProgressListener) -> Self {
        self.progress = Some(listener);
        self
    }
}

impl std::fmt::Debug for TransferControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferControl")
            .field("cancelled", &self.cancel.is_cancelled())
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

/// Result of a single hop
enum Hop<T> {
    Success(ResponseEnvelope<T>),
    Redirect { status: u16, target: Url },
    Failure(Failure),
}

enum Failure {
    /// Connection-level fault; eligible for retry
    Io(io::Error),
    Fatal(ApiError),
}

/// Executes request descriptors against the service
///
/// One [`execute`](Executor::execute) is one logical call: the descriptor
/// goes through the [`Transport`], redirects are followed by hand so the
/// bearer token never leaves the API host, transport faults are retried
/// from the original locator, and the body is decoded through the
/// cancellation and progress wrappers.
pub struct Executor {
    config: ClientConfig,
    transport: Arc<dyn Transport>,
    store: Arc<dyn TokenStore>,
    refresher: TokenRefresher,
}

impl Executor {
    pub fn new(
        config: ClientConfig,
        transport: Arc<dyn Transport>,
        store: Arc<dyn TokenStore>,
    ) -> Self {
        Self {
            config,
            transport,
            store,
            refresher: TokenRefresher::new(),
        }
    }

    /// Coordinate refreshes with other processes sharing the same store
    pub fn with_refresh_lock(mut self, manager: RefreshLockManager) -> Self {
        self.refresher = TokenRefresher::with_file_locking(manager);
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn store(&self) -> &dyn TokenStore {
        self.store.as_ref()
    }

    pub fn refresher(&self) -> &TokenRefresher {
        &self.refresher
    }

    /// Execute a descriptor and decode the successful response
    ///
    /// With `add_bearer_token` the stored token is validated (refreshing it
    /// when it expires soon) and attached; a 401 reporting an expired token
    /// triggers exactly one refresh and replay.
    pub fn execute<D: Decode>(
        &self,
        descriptor: &RequestDescriptor,
        add_bearer_token: bool,
        decoder: &D,
        transfer: &TransferControl,
    ) -> Result<ResponseEnvelope<D::Output>> {
        if !add_bearer_token {
            return self.run(descriptor, None, decoder, transfer);
        }

        let token = self.refresher.ensure_valid_token(self)?;
        match self.run(descriptor, Some(&token), decoder, transfer) {
            Err(err) if err.is_token_expired() && self.rejected_our_token(descriptor, &err) => {
                info!(url = %descriptor.locator(), "access token rejected as expired, refreshing once");
                let token = self.refresher.refresh_rejected(self, &token)?;
                self.run(descriptor, Some(&token), decoder, transfer)
            }
            other => other,
        }
    }

    /// Redirect and retry loop for one execution
    fn run<D: Decode>(
        &self,
        descriptor: &RequestDescriptor,
        bearer: Option<&str>,
        decoder: &D,
        transfer: &TransferControl,
    ) -> Result<ResponseEnvelope<D::Output>> {
        let original = descriptor.locator();
        let mut locator = original.clone();
        let mut method = descriptor.method().clone();
        let mut with_body = true;
        let mut retry = 0u32;
        let mut attempts = 0u32;
        let mut hops = 0usize;

        loop {
            if transfer.cancel.is_cancelled() {
                return Err(ApiError::Cancelled);
            }
            attempts += 1;

            // The caller chose the original locator; anything reached through
            // a redirect only sees the token when it stays on the API host.
            let token = if self.forwards_token(original, &locator) {
                bearer
            } else {
                None
            };

            debug!(%method, url = %locator, attempt = attempts, authorized = token.is_some(), "sending request");

            match self.hop(descriptor, &method, &locator, with_body, token, decoder, transfer) {
                Hop::Success(envelope) => return Ok(envelope),
                Hop::Redirect { status, target } => {
                    hops += 1;
                    if hops > self.config.max_redirects {
                        return Err(ApiError::Http {
                            code: status,
                            message: format!(
                                "redirect limit of {} exceeded",
                                self.config.max_redirects
                            ),
                            locator: target,
                            body: String::new(),
                            trace_id: None,
                        });
                    }
                    debug!(status, from = %locator, to = %target, "following redirect");
                    if status == 303 {
                        method = Method::GET;
                        with_body = false;
                    }
                    locator = target;
                    retry = 0;
                }
                Hop::Failure(Failure::Fatal(err)) => return Err(err),
                Hop::Failure(Failure::Io(err)) => {
                    if transfer.cancel.is_cancelled() || Cancelled::is(&err) {
                        return Err(ApiError::Cancelled);
                    }
                    if retry >= self.config.max_retries {
                        return Err(ApiError::Transport {
                            locator,
                            attempts,
                            source: err,
                        });
                    }
                    retry += 1;
                    let delay = self.backoff(retry);
                    warn!(
                        url = %locator,
                        retry,
                        max_retries = self.config.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        "transport failure, retrying: {}",
                        err
                    );
                    if !delay.is_zero() {
                        std::thread::sleep(delay);
                    }
                    locator = original.clone();
                    method = descriptor.method().clone();
                    with_body = true;
                }
            }
        }
    }

    /// One request/response exchange; the response is dropped before returning
    #[allow(clippy::too_many_arguments)]
    fn hop<D: Decode>(
        &self,
        descriptor: &RequestDescriptor,
        method: &Method,
        locator: &Url,
        with_body: bool,
        bearer: Option<&str>,
        decoder: &D,
        transfer: &TransferControl,
    ) -> Hop<D::Output> {
        let mut headers: Vec<(String, String)> = descriptor
            .headers()
            .iter()
            .filter(|(name, _)| with_body || !is_body_header(name))
            .cloned()
            .collect();
        if let Some(token) = bearer {
            headers.push(("Authorization".to_string(), format!("Bearer {}", token)));
        }

        let body = match descriptor.body().filter(|_| with_body) {
            Some(body) => match body.open() {
                Ok(reader) => Some(OutgoingBody {
                    reader: Box::new(CancellableReader::new(reader, transfer.cancel.clone())),
                    len: body.len(),
                }),
                Err(e) => return Hop::Failure(Failure::Fatal(ApiError::Io(e))),
            },
            None => None,
        };

        let response = match self.transport.send(TransportRequest {
            method: method.clone(),
            url: locator.clone(),
            headers,
            body,
        }) {
            Ok(response) => response,
            Err(e) => return Hop::Failure(Failure::Io(e)),
        };

        let status = response.status;
        if (300..400).contains(&status) {
            return redirect_target(locator, &response);
        }
        if status < 200 || status >= 300 {
            return Hop::Failure(Failure::Fatal(self.http_error(
                locator,
                response,
                &transfer.cancel,
            )));
        }

        let server_date = response.header("date").and_then(parse_http_date);
        let next = next_page(response.header_values("link"), locator);
        let TransportResponse {
            body,
            content_length,
            ..
        } = response;

        let inner: Box<dyn Read + Send> = match &transfer.progress {
            Some(listener) => Box::new(ProgressReader::with_listener(
                body,
                content_length,
                listener.clone(),
            )),
            None => body,
        };
        let mut reader = CancellableReader::new(inner, transfer.cancel.clone());
        let decoded = decoder.decode(&mut reader);
        let cancelled = reader.was_cancelled();
        drop(reader);

        match decoded {
            Ok(resource) => Hop::Success(ResponseEnvelope::new(resource, status, server_date, next)),
            Err(_) if cancelled => Hop::Failure(Failure::Fatal(ApiError::Cancelled)),
            Err(CodecError::Io(e)) if Cancelled::is(&e) => {
                Hop::Failure(Failure::Fatal(ApiError::Cancelled))
            }
            Err(CodecError::Io(e)) => Hop::Failure(Failure::Io(e)),
            Err(CodecError::Malformed(message)) => Hop::Failure(Failure::Fatal(ApiError::Decode {
                locator: locator.clone(),
                message,
            })),
        }
    }

    fn http_error(
        &self,
        locator: &Url,
        response: TransportResponse,
        cancel: &CancellationToken,
    ) -> ApiError {
        let trace_id = response
            .header(&self.config.trace_id_header)
            .map(str::to_string);
        let challenge = response.header("www-authenticate").map(str::to_string);
        let TransportResponse { status, body, .. } = response;

        let mut raw = Vec::new();
        let mut reader = CancellableReader::new(body, cancel.clone());
        // Diagnostics only; a broken error body still yields the status.
        let _ = (&mut reader).take(ERROR_BODY_LIMIT).read_to_end(&mut raw);
        let cancelled = reader.was_cancelled();
        drop(reader);
        if cancelled {
            return ApiError::Cancelled;
        }
        let body = String::from_utf8_lossy(&raw).into_owned();

        let message = server_message(&body)
            .or_else(|| challenge.filter(|_| status == 401))
            .unwrap_or_else(|| {
                reqwest::StatusCode::from_u16(status)
                    .ok()
                    .and_then(|s| s.canonical_reason())
                    .unwrap_or("HTTP error")
                    .to_string()
            });

        debug!(status, url = %locator, trace_id = ?trace_id, "request failed: {}", message);

        ApiError::Http {
            code: status,
            message,
            locator: locator.clone(),
            body,
            trace_id,
        }
    }

    /// Whether a hop to `locator` carries the bearer token
    fn forwards_token(&self, original: &Url, locator: &Url) -> bool {
        locator == original || self.is_api_host(locator)
    }

    /// Whether an HTTP failure came from a hop that was sent the token
    fn rejected_our_token(&self, descriptor: &RequestDescriptor, err: &ApiError) -> bool {
        match err {
            ApiError::Http { locator, .. } => self.forwards_token(descriptor.locator(), locator),
            _ => false,
        }
    }

    fn is_api_host(&self, url: &Url) -> bool {
        let base = &self.config.base_url;
        url.host_str().is_some()
            && url.host_str() == base.host_str()
            && url.port_or_known_default() == base.port_or_known_default()
    }

    fn backoff(&self, retry: u32) -> Duration {
        let base = self.config.retry_backoff.saturating_mul(retry);
        if base.is_zero() {
            return base;
        }
        let jitter = rand::thread_rng().gen_range(0.0..0.25);
        base.mul_f64(1.0 + jitter)
    }
}

fn redirect_target<T>(current: &Url, response: &TransportResponse) -> Hop<T> {
    let Some(location) = response.header("location") else {
        return Hop::Failure(Failure::Fatal(ApiError::Http {
            code: response.status,
            message: "redirect without Location header".to_string(),
            locator: current.clone(),
            body: String::new(),
            trace_id: None,
        }));
    };
    match current.join(location) {
        Ok(target) => Hop::Redirect {
            status: response.status,
            target,
        },
        Err(e) => Hop::Failure(Failure::Fatal(ApiError::InvalidLocator(format!(
            "{}: {}",
            location, e
        )))),
    }
}

fn is_body_header(name: &str) -> bool {
    name.eq_ignore_ascii_case("content-type")
        || name.eq_ignore_ascii_case("content-length")
        || name.eq_ignore_ascii_case("content-disposition")
}

/// Pull a human-readable message out of a JSON error body
fn server_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    ["message", "error_description", "errorMessage", "error"]
        .iter()
        .find_map(|key| value.get(*key).and_then(|v| v.as_str()))
        .filter(|m| !m.is_empty())
        .map(str::to_string)
}
