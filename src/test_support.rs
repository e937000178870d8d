/// Fakes shared by the unit tests
use crate::config::{ClientConfig, ClientCredential};
use crate::store::{AccessCredential, MemoryTokenStore};
use crate::transport::{Transport, TransportRequest, TransportResponse};
use chrono::{Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use std::collections::VecDeque;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use url::Url;

pub(crate) const API_BASE: &str = "https://api.example.com/";

pub(crate) fn test_config() -> ClientConfig {
    ClientConfig::new(
        API_BASE,
        ClientCredential::new("client-id", "client-secret", "http://localhost/callback"),
    )
    .unwrap()
    .with_retry_backoff(Duration::ZERO)
}

pub(crate) fn store_expiring_in(secs: i64) -> MemoryTokenStore {
    MemoryTokenStore::with_credential(AccessCredential {
        access_token: "stored-access".to_string(),
        refresh_token: "stored-refresh".to_string(),
        token_type: "Bearer".to_string(),
        expires_at: Some(Utc::now() + ChronoDuration::seconds(secs)),
    })
}

/// A request as the fake transport saw it
#[derive(Debug, Clone)]
pub(crate) struct RecordedRequest {
    pub method: Method,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn authorization(&self) -> Option<&str> {
        self.header("Authorization")
    }

    pub fn form_value(&self, name: &str) -> Option<String> {
        url::form_urlencoded::parse(&self.body)
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
    }
}

#[derive(Debug, Clone)]
pub(crate) struct FakeResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    /// Largest slice handed out per read
    pub chunk: usize,
    pub content_length: Option<u64>,
}

impl FakeResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        let body = body.into();
        Self {
            status,
            content_length: Some(body.len() as u64),
            headers: Vec::new(),
            body,
            chunk: usize::MAX,
        }
    }

    pub fn json(status: u16, body: &str) -> Self {
        Self::new(status, body).header("Content-Type", "application/json")
    }

    pub fn redirect(status: u16, location: &str) -> Self {
        Self::new(status, Vec::new()).header("Location", location)
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn chunked_reads(mut self, chunk: usize) -> Self {
        self.chunk = chunk;
        self
    }

    pub fn unknown_length(mut self) -> Self {
        self.content_length = None;
        self
    }
}

pub(crate) enum Step {
    Respond(FakeResponse),
    Fail(io::ErrorKind),
    /// Respond, but the body breaks after this many bytes
    BreakBodyAfter(FakeResponse, usize),
}

type Handler = Box<dyn Fn(&RecordedRequest) -> Step + Send + Sync>;

/// Scripted transport that records what it was asked to send
///
/// Steps queued with `push` are consumed first; afterwards the handler (if
/// any) answers.
pub(crate) struct FakeTransport {
    script: Mutex<VecDeque<Step>>,
    handler: Option<Handler>,
    requests: Mutex<Vec<RecordedRequest>>,
    counters: Arc<Counters>,
    delay: Duration,
}

#[derive(Default)]
pub(crate) struct Counters {
    pub closed: AtomicUsize,
    pub open: AtomicUsize,
    pub max_open: AtomicUsize,
    pub body_reads: AtomicUsize,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            handler: None,
            requests: Mutex::new(Vec::new()),
            counters: Arc::new(Counters::default()),
            delay: Duration::ZERO,
        }
    }

    pub fn with_handler(handler: impl Fn(&RecordedRequest) -> Step + Send + Sync + 'static) -> Self {
        Self {
            handler: Some(Box::new(handler)),
            ..Self::new()
        }
    }

    /// Sleep before answering, to widen race windows in concurrency tests
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn push(self, step: Step) -> Self {
        self.script.lock().push_back(step);
        self
    }

    pub fn respond(self, response: FakeResponse) -> Self {
        self.push(Step::Respond(response))
    }

    pub fn fail(self, kind: io::ErrorKind) -> Self {
        self.push(Step::Fail(kind))
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }

    pub fn requests_to(&self, path: &str) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.url.path() == path)
            .count()
    }

    pub fn counters(&self) -> &Counters {
        &self.counters
    }
}

impl Transport for FakeTransport {
    fn send(&self, request: TransportRequest) -> io::Result<TransportResponse> {
        let mut body = Vec::new();
        if let Some(mut outgoing) = request.body {
            outgoing.reader.read_to_end(&mut body)?;
        }
        let recorded = RecordedRequest {
            method: request.method,
            url: request.url,
            headers: request.headers,
            body,
        };
        self.requests.lock().push(recorded.clone());

        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }

        let queued = self.script.lock().pop_front();
        let step = match queued {
            Some(step) => step,
            None => match &self.handler {
                Some(handler) => handler(&recorded),
                None => Step::Fail(io::ErrorKind::NotConnected),
            },
        };

        let (response, break_after) = match step {
            Step::Respond(response) => (response, None),
            Step::BreakBodyAfter(response, after) => (response, Some(after)),
            Step::Fail(kind) => return Err(io::Error::new(kind, "scripted failure")),
        };

        let mut headers = HeaderMap::new();
        for (name, value) in &response.headers {
            headers.append(
                HeaderName::from_bytes(name.as_bytes()).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }

        let open = self.counters.open.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.max_open.fetch_max(open, Ordering::SeqCst);

        Ok(TransportResponse {
            status: response.status,
            headers,
            content_length: response.content_length,
            body: Box::new(FakeBody {
                data: response.body,
                pos: 0,
                chunk: response.chunk,
                break_after,
                counters: self.counters.clone(),
            }),
        })
    }
}

struct FakeBody {
    data: Vec<u8>,
    pos: usize,
    chunk: usize,
    break_after: Option<usize>,
    counters: Arc<Counters>,
}

impl Read for FakeBody {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.counters.body_reads.fetch_add(1, Ordering::SeqCst);
        if let Some(limit) = self.break_after {
            if self.pos >= limit {
                return Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset by peer"));
            }
        }
        let end = self.break_after.unwrap_or(self.data.len()).min(self.data.len());
        let n = self.chunk.min(buf.len()).min(end - self.pos);
        buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

impl Drop for FakeBody {
    fn drop(&mut self) {
        self.counters.open.fetch_sub(1, Ordering::SeqCst);
        self.counters.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Minimal HTTP/1.1 server answering scripted raw responses, one per connection
pub(crate) struct OneShotServer {
    port: u16,
    handle: JoinHandle<Vec<String>>,
}

impl OneShotServer {
    pub fn start(responses: Vec<String>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        listener.set_nonblocking(true).unwrap();

        let handle = thread::spawn(move || {
            let mut seen = Vec::new();
            for response in responses {
                let Some(stream) = accept_with_deadline(&listener, Duration::from_secs(5)) else {
                    break;
                };
                match serve_one(stream, &response) {
                    Ok(request) => seen.push(request),
                    Err(_) => break,
                }
            }
            seen
        });

        Self { port, handle }
    }

    pub fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}/", self.port)
    }

    /// Wait for the server thread and return the raw requests it received
    pub fn finish(self) -> Vec<String> {
        self.handle.join().unwrap()
    }
}

fn accept_with_deadline(listener: &TcpListener, timeout: Duration) -> Option<TcpStream> {
    let deadline = Instant::now() + timeout;
    loop {
        match listener.accept() {
            Ok((stream, _)) => return Some(stream),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                if Instant::now() > deadline {
                    return None;
                }
                thread::sleep(Duration::from_millis(10));
            }
            Err(_) => return None,
        }
    }
}

fn serve_one(stream: TcpStream, response: &str) -> io::Result<String> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(Duration::from_secs(5)))?;
    let mut reader = BufReader::new(stream.try_clone()?);

    let mut head = String::new();
    let mut content_length = 0usize;
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("content-length") {
                content_length = value.trim().parse().unwrap_or(0);
            }
        }
        let end_of_head = line == "\r\n";
        head.push_str(&line);
        if end_of_head {
            break;
        }
    }

    let mut body = vec![0u8; content_length];
    reader.read_exact(&mut body)?;
    head.push_str(&String::from_utf8_lossy(&body));

    let mut stream = stream;
    stream.write_all(response.as_bytes())?;
    stream.flush()?;
    Ok(head)
}
