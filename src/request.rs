/// Immutable request descriptions and response envelopes
use chrono::{DateTime, Utc};
use reqwest::Method;
use std::fs::File;
use std::io::{self, Read};
use std::path::PathBuf;
use url::Url;

/// Replayable request body
///
/// A descriptor can be sent more than once (redirects, retries), so the
/// body is kept as something that can be produced again rather than a
/// one-shot stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestBody {
    Bytes(Vec<u8>),
    /// Reopened for every attempt
    File(PathBuf),
}

impl RequestBody {
    /// Length in bytes, when it can be known up front
    pub fn len(&self) -> Option<u64> {
        match self {
            RequestBody::Bytes(bytes) => Some(bytes.len() as u64),
            RequestBody::File(path) => std::fs::metadata(path).ok().map(|m| m.len()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == Some(0)
    }

    /// Open a fresh reader over the body
    pub fn open(&self) -> io::Result<Box<dyn Read + Send>> {
        match self {
            RequestBody::Bytes(bytes) => Ok(Box::new(io::Cursor::new(bytes.clone()))),
            RequestBody::File(path) => Ok(Box::new(File::open(path)?)),
        }
    }
}

/// One logical call: where, how, and with what
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    locator: Url,
    method: Method,
    headers: Vec<(String, String)>,
    body: Option<RequestBody>,
}

impl RequestDescriptor {
    pub fn builder(method: Method, locator: Url) -> RequestDescriptorBuilder {
        RequestDescriptorBuilder {
            descriptor: RequestDescriptor {
                locator,
                method,
                headers: Vec::new(),
                body: None,
            },
        }
    }

    pub fn locator(&self) -> &Url {
        &self.locator
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// First value of a header, compared case-insensitively
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn body(&self) -> Option<&RequestBody> {
        self.body.as_ref()
    }
}

/// Construction-time builder for [`RequestDescriptor`]
#[derive(Debug)]
pub struct RequestDescriptorBuilder {
    descriptor: RequestDescriptor,
}

impl RequestDescriptorBuilder {
    /// Add a header, replacing any earlier value of the same name
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        self.descriptor
            .headers
            .retain(|(k, _)| !k.eq_ignore_ascii_case(&name));
        self.descriptor.headers.push((name, value.into()));
        self
    }

    pub fn body(mut self, body: RequestBody) -> Self {
        self.descriptor.body = Some(body);
        self
    }

    pub fn build(self) -> RequestDescriptor {
        self.descriptor
    }
}

/// Decoded result of a successful exchange plus response metadata
#[derive(Debug, Clone)]
pub struct ResponseEnvelope<T> {
    resource: T,
    status: u16,
    server_date: Option<DateTime<Utc>>,
    next_page: Option<Url>,
}

impl<T> ResponseEnvelope<T> {
    pub(crate) fn new(
        resource: T,
        status: u16,
        server_date: Option<DateTime<Utc>>,
        next_page: Option<Url>,
    ) -> Self {
        Self {
            resource,
            status,
            server_date,
            next_page,
        }
    }

    pub fn resource(&self) -> &T {
        &self.resource
    }

    pub fn into_resource(self) -> T {
        self.resource
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    /// Server clock from the `Date` header
    pub fn server_date(&self) -> Option<DateTime<Utc>> {
        self.server_date
    }

    /// Locator of the next page, `None` on the last page
    pub fn next_page(&self) -> Option<&Url> {
        self.next_page.as_ref()
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> ResponseEnvelope<U> {
        ResponseEnvelope {
            resource: f(self.resource),
            status: self.status,
            server_date: self.server_date,
            next_page: self.next_page,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_replaces_duplicate_headers() {
        let descriptor = RequestDescriptor::builder(
            Method::GET,
            Url::parse("https://api.example.com/documents").unwrap(),
        )
        .header("Accept", "application/json")
        .header("accept", "application/vnd.mendeley-document.1+json")
        .build();

        assert_eq!(descriptor.headers().len(), 1);
        assert_eq!(
            descriptor.header("ACCEPT"),
            Some("application/vnd.mendeley-document.1+json")
        );
        assert!(descriptor.body().is_none());
    }

    #[test]
    fn test_bytes_body_reopens() {
        let body = RequestBody::Bytes(b"abc".to_vec());
        assert_eq!(body.len(), Some(3));

        for _ in 0..2 {
            let mut out = String::new();
            body.open().unwrap().read_to_string(&mut out).unwrap();
            assert_eq!(out, "abc");
        }
    }

    #[test]
    fn test_envelope_map_keeps_metadata() {
        let next = Url::parse("https://api.example.com/documents?marker=2").unwrap();
        let envelope = ResponseEnvelope::new(vec![1, 2, 3], 200, None, Some(next.clone()));

        let mapped = envelope.map(|v| v.len());
        assert_eq!(*mapped.resource(), 3);
        assert_eq!(mapped.next_page(), Some(&next));
        assert_eq!(mapped.status(), 200);
    }
}
