/// Per-verb request façades
use crate::codec::{Decode, Encode, NoContent};
use crate::error::Result;
use crate::executor::{Executor, TransferControl};
use crate::headers::format_http_date;
use crate::request::{RequestBody, RequestDescriptor, ResponseEnvelope};
use crate::stream::CancellationToken;
use chrono::{DateTime, Utc};
use reqwest::Method;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use url::Url;

/// State shared by all façades
///
/// A façade only decides which parts of the call the caller may touch.
struct Call<D> {
    executor: Arc<Executor>,
    method: Method,
    locator: Url,
    headers: Vec<(String, String)>,
    body: Option<RequestBody>,
    decoder: D,
    authorized: bool,
    transfer: TransferControl,
}

impl<D: Decode> Call<D> {
    fn new(executor: Arc<Executor>, method: Method, locator: Url, decoder: D) -> Self {
        Self {
            executor,
            method,
            locator,
            headers: Vec::new(),
            body: None,
            decoder,
            authorized: true,
            transfer: TransferControl::default(),
        }
    }

    fn with_body<E: Encode + ?Sized>(mut self, encoder: &E) -> Result<Self> {
        self.body = Some(encoder.encode()?);
        self.set_header("Content-Type", encoder.content_type());
        for (name, value) in encoder.headers() {
            self.set_header(&name, &value);
        }
        Ok(self)
    }

    fn set_header(&mut self, name: &str, value: &str) {
        self.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        self.headers.push((name.to_string(), value.to_string()));
    }

    fn descriptor(&self) -> RequestDescriptor {
        let mut builder = RequestDescriptor::builder(self.method.clone(), self.locator.clone());
        for (name, value) in &self.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &self.body {
            builder = builder.body(body.clone());
        }
        builder.build()
    }

    fn execute(self) -> Result<ResponseEnvelope<D::Output>> {
        let descriptor = self.descriptor();
        self.executor
            .execute(&descriptor, self.authorized, &self.decoder, &self.transfer)
    }

    fn spawn<F>(self, callback: F) -> JoinHandle<()>
    where
        D: Send + 'static,
        F: FnOnce(Result<ResponseEnvelope<D::Output>>) + Send + 'static,
    {
        thread::spawn(move || callback(self.execute()))
    }
}

/// Methods every façade exposes
macro_rules! call_methods {
    ($facade:ident<$d:ident>, $output:ty) => {
        impl<$d: Decode> $facade<$d> {
            /// Set a request header, replacing any earlier value
            pub fn header(mut self, name: &str, value: &str) -> Self {
                self.call.set_header(name, value);
                self
            }

            /// Send the request without a bearer token
            pub fn without_bearer_token(mut self) -> Self {
                self.call.authorized = false;
                self
            }

            /// Handle that cancels this request from any thread
            pub fn cancellation_token(&self) -> CancellationToken {
                self.call.transfer.cancel.clone()
            }

            /// Share an existing cancellation token with this request
            pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
                self.call.transfer.cancel = token;
                self
            }

            pub fn locator(&self) -> &Url {
                &self.call.locator
            }

            /// Run the request on the calling thread
            pub fn execute(self) -> Result<ResponseEnvelope<$output>> {
                self.call.execute()
            }

            /// Run the request on a new thread and hand the result to `callback`
            pub fn execute_in_background<F>(self, callback: F) -> JoinHandle<()>
            where
                $d: Send + 'static,
                F: FnOnce(Result<ResponseEnvelope<$output>>) + Send + 'static,
            {
                self.call.spawn(callback)
            }
        }
    };
}

/// `GET` request with optional progress reporting
pub struct GetRequest<D> {
    call: Call<D>,
}

impl<D: Decode> GetRequest<D> {
    pub(crate) fn new(executor: Arc<Executor>, locator: Url, decoder: D) -> Self {
        Self {
            call: Call::new(executor, Method::GET, locator, decoder),
        }
    }

    /// Receive whole-number download percentages while the body is read
    ///
    /// Nothing is reported when the server does not announce a length.
    pub fn progress_listener(mut self, listener: impl Fn(u8) + Send + Sync + 'static) -> Self {
        self.call.transfer.progress = Some(Arc::new(listener));
        self
    }
}

call_methods!(GetRequest<D>, D::Output);

/// `POST` request carrying an encoded body
pub struct PostRequest<D> {
    call: Call<D>,
}

impl<D: Decode> PostRequest<D> {
    pub(crate) fn new<E: Encode + ?Sized>(
        executor: Arc<Executor>,
        locator: Url,
        body: &E,
        decoder: D,
    ) -> Result<Self> {
        Ok(Self {
            call: Call::new(executor, Method::POST, locator, decoder).with_body(body)?,
        })
    }
}

call_methods!(PostRequest<D>, D::Output);

/// `PATCH` request, optionally conditional on the resource being unmodified
pub struct PatchRequest<D> {
    call: Call<D>,
}

impl<D: Decode> PatchRequest<D> {
    pub(crate) fn new<E: Encode + ?Sized>(
        executor: Arc<Executor>,
        locator: Url,
        body: &E,
        decoder: D,
    ) -> Result<Self> {
        Ok(Self {
            call: Call::new(executor, Method::PATCH, locator, decoder).with_body(body)?,
        })
    }

    /// Only apply the change if the resource is unchanged since `instant`
    pub fn if_unmodified_since(mut self, instant: DateTime<Utc>) -> Self {
        self.call
            .set_header("If-Unmodified-Since", &format_http_date(&instant));
        self
    }
}

call_methods!(PatchRequest<D>, D::Output);

pub struct PutRequest<D> {
    call: Call<D>,
}

impl<D: Decode> PutRequest<D> {
    pub(crate) fn new<E: Encode + ?Sized>(
        executor: Arc<Executor>,
        locator: Url,
        body: &E,
        decoder: D,
    ) -> Result<Self> {
        Ok(Self {
            call: Call::new(executor, Method::PUT, locator, decoder).with_body(body)?,
        })
    }
}

call_methods!(PutRequest<D>, D::Output);

/// `DELETE` request; the response body is discarded
pub struct DeleteRequest<D = NoContent> {
    call: Call<D>,
}

impl DeleteRequest<NoContent> {
    pub(crate) fn new(executor: Arc<Executor>, locator: Url) -> Self {
        Self {
            call: Call::new(executor, Method::DELETE, locator, NoContent),
        }
    }
}

call_methods!(DeleteRequest<D>, D::Output);
