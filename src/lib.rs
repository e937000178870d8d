//! Shelfmark - typed client for a bibliographic reference web service
//!
//! This library executes authorized HTTP calls against a reference-manager
//! API (documents, folders, files, annotations) and keeps the signed-in
//! user's OAuth tokens usable along the way.
//!
//! # Features
//!
//! - Typed `GET`/`POST`/`PATCH`/`PUT`/`DELETE` requests with pluggable codecs
//! - Proactive token refresh before expiry and one reactive refresh on an
//!   expired-token rejection, single-flight across threads (and optionally
//!   across processes)
//! - Manual redirect handling that keeps the bearer token on the API host
//! - Bounded retries of transport failures
//! - `Link` pagination and server `Date` capture
//! - Download progress and cancellation from any thread
//! - Pluggable token storage (memory, file, OS keyring)
//!
//! # Example
//!
//! ```no_run
//! use shelfmark::prelude::*;
//! use serde::Deserialize;
//! use std::sync::Arc;
//!
//! #[derive(Deserialize)]
//! struct Document {
//!     id: String,
//!     title: String,
//! }
//!
//! let config = ClientConfig::public_api(ClientCredential::new(
//!     "client-id",
//!     "client-secret",
//!     "http://localhost:5000/callback",
//! ))?;
//! let client = ApiClient::new(config, Arc::new(FileTokenStore::new("shelfmark")?))?;
//!
//! if !client.is_signed_in()? {
//!     client.sign_in_with_password("ada@example.com", "secret")?;
//! }
//!
//! let page = client
//!     .get("documents?limit=20", JsonDecoder::<Vec<Document>>::new())?
//!     .header("Accept", "application/vnd.mendeley-document.1+json")
//!     .execute()?;
//! for doc in page.resource() {
//!     println!("{} {}", doc.id, doc.title);
//! }
//! if let Some(next) = page.next_page() {
//!     println!("more at {}", next);
//! }
//! # Ok::<(), shelfmark::error::ApiError>(())
//! ```

pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod executor;
pub mod headers;
pub mod lock;
pub mod refresh;
pub mod request;
pub mod store;
pub mod stream;
pub mod transport;
pub mod verbs;

#[cfg(test)]
mod test_support;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::client::ApiClient;
    pub use crate::codec::{
        Decode, Encode, FileUpload, Form, Json, JsonDecoder, NoContent, RawBytes, ToFile,
    };
    pub use crate::config::{ClientConfig, ClientCredential};
    pub use crate::error::{ApiError, Result};
    pub use crate::executor::{Executor, TransferControl};
    pub use crate::lock::RefreshLockManager;
    pub use crate::refresh::{TokenGrant, TokenRefresher};
    pub use crate::request::{RequestBody, RequestDescriptor, ResponseEnvelope};
    pub use crate::store::{
        AccessCredential, FileTokenStore, KeyringTokenStore, MemoryTokenStore, TokenStore,
    };
    pub use crate::stream::{CancellableReader, CancellationToken, ProgressReader};
    pub use crate::transport::{ReqwestTransport, Transport};
    pub use crate::verbs::{DeleteRequest, GetRequest, PatchRequest, PostRequest, PutRequest};
}
