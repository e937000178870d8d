/// Client entry point: sign-in state and request factories
use crate::codec::{Decode, Encode};
use crate::config::ClientConfig;
use crate::error::Result;
use crate::executor::Executor;
use crate::refresh::TokenGrant;
use crate::store::{AccessCredential, TokenStore};
use crate::transport::{ReqwestTransport, Transport};
use crate::verbs::{DeleteRequest, GetRequest, PatchRequest, PostRequest, PutRequest};
use std::sync::Arc;
use tracing::info;

/// Handle to the reference service for one signed-in user
///
/// Cheap to clone; clones share the transport, the token store and the
/// refresh coordination.
#[derive(Clone)]
pub struct ApiClient {
    executor: Arc<Executor>,
}

impl ApiClient {
    /// Client over a blocking reqwest transport built from `config`
    pub fn new(config: ClientConfig, store: Arc<dyn TokenStore>) -> Result<Self> {
        let transport = ReqwestTransport::new(&config)?;
        Ok(Self::with_transport(config, Arc::new(transport), store))
    }

    pub fn with_transport(
        config: ClientConfig,
        transport: Arc<dyn Transport>,
        store: Arc<dyn TokenStore>,
    ) -> Self {
        Self::from_executor(Executor::new(config, transport, store))
    }

    /// Wrap a fully configured executor, e.g. one with a refresh lock
    pub fn from_executor(executor: Executor) -> Self {
        Self {
            executor: Arc::new(executor),
        }
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    pub fn config(&self) -> &ClientConfig {
        self.executor.config()
    }

    /// Sign in with the resource-owner password grant
    pub fn sign_in_with_password(&self, username: &str, password: &str) -> Result<AccessCredential> {
        let credential = self.executor.refresher().issue(
            &self.executor,
            &TokenGrant::Password {
                username: username.to_string(),
                password: password.to_string(),
            },
        )?;
        info!("signed in with password grant");
        Ok(credential)
    }

    /// Redeem an authorization code delivered to the registered redirect URI
    pub fn exchange_authorization_code(&self, code: &str) -> Result<AccessCredential> {
        let credential = self
            .executor
            .refresher()
            .issue(&self.executor, &TokenGrant::AuthorizationCode(code.to_string()))?;
        info!("signed in with authorization code");
        Ok(credential)
    }

    /// Forget the stored tokens
    pub fn sign_out(&self) -> Result<()> {
        self.executor.store().clear_tokens()?;
        info!("signed out");
        Ok(())
    }

    pub fn is_signed_in(&self) -> Result<bool> {
        Ok(self.executor.store().access_token()?.is_some())
    }

    /// `GET` `path`, relative to the base URL or absolute
    pub fn get<D: Decode>(&self, path: &str, decoder: D) -> Result<GetRequest<D>> {
        let locator = self.config().resolve(path)?;
        Ok(GetRequest::new(self.executor.clone(), locator, decoder))
    }

    pub fn post<E, D>(&self, path: &str, body: &E, decoder: D) -> Result<PostRequest<D>>
    where
        E: Encode + ?Sized,
        D: Decode,
    {
        let locator = self.config().resolve(path)?;
        PostRequest::new(self.executor.clone(), locator, body, decoder)
    }

    pub fn patch<E, D>(&self, path: &str, body: &E, decoder: D) -> Result<PatchRequest<D>>
    where
        E: Encode + ?Sized,
        D: Decode,
    {
        let locator = self.config().resolve(path)?;
        PatchRequest::new(self.executor.clone(), locator, body, decoder)
    }

    pub fn put<E, D>(&self, path: &str, body: &E, decoder: D) -> Result<PutRequest<D>>
    where
        E: Encode + ?Sized,
        D: Decode,
    {
        let locator = self.config().resolve(path)?;
        PutRequest::new(self.executor.clone(), locator, body, decoder)
    }

    pub fn delete(&self, path: &str) -> Result<DeleteRequest> {
        let locator = self.config().resolve(path)?;
        Ok(DeleteRequest::new(self.executor.clone(), locator))
    }
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.config().base_url.as_str())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::JsonDecoder;
    use crate::config::ClientCredential;
    use crate::error::ApiError;
    use crate::store::MemoryTokenStore;
    use crate::test_support::{
        store_expiring_in, test_config, FakeResponse, FakeTransport, OneShotServer,
    };
    use chrono::{TimeZone, Utc};
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Document {
        id: String,
        title: String,
    }

    #[test]
    fn test_list_documents_end_to_end() {
        let body = r#"[{"id":"d1","title":"On Computable Numbers"},{"id":"d2","title":"A Mathematical Theory of Communication"}]"#;
        let response = format!(
            "HTTP/1.1 200 OK\r\n\
             Content-Type: application/vnd.mendeley-document.1+json\r\n\
             Content-Length: {}\r\n\
             Date: Sun, 06 Nov 1994 08:49:37 GMT\r\n\
             Link: </documents?marker=d2&limit=2>; rel=\"next\", </documents?limit=2>; rel=\"first\"\r\n\
             Connection: close\r\n\r\n{}",
            body.len(),
            body
        );
        let server = OneShotServer::start(vec![response]);
        let config = ClientConfig::new(
            &server.base_url(),
            ClientCredential::new("id", "secret", "http://localhost/cb"),
        )
        .unwrap();
        let client = ApiClient::new(config, Arc::new(store_expiring_in(3600))).unwrap();

        let envelope = client
            .get("documents?limit=2", JsonDecoder::<Vec<Document>>::new())
            .unwrap()
            .header("Accept", "application/vnd.mendeley-document.1+json")
            .execute()
            .unwrap();

        assert_eq!(envelope.status(), 200);
        assert_eq!(envelope.resource().len(), 2);
        assert_eq!(envelope.resource()[0].title, "On Computable Numbers");
        assert_eq!(
            envelope.server_date(),
            Some(Utc.with_ymd_and_hms(1994, 11, 6, 8, 49, 37).unwrap())
        );
        assert_eq!(
            envelope.next_page().map(|u| u.as_str().to_string()),
            Some(format!("{}documents?marker=d2&limit=2", server.base_url()))
        );

        let requests = server.finish();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].starts_with("GET /documents?limit=2 HTTP/1.1"));
        assert!(requests[0]
            .to_ascii_lowercase()
            .contains("authorization: bearer stored-access"));
    }

    #[test]
    fn test_sign_in_and_out() {
        let store = MemoryTokenStore::new();
        let transport = Arc::new(FakeTransport::new().respond(FakeResponse::json(
            200,
            r#"{"access_token":"a1","refresh_token":"r1","token_type":"bearer","expires_in":3600}"#,
        )));
        let client = ApiClient::with_transport(test_config(), transport.clone(), Arc::new(store.clone()));

        assert!(!client.is_signed_in().unwrap());
        let credential = client.sign_in_with_password("ada@example.com", "hunter2").unwrap();

        assert_eq!(credential.access_token, "a1");
        assert!(client.is_signed_in().unwrap());
        assert_eq!(transport.requests()[0].url.path(), "/oauth/token");

        client.sign_out().unwrap();
        assert!(!client.is_signed_in().unwrap());
        assert!(matches!(
            client.get("documents", JsonDecoder::<Vec<Document>>::new()).unwrap().execute(),
            Err(ApiError::NotSignedIn)
        ));
    }

    #[test]
    fn test_exchange_authorization_code() {
        let transport = Arc::new(FakeTransport::new().respond(FakeResponse::json(
            200,
            r#"{"access_token":"a2","refresh_token":"r2","expires_in":60}"#,
        )));
        let client =
            ApiClient::with_transport(test_config(), transport.clone(), Arc::new(MemoryTokenStore::new()));

        client.exchange_authorization_code("abc").unwrap();

        let request = &transport.requests()[0];
        assert_eq!(request.form_value("code").as_deref(), Some("abc"));
        assert!(client.is_signed_in().unwrap());
    }

    #[test]
    fn test_rejected_sign_in() {
        let transport = Arc::new(
            FakeTransport::new()
                .respond(FakeResponse::json(400, r#"{"error":"invalid_grant"}"#)),
        );
        let client =
            ApiClient::with_transport(test_config(), transport, Arc::new(MemoryTokenStore::new()));

        assert!(matches!(
            client.sign_in_with_password("ada@example.com", "wrong"),
            Err(ApiError::Authentication(_))
        ));
        assert!(!client.is_signed_in().unwrap());
    }

    #[test]
    fn test_invalid_path_is_reported() {
        let client = ApiClient::with_transport(
            test_config(),
            Arc::new(FakeTransport::new()),
            Arc::new(MemoryTokenStore::new()),
        );
        assert!(matches!(
            client.get("http://[::1", JsonDecoder::<Vec<Document>>::new()),
            Err(ApiError::InvalidLocator(_))
        ));
    }
}
