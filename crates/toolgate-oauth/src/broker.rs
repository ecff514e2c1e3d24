//! The authorization broker.
//!
//! Runs the three-legged code grant (with PKCE and dynamic client
//! registration) on behalf of remote backends:
//!
//! ```text
//! connector ──401──▶ broker.begin_authorization(backend, url)
//!                      │  register client (once, persisted)
//!                      │  stage PKCE verifier
//!                      │  start loopback listener
//!                      │  print authorization URL to stderr
//!                      ▼
//!            operator opens URL, server redirects to
//!            http://localhost:PORT/callback?code=...
//!                      │
//!            broker.await_authorization(backend)
//!                      │  consume verifier, exchange code
//!                      ▼
//!            tokens.json persisted; connector retries once
//! ```
//!
//! At most one flow per backend is in flight; a per-backend mutex
//! serializes `begin`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::Rng;
use serde_json::{json, Value};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use toolgate_mcp::{CredentialProvider, McpError};

use crate::listener::{bind, spawn_accept_loop, CallbackOutcome};
use crate::pkce;
use crate::store::{ClientInfo, InvalidateScope, OAuthStore, TokenSet};
use crate::OAuthError;

/// Default loopback redirect port.
pub const DEFAULT_REDIRECT_PORT: u16 = 3000;

/// Default budget for `await_authorization`.
pub const DEFAULT_CALLBACK_TIMEOUT: Duration = Duration::from_secs(10);

/// Authorization-server endpoints.
#[derive(Debug, Clone)]
pub struct AuthServerMetadata {
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub registration_endpoint: Option<String>,
}

/// One outstanding flow, retained between `begin` and `await`.
struct PendingFlow {
    rx: oneshot::Receiver<Result<CallbackOutcome, OAuthError>>,
    listener: JoinHandle<()>,
    token_endpoint: String,
    client_id: String,
    redirect_uri: String,
}

/// File-backed credential broker for remote backends.
pub struct OAuthBroker {
    store: OAuthStore,
    http: reqwest::Client,
    redirect_port: u16,
    /// Per-backend serialization of `begin`.
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    pending: Mutex<HashMap<String, PendingFlow>>,
}

impl OAuthBroker {
    /// Create a broker rooted at the given storage directory
    /// (conventionally `<config-root>/.oauth`).
    pub fn new(storage_root: impl Into<std::path::PathBuf>, redirect_port: u16) -> Self {
        Self {
            store: OAuthStore::new(storage_root),
            http: reqwest::Client::new(),
            redirect_port,
            locks: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &OAuthStore {
        &self.store
    }

    /// The redirect target registered with authorization servers.
    pub fn redirect_url(&self) -> String {
        format!("http://localhost:{}/callback", self.redirect_port)
    }

    /// Client metadata submitted during dynamic registration.
    pub fn client_metadata(&self) -> Value {
        json!({
            "client_name": "toolgate",
            "redirect_uris": [self.redirect_url()],
            "grant_types": ["authorization_code", "refresh_token"],
            "response_types": ["code"],
            "token_endpoint_auth_method": "none"
        })
    }

    /// Scoped clear of a backend's persisted credentials.
    pub fn invalidate(&self, backend: &str, scope: InvalidateScope) -> Result<(), OAuthError> {
        self.store.invalidate(backend, scope)
    }

    /// Fetch the server's advertised endpoints, falling back to the
    /// conventional paths when no metadata document is served.
    async fn discover_metadata(&self, server_url: &str) -> AuthServerMetadata {
        let origin = origin_of(server_url).to_string();
        let well_known = format!("{origin}/.well-known/oauth-authorization-server");

        if let Ok(response) = self.http.get(&well_known).send().await {
            if response.status().is_success() {
                if let Ok(doc) = response.json::<Value>().await {
                    if let (Some(authz), Some(token)) = (
                        doc["authorization_endpoint"].as_str(),
                        doc["token_endpoint"].as_str(),
                    ) {
                        return AuthServerMetadata {
                            authorization_endpoint: authz.to_string(),
                            token_endpoint: token.to_string(),
                            registration_endpoint: doc["registration_endpoint"]
                                .as_str()
                                .map(String::from),
                        };
                    }
                }
            }
        }

        debug!(origin, "no authorization-server metadata, using defaults");
        AuthServerMetadata {
            authorization_endpoint: format!("{origin}/authorize"),
            token_endpoint: format!("{origin}/token"),
            registration_endpoint: Some(format!("{origin}/register")),
        }
    }

    /// Load the persisted registration or register a new client.
    async fn ensure_client(
        &self,
        backend: &str,
        metadata: &AuthServerMetadata,
    ) -> Result<ClientInfo, OAuthError> {
        if let Some(info) = self.store.load_client_info(backend)? {
            return Ok(info);
        }

        let endpoint = metadata.registration_endpoint.as_deref().ok_or_else(|| {
            OAuthError::RegistrationFailed("server offers no registration endpoint".to_string())
        })?;

        let response = self
            .http
            .post(endpoint)
            .json(&self.client_metadata())
            .send()
            .await
            .map_err(|e| OAuthError::RegistrationFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(OAuthError::RegistrationFailed(format!(
                "HTTP {} from registration endpoint",
                response.status()
            )));
        }

        let info: ClientInfo = response
            .json()
            .await
            .map_err(|e| OAuthError::Serialization(e.to_string()))?;

        self.store.save_client_info(backend, &info)?;
        info!(backend, client_id = %info.client_id, "registered client");
        Ok(info)
    }

    /// Start an authorization flow for a backend.
    ///
    /// Idempotent: when a flow is already outstanding the call returns
    /// without side effects and the existing awaitable stays in place.
    #[instrument(skip(self, server_url))]
    pub async fn begin_authorization(
        &self,
        backend: &str,
        server_url: &str,
    ) -> Result<(), OAuthError> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks
                .entry(backend.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        let _guard = lock.lock().await;

        if self.pending.lock().await.contains_key(backend) {
            debug!(backend, "authorization already in flight");
            return Ok(());
        }

        let metadata = self.discover_metadata(server_url).await;
        let client = self.ensure_client(backend, &metadata).await?;

        let pair = pkce::generate();
        self.store.save_verifier(backend, &pair.verifier)?;

        let listener = bind(self.redirect_port).await?;
        let port = listener
            .local_addr()
            .map_err(|e| OAuthError::ListenerFailed(e.to_string()))?
            .port();
        let redirect_uri = format!("http://localhost:{port}/callback");
        let (listener, rx) = spawn_accept_loop(listener);

        let state = random_state();
        let authorize_url = format!(
            "{}?response_type=code&client_id={}&redirect_uri={}&code_challenge={}&code_challenge_method=S256&state={}",
            metadata.authorization_endpoint,
            urlencoding::encode(&client.client_id),
            urlencoding::encode(&redirect_uri),
            pair.challenge,
            state,
        );

        // The operator completes the flow in a browser; the URL goes to
        // stderr so it never mixes with protocol traffic on stdout.
        eprintln!("Authorization required for backend '{backend}'.");
        eprintln!("Open this URL to continue:\n\n  {authorize_url}\n");
        info!(backend, "authorization flow started");

        self.pending.lock().await.insert(
            backend.to_string(),
            PendingFlow {
                rx,
                listener,
                token_endpoint: metadata.token_endpoint,
                client_id: client.client_id,
                redirect_uri,
            },
        );

        Ok(())
    }

    /// Block until the loopback listener receives the redirect, then
    /// finalize the flow and persist tokens.
    ///
    /// On timeout or an error redirect, the outstanding flow is cleared
    /// so the next attempt begins fresh.
    #[instrument(skip(self))]
    pub async fn await_authorization(
        &self,
        backend: &str,
        timeout: Duration,
    ) -> Result<TokenSet, OAuthError> {
        let PendingFlow {
            rx,
            listener,
            token_endpoint,
            client_id,
            redirect_uri,
        } = self
            .pending
            .lock()
            .await
            .remove(backend)
            .ok_or_else(|| OAuthError::NoPendingFlow(backend.to_string()))?;

        let outcome = match tokio::time::timeout(timeout, rx).await {
            Err(_) => {
                listener.abort();
                return Err(OAuthError::CallbackTimeout);
            }
            Ok(Err(_)) => {
                listener.abort();
                return Err(OAuthError::InvalidCallback(
                    "listener closed before a callback arrived".to_string(),
                ));
            }
            Ok(Ok(outcome)) => outcome,
        };

        let callback = outcome?;
        let verifier = self.store.take_verifier(backend)?;

        let tokens = self
            .exchange_code(&token_endpoint, &client_id, &redirect_uri, &callback.code, &verifier)
            .await?
            .stamped();
        let tokens = TokenSet {
            token_endpoint: Some(token_endpoint),
            ..tokens
        };

        self.store.save_tokens(backend, &tokens)?;
        info!(backend, "authorization complete, tokens persisted");
        Ok(tokens)
    }

    async fn exchange_code(
        &self,
        token_endpoint: &str,
        client_id: &str,
        redirect_uri: &str,
        code: &str,
        verifier: &str,
    ) -> Result<TokenSet, OAuthError> {
        let form = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("client_id", client_id),
            ("code_verifier", verifier),
        ];

        let response = self
            .http
            .post(token_endpoint)
            .form(&form)
            .send()
            .await
            .map_err(|e| OAuthError::TokenExchangeFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(OAuthError::TokenExchangeFailed(format!(
                "HTTP {} from token endpoint",
                response.status()
            )));
        }

        response
            .json::<TokenSet>()
            .await
            .map_err(|e| OAuthError::Serialization(e.to_string()))
    }

    /// A live access token for the backend, refreshing if the persisted
    /// one has expired and a refresh token is available.
    pub async fn current_access_token(
        &self,
        backend: &str,
    ) -> Result<Option<String>, OAuthError> {
        let Some(tokens) = self.store.load_tokens(backend)? else {
            return Ok(None);
        };

        if !tokens.is_expired() {
            return Ok(Some(tokens.access_token));
        }

        let (Some(refresh), Some(endpoint)) =
            (tokens.refresh_token.clone(), tokens.token_endpoint.clone())
        else {
            return Ok(None);
        };

        let client_id = self
            .store
            .load_client_info(backend)?
            .map(|c| c.client_id)
            .unwrap_or_default();

        match self.refresh_tokens(&endpoint, &client_id, &refresh).await {
            Ok(fresh) => {
                let fresh = TokenSet {
                    token_endpoint: Some(endpoint),
                    // Servers may rotate or omit the refresh token.
                    refresh_token: fresh.refresh_token.clone().or(Some(refresh)),
                    ..fresh.stamped()
                };
                self.store.save_tokens(backend, &fresh)?;
                Ok(Some(fresh.access_token))
            }
            Err(e) => {
                warn!(backend, error = %e, "token refresh failed");
                Ok(None)
            }
        }
    }

    async fn refresh_tokens(
        &self,
        endpoint: &str,
        client_id: &str,
        refresh_token: &str,
    ) -> Result<TokenSet, OAuthError> {
        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", client_id),
        ];

        let response = self
            .http
            .post(endpoint)
            .form(&form)
            .send()
            .await
            .map_err(|e| OAuthError::RefreshFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(OAuthError::RefreshFailed(format!(
                "HTTP {} from token endpoint",
                response.status()
            )));
        }

        response
            .json::<TokenSet>()
            .await
            .map_err(|e| OAuthError::Serialization(e.to_string()))
    }

    /// Actual loopback port of the outstanding flow, for callers that
    /// configured port 0.
    pub async fn pending_redirect_port(&self, backend: &str) -> Option<u16> {
        let pending = self.pending.lock().await;
        pending.get(backend).and_then(|flow| {
            flow.redirect_uri
                .rsplit(':')
                .next()
                .and_then(|rest| rest.split('/').next())
                .and_then(|p| p.parse().ok())
        })
    }
}

fn random_state() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

fn origin_of(url: &str) -> &str {
    if let Some(scheme_end) = url.find("://") {
        let rest = &url[scheme_end + 3..];
        match rest.find('/') {
            Some(path_start) => &url[..scheme_end + 3 + path_start],
            None => url,
        }
    } else {
        url
    }
}

#[async_trait]
impl CredentialProvider for OAuthBroker {
    async fn access_token(&self, backend: &str) -> Option<String> {
        self.current_access_token(backend).await.ok().flatten()
    }

    async fn authorize(&self, backend: &str, server_url: &str) -> Result<String, McpError> {
        self.begin_authorization(backend, server_url)
            .await
            .map_err(|e| McpError::ConnectionFailed(format!("authorization failed: {e}")))?;

        let tokens = self
            .await_authorization(backend, DEFAULT_CALLBACK_TIMEOUT)
            .await
            .map_err(|e| McpError::ConnectionFailed(format!("authorization failed: {e}")))?;

        Ok(tokens.access_token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    /// Minimal HTTP server: answers the metadata probe with 404 and the
    /// token exchange with a canned token set.
    async fn spawn_fake_auth_server() -> u16 {
        let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    break;
                };
                tokio::spawn(async move {
                    let mut buf = [0u8; 4096];
                    let n = socket.read(&mut buf).await.unwrap_or(0);
                    let request = String::from_utf8_lossy(&buf[..n]);

                    let (status, body) = if request.starts_with("POST /token") {
                        (
                            "200 OK",
                            r#"{"access_token":"fresh-token","token_type":"Bearer","refresh_token":"r1","expires_in":3600}"#,
                        )
                    } else {
                        ("404 Not Found", "{}")
                    };

                    let response = format!(
                        "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                        body.len()
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                });
            }
        });

        port
    }

    fn preregistered_broker(dir: &tempfile::TempDir) -> OAuthBroker {
        let broker = OAuthBroker::new(dir.path(), 0);
        broker
            .store()
            .save_client_info(
                "docs",
                &ClientInfo {
                    client_id: "client-1".to_string(),
                    client_secret: None,
                    extra: serde_json::Map::new(),
                },
            )
            .unwrap();
        broker
    }

    #[test]
    fn test_client_metadata_shape() {
        let broker = OAuthBroker::new("/tmp/never-used", DEFAULT_REDIRECT_PORT);
        let metadata = broker.client_metadata();

        assert_eq!(metadata["token_endpoint_auth_method"], "none");
        assert_eq!(metadata["response_types"][0], "code");
        assert_eq!(metadata["grant_types"][0], "authorization_code");
        assert_eq!(metadata["grant_types"][1], "refresh_token");
        assert_eq!(
            metadata["redirect_uris"][0],
            "http://localhost:3000/callback"
        );
    }

    #[tokio::test]
    async fn test_happy_path_persists_tokens() {
        let dir = tempfile::tempdir().unwrap();
        let broker = preregistered_broker(&dir);
        let server_port = spawn_fake_auth_server().await;
        let server_url = format!("http://127.0.0.1:{server_port}/mcp");

        broker.begin_authorization("docs", &server_url).await.unwrap();
        let port = broker.pending_redirect_port("docs").await.unwrap();

        // Simulate the operator completing the redirect.
        let mut stream = tokio::net::TcpStream::connect(("127.0.0.1", port))
            .await
            .unwrap();
        stream
            .write_all(b"GET /callback?code=XYZ HTTP/1.1\r\n\r\n")
            .await
            .unwrap();
        let mut drain = Vec::new();
        let _ = stream.read_to_end(&mut drain).await;

        let tokens = broker
            .await_authorization("docs", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(tokens.access_token, "fresh-token");

        // tokens.json exists, verifier is consumed.
        assert!(dir.path().join("docs/tokens.json").exists());
        assert!(!dir.path().join("docs/code_verifier.txt").exists());
    }

    #[tokio::test]
    async fn test_begin_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let broker = preregistered_broker(&dir);
        let server_port = spawn_fake_auth_server().await;
        let server_url = format!("http://127.0.0.1:{server_port}/mcp");

        broker.begin_authorization("docs", &server_url).await.unwrap();
        let first = broker.pending_redirect_port("docs").await.unwrap();

        broker.begin_authorization("docs", &server_url).await.unwrap();
        assert_eq!(broker.pending_redirect_port("docs").await.unwrap(), first);
    }

    #[tokio::test]
    async fn test_await_timeout_clears_flow() {
        let dir = tempfile::tempdir().unwrap();
        let broker = preregistered_broker(&dir);
        let server_port = spawn_fake_auth_server().await;
        let server_url = format!("http://127.0.0.1:{server_port}/mcp");

        broker.begin_authorization("docs", &server_url).await.unwrap();
        let outcome = broker
            .await_authorization("docs", Duration::from_millis(50))
            .await;
        assert!(matches!(outcome, Err(OAuthError::CallbackTimeout)));

        // The next attempt begins a fresh flow rather than reusing state.
        assert!(broker.pending_redirect_port("docs").await.is_none());
        broker.begin_authorization("docs", &server_url).await.unwrap();
        assert!(broker.pending_redirect_port("docs").await.is_some());
    }

    #[tokio::test]
    async fn test_await_without_begin() {
        let dir = tempfile::tempdir().unwrap();
        let broker = preregistered_broker(&dir);
        assert!(matches!(
            broker
                .await_authorization("docs", Duration::from_millis(10))
                .await,
            Err(OAuthError::NoPendingFlow(_))
        ));
    }
}
