// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Request pipeline for the platform API.
//!
//! [`AuthResilienceService`] owns the token store, the auth-flow gate, the
//! refresh coordinator, the auth state and the offline queue. Every call goes
//! through [`AuthResilienceService::execute`]:
//!
//! 1. the current token is attached (or not) by [`authorize`],
//! 2. the response is classified into [`ApiError`],
//! 3. a 401 from a non-auth endpoint is recovered once through the shared
//!    refresh, unless an explicit auth flow holds the gate.

use std::sync::Arc;

use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub use reqwest::Method;

use crate::api::{self, SessionUser, TokenResponse};
use crate::config::ClientConfig;
use crate::conflict::{ConflictNegotiator, SessionConflict};
use crate::error::ApiError;
use crate::gate::AuthFlowGate;
use crate::offline::{Dispatch, DrainReport, OfflineQueue};
use crate::refresh::{RefreshCoordinator, RefreshResult, RefreshState};
use crate::state::{AuthSnapshot, AuthState, SessionEvent};
use crate::token::{authorize, is_usable, TokenStore};

/// Descriptor of one API call.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
    /// Set once this request has been through a refresh-and-retry cycle.
    retried: bool,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self { method, path: path.into(), body: None, retried: false }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn retried(&self) -> bool {
        self.retried
    }

    /// Path without query string or fragment.
    pub fn endpoint(&self) -> &str {
        self.path.split(['?', '#']).next().unwrap_or(&self.path)
    }

    pub fn is_auth_flow(&self) -> bool {
        api::is_auth_flow_path(&self.path)
    }

    /// Whether the call changes server state (and so may be queued offline).
    pub fn is_mutating(&self) -> bool {
        !matches!(self.method, Method::GET | Method::HEAD | Method::OPTIONS)
    }

    fn label(&self) -> String {
        format!("{} {}", self.method, self.endpoint())
    }
}

/// A successful response.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    /// Parsed JSON body; `Null` when empty, a string when not JSON.
    pub body: Value,
}

impl ApiResponse {
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        serde_json::from_value(self.body.clone()).map_err(|e| ApiError::Decode(e.to_string()))
    }
}

struct RawResponse {
    status: StatusCode,
    body: Value,
    retry_after_secs: Option<u64>,
}

/// The pieces a refresh needs. Held by the shared refresh future, so it
/// must not own the service itself.
#[derive(Clone)]
struct RefreshContext {
    http: reqwest::Client,
    url: String,
    tokens: Arc<TokenStore>,
    gate: Arc<AuthFlowGate>,
    auth: Arc<AuthState>,
}

pub(crate) struct Inner {
    pub(crate) config: ClientConfig,
    base_url: String,
    http: reqwest::Client,
    pub(crate) tokens: Arc<TokenStore>,
    pub(crate) gate: Arc<AuthFlowGate>,
    pub(crate) refresh: RefreshCoordinator,
    pub(crate) auth: Arc<AuthState>,
    pub(crate) conflict: ConflictNegotiator,
    pub(crate) offline: Arc<OfflineQueue>,
}

/// Authentication and API-resilience service. Cheap to clone; clones share
/// all state.
#[derive(Clone)]
pub struct AuthResilienceService {
    pub(crate) inner: Arc<Inner>,
}

impl AuthResilienceService {
    pub fn new(config: ClientConfig) -> anyhow::Result<Self> {
        config.validate()?;
        crate::ensure_crypto();

        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .cookie_store(true)
            .build()?;
        let tokens = match config.session_dir() {
            Some(dir) => TokenStore::persistent(&dir),
            None => TokenStore::in_memory(),
        };

        Ok(Self {
            inner: Arc::new(Inner {
                base_url: config.base_url(),
                http,
                tokens: Arc::new(tokens),
                gate: Arc::new(AuthFlowGate::new()),
                refresh: RefreshCoordinator::new(),
                auth: Arc::new(AuthState::new(config.redirect_policy())),
                conflict: ConflictNegotiator::new(),
                offline: Arc::new(OfflineQueue::new(!config.offline)),
                config,
            }),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    // -- Request pipeline ----------------------------------------------------

    /// Send a request through the pipeline.
    pub async fn execute(&self, mut req: ApiRequest) -> Result<ApiResponse, ApiError> {
        let sent_with = self.inner.tokens.get();
        let raw = self.dispatch(&req, sent_with.as_deref()).await?;

        if raw.status != StatusCode::UNAUTHORIZED || !self.should_recover(&req) {
            return Self::finish(&req, raw);
        }

        req.retried = true;
        let token = match self.recover_token(sent_with.as_deref()).await {
            Ok(token) => token,
            Err(e) => {
                debug!(path = %req.endpoint(), err = %e, "session recovery failed");
                return Self::finish(&req, raw);
            }
        };

        debug!(path = %req.endpoint(), "retrying with refreshed token");
        let raw = self.dispatch(&req, Some(&token)).await?;
        Self::finish(&req, raw)
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.execute(ApiRequest::get(path)).await?.json()
    }

    pub async fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let body = to_body(body)?;
        self.execute(ApiRequest::post(path).json(body)).await?.json()
    }

    /// Send a request, parking it in the offline queue if it is mutating and
    /// the device is offline. Reads always go straight through.
    pub async fn submit(&self, req: ApiRequest) -> Result<Dispatch<ApiResponse>, ApiError> {
        if !req.is_mutating() {
            return self.execute(req).await.map(Dispatch::Completed);
        }
        // The queue lives inside `Inner`, so a parked replay must not own it.
        let inner = Arc::downgrade(&self.inner);
        let label = req.label();
        self.inner
            .offline
            .queue_or_run(label, move || async move {
                let Some(inner) = inner.upgrade() else {
                    return Err(ApiError::Network {
                        message: "client was shut down before replay".to_owned(),
                        timed_out: false,
                    });
                };
                AuthResilienceService { inner }.execute(req).await
            })
            .await
    }

    /// Route an arbitrary mutating operation through the offline queue.
    pub async fn queue_or_run<T, F, Fut>(
        &self,
        label: impl Into<String>,
        op: F,
    ) -> Result<Dispatch<T>, ApiError>
    where
        T: Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Result<T, ApiError>> + Send + 'static,
    {
        self.inner.offline.queue_or_run(label, op).await
    }

    fn should_recover(&self, req: &ApiRequest) -> bool {
        if req.is_auth_flow() {
            return false;
        }
        if req.retried {
            debug!(path = %req.endpoint(), "401 after retry, giving up");
            return false;
        }
        if self.inner.gate.is_active() {
            debug!(path = %req.endpoint(), "401 during auth flow, not refreshing");
            return false;
        }
        true
    }

    /// Token to retry with after a 401.
    async fn recover_token(&self, sent_with: Option<&str>) -> Result<String, ApiError> {
        // Another request may already have rotated the token since this one
        // was sent.
        if let Some(current) = self.inner.tokens.get().filter(|t| is_usable(Some(t))) {
            if sent_with != Some(current.as_str()) {
                return Ok(current);
            }
        }
        self.refresh_shared().await
    }

    /// Join or start the single shared refresh.
    pub(crate) async fn refresh_shared(&self) -> RefreshResult {
        let ctx = RefreshContext {
            http: self.inner.http.clone(),
            url: self.url(api::REFRESH_PATH),
            tokens: Arc::clone(&self.inner.tokens),
            gate: Arc::clone(&self.inner.gate),
            auth: Arc::clone(&self.inner.auth),
        };
        self.inner.refresh.refresh(move || run_refresh(ctx)).await
    }

    async fn dispatch(
        &self,
        req: &ApiRequest,
        token: Option<&str>,
    ) -> Result<RawResponse, ApiError> {
        let mut headers = HeaderMap::new();
        authorize(&mut headers, token);

        let mut builder =
            self.inner.http.request(req.method.clone(), self.url(&req.path)).headers(headers);
        if let Some(ref body) = req.body {
            builder = builder.json(body);
        }

        let resp = builder.send().await.map_err(|e| {
            warn!(method = %req.method, path = %req.endpoint(), err = %e, "request failed");
            ApiError::from_transport(&e)
        })?;
        read_response(resp).await
    }

    fn finish(req: &ApiRequest, raw: RawResponse) -> Result<ApiResponse, ApiError> {
        if raw.status.is_success() {
            return Ok(ApiResponse { status: raw.status.as_u16(), body: raw.body });
        }
        let err = ApiError::from_response(
            raw.status,
            &raw.body,
            raw.retry_after_secs,
            req.endpoint() == api::LOGIN_PATH,
        );
        if raw.status.is_server_error() {
            warn!(method = %req.method, path = %req.endpoint(), status = raw.status.as_u16(), "server error");
        } else {
            debug!(method = %req.method, path = %req.endpoint(), status = raw.status.as_u16(), kind = %err.kind(), "request rejected");
        }
        Err(err)
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_owned();
        }
        format!("{}{}", self.inner.base_url, path)
    }

    // -- State surface -------------------------------------------------------

    pub fn snapshot(&self) -> AuthSnapshot {
        self.inner.auth.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<AuthSnapshot> {
        self.inner.auth.subscribe()
    }

    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.auth.events()
    }

    pub fn user(&self) -> Option<SessionUser> {
        self.inner.auth.user()
    }

    pub fn is_authenticated(&self) -> bool {
        self.snapshot().is_authenticated()
    }

    /// Whether a usable access token is held.
    pub fn has_token(&self) -> bool {
        is_usable(self.inner.tokens.get().as_deref())
    }

    /// Read the persisted token into memory without contacting the server.
    /// Returns whether a usable one was found.
    pub fn load_stored_token(&self) -> bool {
        is_usable(self.inner.tokens.load().as_deref())
    }

    /// Report the location the UI is showing (used by the redirect policy).
    pub fn set_location(&self, path: impl Into<String>) {
        self.inner.auth.set_location(path);
    }

    pub fn conflict_state(&self) -> SessionConflict {
        self.inner.conflict.state()
    }

    pub fn refresh_state(&self) -> RefreshState {
        self.inner.refresh.state()
    }

    pub fn auth_flow_active(&self) -> bool {
        self.inner.gate.is_active()
    }

    // -- Connectivity --------------------------------------------------------

    pub fn is_online(&self) -> bool {
        self.inner.offline.is_online()
    }

    /// Update connectivity. Going online spawns a drain of queued writes.
    pub fn set_online(&self, online: bool) -> Option<JoinHandle<DrainReport>> {
        self.inner.offline.set_online(online)
    }

    pub fn spawn_connectivity_watcher(
        &self,
        connectivity: watch::Receiver<bool>,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        self.inner.offline.spawn_connectivity_watcher(connectivity, shutdown)
    }

    pub fn pending_operations(&self) -> Vec<String> {
        self.inner.offline.pending_labels()
    }
}

pub(crate) fn to_body<B: Serialize>(body: &B) -> Result<Value, ApiError> {
    serde_json::to_value(body).map_err(|e| ApiError::Decode(format!("request body: {e}")))
}

async fn read_response(resp: reqwest::Response) -> Result<RawResponse, ApiError> {
    let status = resp.status();
    let retry_after_secs = resp
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok());
    let bytes = resp.bytes().await.map_err(|e| ApiError::from_transport(&e))?;
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
    };
    Ok(RawResponse { status, body, retry_after_secs })
}

/// One refresh attempt, including its side effects. Runs once per attempt
/// no matter how many requests are waiting on it.
async fn run_refresh(ctx: RefreshContext) -> RefreshResult {
    info!("refreshing access token");
    match request_new_token(&ctx).await {
        Ok(token) => {
            ctx.tokens.set(token.clone());
            ctx.auth.emit(SessionEvent::TokenRefreshed);
            info!("access token refreshed");
            Ok(token)
        }
        Err(e) => {
            warn!(err = %e, "token refresh failed");
            if ctx.gate.is_active() {
                debug!("auth flow in progress, leaving session to it");
            } else {
                ctx.tokens.clear();
                if ctx.auth.clear_user() {
                    ctx.auth.emit(SessionEvent::SignedOut);
                }
                ctx.auth.request_login_redirect();
            }
            Err(e)
        }
    }
}

async fn request_new_token(ctx: &RefreshContext) -> RefreshResult {
    let resp = ctx.http.post(&ctx.url).send().await.map_err(|e| ApiError::from_transport(&e))?;
    let raw = read_response(resp).await?;
    if !raw.status.is_success() {
        return Err(ApiError::from_response(raw.status, &raw.body, raw.retry_after_secs, false));
    }
    let token: TokenResponse =
        serde_json::from_value(raw.body).map_err(|e| ApiError::Decode(e.to_string()))?;
    if !is_usable(Some(&token.access_token)) {
        return Err(ApiError::Decode("refresh returned an empty access token".to_owned()));
    }
    Ok(token.access_token)
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
