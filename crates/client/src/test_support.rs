// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-process stand-in for the platform API, for tests.
//!
//! Implements the auth endpoints with one-session-per-account enforcement,
//! an HTTP-only refresh cookie and rotating access tokens, plus two
//! protected practice endpoints. Knobs let tests expire tokens, slow down
//! or break refresh, and inspect what the client sent.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Request, State};
use axum::http::header::{AUTHORIZATION, COOKIE, SET_COOKIE};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::task::JoinHandle;

use crate::api;
use crate::config::ClientConfig;

const REFRESH_COOKIE: &str = "refresh_token";

pub const PRACTICE_SESSIONS_PATH: &str = "/api/practice/sessions";
pub const PRACTICE_ATTEMPTS_PATH: &str = "/api/practice/attempts";

/// One request as seen by the mock, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub authorization: Option<String>,
}

struct Account {
    id: u64,
    name: String,
    password: String,
}

#[derive(Default)]
struct PlatformState {
    accounts: Mutex<HashMap<String, Account>>,
    /// access token -> email
    access: Mutex<HashMap<String, String>>,
    /// email -> refresh token of the one active session
    sessions: Mutex<HashMap<String, String>>,
    /// reset token -> email
    reset_tokens: Mutex<HashMap<String, String>>,
    attempts: Mutex<Vec<Value>>,
    requests: Mutex<Vec<RecordedRequest>>,
    seq: AtomicU64,
    next_user_id: AtomicU64,
    refresh_calls: AtomicU32,
    refresh_delay_ms: AtomicU64,
    fail_refresh: AtomicBool,
    reject_all_tokens: AtomicBool,
}

impl PlatformState {
    fn next(&self, prefix: &str) -> String {
        format!("{prefix}-{}", self.seq.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn add_account(&self, email: &str, password: &str, name: &str) -> u64 {
        let id = self.next_user_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.accounts.lock().insert(
            email.to_owned(),
            Account { id, name: name.to_owned(), password: password.to_owned() },
        );
        id
    }

    fn issue_access(&self, email: &str) -> String {
        let token = self.next("access");
        let mut access = self.access.lock();
        access.retain(|_, owner| owner != email);
        access.insert(token.clone(), email.to_owned());
        token
    }

    /// Start a fresh session for `email`, replacing any other.
    fn open_session(&self, email: &str) -> (String, String) {
        let refresh = self.next("refresh");
        self.sessions.lock().insert(email.to_owned(), refresh.clone());
        (self.issue_access(email), refresh)
    }

    fn end_session(&self, email: &str) {
        self.sessions.lock().remove(email);
        self.access.lock().retain(|_, owner| owner != email);
    }

    fn bearer_email(&self, headers: &HeaderMap) -> Option<String> {
        if self.reject_all_tokens.load(Ordering::SeqCst) {
            return None;
        }
        let token = headers.get(AUTHORIZATION)?.to_str().ok()?.strip_prefix("Bearer ")?;
        self.access.lock().get(token).cloned()
    }

    fn cookie_email(&self, headers: &HeaderMap) -> Option<String> {
        let refresh = refresh_cookie(headers)?;
        self.sessions.lock().iter().find(|(_, t)| **t == refresh).map(|(email, _)| email.clone())
    }

    fn user_json(&self, email: &str) -> Option<Value> {
        let accounts = self.accounts.lock();
        let account = accounts.get(email)?;
        Some(json!({ "id": account.id, "name": account.name, "email": email }))
    }
}

/// A running mock platform. The server stops when this is dropped.
pub struct MockPlatform {
    addr: SocketAddr,
    state: Arc<PlatformState>,
    handle: JoinHandle<()>,
}

impl MockPlatform {
    /// Bind to an ephemeral localhost port and start serving.
    pub async fn start() -> anyhow::Result<Self> {
        let state = Arc::new(PlatformState::default());
        let router = build_router(Arc::clone(&state));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let handle = tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });
        Ok(Self { addr, state, handle })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Memory-only client config pointed at this platform.
    pub fn config(&self) -> ClientConfig {
        ClientConfig::for_url(self.base_url())
    }

    /// Create an account and return its user id.
    pub fn add_account(&self, email: &str, password: &str, name: &str) -> u64 {
        self.state.add_account(email, password, name)
    }

    /// Sign `email` in from some other device. Returns that device's access
    /// token, or `None` for an unknown account.
    pub fn sign_in_elsewhere(&self, email: &str) -> Option<String> {
        if !self.state.accounts.lock().contains_key(email) {
            return None;
        }
        Some(self.state.open_session(email).0)
    }

    pub fn has_session(&self, email: &str) -> bool {
        self.state.sessions.lock().contains_key(email)
    }

    /// Access token currently valid for `email`, if any.
    pub fn access_token_for(&self, email: &str) -> Option<String> {
        self.state.access.lock().iter().find(|(_, owner)| *owner == email).map(|(t, _)| t.clone())
    }

    /// Invalidate every access token. Refresh cookies stay valid.
    pub fn expire_access_tokens(&self) {
        self.state.access.lock().clear();
    }

    pub fn set_refresh_delay(&self, delay: Duration) {
        self.state.refresh_delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Make `/auth/refresh` answer 401 regardless of the cookie.
    pub fn fail_refresh(&self, fail: bool) {
        self.state.fail_refresh.store(fail, Ordering::SeqCst);
    }

    /// Make every protected endpoint answer 401, even for fresh tokens.
    pub fn reject_all_tokens(&self, reject: bool) {
        self.state.reject_all_tokens.store(reject, Ordering::SeqCst);
    }

    pub fn refresh_calls(&self) -> u32 {
        self.state.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.requests.lock().clone()
    }

    pub fn requests_to(&self, path: &str) -> Vec<RecordedRequest> {
        self.state.requests.lock().iter().filter(|r| r.path == path).cloned().collect()
    }

    /// Bodies posted to the attempts endpoint, in arrival order.
    pub fn attempts(&self) -> Vec<Value> {
        self.state.attempts.lock().clone()
    }

    /// The reset token most recently mailed to `email`.
    pub fn reset_token_for(&self, email: &str) -> Option<String> {
        self.state.reset_tokens.lock().iter().find(|(_, e)| *e == email).map(|(t, _)| t.clone())
    }
}

impl Drop for MockPlatform {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn build_router(state: Arc<PlatformState>) -> Router {
    Router::new()
        .route(api::LOGIN_PATH, post(login))
        .route(api::REFRESH_PATH, post(refresh))
        .route(api::LOGOUT_PATH, post(logout))
        .route(api::REGISTER_PATH, post(register))
        .route(api::FORGOT_PASSWORD_PATH, post(forgot_password))
        .route(api::RESET_PASSWORD_PATH, post(reset_password))
        .route(api::ME_PATH, get(me))
        .route(PRACTICE_SESSIONS_PATH, get(practice_sessions))
        .route(PRACTICE_ATTEMPTS_PATH, post(record_attempt))
        .layer(middleware::from_fn_with_state(Arc::clone(&state), record_request))
        .with_state(state)
}

async fn record_request(
    State(state): State<Arc<PlatformState>>,
    req: Request,
    next: Next,
) -> Response {
    let authorization =
        req.headers().get(AUTHORIZATION).and_then(|v| v.to_str().ok()).map(str::to_owned);
    state.requests.lock().push(RecordedRequest {
        method: req.method().to_string(),
        path: req.uri().path().to_owned(),
        authorization,
    });
    next.run(req).await
}

fn reply(status: StatusCode, body: Value) -> Response {
    (status, Json(body)).into_response()
}

fn detail(status: StatusCode, message: &str) -> Response {
    reply(status, json!({ "detail": message }))
}

fn refresh_cookie(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .find_map(|pair| pair.trim().strip_prefix(&format!("{REFRESH_COOKIE}=")).map(str::to_owned))
}

fn with_cookie(mut resp: Response, cookie: &str) -> Response {
    if let Ok(value) = HeaderValue::from_str(cookie) {
        resp.headers_mut().append(SET_COOKIE, value);
    }
    resp
}

#[derive(Deserialize)]
struct LoginBody {
    email: String,
    password: String,
    #[serde(default)]
    force: bool,
}

async fn login(State(state): State<Arc<PlatformState>>, Json(body): Json<LoginBody>) -> Response {
    let valid = state
        .accounts
        .lock()
        .get(&body.email)
        .is_some_and(|account| account.password == body.password);
    if !valid {
        return detail(StatusCode::UNAUTHORIZED, "Invalid email or password");
    }

    let active = state.sessions.lock().contains_key(&body.email);
    if active && !body.force {
        return reply(
            StatusCode::CONFLICT,
            json!({
                "detail": "This account is active on another device",
                "code": crate::conflict::SESSION_ACTIVE_CODE,
            }),
        );
    }
    if active {
        state.end_session(&body.email);
    }

    let (access, refresh) = state.open_session(&body.email);
    let resp = reply(StatusCode::OK, json!({ "access_token": access, "token_type": "bearer" }));
    with_cookie(resp, &format!("{REFRESH_COOKIE}={refresh}; HttpOnly; Path=/; SameSite=Lax"))
}

async fn refresh(State(state): State<Arc<PlatformState>>, headers: HeaderMap) -> Response {
    state.refresh_calls.fetch_add(1, Ordering::SeqCst);
    let delay = state.refresh_delay_ms.load(Ordering::SeqCst);
    if delay > 0 {
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }
    if state.fail_refresh.load(Ordering::SeqCst) {
        return detail(StatusCode::UNAUTHORIZED, "Refresh token expired");
    }
    match state.cookie_email(&headers) {
        Some(email) => {
            let access = state.issue_access(&email);
            reply(StatusCode::OK, json!({ "access_token": access, "token_type": "bearer" }))
        }
        None => detail(StatusCode::UNAUTHORIZED, "Missing or invalid refresh token"),
    }
}

async fn logout(State(state): State<Arc<PlatformState>>, headers: HeaderMap) -> Response {
    let email = state.cookie_email(&headers).or_else(|| state.bearer_email(&headers));
    if let Some(email) = email {
        state.end_session(&email);
    }
    let resp = detail(StatusCode::OK, "Logged out");
    with_cookie(resp, &format!("{REFRESH_COOKIE}=; HttpOnly; Path=/; Max-Age=0"))
}

#[derive(Deserialize)]
struct RegisterBody {
    name: String,
    email: String,
    password: String,
}

async fn register(
    State(state): State<Arc<PlatformState>>,
    Json(body): Json<RegisterBody>,
) -> Response {
    if !body.email.contains('@') {
        return reply(
            StatusCode::UNPROCESSABLE_ENTITY,
            json!({ "detail": [{ "loc": ["body", "email"], "msg": "value is not a valid email address" }] }),
        );
    }
    if body.password.len() < 8 {
        return reply(
            StatusCode::UNPROCESSABLE_ENTITY,
            json!({ "detail": [{ "loc": ["body", "password"], "msg": "password must be at least 8 characters" }] }),
        );
    }
    if state.accounts.lock().contains_key(&body.email) {
        return detail(StatusCode::BAD_REQUEST, "Email already registered");
    }
    let id = state.add_account(&body.email, &body.password, &body.name);
    reply(StatusCode::CREATED, json!({ "id": id, "name": body.name, "email": body.email }))
}

#[derive(Deserialize)]
struct ForgotBody {
    email: String,
}

async fn forgot_password(
    State(state): State<Arc<PlatformState>>,
    Json(body): Json<ForgotBody>,
) -> Response {
    if state.accounts.lock().contains_key(&body.email) {
        let token = state.next("reset");
        let mut resets = state.reset_tokens.lock();
        resets.retain(|_, email| *email != body.email);
        resets.insert(token, body.email);
    }
    detail(StatusCode::OK, "If the account exists, a reset link has been sent")
}

#[derive(Deserialize)]
struct ResetBody {
    token: String,
    new_password: String,
}

async fn reset_password(
    State(state): State<Arc<PlatformState>>,
    Json(body): Json<ResetBody>,
) -> Response {
    let Some(email) = state.reset_tokens.lock().remove(&body.token) else {
        return detail(StatusCode::BAD_REQUEST, "Invalid or expired reset token");
    };
    if let Some(account) = state.accounts.lock().get_mut(&email) {
        account.password = body.new_password;
    }
    state.end_session(&email);
    detail(StatusCode::OK, "Password updated")
}

async fn me(State(state): State<Arc<PlatformState>>, headers: HeaderMap) -> Response {
    match state.bearer_email(&headers).and_then(|email| state.user_json(&email)) {
        Some(user) => reply(StatusCode::OK, user),
        None => detail(StatusCode::UNAUTHORIZED, "Not authenticated"),
    }
}

async fn practice_sessions(State(state): State<Arc<PlatformState>>, headers: HeaderMap) -> Response {
    if state.bearer_email(&headers).is_none() {
        return detail(StatusCode::UNAUTHORIZED, "Not authenticated");
    }
    reply(
        StatusCode::OK,
        json!([
            { "id": 1, "topic": "Job interview" },
            { "id": 2, "topic": "Ordering at a cafe" },
        ]),
    )
}

async fn record_attempt(
    State(state): State<Arc<PlatformState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if state.bearer_email(&headers).is_none() {
        return detail(StatusCode::UNAUTHORIZED, "Not authenticated");
    }
    let id = {
        let mut attempts = state.attempts.lock();
        attempts.push(body);
        attempts.len()
    };
    reply(StatusCode::CREATED, json!({ "id": id }))
}
