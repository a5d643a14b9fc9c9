// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire types and endpoint paths of the platform's auth API.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const LOGIN_PATH: &str = "/auth/login";
pub const REGISTER_PATH: &str = "/auth/register";
pub const REFRESH_PATH: &str = "/auth/refresh";
pub const LOGOUT_PATH: &str = "/auth/logout";
pub const FORGOT_PASSWORD_PATH: &str = "/auth/forgot-password";
pub const RESET_PASSWORD_PATH: &str = "/auth/reset-password";
pub const ME_PATH: &str = "/auth/me";

/// Endpoints owned by explicit auth flows. Responses from these are never
/// intercepted, refreshed, or retried.
pub const AUTH_FLOW_PATHS: &[&str] = &[
    LOGIN_PATH,
    REGISTER_PATH,
    REFRESH_PATH,
    LOGOUT_PATH,
    FORGOT_PASSWORD_PATH,
    RESET_PASSWORD_PATH,
];

/// Whether `path` (optionally with a query string) is an auth-flow endpoint.
pub fn is_auth_flow_path(path: &str) -> bool {
    let path = path.split(['?', '#']).next().unwrap_or(path);
    let path = path.trim_end_matches('/');
    AUTH_FLOW_PATHS.contains(&path)
}

/// Email/password credentials for login.
#[derive(Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl Credentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self { email: email.into(), password: password.into() }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials").field("email", &self.email).field("password", &"***").finish()
    }
}

/// Body of `POST /auth/login`.
#[derive(Debug, Serialize)]
pub(crate) struct LoginRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
    /// Invalidate any other active session for the account.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub force: bool,
}

/// Body of `POST /auth/register`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Registration {
    pub name: String,
    pub email: String,
    pub password: String,
}

/// Body of `POST /auth/forgot-password`.
#[derive(Debug, Serialize)]
pub(crate) struct ForgotPasswordRequest<'a> {
    pub email: &'a str,
}

/// Body of `POST /auth/reset-password`.
#[derive(Debug, Serialize)]
pub(crate) struct ResetPasswordRequest<'a> {
    pub token: &'a str,
    pub new_password: &'a str,
}

/// Success body of `POST /auth/login` and `POST /auth/refresh`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
}

/// Server-confirmed identity from `GET /auth/me`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionUser {
    pub id: Value,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    /// Any further profile fields the platform sends.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SessionUser {
    /// The id rendered as text, whether the platform sends a number or a string.
    pub fn id_string(&self) -> String {
        match &self.id {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
#[path = "api_tests.rs"]
mod tests;
