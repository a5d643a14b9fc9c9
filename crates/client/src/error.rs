// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::fmt;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Machine-readable error categories surfaced to UI collaborators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    Network,
    Unauthorized,
    Validation,
    RateLimited,
    Server,
    Conflict,
    Http,
    Decode,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "NETWORK",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::Validation => "VALIDATION",
            Self::RateLimited => "RATE_LIMITED",
            Self::Server => "SERVER",
            Self::Conflict => "SESSION_CONFLICT",
            Self::Http => "HTTP",
            Self::Decode => "DECODE",
        }
    }

    /// Short categorized message for end users. Never includes error chains.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Network => "Can't reach the server. Check your connection and try again.",
            Self::Unauthorized => "Your session has expired. Please sign in again.",
            Self::Validation => "Some of the details you entered aren't valid.",
            Self::RateLimited => "Too many attempts. Please wait a moment and try again.",
            Self::Server => "Something went wrong on our side. Please try again.",
            Self::Conflict => "You're already signed in on another device.",
            Self::Http => "The request couldn't be completed.",
            Self::Decode => "The server sent an unexpected response.",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors returned by the API pipeline.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ApiError {
    /// No response was received (connect failure, reset, timeout).
    #[error("network error: {message}")]
    Network { message: String, timed_out: bool },
    #[error("unauthorized: {message}")]
    Unauthorized { message: String },
    #[error("validation failed: {message}")]
    Validation { message: String, details: Value },
    #[error("rate limited: {message}")]
    RateLimited { message: String, retry_after_secs: Option<u64> },
    #[error("server error ({status}): {message}")]
    Server { status: u16, message: String },
    /// Login rejected because the account has an active session elsewhere.
    #[error("session conflict: {message}")]
    Conflict { status: u16, message: String },
    #[error("request failed ({status}): {message}")]
    Http { status: u16, message: String },
    #[error("unexpected response body: {0}")]
    Decode(String),
}

impl ApiError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Network { .. } => ErrorKind::Network,
            Self::Unauthorized { .. } => ErrorKind::Unauthorized,
            Self::Validation { .. } => ErrorKind::Validation,
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::Server { .. } => ErrorKind::Server,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::Http { .. } => ErrorKind::Http,
            Self::Decode(_) => ErrorKind::Decode,
        }
    }

    /// HTTP status that produced this error, if a response was received.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Network { .. } | Self::Decode(_) => None,
            Self::Unauthorized { .. } => Some(401),
            Self::Validation { .. } => Some(422),
            Self::RateLimited { .. } => Some(429),
            Self::Server { status, .. }
            | Self::Conflict { status, .. }
            | Self::Http { status, .. } => Some(*status),
        }
    }

    pub fn user_message(&self) -> &'static str {
        self.kind().user_message()
    }

    pub(crate) fn from_transport(err: &reqwest::Error) -> Self {
        Self::Network { message: err.to_string(), timed_out: err.is_timeout() }
    }

    /// Map a non-success response to the taxonomy.
    ///
    /// `conflict_allowed` is set only for the login endpoint, where a 409 (or
    /// a `SESSION_ACTIVE` code) means the account is signed in elsewhere.
    pub(crate) fn from_response(
        status: StatusCode,
        body: &Value,
        retry_after_secs: Option<u64>,
        conflict_allowed: bool,
    ) -> Self {
        let message = error_message(body).unwrap_or_else(|| {
            status.canonical_reason().unwrap_or("request failed").to_owned()
        });
        let code = status.as_u16();
        if conflict_allowed && crate::conflict::is_conflict_signal(status, body) {
            return Self::Conflict { status: code, message };
        }
        match code {
            401 => Self::Unauthorized { message },
            422 => Self::Validation { message, details: body.clone() },
            429 => Self::RateLimited { message, retry_after_secs },
            500..=599 => Self::Server { status: code, message },
            _ => Self::Http { status: code, message },
        }
    }
}

/// Pull a human-readable message out of a JSON error body.
///
/// Accepts `detail`, `message` or `error` as a string. A FastAPI-style
/// `detail` array of validation entries yields the first entry's `msg`.
pub fn error_message(body: &Value) -> Option<String> {
    for key in ["detail", "message", "error"] {
        match body.get(key) {
            Some(Value::String(s)) if !s.is_empty() => return Some(s.clone()),
            Some(Value::Array(items)) => {
                if let Some(msg) = items.iter().find_map(|i| i.get("msg")?.as_str()) {
                    return Some(msg.to_owned());
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
