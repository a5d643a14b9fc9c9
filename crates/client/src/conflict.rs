// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! One-session-per-account handshake.
//!
//! A login rejected because the account is active elsewhere moves the
//! negotiator to [`SessionConflict::Detected`]. The user then either forces
//! the login (the server invalidates the other session) or cancels.

use parking_lot::Mutex;
use reqwest::StatusCode;
use serde::Serialize;
use serde_json::Value;
use tracing::info;

/// Error code the platform uses for "session active elsewhere".
pub const SESSION_ACTIVE_CODE: &str = "SESSION_ACTIVE";

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionConflict {
    #[default]
    None,
    Detected,
    Resolved,
}

/// Whether a login response signals an active session elsewhere.
pub fn is_conflict_signal(status: StatusCode, body: &Value) -> bool {
    if status == StatusCode::CONFLICT {
        return true;
    }
    status.is_client_error()
        && body.get("code").and_then(Value::as_str) == Some(SESSION_ACTIVE_CODE)
}

#[derive(Debug, Default)]
pub struct ConflictNegotiator {
    state: Mutex<SessionConflict>,
}

impl ConflictNegotiator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SessionConflict {
        *self.state.lock()
    }

    pub(crate) fn detected(&self) {
        *self.state.lock() = SessionConflict::Detected;
        info!("login rejected: session active elsewhere");
    }

    /// Record a successful login. A forced login resolves the conflict;
    /// a plain one leaves nothing to resolve.
    pub(crate) fn login_succeeded(&self, forced: bool) {
        let mut state = self.state.lock();
        *state = if forced { SessionConflict::Resolved } else { SessionConflict::None };
    }

    /// Drop a detected conflict without sending anything.
    pub fn cancel(&self) {
        let mut state = self.state.lock();
        if *state != SessionConflict::None {
            info!(from = ?*state, "session conflict cancelled");
        }
        *state = SessionConflict::None;
    }
}

#[cfg(test)]
#[path = "conflict_tests.rs"]
mod tests;
