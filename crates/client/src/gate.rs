// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Marks explicit auth flows so the response pipeline stays out of their way.
//!
//! While any [`AuthFlowGuard`] is alive, automatic refresh-on-401 and login
//! redirects are suppressed. Guards end the flow in `Drop`, so the marker is
//! released on success, error, early return, and future cancellation alike.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::debug;

/// The explicit auth operations that hold the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOperation {
    Login,
    ForceLogin,
    Register,
    ForgotPassword,
    ResetPassword,
    Refresh,
    Logout,
}

impl AuthOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::ForceLogin => "force_login",
            Self::Register => "register",
            Self::ForgotPassword => "forgot_password",
            Self::ResetPassword => "reset_password",
            Self::Refresh => "refresh",
            Self::Logout => "logout",
        }
    }
}

impl fmt::Display for AuthOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Process-wide "auth operation in progress" marker.
///
/// Counts nested flows; [`is_active`](Self::is_active) stays true until the
/// outermost guard is dropped.
#[derive(Debug, Default)]
pub struct AuthFlowGate {
    depth: AtomicUsize,
}

impl AuthFlowGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin an explicit auth flow. The flow ends when the guard drops.
    pub fn begin(&self, op: AuthOperation) -> AuthFlowGuard<'_> {
        let depth = self.depth.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(op = %op, depth, "auth flow started");
        AuthFlowGuard { gate: self, op }
    }

    pub fn is_active(&self) -> bool {
        self.depth.load(Ordering::SeqCst) > 0
    }
}

/// Scoped hold on the [`AuthFlowGate`].
#[must_use = "the auth flow ends as soon as the guard is dropped"]
pub struct AuthFlowGuard<'a> {
    gate: &'a AuthFlowGate,
    op: AuthOperation,
}

impl AuthFlowGuard<'_> {
    pub fn operation(&self) -> AuthOperation {
        self.op
    }
}

impl Drop for AuthFlowGuard<'_> {
    fn drop(&mut self) {
        let prev = self.gate.depth.fetch_sub(1, Ordering::SeqCst);
        debug!(op = %self.op, depth = prev.saturating_sub(1), "auth flow ended");
    }
}

#[cfg(test)]
#[path = "gate_tests.rs"]
mod tests;
