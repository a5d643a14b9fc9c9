// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Observable authentication state.
//!
//! UI collaborators watch an [`AuthSnapshot`] for rendering decisions and
//! listen to [`SessionEvent`]s for navigation. The core never navigates by
//! itself; it only announces that a login redirect is due.

use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tracing::{debug, info};

use crate::api::SessionUser;

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Point-in-time view of the auth state.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AuthSnapshot {
    /// False until the start-up session check has resolved either way.
    pub is_auth_ready: bool,
    pub user: Option<SessionUser>,
    pub loading_user: bool,
}

impl AuthSnapshot {
    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }
}

/// Events broadcast to whoever owns navigation and notifications.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    SignedIn { user_id: String },
    SignedOut,
    TokenRefreshed,
    /// Recovery failed; the UI should navigate to `redirect_to`.
    LoginRequired { redirect_to: String },
    /// Login was rejected because the account is active elsewhere.
    ConflictDetected,
}

/// Redirect policy: where to send the user and which pages already are
/// auth pages (no redirect while on them).
#[derive(Debug, Clone)]
pub struct RedirectPolicy {
    pub login_path: String,
    pub auth_pages: Vec<String>,
}

impl Default for RedirectPolicy {
    fn default() -> Self {
        Self { login_path: "/login".to_owned(), auth_pages: vec!["/login".into(), "/signup".into()] }
    }
}

impl RedirectPolicy {
    pub fn is_auth_page(&self, location: &str) -> bool {
        self.auth_pages.iter().any(|page| location.contains(page.as_str()))
    }
}

pub struct AuthState {
    snapshot: watch::Sender<AuthSnapshot>,
    events: broadcast::Sender<SessionEvent>,
    location: RwLock<String>,
    policy: RedirectPolicy,
    /// Open user fetches; `loading_user` is true while this is nonzero.
    loading: AtomicUsize,
}

impl AuthState {
    pub fn new(policy: RedirectPolicy) -> Self {
        let (snapshot, _) = watch::channel(AuthSnapshot::default());
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            snapshot,
            events,
            location: RwLock::new("/".to_owned()),
            policy,
            loading: AtomicUsize::new(0),
        }
    }

    pub fn snapshot(&self) -> AuthSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<AuthSnapshot> {
        self.snapshot.subscribe()
    }

    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn user(&self) -> Option<SessionUser> {
        self.snapshot.borrow().user.clone()
    }

    pub fn set_user(&self, user: SessionUser) {
        self.snapshot.send_modify(|s| s.user = Some(user));
    }

    /// Drop the identity. Returns whether a user was present.
    pub fn clear_user(&self) -> bool {
        let mut had_user = false;
        self.snapshot.send_if_modified(|s| {
            had_user = s.user.take().is_some();
            had_user
        });
        had_user
    }

    /// Mark a user fetch in progress until the guard drops. Overlapping
    /// fetches keep the flag set until the last one finishes.
    pub fn begin_loading(&self) -> LoadingGuard<'_> {
        // The counter is updated under the watch lock so flag and depth agree.
        self.snapshot.send_modify(|s| {
            self.loading.fetch_add(1, Ordering::SeqCst);
            s.loading_user = true;
        });
        LoadingGuard { state: self }
    }

    /// Readiness flips to true when the returned guard drops.
    pub(crate) fn ready_on_drop(&self) -> ReadyGuard<'_> {
        ReadyGuard { state: self }
    }

    pub fn emit(&self, event: SessionEvent) {
        debug!(?event, "session event");
        let _ = self.events.send(event);
    }

    /// Record the location the UI is currently showing.
    pub fn set_location(&self, path: impl Into<String>) {
        *self.location.write() = path.into();
    }

    pub fn location(&self) -> String {
        self.location.read().clone()
    }

    /// Announce a login redirect unless the user is already on an auth page.
    /// Returns whether the redirect was scheduled.
    pub fn request_login_redirect(&self) -> bool {
        let location = self.location();
        if self.policy.is_auth_page(&location) {
            debug!(%location, "already on an auth page, not redirecting");
            return false;
        }
        info!(from = %location, to = %self.policy.login_path, "scheduling login redirect");
        self.emit(SessionEvent::LoginRequired { redirect_to: self.policy.login_path.clone() });
        true
    }
}

pub struct LoadingGuard<'a> {
    state: &'a AuthState,
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        let state = self.state;
        state.snapshot.send_if_modified(|s| {
            let remaining = state.loading.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
            let loading = remaining > 0;
            let changed = s.loading_user != loading;
            s.loading_user = loading;
            changed
        });
    }
}

pub(crate) struct ReadyGuard<'a> {
    state: &'a AuthState,
}

impl Drop for ReadyGuard<'_> {
    fn drop(&mut self) {
        self.state.snapshot.send_if_modified(|s| !std::mem::replace(&mut s.is_auth_ready, true));
    }
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;
