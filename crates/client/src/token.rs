// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Access-token storage and request authorization.
//!
//! The refresh token never passes through here: it lives in an HTTP-only
//! cookie held by the HTTP client's cookie store.

use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// File name of the persisted session document inside the state directory.
pub const SESSION_FILE: &str = "session.json";

/// Stored token values that mean "no token".
const SENTINELS: &[&str] = &["null", "undefined"];

/// On-disk shape: the token under the single `access_token` key.
#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedSession {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    access_token: Option<String>,
}

/// Holds the current access token, optionally mirrored to disk.
///
/// Last write wins. The lock is never held across an await.
pub struct TokenStore {
    token: RwLock<Option<String>>,
    path: Option<PathBuf>,
}

impl TokenStore {
    /// A store that never touches the filesystem.
    pub fn in_memory() -> Self {
        Self { token: RwLock::new(None), path: None }
    }

    /// A store persisted to `<state_dir>/session.json`.
    pub fn persistent(state_dir: &Path) -> Self {
        Self { token: RwLock::new(None), path: Some(state_dir.join(SESSION_FILE)) }
    }

    /// Read the persisted token into memory and return it.
    ///
    /// Missing or unreadable files yield `None`. A memory-only store returns
    /// whatever it currently holds.
    pub fn load(&self) -> Option<String> {
        let Some(ref path) = self.path else {
            return self.get();
        };
        let loaded = match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str::<PersistedSession>(&contents) {
                Ok(session) => session.access_token,
                Err(e) => {
                    warn!(path = %path.display(), err = %e, "ignoring malformed session file");
                    None
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                warn!(path = %path.display(), err = %e, "failed to read session file");
                None
            }
        };
        *self.token.write() = loaded.clone();
        loaded
    }

    pub fn get(&self) -> Option<String> {
        self.token.read().clone()
    }

    pub fn set(&self, token: impl Into<String>) {
        let token = token.into();
        *self.token.write() = Some(token.clone());
        self.persist(Some(token));
        debug!("access token stored");
    }

    pub fn clear(&self) {
        *self.token.write() = None;
        self.persist(None);
        debug!("access token cleared");
    }

    fn persist(&self, token: Option<String>) {
        let Some(ref path) = self.path else {
            return;
        };
        if let Some(dir) = path.parent() {
            if let Err(e) = std::fs::create_dir_all(dir) {
                warn!(err = %e, "failed to create state dir");
                return;
            }
        }
        let doc = PersistedSession { access_token: token };
        let result = serde_json::to_string_pretty(&doc)
            .map_err(std::io::Error::other)
            .and_then(|json| std::fs::write(path, json));
        if let Err(e) = result {
            warn!(path = %path.display(), err = %e, "failed to persist access token");
        }
    }
}

/// Whether a stored token value should be sent at all.
pub fn is_usable(token: Option<&str>) -> bool {
    match token.map(str::trim) {
        Some(t) => !t.is_empty() && !SENTINELS.contains(&t),
        None => false,
    }
}

/// Set `Authorization: Bearer <token>` when the token is usable, otherwise
/// strip any authorization header so the request goes out unauthenticated.
pub fn authorize(headers: &mut HeaderMap, token: Option<&str>) {
    let value = token
        .filter(|t| is_usable(Some(t)))
        .and_then(|t| HeaderValue::from_str(&format!("Bearer {}", t.trim())).ok());
    match value {
        Some(mut v) => {
            v.set_sensitive(true);
            headers.insert(AUTHORIZATION, v);
        }
        None => {
            headers.remove(AUTHORIZATION);
        }
    }
}

#[cfg(test)]
#[path = "token_tests.rs"]
mod tests;
