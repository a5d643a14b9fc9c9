// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::time::Duration;

use crate::state::RedirectPolicy;

/// Connection and session settings for the platform client.
#[derive(Debug, Clone, clap::Args)]
pub struct ClientConfig {
    /// Base URL of the platform API.
    #[arg(long, env = "PARLANCE_API_URL", default_value = "http://127.0.0.1:8000")]
    pub api_url: String,

    /// Directory holding the persisted session. Defaults to the XDG state dir.
    #[arg(long, env = "PARLANCE_STATE_DIR")]
    pub state_dir: Option<PathBuf>,

    /// Keep the access token in memory only.
    #[arg(long, env = "PARLANCE_EPHEMERAL")]
    pub ephemeral: bool,

    /// Per-request timeout in milliseconds. Timed-out calls are not retried.
    #[arg(long, env = "PARLANCE_TIMEOUT_MS", default_value_t = 60_000)]
    pub timeout_ms: u64,

    /// Where a failed session recovery sends the user.
    #[arg(long, env = "PARLANCE_LOGIN_PATH", default_value = "/login")]
    pub login_path: String,

    /// Locations that count as auth pages (no redirect while on them).
    #[arg(
        long,
        env = "PARLANCE_AUTH_PAGES",
        value_delimiter = ',',
        default_values_t = [String::from("/login"), String::from("/signup")]
    )]
    pub auth_pages: Vec<String>,

    /// Start in offline mode: mutating calls are queued until back online.
    #[arg(long, env = "PARLANCE_OFFLINE")]
    pub offline: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: "http://127.0.0.1:8000".to_owned(),
            state_dir: None,
            ephemeral: true,
            timeout_ms: 60_000,
            login_path: "/login".to_owned(),
            auth_pages: vec!["/login".to_owned(), "/signup".to_owned()],
            offline: false,
        }
    }
}

impl ClientConfig {
    /// Memory-only config pointed at `api_url`.
    pub fn for_url(api_url: impl Into<String>) -> Self {
        Self { api_url: api_url.into(), ..Self::default() }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let url = self.api_url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            anyhow::bail!("api url must start with http:// or https://: {url}");
        }
        if self.timeout_ms == 0 {
            anyhow::bail!("timeout must be greater than zero");
        }
        if !self.login_path.starts_with('/') {
            anyhow::bail!("login path must be absolute: {}", self.login_path);
        }
        Ok(())
    }

    pub fn base_url(&self) -> String {
        self.api_url.trim().trim_end_matches('/').to_owned()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Session directory, or `None` when the token stays in memory.
    pub fn session_dir(&self) -> Option<PathBuf> {
        if self.ephemeral {
            return None;
        }
        Some(self.state_dir.clone().unwrap_or_else(default_state_dir))
    }

    pub fn redirect_policy(&self) -> RedirectPolicy {
        RedirectPolicy {
            login_path: self.login_path.clone(),
            auth_pages: self.auth_pages.iter().filter(|p| !p.is_empty()).cloned().collect(),
        }
    }
}

/// Resolve the default state directory.
///
/// Checks `$XDG_STATE_HOME/parlance`, then `$HOME/.local/state/parlance`.
pub fn default_state_dir() -> PathBuf {
    state_dir_with(|name| std::env::var(name).ok())
}

fn state_dir_with(get_env: impl Fn(&str) -> Option<String>) -> PathBuf {
    if let Some(xdg) = get_env("XDG_STATE_HOME").filter(|v| !v.is_empty()) {
        return PathBuf::from(xdg).join("parlance");
    }
    if let Some(home) = get_env("HOME").filter(|v| !v.is_empty()) {
        return PathBuf::from(home).join(".local/state/parlance");
    }
    PathBuf::from(".parlance")
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
