// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Single-flight access-token refresh.
//!
//! Every caller that needs a fresh token goes through [`RefreshCoordinator::refresh`].
//! The first caller starts the refresh; everyone arriving while it is in
//! flight awaits the same shared future and gets the same result.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;

use crate::error::ApiError;

/// Outcome of one refresh: the new access token.
pub type RefreshResult = Result<String, ApiError>;

type InFlight = Shared<BoxFuture<'static, RefreshResult>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshState {
    Idle,
    Refreshing,
    /// The most recent refresh failed. The next 401 starts a new attempt.
    Failed,
}

struct Slot {
    state: RefreshState,
    inflight: Option<(u64, InFlight)>,
    next_id: u64,
}

pub struct RefreshCoordinator {
    slot: Mutex<Slot>,
    started: AtomicU64,
}

impl Default for RefreshCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl RefreshCoordinator {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot { state: RefreshState::Idle, inflight: None, next_id: 0 }),
            started: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> RefreshState {
        self.slot.lock().state
    }

    /// Number of refresh calls actually started (joins are not counted).
    pub fn started(&self) -> u64 {
        self.started.load(Ordering::Relaxed)
    }

    /// Join the in-flight refresh, or start one with `start`.
    ///
    /// `start` only builds the future; it must not block. Side effects of the
    /// refresh (storing the token, clearing state on failure) belong inside
    /// that future so they run once per attempt rather than once per waiter.
    pub async fn refresh<F, Fut>(&self, start: F) -> RefreshResult
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = RefreshResult> + Send + 'static,
    {
        let (id, inflight) = {
            let mut slot = self.slot.lock();
            let existing = slot.inflight.as_ref().map(|(id, fut)| (*id, fut.clone()));
            match existing {
                Some((id, fut)) => {
                    debug!(attempt = id, "joining in-flight refresh");
                    (id, fut)
                }
                None => {
                    slot.next_id += 1;
                    let id = slot.next_id;
                    let fut = start().boxed().shared();
                    slot.inflight = Some((id, fut.clone()));
                    slot.state = RefreshState::Refreshing;
                    self.started.fetch_add(1, Ordering::Relaxed);
                    debug!(attempt = id, "refresh started");
                    (id, fut)
                }
            }
        };

        let result = inflight.await;

        let mut slot = self.slot.lock();
        if slot.inflight.as_ref().is_some_and(|(current, _)| *current == id) {
            slot.inflight = None;
            slot.state = if result.is_ok() { RefreshState::Idle } else { RefreshState::Failed };
        }
        result
    }
}

#[cfg(test)]
#[path = "refresh_tests.rs"]
mod tests;
