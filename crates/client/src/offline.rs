// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Offline write queue.
//!
//! Mutating calls made while the device is offline are parked in a FIFO and
//! acknowledged immediately with [`Dispatch::Queued`]. When connectivity
//! returns the queue drains in order, one operation at a time. Delivery is
//! best-effort: each parked operation is attempted once, and failures are
//! logged rather than re-queued or reported to the original caller.
//!
//! Queued operations are closures and live only in memory.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::ApiError;

/// Result of routing an operation through the queue.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch<T> {
    /// Ran immediately while online.
    Completed(T),
    /// Parked for replay; the caller gets no further notification.
    Queued(Uuid),
}

impl<T> Dispatch<T> {
    pub fn is_queued(&self) -> bool {
        matches!(self, Self::Queued(_))
    }

    pub fn completed(self) -> Option<T> {
        match self {
            Self::Completed(value) => Some(value),
            Self::Queued(_) => None,
        }
    }
}

type Replay = Box<dyn FnOnce() -> BoxFuture<'static, Result<(), ApiError>> + Send>;

struct QueuedOperation {
    id: Uuid,
    label: String,
    replay: Replay,
}

/// Summary of one drain pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    pub succeeded: usize,
    pub failed: usize,
    /// Items left behind because the device went offline mid-drain.
    pub remaining: usize,
}

pub struct OfflineQueue {
    online: AtomicBool,
    pending: Mutex<VecDeque<QueuedOperation>>,
    /// Serializes drains so replay order stays FIFO.
    drain_lock: tokio::sync::Mutex<()>,
}

impl OfflineQueue {
    pub fn new(online: bool) -> Self {
        Self {
            online: AtomicBool::new(online),
            pending: Mutex::new(VecDeque::new()),
            drain_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Labels of parked operations, oldest first.
    pub fn pending_labels(&self) -> Vec<String> {
        self.pending.lock().iter().map(|op| op.label.clone()).collect()
    }

    /// Run `op` now if online, otherwise park it and return at once.
    pub async fn queue_or_run<T, F, Fut>(
        &self,
        label: impl Into<String>,
        op: F,
    ) -> Result<Dispatch<T>, ApiError>
    where
        T: Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
    {
        // Connectivity is read under the queue lock so a concurrent online
        // transition either sees this push or makes us run directly.
        let op = {
            let mut pending = self.pending.lock();
            if !self.is_online() {
                let id = Uuid::new_v4();
                let label = label.into();
                let replay: Replay =
                    Box::new(move || async move { op().await.map(|_| ()) }.boxed());
                pending.push_back(QueuedOperation { id, label: label.clone(), replay });
                let queued = pending.len();
                drop(pending);
                info!(%id, %label, queued, "offline, operation queued");
                return Ok(Dispatch::Queued(id));
            }
            op
        };
        op().await.map(Dispatch::Completed)
    }

    /// Update connectivity. An offline→online transition spawns a drain and
    /// returns its handle.
    pub fn set_online(self: &Arc<Self>, online: bool) -> Option<JoinHandle<DrainReport>> {
        let was_online = {
            let _pending = self.pending.lock();
            self.online.swap(online, Ordering::SeqCst)
        };
        match (was_online, online) {
            (false, true) => {
                info!(queued = self.len(), "back online, draining queue");
                let queue = Arc::clone(self);
                Some(tokio::spawn(async move { queue.drain().await }))
            }
            (true, false) => {
                info!("went offline, mutating calls will be queued");
                None
            }
            _ => None,
        }
    }

    /// Replay parked operations in FIFO order, awaiting each before the next.
    ///
    /// Stops early if the device goes offline; the rest wait for the next
    /// online transition.
    pub async fn drain(&self) -> DrainReport {
        let _draining = self.drain_lock.lock().await;
        let mut report = DrainReport::default();

        while self.is_online() {
            let Some(op) = self.pop_front() else {
                break;
            };
            debug!(id = %op.id, label = %op.label, "replaying queued operation");
            match (op.replay)().await {
                Ok(()) => report.succeeded += 1,
                Err(e) => {
                    report.failed += 1;
                    warn!(id = %op.id, label = %op.label, err = %e, "queued operation failed");
                }
            }
        }

        report.remaining = self.len();
        if report.succeeded + report.failed > 0 || report.remaining > 0 {
            info!(
                succeeded = report.succeeded,
                failed = report.failed,
                remaining = report.remaining,
                "offline queue drained"
            );
        }
        report
    }

    /// Follow a connectivity signal until `shutdown` fires.
    pub fn spawn_connectivity_watcher(
        self: &Arc<Self>,
        mut connectivity: watch::Receiver<bool>,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            let initial = *connectivity.borrow_and_update();
            queue.set_online(initial);
            loop {
                tokio::select! {
                    changed = connectivity.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let online = *connectivity.borrow_and_update();
                        queue.set_online(online);
                    }
                    _ = shutdown.cancelled() => break,
                }
            }
        })
    }

    fn pop_front(&self) -> Option<QueuedOperation> {
        self.pending.lock().pop_front()
    }
}

impl Drop for OfflineQueue {
    fn drop(&mut self) {
        let dropped = self.pending.get_mut().len();
        if dropped > 0 {
            warn!(dropped, "discarding queued operations that never ran");
        }
    }
}

#[cfg(test)]
#[path = "offline_tests.rs"]
mod tests;
