// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

pub mod api;
pub mod client;
pub mod command;
pub mod config;
pub mod conflict;
pub mod error;
pub mod gate;
pub mod offline;
pub mod refresh;
pub mod session;
pub mod state;
pub mod token;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

use std::sync::Once;

pub use api::{Credentials, Registration, SessionUser};
pub use client::{ApiRequest, ApiResponse, AuthResilienceService, Method};
pub use config::ClientConfig;
pub use conflict::SessionConflict;
pub use error::{ApiError, ErrorKind};
pub use offline::{Dispatch, DrainReport};
pub use refresh::RefreshState;
pub use state::{AuthSnapshot, SessionEvent};

static CRYPTO_INIT: Once = Once::new();

/// Install the ring crypto provider for reqwest/rustls.
/// Only the first call has effect.
pub fn ensure_crypto() {
    CRYPTO_INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}
