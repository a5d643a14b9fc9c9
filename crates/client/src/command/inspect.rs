// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `parlance whoami|status|get`.

use serde::Serialize;
use serde_json::Value;

use super::{fail, print_json, EXIT_REQUEST_FAILED};
use crate::client::AuthResilienceService;
use crate::conflict::SessionConflict;
use crate::refresh::RefreshState;
use crate::state::AuthSnapshot;

#[derive(Debug, clap::Args)]
pub struct GetArgs {
    /// API path, e.g. `/api/practice/sessions`.
    pub path: String,
}

/// Output of `parlance status`.
#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub api_url: String,
    pub authenticated: bool,
    pub has_token: bool,
    #[serde(flatten)]
    pub snapshot: AuthSnapshot,
    pub conflict: SessionConflict,
    pub refresh: RefreshState,
    pub online: bool,
}

pub async fn whoami(service: &AuthResilienceService) -> i32 {
    let snapshot = service.initialize().await;
    match snapshot.user {
        Some(user) => print_json(&user),
        None => {
            eprintln!("not signed in");
            EXIT_REQUEST_FAILED
        }
    }
}

pub async fn status(service: &AuthResilienceService) -> i32 {
    let snapshot = service.initialize().await;
    print_json(&StatusReport {
        api_url: service.config().base_url(),
        authenticated: snapshot.is_authenticated(),
        has_token: service.has_token(),
        snapshot,
        conflict: service.conflict_state(),
        refresh: service.refresh_state(),
        online: service.is_online(),
    })
}

pub async fn get(service: &AuthResilienceService, args: &GetArgs) -> i32 {
    service.load_stored_token();
    match service.get_json::<Value>(&args.path).await {
        Ok(body) => print_json(&body),
        Err(e) => fail(&e),
    }
}
