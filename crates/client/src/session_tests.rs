// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use tokio::sync::broadcast;

use super::*;
use crate::config::ClientConfig;
use crate::conflict::SessionConflict;
use crate::test_support::MockPlatform;

const EMAIL: &str = "grace@example.com";
const PASSWORD: &str = "hopper-1906";

async fn platform() -> anyhow::Result<MockPlatform> {
    let platform = MockPlatform::start().await?;
    platform.add_account(EMAIL, PASSWORD, "Grace");
    Ok(platform)
}

fn creds() -> Credentials {
    Credentials::new(EMAIL, PASSWORD)
}

fn drain_events(rx: &mut broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut out = Vec::new();
    while let Ok(event) = rx.try_recv() {
        out.push(event);
    }
    out
}

#[tokio::test]
async fn login_sets_user_and_token() -> anyhow::Result<()> {
    let platform = platform().await?;
    let service = AuthResilienceService::new(platform.config())?;
    let mut events = service.events();

    let user = service.login(&creds()).await?;

    assert_eq!(user.email.as_deref(), Some(EMAIL));
    assert!(service.is_authenticated());
    assert!(service.has_token());
    assert!(!service.auth_flow_active());
    assert_eq!(service.conflict_state(), SessionConflict::None);
    assert!(drain_events(&mut events)
        .contains(&SessionEvent::SignedIn { user_id: user.id_string() }));
    Ok(())
}

#[tokio::test]
async fn failed_login_releases_gate() -> anyhow::Result<()> {
    let platform = platform().await?;
    let service = AuthResilienceService::new(platform.config())?;

    let err = service.login(&Credentials::new(EMAIL, "nope")).await.err();

    assert!(matches!(err, Some(ApiError::Unauthorized { .. })));
    assert!(!service.auth_flow_active());
    assert!(!service.has_token());
    Ok(())
}

#[tokio::test]
async fn conflict_then_force_login() -> anyhow::Result<()> {
    let platform = platform().await?;
    let elsewhere = platform.sign_in_elsewhere(EMAIL);
    let service = AuthResilienceService::new(platform.config())?;
    let mut events = service.events();

    let err = service.login(&creds()).await.err();
    assert!(matches!(err, Some(ApiError::Conflict { .. })), "got {err:?}");
    assert_eq!(service.conflict_state(), SessionConflict::Detected);
    assert!(!service.has_token());
    assert!(!service.is_authenticated());
    assert!(drain_events(&mut events).contains(&SessionEvent::ConflictDetected));

    service.force_login(&creds()).await?;

    assert_eq!(service.conflict_state(), SessionConflict::Resolved);
    assert!(service.is_authenticated());
    assert_ne!(platform.access_token_for(EMAIL), elsewhere);
    Ok(())
}

#[tokio::test]
async fn forced_login_settles_conflict_even_if_profile_fetch_fails() -> anyhow::Result<()> {
    let platform = platform().await?;
    platform.sign_in_elsewhere(EMAIL);
    let service = AuthResilienceService::new(platform.config())?;

    let _ = service.login(&creds()).await;
    assert_eq!(service.conflict_state(), SessionConflict::Detected);

    platform.reject_all_tokens(true);
    let err = service.force_login(&creds()).await.err();

    assert!(matches!(err, Some(ApiError::Unauthorized { .. })), "got {err:?}");
    assert_eq!(service.conflict_state(), SessionConflict::Resolved);
    assert!(!service.auth_flow_active());
    Ok(())
}

#[tokio::test]
async fn cancel_conflict_sends_nothing() -> anyhow::Result<()> {
    let platform = platform().await?;
    platform.sign_in_elsewhere(EMAIL);
    let service = AuthResilienceService::new(platform.config())?;

    let _ = service.login(&creds()).await;
    let sent = platform.requests().len();
    service.cancel_conflict();

    assert_eq!(service.conflict_state(), SessionConflict::None);
    assert_eq!(platform.requests().len(), sent);
    assert!(platform.has_session(EMAIL));
    Ok(())
}

#[tokio::test]
async fn logout_clears_everything() -> anyhow::Result<()> {
    let platform = platform().await?;
    let service = AuthResilienceService::new(platform.config())?;
    service.login(&creds()).await?;
    let mut events = service.events();

    service.logout().await?;

    assert!(!service.has_token());
    assert!(!service.is_authenticated());
    assert!(!platform.has_session(EMAIL));
    assert!(drain_events(&mut events).contains(&SessionEvent::SignedOut));
    Ok(())
}

#[tokio::test]
async fn logout_clears_locally_when_server_unreachable() -> anyhow::Result<()> {
    let addr = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
        listener.local_addr()?
    };
    let service = AuthResilienceService::new(ClientConfig::for_url(format!("http://{addr}")))?;
    service.inner.tokens.set("stale-token");
    service.inner.auth.set_user(serde_json::from_value(serde_json::json!({ "id": 9 }))?);

    let result = service.logout().await;

    assert!(matches!(result, Err(ApiError::Network { .. })));
    assert!(!service.has_token());
    assert!(!service.is_authenticated());
    Ok(())
}

#[tokio::test]
async fn initialize_without_session_is_ready_and_quiet() -> anyhow::Result<()> {
    let platform = platform().await?;
    let service = AuthResilienceService::new(platform.config())?;
    service.set_location("/dashboard");
    let mut events = service.events();

    let snapshot = service.initialize().await;

    assert!(snapshot.is_auth_ready);
    assert!(!snapshot.is_authenticated());
    assert!(!snapshot.loading_user);
    assert_eq!(platform.refresh_calls(), 1);
    // The silent refresh runs under the gate, so its failure redirects nobody.
    assert!(drain_events(&mut events).is_empty());
    Ok(())
}

#[tokio::test]
async fn initialize_restores_from_refresh_cookie() -> anyhow::Result<()> {
    let platform = platform().await?;
    let service = AuthResilienceService::new(platform.config())?;
    service.login(&creds()).await?;
    service.inner.tokens.clear();
    service.inner.auth.clear_user();

    let snapshot = service.initialize().await;

    assert!(snapshot.is_auth_ready);
    assert_eq!(snapshot.user.and_then(|u| u.email).as_deref(), Some(EMAIL));
    assert!(service.has_token());
    Ok(())
}

#[tokio::test]
async fn initialize_restores_persisted_token() -> anyhow::Result<()> {
    let platform = platform().await?;
    let dir = tempfile::tempdir()?;
    let config = ClientConfig {
        state_dir: Some(dir.path().to_path_buf()),
        ephemeral: false,
        ..platform.config()
    };

    let first = AuthResilienceService::new(config.clone())?;
    first.login(&creds()).await?;

    let second = AuthResilienceService::new(config)?;
    let snapshot = second.initialize().await;

    assert!(snapshot.is_authenticated());
    assert_eq!(platform.refresh_calls(), 0);
    Ok(())
}

#[tokio::test]
async fn initialize_with_sentinel_token_tries_refresh() -> anyhow::Result<()> {
    let platform = platform().await?;
    let dir = tempfile::tempdir()?;
    std::fs::write(dir.path().join(crate::token::SESSION_FILE), r#"{"access_token":"undefined"}"#)?;
    let config =
        ClientConfig { state_dir: Some(dir.path().to_path_buf()), ephemeral: false, ..platform.config() };
    let service = AuthResilienceService::new(config)?;

    let snapshot = service.initialize().await;

    assert!(snapshot.is_auth_ready);
    assert!(!snapshot.is_authenticated());
    assert_eq!(platform.refresh_calls(), 1);
    assert!(platform.requests_to(ME_PATH).is_empty());
    Ok(())
}

#[tokio::test]
async fn fetch_user_recovers_expired_token() -> anyhow::Result<()> {
    let platform = platform().await?;
    let service = AuthResilienceService::new(platform.config())?;
    service.login(&creds()).await?;
    platform.expire_access_tokens();

    let user = service.fetch_user().await?;

    assert_eq!(user.name.as_deref(), Some("Grace"));
    assert_eq!(platform.refresh_calls(), 1);
    Ok(())
}

#[tokio::test]
async fn manual_refresh_does_not_clear_on_failure() -> anyhow::Result<()> {
    let platform = platform().await?;
    let service = AuthResilienceService::new(platform.config())?;
    service.login(&creds()).await?;
    platform.fail_refresh(true);

    let err = service.refresh_session().await.err();

    assert!(matches!(err, Some(ApiError::Unauthorized { .. })));
    assert!(service.has_token());
    assert!(service.is_authenticated());
    Ok(())
}

#[tokio::test]
async fn password_reset_flow() -> anyhow::Result<()> {
    let platform = MockPlatform::start().await?;
    let service = AuthResilienceService::new(platform.config())?;
    let registration = Registration {
        name: "Lin".into(),
        email: "lin@example.com".into(),
        password: "first-password".into(),
    };

    service.register(&registration).await?;
    assert!(!service.is_authenticated());

    service.forgot_password(&registration.email).await?;
    let token = platform
        .reset_token_for(&registration.email)
        .ok_or_else(|| anyhow::anyhow!("no reset token issued"))?;
    service.reset_password(&token, "second-password").await?;

    let old = service.login(&Credentials::new(&registration.email, "first-password")).await;
    assert!(old.is_err());
    service.login(&Credentials::new(&registration.email, "second-password")).await?;
    assert!(service.is_authenticated());
    assert_eq!(platform.refresh_calls(), 0);
    Ok(())
}

#[tokio::test]
async fn duplicate_registration_is_rejected() -> anyhow::Result<()> {
    let platform = platform().await?;
    let service = AuthResilienceService::new(platform.config())?;

    let err = service
        .register(&Registration { name: "G".into(), email: EMAIL.into(), password: "long-password".into() })
        .await
        .err();

    assert_eq!(err.and_then(|e| e.status()), Some(400));
    assert!(!service.auth_flow_active());
    Ok(())
}
