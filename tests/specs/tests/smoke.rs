// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end smoke tests that spawn the real `parlance` binary against the
//! mock platform.

use parlance_specs::Workspace;

const EMAIL: &str = "smoke@example.com";
const PASSWORD: &str = "smoke-password";

#[tokio::test]
async fn login_whoami_logout() -> anyhow::Result<()> {
    let ws = Workspace::start().await?;
    ws.platform.add_account(EMAIL, PASSWORD, "Smoke");

    let login = ws.run(&["login", "--email", EMAIL, "--password", PASSWORD]).await?;
    assert_eq!(login.code, 0, "stderr: {}", login.stderr);
    assert!(login.stdout.contains("signed in as Smoke"));
    assert!(ws.state_dir().join("session.json").exists());

    let whoami = ws.run(&["whoami"]).await?;
    assert_eq!(whoami.code, 0, "stderr: {}", whoami.stderr);
    assert_eq!(whoami.json()?["email"], EMAIL);

    let logout = ws.run(&["logout"]).await?;
    assert_eq!(logout.code, 0, "stderr: {}", logout.stderr);
    assert!(!ws.platform.has_session(EMAIL));

    let whoami = ws.run(&["whoami"]).await?;
    assert_eq!(whoami.code, 1);
    assert!(whoami.stderr.contains("not signed in"));
    Ok(())
}

#[tokio::test]
async fn session_conflict_needs_force() -> anyhow::Result<()> {
    let ws = Workspace::start().await?;
    ws.platform.add_account(EMAIL, PASSWORD, "Smoke");
    ws.platform.sign_in_elsewhere(EMAIL);

    let plain = ws.run(&["login", "--email", EMAIL, "--password", PASSWORD]).await?;
    assert_eq!(plain.code, 3);
    assert!(plain.stderr.contains("--force"));

    let forced = ws.run(&["login", "--email", EMAIL, "--password", PASSWORD, "--force"]).await?;
    assert_eq!(forced.code, 0, "stderr: {}", forced.stderr);
    Ok(())
}

#[tokio::test]
async fn get_sends_stored_token() -> anyhow::Result<()> {
    let ws = Workspace::start().await?;
    ws.platform.add_account(EMAIL, PASSWORD, "Smoke");
    ws.run(&["login", "--email", EMAIL, "--password", PASSWORD]).await?;

    let get = ws.run(&["get", "/api/practice/sessions"]).await?;
    assert_eq!(get.code, 0, "stderr: {}", get.stderr);
    assert_eq!(get.json()?.as_array().map(Vec::len), Some(2));

    let token = ws.platform.access_token_for(EMAIL).unwrap_or_default();
    let seen = ws.platform.requests_to("/api/practice/sessions");
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].authorization, Some(format!("Bearer {token}")));
    Ok(())
}

#[tokio::test]
async fn get_without_session_fails_cleanly() -> anyhow::Result<()> {
    let ws = Workspace::start().await?;

    let get = ws.run(&["get", "/api/practice/sessions"]).await?;
    assert_eq!(get.code, 1);
    assert!(get.stderr.contains("unauthorized"));
    Ok(())
}

#[tokio::test]
async fn status_reports_json() -> anyhow::Result<()> {
    let ws = Workspace::start().await?;

    let status = ws.run(&["status", "--log-format", "json"]).await?;
    assert_eq!(status.code, 0, "stderr: {}", status.stderr);
    let report = status.json()?;
    assert_eq!(report["authenticated"], false);
    assert_eq!(report["is_auth_ready"], true);
    assert_eq!(report["conflict"], "none");
    Ok(())
}

#[tokio::test]
async fn bad_api_url_is_a_usage_error() -> anyhow::Result<()> {
    let ws = Workspace::start().await?;
    let out = ws.run(&["--api-url", "not-a-url", "status"]).await?;
    assert_eq!(out.code, 2);
    Ok(())
}

#[tokio::test]
async fn register_then_reset_password() -> anyhow::Result<()> {
    let ws = Workspace::start().await?;
    let email = "new@example.com";

    let register = ws
        .run(&["register", "--name", "New", "--email", email, "--password", "first-password"])
        .await?;
    assert_eq!(register.code, 0, "stderr: {}", register.stderr);

    let bad = ws.run(&["register", "--name", "X", "--email", "nope", "--password", "whatever-1"]).await?;
    assert_eq!(bad.code, 1);
    assert!(bad.stderr.contains("not a valid email"));

    assert_eq!(ws.run(&["forgot-password", "--email", email]).await?.code, 0);
    let token = ws.platform.reset_token_for(email).unwrap_or_default();
    let reset = ws.run(&["reset-password", "--token", &token, "--password", "second-password"]).await?;
    assert_eq!(reset.code, 0, "stderr: {}", reset.stderr);

    let login = ws.run(&["login", "--email", email, "--password", "second-password"]).await?;
    assert_eq!(login.code, 0, "stderr: {}", login.stderr);
    Ok(())
}
