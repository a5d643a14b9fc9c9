// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde_json::json;

use super::*;

#[yare::parameterized(
    unauthorized = { 401, ErrorKind::Unauthorized },
    validation = { 422, ErrorKind::Validation },
    rate_limited = { 429, ErrorKind::RateLimited },
    internal = { 500, ErrorKind::Server },
    bad_gateway = { 502, ErrorKind::Server },
    not_found = { 404, ErrorKind::Http },
    forbidden = { 403, ErrorKind::Http },
    conflict_outside_login = { 409, ErrorKind::Http },
)]
fn classifies_status(status: u16, expected: ErrorKind) -> anyhow::Result<()> {
    let status = StatusCode::from_u16(status)?;
    let err = ApiError::from_response(status, &Value::Null, None, false);
    assert_eq!(err.kind(), expected);
    assert_eq!(err.status(), Some(status.as_u16()));
    Ok(())
}

#[test]
fn login_409_is_conflict() {
    let body = json!({ "detail": "already signed in elsewhere" });
    let err = ApiError::from_response(StatusCode::CONFLICT, &body, None, true);
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert_eq!(err.status(), Some(409));
    assert!(err.to_string().contains("already signed in elsewhere"));
}

#[test]
fn session_active_code_is_conflict_on_login() {
    let body = json!({ "code": "SESSION_ACTIVE", "message": "one session per account" });
    let err = ApiError::from_response(StatusCode::FORBIDDEN, &body, None, true);
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert_eq!(err.status(), Some(403));
}

#[test]
fn rate_limit_keeps_retry_after() {
    let err = ApiError::from_response(StatusCode::TOO_MANY_REQUESTS, &Value::Null, Some(30), false);
    match err {
        ApiError::RateLimited { retry_after_secs, .. } => assert_eq!(retry_after_secs, Some(30)),
        other => panic!("expected RateLimited, got {other:?}"),
    }
}

#[test]
fn validation_keeps_details() {
    let body = json!({ "detail": [{ "loc": ["body", "email"], "msg": "invalid email" }] });
    let err = ApiError::from_response(StatusCode::UNPROCESSABLE_ENTITY, &body, None, false);
    match err {
        ApiError::Validation { message, details } => {
            assert_eq!(message, "invalid email");
            assert_eq!(details, body);
        }
        other => panic!("expected Validation, got {other:?}"),
    }
}

#[yare::parameterized(
    detail = { json!({ "detail": "bad password" }), Some("bad password") },
    message = { json!({ "message": "nope" }), Some("nope") },
    error = { json!({ "error": "denied" }), Some("denied") },
    empty_detail = { json!({ "detail": "" }), None },
    no_fields = { json!({ "status": 1 }), None },
    not_object = { json!("plain"), None },
)]
fn extracts_error_message(body: Value, expected: Option<&str>) {
    assert_eq!(error_message(&body).as_deref(), expected);
}

#[test]
fn falls_back_to_canonical_reason() {
    let err = ApiError::from_response(StatusCode::SERVICE_UNAVAILABLE, &Value::Null, None, false);
    assert!(err.to_string().contains("Service Unavailable"), "got {err}");
}

#[test]
fn user_messages_never_echo_details() {
    let err = ApiError::Server { status: 500, message: "stack trace at line 42".to_owned() };
    assert!(!err.user_message().contains("line 42"));
    assert_eq!(err.kind().as_str(), "SERVER");
}
