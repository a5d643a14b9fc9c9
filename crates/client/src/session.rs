// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Explicit auth flows: start-up restore, login, logout and friends.
//!
//! Every flow that talks to an auth endpoint holds the [`AuthFlowGate`] for
//! its whole duration so the pipeline never refreshes or redirects on its
//! behalf.
//!
//! [`AuthFlowGate`]: crate::gate::AuthFlowGate

use tracing::{debug, info, warn};

use crate::api::{
    Credentials, ForgotPasswordRequest, LoginRequest, Registration, ResetPasswordRequest,
    SessionUser, TokenResponse, FORGOT_PASSWORD_PATH, LOGIN_PATH, LOGOUT_PATH, ME_PATH,
    REGISTER_PATH, RESET_PASSWORD_PATH,
};
use crate::client::{to_body, ApiRequest, AuthResilienceService};
use crate::error::ApiError;
use crate::gate::AuthOperation;
use crate::state::{AuthSnapshot, SessionEvent};
use crate::token::is_usable;

impl AuthResilienceService {
    /// Resolve the start-up session.
    ///
    /// With a stored token the user is fetched directly (a stale token is
    /// recovered by the pipeline). Without one, a silent refresh is tried in
    /// case the refresh cookie is still valid. Either way `is_auth_ready`
    /// is true by the time this returns.
    pub async fn initialize(&self) -> AuthSnapshot {
        {
            let _ready = self.inner.auth.ready_on_drop();
            let stored = self.inner.tokens.load();
            if is_usable(stored.as_deref()) {
                debug!("restoring session from stored token");
                let _ = self.fetch_user().await;
            } else {
                debug!("no stored token, trying silent refresh");
                match self.refresh_session().await {
                    Ok(()) => {
                        let _ = self.fetch_user().await;
                    }
                    Err(e) => debug!(err = %e, "no session to restore"),
                }
            }
        }
        let snapshot = self.snapshot();
        info!(authenticated = snapshot.is_authenticated(), "auth ready");
        snapshot
    }

    /// Fetch the current identity from `/auth/me`.
    ///
    /// A 401 that survives recovery clears the token and the user. Other
    /// failures leave the known state alone.
    pub async fn fetch_user(&self) -> Result<SessionUser, ApiError> {
        let _loading = self.inner.auth.begin_loading();
        let result = match self.execute(ApiRequest::get(ME_PATH)).await {
            Ok(resp) => resp.json::<SessionUser>(),
            Err(e) => Err(e),
        };
        match result {
            Ok(user) => {
                self.inner.auth.set_user(user.clone());
                Ok(user)
            }
            Err(e @ ApiError::Unauthorized { .. }) => {
                self.inner.tokens.clear();
                self.inner.auth.clear_user();
                Err(e)
            }
            Err(e) => {
                warn!(err = %e, "failed to fetch user");
                Err(e)
            }
        }
    }

    pub async fn login(&self, credentials: &Credentials) -> Result<SessionUser, ApiError> {
        self.sign_in(credentials, false).await
    }

    /// Log in and invalidate any other active session for the account.
    pub async fn force_login(&self, credentials: &Credentials) -> Result<SessionUser, ApiError> {
        self.sign_in(credentials, true).await
    }

    /// Abandon a detected session conflict. Nothing is sent to the server.
    pub fn cancel_conflict(&self) {
        self.inner.conflict.cancel();
    }

    async fn sign_in(
        &self,
        credentials: &Credentials,
        force: bool,
    ) -> Result<SessionUser, ApiError> {
        let op = if force { AuthOperation::ForceLogin } else { AuthOperation::Login };
        let _flow = self.inner.gate.begin(op);

        let body = to_body(&LoginRequest {
            email: &credentials.email,
            password: &credentials.password,
            force,
        })?;
        let resp = match self.execute(ApiRequest::post(LOGIN_PATH).json(body)).await {
            Ok(resp) => resp,
            Err(e @ ApiError::Conflict { .. }) => {
                self.inner.conflict.detected();
                self.inner.auth.emit(SessionEvent::ConflictDetected);
                return Err(e);
            }
            Err(e) => {
                debug!(op = %op, err = %e, "login rejected");
                return Err(e);
            }
        };

        let token: TokenResponse = resp.json()?;
        self.inner.tokens.set(token.access_token);
        // The server accepted the login, so the conflict is settled even if
        // the profile fetch below fails.
        self.inner.conflict.login_succeeded(force);
        let user = self.fetch_user().await?;

        let user_id = user.id_string();
        info!(user = %user_id, forced = force, "signed in");
        self.inner.auth.emit(SessionEvent::SignedIn { user_id });
        Ok(user)
    }

    /// Create an account. Does not sign in.
    pub async fn register(&self, registration: &Registration) -> Result<(), ApiError> {
        let _flow = self.inner.gate.begin(AuthOperation::Register);
        let body = to_body(registration)?;
        self.execute(ApiRequest::post(REGISTER_PATH).json(body)).await?;
        info!(email = %registration.email, "account registered");
        Ok(())
    }

    pub async fn forgot_password(&self, email: &str) -> Result<(), ApiError> {
        let _flow = self.inner.gate.begin(AuthOperation::ForgotPassword);
        let body = to_body(&ForgotPasswordRequest { email })?;
        self.execute(ApiRequest::post(FORGOT_PASSWORD_PATH).json(body)).await?;
        Ok(())
    }

    pub async fn reset_password(&self, token: &str, new_password: &str) -> Result<(), ApiError> {
        let _flow = self.inner.gate.begin(AuthOperation::ResetPassword);
        let body = to_body(&ResetPasswordRequest { token, new_password })?;
        self.execute(ApiRequest::post(RESET_PASSWORD_PATH).json(body)).await?;
        Ok(())
    }

    /// End the session. Local state is cleared even when the server call
    /// fails; the server error is still returned.
    pub async fn logout(&self) -> Result<(), ApiError> {
        let _flow = self.inner.gate.begin(AuthOperation::Logout);
        let result = self.execute(ApiRequest::post(LOGOUT_PATH)).await;

        self.inner.tokens.clear();
        self.inner.auth.clear_user();
        self.inner.conflict.cancel();
        self.inner.auth.emit(SessionEvent::SignedOut);

        match result {
            Ok(_) => {
                info!("signed out");
                Ok(())
            }
            Err(e) => {
                warn!(err = %e, "server logout failed, local session cleared");
                Err(e)
            }
        }
    }

    /// Obtain a new access token from the refresh cookie.
    ///
    /// Joins an in-flight refresh if there is one. Failure does not clear
    /// the session or redirect; the caller decides.
    pub async fn refresh_session(&self) -> Result<(), ApiError> {
        let _flow = self.inner.gate.begin(AuthOperation::Refresh);
        self.refresh_shared().await.map(|_| ())
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
