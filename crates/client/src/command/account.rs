// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `parlance login|logout|register|forgot-password|reset-password|refresh`.

use tracing::debug;

use super::{fail, EXIT_CONFLICT, EXIT_OK};
use crate::api::{Credentials, Registration};
use crate::client::AuthResilienceService;
use crate::error::ApiError;

#[derive(Debug, clap::Args)]
pub struct LoginArgs {
    #[arg(long, env = "PARLANCE_EMAIL")]
    pub email: String,
    #[arg(long, env = "PARLANCE_PASSWORD", hide_env_values = true)]
    pub password: String,
    /// Sign in even if the account is active on another device (signs it out).
    #[arg(long)]
    pub force: bool,
}

#[derive(Debug, clap::Args)]
pub struct RegisterArgs {
    #[arg(long)]
    pub name: String,
    #[arg(long, env = "PARLANCE_EMAIL")]
    pub email: String,
    #[arg(long, env = "PARLANCE_PASSWORD", hide_env_values = true)]
    pub password: String,
}

#[derive(Debug, clap::Args)]
pub struct ForgotPasswordArgs {
    #[arg(long, env = "PARLANCE_EMAIL")]
    pub email: String,
}

#[derive(Debug, clap::Args)]
pub struct ResetPasswordArgs {
    /// Token from the reset email.
    #[arg(long)]
    pub token: String,
    /// The new password.
    #[arg(long, env = "PARLANCE_PASSWORD", hide_env_values = true)]
    pub password: String,
}

pub async fn login(service: &AuthResilienceService, args: &LoginArgs) -> i32 {
    let credentials = Credentials::new(&args.email, &args.password);
    let result = if args.force {
        service.force_login(&credentials).await
    } else {
        service.login(&credentials).await
    };
    match result {
        Ok(user) => {
            let who = user.name.or(user.email).unwrap_or_else(|| user.id.to_string());
            println!("signed in as {who}");
            EXIT_OK
        }
        Err(ApiError::Conflict { message, .. }) => {
            eprintln!("error: {message}");
            eprintln!("hint: re-run with --force to sign out the other device");
            EXIT_CONFLICT
        }
        Err(e) => fail(&e),
    }
}

pub async fn logout(service: &AuthResilienceService) -> i32 {
    if !service.load_stored_token() {
        debug!("no stored token, clearing local state only");
    }
    match service.logout().await {
        Ok(()) => {
            println!("signed out");
            EXIT_OK
        }
        Err(e) => fail(&e),
    }
}

pub async fn register(service: &AuthResilienceService, args: &RegisterArgs) -> i32 {
    let registration = Registration {
        name: args.name.clone(),
        email: args.email.clone(),
        password: args.password.clone(),
    };
    match service.register(&registration).await {
        Ok(()) => {
            println!("account created for {}", args.email);
            EXIT_OK
        }
        Err(e) => fail(&e),
    }
}

pub async fn forgot_password(service: &AuthResilienceService, args: &ForgotPasswordArgs) -> i32 {
    match service.forgot_password(&args.email).await {
        Ok(()) => {
            println!("if {} has an account, a reset link is on its way", args.email);
            EXIT_OK
        }
        Err(e) => fail(&e),
    }
}

pub async fn reset_password(service: &AuthResilienceService, args: &ResetPasswordArgs) -> i32 {
    match service.reset_password(&args.token, &args.password).await {
        Ok(()) => {
            println!("password updated");
            EXIT_OK
        }
        Err(e) => fail(&e),
    }
}

pub async fn refresh(service: &AuthResilienceService) -> i32 {
    match service.refresh_session().await {
        Ok(()) => {
            println!("access token refreshed");
            EXIT_OK
        }
        Err(e) => fail(&e),
    }
}
