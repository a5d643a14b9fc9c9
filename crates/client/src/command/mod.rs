// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! CLI subcommands for the `parlance` binary.
//!
//! Each invocation builds one [`AuthResilienceService`]. The access token
//! persists in the state directory between invocations; the refresh cookie
//! lives only as long as the process.

pub mod account;
pub mod inspect;

use clap::Parser;

use crate::client::AuthResilienceService;
use crate::config::ClientConfig;
use crate::error::{ApiError, ErrorKind};

/// Success.
pub const EXIT_OK: i32 = 0;
/// The platform rejected the request or could not be reached.
pub const EXIT_REQUEST_FAILED: i32 = 1;
/// Bad arguments or configuration.
pub const EXIT_USAGE: i32 = 2;
/// Login rejected: the account is active on another device.
pub const EXIT_CONFLICT: i32 = 3;

/// Client for the voice-practice platform API.
#[derive(Debug, Parser)]
#[command(name = "parlance", version, about)]
pub struct Cli {
    #[command(flatten)]
    pub client: ClientConfig,

    /// Log format (json or text).
    #[arg(long, env = "PARLANCE_LOG_FORMAT", default_value = "text", global = true)]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "PARLANCE_LOG_LEVEL", default_value = "warn", global = true)]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, clap::Subcommand)]
pub enum Command {
    /// Sign in with email and password.
    Login(account::LoginArgs),
    /// Sign out and forget the stored token.
    Logout,
    /// Create an account.
    Register(account::RegisterArgs),
    /// Ask for a password-reset email.
    ForgotPassword(account::ForgotPasswordArgs),
    /// Set a new password with a reset token.
    ResetPassword(account::ResetPasswordArgs),
    /// Exchange the refresh cookie for a new access token.
    Refresh,
    /// Print the signed-in user.
    Whoami,
    /// Print the auth state as JSON.
    Status,
    /// Authenticated GET against the API; prints the JSON body.
    Get(inspect::GetArgs),
}

/// Run a parsed command line. Returns a process exit code.
pub async fn run(cli: Cli) -> i32 {
    let service = match AuthResilienceService::new(cli.client) {
        Ok(service) => service,
        Err(e) => {
            eprintln!("error: {e:#}");
            return EXIT_USAGE;
        }
    };

    match cli.command {
        Command::Login(args) => account::login(&service, &args).await,
        Command::Logout => account::logout(&service).await,
        Command::Register(args) => account::register(&service, &args).await,
        Command::ForgotPassword(args) => account::forgot_password(&service, &args).await,
        Command::ResetPassword(args) => account::reset_password(&service, &args).await,
        Command::Refresh => account::refresh(&service).await,
        Command::Whoami => inspect::whoami(&service).await,
        Command::Status => inspect::status(&service).await,
        Command::Get(args) => inspect::get(&service, &args).await,
    }
}

/// Report an API error on stderr and map it to an exit code.
pub(crate) fn fail(err: &ApiError) -> i32 {
    eprintln!("error: {err}");
    match err.kind() {
        ErrorKind::Conflict => EXIT_CONFLICT,
        _ => EXIT_REQUEST_FAILED,
    }
}

pub(crate) fn print_json<T: serde::Serialize>(value: &T) -> i32 {
    match serde_json::to_string_pretty(value) {
        Ok(json) => {
            println!("{json}");
            EXIT_OK
        }
        Err(e) => {
            eprintln!("error: {e}");
            EXIT_REQUEST_FAILED
        }
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
