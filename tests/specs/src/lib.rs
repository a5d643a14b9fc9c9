// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test harness for end-to-end binary smoke tests.
//!
//! Spawns the real `parlance` binary as a subprocess against an in-process
//! mock platform and checks its output and exit codes.

use std::path::{Path, PathBuf};
use std::time::Duration;

use parlance::test_support::MockPlatform;

pub use parlance::ensure_crypto;

const RUN_TIMEOUT: Duration = Duration::from_secs(20);

/// Resolve the path to the compiled `parlance` binary.
pub fn parlance_binary() -> PathBuf {
    let manifest = Path::new(env!("CARGO_MANIFEST_DIR"));
    // tests/specs → tests → workspace root
    let workspace = manifest.parent().and_then(|p| p.parent()).unwrap_or(manifest);
    workspace.join("target").join("debug").join("parlance")
}

/// Captured result of one CLI invocation.
#[derive(Debug)]
pub struct Invocation {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl Invocation {
    pub fn json(&self) -> anyhow::Result<serde_json::Value> {
        Ok(serde_json::from_str(&self.stdout)?)
    }
}

/// A mock platform plus a private state directory for the CLI.
pub struct Workspace {
    pub platform: MockPlatform,
    state_dir: tempfile::TempDir,
}

impl Workspace {
    pub async fn start() -> anyhow::Result<Self> {
        ensure_crypto();
        let platform = MockPlatform::start().await?;
        Ok(Self { platform, state_dir: tempfile::tempdir()? })
    }

    pub fn state_dir(&self) -> &Path {
        self.state_dir.path()
    }

    /// Run `parlance <args>` pointed at the mock platform.
    ///
    /// Uses an async child so the mock platform keeps serving while the
    /// binary runs.
    pub async fn run(&self, args: &[&str]) -> anyhow::Result<Invocation> {
        let binary = parlance_binary();
        anyhow::ensure!(binary.exists(), "parlance binary not found at {}", binary.display());

        let output = tokio::time::timeout(
            RUN_TIMEOUT,
            tokio::process::Command::new(&binary)
                .args(args)
                .env("PARLANCE_API_URL", self.platform.base_url())
                .env("PARLANCE_STATE_DIR", self.state_dir.path())
                .env("PARLANCE_LOG_LEVEL", "debug")
                .env_remove("PARLANCE_EPHEMERAL")
                .env_remove("PARLANCE_OFFLINE")
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| anyhow::anyhow!("parlance {args:?} timed out"))??;

        Ok(Invocation {
            code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
