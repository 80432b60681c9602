//! Single sign-on through a host-provided helper executable.
//!
//! The helper performs the actual login (Kerberos on CERN hosts) and writes
//! a Netscape cookie file. This module only runs it; the session decides
//! whether the resulting cookie file is usable.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use crate::error::SnowError;

/// Default helper shipped on CERN Linux hosts.
pub const DEFAULT_SSO_HELPER: &str = "cern-get-sso-cookie";

/// Result of one helper run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SsoOutcome {
    /// Whether the helper exited successfully.
    pub success: bool,
    /// Exit code, if the helper was not killed by a signal.
    pub exit_code: Option<i32>,
    /// Captured standard error, trimmed.
    pub stderr: String,
}

impl SsoOutcome {
    /// An outcome for a helper that exited with status 0.
    pub fn succeeded() -> Self {
        Self {
            success: true,
            exit_code: Some(0),
            stderr: String::new(),
        }
    }
}

/// Something that can mint a fresh SSO cookie file.
#[async_trait]
pub trait SsoInvoker: Send + Sync {
    /// Logs into `instance_url` and writes the cookie jar to `output_path`.
    ///
    /// Returns `Err` only if the login could not be attempted at all.
    async fn mint(&self, instance_url: &str, output_path: &Path) -> Result<SsoOutcome, SnowError>;
}

/// Runs `cern-get-sso-cookie --reprocess --url <instance> --outfile <path>`.
#[derive(Debug, Clone)]
pub struct CernSsoCookieHelper {
    program: PathBuf,
}

impl Default for CernSsoCookieHelper {
    fn default() -> Self {
        Self::new(DEFAULT_SSO_HELPER)
    }
}

impl CernSsoCookieHelper {
    /// Uses a helper at a custom location.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// The program that will be executed.
    pub fn program(&self) -> &Path {
        &self.program
    }
}

#[async_trait]
impl SsoInvoker for CernSsoCookieHelper {
    async fn mint(&self, instance_url: &str, output_path: &Path) -> Result<SsoOutcome, SnowError> {
        tracing::info!(
            program = %self.program.display(),
            instance = %instance_url,
            outfile = %output_path.display(),
            "Performing Single Sign-On"
        );

        let output = Command::new(&self.program)
            .arg("--reprocess")
            .arg("--url")
            .arg(instance_url)
            .arg("--outfile")
            .arg(output_path)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| SnowError::sso_helper(self.program.display().to_string(), e.to_string()))?;

        let outcome = SsoOutcome {
            success: output.status.success(),
            exit_code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        };

        if !outcome.success {
            tracing::warn!(
                exit_code = ?outcome.exit_code,
                stderr = %outcome.stderr,
                "SSO helper exited with a failure status"
            );
        }

        Ok(outcome)
    }
}
