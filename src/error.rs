//! Error types for the ServiceNow client.
//!
//! This module defines `SnowError`, the unified error type used throughout
//! the crate. Callers of [`AuthSession`](crate::session::AuthSession) see
//! either a response or one of these errors, never a "retry later" value.
//!
//! # Security
//!
//! Passwords, OAuth client secrets and tokens must never reach logs or error
//! messages. Use `sanitize_message()` on any text built from external
//! sources before logging it.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Unified error type for all client operations.
#[derive(Error, Debug)]
pub enum SnowError {
    /// Missing or invalid configuration, including a corrupt cookie or token file.
    ///
    /// Always fatal, never retried.
    #[error("configuration error: {0}")]
    Config(String),

    /// Credentials were rejected after the self-healing path was exhausted.
    ///
    /// Covers a failed SSO login, rejected OAuth client id/secret and
    /// rejected Basic user/password.
    #[error("credential error: {0}")]
    Credential(String),

    /// HTTP request failed during transmission.
    #[error("HTTP request failed: {0}")]
    Http(#[source] reqwest::Error),

    /// HTTP client initialization failed.
    #[error("HTTP client error: {0}")]
    HttpClient(#[source] reqwest::Error),

    /// Request timed out.
    #[error("request timed out after {duration:?} - the instance may be slow or unreachable")]
    Timeout {
        /// How long we waited before timing out.
        duration: Duration,
        /// The operation that timed out.
        operation: String,
    },

    /// The SSO helper executable could not be run at all.
    #[error("SSO helper {program} failed: {message}")]
    SsoHelper {
        /// The program that was invoked.
        program: String,
        /// Why it could not run.
        message: String,
    },

    /// A cookie or token file could not be written or removed.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        /// The file involved.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization or deserialization failed.
    #[error("JSON serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Caller input was rejected before any network call.
    #[error("validation error: {0}")]
    Validation(String),
}

impl SnowError {
    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        SnowError::Config(message.into())
    }

    /// Creates a configuration error for a missing mandatory field.
    pub fn missing_field(field: &str) -> Self {
        SnowError::Config(format!("missing required field: {}", field))
    }

    /// Creates a credential error.
    pub fn credential(message: impl Into<String>) -> Self {
        SnowError::Credential(message.into())
    }

    /// Creates a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        SnowError::Validation(message.into())
    }

    /// Creates an I/O error bound to a file path.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SnowError::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates an SSO helper error.
    pub fn sso_helper(program: impl Into<String>, message: impl Into<String>) -> Self {
        SnowError::SsoHelper {
            program: program.into(),
            message: message.into(),
        }
    }

    /// Creates a timeout error.
    pub fn timeout(duration: Duration, operation: impl Into<String>) -> Self {
        SnowError::Timeout {
            duration,
            operation: operation.into(),
        }
    }

    /// Returns true if the remote side rejected our credentials for good.
    #[must_use]
    pub fn is_credential(&self) -> bool {
        matches!(self, SnowError::Credential(_))
    }

    /// Returns true if this is a configuration problem.
    #[must_use]
    pub fn is_config(&self) -> bool {
        matches!(self, SnowError::Config(_))
    }

    /// Returns true if this error came from the network layer.
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            SnowError::Http(_) | SnowError::HttpClient(_) | SnowError::Timeout { .. }
        )
    }

    /// Replaces every non-empty secret in `message` with `[REDACTED]`.
    #[must_use]
    pub fn sanitize_message(message: &str, secrets: &[&str]) -> String {
        secrets
            .iter()
            .filter(|secret| !secret.is_empty())
            .fold(message.to_string(), |acc, secret| {
                acc.replace(secret, "[REDACTED]")
            })
    }

    /// Creates a sanitized version of this error's display message.
    #[must_use]
    pub fn sanitized_display(&self, secrets: &[&str]) -> String {
        Self::sanitize_message(&self.to_string(), secrets)
    }
}
