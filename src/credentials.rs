//! On-disk persistence of the session cookie jar and the OAuth token pair.
//!
//! Two failure modes only: a missing file is expected and reported as
//! "absent", while an unreadable or malformed file is a fatal
//! `SnowError::Config`. Corrupt files are never repaired automatically.

use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::SessionConfig;
use crate::cookies::CookieJar;
use crate::error::SnowError;

/// OAuth token pair as returned by `/oauth_token.do`.
///
/// Unknown fields are kept so the file on disk mirrors the endpoint payload.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenPair {
    /// Bearer token sent on every request.
    pub access_token: String,

    /// Used for the refresh grant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// Usually `Bearer`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,

    /// Lifetime of the access token in seconds.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_optional_seconds"
    )]
    pub expires_in: Option<u64>,

    /// Remaining endpoint fields (`scope`, ...).
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl TokenPair {
    /// Value for the `Authorization` header.
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.access_token)
    }
}

impl fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenPair")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// Accepts `expires_in` as either a number or a numeric string.
fn deserialize_optional_seconds<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::{self, Visitor};

    struct SecondsVisitor;

    impl<'de> Visitor<'de> for SecondsVisitor {
        type Value = Option<u64>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("null, a non-negative integer, or a numeric string")
        }

        fn visit_unit<E>(self) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(None)
        }

        fn visit_none<E>(self) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(None)
        }

        fn visit_some<D>(self, deserializer: D) -> Result<Self::Value, D::Error>
        where
            D: serde::Deserializer<'de>,
        {
            deserializer.deserialize_any(self)
        }

        fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(Some(value))
        }

        fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            u64::try_from(value)
                .map(Some)
                .map_err(|_| E::custom("expires_in must not be negative"))
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            value
                .trim()
                .parse::<u64>()
                .map(Some)
                .map_err(|_| E::custom(format!("invalid expires_in {:?}", value)))
        }
    }

    deserializer.deserialize_option(SecondsVisitor)
}

/// Reads and writes the cookie file and the token file.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    cookie_path: Option<PathBuf>,
    token_path: Option<PathBuf>,
    persist_cookie: bool,
    persist_token: bool,
}

impl CredentialStore {
    /// Creates a store over the given paths.
    pub fn new(
        cookie_path: Option<PathBuf>,
        token_path: Option<PathBuf>,
        persist_cookie: bool,
        persist_token: bool,
    ) -> Self {
        Self {
            cookie_path,
            token_path,
            persist_cookie,
            persist_token,
        }
    }

    /// Creates a store from the session settings.
    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(
            config.cookie_file.clone(),
            config.token_file.clone(),
            config.persist_cookie,
            config.persist_token,
        )
    }

    /// Path of the cookie file, if configured.
    pub fn cookie_path(&self) -> Option<&Path> {
        self.cookie_path.as_deref()
    }

    /// Path of the token file, if configured.
    pub fn token_path(&self) -> Option<&Path> {
        self.token_path.as_deref()
    }

    /// Returns true if a cookie file is configured and present.
    pub fn cookie_file_exists(&self) -> bool {
        self.cookie_path.as_deref().is_some_and(Path::exists)
    }

    /// Checks the raw cookie file for every required cookie name.
    ///
    /// This is a textual check, matching how the SSO helper output is judged.
    /// A missing file is simply not good.
    ///
    /// # Errors
    ///
    /// Returns `SnowError::Config` if the file exists but cannot be read.
    pub fn cookie_file_is_good<S: AsRef<str>>(&self, names: &[S]) -> Result<bool, SnowError> {
        let Some(text) = self.cookie_path.as_deref().map(read_optional).transpose()? else {
            return Ok(false);
        };
        Ok(text.is_some_and(|text| names.iter().all(|name| text.contains(name.as_ref()))))
    }

    /// Loads the cookie jar, or `None` if there is no cookie file.
    ///
    /// # Errors
    ///
    /// Returns `SnowError::Config` if the file is unreadable or malformed.
    pub fn load_cookie_jar(&self) -> Result<Option<CookieJar>, SnowError> {
        let Some(path) = self.cookie_path.as_deref() else {
            return Ok(None);
        };
        match read_optional(path)? {
            Some(text) => CookieJar::parse_netscape(&text)
                .map(Some)
                .map_err(|e| SnowError::config(format!("{} ({})", e, path.display()))),
            None => Ok(None),
        }
    }

    /// Persists the jar, or removes the file when cookie persistence is off.
    pub fn store_cookie_jar(&self, jar: &CookieJar) -> Result<(), SnowError> {
        let Some(path) = self.cookie_path.as_deref() else {
            return Ok(());
        };
        if self.persist_cookie {
            write_private(path, &jar.to_netscape())
        } else {
            remove_if_exists(path)
        }
    }

    /// Removes the cookie file after it has been loaded, unless it is persisted.
    pub fn release_cookie_file(&self) -> Result<(), SnowError> {
        match self.cookie_path.as_deref() {
            Some(path) if !self.persist_cookie => remove_if_exists(path),
            _ => Ok(()),
        }
    }

    /// Removes the cookie file unconditionally.
    pub fn discard_cookie_file(&self) -> Result<(), SnowError> {
        match self.cookie_path.as_deref() {
            Some(path) => remove_if_exists(path),
            None => Ok(()),
        }
    }

    /// Returns true if a token file is configured and present.
    pub fn token_file_exists(&self) -> bool {
        self.token_path.as_deref().is_some_and(Path::exists)
    }

    /// Loads the persisted token pair.
    ///
    /// # Errors
    ///
    /// Returns `SnowError::Config` if the file is absent, unreadable or not a
    /// valid token payload.
    pub fn load_token(&self) -> Result<TokenPair, SnowError> {
        let path = self
            .token_path
            .as_deref()
            .ok_or_else(|| SnowError::missing_field("session.oauth_tokens_file"))?;
        let text = read_optional(path)?.ok_or_else(|| {
            SnowError::config(format!("token file {} does not exist", path.display()))
        })?;
        serde_json::from_str(&text).map_err(|e| {
            SnowError::config(format!(
                "issue when parsing the token file at {}: {}",
                path.display(),
                e
            ))
        })
    }

    /// Persists the token pair, or removes the file when token persistence is off.
    pub fn store_token(&self, token: &TokenPair) -> Result<(), SnowError> {
        let Some(path) = self.token_path.as_deref() else {
            return Ok(());
        };
        if self.persist_token {
            let text = serde_json::to_string_pretty(token)?;
            write_private(path, &text)
        } else {
            remove_if_exists(path)
        }
    }

    /// Removes the token file after it has been loaded, unless it is persisted.
    pub fn release_token_file(&self) -> Result<(), SnowError> {
        match self.token_path.as_deref() {
            Some(path) if !self.persist_token => remove_if_exists(path),
            _ => Ok(()),
        }
    }

    /// Removes the token file unconditionally.
    pub fn discard_token_file(&self) -> Result<(), SnowError> {
        match self.token_path.as_deref() {
            Some(path) => remove_if_exists(path),
            None => Ok(()),
        }
    }
}

fn read_optional(path: &Path) -> Result<Option<String>, SnowError> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(SnowError::config(format!(
            "issue when opening {}: {}",
            path.display(),
            e
        ))),
    }
}

fn write_private(path: &Path, contents: &str) -> Result<(), SnowError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| SnowError::io(parent, e))?;
    }
    fs::write(path, contents).map_err(|e| SnowError::io(path, e))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))
            .map_err(|e| SnowError::io(path, e))?;
    }

    tracing::debug!(path = %path.display(), "Credential file written");
    Ok(())
}

fn remove_if_exists(path: &Path) -> Result<(), SnowError> {
    match fs::remove_file(path) {
        Ok(()) => {
            tracing::debug!(path = %path.display(), "Credential file removed");
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(SnowError::io(path, e)),
    }
}
