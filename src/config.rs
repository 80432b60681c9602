//! Session configuration.
//!
//! A [`SessionConfig`] is loaded once from a YAML file (or built in code),
//! optionally adjusted through setters, and then handed to
//! [`AuthSession`](crate::session::AuthSession), which never mutates it.
//!
//! ```yaml
//! instance: cern.service-now.com
//! auth:
//!   type: sso_oauth
//!   sso_method: kerberos
//!   oauth_client_id: 0123abcd
//! session:
//!   cookie_file: cookie.txt
//!   oauth_tokens_file: tokens.json
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Deserialize;
use url::Host;

use crate::error::SnowError;

/// Cookie names that must all be present for an SSO cookie jar to be usable.
pub const DEFAULT_REQUIRED_COOKIES: [&str; 5] = [
    "glide_user_activity",
    "glide_session_store",
    "glide_user_route",
    "JSESSIONID",
    "BIGipServerpool_cern",
];

/// Single sign-on method used to obtain the session cookie.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SsoMethod {
    /// Kerberos ticket driven login through the SSO helper.
    Kerberos,
    /// Client certificate login. Recognized in configuration but not implemented.
    Certificate,
}

impl SsoMethod {
    fn ensure_supported(self) -> Result<Self, SnowError> {
        match self {
            SsoMethod::Kerberos => Ok(self),
            SsoMethod::Certificate => Err(SnowError::config(
                "sso_method \"certificate\" is not yet implemented",
            )),
        }
    }
}

impl FromStr for SsoMethod {
    type Err = SnowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "kerberos" => Ok(SsoMethod::Kerberos),
            "certificate" => Ok(SsoMethod::Certificate),
            other => Err(SnowError::config(format!(
                "sso_method must be \"kerberos\" or \"certificate\", got {:?}",
                other
            ))),
        }
    }
}

/// Authentication mode together with the credentials it needs.
#[derive(Clone, PartialEq, Eq)]
pub enum AuthConfig {
    /// HTTP Basic Authentication with a local ServiceNow account.
    Basic {
        /// Account name.
        user: String,
        /// Account password; may be supplied later through a setter.
        password: Option<String>,
    },
    /// SSO session cookie plus OAuth password/refresh grants.
    SsoOauth {
        /// How the SSO cookie is obtained.
        sso_method: SsoMethod,
        /// OAuth client id registered on the instance.
        client_id: String,
        /// OAuth client secret; may be supplied later through a setter.
        client_secret: Option<String>,
    },
}

impl AuthConfig {
    /// Returns the configuration keyword of this mode.
    pub fn kind(&self) -> &'static str {
        match self {
            AuthConfig::Basic { .. } => "basic",
            AuthConfig::SsoOauth { .. } => "sso_oauth",
        }
    }
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthConfig::Basic { user, password } => f
                .debug_struct("Basic")
                .field("user", user)
                .field("password", &password.as_ref().map(|_| "[REDACTED]"))
                .finish(),
            AuthConfig::SsoOauth {
                sso_method,
                client_id,
                client_secret,
            } => f
                .debug_struct("SsoOauth")
                .field("sso_method", sso_method)
                .field("client_id", client_id)
                .field("client_secret", &client_secret.as_ref().map(|_| "[REDACTED]"))
                .finish(),
        }
    }
}

/// Log level names accepted in the `log` block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// `DEBUG`
    Debug,
    /// `INFO`
    Info,
    /// `WARNING`
    Warning,
    /// `ERROR`
    Error,
    /// `CRITICAL`, which tracing has no separate level for.
    Critical,
}

impl LogLevel {
    /// Returns the tracing filter directive for this level.
    pub fn as_directive(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warn",
            LogLevel::Error | LogLevel::Critical => "error",
        }
    }
}

impl FromStr for LogLevel {
    type Err = SnowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DEBUG" => Ok(LogLevel::Debug),
            "INFO" => Ok(LogLevel::Info),
            "WARNING" | "WARN" => Ok(LogLevel::Warning),
            "ERROR" => Ok(LogLevel::Error),
            "CRITICAL" => Ok(LogLevel::Critical),
            other => Err(SnowError::config(format!("unknown log_level {:?}", other))),
        }
    }
}

/// Settings of the optional `log` block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// Whether file logging is requested.
    pub enabled: bool,
    /// Minimum level.
    pub level: LogLevel,
    /// Destination file.
    pub file_path: Option<PathBuf>,
    /// Accepted for compatibility; the tracing formatter is always used.
    pub format: String,
    /// Accepted for compatibility; rotation is time based.
    pub file_size_bytes: u64,
    /// Maximum number of log files kept.
    pub file_rotations: u32,
    /// Only utf-8 is supported.
    pub encoding: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            level: LogLevel::Info,
            file_path: None,
            format: "%(asctime)s [%(name)s] [%(levelname)s] %(message)s".to_string(),
            file_size_bytes: 1_000_000,
            file_rotations: 10,
            encoding: "utf-8".to_string(),
        }
    }
}

impl LogConfig {
    /// Returns the log file when logging to a file is both enabled and possible.
    pub fn active_file(&self) -> Option<&Path> {
        if self.enabled {
            self.file_path.as_deref()
        } else {
            None
        }
    }
}

/// Immutable configuration of one [`AuthSession`](crate::session::AuthSession).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Normalized instance base URL, e.g. `https://cern.service-now.com`.
    pub instance: String,

    /// Authentication mode and credentials.
    pub auth: AuthConfig,

    /// Where the session cookie jar lives on disk.
    pub cookie_file: Option<PathBuf>,

    /// Where the OAuth token pair lives on disk.
    pub token_file: Option<PathBuf>,

    /// Keep the cookie file after use.
    pub persist_cookie: bool,

    /// Keep the token file after use.
    pub persist_token: bool,

    /// Cookie names an SSO cookie jar must contain to be considered good.
    pub required_cookies: Vec<String>,

    /// Logging settings, consumed by the binary.
    pub log: LogConfig,
}

#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    instance: Option<String>,
    auth: Option<RawAuth>,
    session: Option<RawSession>,
    log: Option<RawLog>,
}

#[derive(Debug, Default, Deserialize)]
struct RawAuth {
    #[serde(rename = "type")]
    auth_type: Option<String>,
    sso_method: Option<String>,
    user: Option<String>,
    password: Option<String>,
    oauth_client_id: Option<String>,
    oauth_client_secret: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawSession {
    cookie_file: Option<PathBuf>,
    oauth_tokens_file: Option<PathBuf>,
    persist_cookie: Option<bool>,
    persist_token: Option<bool>,
    required_cookies: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
struct RawLog {
    log_enabled: Option<bool>,
    log_level: Option<String>,
    log_file_path: Option<PathBuf>,
    log_format: Option<String>,
    log_file_size_bytes: Option<u64>,
    log_file_rotations: Option<u32>,
    log_file_encoding: Option<String>,
}

impl SessionConfig {
    /// Creates a configuration in code, without a file.
    ///
    /// # Errors
    ///
    /// Returns `SnowError::Config` if the instance is empty or the auth
    /// settings are unusable (for example the `certificate` SSO method).
    pub fn new(instance: &str, auth: AuthConfig) -> Result<Self, SnowError> {
        let auth = Self::validate_auth(auth)?;
        Ok(Self {
            instance: Self::normalize_instance(instance)?,
            auth,
            cookie_file: None,
            token_file: None,
            persist_cookie: true,
            persist_token: true,
            required_cookies: DEFAULT_REQUIRED_COOKIES
                .iter()
                .map(|name| name.to_string())
                .collect(),
            log: LogConfig::default(),
        })
    }

    /// Loads a YAML configuration file.
    ///
    /// # Errors
    ///
    /// Returns `SnowError::Config` if the file cannot be read, is not valid
    /// YAML, or fails validation.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, SnowError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            SnowError::config(format!(
                "could not open config file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_yaml_str(&text)
    }

    /// Parses a YAML configuration document.
    ///
    /// # Errors
    ///
    /// Returns `SnowError::Config` on malformed YAML, an unknown `auth.type`,
    /// an unsupported `sso_method` or a missing mandatory field.
    pub fn from_yaml_str(text: &str) -> Result<Self, SnowError> {
        let raw: Option<RawConfig> = serde_yaml::from_str(text)
            .map_err(|e| SnowError::config(format!("invalid config file: {}", e)))?;
        Self::from_raw(raw.unwrap_or_default())
    }

    fn from_raw(raw: RawConfig) -> Result<Self, SnowError> {
        let instance = raw
            .instance
            .ok_or_else(|| SnowError::missing_field("instance"))?;
        let auth = raw.auth.unwrap_or_default();
        let session = raw.session.unwrap_or_default();

        let auth = match auth.auth_type.as_deref().map(str::trim) {
            Some("basic") => AuthConfig::Basic {
                user: non_empty(auth.user).ok_or_else(|| SnowError::missing_field("auth.user"))?,
                password: non_empty(auth.password),
            },
            Some("sso_oauth") => {
                let sso_method = match non_empty(auth.sso_method) {
                    Some(method) => method.parse()?,
                    None => SsoMethod::Kerberos,
                };
                AuthConfig::SsoOauth {
                    sso_method,
                    client_id: non_empty(auth.oauth_client_id)
                        .ok_or_else(|| SnowError::missing_field("auth.oauth_client_id"))?,
                    client_secret: non_empty(auth.oauth_client_secret),
                }
            }
            _ => {
                return Err(SnowError::config(
                    "auth.type must have a value of \"sso_oauth\" or \"basic\"",
                ))
            }
        };

        let mut config = Self::new(&instance, auth)?;
        config.cookie_file = session.cookie_file;
        config.token_file = session.oauth_tokens_file;
        config.persist_cookie = session.persist_cookie.unwrap_or(true);
        config.persist_token = session.persist_token.unwrap_or(true);
        if let Some(names) = session.required_cookies {
            if names.is_empty() {
                return Err(SnowError::config(
                    "session.required_cookies must not be empty",
                ));
            }
            config.required_cookies = names;
        }
        if let Some(log) = raw.log {
            config.log = Self::log_from_raw(log)?;
        }

        config.validate_files()?;
        Ok(config)
    }

    fn log_from_raw(raw: RawLog) -> Result<LogConfig, SnowError> {
        let mut log = LogConfig::default();
        log.enabled = raw.log_enabled.unwrap_or(false);
        if let Some(level) = raw.log_level {
            log.level = level.parse()?;
        }
        log.file_path = raw.log_file_path;
        if let Some(format) = raw.log_format {
            log.format = format;
        }
        if let Some(size) = raw.log_file_size_bytes {
            log.file_size_bytes = size;
        }
        if let Some(rotations) = raw.log_file_rotations {
            if rotations == 0 {
                return Err(SnowError::config("log_file_rotations must be at least 1"));
            }
            log.file_rotations = rotations;
        }
        if let Some(encoding) = raw.log_file_encoding {
            let normalized = encoding.trim().to_ascii_lowercase();
            if normalized != "utf-8" && normalized != "utf8" {
                return Err(SnowError::config(format!(
                    "log_file_encoding {:?} is not supported, use utf-8",
                    encoding
                )));
            }
            log.encoding = normalized;
        }
        Ok(log)
    }

    /// SSO/OAuth sessions cannot work without both credential files.
    fn validate_files(&self) -> Result<(), SnowError> {
        if let AuthConfig::SsoOauth { .. } = self.auth {
            if self.cookie_file.is_none() {
                return Err(SnowError::missing_field("session.cookie_file"));
            }
            if self.token_file.is_none() {
                return Err(SnowError::missing_field("session.oauth_tokens_file"));
            }
        }
        Ok(())
    }

    fn validate_auth(auth: AuthConfig) -> Result<AuthConfig, SnowError> {
        if let AuthConfig::SsoOauth { sso_method, .. } = &auth {
            sso_method.ensure_supported()?;
        }
        Ok(auth)
    }

    /// Normalizes an instance name or URL to `https://host` form.
    ///
    /// Plain `http://` is only accepted for loopback hosts, for local mock
    /// instances. Credentials must never travel in clear text to a real one.
    fn normalize_instance(instance: &str) -> Result<String, SnowError> {
        let instance = instance.trim().trim_end_matches('/');
        if instance.is_empty() {
            return Err(SnowError::missing_field("instance"));
        }
        if instance.starts_with("https://") {
            return Ok(instance.to_string());
        }
        if instance.starts_with("http://") {
            let url = url::Url::parse(instance).map_err(|e| {
                SnowError::config(format!("invalid instance URL {:?}: {}", instance, e))
            })?;
            return match url.host() {
                Some(Host::Domain(domain)) if domain.eq_ignore_ascii_case("localhost") => {
                    Ok(instance.to_string())
                }
                Some(Host::Ipv4(ip)) if ip.is_loopback() => Ok(instance.to_string()),
                Some(Host::Ipv6(ip)) if ip.is_loopback() => Ok(instance.to_string()),
                _ => Err(SnowError::config(format!(
                    "instance {:?} must use https://, plain http:// is only allowed for loopback hosts",
                    instance
                ))),
            };
        }
        Ok(format!("https://{}", instance))
    }

    /// Replaces the instance. The `https://` prefix is optional.
    pub fn set_instance(&mut self, instance: &str) -> Result<(), SnowError> {
        self.instance = Self::normalize_instance(instance)?;
        Ok(())
    }

    /// Supplies the Basic password, e.g. to keep it out of the config file.
    ///
    /// Has no effect in SSO/OAuth mode.
    pub fn set_basic_auth_password(&mut self, secret: impl Into<String>) {
        if let AuthConfig::Basic { password, .. } = &mut self.auth {
            *password = Some(secret.into());
        }
    }

    /// Supplies the OAuth client secret.
    ///
    /// Has no effect in Basic mode.
    pub fn set_oauth_client_secret(&mut self, secret: impl Into<String>) {
        if let AuthConfig::SsoOauth { client_secret, .. } = &mut self.auth {
            *client_secret = Some(secret.into());
        }
    }

    /// Changes the SSO method.
    ///
    /// # Errors
    ///
    /// Returns `SnowError::Config` for `SsoMethod::Certificate`.
    pub fn set_sso_method(&mut self, method: SsoMethod) -> Result<(), SnowError> {
        let method = method.ensure_supported()?;
        if let AuthConfig::SsoOauth { sso_method, .. } = &mut self.auth {
            *sso_method = method;
        }
        Ok(())
    }

    /// Sets the cookie jar path.
    pub fn set_cookie_file(&mut self, path: impl Into<PathBuf>) {
        self.cookie_file = Some(path.into());
    }

    /// Sets the OAuth token file path.
    pub fn set_token_file(&mut self, path: impl Into<PathBuf>) {
        self.token_file = Some(path.into());
    }

    /// Keep (or delete after use) the cookie file.
    pub fn set_persist_cookie(&mut self, persist: bool) {
        self.persist_cookie = persist;
    }

    /// Keep (or delete after use) the token file.
    pub fn set_persist_token(&mut self, persist: bool) {
        self.persist_token = persist;
    }

    /// Returns every secret held by this configuration, for log sanitization.
    pub fn secrets(&self) -> Vec<&str> {
        match &self.auth {
            AuthConfig::Basic { password, .. } => password.as_deref().into_iter().collect(),
            AuthConfig::SsoOauth { client_secret, .. } => {
                client_secret.as_deref().into_iter().collect()
            }
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Skeleton configuration files written by `snow init`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigTemplate {
    /// Basic Authentication skeleton.
    Basic,
    /// Kerberos SSO + OAuth skeleton.
    Kerberos,
}

impl ConfigTemplate {
    /// Renders the skeleton as YAML.
    pub fn render(self) -> String {
        let auth = match self {
            ConfigTemplate::Basic => {
                "auth:\n  type: basic\n  user: \n  password: \n\
                 session:\n  cookie_file: cookie.txt\n"
            }
            ConfigTemplate::Kerberos => {
                "auth:\n  type: sso_oauth\n  sso_method: kerberos\n  oauth_client_id: \n  oauth_client_secret: \n\
                 session:\n  cookie_file: cookie.txt\n  oauth_tokens_file: tokens.json\n"
            }
        };
        format!(
            "instance: \n{auth}log:\n  log_enabled: true\n  log_file_path: log.txt\n  log_level: DEBUG\n  \
             log_format: \"%(asctime)s [%(name)s] [%(levelname)s] %(message)s\"\n  \
             log_file_size_bytes: 1000000\n  log_file_rotations: 10\n  log_file_encoding: utf-8\n"
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const BASIC_YAML: &str = "\
instance: cerntest.service-now.com
auth:
  type: basic
  user: snow_client_test
  password: hunter2
session:
  cookie_file: basic_cookie.txt
";

    const SSO_YAML: &str = "\
instance: https://cerntest.service-now.com/
auth:
  type: sso_oauth
  sso_method: kerberos
  oauth_client_id: abc123
session:
  cookie_file: sso_cookie.txt
  oauth_tokens_file: tokens.json
  persist_token: false
log:
  log_enabled: true
  log_level: warning
  log_file_path: snow.log
  log_file_rotations: 3
";

    #[test]
    fn test_basic_config_from_yaml() {
        let config = SessionConfig::from_yaml_str(BASIC_YAML).unwrap();
        assert_eq!(config.instance, "https://cerntest.service-now.com");
        assert_eq!(
            config.auth,
            AuthConfig::Basic {
                user: "snow_client_test".to_string(),
                password: Some("hunter2".to_string()),
            }
        );
        assert_eq!(config.cookie_file, Some(PathBuf::from("basic_cookie.txt")));
        assert!(config.persist_cookie);
        assert_eq!(config.required_cookies.len(), 5);
    }

    #[test]
    fn test_sso_config_from_yaml() {
        let config = SessionConfig::from_yaml_str(SSO_YAML).unwrap();
        assert_eq!(config.instance, "https://cerntest.service-now.com");
        assert!(matches!(
            config.auth,
            AuthConfig::SsoOauth {
                sso_method: SsoMethod::Kerberos,
                client_secret: None,
                ..
            }
        ));
        assert!(!config.persist_token);
        assert_eq!(config.log.level, LogLevel::Warning);
        assert_eq!(config.log.file_rotations, 3);
        assert_eq!(config.log.active_file(), Some(Path::new("snow.log")));
    }

    #[test]
    fn test_unknown_auth_type_is_rejected() {
        let yaml = "instance: x\nauth:\n  type: sso_auth\n";
        let err = SessionConfig::from_yaml_str(yaml).unwrap_err();
        assert!(err.is_config());
        assert!(err.to_string().contains("auth.type"));
    }

    #[test]
    fn test_certificate_method_is_recognized_but_rejected() {
        assert_eq!("certificate".parse::<SsoMethod>().unwrap(), SsoMethod::Certificate);

        let yaml = SSO_YAML.replace("kerberos", "certificate");
        let err = SessionConfig::from_yaml_str(&yaml).unwrap_err();
        assert!(err.to_string().contains("not yet implemented"));
    }

    #[test]
    fn test_unknown_sso_method_is_rejected() {
        let yaml = SSO_YAML.replace("kerberos", "smartcard");
        assert!(SessionConfig::from_yaml_str(&yaml).is_err());
    }

    #[test]
    fn test_sso_requires_token_file() {
        let yaml = SSO_YAML.replace("  oauth_tokens_file: tokens.json\n", "");
        let err = SessionConfig::from_yaml_str(&yaml).unwrap_err();
        assert!(err.to_string().contains("session.oauth_tokens_file"));
    }

    #[test]
    fn test_missing_instance_is_rejected() {
        let err = SessionConfig::from_yaml_str("auth:\n  type: basic\n  user: a\n").unwrap_err();
        assert!(err.to_string().contains("instance"));
    }

    #[test]
    fn test_normalize_instance() {
        assert_eq!(
            SessionConfig::normalize_instance("cern.service-now.com").unwrap(),
            "https://cern.service-now.com"
        );
        assert_eq!(
            SessionConfig::normalize_instance("https://cern.service-now.com/").unwrap(),
            "https://cern.service-now.com"
        );
        assert_eq!(
            SessionConfig::normalize_instance("http://127.0.0.1:8080").unwrap(),
            "http://127.0.0.1:8080"
        );
        assert!(SessionConfig::normalize_instance("  ").is_err());
    }

    #[test]
    fn test_plain_http_only_for_loopback() {
        assert_eq!(
            SessionConfig::normalize_instance("http://localhost:8080/").unwrap(),
            "http://localhost:8080"
        );
        assert_eq!(
            SessionConfig::normalize_instance("http://[::1]:8080").unwrap(),
            "http://[::1]:8080"
        );

        let err = SessionConfig::normalize_instance("http://cern.service-now.com").unwrap_err();
        assert!(err.is_config());
        assert!(SessionConfig::normalize_instance("http://10.0.0.7").is_err());
        assert!(SessionConfig::new(
            "http://cern.service-now.com",
            AuthConfig::Basic {
                user: "u".to_string(),
                password: None,
            },
        )
        .is_err());
    }

    #[test]
    fn test_setters() {
        let mut config = SessionConfig::from_yaml_str(SSO_YAML).unwrap();
        config.set_oauth_client_secret("s3cr3t");
        config.set_persist_cookie(false);
        config.set_cookie_file("/tmp/other.txt");
        assert_eq!(config.secrets(), vec!["s3cr3t"]);
        assert!(!config.persist_cookie);
        assert_eq!(config.cookie_file, Some(PathBuf::from("/tmp/other.txt")));
        assert!(config.set_sso_method(SsoMethod::Certificate).is_err());
        assert!(config.set_sso_method(SsoMethod::Kerberos).is_ok());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let config = SessionConfig::from_yaml_str(BASIC_YAML).unwrap();
        let debug = format!("{:?}", config);
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn test_log_encoding_must_be_utf8() {
        let yaml = format!("{}log:\n  log_file_encoding: latin-1\n", BASIC_YAML);
        assert!(SessionConfig::from_yaml_str(&yaml).is_err());
    }

    #[test]
    fn test_templates_parse_after_filling_in() {
        let basic = ConfigTemplate::Basic
            .render()
            .replace("instance: ", "instance: cerntest.service-now.com")
            .replace("user: ", "user: someone");
        let config = SessionConfig::from_yaml_str(&basic).unwrap();
        assert_eq!(config.auth.kind(), "basic");
        assert_eq!(config.log.level, LogLevel::Debug);

        let kerberos = ConfigTemplate::Kerberos
            .render()
            .replace("instance: ", "instance: cerntest.service-now.com")
            .replace("oauth_client_id: ", "oauth_client_id: abc");
        let config = SessionConfig::from_yaml_str(&kerberos).unwrap();
        assert_eq!(config.auth.kind(), "sso_oauth");
        assert_eq!(config.token_file, Some(PathBuf::from("tokens.json")));
    }
}
