//! # snow-client
//!
//! A ServiceNow REST client that handles authentication for you.
//!
//! The core is [`AuthSession`](session::AuthSession): it attaches valid
//! credentials to every request and transparently recovers, exactly once,
//! when the instance answers 401 on an expired credential.
//!
//! ## Features
//!
//! - **Basic Authentication**: user and password plus a persisted cookie jar
//! - **SSO + OAuth**: a session cookie minted by `cern-get-sso-cookie`, then
//!   OAuth password and refresh grants against `/oauth_token.do`
//! - **Persistence**: cookie and token files survive process runs, or are
//!   deleted right after use when persistence is turned off
//! - **Security**: passwords, client secrets and tokens are never logged
//!
//! ## Architecture
//!
//! - [`config`] - YAML configuration and setters
//! - [`error`] - Error types with message sanitization
//! - [`cookies`] - Netscape cookie jar codec
//! - [`credentials`] - Cookie and token file persistence
//! - [`sso`] - SSO helper invocation
//! - [`transport`] - HTTP transport bound to one instance
//! - [`session`] - The authentication state machine
//!
//! ## Configuration
//!
//! ```yaml
//! instance: cerntest.service-now.com
//! auth:
//!   type: sso_oauth
//!   sso_method: kerberos
//!   oauth_client_id: my-client-id
//! session:
//!   cookie_file: cookie.txt
//!   oauth_tokens_file: tokens.json
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use snow_client::{AuthSession, RequestOptions, SessionConfig};
//!
//! async fn example() -> Result<(), snow_client::SnowError> {
//!     let mut config = SessionConfig::from_yaml_file("config.yaml")?;
//!     config.set_oauth_client_secret(std::env::var("SNOW_OAUTH_CLIENT_SECRET").unwrap_or_default());
//!
//!     let mut session = AuthSession::new(config)?;
//!     let response = session
//!         .get(
//!             "/api/now/v2/table/incident",
//!             RequestOptions::new().with_param("sysparm_query", "number=INC0426232"),
//!         )
//!         .await?;
//!
//!     println!("{}: {}", response.status_code(), response.text());
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod config;
pub mod cookies;
pub mod credentials;
pub mod error;
pub mod session;
pub mod sso;
pub mod transport;

pub use config::{AuthConfig, SessionConfig, SsoMethod};
pub use error::SnowError;
pub use session::{AuthSession, AuthState};
pub use transport::{HttpMethod, HttpResponse, RequestOptions};
