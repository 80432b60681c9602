//! Authenticated REST session against a ServiceNow instance.
//!
//! `AuthSession` makes sure every request carries valid credentials and
//! recovers once from an expired credential. Two strategies exist:
//!
//! - **Basic**: user and password on every request, plus a cookie jar that is
//!   persisted after each successful call.
//! - **SSO + OAuth**: a session cookie minted by the SSO helper, plus an OAuth
//!   token pair obtained through the password grant and refreshed on 401.
//!
//! A 401 right after a credential was minted means the credential itself is
//! wrong, so it is reported as [`SnowError::Credential`] instead of retried.

use std::path::Path;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use url::Url;

use crate::config::{AuthConfig, SessionConfig, SsoMethod};
use crate::cookies::CookieJar;
use crate::credentials::{CredentialStore, TokenPair};
use crate::error::SnowError;
use crate::sso::{CernSsoCookieHelper, SsoInvoker};
use crate::transport::{HttpMethod, HttpResponse, HttpTransport, RequestOptions};

/// Path of the OAuth token endpoint on every instance.
pub const TOKEN_ENDPOINT: &str = "/oauth_token.do";

const SSO_FAILED: &str =
    "the current account has failed to perform a Single-Sign-On login in to ServiceNow";
const TOKENS_REJECTED: &str = "OAuth tokens could not be retrieved from ServiceNow, \
     please check the OAuth client id and OAuth client secret";
const CLIENT_REJECTED: &str = "the OAuth client id and OAuth client secret might not be valid";
const OPERATION_REJECTED: &str = "failed to perform the operation, the current account might not \
     be able to log in to ServiceNow or the OAuth client id and secret might not be valid";
const BASIC_REJECTED: &str = "your basic authentication user and password might not be valid";

/// Whether each credential was minted during the current session call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AuthState {
    /// The cookie was just created by the SSO helper (or saved after a Basic login).
    pub fresh_cookie: bool,
    /// The token pair was just obtained through a password grant.
    pub fresh_token: bool,
}

/// Outcome of one request attempt.
enum Attempt {
    Done(HttpResponse),
    /// The instance answered 401.
    Expired,
}

/// A ServiceNow REST session.
///
/// Not meant for concurrent use: every operation takes `&mut self` and
/// completes its network and file steps in order.
///
/// ```ignore
/// let config = SessionConfig::from_yaml_file("config.yaml")?;
/// let mut session = AuthSession::new(config)?;
/// let response = session
///     .get("/api/now/v2/table/incident", RequestOptions::new()
///         .with_param("sysparm_query", "number=INC0426232"))
///     .await?;
/// ```
pub struct AuthSession {
    config: SessionConfig,
    store: CredentialStore,
    transport: HttpTransport,
    sso: Box<dyn SsoInvoker>,
    state: AuthState,
    token: Option<TokenPair>,
    /// A cookie jar was loaded into the transport by an earlier call.
    cookie_in_memory: bool,
}

impl AuthSession {
    /// Creates a session that logs in through `cern-get-sso-cookie`.
    ///
    /// # Errors
    ///
    /// Returns `SnowError::Config` for an invalid instance URL or an
    /// unsupported SSO method.
    pub fn new(config: SessionConfig) -> Result<Self, SnowError> {
        Self::with_sso_invoker(config, Box::new(CernSsoCookieHelper::default()))
    }

    /// Creates a session with a custom SSO implementation.
    pub fn with_sso_invoker(
        config: SessionConfig,
        sso: Box<dyn SsoInvoker>,
    ) -> Result<Self, SnowError> {
        if let AuthConfig::SsoOauth {
            sso_method: SsoMethod::Certificate,
            ..
        } = config.auth
        {
            return Err(SnowError::config(
                "sso_method \"certificate\" is not yet implemented",
            ));
        }

        let transport = HttpTransport::new(&config.instance)?;
        let store = CredentialStore::from_config(&config);

        tracing::info!(
            instance = %config.instance,
            auth = config.auth.kind(),
            "ServiceNow session created"
        );

        Ok(Self {
            config,
            store,
            transport,
            sso,
            state: AuthState::default(),
            token: None,
            cookie_in_memory: false,
        })
    }

    /// Session settings.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Freshness flags of the current credentials.
    pub fn auth_state(&self) -> AuthState {
        self.state
    }

    /// The OAuth token pair in use, if any.
    pub fn token(&self) -> Option<&TokenPair> {
        self.token.as_ref()
    }

    /// Cookies currently attached to requests.
    pub fn cookie_jar(&self) -> &CookieJar {
        self.transport.cookies()
    }

    /// Performs a GET request.
    pub async fn get(
        &mut self,
        url: &str,
        options: RequestOptions,
    ) -> Result<HttpResponse, SnowError> {
        self.perform(HttpMethod::Get, url, options).await
    }

    /// Performs a POST request.
    pub async fn post(
        &mut self,
        url: &str,
        options: RequestOptions,
    ) -> Result<HttpResponse, SnowError> {
        self.perform(HttpMethod::Post, url, options).await
    }

    /// Performs a PUT request.
    pub async fn put(
        &mut self,
        url: &str,
        options: RequestOptions,
    ) -> Result<HttpResponse, SnowError> {
        self.perform(HttpMethod::Put, url, options).await
    }

    /// Performs an authenticated request, re-authenticating once if needed.
    ///
    /// `url` is relative to the instance (`/api/now/v2/table/incident`) or an
    /// absolute URL on the instance host. `Accept: application/json` is added
    /// unless set, and `Content-Type: application/json` for POST and PUT.
    ///
    /// Any status other than 401 is returned as a response.
    ///
    /// # Errors
    ///
    /// - `SnowError::Validation` for an empty URL or one on another host
    /// - `SnowError::Config` for missing settings or a corrupt cookie/token file
    /// - `SnowError::Credential` when the credentials are rejected after recovery
    /// - `SnowError::Http` / `SnowError::Timeout` on connectivity failures
    pub async fn perform(
        &mut self,
        method: HttpMethod,
        url: &str,
        options: RequestOptions,
    ) -> Result<HttpResponse, SnowError> {
        let url = self.transport.resolve(url)?;
        let headers = request_headers(method, &options)?;

        let result = if matches!(self.config.auth, AuthConfig::Basic { .. }) {
            self.perform_basic(method, &url, headers, &options).await
        } else {
            self.perform_oauth(method, &url, headers, &options).await
        };

        if let Err(e) = &result {
            tracing::warn!(
                method = %method,
                path = %url.path(),
                error = %e.sanitized_display(&self.secrets()),
                "ServiceNow operation failed"
            );
        }
        result
    }

    async fn perform_basic(
        &mut self,
        method: HttpMethod,
        url: &Url,
        headers: HeaderMap,
        options: &RequestOptions,
    ) -> Result<HttpResponse, SnowError> {
        self.initiate_basic()?;

        if let Attempt::Done(response) = self.attempt(method, url, headers.clone(), options).await? {
            self.save_basic_cookie()?;
            return Ok(response);
        }

        if self.state.fresh_cookie {
            return Err(SnowError::credential(BASIC_REJECTED));
        }

        tracing::info!("Session cookie rejected, retrying with user and password");
        let (user, password) = self.basic_credentials()?;
        self.transport.clear_cookies();
        self.transport.set_basic_auth(user, password);

        match self.attempt(method, url, headers, options).await? {
            Attempt::Done(response) => {
                self.save_basic_cookie()?;
                Ok(response)
            }
            Attempt::Expired => Err(SnowError::credential(BASIC_REJECTED)),
        }
    }

    async fn perform_oauth(
        &mut self,
        method: HttpMethod,
        url: &Url,
        headers: HeaderMap,
        options: &RequestOptions,
    ) -> Result<HttpResponse, SnowError> {
        self.ensure_cookie().await?;
        self.ensure_token().await?;

        let authorized = self.with_bearer(&headers)?;
        if let Attempt::Done(response) = self.attempt(method, url, authorized, options).await? {
            return Ok(response);
        }

        if self.state.fresh_token {
            return Err(SnowError::credential(OPERATION_REJECTED));
        }

        tracing::info!("Access token rejected, refreshing");
        if !self.refresh_token().await? {
            tracing::info!("Token refresh failed, the SSO session may have timed out");
            self.discard_cookie()?;
            self.ensure_cookie().await?;
            match self.password_grant().await? {
                Some(token) => self.adopt_token(token)?,
                None => return Err(SnowError::credential(TOKENS_REJECTED)),
            }
        }

        let authorized = self.with_bearer(&headers)?;
        match self.attempt(method, url, authorized, options).await? {
            Attempt::Done(response) => Ok(response),
            Attempt::Expired => Err(SnowError::credential(OPERATION_REJECTED)),
        }
    }

    /// Makes sure a good SSO cookie is attached to the transport.
    ///
    /// A cookie file holding every required cookie is reused as is. A missing
    /// or incomplete file is replaced by running the SSO helper, which marks
    /// the cookie fresh. When cookie persistence is off, the jar loaded by an
    /// earlier call is reused.
    ///
    /// # Errors
    ///
    /// Returns `SnowError::Credential` if the cookie file is still incomplete
    /// after the helper ran, and `SnowError::Config` if no cookie file is
    /// configured or it cannot be parsed.
    pub async fn ensure_cookie(&mut self) -> Result<(), SnowError> {
        let path = self
            .store
            .cookie_path()
            .map(Path::to_path_buf)
            .ok_or_else(|| SnowError::missing_field("session.cookie_file"))?;

        if self.store.cookie_file_exists() {
            if self.store.cookie_file_is_good(&self.config.required_cookies)? {
                self.state.fresh_cookie = false;
            } else {
                tracing::info!(path = %path.display(), "Cookie file is incomplete, logging in again");
                self.mint_cookie(&path).await?;
            }
        } else if !self.config.persist_cookie && self.cookie_in_memory {
            tracing::debug!("Reusing the session cookie held in memory");
            self.state.fresh_cookie = false;
            return Ok(());
        } else {
            self.mint_cookie(&path).await?;
        }

        if !self.store.cookie_file_is_good(&self.config.required_cookies)? {
            return Err(SnowError::credential(SSO_FAILED));
        }

        let jar = self
            .store
            .load_cookie_jar()?
            .ok_or_else(|| SnowError::credential(SSO_FAILED))?;
        tracing::debug!(cookies = jar.len(), fresh = self.state.fresh_cookie, "Session cookie loaded");
        self.transport.attach_cookies(jar);
        self.cookie_in_memory = true;
        self.store.release_cookie_file()
    }

    /// Makes sure an OAuth token pair is available.
    ///
    /// A token file is loaded as is. Otherwise a password grant is performed,
    /// marking the token fresh. If that grant fails on a cookie loaded from
    /// an earlier run, the SSO login is redone and the grant retried once.
    ///
    /// # Errors
    ///
    /// Returns `SnowError::Config` for a malformed token file and
    /// `SnowError::Credential` when the token endpoint keeps refusing.
    pub async fn ensure_token(&mut self) -> Result<(), SnowError> {
        if self.store.token_path().is_none() {
            return Err(SnowError::missing_field("session.oauth_tokens_file"));
        }

        if self.store.token_file_exists() {
            self.token = Some(self.store.load_token()?);
            self.state.fresh_token = false;
            tracing::debug!("OAuth tokens loaded from file");
            return self.store.release_token_file();
        }

        if !self.config.persist_token && self.token.is_some() {
            tracing::debug!("Reusing the OAuth tokens held in memory");
            self.state.fresh_token = false;
            return Ok(());
        }

        self.state.fresh_token = true;
        if let Some(token) = self.password_grant().await? {
            return self.adopt_token(token);
        }

        if self.state.fresh_cookie {
            return Err(SnowError::credential(TOKENS_REJECTED));
        }

        tracing::info!("Token request failed, the SSO session may have timed out");
        self.discard_cookie()?;
        self.ensure_cookie().await?;
        match self.password_grant().await? {
            Some(token) => self.adopt_token(token),
            None => Err(SnowError::credential(TOKENS_REJECTED)),
        }
    }

    /// Replaces the token pair through the refresh grant, falling back to
    /// the password grant.
    ///
    /// Returns `Ok(false)` if both grants failed and the cookie was loaded
    /// from an earlier run, leaving recovery to the caller.
    ///
    /// # Errors
    ///
    /// Returns `SnowError::Credential` if both grants failed right after an
    /// SSO login.
    pub async fn refresh_token(&mut self) -> Result<bool, SnowError> {
        if let Some(token) = self.refresh_grant().await? {
            self.adopt_token(token)?;
            return Ok(true);
        }

        tracing::debug!("Refresh grant failed, falling back to the password grant");
        if let Some(token) = self.password_grant().await? {
            self.adopt_token(token)?;
            return Ok(true);
        }

        if self.state.fresh_cookie {
            return Err(SnowError::credential(CLIENT_REJECTED));
        }
        Ok(false)
    }

    fn initiate_basic(&mut self) -> Result<(), SnowError> {
        let (user, password) = self.basic_credentials()?;
        self.transport.set_basic_auth(user, password);

        if let Some(jar) = self.store.load_cookie_jar()? {
            tracing::debug!(cookies = jar.len(), "Basic session cookie loaded");
            self.transport.attach_cookies(jar);
            self.cookie_in_memory = true;
        }
        Ok(())
    }

    fn save_basic_cookie(&mut self) -> Result<(), SnowError> {
        self.state.fresh_cookie = true;
        self.cookie_in_memory = true;
        self.store.store_cookie_jar(self.transport.cookies())
    }

    async fn mint_cookie(&mut self, path: &Path) -> Result<(), SnowError> {
        let outcome = self.sso.mint(self.transport.instance(), path).await?;
        tracing::debug!(success = outcome.success, "SSO helper finished");
        self.state.fresh_cookie = true;
        Ok(())
    }

    fn discard_cookie(&mut self) -> Result<(), SnowError> {
        self.transport.clear_cookies();
        self.cookie_in_memory = false;
        self.store.discard_cookie_file()
    }

    async fn password_grant(&mut self) -> Result<Option<TokenPair>, SnowError> {
        let (client_id, client_secret) = self.oauth_client()?;
        self.request_token(&[
            ("grant_type", "password"),
            ("client_id", client_id.as_str()),
            ("client_secret", client_secret.as_str()),
        ])
        .await
    }

    async fn refresh_grant(&mut self) -> Result<Option<TokenPair>, SnowError> {
        let Some(refresh_token) = self.token.as_ref().and_then(|t| t.refresh_token.clone()) else {
            return Ok(None);
        };
        let (client_id, client_secret) = self.oauth_client()?;
        self.request_token(&[
            ("grant_type", "refresh_token"),
            ("client_id", client_id.as_str()),
            ("client_secret", client_secret.as_str()),
            ("refresh_token", refresh_token.as_str()),
        ])
        .await
    }

    /// Posts a grant to the token endpoint. A refusal is `Ok(None)`.
    async fn request_token(
        &mut self,
        form: &[(&str, &str)],
    ) -> Result<Option<TokenPair>, SnowError> {
        let grant_type = form
            .iter()
            .find(|(k, _)| *k == "grant_type")
            .map_or("", |(_, v)| *v)
            .to_string();
        let url = self.transport.resolve(TOKEN_ENDPOINT)?;
        let response = self.transport.post_form(&url, form).await?;

        if response.status() != StatusCode::OK {
            tracing::info!(grant_type = %grant_type, status = response.status_code(), "Token request refused");
            return Ok(None);
        }

        match response.json::<TokenPair>() {
            Ok(token) => {
                tracing::debug!(grant_type = %grant_type, "Token request succeeded");
                Ok(Some(token))
            }
            Err(e) => {
                tracing::warn!(grant_type = %grant_type, error = %e, "Token endpoint returned an unreadable payload");
                Ok(None)
            }
        }
    }

    fn adopt_token(&mut self, token: TokenPair) -> Result<(), SnowError> {
        self.store.store_token(&token)?;
        self.token = Some(token);
        Ok(())
    }

    async fn attempt(
        &mut self,
        method: HttpMethod,
        url: &Url,
        headers: HeaderMap,
        options: &RequestOptions,
    ) -> Result<Attempt, SnowError> {
        let response = self
            .transport
            .send(method, url, headers, options.params(), options.body())
            .await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            tracing::debug!(method = %method, path = %url.path(), "Instance answered 401");
            return Ok(Attempt::Expired);
        }
        Ok(Attempt::Done(response))
    }

    fn with_bearer(&self, headers: &HeaderMap) -> Result<HeaderMap, SnowError> {
        let token = self
            .token
            .as_ref()
            .ok_or_else(|| SnowError::credential("no OAuth access token available"))?;
        let mut value = HeaderValue::from_str(&token.bearer())
            .map_err(|_| SnowError::credential("the OAuth access token is not a valid header value"))?;
        value.set_sensitive(true);

        let mut headers = headers.clone();
        headers.insert(AUTHORIZATION, value);
        Ok(headers)
    }

    fn basic_credentials(&self) -> Result<(String, String), SnowError> {
        match &self.config.auth {
            AuthConfig::Basic { user, password } => {
                let password = password
                    .clone()
                    .ok_or_else(|| SnowError::missing_field("auth.password"))?;
                Ok((user.clone(), password))
            }
            AuthConfig::SsoOauth { .. } => Err(SnowError::config(
                "basic credentials requested for an sso_oauth session",
            )),
        }
    }

    fn oauth_client(&self) -> Result<(String, String), SnowError> {
        match &self.config.auth {
            AuthConfig::SsoOauth {
                client_id,
                client_secret,
                ..
            } => {
                let secret = client_secret
                    .clone()
                    .ok_or_else(|| SnowError::missing_field("auth.oauth_client_secret"))?;
                Ok((client_id.clone(), secret))
            }
            AuthConfig::Basic { .. } => Err(SnowError::config(
                "OAuth client requested for a basic session",
            )),
        }
    }

    fn secrets(&self) -> Vec<&str> {
        let mut secrets = self.config.secrets();
        if let Some(token) = &self.token {
            secrets.push(&token.access_token);
            secrets.extend(token.refresh_token.as_deref());
        }
        secrets
    }
}

/// Caller headers plus the JSON defaults for `method`.
fn request_headers(method: HttpMethod, options: &RequestOptions) -> Result<HeaderMap, SnowError> {
    let mut headers = options.header_map()?;
    if !headers.contains_key(ACCEPT) {
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    }
    if method.has_body() && !headers.contains_key(CONTENT_TYPE) {
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    }
    Ok(headers)
}
