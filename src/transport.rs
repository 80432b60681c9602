//! Thin HTTP transport for the ServiceNow instance.
//!
//! `HttpTransport` resolves instance-relative URLs, attaches the current
//! cookie jar and Basic credentials, and returns a uniform [`HttpResponse`].
//! It has no retry or authentication logic of its own; that lives in
//! [`AuthSession`](crate::session::AuthSession).
//!
//! # Security
//!
//! Basic credentials and cookie values are never logged, and neither are
//! token endpoint responses.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, COOKIE};
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::Serialize;
use url::Url;

use crate::cookies::CookieJar;
use crate::error::SnowError;

/// Default request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// User agent sent when the caller does not provide one.
pub const USER_AGENT: &str = concat!("snow-client/", env!("CARGO_PKG_VERSION"));

/// The HTTP verbs supported by the REST session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    /// Read records.
    Get,
    /// Insert records.
    Post,
    /// Update records.
    Put,
}

impl HttpMethod {
    fn as_reqwest(self) -> Method {
        match self {
            HttpMethod::Get => Method::GET,
            HttpMethod::Post => Method::POST,
            HttpMethod::Put => Method::PUT,
        }
    }

    /// Returns true for verbs that carry a request body.
    pub fn has_body(self) -> bool {
        matches!(self, HttpMethod::Post | HttpMethod::Put)
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_reqwest().as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = SnowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "get" => Ok(HttpMethod::Get),
            "post" => Ok(HttpMethod::Post),
            "put" => Ok(HttpMethod::Put),
            other => Err(SnowError::validation(format!(
                "operation must be \"get\", \"post\" or \"put\", got {:?}",
                other
            ))),
        }
    }
}

/// Caller-supplied parts of a request: extra headers, query parameters, body.
///
/// ```ignore
/// let options = RequestOptions::new()
///     .with_param("sysparm_query", "number=INC0426232")
///     .with_param("sysparm_display_value", "all");
/// ```
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    headers: Vec<(String, String)>,
    params: Vec<(String, String)>,
    body: Option<String>,
}

impl RequestOptions {
    /// Creates empty options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a request header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Adds a query parameter.
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((name.into(), value.into()));
        self
    }

    /// Sets a raw request body.
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Serializes `value` as the JSON request body.
    ///
    /// # Errors
    ///
    /// Returns `SnowError::Serialization` if `value` cannot be serialized.
    pub fn with_json<T: Serialize + ?Sized>(mut self, value: &T) -> Result<Self, SnowError> {
        self.body = Some(serde_json::to_string(value)?);
        Ok(self)
    }

    /// Query parameters.
    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }

    /// Request body, if any.
    pub fn body(&self) -> Option<&str> {
        self.body.as_deref()
    }

    /// Returns true if the caller set this header (case-insensitive).
    pub fn has_header(&self, name: &str) -> bool {
        self.headers.iter().any(|(n, _)| n.eq_ignore_ascii_case(name))
    }

    /// Converts the caller headers into a header map.
    ///
    /// # Errors
    ///
    /// Returns `SnowError::Validation` for an invalid header name or value.
    pub fn header_map(&self) -> Result<HeaderMap, SnowError> {
        let mut map = HeaderMap::new();
        for (name, value) in &self.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| SnowError::validation(format!("invalid header name {:?}", name)))?;
            let value = HeaderValue::from_str(value).map_err(|_| {
                SnowError::validation(format!("invalid value for header {}", name))
            })?;
            map.append(name, value);
        }
        Ok(map)
    }
}

/// A response from the instance.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: String,
}

impl HttpResponse {
    /// HTTP status.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// HTTP status as a number.
    pub fn status_code(&self) -> u16 {
        self.status.as_u16()
    }

    /// Returns true for 2xx statuses.
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Response headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Response body as text.
    pub fn text(&self) -> &str {
        &self.body
    }

    /// Consumes the response, returning its body.
    pub fn into_text(self) -> String {
        self.body
    }

    /// Parses the body as JSON.
    ///
    /// # Errors
    ///
    /// Returns `SnowError::Serialization` if the body is not valid JSON for `T`.
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, SnowError> {
        serde_json::from_str(&self.body).map_err(SnowError::Serialization)
    }
}

/// HTTP transport bound to one instance.
///
/// Holds the cookie jar and Basic credentials attached by the session.
pub struct HttpTransport {
    /// The underlying HTTP client (cloning is cheap).
    http: Client,

    /// Instance base URL without trailing slash.
    instance: String,

    /// Parsed instance URL, for host validation.
    instance_url: Url,

    /// Cookies sent with, and updated by, every request.
    cookies: CookieJar,

    /// Basic credentials attached to every request.
    /// SECURITY: Never log these values!
    basic_auth: Option<(String, String)>,
}

impl HttpTransport {
    /// Creates a transport for `instance` (already normalized, e.g. `https://host`).
    ///
    /// # Errors
    ///
    /// Returns `SnowError::Config` for an unparseable instance URL and
    /// `SnowError::HttpClient` if the HTTP client fails to initialize.
    pub fn new(instance: &str) -> Result<Self, SnowError> {
        let instance = instance.trim_end_matches('/').to_string();
        let instance_url = Url::parse(&instance)
            .map_err(|e| SnowError::config(format!("invalid instance URL {:?}: {}", instance, e)))?;

        let http = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .user_agent(USER_AGENT)
            .build()
            .map_err(SnowError::HttpClient)?;

        Ok(Self {
            http,
            instance,
            instance_url,
            cookies: CookieJar::new(),
            basic_auth: None,
        })
    }

    /// Instance base URL.
    pub fn instance(&self) -> &str {
        &self.instance
    }

    /// Resolves `url` against the instance.
    ///
    /// Relative URLs such as `/api/now/table/incident` are appended to the
    /// instance. Absolute URLs must point at the instance host.
    ///
    /// # Errors
    ///
    /// Returns `SnowError::Validation` for an empty URL, an unparseable URL,
    /// or an absolute URL on another host.
    pub fn resolve(&self, url: &str) -> Result<Url, SnowError> {
        let url = url.trim();
        if url.is_empty() {
            return Err(SnowError::validation("the url parameter is mandatory"));
        }

        if url.starts_with("https://") || url.starts_with("http://") {
            let parsed = Url::parse(url)
                .map_err(|e| SnowError::validation(format!("invalid URL: {}", e)))?;
            if parsed.host_str() != self.instance_url.host_str()
                || parsed.port_or_known_default() != self.instance_url.port_or_known_default()
            {
                return Err(SnowError::validation(format!(
                    "URL host mismatch: expected {:?}, got {:?}",
                    self.instance_url.host_str(),
                    parsed.host_str()
                )));
            }
            return Ok(parsed);
        }

        let joined = if url.starts_with('/') {
            format!("{}{}", self.instance, url)
        } else {
            format!("{}/{}", self.instance, url)
        };
        Url::parse(&joined).map_err(|e| SnowError::validation(format!("invalid URL: {}", e)))
    }

    /// Attaches Basic credentials to every following request.
    pub fn set_basic_auth(&mut self, user: impl Into<String>, password: impl Into<String>) {
        self.basic_auth = Some((user.into(), password.into()));
    }

    /// Returns true if Basic credentials are attached.
    pub fn has_basic_auth(&self) -> bool {
        self.basic_auth.is_some()
    }

    /// The attached cookie jar.
    pub fn cookies(&self) -> &CookieJar {
        &self.cookies
    }

    /// Replaces the attached cookie jar.
    pub fn attach_cookies(&mut self, jar: CookieJar) {
        self.cookies = jar;
    }

    /// Drops every attached cookie.
    pub fn clear_cookies(&mut self) {
        self.cookies.clear();
    }

    /// Executes a request with the given final headers.
    ///
    /// # Errors
    ///
    /// Returns `SnowError::Http` or `SnowError::Timeout` on connectivity
    /// failures. Non-2xx statuses are returned as responses, not errors.
    pub async fn send(
        &mut self,
        method: HttpMethod,
        url: &Url,
        headers: HeaderMap,
        params: &[(String, String)],
        body: Option<&str>,
    ) -> Result<HttpResponse, SnowError> {
        let mut req = self
            .http
            .request(method.as_reqwest(), url.clone())
            .headers(headers);
        if !params.is_empty() {
            req = req.query(params);
        }
        if let Some(body) = body {
            req = req.body(body.to_string());
        }
        self.dispatch(req, url, method, true).await
    }

    /// POSTs a form-encoded body, as the OAuth token endpoint expects.
    ///
    /// The response body is never logged: it carries the OAuth tokens.
    pub async fn post_form(
        &mut self,
        url: &Url,
        form: &[(&str, &str)],
    ) -> Result<HttpResponse, SnowError> {
        let req = self
            .http
            .post(url.clone())
            .header(reqwest::header::ACCEPT, "application/json")
            .form(form);
        self.dispatch(req, url, HttpMethod::Post, false).await
    }

    async fn dispatch(
        &mut self,
        mut req: RequestBuilder,
        url: &Url,
        method: HttpMethod,
        log_body: bool,
    ) -> Result<HttpResponse, SnowError> {
        if let Some((user, password)) = &self.basic_auth {
            req = req.basic_auth(user, Some(password));
        }
        if let Some(cookie_header) = self.cookies.header_value_for(url) {
            req = req.header(COOKIE, cookie_header);
        }

        tracing::debug!(method = %method, path = %url.path(), "Making ServiceNow request");

        let response = req.send().await.map_err(|e| {
            if e.is_timeout() {
                return SnowError::timeout(
                    Duration::from_secs(DEFAULT_TIMEOUT_SECS),
                    format!("{} {}", method, url.path()),
                );
            }
            SnowError::Http(e)
        })?;

        let status = response.status();
        let headers = response.headers().clone();
        let absorbed = self.cookies.absorb_set_cookies(url, &headers);
        let body = response.text().await.map_err(SnowError::Http)?;

        tracing::debug!(status = status.as_u16(), cookies_set = absorbed, "ServiceNow response");
        if log_body {
            tracing::trace!(body = %body, "ServiceNow response body");
        }

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}
