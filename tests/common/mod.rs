#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use snow_client::config::DEFAULT_REQUIRED_COOKIES;
use snow_client::sso::{SsoInvoker, SsoOutcome};
use snow_client::{AuthConfig, AuthSession, SessionConfig, SnowError, SsoMethod};
use tempfile::TempDir;
use wiremock::{Match, MockServer, Request, ResponseTemplate};

pub const USER: &str = "snow_client_test";
pub const PASSWORD: &str = "hunter2";
pub const CLIENT_ID: &str = "client-id";
pub const CLIENT_SECRET: &str = "client-secret";
pub const TABLE_PATH: &str = "/api/now/v2/table/incident";

/// Netscape cookie file for the mock server holding `names`.
pub fn cookie_file(names: &[&str]) -> String {
    let mut text = String::from("# Netscape HTTP Cookie File\n\n");
    for name in names {
        text.push_str(&format!("127.0.0.1\tFALSE\t/\tFALSE\t0\t{name}\tvalue-{name}\n"));
    }
    text
}

/// All required cookies except the load balancer one.
pub fn incomplete_cookie_names() -> Vec<&'static str> {
    DEFAULT_REQUIRED_COOKIES
        .iter()
        .copied()
        .filter(|name| *name != "BIGipServerpool_cern")
        .collect()
}

/// Stands in for `cern-get-sso-cookie`: writes a cookie file and counts calls.
#[derive(Clone)]
pub struct FakeSso {
    names: Vec<&'static str>,
    calls: Arc<AtomicUsize>,
}

impl FakeSso {
    pub fn good() -> Self {
        Self::writing(DEFAULT_REQUIRED_COOKIES.to_vec())
    }

    pub fn writing(names: Vec<&'static str>) -> Self {
        Self {
            names,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SsoInvoker for FakeSso {
    async fn mint(&self, _instance_url: &str, output_path: &Path) -> Result<SsoOutcome, SnowError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::fs::write(output_path, cookie_file(&self.names)).expect("write cookie file");
        Ok(SsoOutcome::succeeded())
    }
}

/// Matches requests that carry no `Cookie` header.
pub struct NoCookie;

impl Match for NoCookie {
    fn matches(&self, request: &Request) -> bool {
        !request.headers.contains_key("cookie")
    }
}

pub struct Paths {
    pub cookie: PathBuf,
    pub token: PathBuf,
}

impl Paths {
    pub fn in_dir(dir: &TempDir) -> Self {
        Self {
            cookie: dir.path().join("cookie.txt"),
            token: dir.path().join("tokens.json"),
        }
    }
}

pub fn sso_config(server: &MockServer, paths: &Paths) -> SessionConfig {
    let mut config = SessionConfig::new(
        &server.uri(),
        AuthConfig::SsoOauth {
            sso_method: SsoMethod::Kerberos,
            client_id: CLIENT_ID.to_string(),
            client_secret: Some(CLIENT_SECRET.to_string()),
        },
    )
    .expect("valid config");
    config.set_cookie_file(&paths.cookie);
    config.set_token_file(&paths.token);
    config
}

pub fn basic_config(server: &MockServer, paths: &Paths) -> SessionConfig {
    let mut config = SessionConfig::new(
        &server.uri(),
        AuthConfig::Basic {
            user: USER.to_string(),
            password: Some(PASSWORD.to_string()),
        },
    )
    .expect("valid config");
    config.set_cookie_file(&paths.cookie);
    config
}

pub fn sso_session(config: SessionConfig, sso: &FakeSso) -> AuthSession {
    AuthSession::with_sso_invoker(config, Box::new(sso.clone())).expect("session")
}

pub fn token_body(access: &str, refresh: &str) -> serde_json::Value {
    json!({
        "access_token": access,
        "refresh_token": refresh,
        "scope": "useraccount",
        "token_type": "Bearer",
        "expires_in": 1799
    })
}

pub fn token_response(access: &str, refresh: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(token_body(access, refresh))
}

pub fn table_response() -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({ "result": [] }))
}

pub fn write_token_file(path: &Path, access: &str, refresh: &str) {
    std::fs::write(path, token_body(access, refresh).to_string()).expect("write token file");
}

pub fn read_token_file(path: &Path) -> serde_json::Value {
    let text = std::fs::read_to_string(path).expect("read token file");
    serde_json::from_str(&text).expect("token file is JSON")
}
