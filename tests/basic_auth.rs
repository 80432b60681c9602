//! Basic Authentication sessions against a mock instance.

mod common;

use common::*;
use pretty_assertions::assert_eq;
use snow_client::credentials::CredentialStore;
use snow_client::RequestOptions;
use tempfile::TempDir;
use wiremock::matchers::{basic_auth, body_json, header, header_exists, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn basic_session(server: &MockServer, paths: &Paths) -> snow_client::AuthSession {
    snow_client::AuthSession::new(basic_config(server, paths)).unwrap()
}

fn stale_cookie_file() -> String {
    "# Netscape HTTP Cookie File\n127.0.0.1\tFALSE\t/\tFALSE\t0\tJSESSIONID\tstale\n".to_string()
}

#[tokio::test]
async fn test_first_call_persists_cookie_and_second_reuses_it() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let paths = Paths::in_dir(&dir);

    Mock::given(method("GET"))
        .and(path(TABLE_PATH))
        .and(basic_auth(USER, PASSWORD))
        .and(NoCookie)
        .respond_with(table_response().insert_header("set-cookie", "JSESSIONID=abc123; Path=/"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(TABLE_PATH))
        .and(header("cookie", "JSESSIONID=abc123"))
        .respond_with(table_response())
        .expect(1)
        .mount(&server)
        .await;

    let mut session = basic_session(&server, &paths);
    let first = session.get(TABLE_PATH, RequestOptions::new()).await.unwrap();
    assert_eq!(first.status_code(), 200);
    assert!(session.auth_state().fresh_cookie);

    let store = CredentialStore::new(Some(paths.cookie.clone()), None, true, true);
    let jar = store.load_cookie_jar().unwrap().unwrap();
    assert_eq!(jar.get("JSESSIONID"), Some("abc123"));

    let second = session.get(TABLE_PATH, RequestOptions::new()).await.unwrap();
    assert_eq!(second.status_code(), 200);
}

#[tokio::test]
async fn test_stale_cookie_is_retried_once_with_credentials() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let paths = Paths::in_dir(&dir);
    std::fs::write(&paths.cookie, stale_cookie_file()).unwrap();

    Mock::given(method("GET"))
        .and(path(TABLE_PATH))
        .and(header("cookie", "JSESSIONID=stale"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(TABLE_PATH))
        .and(basic_auth(USER, PASSWORD))
        .and(NoCookie)
        .respond_with(table_response().insert_header("set-cookie", "JSESSIONID=renewed; Path=/"))
        .expect(1)
        .mount(&server)
        .await;

    let mut session = basic_session(&server, &paths);
    let response = session.get(TABLE_PATH, RequestOptions::new()).await.unwrap();

    assert_eq!(response.status_code(), 200);
    let text = std::fs::read_to_string(&paths.cookie).unwrap();
    assert!(text.contains("renewed"));
    assert!(!text.contains("stale"));
}

#[tokio::test]
async fn test_second_401_is_a_credential_error() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let paths = Paths::in_dir(&dir);
    std::fs::write(&paths.cookie, stale_cookie_file()).unwrap();

    Mock::given(method("GET"))
        .and(path(TABLE_PATH))
        .and(header_exists("cookie"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(TABLE_PATH))
        .and(NoCookie)
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    let mut session = basic_session(&server, &paths);
    let err = session
        .get(TABLE_PATH, RequestOptions::new())
        .await
        .unwrap_err();

    assert!(err.is_credential());
    assert!(!err.to_string().contains(PASSWORD));
}

#[tokio::test]
async fn test_401_after_a_successful_call_is_fatal_without_retry() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let paths = Paths::in_dir(&dir);

    Mock::given(method("GET"))
        .and(path(TABLE_PATH))
        .and(NoCookie)
        .respond_with(table_response().insert_header("set-cookie", "JSESSIONID=abc123; Path=/"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(TABLE_PATH))
        .and(header("cookie", "JSESSIONID=abc123"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    let mut session = basic_session(&server, &paths);
    session.get(TABLE_PATH, RequestOptions::new()).await.unwrap();
    assert!(session.auth_state().fresh_cookie);

    let err = session
        .get(TABLE_PATH, RequestOptions::new())
        .await
        .unwrap_err();

    assert!(err.is_credential());
    assert!(err.to_string().contains("user and password"));
}

#[tokio::test]
async fn test_disabled_cookie_persistence_removes_file() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let paths = Paths::in_dir(&dir);
    std::fs::write(&paths.cookie, stale_cookie_file()).unwrap();

    Mock::given(method("GET"))
        .and(path(TABLE_PATH))
        .respond_with(table_response().insert_header("set-cookie", "JSESSIONID=abc123; Path=/"))
        .expect(1)
        .mount(&server)
        .await;

    let mut config = basic_config(&server, &paths);
    config.set_persist_cookie(false);
    let mut session = snow_client::AuthSession::new(config).unwrap();
    session.get(TABLE_PATH, RequestOptions::new()).await.unwrap();

    assert!(!paths.cookie.exists());
    assert_eq!(session.cookie_jar().get("JSESSIONID"), Some("abc123"));
}

#[tokio::test]
async fn test_non_401_errors_are_returned_as_responses() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let paths = Paths::in_dir(&dir);

    Mock::given(method("GET"))
        .and(path(TABLE_PATH))
        .and(query_param("sysparm_query", "number=INC0426232"))
        .respond_with(ResponseTemplate::new(404).set_body_string(r#"{"error":{"message":"No Record found"}}"#))
        .expect(1)
        .mount(&server)
        .await;

    let mut session = basic_session(&server, &paths);
    let response = session
        .get(
            TABLE_PATH,
            RequestOptions::new().with_param("sysparm_query", "number=INC0426232"),
        )
        .await
        .unwrap();

    assert_eq!(response.status_code(), 404);
    assert!(!response.is_success());
}

#[tokio::test]
async fn test_post_sends_json_body() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let paths = Paths::in_dir(&dir);
    let record = serde_json::json!({ "short_description": "Printer on fire" });

    Mock::given(method("POST"))
        .and(path(TABLE_PATH))
        .and(header("content-type", "application/json"))
        .and(header("accept", "application/json"))
        .and(body_json(&record))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
            "result": { "sys_id": "abc", "number": "INC0000001" }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mut session = basic_session(&server, &paths);
    let response = session
        .post(TABLE_PATH, RequestOptions::new().with_json(&record).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status_code(), 201);
    let body: serde_json::Value = response.json().unwrap();
    assert_eq!(body["result"]["number"], "INC0000001");
}

#[tokio::test]
async fn test_user_agent_is_sent() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let paths = Paths::in_dir(&dir);

    Mock::given(method("PUT"))
        .and(path(format!("{TABLE_PATH}/abc")))
        .and(wiremock::matchers::header_regex("user-agent", "^snow-client/"))
        .respond_with(table_response())
        .expect(1)
        .mount(&server)
        .await;

    let mut session = basic_session(&server, &paths);
    session
        .put(&format!("{TABLE_PATH}/abc"), RequestOptions::new().with_body("{}"))
        .await
        .unwrap();
}
