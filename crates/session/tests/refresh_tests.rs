//! Reactive refresh and replay against a mock API

use codelab_core::Credential;
use codelab_http::{ApiClient, ClientError, RequestSpec};
use codelab_session::{AuthEvent, AuthSession, AuthSignal, RefreshError, TokenHolder};
use futures::future::join_all;
use serde_json::{Value, json};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

fn session(server: &MockServer) -> (AuthSession, AuthSignal) {
    let client = ApiClient::new(server.uri()).unwrap();
    let signal = AuthSignal::new();
    let session = AuthSession::new(client, TokenHolder::new(), signal.clone());
    (session, signal)
}

async fn mount_me(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/auth/me"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {"id": "u1", "username": "ada", "role": "student"}
        })))
        .mount(server)
        .await;
}

/// `/problems` rejects the old token and accepts the new one
async fn mount_problems(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/problems"))
        .and(header("authorization", "Bearer old"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({"code": "TOKEN_EXPIRED"})))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/problems"))
        .and(header("authorization", "Bearer new"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"items": [1, 2]})))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_concurrent_401s_share_one_refresh() {
    let server = MockServer::start().await;
    mount_problems(&server).await;
    mount_me(&server).await;

    Mock::given(method("POST"))
        .and(path("/auth/refresh-token"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"data": {"tokens": {"accessToken": "new"}}}))
                .set_delay(Duration::from_millis(300)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let (session, _) = session(&server);
    session.tokens().set(Some(Credential::new("old")));

    let requests = (0..5).map(|_| session.send::<Value>(RequestSpec::get("/problems")));
    let results = join_all(requests).await;

    for result in results {
        assert_eq!(result.unwrap(), json!({"items": [1, 2]}));
    }
    assert_eq!(session.tokens().get().unwrap().as_str(), "new");
    assert_eq!(session.current_user().unwrap().username, "ada");
}

#[tokio::test]
async fn test_refresh_endpoint_401_does_not_trigger_refresh() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/auth/refresh-token"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    let (session, _) = session(&server);
    session.tokens().set(Some(Credential::new("old")));

    let result = session
        .send::<Value>(RequestSpec::post("/auth/refresh-token"))
        .await;
    assert!(matches!(result, Err(ClientError::AuthenticationFailed { .. })));
}

/// Answers 500 and records when each request arrived
#[derive(Clone, Default)]
struct TimedFailure {
    arrivals: Arc<Mutex<Vec<Instant>>>,
}

impl Respond for TimedFailure {
    fn respond(&self, _: &Request) -> ResponseTemplate {
        self.arrivals.lock().push(Instant::now());
        ResponseTemplate::new(500)
    }
}

#[tokio::test]
async fn test_refresh_retries_server_errors_with_backoff() {
    let server = MockServer::start().await;
    let responder = TimedFailure::default();

    Mock::given(method("POST"))
        .and(path("/auth/refresh-token"))
        .respond_with(responder.clone())
        .expect(3)
        .mount(&server)
        .await;

    let (session, _) = session(&server);
    let result = session.refresher().refresh().await;
    assert!(matches!(result, Err(RefreshError::Exhausted(_))));

    let arrivals = responder.arrivals.lock().clone();
    assert_eq!(arrivals.len(), 3);
    let first_gap = arrivals[1] - arrivals[0];
    let second_gap = arrivals[2] - arrivals[1];
    assert!(
        first_gap >= Duration::from_millis(200) && first_gap < Duration::from_millis(450),
        "first retry after {first_gap:?}"
    );
    assert!(second_gap >= Duration::from_millis(500), "second retry after {second_gap:?}");
}

#[tokio::test]
async fn test_refresh_not_retried_on_401() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/auth/refresh-token"))
        .respond_with(
            ResponseTemplate::new(401).set_body_json(json!({"code": "REFRESH_TOKEN_EXPIRED"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let (session, _) = session(&server);
    let result = session.refresher().refresh().await;
    assert!(result.unwrap_err().is_terminal());
}

#[tokio::test]
async fn test_refresh_accepts_flat_token_shape() {
    let server = MockServer::start().await;
    mount_me(&server).await;

    Mock::given(method("POST"))
        .and(path("/auth/refresh-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"accessToken": "flat"})))
        .mount(&server)
        .await;

    let (session, _) = session(&server);
    let credential = session.refresher().refresh().await.unwrap();
    assert_eq!(credential.as_str(), "flat");
    assert_eq!(session.tokens().get(), Some(credential));
}

#[tokio::test]
async fn test_terminal_refresh_failure_signals_logout() {
    let server = MockServer::start().await;
    mount_problems(&server).await;

    Mock::given(method("POST"))
        .and(path("/auth/refresh-token"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({"code": "NO_REFRESH_TOKEN"})))
        .expect(1)
        .mount(&server)
        .await;

    let (session, signal) = session(&server);
    let mut events = signal.subscribe();
    session.tokens().set(Some(Credential::new("old")));

    let result = session.send::<Value>(RequestSpec::get("/problems")).await;

    assert!(matches!(result, Err(ClientError::SessionExpired(_))));
    assert!(session.tokens().get().is_none());
    assert_eq!(events.recv().await.unwrap(), AuthEvent::Failed);
}

#[tokio::test]
async fn test_invalid_refresh_credential_code_skips_refresh() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/problems"))
        .respond_with(
            ResponseTemplate::new(401).set_body_json(json!({"code": "REFRESH_TOKEN_EXPIRED"})),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"accessToken": "new"})))
        .expect(0)
        .mount(&server)
        .await;

    let (session, signal) = session(&server);
    let mut events = signal.subscribe();
    session.tokens().set(Some(Credential::new("old")));

    let result = session.send::<Value>(RequestSpec::get("/problems")).await;

    assert!(result.unwrap_err().is_refresh_credential_invalid());
    assert!(session.tokens().get().is_none());
    assert_eq!(events.recv().await.unwrap(), AuthEvent::Failed);
}

#[tokio::test]
async fn test_replay_result_returned_as_is() {
    let server = MockServer::start().await;
    mount_me(&server).await;

    // Rejects every token, including the renewed one
    Mock::given(method("GET"))
        .and(path("/admin/stats"))
        .respond_with(ResponseTemplate::new(401))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {"accessToken": "new"}})))
        .expect(1)
        .mount(&server)
        .await;

    let (session, _) = session(&server);
    session.tokens().set(Some(Credential::new("old")));

    let result = session.send::<Value>(RequestSpec::get("/admin/stats")).await;

    assert!(matches!(result, Err(ClientError::AuthenticationFailed { .. })));
    assert_eq!(session.tokens().get().unwrap().as_str(), "new");
}
