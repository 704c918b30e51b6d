//! Login, logout and background refresh against a mock backend

use flowtest_core::storage::keys;
use flowtest_core::{MemoryStorage, Storage};
use flowtest_http::{
    ClientError, FlowTestClient, Navigator, PageNavigator, RefreshError, SessionState,
};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(
    server: &MockServer,
    storage: &Arc<MemoryStorage>,
    navigator: &Arc<PageNavigator>,
    refresh_every: Duration,
) -> FlowTestClient {
    FlowTestClient::builder()
        .base_url(server.uri())
        .storage(storage.clone())
        .navigator(navigator.clone())
        .refresh_interval(refresh_every)
        .build()
        .unwrap()
}

async fn refresh_calls(server: &MockServer) -> usize {
    server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|request| request.url.path() == "/api/token/refresh/")
        .count()
}

#[tokio::test]
async fn test_login_stores_session_and_leaves_login_page() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/token/"))
        .and(body_json(json!({"username": "qa", "password": "secret"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access": "a1",
            "refresh": "r1",
            "user": {"id": 7, "username": "qa", "avatar": "/media/avatars/qa.png"}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let storage = Arc::new(MemoryStorage::with_items([
        (keys::PRE_LOGIN_THEME, "dark"),
        (keys::PRE_LOGIN_LANGUAGE, "ru"),
    ]));
    let navigator = Arc::new(PageNavigator::at_login("/login.html"));
    let client = client_for(&server, &storage, &navigator, Duration::from_secs(3300));

    let pair = client.login("qa", "secret").await.unwrap();

    assert_eq!(pair.access, "a1");
    assert_eq!(client.session().state(), SessionState::Authenticated);
    assert_eq!(storage.get_item(keys::REFRESH).as_deref(), Some("r1"));
    assert_eq!(storage.get_item(keys::THEME).as_deref(), Some("dark"));
    assert_eq!(storage.get_item(keys::LANGUAGE).as_deref(), Some("ru"));

    let user = client.session().user().unwrap();
    assert_eq!(
        user["avatar"],
        format!("{}/media/avatars/qa.png", server.uri())
    );
    assert!(!navigator.is_login_page());
}

#[tokio::test]
async fn test_login_rejected_reports_backend_message() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/token/"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "detail": "No active account found with the given credentials"
        })))
        .mount(&server)
        .await;

    let storage = Arc::new(MemoryStorage::new());
    let navigator = Arc::new(PageNavigator::at_login("/login.html"));
    let client = client_for(&server, &storage, &navigator, Duration::from_secs(3300));

    let result = client.login("qa", "wrong").await;

    assert!(matches!(
        result,
        Err(ClientError::AuthenticationFailed(message))
            if message == "No active account found with the given credentials"
    ));
    assert_eq!(client.session().state(), SessionState::Anonymous);
    assert!(navigator.is_login_page());
}

#[tokio::test]
async fn test_verify_reports_validity() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/token/verify/"))
        .and(body_json(json!({"token": "good"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/token/verify/"))
        .and(body_json(json!({"token": "bad"})))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "detail": "Token is invalid or expired",
            "code": "token_not_valid"
        })))
        .mount(&server)
        .await;

    let client = client_for(
        &server,
        &Arc::new(MemoryStorage::new()),
        &Arc::new(PageNavigator::default()),
        Duration::from_secs(3300),
    );

    assert!(client.verify("good").await.unwrap());
    assert!(!client.verify("bad").await.unwrap());
}

#[tokio::test]
async fn test_current_user_is_cached() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/users/get_current_user/"))
        .and(header("authorization", "Bearer a1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 7,
            "username": "qa",
            "theme": "dark",
            "language": "en"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let storage = Arc::new(MemoryStorage::with_items([
        (keys::ACCESS, "a1"),
        (keys::REFRESH, "r1"),
    ]));
    let client = client_for(
        &server,
        &storage,
        &Arc::new(PageNavigator::default()),
        Duration::from_secs(3300),
    );

    let user = client.current_user().await.unwrap();

    assert_eq!(user["username"], "qa");
    let cached: Value =
        serde_json::from_str(&storage.get_item(keys::CURRENT_USER).unwrap()).unwrap();
    assert_eq!(cached, user);
}

#[tokio::test]
async fn test_logout_cancels_background_refresh() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/token/refresh/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access": "fresh"})))
        .mount(&server)
        .await;

    let storage = Arc::new(MemoryStorage::with_items([
        (keys::ACCESS, "a1"),
        (keys::REFRESH, "r1"),
        (keys::USER, r#"{"username":"qa"}"#),
    ]));
    let navigator = Arc::new(PageNavigator::new("/login.html", "/settings.html"));
    let client = client_for(&server, &storage, &navigator, Duration::from_millis(50));

    client.start_background_refresh();
    assert!(client.is_background_refresh_active());

    client.logout().unwrap();

    assert!(!client.is_background_refresh_active());
    assert_eq!(client.session().state(), SessionState::Anonymous);
    assert!(storage.get_item(keys::USER).is_none());
    assert_eq!(navigator.redirect_count(), 1);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(refresh_calls(&server).await, 0);
}

#[tokio::test]
async fn test_background_refresh_runs_periodically() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/token/refresh/"))
        .and(body_json(json!({"refresh": "r1"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access": "fresh"})))
        .mount(&server)
        .await;

    let storage = Arc::new(MemoryStorage::with_items([
        (keys::ACCESS, "a1"),
        (keys::REFRESH, "r1"),
    ]));
    let client = client_for(
        &server,
        &storage,
        &Arc::new(PageNavigator::default()),
        Duration::from_millis(100),
    );

    client.start_background_refresh();
    tokio::time::sleep(Duration::from_millis(350)).await;

    assert!(refresh_calls(&server).await >= 2);
    assert_eq!(storage.get_item(keys::ACCESS).as_deref(), Some("fresh"));

    client.stop_background_refresh();
    tokio::time::sleep(Duration::from_millis(50)).await;
    let after_stop = refresh_calls(&server).await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(refresh_calls(&server).await, after_stop);
}

#[tokio::test]
async fn test_background_refresh_failure_ends_session() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/token/refresh/"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let storage = Arc::new(MemoryStorage::with_items([
        (keys::ACCESS, "a1"),
        (keys::REFRESH, "r1"),
    ]));
    let navigator = Arc::new(PageNavigator::new("/login.html", "/calendar.html"));
    let client = client_for(&server, &storage, &navigator, Duration::from_millis(50));

    client.start_background_refresh();
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert!(!client.is_background_refresh_active());
    assert_eq!(client.session().state(), SessionState::Anonymous);
    assert_eq!(navigator.redirect_count(), 1);
    assert_eq!(refresh_calls(&server).await, 1);
}

#[tokio::test]
async fn test_logout_during_refresh_keeps_session_ended() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/token/refresh/"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"access": "fresh", "refresh": "r2"}))
                .set_delay(Duration::from_millis(300)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let storage = Arc::new(MemoryStorage::with_items([
        (keys::ACCESS, "a1"),
        (keys::REFRESH, "r1"),
    ]));
    let navigator = Arc::new(PageNavigator::new("/login.html", "/dashboard.html"));
    let client = client_for(&server, &storage, &navigator, Duration::from_secs(3300));

    let refreshing = {
        let client = client.clone();
        tokio::spawn(async move { client.refresh_access_token().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    client.logout().unwrap();

    let outcome = refreshing.await.unwrap();

    assert_eq!(outcome, Err(RefreshError::SessionEnded));
    assert_eq!(client.session().state(), SessionState::Anonymous);
    assert!(storage.get_item(keys::ACCESS).is_none());
    assert!(storage.get_item(keys::REFRESH).is_none());
    assert_eq!(navigator.redirect_count(), 1);
}

#[tokio::test]
async fn test_logout_during_background_tick_keeps_session_ended() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/token/refresh/"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"access": "fresh", "refresh": "r2"}))
                .set_delay(Duration::from_millis(300)),
        )
        .mount(&server)
        .await;

    let storage = Arc::new(MemoryStorage::with_items([
        (keys::ACCESS, "a1"),
        (keys::REFRESH, "r1"),
    ]));
    let navigator = Arc::new(PageNavigator::new("/login.html", "/dashboard.html"));
    let client = client_for(&server, &storage, &navigator, Duration::from_millis(50));

    client.start_background_refresh();
    tokio::time::sleep(Duration::from_millis(120)).await;
    assert_eq!(refresh_calls(&server).await, 1);

    client.logout().unwrap();
    tokio::time::sleep(Duration::from_millis(450)).await;

    assert_eq!(client.session().state(), SessionState::Anonymous);
    assert!(storage.get_item(keys::REFRESH).is_none());
    assert_eq!(navigator.redirect_count(), 1);
    assert_eq!(refresh_calls(&server).await, 1);
}
