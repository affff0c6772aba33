//! Integration tests for the authenticated API client

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use shopdesk_core::api::{ApiClient, ApiError, RequestBody, RequestOptions};
use shopdesk_core::auth::{
    CookieFileStore, EncryptedFileStore, LoginRedirect, MemoryStore, StoreError, TokenPair, TokenStore,
    ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY,
};
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

struct Harness {
    server: MockServer,
    client: ApiClient,
    store: Arc<dyn TokenStore>,
    redirects: Arc<Mutex<Vec<String>>>,
}

impl Harness {
    async fn start() -> Self {
        Self::with_store(Arc::new(MemoryStore::new())).await
    }

    async fn with_store(store: Arc<dyn TokenStore>) -> Self {
        let server = MockServer::start().await;
        let redirects = Arc::new(Mutex::new(Vec::new()));

        let recorded = redirects.clone();
        let redirect: Arc<dyn LoginRedirect> = Arc::new(move |login_path: &str| {
            recorded.lock().unwrap().push(login_path.to_string());
        });

        let client = ApiClient::builder()
            .base_url(format!("{}/api", server.uri()))
            .token_store(store.clone())
            .login_redirect(redirect)
            .build()
            .unwrap();

        Self {
            server,
            client,
            store,
            redirects,
        }
    }

    fn with_tokens(self, access: &str, refresh: &str) -> Self {
        self.store.store_pair(&TokenPair::new(access, refresh)).unwrap();
        self
    }

    fn redirects(&self) -> Vec<String> {
        self.redirects.lock().unwrap().clone()
    }

    async fn requests_to(&self, url_path: &str) -> Vec<Request> {
        self.server
            .received_requests()
            .await
            .unwrap()
            .into_iter()
            .filter(|r| r.url.path() == url_path)
            .collect()
    }
}

fn authorization(request: &Request) -> Option<String> {
    request
        .headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

async fn mount_refresh(server: &MockServer, template: ResponseTemplate, expected_calls: u64) {
    Mock::given(method("POST"))
        .and(path("/api/token/refresh/"))
        .respond_with(template)
        .expect(expected_calls)
        .mount(server)
        .await;
}

fn profile_json() -> Value {
    json!({
        "id": 1,
        "username": "ada@example.com",
        "first_name": "Ada",
        "last_name": "Lovelace",
        "bio": "",
        "profile_picture": null,
        "created_at": "2025-01-01T00:00:00Z",
        "updated_at": "2025-01-01T00:00:00Z"
    })
}

// ============================================================================
// Token attachment and login
// ============================================================================

#[tokio::test]
async fn test_login_stores_tokens_and_next_get_is_authenticated() {
    let h = Harness::start().await;

    Mock::given(method("POST"))
        .and(path("/api/login/"))
        .and(body_json(json!({"email": "ada@example.com", "password": "analytical"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "success",
            "access": "A1",
            "refresh": "R1",
            "user": {"id": 1, "email": "ada@example.com", "first_name": "Ada", "last_name": "Lovelace"}
        })))
        .expect(1)
        .mount(&h.server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/profile/"))
        .and(header("authorization", "Bearer A1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(profile_json()))
        .expect(1)
        .mount(&h.server)
        .await;

    let pair = h.client.login("ada@example.com", "analytical").await.unwrap();
    assert_eq!(pair, TokenPair::new("A1", "R1"));
    assert_eq!(h.store.get(ACCESS_TOKEN_KEY).unwrap().as_deref(), Some("A1"));
    assert_eq!(h.store.get(REFRESH_TOKEN_KEY).unwrap().as_deref(), Some("R1"));

    let profile = h.client.profile().await.unwrap();
    assert_eq!(profile.first_name, "Ada");

    // Login itself goes out without credentials
    let login = h.requests_to("/api/login/").await;
    assert_eq!(authorization(&login[0]), None);
}

#[tokio::test]
async fn test_failed_login_leaves_storage_untouched() {
    let h = Harness::start().await.with_tokens("OLD-A", "OLD-R");

    Mock::given(method("POST"))
        .and(path("/api/login/"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({"error": "Invalid credentials"})))
        .mount(&h.server)
        .await;
    mount_refresh(&h.server, ResponseTemplate::new(200), 0).await;

    let result = h.client.login("ada@example.com", "wrong").await;
    assert!(matches!(result, Err(ApiError::Unauthorized)));
    assert_eq!(h.store.load_pair().unwrap(), Some(TokenPair::new("OLD-A", "OLD-R")));
    assert!(h.redirects().is_empty());
}

#[tokio::test]
async fn test_request_without_token_sends_no_authorization() {
    let h = Harness::start().await;

    Mock::given(method("GET"))
        .and(path("/api/shopify-products/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&h.server)
        .await;

    let products = h.client.list_products().await.unwrap();
    assert!(products.is_empty());

    let sent = h.requests_to("/api/shopify-products/").await;
    assert_eq!(authorization(&sent[0]), None);
}

// ============================================================================
// Refresh-and-retry
// ============================================================================

#[tokio::test]
async fn test_unauthorized_then_refresh_retries_with_new_token() {
    let h = Harness::start().await.with_tokens("T1", "R1");

    Mock::given(method("GET"))
        .and(path("/api/profile/"))
        .and(header("authorization", "Bearer T1"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&h.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/profile/"))
        .and(header("authorization", "Bearer T2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(profile_json()))
        .expect(1)
        .mount(&h.server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/token/refresh/"))
        .and(body_json(json!({"refresh": "R1"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access": "T2"})))
        .expect(1)
        .mount(&h.server)
        .await;

    let profile = h.client.profile().await.unwrap();
    assert_eq!(profile.username, "ada@example.com");

    // Access rotated, refresh kept since none was returned
    assert_eq!(h.store.load_pair().unwrap(), Some(TokenPair::new("T2", "R1")));
    assert_eq!(h.requests_to("/api/profile/").await.len(), 2);
    assert!(h.redirects().is_empty());
    h.server.verify().await;
}

#[tokio::test]
async fn test_refresh_rotates_refresh_token_when_returned() {
    let h = Harness::start().await.with_tokens("T1", "R1");

    Mock::given(method("GET"))
        .and(path("/api/shopify-products/"))
        .and(header("authorization", "Bearer T1"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&h.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/shopify-products/"))
        .and(header("authorization", "Bearer T2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&h.server)
        .await;
    mount_refresh(
        &h.server,
        ResponseTemplate::new(200).set_body_json(json!({"access": "T2", "refresh": "R2"})),
        1,
    )
    .await;

    h.client.list_products().await.unwrap();
    assert_eq!(h.store.load_pair().unwrap(), Some(TokenPair::new("T2", "R2")));
}

#[tokio::test]
async fn test_unauthorized_after_retry_is_terminal() {
    let h = Harness::start().await.with_tokens("T1", "R1");

    Mock::given(method("GET"))
        .and(path("/api/profile/"))
        .respond_with(ResponseTemplate::new(401))
        .expect(2)
        .mount(&h.server)
        .await;
    mount_refresh(
        &h.server,
        ResponseTemplate::new(200).set_body_json(json!({"access": "T2"})),
        1,
    )
    .await;

    let result = h.client.profile().await;
    assert!(matches!(result, Err(ApiError::Unauthorized)));

    let sent = h.requests_to("/api/profile/").await;
    assert_eq!(authorization(&sent[1]).as_deref(), Some("Bearer T2"));
    assert!(h.redirects().is_empty());
    h.server.verify().await;
}

#[tokio::test]
async fn test_refresh_failure_rejects_and_redirects_to_login() {
    let h = Harness::start().await.with_tokens("T1", "R1");

    Mock::given(method("GET"))
        .and(path("/api/profile/"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&h.server)
        .await;
    mount_refresh(
        &h.server,
        ResponseTemplate::new(401).set_body_json(json!({"detail": "Token is invalid or expired"})),
        1,
    )
    .await;

    let result = h.client.profile().await;
    match result {
        Err(ApiError::RefreshFailed(cause)) => assert!(matches!(*cause, ApiError::Unauthorized)),
        other => panic!("expected RefreshFailed, got {:?}", other),
    }
    assert_eq!(h.redirects(), vec!["/login".to_string()]);

    // Tokens are not cleared implicitly
    assert_eq!(h.store.load_pair().unwrap(), Some(TokenPair::new("T1", "R1")));
    h.server.verify().await;
}

#[tokio::test]
async fn test_missing_refresh_token_requires_authentication() {
    let h = Harness::start().await;
    h.store.set(ACCESS_TOKEN_KEY, "T1").unwrap();

    Mock::given(method("GET"))
        .and(path("/api/profile/"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&h.server)
        .await;
    mount_refresh(&h.server, ResponseTemplate::new(200), 0).await;

    let result = h.client.profile().await;
    assert!(matches!(result, Err(ApiError::AuthenticationRequired)));
    assert_eq!(h.redirects(), vec!["/login".to_string()]);
    h.server.verify().await;
}

#[tokio::test]
async fn test_other_failures_propagate_without_refresh() {
    let h = Harness::start().await.with_tokens("T1", "R1");

    Mock::given(method("GET"))
        .and(path("/api/shopify-products/"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&h.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/shopify-products/9/"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"error": "Shopify product not found"})))
        .mount(&h.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/profile/"))
        .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
        .mount(&h.server)
        .await;
    mount_refresh(&h.server, ResponseTemplate::new(200), 0).await;

    assert!(matches!(h.client.list_products().await, Err(ApiError::ServerError(ref b)) if b == "boom"));
    assert!(matches!(h.client.product(9).await, Err(ApiError::NotFound(_))));
    assert!(matches!(h.client.profile().await, Err(ApiError::AccessDenied(_))));
    assert_eq!(h.requests_to("/api/shopify-products/").await.len(), 1);
    h.server.verify().await;
}

#[tokio::test]
async fn test_network_failure_propagates() {
    let client = ApiClient::builder()
        .base_url("http://127.0.0.1:9/api")
        .timeout(Duration::from_secs(2))
        .build()
        .unwrap();
    client
        .token_store()
        .store_pair(&TokenPair::new("T1", "R1"))
        .unwrap();

    let result: Result<Value, ApiError> = client.get("profile/").await;
    assert!(matches!(result, Err(ApiError::NetworkError(_))));
}

#[tokio::test]
async fn test_concurrent_unauthorized_requests_share_one_refresh() {
    let h = Harness::start().await.with_tokens("T1", "R1");

    Mock::given(method("GET"))
        .and(path("/api/shopify-products/"))
        .and(header("authorization", "Bearer T1"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&h.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/shopify-products/"))
        .and(header("authorization", "Bearer T2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(5)
        .mount(&h.server)
        .await;
    mount_refresh(
        &h.server,
        ResponseTemplate::new(200)
            .set_body_json(json!({"access": "T2"}))
            .set_delay(Duration::from_millis(200)),
        1,
    )
    .await;

    let calls = (0..5).map(|_| h.client.list_products());
    let results = futures::future::join_all(calls).await;
    assert!(results.iter().all(Result::is_ok));
    h.server.verify().await;
}

#[tokio::test]
async fn test_refreshed_token_round_trips_through_cookie_file() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn TokenStore> = Arc::new(CookieFileStore::new(dir.path().join("cookies.txt")));
    let h = Harness::with_store(store).await.with_tokens("T1", "R1");

    let awkward = "eyJ0eXAi.eyJleHAiOjE3MDB9.s+g/n=; %2F";

    Mock::given(method("GET"))
        .and(path("/api/profile/"))
        .and(header("authorization", "Bearer T1"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&h.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/profile/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(profile_json()))
        .mount(&h.server)
        .await;
    mount_refresh(
        &h.server,
        ResponseTemplate::new(200).set_body_json(json!({"access": awkward})),
        1,
    )
    .await;

    h.client.profile().await.unwrap();

    let sent = h.requests_to("/api/profile/").await;
    assert_eq!(authorization(&sent[1]), Some(format!("Bearer {}", awkward)));
    assert_eq!(h.store.get(ACCESS_TOKEN_KEY).unwrap().as_deref(), Some(awkward));
}

#[tokio::test]
async fn test_late_unauthorized_after_rotation_retries_without_refresh() {
    let h = Harness::start().await.with_tokens("T1", "R1");

    Mock::given(method("GET"))
        .and(path("/api/profile/"))
        .and(header("authorization", "Bearer T1"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&h.server)
        .await;
    // This 401 only lands once the other request's refresh has finished
    Mock::given(method("GET"))
        .and(path("/api/shopify-products/"))
        .and(header("authorization", "Bearer T1"))
        .respond_with(ResponseTemplate::new(401).set_delay(Duration::from_millis(500)))
        .mount(&h.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/profile/"))
        .and(header("authorization", "Bearer T2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(profile_json()))
        .mount(&h.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/shopify-products/"))
        .and(header("authorization", "Bearer T2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&h.server)
        .await;
    mount_refresh(
        &h.server,
        ResponseTemplate::new(200).set_body_json(json!({"access": "T2"})),
        1,
    )
    .await;

    let (profile, products) = tokio::join!(h.client.profile(), h.client.list_products());
    assert!(profile.is_ok());
    assert!(products.is_ok());

    let listed = h.requests_to("/api/shopify-products/").await;
    assert_eq!(listed.len(), 2);
    assert_eq!(authorization(&listed[1]).as_deref(), Some("Bearer T2"));
    h.server.verify().await;
}

#[tokio::test]
async fn test_shared_refresh_failure_redirects_once() {
    let h = Harness::start().await.with_tokens("T1", "R1");

    Mock::given(method("GET"))
        .and(path("/api/shopify-products/"))
        .respond_with(ResponseTemplate::new(401))
        .expect(4)
        .mount(&h.server)
        .await;
    mount_refresh(
        &h.server,
        ResponseTemplate::new(401).set_delay(Duration::from_millis(300)),
        1,
    )
    .await;

    let calls = (0..4).map(|_| h.client.list_products());
    let results = futures::future::join_all(calls).await;
    assert!(results
        .iter()
        .all(|r| matches!(r, Err(ApiError::RefreshFailed(_)))));
    assert_eq!(h.redirects(), vec!["/login".to_string()]);
    h.server.verify().await;
}

// ============================================================================
// Logout
// ============================================================================

/// Store whose reads always fail, recording which keys were cleared
#[derive(Default)]
struct UnreadableStore {
    cleared: Mutex<Vec<String>>,
}

impl TokenStore for UnreadableStore {
    fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
        Err(StoreError::Decrypt)
    }

    fn set(&self, _key: &str, _value: &str) -> Result<(), StoreError> {
        Err(StoreError::Decrypt)
    }

    fn clear(&self, key: &str) -> Result<(), StoreError> {
        self.cleared.lock().unwrap().push(key.to_string());
        Ok(())
    }
}

#[tokio::test]
async fn test_logout_clears_tokens_when_store_is_unreadable() {
    let store = Arc::new(UnreadableStore::default());
    let h = Harness::with_store(store.clone()).await;

    let result = h.client.logout().await;
    assert!(matches!(result, Err(ApiError::Storage(StoreError::Decrypt))));
    assert_eq!(
        *store.cleared.lock().unwrap(),
        vec![ACCESS_TOKEN_KEY.to_string(), REFRESH_TOKEN_KEY.to_string()]
    );
}

#[tokio::test]
async fn test_logout_with_wrong_passphrase_removes_token_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tokens.enc");
    EncryptedFileStore::new(&path, "right")
        .store_pair(&TokenPair::new("T1", "R1"))
        .unwrap();

    let h = Harness::with_store(Arc::new(EncryptedFileStore::new(&path, "wrong"))).await;
    let result = h.client.logout().await;

    assert!(matches!(result, Err(ApiError::Storage(StoreError::Decrypt))));
    assert!(!path.exists());
    assert_eq!(h.store.get(ACCESS_TOKEN_KEY).unwrap(), None);
}

#[tokio::test]
async fn test_logout_clears_tokens() {
    let h = Harness::start().await.with_tokens("T1", "R1");

    Mock::given(method("POST"))
        .and(path("/api/logout/"))
        .and(header("authorization", "Bearer T1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"message": "Logged out"})))
        .expect(1)
        .mount(&h.server)
        .await;

    h.client.logout().await.unwrap();
    assert_eq!(h.store.load_pair().unwrap(), None);
    assert_eq!(h.store.get(ACCESS_TOKEN_KEY).unwrap(), None);
    h.server.verify().await;
}

#[tokio::test]
async fn test_logout_clears_tokens_even_when_server_fails() {
    let h = Harness::start().await.with_tokens("T1", "R1");

    Mock::given(method("POST"))
        .and(path("/api/logout/"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&h.server)
        .await;

    let result = h.client.logout().await;
    assert!(matches!(result, Err(ApiError::ServerError(_))));
    assert_eq!(h.store.get(ACCESS_TOKEN_KEY).unwrap(), None);
    assert_eq!(h.store.get(REFRESH_TOKEN_KEY).unwrap(), None);
}

#[tokio::test]
async fn test_logout_without_endpoint_is_ok() {
    let h = Harness::start().await.with_tokens("T1", "R1");

    Mock::given(method("POST"))
        .and(path("/api/logout/"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&h.server)
        .await;

    h.client.logout().await.unwrap();
    assert_eq!(h.store.load_pair().unwrap(), None);
}

#[tokio::test]
async fn test_logout_with_no_tokens_is_idempotent() {
    let h = Harness::start().await;

    Mock::given(method("POST"))
        .and(path("/api/logout/"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&h.server)
        .await;

    h.client.logout().await.unwrap();
    h.client.logout().await.unwrap();
    assert_eq!(h.store.get(ACCESS_TOKEN_KEY).unwrap(), None);
    assert_eq!(h.store.get(REFRESH_TOKEN_KEY).unwrap(), None);
    h.server.verify().await;
}

// ============================================================================
// Generic verbs
// ============================================================================

#[tokio::test]
async fn test_request_with_empty_body_returns_null() {
    let h = Harness::start().await.with_tokens("T1", "R1");

    Mock::given(method("DELETE"))
        .and(path("/api/shopify-products/4/delete/"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&h.server)
        .await;

    let response = h
        .client
        .request(
            reqwest::Method::DELETE,
            "shopify-products/4/delete/",
            RequestBody::Empty,
            RequestOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NO_CONTENT);
    assert!(response.json::<Value>().unwrap().is_null());
}

#[tokio::test]
async fn test_post_and_put_send_json() {
    let h = Harness::start().await.with_tokens("T1", "R1");

    Mock::given(method("POST"))
        .and(path("/api/things/"))
        .and(header("content-type", "application/json"))
        .and(body_json(json!({"name": "widget"})))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 10})))
        .expect(1)
        .mount(&h.server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/api/things/10/"))
        .and(body_json(json!({"name": "gadget"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 10, "name": "gadget"})))
        .expect(1)
        .mount(&h.server)
        .await;

    let created: Value = h.client.post("things/", &json!({"name": "widget"})).await.unwrap();
    assert_eq!(created["id"], 10);
    let updated: Value = h.client.put("/things/10/", &json!({"name": "gadget"})).await.unwrap();
    assert_eq!(updated["name"], "gadget");
    h.server.verify().await;
}
