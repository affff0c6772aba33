//! API client for the shopdesk backend.
//!
//! `ApiClient` owns the connection pool, the token store and two pipelines:
//! a public one for endpoints that need no credentials and a private one that
//! attaches the access token and recovers from an expired token with a single
//! refresh-and-retry.

use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use reqwest::header::{self, HeaderMap};
use reqwest::{Client, Method, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::auth::{
    LogRedirect, LoginRedirect, MemoryStore, SessionStatus, TokenPair, TokenStore,
    ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY,
};
use crate::config::Config;

use super::pipeline::{PendingRequest, Pipeline, RequestBody, RequestOptions, ResponseContext, Verdict};
use super::refresh::{RefreshCoordinator, RefreshResult};
use super::{ApiError, MultipartBody};

// ============================================================================
// Constants
// ============================================================================

/// Base URL used when nothing is configured (local development backend)
pub const DEFAULT_API_URL: &str = "http://localhost:8000/api";

/// Where the login redirect hook is pointed when the session is lost
pub const DEFAULT_LOGIN_PATH: &str = "/login";

/// HTTP request timeout in seconds.
/// 30s leaves room for image uploads on slow links.
const REQUEST_TIMEOUT_SECS: u64 = 30;

const LOGIN_ENDPOINT: &str = "login/";
const LOGOUT_ENDPOINT: &str = "logout/";
const REFRESH_ENDPOINT: &str = "token/refresh/";

#[derive(Debug, Default, Deserialize)]
struct IssuedTokens {
    access: Option<String>,
    refresh: Option<String>,
}

/// Token-bearing response. Login answers with top-level tokens, registration
/// nests them under `tokens`.
#[derive(Debug, Default, Deserialize)]
struct TokenResponse {
    #[serde(flatten)]
    top_level: IssuedTokens,
    #[serde(default)]
    tokens: Option<IssuedTokens>,
}

impl TokenResponse {
    fn into_tokens(self) -> (Option<String>, Option<String>) {
        let nested = self.tokens.unwrap_or_default();
        let access = self.top_level.access.or(nested.access);
        let refresh = self.top_level.refresh.or(nested.refresh);
        (
            access.filter(|t| !t.is_empty()),
            refresh.filter(|t| !t.is_empty()),
        )
    }
}

// ============================================================================
// Response
// ============================================================================

/// A successful (or classified) response with its body read into memory.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: String,
}

impl ApiResponse {
    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn text(&self) -> &str {
        &self.body
    }

    /// Parse the body as JSON. An empty body parses as `null`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        let parsed = if self.body.trim().is_empty() {
            serde_json::from_value(Value::Null)
        } else {
            serde_json::from_str(&self.body)
        };
        parsed.map_err(|e| ApiError::InvalidResponse(format!("Failed to parse JSON response: {}", e)))
    }

    /// Value of a cookie set by this response
    fn cookie(&self, name: &str) -> Option<String> {
        self.headers
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .filter_map(|cookie| cookie.split(';').next())
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value.trim_matches('"').to_string())
            .filter(|value| !value.is_empty())
    }
}

// ============================================================================
// Client
// ============================================================================

#[derive(Debug, Clone, Copy)]
enum Access {
    Public,
    Private,
}

struct ClientInner {
    http: Client,
    base_url: String,
    store: Arc<dyn TokenStore>,
    redirect: Arc<dyn LoginRedirect>,
    login_path: String,
    public: Pipeline,
    private: Pipeline,
    refresh: RefreshCoordinator,
}

/// API client for the shopdesk backend.
/// Clone is cheap - clones share the connection pool, token store and
/// in-flight refresh.
#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<ClientInner>,
}

pub struct ApiClientBuilder {
    base_url: String,
    login_path: String,
    timeout: Duration,
    store: Option<Arc<dyn TokenStore>>,
    redirect: Option<Arc<dyn LoginRedirect>>,
    http: Option<Client>,
}

impl Default for ApiClientBuilder {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_URL.to_string(),
            login_path: DEFAULT_LOGIN_PATH.to_string(),
            timeout: Duration::from_secs(REQUEST_TIMEOUT_SECS),
            store: None,
            redirect: None,
            http: None,
        }
    }
}

impl ApiClientBuilder {
    /// Start from the persisted configuration
    pub fn from_config(config: &Config) -> Self {
        Self::default()
            .base_url(config.api_url.clone())
            .login_path(config.login_path.clone())
            .timeout(Duration::from_secs(config.request_timeout_secs))
    }

    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn login_path(mut self, login_path: impl Into<String>) -> Self {
        self.login_path = login_path.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn token_store(mut self, store: Arc<dyn TokenStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn login_redirect(mut self, redirect: Arc<dyn LoginRedirect>) -> Self {
        self.redirect = Some(redirect);
        self
    }

    /// Share an existing reqwest client (and its connection pool)
    pub fn http_client(mut self, http: Client) -> Self {
        self.http = Some(http);
        self
    }

    pub fn build(self) -> Result<ApiClient, ApiError> {
        let parsed = url::Url::parse(&self.base_url)
            .map_err(|e| ApiError::InvalidRequest(format!("Invalid base URL {}: {}", self.base_url, e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ApiError::InvalidRequest(format!(
                "Base URL must be http or https: {}",
                self.base_url
            )));
        }

        let http = match self.http {
            Some(http) => http,
            None => Client::builder().timeout(self.timeout).build()?,
        };
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryStore::new()));
        let redirect = self.redirect.unwrap_or_else(|| Arc::new(LogRedirect));

        Ok(ApiClient {
            inner: Arc::new(ClientInner {
                http,
                base_url: self.base_url.trim_end_matches('/').to_string(),
                public: Pipeline::public(),
                private: Pipeline::private(store.clone()),
                store,
                redirect,
                login_path: self.login_path,
                refresh: RefreshCoordinator::new(),
            }),
        })
    }
}

impl ApiClient {
    pub fn builder() -> ApiClientBuilder {
        ApiClientBuilder::default()
    }

    /// Client for `base_url` with in-memory token storage
    pub fn new(base_url: impl Into<String>) -> Result<Self, ApiError> {
        Self::builder().base_url(base_url).build()
    }

    pub fn base_url(&self) -> &str {
        &self.inner.base_url
    }

    pub fn login_path(&self) -> &str {
        &self.inner.login_path
    }

    pub fn token_store(&self) -> &Arc<dyn TokenStore> {
        &self.inner.store
    }

    /// Full URL for a path relative to the base endpoint
    pub fn url(&self, path: &str) -> Result<String, ApiError> {
        self.inner.url(path)
    }

    // ===== Generic verbs =====

    /// Send an authenticated request through the private pipeline.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: RequestBody,
        options: RequestOptions,
    ) -> Result<ApiResponse, ApiError> {
        let request = PendingRequest::new(method, path, body).with_options(options);
        self.inner.execute(Access::Private, request).await
    }

    /// Send a request without credentials (login, registration)
    pub async fn public_request(
        &self,
        method: Method,
        path: &str,
        body: RequestBody,
        options: RequestOptions,
    ) -> Result<ApiResponse, ApiError> {
        let request = PendingRequest::new(method, path, body).with_options(options);
        self.inner.execute(Access::Public, request).await
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.request(Method::GET, path, RequestBody::Empty, RequestOptions::default())
            .await?
            .json()
    }

    pub async fn post<T, B>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.request(Method::POST, path, json_body(body)?, RequestOptions::default())
            .await?
            .json()
    }

    pub async fn put<T, B>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.request(Method::PUT, path, json_body(body)?, RequestOptions::default())
            .await?
            .json()
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.request(Method::DELETE, path, RequestBody::Empty, RequestOptions::default())
            .await?
            .json()
    }

    pub async fn post_multipart<T: DeserializeOwned>(
        &self,
        path: &str,
        form: MultipartBody,
    ) -> Result<T, ApiError> {
        self.request(Method::POST, path, RequestBody::Multipart(form), RequestOptions::default())
            .await?
            .json()
    }

    pub async fn put_multipart<T: DeserializeOwned>(
        &self,
        path: &str,
        form: MultipartBody,
    ) -> Result<T, ApiError> {
        self.request(Method::PUT, path, RequestBody::Multipart(form), RequestOptions::default())
            .await?
            .json()
    }

    // ===== Session =====

    /// Exchange credentials for a token pair and store it.
    /// Nothing is written to the store unless both tokens were issued.
    pub async fn login(&self, email: &str, password: &str) -> Result<TokenPair, ApiError> {
        let body = serde_json::json!({ "email": email, "password": password });
        let response = self
            .public_request(Method::POST, LOGIN_ENDPOINT, RequestBody::Json(body), RequestOptions::default())
            .await?;

        let pair = login_tokens(&response)?;
        self.inner.store.store_pair(&pair)?;
        info!("Login successful, tokens stored");
        Ok(pair)
    }

    /// Invalidate the session on the server, then clear both tokens whatever
    /// the server said. With no tokens stored this only clears. Tokens are
    /// cleared even when the store cannot be read; the first error is
    /// returned afterwards.
    pub async fn logout(&self) -> Result<(), ApiError> {
        let (logged_in, status_error) = match self.session_status() {
            Ok(status) => (status.is_logged_in(), None),
            Err(e) => {
                warn!(error = %e, "Could not read stored tokens, clearing them anyway");
                (true, Some(e))
            }
        };

        let server_result = if logged_in {
            match self
                .request(Method::POST, LOGOUT_ENDPOINT, RequestBody::Empty, RequestOptions::default())
                .await
            {
                Ok(_) => Ok(()),
                Err(ApiError::NotFound(_)) => {
                    debug!("Backend has no logout endpoint, clearing tokens locally");
                    Ok(())
                }
                Err(e) => {
                    warn!(error = %e, "Server-side logout failed");
                    Err(e)
                }
            }
        } else {
            debug!("No stored tokens, skipping server-side logout");
            Ok(())
        };

        let cleared = self.inner.store.clear_pair();
        if cleared.is_ok() {
            info!("Logged out, tokens cleared");
        }

        match status_error {
            Some(e) => Err(e),
            None => server_result.and(cleared.map_err(ApiError::from)),
        }
    }

    /// Refresh the access token now, joining any refresh already in flight
    pub async fn refresh(&self) -> Result<(), ApiError> {
        self.inner.refresh_coalesced().await
    }

    pub fn session_status(&self) -> Result<SessionStatus, ApiError> {
        Ok(SessionStatus::from_store(self.inner.store.as_ref())?)
    }
}

impl ClientInner {
    fn url(&self, path: &str) -> Result<String, ApiError> {
        if path.contains("://") || path.starts_with("//") {
            return Err(ApiError::InvalidRequest(format!(
                "Expected a path relative to the API base, got {}",
                path
            )));
        }
        Ok(format!("{}/{}", self.base_url, path.trim_start_matches('/')))
    }

    fn pipeline(&self, access: Access) -> &Pipeline {
        match access {
            Access::Public => &self.public,
            Access::Private => &self.private,
        }
    }

    /// Run one logical request to completion: send, classify, and at most one
    /// refresh-and-resend.
    async fn execute(
        self: &Arc<Self>,
        access: Access,
        mut request: PendingRequest,
    ) -> Result<ApiResponse, ApiError> {
        let pipeline = self.pipeline(access);

        loop {
            pipeline.prepare(&mut request)?;
            let response = self.send_once(&request).await?;

            let verdict = pipeline.classify(&ResponseContext {
                request: &request,
                status: response.status,
                body: &response.body,
            });

            match verdict {
                Verdict::Accept => return Ok(response),
                Verdict::Reject(err) => {
                    debug!(method = %request.method, path = %request.path, error = %err, "Request rejected");
                    return Err(err);
                }
                Verdict::Refresh => {
                    if !request.mark_retried() {
                        return Err(ApiError::Unauthorized);
                    }
                    self.recover(&request).await?;
                    debug!(method = %request.method, path = %request.path, "Retrying with refreshed credentials");
                }
            }
        }
    }

    async fn send_once(&self, request: &PendingRequest) -> Result<ApiResponse, ApiError> {
        let url = self.url(&request.path)?;
        let builder = self
            .http
            .request(request.method.clone(), &url)
            .headers(request.headers.clone());

        let builder = match &request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => builder.json(value),
            RequestBody::Multipart(form) => builder.multipart(form.to_form()?),
        };

        debug!(method = %request.method, path = %request.path, "Sending request");
        let response = builder.send().await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.text().await?;
        debug!(method = %request.method, path = %request.path, status = status.as_u16(), "Response received");

        Ok(ApiResponse {
            status,
            headers,
            body,
        })
    }

    /// Get fresh credentials for a request that was answered 401.
    async fn recover(self: &Arc<Self>, request: &PendingRequest) -> Result<(), ApiError> {
        // Someone else already rotated the token while this request was out
        let current = self.store.get(ACCESS_TOKEN_KEY)?;
        if current.is_some() && current.as_deref() != request.sent_token() {
            debug!(path = %request.path, "Access token changed since send, retrying without refresh");
            return Ok(());
        }
        self.refresh_coalesced().await
    }

    async fn refresh_coalesced(self: &Arc<Self>) -> Result<(), ApiError> {
        let inner = Arc::clone(self);
        self.refresh
            .run(move || refresh_and_report(inner).boxed())
            .await
            .map_err(|err| match err.as_ref() {
                ApiError::AuthenticationRequired => ApiError::AuthenticationRequired,
                _ => ApiError::RefreshFailed(err),
            })
    }

    async fn perform_refresh(&self) -> Result<(), ApiError> {
        let refresh_token = self
            .store
            .get(REFRESH_TOKEN_KEY)?
            .ok_or(ApiError::AuthenticationRequired)?;

        debug!("Refreshing access token");
        let body = serde_json::json!({ "refresh": refresh_token });
        let mut request = PendingRequest::new(Method::POST, REFRESH_ENDPOINT, RequestBody::Json(body));
        self.public.prepare(&mut request)?;
        let response = self.send_once(&request).await?;

        match self.public.classify(&ResponseContext {
            request: &request,
            status: response.status,
            body: &response.body,
        }) {
            Verdict::Accept => {}
            Verdict::Reject(err) => return Err(err),
            Verdict::Refresh => return Err(ApiError::Unauthorized),
        }

        let (access, refresh) = response.json::<TokenResponse>()?.into_tokens();
        let access = access.ok_or_else(|| {
            ApiError::InvalidResponse("Refresh response did not include an access token".to_string())
        })?;

        self.store.set(ACCESS_TOKEN_KEY, &access)?;
        let rotated = refresh.is_some();
        if let Some(refresh) = refresh {
            self.store.set(REFRESH_TOKEN_KEY, &refresh)?;
        }
        info!(rotated_refresh_token = rotated, "Token refresh successful");
        Ok(())
    }
}

/// The shared refresh future: one redirect per failed refresh, however many
/// requests were waiting on it.
async fn refresh_and_report(inner: Arc<ClientInner>) -> RefreshResult {
    match inner.perform_refresh().await {
        Ok(()) => Ok(()),
        Err(err) => {
            warn!(error = %err, "Token refresh failed, redirecting to login");
            inner.redirect.redirect_to_login(&inner.login_path);
            Err(Arc::new(err))
        }
    }
}

fn json_body<B: Serialize + ?Sized>(body: &B) -> Result<RequestBody, ApiError> {
    serde_json::to_value(body)
        .map(RequestBody::Json)
        .map_err(|e| ApiError::InvalidRequest(format!("Failed to serialize request body: {}", e)))
}

/// Tokens from a login response: JSON body first, then `Set-Cookie`.
fn login_tokens(response: &ApiResponse) -> Result<TokenPair, ApiError> {
    let (access, refresh) = response
        .json::<TokenResponse>()
        .map(TokenResponse::into_tokens)
        .unwrap_or((None, None));

    let access = access.or_else(|| response.cookie(ACCESS_TOKEN_KEY));
    let refresh = refresh.or_else(|| response.cookie(REFRESH_TOKEN_KEY));

    match (access, refresh) {
        (Some(access), Some(refresh)) => Ok(TokenPair { access, refresh }),
        _ => Err(ApiError::InvalidResponse(
            "Login response did not include both access and refresh tokens".to_string(),
        )),
    }
}
