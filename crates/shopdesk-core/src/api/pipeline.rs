//! Request/response pipeline around the core send.
//!
//! A `Pipeline` is an ordered list of request stages, applied to a
//! `PendingRequest` before every send (including the retry), and an ordered
//! list of response stages that classify the outcome. The first response stage
//! with an opinion decides the `Verdict`.

use std::sync::Arc;

use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode};
use serde_json::Value;
use tracing::debug;

use crate::auth::{TokenStore, ACCESS_TOKEN_KEY};
use crate::models::ImageUpload;

use super::ApiError;

// ============================================================================
// Request description
// ============================================================================

/// Payload of an outgoing request
#[derive(Debug, Clone, Default)]
pub enum RequestBody {
    #[default]
    Empty,
    Json(Value),
    Multipart(MultipartBody),
}

#[derive(Debug, Clone)]
enum FormPart {
    Text {
        name: String,
        value: String,
    },
    File {
        name: String,
        upload: ImageUpload,
    },
}

/// Multipart form kept as plain data so it can be rebuilt for a retry.
#[derive(Debug, Clone, Default)]
pub struct MultipartBody {
    parts: Vec<FormPart>,
}

impl MultipartBody {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parts.push(FormPart::Text {
            name: name.into(),
            value: value.into(),
        });
        self
    }

    pub fn file(mut self, name: impl Into<String>, upload: ImageUpload) -> Self {
        self.parts.push(FormPart::File {
            name: name.into(),
            upload,
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Names of the fields in this form, in order
    pub fn field_names(&self) -> Vec<&str> {
        self.parts
            .iter()
            .map(|part| match part {
                FormPart::Text { name, .. } | FormPart::File { name, .. } => name.as_str(),
            })
            .collect()
    }

    pub(crate) fn to_form(&self) -> Result<reqwest::multipart::Form, ApiError> {
        let mut form = reqwest::multipart::Form::new();
        for part in &self.parts {
            form = match part {
                FormPart::Text { name, value } => form.text(name.clone(), value.clone()),
                FormPart::File { name, upload } => {
                    let file = reqwest::multipart::Part::bytes(upload.bytes.clone())
                        .file_name(upload.file_name.clone())
                        .mime_str(&upload.mime_type)?;
                    form.part(name.clone(), file)
                }
            };
        }
        Ok(form)
    }
}

/// Per-request overrides supplied by the caller
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub headers: HeaderMap,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }
}

/// One logical request, from the verb call until it resolves.
#[derive(Debug, Clone)]
pub struct PendingRequest {
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
    pub body: RequestBody,
    retried: bool,
    sent_token: Option<String>,
}

impl PendingRequest {
    pub fn new(method: Method, path: impl Into<String>, body: RequestBody) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            body,
            retried: false,
            sent_token: None,
        }
    }

    pub fn with_options(mut self, options: RequestOptions) -> Self {
        self.headers.extend(options.headers);
        self
    }

    pub fn retried(&self) -> bool {
        self.retried
    }

    /// Flip the retry flag. Returns false if it was already set.
    pub fn mark_retried(&mut self) -> bool {
        !std::mem::replace(&mut self.retried, true)
    }

    /// Access token attached on the last send, if any
    pub fn sent_token(&self) -> Option<&str> {
        self.sent_token.as_deref()
    }
}

// ============================================================================
// Stages
// ============================================================================

pub trait RequestStage: Send + Sync {
    fn apply(&self, request: &mut PendingRequest) -> Result<(), ApiError>;
}

/// What a response stage sees
#[derive(Debug)]
pub struct ResponseContext<'a> {
    pub request: &'a PendingRequest,
    pub status: StatusCode,
    pub body: &'a str,
}

#[derive(Debug)]
pub enum Verdict {
    Accept,
    /// Refresh credentials, then send the request again
    Refresh,
    Reject(ApiError),
}

pub trait ResponseStage: Send + Sync {
    /// `None` defers to the next stage
    fn classify(&self, ctx: &ResponseContext<'_>) -> Option<Verdict>;
}

/// Sets `Accept` and the JSON content type, and drops caller-supplied content
/// types on multipart bodies (the transport adds one with the boundary).
#[derive(Debug, Default)]
pub struct ContentHeaders;

impl RequestStage for ContentHeaders {
    fn apply(&self, request: &mut PendingRequest) -> Result<(), ApiError> {
        request
            .headers
            .entry(header::ACCEPT)
            .or_insert(HeaderValue::from_static("application/json"));
        match request.body {
            RequestBody::Json(_) => {
                request.headers.insert(
                    header::CONTENT_TYPE,
                    HeaderValue::from_static("application/json"),
                );
            }
            RequestBody::Multipart(_) => {
                request.headers.remove(header::CONTENT_TYPE);
            }
            RequestBody::Empty => {}
        }
        Ok(())
    }
}

/// Reads the access token right before each send and attaches it.
pub struct BearerAuth {
    store: Arc<dyn TokenStore>,
}

impl BearerAuth {
    pub fn new(store: Arc<dyn TokenStore>) -> Self {
        Self { store }
    }
}

impl RequestStage for BearerAuth {
    fn apply(&self, request: &mut PendingRequest) -> Result<(), ApiError> {
        let token = self.store.get(ACCESS_TOKEN_KEY)?;
        match token {
            Some(ref token) => {
                let value = HeaderValue::from_str(&format!("Bearer {}", token))
                    .map_err(|_| ApiError::InvalidRequest("access token is not a valid header value".into()))?;
                request.headers.insert(header::AUTHORIZATION, value);
            }
            None => {
                debug!(path = %request.path, "No access token stored, sending without Authorization");
                request.headers.remove(header::AUTHORIZATION);
            }
        }
        request.sent_token = token;
        Ok(())
    }
}

/// A first 401 asks for a refresh; a 401 on the retry falls through.
#[derive(Debug, Default)]
pub struct RefreshOnUnauthorized;

impl ResponseStage for RefreshOnUnauthorized {
    fn classify(&self, ctx: &ResponseContext<'_>) -> Option<Verdict> {
        if ctx.status == StatusCode::UNAUTHORIZED && !ctx.request.retried() {
            Some(Verdict::Refresh)
        } else {
            None
        }
    }
}

/// 2xx accepted, everything else rejected with a typed error.
#[derive(Debug, Default)]
pub struct StatusCheck;

impl ResponseStage for StatusCheck {
    fn classify(&self, ctx: &ResponseContext<'_>) -> Option<Verdict> {
        if ctx.status.is_success() {
            Some(Verdict::Accept)
        } else {
            Some(Verdict::Reject(ApiError::from_status(ctx.status, ctx.body)))
        }
    }
}

// ============================================================================
// Pipeline
// ============================================================================

#[derive(Default)]
pub struct Pipeline {
    request_stages: Vec<Box<dyn RequestStage>>,
    response_stages: Vec<Box<dyn ResponseStage>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pipeline for endpoints that need no credentials (login, register)
    pub fn public() -> Self {
        Self::new()
            .request_stage(ContentHeaders)
            .response_stage(StatusCheck)
    }

    /// Pipeline for authenticated endpoints
    pub fn private(store: Arc<dyn TokenStore>) -> Self {
        Self::new()
            .request_stage(ContentHeaders)
            .request_stage(BearerAuth::new(store))
            .response_stage(RefreshOnUnauthorized)
            .response_stage(StatusCheck)
    }

    pub fn request_stage(mut self, stage: impl RequestStage + 'static) -> Self {
        self.request_stages.push(Box::new(stage));
        self
    }

    pub fn response_stage(mut self, stage: impl ResponseStage + 'static) -> Self {
        self.response_stages.push(Box::new(stage));
        self
    }

    pub fn prepare(&self, request: &mut PendingRequest) -> Result<(), ApiError> {
        for stage in &self.request_stages {
            stage.apply(request)?;
        }
        Ok(())
    }

    pub fn classify(&self, ctx: &ResponseContext<'_>) -> Verdict {
        self.response_stages
            .iter()
            .find_map(|stage| stage.classify(ctx))
            .unwrap_or_else(|| {
                if ctx.status.is_success() {
                    Verdict::Accept
                } else {
                    Verdict::Reject(ApiError::from_status(ctx.status, ctx.body))
                }
            })
    }
}
