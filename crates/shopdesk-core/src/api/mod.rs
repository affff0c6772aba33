//! REST API client module for the shopdesk backend.
//!
//! This module provides the `ApiClient` for communicating with the backend's
//! account and product endpoints.
//!
//! The backend uses JWT bearer authentication with a short-lived access token
//! and a longer-lived refresh token. The client attaches the access token to
//! every authenticated request and, when the backend answers 401, refreshes
//! the pair once and replays the request.

pub mod client;
pub mod endpoints;
pub mod error;
pub mod pipeline;
mod refresh;

pub use client::{ApiClient, ApiClientBuilder, ApiResponse, DEFAULT_API_URL, DEFAULT_LOGIN_PATH};
pub use error::{ApiError, FieldErrors};
pub use pipeline::{
    MultipartBody, PendingRequest, Pipeline, RequestBody, RequestOptions, RequestStage,
    ResponseContext, ResponseStage, Verdict,
};
