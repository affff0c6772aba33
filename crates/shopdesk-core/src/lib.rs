//! Core library for shopdesk.
//!
//! This crate holds everything the front ends share:
//!
//! - `api`: the authenticated `ApiClient`, its request/response pipeline and
//!   the typed wrappers around the backend's REST endpoints
//! - `auth`: pluggable token storage and session inspection
//! - `models`: user, profile and product records
//! - `config`: persisted client configuration

pub mod api;
pub mod auth;
pub mod config;
pub mod models;

pub use api::{ApiClient, ApiError};
pub use auth::{LoginRedirect, StoreError, TokenPair, TokenStore};
pub use config::Config;
