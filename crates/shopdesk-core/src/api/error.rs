use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

use crate::auth::StoreError;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Unauthorized - token may be expired")]
    Unauthorized,

    #[error("Authentication required - please log in")]
    AuthenticationRequired,

    #[error("Token refresh failed: {0}")]
    RefreshFailed(#[source] Arc<ApiError>),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Rate limited - please wait before retrying")]
    RateLimited,

    #[error("Validation failed: {0}")]
    Validation(FieldErrors),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Token storage error: {0}")]
    Storage(#[from] StoreError),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl ApiError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!(
                "{}... (truncated, {} total bytes)",
                &body[..end],
                body.len()
            )
        }
    }

    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let truncated = Self::truncate_body(body);
        match status.as_u16() {
            400 | 422 => match FieldErrors::from_body(body) {
                Some(errors) => ApiError::Validation(errors),
                None => ApiError::BadRequest(truncated),
            },
            401 => ApiError::Unauthorized,
            403 => ApiError::AccessDenied(truncated),
            404 => ApiError::NotFound(truncated),
            429 => ApiError::RateLimited,
            500..=599 => ApiError::ServerError(truncated),
            _ => ApiError::InvalidResponse(format!("Status {}: {}", status, truncated)),
        }
    }

    /// True for failures that a fresh login would fix
    pub fn needs_login(&self) -> bool {
        match self {
            ApiError::Unauthorized | ApiError::AuthenticationRequired => true,
            ApiError::RefreshFailed(_) => true,
            _ => false,
        }
    }

    /// Field-keyed messages, if the backend rejected the payload
    pub fn field_errors(&self) -> Option<&FieldErrors> {
        match self {
            ApiError::Validation(errors) => Some(errors),
            _ => None,
        }
    }
}

/// Keys under which the backend reports errors not tied to one field
const GENERAL_ERROR_KEYS: &[&str] = &["non_field_errors", "error", "detail"];

/// Validation messages keyed by the field they refer to.
///
/// The backend answers a rejected form with a JSON object whose values are
/// either a message or a list of messages:
///
/// ```json
/// {"email": ["A user with this email already exists."], "confirm_password": "Passwords don't match."}
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldErrors(BTreeMap<String, Vec<String>>);

impl FieldErrors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a backend error body. Returns `None` if it is not a field map.
    pub fn from_body(body: &str) -> Option<Self> {
        let value: Value = serde_json::from_str(body).ok()?;
        Self::from_value(&value)
    }

    pub fn from_value(value: &Value) -> Option<Self> {
        let object = value.as_object()?;
        let mut errors = Self::new();
        for (field, messages) in object {
            match messages {
                Value::String(message) => errors.add(field, message.clone()),
                Value::Array(items) => {
                    for item in items {
                        if let Some(message) = item.as_str() {
                            errors.add(field, message);
                        }
                    }
                }
                Value::Object(_) => {
                    // Nested serializer errors: flatten to "parent.child"
                    if let Some(nested) = Self::from_value(messages) {
                        for (child, child_messages) in nested.0 {
                            for message in child_messages {
                                errors.add(format!("{}.{}", field, child), message);
                            }
                        }
                    }
                }
                _ => {}
            }
        }
        if errors.is_empty() {
            None
        } else {
            Some(errors)
        }
    }

    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.0.entry(field.into()).or_default().push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// First message reported for a field
    pub fn first(&self, field: &str) -> Option<&str> {
        self.0.get(field).and_then(|m| m.first()).map(String::as_str)
    }

    /// First message not tied to a particular field
    pub fn general(&self) -> Option<&str> {
        GENERAL_ERROR_KEYS.iter().find_map(|key| self.first(key))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }
}

impl fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (field, messages) in &self.0 {
            for message in messages {
                if !first {
                    f.write_str("; ")?;
                }
                first = false;
                write!(f, "{}: {}", field, message)?;
            }
        }
        Ok(())
    }
}
