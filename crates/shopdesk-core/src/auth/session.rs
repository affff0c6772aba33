use std::fmt;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::{StoreError, TokenStore, ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY};

/// Access and refresh token issued together at login.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub access: String,
    pub refresh: String,
}

impl TokenPair {
    pub fn new(access: impl Into<String>, refresh: impl Into<String>) -> Self {
        Self {
            access: access.into(),
            refresh: refresh.into(),
        }
    }
}

// Token values must never end up in logs
impl fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenPair")
            .field("access", &"<redacted>")
            .field("refresh", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct JwtClaims {
    exp: Option<i64>,
}

/// Read the `exp` claim from a JWT without verifying it.
/// Returns `None` for opaque (non-JWT) tokens.
pub fn jwt_expiry(token: &str) -> Option<DateTime<Utc>> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: JwtClaims = serde_json::from_slice(&bytes).ok()?;
    DateTime::from_timestamp(claims.exp?, 0)
}

/// Snapshot of what the token store currently holds.
///
/// This is informational only: requests are always sent and the server decides
/// whether the access token is still good.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    pub has_access: bool,
    pub has_refresh: bool,
    pub access_expires_at: Option<DateTime<Utc>>,
}

impl SessionStatus {
    pub fn from_store(store: &dyn TokenStore) -> Result<Self, StoreError> {
        let access = store.get(ACCESS_TOKEN_KEY)?;
        let has_refresh = store.get(REFRESH_TOKEN_KEY)?.is_some();
        Ok(Self {
            has_access: access.is_some(),
            has_refresh,
            access_expires_at: access.as_deref().and_then(jwt_expiry),
        })
    }

    /// True when a login (or a refresh) would be needed to make requests
    pub fn is_logged_in(&self) -> bool {
        self.has_access || self.has_refresh
    }

    pub fn is_expired(&self) -> bool {
        self.access_expires_at
            .map(|expiry| Utc::now() > expiry)
            .unwrap_or(false)
    }

    pub fn time_until_expiry(&self) -> Option<Duration> {
        self.access_expires_at.map(|expiry| expiry - Utc::now())
    }

    /// Get minutes remaining until expiry (for display)
    pub fn minutes_until_expiry(&self) -> Option<i64> {
        self.time_until_expiry()
            .map(|remaining| remaining.num_minutes().max(0))
    }
}
