use std::collections::HashMap;
use std::sync::RwLock;

use thiserror::Error;

use super::TokenPair;

/// Storage key for the short-lived access token
pub const ACCESS_TOKEN_KEY: &str = "access_token";

/// Storage key for the long-lived refresh token
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Keychain error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("Token file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Token file is malformed: {0}")]
    Malformed(String),

    #[error("Token file could not be decrypted - wrong passphrase or corrupted data")]
    Decrypt,

    #[error("Encryption failed: {0}")]
    Crypto(String),

    #[error("Token store lock poisoned")]
    Poisoned,
}

/// Persistent key-value storage for credential tokens.
///
/// Implementations hold at most one value per key. `set` overwrites, `clear`
/// removes, and `get` never returns an empty string: an empty value is the same
/// as no token at all.
pub trait TokenStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    fn clear(&self, key: &str) -> Result<(), StoreError>;

    /// Read both tokens. `None` unless both are present.
    fn load_pair(&self) -> Result<Option<TokenPair>, StoreError> {
        let access = self.get(ACCESS_TOKEN_KEY)?;
        let refresh = self.get(REFRESH_TOKEN_KEY)?;
        Ok(match (access, refresh) {
            (Some(access), Some(refresh)) => Some(TokenPair { access, refresh }),
            _ => None,
        })
    }

    fn store_pair(&self, pair: &TokenPair) -> Result<(), StoreError> {
        self.set(ACCESS_TOKEN_KEY, &pair.access)?;
        self.set(REFRESH_TOKEN_KEY, &pair.refresh)
    }

    /// Clear both tokens. Both keys are attempted even if the first fails.
    fn clear_pair(&self) -> Result<(), StoreError> {
        let access = self.clear(ACCESS_TOKEN_KEY);
        let refresh = self.clear(REFRESH_TOKEN_KEY);
        access.and(refresh)
    }
}

/// Normalize a stored value: empty means absent.
pub(crate) fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

/// Process-local token storage. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TokenStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let entries = self.entries.read().map_err(|_| StoreError::Poisoned)?;
        Ok(non_empty(entries.get(key).cloned()))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.write().map_err(|_| StoreError::Poisoned)?;
        if value.is_empty() {
            entries.remove(key);
        } else {
            entries.insert(key.to_string(), value.to_string());
        }
        Ok(())
    }

    fn clear(&self, key: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.write().map_err(|_| StoreError::Poisoned)?;
        entries.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_overwrites() {
        let store = MemoryStore::new();
        store.set(ACCESS_TOKEN_KEY, "first").unwrap();
        store.set(ACCESS_TOKEN_KEY, "second").unwrap();
        assert_eq!(store.get(ACCESS_TOKEN_KEY).unwrap().as_deref(), Some("second"));
    }

    #[test]
    fn test_empty_value_reads_as_absent() {
        let store = MemoryStore::new();
        store.set(ACCESS_TOKEN_KEY, "abc").unwrap();
        store.set(ACCESS_TOKEN_KEY, "").unwrap();
        assert_eq!(store.get(ACCESS_TOKEN_KEY).unwrap(), None);
    }

    #[test]
    fn test_pair_round_trip_and_clear() {
        let store = MemoryStore::new();
        assert!(store.load_pair().unwrap().is_none());

        let pair = TokenPair::new("a.b.c", "r-1");
        store.store_pair(&pair).unwrap();
        assert_eq!(store.load_pair().unwrap(), Some(pair));

        store.clear_pair().unwrap();
        assert!(store.load_pair().unwrap().is_none());
        assert_eq!(store.get(REFRESH_TOKEN_KEY).unwrap(), None);
    }

    #[test]
    fn test_clear_missing_key_is_ok() {
        let store = MemoryStore::new();
        assert!(store.clear_pair().is_ok());
    }
}
