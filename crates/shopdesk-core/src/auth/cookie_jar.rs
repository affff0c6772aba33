//! Cookie-jar style token file.
//!
//! One cookie per line, the way a browser would hold them:
//!
//! ```text
//! access_token=eyJhbGciOi...; path=/; samesite=lax
//! refresh_token=eyJhbGciOi...; path=/; samesite=lax
//! ```
//!
//! Values are URL-encoded on write and decoded on read, so any token string
//! round-trips unchanged.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::debug;
use url::form_urlencoded;

use super::store::{non_empty, StoreError, TokenStore};

/// Cookie attributes written after every value
const COOKIE_ATTRIBUTES: &str = "path=/; samesite=lax";

pub struct CookieFileStore {
    path: PathBuf,
    // Serializes read-modify-write cycles within this process
    lock: Mutex<()>,
}

impl CookieFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_jar(&self) -> Result<BTreeMap<String, String>, StoreError> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let contents = std::fs::read_to_string(&self.path)?;
        Ok(parse_jar(&contents))
    }

    fn write_jar(&self, jar: &BTreeMap<String, String>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, render_jar(jar))?;
        std::fs::rename(&tmp, &self.path)?;
        debug!(path = %self.path.display(), entries = jar.len(), "Wrote cookie jar");
        Ok(())
    }
}

impl TokenStore for CookieFileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let _guard = self.lock.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(non_empty(self.read_jar()?.remove(key)))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let _guard = self.lock.lock().map_err(|_| StoreError::Poisoned)?;
        let mut jar = self.read_jar()?;
        if value.is_empty() {
            jar.remove(key);
        } else {
            jar.insert(key.to_string(), value.to_string());
        }
        self.write_jar(&jar)
    }

    fn clear(&self, key: &str) -> Result<(), StoreError> {
        let _guard = self.lock.lock().map_err(|_| StoreError::Poisoned)?;
        let mut jar = self.read_jar()?;
        if jar.remove(key).is_some() {
            self.write_jar(&jar)?;
        }
        Ok(())
    }
}

fn encode_cookie(name: &str, value: &str) -> String {
    let pair = form_urlencoded::Serializer::new(String::new())
        .append_pair(name, value)
        .finish();
    format!("{}; {}", pair, COOKIE_ATTRIBUTES)
}

fn decode_cookie(line: &str) -> Option<(String, String)> {
    // Attributes follow the first "; ", the name=value pair comes first
    let pair = line.split("; ").next()?.trim();
    if pair.is_empty() {
        return None;
    }
    form_urlencoded::parse(pair.as_bytes())
        .next()
        .map(|(name, value)| (name.into_owned(), value.into_owned()))
}

fn parse_jar(contents: &str) -> BTreeMap<String, String> {
    contents.lines().filter_map(decode_cookie).collect()
}

fn render_jar(jar: &BTreeMap<String, String>) -> String {
    jar.iter()
        .map(|(name, value)| encode_cookie(name, value))
        .collect::<Vec<_>>()
        .join("\n")
}
