//! Authentication module for token storage and session inspection.
//!
//! This module provides:
//! - `TokenStore`: the key-value capability the API client keeps its
//!   access/refresh tokens in
//! - Store backends: `MemoryStore`, `CookieFileStore`, `EncryptedFileStore`,
//!   and `KeyringStore` (OS keychain)
//! - `TokenPair` and `SessionStatus`: the credential pair and a read-only view
//!   of how long the stored access token has left
//! - `LoginRedirect`: the hook invoked when the session cannot be recovered

pub mod cookie_jar;
pub mod credentials;
pub mod encrypted;
pub mod redirect;
pub mod session;
pub mod store;

pub use cookie_jar::CookieFileStore;
pub use credentials::KeyringStore;
pub use encrypted::EncryptedFileStore;
pub use redirect::{LogRedirect, LoginRedirect};
pub use session::{SessionStatus, TokenPair};
pub use store::{MemoryStore, StoreError, TokenStore, ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY};
