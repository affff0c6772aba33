//! Passphrase-encrypted token file.
//!
//! The whole token map is serialized to JSON and sealed with
//! ChaCha20-Poly1305. The key is derived from the passphrase with Argon2id
//! using a random salt kept next to the ciphertext. Every write uses a fresh
//! nonce.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use argon2::Argon2;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use tracing::warn;

use super::store::{non_empty, StoreError, TokenStore};
use super::{ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY};

const FILE_VERSION: u32 = 1;
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

#[derive(Debug, Serialize, Deserialize)]
struct SealedFile {
    version: u32,
    salt: String,
    nonce: String,
    ciphertext: String,
}

struct DerivedKey {
    salt: [u8; SALT_LEN],
    key: [u8; KEY_LEN],
}

pub struct EncryptedFileStore {
    path: PathBuf,
    passphrase: String,
    // Serializes read-modify-write cycles within this process
    lock: Mutex<()>,
    // Key derived for the salt currently on disk
    key: Mutex<Option<DerivedKey>>,
}

impl EncryptedFileStore {
    pub fn new(path: impl Into<PathBuf>, passphrase: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            passphrase: passphrase.into(),
            lock: Mutex::new(()),
            key: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn key_for(&self, salt: &[u8; SALT_LEN]) -> Result<[u8; KEY_LEN], StoreError> {
        let mut cached = self.key.lock().map_err(|_| StoreError::Poisoned)?;
        if let Some(derived) = cached.as_ref() {
            if &derived.salt == salt {
                return Ok(derived.key);
            }
        }

        let mut key = [0u8; KEY_LEN];
        Argon2::default()
            .hash_password_into(self.passphrase.as_bytes(), salt, &mut key)
            .map_err(|e| StoreError::Crypto(e.to_string()))?;
        *cached = Some(DerivedKey { salt: *salt, key });
        Ok(key)
    }

    fn read_sealed(&self) -> Result<Option<(SealedFile, [u8; SALT_LEN])>, StoreError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&self.path)?;
        let sealed: SealedFile = serde_json::from_str(&contents)
            .map_err(|e| StoreError::Malformed(e.to_string()))?;
        if sealed.version != FILE_VERSION {
            return Err(StoreError::Malformed(format!(
                "unsupported version {}",
                sealed.version
            )));
        }
        let salt: [u8; SALT_LEN] = decode_fixed(&sealed.salt)?;
        Ok(Some((sealed, salt)))
    }

    fn load(&self) -> Result<(BTreeMap<String, String>, Option<[u8; SALT_LEN]>), StoreError> {
        let Some((sealed, salt)) = self.read_sealed()? else {
            return Ok((BTreeMap::new(), None));
        };

        let nonce: [u8; NONCE_LEN] = decode_fixed(&sealed.nonce)?;
        let ciphertext = STANDARD
            .decode(&sealed.ciphertext)
            .map_err(|e| StoreError::Malformed(e.to_string()))?;

        let key = self.key_for(&salt)?;
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));
        let plaintext = cipher
            .decrypt(Nonce::from_slice(&nonce), ciphertext.as_ref())
            .map_err(|_| StoreError::Decrypt)?;

        let entries = serde_json::from_slice(&plaintext)
            .map_err(|e| StoreError::Malformed(e.to_string()))?;
        Ok((entries, Some(salt)))
    }

    fn save(
        &self,
        entries: &BTreeMap<String, String>,
        salt: Option<[u8; SALT_LEN]>,
    ) -> Result<(), StoreError> {
        let salt = salt.unwrap_or_else(|| {
            let mut salt = [0u8; SALT_LEN];
            OsRng.fill_bytes(&mut salt);
            salt
        });
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        let plaintext = serde_json::to_vec(entries)
            .map_err(|e| StoreError::Malformed(e.to_string()))?;
        let key = self.key_for(&salt)?;
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_ref())
            .map_err(|e| StoreError::Crypto(e.to_string()))?;

        let sealed = SealedFile {
            version: FILE_VERSION,
            salt: STANDARD.encode(salt),
            nonce: STANDARD.encode(nonce),
            ciphertext: STANDARD.encode(ciphertext),
        };
        let contents = serde_json::to_string_pretty(&sealed)
            .map_err(|e| StoreError::Malformed(e.to_string()))?;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, contents)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl TokenStore for EncryptedFileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let _guard = self.lock.lock().map_err(|_| StoreError::Poisoned)?;
        let (mut entries, _) = self.load()?;
        Ok(non_empty(entries.remove(key)))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let _guard = self.lock.lock().map_err(|_| StoreError::Poisoned)?;
        let (mut entries, salt) = self.load()?;
        if value.is_empty() {
            entries.remove(key);
        } else {
            entries.insert(key.to_string(), value.to_string());
        }
        self.save(&entries, salt)
    }

    fn clear(&self, key: &str) -> Result<(), StoreError> {
        let _guard = self.lock.lock().map_err(|_| StoreError::Poisoned)?;
        let (mut entries, salt) = self.load()?;
        if entries.remove(key).is_some() {
            self.save(&entries, salt)?;
        }
        Ok(())
    }

    /// Clear both tokens. A file that cannot be opened with this passphrase
    /// is removed outright, so logging out never depends on decrypting it.
    fn clear_pair(&self) -> Result<(), StoreError> {
        let _guard = self.lock.lock().map_err(|_| StoreError::Poisoned)?;
        match self.load() {
            Ok((mut entries, salt)) => {
                let removed_access = entries.remove(ACCESS_TOKEN_KEY).is_some();
                let removed_refresh = entries.remove(REFRESH_TOKEN_KEY).is_some();
                if removed_access || removed_refresh {
                    self.save(&entries, salt)?;
                }
                Ok(())
            }
            Err(StoreError::Decrypt) | Err(StoreError::Malformed(_)) => {
                warn!(path = %self.path.display(), "Token file unreadable, removing it");
                std::fs::remove_file(&self.path)?;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

fn decode_fixed<const N: usize>(encoded: &str) -> Result<[u8; N], StoreError> {
    let bytes = STANDARD
        .decode(encoded)
        .map_err(|e| StoreError::Malformed(e.to_string()))?;
    bytes
        .try_into()
        .map_err(|_| StoreError::Malformed(format!("expected {} bytes", N)))
}
