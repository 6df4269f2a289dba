//! Durable per-user token cache.
//!
//! One JSON record per username under the cache directory. Writes go to a
//! temporary file in the same directory which is synced and renamed over the
//! record, so readers see either the previous record or the new one. Writers
//! for the same username are serialized; readers never take the lock.
//!
//! The record also carries an Argon2id hash of the user's local password, used
//! for offline logins. Unknown fields are ignored on read so new fields can be
//! added without migrating existing records.

use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::SaltString};
use rand::rngs::OsRng;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::{SystemTime, UNIX_EPOCH},
};
use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, instrument};
use ulid::Ulid;

const RECORD_VERSION: u32 = 1;
const RECORD_EXTENSION: &str = "json";

#[derive(Debug, Error)]
pub enum Error {
    #[error("no cached token for {0}")]
    NotFound(String),
    #[error("no local password for {0}")]
    NoLocalPassword(String),
    #[error("password does not match")]
    PasswordMismatch,
    #[error("invalid username: {0:?}")]
    InvalidUsername(String),
    #[error("cache i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid cache record: {0}")]
    Json(#[from] serde_json::Error),
    #[error("password hashing failed: {0}")]
    Hash(String),
    #[error("cache task failed: {0}")]
    Task(String),
}

/// The token set obtained from the provider.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedToken {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub id_token: String,
    /// Unix seconds; `None` when the provider did not report `expires_in`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<i64>,
}

impl CachedToken {
    #[must_use]
    pub fn is_expired(&self, now_unix: i64) -> bool {
        self.expiry.is_some_and(|expiry| expiry <= now_unix)
    }
}

impl std::fmt::Debug for CachedToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedToken")
            .field("access_token", &"***")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "***"))
            .field("id_token", &"***")
            .field("expiry", &self.expiry)
            .finish()
    }
}

#[derive(Serialize, Deserialize)]
struct CacheRecord {
    version: u32,
    token: CachedToken,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    local_password: Option<String>,
    updated_at: i64,
}

pub struct TokenCache {
    dir: PathBuf,
    write_guards: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl TokenCache {
    /// Open (and create if needed) the cache directory.
    ///
    /// # Errors
    /// Returns an error if the directory cannot be created.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, Error> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        restrict_dir(&dir)?;
        Ok(Self {
            dir,
            write_guards: Mutex::new(HashMap::new()),
        })
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Whether a record exists for `username`.
    pub async fn exists(&self, username: &str) -> bool {
        match self.record_path(username) {
            Ok(path) => tokio::fs::try_exists(path).await.unwrap_or(false),
            Err(_) => false,
        }
    }

    /// Load the cached token for `username`.
    ///
    /// # Errors
    /// Returns `NotFound` if there is no record, or an I/O / decoding error.
    #[instrument(skip(self))]
    pub async fn load(&self, username: &str) -> Result<CachedToken, Error> {
        Ok(self.read_record(username).await?.token)
    }

    /// Replace the token for `username`, keeping any local password already set.
    ///
    /// # Errors
    /// Returns an error if the record cannot be written.
    #[instrument(skip(self, token))]
    pub async fn store(&self, username: &str, token: &CachedToken) -> Result<(), Error> {
        let guard = self.write_guard(username)?;
        let _lock = guard.lock().await;

        let local_password = match self.read_record(username).await {
            Ok(record) => record.local_password,
            Err(Error::NotFound(_)) => None,
            Err(err) => {
                debug!("replacing unreadable cache record: {err}");
                None
            }
        };
        self.write_record(username, token.clone(), local_password)
            .await
    }

    /// Replace the token for `username` and bind it to a new local password.
    ///
    /// # Errors
    /// Returns an error if hashing fails or the record cannot be written.
    #[instrument(skip(self, token, password))]
    pub async fn store_with_password(
        &self,
        username: &str,
        token: &CachedToken,
        password: &SecretString,
    ) -> Result<(), Error> {
        let guard = self.write_guard(username)?;
        let _lock = guard.lock().await;

        let hash = hash_password(password.clone()).await?;
        self.write_record(username, token.clone(), Some(hash)).await
    }

    /// Check `password` against the local password bound to the cached token
    /// and return the token. Never touches the network.
    ///
    /// # Errors
    /// Returns `NotFound`, `NoLocalPassword` or `PasswordMismatch`.
    #[instrument(skip(self, password))]
    pub async fn verify_password(
        &self,
        username: &str,
        password: &SecretString,
    ) -> Result<CachedToken, Error> {
        let record = self.read_record(username).await?;
        let Some(hash) = record.local_password else {
            return Err(Error::NoLocalPassword(username.to_string()));
        };
        if verify_password(password.clone(), hash).await? {
            Ok(record.token)
        } else {
            Err(Error::PasswordMismatch)
        }
    }

    fn record_path(&self, username: &str) -> Result<PathBuf, Error> {
        validate_username(username)?;
        Ok(self.dir.join(format!("{username}.{RECORD_EXTENSION}")))
    }

    fn write_guard(&self, username: &str) -> Result<Arc<AsyncMutex<()>>, Error> {
        let mut guards = self
            .write_guards
            .lock()
            .map_err(|_| Error::Task("cache lock poisoned".to_string()))?;
        Ok(guards
            .entry(username.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone())
    }

    async fn read_record(&self, username: &str) -> Result<CacheRecord, Error> {
        let path = self.record_path(username)?;
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(Error::NotFound(username.to_string()));
            }
            Err(err) => return Err(err.into()),
        };
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn write_record(
        &self,
        username: &str,
        token: CachedToken,
        local_password: Option<String>,
    ) -> Result<(), Error> {
        let path = self.record_path(username)?;
        let record = CacheRecord {
            version: RECORD_VERSION,
            token,
            local_password,
            updated_at: now_unix(),
        };
        let bytes = serde_json::to_vec_pretty(&record)?;
        let tmp = self.dir.join(format!(".{username}.{}.tmp", Ulid::new()));

        tokio::task::spawn_blocking(move || write_atomic(&tmp, &path, &bytes))
            .await
            .map_err(|e| Error::Task(e.to_string()))??;
        debug!("cache record updated");
        Ok(())
    }
}

fn validate_username(username: &str) -> Result<(), Error> {
    let valid = !username.is_empty()
        && !username.starts_with('.')
        && username
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '@'));
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidUsername(username.to_string()))
    }
}

fn write_atomic(tmp: &Path, path: &Path, bytes: &[u8]) -> Result<(), Error> {
    let result = (|| {
        let mut file = open_private(tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(tmp, path)
    })();
    if result.is_err() {
        let _ = fs::remove_file(tmp);
    }
    Ok(result?)
}

#[cfg(unix)]
fn open_private(path: &Path) -> io::Result<fs::File> {
    use std::os::unix::fs::OpenOptionsExt;
    fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)
}

#[cfg(not(unix))]
fn open_private(path: &Path) -> io::Result<fs::File> {
    fs::OpenOptions::new().write(true).create_new(true).open(path)
}

#[cfg(unix)]
fn restrict_dir(dir: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(dir, fs::Permissions::from_mode(0o700))
}

#[cfg(not(unix))]
fn restrict_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}

async fn hash_password(password: SecretString) -> Result<String, Error> {
    tokio::task::spawn_blocking(move || {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.expose_secret().as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| Error::Hash(e.to_string()))
    })
    .await
    .map_err(|e| Error::Task(e.to_string()))?
}

async fn verify_password(password: SecretString, hash: String) -> Result<bool, Error> {
    tokio::task::spawn_blocking(move || {
        let parsed = PasswordHash::new(&hash).map_err(|e| Error::Hash(e.to_string()))?;
        Ok(Argon2::default()
            .verify_password(password.expose_secret().as_bytes(), &parsed)
            .is_ok())
    })
    .await
    .map_err(|e| Error::Task(e.to_string()))?
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}
