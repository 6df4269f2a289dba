//! Broker configuration.

use secrecy::SecretString;
use std::{path::PathBuf, time::Duration};

use crate::provider::Provider;

const DEFAULT_HOME_BASE_DIR: &str = "/home";
const DEFAULT_CACHE_PATH: &str = "/var/cache/oidc-broker";
const DEFAULT_POLL_WINDOW_SECONDS: u64 = 5;
const DEFAULT_HTTP_TIMEOUT_SECONDS: u64 = 10;

#[derive(Clone)]
pub struct Config {
    issuer: String,
    client_id: String,
    client_secret: Option<SecretString>,
    provider: Provider,
    home_base_dir: PathBuf,
    cache_path: PathBuf,
    qr_code: bool,
    poll_window: Duration,
    http_timeout: Duration,
}

impl Config {
    #[must_use]
    pub fn new(issuer: String, client_id: String) -> Self {
        Self {
            issuer,
            client_id,
            client_secret: None,
            provider: Provider::Generic,
            home_base_dir: PathBuf::from(DEFAULT_HOME_BASE_DIR),
            cache_path: PathBuf::from(DEFAULT_CACHE_PATH),
            qr_code: true,
            poll_window: Duration::from_secs(DEFAULT_POLL_WINDOW_SECONDS),
            http_timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECONDS),
        }
    }

    #[must_use]
    pub fn with_client_secret(mut self, secret: Option<SecretString>) -> Self {
        self.client_secret = secret;
        self
    }

    #[must_use]
    pub fn with_provider(mut self, provider: Provider) -> Self {
        self.provider = provider;
        self
    }

    #[must_use]
    pub fn with_home_base_dir(mut self, dir: PathBuf) -> Self {
        self.home_base_dir = dir;
        self
    }

    #[must_use]
    pub fn with_cache_path(mut self, path: PathBuf) -> Self {
        self.cache_path = path;
        self
    }

    #[must_use]
    pub fn with_qr_code(mut self, enabled: bool) -> Self {
        self.qr_code = enabled;
        self
    }

    /// Longest time one `IsAuthenticated` call waits on a device flow.
    #[must_use]
    pub fn with_poll_window(mut self, window: Duration) -> Self {
        self.poll_window = window;
        self
    }

    #[must_use]
    pub fn with_http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }

    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    #[must_use]
    pub fn client_secret(&self) -> Option<&SecretString> {
        self.client_secret.as_ref()
    }

    #[must_use]
    pub fn provider(&self) -> Provider {
        self.provider
    }

    #[must_use]
    pub fn home_base_dir(&self) -> &PathBuf {
        &self.home_base_dir
    }

    #[must_use]
    pub fn cache_path(&self) -> &PathBuf {
        &self.cache_path
    }

    #[must_use]
    pub fn qr_code(&self) -> bool {
        self.qr_code
    }

    #[must_use]
    pub fn poll_window(&self) -> Duration {
        self.poll_window
    }

    #[must_use]
    pub fn http_timeout(&self) -> Duration {
        self.http_timeout
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("issuer", &self.issuer)
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "***"))
            .field("provider", &self.provider)
            .field("home_base_dir", &self.home_base_dir)
            .field("cache_path", &self.cache_path)
            .field("qr_code", &self.qr_code)
            .field("poll_window", &self.poll_window)
            .field("http_timeout", &self.http_timeout)
            .finish()
    }
}
