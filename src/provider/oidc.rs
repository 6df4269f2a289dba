//! OAuth2 / OIDC HTTP client.

use reqwest::{Client, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{Instrument, debug, info_span, instrument};
use url::Url;

use super::{Endpoints, Error, Provider, ProviderInfo};
use crate::{APP_USER_AGENT, cache::CachedToken};

const DISCOVERY_PATH: &str = ".well-known/openid-configuration";
const DEVICE_CODE_GRANT: &str = "urn:ietf:params:oauth:grant-type:device_code";
const DEFAULT_POLL_INTERVAL_SECONDS: u64 = 5;

#[derive(Deserialize)]
struct Discovery {
    token_endpoint: Option<String>,
    device_authorization_endpoint: Option<String>,
    userinfo_endpoint: Option<String>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    id_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

#[derive(Deserialize)]
struct OAuthError {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

impl OAuthError {
    fn message(&self) -> String {
        self.error_description
            .clone()
            .unwrap_or_else(|| self.error.clone())
    }
}

/// Response of the device authorization endpoint (RFC 8628 section 3.2).
#[derive(Clone, Deserialize)]
pub struct DeviceAuthorization {
    pub device_code: String,
    pub user_code: String,
    #[serde(alias = "verification_url")]
    pub verification_uri: String,
    #[serde(default)]
    pub verification_uri_complete: Option<String>,
    pub expires_in: u64,
    #[serde(default = "default_interval")]
    pub interval: u64,
}

fn default_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_SECONDS
}

impl std::fmt::Debug for DeviceAuthorization {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceAuthorization")
            .field("device_code", &"***")
            .field("user_code", &self.user_code)
            .field("verification_uri", &self.verification_uri)
            .field("expires_in", &self.expires_in)
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

/// One answer of the token endpoint while a device code is pending.
#[derive(Debug)]
pub enum DevicePoll {
    Pending,
    SlowDown,
    Token(CachedToken),
}

pub struct OidcClient {
    http: Client,
    issuer: Url,
    client_id: String,
    client_secret: Option<SecretString>,
    provider: Provider,
}

impl std::fmt::Debug for OidcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OidcClient")
            .field("issuer", &self.issuer.as_str())
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "***"))
            .field("provider", &self.provider)
            .finish()
    }
}

impl OidcClient {
    /// Build a client for `issuer`. Every request is bounded by `timeout`.
    ///
    /// # Errors
    /// Returns `Error::Config` if the issuer is not a URL or the HTTP client
    /// cannot be built.
    pub fn new(
        issuer: &str,
        client_id: &str,
        client_secret: Option<SecretString>,
        provider: Provider,
        timeout: Duration,
    ) -> Result<Self, Error> {
        let issuer = Url::parse(issuer).map_err(|e| Error::Config(format!("issuer: {e}")))?;
        let http = Client::builder()
            .user_agent(APP_USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(e.to_string()))?;

        Ok(Self {
            http,
            issuer,
            client_id: client_id.to_string(),
            client_secret,
            provider,
        })
    }

    #[must_use]
    pub fn issuer(&self) -> &str {
        self.issuer.as_str()
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    #[must_use]
    pub fn provider(&self) -> Provider {
        self.provider
    }

    fn discovery_url(&self) -> String {
        format!(
            "{}/{DISCOVERY_PATH}",
            self.issuer.as_str().trim_end_matches('/')
        )
    }

    /// Fetch the discovery document. Success means the provider is reachable.
    ///
    /// # Errors
    /// Returns `Error::Unreachable` if the document cannot be fetched or parsed.
    #[instrument(skip(self), fields(issuer = %self.issuer))]
    pub async fn discover(&self) -> Result<Endpoints, Error> {
        let url = self.discovery_url();
        let span = info_span!("oidc.discovery", http.method = "GET", url = %url);
        let response = self
            .http
            .get(&url)
            .send()
            .instrument(span)
            .await
            .map_err(|e| Error::Unreachable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Error::Unreachable(format!(
                "discovery returned {}",
                response.status()
            )));
        }

        let doc: Discovery = response
            .json()
            .await
            .map_err(|e| Error::Unreachable(format!("invalid discovery document: {e}")))?;

        let endpoints = self.provider.complete_endpoints(Endpoints {
            token: doc.token_endpoint,
            device_authorization: doc.device_authorization_endpoint,
            userinfo: doc.userinfo_endpoint,
        });
        debug!(?endpoints, "provider discovered");
        Ok(endpoints)
    }

    /// Resource owner password credentials grant.
    ///
    /// # Errors
    /// Returns `InvalidGrant` for rejected credentials, `Unreachable` on transport
    /// failures.
    #[instrument(skip(self, endpoints, password))]
    pub async fn password_grant(
        &self,
        endpoints: &Endpoints,
        username: &str,
        password: &SecretString,
    ) -> Result<CachedToken, Error> {
        let url = endpoints
            .token
            .as_deref()
            .ok_or(Error::MissingEndpoint("token"))?;
        let scope = self.provider.scopes();
        let mut form = vec![
            ("grant_type", "password"),
            ("username", username),
            ("password", password.expose_secret()),
            ("scope", scope.as_str()),
        ];
        self.extend_client_auth(&mut form);

        let span = info_span!("oidc.token.password", http.method = "POST", url = %url);
        let response = self
            .http
            .post(url)
            .form(&form)
            .send()
            .instrument(span)
            .await
            .map_err(|e| Error::Unreachable(e.to_string()))?;

        token_from(response).await
    }

    /// Start a device authorization grant.
    ///
    /// # Errors
    /// Returns `MissingEndpoint` if the provider has no device endpoint,
    /// `Unreachable` on transport failures.
    #[instrument(skip(self, endpoints))]
    pub async fn device_authorization(
        &self,
        endpoints: &Endpoints,
    ) -> Result<DeviceAuthorization, Error> {
        let url = endpoints
            .device_authorization
            .as_deref()
            .ok_or(Error::MissingEndpoint("device authorization"))?;
        let scope = self.provider.scopes();
        let mut form = vec![("scope", scope.as_str())];
        self.extend_client_auth(&mut form);

        let span = info_span!("oidc.device.authorize", http.method = "POST", url = %url);
        let response = self
            .http
            .post(url)
            .form(&form)
            .send()
            .instrument(span)
            .await
            .map_err(|e| Error::Unreachable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(error_from(response).await);
        }
        response
            .json()
            .await
            .map_err(|e| Error::Http(format!("invalid device authorization response: {e}")))
    }

    /// Ask the token endpoint whether the device code was confirmed.
    ///
    /// # Errors
    /// Returns `AccessDenied`, `ExpiredToken`, or `Unreachable` on transport
    /// failures.
    #[instrument(skip(self, endpoints, device_code))]
    pub async fn poll_device_token(
        &self,
        endpoints: &Endpoints,
        device_code: &str,
    ) -> Result<DevicePoll, Error> {
        let url = endpoints
            .token
            .as_deref()
            .ok_or(Error::MissingEndpoint("token"))?;
        let mut form = vec![("grant_type", DEVICE_CODE_GRANT), ("device_code", device_code)];
        self.extend_client_auth(&mut form);

        let span = info_span!("oidc.device.poll", http.method = "POST", url = %url);
        let response = self
            .http
            .post(url)
            .form(&form)
            .send()
            .instrument(span)
            .await
            .map_err(|e| Error::Unreachable(e.to_string()))?;

        if response.status().is_success() {
            return token_from(response).await.map(DevicePoll::Token);
        }

        let status = response.status();
        match response.json::<OAuthError>().await {
            Ok(err) if err.error == "authorization_pending" => Ok(DevicePoll::Pending),
            Ok(err) if err.error == "slow_down" => Ok(DevicePoll::SlowDown),
            Ok(err) => Err(classify(status, &err)),
            Err(_) => Err(status_error(status)),
        }
    }

    fn extend_client_auth<'a>(&'a self, form: &mut Vec<(&'a str, &'a str)>) {
        form.push(("client_id", self.client_id.as_str()));
        if let Some(secret) = &self.client_secret {
            form.push(("client_secret", secret.expose_secret()));
        }
        form.extend(self.provider.auth_options().iter().copied());
    }
}

async fn token_from(response: Response) -> Result<CachedToken, Error> {
    if !response.status().is_success() {
        return Err(error_from(response).await);
    }
    let token: TokenResponse = response
        .json()
        .await
        .map_err(|e| Error::Http(format!("invalid token response: {e}")))?;

    let id_token = token
        .id_token
        .ok_or_else(|| Error::Claims("token response carries no id_token".to_string()))?;

    Ok(CachedToken {
        access_token: token.access_token,
        refresh_token: token.refresh_token,
        id_token,
        expiry: token.expires_in.map(|secs| now_unix().saturating_add(secs)),
    })
}

async fn error_from(response: Response) -> Error {
    let status = response.status();
    match response.json::<OAuthError>().await {
        Ok(err) => classify(status, &err),
        Err(_) => status_error(status),
    }
}

fn classify(status: StatusCode, err: &OAuthError) -> Error {
    match err.error.as_str() {
        "invalid_grant" | "invalid_client" | "unauthorized_client" | "invalid_scope" => {
            Error::InvalidGrant(err.message())
        }
        "access_denied" => Error::AccessDenied(err.message()),
        "expired_token" => Error::ExpiredToken,
        _ if status.is_server_error() => Error::Unreachable(format!("{status}: {}", err.message())),
        _ => Error::Http(format!("{status}: {}", err.message())),
    }
}

fn status_error(status: StatusCode) -> Error {
    if status.is_server_error() {
        Error::Unreachable(format!("provider returned {status}"))
    } else {
        Error::Http(format!("provider returned {status}"))
    }
}

pub(crate) fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}
