//! Authentication flows.
//!
//! Each flow runs against one session snapshot and never touches the session
//! table; the broker applies the outcome afterwards. Every network call and
//! every wait races the attempt's [`Cancellation`].

use secrecy::{ExposeSecret, SecretString};
use std::{future::Future, path::PathBuf, sync::Arc, time::Duration};
use tokio::sync::watch;
use tracing::{debug, instrument, warn};

use super::{
    device, error::Error, password::validate_new_password, session::OfferFacts, userinfo::UserInfo,
};
use crate::{
    cache::{CachedToken, TokenCache},
    groups::GroupResolver,
    provider::{DeviceAuthorization, Endpoints, IdTokenClaims, OidcClient, oidc::now_unix},
};

/// Cooperative cancellation shared by an attempt and whoever may cancel it.
#[derive(Clone, Debug)]
pub struct Cancellation {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for Cancellation {
    fn default() -> Self {
        Self::new()
    }
}

impl Cancellation {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once [`cancel`](Self::cancel) has been called.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this only returns once cancelled.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }

    /// Run `fut` unless cancellation comes first.
    ///
    /// # Errors
    /// Returns `Error::Cancelled` if cancelled before or while `fut` runs.
    pub async fn run<T, F>(&self, fut: F) -> Result<T, Error>
    where
        F: Future<Output = Result<T, Error>>,
    {
        if self.is_cancelled() {
            return Err(Error::Cancelled);
        }
        tokio::select! {
            biased;
            () = self.cancelled() => Err(Error::Cancelled),
            result = fut => result,
        }
    }
}

/// Progress of a background device flow.
#[derive(Clone, Debug)]
pub enum FlowStatus {
    Polling,
    Done(Result<UserInfo, Error>),
}

/// Shared handles every flow needs.
#[derive(Clone)]
pub struct AuthFlowEngine {
    client: Arc<OidcClient>,
    cache: Arc<TokenCache>,
    groups: GroupResolver,
    home_base_dir: PathBuf,
}

impl AuthFlowEngine {
    #[must_use]
    pub fn new(client: Arc<OidcClient>, cache: Arc<TokenCache>, home_base_dir: PathBuf) -> Self {
        let groups = GroupResolver::new(client.provider());
        Self {
            client,
            cache,
            groups,
            home_base_dir,
        }
    }

    #[must_use]
    pub fn client(&self) -> &OidcClient {
        &self.client
    }

    pub async fn token_exists(&self, username: &str) -> bool {
        self.cache.exists(username).await
    }

    /// Probe the provider. Failure to discover means unreachable.
    pub(crate) async fn probe(&self) -> OfferFacts {
        match self.client.discover().await {
            Ok(endpoints) => OfferFacts {
                provider_reachable: true,
                endpoints,
            },
            Err(err) => {
                warn!("provider unreachable: {err}");
                OfferFacts::default()
            }
        }
    }

    /// Password login: online when the provider was reachable at offer time,
    /// against the cache otherwise or when the provider drops away meanwhile.
    ///
    /// # Errors
    /// Returns `AuthDenied`, `ProviderUnreachable`, `CacheWriteError` or `Cancelled`.
    #[instrument(skip(self, password, facts, cancel))]
    pub(crate) async fn login_with_password(
        &self,
        username: &str,
        password: &SecretString,
        facts: &OfferFacts,
        cancel: &Cancellation,
    ) -> Result<UserInfo, Error> {
        if !facts.provider_reachable || facts.endpoints.token.is_none() {
            return self.local_login(username, password, cancel).await;
        }

        match self
            .online_login(username, password, &facts.endpoints, cancel)
            .await
        {
            Err(Error::ProviderUnreachable(reason)) => {
                if !self.token_exists(username).await {
                    return Err(Error::ProviderUnreachable(reason));
                }
                warn!("provider unreachable during login, using cached credentials: {reason}");
                self.local_login(username, password, cancel).await
            }
            result => result,
        }
    }

    async fn online_login(
        &self,
        username: &str,
        password: &SecretString,
        endpoints: &Endpoints,
        cancel: &Cancellation,
    ) -> Result<UserInfo, Error> {
        let token = cancel
            .run(async {
                self.client
                    .password_grant(endpoints, username, password)
                    .await
                    .map_err(Error::from)
            })
            .await?;
        let claims = self.validate(&token, username)?;

        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        self.cache
            .store_with_password(username, &token, password)
            .await
            .map_err(|e| Error::CacheWriteError(e.to_string()))?;
        debug!("online password login succeeded");

        Ok(self.user_info(username, &claims))
    }

    /// Check the local password bound to the cached token. Never uses the network.
    ///
    /// # Errors
    /// Returns `AuthDenied` if there is no cached token or the password is wrong.
    pub(crate) async fn verify_local_password(
        &self,
        username: &str,
        password: &SecretString,
        cancel: &Cancellation,
    ) -> Result<CachedToken, Error> {
        cancel
            .run(async {
                self.cache
                    .verify_password(username, password)
                    .await
                    .map_err(Error::from)
            })
            .await
    }

    async fn local_login(
        &self,
        username: &str,
        password: &SecretString,
        cancel: &Cancellation,
    ) -> Result<UserInfo, Error> {
        let token = self.verify_local_password(username, password, cancel).await?;
        let claims = self.cached_claims(&token, username)?;
        debug!("offline password login succeeded");
        Ok(self.user_info(username, &claims))
    }

    /// Bind a new local password to the token obtained in an earlier step.
    ///
    /// # Errors
    /// Returns `ValidationError` on a policy violation, `AuthDenied` without a
    /// cached token, `CacheWriteError` if the record cannot be updated.
    #[instrument(skip(self, password, cancel))]
    pub(crate) async fn set_local_password(
        &self,
        username: &str,
        password: &SecretString,
        cancel: &Cancellation,
    ) -> Result<UserInfo, Error> {
        validate_new_password(username, password.expose_secret())?;

        let token = cancel
            .run(async { self.cache.load(username).await.map_err(Error::from) })
            .await?;
        let claims = self.cached_claims(&token, username)?;

        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        self.cache
            .store_with_password(username, &token, password)
            .await
            .map_err(|e| Error::CacheWriteError(e.to_string()))?;

        Ok(self.user_info(username, &claims))
    }

    /// Request a device code and start polling for it in the background.
    ///
    /// # Errors
    /// Returns `ProviderUnreachable` or `NoModeAvailable` if no code is issued.
    #[instrument(skip(self, endpoints, cancel))]
    pub(crate) async fn start_device_flow(
        &self,
        username: &str,
        endpoints: &Endpoints,
        cancel: &Cancellation,
    ) -> Result<(DeviceAuthorization, watch::Receiver<FlowStatus>), Error> {
        let authorization = cancel
            .run(async {
                self.client
                    .device_authorization(endpoints)
                    .await
                    .map_err(Error::from)
            })
            .await?;

        let (tx, rx) = watch::channel(FlowStatus::Polling);
        tokio::spawn(device::poll(
            self.clone(),
            username.to_string(),
            endpoints.clone(),
            authorization.clone(),
            cancel.clone(),
            tx,
        ));

        Ok((authorization, rx))
    }

    /// Validate and persist a token confirmed through the device flow.
    pub(crate) async fn complete_device_login(
        &self,
        username: &str,
        token: &CachedToken,
    ) -> Result<UserInfo, Error> {
        let claims = self.validate(token, username)?;
        self.cache
            .store(username, token)
            .await
            .map_err(|e| Error::CacheWriteError(e.to_string()))?;
        Ok(self.user_info(username, &claims))
    }

    pub(crate) async fn poll_device_token(
        &self,
        endpoints: &Endpoints,
        device_code: &str,
    ) -> Result<crate::provider::DevicePoll, crate::provider::Error> {
        self.client.poll_device_token(endpoints, device_code).await
    }

    fn validate(&self, token: &CachedToken, username: &str) -> Result<IdTokenClaims, Error> {
        let claims = IdTokenClaims::decode(&token.id_token)?;
        claims.validate(
            self.client.issuer(),
            self.client.client_id(),
            username,
            now_unix(),
        )?;
        Ok(claims)
    }

    /// Claims of a cached token. Expiry is not checked; a stale token still
    /// backs offline logins.
    fn cached_claims(&self, token: &CachedToken, username: &str) -> Result<IdTokenClaims, Error> {
        let claims = IdTokenClaims::decode(&token.id_token)?;
        match claims.username() {
            Some(name) if name.eq_ignore_ascii_case(username) => Ok(claims),
            _ => Err(Error::AuthDenied(
                "cached token belongs to another user".to_string(),
            )),
        }
    }

    fn user_info(&self, username: &str, claims: &IdTokenClaims) -> UserInfo {
        UserInfo::from_claims(
            username,
            claims,
            self.groups.resolve(claims),
            &self.home_base_dir,
        )
    }
}

/// Wait up to `window` for a device flow to finish.
///
/// Returns `Ok(None)` while the flow is still polling.
///
/// # Errors
/// Returns the flow's failure, or `Error::Cancelled`.
pub(crate) async fn wait_for_device(
    progress: &mut watch::Receiver<FlowStatus>,
    cancel: &Cancellation,
    window: Duration,
) -> Result<Option<UserInfo>, Error> {
    let wait = async {
        match progress
            .wait_for(|status| matches!(status, FlowStatus::Done(_)))
            .await
        {
            Ok(status) => match &*status {
                FlowStatus::Done(result) => result.clone().map(Some),
                FlowStatus::Polling => Ok(None),
            },
            // The poll task died without reporting an outcome.
            Err(_) => Err(Error::AuthDenied(
                "device flow stopped without a result".to_string(),
            )),
        }
    };

    match tokio::time::timeout(window, cancel.run(wait)).await {
        Ok(result) => result,
        Err(_) => Ok(None),
    }
}
