//! The broker core: sessions, mode decisions and authentication flows.
//!
//! [`Broker`] is what a transport calls into. Every method is routed by session
//! id; the session table is only ever locked briefly, and all network and disk
//! work happens between two short critical sections.

pub mod authmodes;
pub mod config;
pub mod crypto;
mod device;
pub mod error;
pub mod flow;
pub mod manager;
pub mod modes;
pub mod password;
pub mod session;
pub mod userinfo;

pub use authmodes::{AuthMode, AuthModeOffer, UiLayoutInfo};
pub use config::Config;
pub use error::Error;
pub use flow::{AuthFlowEngine, Cancellation, FlowStatus};
pub use manager::SessionManager;
pub use modes::ModeFacts;
pub use session::SessionPurpose;
pub use userinfo::UserInfo;

use anyhow::{Context, Result as AnyResult};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;

use crate::{
    cache::TokenCache,
    provider::{OidcClient, ProviderInfo},
};
use session::{Attempt, OfferFacts, SessionState};

/// Result of an `IsAuthenticated` call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Access {
    Granted,
    Denied,
    Cancelled,
    /// Still waiting on the provider; call again.
    Authenticating,
    /// This step succeeded; request modes again for the next one.
    Next,
}

impl Access {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Granted => "granted",
            Self::Denied => "denied",
            Self::Cancelled => "cancelled",
            Self::Authenticating => "authenticating",
            Self::Next => "next",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct AccessResult {
    pub access: Access,
    /// JSON: `{"userinfo": ...}` when granted, `{"message": ...}` when denied.
    pub data: String,
}

impl AccessResult {
    fn granted(info: &UserInfo) -> Self {
        Self {
            access: Access::Granted,
            data: info.to_access_data(),
        }
    }

    fn denied(err: &Error) -> Self {
        Self {
            access: Access::Denied,
            data: serde_json::json!({ "message": err.to_string() }).to_string(),
        }
    }

    fn empty(access: Access) -> Self {
        Self {
            access,
            data: "{}".to_string(),
        }
    }
}

enum Step {
    Granted(UserInfo),
    Next,
    Pending,
}

/// What an `IsAuthenticated` call needs once the table lock is released.
struct AttemptSnapshot {
    attempt_id: u64,
    mode: AuthMode,
    cancel: Cancellation,
    progress: Option<watch::Receiver<FlowStatus>>,
    username: String,
    purpose: SessionPurpose,
    key: SecretString,
    facts: OfferFacts,
}

pub struct Broker {
    config: Config,
    sessions: SessionManager,
    engine: AuthFlowEngine,
}

impl Broker {
    /// Build the broker: HTTP client for the issuer and the token cache.
    ///
    /// # Errors
    /// Returns an error if the issuer URL is invalid or the cache directory
    /// cannot be created.
    pub fn new(config: Config) -> AnyResult<Self> {
        let client = OidcClient::new(
            config.issuer(),
            config.client_id(),
            config.client_secret().cloned(),
            config.provider(),
            config.http_timeout(),
        )
        .context("Failed to build OIDC client")?;
        let cache = TokenCache::new(config.cache_path()).with_context(|| {
            format!(
                "Failed to open token cache at {}",
                config.cache_path().display()
            )
        })?;
        let engine = AuthFlowEngine::new(
            Arc::new(client),
            Arc::new(cache),
            config.home_base_dir().clone(),
        );

        Ok(Self {
            config,
            sessions: SessionManager::new(),
            engine,
        })
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn live_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Open a session and hand back its id and payload key.
    #[instrument(skip(self))]
    pub fn new_session(
        &self,
        username: &str,
        language: &str,
        purpose: SessionPurpose,
    ) -> (String, SecretString) {
        self.sessions.create(username, language, purpose)
    }

    /// Modes the user can authenticate with right now, restricted to the
    /// layouts the caller can render.
    ///
    /// # Errors
    /// Returns `UnknownSession`, `WrongState`, `AlreadyAuthenticating` or
    /// `NoModeAvailable`.
    #[instrument(skip(self, supported_layouts))]
    pub async fn get_authentication_modes(
        &self,
        session_id: &str,
        supported_layouts: &[String],
    ) -> Result<Vec<AuthModeOffer>, Error> {
        let (username, purpose, step) = self.sessions.with_session(session_id, |s| {
            match s.state {
                SessionState::Created | SessionState::ModeOffered | SessionState::Denied => {}
                SessionState::Authenticated if s.next_step_pending => {}
                SessionState::Authenticating => return Err(Error::AlreadyAuthenticating),
                other => {
                    return Err(Error::WrongState {
                        expected: SessionState::Created.as_str(),
                        actual: other.as_str(),
                    });
                }
            }
            Ok((s.username.clone(), s.purpose, s.step))
        })?;

        let token_exists = self.engine.token_exists(&username).await;
        let facts = if step == 0 && purpose == SessionPurpose::Login {
            self.engine.probe().await
        } else {
            OfferFacts::default()
        };

        let modes = self.config.provider().current_modes(&ModeFacts {
            purpose,
            token_exists,
            provider_reachable: facts.provider_reachable,
            endpoints: &facts.endpoints,
            step,
            qr_enabled: self.config.qr_code(),
        })?;

        let offers: Vec<AuthModeOffer> = modes
            .into_iter()
            .filter_map(|mode| {
                mode.select_layout(supported_layouts)
                    .map(|layout| AuthModeOffer::new(mode, layout))
            })
            .collect();
        if offers.is_empty() {
            return Err(Error::NoModeAvailable(
                "no available mode fits the supported layouts".to_string(),
            ));
        }

        self.sessions.with_session(session_id, |s| {
            if s.state == SessionState::Authenticating {
                return Err(Error::AlreadyAuthenticating);
            }
            s.offered.clone_from(&offers);
            s.facts = facts;
            s.state = SessionState::ModeOffered;
            s.selected_mode = None;
            s.next_step_pending = false;
            Ok(())
        })?;

        info!(
            session_id,
            modes = ?offers.iter().map(|o| o.id.as_str()).collect::<Vec<_>>(),
            "authentication modes offered"
        );
        Ok(offers)
    }

    /// Select one of the offered modes and describe how to collect it.
    ///
    /// Device modes request their code here and then poll in the background.
    ///
    /// # Errors
    /// Returns `UnknownSession`, `WrongState`, `AlreadyAuthenticating`,
    /// `InvalidMode`, or `ProviderUnreachable` if no device code is issued.
    #[instrument(skip(self))]
    pub async fn select_authentication_mode(
        &self,
        session_id: &str,
        mode_id: &str,
    ) -> Result<UiLayoutInfo, Error> {
        let attempt_id = self.sessions.next_attempt_id();
        let cancel = Cancellation::new();

        let (mode, layout, username, endpoints) =
            self.sessions.with_session(session_id, |s| {
                match s.state {
                    SessionState::ModeOffered => {}
                    SessionState::Authenticating => return Err(Error::AlreadyAuthenticating),
                    other => {
                        return Err(Error::WrongState {
                            expected: SessionState::ModeOffered.as_str(),
                            actual: other.as_str(),
                        });
                    }
                }
                let offer = s
                    .offered
                    .iter()
                    .find(|offer| offer.id == mode_id)
                    .ok_or_else(|| Error::InvalidMode(mode_id.to_string()))?;
                let mode = AuthMode::from_id(&offer.id)
                    .ok_or_else(|| Error::InvalidMode(mode_id.to_string()))?;
                let layout = offer.layout.clone();

                s.state = SessionState::Authenticating;
                s.selected_mode = Some(mode);
                s.attempt = Some(Attempt {
                    id: attempt_id,
                    mode,
                    cancel: cancel.clone(),
                    progress: None,
                    busy: false,
                });
                Ok((mode, layout, s.username.clone(), s.facts.endpoints.clone()))
            })?;

        match mode {
            AuthMode::Password => return Ok(authmodes::password_layout()),
            AuthMode::NewPassword => return Ok(authmodes::new_password_layout(&layout)),
            AuthMode::Device | AuthMode::DeviceQr => {}
        }

        let (authorization, progress) = match self
            .engine
            .start_device_flow(&username, &endpoints, &cancel)
            .await
        {
            Ok(started) => started,
            Err(err) => {
                warn!(session_id, "device authorization failed: {err}");
                let _ = self.sessions.with_session(session_id, |s| {
                    if s.owns_attempt(attempt_id) {
                        s.attempt = None;
                        s.selected_mode = None;
                        s.state = SessionState::ModeOffered;
                    }
                    Ok(())
                });
                return Err(err);
            }
        };

        let installed = self.sessions.with_session(session_id, |s| {
            match s.attempt.as_mut() {
                Some(attempt) if attempt.id == attempt_id => attempt.progress = Some(progress),
                _ => return Err(Error::Cancelled),
            }
            Ok(())
        });
        if let Err(err) = installed {
            cancel.cancel();
            return Err(err);
        }

        let render_qr = mode == AuthMode::DeviceQr;
        let uri = if render_qr {
            authorization
                .verification_uri_complete
                .as_deref()
                .unwrap_or(&authorization.verification_uri)
        } else {
            &authorization.verification_uri
        };
        Ok(authmodes::device_layout(
            &layout,
            render_qr,
            uri,
            &authorization.user_code,
        ))
    }

    /// Drive the selected mode with the encrypted authentication data.
    ///
    /// # Errors
    /// Only protocol misuse is an error (`UnknownSession`, `WrongState`,
    /// `AlreadyAuthenticating`, `Payload`); authentication outcomes are
    /// reported in the returned [`AccessResult`].
    #[instrument(skip(self, auth_data))]
    pub async fn is_authenticated(
        &self,
        session_id: &str,
        auth_data: &str,
    ) -> Result<AccessResult, Error> {
        let snapshot = self.sessions.with_session(session_id, |s| {
            if s.state != SessionState::Authenticating {
                return Err(Error::WrongState {
                    expected: SessionState::Authenticating.as_str(),
                    actual: s.state.as_str(),
                });
            }
            let username = s.username.clone();
            let purpose = s.purpose;
            let key = s.encryption_key.clone();
            let facts = s.facts.clone();
            let Some(attempt) = s.attempt.as_mut() else {
                return Err(Error::WrongState {
                    expected: SessionState::Authenticating.as_str(),
                    actual: SessionState::ModeOffered.as_str(),
                });
            };
            if attempt.busy || (attempt.mode.is_device() && attempt.progress.is_none()) {
                return Err(Error::AlreadyAuthenticating);
            }
            attempt.busy = true;
            Ok(AttemptSnapshot {
                attempt_id: attempt.id,
                mode: attempt.mode,
                cancel: attempt.cancel.clone(),
                progress: attempt.progress.clone(),
                username,
                purpose,
                key,
                facts,
            })
        })?;

        let attempt_id = snapshot.attempt_id;
        let outcome = self.run_attempt(session_id, snapshot, auth_data).await;
        self.finish_attempt(session_id, attempt_id, outcome)
    }

    async fn run_attempt(
        &self,
        session_id: &str,
        snapshot: AttemptSnapshot,
        auth_data: &str,
    ) -> Result<Step, Error> {
        let AttemptSnapshot {
            mode,
            cancel,
            progress,
            username,
            purpose,
            key,
            facts,
            ..
        } = snapshot;
        let payload = crypto::decrypt_payload(&key, session_id, auth_data)?;

        match mode {
            AuthMode::Password => {
                let secret = challenge(payload)?;
                match purpose {
                    SessionPurpose::Login => self
                        .engine
                        .login_with_password(&username, &secret, &facts, &cancel)
                        .await
                        .map(Step::Granted),
                    SessionPurpose::ChangePassword => self
                        .engine
                        .verify_local_password(&username, &secret, &cancel)
                        .await
                        .map(|_| Step::Next),
                }
            }
            AuthMode::NewPassword => {
                let secret = challenge(payload)?;
                self.engine
                    .set_local_password(&username, &secret, &cancel)
                    .await
                    .map(Step::Granted)
            }
            AuthMode::Device | AuthMode::DeviceQr => {
                let Some(mut progress) = progress else {
                    return Err(Error::AlreadyAuthenticating);
                };
                match flow::wait_for_device(&mut progress, &cancel, self.config.poll_window())
                    .await?
                {
                    Some(_) => Ok(Step::Next),
                    None => Ok(Step::Pending),
                }
            }
        }
    }

    fn finish_attempt(
        &self,
        session_id: &str,
        attempt_id: u64,
        outcome: Result<Step, Error>,
    ) -> Result<AccessResult, Error> {
        let applied = self.sessions.with_session(session_id, |s| {
            if !s.owns_attempt(attempt_id) {
                // Cancelled, or ended and replaced, while the flow ran.
                return Ok(AccessResult::empty(Access::Cancelled));
            }

            match outcome {
                Ok(Step::Pending) => {
                    if let Some(attempt) = s.attempt.as_mut() {
                        attempt.busy = false;
                    }
                    Ok(AccessResult::empty(Access::Authenticating))
                }
                Ok(Step::Granted(info)) => {
                    s.attempt = None;
                    s.state = SessionState::Authenticated;
                    s.step += 1;
                    s.next_step_pending = false;
                    info!(session_id, username = %s.username, "access granted");
                    Ok(AccessResult::granted(&info))
                }
                Ok(Step::Next) => {
                    s.attempt = None;
                    s.state = SessionState::Authenticated;
                    s.step += 1;
                    s.next_step_pending = true;
                    info!(session_id, step = s.step, "step completed, next step required");
                    Ok(AccessResult::empty(Access::Next))
                }
                Err(Error::Cancelled) => {
                    s.attempt = None;
                    s.selected_mode = None;
                    s.state = SessionState::ModeOffered;
                    Ok(AccessResult::empty(Access::Cancelled))
                }
                Err(err @ Error::Payload(_)) => {
                    if let Some(attempt) = s.attempt.as_mut() {
                        attempt.busy = false;
                    }
                    Err(err)
                }
                Err(err) => {
                    s.attempt = None;
                    s.state = SessionState::Denied;
                    info!(session_id, username = %s.username, code = err.code(), "access denied: {err}");
                    Ok(AccessResult::denied(&err))
                }
            }
        });

        match applied {
            Err(Error::UnknownSession(_)) => Ok(AccessResult::empty(Access::Cancelled)),
            other => other,
        }
    }

    /// Interrupt the running attempt, if any. The session goes back to mode
    /// selection.
    ///
    /// # Errors
    /// Returns `UnknownSession` if the id is not live.
    #[instrument(skip(self))]
    pub fn cancel_is_authenticated(&self, session_id: &str) -> Result<(), Error> {
        self.sessions.with_session(session_id, |s| {
            if s.attempt.is_some() {
                s.cancel_attempt();
                s.selected_mode = None;
                s.state = SessionState::ModeOffered;
                info!(session_id, "authentication cancelled");
            }
            Ok(())
        })
    }

    /// Forget a session. Ending an unknown or already ended session is a no-op.
    #[instrument(skip(self))]
    pub fn end_session(&self, session_id: &str) {
        self.sessions.end(session_id);
    }

    /// End every live session.
    pub fn shutdown(&self) {
        let ended = self.sessions.end_all();
        info!(ended, "broker shut down");
    }
}

fn challenge(payload: crypto::AuthPayload) -> Result<SecretString, Error> {
    payload
        .challenge
        .filter(|challenge| !challenge.is_empty())
        .map(SecretString::from)
        .ok_or_else(|| Error::Payload("missing challenge".to_string()))
}
