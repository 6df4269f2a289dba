//! Session records owned by the session manager.

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::watch;
use utoipa::ToSchema;

use super::{
    authmodes::{AuthMode, AuthModeOffer},
    flow::{Cancellation, FlowStatus},
};
use crate::provider::Endpoints;

/// Why the host opened the session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SessionPurpose {
    /// Ordinary login.
    Login,
    /// Replace the local password after proving the current one.
    ChangePassword,
}

impl SessionPurpose {
    /// Parse the mode string received by `NewSession`.
    #[must_use]
    pub fn parse(mode: &str) -> Option<Self> {
        match mode.trim().to_lowercase().as_str() {
            "" | "auth" | "login" => Some(Self::Login),
            "passwd" | "change-password" | "change_password" => Some(Self::ChangePassword),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::ChangePassword => "passwd",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Created,
    ModeOffered,
    Authenticating,
    Authenticated,
    Denied,
    /// Never stored: ending a session removes it from the table, and any later
    /// call on its id fails with `UnknownSession`.
    Ended,
}

impl SessionState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::ModeOffered => "mode_offered",
            Self::Authenticating => "authenticating",
            Self::Authenticated => "authenticated",
            Self::Denied => "denied",
            Self::Ended => "ended",
        }
    }
}

/// Environment facts captured when modes were last offered.
#[derive(Clone, Debug, Default)]
pub(crate) struct OfferFacts {
    pub(crate) provider_reachable: bool,
    pub(crate) endpoints: Endpoints,
}

/// The attempt currently running for a session, if any.
pub(crate) struct Attempt {
    /// Distinguishes this attempt from any later one on the same session.
    pub(crate) id: u64,
    pub(crate) mode: AuthMode,
    pub(crate) cancel: Cancellation,
    /// Progress of a background device flow; `None` for modes that run inside
    /// `IsAuthenticated`.
    pub(crate) progress: Option<watch::Receiver<FlowStatus>>,
    /// Set while an `IsAuthenticated` call is outstanding.
    pub(crate) busy: bool,
}

pub(crate) struct Session {
    pub(crate) id: String,
    pub(crate) username: String,
    pub(crate) language: String,
    pub(crate) purpose: SessionPurpose,
    pub(crate) state: SessionState,
    pub(crate) selected_mode: Option<AuthMode>,
    pub(crate) step: u32,
    /// The last step answered `next`; the host must request modes again.
    pub(crate) next_step_pending: bool,
    pub(crate) encryption_key: SecretString,
    pub(crate) offered: Vec<AuthModeOffer>,
    pub(crate) facts: OfferFacts,
    pub(crate) attempt: Option<Attempt>,
}

impl Session {
    pub(crate) fn new(
        id: String,
        username: String,
        language: String,
        purpose: SessionPurpose,
        encryption_key: SecretString,
    ) -> Self {
        Self {
            id,
            username,
            language,
            purpose,
            state: SessionState::Created,
            selected_mode: None,
            step: 0,
            next_step_pending: false,
            encryption_key,
            offered: Vec::new(),
            facts: OfferFacts::default(),
            attempt: None,
        }
    }

    pub(crate) fn cancel_attempt(&mut self) {
        if let Some(attempt) = self.attempt.take() {
            attempt.cancel.cancel();
        }
    }

    /// Whether `attempt_id` is still the running attempt.
    pub(crate) fn owns_attempt(&self, attempt_id: u64) -> bool {
        self.attempt.as_ref().is_some_and(|a| a.id == attempt_id)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("username", &self.username)
            .field("language", &self.language)
            .field("purpose", &self.purpose)
            .field("state", &self.state)
            .field("selected_mode", &self.selected_mode)
            .field("step", &self.step)
            .field("encryption_key", &"***")
            .finish_non_exhaustive()
    }
}
