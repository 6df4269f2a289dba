//! Error taxonomy for the broker core.
//!
//! Protocol misuse (`UnknownSession`, `WrongState`, `AlreadyAuthenticating`,
//! `InvalidMode`, `Payload`) is always recoverable by retrying correctly.
//! Authentication outcomes (`AuthDenied`, `DeviceFlowExpired`, `ValidationError`,
//! `CacheWriteError`, `Cancelled`) are surfaced to the host as an access value
//! rather than as a call failure.

use thiserror::Error;

use crate::{cache, provider};

#[derive(Clone, Debug, Error)]
pub enum Error {
    #[error("unknown session: {0}")]
    UnknownSession(String),
    #[error("session is in state {actual}, expected {expected}")]
    WrongState {
        expected: &'static str,
        actual: &'static str,
    },
    #[error("an authentication attempt is already in progress")]
    AlreadyAuthenticating,
    #[error("authentication mode {0:?} was not offered")]
    InvalidMode(String),
    #[error("invalid authentication data: {0}")]
    Payload(String),
    #[error("no authentication mode available: {0}")]
    NoModeAvailable(String),
    #[error("authentication denied: {0}")]
    AuthDenied(String),
    #[error("provider unreachable: {0}")]
    ProviderUnreachable(String),
    #[error("device code expired before confirmation")]
    DeviceFlowExpired,
    #[error("could not update the token cache: {0}")]
    CacheWriteError(String),
    #[error("{0}")]
    ValidationError(String),
    #[error("authentication cancelled")]
    Cancelled,
}

impl Error {
    /// Short machine-readable code used by the HTTP adapter.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnknownSession(_) => "unknown_session",
            Self::WrongState { .. } => "wrong_state",
            Self::AlreadyAuthenticating => "already_authenticating",
            Self::InvalidMode(_) => "invalid_mode",
            Self::Payload(_) => "invalid_payload",
            Self::NoModeAvailable(_) => "no_mode_available",
            Self::AuthDenied(_) => "auth_denied",
            Self::ProviderUnreachable(_) => "provider_unreachable",
            Self::DeviceFlowExpired => "device_flow_expired",
            Self::CacheWriteError(_) => "cache_write_error",
            Self::ValidationError(_) => "validation_error",
            Self::Cancelled => "cancelled",
        }
    }
}

impl From<cache::Error> for Error {
    fn from(err: cache::Error) -> Self {
        match err {
            cache::Error::NotFound(user) => {
                Self::AuthDenied(format!("no cached credentials for {user}"))
            }
            cache::Error::NoLocalPassword(user) => {
                Self::AuthDenied(format!("no local password configured for {user}"))
            }
            cache::Error::PasswordMismatch => Self::AuthDenied("invalid password".to_string()),
            // Writers map their failures to `CacheWriteError` themselves.
            other => Self::AuthDenied(format!("cached credentials unusable: {other}")),
        }
    }
}

impl From<provider::Error> for Error {
    fn from(err: provider::Error) -> Self {
        match err {
            provider::Error::Unreachable(msg) | provider::Error::Http(msg) => {
                Self::ProviderUnreachable(msg)
            }
            provider::Error::InvalidGrant(msg) | provider::Error::AccessDenied(msg) => {
                Self::AuthDenied(msg)
            }
            provider::Error::ExpiredToken => Self::DeviceFlowExpired,
            provider::Error::Claims(msg) => Self::AuthDenied(format!("invalid id token: {msg}")),
            provider::Error::MissingEndpoint(endpoint) => {
                Self::NoModeAvailable(format!("provider does not advertise {endpoint}"))
            }
            other => Self::ProviderUnreachable(other.to_string()),
        }
    }
}
