//! OIDC provider adapter.
//!
//! [`OidcClient`] speaks OAuth2 to the issuer. [`Provider`] carries the quirks of
//! one provider family behind the [`ProviderInfo`] capability set and is chosen
//! once, from configuration.

pub mod claims;
mod generic;
mod msentraid;
pub mod oidc;

pub use claims::IdTokenClaims;
pub use oidc::{DeviceAuthorization, DevicePoll, OidcClient};

use std::{fmt, str::FromStr};
use thiserror::Error;

use crate::{
    broker::{AuthMode, Error as BrokerError, ModeFacts, modes},
    groups::GroupInfo,
};

/// Scopes requested from every provider.
pub const BASE_SCOPES: &[&str] = &["openid", "profile", "email"];

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Unreachable(String),
    #[error("unexpected provider response: {0}")]
    Http(String),
    #[error("{0}")]
    InvalidGrant(String),
    #[error("{0}")]
    AccessDenied(String),
    #[error("device code expired")]
    ExpiredToken,
    #[error("{0}")]
    Claims(String),
    #[error("provider advertises no {0} endpoint")]
    MissingEndpoint(&'static str),
    #[error("invalid provider configuration: {0}")]
    Config(String),
}

/// Endpoints advertised by the provider's discovery document.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Endpoints {
    pub token: Option<String>,
    pub device_authorization: Option<String>,
    pub userinfo: Option<String>,
}

/// Capabilities every provider family implements.
pub trait ProviderInfo {
    /// Scopes to request on top of [`BASE_SCOPES`].
    fn additional_scopes(&self) -> &'static [&'static str];

    /// Extra parameters sent with token requests.
    fn auth_options(&self) -> &'static [(&'static str, &'static str)] {
        &[]
    }

    /// Fill in endpoints the provider serves without advertising them.
    fn complete_endpoints(&self, endpoints: Endpoints) -> Endpoints {
        endpoints
    }

    /// Modes to offer for the given facts.
    ///
    /// # Errors
    /// Returns `NoModeAvailable` when nothing can authenticate the user.
    fn current_modes(&self, facts: &ModeFacts<'_>) -> Result<Vec<AuthMode>, BrokerError> {
        modes::decide(facts)
    }

    /// Group memberships carried by a validated ID token.
    fn groups(&self, claims: &IdTokenClaims) -> Vec<GroupInfo>;
}

/// Supported provider families.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Provider {
    #[default]
    Generic,
    MsEntraId,
}

impl Provider {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Generic => "generic",
            Self::MsEntraId => "msentraid",
        }
    }

    /// All scopes to request, base scopes first.
    #[must_use]
    pub fn scopes(self) -> String {
        BASE_SCOPES
            .iter()
            .chain(self.additional_scopes())
            .copied()
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "generic" => Ok(Self::Generic),
            "msentraid" | "entra" | "azure" => Ok(Self::MsEntraId),
            other => Err(Error::Config(format!("unknown provider: {other}"))),
        }
    }
}

impl ProviderInfo for Provider {
    fn additional_scopes(&self) -> &'static [&'static str] {
        match self {
            Self::Generic => generic::ADDITIONAL_SCOPES,
            Self::MsEntraId => msentraid::ADDITIONAL_SCOPES,
        }
    }

    fn complete_endpoints(&self, endpoints: Endpoints) -> Endpoints {
        match self {
            Self::Generic => endpoints,
            Self::MsEntraId => msentraid::complete_endpoints(endpoints),
        }
    }

    fn groups(&self, claims: &IdTokenClaims) -> Vec<GroupInfo> {
        match self {
            Self::Generic => generic::groups(claims),
            Self::MsEntraId => msentraid::groups(claims),
        }
    }
}
