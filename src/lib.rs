//! # OIDC Broker
//!
//! `oidc-broker` lets a local login host authenticate users against an
//! OpenID Connect provider, and keeps them able to log in when the provider
//! cannot be reached.
//!
//! The host drives one session per login attempt:
//!
//! 1. `NewSession` returns a session id and a key for encrypting secrets.
//! 2. `GetAuthenticationModes` lists the modes usable right now (password,
//!    device code, device code with QR, new local password).
//! 3. `SelectAuthenticationMode` returns the layout to render.
//! 4. `IsAuthenticated` submits encrypted data and answers `granted`,
//!    `denied`, `cancelled`, `authenticating` (device polling) or `next`
//!    (another step is required).
//! 5. `CancelIsAuthenticated` and `EndSession` interrupt and forget.
//!
//! ## Offline login
//!
//! A successful online login stores the provider token together with an
//! Argon2id hash of a local password in [`cache::TokenCache`]. When the
//! provider is unreachable only the password mode is offered, and it is
//! checked against that hash without network access.
//!
//! The [`broker::Broker`] holds all of this; [`api`] exposes it over HTTP on
//! the loopback interface.

pub mod api;
pub mod broker;
pub mod cache;
pub mod cli;
pub mod groups;
pub mod provider;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
