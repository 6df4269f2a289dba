use crate::{
    cli::{
        actions::{Action, serve::Args},
        commands::{ARG_PORT, broker, oidc},
    },
    provider::Provider,
};
use anyhow::{Context, Result, anyhow};
use secrecy::SecretString;
use std::path::PathBuf;

/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>(ARG_PORT).copied().unwrap_or(8910);

    let issuer = matches
        .get_one::<String>(oidc::ARG_ISSUER)
        .cloned()
        .context("missing required argument: --issuer")?;
    url::Url::parse(&issuer).with_context(|| format!("invalid issuer URL: {issuer}"))?;

    let client_id = matches
        .get_one::<String>(oidc::ARG_CLIENT_ID)
        .cloned()
        .context("missing required argument: --client-id")?;

    let client_secret = matches
        .get_one::<String>(oidc::ARG_CLIENT_SECRET)
        .filter(|secret| !secret.is_empty())
        .cloned()
        .map(SecretString::from);

    let provider = matches
        .get_one::<String>(oidc::ARG_PROVIDER)
        .map_or(Ok(Provider::Generic), |name| name.parse::<Provider>())
        .map_err(|e| anyhow!(e))?;

    let home_base_dir = matches
        .get_one::<String>(broker::ARG_HOME_BASE_DIR)
        .map(PathBuf::from)
        .context("missing argument: --home-base-dir")?;
    let cache_path = matches
        .get_one::<String>(broker::ARG_CACHE_PATH)
        .map(PathBuf::from)
        .context("missing argument: --cache-path")?;
    let qr_code = matches
        .get_one::<bool>(broker::ARG_QR_CODE)
        .copied()
        .unwrap_or(true);
    let poll_window_seconds = matches
        .get_one::<u64>(broker::ARG_POLL_WINDOW_SECONDS)
        .copied()
        .unwrap_or(5);

    Ok(Action::Serve(Args {
        port,
        issuer,
        client_id,
        client_secret,
        provider,
        home_base_dir,
        cache_path,
        qr_code,
        poll_window_seconds,
    }))
}
