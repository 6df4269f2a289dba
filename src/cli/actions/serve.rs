use crate::{
    api,
    broker::{Broker, Config},
    provider::Provider,
};
use anyhow::Result;
use secrecy::SecretString;
use std::{path::PathBuf, sync::Arc, time::Duration};
use tracing::info;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub issuer: String,
    pub client_id: String,
    pub client_secret: Option<SecretString>,
    pub provider: Provider,
    pub home_base_dir: PathBuf,
    pub cache_path: PathBuf,
    pub qr_code: bool,
    pub poll_window_seconds: u64,
}

impl Args {
    fn config(self) -> Config {
        Config::new(self.issuer, self.client_id)
            .with_client_secret(self.client_secret)
            .with_provider(self.provider)
            .with_home_base_dir(self.home_base_dir)
            .with_cache_path(self.cache_path)
            .with_qr_code(self.qr_code)
            .with_poll_window(Duration::from_secs(self.poll_window_seconds))
    }
}

/// Execute the serve action.
/// # Errors
/// Returns an error if the broker cannot be built or the listener fails.
pub async fn execute(args: Args) -> Result<()> {
    let port = args.port;
    let config = args.config();
    info!(
        issuer = config.issuer(),
        provider = %config.provider(),
        cache_path = %config.cache_path().display(),
        qr_code = config.qr_code(),
        "starting broker"
    );

    let broker = Arc::new(Broker::new(config)?);
    api::new(port, broker).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_map_onto_config() {
        let args = Args {
            port: 8910,
            issuer: "https://idp.example.com".to_string(),
            client_id: "workstation".to_string(),
            client_secret: None,
            provider: Provider::MsEntraId,
            home_base_dir: PathBuf::from("/srv/home"),
            cache_path: PathBuf::from("/tmp/cache"),
            qr_code: false,
            poll_window_seconds: 2,
        };
        let config = args.config();
        assert_eq!(config.client_id(), "workstation");
        assert_eq!(config.provider(), Provider::MsEntraId);
        assert_eq!(config.home_base_dir(), &PathBuf::from("/srv/home"));
        assert!(!config.qr_code());
        assert_eq!(config.poll_window(), Duration::from_secs(2));
    }
}
