use clap::{Arg, Command};

pub const ARG_HOME_BASE_DIR: &str = "home-base-dir";
pub const ARG_CACHE_PATH: &str = "cache-path";
pub const ARG_QR_CODE: &str = "qr-code";
pub const ARG_POLL_WINDOW_SECONDS: &str = "poll-window-seconds";

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_HOME_BASE_DIR)
                .long(ARG_HOME_BASE_DIR)
                .help("Base directory for user home directories")
                .env("OIDC_BROKER_HOME_BASE_DIR")
                .default_value("/home"),
        )
        .arg(
            Arg::new(ARG_CACHE_PATH)
                .long(ARG_CACHE_PATH)
                .help("Directory holding cached tokens and local password hashes")
                .env("OIDC_BROKER_CACHE_PATH")
                .default_value("/var/cache/oidc-broker"),
        )
        .arg(
            Arg::new(ARG_QR_CODE)
                .long(ARG_QR_CODE)
                .help("Offer device authentication with a QR code")
                .env("OIDC_BROKER_QR_CODE")
                .default_value("true")
                .value_parser(clap::value_parser!(bool)),
        )
        .arg(
            Arg::new(ARG_POLL_WINDOW_SECONDS)
                .long(ARG_POLL_WINDOW_SECONDS)
                .help("Seconds one authenticate call waits for device confirmation")
                .env("OIDC_BROKER_POLL_WINDOW_SECONDS")
                .default_value("5")
                .value_parser(clap::value_parser!(u64).range(1..=60)),
        )
}
