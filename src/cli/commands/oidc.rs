use clap::{Arg, Command, builder::PossibleValuesParser};

pub const ARG_ISSUER: &str = "issuer";
pub const ARG_CLIENT_ID: &str = "client-id";
pub const ARG_CLIENT_SECRET: &str = "client-secret";
pub const ARG_PROVIDER: &str = "provider";

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_ISSUER)
                .long(ARG_ISSUER)
                .help("OIDC issuer URL, example: https://login.example.com/realms/corp")
                .env("OIDC_BROKER_ISSUER")
                .required(true),
        )
        .arg(
            Arg::new(ARG_CLIENT_ID)
                .long(ARG_CLIENT_ID)
                .help("OAuth2 client identifier registered with the provider")
                .env("OIDC_BROKER_CLIENT_ID")
                .required(true),
        )
        .arg(
            Arg::new(ARG_CLIENT_SECRET)
                .long(ARG_CLIENT_SECRET)
                .help("Client secret, only for confidential clients")
                .env("OIDC_BROKER_CLIENT_SECRET")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_PROVIDER)
                .long(ARG_PROVIDER)
                .help("Provider flavour")
                .env("OIDC_BROKER_PROVIDER")
                .default_value("generic")
                .value_parser(PossibleValuesParser::new(["generic", "msentraid"])),
        )
}
