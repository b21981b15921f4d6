use clap::Parser;
use http::HeaderMap;
use sched_broker::{BrokerConfig, CredentialBroker, DevE2eConfig, IdentityConfig};
use sched_clock::DurationSecs;
use sched_tokens::{Audience, ClientId, ClientSecret, Subject};

#[derive(Debug, Parser)]
struct Opts {
    /// The identity provider's domain
    #[arg(long, env = "AUTH0_DOMAIN")]
    domain: String,

    /// The client ID of the browser application
    #[arg(long, env = "AUTH0_WEBAPP_CLIENT_ID")]
    webapp_client_id: Option<ClientId>,

    /// The identifier of the scheduled-tasks API
    #[arg(long, env = "AUTH0_API_IDENTIFIER")]
    audience: Audience,

    /// The deployment environment name
    #[arg(long, env = "APP_ENV", default_value = "development")]
    environment: String,

    /// The anonymous identity's client ID
    #[arg(long, env = "AUTH0_ANON_CLIENT_ID")]
    anon_client_id: Option<ClientId>,

    /// The anonymous identity's client secret
    #[arg(long, env = "AUTH0_ANON_CLIENT_SECRET", hide_env_values = true)]
    anon_client_secret: Option<ClientSecret>,

    /// Enables the development/test identity
    #[arg(long, env = "AUTH0_E2E_DEV_ENABLED")]
    dev_e2e: bool,

    /// The development/test identity's client ID
    #[arg(long, env = "AUTH0_E2E_DEV_CLIENT_ID")]
    dev_client_id: Option<ClientId>,

    /// The development/test identity's client secret
    #[arg(long, env = "AUTH0_E2E_DEV_CLIENT_SECRET", hide_env_values = true)]
    dev_client_secret: Option<ClientSecret>,

    /// The subject a test session acts as
    #[arg(long, env = "AUTH0_E2E_DEV_CLIENT_SUBJECT")]
    dev_subject: Option<Subject>,

    /// Token lifetime, in seconds, when the authority does not report one
    #[arg(long, default_value_t = 3600)]
    default_ttl: u64,
}

impl Opts {
    fn into_config(self) -> BrokerConfig {
        BrokerConfig {
            domain: Some(self.domain),
            webapp_client_id: self.webapp_client_id,
            audience: Some(self.audience),
            environment: self.environment,
            default_ttl: DurationSecs(self.default_ttl),
            anonymous: IdentityConfig {
                client_id: self.anon_client_id,
                client_secret: self.anon_client_secret,
                ..IdentityConfig::default()
            },
            dev_e2e: DevE2eConfig {
                enabled: self.dev_e2e,
                credentials: IdentityConfig {
                    client_id: self.dev_client_id,
                    client_secret: self.dev_client_secret,
                    ..IdentityConfig::default()
                },
                subject: self.dev_subject,
                ..DevE2eConfig::default()
            },
            ..BrokerConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .pretty()
        .with_env_filter(tracing_subscriber::filter::EnvFilter::from_default_env())
        .init();

    let config = Opts::parse().into_config();

    let client = reqwest::Client::builder().https_only(true).build()?;
    let broker = CredentialBroker::new(client, &config);

    tracing::info!(public = ?broker.public_config(), "broker configured");

    match broker.resolve(&HeaderMap::new(), None).await {
        Ok(resolved) => tracing::info!(identity = %resolved.identity, "resolved anonymous header"),
        Err(error) => tracing::error!(
            kind = %error.kind(),
            status = error.status_code().as_u16(),
            body = %error.error_body(),
            "unable to resolve anonymous header"
        ),
    }

    // A second resolution is served from the cache.
    let cached = broker.resolve(&HeaderMap::new(), None).await;
    tracing::debug!(ok = cached.is_ok(), "resolved anonymous header again");

    if broker.dev_e2e_enabled() {
        let dev = broker.get_config().await?;
        tracing::info!(
            token = format_args!("{:#?}", dev.token),
            subject = ?dev.dev_subject,
            "development/test session bootstrap"
        );
    }

    Ok(())
}
