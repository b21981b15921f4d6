use sched_clock::DurationSecs;
use sched_tokens::{
    sources::oauth2::dto::FetchCredentials, Audience, ClientId, ClientSecret, Subject,
    TokenLifetimeConfig,
};
use serde::Deserialize;

/// Settings consumed by the [`CredentialBroker`][crate::CredentialBroker]
///
/// The broker does not load configuration itself; deserialize this from
/// whatever source the host application uses. Every field has a default so
/// that partial configuration deserializes and is reported when used.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// The identity provider's domain, shared by all identities
    pub domain: Option<String>,
    /// The public client ID of the browser application
    pub webapp_client_id: Option<ClientId>,
    /// The downstream API identifier, shared by all identities
    pub audience: Option<Audience>,
    /// The deployment environment name reported to the browser
    pub environment: String,
    /// Lifetime applied when the authority does not report `expires_in`
    pub default_ttl: DurationSecs,
    /// Whether an upstream failure on the anonymous path is retried once
    /// with a forced refresh
    pub retry_anonymous_once: bool,
    /// Credentials for the anonymous machine identity
    pub anonymous: IdentityConfig,
    /// Settings for the development/test identity
    pub dev_e2e: DevE2eConfig,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            domain: None,
            webapp_client_id: None,
            audience: None,
            environment: "production".to_owned(),
            default_ttl: DurationSecs(3600),
            retry_anonymous_once: true,
            anonymous: IdentityConfig::default(),
            dev_e2e: DevE2eConfig::default(),
        }
    }
}

/// Client credentials for one identity
///
/// `audience` and `domain` fall back to the values shared by the whole
/// [`BrokerConfig`] when not set here.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// The client ID
    pub client_id: Option<ClientId>,
    /// The client secret
    pub client_secret: Option<ClientSecret>,
    /// Overrides the shared audience
    pub audience: Option<Audience>,
    /// Overrides the shared domain
    pub domain: Option<String>,
}

/// Settings for the development/test identity
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct DevE2eConfig {
    /// Enables [`get_config()`][crate::CredentialBroker::get_config]
    pub enabled: bool,
    /// Credentials used to acquire the identity's token
    #[serde(flatten)]
    pub credentials: IdentityConfig,
    /// The subject the test session acts as
    pub subject: Option<Subject>,
    /// The display name the test session uses
    pub display_name: String,
    /// Tokens are re-acquired after this long, even if the authority
    /// reports a longer lifetime
    pub revalidate_after: DurationSecs,
}

impl Default for DevE2eConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            credentials: IdentityConfig::default(),
            subject: None,
            display_name: "Dev E2E Test User".to_owned(),
            revalidate_after: DurationSecs(300),
        }
    }
}

impl BrokerConfig {
    fn credentials_for(&self, identity: &IdentityConfig) -> FetchCredentials {
        FetchCredentials {
            client_id: identity.client_id.clone(),
            client_secret: identity.client_secret.clone(),
            audience: identity.audience.clone().or_else(|| self.audience.clone()),
            domain: identity.domain.clone().or_else(|| self.domain.clone()),
        }
    }

    /// Credentials for the anonymous machine identity
    pub fn anonymous_credentials(&self) -> FetchCredentials {
        self.credentials_for(&self.anonymous)
    }

    /// Credentials for the development/test identity
    pub fn dev_credentials(&self) -> FetchCredentials {
        self.credentials_for(&self.dev_e2e.credentials)
    }

    /// Lifetime policy for anonymous tokens
    pub fn anonymous_lifetime(&self) -> TokenLifetimeConfig {
        TokenLifetimeConfig::new(self.default_ttl)
    }

    /// Lifetime policy for development/test tokens
    pub fn dev_lifetime(&self) -> TokenLifetimeConfig {
        TokenLifetimeConfig::new(self.default_ttl)
            .with_revalidation_window(self.dev_e2e.revalidate_after)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_deserializes_with_defaults() {
        let config: BrokerConfig = serde_json::from_value(serde_json::json!({
            "domain": "tenant.auth0.com",
            "audience": "https://api.scheduled-tasks",
            "anonymous": { "client_id": "anon" },
            "dev_e2e": { "enabled": true, "client_id": "dev", "client_secret": "dev-secret" },
        }))
        .unwrap();

        assert_eq!(config.default_ttl, DurationSecs(3600));
        assert!(config.retry_anonymous_once);
        assert!(config.dev_e2e.enabled);
        assert_eq!(config.dev_e2e.display_name, "Dev E2E Test User");
        assert_eq!(config.dev_e2e.revalidate_after, DurationSecs(300));
        assert_eq!(config.anonymous_credentials().missing_fields(), ["client_secret"]);
        assert!(config.dev_credentials().missing_fields().is_empty());
    }

    #[test]
    fn identity_overrides_shared_audience_and_domain() {
        let config = BrokerConfig {
            domain: Some("shared.auth0.com".to_owned()),
            audience: Some(Audience::from_static("shared")),
            anonymous: IdentityConfig {
                domain: Some("anon.auth0.com".to_owned()),
                ..IdentityConfig::default()
            },
            ..BrokerConfig::default()
        };

        let anonymous = config.anonymous_credentials();
        assert_eq!(anonymous.domain.as_deref(), Some("anon.auth0.com"));
        assert_eq!(anonymous.audience.as_deref().map(|a| a.as_str()), Some("shared"));
    }

    #[test]
    fn dev_lifetime_is_capped_by_revalidation_window() {
        let config = BrokerConfig::default();

        assert_eq!(
            config.dev_lifetime().lifetime_for(Some(DurationSecs(86_400))),
            DurationSecs(300)
        );
        assert_eq!(
            config.anonymous_lifetime().lifetime_for(Some(DurationSecs(86_400))),
            DurationSecs(86_400)
        );
    }
}
