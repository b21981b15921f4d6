use std::{fmt, sync::Arc};

use bytes::{BufMut, BytesMut};
use http::{header, HeaderMap, HeaderValue};
use sched_clock::{Clock, System};
use sched_tokens::{
    sources::oauth2::ClientCredentialsTokenSource, AccessToken, Audience, ClientId, Identity,
    Subject, TokenCache, TokenCacheError,
};
use serde::Serialize;

use crate::{BrokerConfig, BrokerError};

/// Values a browser session reports when it has no token
const SESSION_PLACEHOLDERS: &[&str] = &["undefined", "null"];

/// Decides which bearer token accompanies each outbound request
///
/// Construct one broker at start-up and share it (it is cheap to clone)
/// with every request handler. Tokens for the anonymous and development/test
/// identities are cached independently; a user's own token is passed through
/// untouched and never cached.
pub struct CredentialBroker<C = System> {
    cache: TokenCache<C>,
    anonymous: Arc<ClientCredentialsTokenSource>,
    dev: Option<Arc<DevIdentity>>,
    public: Arc<PublicConfig>,
    retry_anonymous_once: bool,
}

struct DevIdentity {
    source: Arc<ClientCredentialsTokenSource>,
    subject: Option<Subject>,
    display_name: String,
}

/// The authorization chosen for a request
#[derive(Clone, Debug)]
pub struct ResolvedAuth {
    /// The identity the header represents
    pub identity: Identity,
    /// The `Authorization` header value, marked sensitive
    pub header: HeaderValue,
}

/// Settings the browser application needs to start an authentication flow
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicConfig {
    /// The identity provider's domain
    pub domain: Option<String>,
    /// The browser application's client ID
    pub client_id: Option<ClientId>,
    /// The downstream API identifier
    pub audience: Option<Audience>,
    /// The deployment environment name
    pub environment: String,
}

/// Bootstrap data for an automated test session
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DevConfig {
    /// The public settings
    #[serde(flatten)]
    pub public: PublicConfig,
    /// A token for the development/test identity
    pub token: AccessToken,
    /// The subject the session acts as
    pub dev_subject: Option<Subject>,
    /// The display name the session uses
    #[serde(rename = "devDisplayname")]
    pub dev_display_name: String,
}

impl CredentialBroker<System> {
    /// Constructs a broker from configuration using the system clock
    ///
    /// Incomplete credentials are not rejected here. They are reported as a
    /// configuration error the first time a token for that identity is
    /// needed.
    pub fn new(client: reqwest::Client, config: &BrokerConfig) -> Self {
        Self::with_clock(client, config, System)
    }
}

impl<C> CredentialBroker<C> {
    /// Constructs a broker using a custom clock
    ///
    /// Useful for testing purposes
    pub fn with_clock(client: reqwest::Client, config: &BrokerConfig, clock: C) -> Self {
        let cache = TokenCache::with_clock(clock)
            .with_lifetime(Identity::Anonymous, config.anonymous_lifetime())
            .with_lifetime(Identity::DevE2E, config.dev_lifetime());

        let anonymous = Arc::new(ClientCredentialsTokenSource::new(
            client.clone(),
            config.anonymous_credentials(),
        ));

        let dev = config.dev_e2e.enabled.then(|| {
            Arc::new(DevIdentity {
                source: Arc::new(ClientCredentialsTokenSource::new(
                    client,
                    config.dev_credentials(),
                )),
                subject: config.dev_e2e.subject.clone(),
                display_name: config.dev_e2e.display_name.clone(),
            })
        });

        let public = Arc::new(PublicConfig {
            domain: config.domain.clone(),
            client_id: config.webapp_client_id.clone(),
            audience: config.audience.clone(),
            environment: config.environment.clone(),
        });

        Self {
            cache,
            anonymous,
            dev,
            public,
            retry_anonymous_once: config.retry_anonymous_once,
        }
    }

    /// The cache holding the anonymous and development/test tokens
    pub fn cache(&self) -> &TokenCache<C> {
        &self.cache
    }

    /// Whether the development/test identity is enabled
    pub fn dev_e2e_enabled(&self) -> bool {
        self.dev.is_some()
    }

    /// Settings the browser application needs, without any token
    pub fn public_config(&self) -> &PublicConfig {
        &self.public
    }
}

impl<C> CredentialBroker<C>
where
    C: Clock + Send + Sync + 'static,
{
    /// Resolves the `Authorization` header value for an outbound request
    ///
    /// See [`resolve()`][Self::resolve].
    pub async fn resolve_auth_header(
        &self,
        existing_headers: &HeaderMap,
        session_token: Option<&str>,
    ) -> Result<HeaderValue, BrokerError> {
        Ok(self.resolve(existing_headers, session_token).await?.header)
    }

    /// Chooses the identity and token for an outbound request
    ///
    /// A usable `session_token` is sent verbatim. Otherwise an existing
    /// `Authorization` header is kept, unless it only carries a placeholder
    /// left by an absent session. Everything else falls back to the
    /// anonymous identity.
    pub async fn resolve(
        &self,
        existing_headers: &HeaderMap,
        session_token: Option<&str>,
    ) -> Result<ResolvedAuth, BrokerError> {
        if let Some(token) = session_token.filter(|t| is_usable_token(t)) {
            tracing::trace!("using session token");
            return Ok(ResolvedAuth {
                identity: Identity::UserPassthrough,
                header: bearer(Identity::UserPassthrough, token)?,
            });
        }

        if let Some(existing) = existing_headers
            .get(header::AUTHORIZATION)
            .filter(|value| is_usable_header(value))
        {
            tracing::trace!("keeping existing authorization header");
            let mut header = existing.clone();
            header.set_sensitive(true);
            return Ok(ResolvedAuth {
                identity: Identity::UserPassthrough,
                header,
            });
        }

        tracing::trace!("no user credentials present, using anonymous identity");
        let token = self.anonymous_token().await?;
        Ok(ResolvedAuth {
            identity: Identity::Anonymous,
            header: bearer(Identity::Anonymous, token.as_str())?,
        })
    }

    /// Gets a token for the anonymous identity
    ///
    /// If acquiring the token fails upstream and retries are enabled, one
    /// more attempt is made with a forced refresh.
    pub async fn anonymous_token(&self) -> Result<AccessToken, BrokerError> {
        match self.cache.get(Identity::Anonymous, &self.anonymous, false).await {
            Err(TokenCacheError::UpstreamAuth { .. }) if self.retry_anonymous_once => {
                tracing::debug!("retrying anonymous token acquisition with a forced refresh");
                Ok(self.refresh_anonymous().await?)
            }
            result => Ok(result?),
        }
    }

    /// Acquires a new anonymous token, replacing any cached one
    ///
    /// Used when the downstream API rejects the cached token.
    pub async fn refresh_anonymous(&self) -> Result<AccessToken, BrokerError> {
        Ok(self
            .cache
            .get(Identity::Anonymous, &self.anonymous, true)
            .await?)
    }

    /// Acquires a new anonymous token and formats it as an `Authorization`
    /// header value
    pub async fn refresh_anonymous_header(&self) -> Result<HeaderValue, BrokerError> {
        let token = self.refresh_anonymous().await?;
        bearer(Identity::Anonymous, token.as_str())
    }

    /// Bootstraps an automated test session with a development/test token
    ///
    /// Fails with [`FeatureDisabled`][crate::FailureKind::FeatureDisabled]
    /// and makes no request when the development/test identity is not
    /// enabled.
    pub async fn get_config(&self) -> Result<DevConfig, BrokerError> {
        let dev = match &self.dev {
            Some(dev) => dev,
            None => {
                tracing::error!("development/test identity requested while it is disabled");
                return Err(BrokerError::FeatureDisabled {
                    feature: "dev/test identity",
                });
            }
        };

        let token = self.cache.get(Identity::DevE2E, &dev.source, false).await?;

        Ok(DevConfig {
            public: (*self.public).clone(),
            token,
            dev_subject: dev.subject.clone(),
            dev_display_name: dev.display_name.clone(),
        })
    }
}

impl<C> Clone for CredentialBroker<C> {
    fn clone(&self) -> Self {
        Self {
            cache: self.cache.clone(),
            anonymous: Arc::clone(&self.anonymous),
            dev: self.dev.clone(),
            public: Arc::clone(&self.public),
            retry_anonymous_once: self.retry_anonymous_once,
        }
    }
}

impl<C: fmt::Debug> fmt::Debug for CredentialBroker<C> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("CredentialBroker")
            .field("cache", &self.cache)
            .field("anonymous", &self.anonymous)
            .field("dev_e2e_enabled", &self.dev.is_some())
            .field("public", &self.public)
            .field("retry_anonymous_once", &self.retry_anonymous_once)
            .finish()
    }
}

fn is_usable_token(token: &str) -> bool {
    let token = token.trim();
    !token.is_empty() && !SESSION_PLACEHOLDERS.contains(&token)
}

fn is_usable_header(value: &HeaderValue) -> bool {
    let value = match value.to_str() {
        Ok(value) => value.trim(),
        // Opaque bytes are forwarded as-is; only placeholders are replaced.
        Err(_) => return !value.is_empty(),
    };

    match value.split_once(' ') {
        Some((scheme, credentials)) if scheme.eq_ignore_ascii_case("bearer") => {
            is_usable_token(credentials)
        }
        _ => !value.is_empty() && !value.eq_ignore_ascii_case("bearer"),
    }
}

fn bearer(identity: Identity, token: &str) -> Result<HeaderValue, BrokerError> {
    let mut header_value = BytesMut::with_capacity(token.len() + 7);
    header_value.put_slice(b"Bearer ");
    header_value.put_slice(token.as_bytes());
    let mut value = HeaderValue::from_maybe_shared(header_value.freeze())
        .map_err(|_| BrokerError::InvalidCredential { identity })?;
    value.set_sensitive(true);
    Ok(value)
}
