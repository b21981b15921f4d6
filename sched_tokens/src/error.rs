use std::{error, sync::Arc};

use thiserror::Error;

use crate::Identity;

/// Credentials or identity settings that cannot produce a valid token request
#[derive(Clone, Debug, Error)]
pub enum ConfigurationError {
    /// Required credential fields are absent or empty
    #[error("credentials are missing required fields: {}", .missing.join(", "))]
    MissingFields {
        /// The names of the missing fields
        missing: Vec<&'static str>,
    },
    /// The configured domain does not form a usable token endpoint
    #[error("unable to build a token endpoint from domain `{domain}`")]
    InvalidDomain {
        /// The configured domain
        domain: String,
        /// The underlying parse failure
        #[source]
        source: url::ParseError,
    },
    /// The identity's tokens are supplied per request and never cached
    #[error("{identity} tokens are supplied by the caller and are never cached")]
    NotCacheable {
        /// The identity that was requested
        identity: Identity,
    },
}

/// An error returned by the token cache
///
/// Errors are cheap to clone so that every caller waiting on the same
/// upstream fetch receives the same outcome.
#[derive(Clone, Debug, Error)]
pub enum TokenCacheError {
    /// The identity's configuration prevented a token request from being made
    #[error("configuration error for {identity} identity")]
    Configuration {
        /// The identity whose token was requested
        identity: Identity,
        /// The configuration problem
        #[source]
        source: ConfigurationError,
    },
    /// The authority could not be reached or did not return a usable token
    #[error("unable to acquire token for {identity} identity")]
    UpstreamAuth {
        /// The identity whose token was requested
        identity: Identity,
        /// The underlying failure
        #[source]
        source: Arc<dyn error::Error + Send + Sync + 'static>,
    },
}

impl TokenCacheError {
    pub(crate) fn upstream<E>(identity: Identity, source: E) -> Self
    where
        E: error::Error + Send + Sync + 'static,
    {
        Self::UpstreamAuth {
            identity,
            source: Arc::new(source),
        }
    }

    /// The identity whose token was requested
    pub fn identity(&self) -> Identity {
        match self {
            Self::Configuration { identity, .. } | Self::UpstreamAuth { identity, .. } => *identity,
        }
    }
}
