use std::{error::Error as _, fmt};

use http::StatusCode;
use sched_tokens::{Identity, TokenCacheError};
use thiserror::Error;

/// The class of a broker failure
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Missing or invalid credential settings for an identity
    ConfigurationError,
    /// The authority was unreachable or returned an unusable response
    UpstreamAuthError,
    /// A feature was invoked while its enabling flag is off
    FeatureDisabled,
    /// A token could not be expressed as an HTTP header value
    InvalidCredential,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ConfigurationError => "ConfigurationError",
            Self::UpstreamAuthError => "UpstreamAuthError",
            Self::FeatureDisabled => "FeatureDisabled",
            Self::InvalidCredential => "InvalidCredential",
        })
    }
}

/// An error resolving credentials for an outbound request
#[derive(Clone, Debug, Error)]
pub enum BrokerError {
    /// The token cache could not produce a token
    #[error(transparent)]
    Token(#[from] TokenCacheError),
    /// The named feature is not enabled
    #[error("{feature} is not enabled")]
    FeatureDisabled {
        /// The feature that was invoked
        feature: &'static str,
    },
    /// The token contains bytes that are not allowed in a header
    #[error("{identity} token cannot be used as an authorization header")]
    InvalidCredential {
        /// The identity the token belongs to
        identity: Identity,
    },
}

impl BrokerError {
    /// Classifies the error
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Token(TokenCacheError::Configuration { .. }) => FailureKind::ConfigurationError,
            Self::Token(TokenCacheError::UpstreamAuth { .. }) => FailureKind::UpstreamAuthError,
            Self::FeatureDisabled { .. } => FailureKind::FeatureDisabled,
            Self::InvalidCredential { .. } => FailureKind::InvalidCredential,
        }
    }

    /// The status a proxied request should fail with
    pub fn status_code(&self) -> StatusCode {
        match self.kind() {
            FailureKind::ConfigurationError => StatusCode::INTERNAL_SERVER_ERROR,
            FailureKind::UpstreamAuthError => StatusCode::BAD_GATEWAY,
            FailureKind::FeatureDisabled => StatusCode::NOT_FOUND,
            FailureKind::InvalidCredential => StatusCode::BAD_REQUEST,
        }
    }

    /// A JSON body of the form `{"error": "..."}` describing the error and
    /// its causes
    pub fn error_body(&self) -> serde_json::Value {
        let mut message = self.to_string();
        let mut source = self.source();
        while let Some(cause) = source {
            message.push_str(": ");
            message.push_str(&cause.to_string());
            source = cause.source();
        }
        serde_json::json!({ "error": message })
    }
}
