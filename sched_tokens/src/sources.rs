//! Token sources

use crate::{ConfigurationError, IssuedToken};
use async_trait::async_trait;
use std::{convert::Infallible, error};

#[cfg(feature = "oauth2")]
pub mod oauth2;

/// An asynchronous source for tokens
#[async_trait]
pub trait AsyncTokenSource: Send + Sync {
    /// The error type returned in the event that retrieving a token fails
    type Error: error::Error + Send + Sync + 'static;

    /// Checks that the source is able to make a well-formed request
    ///
    /// The cache calls this before starting a fetch so that incomplete
    /// configuration fails fast instead of reaching the authority.
    fn check_configuration(&self) -> Result<(), ConfigurationError> {
        Ok(())
    }

    /// Requests a token from an asynchronous source
    async fn request_token(&self) -> Result<IssuedToken, Self::Error>;
}

/// A token source that always hands out the same token
///
/// Useful in tests and for local development against a permissive API.
#[derive(Clone, Debug)]
pub struct ConstTokenSource(IssuedToken);

impl ConstTokenSource {
    /// Constructs a source handing out `token` with no reported lifetime
    pub fn new(token: impl Into<crate::AccessToken>) -> Self {
        Self(IssuedToken::new(token))
    }
}

#[async_trait]
impl AsyncTokenSource for ConstTokenSource {
    type Error = Infallible;

    async fn request_token(&self) -> Result<IssuedToken, Self::Error> {
        Ok(self.0.clone())
    }
}
