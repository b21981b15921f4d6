//! Middleware to attach broker-chosen credentials to proxied requests
//!
//! When using [`ClientWithMiddleware`](reqwest_middleware::ClientWithMiddleware),
//! include the [`BrokerAuthMiddleware`] in the middleware stack so that every
//! request forwarded to the scheduled-tasks API carries the bearer token the
//! [`CredentialBroker`] selects for it.
//!
//! A signed-in user's token is supplied per request as a [`SessionToken`]
//! extension. Requests without one keep any `Authorization` header they
//! already carry, and fall back to the anonymous identity otherwise.
//!
//! ```
//! use reqwest::{Client, Url};
//! use reqwest_middleware::ClientBuilder;
//! use sched_broker::{BrokerConfig, CredentialBroker};
//! use sched_reqwest::{BrokerAuthMiddleware, SessionToken};
//!
//! # #[tokio::main(flavor = "current_thread")] async fn main() {
//! let broker = CredentialBroker::new(Client::new(), &BrokerConfig::default());
//! let api_base: Url = "https://api.scheduled-tasks.test".parse().unwrap();
//!
//! let client = ClientBuilder::new(Client::default())
//!     .with(BrokerAuthMiddleware::new(broker, &api_base))
//!     .build();
//!
//! let req = client
//!     .get(api_base.join("/tasks").unwrap())
//!     .with_extension(SessionToken::new("user-token"));
//! # async move { req
//!     .send()
//!     .await
//!     .unwrap();
//! # };
//! # }
//! ```
//!
//! By default only requests to the API's origin are touched. Provide a
//! custom predicate with
//! [`with_predicate()`][BrokerAuthMiddleware::with_predicate] to change
//! that.

#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

use std::fmt;

use http::{header, Extensions, StatusCode};
use predicates::{reflection, Predicate};
use reqwest::{Request, Response, Url};
use reqwest_middleware::{Error, Middleware, Next, Result};
use sched_broker::CredentialBroker;
use sched_clock::{Clock, System};
use sched_tokens::{AccessToken, Identity};

/// A signed-in user's access token, attached to a request as an extension
#[derive(Clone, Debug)]
pub struct SessionToken(pub AccessToken);

impl SessionToken {
    /// Wraps a user's access token
    pub fn new(token: impl Into<AccessToken>) -> Self {
        Self(token.into())
    }
}

/// A middleware that injects the broker's chosen credentials into outgoing
/// requests
#[derive(Clone, Debug)]
pub struct BrokerAuthMiddleware<P, C = System> {
    broker: CredentialBroker<C>,
    predicate: P,
    replay_unauthorized: bool,
}

impl<C> BrokerAuthMiddleware<DownstreamOrigin, C> {
    /// Construct a new middleware from a broker
    ///
    /// By default, this middleware only handles requests sent to the same
    /// origin as `api_base`, and replays a request once with a fresh
    /// anonymous token if the API rejects the cached one.
    pub fn new(broker: CredentialBroker<C>, api_base: &Url) -> Self {
        Self {
            broker,
            predicate: DownstreamOrigin::new(api_base),
            replay_unauthorized: true,
        }
    }
}

impl<P, C> BrokerAuthMiddleware<P, C> {
    /// Replaces the default predicate with a custom predicate
    pub fn with_predicate<Q>(self, predicate: Q) -> BrokerAuthMiddleware<Q, C> {
        BrokerAuthMiddleware {
            broker: self.broker,
            predicate,
            replay_unauthorized: self.replay_unauthorized,
        }
    }

    /// Sets whether a `401 Unauthorized` answer to a request sent with the
    /// anonymous token triggers a refresh and a single replay
    pub fn with_unauthorized_replay(mut self, enabled: bool) -> Self {
        self.replay_unauthorized = enabled;
        self
    }

    /// The broker used to select credentials
    pub fn broker(&self) -> &CredentialBroker<C> {
        &self.broker
    }
}

impl<P, C> BrokerAuthMiddleware<P, C>
where
    C: Clock + Send + Sync + 'static,
{
    fn trace_anonymous_token(&self) {
        if let Some(token) = self.broker.cache().cached(Identity::Anonymous) {
            tracing::trace!(
                token.acquired = token.acquired_at().0,
                token.ttl = token.ttl().0,
                token.expiry = token.expiry().0,
                "attaching anonymous access token"
            );
        }
    }
}

#[async_trait::async_trait]
impl<P, C> Middleware for BrokerAuthMiddleware<P, C>
where
    P: Predicate<Request> + Send + Sync + 'static,
    C: Clock + Send + Sync + 'static,
{
    async fn handle(
        &self,
        mut req: Request,
        extensions: &mut Extensions,
        next: Next<'_>,
    ) -> Result<Response> {
        if !self.predicate.eval(&req) {
            return next.run(req, extensions).await;
        }

        let session_token = extensions.get::<SessionToken>().cloned();
        let resolved = self
            .broker
            .resolve(
                req.headers(),
                session_token.as_ref().map(|token| token.0.as_str()),
            )
            .await
            .map_err(|error| {
                let source: &dyn std::error::Error = &error;
                tracing::warn!(
                    error = source,
                    kind = %error.kind(),
                    "unable to resolve credentials for request"
                );
                Error::middleware(error)
            })?;

        let anonymous = resolved.identity == Identity::Anonymous;
        if anonymous && tracing::enabled!(tracing::Level::TRACE) {
            self.trace_anonymous_token();
        }

        req.headers_mut()
            .insert(header::AUTHORIZATION, resolved.header);

        if !(anonymous && self.replay_unauthorized) {
            return next.run(req, extensions).await;
        }

        let replay = req.try_clone();
        let resp = next.clone().run(req, extensions).await?;

        if resp.status() != StatusCode::UNAUTHORIZED {
            return Ok(resp);
        }

        let mut replay = match replay {
            Some(replay) => replay,
            None => {
                tracing::debug!("anonymous token rejected, but the request body cannot be replayed");
                return Ok(resp);
            }
        };

        tracing::debug!("anonymous token rejected, replaying request with a new token");
        let header = self
            .broker
            .refresh_anonymous_header()
            .await
            .map_err(Error::middleware)?;
        replay.headers_mut().insert(header::AUTHORIZATION, header);

        next.run(replay, extensions).await
    }
}

/// Only attach credentials if the request is being sent to the given origin
///
/// Scheme, host and port must all match.
#[derive(Clone, Debug)]
pub struct DownstreamOrigin {
    origin: url::Origin,
}

impl DownstreamOrigin {
    /// Construct a new predicate from the API's base URL
    pub fn new(api_base: &Url) -> Self {
        Self {
            origin: api_base.origin(),
        }
    }
}

impl Predicate<Request> for DownstreamOrigin {
    #[inline]
    fn eval(&self, req: &Request) -> bool {
        req.url().origin() == self.origin
    }

    fn find_case(&self, expected: bool, req: &Request) -> Option<reflection::Case<'_>> {
        let result = self.eval(req);
        if result != expected {
            Some(
                reflection::Case::new(Some(self), result).add_product(reflection::Product::new(
                    "origin",
                    req.url().origin().ascii_serialization(),
                )),
            )
        } else {
            None
        }
    }
}

impl reflection::PredicateReflection for DownstreamOrigin {}
impl fmt::Display for DownstreamOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("origin == ")?;
        f.write_str(&self.origin.ascii_serialization())
    }
}
