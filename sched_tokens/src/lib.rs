//! Identity-scoped access token caching
//!
//! The web front end talks to the scheduled-tasks API on behalf of several
//! identities. Tokens for the identities the server acquires itself (the
//! anonymous machine identity and the development/test identity) are held in
//! a [`TokenCache`], one per identity, and refreshed only when they are
//! missing or expired.
//!
//! Refreshes are _single-flight_: when several requests find the same
//! identity's token missing at once, one request goes to the authority and
//! every caller shares its outcome.
//!
//! ```
//! use std::sync::Arc;
//!
//! use sched_clock::DurationSecs;
//! use sched_tokens::{
//!     sources::oauth2::{dto::FetchCredentials, ClientCredentialsTokenSource},
//!     Audience, ClientId, ClientSecret, Identity, TokenCache, TokenLifetimeConfig,
//! };
//!
//! let credentials = FetchCredentials {
//!     client_id: Some(ClientId::from_static("anonymous-client")),
//!     client_secret: Some(ClientSecret::from_static("shh")),
//!     audience: Some(Audience::from_static("https://api.example.com")),
//!     domain: Some("tenant.auth0.com".to_owned()),
//! };
//!
//! let source = Arc::new(ClientCredentialsTokenSource::new(
//!     reqwest::Client::new(),
//!     credentials,
//! ));
//!
//! let cache = TokenCache::new().with_lifetime(
//!     Identity::Anonymous,
//!     TokenLifetimeConfig::new(DurationSecs(3600)),
//! );
//!
//! # async fn fetch(cache: TokenCache, source: Arc<ClientCredentialsTokenSource>) {
//! let token = cache.get(Identity::Anonymous, &source, false).await;
//! # }
//! ```
//!
//! # Features
//!
//! * `oauth2` (default): Provides a token source for the OAuth2 _client
//!   credentials_ flow.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

mod braids;
mod cache;
mod error;
mod identity;
pub mod sources;
mod tokens;

pub use braids::*;
pub use cache::TokenCache;
pub use error::{ConfigurationError, TokenCacheError};
pub use identity::Identity;
pub use tokens::{CachedToken, IssuedToken, TokenLifetimeConfig, TokenStatus};
