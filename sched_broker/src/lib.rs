//! Credential selection for requests proxied to the scheduled-tasks API
//!
//! Every request the web front end forwards to the API needs a bearer token.
//! The [`CredentialBroker`] decides which one:
//!
//! * a signed-in user's own token is forwarded unchanged;
//! * requests without a usable user token get the anonymous machine
//!   identity's token, acquired with the client credentials flow and cached;
//! * automated test sessions can bootstrap with a development/test token via
//!   [`get_config()`][CredentialBroker::get_config], but only when that
//!   identity is explicitly enabled.
//!
//! ```no_run
//! use http::HeaderMap;
//! use sched_broker::{BrokerConfig, CredentialBroker};
//!
//! # async fn proxy() -> Result<(), sched_broker::BrokerError> {
//! let config: BrokerConfig = serde_json::from_str(r#"{
//!     "domain": "tenant.auth0.com",
//!     "audience": "https://api.scheduled-tasks",
//!     "anonymous": { "client_id": "anon", "client_secret": "shh" }
//! }"#).unwrap();
//!
//! let broker = CredentialBroker::new(reqwest::Client::new(), &config);
//!
//! let header = broker.resolve_auth_header(&HeaderMap::new(), None).await?;
//! # let _ = header;
//! # Ok(())
//! # }
//! ```
//!
//! Failures carry a [`FailureKind`] and map onto the HTTP status and JSON
//! body a proxy should answer with.

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

mod broker;
mod config;
mod error;

pub use broker::{CredentialBroker, DevConfig, PublicConfig, ResolvedAuth};
pub use config::{BrokerConfig, DevE2eConfig, IdentityConfig};
pub use error::{BrokerError, FailureKind};
