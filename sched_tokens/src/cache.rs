//! An identity-scoped token cache with single-flight refresh

use std::{
    collections::HashMap,
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard,
    },
};

use futures::future::{BoxFuture, FutureExt, Shared};
use sched_clock::{Clock, System};
use tracing::Instrument;

use crate::{
    sources::AsyncTokenSource, AccessToken, CachedToken, ConfigurationError, Identity,
    TokenCacheError, TokenLifetimeConfig,
};

type FetchOutcome = Result<Arc<CachedToken>, TokenCacheError>;
type InFlight = Shared<BoxFuture<'static, FetchOutcome>>;

#[derive(Default)]
struct Slot {
    token: Option<Arc<CachedToken>>,
    in_flight: Option<(u64, InFlight)>,
}

struct Inner<C> {
    slots: Mutex<HashMap<Identity, Slot>>,
    next_fetch: AtomicU64,
    clock: C,
}

impl<C> Inner<C> {
    fn slots(&self) -> MutexGuard<'_, HashMap<Identity, Slot>> {
        // A panic while holding the lock cannot leave a slot half-written: every
        // write replaces a whole field.
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// A cache holding at most one token per [`Identity`]
///
/// Concurrent requests for an identity whose token is missing or expired
/// share a single upstream fetch. A failed fetch is reported to every waiter
/// and leaves the previous entry in place so that a later call can retry;
/// the cache itself never retries.
///
/// Fetches run on a spawned Tokio task, so dropping one waiter does not
/// cancel the fetch for the others. Calls that need a fetch must therefore be
/// made from within a Tokio runtime.
pub struct TokenCache<C = System> {
    inner: Arc<Inner<C>>,
    lifetimes: Arc<HashMap<Identity, TokenLifetimeConfig>>,
}

impl<C> Clone for TokenCache<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            lifetimes: Arc::clone(&self.lifetimes),
        }
    }
}

impl TokenCache<System> {
    /// Constructs an empty cache using the system clock
    pub fn new() -> Self {
        Self::with_clock(System)
    }
}

impl Default for TokenCache<System> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> TokenCache<C> {
    /// Constructs an empty cache using a custom clock
    ///
    /// Useful for testing purposes
    pub fn with_clock(clock: C) -> Self {
        Self {
            inner: Arc::new(Inner {
                slots: Mutex::new(HashMap::new()),
                next_fetch: AtomicU64::new(0),
                clock,
            }),
            lifetimes: Arc::new(HashMap::new()),
        }
    }

    /// Sets the lifetime policy applied to tokens acquired for `identity`
    ///
    /// Identities without a policy use [`TokenLifetimeConfig::default()`].
    /// Clones made before this call keep their previous policies.
    #[must_use]
    pub fn with_lifetime(mut self, identity: Identity, lifetime: TokenLifetimeConfig) -> Self {
        Arc::make_mut(&mut self.lifetimes).insert(identity, lifetime);
        self
    }

    /// Gets the lifetime policy applied to `identity`
    pub fn lifetime(&self, identity: Identity) -> TokenLifetimeConfig {
        self.lifetimes.get(&identity).copied().unwrap_or_default()
    }

    /// Drops the cached token for `identity`
    ///
    /// An in-flight fetch is unaffected and will still populate the cache.
    pub fn invalidate(&self, identity: Identity) {
        if let Some(slot) = self.inner.slots().get_mut(&identity) {
            if slot.token.take().is_some() {
                tracing::debug!(%identity, "invalidated cached token");
            }
        }
    }
}

impl<C: Clock> TokenCache<C> {
    /// Peeks at the cached token for `identity` without any I/O
    ///
    /// Expired tokens are never returned.
    pub fn cached(&self, identity: Identity) -> Option<Arc<CachedToken>> {
        let now = self.inner.clock.now();
        self.inner
            .slots()
            .get(&identity)
            .and_then(|slot| slot.token.clone())
            .filter(|token| token.is_valid_at(now))
    }
}

impl<C> TokenCache<C>
where
    C: Clock + Send + Sync + 'static,
{
    /// Gets a valid token for `identity`, acquiring one from `source` only
    /// when necessary
    ///
    /// With `force_new`, any cached token is ignored; a fetch already in
    /// flight is joined rather than duplicated.
    pub async fn get<S>(
        &self,
        identity: Identity,
        source: &Arc<S>,
        force_new: bool,
    ) -> Result<AccessToken, TokenCacheError>
    where
        S: AsyncTokenSource + 'static,
    {
        if !identity.is_cached() {
            return Err(TokenCacheError::Configuration {
                identity,
                source: ConfigurationError::NotCacheable { identity },
            });
        }

        let fetch = {
            let mut slots = self.inner.slots();
            let slot = slots.entry(identity).or_default();

            if !force_new {
                let now = self.inner.clock.now();
                if let Some(token) = slot.token.as_ref().filter(|t| t.is_valid_at(now)) {
                    tracing::trace!(
                        %identity,
                        until_expired = token.until_expired_at(now).0,
                        "using cached token"
                    );
                    return Ok(token.value().to_owned());
                }
            }

            match &slot.in_flight {
                Some((_, fetch)) => {
                    tracing::debug!(%identity, "joining in-flight token fetch");
                    fetch.clone()
                }
                None => {
                    source
                        .check_configuration()
                        .map_err(|source| TokenCacheError::Configuration { identity, source })?;

                    tracing::debug!(%identity, force_new, "no usable cached token, fetching");
                    let generation = self.next_generation();
                    let fetch = self.start_fetch(
                        identity,
                        generation,
                        self.lifetime(identity),
                        Arc::clone(source),
                    );
                    slot.in_flight = Some((generation, fetch.clone()));
                    fetch
                }
            }
        };

        fetch.await.map(|token| token.value().to_owned())
    }

    fn next_generation(&self) -> u64 {
        self.inner.next_fetch.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn start_fetch<S>(
        &self,
        identity: Identity,
        generation: u64,
        lifetime: TokenLifetimeConfig,
        source: Arc<S>,
    ) -> InFlight
    where
        S: AsyncTokenSource + 'static,
    {
        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move {
            let guard = InFlightGuard {
                inner: &inner,
                identity,
                generation,
            };

            let outcome = match source.request_token().await {
                Ok(issued) => {
                    let token = Arc::new(lifetime.create_token(issued, inner.clock.now()));
                    tracing::info!(
                        %identity,
                        ttl = token.ttl().0,
                        expiry = token.expiry().0,
                        "cached new token"
                    );
                    inner.slots().entry(identity).or_default().token = Some(Arc::clone(&token));
                    Ok(token)
                }
                Err(error) => {
                    tracing::warn!(
                        %identity,
                        error = (&error as &dyn std::error::Error),
                        "unable to acquire token"
                    );
                    Err(TokenCacheError::upstream(identity, error))
                }
            };

            drop(guard);
            outcome
        }
        .instrument(tracing::Span::current()));

        async move {
            match task.await {
                Ok(outcome) => outcome,
                Err(join_error) => {
                    tracing::error!(%identity, "token fetch task did not complete");
                    Err(TokenCacheError::upstream(identity, join_error))
                }
            }
        }
        .boxed()
        .shared()
    }
}

/// Clears an identity's in-flight marker when its fetch finishes, including
/// when the fetch panics
struct InFlightGuard<'a, C> {
    inner: &'a Inner<C>,
    identity: Identity,
    generation: u64,
}

impl<C> Drop for InFlightGuard<'_, C> {
    fn drop(&mut self) {
        if let Some(slot) = self.inner.slots().get_mut(&self.identity) {
            if matches!(slot.in_flight, Some((g, _)) if g == self.generation) {
                slot.in_flight = None;
            }
        }
    }
}

impl<C: fmt::Debug> fmt::Debug for TokenCache<C> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let slots = self.inner.slots();
        let mut cached: Vec<_> = slots
            .iter()
            .filter(|(_, slot)| slot.token.is_some())
            .map(|(identity, _)| *identity)
            .collect();
        cached.sort();
        let mut in_flight: Vec<_> = slots
            .iter()
            .filter(|(_, slot)| slot.in_flight.is_some())
            .map(|(identity, _)| *identity)
            .collect();
        in_flight.sort();

        f.debug_struct("TokenCache")
            .field("cached", &cached)
            .field("in_flight", &in_flight)
            .field("lifetimes", &*self.lifetimes)
            .field("clock", &self.inner.clock)
            .finish()
    }
}
