use sched_clock::{DurationSecs, UnixTime};

use crate::{AccessToken, AccessTokenRef};

/// A token as returned by an authority, before the cache stamps it
#[derive(Clone, Debug)]
pub struct IssuedToken {
    access_token: AccessToken,
    expires_in: Option<DurationSecs>,
}

impl IssuedToken {
    /// Constructs an issued token with no authority-reported lifetime
    pub fn new(access_token: impl Into<AccessToken>) -> Self {
        Self {
            access_token: access_token.into(),
            expires_in: None,
        }
    }

    /// Records the lifetime reported by the authority
    pub fn with_expires_in(mut self, expires_in: DurationSecs) -> Self {
        self.expires_in = Some(expires_in);
        self
    }

    /// Gets the access token
    #[inline]
    pub fn access_token(&self) -> &AccessTokenRef {
        &self.access_token
    }

    /// Gets the lifetime reported by the authority, if any
    #[inline]
    pub fn expires_in(&self) -> Option<DurationSecs> {
        self.expires_in
    }
}

/// A token held by the cache along with the time it was acquired
///
/// Values are never mutated in place. A refresh replaces the whole token, so
/// a reader can never observe an access token paired with another token's
/// expiry.
#[derive(Clone, Debug)]
pub struct CachedToken {
    value: AccessToken,
    acquired_at: UnixTime,
    ttl: DurationSecs,
}

/// A cached token's lifecycle status
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenStatus {
    /// The token may be handed out
    Valid,
    /// The token must be replaced before it is used again
    Expired,
}

impl CachedToken {
    /// Gets the access token
    #[inline]
    pub fn value(&self) -> &AccessTokenRef {
        &self.value
    }

    /// Gets the time the token was acquired
    #[inline]
    pub fn acquired_at(&self) -> UnixTime {
        self.acquired_at
    }

    /// Gets how long the token may be used after acquisition
    #[inline]
    pub fn ttl(&self) -> DurationSecs {
        self.ttl
    }

    /// Gets the first instant at which the token is no longer valid
    #[inline]
    pub fn expiry(&self) -> UnixTime {
        self.acquired_at + self.ttl
    }

    /// Gets the token's status as of the provided time
    #[inline]
    pub fn status_at(&self, time: UnixTime) -> TokenStatus {
        if time < self.expiry() {
            TokenStatus::Valid
        } else {
            TokenStatus::Expired
        }
    }

    /// Whether the token may still be handed out at `time`
    #[inline]
    pub fn is_valid_at(&self, time: UnixTime) -> bool {
        self.status_at(time) == TokenStatus::Valid
    }

    /// Gets a duration for how much longer the token would be valid as of the
    /// provided time
    #[inline]
    pub fn until_expired_at(&self, time: UnixTime) -> DurationSecs {
        self.expiry().saturating_since(time)
    }
}

/// Configuration for how long an acquired token is kept
///
/// The lifetime reported by the authority is preferred, falling back to a
/// default when the authority does not report one. A re-validation window,
/// when set, caps the lifetime regardless of what the authority reported.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TokenLifetimeConfig {
    default_lifetime: DurationSecs,
    revalidate_after: Option<DurationSecs>,
}

impl Default for TokenLifetimeConfig {
    /// Default lifetime configuration
    ///
    /// Uses a default lifetime of one hour and no re-validation window.
    fn default() -> Self {
        Self {
            default_lifetime: DurationSecs(3600),
            revalidate_after: None,
        }
    }
}

impl TokenLifetimeConfig {
    /// Constructs a lifetime configuration with the given default lifetime
    pub const fn new(default_lifetime: DurationSecs) -> Self {
        Self {
            default_lifetime,
            revalidate_after: None,
        }
    }

    /// Forces tokens to be re-acquired after `window`, even when the
    /// authority reports a longer lifetime
    pub const fn with_revalidation_window(mut self, window: DurationSecs) -> Self {
        self.revalidate_after = Some(window);
        self
    }

    /// Gets the default lifetime
    #[inline]
    pub fn default_lifetime(&self) -> DurationSecs {
        self.default_lifetime
    }

    /// Gets the re-validation window, if any
    #[inline]
    pub fn revalidation_window(&self) -> Option<DurationSecs> {
        self.revalidate_after
    }

    /// Determines the lifetime to apply given what the authority reported
    pub fn lifetime_for(&self, reported: Option<DurationSecs>) -> DurationSecs {
        let lifetime = reported.unwrap_or(self.default_lifetime);
        match self.revalidate_after {
            Some(window) => lifetime.min(window),
            None => lifetime,
        }
    }

    /// Stamps an issued token as acquired at `now`
    pub fn create_token(&self, issued: IssuedToken, now: UnixTime) -> CachedToken {
        CachedToken {
            ttl: self.lifetime_for(issued.expires_in),
            value: issued.access_token,
            acquired_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_expires_exactly_at_acquired_plus_ttl() {
        let token = TokenLifetimeConfig::default().create_token(
            IssuedToken::new("abc").with_expires_in(DurationSecs(60)),
            UnixTime(1000),
        );

        assert!(token.is_valid_at(UnixTime(1059)));
        assert_eq!(token.status_at(UnixTime(1060)), TokenStatus::Expired);
        assert_eq!(token.until_expired_at(UnixTime(1030)), DurationSecs(30));
        assert_eq!(token.until_expired_at(UnixTime(2000)), DurationSecs(0));
    }

    #[test]
    fn default_lifetime_applies_without_reported_expiry() {
        let config = TokenLifetimeConfig::new(DurationSecs(120));

        assert_eq!(config.lifetime_for(None), DurationSecs(120));
        assert_eq!(
            config.lifetime_for(Some(DurationSecs(30))),
            DurationSecs(30)
        );
    }

    #[test]
    fn revalidation_window_caps_long_upstream_lifetimes() {
        let config =
            TokenLifetimeConfig::new(DurationSecs(3600)).with_revalidation_window(DurationSecs(300));

        assert_eq!(
            config.lifetime_for(Some(DurationSecs(86_400))),
            DurationSecs(300)
        );
        assert_eq!(config.lifetime_for(None), DurationSecs(300));
        assert_eq!(
            config.lifetime_for(Some(DurationSecs(60))),
            DurationSecs(60)
        );
    }
}
