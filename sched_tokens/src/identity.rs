use std::fmt;

/// The logical caller a token represents
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Identity {
    /// A logged-in user whose token arrives with the request's session
    ///
    /// These tokens are never cached; the downstream API is the authority on
    /// whether they are valid.
    UserPassthrough,
    /// The machine identity used for sessions that have not authenticated
    Anonymous,
    /// The development/test harness identity
    DevE2E,
}

impl Identity {
    /// Whether tokens for this identity are acquired and cached locally
    #[inline]
    pub const fn is_cached(self) -> bool {
        !matches!(self, Identity::UserPassthrough)
    }

    /// A short, stable name used in logs and errors
    pub const fn as_str(self) -> &'static str {
        match self {
            Identity::UserPassthrough => "user-passthrough",
            Identity::Anonymous => "anonymous",
            Identity::DevE2E => "dev-e2e",
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
