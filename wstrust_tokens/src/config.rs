use aliri_clock::DurationSecs;

/// Settings governing when cached tokens are reused, renewed, or replaced
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetrievalConfig {
    cache_issued_token_in_endpoint: bool,
    imminent_expiry: DurationSecs,
    issue_after_failed_renew: bool,
    cache_key_from_applies_to: bool,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            cache_issued_token_in_endpoint: true,
            imminent_expiry: DurationSecs(10),
            issue_after_failed_renew: true,
            cache_key_from_applies_to: true,
        }
    }
}

impl RetrievalConfig {
    /// Constructs the default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether issued tokens are shared by every message sent to an endpoint
    ///
    /// When disabled, tokens are only reused within the message context that received them.
    /// Defaults to `true`.
    pub fn with_cache_issued_token_in_endpoint(mut self, enabled: bool) -> Self {
        self.cache_issued_token_in_endpoint = enabled;
        self
    }

    /// Sets the window before expiry within which a cached token is renewed
    ///
    /// Defaults to 10 seconds.
    pub fn with_imminent_expiry(mut self, window: DurationSecs) -> Self {
        self.imminent_expiry = window;
        self
    }

    /// Sets whether a new token is issued when renewing a stale token fails
    ///
    /// Defaults to `true`.
    pub fn with_issue_after_failed_renew(mut self, enabled: bool) -> Self {
        self.issue_after_failed_renew = enabled;
        self
    }

    /// Sets whether tokens are cached under the address they apply to
    ///
    /// When disabled, or when no address is known, all tokens share a single cache key.
    /// Defaults to `true`.
    pub fn with_cache_key_from_applies_to(mut self, enabled: bool) -> Self {
        self.cache_key_from_applies_to = enabled;
        self
    }

    /// Whether issued tokens are shared by every message sent to an endpoint
    #[inline]
    pub fn cache_issued_token_in_endpoint(&self) -> bool {
        self.cache_issued_token_in_endpoint
    }

    /// The window before expiry within which a cached token is renewed
    #[inline]
    pub fn imminent_expiry(&self) -> DurationSecs {
        self.imminent_expiry
    }

    /// Whether a new token is issued when renewing a stale token fails
    #[inline]
    pub fn issue_after_failed_renew(&self) -> bool {
        self.issue_after_failed_renew
    }

    /// Whether tokens are cached under the address they apply to
    #[inline]
    pub fn cache_key_from_applies_to(&self) -> bool {
        self.cache_key_from_applies_to
    }
}
