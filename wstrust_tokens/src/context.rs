use wstrust::{CacheKey, SecurityToken, TokenId};

/// State scoped to a single outbound message
///
/// Tokens that may only be used once are kept here rather than in the shared caches, so they
/// are only reused while the same context is in play. The token is held together with the
/// cache key and delegated identities it was obtained for, and is only handed back to requests
/// made under that same scope.
#[derive(Clone, Debug, Default)]
pub struct MessageContext {
    endpoint_address: Option<String>,
    addressing_namespace: Option<String>,
    token: Option<(SecurityToken, TokenScope)>,
}

/// The cache key and delegated identities a token was obtained for
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct TokenScope {
    pub(crate) cache_key: CacheKey,
    pub(crate) delegated: bool,
    pub(crate) delegation_ids: Vec<TokenId>,
}

impl TokenScope {
    /// Whether a token obtained under this scope may be reused for `request`
    ///
    /// A delegated identity that cannot be named never matches.
    fn admits(&self, request: &TokenScope) -> bool {
        self == request && !(request.delegated && request.delegation_ids.is_empty())
    }
}

impl MessageContext {
    /// Constructs an empty message context
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the address of the endpoint the message is sent to
    ///
    /// Used as the `AppliesTo` address when the request does not name one.
    pub fn with_endpoint_address(mut self, address: impl Into<String>) -> Self {
        self.endpoint_address = Some(address.into());
        self
    }

    /// Sets the WS-Addressing namespace used by the message
    pub fn with_addressing_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.addressing_namespace = Some(namespace.into());
        self
    }

    /// The address of the endpoint the message is sent to
    #[inline]
    pub fn endpoint_address(&self) -> Option<&str> {
        self.endpoint_address.as_deref()
    }

    /// The WS-Addressing namespace used by the message
    #[inline]
    pub fn addressing_namespace(&self) -> Option<&str> {
        self.addressing_namespace.as_deref()
    }

    /// The token obtained for this message, if any
    #[inline]
    pub fn token(&self) -> Option<&SecurityToken> {
        self.token.as_ref().map(|(token, _)| token)
    }

    /// Removes and returns the token obtained for this message
    pub fn take_token(&mut self) -> Option<SecurityToken> {
        self.token.take().map(|(token, _)| token)
    }

    pub(crate) fn scoped_token(&self, scope: &TokenScope) -> Option<&SecurityToken> {
        match &self.token {
            Some((token, held)) if held.admits(scope) => Some(token),
            _ => None,
        }
    }

    pub(crate) fn set_token(&mut self, token: SecurityToken, scope: TokenScope) {
        self.token = Some((token, scope));
    }
}
