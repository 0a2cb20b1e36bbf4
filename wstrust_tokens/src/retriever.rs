use std::{collections::HashMap, error, fmt, sync::Arc};

use aliri_clock::{Clock, System};
use arc_swap::ArcSwap;
use thiserror::Error;
use wstrust::{
    delegation::{delegation_id, DelegationContext, DelegationToken},
    xml::XmlElement,
    CacheKey, SecurityToken, StsClient, StsSession, TokenId, TokenRequestParams, TokenStatus,
    TrustError,
};

use crate::{context::TokenScope, stores::TokenStore, MessageContext, RetrievalConfig};

/// The cache key shared by requests without a known `AppliesTo` address
pub const DEFAULT_CACHE_KEY: &str = "wstrust.default-cache-key";

/// An error raised while retrieving a token
#[derive(Debug, Error)]
pub enum RetrievalError {
    /// A round-trip with the token service failed
    #[error("token request failed")]
    Trust(#[from] TrustError),
    /// The token store failed
    #[error("token store failed")]
    Store(#[source] Box<dyn error::Error + Send + Sync + 'static>),
    /// A stale token could not be renewed, and reissuing after a failed renewal is disabled
    #[error("unable to renew token `{token_id}`")]
    RenewFailed {
        /// The identifier of the stale token
        token_id: TokenId,
        /// The reason renewal failed
        #[source]
        source: TrustError,
    },
}

/// Decides whether to reuse, renew, or issue a token for each request
///
/// Tokens for requests without delegation are kept in an endpoint slot under the request's
/// cache key. Tokens issued on behalf of, or acting as, another identity are found through an
/// association between that identity and the issued token. Both live in the token store.
pub struct TokenRetriever<C = System> {
    client: Arc<StsClient>,
    issuer_clients: HashMap<String, Arc<StsClient>>,
    store: Arc<dyn TokenStore>,
    config: RetrievalConfig,
    endpoint_tokens: ArcSwap<HashMap<CacheKey, TokenId>>,
    clock: C,
}

impl TokenRetriever<System> {
    /// Constructs a retriever using `client` for requests and `store` for caching
    pub fn new(client: Arc<StsClient>, store: Arc<dyn TokenStore>) -> Self {
        Self {
            client,
            issuer_clients: HashMap::new(),
            store,
            config: RetrievalConfig::default(),
            endpoint_tokens: ArcSwap::default(),
            clock: System,
        }
    }
}

impl<C> TokenRetriever<C> {
    /// Sets the retrieval configuration
    pub fn with_config(mut self, config: RetrievalConfig) -> Self {
        self.config = config;
        self
    }

    /// Routes requests naming `address` as their issuer to `client`
    pub fn with_issuer_client(mut self, address: impl Into<String>, client: Arc<StsClient>) -> Self {
        self.issuer_clients.insert(address.into(), client);
        self
    }

    /// Sets a custom clock to be used
    ///
    /// Useful for testing purposes
    pub fn with_clock<D>(self, clock: D) -> TokenRetriever<D> {
        TokenRetriever {
            client: self.client,
            issuer_clients: self.issuer_clients,
            store: self.store,
            config: self.config,
            endpoint_tokens: self.endpoint_tokens,
            clock,
        }
    }

    /// The retrieval configuration
    #[inline]
    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// The token store
    #[inline]
    pub fn store(&self) -> &dyn TokenStore {
        &*self.store
    }
}

impl<C> fmt::Debug for TokenRetriever<C>
where
    C: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TokenRetriever")
            .field("client", &self.client)
            .field(
                "issuer_clients",
                &self.issuer_clients.keys().collect::<Vec<_>>(),
            )
            .field("config", &self.config)
            .field("endpoint_tokens", &*self.endpoint_tokens.load_full())
            .field("clock", &self.clock)
            .finish()
    }
}

impl<C: Clock> TokenRetriever<C> {
    /// Gets a token for the request, reusing or renewing a cached token when possible
    ///
    /// When no `AppliesTo` address is given, the endpoint address of `context` is used.
    #[tracing::instrument(
        err,
        skip_all,
        fields(applies_to = tracing::field::Empty, delegated = params.is_delegated()),
    )]
    pub async fn retrieve(
        &self,
        params: &TokenRequestParams,
        context: &mut MessageContext,
    ) -> Result<SecurityToken, RetrievalError> {
        let client = self.client_for(params);

        let applies_to = params
            .applies_to
            .clone()
            .or_else(|| context.endpoint_address().map(String::from));
        if let Some(address) = &applies_to {
            tracing::Span::current().record("applies_to", address.as_str());
        }
        let cache_key = self.cache_key(client, applies_to.as_deref());

        let delegation_context = DelegationContext {
            applies_to: applies_to.clone(),
            issuer_address: client.config().location().map(String::from),
        };
        let on_behalf_of = resolve_delegation(params.on_behalf_of.as_ref(), &delegation_context).await?;
        let act_as = resolve_delegation(params.act_as.as_ref(), &delegation_context).await?;
        let delegated = on_behalf_of.is_some() || act_as.is_some();
        let delegation_ids: Vec<TokenId> = on_behalf_of
            .iter()
            .chain(act_as.iter())
            .filter_map(delegation_id)
            .collect();

        let mut request = params.clone();
        request.applies_to = applies_to;
        request.on_behalf_of = on_behalf_of.map(DelegationToken::Reference);
        request.act_as = act_as.map(DelegationToken::Reference);

        let scope = TokenScope {
            cache_key,
            delegated,
            delegation_ids,
        };

        let cached = if let Some(token) = context.scoped_token(&scope) {
            tracing::trace!(token.id = %token.id(), "found token in message context");
            Some(token.clone())
        } else if delegated {
            self.associated_token(&scope).await?
        } else {
            self.endpoint_token(&scope.cache_key).await?
        };
        let cache_key = &scope.cache_key;

        let token = match cached {
            Some(token) => {
                let status = token.token_status_with_clock(&self.clock, self.config.imminent_expiry());
                if status == TokenStatus::Fresh {
                    tracing::debug!(token.id = %token.id(), %cache_key, "reusing cached token");
                    return Ok(token);
                }

                tracing::debug!(token.id = %token.id(), ?status, %cache_key, "cached token is stale");
                self.evict(&token, context).await?;
                self.refresh(client, &token, &request, context).await?
            }
            None => {
                tracing::debug!(%cache_key, "no cached token, issuing new token");
                self.session(client, &request, context).await.issue(&request).await?
            }
        };

        self.cache_token(&token, scope, context).await?;

        Ok(token)
    }

    /// Cancels a token at its issuer and evicts it from every cache
    ///
    /// Returns whether the issuer confirmed the cancellation.
    #[tracing::instrument(err, skip_all, fields(token.id = %token.id()))]
    pub async fn cancel(
        &self,
        token: &SecurityToken,
        context: &mut MessageContext,
    ) -> Result<bool, RetrievalError> {
        let client = token
            .issuer_address()
            .and_then(|address| self.issuer_clients.get(address))
            .unwrap_or(&self.client);

        let cancelled = client.cancel_security_token(token).await?;
        self.evict(token, context).await?;

        Ok(cancelled)
    }

    async fn refresh(
        &self,
        client: &StsClient,
        token: &SecurityToken,
        request: &TokenRequestParams,
        context: &MessageContext,
    ) -> Result<SecurityToken, RetrievalError> {
        let session = self.session(client, request, context).await;

        if !session.config().allow_renewing() {
            tracing::debug!(token.id = %token.id(), "renewal disallowed, issuing new token");
            return Ok(session.issue(request).await?);
        }

        match session.renew(token).await {
            Ok(renewed) => Ok(renewed),
            Err(error) if self.config.issue_after_failed_renew() => {
                tracing::warn!(
                    token.id = %token.id(),
                    error = (&error as &dyn error::Error),
                    "unable to renew token, issuing new token"
                );
                Ok(session.issue(request).await?)
            }
            Err(error) => {
                tracing::warn!(
                    token.id = %token.id(),
                    error = (&error as &dyn error::Error),
                    "unable to renew token"
                );
                Err(RetrievalError::RenewFailed {
                    token_id: token.id().to_owned(),
                    source: error,
                })
            }
        }
    }

    async fn session<'a>(
        &self,
        client: &'a StsClient,
        request: &TokenRequestParams,
        context: &MessageContext,
    ) -> StsSession<'a> {
        let mut session = client.session().await;
        session.apply(request);
        if let Some(namespace) = context.addressing_namespace() {
            session.set_addressing_namespace(namespace);
        }
        session
    }

    async fn endpoint_token(
        &self,
        cache_key: &CacheKey,
    ) -> Result<Option<SecurityToken>, RetrievalError> {
        if !self.config.cache_issued_token_in_endpoint() {
            return Ok(None);
        }

        let id = match self.endpoint_tokens.load().get(cache_key) {
            Some(id) => id.clone(),
            None => return Ok(None),
        };

        self.store.get(&id).await.map_err(RetrievalError::Store)
    }

    async fn associated_token(
        &self,
        scope: &TokenScope,
    ) -> Result<Option<SecurityToken>, RetrievalError> {
        for delegation_id in &scope.delegation_ids {
            let issued_id = self
                .store
                .get_association(&scope.cache_key, delegation_id)
                .await
                .map_err(RetrievalError::Store)?;

            if let Some(issued_id) = issued_id {
                let token = self.store.get(&issued_id).await.map_err(RetrievalError::Store)?;
                if token.is_some() {
                    tracing::trace!(%delegation_id, %issued_id, "found token associated with delegated identity");
                    return Ok(token);
                }
            }
        }

        Ok(None)
    }

    async fn cache_token(
        &self,
        token: &SecurityToken,
        scope: TokenScope,
        context: &mut MessageContext,
    ) -> Result<(), RetrievalError> {
        if token.is_one_time_use() {
            tracing::debug!(token.id = %token.id(), "one-time-use token kept in message context only");
            context.set_token(token.clone(), scope);
            return Ok(());
        }

        self.store.put(token).await.map_err(RetrievalError::Store)?;

        if self.config.cache_issued_token_in_endpoint() && !scope.delegated {
            self.endpoint_tokens.rcu(|slots| {
                let mut slots = HashMap::clone(slots);
                slots.insert(scope.cache_key.clone(), token.id().to_owned());
                slots
            });
        }

        for delegation_id in &scope.delegation_ids {
            self.store
                .put_association(delegation_id, &scope.cache_key, token.id())
                .await
                .map_err(RetrievalError::Store)?;
        }

        context.set_token(token.clone(), scope);

        Ok(())
    }

    async fn evict(
        &self,
        token: &SecurityToken,
        context: &mut MessageContext,
    ) -> Result<(), RetrievalError> {
        if context.token().map_or(false, |t| t.id() == token.id()) {
            context.take_token();
        }

        if self.endpoint_tokens.load().values().any(|id| id.as_str() == token.id().as_str()) {
            self.endpoint_tokens.rcu(|slots| {
                let mut slots = HashMap::clone(slots);
                slots.retain(|_, id| id.as_str() != token.id().as_str());
                slots
            });
        }

        self.store
            .remove(token.id())
            .await
            .map_err(RetrievalError::Store)
    }

    fn client_for(&self, params: &TokenRequestParams) -> &StsClient {
        params
            .issuer_address()
            .and_then(|address| self.issuer_clients.get(&address))
            .unwrap_or(&self.client)
    }

    fn cache_key(&self, client: &StsClient, applies_to: Option<&str>) -> CacheKey {
        match applies_to {
            Some(address)
                if !address.is_empty()
                    && self.config.cache_key_from_applies_to()
                    && client.config().applies_to_enabled() =>
            {
                CacheKey::from(address)
            }
            _ => CacheKey::from_static(DEFAULT_CACHE_KEY),
        }
    }
}

async fn resolve_delegation(
    token: Option<&DelegationToken>,
    context: &DelegationContext,
) -> Result<Option<XmlElement>, TrustError> {
    match token {
        Some(token) => Ok(token.resolve(context).await?),
        None => Ok(None),
    }
}
