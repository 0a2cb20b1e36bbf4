//! A client for a single security token service
//!
//! Each round-trip is made through an [`StsSession`], which holds the client's lock for as long
//! as it lives. Per-request settings applied to a session are discarded when it is dropped, so
//! the next session starts again from the client's baseline configuration, whether the previous
//! round-trip succeeded or not.

use std::{fmt, sync::Arc};

use aliri_clock::{Clock, System};
use tokio::sync::{Mutex, MutexGuard};

use crate::{
    claims::{ClaimCollection, ClaimsAggregator, ClaimsContext},
    config::{RequestClaims, StsClientConfig},
    delegation::{DelegationContext, DelegationToken},
    error::TrustError,
    ns::Operation,
    rst::{self, BuiltRequest, IssueContent},
    rstr::{self, ProtocolResponse, ValidationOutcome},
    transport::{KeyDecryptor, TrustTransport},
    xml::XmlElement,
    SecurityToken, TokenTypeRef,
};

/// Trust policy flags that override the client configuration for a request
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TrustPolicy {
    /// Whether requester entropy is sent for symmetric keys
    pub require_client_entropy: bool,
    /// Whether the issuer must contribute entropy to symmetric keys
    pub require_server_entropy: bool,
    /// Whether issued tokens may be renewed
    pub allow_renewing: Option<bool>,
    /// Whether issued tokens may be renewed after they expire
    pub allow_renewing_after_expiry: Option<bool>,
}

/// Describes a single request for a token
///
/// Owned by the caller and only read while servicing the request.
#[derive(Clone, Debug, Default)]
pub struct TokenRequestParams {
    /// An endpoint reference naming the issuer that should serve the request
    pub issuer: Option<XmlElement>,
    /// Trust policy flags
    pub trust: Option<TrustPolicy>,
    /// A request template
    pub template: Option<XmlElement>,
    /// Claims to request
    pub claims: Option<RequestClaims>,
    /// The WS-Policy namespace to use for `AppliesTo`
    pub wsp_namespace: Option<String>,
    /// The identity the token is requested on behalf of
    pub on_behalf_of: Option<DelegationToken>,
    /// The identity the requester acts as
    pub act_as: Option<DelegationToken>,
    /// The address the token should apply to
    pub applies_to: Option<String>,
    /// A base64-encoded SPNEGO token to exchange
    pub binary_exchange: Option<String>,
    /// The principal claims are gathered for
    pub principal: Option<String>,
    /// The security realm of the request
    pub realm: Option<String>,
}

impl TokenRequestParams {
    /// Constructs an empty request descriptor
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the address the token should apply to
    pub fn with_applies_to(mut self, address: impl Into<String>) -> Self {
        self.applies_to = Some(address.into());
        self
    }

    /// Sets the issuer endpoint reference
    pub fn with_issuer(mut self, issuer: XmlElement) -> Self {
        self.issuer = Some(issuer);
        self
    }

    /// Sets the trust policy flags
    pub fn with_trust(mut self, trust: TrustPolicy) -> Self {
        self.trust = Some(trust);
        self
    }

    /// Sets the request template
    pub fn with_template(mut self, template: XmlElement) -> Self {
        self.template = Some(template);
        self
    }

    /// Sets the claims to request
    pub fn with_claims(mut self, claims: RequestClaims) -> Self {
        self.claims = Some(claims);
        self
    }

    /// Sets the WS-Policy namespace to use for `AppliesTo`
    pub fn with_wsp_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.wsp_namespace = Some(namespace.into());
        self
    }

    /// Requests the token on behalf of another identity
    pub fn with_on_behalf_of(mut self, token: DelegationToken) -> Self {
        self.on_behalf_of = Some(token);
        self
    }

    /// Requests the token acting as another identity
    pub fn with_act_as(mut self, token: DelegationToken) -> Self {
        self.act_as = Some(token);
        self
    }

    /// Sets a SPNEGO token to exchange
    pub fn with_binary_exchange(mut self, token: impl Into<String>) -> Self {
        self.binary_exchange = Some(token.into());
        self
    }

    /// Sets the principal claims are gathered for
    pub fn with_principal(mut self, principal: impl Into<String>) -> Self {
        self.principal = Some(principal.into());
        self
    }

    /// Sets the security realm of the request
    pub fn with_realm(mut self, realm: impl Into<String>) -> Self {
        self.realm = Some(realm.into());
        self
    }

    /// The address in the issuer endpoint reference, if any
    pub fn issuer_address(&self) -> Option<String> {
        self.issuer
            .as_ref()
            .and_then(|epr| epr.child_by_local_name("Address"))
            .map(|a| a.text().trim().to_owned())
            .filter(|a| !a.is_empty())
    }

    /// Whether the request is made on behalf of, or acting as, another identity
    pub fn is_delegated(&self) -> bool {
        self.on_behalf_of.is_some() || self.act_as.is_some()
    }
}

/// A client for a security token service
pub struct StsClient {
    baseline: StsClientConfig,
    transport: Arc<dyn TrustTransport>,
    decryptor: Option<Arc<dyn KeyDecryptor>>,
    claims_aggregator: Option<ClaimsAggregator>,
    state: Mutex<StsClientConfig>,
}

impl fmt::Debug for StsClient {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("StsClient")
            .field("config", &self.baseline)
            .field("has_decryptor", &self.decryptor.is_some())
            .field("claims_aggregator", &self.claims_aggregator)
            .finish()
    }
}

impl StsClient {
    /// Constructs a client that sends requests through `transport`
    pub fn new(config: StsClientConfig, transport: Arc<dyn TrustTransport>) -> Self {
        Self {
            state: Mutex::new(config.clone()),
            baseline: config,
            transport,
            decryptor: None,
            claims_aggregator: None,
        }
    }

    /// Sets the decryptor for encrypted proof keys
    pub fn with_decryptor(mut self, decryptor: Arc<dyn KeyDecryptor>) -> Self {
        self.decryptor = Some(decryptor);
        self
    }

    /// Sets the aggregator that supplies values for requested claims
    pub fn with_claims_aggregator(mut self, aggregator: ClaimsAggregator) -> Self {
        self.claims_aggregator = Some(aggregator);
        self
    }

    /// The baseline configuration
    #[inline]
    pub fn config(&self) -> &StsClientConfig {
        &self.baseline
    }

    /// Starts a session, waiting until any other session on this client ends
    pub async fn session(&self) -> StsSession<'_> {
        StsSession {
            client: self,
            config: self.state.lock().await,
        }
    }

    /// Requests a new token
    pub async fn request_security_token(
        &self,
        params: &TokenRequestParams,
    ) -> Result<SecurityToken, TrustError> {
        let mut session = self.session().await;
        session.apply(params);
        session.issue(params).await
    }

    /// Renews a previously issued token
    pub async fn renew_security_token(
        &self,
        token: &SecurityToken,
    ) -> Result<SecurityToken, TrustError> {
        self.session().await.renew(token).await
    }

    /// Validates a token, optionally exchanging it for a token of another type
    pub async fn validate_security_token(
        &self,
        token: &SecurityToken,
        token_type: Option<&TokenTypeRef>,
    ) -> Result<ValidationOutcome, TrustError> {
        self.session().await.validate(token, token_type).await
    }

    /// Cancels a previously issued token
    pub async fn cancel_security_token(&self, token: &SecurityToken) -> Result<bool, TrustError> {
        self.session().await.cancel(token).await
    }
}

/// Exclusive use of an [`StsClient`] for one or more round-trips
///
/// Dropping the session restores the client's baseline configuration.
pub struct StsSession<'a> {
    client: &'a StsClient,
    config: MutexGuard<'a, StsClientConfig>,
}

impl fmt::Debug for StsSession<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("StsSession")
            .field("config", &*self.config)
            .finish()
    }
}

impl Drop for StsSession<'_> {
    fn drop(&mut self) {
        *self.config = self.client.baseline.clone();
    }
}

impl<'a> StsSession<'a> {
    /// The configuration in effect for this session
    #[inline]
    pub fn config(&self) -> &StsClientConfig {
        &self.config
    }

    /// Applies the per-request settings in `params`
    pub fn apply(&mut self, params: &TokenRequestParams) {
        let config = &mut *self.config;

        if let Some(trust) = params.trust {
            config.require_client_entropy = trust.require_client_entropy;
            config.require_server_entropy = trust.require_server_entropy;
            if let Some(allow) = trust.allow_renewing {
                config.allow_renewing = allow;
            }
            if let Some(allow) = trust.allow_renewing_after_expiry {
                config.allow_renewing_after_expiry = allow;
            }
        }
        if let Some(template) = &params.template {
            config.template = Some(template.clone());
        }
        if let Some(claims) = &params.claims {
            config.claims = Some(claims.clone());
        }
        if let Some(namespace) = &params.wsp_namespace {
            config.wsp_namespace = namespace.clone();
        }
    }

    /// Overrides the WS-Addressing namespace for this session
    pub fn set_addressing_namespace(&mut self, namespace: impl Into<String>) {
        self.config.addressing_namespace = namespace.into();
    }

    /// Issues a new token
    ///
    /// Requested claims are resolved before anything is sent, so a mandatory claim that cannot
    /// be satisfied fails the request without contacting the issuer.
    #[tracing::instrument(
        err,
        skip_all,
        fields(
            issuer = ?self.config.location,
            applies_to = ?params.applies_to,
            delegated = params.is_delegated(),
        ),
    )]
    pub async fn issue(&self, params: &TokenRequestParams) -> Result<SecurityToken, TrustError> {
        let claims = self.resolve_claims(params, true).await?;

        let delegation_context = DelegationContext {
            applies_to: params.applies_to.clone(),
            issuer_address: self.config.location.clone(),
        };
        let on_behalf_of = resolve_delegation(params.on_behalf_of.as_ref(), &delegation_context).await?;
        let act_as = resolve_delegation(params.act_as.as_ref(), &delegation_context).await?;

        let content = IssueContent {
            applies_to: params.applies_to.clone(),
            claims,
            on_behalf_of,
            act_as,
            binary_exchange: params.binary_exchange.clone(),
        };

        let built = rst::build_issue(&self.config, &content, System.now())?;
        let response = self.round_trip(built).await?;
        let token = self.parse_token(&response).await?;

        tracing::info!(
            token.id = %token.id(),
            token.expires = token.expires().map(|e| e.0),
            has_secret = token.secret().is_some(),
            "issued new token"
        );

        Ok(token)
    }

    /// Renews a previously issued token
    ///
    /// The renewed token keeps the original token type when the issuer does not state one.
    #[tracing::instrument(err, skip_all, fields(token.id = %token.id()))]
    pub async fn renew(&self, token: &SecurityToken) -> Result<SecurityToken, TrustError> {
        let built = rst::build_renew(&self.config, token, System.now())?;
        let response = self.round_trip(built).await?;
        let mut renewed = self.parse_token(&response).await?;

        if renewed.token_type().is_none() {
            renewed.set_token_type(token.token_type().map(ToOwned::to_owned));
        }
        if renewed.secret().is_none() {
            renewed.set_secret(token.secret().cloned());
        }

        tracing::info!(
            token.id = %renewed.id(),
            token.expires = renewed.expires().map(|e| e.0),
            "renewed token"
        );

        Ok(renewed)
    }

    /// Validates a token
    ///
    /// A token type other than the status type asks the issuer to exchange the token.
    #[tracing::instrument(err, skip_all, fields(token.id = %token.id()))]
    pub async fn validate(
        &self,
        token: &SecurityToken,
        token_type: Option<&TokenTypeRef>,
    ) -> Result<ValidationOutcome, TrustError> {
        let claims = self.resolve_claims(&TokenRequestParams::default(), false).await?;
        let supported = self.client.transport.supports(Operation::Validate);

        let built = rst::build_validate(
            &self.config,
            token,
            token_type,
            claims.as_ref(),
            supported,
            System.now(),
        )?;
        let response = self.round_trip(built).await?;
        let outcome =
            rstr::parse_validation(&self.config, &response, self.client.decryptor.as_deref())
                .await?;

        tracing::debug!(valid = outcome.is_valid(), reason = outcome.reason(), "validated token");

        Ok(outcome)
    }

    /// Cancels a previously issued token, returning whether the issuer confirmed it
    #[tracing::instrument(err, skip_all, fields(token.id = %token.id()))]
    pub async fn cancel(&self, token: &SecurityToken) -> Result<bool, TrustError> {
        let supported = self.client.transport.supports(Operation::Cancel);
        let built = rst::build_cancel(&self.config, token, supported)?;
        let response = self.round_trip(built).await?;
        let cancelled = rstr::parse_cancellation(self.config.version, &response.document)?;

        tracing::debug!(cancelled, "cancelled token");

        Ok(cancelled)
    }

    async fn round_trip(&self, built: BuiltRequest) -> Result<ProtocolResponse, TrustError> {
        let request = built.to_transport_request(self.config.location());
        tracing::trace!(action = %request.action, operation = ?request.operation, "sending request");

        let document = self
            .client
            .transport
            .invoke(request)
            .await
            .map_err(TrustError::Transport)?;

        let sent_use_key = built
            .body
            .child(self.config.version.namespace(), "UseKey")
            .is_some();

        Ok(ProtocolResponse {
            document,
            requestor_entropy: built.requestor_entropy,
            key_size: built.key_size,
            use_key: self.config.use_key.clone().filter(|_| sent_use_key),
        })
    }

    async fn parse_token(&self, response: &ProtocolResponse) -> Result<SecurityToken, TrustError> {
        rstr::parse_issued_token(&self.config, response, self.client.decryptor.as_deref()).await
    }

    async fn resolve_claims(
        &self,
        params: &TokenRequestParams,
        aggregate: bool,
    ) -> Result<Option<XmlElement>, TrustError> {
        let version = self.config.version;
        let requested = match &self.config.claims {
            Some(RequestClaims::Element(element)) => return Ok(Some(element.clone())),
            Some(RequestClaims::Collection(collection)) => collection,
            None => return Ok(None),
        };

        let aggregator = match &self.client.claims_aggregator {
            Some(aggregator) if aggregate && aggregator.has_sources() => aggregator,
            _ => return Ok(Some(requested.to_element(version))),
        };

        let context = ClaimsContext {
            principal: params.principal.clone(),
            realm: params.realm.clone(),
            applies_to: params.applies_to.clone(),
        };
        let processed = aggregator.retrieve(requested, &context).await?;

        Ok(Some(
            ClaimCollection::from_processed(requested.dialect(), &processed).to_element(version),
        ))
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
