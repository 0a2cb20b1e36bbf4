//! Requested claims and their aggregation across claim sources
//!
//! A [`ClaimCollection`] describes the claims a requester wants embedded in an issued token and
//! is written into the request as a `wst:Claims` element. When a [`ClaimsAggregator`] is
//! configured, the values for the requested claims are collected from each registered
//! [`ClaimSource`] in order, and a mandatory claim that no source can satisfy fails the request
//! before anything is sent to the issuer.

use std::{error, fmt, sync::Arc};

use async_trait::async_trait;
use thiserror::Error;

use crate::{
    ns::{TrustVersion, IDENTITY_NS},
    xml::{XmlElement, XmlName},
    ClaimType, ClaimTypeRef,
};

/// The default claims dialect
pub const IDENTITY_CLAIMS_DIALECT: &str = IDENTITY_NS;

fn ic(local: &str) -> XmlName {
    XmlName::new(IDENTITY_NS, "ic", local)
}

/// Errors raised while aggregating claims
#[derive(Debug, Error)]
pub enum ClaimsError {
    /// A claim marked as required was not supplied by any claim source
    #[error("mandatory claim `{claim_type}` was not found")]
    MandatoryClaimMissing {
        /// The type of the missing claim
        claim_type: ClaimType,
    },
    /// A claim source failed
    #[error("claim source `{source_name}` failed")]
    Source {
        /// The name the claim source was registered under
        source_name: String,
        /// The underlying failure
        #[source]
        source: Box<dyn error::Error + Send + Sync + 'static>,
    },
}

/// A single requested claim
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Claim {
    claim_type: ClaimType,
    optional: bool,
    values: Vec<String>,
}

impl Claim {
    /// A required claim of the given type
    pub fn required(claim_type: ClaimType) -> Self {
        Self {
            claim_type,
            optional: false,
            values: Vec::new(),
        }
    }

    /// An optional claim of the given type
    pub fn optional(claim_type: ClaimType) -> Self {
        Self {
            optional: true,
            ..Self::required(claim_type)
        }
    }

    /// Adds a requested or resolved value
    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.values.push(value.into());
        self
    }

    /// The claim type
    pub fn claim_type(&self) -> &ClaimTypeRef {
        &self.claim_type
    }

    /// Whether the claim may be omitted from an issued token
    pub fn is_optional(&self) -> bool {
        self.optional
    }

    /// Values attached to the claim
    pub fn values(&self) -> &[String] {
        &self.values
    }
}

/// A set of claims in a single dialect
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClaimCollection {
    dialect: String,
    claims: Vec<Claim>,
}

impl Default for ClaimCollection {
    fn default() -> Self {
        Self::new(IDENTITY_CLAIMS_DIALECT)
    }
}

impl ClaimCollection {
    /// Constructs an empty collection in the given dialect
    pub fn new(dialect: impl Into<String>) -> Self {
        Self {
            dialect: dialect.into(),
            claims: Vec::new(),
        }
    }

    /// Adds a claim
    pub fn with_claim(mut self, claim: Claim) -> Self {
        self.claims.push(claim);
        self
    }

    /// The claims dialect URI
    pub fn dialect(&self) -> &str {
        &self.dialect
    }

    /// The requested claims
    pub fn claims(&self) -> &[Claim] {
        &self.claims
    }

    /// Whether the collection requests no claims
    pub fn is_empty(&self) -> bool {
        self.claims.is_empty()
    }

    fn contains(&self, claim_type: &ClaimTypeRef) -> bool {
        self.claims.iter().any(|c| *c.claim_type == *claim_type)
    }

    /// Merges two collections, with claims in `primary` taking precedence
    ///
    /// Collections in different dialects are not merged; `primary` wins outright.
    pub fn merge(primary: Option<&Self>, secondary: Option<&Self>) -> Option<Self> {
        match (primary, secondary) {
            (Some(p), Some(s)) if p.dialect == s.dialect => {
                let mut merged = p.clone();
                for claim in &s.claims {
                    if !merged.contains(&claim.claim_type) {
                        merged.claims.push(claim.clone());
                    }
                }
                Some(merged)
            }
            (Some(p), _) => Some(p.clone()),
            (None, s) => s.cloned(),
        }
    }

    /// Builds a collection carrying the values collected for each claim
    pub fn from_processed(dialect: impl Into<String>, processed: &[ProcessedClaim]) -> Self {
        let claims = processed
            .iter()
            .map(|p| Claim {
                claim_type: p.claim_type.clone(),
                optional: false,
                values: p.values.clone(),
            })
            .collect();

        Self {
            dialect: dialect.into(),
            claims,
        }
    }

    /// Writes the collection as a `wst:Claims` element
    pub fn to_element(&self, version: TrustVersion) -> XmlElement {
        let mut element = version
            .element("Claims")
            .with_attribute("Dialect", self.dialect.as_str());

        for claim in &self.claims {
            if claim.values.is_empty() {
                let mut claim_type =
                    XmlElement::new(ic("ClaimType")).with_attribute("Uri", claim.claim_type.as_str());
                if claim.optional {
                    claim_type = claim_type.with_attribute("Optional", "true");
                }
                element.push_child(claim_type);
            } else {
                for value in &claim.values {
                    element.push_child(
                        XmlElement::new(ic("ClaimValue"))
                            .with_attribute("Uri", claim.claim_type.as_str())
                            .with_child(XmlElement::new(ic("Value")).with_text(value.as_str())),
                    );
                }
            }
        }

        element
    }

    /// Reads a `Claims` element
    ///
    /// Unrecognized children are ignored.
    pub fn from_element(element: &XmlElement) -> Self {
        let mut collection = Self::new(
            element
                .attribute("Dialect")
                .unwrap_or(IDENTITY_CLAIMS_DIALECT),
        );

        for child in element.children() {
            let uri = match child.attribute("Uri") {
                Some(uri) => uri,
                None => continue,
            };
            let claim_type = ClaimType::new(uri.to_owned());

            match child.name().local_name() {
                "ClaimType" => {
                    let optional = matches!(child.attribute("Optional"), Some("true") | Some("1"));
                    collection.claims.push(Claim {
                        claim_type,
                        optional,
                        values: Vec::new(),
                    });
                }
                "ClaimValue" => {
                    let values = child
                        .child_by_local_name("Value")
                        .map(|v| vec![v.text()])
                        .unwrap_or_default();
                    collection.claims.push(Claim {
                        claim_type,
                        optional: false,
                        values,
                    });
                }
                _ => {}
            }
        }

        collection
    }
}

/// A claim value produced by a claim source
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProcessedClaim {
    claim_type: ClaimType,
    issuer: Option<String>,
    values: Vec<String>,
}

impl ProcessedClaim {
    /// Constructs a processed claim with the given values
    pub fn new(claim_type: ClaimType, values: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            claim_type,
            issuer: None,
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Records the issuer that vouched for the claim
    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = Some(issuer.into());
        self
    }

    /// The claim type
    pub fn claim_type(&self) -> &ClaimTypeRef {
        &self.claim_type
    }

    /// The issuer of the claim, if known
    pub fn issuer(&self) -> Option<&str> {
        self.issuer.as_deref()
    }

    /// The claim values
    pub fn values(&self) -> &[String] {
        &self.values
    }
}

/// The request scope handed to claim sources
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClaimsContext {
    /// The principal the claims are about
    pub principal: Option<String>,
    /// The security realm of the request
    pub realm: Option<String>,
    /// The address the requested token applies to
    pub applies_to: Option<String>,
}

/// A pluggable source of claim values
#[async_trait]
pub trait ClaimSource: Send + Sync {
    /// The claim types this source can supply
    fn supported_claim_types(&self) -> &[ClaimType];

    /// The realms this source serves
    ///
    /// `None` means the source serves every realm.
    fn supported_realms(&self) -> Option<&[String]> {
        None
    }

    /// Retrieves values for the claims in `claims`, all of which are supported by this source
    async fn retrieve(
        &self,
        claims: &ClaimCollection,
        context: &ClaimsContext,
    ) -> Result<Vec<ProcessedClaim>, Box<dyn error::Error + Send + Sync + 'static>>;
}

/// How values for the same claim type from different sources are reported
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClaimMergeMode {
    /// Values are combined into a single multi-valued claim
    Combine,
    /// Each source's values are kept as a separate claim
    Separate,
}

impl Default for ClaimMergeMode {
    fn default() -> Self {
        Self::Combine
    }
}

/// Collects claim values from an ordered list of claim sources
#[derive(Clone)]
pub struct ClaimsAggregator {
    sources: Vec<(String, Arc<dyn ClaimSource>)>,
    merge_mode: ClaimMergeMode,
    stop_processing_on_error: bool,
}

impl Default for ClaimsAggregator {
    /// An aggregator with no sources, which combines values and stops on the first
    /// source failure
    fn default() -> Self {
        Self {
            sources: Vec::new(),
            merge_mode: ClaimMergeMode::default(),
            stop_processing_on_error: true,
        }
    }
}

impl ClaimsAggregator {
    /// Constructs an aggregator with no sources
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a claim source
    pub fn with_source(mut self, name: impl Into<String>, source: impl ClaimSource + 'static) -> Self {
        self.sources.push((name.into(), Arc::new(source)));
        self
    }

    /// Sets how values for the same claim type are reported
    pub fn with_merge_mode(mut self, merge_mode: ClaimMergeMode) -> Self {
        self.merge_mode = merge_mode;
        self
    }

    /// Sets whether a failing source aborts aggregation
    ///
    /// When `false`, failures are logged and the remaining sources are still consulted.
    pub fn with_stop_processing_on_error(mut self, stop: bool) -> Self {
        self.stop_processing_on_error = stop;
        self
    }

    /// Whether any claim sources are registered
    pub fn has_sources(&self) -> bool {
        !self.sources.is_empty()
    }

    /// Retrieves values for the requested claims and checks that mandatory claims are present
    #[tracing::instrument(skip_all, fields(dialect = requested.dialect()))]
    pub async fn retrieve(
        &self,
        requested: &ClaimCollection,
        context: &ClaimsContext,
    ) -> Result<Vec<ProcessedClaim>, ClaimsError> {
        let mut processed: Vec<ProcessedClaim> = Vec::new();

        for (name, source) in &self.sources {
            if let (Some(realms), Some(realm)) = (source.supported_realms(), &context.realm) {
                if !realms.iter().any(|r| r == realm) {
                    tracing::trace!(source = %name, %realm, "claim source does not serve realm, skipping");
                    continue;
                }
            }

            let supported = source.supported_claim_types();
            let subset = ClaimCollection {
                dialect: requested.dialect.clone(),
                claims: requested
                    .claims
                    .iter()
                    .filter(|c| supported.contains(&c.claim_type))
                    .cloned()
                    .collect(),
            };

            if subset.is_empty() {
                tracing::trace!(source = %name, "claim source supports none of the requested claims, skipping");
                continue;
            }

            match source.retrieve(&subset, context).await {
                Ok(claims) => {
                    tracing::debug!(source = %name, count = claims.len(), "retrieved claims");
                    self.merge_into(&mut processed, claims);
                }
                Err(error) if self.stop_processing_on_error => {
                    return Err(ClaimsError::Source {
                        source_name: name.clone(),
                        source: error,
                    });
                }
                Err(error) => {
                    tracing::warn!(source = %name, error = (&*error as &dyn error::Error), "claim source failed, continuing with remaining sources");
                }
            }
        }

        validate_claim_values(requested, &processed)?;
        Ok(processed)
    }

    fn merge_into(&self, processed: &mut Vec<ProcessedClaim>, claims: Vec<ProcessedClaim>) {
        for claim in claims {
            let existing = match self.merge_mode {
                ClaimMergeMode::Combine => processed
                    .iter_mut()
                    .find(|p| p.claim_type == claim.claim_type),
                ClaimMergeMode::Separate => None,
            };

            match existing {
                Some(existing) => existing.values.extend(claim.values),
                None => processed.push(claim),
            }
        }
    }
}

fn validate_claim_values(
    requested: &ClaimCollection,
    processed: &[ProcessedClaim],
) -> Result<(), ClaimsError> {
    for claim in requested.claims.iter().filter(|c| !c.optional) {
        let satisfied = processed
            .iter()
            .any(|p| p.claim_type == claim.claim_type && !p.values.is_empty());
        if !satisfied {
            return Err(ClaimsError::MandatoryClaimMissing {
                claim_type: claim.claim_type.clone(),
            });
        }
    }
    Ok(())
}

impl fmt::Debug for ClaimsAggregator {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ClaimsAggregator")
            .field(
                "sources",
                &self
                    .sources
                    .iter()
                    .map(|(n, _)| n.as_str())
                    .collect::<Vec<_>>(),
            )
            .field("merge_mode", &self.merge_mode)
            .field("stop_processing_on_error", &self.stop_processing_on_error)
            .finish()
    }
}
