//! Delegation tokens sent as `OnBehalfOf` or `ActAs`

use std::{error, fmt, sync::Arc};

use aliri_base64::Base64;
use async_trait::async_trait;
use ring::digest;
use thiserror::Error;

use crate::{
    ns::{is_secure_conversation_namespace, SAML1_NS, SAML2_NS, WSSE_NS, WSU_NS},
    xml::{XmlElement, XmlError},
    TokenId,
};

/// Errors raised while resolving a delegation token
#[derive(Debug, Error)]
pub enum DelegationError {
    /// An inline token was not well-formed XML
    #[error("inline delegation token is malformed")]
    Malformed(#[from] XmlError),
    /// The callback producing the token failed
    #[error("delegation token callback failed")]
    Callback(#[source] Box<dyn error::Error + Send + Sync + 'static>),
}

/// Information available to a callback producing a delegation token
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DelegationContext {
    /// The address the requested token applies to
    pub applies_to: Option<String>,
    /// The address of the token issuer
    pub issuer_address: Option<String>,
}

/// Produces a delegation token on demand
#[async_trait]
pub trait DelegationCallback: Send + Sync {
    /// Produces the token element, or `None` when no delegation applies
    async fn produce(
        &self,
        context: &DelegationContext,
    ) -> Result<Option<XmlElement>, Box<dyn error::Error + Send + Sync + 'static>>;
}

/// A token representing the identity a token is requested for
#[derive(Clone)]
pub enum DelegationToken {
    /// A serialized token
    Inline(String),
    /// A parsed token element
    Reference(XmlElement),
    /// A token produced by a callback when the request is made
    ProducedByCallback(Arc<dyn DelegationCallback>),
}

impl DelegationToken {
    /// Resolves the token to its element form
    pub async fn resolve(
        &self,
        context: &DelegationContext,
    ) -> Result<Option<XmlElement>, DelegationError> {
        match self {
            Self::Inline(raw) => Ok(Some(XmlElement::parse(raw)?)),
            Self::Reference(element) => Ok(Some(element.clone())),
            Self::ProducedByCallback(callback) => callback
                .produce(context)
                .await
                .map_err(DelegationError::Callback),
        }
    }
}

impl fmt::Debug for DelegationToken {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Inline(raw) => f.debug_tuple("Inline").field(&raw.len()).finish(),
            Self::Reference(element) => f
                .debug_tuple("Reference")
                .field(&element.name().local_name())
                .finish(),
            Self::ProducedByCallback(_) => f.write_str("ProducedByCallback"),
        }
    }
}

/// Derives the identity under which tokens issued for a delegation token are associated
///
/// SAML assertions and security context tokens carry their own identifiers. Username and
/// binary security tokens are identified by a digest of their content. Any other token is
/// identified by its `wsu:Id`, if it has one.
pub fn delegation_id(token: &XmlElement) -> Option<TokenId> {
    let name = token.name();
    let id = match (name.namespace(), name.local_name()) {
        (Some(SAML1_NS), "Assertion") => token.attribute("AssertionID").map(String::from),
        (Some(SAML2_NS), "Assertion") => token.attribute("ID").map(String::from),
        (Some(ns), "SecurityContextToken") if is_secure_conversation_namespace(ns) => token
            .child(ns, "Identifier")
            .map(XmlElement::text)
            .filter(|id| !id.is_empty()),
        (Some(WSSE_NS), "UsernameToken") => {
            let text_of = |local: &str| {
                token
                    .child(WSSE_NS, local)
                    .map(XmlElement::text)
                    .unwrap_or_default()
            };
            Some(content_digest(&[&text_of("Username"), &text_of("Password")]))
        }
        (Some(WSSE_NS), "BinarySecurityToken") => Some(content_digest(&[&token.text()])),
        _ => token.attribute_ns(WSU_NS, "Id").map(String::from),
    };

    id.map(TokenId::new)
}

fn content_digest(parts: &[&str]) -> String {
    let mut ctx = digest::Context::new(&digest::SHA256);
    for part in parts {
        ctx.update(part.as_bytes());
    }
    Base64::from_raw(ctx.finish().as_ref()).to_string()
}
