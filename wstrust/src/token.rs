use std::{collections::BTreeMap, fmt};

use aliri_base64::Base64;
use aliri_clock::{Clock, DurationSecs, System, UnixTime};
use serde::{Deserialize, Serialize};

use crate::{
    ns::SAML2_NS,
    xml::XmlElement,
    TokenId, TokenIdRef, TokenType, TokenTypeRef,
};

/// The proof-of-possession secret attached to a holder-of-key token
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProofKey(Base64);

impl ProofKey {
    /// Wraps raw key material
    pub fn new(key: impl Into<Vec<u8>>) -> Self {
        Self(Base64::from_raw(key))
    }

    /// The raw key material
    pub fn as_slice(&self) -> &[u8] {
        self.0.as_slice()
    }

    /// The length of the key in bytes
    pub fn len(&self) -> usize {
        self.0.as_slice().len()
    }

    /// Whether the key is empty
    pub fn is_empty(&self) -> bool {
        self.0.as_slice().is_empty()
    }
}

impl fmt::Debug for ProofKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ProofKey(***{} bytes***)", self.len())
    }
}

/// The content of an issued token
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenContent {
    /// An XML token such as a SAML assertion or security context token
    Element(XmlElement),
    /// A binary or text token, such as a JWT, carried as character data
    Text(String),
}

/// A token's lifecycle status
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenStatus {
    /// The token is valid and not about to expire
    Fresh,
    /// The token is still valid, but will expire within the imminent expiry window
    Stale,
    /// The token is no longer valid
    Expired,
}

/// A security token issued by a security token service
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityToken {
    id: TokenId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    token: Option<TokenContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    attached_reference: Option<XmlElement>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    unattached_reference: Option<XmlElement>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    issuer_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    token_type: Option<TokenType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    secret: Option<ProofKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    created: Option<UnixTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expires: Option<UnixTime>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    properties: BTreeMap<String, String>,
}

impl SecurityToken {
    /// Constructs a token record with only an identifier
    pub fn new(id: TokenId) -> Self {
        Self {
            id,
            token: None,
            attached_reference: None,
            unattached_reference: None,
            issuer_address: None,
            token_type: None,
            secret: None,
            created: None,
            expires: None,
            properties: BTreeMap::new(),
        }
    }

    /// Sets the token content
    pub fn with_content(mut self, token: TokenContent) -> Self {
        self.token = Some(token);
        self
    }

    /// Sets an XML token element as the token content
    pub fn with_element(self, element: XmlElement) -> Self {
        self.with_content(TokenContent::Element(element))
    }

    /// Sets the reference used to point at this token from within the message carrying it
    pub fn with_attached_reference(mut self, reference: XmlElement) -> Self {
        self.attached_reference = Some(reference);
        self
    }

    /// Sets the reference used to point at this token from outside a message
    pub fn with_unattached_reference(mut self, reference: XmlElement) -> Self {
        self.unattached_reference = Some(reference);
        self
    }

    /// Records the address of the issuer that produced this token
    pub fn with_issuer_address(mut self, address: impl Into<String>) -> Self {
        self.issuer_address = Some(address.into());
        self
    }

    /// Sets the token type
    pub fn with_token_type(mut self, token_type: TokenType) -> Self {
        self.token_type = Some(token_type);
        self
    }

    /// Attaches a proof key
    pub fn with_secret(mut self, secret: ProofKey) -> Self {
        self.secret = Some(secret);
        self
    }

    /// Sets the creation time
    pub fn with_created(mut self, created: UnixTime) -> Self {
        self.created = Some(created);
        self
    }

    /// Sets the expiration time
    pub fn with_expires(mut self, expires: UnixTime) -> Self {
        self.expires = Some(expires);
        self
    }

    /// Sets a side property
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_property(key, value);
        self
    }

    /// Gets the token identifier
    #[inline]
    pub fn id(&self) -> &TokenIdRef {
        &self.id
    }

    /// Gets the token content
    #[inline]
    pub fn content(&self) -> Option<&TokenContent> {
        self.token.as_ref()
    }

    /// Gets the token content when it is an XML element
    pub fn element(&self) -> Option<&XmlElement> {
        match &self.token {
            Some(TokenContent::Element(e)) => Some(e),
            _ => None,
        }
    }

    /// Gets the attached reference
    #[inline]
    pub fn attached_reference(&self) -> Option<&XmlElement> {
        self.attached_reference.as_ref()
    }

    /// Gets the unattached reference
    #[inline]
    pub fn unattached_reference(&self) -> Option<&XmlElement> {
        self.unattached_reference.as_ref()
    }

    /// Gets the address of the issuer
    #[inline]
    pub fn issuer_address(&self) -> Option<&str> {
        self.issuer_address.as_deref()
    }

    /// Gets the token type
    #[inline]
    pub fn token_type(&self) -> Option<&TokenTypeRef> {
        self.token_type.as_deref()
    }

    /// Gets the proof key
    #[inline]
    pub fn secret(&self) -> Option<&ProofKey> {
        self.secret.as_ref()
    }

    /// Gets the creation time
    #[inline]
    pub fn created(&self) -> Option<UnixTime> {
        self.created
    }

    /// Gets the expiration time
    #[inline]
    pub fn expires(&self) -> Option<UnixTime> {
        self.expires
    }

    /// Gets a side property
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    /// Gets all side properties
    pub fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }

    /// Sets a side property
    pub fn set_property(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.properties.insert(key.into(), value.into());
    }

    pub(crate) fn set_token_type(&mut self, token_type: Option<TokenType>) {
        self.token_type = token_type;
    }

    pub(crate) fn set_secret(&mut self, secret: Option<ProofKey>) {
        self.secret = secret;
    }

    /// Whether the token has expired
    #[inline]
    pub fn is_expired(&self) -> bool {
        self.is_expired_with_clock(&System)
    }

    /// Whether the token has expired according to the provided clock
    #[inline]
    pub fn is_expired_with_clock<C: Clock>(&self, clock: &C) -> bool {
        self.is_expired_at(clock.now())
    }

    /// Whether the token has expired as of the provided time
    ///
    /// Tokens without an expiration never expire.
    pub fn is_expired_at(&self, time: UnixTime) -> bool {
        self.expires.map_or(false, |expires| time >= expires)
    }

    /// Whether the token will have expired `window` from the provided time
    pub fn is_about_to_expire_at(&self, time: UnixTime, window: DurationSecs) -> bool {
        self.is_expired_at(time + window)
    }

    /// Gets the token's lifecycle status as of the provided time
    #[inline]
    pub fn token_status_at(&self, time: UnixTime, imminent_expiry: DurationSecs) -> TokenStatus {
        if self.is_expired_at(time) {
            TokenStatus::Expired
        } else if self.is_about_to_expire_at(time, imminent_expiry) {
            TokenStatus::Stale
        } else {
            TokenStatus::Fresh
        }
    }

    /// Gets the token's lifecycle status according to the provided clock
    #[inline]
    pub fn token_status_with_clock<C: Clock>(
        &self,
        clock: &C,
        imminent_expiry: DurationSecs,
    ) -> TokenStatus {
        self.token_status_at(clock.now(), imminent_expiry)
    }

    /// Whether the token is a SAML 2.0 assertion restricted to a single use
    pub fn is_one_time_use(&self) -> bool {
        self.element()
            .filter(|e| e.is(SAML2_NS, "Assertion"))
            .and_then(|e| e.child(SAML2_NS, "Conditions"))
            .and_then(|c| c.child(SAML2_NS, "OneTimeUse"))
            .is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token_expiring_at(expires: u64) -> SecurityToken {
        SecurityToken::new(TokenId::from_static("urn:uuid:1")).with_expires(UnixTime(expires))
    }

    #[test]
    fn status_respects_imminent_expiry_window() {
        let token = token_expiring_at(1_000);
        let window = DurationSecs(10);

        assert_eq!(token.token_status_at(UnixTime(900), window), TokenStatus::Fresh);
        assert_eq!(token.token_status_at(UnixTime(995), window), TokenStatus::Stale);
        assert_eq!(token.token_status_at(UnixTime(1_000), window), TokenStatus::Expired);
    }

    #[test]
    fn token_without_expiry_stays_fresh() {
        let token = SecurityToken::new(TokenId::from_static("urn:uuid:2"));
        assert_eq!(
            token.token_status_at(UnixTime(u64::MAX / 2), DurationSecs(10)),
            TokenStatus::Fresh
        );
    }

    #[test]
    fn one_time_use_requires_saml2_condition() {
        let one_time = XmlElement::parse(
            r#"<saml2:Assertion xmlns:saml2="urn:oasis:names:tc:SAML:2.0:assertion" ID="_a1">
                 <saml2:Conditions><saml2:OneTimeUse/></saml2:Conditions>
               </saml2:Assertion>"#,
        )
        .unwrap();
        let reusable = XmlElement::parse(
            r#"<saml2:Assertion xmlns:saml2="urn:oasis:names:tc:SAML:2.0:assertion" ID="_a2">
                 <saml2:Conditions NotOnOrAfter="2030-01-01T00:00:00Z"/>
               </saml2:Assertion>"#,
        )
        .unwrap();

        let id = TokenId::from_static("_a1");
        assert!(SecurityToken::new(id.clone())
            .with_element(one_time)
            .is_one_time_use());
        assert!(!SecurityToken::new(id).with_element(reusable).is_one_time_use());
    }

    #[test]
    fn debug_output_redacts_secret() {
        let token = SecurityToken::new(TokenId::from_static("sct-1"))
            .with_secret(ProofKey::new(b"super-secret".to_vec()));
        let debug = format!("{:?}", token);
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("12 bytes"));
    }
}
