//! Namespaces and version-dependent protocol vocabulary

use crate::xml::{XmlElement, XmlName};

/// WS-Security utility namespace
pub const WSU_NS: &str =
    "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-utility-1.0.xsd";
/// WS-Security extension namespace
pub const WSSE_NS: &str =
    "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-secext-1.0.xsd";
/// XML digital signature namespace
pub const DSIG_NS: &str = "http://www.w3.org/2000/09/xmldsig#";
/// XML encryption namespace
pub const XENC_NS: &str = "http://www.w3.org/2001/04/xmlenc#";
/// SAML 1.1 assertion namespace
pub const SAML1_NS: &str = "urn:oasis:names:tc:SAML:1.0:assertion";
/// SAML 2.0 assertion namespace
pub const SAML2_NS: &str = "urn:oasis:names:tc:SAML:2.0:assertion";
/// WS-Policy 1.5 namespace, used for `AppliesTo` unless overridden
pub const WSP_NS: &str = "http://www.w3.org/ns/ws-policy";
/// The WS-Policy 2004/09 submission namespace
pub const WSP_2004_NS: &str = "http://schemas.xmlsoap.org/ws/2004/09/policy";
/// WS-Addressing 1.0 namespace
pub const WSA_NS: &str = "http://www.w3.org/2005/08/addressing";
/// WS-Trust 1.4 namespace, which defines `ActAs`
pub const WST_2008_02_NS: &str = "http://docs.oasis-open.org/ws-sx/ws-trust/200802";
/// The information card identity namespace, also the default claims dialect
pub const IDENTITY_NS: &str = "http://schemas.xmlsoap.org/ws/2005/05/identity";

pub(crate) const WSSE_BASE64_ENCODING: &str = "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-soap-message-security-1.0#Base64Binary";
pub(crate) const GSS_WRAP_ALGORITHM_SUFFIX: &str = "spnego#GSS_Wrap";

pub(crate) fn wsu(local: &str) -> XmlName {
    XmlName::new(WSU_NS, "wsu", local)
}

pub(crate) fn dsig(local: &str) -> XmlName {
    XmlName::new(DSIG_NS, "ds", local)
}

pub(crate) fn is_secure_conversation_namespace(namespace: &str) -> bool {
    [TrustVersion::V2005_02, TrustVersion::V2005_12]
        .iter()
        .any(|v| v.secure_conversation_namespace() == namespace)
}

/// The revision of the WS-Trust protocol spoken with the issuer
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TrustVersion {
    /// The February 2005 submission
    V2005_02,
    /// The OASIS WS-Trust 1.3 standard
    V2005_12,
}

impl Default for TrustVersion {
    fn default() -> Self {
        Self::V2005_12
    }
}

impl TrustVersion {
    /// The trust namespace for this revision
    pub const fn namespace(self) -> &'static str {
        match self {
            Self::V2005_02 => "http://schemas.xmlsoap.org/ws/2005/02/trust",
            Self::V2005_12 => "http://docs.oasis-open.org/ws-sx/ws-trust/200512",
        }
    }

    /// The matching WS-SecureConversation namespace
    pub const fn secure_conversation_namespace(self) -> &'static str {
        match self {
            Self::V2005_02 => "http://schemas.xmlsoap.org/ws/2005/02/sc",
            Self::V2005_12 => "http://docs.oasis-open.org/ws-sx/ws-secureconversation/200512",
        }
    }

    /// The token type URI of a security context token
    pub const fn sct_token_type(self) -> &'static str {
        match self {
            Self::V2005_02 => "http://schemas.xmlsoap.org/ws/2005/02/sc/sct",
            Self::V2005_12 => "http://docs.oasis-open.org/ws-sx/ws-secureconversation/200512/sct",
        }
    }

    /// Whether template elements are sent inside `SecondaryParameters`
    pub const fn uses_secondary_parameters(self) -> bool {
        matches!(self, Self::V2005_12)
    }

    /// Recognizes a trust namespace URI
    pub fn from_namespace(namespace: &str) -> Option<Self> {
        [Self::V2005_12, Self::V2005_02]
            .iter()
            .copied()
            .find(|v| v.namespace() == namespace)
    }

    /// The full `RequestType` URI for an operation
    pub fn request_type(self, operation: Operation) -> String {
        format!("{}{}", self.namespace(), operation.request_type_suffix())
    }

    /// The full `KeyType` URI for a key type
    pub fn key_type(self, key_type: KeyType) -> String {
        format!("{}{}", self.namespace(), key_type.suffix())
    }

    /// The SOAP action used for an operation
    pub fn action(self, operation: Operation, secure_conversation: bool) -> String {
        let suffix = match (operation, secure_conversation) {
            (Operation::Issue, false) => "/RST/Issue",
            (Operation::Issue, true) => "/RST/SCT",
            (Operation::Renew, false) => "/RST/Renew",
            (Operation::Renew, true) => "/RST/SCT/Renew",
            (Operation::Validate, _) => "/RST/Validate",
            (Operation::Cancel, false) => "/RST/Cancel",
            (Operation::Cancel, true) => "/RST/SCT/Cancel",
        };
        format!("{}{}", self.namespace(), suffix)
    }

    pub(crate) fn psha1_algorithm(self) -> String {
        format!("{}/CK/PSHA1", self.namespace())
    }

    pub(crate) fn nonce_type(self) -> String {
        format!("{}/Nonce", self.namespace())
    }

    pub(crate) fn spnego_value_type(self) -> String {
        format!("{}/spnego", self.namespace())
    }

    pub(crate) fn status_token_type(self) -> String {
        format!("{}/RSTR/Status", self.namespace())
    }

    pub(crate) fn name(self, local: &str) -> XmlName {
        XmlName::new(self.namespace(), "wst", local)
    }

    pub(crate) fn element(self, local: &str) -> XmlElement {
        XmlElement::new(self.name(local))
    }

    pub(crate) fn text_element(self, local: &str, text: impl Into<String>) -> XmlElement {
        self.element(local).with_text(text)
    }
}

/// A WS-Trust binding operation, which doubles as the request type
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Issue a new token
    Issue,
    /// Renew a previously issued token
    Renew,
    /// Validate a token
    Validate,
    /// Cancel a previously issued token
    Cancel,
}

impl Operation {
    const fn request_type_suffix(self) -> &'static str {
        match self {
            Self::Issue => "/Issue",
            Self::Renew => "/Renew",
            Self::Validate => "/Validate",
            Self::Cancel => "/Cancel",
        }
    }
}

/// The proof-of-possession confirmation requested for a token
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum KeyType {
    /// Holder-of-key with a shared symmetric secret
    Symmetric,
    /// Holder-of-key with the requester's public key
    Public,
    /// No proof of possession
    Bearer,
}

impl KeyType {
    const fn suffix(self) -> &'static str {
        match self {
            Self::Symmetric => "/SymmetricKey",
            Self::Public => "/PublicKey",
            Self::Bearer => "/Bearer",
        }
    }

    /// Recognizes a `KeyType` URI from either protocol revision
    pub fn from_uri(uri: &str) -> Option<Self> {
        [Self::Symmetric, Self::Public, Self::Bearer]
            .iter()
            .copied()
            .find(|k| uri.ends_with(k.suffix()))
    }
}
