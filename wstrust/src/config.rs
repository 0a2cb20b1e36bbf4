//! Client configuration

use aliri_clock::DurationSecs;

use crate::{
    claims::ClaimCollection,
    ns::{KeyType, TrustVersion, WSA_NS, WSP_NS},
    xml::XmlElement,
    TokenType,
};

/// Public key material presented to the issuer for holder-of-key confirmation
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PublicKeyValue {
    /// An RSA public key
    Rsa {
        /// The big-endian modulus
        modulus: Vec<u8>,
        /// The big-endian public exponent
        exponent: Vec<u8>,
    },
    /// A DSA public key
    Dsa {
        /// The prime modulus
        p: Vec<u8>,
        /// The subprime divisor
        q: Vec<u8>,
        /// The generator
        g: Vec<u8>,
        /// The public value
        y: Vec<u8>,
    },
}

/// The key the requester proves possession of when asking for a public-key token
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UseKeyMaterial {
    /// The DER-encoded certificate holding the key
    pub certificate: Option<Vec<u8>>,
    /// The bare public key
    pub public_key: Option<PublicKeyValue>,
}

/// Claims sent with a request
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RequestClaims {
    /// A preformed `Claims` element, sent as is
    Element(XmlElement),
    /// A claim collection, serialized as a `wst:Claims` element
    Collection(ClaimCollection),
}

/// Configuration for an [`StsClient`][crate::StsClient]
///
/// Per-request overrides are applied through a session and reset after each round-trip; the
/// values here are the baseline.
#[derive(Clone, Debug)]
pub struct StsClientConfig {
    pub(crate) location: Option<String>,
    pub(crate) version: TrustVersion,
    pub(crate) require_client_entropy: bool,
    pub(crate) require_server_entropy: bool,
    pub(crate) key_size: u32,
    pub(crate) max_symmetric_key_bits: Option<u32>,
    pub(crate) token_type: Option<TokenType>,
    pub(crate) key_type: Option<KeyType>,
    pub(crate) send_key_type: bool,
    pub(crate) enable_applies_to: bool,
    pub(crate) enable_lifetime: bool,
    pub(crate) ttl: DurationSecs,
    pub(crate) send_renewing: bool,
    pub(crate) allow_renewing: bool,
    pub(crate) allow_renewing_after_expiry: bool,
    pub(crate) secure_conversation: bool,
    pub(crate) spnego: bool,
    pub(crate) context: Option<String>,
    pub(crate) addressing_namespace: String,
    pub(crate) wsp_namespace: String,
    pub(crate) use_certificate_for_confirmation_key_info: bool,
    pub(crate) use_key: Option<UseKeyMaterial>,
    pub(crate) claims: Option<RequestClaims>,
    pub(crate) template: Option<XmlElement>,
}

impl Default for StsClientConfig {
    /// The baseline configuration
    ///
    /// * WS-Trust 1.3 (05/12)
    /// * client entropy sent, server entropy optional
    /// * 256-bit keys
    /// * `AppliesTo` enabled, `Lifetime` disabled with a 300 second TTL when enabled
    /// * `Renewing` sent, renewal allowed but not after expiry
    fn default() -> Self {
        Self {
            location: None,
            version: TrustVersion::default(),
            require_client_entropy: true,
            require_server_entropy: false,
            key_size: 256,
            max_symmetric_key_bits: None,
            token_type: None,
            key_type: None,
            send_key_type: true,
            enable_applies_to: true,
            enable_lifetime: false,
            ttl: DurationSecs(300),
            send_renewing: true,
            allow_renewing: true,
            allow_renewing_after_expiry: false,
            secure_conversation: false,
            spnego: false,
            context: None,
            addressing_namespace: WSA_NS.to_owned(),
            wsp_namespace: WSP_NS.to_owned(),
            use_certificate_for_confirmation_key_info: false,
            use_key: None,
            claims: None,
            template: None,
        }
    }
}

impl StsClientConfig {
    /// Constructs the baseline configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the issuer address
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Sets the protocol revision
    pub fn with_version(mut self, version: TrustVersion) -> Self {
        self.version = version;
        self
    }

    /// Sets whether requester entropy is sent for symmetric keys
    pub fn with_require_client_entropy(mut self, required: bool) -> Self {
        self.require_client_entropy = required;
        self
    }

    /// Sets whether the issuer must contribute entropy to symmetric keys
    pub fn with_require_server_entropy(mut self, required: bool) -> Self {
        self.require_server_entropy = required;
        self
    }

    /// Sets the requested key size in bits
    ///
    /// A size of zero requests 256-bit keys.
    pub fn with_key_size(mut self, bits: u32) -> Self {
        self.key_size = bits;
        self
    }

    /// Sets the maximum symmetric key length allowed by policy, which sizes the entropy nonce
    pub fn with_max_symmetric_key_bits(mut self, bits: u32) -> Self {
        self.max_symmetric_key_bits = Some(bits);
        self
    }

    /// Sets the requested token type
    pub fn with_token_type(mut self, token_type: TokenType) -> Self {
        self.token_type = Some(token_type);
        self
    }

    /// Sets the requested key type
    pub fn with_key_type(mut self, key_type: KeyType) -> Self {
        self.key_type = Some(key_type);
        self
    }

    /// Sets whether a symmetric `KeyType` is sent when no key type is configured
    pub fn with_send_key_type(mut self, send: bool) -> Self {
        self.send_key_type = send;
        self
    }

    /// Sets whether `AppliesTo` is sent
    pub fn with_applies_to(mut self, enabled: bool) -> Self {
        self.enable_applies_to = enabled;
        self
    }

    /// Sets whether a requested `Lifetime` is sent
    pub fn with_lifetime(mut self, enabled: bool) -> Self {
        self.enable_lifetime = enabled;
        self
    }

    /// Sets the requested lifetime of issued tokens
    pub fn with_ttl(mut self, ttl: DurationSecs) -> Self {
        self.ttl = ttl;
        self
    }

    /// Sets whether the `Renewing` element is sent
    pub fn with_send_renewing(mut self, send: bool) -> Self {
        self.send_renewing = send;
        self
    }

    /// Sets whether issued tokens may be renewed
    pub fn with_allow_renewing(mut self, allow: bool) -> Self {
        self.allow_renewing = allow;
        self
    }

    /// Sets whether issued tokens may be renewed after they expire
    pub fn with_allow_renewing_after_expiry(mut self, allow: bool) -> Self {
        self.allow_renewing_after_expiry = allow;
        self
    }

    /// Requests security context tokens
    pub fn with_secure_conversation(mut self, enabled: bool) -> Self {
        self.secure_conversation = enabled;
        self
    }

    /// Requests security context tokens through a SPNEGO binary exchange
    pub fn with_spnego(mut self, enabled: bool) -> Self {
        self.spnego = enabled;
        self
    }

    /// Sets the `Context` attribute sent on requests
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Sets the WS-Addressing namespace
    pub fn with_addressing_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.addressing_namespace = namespace.into();
        self
    }

    /// Sets the WS-Policy namespace used for `AppliesTo`
    pub fn with_wsp_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.wsp_namespace = namespace.into();
        self
    }

    /// Sends the full certificate rather than the bare key in `UseKey`
    pub fn with_certificate_for_confirmation_key_info(mut self, enabled: bool) -> Self {
        self.use_certificate_for_confirmation_key_info = enabled;
        self
    }

    /// Sets the key presented for public-key confirmation
    pub fn with_use_key(mut self, use_key: UseKeyMaterial) -> Self {
        self.use_key = Some(use_key);
        self
    }

    /// Sets the claims sent with every issue request
    pub fn with_claims(mut self, claims: RequestClaims) -> Self {
        self.claims = Some(claims);
        self
    }

    /// Sets the request template
    pub fn with_template(mut self, template: XmlElement) -> Self {
        self.template = Some(template);
        self
    }

    /// The issuer address
    pub fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }

    /// The protocol revision
    pub fn version(&self) -> TrustVersion {
        self.version
    }

    /// Whether issued tokens may be renewed
    pub fn allow_renewing(&self) -> bool {
        self.allow_renewing
    }

    /// Whether requests are scoped with `AppliesTo`
    pub fn applies_to_enabled(&self) -> bool {
        self.enable_applies_to
    }

    /// The requested lifetime of issued tokens
    pub fn ttl(&self) -> DurationSecs {
        self.ttl
    }

    pub(crate) fn effective_key_size(&self) -> u32 {
        if self.key_size == 0 {
            256
        } else {
            self.key_size
        }
    }
}
