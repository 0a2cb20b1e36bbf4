//! Construction of `RequestSecurityToken` messages
//!
//! The builders here are pure: they turn the effective client configuration and the
//! per-request inputs into a request body, and report the requester entropy they generated so
//! that the response can be turned into a proof key.

use std::fmt;

use aliri_base64::Base64;
use aliri_clock::UnixTime;

use crate::{
    config::{PublicKeyValue, StsClientConfig},
    error::{ProtocolError, TrustError},
    kdf,
    ns::{dsig, wsu, KeyType, Operation, TrustVersion, WSSE_BASE64_ENCODING, WST_2008_02_NS},
    time::format_datetime,
    token::TokenContent,
    transport::{MessageIntegrity, PolicyOverride, TrustRequest},
    xml::{XmlElement, XmlName},
    SecurityToken, TokenTypeRef,
};

/// Per-request inputs to an issue request
#[derive(Clone, Debug, Default)]
pub struct IssueContent {
    /// The address the token should apply to
    pub applies_to: Option<String>,
    /// A `Claims` element
    pub claims: Option<XmlElement>,
    /// The identity the token is requested on behalf of
    pub on_behalf_of: Option<XmlElement>,
    /// The identity the requester acts as
    pub act_as: Option<XmlElement>,
    /// A base64-encoded SPNEGO token
    pub binary_exchange: Option<String>,
}

/// A request body along with everything needed to send it and read the response
#[derive(Clone)]
pub struct BuiltRequest {
    /// The operation the request is sent through
    pub operation: Operation,
    /// The SOAP action
    pub action: String,
    /// The `RequestSecurityToken` element
    pub body: XmlElement,
    /// Entropy sent to the issuer, if any
    pub requestor_entropy: Option<Vec<u8>>,
    /// The requested key size in bits
    pub key_size: u32,
    /// A policy replacing the endpoint policy for this request
    pub policy_override: Option<PolicyOverride>,
    /// A token that secures the request
    pub securing_token: Option<SecurityToken>,
}

impl BuiltRequest {
    /// Converts into a transport request addressed to `location`
    pub fn to_transport_request(&self, location: Option<&str>) -> TrustRequest {
        TrustRequest {
            operation: self.operation,
            action: self.action.clone(),
            location: location.map(String::from),
            body: self.body.clone(),
            policy_override: self.policy_override.clone(),
            securing_token: self.securing_token.clone(),
        }
    }
}

impl fmt::Debug for BuiltRequest {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("BuiltRequest")
            .field("operation", &self.operation)
            .field("action", &self.action)
            .field(
                "requestor_entropy",
                &self.requestor_entropy.as_ref().map(|_| "***"),
            )
            .field("key_size", &self.key_size)
            .field("policy_override", &self.policy_override)
            .finish()
    }
}

#[derive(Default)]
struct TemplateOverrides {
    key_type: Option<String>,
    key_size: Option<u32>,
    token_type: bool,
}

/// Builds an issue request
pub fn build_issue(
    config: &StsClientConfig,
    content: &IssueContent,
    now: UnixTime,
) -> Result<BuiltRequest, TrustError> {
    let version = config.version;
    let mut rst = request_root(config);
    let template = copy_template(&mut rst, config);

    let send_key_type = config.send_key_type && !config.spnego;

    rst.push_child(version.text_element("RequestType", version.request_type(Operation::Issue)));

    if config.enable_applies_to {
        if let Some(address) = &content.applies_to {
            rst.push_child(applies_to(config, address));
        }
    }

    if let Some(claims) = &content.claims {
        rst.push_child(claims.clone());
    }

    if let Some(token) = &content.on_behalf_of {
        rst.push_child(version.element("OnBehalfOf").with_child(token.clone()));
    }

    let token_type = requested_token_type(config);
    let wrote_token_type = !template.token_type && token_type.is_some();
    if !template.token_type {
        if let Some(token_type) = &token_type {
            rst.push_child(version.text_element("TokenType", token_type.as_str()));
        }
    }

    if config.secure_conversation || config.enable_lifetime {
        rst.push_child(lifetime(version, now, config));
    }

    let key_type = match template.key_type {
        Some(uri) => KeyType::from_uri(&uri),
        None => {
            write_key_type(&mut rst, config, config.key_type, send_key_type, wrote_token_type)
        }
    };

    let wrote_key_size = template.key_size.is_some();
    let key_size = match template.key_size.unwrap_or_else(|| config.effective_key_size()) {
        0 => 256,
        bits => bits,
    };

    let requestor_entropy = match key_type {
        Some(KeyType::Symmetric) => write_symmetric_key(&mut rst, config, key_size, wrote_key_size)?,
        Some(KeyType::Public) => {
            rst.push_child(use_key(config)?);
            None
        }
        _ => {
            if config.spnego || config.secure_conversation {
                rst.push_child(key_size_element(version, key_size));
            }
            None
        }
    };

    if let Some(exchange) = &content.binary_exchange {
        rst.push_child(
            version
                .element("BinaryExchange")
                .with_attribute("EncodingType", WSSE_BASE64_ENCODING)
                .with_attribute("ValueType", version.spnego_value_type())
                .with_text(exchange.as_str()),
        );
    }

    if let Some(token) = &content.act_as {
        rst.push_child(
            XmlElement::new(XmlName::new(WST_2008_02_NS, "wst14", "ActAs")).with_child(token.clone()),
        );
    }

    if let Some(renewing) = renewing(config) {
        rst.push_child(renewing);
    }

    Ok(BuiltRequest {
        operation: Operation::Issue,
        action: version.action(Operation::Issue, config.secure_conversation),
        body: rst,
        requestor_entropy,
        key_size,
        policy_override: None,
        securing_token: None,
    })
}

/// Builds a renew request for a previously issued token
///
/// No new entropy is sent; the issuer keeps or replaces the proof key on its own.
pub fn build_renew(
    config: &StsClientConfig,
    token: &SecurityToken,
    now: UnixTime,
) -> Result<BuiltRequest, TrustError> {
    let version = config.version;
    let mut rst = request_root(config);
    let template = copy_template(&mut rst, config);

    rst.push_child(version.text_element("RequestType", version.request_type(Operation::Renew)));

    if config.enable_applies_to {
        if let Some(address) = token.issuer_address() {
            rst.push_child(applies_to(config, address));
        }
    }

    if !template.token_type {
        if let Some(token_type) = requested_token_type(config) {
            rst.push_child(version.text_element("TokenType", token_type));
        }
    }

    if config.secure_conversation || config.enable_lifetime {
        rst.push_child(lifetime(version, now, config));
    }

    let content = token.content().ok_or(ProtocolError::MissingTarget {
        operation: Operation::Renew,
    })?;
    rst.push_child(target(version, "RenewTarget", content));

    if let Some(renewing) = renewing(config) {
        rst.push_child(renewing);
    }

    Ok(BuiltRequest {
        operation: Operation::Renew,
        action: version.action(Operation::Renew, config.secure_conversation),
        body: rst,
        requestor_entropy: None,
        key_size: config.effective_key_size(),
        policy_override: None,
        securing_token: None,
    })
}

/// Builds a validate request
///
/// Without a token type, or with the status token type, only the status of the token is
/// requested. Any other token type asks the issuer to exchange the token, which negotiates a
/// key as an issue request would, defaulting to a bearer token.
pub fn build_validate(
    config: &StsClientConfig,
    token: &SecurityToken,
    token_type: Option<&TokenTypeRef>,
    claims: Option<&XmlElement>,
    validate_supported: bool,
    now: UnixTime,
) -> Result<BuiltRequest, TrustError> {
    let version = config.version;
    let token_type = token_type
        .map(|t| t.as_str().to_owned())
        .or_else(|| config.token_type.as_ref().map(|t| t.as_str().to_owned()))
        .unwrap_or_else(|| version.status_token_type());

    let mut rst = version.element("RequestSecurityToken");
    rst.push_child(version.text_element("RequestType", version.request_type(Operation::Validate)));
    rst.push_child(version.text_element("TokenType", token_type.as_str()));

    let key_size = config.effective_key_size();
    let mut requestor_entropy = None;

    if !token_type.ends_with("/RSTR/Status") {
        if config.enable_lifetime {
            rst.push_child(lifetime(version, now, config));
        }

        let key_type = config.key_type.unwrap_or(KeyType::Bearer);
        rst.push_child(version.text_element("KeyType", version.key_type(key_type)));

        match key_type {
            KeyType::Symmetric => {
                requestor_entropy = write_symmetric_key(&mut rst, config, key_size, false)?;
            }
            KeyType::Public => rst.push_child(use_key(config)?),
            KeyType::Bearer => {}
        }

        if let Some(renewing) = renewing(config) {
            rst.push_child(renewing);
        }
    }

    if let Some(claims) = claims {
        rst.push_child(claims.clone());
    }

    let mut validate_target = version.element("ValidateTarget");
    match token.content() {
        Some(TokenContent::Element(element)) => validate_target.push_child(element.clone()),
        Some(TokenContent::Text(text)) => validate_target = validate_target.with_text(text.as_str()),
        None => {}
    }
    rst.push_child(validate_target);

    let (operation, policy_override) = if validate_supported {
        (Operation::Validate, None)
    } else {
        (
            Operation::Issue,
            Some(PolicyOverride {
                addressing_namespace: config.addressing_namespace.clone(),
                message_integrity: None,
            }),
        )
    };

    Ok(BuiltRequest {
        operation,
        action: version.action(Operation::Validate, false),
        body: rst,
        requestor_entropy,
        key_size,
        policy_override,
        securing_token: Some(token.clone()),
    })
}

/// Builds a cancel request
///
/// When the issuer has no cancel operation, the request targets the token by reference and is
/// sent through the issue operation with the addressing headers signed.
pub fn build_cancel(
    config: &StsClientConfig,
    token: &SecurityToken,
    cancel_supported: bool,
) -> Result<BuiltRequest, TrustError> {
    let version = config.version;
    let mut rst = version.element("RequestSecurityToken");
    rst.push_child(version.text_element("RequestType", version.request_type(Operation::Cancel)));

    let by_reference = || {
        token
            .unattached_reference()
            .or_else(|| token.attached_reference())
            .cloned()
            .map(TokenContent::Element)
    };

    let content = if cancel_supported {
        token.content().cloned().or_else(by_reference)
    } else {
        by_reference()
    };

    let content = content.ok_or(ProtocolError::MissingTarget {
        operation: Operation::Cancel,
    })?;
    rst.push_child(target(version, "CancelTarget", &content));

    let (operation, policy_override) = if cancel_supported {
        (Operation::Cancel, None)
    } else {
        (
            Operation::Issue,
            Some(PolicyOverride {
                addressing_namespace: config.addressing_namespace.clone(),
                message_integrity: Some(MessageIntegrity::for_addressing(
                    &config.addressing_namespace,
                )),
            }),
        )
    };

    Ok(BuiltRequest {
        operation,
        action: version.action(Operation::Cancel, config.secure_conversation),
        body: rst,
        requestor_entropy: None,
        key_size: config.effective_key_size(),
        policy_override,
        securing_token: Some(token.clone()),
    })
}

fn request_root(config: &StsClientConfig) -> XmlElement {
    let rst = config.version.element("RequestSecurityToken");
    match &config.context {
        Some(context) => rst.with_attribute("Context", context.as_str()),
        None => rst,
    }
}

fn copy_template(rst: &mut XmlElement, config: &StsClientConfig) -> TemplateOverrides {
    let mut overrides = TemplateOverrides::default();

    let template = match &config.template {
        Some(t) if t.first_child().is_some() => t,
        _ => return overrides,
    };

    let mut copied = Vec::new();
    for child in template.children() {
        match child.name().local_name() {
            "KeyType" => overrides.key_type = Some(child.text().trim().to_owned()),
            "KeySize" => overrides.key_size = Some(template_key_size(child)),
            "TokenType" => overrides.token_type = true,
            _ => {}
        }
        copied.push(child.clone());
    }

    let version = config.version;
    if version.uses_secondary_parameters() {
        let mut secondary = version.element("SecondaryParameters");
        for child in copied {
            secondary.push_child(child);
        }
        rst.push_child(secondary);
    } else {
        for child in copied {
            rst.push_child(child);
        }
    }

    overrides
}

fn requested_token_type(config: &StsClientConfig) -> Option<String> {
    let sct = || config.version.sct_token_type().to_owned();
    if config.spnego {
        Some(sct())
    } else {
        config
            .token_type
            .as_ref()
            .map(|t| t.as_str().to_owned())
            .or_else(|| config.secure_conversation.then(sct))
    }
}

fn write_key_type(
    rst: &mut XmlElement,
    config: &StsClientConfig,
    key_type: Option<KeyType>,
    send_key_type: bool,
    wrote_token_type: bool,
) -> Option<KeyType> {
    let version = config.version;
    match key_type {
        None if config.secure_conversation => {
            if !wrote_token_type {
                rst.push_child(version.text_element("TokenType", version.sct_token_type()));
            }
            Some(KeyType::Symmetric)
        }
        None if send_key_type => {
            rst.push_child(version.text_element("KeyType", version.key_type(KeyType::Symmetric)));
            Some(KeyType::Symmetric)
        }
        None => None,
        Some(key_type) => {
            rst.push_child(version.text_element("KeyType", version.key_type(key_type)));
            Some(key_type)
        }
    }
}

fn write_symmetric_key(
    rst: &mut XmlElement,
    config: &StsClientConfig,
    key_size: u32,
    wrote_key_size: bool,
) -> Result<Option<Vec<u8>>, TrustError> {
    let version = config.version;

    if !wrote_key_size {
        rst.push_child(key_size_element(version, key_size));
    }

    if !config.require_client_entropy {
        return Ok(None);
    }

    let nonce_bits = config.max_symmetric_key_bits.unwrap_or(key_size);
    let nonce = kdf::generate_entropy(kdf::key_length(nonce_bits)?)?;

    rst.push_child(
        version.element("Entropy").with_child(
            version
                .text_element("BinarySecret", Base64::from_raw(nonce.clone()).to_string())
                .with_attribute("Type", version.nonce_type()),
        ),
    );
    rst.push_child(version.text_element("ComputedKeyAlgorithm", version.psha1_algorithm()));

    Ok(Some(nonce))
}

fn use_key(config: &StsClientConfig) -> Result<XmlElement, TrustError> {
    let material = config.use_key.as_ref().ok_or(TrustError::MissingUseKey)?;

    let certificate = material
        .certificate
        .as_ref()
        .filter(|_| config.use_certificate_for_confirmation_key_info || material.public_key.is_none());

    let key_info = XmlElement::new(dsig("KeyInfo"));
    let key_info = if let Some(certificate) = certificate {
        key_info.with_child(
            XmlElement::new(dsig("X509Data")).with_child(
                XmlElement::new(dsig("X509Certificate"))
                    .with_text(Base64::from_raw(certificate.clone()).to_string()),
            ),
        )
    } else if let Some(key) = &material.public_key {
        key_info.with_child(XmlElement::new(dsig("KeyValue")).with_child(key_value(key)))
    } else {
        return Err(TrustError::MissingUseKey);
    };

    Ok(config.version.element("UseKey").with_child(key_info))
}

fn key_value(key: &PublicKeyValue) -> XmlElement {
    let component = |local: &str, value: &[u8]| {
        XmlElement::new(dsig(local)).with_text(Base64::from_raw(value.to_vec()).to_string())
    };

    match key {
        PublicKeyValue::Rsa { modulus, exponent } => XmlElement::new(dsig("RSAKeyValue"))
            .with_child(component("Modulus", modulus))
            .with_child(component("Exponent", exponent)),
        PublicKeyValue::Dsa { p, q, g, y } => XmlElement::new(dsig("DSAKeyValue"))
            .with_child(component("P", p))
            .with_child(component("Q", q))
            .with_child(component("G", g))
            .with_child(component("Y", y)),
    }
}

/// A malformed size reads as 0, which selects the default key size
fn template_key_size(element: &XmlElement) -> u32 {
    let text = element.text();
    text.trim().parse().unwrap_or_else(|_| {
        tracing::warn!(key_size = text.trim(), "ignoring malformed template key size");
        0
    })
}

fn key_size_element(version: TrustVersion, bits: u32) -> XmlElement {
    version.text_element("KeySize", bits.to_string())
}

fn applies_to(config: &StsClientConfig, address: &str) -> XmlElement {
    let wsa = config.addressing_namespace.as_str();
    XmlElement::new(XmlName::new(config.wsp_namespace.as_str(), "wsp", "AppliesTo")).with_child(
        XmlElement::new(XmlName::new(wsa, "wsa", "EndpointReference"))
            .with_child(XmlElement::new(XmlName::new(wsa, "wsa", "Address")).with_text(address)),
    )
}

fn lifetime(version: TrustVersion, now: UnixTime, config: &StsClientConfig) -> XmlElement {
    version
        .element("Lifetime")
        .with_child(XmlElement::new(wsu("Created")).with_text(format_datetime(now)))
        .with_child(XmlElement::new(wsu("Expires")).with_text(format_datetime(now + config.ttl)))
}

fn renewing(config: &StsClientConfig) -> Option<XmlElement> {
    if !config.send_renewing {
        return None;
    }

    let mut renewing = config.version.element("Renewing");
    if !config.allow_renewing {
        renewing = renewing.with_attribute("Allow", "false");
    }
    if config.allow_renewing && config.allow_renewing_after_expiry {
        renewing = renewing.with_attribute("OK", "true");
    }
    Some(renewing)
}

fn target(version: TrustVersion, local: &str, content: &TokenContent) -> XmlElement {
    let target = version.element(local);
    match content {
        TokenContent::Element(element) => target.with_child(element.clone()),
        TokenContent::Text(text) => target.with_text(text.as_str()),
    }
}
