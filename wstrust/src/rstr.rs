//! Interpretation of `RequestSecurityTokenResponse` messages

use std::fmt;

use aliri_base64::Base64;
use aliri_clock::UnixTime;

use crate::{
    config::{StsClientConfig, UseKeyMaterial},
    error::{ProtocolError, TrustError},
    kdf::{self, KeyDerivationError},
    ns::{
        is_secure_conversation_namespace, TrustVersion, DSIG_NS, GSS_WRAP_ALGORITHM_SUFFIX,
        SAML1_NS, SAML2_NS, WSSE_NS, WSU_NS, XENC_NS,
    },
    time::parse_datetime,
    token::{ProofKey, TokenContent},
    transport::KeyDecryptor,
    xml::XmlElement,
    SecurityToken, TokenId, TokenType,
};

/// The token property holding the base64 certificate presented for public-key confirmation
pub const CONFIRMATION_CERTIFICATE_PROPERTY: &str = "confirmation-certificate";

/// A response body along with the request state needed to interpret it
///
/// Exists only for the duration of a single round-trip.
#[derive(Clone)]
pub struct ProtocolResponse {
    /// The response body
    pub document: XmlElement,
    /// Entropy sent with the request, if any
    pub requestor_entropy: Option<Vec<u8>>,
    /// The key size requested, in bits
    pub key_size: u32,
    /// Key material presented for public-key confirmation
    pub use_key: Option<UseKeyMaterial>,
}

impl fmt::Debug for ProtocolResponse {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ProtocolResponse")
            .field("document", &self.document.name().local_name())
            .field(
                "requestor_entropy",
                &self.requestor_entropy.as_ref().map(|_| "***"),
            )
            .field("key_size", &self.key_size)
            .finish()
    }
}

/// The result of a validate request
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidationOutcome {
    valid: bool,
    reason: Option<String>,
    token: Option<SecurityToken>,
}

impl ValidationOutcome {
    /// Whether the issuer considers the token valid
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// The reason given with the status, if any
    #[inline]
    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    /// A token issued in exchange for the validated one
    #[inline]
    pub fn token(&self) -> Option<&SecurityToken> {
        self.token.as_ref()
    }

    /// Takes the exchanged token
    pub fn into_token(self) -> Option<SecurityToken> {
        self.token
    }
}

#[derive(Default)]
struct ResponseParts<'a> {
    lifetime: Option<&'a XmlElement>,
    token: Option<&'a XmlElement>,
    token_text: Option<String>,
    attached_reference: Option<&'a XmlElement>,
    unattached_reference: Option<&'a XmlElement>,
    proof_token: Option<&'a XmlElement>,
    entropy: Option<&'a XmlElement>,
    token_type: Option<String>,
    key_size: Option<String>,
}

impl<'a> ResponseParts<'a> {
    fn locate(version: TrustVersion, rstr: &'a XmlElement) -> Self {
        let ns = version.namespace();
        let mut parts = Self::default();

        for child in rstr.children().filter(|c| c.name().namespace() == Some(ns)) {
            match child.name().local_name() {
                "Lifetime" => parts.lifetime = Some(child),
                "RequestedSecurityToken" => {
                    parts.token = child.first_child();
                    if parts.token.is_none() {
                        parts.token_text = non_empty(child.text());
                    }
                }
                "RequestedAttachedReference" => parts.attached_reference = child.first_child(),
                "RequestedUnattachedReference" => {
                    parts.unattached_reference = child.first_child()
                }
                "RequestedProofToken" => parts.proof_token = Some(child),
                "Entropy" => parts.entropy = Some(child),
                "TokenType" => parts.token_type = non_empty(child.text()),
                "KeySize" => parts.key_size = Some(child.text()),
                _ => {}
            }
        }

        parts
    }
}

type IdStrategy = fn(&ResponseParts<'_>) -> Option<String>;

/// Ways of recovering the identifier of an issued token, in order of preference
const ID_STRATEGIES: &[IdStrategy] = &[
    embedded_id,
    attached_reference_id,
    unattached_reference_id,
    wsu_id,
    encrypted_assertion_id,
];

fn embedded_id(parts: &ResponseParts<'_>) -> Option<String> {
    let token = parts.token?;
    let name = token.name();
    let id = match (name.namespace(), name.local_name()) {
        (Some(SAML1_NS), "Assertion") => token.attribute("AssertionID").map(String::from),
        (Some(SAML2_NS), "Assertion") => token.attribute("ID").map(String::from),
        _ => reference_id(token),
    };
    id.and_then(non_empty)
}

fn attached_reference_id(parts: &ResponseParts<'_>) -> Option<String> {
    parts.attached_reference.and_then(reference_id)
}

fn unattached_reference_id(parts: &ResponseParts<'_>) -> Option<String> {
    parts.unattached_reference.and_then(reference_id)
}

fn wsu_id(parts: &ResponseParts<'_>) -> Option<String> {
    parts.token.and_then(element_id)
}

fn encrypted_assertion_id(parts: &ResponseParts<'_>) -> Option<String> {
    parts
        .token
        .filter(|t| t.is(SAML2_NS, "EncryptedAssertion"))
        .and_then(XmlElement::first_child)
        .and_then(element_id)
}

fn element_id(element: &XmlElement) -> Option<String> {
    element
        .attribute_ns(WSU_NS, "Id")
        .or_else(|| element.attribute("Id"))
        .map(String::from)
        .and_then(non_empty)
}

/// Reads the identifier out of a security token reference or a context token
fn reference_id(reference: &XmlElement) -> Option<String> {
    let child = reference.first_child()?;
    let name = child.name();
    let id = match (name.namespace(), name.local_name()) {
        (Some(DSIG_NS), "KeyInfo") | (Some(WSSE_NS), "KeyIdentifier") => child.text(),
        (Some(WSSE_NS), "Reference") => child.attribute("URI")?.trim_start_matches('#').to_owned(),
        (Some(ns), "Identifier") if is_secure_conversation_namespace(ns) => child.text(),
        _ => return None,
    };
    non_empty(id)
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else if trimmed.len() == value.len() {
        Some(value)
    } else {
        Some(trimmed.to_owned())
    }
}

fn unwrap_response(document: &XmlElement) -> Result<&XmlElement, ProtocolError> {
    let rstr = if document.name().local_name() == "RequestSecurityTokenResponseCollection" {
        document
            .first_child()
            .ok_or_else(|| ProtocolError::UnexpectedElement {
                local: document.name().local_name().to_owned(),
            })?
    } else {
        document
    };

    if rstr.name().local_name() == "RequestSecurityTokenResponse" {
        Ok(rstr)
    } else {
        Err(ProtocolError::UnexpectedElement {
            local: rstr.name().local_name().to_owned(),
        })
    }
}

/// Extracts the issued token from a response
///
/// The token is stamped with the issuer address from `config`. A proof key is attached when
/// the response carries one, or when requester entropy was sent and the issuer returned no
/// proof token, in which case that entropy is the key.
pub async fn parse_issued_token(
    config: &StsClientConfig,
    response: &ProtocolResponse,
    decryptor: Option<&dyn KeyDecryptor>,
) -> Result<SecurityToken, TrustError> {
    let version = config.version;
    let rstr = unwrap_response(&response.document)?;
    let parts = ResponseParts::locate(version, rstr);
    if parts.token.is_none() && parts.token_text.is_none() {
        return Err(ProtocolError::MissingToken.into());
    }

    let id = ID_STRATEGIES
        .iter()
        .find_map(|strategy| strategy(&parts))
        .ok_or(ProtocolError::MissingIdentifier)?;

    let mut token = SecurityToken::new(TokenId::new(id));

    if let Some(element) = parts.token {
        token = token.with_content(TokenContent::Element(element.clone()));
    } else if let Some(text) = &parts.token_text {
        token = token.with_content(TokenContent::Text(text.clone()));
    }
    if let Some(reference) = parts.attached_reference {
        token = token.with_attached_reference(reference.clone());
    }
    if let Some(reference) = parts.unattached_reference {
        token = token.with_unattached_reference(reference.clone());
    }
    if let Some(location) = config.location() {
        token = token.with_issuer_address(location);
    }
    if let Some(token_type) = &parts.token_type {
        token = token.with_token_type(TokenType::new(token_type.clone()));
    }

    if let Some(lifetime) = parts.lifetime {
        if let Some(created) = lifetime_instant(lifetime, "Created")? {
            token = token.with_created(created);
        }
        if let Some(expires) = lifetime_instant(lifetime, "Expires")? {
            token = token.with_expires(expires);
        }
    }

    if config.require_server_entropy
        && response.requestor_entropy.is_some()
        && parts.entropy.is_none()
    {
        return Err(ProtocolError::MissingServerEntropy.into());
    }

    if let Some(secret) = proof_key(version, &parts, response, decryptor).await? {
        token = token.with_secret(ProofKey::new(secret));
    }

    if let Some(certificate) = response.use_key.as_ref().and_then(|k| k.certificate.as_ref()) {
        token.set_property(
            CONFIRMATION_CERTIFICATE_PROPERTY,
            Base64::from_raw(certificate.clone()).to_string(),
        );
    }

    Ok(token)
}

/// Interprets the response to a validate request
///
/// A token is returned alongside the status when the issuer exchanged the validated token for
/// a new one.
pub async fn parse_validation(
    config: &StsClientConfig,
    response: &ProtocolResponse,
    decryptor: Option<&dyn KeyDecryptor>,
) -> Result<ValidationOutcome, TrustError> {
    let version = config.version;
    let ns = version.namespace();
    let rstr = unwrap_response(&response.document)?;

    let status = rstr.child(ns, "Status");
    let valid = status
        .and_then(|s| s.child(ns, "Code"))
        .map_or(false, |code| code.text().trim().ends_with("/status/valid"));
    let reason = status
        .and_then(|s| s.child(ns, "Reason"))
        .and_then(|r| non_empty(r.text()));

    let token = if rstr.child(ns, "RequestedSecurityToken").is_some() {
        Some(parse_issued_token(config, response, decryptor).await?)
    } else {
        None
    };

    Ok(ValidationOutcome {
        valid,
        reason,
        token,
    })
}

/// Whether the response confirms that the token was cancelled
pub fn parse_cancellation(
    version: TrustVersion,
    document: &XmlElement,
) -> Result<bool, ProtocolError> {
    let rstr = unwrap_response(document)?;
    Ok(rstr
        .child(version.namespace(), "RequestedTokenCancelled")
        .is_some())
}

fn lifetime_instant(lifetime: &XmlElement, local: &str) -> Result<Option<UnixTime>, ProtocolError> {
    lifetime
        .child(WSU_NS, local)
        .map(|e| parse_datetime(&e.text()))
        .transpose()
}

async fn proof_key(
    version: TrustVersion,
    parts: &ResponseParts<'_>,
    response: &ProtocolResponse,
    decryptor: Option<&dyn KeyDecryptor>,
) -> Result<Option<Vec<u8>>, TrustError> {
    let proof = match parts.proof_token.and_then(XmlElement::first_child) {
        Some(proof) => proof,
        None => return Ok(response.requestor_entropy.clone()),
    };

    let ns = version.namespace();

    if proof.is(ns, "BinarySecret") {
        Ok(Some(decode_binary_secret(proof)?))
    } else if proof.is(XENC_NS, "EncryptedKey") {
        Ok(Some(decrypt_key(proof, decryptor).await?))
    } else if proof.is(ns, "ComputedKey") {
        let algorithm = proof.text();
        let algorithm = algorithm.trim();
        if !algorithm.is_empty() && !algorithm.ends_with("/CK/PSHA1") {
            return Err(KeyDerivationError::UnsupportedAlgorithm {
                algorithm: algorithm.to_owned(),
            }
            .into());
        }

        let issuer_entropy = match parts.entropy.and_then(XmlElement::first_child) {
            Some(e) if e.is(XENC_NS, "EncryptedKey") => decrypt_key(e, decryptor).await?,
            Some(e) if e.is(ns, "BinarySecret") => decode_binary_secret(e)?,
            _ => return Err(KeyDerivationError::MissingIssuerEntropy.into()),
        };

        let requestor_entropy = response
            .requestor_entropy
            .as_deref()
            .ok_or(KeyDerivationError::MissingRequesterEntropy)?;

        let bits = match parts.key_size.as_deref().map(str::trim) {
            Some(size) => size.parse().unwrap_or_else(|_| {
                tracing::warn!(
                    key_size = size,
                    requested = response.key_size,
                    "ignoring malformed key size in response, using requested key size"
                );
                response.key_size
            }),
            None => response.key_size,
        };
        let bits = if bits == 0 { 256 } else { bits };

        Ok(Some(kdf::psha1(
            requestor_entropy,
            &issuer_entropy,
            kdf::key_length(bits)?,
        )?))
    } else {
        Err(ProtocolError::UnsupportedProofToken {
            element: proof.name().local_name().to_owned(),
        }
        .into())
    }
}

fn decode_binary_secret(element: &XmlElement) -> Result<Vec<u8>, ProtocolError> {
    let encoded: String = element
        .text()
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();
    Base64::from_encoded(encoded)
        .map(Base64::into_inner)
        .map_err(ProtocolError::MalformedBinarySecret)
}

async fn decrypt_key(
    encrypted: &XmlElement,
    decryptor: Option<&dyn KeyDecryptor>,
) -> Result<Vec<u8>, TrustError> {
    let gss_wrapped = encrypted
        .child(XENC_NS, "EncryptionMethod")
        .and_then(|m| m.attribute("Algorithm"))
        .map_or(false, |a| a.ends_with(GSS_WRAP_ALGORITHM_SUFFIX));

    if gss_wrapped {
        let cipher_value = encrypted
            .child(XENC_NS, "CipherData")
            .and_then(|d| d.child(XENC_NS, "CipherValue"))
            .ok_or(ProtocolError::MissingCipherValue)?;
        return Ok(decode_binary_secret(cipher_value)?);
    }

    let decryptor = decryptor.ok_or(TrustError::NoDecryptor)?;
    decryptor
        .decrypt(encrypted)
        .await
        .map_err(TrustError::Decryption)
}

#[cfg(test)]
mod tests {
    use std::error;

    use async_trait::async_trait;
    use tracing_test::traced_test;

    use super::*;

    const WST: &str = "http://docs.oasis-open.org/ws-sx/ws-trust/200512";
    const LOCATION: &str = "https://sts.example.com/issue";

    fn config() -> StsClientConfig {
        StsClientConfig::default().with_location(LOCATION)
    }

    fn response(body: &str, requestor_entropy: Option<&[u8]>) -> ProtocolResponse {
        let document = XmlElement::parse(&format!(
            r#"<wst:RequestSecurityTokenResponse xmlns:wst="{}"
                   xmlns:wsu="{}" xmlns:wsse="{}"
                   xmlns:saml2="{}" xmlns:saml="{}" xmlns:xenc="{}">{}</wst:RequestSecurityTokenResponse>"#,
            WST, WSU_NS, WSSE_NS, SAML2_NS, SAML1_NS, XENC_NS, body
        ))
        .unwrap();

        ProtocolResponse {
            document,
            requestor_entropy: requestor_entropy.map(<[u8]>::to_vec),
            key_size: 256,
            use_key: None,
        }
    }

    async fn parse(body: &str, requestor_entropy: Option<&[u8]>) -> Result<SecurityToken, TrustError> {
        parse_issued_token(&config(), &response(body, requestor_entropy), None).await
    }

    fn hex(s: &str) -> Vec<u8> {
        (0..s.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&s[i..i + 2], 16).unwrap())
            .collect()
    }

    const SAML2_TOKEN: &str = r#"<wst:RequestedSecurityToken><saml2:Assertion ID="_saml2-id"/></wst:RequestedSecurityToken>"#;

    #[tokio::test]
    async fn saml_identifiers_win() {
        let token = parse(SAML2_TOKEN, None).await.unwrap();
        assert_eq!(token.id().as_str(), "_saml2-id");

        let saml1 = r#"<wst:RequestedSecurityToken><saml:Assertion AssertionID="_saml1-id"/></wst:RequestedSecurityToken>
                       <wst:RequestedAttachedReference><wsse:SecurityTokenReference><wsse:KeyIdentifier>ignored</wsse:KeyIdentifier></wsse:SecurityTokenReference></wst:RequestedAttachedReference>"#;
        assert_eq!(parse(saml1, None).await.unwrap().id().as_str(), "_saml1-id");
    }

    #[tokio::test]
    async fn context_token_identifier_is_used() {
        let body = r#"<wst:RequestedSecurityToken>
                        <wsc:SecurityContextToken xmlns:wsc="http://docs.oasis-open.org/ws-sx/ws-secureconversation/200512">
                          <wsc:Identifier>urn:uuid:sct-1</wsc:Identifier>
                        </wsc:SecurityContextToken>
                      </wst:RequestedSecurityToken>"#;
        assert_eq!(parse(body, None).await.unwrap().id().as_str(), "urn:uuid:sct-1");
    }

    #[tokio::test]
    async fn attached_reference_precedes_unattached() {
        let body = r##"<wst:RequestedSecurityToken><custom:Token xmlns:custom="urn:custom"/></wst:RequestedSecurityToken>
                      <wst:RequestedAttachedReference><wsse:SecurityTokenReference><wsse:Reference URI="#attached-id"/></wsse:SecurityTokenReference></wst:RequestedAttachedReference>
                      <wst:RequestedUnattachedReference><wsse:SecurityTokenReference><wsse:KeyIdentifier>unattached-id</wsse:KeyIdentifier></wsse:SecurityTokenReference></wst:RequestedUnattachedReference>"##;
        let token = parse(body, None).await.unwrap();

        assert_eq!(token.id().as_str(), "attached-id");
        assert!(token.attached_reference().is_some());
        assert!(token.unattached_reference().is_some());
    }

    #[tokio::test]
    async fn unattached_reference_is_used_without_attached() {
        let body = r#"<wst:RequestedSecurityToken><custom:Token xmlns:custom="urn:custom"/></wst:RequestedSecurityToken>
                      <wst:RequestedUnattachedReference><wsse:SecurityTokenReference><wsse:KeyIdentifier> unattached-id </wsse:KeyIdentifier></wsse:SecurityTokenReference></wst:RequestedUnattachedReference>"#;
        assert_eq!(parse(body, None).await.unwrap().id().as_str(), "unattached-id");
    }

    #[tokio::test]
    async fn wsu_id_is_a_fallback() {
        let body = r#"<wst:RequestedSecurityToken><wsse:BinarySecurityToken wsu:Id="bst-1">AAAA</wsse:BinarySecurityToken></wst:RequestedSecurityToken>"#;
        assert_eq!(parse(body, None).await.unwrap().id().as_str(), "bst-1");
    }

    #[tokio::test]
    async fn encrypted_assertion_uses_first_child_id() {
        let body = r#"<wst:RequestedSecurityToken><saml2:EncryptedAssertion><xenc:EncryptedData Id="enc-1"/></saml2:EncryptedAssertion></wst:RequestedSecurityToken>"#;
        assert_eq!(parse(body, None).await.unwrap().id().as_str(), "enc-1");
    }

    #[tokio::test]
    async fn missing_identifier_is_fatal() {
        let body = r#"<wst:RequestedSecurityToken><custom:Token xmlns:custom="urn:custom"/></wst:RequestedSecurityToken>"#;
        assert!(matches!(
            parse(body, None).await,
            Err(TrustError::Protocol(ProtocolError::MissingIdentifier))
        ));
    }

    #[tokio::test]
    async fn text_tokens_are_kept_as_text() {
        let body = r#"<wst:RequestedSecurityToken>eyJhbGciOiJub25lIn0.e30.</wst:RequestedSecurityToken>
                      <wst:RequestedUnattachedReference><wsse:SecurityTokenReference><wsse:KeyIdentifier>jwt-1</wsse:KeyIdentifier></wsse:SecurityTokenReference></wst:RequestedUnattachedReference>"#;
        let token = parse(body, None).await.unwrap();
        assert_eq!(
            token.content(),
            Some(&TokenContent::Text("eyJhbGciOiJub25lIn0.e30.".to_owned()))
        );
    }

    #[tokio::test]
    async fn metadata_and_lifetime_are_read() {
        let body = format!(
            r#"<wst:TokenType>urn:token-type</wst:TokenType>
               <wst:Lifetime><wsu:Created>2023-11-14T22:13:20.000Z</wsu:Created><wsu:Expires>2023-11-14T22:18:20Z</wsu:Expires></wst:Lifetime>
               {}"#,
            SAML2_TOKEN
        );
        let token = parse(&body, None).await.unwrap();

        assert_eq!(token.token_type().unwrap().as_str(), "urn:token-type");
        assert_eq!(token.issuer_address(), Some(LOCATION));
        assert_eq!(token.created(), Some(UnixTime(1_700_000_000)));
        assert_eq!(token.expires(), Some(UnixTime(1_700_000_300)));
        assert!(token.secret().is_none());
    }

    #[tokio::test]
    async fn invalid_lifetime_is_a_protocol_error() {
        let body = format!(
            r#"<wst:Lifetime><wsu:Expires>soon</wsu:Expires></wst:Lifetime>{}"#,
            SAML2_TOKEN
        );
        assert!(matches!(
            parse(&body, None).await,
            Err(TrustError::Protocol(ProtocolError::InvalidTimestamp { .. }))
        ));
    }

    #[tokio::test]
    async fn collection_wrapper_is_unwrapped() {
        let document = XmlElement::parse(&format!(
            r#"<wst:RequestSecurityTokenResponseCollection xmlns:wst="{0}" xmlns:saml2="{1}">
                 <wst:RequestSecurityTokenResponse>
                   <wst:RequestedSecurityToken><saml2:Assertion ID="_wrapped"/></wst:RequestedSecurityToken>
                 </wst:RequestSecurityTokenResponse>
               </wst:RequestSecurityTokenResponseCollection>"#,
            WST, SAML2_NS
        ))
        .unwrap();
        let response = ProtocolResponse {
            document,
            requestor_entropy: None,
            key_size: 256,
            use_key: None,
        };

        let token = parse_issued_token(&config(), &response, None).await.unwrap();
        assert_eq!(token.id().as_str(), "_wrapped");
    }

    #[tokio::test]
    async fn unexpected_root_is_rejected() {
        let response = ProtocolResponse {
            document: XmlElement::parse("<Fault/>").unwrap(),
            requestor_entropy: None,
            key_size: 256,
            use_key: None,
        };
        assert!(matches!(
            parse_issued_token(&config(), &response, None).await,
            Err(TrustError::Protocol(ProtocolError::UnexpectedElement { local })) if local == "Fault"
        ));
    }

    #[tokio::test]
    async fn binary_secret_is_the_proof_key() {
        let body = format!(
            r#"{}<wst:RequestedProofToken><wst:BinarySecret>cmF3LXByb29mLWtl
                 eS0wMTIzNDU2Nzg5YWJjZGVmISE=</wst:BinarySecret></wst:RequestedProofToken>"#,
            SAML2_TOKEN
        );
        let token = parse(&body, Some(b"ignored")).await.unwrap();
        assert_eq!(
            token.secret().unwrap().as_slice(),
            b"raw-proof-key-0123456789abcdef!!"
        );
    }

    #[tokio::test]
    async fn computed_key_is_derived_with_psha1() {
        let body = format!(
            r#"{}<wst:RequestedProofToken><wst:ComputedKey>{}/CK/PSHA1</wst:ComputedKey></wst:RequestedProofToken>
               <wst:Entropy><wst:BinarySecret>aXNzdWVyLWVudHJvcHk=</wst:BinarySecret></wst:Entropy>"#,
            SAML2_TOKEN, WST
        );
        let token = parse(&body, Some(b"requestor-entropy")).await.unwrap();
        assert_eq!(
            token.secret().unwrap().as_slice(),
            hex("0381e0cdb8f1914dc4aaf86e07c3a000ecc83e860ff5f01108b67331c7bad2c5").as_slice()
        );

        let sized = format!(r#"{}<wst:KeySize>128</wst:KeySize>"#, body);
        let token = parse(&sized, Some(b"requestor-entropy")).await.unwrap();
        assert_eq!(
            token.secret().unwrap().as_slice(),
            hex("0381e0cdb8f1914dc4aaf86e07c3a000").as_slice()
        );
    }

    #[tokio::test]
    #[traced_test]
    async fn malformed_key_size_falls_back_to_requested_size() {
        let body = format!(
            r#"{}<wst:RequestedProofToken><wst:ComputedKey>{}/CK/PSHA1</wst:ComputedKey></wst:RequestedProofToken>
               <wst:Entropy><wst:BinarySecret>aXNzdWVyLWVudHJvcHk=</wst:BinarySecret></wst:Entropy>
               <wst:KeySize>large</wst:KeySize>"#,
            SAML2_TOKEN, WST
        );
        let token = parse(&body, Some(b"requestor-entropy")).await.unwrap();

        assert_eq!(token.secret().unwrap().as_slice().len(), 32);
        assert!(logs_contain("ignoring malformed key size in response"));
    }

    #[tokio::test]
    async fn out_of_range_key_sizes_are_rejected() {
        for size in &["4", "1048576"] {
            let body = format!(
                r#"{}<wst:RequestedProofToken><wst:ComputedKey>{}/CK/PSHA1</wst:ComputedKey></wst:RequestedProofToken>
                   <wst:Entropy><wst:BinarySecret>aXNzdWVyLWVudHJvcHk=</wst:BinarySecret></wst:Entropy>
                   <wst:KeySize>{}</wst:KeySize>"#,
                SAML2_TOKEN, WST, size
            );
            assert!(matches!(
                parse(&body, Some(b"requestor-entropy")).await,
                Err(TrustError::KeyDerivation(KeyDerivationError::UnsupportedKeySize { .. }))
            ));
        }
    }

    #[tokio::test]
    async fn response_without_requested_token_is_rejected() {
        let body = r#"<wst:RequestedUnattachedReference><wsse:SecurityTokenReference><wsse:KeyIdentifier>orphan</wsse:KeyIdentifier></wsse:SecurityTokenReference></wst:RequestedUnattachedReference>"#;
        assert!(matches!(
            parse(body, None).await,
            Err(TrustError::Protocol(ProtocolError::MissingToken))
        ));
    }

    #[tokio::test]
    async fn computed_key_without_issuer_entropy_fails() {
        let body = format!(
            r#"{}<wst:RequestedProofToken><wst:ComputedKey>{}/CK/PSHA1</wst:ComputedKey></wst:RequestedProofToken>"#,
            SAML2_TOKEN, WST
        );
        assert!(matches!(
            parse(&body, Some(b"requestor-entropy")).await,
            Err(TrustError::KeyDerivation(KeyDerivationError::MissingIssuerEntropy))
        ));
    }

    #[tokio::test]
    async fn computed_key_without_requestor_entropy_fails() {
        let body = format!(
            r#"{}<wst:RequestedProofToken><wst:ComputedKey/></wst:RequestedProofToken>
               <wst:Entropy><wst:BinarySecret>aXNzdWVyLWVudHJvcHk=</wst:BinarySecret></wst:Entropy>"#,
            SAML2_TOKEN
        );
        assert!(matches!(
            parse(&body, None).await,
            Err(TrustError::KeyDerivation(KeyDerivationError::MissingRequesterEntropy))
        ));
    }

    #[tokio::test]
    async fn unsupported_computed_key_algorithm_fails() {
        let body = format!(
            r#"{}<wst:RequestedProofToken><wst:ComputedKey>urn:ck:hkdf</wst:ComputedKey></wst:RequestedProofToken>
               <wst:Entropy><wst:BinarySecret>aXNzdWVyLWVudHJvcHk=</wst:BinarySecret></wst:Entropy>"#,
            SAML2_TOKEN
        );
        assert!(matches!(
            parse(&body, Some(b"requestor-entropy")).await,
            Err(TrustError::KeyDerivation(KeyDerivationError::UnsupportedAlgorithm { .. }))
        ));
    }

    #[tokio::test]
    async fn requestor_entropy_is_the_key_without_proof_token() {
        let token = parse(SAML2_TOKEN, Some(b"requestor-entropy")).await.unwrap();
        assert_eq!(token.secret().unwrap().as_slice(), b"requestor-entropy");
    }

    #[tokio::test]
    async fn required_server_entropy_must_be_present() {
        let config = config().with_require_server_entropy(true);
        let result = parse_issued_token(
            &config,
            &response(SAML2_TOKEN, Some(b"requestor-entropy")),
            None,
        )
        .await;
        assert!(matches!(
            result,
            Err(TrustError::Protocol(ProtocolError::MissingServerEntropy))
        ));
    }

    #[tokio::test]
    async fn unknown_proof_token_shape_is_rejected() {
        let body = format!(
            r#"{}<wst:RequestedProofToken><custom:Key xmlns:custom="urn:custom"/></wst:RequestedProofToken>"#,
            SAML2_TOKEN
        );
        assert!(matches!(
            parse(&body, None).await,
            Err(TrustError::Protocol(ProtocolError::UnsupportedProofToken { element })) if element == "Key"
        ));
    }

    #[tokio::test]
    async fn gss_wrapped_keys_are_passed_through() {
        let body = format!(
            r#"{}<wst:RequestedProofToken><xenc:EncryptedKey>
                 <xenc:EncryptionMethod Algorithm="http://schemas.xmlsoap.org/2005/02/trust/spnego#GSS_Wrap"/>
                 <xenc:CipherData><xenc:CipherValue>Z3NzLXdyYXBwZWQ=</xenc:CipherValue></xenc:CipherData>
               </xenc:EncryptedKey></wst:RequestedProofToken>"#,
            SAML2_TOKEN
        );
        let token = parse(&body, None).await.unwrap();
        assert_eq!(token.secret().unwrap().as_slice(), b"gss-wrapped");
    }

    struct FixedDecryptor;

    #[async_trait]
    impl KeyDecryptor for FixedDecryptor {
        async fn decrypt(
            &self,
            _encrypted_key: &XmlElement,
        ) -> Result<Vec<u8>, Box<dyn error::Error + Send + Sync + 'static>> {
            Ok(b"decrypted".to_vec())
        }
    }

    #[tokio::test]
    async fn encrypted_keys_need_a_decryptor() {
        let body = format!(
            r#"{}<wst:RequestedProofToken><xenc:EncryptedKey>
                 <xenc:EncryptionMethod Algorithm="http://www.w3.org/2001/04/xmlenc#rsa-oaep-mgf1p"/>
               </xenc:EncryptedKey></wst:RequestedProofToken>"#,
            SAML2_TOKEN
        );

        assert!(matches!(
            parse(&body, None).await,
            Err(TrustError::NoDecryptor)
        ));

        let token = parse_issued_token(&config(), &response(&body, None), Some(&FixedDecryptor))
            .await
            .unwrap();
        assert_eq!(token.secret().unwrap().as_slice(), b"decrypted");
    }

    #[tokio::test]
    async fn parsing_is_deterministic() {
        let body = format!(
            r#"{}<wst:RequestedProofToken><wst:ComputedKey>{}/CK/PSHA1</wst:ComputedKey></wst:RequestedProofToken>
               <wst:Entropy><wst:BinarySecret>aXNzdWVyLWVudHJvcHk=</wst:BinarySecret></wst:Entropy>"#,
            SAML2_TOKEN, WST
        );
        let response = response(&body, Some(b"requestor-entropy"));

        let first = parse_issued_token(&config(), &response, None).await.unwrap();
        let second = parse_issued_token(&config(), &response, None).await.unwrap();
        assert!(!first.id().as_str().is_empty());
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn validation_status_is_read() {
        let valid = response(
            &format!(
                r#"<wst:Status><wst:Code>{}/status/valid</wst:Code></wst:Status>"#,
                WST
            ),
            None,
        );
        let outcome = parse_validation(&config(), &valid, None).await.unwrap();
        assert!(outcome.is_valid());
        assert!(outcome.token().is_none());

        let invalid = response(
            &format!(
                r#"<wst:Status><wst:Code>{}/status/invalid</wst:Code><wst:Reason>expired</wst:Reason></wst:Status>"#,
                WST
            ),
            None,
        );
        let outcome = parse_validation(&config(), &invalid, None).await.unwrap();
        assert!(!outcome.is_valid());
        assert_eq!(outcome.reason(), Some("expired"));
    }

    #[tokio::test]
    async fn validation_may_exchange_the_token() {
        let body = format!(
            r#"<wst:Status><wst:Code>{}/status/valid</wst:Code></wst:Status>{}"#,
            WST, SAML2_TOKEN
        );
        let outcome = parse_validation(&config(), &response(&body, None), None)
            .await
            .unwrap();
        assert_eq!(outcome.into_token().unwrap().id().as_str(), "_saml2-id");
    }

    #[test]
    fn cancellation_is_confirmed() {
        let confirmed = response("<wst:RequestedTokenCancelled/>", None);
        assert!(parse_cancellation(TrustVersion::V2005_12, &confirmed.document).unwrap());

        let silent = response("", None);
        assert!(!parse_cancellation(TrustVersion::V2005_12, &silent.document).unwrap());
    }
}
