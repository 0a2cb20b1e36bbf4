//! Collaborators that carry requests to the issuer and unwrap encrypted proof keys

use std::error;

use async_trait::async_trait;

use crate::{
    ns::Operation,
    xml::{XmlElement, XmlName},
    SecurityToken,
};

/// The addressing headers signed when a cancel request is secured at the message level
pub const SIGNED_ADDRESSING_HEADERS: [&str; 7] = [
    "To",
    "From",
    "FaultTo",
    "ReplyTo",
    "Action",
    "MessageID",
    "RelatesTo",
];

/// Message-level integrity requirements applied to a single request
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageIntegrity {
    /// Headers that must be covered by the signature
    pub signed_headers: Vec<XmlName>,
    /// Whether the message body must be signed
    pub sign_body: bool,
    /// Whether a security timestamp must be included
    pub include_timestamp: bool,
    /// Whether only whole headers and the whole body may be signed
    pub only_sign_entire_headers_and_body: bool,
}

impl MessageIntegrity {
    pub(crate) fn for_addressing(addressing_namespace: &str) -> Self {
        Self {
            signed_headers: SIGNED_ADDRESSING_HEADERS
                .iter()
                .map(|h| XmlName::new(addressing_namespace, "wsa", *h))
                .collect(),
            sign_body: true,
            include_timestamp: true,
            only_sign_entire_headers_and_body: true,
        }
    }
}

/// A security policy that replaces the endpoint's policy for a single request
///
/// Used when the issuer offers no dedicated operation for a request and it is sent through the
/// issue operation instead.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PolicyOverride {
    /// The WS-Addressing namespace the request must use
    pub addressing_namespace: String,
    /// Integrity requirements, if the request must be signed
    pub message_integrity: Option<MessageIntegrity>,
}

/// A request ready to be sent to the issuer
#[derive(Clone, Debug)]
pub struct TrustRequest {
    /// The binding operation to invoke
    pub operation: Operation,
    /// The SOAP action
    pub action: String,
    /// The address of the issuer, when configured
    pub location: Option<String>,
    /// The `RequestSecurityToken` body
    pub body: XmlElement,
    /// A policy replacing the endpoint policy, if any
    pub policy_override: Option<PolicyOverride>,
    /// A token that secures the request, such as the token being cancelled
    pub securing_token: Option<SecurityToken>,
}

/// Carries requests to a security token service
///
/// Timeouts and cancellation are the transport's concern; any failure it reports is treated
/// as a failed round-trip.
#[async_trait]
pub trait TrustTransport: Send + Sync {
    /// Whether the issuer offers the operation
    ///
    /// Validate and cancel requests are sent through the issue operation when this returns
    /// `false`.
    fn supports(&self, operation: Operation) -> bool {
        let _ = operation;
        true
    }

    /// Sends the request and returns the response body
    async fn invoke(
        &self,
        request: TrustRequest,
    ) -> Result<XmlElement, Box<dyn error::Error + Send + Sync + 'static>>;
}

/// Decrypts proof keys returned as `xenc:EncryptedKey`
#[async_trait]
pub trait KeyDecryptor: Send + Sync {
    /// Decrypts the key and returns the raw key material
    async fn decrypt(
        &self,
        encrypted_key: &XmlElement,
    ) -> Result<Vec<u8>, Box<dyn error::Error + Send + Sync + 'static>>;
}
