use std::error;

use thiserror::Error;

use crate::{
    claims::ClaimsError, delegation::DelegationError, kdf::KeyDerivationError, ns::Operation,
    xml::XmlError,
};

/// A malformed or incomplete response from the issuer
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The response body was not the expected element
    #[error("expected a `RequestSecurityTokenResponse`, found `{local}`")]
    UnexpectedElement {
        /// The local name of the element found instead
        local: String,
    },
    /// No strategy could recover an identifier for the issued token
    #[error("no identifier could be found for the issued token")]
    MissingIdentifier,
    /// The response did not carry a requested security token
    #[error("the response carries no requested security token")]
    MissingToken,
    /// The requested proof token had a shape that is not understood
    #[error("unsupported proof token `{element}`")]
    UnsupportedProofToken {
        /// The local name of the proof token element
        element: String,
    },
    /// A `BinarySecret` was not valid base64
    #[error("binary secret was not valid base64")]
    MalformedBinarySecret(#[source] aliri_base64::InvalidBase64Data),
    /// A lifetime timestamp could not be read
    #[error("invalid timestamp `{value}`")]
    InvalidTimestamp {
        /// The timestamp as sent
        value: String,
    },
    /// The issuer was required to contribute entropy, but did not
    #[error("the issuer was required to send entropy, but none was found")]
    MissingServerEntropy,
    /// A GSS-wrapped key had no cipher value
    #[error("encrypted key has no cipher value")]
    MissingCipherValue,
    /// The token has nothing that can identify it to the issuer
    #[error("token carries nothing that can be sent as the {operation:?} target")]
    MissingTarget {
        /// The operation that needed a target
        operation: Operation,
    },
    /// The response could not be read as XML
    #[error(transparent)]
    Xml(#[from] XmlError),
}

/// An error raised during a round-trip with a security token service
#[derive(Debug, Error)]
pub enum TrustError {
    /// The response was malformed or incomplete
    #[error("protocol error")]
    Protocol(#[from] ProtocolError),
    /// A proof key could not be derived, or entropy could not be generated
    #[error("key derivation failed")]
    KeyDerivation(#[from] KeyDerivationError),
    /// An encrypted proof key could not be decrypted
    #[error("unable to decrypt proof key")]
    Decryption(#[source] Box<dyn error::Error + Send + Sync + 'static>),
    /// An encrypted proof key was returned, but no decryptor is configured
    #[error("an encrypted proof key was returned, but no decryptor is configured")]
    NoDecryptor,
    /// Public-key confirmation was requested, but no key is configured
    #[error("public key confirmation requested, but no key is configured")]
    MissingUseKey,
    /// The transport failed to complete the round-trip
    #[error("round-trip to the token service failed")]
    Transport(#[source] Box<dyn error::Error + Send + Sync + 'static>),
    /// Requested claims could not be satisfied
    #[error("claims could not be satisfied")]
    Claims(#[from] ClaimsError),
    /// A delegation token could not be resolved
    #[error("delegation token could not be resolved")]
    Delegation(#[from] DelegationError),
}

impl From<XmlError> for TrustError {
    fn from(err: XmlError) -> Self {
        Self::Protocol(ProtocolError::Xml(err))
    }
}
