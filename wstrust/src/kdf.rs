//! Proof-key derivation for computed keys
//!
//! When both the requester and the issuer contribute entropy, the proof key is computed with
//! the `P_SHA-1` expansion from TLS 1.0: the requester entropy is the HMAC secret and the
//! issuer entropy is the seed.
//!
//! ```text
//! A(0) = seed
//! A(i) = HMAC-SHA1(secret, A(i - 1))
//! P_SHA1(secret, seed) = HMAC-SHA1(secret, A(1) || seed) || HMAC-SHA1(secret, A(2) || seed) || ...
//! ```

use std::convert::TryFrom;

use ring::{
    hmac,
    rand::{SecureRandom, SystemRandom},
};
use thiserror::Error;

/// Errors raised while deriving or generating key material
#[derive(Debug, Error)]
pub enum KeyDerivationError {
    /// The issuer expects a computed key, but the request carried no requester entropy
    #[error("a computed key was returned, but no requester entropy was sent")]
    MissingRequesterEntropy,
    /// The issuer expects a computed key, but its response carried no entropy
    #[error("a computed key was returned, but the issuer sent no entropy")]
    MissingIssuerEntropy,
    /// One of the entropy inputs was empty
    #[error("entropy used for key derivation must not be empty")]
    EmptyEntropy,
    /// A computed key algorithm other than `P_SHA1` was requested
    #[error("unsupported computed key algorithm `{algorithm}`")]
    UnsupportedAlgorithm {
        /// The algorithm URI sent by the issuer
        algorithm: String,
    },
    /// Issuer entropy could not be decoded
    #[error("issuer entropy was not valid base64")]
    MalformedEntropy(#[from] aliri_base64::InvalidBase64Data),
    /// The system random number generator failed
    #[error("unable to generate requester entropy")]
    RandomSource,
    /// A key size outside of the supported range was requested
    #[error("unsupported key size of {bits} bits")]
    UnsupportedKeySize {
        /// The requested key size in bits
        bits: u32,
    },
}

/// The smallest key size, in bits, that can be derived or requested
pub const MIN_KEY_SIZE_BITS: u32 = 8;

/// The largest key size, in bits, that can be derived or requested
pub const MAX_KEY_SIZE_BITS: u32 = 4096;

/// The number of bytes of key material needed for a key of `bits` bits
pub fn key_length(bits: u32) -> Result<usize, KeyDerivationError> {
    if !(MIN_KEY_SIZE_BITS..=MAX_KEY_SIZE_BITS).contains(&bits) {
        return Err(KeyDerivationError::UnsupportedKeySize { bits });
    }

    usize::try_from(bits / 8).map_err(|_| KeyDerivationError::UnsupportedKeySize { bits })
}

/// Derives `len` bytes of key material with `P_SHA1`
pub fn psha1(secret: &[u8], seed: &[u8], len: usize) -> Result<Vec<u8>, KeyDerivationError> {
    if secret.is_empty() || seed.is_empty() {
        return Err(KeyDerivationError::EmptyEntropy);
    }

    let key = hmac::Key::new(hmac::HMAC_SHA1_FOR_LEGACY_USE_ONLY, secret);
    let mut output = Vec::with_capacity(len);
    let mut a = hmac::sign(&key, seed);

    while output.len() < len {
        let mut ctx = hmac::Context::with_key(&key);
        ctx.update(a.as_ref());
        ctx.update(seed);
        let block = ctx.sign();

        let take = (len - output.len()).min(block.as_ref().len());
        output.extend_from_slice(&block.as_ref()[..take]);

        a = hmac::sign(&key, a.as_ref());
    }

    Ok(output)
}

/// Generates a fresh requester nonce of `len` bytes
pub fn generate_entropy(len: usize) -> Result<Vec<u8>, KeyDerivationError> {
    let mut nonce = vec![0; len];
    SystemRandom::new()
        .fill(&mut nonce)
        .map_err(|_| KeyDerivationError::RandomSource)?;
    Ok(nonce)
}
