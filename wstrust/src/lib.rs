//! Client-side WS-Trust token lifecycle
//!
//! This library builds WS-Trust `RequestSecurityToken` messages for the issue, renew, validate,
//! and cancel bindings, and interprets the issuer's responses into [`SecurityToken`]s carrying
//! the proof key negotiated with the issuer.
//!
//! Messages are carried by a [`TrustTransport`][transport::TrustTransport] supplied by the
//! caller, so SOAP framing, transport security, and timeouts are left to the transport. When the
//! issuer returns an encrypted proof key, a [`KeyDecryptor`][transport::KeyDecryptor] is needed
//! to recover it. Keys computed from combined entropy are derived with the `P_SHA1` function
//! in [`kdf`].
//!
//! Requested claims may be resolved locally before a request is sent. A
//! [`ClaimsAggregator`][claims::ClaimsAggregator] consults each registered
//! [`ClaimSource`][claims::ClaimSource] and refuses the request when a mandatory claim cannot
//! be satisfied.
//!
//! ```
//! use std::sync::Arc;
//!
//! use wstrust::{transport::TrustTransport, StsClient, StsClientConfig, TokenRequestParams};
//!
//! # async fn example(transport: Arc<dyn TrustTransport>) -> Result<(), wstrust::TrustError> {
//! let config = StsClientConfig::new()
//!     .with_location("https://sts.example.com/services/trust")
//!     .with_key_size(256);
//!
//! let client = StsClient::new(config, transport);
//!
//! let token = client
//!     .request_security_token(
//!         &TokenRequestParams::new().with_applies_to("https://api.example.com/orders"),
//!     )
//!     .await?;
//!
//! tracing::info!(token.id = %token.id(), "issued token");
//! # Ok(())
//! # }
//! ```
//!
//! Caching issued tokens and renewing them before use is handled by the `wstrust_tokens`
//! crate.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

mod braids;
pub mod claims;
mod client;
pub mod config;
pub mod delegation;
mod error;
pub mod kdf;
pub mod ns;
pub mod rst;
pub mod rstr;
mod time;
mod token;
pub mod transport;
pub mod xml;

pub use braids::*;
pub use client::{StsClient, StsSession, TokenRequestParams, TrustPolicy};
pub use config::StsClientConfig;
pub use error::{ProtocolError, TrustError};
pub use rstr::ValidationOutcome;
pub use token::{ProofKey, SecurityToken, TokenContent, TokenStatus};
