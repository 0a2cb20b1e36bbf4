//! Reuse, renewal, and caching of tokens issued by WS-Trust security token services
//!
//! Asking a token service for a new token on every outbound message is slow and puts needless
//! load on the issuer. A [`TokenRetriever`] sits in front of one or more
//! [`StsClient`][wstrust::StsClient]s and decides, for each request, whether a cached token
//! can be reused, whether it should be renewed, or whether a new token must be issued.
//!
//! Tokens are considered stale once they are within the imminent expiry window of their
//! expiration (10 seconds by default). Stale tokens are evicted and renewed. If renewal fails,
//! a new token is issued in their place unless that fallback has been disabled.
//!
//! Tokens requested on behalf of, or acting as, another identity are cached per identity, so
//! each delegated identity gets its own token. SAML 2.0 assertions marked for one-time use are
//! never shared, and are only reused within the [`MessageContext`] that received them.
//!
//! ```
//! use std::sync::Arc;
//!
//! use wstrust::{transport::TrustTransport, StsClient, StsClientConfig, TokenRequestParams};
//! use wstrust_tokens::{stores::InMemoryTokenStore, MessageContext, RetrievalConfig, TokenRetriever};
//!
//! # async fn example(transport: Arc<dyn TrustTransport>) -> Result<(), wstrust_tokens::RetrievalError> {
//! let client = StsClient::new(
//!     StsClientConfig::new().with_location("https://sts.example.com/services/trust"),
//!     transport,
//! );
//!
//! let retriever = TokenRetriever::new(Arc::new(client), Arc::new(InMemoryTokenStore::new()))
//!     .with_config(RetrievalConfig::new().with_imminent_expiry(aliri_clock::DurationSecs(30)));
//!
//! let mut context = MessageContext::new().with_endpoint_address("https://api.example.com/orders");
//! let token = retriever
//!     .retrieve(&TokenRequestParams::new(), &mut context)
//!     .await?;
//!
//! tracing::info!(token.id = %token.id(), "using token");
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! The following features are supported by this crate, all of which are enabled by default:
//!
//! * `file`: Provides a token store using the local filesystem.

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

mod config;
mod context;
mod retriever;
pub mod stores;

pub use config::RetrievalConfig;
pub use context::MessageContext;
pub use retriever::{RetrievalError, TokenRetriever, DEFAULT_CACHE_KEY};
