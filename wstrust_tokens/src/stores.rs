//! Token stores

use std::error;

use async_trait::async_trait;
use wstrust::{CacheKeyRef, SecurityToken, TokenId, TokenIdRef};

#[cfg(feature = "file")]
#[cfg_attr(docsrs, doc(cfg(feature = "file")))]
pub mod file;
pub mod in_memory;

#[cfg(feature = "file")]
pub use file::FileTokenStore;
pub use in_memory::InMemoryTokenStore;

/// The prefix of the record property holding an association for a cache key
pub const ASSOCIATION_PROPERTY_PREFIX: &str = "wstrust.associated-token:";

/// The record property under which the association for `cache_key` is stored
pub fn association_property(cache_key: &CacheKeyRef) -> String {
    format!("{}{}", ASSOCIATION_PROPERTY_PREFIX, cache_key)
}

/// A store of issued tokens and of the tokens issued on behalf of delegated identities
///
/// Updates to a record replace it whole, so readers see either the old or the new record.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Gets a token by its identifier
    async fn get(
        &self,
        id: &TokenIdRef,
    ) -> Result<Option<SecurityToken>, Box<dyn error::Error + Send + Sync + 'static>>;

    /// Inserts or replaces a token
    async fn put(
        &self,
        token: &SecurityToken,
    ) -> Result<(), Box<dyn error::Error + Send + Sync + 'static>>;

    /// Removes a token, if present
    async fn remove(
        &self,
        id: &TokenIdRef,
    ) -> Result<(), Box<dyn error::Error + Send + Sync + 'static>>;

    /// Gets the identifier of the token issued for a delegated identity under `cache_key`
    ///
    /// By default, associations are read from a property of a placeholder record stored under
    /// the delegated identity.
    async fn get_association(
        &self,
        cache_key: &CacheKeyRef,
        delegation_id: &TokenIdRef,
    ) -> Result<Option<TokenId>, Box<dyn error::Error + Send + Sync + 'static>> {
        let placeholder = self.get(delegation_id).await?;
        Ok(placeholder
            .as_ref()
            .and_then(|record| record.property(&association_property(cache_key)))
            .map(TokenId::from))
    }

    /// Records that `issued_id` was issued for a delegated identity under `cache_key`
    ///
    /// By default, the association is written as a property of a placeholder record stored
    /// under the delegated identity, which is created if needed.
    async fn put_association(
        &self,
        delegation_id: &TokenIdRef,
        cache_key: &CacheKeyRef,
        issued_id: &TokenIdRef,
    ) -> Result<(), Box<dyn error::Error + Send + Sync + 'static>> {
        let mut placeholder = self
            .get(delegation_id)
            .await?
            .unwrap_or_else(|| SecurityToken::new(delegation_id.to_owned()));
        placeholder.set_property(association_property(cache_key), issued_id.as_str());
        self.put(&placeholder).await
    }
}
