//! An in-memory token store

use std::{collections::HashMap, error, sync::Arc};

use arc_swap::ArcSwap;
use async_trait::async_trait;
use wstrust::{CacheKeyRef, SecurityToken, TokenId, TokenIdRef};

use super::{association_property, TokenStore};

/// An in-memory token store
///
/// Reads never block. Each write publishes a new snapshot of the store, retrying if another
/// write raced it.
#[derive(Debug, Default)]
pub struct InMemoryTokenStore {
    records: ArcSwap<HashMap<TokenId, SecurityToken>>,
}

impl InMemoryTokenStore {
    /// Constructs an empty in-memory token store
    pub fn new() -> Self {
        Self::default()
    }

    /// The number of records in the store, including association placeholders
    pub fn len(&self) -> usize {
        self.records.load().len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.records.load().is_empty()
    }

    fn update(&self, f: impl Fn(&mut HashMap<TokenId, SecurityToken>)) {
        self.records.rcu(|records| {
            let mut records = HashMap::clone(records);
            f(&mut records);
            Arc::new(records)
        });
    }
}

#[async_trait]
impl TokenStore for InMemoryTokenStore {
    async fn get(
        &self,
        id: &TokenIdRef,
    ) -> Result<Option<SecurityToken>, Box<dyn error::Error + Send + Sync + 'static>> {
        Ok(self.records.load().get(id).cloned())
    }

    async fn put(
        &self,
        token: &SecurityToken,
    ) -> Result<(), Box<dyn error::Error + Send + Sync + 'static>> {
        self.update(|records| {
            records.insert(token.id().to_owned(), token.clone());
        });
        Ok(())
    }

    async fn remove(
        &self,
        id: &TokenIdRef,
    ) -> Result<(), Box<dyn error::Error + Send + Sync + 'static>> {
        if self.records.load().contains_key(id) {
            self.update(|records| {
                records.remove(id);
            });
        }
        Ok(())
    }

    async fn put_association(
        &self,
        delegation_id: &TokenIdRef,
        cache_key: &CacheKeyRef,
        issued_id: &TokenIdRef,
    ) -> Result<(), Box<dyn error::Error + Send + Sync + 'static>> {
        let property = association_property(cache_key);
        self.update(|records| {
            records
                .entry(delegation_id.to_owned())
                .or_insert_with(|| SecurityToken::new(delegation_id.to_owned()))
                .set_property(property.as_str(), issued_id.as_str());
        });
        Ok(())
    }
}
