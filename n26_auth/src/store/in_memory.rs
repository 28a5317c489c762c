//! An in-memory token store

use std::{
    collections::HashMap,
    sync::{Mutex, PoisonError},
};

use async_trait::async_trait;

use super::{StoreError, TokenStore};
use crate::OAuthToken;

/// An in-memory token store
///
/// Tokens live only as long as the store does.
#[derive(Default, Debug)]
pub struct InMemoryTokenStore {
    tokens: Mutex<HashMap<String, OAuthToken>>,
}

impl InMemoryTokenStore {
    /// Constructs a new, empty in-memory token store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TokenStore for InMemoryTokenStore {
    async fn get(&self, key: &str) -> Result<OAuthToken, StoreError> {
        let tokens = self.tokens.lock().unwrap_or_else(PoisonError::into_inner);

        Ok(tokens.get(key).cloned().unwrap_or_default())
    }

    async fn set(&self, key: &str, token: &OAuthToken) -> Result<(), StoreError> {
        if key.is_empty() {
            return Err(StoreError::EmptyKey);
        }

        self.tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_owned(), token.clone());

        Ok(())
    }
}
