//! Persistence for issued tokens
//!
//! Tokens are cached under a key combining the username and the device ID
//! (see [`token_key`]), so a single store can hold sessions for several
//! accounts or installations.

use std::{io, sync::Arc};

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::{sources::BoxError, OAuthToken, UsernameRef};

#[cfg(feature = "file")]
pub mod file;
pub mod in_memory;

#[cfg(feature = "file")]
pub use file::FileTokenStore;
pub use in_memory::InMemoryTokenStore;

/// Builds the key under which the token for a user on a device is cached
pub fn token_key(username: &UsernameRef, device_id: &Uuid) -> String {
    format!("{}:{}", username.as_str(), device_id)
}

/// An error while reading or writing a token store
#[derive(Debug, Error)]
pub enum StoreError {
    /// Tokens cannot be stored under an empty key
    #[error("token key is empty")]
    EmptyKey,
    /// The backing storage could not be read or written
    #[error("token storage i/o error")]
    Io(#[from] io::Error),
    /// The stored data could not be encoded or decoded
    #[error("token storage format error")]
    Format(#[from] serde_json::Error),
    /// An error from a custom store implementation
    #[error("token storage backend error")]
    Backend(#[source] BoxError),
}

/// An asynchronous key-value store for tokens
///
/// Looking up a key that has never been set is not an error: the store
/// returns the empty token (see [`OAuthToken::is_empty()`]). Tokens are
/// returned by value, so changing a returned token never changes what is
/// stored.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Gets the token stored under `key`
    async fn get(&self, key: &str) -> Result<OAuthToken, StoreError>;

    /// Replaces the token stored under `key`
    async fn set(&self, key: &str, token: &OAuthToken) -> Result<(), StoreError>;
}

#[async_trait]
impl<T: TokenStore + ?Sized> TokenStore for Arc<T> {
    async fn get(&self, key: &str) -> Result<OAuthToken, StoreError> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, token: &OAuthToken) -> Result<(), StoreError> {
        (**self).set(key, token).await
    }
}
