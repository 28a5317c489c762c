//! Token sources

use std::{error, sync::Arc};

use async_trait::async_trait;

use crate::AccessToken;

pub mod api;
pub mod chain;

pub use api::ApiTokenProvider;
pub use chain::ChainTokenProvider;

/// A boxed error returned across provider boundaries
pub type BoxError = Box<dyn error::Error + Send + Sync + 'static>;

/// An asynchronous source of access tokens
///
/// `Ok(None)` means the source has no token to offer, which lets a
/// [`ChainTokenProvider`] move on to the next source. An error means the
/// source tried and failed, and stops the chain.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Requests an access token
    async fn token(&self) -> Result<Option<AccessToken>, BoxError>;
}

#[async_trait]
impl<T: TokenProvider + ?Sized> TokenProvider for Arc<T> {
    async fn token(&self) -> Result<Option<AccessToken>, BoxError> {
        (**self).token().await
    }
}

/// A token source that always provides the same token
///
/// Useful for placing a pre-issued token ahead of the login flow.
#[derive(Clone, Debug)]
pub struct StaticTokenProvider {
    token: Option<AccessToken>,
}

impl StaticTokenProvider {
    /// Constructs a source for the given token
    ///
    /// An empty token provides nothing.
    pub fn new(token: impl Into<String>) -> Self {
        let token = token.into();

        Self {
            token: (!token.is_empty()).then(|| AccessToken::new(token)),
        }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn token(&self) -> Result<Option<AccessToken>, BoxError> {
        Ok(self.token.clone())
    }
}
