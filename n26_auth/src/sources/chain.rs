//! Composition of several token sources

use std::{fmt, sync::Arc};

use async_trait::async_trait;

use super::{BoxError, TokenProvider};
use crate::AccessToken;

/// An ordered chain of token sources
///
/// Sources are asked in order and the first token offered wins. A source
/// with nothing to offer passes to the next one, but an error ends the
/// lookup immediately: later sources may perform a real login, and a
/// failure ahead of them must not be hidden by falling through.
#[derive(Clone, Default)]
pub struct ChainTokenProvider {
    providers: Vec<Arc<dyn TokenProvider>>,
}

impl ChainTokenProvider {
    /// Constructs an empty chain
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a source ahead of all others
    pub fn prepend(&mut self, provider: impl TokenProvider + 'static) {
        self.providers.insert(0, Arc::new(provider));
    }

    /// Inserts a source behind all others
    pub fn append(&mut self, provider: impl TokenProvider + 'static) {
        self.providers.push(Arc::new(provider));
    }

    /// The number of sources in the chain
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// Whether the chain has no sources
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

impl fmt::Debug for ChainTokenProvider {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ChainTokenProvider")
            .field("providers", &self.providers.len())
            .finish()
    }
}

impl FromIterator<Arc<dyn TokenProvider>> for ChainTokenProvider {
    fn from_iter<I: IntoIterator<Item = Arc<dyn TokenProvider>>>(iter: I) -> Self {
        Self {
            providers: iter.into_iter().collect(),
        }
    }
}

#[async_trait]
impl TokenProvider for ChainTokenProvider {
    async fn token(&self) -> Result<Option<AccessToken>, BoxError> {
        for (idx, provider) in self.providers.iter().enumerate() {
            match provider.token().await? {
                Some(token) if !token.as_str().is_empty() => {
                    tracing::trace!(provider = idx, "token provided by chain member");
                    return Ok(Some(token));
                }
                _ => {
                    tracing::trace!(provider = idx, "no token from chain member, trying next");
                }
            }
        }

        Ok(None)
    }
}
