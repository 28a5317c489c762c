//! Username and password sources
//!
//! Credentials can come from several places at once: values configured in
//! code, the environment, or a custom source such as a keychain. A
//! [`ChainCredentialsProvider`] resolves each field independently, taking the
//! first non-empty value in priority order, so a username from one source can
//! be combined with a password from another.

use std::{env, fmt, sync::Arc};

use crate::{Password, Username};

/// The environment variable holding the account username
pub const ENV_USERNAME: &str = "N26_USERNAME";

/// The environment variable holding the account password
pub const ENV_PASSWORD: &str = "N26_PASSWORD";

/// A source of account credentials
///
/// Absence is not an error: a source that has nothing to offer returns
/// `None`. Implementations should not return empty values.
pub trait CredentialsProvider: Send + Sync {
    /// Provides a username, if this source has one
    fn username(&self) -> Option<Username>;

    /// Provides a password, if this source has one
    fn password(&self) -> Option<Password>;
}

impl<T: CredentialsProvider + ?Sized> CredentialsProvider for Arc<T> {
    fn username(&self) -> Option<Username> {
        (**self).username()
    }

    fn password(&self) -> Option<Password> {
        (**self).password()
    }
}

impl<T: CredentialsProvider + ?Sized> CredentialsProvider for Box<T> {
    fn username(&self) -> Option<Username> {
        (**self).username()
    }

    fn password(&self) -> Option<Password> {
        (**self).password()
    }
}

fn non_empty(value: String) -> Option<String> {
    Some(value).filter(|v| !v.is_empty())
}

/// Credentials fixed at construction
#[derive(Clone, Debug)]
pub struct Credentials {
    username: Option<Username>,
    password: Option<Password>,
}

impl Credentials {
    /// Constructs a new static credentials source
    ///
    /// Empty strings are treated as absent.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: non_empty(username.into()).map(Username::new),
            password: non_empty(password.into()).map(Password::new),
        }
    }
}

impl CredentialsProvider for Credentials {
    fn username(&self) -> Option<Username> {
        self.username.clone()
    }

    fn password(&self) -> Option<Password> {
        self.password.clone()
    }
}

/// Credentials read from [`ENV_USERNAME`] and [`ENV_PASSWORD`]
///
/// The environment is read on every call, not captured at construction.
#[derive(Clone, Copy, Debug, Default)]
pub struct EnvCredentials;

impl CredentialsProvider for EnvCredentials {
    fn username(&self) -> Option<Username> {
        env::var(ENV_USERNAME)
            .ok()
            .and_then(non_empty)
            .map(Username::new)
    }

    fn password(&self) -> Option<Password> {
        env::var(ENV_PASSWORD)
            .ok()
            .and_then(non_empty)
            .map(Password::new)
    }
}

/// An ordered chain of credentials sources
///
/// Earlier sources take priority. Each field is resolved on its own, so the
/// username and password may come from different sources.
#[derive(Default)]
pub struct ChainCredentialsProvider {
    providers: Vec<Box<dyn CredentialsProvider>>,
}

impl ChainCredentialsProvider {
    /// Constructs an empty chain
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a source ahead of all others
    pub fn prepend(&mut self, provider: impl CredentialsProvider + 'static) {
        self.providers.insert(0, Box::new(provider));
    }

    /// Inserts a source behind all others
    pub fn append(&mut self, provider: impl CredentialsProvider + 'static) {
        self.providers.push(Box::new(provider));
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

impl fmt::Debug for ChainCredentialsProvider {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ChainCredentialsProvider")
            .field("providers", &self.providers.len())
            .finish()
    }
}

impl FromIterator<Box<dyn CredentialsProvider>> for ChainCredentialsProvider {
    fn from_iter<I: IntoIterator<Item = Box<dyn CredentialsProvider>>>(iter: I) -> Self {
        Self {
            providers: iter.into_iter().collect(),
        }
    }
}

impl CredentialsProvider for ChainCredentialsProvider {
    fn username(&self) -> Option<Username> {
        self.providers
            .iter()
            .filter_map(|p| p.username())
            .find(|u| !u.as_str().is_empty())
    }

    fn password(&self) -> Option<Password> {
        self.providers
            .iter()
            .filter_map(|p| p.password())
            .find(|p| !p.as_str().is_empty())
    }
}
