//! Token acquisition, caching and renewal for the N26 API
//!
//! N26 issues short-lived access tokens only after the account holder
//! approves each login on their paired phone. This crate hides that exchange
//! behind a [`TokenProvider`][sources::TokenProvider]: callers ask for a
//! token and get one, while the provider decides whether the cached token is
//! still good, can be refreshed, or requires a fresh login.
//!
//! The pieces are:
//!
//! * [`credentials`]: where the username and password come from, including
//!   the environment and ordered chains of sources.
//! * [`store`]: where issued tokens are kept between calls, keyed by user and
//!   device.
//! * [`sources`]: the token providers themselves, most importantly the
//!   [`ApiTokenProvider`][sources::ApiTokenProvider] that performs the login
//!   and refresh flows.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use n26_auth::{
//!     credentials::{ChainCredentialsProvider, Credentials, EnvCredentials},
//!     sources::ApiTokenProvider,
//!     store::FileTokenStore,
//! };
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let client = reqwest_middleware::ClientBuilder::new(reqwest::Client::new()).build();
//!
//! let mut credentials = ChainCredentialsProvider::new();
//! credentials.append(Credentials::new("john.doe@example.com", ""));
//! credentials.append(EnvCredentials);
//!
//! let provider = ApiTokenProvider::new(
//!     client,
//!     "https://api.tech26.de".parse()?,
//!     credentials,
//!     uuid::Uuid::new_v4(),
//! )
//! .with_store(Arc::new(FileTokenStore::new("tokens.json")));
//!
//! let token = provider.access_token().await?;
//! # let _ = token;
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! * `file` (default): Provides a [`TokenStore`][store::TokenStore] backed by
//!   a JSON file on the local filesystem.

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
pub mod credentials;
pub mod sources;
pub mod store;
mod tokens;

pub use braids::*;
pub use tokens::{OAuthToken, TokenLifetimeConfig, TokenStatus};

/// The username of the Basic authorization expected on authentication calls
pub const BASIC_AUTH_USERNAME: &str = "nativeweb";

/// The password of the Basic authorization expected on authentication calls
pub const BASIC_AUTH_PASSWORD: &str = "";
