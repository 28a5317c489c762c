//! Middleware to automatically attach authorization to outgoing requests
//!
//! The N26 API uses two kinds of authorization. Calls to the authentication
//! endpoints carry a fixed Basic authorization, which [`BasicAuthMiddleware`]
//! attaches. Every other call carries a bearer token, which
//! [`TokenProviderMiddleware`] obtains from a [`TokenProvider`] for each
//! outbound request.
//!
//! If a request already has specified an `Authorization` header value by
//! the time that the middleware executes, the existing value will be left
//! in place, allowing overrides to be specified as required.
//!
//! ```
//! use std::sync::Arc;
//!
//! use n26_auth::sources::StaticTokenProvider;
//! use n26_reqwest::TokenProviderMiddleware;
//! use reqwest::Client;
//! use reqwest_middleware::ClientBuilder;
//!
//! # #[tokio::main(flavor = "current_thread")] async fn main() {
//! let provider = Arc::new(StaticTokenProvider::new("token"));
//!
//! let client = ClientBuilder::new(Client::default())
//!     .with(TokenProviderMiddleware::new(provider))
//!     .build();
//!
//! let req = client
//!     .get("https://api.tech26.de/api/me");
//! # async move { req
//!     .send()
//!     .await
//!     .unwrap();
//! # };
//! # }
//! ```
//!
//! The token middleware can also be configured to add a token only
//! conditionally, so that one middleware stack can be shared with other
//! backends without leaking N26 tokens to them. These predicates can be
//! composed together to evaluate more complex requirements prior to
//! attaching a token to a request.
//!
//! ```
//! use std::sync::Arc;
//!
//! use n26_auth::sources::StaticTokenProvider;
//! use n26_reqwest::{ExactHostMatch, HttpsOnly, TokenProviderMiddleware};
//! use predicates::prelude::PredicateBooleanExt;
//!
//! TokenProviderMiddleware::new(Arc::new(StaticTokenProvider::new("token")))
//!     .with_predicate(HttpsOnly.and(ExactHostMatch::new("api.tech26.de")));
//! ```

#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    missing_copy_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

use std::{fmt, sync::Arc};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::{BufMut, BytesMut};
use n26_auth::{
    sources::{BoxError, StaticTokenProvider, TokenProvider},
    AccessTokenRef,
};
use predicates::{prelude::*, reflection};
use reqwest::{header, Request, Response};
use reqwest_middleware::{Middleware, Next, Result};
use thiserror::Error;

/// A middleware that injects a fixed Basic authorization into outgoing requests
#[derive(Clone)]
pub struct BasicAuthMiddleware {
    value: header::HeaderValue,
}

impl BasicAuthMiddleware {
    /// Construct a new middleware from a username and password
    pub fn new(username: &str, password: &str) -> Self {
        let encoded = STANDARD.encode(format!("{}:{}", username, password));

        let mut header_value = BytesMut::with_capacity(encoded.len() + 6);
        header_value.put_slice(b"Basic ");
        header_value.put_slice(encoded.as_bytes());
        let mut value =
            header::HeaderValue::from_maybe_shared(header_value).expect("only valid header bytes");
        value.set_sensitive(true);

        Self { value }
    }
}

impl fmt::Debug for BasicAuthMiddleware {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("BasicAuthMiddleware")
            .field("value", &self.value)
            .finish()
    }
}

#[async_trait::async_trait]
impl Middleware for BasicAuthMiddleware {
    async fn handle(
        &self,
        mut req: Request,
        extensions: &mut http::Extensions,
        next: Next<'_>,
    ) -> Result<Response> {
        req.headers_mut()
            .entry(header::AUTHORIZATION)
            .or_insert_with(|| self.value.clone());

        next.run(req, extensions).await
    }
}

/// A middleware that injects an access token into outgoing requests
///
/// The token provider is asked for a token on every request that does not
/// already carry authorization. If the provider has no token to offer, the
/// request is sent without one. If the provider fails, the request is not
/// sent at all.
#[derive(Clone)]
pub struct TokenProviderMiddleware<P> {
    provider: Arc<dyn TokenProvider>,
    predicate: P,
}

impl TokenProviderMiddleware<HttpsOnly> {
    /// Construct a new middleware from a token provider
    ///
    /// By default, this middleware will only send its token if the request
    /// is being sent via HTTPS. To change this behavior, provide a
    /// custom predicate with [`with_predicate()`][Self::with_predicate()].
    pub fn new(provider: Arc<dyn TokenProvider>) -> Self {
        Self {
            provider,
            predicate: HttpsOnly,
        }
    }

    /// Construct a new middleware that always sends the same token
    pub fn from_static_token(token: impl Into<String>) -> Self {
        Self::new(Arc::new(StaticTokenProvider::new(token)))
    }

    /// Replaces the default predicate with a custom predicate
    pub fn with_predicate<P>(self, predicate: P) -> TokenProviderMiddleware<P> {
        TokenProviderMiddleware {
            provider: self.provider,
            predicate,
        }
    }
}

impl<P: fmt::Debug> fmt::Debug for TokenProviderMiddleware<P> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TokenProviderMiddleware")
            .field("predicate", &self.predicate)
            .finish_non_exhaustive()
    }
}

fn bearer_header(
    token: &AccessTokenRef,
) -> std::result::Result<header::HeaderValue, InvalidAccessToken> {
    let mut header_value = BytesMut::with_capacity(token.as_str().len() + 7);
    header_value.put_slice(b"Bearer ");
    header_value.put_slice(token.as_str().as_bytes());
    let mut value =
        header::HeaderValue::from_maybe_shared(header_value).map_err(InvalidAccessToken)?;
    value.set_sensitive(true);
    Ok(value)
}

#[async_trait::async_trait]
impl<P> Middleware for TokenProviderMiddleware<P>
where
    P: Predicate<Request> + Send + Sync + 'static,
{
    async fn handle(
        &self,
        mut req: Request,
        extensions: &mut http::Extensions,
        next: Next<'_>,
    ) -> Result<Response> {
        if self.predicate.eval(&req) && !req.headers().contains_key(header::AUTHORIZATION) {
            let token = self
                .provider
                .token()
                .await
                .map_err(|e| reqwest_middleware::Error::middleware(TokenAcquisitionError(e)))?;

            match token {
                Some(token) => {
                    tracing::trace!(token = ?token, "obtained access token");
                    let value =
                        bearer_header(&token).map_err(reqwest_middleware::Error::middleware)?;
                    req.headers_mut().insert(header::AUTHORIZATION, value);
                }
                None => tracing::trace!("no access token available, sending without"),
            }
        }

        next.run(req, extensions).await
    }
}

/// The token provider failed to provide a token for a request
#[derive(Debug, Error)]
#[error("could not obtain an access token")]
pub struct TokenAcquisitionError(#[source] pub BoxError);

/// The access token contains bytes that cannot be sent in a header
#[derive(Debug, Error)]
#[error("access token is not a valid header value")]
pub struct InvalidAccessToken(#[source] pub header::InvalidHeaderValue);

/// Only attach an access token if the request is being sent over HTTPS
#[derive(Clone, Copy, Debug)]
pub struct HttpsOnly;

impl Predicate<Request> for HttpsOnly {
    #[inline]
    fn eval(&self, req: &Request) -> bool {
        req.url().scheme() == "https"
    }

    fn find_case(&self, expected: bool, req: &Request) -> Option<reflection::Case> {
        let result = self.eval(req);
        if result != expected {
            Some(
                reflection::Case::new(Some(self), result).add_product(reflection::Product::new(
                    "scheme",
                    req.url().scheme().to_owned(),
                )),
            )
        } else {
            None
        }
    }
}

impl reflection::PredicateReflection for HttpsOnly {}
impl fmt::Display for HttpsOnly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("scheme is https")
    }
}

/// Only attach an access token if the request is being sent to the exact host specified
#[derive(Clone, Debug)]
pub struct ExactHostMatch {
    host: String,
}

impl ExactHostMatch {
    /// Construct a new predicate from a host string
    pub fn new<S>(host: S) -> Self
    where
        S: ToString,
    {
        Self {
            host: host.to_string(),
        }
    }
}

impl Predicate<Request> for ExactHostMatch {
    #[inline]
    fn eval(&self, req: &Request) -> bool {
        req.url().host_str() == Some(&self.host)
    }

    fn find_case(&self, expected: bool, req: &Request) -> Option<reflection::Case> {
        let result = self.eval(req);
        if result != expected {
            Some(
                reflection::Case::new(Some(self), result).add_product(reflection::Product::new(
                    "host",
                    req.url()
                        .host_str()
                        .unwrap_or("<value not valid utf-8>")
                        .to_owned(),
                )),
            )
        } else {
            None
        }
    }
}

impl reflection::PredicateReflection for ExactHostMatch {}
impl fmt::Display for ExactHostMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("host == ")?;
        f.write_str(&self.host)
    }
}
