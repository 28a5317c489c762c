//! A client for the N26 banking API
//!
//! The [`Client`] logs in on demand, keeps its tokens fresh and attaches
//! them to every API call. Logging in requires the account holder to approve
//! the login on their paired phone, so the first call on a fresh device may
//! take as long as the configured MFA timeout.
//!
//! ```no_run
//! use std::{sync::Arc, time::Duration};
//!
//! use n26_clock::{Clock, DurationSecs, System};
//! use n26api::{auth::store::FileTokenStore, Client};
//!
//! # #[tokio::main(flavor = "current_thread")] async fn main() -> Result<(), n26api::Error> {
//! let client = Client::builder()
//!     .with_credentials("john.doe@example.com", "123456")
//!     .with_token_store(Arc::new(FileTokenStore::new(".n26-tokens.json")))
//!     .with_mfa_timeout(Duration::from_secs(120))
//!     .build()?;
//!
//! let now = System.now();
//! let transactions = client
//!     .find_all_transactions_in_range(now - DurationSecs(30 * 86_400), now)
//!     .await?;
//!
//! println!("device {} found {} transactions", client.device_id(), transactions.len());
//! # Ok(())
//! # }
//! ```
//!
//! Without explicit credentials, the client reads `N26_USERNAME` and
//! `N26_PASSWORD` from the environment. The device ID identifies this
//! installation to N26 and should be kept stable between runs: it is read
//! from `N26_DEVICE` if not given, and generated otherwise.
//!
//! # Features
//!
//! * `file` (default): Enables [`FileTokenStore`][auth::store::FileTokenStore].
//! * `rustls-tls` (default): Uses `rustls` for TLS.
//! * `default-tls`: Uses the platform's native TLS instead.

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

mod client;
mod device;
mod error;
pub mod transaction;

pub use client::{Client, ClientBuilder};
pub use error::Error;
pub use n26_auth as auth;
pub use transaction::{Transaction, TransactionFinder};

/// The production N26 API
pub const BASE_URL: &str = "https://api.tech26.de";

/// The default number of transactions requested per page
pub const DEFAULT_PAGE_SIZE: u32 = 50;

/// The environment variable holding the device ID
pub const ENV_DEVICE_ID: &str = "N26_DEVICE";
