//! A token source that logs in to the N26 API
//!
//! Logging in is a multi-step exchange:
//!
//! 1. A password grant is posted to `/oauth/token`. The server never issues
//!    tokens here; it answers `403 Forbidden` with an MFA token instead.
//! 2. An out-of-band challenge is requested at `/api/mfa/challenge`, which
//!    prompts the account holder to approve the login on their paired phone.
//! 3. An `mfa_oob` grant is posted to `/oauth/token` every `mfa_wait` until
//!    the approval arrives or `mfa_timeout` elapses. `401 Unauthorized` means
//!    "not approved yet".
//!
//! Issued tokens are cached in a [`TokenStore`]. Once the access token
//! expires, the refresh token is used until it too is assumed to have
//! expired, after which a full login is needed again.

use std::{error, fmt, sync::Arc, time::Duration};

use async_trait::async_trait;
use n26_clock::{Clock, DurationSecs, System};
use reqwest::{Response, StatusCode, Url};
use reqwest_middleware::{ClientWithMiddleware, RequestBuilder};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::{
    sync::Mutex,
    time::{self, Instant, MissedTickBehavior},
};
use uuid::Uuid;

use super::{BoxError, TokenProvider};
use crate::{
    credentials::CredentialsProvider,
    store::{token_key, InMemoryTokenStore, StoreError, TokenStore},
    AccessToken, MfaToken, MfaTokenRef, OAuthToken, PasswordRef, RefreshTokenRef,
    TokenLifetimeConfig, TokenStatus, UsernameRef,
};

mod dto;

/// The header identifying the client installation on authentication calls
pub const DEVICE_TOKEN_HEADER: &str = "device-token";

/// Default time allowed for the account holder to approve a login
pub const DEFAULT_MFA_TIMEOUT: Duration = Duration::from_secs(60);

/// Default delay between attempts to confirm a login
pub const DEFAULT_MFA_WAIT: Duration = Duration::from_secs(5);

const MIN_MFA_WAIT: Duration = Duration::from_millis(1);

/// Longer MFA settings are treated as "wait indefinitely"
const MAX_MFA_DURATION: Duration = Duration::from_secs(86_400 * 365 * 30);

/// A token source that performs the N26 password and MFA login flow
///
/// Calls are serialized: while one caller is logging in, others wait and
/// then pick up the freshly cached token instead of starting a second login.
///
/// The provider is configured once through its `with_*` methods and then
/// used; it cannot be reconfigured while serving requests.
///
/// Requests are sent through the given client as is. The N26 authentication
/// endpoints also expect a fixed Basic authorization (see
/// [`BASIC_AUTH_USERNAME`][crate::BASIC_AUTH_USERNAME]), which the client's
/// middleware is expected to attach.
pub struct ApiTokenProvider<C = System> {
    client: ClientWithMiddleware,
    token_url: Url,
    challenge_url: Url,
    credentials: Box<dyn CredentialsProvider>,
    store: Arc<dyn TokenStore>,
    device_id: Uuid,
    lifetime_config: TokenLifetimeConfig,
    request_timeout: Option<Duration>,
    mfa_timeout: Duration,
    mfa_wait: Duration,
    clock: C,
    lock: Mutex<()>,
}

impl ApiTokenProvider<System> {
    /// Constructs a new provider for the API at `base_url`
    ///
    /// Tokens are cached in memory and expiry is judged by the system clock
    /// unless configured otherwise.
    pub fn new(
        client: ClientWithMiddleware,
        base_url: Url,
        credentials: impl CredentialsProvider + 'static,
        device_id: Uuid,
    ) -> Self {
        Self {
            client,
            token_url: endpoint(&base_url, "/oauth/token"),
            challenge_url: endpoint(&base_url, "/api/mfa/challenge"),
            credentials: Box::new(credentials),
            store: Arc::new(InMemoryTokenStore::new()),
            device_id,
            lifetime_config: TokenLifetimeConfig::default(),
            request_timeout: None,
            mfa_timeout: DEFAULT_MFA_TIMEOUT,
            mfa_wait: DEFAULT_MFA_WAIT,
            clock: System,
            lock: Mutex::new(()),
        }
    }
}

impl<C> ApiTokenProvider<C> {
    /// Sets the store used to cache tokens
    pub fn with_store(mut self, store: Arc<dyn TokenStore>) -> Self {
        self.store = store;
        self
    }

    /// Sets the total time allowed for a login to be approved
    ///
    /// `Duration::MAX` waits as long as the caller does.
    pub fn with_mfa_timeout(mut self, timeout: Duration) -> Self {
        self.mfa_timeout = timeout.min(MAX_MFA_DURATION);
        self
    }

    /// Sets the delay between attempts to confirm a login
    pub fn with_mfa_wait(mut self, wait: Duration) -> Self {
        self.mfa_wait = wait.clamp(MIN_MFA_WAIT, MAX_MFA_DURATION);
        self
    }

    /// Sets the assumed lifetime of refresh tokens
    pub fn with_refresh_ttl(mut self, ttl: DurationSecs) -> Self {
        self.lifetime_config = TokenLifetimeConfig::new(ttl);
        self
    }

    /// Sets a timeout applied to each individual request
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Sets a custom clock to be used
    ///
    /// Useful for testing purposes
    pub fn with_clock<D>(self, clock: D) -> ApiTokenProvider<D> {
        ApiTokenProvider {
            client: self.client,
            token_url: self.token_url,
            challenge_url: self.challenge_url,
            credentials: self.credentials,
            store: self.store,
            device_id: self.device_id,
            lifetime_config: self.lifetime_config,
            request_timeout: self.request_timeout,
            mfa_timeout: self.mfa_timeout,
            mfa_wait: self.mfa_wait,
            clock,
            lock: self.lock,
        }
    }

    /// The device ID sent with every authentication request
    #[inline]
    pub fn device_id(&self) -> Uuid {
        self.device_id
    }

    fn post(&self, url: &Url) -> RequestBuilder {
        let request = self
            .client
            .post(url.clone())
            .header(DEVICE_TOKEN_HEADER, self.device_id.to_string());

        match self.request_timeout {
            Some(timeout) => request.timeout(timeout),
            None => request,
        }
    }
}

impl<C> fmt::Debug for ApiTokenProvider<C>
where
    C: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ApiTokenProvider")
            .field("token_url", &self.token_url.as_str())
            .field("challenge_url", &self.challenge_url.as_str())
            .field("device_id", &self.device_id)
            .field("lifetime_config", &self.lifetime_config)
            .field("request_timeout", &self.request_timeout)
            .field("mfa_timeout", &self.mfa_timeout)
            .field("mfa_wait", &self.mfa_wait)
            .field("clock", &self.clock)
            .finish()
    }
}

impl<C: Clock> ApiTokenProvider<C> {
    /// Gets a usable access token, logging in or refreshing as needed
    ///
    /// Dropping the returned future abandons any request in flight.
    pub async fn access_token(&self) -> Result<AccessToken, AuthError> {
        let _guard = self.lock.lock().await;

        let username = self
            .credentials
            .username()
            .ok_or(AuthError::MissingUsername)?;
        let key = token_key(&username, &self.device_id);
        let now = self.clock.now();

        let token = self.store.get(&key).await.map_err(AuthError::Storage)?;
        let status = token.token_status_at(now);

        tracing::trace!(?status, now = now.0, "checked cached token");

        match status {
            TokenStatus::Valid => Ok(token.access_token),
            TokenStatus::Refreshable => self.refresh(&key, &username, &token.refresh_token).await,
            TokenStatus::Missing | TokenStatus::Expired => self.login(&key, &username).await,
        }
    }

    async fn login(&self, key: &str, username: &UsernameRef) -> Result<AccessToken, AuthError> {
        let password = self
            .credentials
            .password()
            .ok_or(AuthError::MissingPassword)?;

        let mfa_token = self.request_mfa_token(username, &password).await?;
        self.challenge(&mfa_token).await?;
        let response = self.await_confirmation(&mfa_token).await?;

        self.persist(key, response).await
    }

    #[tracing::instrument(skip_all, fields(token_url = %self.token_url, device_id = %self.device_id))]
    async fn request_mfa_token(
        &self,
        username: &UsernameRef,
        password: &PasswordRef,
    ) -> Result<MfaToken, AuthError> {
        tracing::trace!(%username, "requesting password login");

        let resp = self
            .post(&self.token_url)
            .form(&dto::TokenRequest::Password { username, password })
            .send()
            .await
            .map_err(AuthError::LoginFailed)?;

        tracing::debug!(
            response.status = resp.status().as_u16(),
            "received password login response"
        );

        match resp.status() {
            StatusCode::FORBIDDEN => {
                let body: dto::MfaRequired = read_json(resp).await?;
                Ok(body.mfa_token)
            }
            StatusCode::BAD_REQUEST => Err(AuthError::WrongCredentials {
                body: read_text(resp).await,
            }),
            StatusCode::TOO_MANY_REQUESTS => Err(AuthError::TooManyAttempts {
                body: read_text(resp).await,
            }),
            status => Err(AuthError::UnexpectedResponse {
                status,
                body: read_text(resp).await,
            }),
        }
    }

    #[tracing::instrument(skip_all, fields(challenge_url = %self.challenge_url))]
    async fn challenge(&self, mfa_token: &MfaTokenRef) -> Result<(), AuthError> {
        let resp = self
            .post(&self.challenge_url)
            .json(&dto::MfaChallengeRequest {
                challenge_type: "oob",
                mfa_token,
            })
            .send()
            .await
            .map_err(AuthError::ChallengeFailed)?;

        let status = resp.status();
        tracing::debug!(response.status = status.as_u16(), "received mfa challenge response");

        if status.is_success() {
            Ok(())
        } else {
            Err(AuthError::ChallengeRejected {
                status,
                body: read_text(resp).await,
            })
        }
    }

    /// Polls for approval of the login
    ///
    /// Only the deadline ends the loop without a token. Every failed
    /// attempt, including server errors, counts as "not approved yet".
    #[tracing::instrument(skip_all, fields(mfa_wait_ms = self.mfa_wait.as_millis() as u64, mfa_timeout_ms = self.mfa_timeout.as_millis() as u64))]
    async fn await_confirmation(
        &self,
        mfa_token: &MfaTokenRef,
    ) -> Result<dto::TokenResponse, AuthError> {
        let start = Instant::now();
        let deadline = instant_after(start, self.mfa_timeout);

        let mut ticker = time::interval_at(instant_after(start, self.mfa_wait), self.mfa_wait);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut attempt = 0u32;
        loop {
            if time::timeout_at(deadline, ticker.tick()).await.is_err()
                || Instant::now() >= deadline
            {
                tracing::debug!(attempts = attempt, "login was not confirmed in time");
                return Err(AuthError::ConfirmTimeout);
            }

            attempt += 1;
            match time::timeout_at(deadline, self.confirm_login(mfa_token)).await {
                Err(_) => {
                    tracing::debug!(attempt, "confirm attempt outlived the mfa timeout");
                    return Err(AuthError::ConfirmTimeout);
                }
                Ok(Ok(Some(response))) => {
                    tracing::debug!(attempt, "login confirmed");
                    return Ok(response);
                }
                Ok(Ok(None)) => {
                    tracing::trace!(attempt, "login not yet confirmed");
                }
                Ok(Err(error)) => {
                    tracing::debug!(
                        attempt,
                        error = (&error as &dyn error::Error),
                        "confirm attempt failed, will retry"
                    );
                }
            }
        }
    }

    async fn confirm_login(
        &self,
        mfa_token: &MfaTokenRef,
    ) -> Result<Option<dto::TokenResponse>, AuthError> {
        let resp = self
            .post(&self.token_url)
            .form(&dto::TokenRequest::MfaOob { mfa_token })
            .send()
            .await
            .map_err(AuthError::ConfirmFailed)?;

        match resp.status() {
            StatusCode::OK => Ok(Some(read_json(resp).await?)),
            StatusCode::UNAUTHORIZED => Ok(None),
            status => Err(AuthError::UnexpectedResponse {
                status,
                body: read_text(resp).await,
            }),
        }
    }

    #[tracing::instrument(skip_all, fields(token_url = %self.token_url, device_id = %self.device_id))]
    async fn refresh(
        &self,
        key: &str,
        username: &UsernameRef,
        refresh_token: &RefreshTokenRef,
    ) -> Result<AccessToken, AuthError> {
        tracing::trace!("refreshing access token");

        let resp = self
            .post(&self.token_url)
            .form(&dto::TokenRequest::RefreshToken { refresh_token })
            .send()
            .await
            .map_err(AuthError::RefreshFailed)?;

        tracing::debug!(
            response.status = resp.status().as_u16(),
            "received refresh response"
        );

        match resp.status() {
            StatusCode::OK => {
                let response = read_json(resp).await?;
                self.persist(key, response).await
            }
            StatusCode::UNAUTHORIZED => {
                tracing::debug!("refresh token was rejected, logging in again");
                self.login(key, username).await
            }
            status => Err(AuthError::RefreshRejected {
                status,
                body: read_text(resp).await,
            }),
        }
    }

    async fn persist(
        &self,
        key: &str,
        response: dto::TokenResponse,
    ) -> Result<AccessToken, AuthError> {
        let token: OAuthToken = self.lifetime_config.create_token(
            response.access_token,
            response.refresh_token,
            response.expires_in,
            self.clock.now(),
        );

        tracing::info!(
            token_type = maybe_value(&response.token_type.as_deref()),
            host_url = maybe_value(&response.host_url.as_deref()),
            expires_at = token.expires_at.0,
            refresh_expires_at = token.refresh_expires_at.0,
            "received new tokens"
        );

        self.store
            .set(key, &token)
            .await
            .map_err(AuthError::Persist)?;

        Ok(token.access_token)
    }
}

#[async_trait]
impl<C: Clock + Send + Sync> TokenProvider for ApiTokenProvider<C> {
    async fn token(&self) -> Result<Option<AccessToken>, BoxError> {
        Ok(Some(self.access_token().await?))
    }
}

/// An error while obtaining a token from the N26 API
///
/// The message names the step that failed.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No credentials source provided a username
    #[error("could not get token: missing username")]
    MissingUsername,
    /// No credentials source provided a password
    #[error("could not get token: missing password")]
    MissingPassword,
    /// The cached token could not be read
    #[error("could not get token from storage")]
    Storage(#[source] StoreError),
    /// A newly issued token could not be cached
    #[error("could not persist token to storage")]
    Persist(#[source] StoreError),
    /// The username or password was rejected
    #[error("wrong credentials")]
    WrongCredentials {
        /// The body of the rejection
        body: String,
    },
    /// The server is refusing logins for now
    #[error("too many login attempts")]
    TooManyAttempts {
        /// The body of the rejection
        body: String,
    },
    /// The password login request could not be sent
    #[error("unexpected response")]
    LoginFailed(#[source] reqwest_middleware::Error),
    /// The server answered with a status that has no meaning at this step
    #[error("unexpected response: {status}")]
    UnexpectedResponse {
        /// The response status
        status: StatusCode,
        /// The response body
        body: String,
    },
    /// The MFA challenge request could not be sent
    #[error("failed to challenge mfa")]
    ChallengeFailed(#[source] reqwest_middleware::Error),
    /// The server refused to issue an MFA challenge
    #[error("could not challenge mfa: {status}")]
    ChallengeRejected {
        /// The response status
        status: StatusCode,
        /// The response body
        body: String,
    },
    /// A login confirmation request could not be sent
    #[error("failed to confirm login")]
    ConfirmFailed(#[source] reqwest_middleware::Error),
    /// The login was not approved before the MFA timeout
    #[error("could not confirm login: timeout")]
    ConfirmTimeout,
    /// The refresh request could not be sent
    #[error("failed to refresh token")]
    RefreshFailed(#[source] reqwest_middleware::Error),
    /// The server failed the refresh for a reason other than an invalid token
    #[error("failed to refresh token: {status}")]
    RefreshRejected {
        /// The response status
        status: StatusCode,
        /// The response body
        body: String,
    },
    /// A response body could not be read
    #[error("error reading response body")]
    BodyRead(#[source] reqwest::Error),
    /// A response body could not be deserialized
    #[error("error deserializing response body")]
    TokenBody(#[from] serde_json::Error),
}

fn instant_after(start: Instant, after: Duration) -> Instant {
    start
        .checked_add(after)
        .unwrap_or_else(|| start + MAX_MFA_DURATION)
}

fn endpoint(base_url: &Url, path: &str) -> Url {
    let mut url = base_url.clone();
    let joined = format!("{}{}", base_url.path().trim_end_matches('/'), path);
    url.set_path(&joined);
    url
}

async fn read_json<T: DeserializeOwned>(resp: Response) -> Result<T, AuthError> {
    let body = resp.bytes().await.map_err(AuthError::BodyRead)?;
    Ok(serde_json::from_slice(&body)?)
}

async fn read_text(resp: Response) -> String {
    resp.text().await.unwrap_or_default()
}

fn maybe_value<'a, T: tracing::Value + 'a>(v: &'a Option<T>) -> &'a dyn tracing::Value {
    if let Some(v) = v {
        v
    } else {
        &tracing::field::Empty
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use n26_clock::{TestClock, UnixTime};
    use serde_json::json;
    use wiremock::{
        matchers::{body_string_contains, header, method, path},
        Mock, MockBuilder, MockServer, ResponseTemplate,
    };

    use super::*;
    use crate::{credentials::Credentials, RefreshToken, Username};

    const USERNAME: &str = "john.doe";
    const PASSWORD: &str = "123456";
    const MFA_TOKEN: &str = "mfa-token";
    const DEVICE_ID: Uuid = Uuid::from_u128(0x6e7a0a9f_5d2b_4a4e_9b54_0c6bd6b0e7a1);
    const NOW: UnixTime = UnixTime(1_600_000_000);

    fn client() -> ClientWithMiddleware {
        reqwest_middleware::ClientBuilder::new(reqwest::Client::new()).build()
    }

    fn provider_with(server: &MockServer, credentials: Credentials) -> ApiTokenProvider<TestClock> {
        ApiTokenProvider::new(
            client(),
            server.uri().parse().unwrap(),
            credentials,
            DEVICE_ID,
        )
        .with_clock(TestClock::new(NOW))
        .with_mfa_wait(Duration::from_millis(20))
        .with_mfa_timeout(Duration::from_secs(5))
    }

    fn provider(server: &MockServer) -> ApiTokenProvider<TestClock> {
        provider_with(server, Credentials::new(USERNAME, PASSWORD))
    }

    fn key() -> String {
        token_key(&Username::from_static(USERNAME), &DEVICE_ID)
    }

    fn auth_request(grant_type: &str) -> MockBuilder {
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .and(header(DEVICE_TOKEN_HEADER, DEVICE_ID.to_string()))
            .and(body_string_contains(format!("grant_type={}", grant_type)))
    }

    fn password_login() -> MockBuilder {
        auth_request("password")
            .and(body_string_contains("username=john.doe"))
            .and(body_string_contains("password=123456"))
    }

    fn challenge() -> MockBuilder {
        Mock::given(method("POST"))
            .and(path("/api/mfa/challenge"))
            .and(header(DEVICE_TOKEN_HEADER, DEVICE_ID.to_string()))
            .and(body_string_contains(r#""challengeType":"oob""#))
            .and(body_string_contains(MFA_TOKEN))
    }

    fn confirm_login() -> MockBuilder {
        auth_request("mfa_oob").and(body_string_contains(format!("mfaToken={}", MFA_TOKEN)))
    }

    fn refresh_token() -> MockBuilder {
        auth_request("refresh_token")
    }

    fn mfa_required() -> ResponseTemplate {
        ResponseTemplate::new(403).set_body_json(json!({
            "status": 403,
            "detail": "MFA token is required",
            "error": "mfa_required",
            "mfaToken": MFA_TOKEN,
        }))
    }

    fn issued(access_token: &str, refresh_token: &str) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({
            "access_token": access_token,
            "token_type": "bearer",
            "refresh_token": refresh_token,
            "expires_in": 889,
            "host_url": "https://api.tech26.de",
        }))
    }

    async fn mount_login(server: &MockServer, access_token: &str) {
        password_login()
            .respond_with(mfa_required())
            .expect(1)
            .mount(server)
            .await;
        challenge()
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(server)
            .await;
        confirm_login()
            .respond_with(issued(access_token, "new-refresh"))
            .expect(1)
            .mount(server)
            .await;
    }

    async fn mount_no_login(server: &MockServer) {
        auth_request("password")
            .respond_with(mfa_required())
            .expect(0)
            .mount(server)
            .await;
    }

    async fn seed(store: &InMemoryTokenStore, expires_at: UnixTime, refresh_expires_at: UnixTime) {
        let token = OAuthToken {
            access_token: AccessToken::from_static("cached-access"),
            refresh_token: RefreshToken::from_static("cached-refresh"),
            expires_at,
            refresh_expires_at,
        };
        store.set(&key(), &token).await.unwrap();
    }

    async fn count_requests(server: &MockServer, needle: &str) -> usize {
        server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|r| String::from_utf8_lossy(&r.body).contains(needle))
            .count()
    }

    fn unreachable_url() -> Url {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        format!("http://127.0.0.1:{}", port).parse().unwrap()
    }

    fn stalled() -> ResponseTemplate {
        ResponseTemplate::new(201).set_delay(Duration::from_millis(500))
    }

    struct FailingStore;

    #[async_trait]
    impl TokenStore for FailingStore {
        async fn get(&self, _: &str) -> Result<OAuthToken, StoreError> {
            Err(StoreError::Backend(
                io::Error::new(io::ErrorKind::Other, "get token error").into(),
            ))
        }

        async fn set(&self, _: &str, _: &OAuthToken) -> Result<(), StoreError> {
            Err(StoreError::Backend(
                io::Error::new(io::ErrorKind::Other, "set token error").into(),
            ))
        }
    }

    mod when_credentials_are_incomplete {
        use super::*;

        #[tokio::test]
        async fn missing_username_fails_before_any_request() {
            let server = MockServer::start().await;
            let provider = provider_with(&server, Credentials::new("", PASSWORD));

            let error = provider.access_token().await.unwrap_err();

            assert!(matches!(error, AuthError::MissingUsername));
            assert_eq!(error.to_string(), "could not get token: missing username");
            assert!(server.received_requests().await.unwrap().is_empty());
        }

        #[tokio::test]
        async fn missing_password_fails_before_any_request() {
            let server = MockServer::start().await;
            let provider = provider_with(&server, Credentials::new(USERNAME, ""));

            let error = provider.access_token().await.unwrap_err();

            assert!(matches!(error, AuthError::MissingPassword));
            assert!(server.received_requests().await.unwrap().is_empty());
        }
    }

    mod when_the_store_fails {
        use super::*;

        #[tokio::test]
        async fn lookup_error_is_surfaced() {
            let server = MockServer::start().await;
            let provider = provider(&server).with_store(Arc::new(FailingStore));

            let error = provider.access_token().await.unwrap_err();

            assert!(matches!(error, AuthError::Storage(StoreError::Backend(_))));
            assert_eq!(error.to_string(), "could not get token from storage");
            assert!(server.received_requests().await.unwrap().is_empty());
        }
    }

    mod when_no_token_is_cached {
        use super::*;

        #[tokio::test]
        async fn logs_in_and_caches_the_new_token() {
            let server = MockServer::start().await;
            mount_login(&server, "new-access").await;
            let store = Arc::new(InMemoryTokenStore::new());
            let provider = provider(&server).with_store(store.clone());

            let token = provider.access_token().await.unwrap();

            assert_eq!(token.as_str(), "new-access");

            let cached = store.get(&key()).await.unwrap();
            assert_eq!(cached.access_token, token);
            assert_eq!(cached.refresh_token.as_str(), "new-refresh");
            assert_eq!(cached.expires_at, NOW + DurationSecs(889));
            assert_eq!(cached.refresh_expires_at, NOW + DurationSecs(3600));
        }

        #[tokio::test]
        async fn refresh_ttl_is_applied_to_new_tokens() {
            let server = MockServer::start().await;
            mount_login(&server, "new-access").await;
            let store = Arc::new(InMemoryTokenStore::new());
            let provider = provider(&server)
                .with_store(store.clone())
                .with_refresh_ttl(DurationSecs(120));

            provider.access_token().await.unwrap();

            let cached = store.get(&key()).await.unwrap();
            assert_eq!(cached.refresh_expires_at, NOW + DurationSecs(120));
        }

        #[tokio::test]
        async fn retries_confirmation_until_approved() {
            let server = MockServer::start().await;
            password_login()
                .respond_with(mfa_required())
                .expect(1)
                .mount(&server)
                .await;
            challenge()
                .respond_with(ResponseTemplate::new(201))
                .expect(1)
                .mount(&server)
                .await;
            confirm_login()
                .respond_with(ResponseTemplate::new(401))
                .up_to_n_times(2)
                .expect(2)
                .mount(&server)
                .await;
            confirm_login()
                .respond_with(issued("new-access", "new-refresh"))
                .expect(1)
                .mount(&server)
                .await;

            let provider = provider(&server);
            let started = std::time::Instant::now();

            let token = provider.access_token().await.unwrap();

            assert_eq!(token.as_str(), "new-access");
            assert_eq!(count_requests(&server, "grant_type=mfa_oob").await, 3);
            assert!(started.elapsed() >= Duration::from_millis(60));
        }

        #[tokio::test]
        async fn server_errors_while_polling_are_retried() {
            let server = MockServer::start().await;
            password_login()
                .respond_with(mfa_required())
                .mount(&server)
                .await;
            challenge()
                .respond_with(ResponseTemplate::new(201))
                .mount(&server)
                .await;
            confirm_login()
                .respond_with(ResponseTemplate::new(500))
                .up_to_n_times(1)
                .mount(&server)
                .await;
            confirm_login()
                .respond_with(issued("new-access", "new-refresh"))
                .mount(&server)
                .await;

            let token = provider(&server).access_token().await.unwrap();

            assert_eq!(token.as_str(), "new-access");
            assert_eq!(count_requests(&server, "grant_type=mfa_oob").await, 2);
        }

        #[tokio::test]
        async fn gives_up_once_the_mfa_timeout_elapses() {
            let server = MockServer::start().await;
            password_login()
                .respond_with(mfa_required())
                .mount(&server)
                .await;
            challenge()
                .respond_with(ResponseTemplate::new(201))
                .mount(&server)
                .await;
            confirm_login()
                .respond_with(ResponseTemplate::new(401))
                .mount(&server)
                .await;

            let store = Arc::new(InMemoryTokenStore::new());
            let provider = provider(&server)
                .with_store(store.clone())
                .with_mfa_timeout(Duration::from_millis(150));
            let started = std::time::Instant::now();

            let error = provider.access_token().await.unwrap_err();

            assert!(matches!(error, AuthError::ConfirmTimeout));
            assert_eq!(error.to_string(), "could not confirm login: timeout");
            assert!(started.elapsed() >= Duration::from_millis(150));

            let attempts = count_requests(&server, "grant_type=mfa_oob").await;
            assert!(attempts >= 1);

            time::sleep(Duration::from_millis(100)).await;
            assert_eq!(count_requests(&server, "grant_type=mfa_oob").await, attempts);
            assert!(store.get(&key()).await.unwrap().is_empty());
        }

        #[tokio::test]
        async fn persist_failure_is_surfaced() {
            let server = MockServer::start().await;
            password_login()
                .respond_with(mfa_required())
                .mount(&server)
                .await;
            challenge()
                .respond_with(ResponseTemplate::new(201))
                .mount(&server)
                .await;
            confirm_login()
                .respond_with(issued("new-access", "new-refresh"))
                .mount(&server)
                .await;

            struct WriteFails(InMemoryTokenStore);

            #[async_trait]
            impl TokenStore for WriteFails {
                async fn get(&self, key: &str) -> Result<OAuthToken, StoreError> {
                    self.0.get(key).await
                }

                async fn set(&self, key: &str, token: &OAuthToken) -> Result<(), StoreError> {
                    FailingStore.set(key, token).await
                }
            }

            let provider =
                provider(&server).with_store(Arc::new(WriteFails(InMemoryTokenStore::new())));

            let error = provider.access_token().await.unwrap_err();

            assert!(matches!(error, AuthError::Persist(_)));
        }

        #[tokio::test]
        async fn concurrent_callers_share_one_login() {
            let server = MockServer::start().await;
            mount_login(&server, "new-access").await;
            let provider = provider(&server);

            let (first, second) = tokio::join!(provider.access_token(), provider.access_token());

            assert_eq!(first.unwrap().as_str(), "new-access");
            assert_eq!(second.unwrap().as_str(), "new-access");
        }
    }

    mod when_the_login_is_rejected {
        use super::*;

        async fn login_with_status(status: u16) -> (MockServer, AuthError) {
            let server = MockServer::start().await;
            password_login()
                .respond_with(ResponseTemplate::new(status).set_body_string("rejected"))
                .expect(1)
                .mount(&server)
                .await;
            challenge()
                .respond_with(ResponseTemplate::new(201))
                .expect(0)
                .mount(&server)
                .await;

            let error = provider(&server).access_token().await.unwrap_err();
            (server, error)
        }

        #[tokio::test]
        async fn bad_request_means_wrong_credentials() {
            let (_server, error) = login_with_status(400).await;

            assert!(matches!(error, AuthError::WrongCredentials { body } if body == "rejected"));
        }

        #[tokio::test]
        async fn too_many_requests_means_too_many_attempts() {
            let (_server, error) = login_with_status(429).await;

            assert!(matches!(error, AuthError::TooManyAttempts { .. }));
            assert_eq!(error.to_string(), "too many login attempts");
        }

        #[tokio::test]
        async fn any_other_status_is_unexpected() {
            let (_server, error) = login_with_status(500).await;

            assert!(matches!(
                error,
                AuthError::UnexpectedResponse {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    ..
                }
            ));
        }

        #[tokio::test]
        async fn direct_success_is_unexpected() {
            let (_server, error) = login_with_status(200).await;

            assert!(matches!(
                error,
                AuthError::UnexpectedResponse {
                    status: StatusCode::OK,
                    ..
                }
            ));
        }

        #[tokio::test]
        async fn rejected_challenge_stops_the_login() {
            let server = MockServer::start().await;
            password_login()
                .respond_with(mfa_required())
                .mount(&server)
                .await;
            challenge()
                .respond_with(ResponseTemplate::new(401))
                .expect(1)
                .mount(&server)
                .await;
            confirm_login()
                .respond_with(issued("new-access", "new-refresh"))
                .expect(0)
                .mount(&server)
                .await;

            let error = provider(&server).access_token().await.unwrap_err();

            assert!(matches!(
                error,
                AuthError::ChallengeRejected {
                    status: StatusCode::UNAUTHORIZED,
                    ..
                }
            ));
        }
    }

    mod when_a_request_cannot_be_sent {
        use super::*;

        #[tokio::test]
        async fn unreachable_server_fails_the_login() {
            let provider = ApiTokenProvider::new(
                client(),
                unreachable_url(),
                Credentials::new(USERNAME, PASSWORD),
                DEVICE_ID,
            )
            .with_request_timeout(Duration::from_secs(2));

            let error = provider.access_token().await.unwrap_err();

            assert!(matches!(
                error,
                AuthError::LoginFailed(reqwest_middleware::Error::Reqwest(_))
            ));
        }

        #[tokio::test]
        async fn stalled_challenge_fails_the_login() {
            let server = MockServer::start().await;
            password_login()
                .respond_with(mfa_required())
                .mount(&server)
                .await;
            challenge()
                .respond_with(stalled())
                .expect(1)
                .mount(&server)
                .await;
            confirm_login()
                .respond_with(issued("new-access", "new-refresh"))
                .expect(0)
                .mount(&server)
                .await;

            let error = provider(&server)
                .with_request_timeout(Duration::from_millis(100))
                .access_token()
                .await
                .unwrap_err();

            assert!(matches!(error, AuthError::ChallengeFailed(_)));
        }

        #[tokio::test]
        async fn stalled_confirmation_is_retried() {
            let server = MockServer::start().await;
            password_login()
                .respond_with(mfa_required())
                .mount(&server)
                .await;
            challenge()
                .respond_with(ResponseTemplate::new(201))
                .mount(&server)
                .await;
            confirm_login()
                .respond_with(stalled())
                .up_to_n_times(1)
                .expect(1)
                .mount(&server)
                .await;
            confirm_login()
                .respond_with(issued("new-access", "new-refresh"))
                .expect(1)
                .mount(&server)
                .await;

            let token = provider(&server)
                .with_request_timeout(Duration::from_millis(100))
                .access_token()
                .await
                .unwrap();

            assert_eq!(token.as_str(), "new-access");
        }

        #[tokio::test]
        async fn unreachable_server_fails_the_refresh_without_logging_in() {
            let store = Arc::new(InMemoryTokenStore::new());
            seed(&store, NOW - DurationSecs(10), NOW + DurationSecs(100)).await;

            let provider = ApiTokenProvider::new(
                client(),
                unreachable_url(),
                Credentials::new(USERNAME, PASSWORD),
                DEVICE_ID,
            )
            .with_clock(TestClock::new(NOW))
            .with_store(store.clone())
            .with_request_timeout(Duration::from_secs(2));

            let error = provider.access_token().await.unwrap_err();

            assert!(matches!(error, AuthError::RefreshFailed(_)));
            assert_eq!(error.to_string(), "failed to refresh token");
            assert_eq!(
                store.get(&key()).await.unwrap().access_token.as_str(),
                "cached-access"
            );
        }

        #[tokio::test]
        async fn stalled_refresh_is_fatal() {
            let server = MockServer::start().await;
            mount_no_login(&server).await;
            refresh_token()
                .respond_with(stalled())
                .expect(1)
                .mount(&server)
                .await;

            let store = Arc::new(InMemoryTokenStore::new());
            seed(&store, NOW - DurationSecs(10), NOW + DurationSecs(100)).await;

            let error = provider(&server)
                .with_store(store)
                .with_request_timeout(Duration::from_millis(100))
                .access_token()
                .await
                .unwrap_err();

            assert!(matches!(error, AuthError::RefreshFailed(_)));
        }
    }

    mod when_the_caller_gives_up {
        use super::*;

        #[tokio::test]
        async fn polling_stops_and_the_lock_is_released() {
            let server = MockServer::start().await;
            password_login()
                .respond_with(mfa_required())
                .mount(&server)
                .await;
            challenge()
                .respond_with(ResponseTemplate::new(201))
                .mount(&server)
                .await;
            confirm_login()
                .respond_with(ResponseTemplate::new(401))
                .mount(&server)
                .await;

            let provider = provider(&server);

            let result = time::timeout(Duration::from_millis(50), provider.access_token()).await;
            assert!(result.is_err());

            let attempts = count_requests(&server, "grant_type=mfa_oob").await;
            time::sleep(Duration::from_millis(100)).await;
            assert_eq!(count_requests(&server, "grant_type=mfa_oob").await, attempts);

            server.reset().await;
            mount_login(&server, "new-access").await;

            let token = time::timeout(Duration::from_secs(5), provider.access_token())
                .await
                .expect("lock was released")
                .unwrap();
            assert_eq!(token.as_str(), "new-access");
        }
    }

    mod with_unbounded_mfa_settings {
        use super::*;

        #[tokio::test]
        async fn maximum_timeout_still_logs_in() {
            let server = MockServer::start().await;
            mount_login(&server, "new-access").await;

            let token = provider(&server)
                .with_mfa_timeout(Duration::MAX)
                .access_token()
                .await
                .unwrap();

            assert_eq!(token.as_str(), "new-access");
        }

        #[tokio::test]
        async fn maximum_wait_times_out_without_confirming() {
            let server = MockServer::start().await;
            password_login()
                .respond_with(mfa_required())
                .mount(&server)
                .await;
            challenge()
                .respond_with(ResponseTemplate::new(201))
                .mount(&server)
                .await;
            confirm_login()
                .respond_with(issued("new-access", "new-refresh"))
                .expect(0)
                .mount(&server)
                .await;

            let error = provider(&server)
                .with_mfa_wait(Duration::MAX)
                .with_mfa_timeout(Duration::from_millis(50))
                .access_token()
                .await
                .unwrap_err();

            assert!(matches!(error, AuthError::ConfirmTimeout));
        }
    }

    mod when_a_valid_token_is_cached {
        use super::*;

        #[tokio::test]
        async fn returns_it_without_any_request() {
            let server = MockServer::start().await;
            let store = Arc::new(InMemoryTokenStore::new());
            seed(&store, NOW + DurationSecs(60), NOW + DurationSecs(3600)).await;

            let token = provider(&server)
                .with_store(store)
                .access_token()
                .await
                .unwrap();

            assert_eq!(token.as_str(), "cached-access");
            assert!(server.received_requests().await.unwrap().is_empty());
        }
    }

    mod when_the_cached_token_is_refreshable {
        use super::*;

        async fn refreshable_store() -> Arc<InMemoryTokenStore> {
            let store = Arc::new(InMemoryTokenStore::new());
            seed(&store, NOW - DurationSecs(10), NOW + DurationSecs(100)).await;
            store
        }

        #[tokio::test]
        async fn refreshes_once_without_logging_in() {
            let server = MockServer::start().await;
            mount_no_login(&server).await;
            refresh_token()
                .and(body_string_contains("refresh_token=cached-refresh"))
                .respond_with(issued("refreshed-access", "refreshed-refresh"))
                .expect(1)
                .mount(&server)
                .await;

            let store = refreshable_store().await;
            let token = provider(&server)
                .with_store(store.clone())
                .access_token()
                .await
                .unwrap();

            assert_eq!(token.as_str(), "refreshed-access");

            let cached = store.get(&key()).await.unwrap();
            assert_eq!(cached.refresh_token.as_str(), "refreshed-refresh");
            assert_eq!(cached.expires_at, NOW + DurationSecs(889));
            assert_eq!(cached.refresh_expires_at, NOW + DurationSecs(3600));
        }

        #[tokio::test]
        async fn rejected_refresh_falls_back_to_login() {
            let server = MockServer::start().await;
            refresh_token()
                .respond_with(ResponseTemplate::new(401))
                .expect(1)
                .mount(&server)
                .await;
            mount_login(&server, "new-access").await;

            let store = refreshable_store().await;
            let token = provider(&server)
                .with_store(store.clone())
                .access_token()
                .await
                .unwrap();

            assert_eq!(token.as_str(), "new-access");
            assert_eq!(store.get(&key()).await.unwrap().access_token, token);
        }

        #[tokio::test]
        async fn failed_refresh_is_fatal() {
            let server = MockServer::start().await;
            mount_no_login(&server).await;
            refresh_token()
                .respond_with(ResponseTemplate::new(503))
                .expect(1)
                .mount(&server)
                .await;

            let store = refreshable_store().await;
            let error = provider(&server)
                .with_store(store.clone())
                .access_token()
                .await
                .unwrap_err();

            assert!(matches!(
                error,
                AuthError::RefreshRejected {
                    status: StatusCode::SERVICE_UNAVAILABLE,
                    ..
                }
            ));
            assert_eq!(
                store.get(&key()).await.unwrap().access_token.as_str(),
                "cached-access"
            );
        }
    }

    mod when_both_cached_tokens_have_expired {
        use super::*;

        #[tokio::test]
        async fn logs_in_without_refreshing() {
            let server = MockServer::start().await;
            refresh_token()
                .respond_with(issued("refreshed-access", "refreshed-refresh"))
                .expect(0)
                .mount(&server)
                .await;
            mount_login(&server, "new-access").await;

            let store = Arc::new(InMemoryTokenStore::new());
            seed(&store, NOW - DurationSecs(100), NOW - DurationSecs(10)).await;

            let token = provider(&server)
                .with_store(store)
                .access_token()
                .await
                .unwrap();

            assert_eq!(token.as_str(), "new-access");
        }
    }

    mod as_a_token_provider {
        use super::*;

        #[tokio::test]
        async fn provides_the_access_token() {
            let server = MockServer::start().await;
            mount_login(&server, "new-access").await;

            let token = TokenProvider::token(&provider(&server)).await.unwrap();

            assert_eq!(token.unwrap().as_str(), "new-access");
        }

        #[tokio::test]
        async fn errors_can_be_downcast() {
            let server = MockServer::start().await;
            let provider = provider_with(&server, Credentials::new("", ""));

            let error = TokenProvider::token(&provider).await.unwrap_err();

            assert!(matches!(
                error.downcast_ref::<AuthError>(),
                Some(AuthError::MissingUsername)
            ));
        }
    }

    #[test]
    fn endpoints_keep_the_base_path() {
        let base: Url = "https://example.com/n26/".parse().unwrap();

        assert_eq!(
            endpoint(&base, "/oauth/token").as_str(),
            "https://example.com/n26/oauth/token"
        );
        assert_eq!(
            endpoint(&"https://api.tech26.de".parse().unwrap(), "/api/mfa/challenge").as_str(),
            "https://api.tech26.de/api/mfa/challenge"
        );
    }
}
