use std::{env, fmt, sync::Arc, time::Duration};

use async_trait::async_trait;
use n26_auth::{
    credentials::{ChainCredentialsProvider, Credentials, CredentialsProvider, EnvCredentials},
    sources::{
        api::{DEFAULT_MFA_TIMEOUT, DEFAULT_MFA_WAIT},
        ApiTokenProvider, ChainTokenProvider, TokenProvider,
    },
    store::TokenStore,
    BASIC_AUTH_PASSWORD, BASIC_AUTH_USERNAME,
};
use n26_clock::{Clock, DurationSecs, System, UnixTime};
use n26_reqwest::{BasicAuthMiddleware, ExactHostMatch, TokenProviderMiddleware};
use reqwest::{header, StatusCode, Url};
use reqwest_middleware::ClientWithMiddleware;
use uuid::Uuid;

use crate::{
    device::resolve_device_id,
    transaction::{Transaction, TransactionFinder, TransactionsQuery},
    Error, BASE_URL, DEFAULT_PAGE_SIZE, ENV_DEVICE_ID,
};

const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// A client for the N26 API
///
/// Constructed with [`Client::builder()`].
pub struct Client {
    api: ClientWithMiddleware,
    transactions_url: Url,
    token_provider: Arc<ChainTokenProvider>,
    device_id: Uuid,
    timeout: Duration,
    page_size: u32,
}

impl Client {
    /// Starts configuring a new client
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// The device ID this client logs in with
    ///
    /// Persist a generated ID to avoid approving a new device on every run.
    #[inline]
    pub fn device_id(&self) -> Uuid {
        self.device_id
    }

    /// The token providers consulted for every API call, in order
    pub fn token_provider(&self) -> &Arc<ChainTokenProvider> {
        &self.token_provider
    }

    /// Finds every transaction between `from` and `to`, following pagination
    ///
    /// Pages are requested until one comes back short of the page size.
    pub async fn find_all_transactions_in_range(
        &self,
        from: UnixTime,
        to: UnixTime,
    ) -> Result<Vec<Transaction>, Error> {
        let mut result = Vec::new();
        let mut last_id = None;
        let mut page = 1;

        loop {
            let transactions = self
                .find_transactions(from, to, last_id)
                .await
                .map_err(|source| Error::FindTransactions {
                    page,
                    source: Box::new(source),
                })?;

            let count = transactions.len();
            if let Some(last) = transactions.last() {
                last_id = Some(last.id);
            }
            result.extend(transactions);

            if count < self.page_size as usize {
                break;
            }

            page += 1;
        }

        tracing::debug!(pages = page, count = result.len(), "found transactions");
        Ok(result)
    }

    #[tracing::instrument(skip_all, fields(from = from.0, to = to.0, limit = self.page_size, last_id = ?last_id))]
    async fn find_transactions(
        &self,
        from: UnixTime,
        to: UnixTime,
        last_id: Option<Uuid>,
    ) -> Result<Vec<Transaction>, Error> {
        let resp = self
            .api
            .get(self.transactions_url.clone())
            .header(header::ACCEPT, "application/json")
            .query(&TransactionsQuery {
                from: from.as_millis(),
                to: to.as_millis(),
                limit: self.page_size,
                last_id,
            })
            .timeout(self.timeout)
            .send()
            .await
            .map_err(Error::Request)?;

        tracing::trace!(
            response.status = resp.status().as_u16(),
            "received transactions response"
        );

        match resp.status() {
            StatusCode::OK => {
                let body = resp.bytes().await.map_err(Error::BodyRead)?;
                Ok(serde_json::from_slice(&body)?)
            }
            StatusCode::UNAUTHORIZED => Err(Error::InvalidToken {
                body: resp.text().await.unwrap_or_default(),
            }),
            status => Err(Error::UnexpectedResponse {
                status,
                body: resp.text().await.unwrap_or_default(),
            }),
        }
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Client")
            .field("transactions_url", &self.transactions_url.as_str())
            .field("token_provider", &self.token_provider)
            .field("device_id", &self.device_id)
            .field("timeout", &self.timeout)
            .field("page_size", &self.page_size)
            .finish()
    }
}

#[async_trait]
impl TransactionFinder for Client {
    async fn find_all_transactions_in_range(
        &self,
        from: UnixTime,
        to: UnixTime,
    ) -> Result<Vec<Transaction>, Error> {
        Client::find_all_transactions_in_range(self, from, to).await
    }
}

/// Configures a [`Client`]
///
/// Credentials are resolved field by field from, in order: the username and
/// password set on the builder, providers added with
/// [`with_credentials_provider()`][Self::with_credentials_provider()] (last
/// added first), the `N26_USERNAME` and `N26_PASSWORD` environment
/// variables, then providers added with
/// [`with_credentials_provider_at_last()`][Self::with_credentials_provider_at_last()].
pub struct ClientBuilder<C = System> {
    base_url: Url,
    timeout: Duration,
    username: String,
    password: String,
    device_id: Option<Uuid>,
    credentials: ChainCredentialsProvider,
    token_providers: Vec<Arc<dyn TokenProvider>>,
    token_store: Option<Arc<dyn TokenStore>>,
    clock: C,
    mfa_timeout: Duration,
    mfa_wait: Duration,
    refresh_ttl: Option<DurationSecs>,
    page_size: u32,
    http_client: Option<reqwest::Client>,
}

impl ClientBuilder<System> {
    /// Constructs a builder with the defaults for the production API
    pub fn new() -> Self {
        let mut credentials = ChainCredentialsProvider::new();
        credentials.append(EnvCredentials);

        Self {
            base_url: Url::parse(BASE_URL).expect("valid base url"),
            timeout: DEFAULT_TIMEOUT,
            username: String::new(),
            password: String::new(),
            device_id: None,
            credentials,
            token_providers: Vec::new(),
            token_store: None,
            clock: System,
            mfa_timeout: DEFAULT_MFA_TIMEOUT,
            mfa_wait: DEFAULT_MFA_WAIT,
            refresh_ttl: None,
            page_size: DEFAULT_PAGE_SIZE,
            http_client: None,
        }
    }
}

impl Default for ClientBuilder<System> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> ClientBuilder<C> {
    /// Sets the API base URL
    pub fn with_base_url(mut self, base_url: Url) -> Self {
        self.base_url = base_url;
        self
    }

    /// Sets the timeout of each individual request
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the username to log in with
    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = username.into();
        self
    }

    /// Sets the password to log in with
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = password.into();
        self
    }

    /// Sets the username and password to log in with
    pub fn with_credentials(
        self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.with_username(username).with_password(password)
    }

    /// Sets the device ID to log in with
    pub fn with_device_id(mut self, device_id: Uuid) -> Self {
        self.device_id = Some(device_id);
        self
    }

    /// Adds a credentials provider ahead of the previously added ones
    pub fn with_credentials_provider(
        mut self,
        provider: impl CredentialsProvider + 'static,
    ) -> Self {
        self.credentials.prepend(provider);
        self
    }

    /// Adds a credentials provider behind all others
    pub fn with_credentials_provider_at_last(
        mut self,
        provider: impl CredentialsProvider + 'static,
    ) -> Self {
        self.credentials.append(provider);
        self
    }

    /// Adds a token provider ahead of the previously added ones
    ///
    /// Token providers are consulted before logging in, so a provider that
    /// returns a token means no login takes place.
    pub fn with_token_provider(mut self, provider: impl TokenProvider + 'static) -> Self {
        self.token_providers.insert(0, Arc::new(provider));
        self
    }

    /// Sets the store used to cache tokens between calls
    pub fn with_token_store(mut self, store: Arc<dyn TokenStore>) -> Self {
        self.token_store = Some(store);
        self
    }

    /// Sets a custom clock to be used
    ///
    /// Useful for testing purposes
    pub fn with_clock<D>(self, clock: D) -> ClientBuilder<D> {
        ClientBuilder {
            base_url: self.base_url,
            timeout: self.timeout,
            username: self.username,
            password: self.password,
            device_id: self.device_id,
            credentials: self.credentials,
            token_providers: self.token_providers,
            token_store: self.token_store,
            clock,
            mfa_timeout: self.mfa_timeout,
            mfa_wait: self.mfa_wait,
            refresh_ttl: self.refresh_ttl,
            page_size: self.page_size,
            http_client: self.http_client,
        }
    }

    /// Sets the total time allowed for a login to be approved
    pub fn with_mfa_timeout(mut self, timeout: Duration) -> Self {
        self.mfa_timeout = timeout;
        self
    }

    /// Sets the delay between attempts to confirm a login
    pub fn with_mfa_wait(mut self, wait: Duration) -> Self {
        self.mfa_wait = wait;
        self
    }

    /// Sets the assumed lifetime of refresh tokens
    pub fn with_refresh_ttl(mut self, ttl: DurationSecs) -> Self {
        self.refresh_ttl = Some(ttl);
        self
    }

    /// Sets the number of transactions requested per page
    pub fn with_transactions_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Sets the HTTP client all requests are sent through
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http_client = Some(client);
        self
    }
}

impl<C> ClientBuilder<C>
where
    C: Clock + Send + Sync + 'static,
{
    /// Builds the client
    ///
    /// No request is made until the client is used.
    pub fn build(self) -> Result<Client, Error> {
        let device_id = resolve_device_id(self.device_id, env::var(ENV_DEVICE_ID).ok())?;

        let http = match self.http_client {
            Some(client) => client,
            None => reqwest::Client::builder()
                .user_agent(USER_AGENT)
                .build()
                .map_err(Error::HttpClient)?,
        };

        let mut credentials = self.credentials;
        credentials.prepend(Credentials::new(self.username, self.password));

        let auth_client = reqwest_middleware::ClientBuilder::new(http.clone())
            .with(BasicAuthMiddleware::new(
                BASIC_AUTH_USERNAME,
                BASIC_AUTH_PASSWORD,
            ))
            .build();

        let mut api_token = ApiTokenProvider::new(
            auth_client,
            self.base_url.clone(),
            credentials,
            device_id,
        )
        .with_clock(self.clock)
        .with_mfa_timeout(self.mfa_timeout)
        .with_mfa_wait(self.mfa_wait)
        .with_request_timeout(self.timeout);

        if let Some(store) = self.token_store {
            api_token = api_token.with_store(store);
        }

        if let Some(ttl) = self.refresh_ttl {
            api_token = api_token.with_refresh_ttl(ttl);
        }

        let mut chain: ChainTokenProvider = self.token_providers.into_iter().collect();
        chain.append(api_token);
        let token_provider = Arc::new(chain);

        let host = self.base_url.host_str().unwrap_or_default().to_owned();
        let api = reqwest_middleware::ClientBuilder::new(http)
            .with(
                TokenProviderMiddleware::new(token_provider.clone())
                    .with_predicate(ExactHostMatch::new(host)),
            )
            .build();

        tracing::debug!(
            base_url = %self.base_url,
            %device_id,
            token_providers = token_provider.len(),
            "built n26 client"
        );

        Ok(Client {
            api,
            transactions_url: endpoint(&self.base_url, "/api/smrt/transactions"),
            token_provider,
            device_id,
            timeout: self.timeout,
            page_size: self.page_size,
        })
    }
}

impl<C: fmt::Debug> fmt::Debug for ClientBuilder<C> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("base_url", &self.base_url.as_str())
            .field("timeout", &self.timeout)
            .field("username", &self.username)
            .field("device_id", &self.device_id)
            .field("credentials", &self.credentials)
            .field("token_providers", &self.token_providers.len())
            .field("clock", &self.clock)
            .field("mfa_timeout", &self.mfa_timeout)
            .field("mfa_wait", &self.mfa_wait)
            .field("refresh_ttl", &self.refresh_ttl)
            .field("page_size", &self.page_size)
            .finish_non_exhaustive()
    }
}

fn endpoint(base_url: &Url, path: &str) -> Url {
    let mut url = base_url.clone();
    let joined = format!("{}{}", base_url.path().trim_end_matches('/'), path);
    url.set_path(&joined);
    url
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults_target_the_production_api() {
        let client = Client::builder()
            .with_device_id(Uuid::from_u128(1))
            .build()
            .unwrap();

        assert_eq!(
            client.transactions_url.as_str(),
            "https://api.tech26.de/api/smrt/transactions"
        );
        assert_eq!(client.page_size, DEFAULT_PAGE_SIZE);
        assert_eq!(client.timeout, DEFAULT_TIMEOUT);
        assert_eq!(client.token_provider().len(), 1);
    }

    #[test]
    fn page_size_is_at_least_one() {
        let client = Client::builder()
            .with_device_id(Uuid::from_u128(1))
            .with_transactions_page_size(0)
            .build()
            .unwrap();

        assert_eq!(client.page_size, 1);
    }

    #[test]
    fn token_providers_are_chained_ahead_of_the_login() {
        let client = Client::builder()
            .with_device_id(Uuid::from_u128(1))
            .with_token_provider(n26_auth::sources::StaticTokenProvider::new("a"))
            .with_token_provider(n26_auth::sources::StaticTokenProvider::new("b"))
            .build()
            .unwrap();

        assert_eq!(client.token_provider().len(), 3);
    }

    #[test]
    fn password_is_not_printed() {
        let builder = Client::builder().with_credentials("john.doe", "hunter2");

        assert!(!format!("{:?}", builder).contains("hunter2"));
    }
}
