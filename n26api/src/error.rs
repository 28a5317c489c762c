use reqwest::StatusCode;
use thiserror::Error;

/// An error from the N26 API client
#[derive(Debug, Error)]
pub enum Error {
    /// The device ID in the environment is not a UUID
    #[error("invalid device id in N26_DEVICE")]
    InvalidDeviceId(#[source] uuid::Error),
    /// The underlying HTTP client could not be constructed
    #[error("could not build http client")]
    HttpClient(#[source] reqwest::Error),
    /// The request failed before a response was received
    ///
    /// This includes failing to obtain an access token for the request.
    #[error("request failed")]
    Request(#[source] reqwest_middleware::Error),
    /// The API rejected the access token
    #[error("invalid token")]
    InvalidToken {
        /// The response body
        body: String,
    },
    /// The API answered with an unexpected status
    #[error("unexpected response: {status}")]
    UnexpectedResponse {
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
    Body(#[from] serde_json::Error),
    /// Fetching a page of transactions failed
    #[error("could not find transactions (page {page})")]
    FindTransactions {
        /// The page that failed, counting from 1
        page: u32,
        /// The cause
        #[source]
        source: Box<Error>,
    },
}
