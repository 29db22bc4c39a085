// crates/client/src/error.rs
use thiserror::Error;

use crate::machine::FetchError;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server returned {status}")]
    Status { status: u16 },

    #[error("unexpected response body: {0}")]
    Decode(#[from] serde_json::Error),
}

pub type ClientResult<T> = Result<T, ClientError>;

impl ClientError {
    /// Classify for the poll machine: 404 is permanent, 5xx and transport
    /// failures are transient.
    pub fn to_fetch_error(&self) -> FetchError {
        match self {
            Self::Status { status: 404 } => FetchError::NotFound,
            Self::Status { status } if *status >= 500 => FetchError::Server(*status),
            Self::Status { status } => FetchError::Rejected(*status),
            Self::Http(e) => match e.status() {
                Some(status) if status.as_u16() == 404 => FetchError::NotFound,
                Some(status) if status.is_server_error() => FetchError::Server(status.as_u16()),
                Some(status) => FetchError::Rejected(status.as_u16()),
                None => FetchError::Network,
            },
            // A garbled body is most likely a proxy or restart hiccup.
            Self::Decode(_) => FetchError::Network,
        }
    }
}
