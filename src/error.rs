use thiserror;

use reqwest::{self, StatusCode};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("uninitialized logger error")]
    UninitializedLogger,
    #[error("invalid logger configuration: {0}")]
    InvalidConfig(String),
    #[error("Serde JSON serialization failed with context '{context}'. Error: {source}")]
    SerializeError {
        context: String,
        source: serde_json::Error,
    },
    #[error("Reqwest error with context '{context}'. Error: {source}")]
    ReqwestError {
        context: String,
        source: reqwest::Error,
    },
    #[error("No 'access_token' found in the metadata server response body")]
    TokenNotFound,
    #[error("No 'expires_in' found in the metadata server response body")]
    TokenExpiryNotFound,
    #[error("unsuccessful HTTP response error with context '{context}'. HTTP status code: '{status}', body: '{body}'")]
    HttpResponseError {
        context: String,
        status: StatusCode,
        body: String,
    },
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Self::ReqwestError {
            context: "Error sending HTTP request".to_string(),
            source: err,
        }
    }
}
