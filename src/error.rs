use std::io;

use serde::{Deserialize, Serialize};
use serde_json::Error as JsonError;
use thiserror::Error;
use url::ParseError as UrlParseError;

/// Crate-wide error type.
///
/// Graph and relay operations surface these to the caller that initiated the
/// mutating operation; a failed operation leaves prior state unchanged. The
/// query and grouping engines never raise for a single bad record — they log
/// and treat it as non-matching instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
pub enum RelayError {
    #[error("Item Not Found: {0}")]
    NotFound(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Invalid Argument: {0}")]
    InvalidArgument(String),
    #[error("Stale State: {0}")]
    StaleState(String),
    #[error("(De)Serialization error: {0}")]
    Serialization(String),
    #[error("I/O error: {0}")]
    Io(String),
    #[error("Custom error: {0}")]
    Custom(String),
}

impl From<JsonError> for RelayError {
    fn from(src: JsonError) -> RelayError {
        RelayError::Serialization(format!("JSON (de)serialization error: {src}"))
    }
}

impl From<toml::de::Error> for RelayError {
    fn from(src: toml::de::Error) -> RelayError {
        RelayError::Serialization(format!("Toml deserialization error: {src}"))
    }
}

impl From<UrlParseError> for RelayError {
    fn from(src: UrlParseError) -> RelayError {
        RelayError::InvalidArgument(format!("Invalid URL: {src}"))
    }
}

impl From<io::Error> for RelayError {
    fn from(x: io::Error) -> Self {
        match x.kind() {
            io::ErrorKind::NotFound => RelayError::NotFound(format!("{x}")),
            _ => RelayError::Io(format!("IOError: {}", x.kind())),
        }
    }
}
