//! Error handling for the LMS client

use std::fmt;
use thiserror::Error;

/// Unified error type for backend, catalog and app operations
#[derive(Error, Debug)]
pub enum Error {
    /// Network or HTTP transport errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization or deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// URL parsing errors
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    /// WebSocket errors from the realtime connection
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// A non-success HTTP response that carried no recognizable error body
    #[error("Request failed with status {status}: {message}")]
    Api { status: u16, message: String },

    /// Authentication errors, carrying the backend's message
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Database query errors, carrying the backend's message
    #[error("Database error: {0}")]
    Database(String),

    /// Realtime subscription errors
    #[error("Realtime error: {0}")]
    Realtime(String),

    /// Spreadsheet API errors
    #[error("Sheets error: {0}")]
    Sheets(String),

    /// The backend client could not be brought up
    #[error("Bootstrap failed: {0}")]
    Bootstrap(String),

    /// Signed in, but the profile does not carry the required role
    #[error("{0}")]
    AccessDenied(String),

    /// Form input rejected before any backend call
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Configuration missing or malformed
    #[error("Configuration error: {0}")]
    Config(String),

    /// An operation exceeded its time bound
    #[error("Operation timed out")]
    Timeout,
}

impl Error {
    /// Create a new authentication error
    pub fn auth<T: fmt::Display>(msg: T) -> Self {
        Error::Auth(msg.to_string())
    }

    /// Create a new database error
    pub fn database<T: fmt::Display>(msg: T) -> Self {
        Error::Database(msg.to_string())
    }

    /// Create a new realtime error
    pub fn realtime<T: fmt::Display>(msg: T) -> Self {
        Error::Realtime(msg.to_string())
    }

    /// Create a new spreadsheet error
    pub fn sheets<T: fmt::Display>(msg: T) -> Self {
        Error::Sheets(msg.to_string())
    }

    /// Create a new configuration error
    pub fn config<T: fmt::Display>(msg: T) -> Self {
        Error::Config(msg.to_string())
    }

    /// Create a new invalid input error
    pub fn invalid_input<T: fmt::Display>(msg: T) -> Self {
        Error::InvalidInput(msg.to_string())
    }

    /// The message shown inline to the user.
    ///
    /// Backend-originated errors are passed through verbatim, without the
    /// variant prefix used by `Display`.
    pub fn user_message(&self) -> String {
        match self {
            Error::Auth(msg)
            | Error::Database(msg)
            | Error::Realtime(msg)
            | Error::Sheets(msg)
            | Error::Bootstrap(msg)
            | Error::AccessDenied(msg)
            | Error::InvalidInput(msg)
            | Error::Config(msg) => msg.clone(),
            Error::Api { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

/// Convenience alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_message_strips_variant_prefix() {
        let err = Error::auth("Invalid login credentials");
        assert_eq!(err.to_string(), "Authentication error: Invalid login credentials");
        assert_eq!(err.user_message(), "Invalid login credentials");

        let err = Error::Api {
            status: 503,
            message: "upstream unavailable".to_string(),
        };
        assert_eq!(err.user_message(), "upstream unavailable");
    }

    #[test]
    fn access_denied_displays_message_only() {
        let err = Error::AccessDenied("Access denied. Admin role required.".to_string());
        assert_eq!(err.to_string(), "Access denied. Admin role required.");
    }
}
