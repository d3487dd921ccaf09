use std::fmt;

use thiserror::Error;

use super::client::is_blacklist_signal;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Signing failed: {0}")]
    SigningError(String),

    #[error("Transport failure: {0}")]
    TransportError(String),

    #[error("Authentication failed: {0}")]
    AuthenticationError(String),

    #[error("Unsupported exchange: {0}")]
    UnsupportedExchange(String),

    #[error("Invalid API response: {0}")]
    ParseError(String),

    #[error("Encryption error: {0}")]
    EncryptionError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Retention trim failed: {0}")]
    RetentionError(String),

    #[error("Proxy provider error: {0}")]
    ProxyError(String),

    #[error("Exchange API error: {code} - {message}")]
    ExchangeError { code: String, message: String },

    #[error("Account {0} is already associated to an existing user")]
    AccountExists(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Coarse error classification used for per-cycle reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorKind {
    Signing,
    Transport,
    Auth,
    Unsupported,
    Parse,
    Encryption,
    Database,
    Retention,
    Proxy,
    Exchange,
    Conflict,
    Config,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Signing => "signing",
            ErrorKind::Transport => "transport",
            ErrorKind::Auth => "auth",
            ErrorKind::Unsupported => "unsupported",
            ErrorKind::Parse => "parse",
            ErrorKind::Encryption => "encryption",
            ErrorKind::Database => "database",
            ErrorKind::Retention => "retention",
            ErrorKind::Proxy => "proxy",
            ErrorKind::Exchange => "exchange",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Config => "config",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ApiError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ApiError::SigningError(_) => ErrorKind::Signing,
            ApiError::TransportError(_) => ErrorKind::Transport,
            ApiError::AuthenticationError(_) => ErrorKind::Auth,
            ApiError::UnsupportedExchange(_) => ErrorKind::Unsupported,
            ApiError::ParseError(_) => ErrorKind::Parse,
            ApiError::EncryptionError(_) => ErrorKind::Encryption,
            ApiError::DatabaseError(_) => ErrorKind::Database,
            ApiError::RetentionError(_) => ErrorKind::Retention,
            ApiError::ProxyError(_) => ErrorKind::Proxy,
            ApiError::ExchangeError { .. } => ErrorKind::Exchange,
            ApiError::AccountExists(_) => ErrorKind::Conflict,
            ApiError::ConfigError(_) => ErrorKind::Config,
        }
    }

    /// Whether another attempt within the same cycle can succeed.
    ///
    /// Network failures, IP blacklist rejections (remediated before the error
    /// surfaces), rate limiting and exchange-side 5xx replies. Every other
    /// exchange rejection is returned as-is.
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::TransportError(_) => true,
            ApiError::ExchangeError { code, message } => {
                is_blacklist_signal(message)
                    || matches!(code.parse::<u16>(), Ok(429) | Ok(500..=599))
            }
            _ => false,
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ApiError::ParseError(err.to_string())
        } else {
            ApiError::TransportError(err.to_string())
        }
    }
}

impl From<rusqlite::Error> for ApiError {
    fn from(err: rusqlite::Error) -> Self {
        ApiError::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::ParseError(err.to_string())
    }
}

impl From<aes_gcm::Error> for ApiError {
    fn from(err: aes_gcm::Error) -> Self {
        ApiError::EncryptionError(err.to_string())
    }
}

impl From<rust_decimal::Error> for ApiError {
    fn from(err: rust_decimal::Error) -> Self {
        ApiError::ParseError(err.to_string())
    }
}
