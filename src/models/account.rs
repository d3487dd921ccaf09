use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::api::error::ApiError;

/// Exchanges a user can link. Closed set; adding one means adding a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Exchange {
    Bitget,
    Kucoin,
    Binance,
}

impl Exchange {
    pub fn as_str(&self) -> &'static str {
        match self {
            Exchange::Bitget => "bitget",
            Exchange::Kucoin => "kucoin",
            Exchange::Binance => "binance",
        }
    }
}

impl fmt::Display for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Exchange {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "bitget" => Ok(Exchange::Bitget),
            "kucoin" => Ok(Exchange::Kucoin),
            "binance" => Ok(Exchange::Binance),
            other => Err(ApiError::UnsupportedExchange(other.to_string())),
        }
    }
}

/// Primary (one per user) or sub account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountKind {
    Primary,
    Sub,
}

impl AccountKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountKind::Primary => "primary",
            AccountKind::Sub => "sub",
        }
    }
}

impl FromStr for AccountKind {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "primary" => Ok(AccountKind::Primary),
            "sub" => Ok(AccountKind::Sub),
            other => Err(ApiError::DatabaseError(format!("Unknown account kind: {}", other))),
        }
    }
}

/// A user's registered connection to one exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkedAccount {
    pub account_id: String,
    pub user_id: String,
    pub exchange: Exchange,
    pub label: String,
    pub kind: AccountKind,
    /// Egress IP the account is bound to (None = provider default rotation)
    pub proxy_ip: Option<String>,
    pub permissions: Vec<String>,
    pub created_at: i64,
}

/// Input for registering a new linked account
#[derive(Clone, Serialize, Deserialize)]
pub struct RegisterAccountInput {
    pub exchange: String,
    pub label: String,
    pub api_key: String,
    pub api_secret: String,
    pub passphrase: Option<String>,
}

impl fmt::Debug for RegisterAccountInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisterAccountInput")
            .field("exchange", &self.exchange)
            .field("label", &self.label)
            .field("api_key", &"***REDACTED***")
            .field("api_secret", &"***REDACTED***")
            .field("passphrase", &self.passphrase.as_ref().map(|_| "***REDACTED***"))
            .finish()
    }
}
