//! Environment-based worker configuration.

use std::fmt;
use std::time::Duration;

use crate::api::client::SETTLEMENT_ASSET;
use crate::api::error::ApiError;
use crate::sync::DEFAULT_MAX_RECORDS;

/// Complete worker configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// SQLite database file
    pub database_path: String,
    pub proxy: ProxyConfig,
    /// Base URL of the USD price API
    pub price_api_url: String,
    pub credentials: CipherConfig,
    pub sync: SyncConfig,
}

/// Proxy provider and tunnel settings
#[derive(Clone)]
pub struct ProxyConfig {
    pub api_url: String,
    pub api_token: String,
    pub zone: String,
    pub customer_id: String,
    /// host:port of the tunnelling endpoint; None sends calls directly
    pub superproxy: Option<String>,
    /// Echo service reporting this machine's outbound IP
    pub machine_ip_url: String,
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
}

/// Key material for credential encryption at rest
#[derive(Clone)]
pub struct CipherConfig {
    pub master_key: String,
    /// Base64 salt for key derivation
    pub salt: String,
}

/// Fetch cycle settings
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub interval_secs: u64,
    pub batch_size: usize,
    pub max_concurrent: usize,
    pub retry_attempts: u32,
    pub retry_delay_ms: u64,
    pub max_records_per_user: usize,
    pub settlement_asset: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_secs: 3600,
            batch_size: 100,
            max_concurrent: 50,
            retry_attempts: 3,
            retry_delay_ms: 2000,
            max_records_per_user: DEFAULT_MAX_RECORDS,
            settlement_asset: SETTLEMENT_ASSET.to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the environment (and `.env` when present)
    pub fn from_env() -> Result<Self, ApiError> {
        dotenvy::dotenv().ok();

        let superproxy = std::env::var("PROXY_SUPERPROXY")
            .unwrap_or_else(|_| "brd.superproxy.io:33335".to_string());

        let defaults = SyncConfig::default();

        Ok(Self {
            database_path: env_var_or("DATABASE_PATH", "asset_aggregator.db"),
            proxy: ProxyConfig {
                api_url: env_var_or("PROXY_API_URL", "https://api.brightdata.com"),
                api_token: required_env_var("PROXY_API_TOKEN")?,
                zone: env_var_or("PROXY_ZONE", "main_zone"),
                customer_id: required_env_var("PROXY_CUSTOMER_ID")?,
                superproxy: Some(superproxy).filter(|s| !s.trim().is_empty()),
                machine_ip_url: env_var_or("MACHINE_IP_URL", "https://ifconfig.me/all.json"),
                timeout_secs: env_var_parse("HTTP_TIMEOUT_SECS", 10),
                connect_timeout_secs: env_var_parse("HTTP_CONNECT_TIMEOUT_SECS", 5),
            },
            price_api_url: env_var_or("PRICE_API_URL", "https://api.coingecko.com"),
            credentials: CipherConfig {
                master_key: required_env_var("CREDENTIAL_MASTER_KEY")?,
                salt: required_env_var("CREDENTIAL_SALT")?,
            },
            sync: SyncConfig {
                interval_secs: env_var_parse("SYNC_INTERVAL_SECS", defaults.interval_secs),
                batch_size: env_var_parse("SYNC_BATCH_SIZE", defaults.batch_size),
                max_concurrent: env_var_parse("SYNC_MAX_CONCURRENT", defaults.max_concurrent),
                retry_attempts: env_var_parse("SYNC_RETRY_ATTEMPTS", defaults.retry_attempts),
                retry_delay_ms: env_var_parse("SYNC_RETRY_DELAY_MS", defaults.retry_delay_ms),
                max_records_per_user: env_var_parse(
                    "HISTORY_MAX_RECORDS",
                    defaults.max_records_per_user,
                ),
                settlement_asset: env_var_or("SETTLEMENT_ASSET", &defaults.settlement_asset),
            },
        })
    }
}

impl ProxyConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl SyncConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl fmt::Debug for ProxyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyConfig")
            .field("api_url", &self.api_url)
            .field("api_token", &"***REDACTED***")
            .field("zone", &self.zone)
            .field("customer_id", &self.customer_id)
            .field("superproxy", &self.superproxy)
            .field("machine_ip_url", &self.machine_ip_url)
            .field("timeout_secs", &self.timeout_secs)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .finish()
    }
}

impl fmt::Debug for CipherConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CipherConfig")
            .field("master_key", &"***REDACTED***")
            .field("salt", &self.salt)
            .finish()
    }
}

fn required_env_var(key: &str) -> Result<String, ApiError> {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ApiError::ConfigError(format!("{} is not set", key)))
}

fn env_var_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Parse an environment variable, falling back to `default` when absent or invalid
fn env_var_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
