use std::collections::BTreeMap;
use std::str::FromStr;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::error::ApiError;
use crate::models::{Exchange, SnapshotCategory};

/// Configuration for rate limiting
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub requests_per_second: u32,
    pub burst_size: u32,
}

/// Canonical view of one asset balance, independent of exchange wire format
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetView {
    pub currency: String,
    pub available: Decimal,
    /// Frozen, locked or on hold
    pub frozen: Decimal,
    /// Outstanding borrow (margin only, zero elsewhere)
    #[serde(default)]
    pub borrowed: Decimal,
}

impl AssetView {
    pub fn new(currency: impl Into<String>, available: Decimal, frozen: Decimal) -> Self {
        Self {
            currency: currency.into(),
            available,
            frozen,
            borrowed: Decimal::ZERO,
        }
    }

    pub fn with_borrowed(mut self, borrowed: Decimal) -> Self {
        self.borrowed = borrowed;
        self
    }

    pub fn net(&self) -> Decimal {
        self.available + self.frozen - self.borrowed
    }
}

/// Identity returned by a credential check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountIdentity {
    /// The exchange's own user id
    pub external_id: String,
    pub permissions: Vec<String>,
}

/// Sum of all categories, denominated in the settlement asset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateBalance {
    pub asset: String,
    pub total: Decimal,
    pub breakdown: BTreeMap<SnapshotCategory, Decimal>,
}

impl AggregateBalance {
    /// Sums the net value of every view denominated in `asset`; other
    /// currencies are ignored since they would need a conversion rate.
    pub fn from_categories(asset: &str, categories: &[(SnapshotCategory, &[AssetView])]) -> Self {
        let mut breakdown = BTreeMap::new();
        let mut total = Decimal::ZERO;

        for (category, views) in categories {
            let category_total: Decimal = views
                .iter()
                .filter(|v| v.currency.eq_ignore_ascii_case(asset))
                .map(AssetView::net)
                .sum();
            *breakdown.entry(*category).or_insert(Decimal::ZERO) += category_total;
            total += category_total;
        }

        Self {
            asset: asset.to_uppercase(),
            total,
            breakdown,
        }
    }
}

/// Settlement asset clients aggregate into unless configured otherwise
pub const SETTLEMENT_ASSET: &str = "USDT";

/// Parse an exchange amount string; blank means zero
pub fn parse_amount(raw: &str) -> Result<Decimal, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(Decimal::ZERO);
    }
    Decimal::from_str(trimmed)
        .or_else(|_| Decimal::from_scientific(trimmed))
        .map_err(|e| format!("Invalid amount '{}': {}", raw, e))
}

/// Amount sent either as a JSON string or a JSON number
pub fn amount_from_json(value: &serde_json::Value) -> Result<Decimal, String> {
    match value {
        serde_json::Value::Null => Ok(Decimal::ZERO),
        serde_json::Value::String(s) => parse_amount(s),
        serde_json::Value::Number(n) => parse_amount(&n.to_string()),
        other => Err(format!("Invalid amount: {}", other)),
    }
}

/// Known false-positive rejection raised by the proxy provider / exchanges
pub fn is_blacklist_signal(text: &str) -> bool {
    let lowered = text.to_lowercase();
    lowered.contains("ip_blacklisted") || lowered.contains("ip blacklisted")
}

/// Core trait that all exchange clients must implement
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    fn exchange(&self) -> Exchange;

    /// Asset balances are summed in; the only currency the aggregate counts
    fn settlement_asset(&self) -> &str;

    /// Confirm the key is usable and return the exchange-side identity
    async fn validate_credentials(&self) -> Result<AccountIdentity, ApiError>;

    async fn fetch_spot_balance(&self) -> Result<Vec<AssetView>, ApiError>;

    async fn fetch_derivatives_balance(&self) -> Result<Vec<AssetView>, ApiError>;

    async fn fetch_margin_summary(&self) -> Result<Vec<AssetView>, ApiError>;

    /// Spot, derivatives and margin fetched concurrently and summed
    async fn fetch_aggregate_balance(&self) -> Result<AggregateBalance, ApiError> {
        let (spot, derivatives, margin) = futures::try_join!(
            self.fetch_spot_balance(),
            self.fetch_derivatives_balance(),
            self.fetch_margin_summary()
        )?;

        Ok(AggregateBalance::from_categories(
            self.settlement_asset(),
            &[
                (SnapshotCategory::Spot, spot.as_slice()),
                (SnapshotCategory::Futures, derivatives.as_slice()),
                (SnapshotCategory::Margin, margin.as_slice()),
            ],
        ))
    }

    /// Get rate limit configuration for this exchange
    fn rate_limit(&self) -> RateLimitConfig;
}
