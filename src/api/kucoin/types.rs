use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// `/api/v1/user/api-key`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KucoinApiKeyInfo {
    /// Sent as a number
    #[serde(deserialize_with = "string_or_number")]
    pub uid: String,

    /// Comma separated, e.g. "General,Spot,Futures"
    #[serde(default)]
    pub permission: String,

    #[serde(rename = "isMaster", default)]
    pub is_master: Option<bool>,
}

/// `/api/v1/accounts?type=trade`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KucoinAccount {
    pub currency: String,

    pub available: String,

    #[serde(default)]
    pub holds: String,
}

/// `/api/v1/account-overview` on the futures host. Amounts are JSON numbers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KucoinFuturesOverview {
    pub currency: String,

    #[serde(rename = "accountEquity", default)]
    pub account_equity: Value,

    #[serde(rename = "availableBalance", default)]
    pub available_balance: Value,
}

/// `/api/v1/margin/account`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KucoinCrossMarginAccount {
    #[serde(default)]
    pub accounts: Vec<KucoinMarginAsset>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KucoinMarginAsset {
    pub currency: String,

    #[serde(rename = "availableBalance")]
    pub available_balance: String,

    #[serde(rename = "holdBalance", default)]
    pub hold_balance: String,

    #[serde(default)]
    pub liability: String,
}

/// `/api/v1/isolated/accounts`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KucoinIsolatedMargin {
    #[serde(default)]
    pub assets: Vec<KucoinIsolatedPair>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KucoinIsolatedPair {
    pub symbol: String,

    #[serde(rename = "baseAsset")]
    pub base_asset: KucoinMarginAsset,

    #[serde(rename = "quoteAsset")]
    pub quote_asset: KucoinMarginAsset,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!("expected string or number, got {}", other))),
    }
}
