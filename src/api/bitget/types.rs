use serde::{Deserialize, Serialize};

/// `/api/v2/spot/account/info`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BitgetAccountInfo {
    #[serde(rename = "userId")]
    pub user_id: String,

    /// Granted scopes, e.g. "spot", "mix", "margin"
    #[serde(default)]
    pub authorities: Vec<String>,

    #[serde(rename = "parentId", default)]
    pub parent_id: Option<serde_json::Value>,
}

/// `/api/v2/spot/account/assets`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BitgetSpotAsset {
    pub coin: String,

    pub available: String,

    #[serde(default)]
    pub frozen: String,

    /// Locked by open orders or OTC
    #[serde(default)]
    pub locked: String,
}

/// `/api/v2/mix/account/accounts`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BitgetFuturesAccount {
    #[serde(rename = "marginCoin")]
    pub margin_coin: String,

    pub available: String,

    #[serde(default)]
    pub locked: String,

    #[serde(rename = "accountEquity", default)]
    pub account_equity: Option<String>,
}

/// `/api/v2/margin/crossed/account/assets`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BitgetMarginAsset {
    pub coin: String,

    pub available: String,

    #[serde(default)]
    pub frozen: String,

    #[serde(default)]
    pub borrow: String,

    #[serde(default)]
    pub interest: String,
}
