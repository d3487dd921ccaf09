use std::sync::Arc;

use async_trait::async_trait;

use crate::api::{
    client::{AccountIdentity, AssetView, ExchangeClient, RateLimitConfig, SETTLEMENT_ASSET},
    credentials::Credential,
    error::ApiError,
    signer::{BitgetSigner, SignableRequest},
    transport::{into_auth_error, SignedTransport},
};
use crate::models::Exchange;
use crate::proxy::Gateway;

use super::{
    mapper::{map_account_info, map_futures_account, map_margin_asset, map_spot_asset},
    types::{BitgetAccountInfo, BitgetFuturesAccount, BitgetMarginAsset, BitgetSpotAsset},
};

const BASE_URL: &str = "https://api.bitget.com";
const ACCOUNT_INFO_ENDPOINT: &str = "/api/v2/spot/account/info";
const SPOT_ASSETS_ENDPOINT: &str = "/api/v2/spot/account/assets";
const FUTURES_ACCOUNTS_ENDPOINT: &str = "/api/v2/mix/account/accounts";
const CROSS_MARGIN_ENDPOINT: &str = "/api/v2/margin/crossed/account/assets";
const SUCCESS_CODE: &str = "00000";

pub struct BitgetClient {
    transport: SignedTransport,
    base_url: String,
    settlement_asset: String,
}

impl BitgetClient {
    pub fn new(credential: &Credential, gateway: Arc<dyn Gateway>, bound_ip: Option<String>) -> Self {
        let signer = BitgetSigner::new(
            credential.api_key.clone(),
            credential.api_secret.clone(),
            credential.passphrase_or_empty(),
        );

        Self {
            transport: SignedTransport::new(
                Exchange::Bitget,
                Box::new(signer),
                gateway,
                &Self::rate_limit_config(),
                bound_ip,
                SUCCESS_CODE,
            ),
            base_url: BASE_URL.to_string(),
            settlement_asset: SETTLEMENT_ASSET.to_string(),
        }
    }

    pub fn with_settlement_asset(mut self, asset: &str) -> Self {
        self.settlement_asset = asset.trim().to_uppercase();
        self
    }

    /// USDT and USDC have their own futures lines; anything else is coin-margined
    fn product_type(&self) -> &'static str {
        match self.settlement_asset.as_str() {
            "USDT" => "USDT-FUTURES",
            "USDC" => "USDC-FUTURES",
            _ => "COIN-FUTURES",
        }
    }

    pub fn rate_limit_config() -> RateLimitConfig {
        RateLimitConfig {
            requests_per_second: 10,
            burst_size: 10,
        }
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, request: SignableRequest) -> Result<T, ApiError> {
        self.transport.call(&self.base_url, request).await
    }
}

#[async_trait]
impl ExchangeClient for BitgetClient {
    fn exchange(&self) -> Exchange {
        Exchange::Bitget
    }

    fn settlement_asset(&self) -> &str {
        &self.settlement_asset
    }

    async fn validate_credentials(&self) -> Result<AccountIdentity, ApiError> {
        let info: BitgetAccountInfo = self
            .get(SignableRequest::get(ACCOUNT_INFO_ENDPOINT))
            .await
            .map_err(into_auth_error)?;

        Ok(map_account_info(info))
    }

    async fn fetch_spot_balance(&self) -> Result<Vec<AssetView>, ApiError> {
        let assets: Vec<BitgetSpotAsset> = self.get(SignableRequest::get(SPOT_ASSETS_ENDPOINT)).await?;

        assets
            .iter()
            .map(|a| map_spot_asset(a).map_err(ApiError::ParseError))
            .collect()
    }

    async fn fetch_derivatives_balance(&self) -> Result<Vec<AssetView>, ApiError> {
        let accounts: Vec<BitgetFuturesAccount> = self
            .get(SignableRequest::get(FUTURES_ACCOUNTS_ENDPOINT).query("productType", self.product_type()))
            .await?;

        accounts
            .iter()
            .map(|a| map_futures_account(a).map_err(ApiError::ParseError))
            .collect()
    }

    async fn fetch_margin_summary(&self) -> Result<Vec<AssetView>, ApiError> {
        let assets: Option<Vec<BitgetMarginAsset>> =
            self.get(SignableRequest::get(CROSS_MARGIN_ENDPOINT)).await?;

        assets
            .unwrap_or_default()
            .iter()
            .map(|a| map_margin_asset(a).map_err(ApiError::ParseError))
            .collect()
    }

    fn rate_limit(&self) -> RateLimitConfig {
        Self::rate_limit_config()
    }
}
