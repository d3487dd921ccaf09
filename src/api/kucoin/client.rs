use std::sync::Arc;

use async_trait::async_trait;

use crate::api::{
    client::{AccountIdentity, AssetView, ExchangeClient, RateLimitConfig, SETTLEMENT_ASSET},
    credentials::Credential,
    error::ApiError,
    signer::{KucoinSigner, SignableRequest},
    transport::{into_auth_error, SignedTransport},
};
use crate::models::Exchange;
use crate::proxy::Gateway;

use super::{
    mapper::{map_api_key_info, map_futures_overview, map_margin_accounts, map_trade_account},
    types::{
        KucoinAccount, KucoinApiKeyInfo, KucoinCrossMarginAccount, KucoinFuturesOverview,
        KucoinIsolatedMargin,
    },
};

const SPOT_BASE_URL: &str = "https://api.kucoin.com";
const FUTURES_BASE_URL: &str = "https://api-futures.kucoin.com";
const API_KEY_ENDPOINT: &str = "/api/v1/user/api-key";
const ACCOUNTS_ENDPOINT: &str = "/api/v1/accounts";
const FUTURES_OVERVIEW_ENDPOINT: &str = "/api/v1/account-overview";
const CROSS_MARGIN_ENDPOINT: &str = "/api/v1/margin/account";
const ISOLATED_MARGIN_ENDPOINT: &str = "/api/v1/isolated/accounts";
const SUCCESS_CODE: &str = "200000";

pub struct KucoinClient {
    transport: SignedTransport,
    settlement_asset: String,
}

impl KucoinClient {
    pub fn new(credential: &Credential, gateway: Arc<dyn Gateway>, bound_ip: Option<String>) -> Self {
        let signer = KucoinSigner::new(
            credential.api_key.clone(),
            credential.api_secret.clone(),
            credential.passphrase_or_empty(),
        );

        Self {
            transport: SignedTransport::new(
                Exchange::Kucoin,
                Box::new(signer),
                gateway,
                &Self::rate_limit_config(),
                bound_ip,
                SUCCESS_CODE,
            ),
            settlement_asset: SETTLEMENT_ASSET.to_string(),
        }
    }

    pub fn with_settlement_asset(mut self, asset: &str) -> Self {
        self.settlement_asset = asset.trim().to_uppercase();
        self
    }

    /// Futures API names bitcoin XBT
    fn futures_currency(&self) -> &str {
        match self.settlement_asset.as_str() {
            "BTC" => "XBT",
            other => other,
        }
    }

    pub fn rate_limit_config() -> RateLimitConfig {
        RateLimitConfig {
            requests_per_second: 6,
            burst_size: 6,
        }
    }
}

#[async_trait]
impl ExchangeClient for KucoinClient {
    fn exchange(&self) -> Exchange {
        Exchange::Kucoin
    }

    fn settlement_asset(&self) -> &str {
        &self.settlement_asset
    }

    async fn validate_credentials(&self) -> Result<AccountIdentity, ApiError> {
        let info: KucoinApiKeyInfo = self
            .transport
            .call(SPOT_BASE_URL, SignableRequest::get(API_KEY_ENDPOINT))
            .await
            .map_err(into_auth_error)?;

        Ok(map_api_key_info(info))
    }

    async fn fetch_spot_balance(&self) -> Result<Vec<AssetView>, ApiError> {
        let accounts: Vec<KucoinAccount> = self
            .transport
            .call(SPOT_BASE_URL, SignableRequest::get(ACCOUNTS_ENDPOINT).query("type", "trade"))
            .await?;

        accounts
            .iter()
            .map(|a| map_trade_account(a).map_err(ApiError::ParseError))
            .collect()
    }

    async fn fetch_derivatives_balance(&self) -> Result<Vec<AssetView>, ApiError> {
        let overview: KucoinFuturesOverview = self
            .transport
            .call(
                FUTURES_BASE_URL,
                SignableRequest::get(FUTURES_OVERVIEW_ENDPOINT).query("currency", self.futures_currency()),
            )
            .await?;

        Ok(vec![map_futures_overview(&overview).map_err(ApiError::ParseError)?])
    }

    async fn fetch_margin_summary(&self) -> Result<Vec<AssetView>, ApiError> {
        let (cross, isolated) = futures::try_join!(
            self.transport
                .call::<KucoinCrossMarginAccount>(SPOT_BASE_URL, SignableRequest::get(CROSS_MARGIN_ENDPOINT)),
            self.transport
                .call::<KucoinIsolatedMargin>(SPOT_BASE_URL, SignableRequest::get(ISOLATED_MARGIN_ENDPOINT))
        )?;

        map_margin_accounts(&cross, &isolated).map_err(ApiError::ParseError)
    }

    fn rate_limit(&self) -> RateLimitConfig {
        Self::rate_limit_config()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::signer::hmac_sha256_base64;
    use crate::test_support::{FakeGateway, Scripted};
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn client(gateway: Arc<FakeGateway>) -> KucoinClient {
        let credential = Credential::new(Exchange::Kucoin, "kc-key", "kc-secret", Some("kc-phrase".into()));
        KucoinClient::new(&credential, gateway, None)
    }

    fn script_margin(gateway: &FakeGateway) {
        gateway.script(
            CROSS_MARGIN_ENDPOINT,
            vec![Scripted::ok(json!({
                "code": "200000",
                "data": {"debtRatio": "0", "accounts": [
                    {"currency": "USDT", "totalBalance": "40", "availableBalance": "40", "holdBalance": "0", "liability": "15"}
                ]}
            }))],
        );
        gateway.script(
            ISOLATED_MARGIN_ENDPOINT,
            vec![Scripted::ok(json!({
                "code": "200000",
                "data": {"assets": [{
                    "symbol": "ETH-USDT",
                    "baseAsset": {"currency": "ETH", "availableBalance": "1", "holdBalance": "0", "liability": "0"},
                    "quoteAsset": {"currency": "USDT", "availableBalance": "10", "holdBalance": "2", "liability": "0"}
                }]}
            }))],
        );
    }

    #[tokio::test]
    async fn test_validate_credentials_numeric_uid() {
        let gateway = Arc::new(FakeGateway::new());
        gateway.script(
            API_KEY_ENDPOINT,
            vec![Scripted::ok(json!({
                "code": "200000",
                "data": {"uid": 165111215, "permission": "General,Spot", "isMaster": true, "apiVersion": 2}
            }))],
        );

        let identity = client(gateway.clone()).validate_credentials().await.unwrap();

        assert_eq!(identity.external_id, "165111215");
        assert_eq!(identity.permissions, vec!["General", "Spot"]);

        let headers = &gateway.calls()[0].headers;
        assert_eq!(headers["KC-API-KEY-VERSION"], "2");
        assert_eq!(
            headers["KC-API-PASSPHRASE"],
            hmac_sha256_base64("kc-secret", "kc-phrase").unwrap().as_str()
        );
    }

    #[tokio::test]
    async fn test_invalid_passphrase_is_auth_error() {
        let gateway = Arc::new(FakeGateway::new());
        gateway.script(
            API_KEY_ENDPOINT,
            vec![Scripted::json_status(401, json!({"code": "400004", "msg": "Invalid KC-API-PASSPHRASE"}))],
        );

        let err = client(gateway).validate_credentials().await.unwrap_err();
        assert!(matches!(err, ApiError::AuthenticationError(_)));
    }

    #[tokio::test]
    async fn test_futures_uses_futures_host() {
        let gateway = Arc::new(FakeGateway::new());
        gateway.script(
            FUTURES_OVERVIEW_ENDPOINT,
            vec![Scripted::ok(json!({
                "code": "200000",
                "data": {"currency": "USDT", "accountEquity": 99.5, "availableBalance": 90.25}
            }))],
        );

        let views = client(gateway.clone()).fetch_derivatives_balance().await.unwrap();

        assert_eq!(views[0].frozen, dec!(9.25));
        assert_eq!(
            gateway.calls()[0].url,
            "https://api-futures.kucoin.com/api/v1/account-overview?currency=USDT"
        );
    }

    #[tokio::test]
    async fn test_btc_settlement_queries_xbt_overview() {
        let gateway = Arc::new(FakeGateway::new());
        gateway.script(
            FUTURES_OVERVIEW_ENDPOINT,
            vec![Scripted::ok(json!({
                "code": "200000",
                "data": {"currency": "XBT", "accountEquity": 0.5, "availableBalance": 0.5}
            }))],
        );

        let client = client(gateway.clone()).with_settlement_asset("BTC");
        let views = client.fetch_derivatives_balance().await.unwrap();

        assert_eq!(views[0].currency, "BTC");
        assert_eq!(
            gateway.calls()[0].url,
            "https://api-futures.kucoin.com/api/v1/account-overview?currency=XBT"
        );
    }

    #[tokio::test]
    async fn test_margin_fetches_cross_and_isolated() {
        let gateway = Arc::new(FakeGateway::new());
        script_margin(&gateway);

        let views = client(gateway.clone()).fetch_margin_summary().await.unwrap();

        assert_eq!(views.len(), 3);
        assert_eq!(gateway.calls_to(CROSS_MARGIN_ENDPOINT), 1);
        assert_eq!(gateway.calls_to(ISOLATED_MARGIN_ENDPOINT), 1);
    }

    #[tokio::test]
    async fn test_aggregate_nets_margin_liabilities() {
        let gateway = Arc::new(FakeGateway::new());
        gateway.script(
            ACCOUNTS_ENDPOINT,
            vec![Scripted::ok(json!({
                "code": "200000",
                "data": [
                    {"id": "1", "currency": "USDT", "type": "trade", "balance": "12.5", "available": "10", "holds": "2.5"},
                    {"id": "2", "currency": "KCS", "type": "trade", "balance": "3", "available": "3", "holds": "0"}
                ]
            }))],
        );
        gateway.script(
            FUTURES_OVERVIEW_ENDPOINT,
            vec![Scripted::ok(json!({
                "code": "200000",
                "data": {"currency": "USDT", "accountEquity": 7.5, "availableBalance": 7.5}
            }))],
        );
        script_margin(&gateway);

        let aggregate = client(gateway).fetch_aggregate_balance().await.unwrap();

        // spot 12.5 + futures 7.5 + margin (40 - 15) + (10 + 2)
        assert_eq!(aggregate.total, dec!(57));
    }
}
