use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use rust_decimal::Decimal;
use serde_json::Value;

use crate::api::client::amount_from_json;
use crate::api::error::ApiError;

/// USD price source, queried once per cycle
#[async_trait]
pub trait PriceOracle: Send + Sync {
    async fn get_usd_price(&self, symbol: &str) -> Result<Decimal, ApiError>;
}

/// Price oracle backed by a CoinGecko-compatible `simple/price` endpoint
pub struct HttpPriceOracle {
    http: reqwest::Client,
    base_url: String,
}

impl HttpPriceOracle {
    pub fn new(
        base_url: impl Into<String>,
        timeout: Duration,
        connect_timeout: Duration,
    ) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| ApiError::ConfigError(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn coin_id(symbol: &str) -> Option<&'static str> {
        match symbol.to_uppercase().as_str() {
            "USDT" => Some("tether"),
            "USDC" => Some("usd-coin"),
            "BTC" => Some("bitcoin"),
            "ETH" => Some("ethereum"),
            _ => None,
        }
    }
}

#[async_trait]
impl PriceOracle for HttpPriceOracle {
    async fn get_usd_price(&self, symbol: &str) -> Result<Decimal, ApiError> {
        if symbol.eq_ignore_ascii_case("USD") {
            return Ok(Decimal::ONE);
        }

        let id = Self::coin_id(symbol)
            .ok_or_else(|| ApiError::ConfigError(format!("No price source for {}", symbol)))?;

        let url = format!("{}/api/v3/simple/price", self.base_url);
        let response = self
            .http
            .get(&url)
            .query(&[("ids", id), ("vs_currencies", "usd")])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ApiError::ExchangeError {
                code: status.as_u16().to_string(),
                message: format!("Price lookup failed: {}", text),
            });
        }

        let body: Value = response.json().await?;
        let raw = body
            .get(id)
            .and_then(|quote| quote.get("usd"))
            .ok_or_else(|| ApiError::ParseError(format!("No USD quote for {} in {}", id, body)))?;

        let price = amount_from_json(raw).map_err(ApiError::ParseError)?;
        if price <= Decimal::ZERO {
            return Err(ApiError::ParseError(format!(
                "Non-positive USD price for {}: {}",
                symbol, price
            )));
        }

        debug!("{} priced at {} USD", symbol, price);
        Ok(price)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use rust_decimal_macros::dec;

    fn oracle(url: &str) -> HttpPriceOracle {
        HttpPriceOracle::new(url, Duration::from_secs(5), Duration::from_secs(2)).unwrap()
    }

    #[tokio::test]
    async fn test_price_is_read_from_quote() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v3/simple/price")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("ids".into(), "tether".into()),
                Matcher::UrlEncoded("vs_currencies".into(), "usd".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"tether":{"usd":0.9998}}"#)
            .expect(1)
            .create_async()
            .await;

        let price = oracle(&server.url()).get_usd_price("usdt").await.unwrap();

        assert_eq!(price, dec!(0.9998));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_usd_needs_no_lookup() {
        let price = oracle("http://127.0.0.1:1").get_usd_price("USD").await.unwrap();
        assert_eq!(price, Decimal::ONE);
    }

    #[tokio::test]
    async fn test_unknown_symbol_is_config_error() {
        let err = oracle("http://127.0.0.1:1").get_usd_price("DOGE").await.unwrap_err();
        assert!(matches!(err, ApiError::ConfigError(_)));
    }

    #[tokio::test]
    async fn test_missing_quote_and_http_errors() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v3/simple/price")
            .match_query(Matcher::UrlEncoded("ids".into(), "bitcoin".into()))
            .with_status(200)
            .with_body(r#"{}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/api/v3/simple/price")
            .match_query(Matcher::UrlEncoded("ids".into(), "ethereum".into()))
            .with_status(429)
            .with_body("rate limited")
            .create_async()
            .await;

        let oracle = oracle(&server.url());

        let missing = oracle.get_usd_price("BTC").await.unwrap_err();
        assert!(matches!(missing, ApiError::ParseError(_)));

        match oracle.get_usd_price("ETH").await.unwrap_err() {
            ApiError::ExchangeError { code, .. } => assert_eq!(code, "429"),
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
