use std::sync::Arc;

use super::bitget::BitgetClient;
use super::client::{ExchangeClient, SETTLEMENT_ASSET};
use super::credentials::Credential;
use super::error::ApiError;
use super::kucoin::KucoinClient;
use crate::models::Exchange;
use crate::proxy::Gateway;

/// Builds the exchange client for an account once; callers only see the trait
pub trait ClientFactory: Send + Sync {
    fn create(
        &self,
        credential: &Credential,
        bound_ip: Option<&str>,
    ) -> Result<Arc<dyn ExchangeClient>, ApiError>;
}

pub struct DefaultClientFactory {
    gateway: Arc<dyn Gateway>,
    settlement_asset: String,
}

impl DefaultClientFactory {
    pub fn new(gateway: Arc<dyn Gateway>) -> Self {
        Self {
            gateway,
            settlement_asset: SETTLEMENT_ASSET.to_string(),
        }
    }

    /// Asset every created client aggregates into
    pub fn with_settlement_asset(mut self, asset: &str) -> Self {
        self.settlement_asset = asset.trim().to_uppercase();
        self
    }
}

impl ClientFactory for DefaultClientFactory {
    fn create(
        &self,
        credential: &Credential,
        bound_ip: Option<&str>,
    ) -> Result<Arc<dyn ExchangeClient>, ApiError> {
        let gateway = Arc::clone(&self.gateway);
        let bound_ip = bound_ip.map(str::to_string);

        match credential.exchange {
            Exchange::Bitget => Ok(Arc::new(
                BitgetClient::new(credential, gateway, bound_ip)
                    .with_settlement_asset(&self.settlement_asset),
            )),
            Exchange::Kucoin => Ok(Arc::new(
                KucoinClient::new(credential, gateway, bound_ip)
                    .with_settlement_asset(&self.settlement_asset),
            )),
            Exchange::Binance => Err(ApiError::UnsupportedExchange(credential.exchange.to_string())),
        }
    }
}
