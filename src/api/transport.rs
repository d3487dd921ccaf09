use std::sync::Arc;

use log::{error, warn};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use super::client::{is_blacklist_signal, RateLimitConfig};
use super::error::ApiError;
use super::rate_limiter::RateLimiter;
use super::signer::{SignableRequest, Signer};
use crate::models::Exchange;
use crate::proxy::{Gateway, GatewayBody, GatewayRequest, GatewayResponse};

/// `{code, msg, data}` wrapper shared by Bitget and KuCoin replies
#[derive(Debug, Deserialize)]
struct Envelope {
    code: Value,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    data: Option<Value>,
}

/// Rate-limited, signed calls through the gateway for one exchange account.
///
/// Recognises the blacklist signal on every reply and triggers remediation
/// with this machine's own IP before handing the error back.
pub struct SignedTransport {
    exchange: Exchange,
    signer: Box<dyn Signer>,
    gateway: Arc<dyn Gateway>,
    rate_limiter: RateLimiter,
    bound_ip: Option<String>,
    success_code: &'static str,
}

impl SignedTransport {
    pub fn new(
        exchange: Exchange,
        signer: Box<dyn Signer>,
        gateway: Arc<dyn Gateway>,
        rate_limit: &RateLimitConfig,
        bound_ip: Option<String>,
        success_code: &'static str,
    ) -> Self {
        Self {
            exchange,
            signer,
            gateway,
            rate_limiter: RateLimiter::new(rate_limit),
            bound_ip,
            success_code,
        }
    }

    /// Sign, dispatch and unwrap `data` from a successful envelope
    pub async fn call<T: DeserializeOwned>(
        &self,
        base_url: &str,
        request: SignableRequest,
    ) -> Result<T, ApiError> {
        self.rate_limiter.acquire().await;

        let headers = self.signer.sign(&request)?;
        let url = format!("{}{}", base_url, request.request_path());

        let outbound = GatewayRequest::new(request.method.clone(), url)
            .headers(headers)
            .body(Some(request.body_string()))
            .bound_to(self.bound_ip.clone());

        let response = match self.gateway.dispatch(outbound).await {
            Ok(response) => response,
            Err(err) => {
                if is_blacklist_signal(&err.to_string()) {
                    self.remediate().await;
                }
                return Err(err);
            }
        };

        let data = self.unwrap_envelope(&request.path, response).await?;

        serde_json::from_value(data).map_err(|e| {
            ApiError::ParseError(format!("{} {}: {}", self.exchange, request.path, e))
        })
    }

    async fn unwrap_envelope(&self, path: &str, response: GatewayResponse) -> Result<Value, ApiError> {
        let text = response.text();
        if is_blacklist_signal(&text) {
            self.remediate().await;
            return Err(ApiError::ExchangeError {
                code: response.status.to_string(),
                message: text,
            });
        }

        let envelope = match response.body {
            GatewayBody::Json(value) => serde_json::from_value::<Envelope>(value).ok(),
            GatewayBody::Raw(_) => None,
        };

        let Some(envelope) = envelope else {
            return Err(match response.status {
                401 | 403 => ApiError::AuthenticationError(format!(
                    "{} rejected {} ({})",
                    self.exchange, path, response.status
                )),
                status if (200..300).contains(&status) => ApiError::ParseError(format!(
                    "{} {}: unexpected body {}",
                    self.exchange, path, text
                )),
                status => ApiError::ExchangeError {
                    code: status.to_string(),
                    message: text,
                },
            });
        };

        let code = match &envelope.code {
            Value::String(code) => code.clone(),
            other => other.to_string(),
        };

        if code != self.success_code {
            let message = envelope.msg.unwrap_or_default();
            if matches!(response.status, 401 | 403) {
                return Err(ApiError::AuthenticationError(format!("{} - {}", code, message)));
            }
            return Err(ApiError::ExchangeError { code, message });
        }

        Ok(envelope.data.unwrap_or(Value::Null))
    }

    /// Failures are logged only; the original error is what the caller sees
    async fn remediate(&self) {
        warn!(
            "{} reported an IP blacklist (bound IP {}), requesting removal",
            self.exchange,
            self.bound_ip.as_deref().unwrap_or("none")
        );

        let machine_ip = match self.gateway.machine_ip().await {
            Ok(ip) => ip,
            Err(e) => {
                error!("Could not resolve machine IP for blacklist removal: {}", e);
                return;
            }
        };

        if let Err(e) = self.gateway.remediate_blacklist(&machine_ip).await {
            error!("Blacklist removal for {} failed: {}", machine_ip, e);
        }
    }
}

/// Registration-time mapping: a rejected identity call means the key is unusable
pub fn into_auth_error(err: ApiError) -> ApiError {
    match err {
        ApiError::ExchangeError { code, message } if !is_blacklist_signal(&message) => {
            ApiError::AuthenticationError(format!("{} - {}", code, message))
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::signer::BitgetSigner;
    use crate::test_support::{FakeGateway, Scripted};
    use serde_json::json;

    fn transport(gateway: Arc<FakeGateway>) -> SignedTransport {
        SignedTransport::new(
            Exchange::Bitget,
            Box::new(BitgetSigner::new("k".into(), "s".into(), "p".into())),
            gateway,
            &RateLimitConfig {
                requests_per_second: 100,
                burst_size: 100,
            },
            Some("10.0.0.5".into()),
            "00000",
        )
    }

    #[tokio::test]
    async fn test_success_unwraps_data_and_binds_ip() {
        let gateway = Arc::new(FakeGateway::new());
        gateway.script("/p", vec![Scripted::ok(json!({"code": "00000", "msg": "success", "data": [1, 2]}))]);

        let data: Vec<u32> = transport(gateway.clone())
            .call("https://x", SignableRequest::get("/p").query("a", "1"))
            .await
            .unwrap();

        assert_eq!(data, vec![1, 2]);
        let calls = gateway.calls();
        assert_eq!(calls[0].url, "https://x/p?a=1");
        assert_eq!(calls[0].bound_ip.as_deref(), Some("10.0.0.5"));
        assert!(calls[0].headers.contains_key("ACCESS-SIGN"));
        assert!(calls[0].body.is_none());
    }

    #[tokio::test]
    async fn test_exchange_failure_code() {
        let gateway = Arc::new(FakeGateway::new());
        gateway.script("/p", vec![Scripted::ok(json!({"code": "40009", "msg": "sign signature error"}))]);

        let err = transport(gateway.clone())
            .call::<Value>("https://x", SignableRequest::get("/p"))
            .await
            .unwrap_err();

        assert!(matches!(err, ApiError::ExchangeError { ref code, .. } if code == "40009"));
        assert_eq!(gateway.remediation_count(), 0);
    }

    #[tokio::test]
    async fn test_blacklist_payload_triggers_remediation_with_machine_ip() {
        let gateway = Arc::new(FakeGateway::new());
        gateway.script("/p", vec![Scripted::status(407, "Auth Failed (code: ip_blacklisted)")]);

        let err = transport(gateway.clone())
            .call::<Value>("https://x", SignableRequest::get("/p"))
            .await
            .unwrap_err();

        assert!(err.is_retryable());
        assert_eq!(gateway.remediations(), vec![FakeGateway::MACHINE_IP.to_string()]);
    }

    #[tokio::test]
    async fn test_blacklist_in_transport_error_triggers_remediation() {
        let gateway = Arc::new(FakeGateway::new());
        gateway.script("/p", vec![Scripted::transport("proxy CONNECT: 401 Auth Failed (code: ip_blacklisted)")]);

        let err = transport(gateway.clone())
            .call::<Value>("https://x", SignableRequest::get("/p"))
            .await
            .unwrap_err();

        assert!(matches!(err, ApiError::TransportError(_)));
        assert_eq!(gateway.remediation_count(), 1);
    }

    #[tokio::test]
    async fn test_failed_remediation_keeps_original_error() {
        let gateway = Arc::new(FakeGateway::new().failing_remediation());
        gateway.script("/p", vec![Scripted::ok(json!({"code": "40001", "msg": "ip_blacklisted"}))]);

        let err = transport(gateway.clone())
            .call::<Value>("https://x", SignableRequest::get("/p"))
            .await
            .unwrap_err();

        assert!(matches!(err, ApiError::ExchangeError { .. }));
        assert_eq!(gateway.remediation_count(), 1);
    }

    #[tokio::test]
    async fn test_unauthorized_status_is_auth_error() {
        let gateway = Arc::new(FakeGateway::new());
        gateway.script("/p", vec![Scripted::status(401, "Unauthorized")]);

        let err = transport(gateway)
            .call::<Value>("https://x", SignableRequest::get("/p"))
            .await
            .unwrap_err();

        assert!(matches!(err, ApiError::AuthenticationError(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_signing_failure_never_dispatches() {
        let gateway = Arc::new(FakeGateway::new());
        let transport = SignedTransport::new(
            Exchange::Bitget,
            Box::new(BitgetSigner::new("k".into(), "".into(), "p".into())),
            gateway.clone(),
            &RateLimitConfig {
                requests_per_second: 1,
                burst_size: 1,
            },
            None,
            "00000",
        );

        let err = transport
            .call::<Value>("https://x", SignableRequest::get("/p"))
            .await
            .unwrap_err();

        assert!(matches!(err, ApiError::SigningError(_)));
        assert!(gateway.calls().is_empty());
    }

    #[test]
    fn test_into_auth_error() {
        let rejected = into_auth_error(ApiError::ExchangeError {
            code: "40037".into(),
            message: "Apikey does not exist".into(),
        });
        assert!(matches!(rejected, ApiError::AuthenticationError(_)));

        let transport = into_auth_error(ApiError::TransportError("reset".into()));
        assert!(matches!(transport, ApiError::TransportError(_)));
    }
}
