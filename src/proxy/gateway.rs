use std::fmt;

use async_trait::async_trait;
use log::{debug, info, warn};
use serde_json::json;

use super::selection::{pick_least_used, IpAllocator, IpUsageSource};
use super::types::{
    AllocatedIpsResponse, GatewayBody, GatewayRequest, GatewayResponse, MachineIpResponse,
    ZonePasswordResponse,
};
use crate::api::error::ApiError;
use crate::config::ProxyConfig;

/// Egress path every exchange call goes through
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Execute the call. Non-2xx and non-JSON replies come back as a
    /// response; only network failures are errors.
    async fn dispatch(&self, request: GatewayRequest) -> Result<GatewayResponse, ApiError>;

    /// Remove `ip` from the provider's blacklist
    async fn remediate_blacklist(&self, ip: &str) -> Result<(), ApiError>;

    /// This machine's own outbound IP (not a tunnel IP)
    async fn machine_ip(&self) -> Result<String, ApiError>;
}

/// Gateway backed by a rotating-IP proxy provider.
///
/// The zone password is fetched once at provisioning and read-only afterwards.
pub struct ProxyGateway {
    config: ProxyConfig,
    password: String,
    http: reqwest::Client,
}

impl ProxyGateway {
    /// Fetch the zone password. Any failure here is fatal for the worker.
    pub async fn provision(config: ProxyConfig) -> Result<Self, ApiError> {
        let http = build_client(&config, None)?;
        let url = format!("{}/zone", provider_base(&config));

        let response = http
            .get(&url)
            .query(&[("zone", config.zone.as_str())])
            .bearer_auth(&config.api_token)
            .send()
            .await
            .map_err(|e| ApiError::ProxyError(format!("Proxy provider unreachable: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ApiError::ProxyError(format!(
                "Password request failed ({}): {}",
                status, text
            )));
        }

        let body: ZonePasswordResponse = response
            .json()
            .await
            .map_err(|e| ApiError::ProxyError(format!("Malformed password response: {}", e)))?;

        let password = body
            .password
            .into_iter()
            .find(|p| !p.is_empty())
            .ok_or_else(|| {
                ApiError::ProxyError(format!("No password issued for zone {}", config.zone))
            })?;

        info!("Proxy gateway provisioned for zone {}", config.zone);

        Ok(Self {
            config,
            password,
            http,
        })
    }

    /// IPs currently allocated to the zone
    pub async fn allocated_ips(&self) -> Result<Vec<String>, ApiError> {
        let url = format!("{}/zone/ips", provider_base(&self.config));

        let response = self
            .http
            .get(&url)
            .query(&[("zone", self.config.zone.as_str())])
            .bearer_auth(&self.config.api_token)
            .send()
            .await
            .map_err(|e| ApiError::ProxyError(format!("Proxy provider unreachable: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ApiError::ProxyError(format!(
                "Allocated IP listing failed ({}): {}",
                status, text
            )));
        }

        let body: AllocatedIpsResponse = response
            .json()
            .await
            .map_err(|e| ApiError::ProxyError(format!("Malformed IP listing: {}", e)))?;

        Ok(body.ips.into_iter().map(|entry| entry.ip).collect())
    }

    /// Least-used allocated IP, ties broken at random. Registration only.
    pub async fn select_ip(&self, usage: &dyn IpUsageSource) -> Result<String, ApiError> {
        let allocated = self.allocated_ips().await?;
        let usage = usage.ip_usage()?;

        let picked = pick_least_used(&allocated, &usage, &mut rand::thread_rng())
            .ok_or_else(|| {
                ApiError::ProxyError(format!("No IPs allocated to zone {}", self.config.zone))
            })?;

        debug!("Selected egress IP {} from {} allocated", picked, allocated.len());
        Ok(picked)
    }

    /// Tunnel username; pinning an IP appends `-ip-<ip>`
    pub fn proxy_user(&self, bound_ip: Option<&str>) -> String {
        let base = format!(
            "brd-customer-{}-zone-{}",
            self.config.customer_id, self.config.zone
        );
        match bound_ip {
            Some(ip) if !ip.is_empty() => format!("{}-ip-{}", base, ip),
            _ => base,
        }
    }

    fn tunnel_client(&self, bound_ip: Option<&str>) -> Result<reqwest::Client, ApiError> {
        let Some(superproxy) = self.config.superproxy.as_deref() else {
            return Ok(self.http.clone());
        };

        let proxy = reqwest::Proxy::all(format!("http://{}", superproxy))
            .map_err(|e| ApiError::ProxyError(format!("Invalid superproxy address: {}", e)))?
            .basic_auth(&self.proxy_user(bound_ip), &self.password);

        build_client(&self.config, Some(proxy))
    }
}

#[async_trait]
impl Gateway for ProxyGateway {
    async fn dispatch(&self, request: GatewayRequest) -> Result<GatewayResponse, ApiError> {
        let client = self.tunnel_client(request.bound_ip.as_deref())?;

        debug!(
            "{} {} via {}",
            request.method,
            request.url,
            request.bound_ip.as_deref().unwrap_or("zone default")
        );

        let mut builder = client
            .request(request.method, &request.url)
            .headers(request.headers);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ApiError::TransportError(format!("{}: {}", request.url, e)))?;

        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| ApiError::TransportError(format!("{}: {}", request.url, e)))?;

        let body = match serde_json::from_str(&text) {
            Ok(value) => GatewayBody::Json(value),
            Err(_) => GatewayBody::Raw(text.trim().to_string()),
        };

        Ok(GatewayResponse { status, body })
    }

    async fn remediate_blacklist(&self, ip: &str) -> Result<(), ApiError> {
        let url = format!("{}/zone/blacklist", provider_base(&self.config));

        let response = self
            .http
            .delete(&url)
            .bearer_auth(&self.config.api_token)
            .json(&json!({ "ip": ip, "zone": self.config.zone }))
            .send()
            .await
            .map_err(|e| ApiError::ProxyError(format!("Proxy provider unreachable: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            warn!("Blacklist removal for {} rejected ({}): {}", ip, status, text);
            return Err(ApiError::ProxyError(format!(
                "Blacklist removal failed ({}): {}",
                status, text
            )));
        }

        info!("Removed {} from zone {} blacklist", ip, self.config.zone);
        Ok(())
    }

    async fn machine_ip(&self) -> Result<String, ApiError> {
        let response = self
            .http
            .get(&self.config.machine_ip_url)
            .send()
            .await
            .map_err(|e| ApiError::TransportError(format!("Machine IP lookup failed: {}", e)))?;

        let body: MachineIpResponse = response.json().await?;

        body.ip_addr
            .filter(|ip| !ip.is_empty())
            .ok_or_else(|| ApiError::ParseError("Machine IP response missing ip_addr".to_string()))
    }
}

#[async_trait]
impl IpAllocator for ProxyGateway {
    async fn allocate_ip(&self, usage: &dyn IpUsageSource) -> Result<String, ApiError> {
        self.select_ip(usage).await
    }
}

impl fmt::Debug for ProxyGateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyGateway")
            .field("config", &self.config)
            .field("password", &"***REDACTED***")
            .finish()
    }
}

fn provider_base(config: &ProxyConfig) -> &str {
    config.api_url.trim_end_matches('/')
}

fn build_client(
    config: &ProxyConfig,
    proxy: Option<reqwest::Proxy>,
) -> Result<reqwest::Client, ApiError> {
    let mut builder = reqwest::Client::builder()
        .timeout(config.timeout())
        .connect_timeout(config.connect_timeout());

    if let Some(proxy) = proxy {
        builder = builder.proxy(proxy);
    }

    builder
        .build()
        .map_err(|e| ApiError::ProxyError(format!("Failed to build HTTP client: {}", e)))
}
