use reqwest::header::HeaderMap;
use reqwest::Method;
use serde::Deserialize;
use serde_json::Value;

/// One outbound exchange call, already signed
#[derive(Debug, Clone)]
pub struct GatewayRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    /// Exact body string that was signed
    pub body: Option<String>,
    /// Egress IP the tunnel should present; None uses the zone default
    pub bound_ip: Option<String>,
}

impl GatewayRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            body: None,
            bound_ip: None,
        }
    }

    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn body(mut self, body: Option<String>) -> Self {
        self.body = body.filter(|b| !b.is_empty());
        self
    }

    pub fn bound_to(mut self, ip: Option<String>) -> Self {
        self.bound_ip = ip;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GatewayBody {
    Json(Value),
    /// Body that did not parse as JSON, trimmed
    Raw(String),
}

/// Whatever came back, successful or not. Only transport failures are errors.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayResponse {
    pub status: u16,
    pub body: GatewayBody,
}

impl GatewayResponse {
    pub fn json(status: u16, value: Value) -> Self {
        Self {
            status,
            body: GatewayBody::Json(value),
        }
    }

    pub fn raw(status: u16, text: impl Into<String>) -> Self {
        Self {
            status,
            body: GatewayBody::Raw(text.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body rendered as text, for error messages and signal matching
    pub fn text(&self) -> String {
        match &self.body {
            GatewayBody::Json(value) => value.to_string(),
            GatewayBody::Raw(text) => text.clone(),
        }
    }
}

/// Current number of linked accounts bound to an IP
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpUsage {
    pub ip: String,
    pub used: u64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ZonePasswordResponse {
    #[serde(default)]
    pub password: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AllocatedIpsResponse {
    #[serde(default)]
    pub ips: Vec<AllocatedIp>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AllocatedIp {
    pub ip: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct MachineIpResponse {
    pub ip_addr: Option<String>,
}
