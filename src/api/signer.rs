use std::collections::BTreeMap;
use std::fmt;

use base64::{engine::general_purpose, Engine as _};
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::Method;
use sha2::Sha256;

use super::error::ApiError;

type HmacSha256 = Hmac<Sha256>;

/// Canonical description of one REST call, before authentication
#[derive(Debug, Clone)]
pub struct SignableRequest {
    pub method: Method,
    pub path: String,
    /// Kept ordered by key so the canonical string never depends on insertion order
    pub query: BTreeMap<String, String>,
    pub body: Option<serde_json::Value>,
    /// Unix milliseconds
    pub timestamp_ms: i64,
}

impl SignableRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: BTreeMap::new(),
            body: None,
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(key.into(), value.into());
        self
    }

    pub fn body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Pin the timestamp (signing is otherwise stamped with wall-clock time)
    pub fn at(mut self, timestamp_ms: i64) -> Self {
        self.timestamp_ms = timestamp_ms;
        self
    }

    pub fn query_string(&self) -> String {
        self.query
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&")
    }

    /// Path plus sorted query string, exactly as sent on the wire
    pub fn request_path(&self) -> String {
        if self.query.is_empty() {
            self.path.clone()
        } else {
            format!("{}?{}", self.path, self.query_string())
        }
    }

    /// Serialized body; absent, null and empty-object bodies are the empty string
    pub fn body_string(&self) -> String {
        match &self.body {
            None | Some(serde_json::Value::Null) => String::new(),
            Some(serde_json::Value::Object(map)) if map.is_empty() => String::new(),
            Some(value) => value.to_string(),
        }
    }

    /// timestamp + METHOD + path[?query] + body
    pub fn prehash(&self) -> String {
        format!(
            "{}{}{}{}",
            self.timestamp_ms,
            self.method.as_str().to_uppercase(),
            self.request_path(),
            self.body_string()
        )
    }
}

/// Per-exchange authentication strategy
pub trait Signer: Send + Sync {
    fn sign(&self, request: &SignableRequest) -> Result<HeaderMap, ApiError>;
}

/// base64(HMAC-SHA256(secret, payload))
pub fn hmac_sha256_base64(secret: &str, payload: &str) -> Result<String, ApiError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| ApiError::SigningError(format!("Invalid secret: {}", e)))?;
    mac.update(payload.as_bytes());
    Ok(general_purpose::STANDARD.encode(mac.finalize().into_bytes()))
}

fn check_material(value: &str, what: &str) -> Result<(), ApiError> {
    if value.trim().is_empty() {
        return Err(ApiError::SigningError(format!("{} is empty", what)));
    }
    if value.chars().any(|c| c.is_control()) {
        return Err(ApiError::SigningError(format!("{} contains control characters", what)));
    }
    Ok(())
}

fn header_value(value: &str, what: &str) -> Result<HeaderValue, ApiError> {
    HeaderValue::from_str(value)
        .map_err(|e| ApiError::SigningError(format!("Invalid {}: {}", what, e)))
}

/// Bitget: passphrase travels as-is
#[derive(Clone)]
pub struct BitgetSigner {
    api_key: String,
    api_secret: String,
    passphrase: String,
}

impl BitgetSigner {
    pub fn new(api_key: String, api_secret: String, passphrase: String) -> Self {
        Self {
            api_key,
            api_secret,
            passphrase,
        }
    }
}

impl fmt::Debug for BitgetSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BitgetSigner").finish_non_exhaustive()
    }
}

impl Signer for BitgetSigner {
    fn sign(&self, request: &SignableRequest) -> Result<HeaderMap, ApiError> {
        check_material(&self.api_key, "API key")?;
        check_material(&self.api_secret, "API secret")?;

        let timestamp = request.timestamp_ms.to_string();
        let signature = hmac_sha256_base64(&self.api_secret, &request.prehash())?;

        let mut headers = HeaderMap::new();
        headers.insert("Content-Type", HeaderValue::from_static("application/json"));
        headers.insert("ACCESS-KEY", header_value(&self.api_key, "API key")?);
        headers.insert("ACCESS-SIGN", header_value(&signature, "signature")?);
        headers.insert("ACCESS-TIMESTAMP", header_value(&timestamp, "timestamp")?);
        headers.insert("ACCESS-PASSPHRASE", header_value(&self.passphrase, "passphrase")?);
        headers.insert("locale", HeaderValue::from_static("en-US"));

        Ok(headers)
    }
}

/// KuCoin (key version 2): the passphrase itself is HMAC-ed with the secret
#[derive(Clone)]
pub struct KucoinSigner {
    api_key: String,
    api_secret: String,
    passphrase: String,
}

impl KucoinSigner {
    pub fn new(api_key: String, api_secret: String, passphrase: String) -> Self {
        Self {
            api_key,
            api_secret,
            passphrase,
        }
    }
}

impl fmt::Debug for KucoinSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KucoinSigner").finish_non_exhaustive()
    }
}

impl Signer for KucoinSigner {
    fn sign(&self, request: &SignableRequest) -> Result<HeaderMap, ApiError> {
        check_material(&self.api_key, "API key")?;
        check_material(&self.api_secret, "API secret")?;
        check_material(&self.passphrase, "passphrase")?;

        let timestamp = request.timestamp_ms.to_string();
        let signature = hmac_sha256_base64(&self.api_secret, &request.prehash())?;
        let passphrase = hmac_sha256_base64(&self.api_secret, &self.passphrase)?;

        let mut headers = HeaderMap::new();
        headers.insert("Content-Type", HeaderValue::from_static("application/json"));
        headers.insert("KC-API-KEY", header_value(&self.api_key, "API key")?);
        headers.insert("KC-API-SIGN", header_value(&signature, "signature")?);
        headers.insert("KC-API-TIMESTAMP", header_value(&timestamp, "timestamp")?);
        headers.insert("KC-API-PASSPHRASE", header_value(&passphrase, "passphrase")?);
        headers.insert("KC-API-KEY-VERSION", HeaderValue::from_static("2"));

        Ok(headers)
    }
}
