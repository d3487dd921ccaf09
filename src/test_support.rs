//! Scripted doubles shared by unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::api::credentials::CredentialCipher;
use crate::api::error::ApiError;
use crate::proxy::{Gateway, GatewayRequest, GatewayResponse};

#[derive(Debug, Clone)]
pub enum Scripted {
    Reply(GatewayResponse),
    Transport(String),
}

impl Scripted {
    pub fn ok(value: Value) -> Self {
        Scripted::Reply(GatewayResponse::json(200, value))
    }

    pub fn json_status(status: u16, value: Value) -> Self {
        Scripted::Reply(GatewayResponse::json(status, value))
    }

    pub fn status(status: u16, text: &str) -> Self {
        Scripted::Reply(GatewayResponse::raw(status, text))
    }

    pub fn transport(message: &str) -> Self {
        Scripted::Transport(message.to_string())
    }
}

/// Gateway answering from per-path reply queues. The last reply of a queue
/// repeats forever; unscripted paths answer 404.
pub struct FakeGateway {
    routes: Mutex<HashMap<String, VecDeque<Scripted>>>,
    calls: Mutex<Vec<GatewayRequest>>,
    remediations: Mutex<Vec<String>>,
    fail_remediation: bool,
}

impl FakeGateway {
    pub const MACHINE_IP: &'static str = "198.51.100.77";

    pub fn new() -> Self {
        Self {
            routes: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            remediations: Mutex::new(Vec::new()),
            fail_remediation: false,
        }
    }

    pub fn failing_remediation(mut self) -> Self {
        self.fail_remediation = true;
        self
    }

    pub fn script(&self, path: &str, replies: Vec<Scripted>) {
        self.routes
            .lock()
            .unwrap()
            .insert(path.to_string(), replies.into_iter().collect());
    }

    pub fn calls(&self) -> Vec<GatewayRequest> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, path: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| route_key(&c.url) == path)
            .count()
    }

    pub fn remediations(&self) -> Vec<String> {
        self.remediations.lock().unwrap().clone()
    }

    pub fn remediation_count(&self) -> usize {
        self.remediations.lock().unwrap().len()
    }
}

fn route_key(url: &str) -> String {
    let without_scheme = url.split_once("://").map(|(_, rest)| rest).unwrap_or(url);
    let path = without_scheme
        .find('/')
        .map(|i| &without_scheme[i..])
        .unwrap_or("/");
    path.split('?').next().unwrap_or(path).to_string()
}

#[async_trait]
impl Gateway for FakeGateway {
    async fn dispatch(&self, request: GatewayRequest) -> Result<GatewayResponse, ApiError> {
        let key = route_key(&request.url);
        self.calls.lock().unwrap().push(request);

        let next = {
            let mut routes = self.routes.lock().unwrap();
            match routes.get_mut(&key) {
                Some(queue) if queue.len() > 1 => queue.pop_front(),
                Some(queue) => queue.front().cloned(),
                None => None,
            }
        };

        match next {
            Some(Scripted::Reply(response)) => Ok(response),
            Some(Scripted::Transport(message)) => Err(ApiError::TransportError(message)),
            None => Ok(GatewayResponse::raw(404, format!("no route for {}", key))),
        }
    }

    async fn remediate_blacklist(&self, ip: &str) -> Result<(), ApiError> {
        self.remediations.lock().unwrap().push(ip.to_string());
        if self.fail_remediation {
            return Err(ApiError::ProxyError("provider down".to_string()));
        }
        Ok(())
    }

    async fn machine_ip(&self) -> Result<String, ApiError> {
        Ok(Self::MACHINE_IP.to_string())
    }
}

/// Reversible stand-in for the real cipher
pub struct PlainCipher;

impl CredentialCipher for PlainCipher {
    fn encrypt(&self, plaintext: &str) -> Result<String, ApiError> {
        Ok(format!("enc:{}", plaintext))
    }

    fn decrypt(&self, ciphertext: &str) -> Result<String, ApiError> {
        ciphertext
            .strip_prefix("enc:")
            .map(str::to_string)
            .ok_or_else(|| ApiError::EncryptionError("not sealed".to_string()))
    }
}
