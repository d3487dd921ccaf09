use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::ApiError;
use crate::models::Exchange;

/// Decrypted credential bundle for one linked account.
///
/// Only ever held in memory for the duration of a call; `Debug` masks every
/// secret field.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    pub exchange: Exchange,
    pub api_key: String,
    pub api_secret: String,
    /// Required by Bitget and KuCoin
    pub passphrase: Option<String>,
    pub oauth_token: Option<String>,
}

impl Credential {
    pub fn new(
        exchange: Exchange,
        api_key: impl Into<String>,
        api_secret: impl Into<String>,
        passphrase: Option<String>,
    ) -> Self {
        Self {
            exchange,
            api_key: api_key.into(),
            api_secret: api_secret.into(),
            passphrase,
            oauth_token: None,
        }
    }

    /// Passphrase or an empty string when the exchange issued none
    pub fn passphrase_or_empty(&self) -> String {
        self.passphrase.clone().unwrap_or_default()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("exchange", &self.exchange)
            .field("api_key", &"***REDACTED***")
            .field("api_secret", &"***REDACTED***")
            .field("passphrase", &self.passphrase.as_ref().map(|_| "***REDACTED***"))
            .field("oauth_token", &self.oauth_token.as_ref().map(|_| "***REDACTED***"))
            .finish()
    }
}

/// Opaque encrypt/decrypt capability for secrets at rest
pub trait CredentialCipher: Send + Sync {
    fn encrypt(&self, plaintext: &str) -> Result<String, ApiError>;
    fn decrypt(&self, ciphertext: &str) -> Result<String, ApiError>;
}

/// Encrypted form of a credential as stored in the database
#[derive(Debug, Clone, PartialEq)]
pub struct EncryptedCredential {
    pub api_key: String,
    pub api_secret: String,
    pub passphrase: Option<String>,
    pub oauth_token: Option<String>,
}

impl EncryptedCredential {
    pub fn seal(credential: &Credential, cipher: &dyn CredentialCipher) -> Result<Self, ApiError> {
        Ok(Self {
            api_key: cipher.encrypt(&credential.api_key)?,
            api_secret: cipher.encrypt(&credential.api_secret)?,
            passphrase: credential
                .passphrase
                .as_deref()
                .map(|p| cipher.encrypt(p))
                .transpose()?,
            oauth_token: credential
                .oauth_token
                .as_deref()
                .map(|t| cipher.encrypt(t))
                .transpose()?,
        })
    }

    pub fn open(&self, exchange: Exchange, cipher: &dyn CredentialCipher) -> Result<Credential, ApiError> {
        Ok(Credential {
            exchange,
            api_key: cipher.decrypt(&self.api_key)?,
            api_secret: cipher.decrypt(&self.api_secret)?,
            passphrase: self.passphrase.as_deref().map(|p| cipher.decrypt(p)).transpose()?,
            oauth_token: self.oauth_token.as_deref().map(|t| cipher.decrypt(t)).transpose()?,
        })
    }
}
