pub mod bitget;
pub mod client;
pub mod credentials;
pub mod error;
pub mod factory;
pub mod kucoin;
pub mod rate_limiter;
pub mod secure_storage;
pub mod signer;
pub mod transport;

pub use client::{AccountIdentity, AggregateBalance, AssetView, ExchangeClient, RateLimitConfig};
pub use credentials::{Credential, CredentialCipher, EncryptedCredential};
pub use error::{ApiError, ErrorKind};
pub use factory::{ClientFactory, DefaultClientFactory};
pub use rate_limiter::RateLimiter;
pub use secure_storage::AesGcmCipher;
pub use signer::{SignableRequest, Signer};
