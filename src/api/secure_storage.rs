use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use argon2::password_hash::rand_core::RngCore;
use argon2::Argon2;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};

use super::credentials::CredentialCipher;
use super::error::ApiError;

const NONCE_LEN: usize = 12;

/// AES-256-GCM cipher keyed from a master secret via Argon2id.
///
/// Ciphertexts are `base64(nonce || ciphertext)` with a fresh random nonce
/// per call, so encrypting the same value twice never yields the same text.
pub struct AesGcmCipher {
    cipher: Aes256Gcm,
}

impl AesGcmCipher {
    pub fn new(master_key: &str, salt_b64: &str) -> Result<Self, ApiError> {
        if master_key.is_empty() {
            return Err(ApiError::EncryptionError("Master key is empty".to_string()));
        }
        let key = Self::derive_key(master_key, salt_b64)?;
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|e| ApiError::EncryptionError(format!("Failed to create cipher: {}", e)))?;
        Ok(Self { cipher })
    }

    fn derive_key(master_key: &str, salt_b64: &str) -> Result<[u8; 32], ApiError> {
        use argon2::{Algorithm, Params, Version};

        let salt_bytes = BASE64
            .decode(salt_b64)
            .map_err(|e| ApiError::EncryptionError(format!("Invalid salt: {}", e)))?;

        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, Params::default());

        let mut output_key = [0u8; 32];
        argon2
            .hash_password_into(master_key.as_bytes(), &salt_bytes, &mut output_key)
            .map_err(|e| ApiError::EncryptionError(format!("Key derivation failed: {}", e)))?;

        Ok(output_key)
    }
}

impl CredentialCipher for AesGcmCipher {
    fn encrypt(&self, plaintext: &str) -> Result<String, ApiError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| ApiError::EncryptionError(format!("Encryption failed: {}", e)))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(sealed))
    }

    fn decrypt(&self, ciphertext: &str) -> Result<String, ApiError> {
        let sealed = BASE64
            .decode(ciphertext)
            .map_err(|e| ApiError::EncryptionError(format!("Invalid ciphertext: {}", e)))?;

        if sealed.len() <= NONCE_LEN {
            return Err(ApiError::EncryptionError("Ciphertext too short".to_string()));
        }
        let (nonce_bytes, body) = sealed.split_at(NONCE_LEN);

        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce_bytes), body)
            .map_err(|e| ApiError::EncryptionError(format!("Decryption failed: {}", e)))?;

        String::from_utf8(plaintext)
            .map_err(|e| ApiError::EncryptionError(format!("Invalid UTF-8: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher() -> AesGcmCipher {
        AesGcmCipher::new("test-master-key", &BASE64.encode(b"0123456789abcdef")).unwrap()
    }

    #[test]
    fn test_encrypt_decrypt() {
        let cipher = cipher();
        let sealed = cipher.encrypt("my-secret-value-123").unwrap();

        assert_ne!(sealed, "my-secret-value-123");
        assert_eq!(cipher.decrypt(&sealed).unwrap(), "my-secret-value-123");
    }

    #[test]
    fn test_nonce_is_fresh_per_call() {
        let cipher = cipher();
        assert_ne!(cipher.encrypt("same").unwrap(), cipher.encrypt("same").unwrap());
    }

    #[test]
    fn test_wrong_key_fails() {
        let sealed = cipher().encrypt("value").unwrap();
        let other = AesGcmCipher::new("another-key", &BASE64.encode(b"0123456789abcdef")).unwrap();

        assert!(matches!(other.decrypt(&sealed), Err(ApiError::EncryptionError(_))));
    }

    #[test]
    fn test_invalid_salt_rejected() {
        assert!(AesGcmCipher::new("key", "not base64!!").is_err());
    }

    #[test]
    fn test_truncated_ciphertext_rejected() {
        assert!(cipher().decrypt(&BASE64.encode([1u8; 4])).is_err());
    }
}
