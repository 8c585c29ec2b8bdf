use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::Aes256Gcm;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::RngCore;
use thiserror::Error;

type Nonce = [u8; 12];

const FORMAT_VERSION: u8 = 0x01;

/// Cryptographic errors
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Invalid key: {0}")]
    InvalidKey(String),
    #[error("Encryption failed: {0}")]
    Encryption(String),
    #[error("Decryption failed: {0}")]
    Decryption(String),
    #[error("Invalid data: {0}")]
    InvalidData(String),
    #[error("Base64 decode error: {0}")]
    Base64Decode(String),
    #[error("UTF-8 conversion error: {0}")]
    Utf8Error(String),
}

/// AES-256-GCM cipher for secrets kept at rest (the gateway credential file).
///
/// Output format, base64-encoded: `[version_byte][nonce(12)][ciphertext]`
#[derive(Clone)]
pub struct SecretCipher {
    key: [u8; 32],
}

impl std::fmt::Debug for SecretCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretCipher(..)")
    }
}

impl SecretCipher {
    /// Build a cipher from a 64-character hex key
    pub fn from_hex(key_hex: &str) -> Result<Self, CryptoError> {
        let key_bytes = hex::decode(key_hex.trim())
            .map_err(|e| CryptoError::InvalidKey(format!("hex decode: {}", e)))?;

        let key: [u8; 32] = key_bytes.try_into().map_err(|_| {
            CryptoError::InvalidKey("Encryption key must be 32 bytes (256 bits)".to_string())
        })?;

        Ok(Self { key })
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError> {
        let cipher = Aes256Gcm::new(&self.key.into());

        let mut nonce_bytes: Nonce = [0u8; 12];
        rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);

        let ciphertext = cipher
            .encrypt((&nonce_bytes).into(), plaintext.as_bytes())
            .map_err(|e| CryptoError::Encryption(e.to_string()))?;

        let mut encrypted = Vec::with_capacity(1 + 12 + ciphertext.len());
        encrypted.push(FORMAT_VERSION);
        encrypted.extend_from_slice(&nonce_bytes);
        encrypted.extend_from_slice(&ciphertext);

        Ok(BASE64.encode(encrypted))
    }

    pub fn decrypt(&self, encrypted_b64: &str) -> Result<String, CryptoError> {
        let encrypted = BASE64
            .decode(encrypted_b64.trim())
            .map_err(|e| CryptoError::Base64Decode(e.to_string()))?;

        if encrypted.len() < 13 {
            return Err(CryptoError::InvalidData(
                "Encrypted data too short (need at least 1 + 12 bytes for version + nonce)"
                    .to_string(),
            ));
        }

        if encrypted[0] != FORMAT_VERSION {
            return Err(CryptoError::InvalidData(format!(
                "Unsupported encryption version: {}",
                encrypted[0]
            )));
        }

        let nonce: Nonce = encrypted[1..13]
            .try_into()
            .map_err(|_| CryptoError::InvalidData("Failed to extract nonce".to_string()))?;

        let cipher = Aes256Gcm::new(&self.key.into());
        let plaintext = cipher
            .decrypt((&nonce).into(), &encrypted[13..])
            .map_err(|e| CryptoError::Decryption(e.to_string()))?;

        String::from_utf8(plaintext).map_err(|e| CryptoError::Utf8Error(e.to_string()))
    }
}
