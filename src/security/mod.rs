use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, AeadCore, KeyInit, OsRng},
};
use thiserror::Error;

const NONCE_SIZE: usize = 12;

#[derive(Error, Debug)]
pub enum CipherError {
    #[error("credential key must be 64 hex characters (32 bytes)")]
    InvalidKey,
    #[error("sealed payload is malformed")]
    Malformed,
    #[error("crypto operation failed: {0}")]
    Crypto(String),
}

/// Seals panel session material before it is written to the store.
/// Payloads are `hex(nonce || ciphertext)` with a fresh nonce per seal.
pub struct CredentialCipher {
    key: [u8; 32],
}

impl CredentialCipher {
    pub fn from_hex(key_hex: &str) -> Result<Self, CipherError> {
        let bytes = hex::decode(key_hex).map_err(|_| CipherError::InvalidKey)?;
        let key: [u8; 32] = bytes.try_into().map_err(|_| CipherError::InvalidKey)?;
        Ok(Self { key })
    }

    pub fn seal(&self, plain: &str) -> Result<String, CipherError> {
        let cipher = Aes256Gcm::new(self.key.as_slice().into());
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = cipher
            .encrypt(&nonce, plain.as_bytes())
            .map_err(|e| CipherError::Crypto(e.to_string()))?;

        let mut sealed = nonce.to_vec();
        sealed.extend_from_slice(&ciphertext);
        Ok(hex::encode(sealed))
    }

    pub fn open(&self, sealed_hex: &str) -> Result<String, CipherError> {
        let sealed = hex::decode(sealed_hex).map_err(|_| CipherError::Malformed)?;
        if sealed.len() < NONCE_SIZE {
            return Err(CipherError::Malformed);
        }
        let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_SIZE);

        let cipher = Aes256Gcm::new(self.key.as_slice().into());
        let plain = cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|e| CipherError::Crypto(e.to_string()))?;

        String::from_utf8(plain).map_err(|_| CipherError::Malformed)
    }
}
