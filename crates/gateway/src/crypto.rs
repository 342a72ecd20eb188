use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use sha2::{Digest, Sha256};
use thiserror::Error;
use zeroize::Zeroize;

const NONCE_LEN: usize = 12;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("encryption failed")]
    Seal,
    #[error("ciphertext is truncated")]
    Truncated,
    #[error("decryption failed (wrong key or tampered object)")]
    Open,
}

/// AES-256-GCM sealing for stored record files.
///
/// The key is SHA-256 of a domain-separated secret, so the signing secret
/// and the storage key never coincide.
pub struct BlobCipher {
    cipher: Aes256Gcm,
}

impl BlobCipher {
    pub fn new(master_secret: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(b"healthchain:blob:v1:");
        hasher.update(master_secret.as_bytes());
        let mut key: [u8; 32] = hasher.finalize().into();

        let cipher = Aes256Gcm::new(&key.into());

        // Wipe the intermediate key once the cipher owns its copy.
        key.zeroize();

        Self { cipher }
    }

    /// Returns `nonce || ciphertext`.
    pub fn seal(&self, plain: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plain)
            .map_err(|_| CryptoError::Seal)?;

        let mut combined = nonce_bytes.to_vec();
        combined.extend(ciphertext);
        Ok(combined)
    }

    pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if sealed.len() < NONCE_LEN {
            return Err(CryptoError::Truncated);
        }
        let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| CryptoError::Open)
    }
}
