use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::prelude::*;
use rand::rngs::OsRng;
use rand::RngCore;

use crate::{Error, Result};

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Encrypts and decrypts token material for storage at rest
pub trait Cryptor: Send + Sync {
    /// Encrypt the given `plaintext`, returning an encoded ciphertext suitable for storage.
    fn encrypt(&self, plaintext: &[u8]) -> Result<String>;

    /// Decrypt a `ciphertext` previously returned by [`Cryptor::encrypt`].
    fn decrypt(&self, ciphertext: &str) -> Result<Vec<u8>>;
}

/// A [`Cryptor`] using AES-256-GCM.
///
/// Ciphertexts are standard base64 of `nonce (12 bytes) ‖ ciphertext ‖ tag (16 bytes)`,
/// with a fresh random nonce per call, so encrypting the same token twice never
/// yields the same ciphertext.
pub struct AesGcmCryptor {
    cipher: Aes256Gcm,
}

impl AesGcmCryptor {
    /// Construct a new [`AesGcmCryptor`] from a raw 256-bit key.
    pub fn new(key: &[u8]) -> Result<Self> {
        if key.len() != KEY_LEN {
            return Err(Error::crypto(format!(
                "AES-256 key must be {KEY_LEN} bytes, found {}",
                key.len()
            )));
        }

        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|cause| Error::crypto(format!("invalid AES-256 key: {cause}")))?;

        Ok(Self { cipher })
    }

    /// Construct a new [`AesGcmCryptor`] from a standard-base64-encoded 256-bit key.
    pub fn from_base64_key(key: &str) -> Result<Self> {
        let key = BASE64_STANDARD
            .decode(key.trim())
            .map_err(|cause| Error::crypto(format!("invalid base64 key: {cause}")))?;

        Self::new(&key)
    }

    /// Generate a random 256-bit key, encoded in standard base64.
    pub fn generate_key() -> String {
        let mut key = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut key);
        BASE64_STANDARD.encode(key)
    }
}

impl Cryptor for AesGcmCryptor {
    fn encrypt(&self, plaintext: &[u8]) -> Result<String> {
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|cause| Error::crypto(format!("AES-GCM encryption failed: {cause}")))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);

        Ok(BASE64_STANDARD.encode(sealed))
    }

    fn decrypt(&self, ciphertext: &str) -> Result<Vec<u8>> {
        let sealed = BASE64_STANDARD
            .decode(ciphertext)
            .map_err(|cause| Error::crypto(format!("ciphertext is not base64: {cause}")))?;

        if sealed.len() < NONCE_LEN + TAG_LEN {
            return Err(Error::crypto("ciphertext is too short"));
        }

        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);

        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|cause| Error::crypto(format!("AES-GCM decryption failed: {cause}")))
    }
}
