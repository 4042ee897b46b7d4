use p521::ecdsa::signature::RandomizedSigner;
use p521::ecdsa::{Signature, SigningKey, VerifyingKey};
use p521::pkcs8::DecodePrivateKey;
use rand::rngs::OsRng;

use crate::token::Token;
use crate::{Error, Result};

const CURVE_BITS: usize = 521;

/// The fixed byte length of one signature scalar (`r` or `s`) on the P-521 curve.
pub(crate) const KEY_BYTE_LEN: usize = (CURVE_BITS + 7) / 8;

/// Mints signed bearer tokens
pub trait Signer: Send + Sync {
    /// Encode and sign the header and claims of the given `token`, in place.
    ///
    /// Any base string, signature or encoded token already present is overwritten.
    fn mint(&self, token: &mut Token) -> Result<()>;
}

/// A [`Signer`] which uses an ECDSA P-521 private key with SHA-512 (`ES512`).
pub struct EcdsaSigner {
    key: SigningKey,
}

impl EcdsaSigner {
    /// Construct a new [`EcdsaSigner`] with the given private key.
    pub fn new(key: SigningKey) -> Self {
        Self { key }
    }

    /// Construct a new [`EcdsaSigner`] with a newly-generated private key.
    pub fn generate() -> Self {
        Self::new(SigningKey::random(&mut OsRng))
    }

    /// Load a private key from its raw big-endian scalar bytes.
    pub fn from_bytes(secret: &[u8]) -> Result<Self> {
        SigningKey::from_slice(secret)
            .map(Self::new)
            .map_err(|cause| Error::crypto(format!("invalid P-521 private key: {cause}")))
    }

    /// Load a private key from a PKCS#8 PEM document.
    pub fn from_pkcs8_pem(pem: &str) -> Result<Self> {
        let secret = p521::SecretKey::from_pkcs8_pem(pem)
            .map_err(|cause| Error::crypto(format!("invalid PKCS#8 private key: {cause}")))?;

        Self::from_bytes(&secret.to_bytes())
    }

    /// Return the public key which verifies this signer's tokens.
    pub fn verifying_key(&self) -> VerifyingKey {
        VerifyingKey::from(&self.key)
    }
}

impl Signer for EcdsaSigner {
    fn mint(&self, token: &mut Token) -> Result<()> {
        let base_string = token.encode_base_string()?;

        // SHA-512 over the base string, nonce drawn from the OS RNG
        let signature: Signature = self
            .key
            .try_sign_with_rng(&mut OsRng, base_string.as_bytes())
            .map_err(|cause| Error::crypto(format!("failed to sign token: {cause}")))?;

        // r and s are each left-padded to the curve's byte length, r first
        let signature = signature.to_bytes().to_vec();
        debug_assert_eq!(signature.len(), 2 * KEY_BYTE_LEN);

        token.set_signed(base_string, signature);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::Claims;

    fn claims() -> Claims {
        Claims {
            jti: "jti".into(),
            issuer: "ran".into(),
            subject: "shaw".into(),
            audience: vec!["pixie".into()],
            issued_at: 1_700_000_000,
            expires: 1_700_000_900,
            scopes: "r:pixie:*".into(),
            ..Claims::default()
        }
    }

    #[test]
    fn test_signature_length() {
        let signer = EcdsaSigner::generate();

        for _ in 0..8 {
            let mut token = Token::new(claims());
            signer.mint(&mut token).unwrap();
            assert_eq!(token.signature().len(), 132);
        }
    }

    #[test]
    fn test_format() {
        let signer = EcdsaSigner::generate();
        let mut token = Token::new(claims());
        signer.mint(&mut token).unwrap();

        let segments: Vec<&str> = token.token().split('.').collect();
        assert_eq!(segments.len(), 3);
        assert!(token.token().starts_with(token.base_string()));
        assert!(!token.token().contains('='));

        let parsed = Token::parse(token.token()).unwrap();
        assert_eq!(parsed.header.alg, "ES512");
        assert_eq!(parsed.claims, token.claims);
        assert_eq!(parsed.signature(), token.signature());
    }

    #[test]
    fn test_mint_overwrites() {
        let signer = EcdsaSigner::generate();
        let mut token = Token::new(claims());
        signer.mint(&mut token).unwrap();
        let first = token.token().to_string();

        token.claims.subject = "pixie".into();
        signer.mint(&mut token).unwrap();
        assert_ne!(token.token(), first);
        assert_eq!(Token::parse(token.token()).unwrap().claims.subject, "pixie");
    }

    #[test]
    fn test_from_bytes_rejects_zero() {
        let error = EcdsaSigner::from_bytes(&[0u8; KEY_BYTE_LEN]).err().unwrap();
        assert_eq!(error.kind(), crate::ErrorKind::Crypto);
    }
}
