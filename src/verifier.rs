use std::fmt;

use chrono::{DateTime, Utc};
use p521::ecdsa::{Signature, VerifyingKey};
use p521::elliptic_curve::sec1::ToEncodedPoint;
use p521::pkcs8::DecodePublicKey;
use signature::Verifier as _;

use crate::signer::KEY_BYTE_LEN;
use crate::token::{Token, ALGORITHM};
use crate::{Error, Result};

/// How far in the future a token's issued-at (or not-before) time may be, to tolerate clock skew.
pub const CLOCK_SKEW_SECS: i64 = 2;

/// Authorizes inbound bearer tokens
pub trait Verifier: Send + Sync {
    /// Verify the raw `r ‖ s` signature `sig` of the given `msg`.
    fn verify_signature(&self, msg: &str, sig: &[u8]) -> Result<()>;

    /// Decode and verify the given bearer `token`, then check that it is currently valid,
    /// addressed to this service, and grants at least one of the `allowed_scopes`.
    fn build_authorized(&self, allowed_scopes: &[&str], token: &str) -> Result<Token>;
}

/// A [`Verifier`] which checks `ES512` signatures against an ECDSA P-521 public key.
#[derive(Clone)]
pub struct EcdsaVerifier {
    service_name: String,
    public_key: VerifyingKey,
}

impl fmt::Debug for EcdsaVerifier {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ES512 verifier for {}", self.service_name)
    }
}

impl EcdsaVerifier {
    /// Construct a new [`EcdsaVerifier`] for the service named `service_name`,
    /// which must appear in the audience of every token it authorizes.
    pub fn new<N: Into<String>>(service_name: N, public_key: VerifyingKey) -> Self {
        Self {
            service_name: service_name.into(),
            public_key,
        }
    }

    /// Construct a new [`EcdsaVerifier`] from a SEC1-encoded public key.
    pub fn from_sec1_bytes<N: Into<String>>(
        service_name: N,
        public_key: &[u8],
    ) -> Result<Self> {
        let public_key = VerifyingKey::from_sec1_bytes(public_key)
            .map_err(|cause| Error::crypto(format!("invalid P-521 public key: {cause}")))?;

        Ok(Self::new(service_name, public_key))
    }

    /// Construct a new [`EcdsaVerifier`] from an SPKI PEM document.
    pub fn from_public_key_pem<N: Into<String>>(service_name: N, pem: &str) -> Result<Self> {
        let public_key = p521::PublicKey::from_public_key_pem(pem)
            .map_err(|cause| Error::crypto(format!("invalid public key PEM: {cause}")))?;

        Self::from_sec1_bytes(service_name, public_key.to_encoded_point(false).as_bytes())
    }

    /// Borrow the name of the service this verifier authorizes tokens for.
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Like [`Verifier::build_authorized`], but evaluate time validity at the given moment.
    pub fn build_authorized_at(
        &self,
        allowed_scopes: &[&str],
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<Token> {
        let token = Token::parse(token)?;

        self.verify_signature(token.base_string(), token.signature())?;

        if token.header.alg != ALGORITHM {
            return Err(Error::format(format!(
                "unsupported bearer token algorithm: {}",
                token.header.alg
            )));
        }

        let now = now.timestamp();
        let claims = &token.claims;

        let valid_from = claims
            .not_before
            .map_or(claims.issued_at, |nbf| nbf.max(claims.issued_at));
        if valid_from > now + CLOCK_SKEW_SECS {
            return Err(Error::unauthorized("bearer token is not yet valid"));
        }

        if now > claims.expires {
            return Err(Error::unauthorized("bearer token is expired"));
        }

        if !claims.audience.iter().any(|aud| aud == &self.service_name) {
            return Err(Error::forbidden(format!(
                "bearer token is not intended for {}",
                self.service_name
            )));
        }

        if !claims.has_any_scope(allowed_scopes) {
            return Err(Error::forbidden("bearer token does not grant a required scope"));
        }

        Ok(token)
    }
}

impl Verifier for EcdsaVerifier {
    fn verify_signature(&self, msg: &str, sig: &[u8]) -> Result<()> {
        if msg.is_empty() {
            return Err(Error::format("cannot verify the signature of an empty message"));
        }

        if sig.is_empty() {
            return Err(Error::format("cannot verify an empty signature"));
        }

        // fixed-width r ‖ s only, so DER (or any other encoding) is malformed here
        if sig.len() != 2 * KEY_BYTE_LEN {
            return Err(Error::format(format!(
                "signature must be {} bytes, found {}",
                2 * KEY_BYTE_LEN,
                sig.len()
            )));
        }

        let (r, s) = sig.split_at(KEY_BYTE_LEN);
        let signature = Signature::from_scalars(
            p521::FieldBytes::clone_from_slice(r),
            p521::FieldBytes::clone_from_slice(s),
        )
        .map_err(|cause| Error::format(format!("malformed signature: {cause}")))?;

        self.public_key
            .verify(msg.as_bytes(), &signature)
            .map_err(|_| Error::unauthorized("invalid bearer token signature"))
    }

    fn build_authorized(&self, allowed_scopes: &[&str], token: &str) -> Result<Token> {
        self.build_authorized_at(allowed_scopes, token, Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::signer::{EcdsaSigner, Signer};
    use crate::token::Claims;
    use crate::ErrorKind;

    struct Fixture {
        signer: EcdsaSigner,
        verifier: EcdsaVerifier,
        now: DateTime<Utc>,
    }

    impl Fixture {
        fn new() -> Self {
            let signer = EcdsaSigner::generate();
            let verifier = EcdsaVerifier::new("pixie", signer.verifying_key());
            Self { signer, verifier, now: Utc::now() }
        }

        fn claims(&self) -> Claims {
            let now = self.now.timestamp();
            Claims {
                jti: "4a1c3e0e-2f57-4d61-a0d8-2d3cf5b1c6aa".into(),
                issuer: "ran".into(),
                subject: "shaw".into(),
                audience: vec!["ran".into(), "pixie".into()],
                issued_at: now,
                expires: now + 900,
                scopes: "r:pixie:* w:pixie:*".into(),
                ..Claims::default()
            }
        }

        fn mint(&self, claims: Claims) -> Token {
            let mut token = Token::new(claims);
            self.signer.mint(&mut token).unwrap();
            token
        }

        fn authorize(&self, scopes: &[&str], claims: Claims) -> Result<Token> {
            let token = self.mint(claims);
            self.verifier.build_authorized_at(scopes, token.token(), self.now)
        }
    }

    #[test]
    fn test_round_trip() {
        let fixture = Fixture::new();
        let token = fixture.mint(fixture.claims());

        fixture
            .verifier
            .verify_signature(token.base_string(), token.signature())
            .unwrap();
    }

    #[test]
    fn test_tamper_detection() {
        let fixture = Fixture::new();
        let token = fixture.mint(fixture.claims());

        let base_string = token.base_string().as_bytes();
        for i in [0, base_string.len() / 2, base_string.len() - 1] {
            let mut tampered = base_string.to_vec();
            tampered[i] = if tampered[i] == b'A' { b'B' } else { b'A' };
            let tampered = String::from_utf8(tampered).unwrap();

            let error = fixture
                .verifier
                .verify_signature(&tampered, token.signature())
                .unwrap_err();

            assert_eq!(error.kind(), ErrorKind::Unauthorized);
        }
    }

    #[test]
    fn test_wrong_key() {
        let fixture = Fixture::new();
        let other = EcdsaVerifier::new("pixie", EcdsaSigner::generate().verifying_key());
        let token = fixture.mint(fixture.claims());

        let error = other
            .build_authorized_at(&["r:pixie:*"], token.token(), fixture.now)
            .unwrap_err();

        assert_eq!(error.kind(), ErrorKind::Unauthorized);
    }

    #[test]
    fn test_empty_input() {
        let fixture = Fixture::new();
        let token = fixture.mint(fixture.claims());

        let error = fixture.verifier.verify_signature("", token.signature()).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Format);

        let error = fixture.verifier.verify_signature(token.base_string(), &[]).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Format);
    }

    #[test]
    fn test_reject_der_signature() {
        let fixture = Fixture::new();
        let token = fixture.mint(fixture.claims());

        let (r, s) = token.signature().split_at(KEY_BYTE_LEN);
        let mut der = vec![0x30, 0x81, 0x88, 0x02, 0x42];
        der.extend_from_slice(r);
        der.extend_from_slice(&[0x02, 0x42]);
        der.extend_from_slice(s);

        let error = fixture.verifier.verify_signature(token.base_string(), &der).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Format);
    }

    #[test]
    fn test_scope_or_semantics() {
        let fixture = Fixture::new();

        let mut claims = fixture.claims();
        claims.scopes = "r:svc:*".into();
        claims.audience = vec!["pixie".into()];

        fixture.authorize(&["r:svc:*", "w:svc:*"], claims.clone()).unwrap();

        let error = fixture.authorize(&["w:other:*"], claims).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Forbidden);
    }

    #[test]
    fn test_audience() {
        let fixture = Fixture::new();

        let mut claims = fixture.claims();
        claims.audience = vec!["ran".into(), "shaw".into()];

        let error = fixture.authorize(&["r:pixie:*"], claims).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Forbidden);
    }

    #[test]
    fn test_expiry_boundary() {
        let fixture = Fixture::new();
        let now = fixture.now.timestamp();

        let mut claims = fixture.claims();
        claims.expires = now - 1;
        let error = fixture.authorize(&["r:pixie:*"], claims.clone()).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Unauthorized);

        claims.expires = now;
        fixture.authorize(&["r:pixie:*"], claims).unwrap();
    }

    #[test]
    fn test_issued_at_skew() {
        let fixture = Fixture::new();
        let now = fixture.now.timestamp();

        let mut claims = fixture.claims();
        claims.issued_at = now + 3;
        let error = fixture.authorize(&["r:pixie:*"], claims.clone()).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Unauthorized);

        claims.issued_at = now + 1;
        fixture.authorize(&["r:pixie:*"], claims.clone()).unwrap();

        claims.not_before = Some(now + 60);
        let error = fixture.authorize(&["r:pixie:*"], claims).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Unauthorized);
    }

    #[test]
    fn test_checks_signature_before_claims() {
        let fixture = Fixture::new();
        let other = Fixture::new();

        // expired and for another audience, but the signature is checked first
        let mut claims = fixture.claims();
        claims.expires = fixture.now.timestamp() - 60;
        claims.audience = vec!["nobody".into()];
        let token = other.mint(claims);

        let error = fixture
            .verifier
            .build_authorized_at(&["r:pixie:*"], token.token(), fixture.now)
            .unwrap_err();

        assert_eq!(error.kind(), ErrorKind::Unauthorized);
    }

    #[test]
    fn test_bearer_prefix() {
        let fixture = Fixture::new();
        let token = fixture.mint(fixture.claims());
        let bearer = format!("Bearer {}", token.token());

        let authorized = fixture
            .verifier
            .build_authorized_at(&["w:pixie:*"], &bearer, fixture.now + Duration::seconds(10))
            .unwrap();

        assert_eq!(authorized.claims, token.claims);
    }

    #[test]
    fn test_malformed() {
        let fixture = Fixture::new();

        let error = fixture
            .verifier
            .build_authorized_at(&["r:pixie:*"], "not-a-token", fixture.now)
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Format);

        let token = fixture.mint(fixture.claims());
        let truncated = &token.token()[..token.token().len() - 4];
        let error = fixture
            .verifier
            .build_authorized_at(&["r:pixie:*"], truncated, fixture.now)
            .unwrap_err();
        assert_ne!(error.kind(), ErrorKind::Forbidden);
    }

    #[test]
    fn test_public_key_encoding() {
        let fixture = Fixture::new();
        let sec1 = fixture.signer.verifying_key().to_encoded_point(false);
        let verifier = EcdsaVerifier::from_sec1_bytes("pixie", sec1.as_bytes()).unwrap();
        assert_eq!(verifier.service_name(), "pixie");

        let token = fixture.mint(fixture.claims());
        verifier.verify_signature(token.base_string(), token.signature()).unwrap();
    }
}
