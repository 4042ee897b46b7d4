//! Service-to-service authorization primitives shared by a family of microservices.
//!
//! This crate provides:
//!  - a [`Signer`] and [`Verifier`] for compact bearer tokens signed with
//!    [ECDSA](https://en.wikipedia.org/wiki/Elliptic_Curve_Digital_Signature_Algorithm)
//!    over the P-521 curve with SHA-512 (`ES512`), using the [`p521`] crate,
//!  - an [`S2sTokenProvider`] which caches, refreshes and re-acquires machine-to-machine
//!    bearer tokens issued by an upstream authorization service, keeping them encrypted at rest,
//!  - a [`PatVerifier`] which authorizes opaque Personal Access Tokens via upstream introspection.
//!
//! Unlike generic JWT libraries, the signature segment of a token is the raw fixed-width
//! concatenation `r ‖ s` (66 bytes each for P-521), not an ASN.1 DER structure.
//!
//! Example:
//! ```
//! use carapace::*;
//! use chrono::Utc;
//!
//! // The auth service mints a token for a client calling the "pixie" service...
//! let signer = EcdsaSigner::generate();
//! let now = Utc::now().timestamp();
//!
//! let mut token = Token::new(Claims {
//!     jti: "0f8b3a3e-6f0c-4c8e-9c55-6b1f0a3e9a11".to_string(),
//!     issuer: "ran".to_string(),
//!     subject: "shaw".to_string(),
//!     audience: vec!["pixie".to_string()],
//!     issued_at: now,
//!     expires: now + 900,
//!     scopes: "r:pixie:* w:pixie:*".to_string(),
//!     ..Claims::default()
//! });
//!
//! signer.mint(&mut token)?;
//! assert_eq!(token.signature().len(), 132);
//!
//! // and "pixie" authorizes the inbound request.
//! let verifier = EcdsaVerifier::new("pixie", signer.verifying_key());
//! let bearer = format!("Bearer {}", token.token());
//!
//! let authorized = verifier.build_authorized(&["r:pixie:*"], &bearer)?;
//! assert_eq!(authorized.claims.subject, "shaw");
//!
//! // A token which grants none of the required scopes is forbidden, not unauthorized.
//! let denied = verifier.build_authorized(&["w:other:*"], &bearer).unwrap_err();
//! assert_eq!(denied.kind(), ErrorKind::Forbidden);
//! # Ok::<(), carapace::Error>(())
//! ```

use std::fmt;

mod caller;
mod config;
mod crypto;
mod pat;
mod provider;
mod signer;
mod store;
mod token;
mod verifier;

pub use caller::{
    HttpS2sCaller, IntrospectCmd, IntrospectResponse, RefreshCmd, S2sAuthorization, S2sCaller,
    S2sLoginCmd,
};
pub use config::{RetryConfig, S2sConfig, S2sCredentials};
pub use crypto::{AesGcmCryptor, Cryptor};
pub use pat::{IntrospectionPatVerifier, PatVerifier, PAT_MAX_LEN, PAT_MIN_LEN};
pub use provider::{S2sTokenProvider, ServiceTokenProvider};
pub use signer::{EcdsaSigner, Signer};
pub use store::{CachedAuthorization, MemoryTokenStore, PgTokenStore, TokenStore};
pub use token::{AuthorizedService, Claims, Header, Token};
pub use verifier::{EcdsaVerifier, Verifier, CLOCK_SKEW_SECS};

pub use p521::ecdsa::{SigningKey, VerifyingKey};
pub use secrecy::{ExposeSecret, SecretString};

/// The category of error returned by an authorization operation
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    /// The token or signature is structurally malformed
    Format,
    Base64,
    Json,
    /// The credential is not valid: bad signature, expired, or not yet valid
    Unauthorized,
    /// The credential is valid but not for this audience or these scopes
    Forbidden,
    /// The upstream authorization service failed or could not be reached
    Upstream,
    Crypto,
    Store,
    Config,
}

impl ErrorKind {
    /// The HTTP status code a service should answer with for this kind of error.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Format | Self::Base64 | Self::Json => 400,
            Self::Unauthorized => 401,
            Self::Forbidden => 403,
            Self::Upstream => 502,
            Self::Crypto | Self::Store | Self::Config => 500,
        }
    }
}

/// The result of an authorization operation
pub type Result<T> = std::result::Result<T, Error>;

/// An error returned by an authorization operation
#[derive(Debug, thiserror::Error)]
#[error("{kind:?}: {message}")]
pub struct Error {
    kind: ErrorKind,
    message: String,
}

impl Error {
    /// Construct a new [`Error`].
    pub fn new<M: fmt::Display>(kind: ErrorKind, message: M) -> Self {
        Self {
            kind,
            message: message.to_string(),
        }
    }

    /// Return the [`ErrorKind`] of this [`Error`].
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Borrow the message of this [`Error`].
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Destructure this [`Error`] into its [`ErrorKind`] and an error message [`String`].
    pub fn into_inner(self) -> (ErrorKind, String) {
        (self.kind, self.message)
    }

    /// Construct a new token format [`Error`].
    pub fn format<M: fmt::Display>(message: M) -> Self {
        Self::new(ErrorKind::Format, message)
    }

    /// Construct a new unauthorized [`Error`].
    pub fn unauthorized<M: fmt::Display>(message: M) -> Self {
        Self::new(ErrorKind::Unauthorized, message)
    }

    /// Construct a new forbidden [`Error`].
    pub fn forbidden<M: fmt::Display>(message: M) -> Self {
        Self::new(ErrorKind::Forbidden, message)
    }

    /// Construct a new upstream [`Error`].
    pub fn upstream<M: fmt::Display>(message: M) -> Self {
        Self::new(ErrorKind::Upstream, message)
    }

    /// Construct a new encryption or key material [`Error`].
    pub fn crypto<M: fmt::Display>(message: M) -> Self {
        Self::new(ErrorKind::Crypto, message)
    }

    /// Construct a new persistence [`Error`].
    pub fn store<M: fmt::Display>(message: M) -> Self {
        Self::new(ErrorKind::Store, message)
    }

    /// Construct a new configuration [`Error`].
    pub fn config<M: fmt::Display>(message: M) -> Self {
        Self::new(ErrorKind::Config, message)
    }
}

impl From<base64::DecodeError> for Error {
    fn from(cause: base64::DecodeError) -> Self {
        Self::new(ErrorKind::Base64, cause)
    }
}

impl From<serde_json::Error> for Error {
    fn from(cause: serde_json::Error) -> Self {
        Self::new(ErrorKind::Json, cause)
    }
}

impl From<signature::Error> for Error {
    fn from(cause: signature::Error) -> Self {
        Self::new(ErrorKind::Unauthorized, cause)
    }
}

impl From<sqlx::Error> for Error {
    fn from(cause: sqlx::Error) -> Self {
        Self::new(ErrorKind::Store, cause)
    }
}

impl From<reqwest::Error> for Error {
    fn from(cause: reqwest::Error) -> Self {
        Self::new(ErrorKind::Upstream, cause)
    }
}

impl From<envy::Error> for Error {
    fn from(cause: envy::Error) -> Self {
        Self::new(ErrorKind::Config, cause)
    }
}
