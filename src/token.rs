use std::collections::HashSet;
use std::fmt;

use base64::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

const BEARER_PREFIX: &str = "Bearer ";

pub(crate) const ALGORITHM: &str = "ES512";

/// The JOSE header of a bearer token
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct Header {
    pub alg: String,
    pub typ: String,
}

impl Default for Header {
    fn default() -> Header {
        Header {
            alg: ALGORITHM.into(),
            typ: "JWT".into(),
        }
    }
}

/// The claims of a bearer token.
///
/// Timestamps are seconds since the Unix epoch. `scopes` is an OAuth2-style space-delimited
/// list, e.g. `"r:pixie:* w:pixie:*"`. The identity fields are only populated for user tokens.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
pub struct Claims {
    pub jti: String,
    #[serde(rename = "iss")]
    pub issuer: String,
    #[serde(rename = "sub")]
    pub subject: String,
    #[serde(rename = "aud", default)]
    pub audience: Vec<String>,
    #[serde(rename = "iat")]
    pub issued_at: i64,
    #[serde(rename = "nbf", default, skip_serializing_if = "Option::is_none")]
    pub not_before: Option<i64>,
    #[serde(rename = "exp")]
    pub expires: i64,
    #[serde(rename = "scp", default)]
    pub scopes: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub given_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub birthdate: Option<String>,
}

impl Claims {
    /// The set of scopes granted by these claims.
    pub fn scope_set(&self) -> HashSet<&str> {
        scope_set(&self.scopes)
    }

    /// Return `true` if these claims grant at least one of the `required` scopes.
    pub fn has_any_scope(&self, required: &[&str]) -> bool {
        has_any_scope(&self.scopes, required)
    }
}

/// A bearer token: its header and claims, plus the encoded base string and signature once minted.
#[derive(Clone, Eq, PartialEq)]
pub struct Token {
    pub header: Header,
    pub claims: Claims,
    base_string: String,
    signature: Vec<u8>,
    token: String,
}

impl Token {
    /// Create a new (unsigned) token with the default `ES512` header.
    pub fn new(claims: Claims) -> Self {
        Self {
            header: Header::default(),
            claims,
            base_string: String::new(),
            signature: Vec::new(),
            token: String::new(),
        }
    }

    /// Decode the given bearer `token` into its parts, WITHOUT verifying its signature.
    ///
    /// An optional leading `"Bearer "` prefix is ignored.
    pub fn parse(token: &str) -> Result<Self> {
        let token = strip_bearer(token);

        let segments: Vec<&str> = token.split('.').collect();
        if segments.len() != 3 {
            return Err(Error::format(format!(
                "bearer token must have 3 segments, found {}",
                segments.len()
            )));
        }

        let header = BASE64_URL_SAFE_NO_PAD.decode(segments[0])?;
        let header: Header = serde_json::from_slice(&header)?;

        let claims = BASE64_URL_SAFE_NO_PAD.decode(segments[1])?;
        let claims: Claims = serde_json::from_slice(&claims)?;

        let signature = BASE64_URL_SAFE_NO_PAD.decode(segments[2])?;

        Ok(Self {
            header,
            claims,
            base_string: format!("{}.{}", segments[0], segments[1]),
            signature,
            token: token.to_string(),
        })
    }

    /// Borrow the signed base string, `base64url(header).base64url(claims)`.
    pub fn base_string(&self) -> &str {
        &self.base_string
    }

    /// Borrow the raw `r ‖ s` signature.
    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    /// Borrow the encoded, signed token.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Destructure this [`Token`] into its encoded representation.
    pub fn into_token(self) -> String {
        self.token
    }

    pub(crate) fn encode_base_string(&self) -> Result<String> {
        let header = BASE64_URL_SAFE_NO_PAD.encode(serde_json::to_vec(&self.header)?);
        let claims = BASE64_URL_SAFE_NO_PAD.encode(serde_json::to_vec(&self.claims)?);
        Ok(format!("{header}.{claims}"))
    }

    pub(crate) fn set_signed(&mut self, base_string: String, signature: Vec<u8>) {
        let encoded = BASE64_URL_SAFE_NO_PAD.encode(&signature);
        self.token = format!("{base_string}.{encoded}");
        self.base_string = base_string;
        self.signature = signature;
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "bearer token {} issued by {} to {}",
            self.claims.jti, self.claims.issuer, self.claims.subject
        )
    }
}

/// The validated identity of a calling service.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct AuthorizedService {
    pub service_id: String,
    pub service_name: String,
    pub authorized_by: String,
}

pub(crate) fn strip_bearer(token: &str) -> &str {
    token.strip_prefix(BEARER_PREFIX).unwrap_or(token)
}

pub(crate) fn scope_set(scopes: &str) -> HashSet<&str> {
    scopes.split(' ').filter(|scope| !scope.is_empty()).collect()
}

pub(crate) fn has_any_scope(granted: &str, required: &[&str]) -> bool {
    let granted = scope_set(granted);
    required.iter().any(|scope| granted.contains(scope))
}
