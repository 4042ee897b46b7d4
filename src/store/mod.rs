use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::caller::S2sAuthorization;
use crate::crypto::Cryptor;
use crate::{Error, Result};

mod memory;
mod postgres;

pub use memory::MemoryTokenStore;
pub use postgres::PgTokenStore;

/// A cached s2s authorization as stored at rest.
///
/// Both tokens are ciphertext produced by a [`Cryptor`]; plaintext tokens only ever live in
/// an [`S2sAuthorization`].
#[derive(Clone, Eq, PartialEq, sqlx::FromRow)]
pub struct CachedAuthorization {
    #[sqlx(rename = "uuid")]
    pub jti: String,
    pub service_name: String,
    pub service_token: String,
    #[sqlx(rename = "service_expires")]
    pub token_expires: DateTime<Utc>,
    pub refresh_token: String,
    pub refresh_expires: DateTime<Utc>,
}

impl CachedAuthorization {
    /// Encrypt both tokens of the given `authz` for storage.
    pub fn seal(authz: &S2sAuthorization, cryptor: &dyn Cryptor) -> Result<Self> {
        Ok(Self {
            jti: authz.jti.clone(),
            service_name: authz.service_name.clone(),
            service_token: cryptor.encrypt(authz.service_token.as_bytes())?,
            token_expires: authz.token_expires,
            refresh_token: cryptor.encrypt(authz.refresh_token.as_bytes())?,
            refresh_expires: authz.refresh_expires,
        })
    }

    /// Decrypt the service token.
    pub fn open_service_token(&self, cryptor: &dyn Cryptor) -> Result<String> {
        open(&self.service_token, cryptor)
    }

    /// Decrypt the refresh token.
    pub fn open_refresh_token(&self, cryptor: &dyn Cryptor) -> Result<String> {
        open(&self.refresh_token, cryptor)
    }
}

fn open(ciphertext: &str, cryptor: &dyn Cryptor) -> Result<String> {
    let plaintext = cryptor.decrypt(ciphertext)?;
    String::from_utf8(plaintext)
        .map_err(|cause| Error::crypto(format!("decrypted token is not UTF-8: {cause}")))
}

impl fmt::Debug for CachedAuthorization {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("CachedAuthorization")
            .field("jti", &self.jti)
            .field("service_name", &self.service_name)
            .field("token_expires", &self.token_expires)
            .field("refresh_expires", &self.refresh_expires)
            .finish_non_exhaustive()
    }
}

/// Persistence for cached s2s authorizations
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Return every cached authorization for `service_name` whose refresh token is still
    /// valid at `now`, i.e. `refresh_expires > now`. No ordering is guaranteed.
    async fn select_refreshable(
        &self,
        service_name: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<CachedAuthorization>>;

    async fn insert(&self, record: &CachedAuthorization) -> Result<()>;

    /// Delete the cached authorization with the given `jti`, if present.
    async fn delete(&self, jti: &str) -> Result<()>;
}
