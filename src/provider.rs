use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};

use crate::caller::{RefreshCmd, S2sAuthorization, S2sCaller, S2sLoginCmd};
use crate::config::S2sCredentials;
use crate::crypto::Cryptor;
use crate::store::{CachedAuthorization, TokenStore};
use crate::{Error, Result};

/// Supplies bearer tokens for calls to other services
#[async_trait]
pub trait ServiceTokenProvider: Send + Sync {
    /// Return a currently-valid bearer token for calling the service named `service_name`.
    async fn get_service_token(&self, service_name: &str) -> Result<String>;
}

/// A [`ServiceTokenProvider`] which caches s2s tokens (encrypted) in a [`TokenStore`],
/// refreshes them when they expire, and logs in again when they can't be refreshed.
///
/// Cache maintenance and persistence of new tokens run as detached tasks on the current
/// tokio runtime: when [`ServiceTokenProvider::get_service_token`] returns, the new token may
/// not have been persisted yet, and concurrent callers may each log in independently.
/// Outside a tokio runtime the token is still returned, but nothing is cached or cleaned up.
#[derive(Clone)]
pub struct S2sTokenProvider {
    credentials: S2sCredentials,
    store: Arc<dyn TokenStore>,
    cryptor: Arc<dyn Cryptor>,
    caller: Arc<dyn S2sCaller>,
}

impl S2sTokenProvider {
    pub fn new(
        credentials: S2sCredentials,
        store: Arc<dyn TokenStore>,
        cryptor: Arc<dyn Cryptor>,
        caller: Arc<dyn S2sCaller>,
    ) -> Self {
        Self {
            credentials,
            store,
            cryptor,
            caller,
        }
    }

    async fn refresh(
        &self,
        service_name: &str,
        record: &CachedAuthorization,
    ) -> Result<S2sAuthorization> {
        let refresh_token = record.open_refresh_token(self.cryptor.as_ref())?;

        let cmd = RefreshCmd {
            refresh_token,
            service_name: service_name.to_string(),
        };

        self.caller.refresh(&cmd).await
    }

    async fn login(&self, service_name: &str) -> Result<S2sAuthorization> {
        let cmd = S2sLoginCmd {
            client_id: self.credentials.client_id.clone(),
            client_secret: self.credentials.client_secret.clone(),
            service_name: service_name.to_string(),
        };

        self.caller.login(&cmd).await
    }

    fn spawn_delete(&self, jti: String) {
        let Some(runtime) = background_runtime() else {
            warn!(jti = %jti, "no tokio runtime, not deleting expired s2s token");
            return;
        };

        let store = self.store.clone();

        runtime.spawn(async move {
            match store.delete(&jti).await {
                Ok(()) => debug!(jti = %jti, "deleted expired s2s token"),
                Err(cause) => {
                    error!(jti = %jti, error = %cause, "failed to delete expired s2s token")
                }
            }
        });
    }

    fn spawn_persist(&self, authz: S2sAuthorization) {
        if authz.refresh_expires < authz.token_expires {
            warn!(
                service = %authz.service_name,
                jti = %authz.jti,
                "not caching s2s token whose refresh token expires before its access token"
            );
            return;
        }

        let Some(runtime) = background_runtime() else {
            warn!(
                service = %authz.service_name,
                jti = %authz.jti,
                "no tokio runtime, not caching s2s token"
            );
            return;
        };

        let store = self.store.clone();
        let cryptor = self.cryptor.clone();

        runtime.spawn(async move {
            let record = match CachedAuthorization::seal(&authz, cryptor.as_ref()) {
                Ok(record) => record,
                Err(cause) => {
                    error!(
                        service = %authz.service_name,
                        jti = %authz.jti,
                        error = %cause,
                        "failed to encrypt s2s token"
                    );
                    return;
                }
            };

            match store.insert(&record).await {
                Ok(()) => debug!(service = %record.service_name, jti = %record.jti, "cached s2s token"),
                Err(cause) => error!(
                    service = %record.service_name,
                    jti = %record.jti,
                    error = %cause,
                    "failed to cache s2s token"
                ),
            }
        });
    }
}

// detached work needs a tokio runtime, which the caller's executor may not be
fn background_runtime() -> Option<Handle> {
    Handle::try_current().ok()
}

#[async_trait]
impl ServiceTokenProvider for S2sTokenProvider {
    async fn get_service_token(&self, service_name: &str) -> Result<String> {
        let now = Utc::now();

        let mut candidates = match self.store.select_refreshable(service_name, now).await {
            Ok(candidates) => candidates,
            Err(cause) => {
                warn!(
                    service = %service_name,
                    error = %cause,
                    "failed to look up cached s2s tokens"
                );
                Vec::new()
            }
        };

        // newest first, so the latest usable token wins and the latest refresh token is tried
        candidates.sort_by(|l, r| {
            r.token_expires
                .cmp(&l.token_expires)
                .then_with(|| r.refresh_expires.cmp(&l.refresh_expires))
        });

        for candidate in &candidates {
            if candidate.token_expires > now {
                match candidate.open_service_token(self.cryptor.as_ref()) {
                    Ok(token) => {
                        debug!(
                            service = %service_name,
                            jti = %candidate.jti,
                            "using cached s2s token"
                        );
                        return Ok(token);
                    }
                    Err(cause) => {
                        warn!(
                            service = %service_name,
                            jti = %candidate.jti,
                            error = %cause,
                            "failed to decrypt cached s2s token"
                        );
                    }
                }
            } else {
                self.spawn_delete(candidate.jti.clone());
            }
        }

        if let Some(latest) = candidates.first() {
            match self.refresh(service_name, latest).await {
                Ok(authz) => {
                    info!(service = %service_name, jti = %authz.jti, "refreshed s2s token");
                    let token = authz.service_token.clone();
                    self.spawn_persist(authz);
                    return Ok(token);
                }
                Err(cause) => {
                    warn!(
                        service = %service_name,
                        error = %cause,
                        "failed to refresh s2s token, logging in"
                    );
                }
            }
        }

        let authz = self.login(service_name).await.map_err(|cause| {
            error!(service = %service_name, error = %cause, "s2s login failed");
            Error::new(
                cause.kind(),
                format!("s2s login for {service_name} failed: {}", cause.message()),
            )
        })?;

        info!(service = %service_name, jti = %authz.jti, "logged in for s2s token");
        let token = authz.service_token.clone();
        self.spawn_persist(authz);
        Ok(token)
    }
}
