#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use carapace::*;
use chrono::Utc;

/// An [`S2sCaller`] which issues tokens locally and counts its calls.
#[derive(Default)]
pub struct StubCaller {
    pub logins: AtomicUsize,
    pub refreshes: AtomicUsize,
    pub introspections: AtomicUsize,
    pub fail_login: bool,
    pub fail_refresh: bool,
    /// Issue authorizations whose refresh token expires before the service token
    pub inverted_expiry: bool,
    pub refresh_tokens: Mutex<Vec<String>>,
    pub introspect_tokens: Mutex<Vec<String>>,
    pub introspection: Mutex<Option<Result<IntrospectResponse>>>,
}

impl StubCaller {
    pub fn logins(&self) -> usize {
        self.logins.load(Ordering::SeqCst)
    }

    pub fn refreshes(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }

    pub fn introspections(&self) -> usize {
        self.introspections.load(Ordering::SeqCst)
    }

    pub fn respond_to_introspection(&self, response: Result<IntrospectResponse>) {
        *self.introspection.lock().unwrap() = Some(response);
    }

    fn issue(&self, service_name: &str, kind: &str, n: usize) -> S2sAuthorization {
        let mut authz = authorization(service_name, &format!("{kind}-{n}"));
        if self.inverted_expiry {
            authz.refresh_expires = authz.token_expires - chrono::Duration::minutes(1);
        }
        authz
    }
}

#[async_trait]
impl S2sCaller for StubCaller {
    async fn login(&self, cmd: &S2sLoginCmd) -> Result<S2sAuthorization> {
        let n = self.logins.fetch_add(1, Ordering::SeqCst) + 1;

        if self.fail_login {
            Err(Error::upstream("https://ran/login returned 401 Unauthorized"))
        } else {
            assert_eq!(cmd.client_id, CLIENT_ID);
            assert_eq!(cmd.client_secret.expose_secret(), "correct-horse-battery-staple");
            Ok(self.issue(&cmd.service_name, "login", n))
        }
    }

    async fn refresh(&self, cmd: &RefreshCmd) -> Result<S2sAuthorization> {
        let n = self.refreshes.fetch_add(1, Ordering::SeqCst) + 1;
        self.refresh_tokens.lock().unwrap().push(cmd.refresh_token.clone());

        if self.fail_refresh {
            Err(Error::upstream("https://ran/refresh returned 401 Unauthorized"))
        } else {
            Ok(self.issue(&cmd.service_name, "refresh", n))
        }
    }

    async fn introspect(
        &self,
        s2s_token: &str,
        cmd: &IntrospectCmd,
    ) -> Result<IntrospectResponse> {
        self.introspections.fetch_add(1, Ordering::SeqCst);
        self.introspect_tokens.lock().unwrap().push(cmd.token.clone());
        assert!(!s2s_token.is_empty());

        let mut introspection = self.introspection.lock().unwrap();
        match introspection.take() {
            Some(Ok(response)) => {
                // answer the same way next time too
                *introspection = Some(Ok(response.clone()));
                Ok(response)
            }
            Some(Err(cause)) => Err(cause),
            None => Err(Error::upstream("no introspection response configured")),
        }
    }
}

pub const CLIENT_ID: &str = "0b5c3a52-58f6-4c36-9ad3-1c7a9f1b7e21";

pub fn credentials() -> S2sCredentials {
    S2sCredentials {
        client_id: CLIENT_ID.to_string(),
        client_secret: SecretString::from("correct-horse-battery-staple"),
    }
}

pub fn cryptor() -> AesGcmCryptor {
    AesGcmCryptor::from_base64_key(&AesGcmCryptor::generate_key()).unwrap()
}

/// A plaintext authorization valid for 15 minutes, refreshable for an hour.
pub fn authorization(service_name: &str, tag: &str) -> S2sAuthorization {
    let now = Utc::now();

    S2sAuthorization {
        jti: uuid::Uuid::new_v4().to_string(),
        service_name: service_name.to_string(),
        service_token: format!("{service_name}-access-{tag}"),
        token_expires: now + chrono::Duration::minutes(15),
        refresh_token: format!("{service_name}-refresh-{tag}"),
        refresh_expires: now + chrono::Duration::hours(1),
    }
}

/// Poll `condition` until it holds, or panic after about a second.
pub async fn eventually<F: Fn() -> bool>(condition: F) {
    for _ in 0..100 {
        if condition() {
            return;
        }

        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    panic!("condition not met in time");
}
