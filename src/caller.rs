use std::fmt;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize, Serializer};
use tracing::warn;

use crate::config::{RetryConfig, S2sConfig};
use crate::{Error, Result};

const JITTER: f64 = 0.3;

/// `POST /login` request body
#[derive(Clone, Debug, Serialize)]
pub struct S2sLoginCmd {
    pub client_id: String,
    #[serde(serialize_with = "serialize_secret")]
    pub client_secret: SecretString,
    pub service_name: String,
}

// the secret leaves its wrapper only on the way onto the wire
fn serialize_secret<S>(
    secret: &SecretString,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(secret.expose_secret())
}

/// `POST /refresh` request body
#[derive(Clone, Serialize)]
pub struct RefreshCmd {
    pub refresh_token: String,
    pub service_name: String,
}

impl fmt::Debug for RefreshCmd {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("RefreshCmd")
            .field("refresh_token", &"[REDACTED]")
            .field("service_name", &self.service_name)
            .finish()
    }
}

/// `POST /introspect` request body
#[derive(Clone, Serialize)]
pub struct IntrospectCmd {
    pub token: String,
}

impl fmt::Debug for IntrospectCmd {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("IntrospectCmd")
            .field("token", &"[REDACTED]")
            .finish()
    }
}

/// A service token and its refresh token, as issued by the upstream auth service.
///
/// The tokens are plaintext: this type is never persisted as-is, see
/// [`crate::CachedAuthorization`] for the encrypted at-rest form.
#[derive(Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct S2sAuthorization {
    pub jti: String,
    pub service_name: String,
    pub service_token: String,
    pub token_expires: DateTime<Utc>,
    pub refresh_token: String,
    pub refresh_expires: DateTime<Utc>,
}

impl fmt::Debug for S2sAuthorization {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("S2sAuthorization")
            .field("jti", &self.jti)
            .field("service_name", &self.service_name)
            .field("token_expires", &self.token_expires)
            .field("refresh_expires", &self.refresh_expires)
            .finish_non_exhaustive()
    }
}

/// The upstream auth service's verdict on a Personal Access Token at the moment of the call
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
pub struct IntrospectResponse {
    pub active: bool,
    #[serde(default)]
    pub scope: String,
    #[serde(default)]
    pub sub: String,
    #[serde(rename = "client_name", default)]
    pub service_name: String,
    #[serde(default)]
    pub iss: String,
}

/// Network calls to the upstream auth service
#[async_trait]
pub trait S2sCaller: Send + Sync {
    /// Authenticate with client credentials to obtain a token for `cmd.service_name`.
    async fn login(&self, cmd: &S2sLoginCmd) -> Result<S2sAuthorization>;

    /// Exchange a refresh token for a new service token.
    async fn refresh(&self, cmd: &RefreshCmd) -> Result<S2sAuthorization>;

    /// Ask the auth service whether a Personal Access Token is active, authenticating
    /// the call itself with the given `s2s_token`.
    async fn introspect(
        &self,
        s2s_token: &str,
        cmd: &IntrospectCmd,
    ) -> Result<IntrospectResponse>;
}

/// An [`S2sCaller`] which POSTs JSON over HTTPS, retrying transient failures with
/// exponential backoff and jitter.
pub struct HttpS2sCaller {
    base_url: String,
    client: reqwest::Client,
    retry: RetryConfig,
    rng: Mutex<StdRng>,
}

impl HttpS2sCaller {
    /// Construct a new [`HttpS2sCaller`] for the auth service at `base_url`.
    pub fn new<U: Into<String>>(base_url: U, retry: RetryConfig) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(retry.timeout).build()?;
        Ok(Self::with_client(base_url, client, retry, StdRng::from_entropy()))
    }

    /// Construct a new [`HttpS2sCaller`] from the given configuration.
    pub fn from_config(config: &S2sConfig) -> Result<Self> {
        Self::new(config.auth_url.clone(), config.retry())
    }

    /// Construct a new [`HttpS2sCaller`] with an existing client (e.g. one configured for
    /// mutual TLS) and an explicit jitter source.
    pub fn with_client<U: Into<String>>(
        base_url: U,
        client: reqwest::Client,
        retry: RetryConfig,
        rng: StdRng,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            retry,
            rng: Mutex::new(rng),
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let base = self
            .retry
            .initial_backoff
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.retry.max_backoff);

        let jitter = match self.rng.lock() {
            Ok(mut rng) => rng.gen_range(-JITTER..=JITTER),
            Err(_) => 0.0,
        };

        base.mul_f64(1.0 + jitter)
    }

    async fn post<B, R>(&self, endpoint: &str, bearer: Option<&str>, body: &B) -> Result<R>
    where
        B: Serialize + Sync,
        R: DeserializeOwned + Send,
    {
        let url = format!("{}/{}", self.base_url, endpoint);
        let mut attempt = 0;

        loop {
            let mut request = self.client.post(&url).json(body);
            if let Some(token) = bearer {
                request = request.bearer_auth(token);
            }

            let failure = match request.send().await {
                Ok(response) if response.status().is_success() => {
                    return response.json::<R>().await.map_err(|cause| {
                        Error::upstream(format!("invalid response from {url}: {cause}"))
                    });
                }
                Ok(response) if is_retryable(response.status()) => {
                    format!("{url} returned {}", response.status())
                }
                Ok(response) => {
                    return Err(Error::upstream(format!(
                        "{url} returned {}",
                        response.status()
                    )));
                }
                Err(cause) => format!("request to {url} failed: {cause}"),
            };

            if attempt >= self.retry.max_retries {
                return Err(Error::upstream(failure));
            }

            let delay = self.backoff(attempt);
            attempt += 1;

            warn!(
                endpoint,
                attempt,
                max_retries = self.retry.max_retries,
                delay_ms = delay.as_millis() as u64,
                error = %failure,
                "retrying call to auth service"
            );

            tokio::time::sleep(delay).await;
        }
    }
}

impl fmt::Debug for HttpS2sCaller {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("HttpS2sCaller")
            .field("base_url", &self.base_url)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl S2sCaller for HttpS2sCaller {
    async fn login(&self, cmd: &S2sLoginCmd) -> Result<S2sAuthorization> {
        self.post("login", None, cmd).await
    }

    async fn refresh(&self, cmd: &RefreshCmd) -> Result<S2sAuthorization> {
        self.post("refresh", None, cmd).await
    }

    async fn introspect(
        &self,
        s2s_token: &str,
        cmd: &IntrospectCmd,
    ) -> Result<IntrospectResponse> {
        self.post("introspect", Some(s2s_token), cmd).await
    }
}

fn is_retryable(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}
