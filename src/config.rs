use std::time::Duration;

use secrecy::SecretString;
use serde::Deserialize;

use crate::{Error, Result};

const ENV_PREFIX: &str = "S2S_";

/// Client credentials this service uses to log in to the upstream auth service
#[derive(Clone, Debug, Deserialize)]
pub struct S2sCredentials {
    pub client_id: String,
    pub client_secret: SecretString,
}

/// Retry policy for calls to the upstream auth service: exponential backoff with ±30% jitter
#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Maximum number of retries after the first attempt
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Per-attempt request timeout
    pub timeout: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
            timeout: Duration::from_secs(10),
        }
    }
}

/// Service-to-service configuration, read from `S2S_*` environment variables.
///
/// | variable | required |
/// |---|---|
/// | `S2S_AUTH_URL` | yes |
/// | `S2S_AUTH_SERVICE_NAME` | yes |
/// | `S2S_CLIENT_ID` | yes |
/// | `S2S_CLIENT_SECRET` | yes |
/// | `S2S_MAX_RETRIES` | no (3) |
/// | `S2S_INITIAL_BACKOFF_MS` | no (100) |
/// | `S2S_MAX_BACKOFF_MS` | no (5000) |
/// | `S2S_TIMEOUT_SECS` | no (10) |
#[derive(Clone, Debug, Deserialize)]
pub struct S2sConfig {
    /// Base URL of the upstream auth service, e.g. `https://ran:8443`
    pub auth_url: String,
    /// The name the upstream auth service expects in the audience of its own s2s tokens
    pub auth_service_name: String,
    pub client_id: String,
    pub client_secret: SecretString,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    100
}

fn default_max_backoff_ms() -> u64 {
    5000
}

fn default_timeout_secs() -> u64 {
    10
}

impl S2sConfig {
    /// Read the configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(std::env::vars())
    }

    /// Read the configuration from the given `(name, value)` pairs.
    pub fn from_vars<I>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let config: Self = envy::prefixed(ENV_PREFIX).from_iter(vars)?;

        if config.auth_url.trim().is_empty() {
            return Err(Error::config("S2S_AUTH_URL must not be empty"));
        }

        if config.initial_backoff_ms > config.max_backoff_ms {
            return Err(Error::config(
                "S2S_INITIAL_BACKOFF_MS must not exceed S2S_MAX_BACKOFF_MS",
            ));
        }

        Ok(config)
    }

    /// The client credentials used to log in to the auth service.
    pub fn credentials(&self) -> S2sCredentials {
        S2sCredentials {
            client_id: self.client_id.clone(),
            client_secret: self.client_secret.clone(),
        }
    }

    /// The retry policy for calls to the auth service.
    pub fn retry(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.max_retries,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            timeout: Duration::from_secs(self.timeout_secs),
        }
    }
}
