use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::caller::{IntrospectCmd, IntrospectResponse, S2sCaller};
use crate::provider::ServiceTokenProvider;
use crate::token::{has_any_scope, strip_bearer, AuthorizedService};
use crate::{Error, Result};

/// The minimum length of a Personal Access Token, in characters.
pub const PAT_MIN_LEN: usize = 64;

/// The maximum length of a Personal Access Token, in characters.
pub const PAT_MAX_LEN: usize = 128;

/// Authorizes opaque Personal Access Tokens.
///
/// Every call is decided by the upstream auth service, so a revoked PAT stops working
/// immediately. Nothing is cached locally.
#[async_trait]
pub trait PatVerifier: Send + Sync {
    /// Introspect the given `token` and return the auth service's verdict as-is.
    async fn get_pat_scopes(&self, token: &str) -> Result<IntrospectResponse>;

    /// Check that the given `token` is active and grants at least one of the `required_scopes`.
    async fn validate_scopes(&self, required_scopes: &[&str], token: &str) -> Result<()>;

    /// Like [`PatVerifier::validate_scopes`], but also return the identity of the token's owner.
    async fn build_authorized(
        &self,
        required_scopes: &[&str],
        token: &str,
    ) -> Result<AuthorizedService>;
}

/// A [`PatVerifier`] which calls the auth service's `/introspect` endpoint, authenticating
/// with an s2s token obtained from a [`ServiceTokenProvider`].
#[derive(Clone)]
pub struct IntrospectionPatVerifier {
    auth_service_name: String,
    provider: Arc<dyn ServiceTokenProvider>,
    caller: Arc<dyn S2sCaller>,
}

impl IntrospectionPatVerifier {
    /// Construct a new [`IntrospectionPatVerifier`]. `auth_service_name` is the service name
    /// under which `provider` obtains tokens for the auth service itself.
    pub fn new<N: Into<String>>(
        auth_service_name: N,
        provider: Arc<dyn ServiceTokenProvider>,
        caller: Arc<dyn S2sCaller>,
    ) -> Self {
        Self {
            auth_service_name: auth_service_name.into(),
            provider,
            caller,
        }
    }

    async fn get_scopes(&self, token: &str) -> Result<IntrospectResponse> {
        let token = strip_bearer(token);

        let len = token.chars().count();
        if !(PAT_MIN_LEN..=PAT_MAX_LEN).contains(&len) {
            return Err(Error::unauthorized(format!(
                "personal access token must be {PAT_MIN_LEN} to {PAT_MAX_LEN} characters, found {len}"
            )));
        }

        let s2s_token = self
            .provider
            .get_service_token(&self.auth_service_name)
            .await?;

        let cmd = IntrospectCmd {
            token: token.to_string(),
        };

        self.caller.introspect(&s2s_token, &cmd).await
    }
}

fn check_scopes(response: &IntrospectResponse, required_scopes: &[&str]) -> Result<()> {
    if !response.active {
        return Err(Error::unauthorized("personal access token is not active"));
    }

    if response.scope.trim().is_empty() {
        return Err(Error::forbidden("personal access token grants no scopes"));
    }

    if has_any_scope(&response.scope, required_scopes) {
        Ok(())
    } else {
        Err(Error::forbidden(
            "personal access token does not grant a required scope",
        ))
    }
}

#[async_trait]
impl PatVerifier for IntrospectionPatVerifier {
    async fn get_pat_scopes(&self, token: &str) -> Result<IntrospectResponse> {
        self.get_scopes(token).await
    }

    async fn validate_scopes(&self, required_scopes: &[&str], token: &str) -> Result<()> {
        let response = self.get_scopes(token).await?;
        check_scopes(&response, required_scopes)
    }

    async fn build_authorized(
        &self,
        required_scopes: &[&str],
        token: &str,
    ) -> Result<AuthorizedService> {
        let response = self.get_scopes(token).await?;
        check_scopes(&response, required_scopes)?;

        debug!(
            service = %response.service_name,
            sub = %response.sub,
            "authorized personal access token"
        );

        Ok(AuthorizedService {
            service_id: response.sub,
            service_name: response.service_name,
            authorized_by: response.iss,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    fn response(active: bool, scope: &str) -> IntrospectResponse {
        IntrospectResponse {
            active,
            scope: scope.into(),
            sub: "6d3f".into(),
            service_name: "shaw".into(),
            iss: "ran".into(),
        }
    }

    #[test]
    fn test_inactive() {
        let error = check_scopes(&response(false, "r:pixie:*"), &["r:pixie:*"]).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Unauthorized);
    }

    #[test]
    fn test_empty_scope() {
        let error = check_scopes(&response(true, " "), &["r:pixie:*"]).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Forbidden);
    }

    #[test]
    fn test_scope_or_semantics() {
        check_scopes(&response(true, "r:pixie:*"), &["w:pixie:*", "r:pixie:*"]).unwrap();

        let error = check_scopes(&response(true, "r:pixie:*"), &["w:other:*"]).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Forbidden);
    }
}
