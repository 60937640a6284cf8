use async_trait::async_trait;

use crate::error::{ErrorKind, ServerError};

/// Per-request identity the HTTP layer hands to the authz hook. Populated
/// from whatever headers a concrete deployment's reverse proxy injects;
/// this crate never validates a token itself — real OIDC/DNS token exchange
/// is left to whatever sits in front of it.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub principal: Option<String>,
    pub is_admin_route: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum AuthzError {
    #[error("unauthenticated")]
    Unauthenticated,
    #[error("forbidden: {0}")]
    Forbidden(String),
}

impl From<AuthzError> for ServerError {
    fn from(err: AuthzError) -> Self {
        match err {
            AuthzError::Unauthenticated => ServerError::new(ErrorKind::Unauthenticated, "unauthenticated"),
            AuthzError::Forbidden(reason) => ServerError::new(ErrorKind::Forbidden, reason),
        }
    }
}

/// Authorization collaborator consulted by every handler before it reaches
/// a service. `action` is a short verb (`"publish"`, `"deploy"`,
/// `"delete"`); `resource` is the path the action targets.
#[async_trait]
pub trait AuthzHook: Send + Sync {
    async fn check(&self, ctx: &RequestContext, action: &str, resource: &str) -> Result<(), AuthzError>;
}

/// Permissive default wired when no concrete authorization backend is
/// configured. Allows every action; real deployments supply their own
/// `Authorizer` backed by OIDC/token exchange.
pub struct AllowAll;

#[async_trait]
impl AuthzHook for AllowAll {
    async fn check(&self, _ctx: &RequestContext, _action: &str, _resource: &str) -> Result<(), AuthzError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn allow_all_never_rejects() {
        let hook = AllowAll;
        let ctx = RequestContext::default();
        assert!(hook.check(&ctx, "publish", "server/com.ex/foo").await.is_ok());
    }
}
