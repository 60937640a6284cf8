pub mod artifacts;
pub mod deployments;
pub mod embeddings;
pub mod sse;

use async_trait::async_trait;
use axum::extract::{Extension, FromRequestParts};
use axum::http::request::Parts;

use crate::catalog::ArtifactKind;
use crate::error::ServerError;
use crate::http::error_map::HandlerError;

/// Per-request routing context: which artifact kind this route was mounted
/// for and whether it came in through the admin or public prefix. Both are
/// attached as `Extension`s by the router factory when a sub-router is
/// nested (see `http::mount_artifact_kind`), so handlers extract one value
/// instead of threading `(bool, ArtifactKind)` through every signature.
#[derive(Debug, Clone, Copy)]
pub struct RouteCtx {
    pub admin: bool,
    pub kind: ArtifactKind,
}

impl RouteCtx {
    /// Wraps a service error with this route's admin/public visibility,
    /// existence-hiding split.
    pub fn wrap(&self, error: ServerError) -> HandlerError {
        HandlerError { error, admin: self.admin }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for RouteCtx
where
    S: Send + Sync,
{
    type Rejection = HandlerError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Extension(admin) = Extension::<bool>::from_request_parts(parts, state)
            .await
            .map_err(|_| HandlerError::admin(ServerError::internal("missing admin routing extension")))?;
        let Extension(kind) = Extension::<ArtifactKind>::from_request_parts(parts, state)
            .await
            .map_err(|_| HandlerError::admin(ServerError::internal("missing artifact kind routing extension")))?;
        Ok(RouteCtx { admin, kind })
    }
}
