use axum::response::{IntoResponse, Response};

use crate::error::ServerError;

/// Wraps a `ServerError` together with which router it surfaced from, so
/// the public/admin existence-hiding split (public endpoints hide a 401/403
/// /404 behind a flat 404; admin endpoints surface the real status) is
/// applied at the one point every handler's error passes through, rather
/// than handlers picking a status code themselves.
pub struct HandlerError {
    pub error: ServerError,
    pub admin: bool,
}

impl HandlerError {
    pub fn admin(error: impl Into<ServerError>) -> Self {
        Self { error: error.into(), admin: true }
    }

    pub fn public(error: impl Into<ServerError>) -> Self {
        Self { error: error.into(), admin: false }
    }
}

impl IntoResponse for HandlerError {
    fn into_response(self) -> Response {
        self.error.into_response_for(self.admin)
    }
}

impl From<ServerError> for HandlerError {
    fn from(error: ServerError) -> Self {
        // Default to the admin (non-hiding) mapping; route-level code calls
        // `HandlerError::public` explicitly where existence should stay
        // hidden behind the public router.
        Self { error, admin: true }
    }
}
