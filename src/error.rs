use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Error kinds shared by every service layer (catalog, registry, deployment,
/// jobs, reconciler). The HTTP layer maps these to status codes in one
/// place (`status_for_kind` below); nothing downstream of a service call
/// should need to match on error message strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    InvalidInput,
    DuplicateVersion,
    MaxReached,
    AlreadyExists,
    Conflict,
    AlreadyRunning,
    Unauthenticated,
    Forbidden,
    Transient,
    Internal,
    Unavailable,
    UnprocessableInput,
}

/// Service error type that carries a kind for HTTP mapping, a user-facing
/// message, and an optional source error with full context for logging.
///
/// Mirrors the shape of a conventional Axum service error type: status is
/// derived from `kind` at the HTTP boundary rather than stored directly, so
/// the same error can be reused by both the public and admin routers (which
/// map `Forbidden`/`Unauthenticated` differently, see `http::error_map`).
#[derive(Debug)]
pub struct ServerError {
    pub kind: ErrorKind,
    pub message: String,
    pub source: Option<anyhow::Error>,
    pub context: Vec<(&'static str, String)>,
}

impl ServerError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
            context: Vec::new(),
        }
    }

    pub fn from_anyhow(source: anyhow::Error, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: Some(source),
            context: Vec::new(),
        }
    }

    pub fn with_context(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.context.push((key, value.into()));
        self
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidInput, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    pub fn already_exists(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AlreadyExists, message)
    }

    pub fn already_running(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AlreadyRunning, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Forbidden, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unavailable, message)
    }

    pub fn unprocessable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnprocessableInput, message)
    }

    pub fn internal_anyhow(source: anyhow::Error, message: impl Into<String>) -> Self {
        Self::from_anyhow(source, ErrorKind::Internal, message)
    }
}

/// RFC 7807 problem-details body
#[derive(Debug, Serialize)]
struct ProblemDetails {
    title: String,
    status: u16,
    detail: String,
}

fn status_for_kind(kind: ErrorKind, admin: bool) -> StatusCode {
    match kind {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
        ErrorKind::DuplicateVersion => StatusCode::BAD_REQUEST,
        ErrorKind::MaxReached => StatusCode::BAD_REQUEST,
        ErrorKind::AlreadyExists => StatusCode::CONFLICT,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::AlreadyRunning => StatusCode::CONFLICT,
        ErrorKind::Unauthenticated => {
            if admin {
                StatusCode::UNAUTHORIZED
            } else {
                StatusCode::NOT_FOUND
            }
        }
        ErrorKind::Forbidden => {
            if admin {
                StatusCode::FORBIDDEN
            } else {
                StatusCode::NOT_FOUND
            }
        }
        ErrorKind::Transient => StatusCode::INTERNAL_SERVER_ERROR,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        ErrorKind::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::UnprocessableInput => StatusCode::UNPROCESSABLE_ENTITY,
    }
}

fn title_for_status(status: StatusCode) -> String {
    status
        .canonical_reason()
        .unwrap_or("Error")
        .to_string()
}

impl ServerError {
    /// Render this error as an HTTP response under the given router
    /// (public endpoints hide existence behind 404; admin endpoints surface
    /// the real 401/403).
    pub fn into_response_for(self, admin: bool) -> Response {
        let status = status_for_kind(self.kind, admin);

        if status.is_server_error() {
            if let Some(source) = &self.source {
                tracing::error!(
                    status = status.as_u16(),
                    message = %self.message,
                    context = ?self.context,
                    error = ?source,
                    "server error"
                );
            } else {
                tracing::error!(
                    status = status.as_u16(),
                    message = %self.message,
                    context = ?self.context,
                    "server error"
                );
            }
        }

        let body = ProblemDetails {
            title: title_for_status(status),
            status: status.as_u16(),
            detail: self.message,
        };

        (status, Json(body)).into_response()
    }
}

/// Default `IntoResponse` impl assumes the admin (non-hiding) mapping;
/// handlers behind the public router must call `into_response_for(false)`
/// explicitly via the prefix-aware wrapper in `http::error_map`.
impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        self.into_response_for(true)
    }
}

impl From<sqlx::Error> for ServerError {
    fn from(err: sqlx::Error) -> Self {
        Self::internal_anyhow(err.into(), "database operation failed")
    }
}

impl From<anyhow::Error> for ServerError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal_anyhow(err, "internal server error")
    }
}

/// Extension trait for converting arbitrary error types into `ServerError`
/// at the call site, without writing out `.map_err(|e| ServerError::...)`.
pub trait ServerErrorExt<T> {
    fn server_err(self, kind: ErrorKind, message: impl Into<String>) -> Result<T, ServerError>;
    fn internal_err(self, message: impl Into<String>) -> Result<T, ServerError>;
}

impl<T, E> ServerErrorExt<T> for Result<T, E>
where
    E: Into<anyhow::Error>,
{
    fn server_err(self, kind: ErrorKind, message: impl Into<String>) -> Result<T, ServerError> {
        self.map_err(|e| ServerError::from_anyhow(e.into(), kind, message))
    }

    fn internal_err(self, message: impl Into<String>) -> Result<T, ServerError> {
        self.map_err(|e| ServerError::internal_anyhow(e.into(), message))
    }
}
