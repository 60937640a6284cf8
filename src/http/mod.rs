pub mod error_map;
pub mod handlers;

use axum::extract::{Extension, Request, State};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post, put};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::authz::RequestContext;
use crate::catalog::ArtifactKind;
use crate::http::error_map::HandlerError;
use crate::state::AppState;

/// Which router a group of mounted routes belongs to:
/// public prefixes filter to `published = true` and hide 401/403/404
/// behind a flat 404; admin prefixes see everything and surface the real
/// status. Carried as a request `Extension` rather than two copies of the
/// handler bodies, with per-feature route modules merged into one
/// `Router`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefixKind {
    Public,
    Admin,
}

impl PrefixKind {
    fn is_admin(self) -> bool {
        matches!(self, PrefixKind::Admin)
    }
}

fn artifact_router(kind: ArtifactKind, prefix: PrefixKind) -> Router<AppState> {
    use handlers::artifacts;

    let mut router = Router::new()
        .route("/", get(artifacts::list))
        .route("/{name}/versions", get(artifacts::get_all_versions))
        .route("/{name}/versions/{version}", get(artifacts::get_version))
        .route("/{name}/versions/{version}/readme", get(artifacts::get_readme))
        .route("/{name}/readme", get(artifacts::get_readme))
        .route(
            "/{name}/versions/{version}/publish",
            post(artifacts::publish),
        )
        .route(
            "/{name}/versions/{version}/unpublish",
            post(artifacts::unpublish),
        );

    if prefix.is_admin() {
        router = router
            .route("/", post(artifacts::create))
            .route("/{name}/versions/{version}", put(artifacts::update))
            .route(
                "/{name}/versions/{version}",
                axum::routing::delete(artifacts::delete),
            )
            .route(
                "/{name}/versions/{version}/readme",
                put(artifacts::put_readme),
            );
    }

    router.layer(Extension(kind))
}

fn deployments_router(prefix: PrefixKind) -> Router<AppState> {
    use handlers::deployments;

    let mut router = Router::new().route("/", get(deployments::list));

    if prefix.is_admin() {
        router = router
            .route("/", post(deployments::create))
            .route(
                "/{kind}/{name}/versions/{version}",
                put(deployments::update_config).delete(deployments::remove),
            );
    }

    router
}

fn embeddings_router() -> Router<AppState> {
    use handlers::{embeddings, sse};

    Router::new()
        .route("/index", post(embeddings::start_index))
        .route("/index/stream", post(sse::index_stream))
        .route("/index/{job_id}", get(embeddings::job_status))
}

/// Runs the authz hook for every mutating request on the public router
/// ("HTTP request → authz hook → service"); the admin-prefix path bypasses
/// it entirely since it's assumed to sit behind its own perimeter control.
async fn authz_gate(State(state): State<AppState>, request: Request, next: Next) -> Result<Response, HandlerError> {
    if request.method() == axum::http::Method::GET {
        return Ok(next.run(request).await);
    }

    let ctx = RequestContext { principal: None, is_admin_route: false };
    let action = request.method().as_str().to_ascii_lowercase();
    let resource = request.uri().path().to_string();

    state
        .authz
        .check(&ctx, &action, &resource)
        .await
        .map_err(|e| HandlerError::public(e))?;

    Ok(next.run(request).await)
}

fn versioned_prefix(prefix: PrefixKind) -> Router<AppState> {
    let mut router = Router::new();

    for kind in [ArtifactKind::Server, ArtifactKind::Agent, ArtifactKind::Skill] {
        router = router.nest(
            &format!("/{}", kind.path_segment()),
            artifact_router(kind, prefix),
        );
    }

    router = router.nest("/deployments", deployments_router(prefix));

    if prefix.is_admin() {
        router = router.nest("/embeddings", embeddings_router());
    }

    router.layer(Extension(prefix.is_admin()))
}

/// Builds the full Axum router: `/v0`, `/v0.1` (public), `/admin/v0`,
/// `/admin/v0.1` (admin) four path prefixes, each built by
/// the same factory rather than four hand-written copies, plus the
/// `/v0/publish` alias calls out as bypassing authz.
pub fn build_router(state: AppState) -> Router {
    let public = versioned_prefix(PrefixKind::Public)
        .layer(middleware::from_fn_with_state(state.clone(), authz_gate));
    let admin = versioned_prefix(PrefixKind::Admin);

    Router::new()
        .nest("/v0", public.clone())
        .nest("/v0.1", public)
        .nest("/admin/v0", admin.clone())
        .nest("/admin/v0.1", admin)
        .route(
            "/v0/publish",
            post(handlers::artifacts::create)
                .layer(Extension(ArtifactKind::Server))
                .layer(Extension(false))
                .layer(middleware::from_fn_with_state(state.clone(), authz_gate)),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
