use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;

use crate::catalog::ArtifactKind;
use crate::deployment::{store as deployment_store, CreateDeployment, DeploymentFilter, ResourceType, RuntimeKind};
use crate::error::{ErrorKind, ServerError};
use crate::http::error_map::HandlerError;
use crate::state::AppState;

fn admin_err(e: impl Into<ServerError>) -> HandlerError {
    HandlerError::admin(e)
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub runtime: Option<RuntimeKind>,
    pub resource_type: Option<ResourceType>,
}

pub async fn list(State(state): State<AppState>, Query(query): Query<ListQuery>) -> Result<impl IntoResponse, HandlerError> {
    let filter = DeploymentFilter { runtime: query.runtime, resource_type: query.resource_type };
    let rows = deployment_store::list(&state.pool, &filter).await.map_err(|e| admin_err(ServerError::internal_anyhow(e, "failed to list deployments")))?;
    Ok(Json(rows))
}

#[derive(Debug, Deserialize)]
pub struct DeployBody {
    pub kind: ArtifactKind,
    pub name: String,
    pub version: String,
    pub runtime: RuntimeKind,
    pub resource_type: ResourceType,
    #[serde(default)]
    pub config: serde_json::Value,
    #[serde(default)]
    pub prefer_remote: bool,
}

/// `Deploy`: write the Deployment row, then converge via `ReconcileAll`
/// synchronously, rolling back the row on reconciliation failure.
pub async fn create(State(state): State<AppState>, Json(body): Json<DeployBody>) -> Result<impl IntoResponse, HandlerError> {
    if !matches!(body.runtime, RuntimeKind::Local | RuntimeKind::Kubernetes) {
        return Err(admin_err(ServerError::invalid_input("unsupported runtime")));
    }

    let published = crate::catalog::store::get_by_name_and_version(&state.pool, body.kind, &body.name, &body.version, true)
        .await
        .map_err(|e| admin_err(ServerError::internal_anyhow(e, "failed to verify artifact is published")))?
        .is_some();
    if !published {
        return Err(admin_err(ServerError::not_found(format!(
            "{} '{}' version '{}' is not published",
            body.kind, body.name, body.version
        ))));
    }

    let row = deployment_store::create(
        &state.pool,
        CreateDeployment {
            kind: body.kind,
            name: body.name.clone(),
            version: body.version.clone(),
            runtime: body.runtime,
            resource_type: body.resource_type,
            config: body.config,
            prefer_remote: body.prefer_remote,
        },
    )
    .await
    .map_err(|e| {
        if deployment_store::is_unique_violation(&e) {
            admin_err(ServerError::already_exists(format!("{} '{}' version '{}' is already deployed", body.kind, body.name, body.version)))
        } else {
            admin_err(ServerError::internal_anyhow(e, "failed to create deployment"))
        }
    })?;

    let outcome = state.reconciler.reconcile_all().await;
    if let Some(err) = outcome.first_error() {
        let _ = deployment_store::remove(&state.pool, row.kind, &row.name, &row.version).await;
        return Err(admin_err(ServerError::new(ErrorKind::Conflict, format!("deployment failed to converge: {err}"))));
    }

    Ok((axum::http::StatusCode::CREATED, Json(row)))
}

#[derive(Debug, Deserialize)]
pub struct UpdateConfigBody {
    #[serde(default)]
    pub config: serde_json::Value,
    #[serde(default)]
    pub prefer_remote: bool,
}

pub async fn update_config(
    State(state): State<AppState>,
    Path((kind, name, version)): Path<(ArtifactKind, String, String)>,
    Json(body): Json<UpdateConfigBody>,
) -> Result<impl IntoResponse, HandlerError> {
    let row = deployment_store::update_config(&state.pool, kind, &name, &version, body.config, body.prefer_remote)
        .await
        .map_err(|e| admin_err(ServerError::internal_anyhow(e, "failed to update deployment config")))?
        .ok_or_else(|| admin_err(ServerError::not_found(format!("deployment {kind} '{name}' version '{version}' not found"))))?;

    let outcome = state.reconciler.reconcile_all().await;
    if let Some(err) = outcome.first_error() {
        return Err(admin_err(ServerError::new(ErrorKind::Conflict, format!("deployment failed to converge: {err}"))));
    }

    Ok(Json(row))
}

pub async fn remove(
    State(state): State<AppState>,
    Path((kind, name, version)): Path<(ArtifactKind, String, String)>,
) -> Result<impl IntoResponse, HandlerError> {
    let removed = deployment_store::remove(&state.pool, kind, &name, &version)
        .await
        .map_err(|e| admin_err(ServerError::internal_anyhow(e, "failed to remove deployment")))?;
    if !removed {
        return Err(admin_err(ServerError::not_found(format!("deployment {kind} '{name}' version '{version}' not found"))));
    }

    let _ = state.reconciler.reconcile_all().await;
    Ok(axum::http::StatusCode::NO_CONTENT)
}
