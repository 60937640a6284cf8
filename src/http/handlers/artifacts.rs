use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;

use crate::catalog::{ArtifactFilter, ArtifactStatus, Page, Readme, ScoredArtifact, SemanticFilter};
use crate::error::ServerError;
use crate::http::error_map::HandlerError;
use crate::registry::{CreateArtifactInput, UpdateArtifactInput};
use crate::state::AppState;

use super::RouteCtx;

/// Query parameters accepted by `GET P/{kind}`
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub cursor: Option<String>,
    pub limit: Option<i64>,
    pub updated_since: Option<String>,
    pub search: Option<String>,
    pub version: Option<String>,
    pub semantic_search: Option<bool>,
    pub semantic_threshold: Option<f32>,
}

fn build_filter(ctx: &RouteCtx, query: &ListQuery) -> Result<ArtifactFilter, ServerError> {
    let mut filter = ArtifactFilter {
        kind: ctx.kind,
        ..Default::default()
    };

    if !ctx.admin {
        filter.published = Some(true);
    }

    if let Some(version) = &query.version {
        filter.version = Some(version.clone());
    }

    if let Some(updated_since) = &query.updated_since {
        let parsed = chrono::DateTime::parse_from_rfc3339(updated_since)
            .map_err(|_| ServerError::invalid_input("updated_since must be RFC3339"))?;
        filter.updated_since = Some(parsed.with_timezone(&chrono::Utc));
    }

    if let Some(search) = &query.search {
        filter.substring_name = Some(search.clone());
    }

    if query.semantic_search.unwrap_or(false) {
        let raw_query = query
            .search
            .clone()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| ServerError::invalid_input("semantic_search requires a non-empty search query"))?;

        filter.semantic = Some(SemanticFilter {
            raw_query,
            threshold: query.semantic_threshold,
            query_embedding: None,
            hybrid_substring: query.search.is_some(),
        });
    }

    Ok(filter)
}

pub async fn list(
    State(state): State<AppState>,
    ctx: RouteCtx,
    Query(query): Query<ListQuery>,
) -> Result<Json<Page<ScoredArtifact>>, HandlerError> {
    let filter = build_filter(&ctx, &query).map_err(|e| ctx.wrap(e))?;
    let page = state
        .registry
        .list(ctx.kind, filter, query.cursor.as_deref(), query.limit)
        .await
        .map_err(|e| ctx.wrap(e))?;
    Ok(Json(page))
}

pub async fn get_all_versions(
    State(state): State<AppState>,
    ctx: RouteCtx,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, HandlerError> {
    let versions = state
        .registry
        .get_all_versions(ctx.kind, &name)
        .await
        .map_err(|e| ctx.wrap(e))?;

    let versions: Vec<_> = if ctx.admin {
        versions
    } else {
        versions.into_iter().filter(|v| v.published).collect()
    };

    Ok(Json(versions))
}

pub async fn get_version(
    State(state): State<AppState>,
    ctx: RouteCtx,
    Path((name, version)): Path<(String, String)>,
) -> Result<impl IntoResponse, HandlerError> {
    let artifact = if version == "latest" {
        state.registry.get_by_name(ctx.kind, &name).await.map_err(|e| ctx.wrap(e))?
    } else {
        state
            .registry
            .get_by_name_and_version(ctx.kind, &name, &version, !ctx.admin)
            .await
            .map_err(|e| ctx.wrap(e))?
    };

    if !ctx.admin && !artifact.published {
        return Err(ctx.wrap(ServerError::not_found(format!("{} '{name}' not found", ctx.kind))));
    }

    Ok(Json(artifact))
}

pub async fn get_readme(
    State(state): State<AppState>,
    ctx: RouteCtx,
    Path(params): Path<Vec<String>>,
) -> Result<impl IntoResponse, HandlerError> {
    let (name, version) = match params.as_slice() {
        [name] => (name.clone(), "latest".to_string()),
        [name, version] => (name.clone(), version.clone()),
        _ => return Err(ctx.wrap(ServerError::invalid_input("malformed readme path"))),
    };

    let version = if version == "latest" {
        state
            .registry
            .get_by_name(ctx.kind, &name)
            .await
            .map_err(|e| ctx.wrap(e))?
            .version
    } else {
        version
    };

    let readme = state
        .registry
        .get_readme(ctx.kind, &name, &version)
        .await
        .map_err(|e| ctx.wrap(e))?;

    Ok((
        [(axum::http::header::CONTENT_TYPE, readme.content_type.clone())],
        readme.content.clone(),
    ))
}

#[derive(Debug, Deserialize)]
pub struct PublishBody {
    pub value: serde_json::Value,
}

/// `CreateArtifact`, mounted at both `/admin/P/{kind}` and `/v0/publish`
/// (the admin path bypasses authz). Both routes share this handler; only
/// the route registration differs in whether the authz hook runs first.
pub async fn create(
    State(state): State<AppState>,
    ctx: RouteCtx,
    Json(body): Json<PublishBody>,
) -> Result<impl IntoResponse, HandlerError> {
    let artifact = state
        .registry
        .create_artifact(CreateArtifactInput { kind: ctx.kind, value: body.value })
        .await
        .map_err(|e| ctx.wrap(e))?;
    Ok((axum::http::StatusCode::CREATED, Json(artifact)))
}

#[derive(Debug, Deserialize)]
pub struct UpdateBody {
    pub value: serde_json::Value,
    pub new_status: Option<ArtifactStatus>,
}

pub async fn update(
    State(state): State<AppState>,
    ctx: RouteCtx,
    Path((name, version)): Path<(String, String)>,
    Json(body): Json<UpdateBody>,
) -> Result<impl IntoResponse, HandlerError> {
    let artifact = state
        .registry
        .update_artifact(UpdateArtifactInput {
            kind: ctx.kind,
            name,
            version,
            value: body.value,
            new_status: body.new_status,
        })
        .await
        .map_err(|e| ctx.wrap(e))?;
    Ok(Json(artifact))
}

pub async fn publish(
    State(state): State<AppState>,
    ctx: RouteCtx,
    Path((name, version)): Path<(String, String)>,
) -> Result<impl IntoResponse, HandlerError> {
    let artifact = state.registry.publish(ctx.kind, &name, &version).await.map_err(|e| ctx.wrap(e))?;
    Ok(Json(artifact))
}

pub async fn unpublish(
    State(state): State<AppState>,
    ctx: RouteCtx,
    Path((name, version)): Path<(String, String)>,
) -> Result<impl IntoResponse, HandlerError> {
    let artifact = state.registry.unpublish(ctx.kind, &name, &version).await.map_err(|e| ctx.wrap(e))?;
    Ok(Json(artifact))
}

pub async fn delete(
    State(state): State<AppState>,
    ctx: RouteCtx,
    Path((name, version)): Path<(String, String)>,
) -> Result<impl IntoResponse, HandlerError> {
    state.registry.delete_artifact(ctx.kind, &name, &version).await.map_err(|e| ctx.wrap(e))?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

pub async fn put_readme(
    State(state): State<AppState>,
    ctx: RouteCtx,
    Path((name, version)): Path<(String, String)>,
    body: axum::body::Bytes,
) -> Result<impl IntoResponse, HandlerError> {
    let sha256 = {
        use sha2::Digest;
        hex::encode(sha2::Sha256::digest(&body))
    };

    let readme = Readme {
        kind: ctx.kind,
        name,
        version,
        size: body.len() as i64,
        content: body.to_vec(),
        content_type: "text/markdown".to_string(),
        sha256,
        fetched_at: chrono::Utc::now(),
    };

    state.registry.upsert_readme(readme).await.map_err(|e| ctx.wrap(e))?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

