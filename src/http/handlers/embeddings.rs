use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::error::ServerError;
use crate::http::error_map::HandlerError;
use crate::jobs::{run_index, IndexOptions, JobId, JobType};
use crate::state::AppState;

fn admin_err(e: impl Into<ServerError>) -> HandlerError {
    HandlerError::admin(e)
}

#[derive(Debug, Deserialize)]
pub struct StartIndexBody {
    #[serde(flatten)]
    pub options: IndexOptions,
    #[serde(default)]
    pub stream: bool,
}

/// `POST /admin/P/embeddings/index` `stream: true` is
/// rejected here; the SSE variant is its own route (`sse::index_stream`).
pub async fn start_index(State(state): State<AppState>, Json(body): Json<StartIndexBody>) -> Result<impl IntoResponse, HandlerError> {
    if body.stream {
        return Err(admin_err(ServerError::invalid_input("stream:true is not accepted by this endpoint; use /embeddings/index/stream")));
    }
    body.options.validate().map_err(admin_err)?;

    let embedding_provider = match state.registry.embedding_provider() {
        Some(p) => p,
        None => return Err(admin_err(ServerError::unavailable("indexer not configured"))),
    };

    let job = state.jobs.create_job(JobType::Index).await.map_err(admin_err)?;
    state.jobs.mark_running(&job.id).await;

    let registry = state.registry.clone();
    let jobs = state.jobs.clone();
    let job_id = job.id.clone();
    let options = body.options;

    tokio::spawn(async move {
        let cancel = CancellationToken::new();
        let jobs_for_progress = jobs.clone();
        let job_id_for_progress = job_id.clone();
        let result = run_index(
            &registry,
            embedding_provider.as_ref(),
            &options,
            move |_kind, stats| {
                let jobs = jobs_for_progress.clone();
                let job_id = job_id_for_progress.clone();
                let progress = crate::jobs::JobProgress::from(stats);
                tokio::spawn(async move {
                    jobs.update_progress(&job_id, progress).await;
                });
            },
            &cancel,
        )
        .await;

        match result {
            Ok(outcome) => jobs.complete(&job_id, serde_json::to_value(outcome).unwrap_or_default()).await,
            Err(e) => jobs.fail(&job_id, serde_json::json!({ "error": e.to_string() })).await,
        }
    });

    Ok((axum::http::StatusCode::OK, Json(job)))
}

pub async fn job_status(State(state): State<AppState>, Path(job_id): Path<String>) -> Result<impl IntoResponse, HandlerError> {
    let job = state
        .jobs
        .get(&JobId(job_id))
        .await
        .ok_or_else(|| admin_err(ServerError::not_found("job not found")))?;
    Ok(Json(job))
}
