use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::Json;
use futures::stream::Stream;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::ServerError;
use crate::http::error_map::HandlerError;
use crate::jobs::{run_index, IndexOptions, JobProgress, JobType};
use crate::state::AppState;

fn admin_err(e: impl Into<ServerError>) -> HandlerError {
    HandlerError::admin(e)
}

#[derive(Debug, serde::Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamEvent {
    Started { job_id: String },
    Progress { job_id: String, resource: String, stats: JobProgress },
    Completed { job_id: String, result: serde_json::Value },
    Error { job_id: String, error: String },
}

/// Cancels the backing `CancellationToken` when the SSE stream's generator
/// state is dropped, which happens the moment the client disconnects and
/// axum stops polling the body.
struct CancelOnDrop(CancellationToken);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

#[derive(Debug, Deserialize)]
pub struct StreamBody {
    #[serde(flatten)]
    pub options: IndexOptions,
}

/// `POST /admin/P/embeddings/index/stream`: SSE variant of `start_index`,
/// mounted as a raw handler rather than part of the typed REST layer.
pub async fn index_stream(
    State(state): State<AppState>,
    Json(body): Json<StreamBody>,
) -> Result<impl IntoResponse, HandlerError> {
    body.options.validate().map_err(admin_err)?;

    let embedding_provider = state
        .registry
        .embedding_provider()
        .ok_or_else(|| admin_err(ServerError::unavailable("indexer not configured")))?;

    let job = state.jobs.create_job(JobType::Index).await.map_err(admin_err)?;
    state.jobs.mark_running(&job.id).await;

    let (tx, mut rx) = mpsc::unbounded_channel::<StreamEvent>();
    let cancel = CancellationToken::new();

    let registry = state.registry.clone();
    let jobs = state.jobs.clone();
    let job_id = job.id.clone();
    let options = body.options;
    let run_cancel = cancel.clone();

    let _ = tx.send(StreamEvent::Started { job_id: job_id.to_string() });

    tokio::spawn(async move {
        let progress_tx = tx.clone();
        let progress_job_id = job_id.clone();
        let jobs_for_progress = jobs.clone();
        let job_id_for_progress = job_id.clone();

        let result = run_index(
            &registry,
            embedding_provider.as_ref(),
            &options,
            move |kind, stats| {
                let progress = JobProgress::from(stats);
                let _ = progress_tx.send(StreamEvent::Progress {
                    job_id: progress_job_id.to_string(),
                    resource: kind.path_segment().to_string(),
                    stats: progress.clone(),
                });
                let jobs = jobs_for_progress.clone();
                let job_id = job_id_for_progress.clone();
                tokio::spawn(async move {
                    jobs.update_progress(&job_id, progress).await;
                });
            },
            &run_cancel,
        )
        .await;

        match result {
            Ok(outcome) => {
                let value = serde_json::to_value(&outcome).unwrap_or_default();
                jobs.complete(&job_id, value.clone()).await;
                let _ = tx.send(StreamEvent::Completed { job_id: job_id.to_string(), result: value });
            }
            Err(e) => {
                let value = serde_json::json!({ "error": e.to_string() });
                jobs.fail(&job_id, value).await;
                let _ = tx.send(StreamEvent::Error { job_id: job_id.to_string(), error: e.to_string() });
            }
        }
    });

    let stream = async_stream::stream! {
        let _guard = CancelOnDrop(cancel);
        while let Some(event) = rx.recv().await {
            let is_terminal = matches!(event, StreamEvent::Completed { .. } | StreamEvent::Error { .. });
            let payload = serde_json::to_string(&event).unwrap_or_default();
            yield Ok::<_, std::convert::Infallible>(Event::default().data(payload));
            if is_terminal {
                break;
            }
        }
    };

    Ok(sse_response(stream))
}

fn sse_response(stream: impl Stream<Item = Result<Event, std::convert::Infallible>> + Send + 'static) -> impl IntoResponse {
    let sse = Sse::new(stream).keep_alive(KeepAlive::default());
    let mut response = sse.into_response();
    response.headers_mut().insert(
        "X-Accel-Buffering",
        axum::http::HeaderValue::from_static("no"),
    );
    response
}
