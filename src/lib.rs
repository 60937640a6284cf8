pub mod authz;
pub mod catalog;
pub mod deployment;
pub mod embeddings;
pub mod error;
pub mod http;
pub mod jobs;
pub mod registry;
pub mod runtime;
pub mod settings;
pub mod state;

use std::sync::Arc;

use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use tracing::info;

use authz::AllowAll;
use deployment::RuntimeKind;
use embeddings::{EmbeddingProvider, HashEmbeddingProvider};
use jobs::JobManager;
use registry::RegistryService;
use runtime::translator::RuntimeTranslator;
use runtime::Reconciler;
use settings::{EmbeddingSettings, Settings};
use state::AppState;

fn build_embedding_provider(settings: &EmbeddingSettings) -> Option<Arc<dyn EmbeddingProvider>> {
    match settings {
        EmbeddingSettings::None => None,
        EmbeddingSettings::Hash { dimensions } => Some(Arc::new(HashEmbeddingProvider::new(*dimensions))),
    }
}

#[cfg(feature = "kubernetes")]
async fn kubernetes_translator(settings: &Settings) -> Result<(RuntimeKind, Arc<dyn RuntimeTranslator>)> {
    rustls::crypto::ring::default_provider().install_default().ok();

    let kube_config = match &settings.deployment_runtime.kubeconfig {
        Some(path) => {
            let kubeconfig = kube::config::Kubeconfig::read_from(path)?;
            kube::Config::from_custom_kubeconfig(kubeconfig, &kube::config::KubeConfigOptions::default()).await?
        }
        None => kube::Config::infer().await?,
    };
    let client = kube::Client::try_from(kube_config)?;

    Ok((
        RuntimeKind::Kubernetes,
        Arc::new(runtime::translator::kubernetes::KubernetesTranslator::new(client)),
    ))
}

/// Builds every collaborator, wires the background loops, and serves the
/// HTTP API until a shutdown signal arrives: async `AppState` construction,
/// controllers spawned as background tasks before the listener binds,
/// graceful shutdown on SIGINT/SIGTERM.
pub async fn run_server(settings: Settings) -> Result<()> {
    let pool = PgPoolOptions::new()
        .max_connections(settings.database.max_connections)
        .connect(&settings.database.url)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    let embedding_provider = build_embedding_provider(&settings.embedding);
    let registry = RegistryService::new(pool.clone(), embedding_provider);
    let jobs = Arc::new(JobManager::new(settings.controller.job_ttl_secs));
    let authz = Arc::new(AllowAll) as Arc<dyn authz::AuthzHook>;

    let mut translators = vec![state::local_translator(&settings)];
    #[cfg(feature = "kubernetes")]
    {
        if settings.deployment_runtime.kubeconfig.is_some() || std::env::var("KUBERNETES_SERVICE_HOST").is_ok() {
            match kubernetes_translator(&settings).await {
                Ok(translator) => translators.push(translator),
                Err(e) => info!(error = %e, "Kubernetes translator not available, continuing without it"),
            }
        }
    }

    let reconciler = Arc::new(Reconciler::new(pool.clone(), translators));
    let settings = Arc::new(settings);

    let state = AppState::new(pool, registry, authz, jobs.clone(), reconciler.clone(), settings.clone());

    let _reconcile_ticker = reconciler.spawn_ticker(settings.controller.reconcile_interval_secs);
    let _job_reaper = jobs.spawn_reaper(settings.controller.job_reap_interval_secs);
    info!("Background reconcile and job-reap loops started");

    let app = http::build_router(state);

    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    info!("HTTP server listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

    info!("HTTP server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT, shutting down gracefully"),
        _ = terminate => info!("Received SIGTERM, shutting down gracefully"),
    }
}
