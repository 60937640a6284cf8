use std::sync::Arc;

use sqlx::PgPool;

use crate::authz::AuthzHook;
use crate::deployment::RuntimeKind;
use crate::embeddings::EmbeddingProvider;
use crate::jobs::JobManager;
use crate::registry::RegistryService;
use crate::runtime::translator::RuntimeTranslator;
use crate::runtime::Reconciler;
use crate::settings::Settings;

/// Process-wide collaborator bundle handed to every HTTP handler:
/// constructor-injected `Arc<dyn ...>` collaborators, not ambient globals.
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub registry: RegistryService,
    pub authz: Arc<dyn AuthzHook>,
    pub jobs: Arc<JobManager>,
    pub reconciler: Arc<Reconciler>,
    pub settings: Arc<Settings>,
}

impl AppState {
    pub fn new(
        pool: PgPool,
        registry: RegistryService,
        authz: Arc<dyn AuthzHook>,
        jobs: Arc<JobManager>,
        reconciler: Arc<Reconciler>,
        settings: Arc<Settings>,
    ) -> Self {
        Self {
            pool,
            registry,
            authz,
            jobs,
            reconciler,
            settings,
        }
    }
}

/// Builds the compose translator this process always carries — the
/// Kubernetes translator is added separately in `main` since constructing a
/// `kube::Client` requires an async call, splitting translator setup
/// across the sync and async portions of startup.
pub fn local_translator(settings: &Settings) -> (RuntimeKind, Arc<dyn RuntimeTranslator>) {
    (
        RuntimeKind::Local,
        Arc::new(crate::runtime::translator::compose::ComposeTranslator::new(
            settings.deployment_runtime.compose_working_dir.clone(),
        )),
    )
}
