use std::sync::Arc;

use dashmap::DashMap;
use sqlx::PgPool;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{error, info, warn};

use crate::catalog::ArtifactKind;
use crate::deployment::{
    resolve_agent_manifest, store as deployment_store, ArtifactRef, DeploymentFilter,
    DeploymentStatus, ResourceType, RunRequest, RuntimeKind,
};

use super::translator::RuntimeTranslator;
use super::{DeploymentKey, DesiredResource, ReconcileOutcome};

/// Drives the Deployment table onto its runtime targets
///
/// One writer lock per runtime target (`RuntimeKind`) is held across the
/// whole reconcile pass so a concurrent `PATCH /deployments/{...}` and the
/// periodic `ReconcileAll` tick never race on the same translator's working
/// state — the same per-target serialization the compose translator's own
/// internal mutex gives it, lifted a level up so Kubernetes gets it too.
pub struct Reconciler {
    pool: PgPool,
    translators: Vec<(RuntimeKind, Arc<dyn RuntimeTranslator>)>,
    writer_locks: DashMap<RuntimeKind, Arc<AsyncMutex<()>>>,
}

impl Reconciler {
    pub fn new(pool: PgPool, translators: Vec<(RuntimeKind, Arc<dyn RuntimeTranslator>)>) -> Self {
        Self {
            pool,
            translators,
            writer_locks: DashMap::new(),
        }
    }

    fn lock_for(&self, runtime: RuntimeKind) -> Arc<AsyncMutex<()>> {
        self.writer_locks
            .entry(runtime)
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    fn translator_for(&self, runtime: RuntimeKind) -> Option<Arc<dyn RuntimeTranslator>> {
        self.translators
            .iter()
            .find(|(k, _)| *k == runtime)
            .map(|(_, t)| t.clone())
    }

    /// Reconciles every runtime target that has at least one deployment row.
    /// Algorithm:
    /// 1. snapshot the Deployment table
    /// 2. group by runtime target
    /// 3. expand agent manifests into concrete child run requests
    /// 4. hand each group to its translator
    /// 5. report the first error; mark affected rows `status = failed`
    pub async fn reconcile_all(&self) -> ReconcileOutcome {
        let mut combined = ReconcileOutcome::default();

        let deployments = match deployment_store::list(&self.pool, &DeploymentFilter::default()).await {
            Ok(rows) => rows,
            Err(e) => {
                error!(error = %e, "failed to list deployments for reconcile");
                combined
                    .failures
                    .push((
                        DeploymentKey {
                            kind: ArtifactKind::Server,
                            name: String::new(),
                            version: String::new(),
                        },
                        format!("listing deployments: {e}"),
                    ));
                return combined;
            }
        };

        for runtime in [RuntimeKind::Local, RuntimeKind::Kubernetes] {
            let group: Vec<_> = deployments.iter().filter(|d| d.runtime == runtime && !d.is_external).collect();
            if group.is_empty() {
                continue;
            }

            let Some(translator) = self.translator_for(runtime) else {
                warn!(%runtime, "no translator configured for runtime target with pending deployments");
                for d in &group {
                    combined.failures.push((
                        DeploymentKey { kind: d.kind, name: d.name.clone(), version: d.version.clone() },
                        format!("unsupported runtime target: {runtime}"),
                    ));
                }
                continue;
            };

            let lock = self.lock_for(runtime);
            let _guard = lock.lock().await;

            let mut desired = Vec::new();
            for d in &group {
                let key = DeploymentKey { kind: d.kind, name: d.name.clone(), version: d.version.clone() };
                let resolved = d.resolved_config();

                if d.resource_type == ResourceType::Agent {
                    // The agent's own value (manifest) lives behind the catalog;
                    // the deployment row only carries config overrides, so the
                    // manifest must be fetched to expand `registry`-typed
                    // mcpServers entries into their own desired resources.
                    let artifact = crate::catalog::store::get_by_name_and_version(
                        &self.pool,
                        d.kind,
                        &d.name,
                        &d.version,
                        false,
                    )
                    .await;

                    let manifest = match artifact {
                        Ok(Some(a)) => a.value,
                        Ok(None) => {
                            combined.failures.push((key.clone(), "deployed agent artifact no longer exists".to_string()));
                            continue;
                        }
                        Err(e) => {
                            combined.failures.push((key.clone(), format!("loading agent manifest: {e}")));
                            continue;
                        }
                    };

                    // Propagate the agent's namespace to its synthesized children before
                    // `resolved.env` is moved into the agent's own RunRequest below.
                    let kagent_namespace = resolved.env.get("KAGENT_NAMESPACE").cloned();

                    desired.push(DesiredResource {
                        key: key.clone(),
                        run_request: RunRequest {
                            kind: d.kind,
                            artifact_ref: ArtifactRef { name: d.name.clone(), version: d.version.clone(), value: manifest.clone() },
                            env: resolved.env,
                            args: resolved.args,
                            headers: resolved.headers,
                            prefer_remote: d.prefer_remote,
                        },
                        synthesized: false,
                    });

                    match resolve_agent_manifest(&self.pool, &manifest).await {
                        Ok(children) => {
                            for (i, mut child) in children.into_iter().enumerate() {
                                if let Some(namespace) = &kagent_namespace {
                                    child.env.entry("KAGENT_NAMESPACE".to_string()).or_insert_with(|| namespace.clone());
                                }
                                desired.push(DesiredResource {
                                    key: DeploymentKey {
                                        kind: child.kind,
                                        name: format!("{}::{}", d.name, child.artifact_ref.name),
                                        version: format!("{}#{i}", child.artifact_ref.version),
                                    },
                                    run_request: child,
                                    synthesized: true,
                                });
                            }
                        }
                        Err(e) => {
                            combined.failures.push((key.clone(), format!("resolving agent manifest: {e}")));
                        }
                    }
                } else {
                    let artifact_value = crate::catalog::store::get_by_name_and_version(
                        &self.pool,
                        d.kind,
                        &d.name,
                        &d.version,
                        false,
                    )
                    .await
                    .ok()
                    .flatten()
                    .map(|a| a.value)
                    .unwrap_or(serde_json::Value::Null);

                    desired.push(DesiredResource {
                        key: key.clone(),
                        run_request: RunRequest {
                            kind: d.kind,
                            artifact_ref: ArtifactRef { name: d.name.clone(), version: d.version.clone(), value: artifact_value },
                            env: resolved.env,
                            args: resolved.args,
                            headers: resolved.headers,
                            prefer_remote: d.prefer_remote,
                        },
                        synthesized: false,
                    });
                }
            }

            match translator.reconcile(&desired).await {
                Ok(outcome) => {
                    info!(
                        %runtime,
                        created = outcome.created.len(),
                        updated = outcome.updated.len(),
                        deleted = outcome.deleted.len(),
                        failed = outcome.failures.len(),
                        "reconciled runtime target"
                    );
                    for (key, msg) in &outcome.failures {
                        if let Err(e) = deployment_store::update_status(&self.pool, key.kind, &key.name, &key.version, DeploymentStatus::Failed).await {
                            error!(error = %e, %key, "failed to mark deployment row as failed");
                        }
                        warn!(%key, error = %msg, "resource failed to converge");
                    }
                    combined.created.extend(outcome.created);
                    combined.updated.extend(outcome.updated);
                    combined.deleted.extend(outcome.deleted);
                    combined.failures.extend(outcome.failures);
                }
                Err(e) => {
                    error!(%runtime, error = %e, "translator reconcile call failed outright");
                    for d in &group {
                        let key = DeploymentKey { kind: d.kind, name: d.name.clone(), version: d.version.clone() };
                        let _ = deployment_store::update_status(&self.pool, d.kind, &d.name, &d.version, DeploymentStatus::Failed).await;
                        combined.failures.push((key, e.to_string()));
                    }
                }
            }
        }

        combined
    }

    /// Spawns a background loop that calls `reconcile_all` every
    /// `interval_secs`, even without an explicit trigger, returning its join
    /// handle so the caller can track/abort it during shutdown.
    pub fn spawn_ticker(self: Arc<Self>, interval_secs: u64) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_secs(interval_secs));
            loop {
                ticker.tick().await;
                let outcome = self.reconcile_all().await;
                if let Some(err) = outcome.first_error() {
                    warn!(error = %err, "periodic reconcile completed with at least one failure");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unconnected_pool() -> sqlx::PgPool {
        sqlx::postgres::PgPoolOptions::new()
            .max_connections(1)
            .connect_lazy("postgres://localhost/unused")
            .expect("lazy pool construction never touches the network")
    }

    #[tokio::test]
    async fn reconcile_all_with_no_deployments_is_a_noop() {
        let reconciler = Reconciler::new(unconnected_pool(), Vec::new());
        let outcome = reconciler.reconcile_all().await;
        assert!(outcome.created.is_empty());
        assert!(outcome.failures.is_empty());
    }
}
