use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::catalog::checksum;
use crate::runtime::{DeploymentKey, DesiredResource, ReconcileOutcome};

use super::RuntimeTranslator;

/// Deterministic gateway port for a deployment, derived from its key so
/// repeated reconciles of the same desired state allocate the same port
/// without persisting a separate port-assignment table.
fn gateway_port(key: &DeploymentKey) -> u16 {
    const FNV_OFFSET_BASIS: u64 = 0xcbf29ce484222325;
    const FNV_PRIME: u64 = 0x100000001b3;
    let mut hash = FNV_OFFSET_BASIS;
    for byte in key.to_string().bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    20_000 + (hash % 10_000) as u16
}

/// Filesystem-safe service name for a deployment key.
fn service_name(key: &DeploymentKey) -> String {
    format!("{}__{}__{}", key.kind, key.name, key.version)
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ComposeService {
    image: String,
    environment: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    command: Vec<String>,
    ports: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ComposeDocument {
    version: String,
    services: BTreeMap<String, ComposeService>,
}

/// One service + its resolved HTTP headers, written alongside the compose
/// file as a JSON sidecar config since `docker-compose.yml` has no header
/// concept of its own.
#[derive(Debug, Serialize, Deserialize)]
struct McpConfigEntry {
    service: String,
    gateway_port: u16,
    headers: BTreeMap<String, String>,
    prefer_remote: bool,
}

/// What was last written for this runtime target, used to diff on the next
/// reconcile instead of re-deriving state from the compose file's own
/// grammar by reading the last-applied manifest back from the working
/// directory.
#[derive(Debug, Default, Serialize, Deserialize)]
struct LastApplied {
    /// service name -> content checksum, so an unchanged desired resource
    /// reconciles as a no-op and applying the same desired state twice
    /// produces no mutations on the second pass.
    services: BTreeMap<String, String>,
}

/// Renders run requests into a single compose document with a sidecar
/// gateway per service Writes are serialized by an
/// in-process mutex standing in for the "process-wide mutex" 
/// calls for over the compose working directory.
pub struct ComposeTranslator {
    working_dir: PathBuf,
    write_lock: Mutex<()>,
}

impl ComposeTranslator {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    fn manifest_path(&self) -> PathBuf {
        self.working_dir.join("manifest.json")
    }

    fn compose_path(&self) -> PathBuf {
        self.working_dir.join("docker-compose.yml")
    }

    fn mcp_config_path(&self) -> PathBuf {
        self.working_dir.join("mcp-config.json")
    }

    async fn read_last_applied(&self) -> LastApplied {
        match tokio::fs::read(self.manifest_path()).await {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_default(),
            Err(_) => LastApplied::default(),
        }
    }
}

fn build_service(resource: &DesiredResource) -> (ComposeService, McpConfigEntry) {
    let req = &resource.run_request;
    let image = req
        .artifact_ref
        .value
        .get("image")
        .and_then(|v| v.as_str())
        .unwrap_or(&req.artifact_ref.name)
        .to_string();

    let command: Vec<String> = req.args.values().cloned().collect();
    let port = gateway_port(&resource.key);

    let service = ComposeService {
        image,
        environment: req.env.clone(),
        command,
        ports: vec![format!("{port}:{port}")],
    };

    let mcp_entry = McpConfigEntry {
        service: service_name(&resource.key),
        gateway_port: port,
        headers: req.headers.clone(),
        prefer_remote: req.prefer_remote,
    };

    (service, mcp_entry)
}

fn checksum_of(service: &ComposeService, entry: &McpConfigEntry) -> String {
    let payload = serde_json::json!({ "service": service, "mcp": entry });
    hex::encode(sha2::Sha256::digest(&checksum::canonical_bytes(&payload)))
}

use sha2::Digest;

#[async_trait]
impl RuntimeTranslator for ComposeTranslator {
    async fn reconcile(&self, desired: &[DesiredResource]) -> anyhow::Result<ReconcileOutcome> {
        let _guard = self.write_lock.lock().await;
        tokio::fs::create_dir_all(&self.working_dir).await?;

        let previous = self.read_last_applied().await;
        let mut outcome = ReconcileOutcome::default();

        let mut services = BTreeMap::new();
        let mut mcp_entries = BTreeMap::new();
        let mut current = LastApplied::default();

        for resource in desired {
            let name = service_name(&resource.key);
            let (service, mcp_entry) = build_service(resource);
            let sum = checksum_of(&service, &mcp_entry);

            match previous.services.get(&name) {
                None => outcome.created.push(resource.key.clone()),
                Some(prev_sum) if prev_sum != &sum => outcome.updated.push(resource.key.clone()),
                Some(_) => {}
            }

            current.services.insert(name.clone(), sum);
            services.insert(name.clone(), service);
            mcp_entries.insert(name, mcp_entry);
        }

        for name in previous.services.keys() {
            if !current.services.contains_key(name) {
                outcome.deleted.push(name.clone());
            }
        }

        let document = ComposeDocument {
            version: "3.9".to_string(),
            services,
        };

        let compose_yaml = serde_yaml::to_string(&document)?;
        tokio::fs::write(self.compose_path(), compose_yaml).await?;
        tokio::fs::write(
            self.mcp_config_path(),
            serde_json::to_vec_pretty(&mcp_entries)?,
        )
        .await?;
        tokio::fs::write(self.manifest_path(), serde_json::to_vec(&current)?).await?;

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ArtifactKind;
    use crate::deployment::{ArtifactRef, RunRequest};
    use std::collections::BTreeMap as Map;

    fn resource(name: &str, version: &str) -> DesiredResource {
        DesiredResource {
            key: DeploymentKey {
                kind: ArtifactKind::Server,
                name: name.to_string(),
                version: version.to_string(),
            },
            run_request: RunRequest {
                kind: ArtifactKind::Server,
                artifact_ref: ArtifactRef {
                    name: name.to_string(),
                    version: version.to_string(),
                    value: serde_json::json!({"image": "example/server:1"}),
                },
                env: Map::new(),
                args: Map::new(),
                headers: Map::new(),
                prefer_remote: false,
            },
            synthesized: false,
        }
    }

    #[tokio::test]
    async fn first_reconcile_creates_everything() {
        let dir = tempfile::tempdir().unwrap();
        let translator = ComposeTranslator::new(dir.path());
        let desired = vec![resource("com.ex/foo", "1.0.0")];
        let outcome = translator.reconcile(&desired).await.unwrap();
        assert_eq!(outcome.created.len(), 1);
        assert!(outcome.updated.is_empty());
        assert!(outcome.deleted.is_empty());
    }

    #[tokio::test]
    async fn repeated_reconcile_with_same_state_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let translator = ComposeTranslator::new(dir.path());
        let desired = vec![resource("com.ex/foo", "1.0.0")];
        translator.reconcile(&desired).await.unwrap();
        let second = translator.reconcile(&desired).await.unwrap();
        assert!(second.created.is_empty());
        assert!(second.updated.is_empty());
        assert!(second.deleted.is_empty());
    }

    #[tokio::test]
    async fn removed_resource_is_reported_as_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let translator = ComposeTranslator::new(dir.path());
        translator
            .reconcile(&[resource("com.ex/foo", "1.0.0")])
            .await
            .unwrap();
        let outcome = translator.reconcile(&[]).await.unwrap();
        assert_eq!(outcome.deleted.len(), 1);
    }

    #[test]
    fn gateway_port_is_deterministic() {
        let key = DeploymentKey {
            kind: ArtifactKind::Server,
            name: "com.ex/foo".to_string(),
            version: "1.0.0".to_string(),
        };
        assert_eq!(gateway_port(&key), gateway_port(&key));
    }
}
