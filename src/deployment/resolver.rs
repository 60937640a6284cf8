use std::collections::BTreeMap;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::catalog::{store as catalog_store, ArtifactKind};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub name: String,
    pub version: String,
    pub value: serde_json::Value,
}

/// Ephemeral run request assembled during reconciliation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRequest {
    pub kind: ArtifactKind,
    pub artifact_ref: ArtifactRef,
    pub env: BTreeMap<String, String>,
    pub args: BTreeMap<String, String>,
    pub headers: BTreeMap<String, String>,
    pub prefer_remote: bool,
}

/// Expands an agent manifest's `mcpServers` list into concrete run requests,
/// looking up `registry`-typed entries in the local Catalog Store. Non-
/// `registry` entries are passed through as their own run request untouched.
///
/// A `registry` entry is always resolved against the local server catalog;
/// an explicit `registryURL` naming a different registry is rejected rather
/// than silently ignored, since cross-registry resolution is out of scope
/// for this release.
///
/// Resolution is a single pass over `mcpServers`: a resolved entry is always
/// a server, which has no `mcpServers` of its own to walk, so there is no
/// recursive expansion or cycle to guard against here.
///
/// Fails loud (returns `Err`) when a `registry` entry names a server that
/// doesn't exist or isn't published, or names an unsupported external
/// registry.
pub async fn resolve_agent_manifest(pool: &PgPool, manifest: &serde_json::Value) -> Result<Vec<RunRequest>> {
    let entries: Vec<serde_json::Value> = manifest
        .get("mcpServers")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();

    let mut resolved = Vec::with_capacity(entries.len());
    for entry in entries {
        let entry_type = entry.get("type").and_then(|v| v.as_str()).unwrap_or("");

        if entry_type == "registry" {
            if let Some(registry_url) = entry.get("registryURL").and_then(|v| v.as_str()) {
                if !registry_url.is_empty() {
                    anyhow::bail!("registry mcpServers entry names an external registryURL '{registry_url}'; cross-registry resolution is not supported");
                }
            }

            let name = entry
                .get("registryServerName")
                .and_then(|v| v.as_str())
                .context("registry mcpServers entry missing registryServerName")?;
            let version = entry
                .get("registryServerVersion")
                .and_then(|v| v.as_str())
                .unwrap_or("latest");
            let prefer_remote = entry
                .get("registryServerPreferRemote")
                .and_then(|v| v.as_bool())
                .unwrap_or(false);

            let artifact = catalog_store::get_by_name_and_version(
                pool,
                ArtifactKind::Server,
                name,
                version,
                true,
            )
            .await?
            .with_context(|| format!("registry mcp server {name}@{version} not found or not published"))?;

            resolved.push(RunRequest {
                kind: ArtifactKind::Server,
                artifact_ref: ArtifactRef {
                    name: artifact.name,
                    version: artifact.version,
                    value: artifact.value,
                },
                env: BTreeMap::new(),
                args: BTreeMap::new(),
                headers: BTreeMap::new(),
                prefer_remote,
            });
        } else {
            let name = entry
                .get("name")
                .and_then(|v| v.as_str())
                .unwrap_or("unnamed")
                .to_string();
            resolved.push(RunRequest {
                kind: ArtifactKind::Server,
                artifact_ref: ArtifactRef {
                    name,
                    version: "inline".to_string(),
                    value: entry,
                },
                env: BTreeMap::new(),
                args: BTreeMap::new(),
                headers: BTreeMap::new(),
                prefer_remote: false,
            });
        }
    }

    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn unconnected_pool() -> sqlx::PgPool {
        sqlx::postgres::PgPoolOptions::new()
            .max_connections(1)
            .connect_lazy("postgres://localhost/unused")
            .expect("lazy pool construction never touches the network")
    }

    #[tokio::test]
    async fn empty_manifest_resolves_to_empty() {
        let pool = unconnected_pool();
        let resolved = resolve_agent_manifest(&pool, &json!({})).await.unwrap();
        assert!(resolved.is_empty());
    }

    #[tokio::test]
    async fn non_registry_entry_passes_through() {
        let pool = unconnected_pool();
        let manifest = json!({
            "mcpServers": [{"type": "local", "name": "inline-tool", "command": "echo"}],
        });
        let resolved = resolve_agent_manifest(&pool, &manifest).await.unwrap();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].artifact_ref.name, "inline-tool");
    }

    #[tokio::test]
    async fn registry_entry_with_external_url_is_rejected() {
        let pool = unconnected_pool();
        let manifest = json!({
            "mcpServers": [{
                "type": "registry",
                "registryServerName": "com.ex/db",
                "registryURL": "https://other-registry.example/api",
            }],
        });
        let result = resolve_agent_manifest(&pool, &manifest).await;
        assert!(result.is_err());
    }

    #[sqlx::test]
    async fn registry_entry_resolves_published_server(pool: PgPool) {
        use crate::registry::{CreateArtifactInput, RegistryService};

        let registry = RegistryService::new(pool.clone(), None);
        let server = registry
            .create_artifact(CreateArtifactInput {
                kind: ArtifactKind::Server,
                value: json!({"name": "com.ex/db", "version": "1.0.0", "command": "db-mcp"}),
            })
            .await
            .unwrap();
        registry
            .publish(ArtifactKind::Server, &server.name, &server.version)
            .await
            .unwrap();

        let manifest = json!({
            "mcpServers": [{
                "type": "registry",
                "registryServerName": "com.ex/db",
                "registryServerVersion": "1.0.0",
            }],
        });
        let resolved = resolve_agent_manifest(&pool, &manifest).await.unwrap();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].artifact_ref.name, "com.ex/db");
        assert_eq!(resolved[0].artifact_ref.version, "1.0.0");
    }

    #[sqlx::test]
    async fn registry_entry_naming_unpublished_server_fails(pool: PgPool) {
        let manifest = json!({
            "mcpServers": [{"type": "registry", "registryServerName": "com.ex/missing"}],
        });
        let result = resolve_agent_manifest(&pool, &manifest).await;
        assert!(result.is_err());
    }
}
