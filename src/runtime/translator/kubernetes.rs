use std::collections::BTreeMap;

use async_trait::async_trait;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams};
use kube::{Client, CustomResource};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::runtime::{DeploymentKey, DesiredResource, ReconcileOutcome};

use super::RuntimeTranslator;

/// Label applied to every resource this control plane owns, used both to
/// mark ownership and to scope label-selected list/delete: resources carry
/// `aregistry.ai/managed=true` for ownership detection, and deletion of
/// orphaned resources uses a label-selected list rather than tracking names
/// separately.
pub const LABEL_MANAGED: &str = "aregistry.ai/managed";
const LABEL_KEY: &str = "aregistry.ai/key";

fn managed_selector() -> String {
    format!("{LABEL_MANAGED}=true")
}

/// `Agent` custom resource: a long-running AI worker.
/// `mcp_server_refs` names the `MCPServer`/`RemoteMCPServer`
/// resources (by their Kubernetes object name) that this agent consumes,
/// already resolved by the Agent-Manifest Resolver.
#[derive(CustomResource, Clone, Debug, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "aregistry.ai",
    version = "v1",
    kind = "Agent",
    namespaced,
    shortname = "aagent"
)]
pub struct AgentSpec {
    pub artifact_name: String,
    pub artifact_version: String,
    pub image: String,
    pub env: BTreeMap<String, String>,
    pub mcp_server_refs: Vec<String>,
}

/// `MCPServer` custom resource: a local command-style MCP endpoint.
#[derive(CustomResource, Clone, Debug, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "aregistry.ai",
    version = "v1",
    kind = "MCPServer",
    namespaced,
    shortname = "amcp"
)]
pub struct MCPServerSpec {
    pub artifact_name: String,
    pub artifact_version: String,
    pub image: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
}

/// `RemoteMCPServer` custom resource: a URL-addressable MCP endpoint.
#[derive(CustomResource, Clone, Debug, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "aregistry.ai",
    version = "v1",
    kind = "RemoteMCPServer",
    namespaced,
    shortname = "aremotemcp"
)]
pub struct RemoteMCPServerSpec {
    pub artifact_name: String,
    pub artifact_version: String,
    pub url: String,
    pub headers: BTreeMap<String, String>,
}

fn object_name(key: &DeploymentKey) -> String {
    format!("{}-{}", key.name, key.version)
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' { c } else { '-' })
        .collect()
}

fn default_namespace(resource: &DesiredResource) -> String {
    resource
        .run_request
        .env
        .get("KAGENT_NAMESPACE")
        .cloned()
        .unwrap_or_else(|| "default".to_string())
}

fn is_remote(resource: &DesiredResource) -> bool {
    resource.run_request.prefer_remote
        || resource
            .run_request
            .artifact_ref
            .value
            .get("remotes")
            .and_then(|v| v.as_array())
            .map(|a| !a.is_empty())
            .unwrap_or(false)
}

fn remote_url(resource: &DesiredResource) -> String {
    resource
        .run_request
        .artifact_ref
        .value
        .get("remotes")
        .and_then(|v| v.as_array())
        .and_then(|a| a.first())
        .and_then(|r| r.get("url"))
        .and_then(|u| u.as_str())
        .unwrap_or_default()
        .to_string()
}

/// Names of the MCP servers an agent's manifest references, used to
/// populate `AgentSpec::mcp_server_refs`. These are the registry/inline
/// names from the manifest itself rather than resolved object names: the
/// child `MCPServer`/`RemoteMCPServer` resources are reconciled as their
/// own `DesiredResource` entries by the reconciler, so the agent only
/// needs enough to locate them by name at runtime.
fn mcp_server_refs(resource: &DesiredResource) -> Vec<String> {
    resource
        .run_request
        .artifact_ref
        .value
        .get("mcpServers")
        .and_then(|v| v.as_array())
        .map(|entries| {
            entries
                .iter()
                .filter_map(|entry| {
                    entry
                        .get("registryServerName")
                        .or_else(|| entry.get("name"))
                        .and_then(|v| v.as_str())
                        .map(|s| s.to_string())
                })
                .collect()
        })
        .unwrap_or_default()
}

fn image_of(resource: &DesiredResource) -> String {
    resource
        .run_request
        .artifact_ref
        .value
        .get("image")
        .and_then(|v| v.as_str())
        .unwrap_or(&resource.run_request.artifact_ref.name)
        .to_string()
}

/// Renders run requests into one of three namespaced custom resources and
/// converges the cluster toward them via a diff-and-apply loop, generalized
/// from raw `Service`/`Ingress` objects to this system's own CRDs.
pub struct KubernetesTranslator {
    client: Client,
}

impl KubernetesTranslator {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn apply_agent(&self, ns: &str, name: &str, resource: &DesiredResource, refs: Vec<String>) -> anyhow::Result<()> {
        let api: Api<Agent> = Api::namespaced(self.client.clone(), ns);
        let mut obj = Agent::new(
            name,
            AgentSpec {
                artifact_name: resource.key.name.clone(),
                artifact_version: resource.key.version.clone(),
                image: image_of(resource),
                env: resource.run_request.env.clone(),
                mcp_server_refs: refs,
            },
        );
        obj.metadata.labels = Some(labels(&resource.key));
        let patch = Patch::Apply(&obj);
        api.patch(name, &PatchParams::apply("aregistry-controller").force(), &patch)
            .await?;
        Ok(())
    }

    async fn apply_mcp(&self, ns: &str, name: &str, resource: &DesiredResource) -> anyhow::Result<()> {
        if is_remote(resource) {
            let api: Api<RemoteMCPServer> = Api::namespaced(self.client.clone(), ns);
            let mut obj = RemoteMCPServer::new(
                name,
                RemoteMCPServerSpec {
                    artifact_name: resource.key.name.clone(),
                    artifact_version: resource.key.version.clone(),
                    url: remote_url(resource),
                    headers: resource.run_request.headers.clone(),
                },
            );
            obj.metadata.labels = Some(labels(&resource.key));
            let patch = Patch::Apply(&obj);
            api.patch(name, &PatchParams::apply("aregistry-controller").force(), &patch)
                .await?;
        } else {
            let api: Api<MCPServer> = Api::namespaced(self.client.clone(), ns);
            let mut obj = MCPServer::new(
                name,
                MCPServerSpec {
                    artifact_name: resource.key.name.clone(),
                    artifact_version: resource.key.version.clone(),
                    image: image_of(resource),
                    args: resource.run_request.args.values().cloned().collect(),
                    env: resource.run_request.env.clone(),
                },
            );
            obj.metadata.labels = Some(labels(&resource.key));
            let patch = Patch::Apply(&obj);
            api.patch(name, &PatchParams::apply("aregistry-controller").force(), &patch)
                .await?;
        }
        Ok(())
    }

    async fn existing_names<K>(&self, ns: &str) -> anyhow::Result<Vec<String>>
    where
        K: kube::Resource<Scope = kube::core::NamespaceResourceScope>
            + Clone
            + std::fmt::Debug
            + for<'de> Deserialize<'de>
            + 'static,
        K::DynamicType: Default,
    {
        let api: Api<K> = Api::namespaced(self.client.clone(), ns);
        let list = api.list(&ListParams::default().labels(&managed_selector())).await?;
        Ok(list
            .items
            .into_iter()
            .filter_map(|item| item.meta().name.clone())
            .collect())
    }
}

fn labels(key: &DeploymentKey) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    map.insert(LABEL_MANAGED.to_string(), "true".to_string());
    map.insert(LABEL_KEY.to_string(), object_name(key));
    map
}

#[async_trait]
impl RuntimeTranslator for KubernetesTranslator {
    async fn reconcile(&self, desired: &[DesiredResource]) -> anyhow::Result<ReconcileOutcome> {
        let mut outcome = ReconcileOutcome::default();

        // Group desired resources by namespace; each namespace's managed
        // set is diffed independently since label-selected listing is
        // itself namespace-scoped.
        let mut by_namespace: BTreeMap<String, Vec<&DesiredResource>> = BTreeMap::new();
        for resource in desired {
            by_namespace
                .entry(default_namespace(resource))
                .or_default()
                .push(resource);
        }

        for (ns, resources) in &by_namespace {
            let existing_agents = self.existing_names::<Agent>(ns).await.unwrap_or_default();
            let existing_mcp = self.existing_names::<MCPServer>(ns).await.unwrap_or_default();
            let existing_remote = self.existing_names::<RemoteMCPServer>(ns).await.unwrap_or_default();

            for resource in resources {
                let name = object_name(&resource.key);
                let is_agent = resource.run_request.kind == crate::catalog::ArtifactKind::Agent;

                let result = if is_agent {
                    let refs = mcp_server_refs(resource);
                    self.apply_agent(ns, &name, resource, refs).await
                } else {
                    self.apply_mcp(ns, &name, resource).await
                };

                match result {
                    Ok(()) => {
                        let already_existed = existing_agents.contains(&name)
                            || existing_mcp.contains(&name)
                            || existing_remote.contains(&name);
                        if already_existed {
                            outcome.updated.push(resource.key.clone());
                        } else {
                            outcome.created.push(resource.key.clone());
                        }
                    }
                    Err(e) => outcome.failures.push((resource.key.clone(), e.to_string())),
                }
            }

            let desired_set: std::collections::BTreeSet<String> = resources
                .iter()
                .map(|r| object_name(&r.key))
                .collect();

            for orphan in existing_agents.iter().filter(|n| !desired_set.contains(*n)) {
                let api: Api<Agent> = Api::namespaced(self.client.clone(), ns);
                if api.delete(orphan, &DeleteParams::default()).await.is_ok() {
                    outcome.deleted.push(orphan.clone());
                }
            }
            for orphan in existing_mcp.iter().filter(|n| !desired_set.contains(*n)) {
                let api: Api<MCPServer> = Api::namespaced(self.client.clone(), ns);
                if api.delete(orphan, &DeleteParams::default()).await.is_ok() {
                    outcome.deleted.push(orphan.clone());
                }
            }
            for orphan in existing_remote.iter().filter(|n| !desired_set.contains(*n)) {
                let api: Api<RemoteMCPServer> = Api::namespaced(self.client.clone(), ns);
                if api.delete(orphan, &DeleteParams::default()).await.is_ok() {
                    outcome.deleted.push(orphan.clone());
                }
            }
        }

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ArtifactKind;

    #[test]
    fn object_name_is_dns_safe() {
        let key = DeploymentKey {
            kind: ArtifactKind::Server,
            name: "com.ex/Foo_Bar".to_string(),
            version: "1.0.0".to_string(),
        };
        let name = object_name(&key);
        assert!(name.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'));
    }
}
