use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::catalog::ArtifactKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text")]
#[serde(rename_all = "snake_case")]
pub enum RuntimeKind {
    Local,
    Kubernetes,
}

impl RuntimeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuntimeKind::Local => "local",
            RuntimeKind::Kubernetes => "kubernetes",
        }
    }
}

impl std::fmt::Display for RuntimeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text")]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    Mcp,
    Agent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text")]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    Active,
    Failed,
}

/// A `Deployment.config` entry split by key prefix at construction time, so
/// downstream translators consume `env`/`args`/`headers` directly and never
/// parse prefixes themselves.
///
/// Keys are sorted (`BTreeMap`) rather than caller-insertion-ordered: the
/// wire format is a JSON object and this crate doesn't carry `indexmap`, so
/// ordering is made deterministic-by-key instead of preserved-by-arrival.
/// Reconciliation only cares about the resulting set of env/arg/header
/// pairs, not their original sequence, so this is behavior-preserving.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedConfig {
    pub env: BTreeMap<String, String>,
    pub args: BTreeMap<String, String>,
    pub headers: BTreeMap<String, String>,
}

pub fn split_config(raw: &serde_json::Value) -> ResolvedConfig {
    let mut resolved = ResolvedConfig::default();
    let Some(map) = raw.as_object() else {
        return resolved;
    };

    for (key, value) in map {
        let Some(value) = value.as_str() else { continue };
        if let Some(arg_key) = key.strip_prefix("ARG_") {
            resolved.args.insert(arg_key.to_string(), value.to_string());
        } else if let Some(header_key) = key.strip_prefix("HEADER_") {
            resolved.headers.insert(header_key.to_string(), value.to_string());
        } else {
            resolved.env.insert(key.clone(), value.to_string());
        }
    }
    resolved
}

/// Desired-state row for one deployed artifact version
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deployment {
    pub kind: ArtifactKind,
    pub name: String,
    pub version: String,
    pub status: DeploymentStatus,
    pub runtime: RuntimeKind,
    pub resource_type: ResourceType,
    pub config: serde_json::Value,
    pub prefer_remote: bool,
    pub deployed_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub is_external: bool,
}

impl Deployment {
    pub fn resolved_config(&self) -> ResolvedConfig {
        split_config(&self.config)
    }
}

#[derive(Debug, Clone, Default)]
pub struct DeploymentFilter {
    pub runtime: Option<RuntimeKind>,
    pub resource_type: Option<ResourceType>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn splits_prefixed_keys_by_destination() {
        let raw = json!({
            "ARG_verbose": "true",
            "HEADER_Authorization": "Bearer xyz",
            "API_KEY": "secret",
        });
        let resolved = split_config(&raw);
        assert_eq!(resolved.args.get("verbose"), Some(&"true".to_string()));
        assert_eq!(
            resolved.headers.get("Authorization"),
            Some(&"Bearer xyz".to_string())
        );
        assert_eq!(resolved.env.get("API_KEY"), Some(&"secret".to_string()));
    }

    #[test]
    fn empty_config_splits_to_empty() {
        let resolved = split_config(&json!({}));
        assert!(resolved.env.is_empty() && resolved.args.is_empty() && resolved.headers.is_empty());
    }
}
