use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

/// Top-level configuration for the `aregistry` process.
///
/// Loaded from an optional `aregistry.toml` in the working directory, then
/// overridden by environment variables prefixed `AREGISTRY_` (double
/// underscore as the nesting separator, e.g. `AREGISTRY_SERVER__PORT=9000`).
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub database: DatabaseSettings,
    #[serde(default)]
    pub controller: ControllerSettings,
    #[serde(default)]
    pub embedding: EmbeddingSettings,
    #[serde(default)]
    pub deployment_runtime: DeploymentRuntimeSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_public_url")]
    pub public_url: String,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_public_url() -> String {
    "http://localhost:8080".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseSettings {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    10
}

/// Intervals for the reconciler and job manager background loops.
#[derive(Debug, Deserialize, Clone)]
pub struct ControllerSettings {
    /// How often ReconcileAll runs even without an explicit deploy/remove trigger.
    #[serde(default = "default_reconcile_interval")]
    pub reconcile_interval_secs: u64,
    /// Job TTL — terminal jobs older than this are evicted (1h).
    #[serde(default = "default_job_ttl")]
    pub job_ttl_secs: u64,
    /// Job reaper tick interval (10 minutes).
    #[serde(default = "default_job_reap_interval")]
    pub job_reap_interval_secs: u64,
}

fn default_reconcile_interval() -> u64 {
    15
}

fn default_job_ttl() -> u64 {
    3600
}

fn default_job_reap_interval() -> u64 {
    600
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            reconcile_interval_secs: default_reconcile_interval(),
            job_ttl_secs: default_job_ttl(),
            job_reap_interval_secs: default_job_reap_interval(),
        }
    }
}

/// Embedding provider selection. `none` disables semantic search entirely
/// (Semantic filters then fail with a 503
/// "503 if indexer not configured").
#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "provider", rename_all = "snake_case")]
pub enum EmbeddingSettings {
    None,
    Hash { dimensions: usize },
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        EmbeddingSettings::Hash { dimensions: 256 }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DeploymentRuntimeSettings {
    /// Base directory the compose translator renders service/gateway files under.
    #[serde(default = "default_compose_dir")]
    pub compose_working_dir: String,
    /// Path to a kubeconfig file; when absent, in-cluster config is inferred.
    #[serde(default)]
    pub kubeconfig: Option<String>,
}

fn default_compose_dir() -> String {
    "/var/lib/aregistry/compose".to_string()
}

impl Default for DeploymentRuntimeSettings {
    fn default() -> Self {
        Self {
            compose_working_dir: default_compose_dir(),
            kubeconfig: None,
        }
    }
}

impl Settings {
    /// Load settings from `aregistry.toml` (if present) layered with
    /// `AREGISTRY_*` environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name("aregistry").required(false))
            .add_source(Environment::with_prefix("AREGISTRY").separator("__"))
            .build()?;

        config.try_deserialize()
    }
}
