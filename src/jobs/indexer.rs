use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::catalog::{ArtifactFilter, ArtifactKind, ArtifactVersion};
use crate::embeddings::EmbeddingProvider;
use crate::registry::RegistryService;

use super::manager::JobProgress;

/// Request body for `POST /admin/P/embeddings/index`
#[derive(Debug, Clone, Deserialize)]
pub struct IndexOptions {
    #[serde(default = "default_batch_size")]
    pub batch_size: i64,
    #[serde(default)]
    pub force: bool,
    #[serde(default)]
    pub dry_run: bool,
    pub include_servers: Option<bool>,
    pub include_agents: Option<bool>,
}

fn default_batch_size() -> i64 {
    100
}

impl IndexOptions {
    /// "Defaults when neither include flag set: both true".
    fn kinds(&self) -> Vec<ArtifactKind> {
        match (self.include_servers, self.include_agents) {
            (None, None) => vec![ArtifactKind::Server, ArtifactKind::Agent],
            (servers, agents) => {
                let mut kinds = Vec::new();
                if servers.unwrap_or(false) {
                    kinds.push(ArtifactKind::Server);
                }
                if agents.unwrap_or(false) {
                    kinds.push(ArtifactKind::Agent);
                }
                kinds
            }
        }
    }

    pub fn validate(&self) -> Result<(), crate::error::ServerError> {
        if !(1..=1000).contains(&self.batch_size) {
            return Err(crate::error::ServerError::invalid_input(
                "batchSize must be between 1 and 1000",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IndexStats {
    pub total: u64,
    pub processed: u64,
    pub updated: u64,
    pub skipped: u64,
    pub failures: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexResult {
    pub servers: IndexStats,
    pub agents: IndexStats,
}

fn artifact_text_fields(value: &serde_json::Value) -> (String, String, Vec<String>) {
    let name = value.get("name").and_then(|v| v.as_str()).unwrap_or_default().to_string();
    let description = value
        .get("description")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    let tags = value
        .get("tags")
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter_map(|t| t.as_str().map(str::to_string)).collect())
        .unwrap_or_default();
    (name, description, tags)
}

fn embeddable_text(name: &str, description: &str, tags: &[String]) -> String {
    format!("{name}\n{description}\n{}", tags.join(", "))
}

async fn reembed_one(
    service: &RegistryService,
    provider: &dyn EmbeddingProvider,
    artifact: &ArtifactVersion,
    dry_run: bool,
) -> anyhow::Result<()> {
    let (name, description, tags) = artifact_text_fields(&artifact.value);
    let embedded = provider.embed(&embeddable_text(&name, &description, &tags)).await?;
    let checksum = RegistryService::text_checksum(&name, &description, &tags);

    if dry_run {
        return Ok(());
    }

    service
        .set_embedding(
            artifact.kind,
            &artifact.name,
            &artifact.version,
            crate::catalog::models::SemanticEmbedding {
                vector: embedded.vector,
                provider: embedded.provider,
                model: embedded.model,
                checksum,
                generated_at: chrono::Utc::now(),
            },
        )
        .await?;
    Ok(())
}

fn needs_reembed(artifact: &ArtifactVersion, provider: &dyn EmbeddingProvider, options: &IndexOptions) -> bool {
    if options.force {
        return true;
    }
    let (name, description, tags) = artifact_text_fields(&artifact.value);
    let current_checksum = RegistryService::text_checksum(&name, &description, &tags);
    match &artifact.embedding {
        None => true,
        Some(existing) => {
            existing.provider != provider.name()
                || existing.model != provider.model()
                || existing.checksum != current_checksum
        }
    }
}

/// Runs the indexing algorithm as the body of a Job. `on_progress` is
/// invoked after each batch per kind with the cumulative stats for that
/// kind so far; the same callback feeds both the Job Manager's
/// `JobProgress` and the SSE stream without two separate counting passes.
pub async fn run_index(
    service: &RegistryService,
    provider: &dyn EmbeddingProvider,
    options: &IndexOptions,
    mut on_progress: impl FnMut(ArtifactKind, &IndexStats),
    cancel: &CancellationToken,
) -> anyhow::Result<IndexResult> {
    let mut result = IndexResult::default();

    for kind in options.kinds() {
        let stats = index_kind(service, provider, kind, options, &mut on_progress, cancel).await?;
        match kind {
            ArtifactKind::Server => result.servers = stats,
            ArtifactKind::Agent => result.agents = stats,
            ArtifactKind::Skill => unreachable!("indexer never selects skills"),
        }
    }

    Ok(result)
}

async fn index_kind(
    service: &RegistryService,
    provider: &dyn EmbeddingProvider,
    kind: ArtifactKind,
    options: &IndexOptions,
    on_progress: &mut impl FnMut(ArtifactKind, &IndexStats),
    cancel: &CancellationToken,
) -> anyhow::Result<IndexStats> {
    let mut stats = IndexStats::default();
    stats.total = service
        .count(kind)
        .await
        .map(|n| n.max(0) as u64)
        .unwrap_or(0);
    let mut cursor: Option<String> = None;

    loop {
        if cancel.is_cancelled() {
            anyhow::bail!("indexing cancelled");
        }

        let page = service
            .list(
                kind,
                ArtifactFilter::default(),
                cursor.as_deref(),
                Some(options.batch_size),
            )
            .await
            .map_err(|e| anyhow::anyhow!(e.message))?;

        if page.items.is_empty() {
            break;
        }

        for scored in &page.items {
            if cancel.is_cancelled() {
                anyhow::bail!("indexing cancelled");
            }

            let artifact = &scored.artifact;
            stats.processed += 1;

            if !needs_reembed(artifact, provider, options) {
                stats.skipped += 1;
                continue;
            }

            match reembed_one(service, provider, artifact, options.dry_run).await {
                Ok(()) => stats.updated += 1,
                Err(e) => {
                    stats.failures += 1;
                    warn!(kind = %kind, name = %artifact.name, version = %artifact.version, error = %e, "failed to re-embed artifact");
                }
            }
        }

        on_progress(kind, &stats);

        match page.next_cursor {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }

    Ok(stats)
}

impl From<&IndexStats> for JobProgress {
    fn from(stats: &IndexStats) -> Self {
        JobProgress {
            total: stats.total,
            processed: stats.processed,
            updated: stats.updated,
            skipped: stats.skipped,
            failures: stats.failures,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_include_flags_select_both_kinds() {
        let options = IndexOptions {
            batch_size: 100,
            force: false,
            dry_run: false,
            include_servers: None,
            include_agents: None,
        };
        assert_eq!(options.kinds(), vec![ArtifactKind::Server, ArtifactKind::Agent]);
    }

    #[test]
    fn explicit_include_servers_only() {
        let options = IndexOptions {
            batch_size: 100,
            force: false,
            dry_run: false,
            include_servers: Some(true),
            include_agents: Some(false),
        };
        assert_eq!(options.kinds(), vec![ArtifactKind::Server]);
    }

    #[test]
    fn batch_size_out_of_range_is_rejected() {
        let options = IndexOptions {
            batch_size: 0,
            force: false,
            dry_run: false,
            include_servers: None,
            include_agents: None,
        };
        assert!(options.validate().is_err());
    }
}
