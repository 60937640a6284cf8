use std::sync::Arc;

use chrono::Utc;
use sqlx::PgPool;

use crate::catalog::{
    checksum,
    models::{
        ArtifactFilter, ArtifactKind, ArtifactStatus, ArtifactVersion, Page, Readme,
        ScoredArtifact, SemanticEmbedding, MAX_PAGE_LIMIT,
    },
    store as catalog_store,
};
use crate::deployment::store as deployment_store;
use crate::embeddings::EmbeddingProvider;
use crate::error::{ErrorKind, ServerError};

use super::{semver_cmp, validation};

/// Collaborator-injected facade over the Catalog Store:
/// validation, publish-lock sequencing, the version comparator, and
/// semantic-query vectorization all live here, not in the HTTP layer or the
/// store.
///
/// Holds its collaborators as constructor-injected `Arc<dyn ...>` values
/// rather than reaching for a process-wide singleton.
#[derive(Clone)]
pub struct RegistryService {
    pool: PgPool,
    embedding_provider: Option<Arc<dyn EmbeddingProvider>>,
}

pub struct CreateArtifactInput {
    pub kind: ArtifactKind,
    pub value: serde_json::Value,
}

pub struct UpdateArtifactInput {
    pub kind: ArtifactKind,
    pub name: String,
    pub version: String,
    pub value: serde_json::Value,
    pub new_status: Option<ArtifactStatus>,
}

impl RegistryService {
    pub fn new(pool: PgPool, embedding_provider: Option<Arc<dyn EmbeddingProvider>>) -> Self {
        Self {
            pool,
            embedding_provider,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn embedding_provider(&self) -> Option<Arc<dyn EmbeddingProvider>> {
        self.embedding_provider.clone()
    }

    /// List artifacts, vectorizing a raw-text semantic query into an
    /// embedding first when the caller didn't already supply one.
    pub async fn list(
        &self,
        kind: ArtifactKind,
        mut filter: ArtifactFilter,
        cursor: Option<&str>,
        limit: Option<i64>,
    ) -> Result<Page<ScoredArtifact>, ServerError> {
        if let Some(n) = limit {
            if n > MAX_PAGE_LIMIT {
                return Err(ServerError::unprocessable(format!(
                    "limit must be between 1 and {MAX_PAGE_LIMIT}"
                )));
            }
        }

        filter.kind = kind;
        self.vectorize_semantic(&mut filter).await?;

        catalog_store::list(&self.pool, &filter, cursor, limit)
            .await
            .map_err(|e| ServerError::internal_anyhow(e, "failed to list artifacts"))
    }

    async fn vectorize_semantic(&self, filter: &mut ArtifactFilter) -> Result<(), ServerError> {
        let Some(semantic) = filter.semantic.as_mut() else {
            return Ok(());
        };
        if semantic.query_embedding.is_some() {
            return Ok(());
        }
        if semantic.raw_query.trim().is_empty() {
            return Err(ServerError::invalid_input(
                "semantic_search requires a non-empty search query",
            ));
        }

        let provider = self.embedding_provider.as_ref().ok_or_else(|| {
            ServerError::new(
                ErrorKind::Transient,
                "semantic search is unavailable: no embedding provider configured",
            )
        })?;

        let embedded = provider
            .embed(&semantic.raw_query)
            .await
            .map_err(|e| ServerError::internal_anyhow(e, "embedding provider call failed"))?;

        if embedded.vector.len() != provider.dimensions() {
            return Err(ServerError::invalid_input(
                "embedding provider returned a vector with an unexpected dimension",
            ));
        }

        semantic.query_embedding = Some(embedded.vector);
        Ok(())
    }

    /// Total row count for `kind`, used by the indexer to report an
    /// up-front `JobProgress.total`.
    pub async fn count(&self, kind: ArtifactKind) -> Result<i64, ServerError> {
        catalog_store::count_by_kind(&self.pool, kind)
            .await
            .map_err(|e| ServerError::internal_anyhow(e, "failed to count artifacts"))
    }

    pub async fn get_by_name(
        &self,
        kind: ArtifactKind,
        name: &str,
    ) -> Result<ArtifactVersion, ServerError> {
        catalog_store::get_by_name(&self.pool, kind, name)
            .await
            .map_err(|e| ServerError::internal_anyhow(e, "failed to fetch artifact"))?
            .ok_or_else(|| ServerError::not_found(format!("{kind} '{name}' not found")))
    }

    pub async fn get_by_name_and_version(
        &self,
        kind: ArtifactKind,
        name: &str,
        version: &str,
        published_only: bool,
    ) -> Result<ArtifactVersion, ServerError> {
        catalog_store::get_by_name_and_version(&self.pool, kind, name, version, published_only)
            .await
            .map_err(|e| ServerError::internal_anyhow(e, "failed to fetch artifact version"))?
            .ok_or_else(|| {
                ServerError::not_found(format!("{kind} '{name}' version '{version}' not found"))
            })
    }

    pub async fn get_all_versions(
        &self,
        kind: ArtifactKind,
        name: &str,
    ) -> Result<Vec<ArtifactVersion>, ServerError> {
        let rows = catalog_store::get_all_versions(&self.pool, kind, name)
            .await
            .map_err(|e| ServerError::internal_anyhow(e, "failed to fetch versions"))?;
        if rows.is_empty() {
            return Err(ServerError::not_found(format!("{kind} '{name}' not found")));
        }
        Ok(rows)
    }

    pub async fn get_readme(
        &self,
        kind: ArtifactKind,
        name: &str,
        version: &str,
    ) -> Result<Readme, ServerError> {
        catalog_store::get_readme(&self.pool, kind, name, version)
            .await
            .map_err(|e| ServerError::internal_anyhow(e, "failed to fetch readme"))?
            .ok_or_else(|| ServerError::not_found("readme not found"))
    }

    pub async fn upsert_readme(&self, readme: Readme) -> Result<(), ServerError> {
        catalog_store::upsert_readme(&self.pool, &readme)
            .await
            .map_err(|e| ServerError::internal_anyhow(e, "failed to store readme"))
    }

    /// `CreateArtifact` six-step transactional recipe.
    pub async fn create_artifact(
        &self,
        input: CreateArtifactInput,
    ) -> Result<ArtifactVersion, ServerError> {
        validation::validate_artifact_value(&input.value)?;

        let name = input.value["name"].as_str().unwrap().to_string();
        let version = input.value["version"].as_str().unwrap().to_string();
        let urls = catalog_store::remote_urls_of(&input.value);

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| ServerError::internal_anyhow(e.into(), "failed to start transaction"))?;

        catalog_store::acquire_publish_lock(&mut *tx, input.kind, &name)
            .await
            .map_err(|e| ServerError::internal_anyhow(e, "failed to acquire publish lock"))?;

        if let Some(owner) =
            catalog_store::find_remote_url_owner_tx(&mut *tx, input.kind, &urls, &name)
                .await
                .map_err(|e| ServerError::internal_anyhow(e, "failed to check remote URL uniqueness"))?
        {
            return Err(ServerError::conflict(format!(
                "one or more remotes[*].url is already published under '{owner}'"
            )));
        }

        let version_count = catalog_store::count_versions_tx(&mut *tx, input.kind, &name)
            .await
            .map_err(|e| ServerError::internal_anyhow(e, "failed to count versions"))?;
        if version_count >= crate::catalog::models::MAX_VERSIONS {
            return Err(ServerError::new(
                ErrorKind::MaxReached,
                format!("{name} has reached the maximum of {} versions", crate::catalog::models::MAX_VERSIONS),
            ));
        }

        if catalog_store::check_version_exists_tx(&mut *tx, input.kind, &name, &version)
            .await
            .map_err(|e| ServerError::internal_anyhow(e, "failed to check version existence"))?
        {
            return Err(ServerError::new(
                ErrorKind::DuplicateVersion,
                format!("{name}@{version} already exists"),
            ));
        }

        let now = Utc::now();
        let current_latest = catalog_store::get_by_name_tx(&mut *tx, input.kind, &name)
            .await
            .map_err(|e| ServerError::internal_anyhow(e, "failed to fetch current latest"))?;

        let is_latest = match &current_latest {
            None => true,
            Some(current) => semver_cmp::is_newer(&version, now, &current.version, current.published_at),
        };

        if is_latest && current_latest.is_some() {
            catalog_store::unmark_as_latest(&mut *tx, input.kind, &name)
                .await
                .map_err(|e| ServerError::internal_anyhow(e, "failed to unmark previous latest"))?;
        }

        let row = catalog_store::insert(
            &mut *tx,
            catalog_store::InsertArtifact {
                kind: input.kind,
                name: &name,
                version: &version,
                value: input.value,
                is_latest,
                now,
            },
        )
        .await
        .map_err(|e| ServerError::internal_anyhow(e, "failed to insert artifact version"))?;

        tx.commit()
            .await
            .map_err(|e| ServerError::internal_anyhow(e.into(), "failed to commit transaction"))?;

        Ok(row)
    }

    /// `UpdateArtifact`: value-only mutation (metadata preserved), with an
    /// optional atomic status change. Value validation is skipped when the
    /// row is already deleted or is being deleted.
    pub async fn update_artifact(
        &self,
        input: UpdateArtifactInput,
    ) -> Result<ArtifactVersion, ServerError> {
        let current = catalog_store::get_by_name_and_version(
            &self.pool,
            input.kind,
            &input.name,
            &input.version,
            false,
        )
        .await
        .map_err(|e| ServerError::internal_anyhow(e, "failed to fetch artifact version"))?
        .ok_or_else(|| {
            ServerError::not_found(format!(
                "{} '{}' version '{}' not found",
                input.kind, input.name, input.version
            ))
        })?;

        let skip_validation = current.status == ArtifactStatus::Deleted
            || input.new_status == Some(ArtifactStatus::Deleted);
        if !skip_validation {
            validation::validate_artifact_value(&input.value)?;
        }

        let row = match input.new_status {
            Some(status) => catalog_store::update_value_and_status(
                &self.pool,
                input.kind,
                &input.name,
                &input.version,
                input.value,
                status,
            )
            .await
            .map_err(|e| ServerError::internal_anyhow(e, "failed to update artifact"))?,
            None => catalog_store::update_value(
                &self.pool,
                input.kind,
                &input.name,
                &input.version,
                input.value,
            )
            .await
            .map_err(|e| ServerError::internal_anyhow(e, "failed to update artifact"))?,
        };

        row.ok_or_else(|| ServerError::not_found("artifact version disappeared during update"))
    }

    pub async fn set_status(
        &self,
        kind: ArtifactKind,
        name: &str,
        version: &str,
        status: ArtifactStatus,
    ) -> Result<ArtifactVersion, ServerError> {
        catalog_store::set_status(&self.pool, kind, name, version, status)
            .await
            .map_err(|e| ServerError::internal_anyhow(e, "failed to set artifact status"))?
            .ok_or_else(|| ServerError::not_found(format!("{kind} '{name}' version '{version}' not found")))
    }

    pub async fn publish(
        &self,
        kind: ArtifactKind,
        name: &str,
        version: &str,
    ) -> Result<ArtifactVersion, ServerError> {
        catalog_store::set_published(&self.pool, kind, name, version, true)
            .await
            .map_err(|e| ServerError::internal_anyhow(e, "failed to publish artifact"))?
            .ok_or_else(|| ServerError::not_found(format!("{kind} '{name}' version '{version}' not found")))
    }

    /// `Unpublish`, refusing when an active deployment still references this
    /// exact version.
    pub async fn unpublish(
        &self,
        kind: ArtifactKind,
        name: &str,
        version: &str,
    ) -> Result<ArtifactVersion, ServerError> {
        let deployed = deployment_store::has_active_deployment(&self.pool, kind, name, version)
            .await
            .map_err(|e| ServerError::internal_anyhow(e, "failed to check deployment state"))?;
        if deployed {
            return Err(ServerError::conflict(format!(
                "{name}@{version} is still deployed; remove the deployment before unpublishing"
            )));
        }

        catalog_store::set_published(&self.pool, kind, name, version, false)
            .await
            .map_err(|e| ServerError::internal_anyhow(e, "failed to unpublish artifact"))?
            .ok_or_else(|| ServerError::not_found(format!("{kind} '{name}' version '{version}' not found")))
    }

    pub async fn delete_artifact(
        &self,
        kind: ArtifactKind,
        name: &str,
        version: &str,
    ) -> Result<(), ServerError> {
        let deleted = catalog_store::delete(&self.pool, kind, name, version)
            .await
            .map_err(|e| ServerError::internal_anyhow(e, "failed to delete artifact"))?;
        if !deleted {
            return Err(ServerError::not_found(format!(
                "{kind} '{name}' version '{version}' not found"
            )));
        }
        Ok(())
    }

    /// `SetEmbedding`, enforcing that `semantic_embedding.dimensions` must
    /// equal the configured provider's dimension.
    pub async fn set_embedding(
        &self,
        kind: ArtifactKind,
        name: &str,
        version: &str,
        embedding: SemanticEmbedding,
    ) -> Result<(), ServerError> {
        if let Some(provider) = &self.embedding_provider {
            if embedding.dimensions() != provider.dimensions() {
                return Err(ServerError::invalid_input(format!(
                    "embedding has {} dimensions, expected {}",
                    embedding.dimensions(),
                    provider.dimensions()
                )));
            }
        }

        let updated = catalog_store::set_embedding(&self.pool, kind, name, version, &embedding)
            .await
            .map_err(|e| ServerError::internal_anyhow(e, "failed to set embedding"))?;
        if !updated {
            return Err(ServerError::not_found(format!(
                "{kind} '{name}' version '{version}' not found"
            )));
        }
        Ok(())
    }

    /// Per-record checksum input for the indexer, computed the same way
    /// regardless of caller.
    pub fn text_checksum(name: &str, description: &str, tags: &[String]) -> String {
        checksum::text_checksum(name, description, tags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unconnected_pool() -> PgPool {
        sqlx::postgres::PgPoolOptions::new()
            .max_connections(1)
            .connect_lazy("postgres://localhost/unused")
            .expect("lazy pool construction never touches the network")
    }

    #[tokio::test]
    async fn create_artifact_rejects_missing_name() {
        let service = RegistryService::new(unconnected_pool(), None);
        let result = service
            .create_artifact(CreateArtifactInput {
                kind: ArtifactKind::Server,
                value: serde_json::json!({"version": "1.0.0"}),
            })
            .await;
        assert!(matches!(result, Err(e) if e.kind == ErrorKind::InvalidInput));
    }

    #[tokio::test]
    async fn semantic_query_with_empty_search_is_invalid() {
        let service = RegistryService::new(unconnected_pool(), None);
        let mut filter = ArtifactFilter {
            kind: ArtifactKind::Server,
            semantic: Some(crate::catalog::models::SemanticFilter {
                raw_query: "   ".to_string(),
                ..Default::default()
            }),
            ..Default::default()
        };
        let result = service.vectorize_semantic(&mut filter).await;
        assert!(matches!(result, Err(e) if e.kind == ErrorKind::InvalidInput));
    }

    #[tokio::test]
    async fn semantic_query_without_provider_is_transient() {
        let service = RegistryService::new(unconnected_pool(), None);
        let mut filter = ArtifactFilter {
            kind: ArtifactKind::Server,
            semantic: Some(crate::catalog::models::SemanticFilter {
                raw_query: "backup server".to_string(),
                ..Default::default()
            }),
            ..Default::default()
        };
        let result = service.vectorize_semantic(&mut filter).await;
        assert!(matches!(result, Err(e) if e.kind == ErrorKind::Transient));
    }

    #[tokio::test]
    async fn list_rejects_limit_over_max() {
        let service = RegistryService::new(unconnected_pool(), None);
        let result = service
            .list(ArtifactKind::Server, ArtifactFilter::default(), None, Some(MAX_PAGE_LIMIT + 1))
            .await;
        assert!(matches!(result, Err(e) if e.kind == ErrorKind::UnprocessableInput));
    }

    #[sqlx::test]
    async fn latest_tiebreak_then_duplicate_version_rejected(pool: PgPool) {
        let service = RegistryService::new(pool, None);

        let v1 = service
            .create_artifact(CreateArtifactInput {
                kind: ArtifactKind::Server,
                value: serde_json::json!({"name": "com.ex/foo", "version": "1.0.0"}),
            })
            .await
            .unwrap();
        assert!(v1.is_latest);

        let beta = service
            .create_artifact(CreateArtifactInput {
                kind: ArtifactKind::Server,
                value: serde_json::json!({"name": "com.ex/foo", "version": "1.0.0-beta"}),
            })
            .await
            .unwrap();
        assert!(!beta.is_latest, "a numeric release outranks a prerelease tag");

        let latest = service.get_by_name(ArtifactKind::Server, "com.ex/foo").await.unwrap();
        assert_eq!(latest.version, "1.0.0");

        let dup = service
            .create_artifact(CreateArtifactInput {
                kind: ArtifactKind::Server,
                value: serde_json::json!({"name": "com.ex/foo", "version": "1.0.0"}),
            })
            .await;
        assert!(matches!(dup, Err(e) if e.kind == ErrorKind::DuplicateVersion));
    }

    #[sqlx::test]
    async fn semantic_search_orders_by_similarity(pool: PgPool) {
        let service = RegistryService::new(pool, None);

        for (name, vector) in [("backup-server", [0.1_f32, 0.9, 0.0]), ("weather-server", [0.9, 0.1, 0.0])] {
            let artifact = service
                .create_artifact(CreateArtifactInput {
                    kind: ArtifactKind::Server,
                    value: serde_json::json!({"name": name, "version": "1.0.0"}),
                })
                .await
                .unwrap();
            service
                .set_embedding(
                    ArtifactKind::Server,
                    &artifact.name,
                    &artifact.version,
                    SemanticEmbedding {
                        vector: vector.to_vec(),
                        provider: "hash".to_string(),
                        model: "hash-v1".to_string(),
                        checksum: "unused".to_string(),
                        generated_at: Utc::now(),
                    },
                )
                .await
                .unwrap();
        }

        let filter = ArtifactFilter {
            kind: ArtifactKind::Server,
            semantic: Some(crate::catalog::models::SemanticFilter {
                raw_query: "server".to_string(),
                query_embedding: Some(vec![0.1, 0.95, 0.0]),
                ..Default::default()
            }),
            ..Default::default()
        };
        let page = service.list(ArtifactKind::Server, filter, None, None).await.unwrap();

        let names: Vec<&str> = page.items.iter().map(|s| s.artifact.name.as_str()).collect();
        assert_eq!(names, vec!["backup-server", "weather-server"]);

        let scores: Vec<f32> = page.items.iter().map(|s| s.semantic.as_ref().unwrap().score).collect();
        assert!(scores[0] > scores[1], "scores must be strictly decreasing");
        assert!(scores.iter().all(|s| *s > 0.0 && *s < 1.0));
    }
}
