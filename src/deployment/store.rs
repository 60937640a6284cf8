use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};

use crate::catalog::ArtifactKind;

use super::models::{Deployment, DeploymentFilter, DeploymentStatus, ResourceType, RuntimeKind};

const DEPLOYMENT_COLUMNS: &str = "kind, name, version, status, runtime, resource_type, config, \
    prefer_remote, deployed_at, updated_at, is_external";

fn row_to_deployment(row: &sqlx::postgres::PgRow) -> Result<Deployment> {
    Ok(Deployment {
        kind: row.try_get("kind")?,
        name: row.try_get("name")?,
        version: row.try_get("version")?,
        status: row.try_get("status")?,
        runtime: row.try_get("runtime")?,
        resource_type: row.try_get("resource_type")?,
        config: row.try_get("config")?,
        prefer_remote: row.try_get("prefer_remote")?,
        deployed_at: row.try_get("deployed_at")?,
        updated_at: row.try_get("updated_at")?,
        is_external: row.try_get("is_external")?,
    })
}

/// `Err` with `sqlx::Error::Database` carrying a unique-violation code means
/// the caller should map to `ErrorKind::AlreadyExists`; everything else is a
/// plain internal error. Returned as `anyhow::Error`; the registry layer
/// inspects `is_unique_violation` to decide.
pub fn is_unique_violation(err: &anyhow::Error) -> bool {
    err.downcast_ref::<sqlx::Error>()
        .and_then(|e| e.as_database_error())
        .map(|e| e.code().as_deref() == Some("23505"))
        .unwrap_or(false)
}

#[derive(Debug, Clone)]
pub struct CreateDeployment {
    pub kind: ArtifactKind,
    pub name: String,
    pub version: String,
    pub runtime: RuntimeKind,
    pub resource_type: ResourceType,
    pub config: serde_json::Value,
    pub prefer_remote: bool,
}

pub async fn create(pool: &PgPool, params: CreateDeployment) -> Result<Deployment> {
    let now = Utc::now();
    let row = sqlx::query(&format!(
        "INSERT INTO deployments (kind, name, version, status, runtime, resource_type, config, \
         prefer_remote, deployed_at, updated_at, is_external) \
         VALUES ($1, $2, $3, 'active', $4, $5, $6, $7, $8, $8, false) \
         RETURNING {DEPLOYMENT_COLUMNS}"
    ))
    .bind(params.kind)
    .bind(&params.name)
    .bind(&params.version)
    .bind(params.runtime)
    .bind(params.resource_type)
    .bind(params.config)
    .bind(params.prefer_remote)
    .bind(now)
    .fetch_one(pool)
    .await
    .context("creating deployment")?;

    row_to_deployment(&row)
}

pub async fn get_by_name_and_version(
    pool: &PgPool,
    kind: ArtifactKind,
    name: &str,
    version: &str,
) -> Result<Option<Deployment>> {
    let row = sqlx::query(&format!(
        "SELECT {DEPLOYMENT_COLUMNS} FROM deployments WHERE kind = $1 AND name = $2 AND version = $3"
    ))
    .bind(kind)
    .bind(name)
    .bind(version)
    .fetch_optional(pool)
    .await
    .context("fetching deployment")?;

    row.as_ref().map(row_to_deployment).transpose()
}

pub async fn list(pool: &PgPool, filter: &DeploymentFilter) -> Result<Vec<Deployment>> {
    let mut qb: QueryBuilder<Postgres> =
        QueryBuilder::new(format!("SELECT {DEPLOYMENT_COLUMNS} FROM deployments WHERE 1 = 1"));

    if let Some(runtime) = filter.runtime {
        qb.push(" AND runtime = ").push_bind(runtime);
    }
    if let Some(resource_type) = filter.resource_type {
        qb.push(" AND resource_type = ").push_bind(resource_type);
    }
    qb.push(" ORDER BY name ASC, version ASC");

    let rows = qb.build().fetch_all(pool).await.context("listing deployments")?;
    rows.iter().map(row_to_deployment).collect()
}

pub async fn update_config(
    pool: &PgPool,
    kind: ArtifactKind,
    name: &str,
    version: &str,
    config: serde_json::Value,
    prefer_remote: bool,
) -> Result<Option<Deployment>> {
    let row = sqlx::query(&format!(
        "UPDATE deployments SET config = $4, prefer_remote = $5, updated_at = now() \
         WHERE kind = $1 AND name = $2 AND version = $3 RETURNING {DEPLOYMENT_COLUMNS}"
    ))
    .bind(kind)
    .bind(name)
    .bind(version)
    .bind(config)
    .bind(prefer_remote)
    .fetch_optional(pool)
    .await
    .context("updating deployment config")?;

    row.as_ref().map(row_to_deployment).transpose()
}

pub async fn update_status(
    pool: &PgPool,
    kind: ArtifactKind,
    name: &str,
    version: &str,
    status: DeploymentStatus,
) -> Result<Option<Deployment>> {
    let row = sqlx::query(&format!(
        "UPDATE deployments SET status = $4, updated_at = now() \
         WHERE kind = $1 AND name = $2 AND version = $3 RETURNING {DEPLOYMENT_COLUMNS}"
    ))
    .bind(kind)
    .bind(name)
    .bind(version)
    .bind(status)
    .fetch_optional(pool)
    .await
    .context("updating deployment status")?;

    row.as_ref().map(row_to_deployment).transpose()
}

pub async fn remove(pool: &PgPool, kind: ArtifactKind, name: &str, version: &str) -> Result<bool> {
    let result = sqlx::query("DELETE FROM deployments WHERE kind = $1 AND name = $2 AND version = $3")
        .bind(kind)
        .bind(name)
        .bind(version)
        .execute(pool)
        .await
        .context("removing deployment")?;
    Ok(result.rows_affected() > 0)
}

/// `true` when an active deployment exists for `(kind, name, version)` —
/// used by `RegistryService::unpublish` to refuse unpublishing a version
/// that's still deployed.
pub async fn has_active_deployment(pool: &PgPool, kind: ArtifactKind, name: &str, version: &str) -> Result<bool> {
    let deployment = get_by_name_and_version(pool, kind, name, version).await?;
    Ok(deployment
        .map(|d| d.status == DeploymentStatus::Active)
        .unwrap_or(false))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_postgres_unique_violation_code() {
        // sqlx::Error isn't constructible outside the crate for a fake
        // database error, so this only exercises the non-matching path.
        let err = anyhow::anyhow!("not a database error");
        assert!(!is_unique_violation(&err));
    }

    #[sqlx::test]
    async fn unpublish_while_deployed_then_after_removal(pool: PgPool) {
        use crate::error::ErrorKind;
        use crate::registry::{CreateArtifactInput, RegistryService};

        let registry = RegistryService::new(pool.clone(), None);
        let artifact = registry
            .create_artifact(CreateArtifactInput {
                kind: ArtifactKind::Server,
                value: serde_json::json!({"name": "com.ex/web", "version": "2.1.0"}),
            })
            .await
            .unwrap();
        registry
            .publish(ArtifactKind::Server, &artifact.name, &artifact.version)
            .await
            .unwrap();

        create(
            &pool,
            CreateDeployment {
                kind: ArtifactKind::Server,
                name: artifact.name.clone(),
                version: artifact.version.clone(),
                runtime: RuntimeKind::Local,
                resource_type: ResourceType::Mcp,
                config: serde_json::json!({}),
                prefer_remote: false,
            },
        )
        .await
        .unwrap();

        let blocked = registry.unpublish(ArtifactKind::Server, &artifact.name, &artifact.version).await;
        assert!(matches!(blocked, Err(e) if e.kind == ErrorKind::Conflict));

        assert!(remove(&pool, ArtifactKind::Server, &artifact.name, &artifact.version).await.unwrap());

        let unpublished = registry.unpublish(ArtifactKind::Server, &artifact.name, &artifact.version).await;
        assert!(unpublished.is_ok());
    }
}
