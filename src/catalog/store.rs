use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder, Row};

use super::models::{
    ArtifactFilter, ArtifactKind, ArtifactStatus, ArtifactVersion, Cursor, Page, Readme,
    ScoredArtifact, SemanticEmbedding, SemanticScore, DEFAULT_PAGE_LIMIT, MAX_PAGE_LIMIT,
};

/// 63-bit FNV-1a hash of `"{kind}:{name}"`, used as the key for
/// `pg_advisory_xact_lock`
pub fn advisory_lock_key(kind: ArtifactKind, name: &str) -> i64 {
    const FNV_OFFSET_BASIS: u64 = 0xcbf29ce484222325;
    const FNV_PRIME: u64 = 0x100000001b3;

    let mut hash = FNV_OFFSET_BASIS;
    for byte in format!("{}:{}", kind.as_str(), name).bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    (hash & 0x7fff_ffff_ffff_ffff) as i64
}

fn extract_remote_urls(value: &serde_json::Value) -> Vec<String> {
    value
        .get("remotes")
        .and_then(|v| v.as_array())
        .map(|remotes| {
            remotes
                .iter()
                .filter_map(|r| r.get("url").and_then(|u| u.as_str()).map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

fn row_to_artifact(row: &sqlx::postgres::PgRow) -> Result<ArtifactVersion> {
    let embedding_json: Option<serde_json::Value> = row.try_get("embedding")?;
    let embedding = embedding_json
        .map(|v| serde_json::from_value::<SemanticEmbedding>(v))
        .transpose()
        .context("failed to decode stored embedding")?;

    Ok(ArtifactVersion {
        kind: row.try_get("kind")?,
        name: row.try_get("name")?,
        version: row.try_get("version")?,
        status: row.try_get("status")?,
        published_at: row.try_get("published_at")?,
        updated_at: row.try_get("updated_at")?,
        is_latest: row.try_get("is_latest")?,
        published: row.try_get("published")?,
        unpublished_at: row.try_get("unpublished_at")?,
        value: row.try_get("value")?,
        embedding,
    })
}

const ARTIFACT_COLUMNS: &str = "kind, name, version, status, published_at, updated_at, \
    is_latest, published, unpublished_at, value, embedding";

/// Cosine distance between two equal-length vectors; `f32::MAX` if either
/// vector is empty or the lengths differ (never ranks above a real match).
fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return f32::MAX;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return f32::MAX;
    }
    1.0 - (dot / (norm_a * norm_b))
}

/// List artifacts matching `filter`, paginated by `(name, version)` cursor.
///
/// Semantic ranking has no `pgvector` extension to lean on in this stack, so
/// when `filter.semantic` carries an embedding, the SQL WHERE clause narrows
/// to the non-semantic predicates first (kind, publication state, substring,
/// cursor) and cosine distance is computed and sorted in-process over that
/// candidate set: nothing requires Postgres itself to do the ranking, only
/// that the *result* come back ordered by ascending distance and filtered
/// by threshold.
pub async fn list(
    pool: &PgPool,
    filter: &ArtifactFilter,
    cursor: Option<&str>,
    limit: Option<i64>,
) -> Result<Page<ScoredArtifact>> {
    let limit = match limit {
        None | Some(0) => DEFAULT_PAGE_LIMIT,
        Some(n) if n > MAX_PAGE_LIMIT => bail!("limit must be between 1 and {MAX_PAGE_LIMIT}"),
        Some(n) => n,
    };

    let cursor = cursor.map(Cursor::parse);
    let is_semantic = filter
        .semantic
        .as_ref()
        .map(|s| s.query_embedding.is_some())
        .unwrap_or(false);

    let mut qb: QueryBuilder<Postgres> =
        QueryBuilder::new(format!("SELECT {ARTIFACT_COLUMNS} FROM artifact_versions WHERE kind = "));
    qb.push_bind(filter.kind);

    if let Some(name) = &filter.name {
        qb.push(" AND name = ").push_bind(name.clone());
    }
    if let Some(version) = &filter.version {
        qb.push(" AND version = ").push_bind(version.clone());
    }
    if let Some(is_latest) = filter.is_latest {
        qb.push(" AND is_latest = ").push_bind(is_latest);
    }
    if let Some(published) = filter.published {
        qb.push(" AND published = ").push_bind(published);
    }
    if let Some(updated_since) = filter.updated_since {
        qb.push(" AND updated_at >= ").push_bind(updated_since);
    }
    if let Some(remote_url) = &filter.remote_url {
        qb.push(" AND EXISTS (SELECT 1 FROM jsonb_array_elements(COALESCE(value->'remotes', '[]'::jsonb)) r WHERE r->>'url' = ")
            .push_bind(remote_url.clone())
            .push(")");
    }
    if let Some(substring) = &filter.substring_name {
        qb.push(" AND name ILIKE ").push_bind(format!("%{}%", substring));
    }
    if is_semantic {
        qb.push(" AND embedding IS NOT NULL");
    }

    if let Some(cursor) = &cursor {
        match &cursor.version {
            Some(version) => {
                qb.push(" AND (name > ")
                    .push_bind(cursor.name.clone())
                    .push(" OR (name = ")
                    .push_bind(cursor.name.clone())
                    .push(" AND version > ")
                    .push_bind(version.clone())
                    .push("))");
            }
            None => {
                qb.push(" AND name > ").push_bind(cursor.name.clone());
            }
        }
    }

    qb.push(" ORDER BY name ASC, version ASC");

    // Semantic queries need the full narrowed candidate set to rank and
    // paginate correctly; non-semantic queries can push the fetch limit down
    // to the database directly.
    if is_semantic {
        qb.push(" LIMIT 2000");
    } else {
        qb.push(" LIMIT ").push_bind(limit + 1);
    }

    let rows = qb.build().fetch_all(pool).await.context("listing artifacts")?;
    let mut artifacts = rows
        .iter()
        .map(row_to_artifact)
        .collect::<Result<Vec<_>>>()?;

    if let Some(semantic) = filter.semantic.as_ref().filter(|_| is_semantic) {
        let query_vec = semantic.query_embedding.as_ref().unwrap();
        let mut scored: Vec<(ArtifactVersion, f32)> = artifacts
            .into_iter()
            .filter_map(|a| {
                let dist = a
                    .embedding
                    .as_ref()
                    .map(|e| cosine_distance(query_vec, &e.vector))
                    .unwrap_or(f32::MAX);
                if dist == f32::MAX {
                    return None;
                }
                let score = 1.0 - dist;
                if let Some(threshold) = semantic.threshold {
                    if score < threshold {
                        return None;
                    }
                }
                Some((a, dist))
            })
            .collect();
        scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

        let has_more = scored.len() as i64 > limit;
        let page: Vec<ScoredArtifact> = scored
            .into_iter()
            .take(limit as usize)
            .map(|(artifact, dist)| ScoredArtifact {
                artifact,
                semantic: Some(SemanticScore { score: 1.0 - dist }),
            })
            .collect();
        let next_cursor = if has_more {
            page.last()
                .map(|a| Cursor { name: a.artifact.name.clone(), version: Some(a.artifact.version.clone()) }.encode())
        } else {
            None
        };
        return Ok(Page { items: page, next_cursor });
    }

    let has_more = artifacts.len() as i64 > limit;
    artifacts.truncate(limit as usize);
    let next_cursor = if has_more {
        artifacts
            .last()
            .map(|a| Cursor { name: a.name.clone(), version: Some(a.version.clone()) }.encode())
    } else {
        None
    };

    Ok(Page {
        items: artifacts
            .into_iter()
            .map(|artifact| ScoredArtifact { artifact, semantic: None })
            .collect(),
        next_cursor,
    })
}

/// Transaction-scoped counterparts of the read checks `CreateArtifact` needs
/// to run inside its publish-lock critical section, so the whole sequence
/// observes one consistent view instead of racing a concurrent create of a
/// different name between pool-level reads.
pub async fn get_by_name_tx(
    tx: &mut sqlx::PgConnection,
    kind: ArtifactKind,
    name: &str,
) -> Result<Option<ArtifactVersion>> {
    let row = sqlx::query(&format!(
        "SELECT {ARTIFACT_COLUMNS} FROM artifact_versions WHERE kind = $1 AND name = $2 AND is_latest = true"
    ))
    .bind(kind)
    .bind(name)
    .fetch_optional(tx)
    .await
    .context("fetching latest artifact (tx)")?;

    row.as_ref().map(row_to_artifact).transpose()
}

pub async fn count_versions_tx(tx: &mut sqlx::PgConnection, kind: ArtifactKind, name: &str) -> Result<i64> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM artifact_versions WHERE kind = $1 AND name = $2",
    )
    .bind(kind)
    .bind(name)
    .fetch_one(tx)
    .await
    .context("counting versions (tx)")?;
    Ok(count)
}

pub async fn check_version_exists_tx(
    tx: &mut sqlx::PgConnection,
    kind: ArtifactKind,
    name: &str,
    version: &str,
) -> Result<bool> {
    let exists: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM artifact_versions WHERE kind = $1 AND name = $2 AND version = $3)",
    )
    .bind(kind)
    .bind(name)
    .bind(version)
    .fetch_one(tx)
    .await
    .context("checking version existence (tx)")?;
    Ok(exists)
}

pub async fn find_remote_url_owner_tx(
    tx: &mut sqlx::PgConnection,
    kind: ArtifactKind,
    urls: &[String],
    except_name: &str,
) -> Result<Option<String>> {
    if urls.is_empty() {
        return Ok(None);
    }

    let owner: Option<String> = sqlx::query_scalar(
        "SELECT DISTINCT name FROM artifact_versions \
         WHERE kind = $1 AND name <> $2 \
         AND EXISTS (SELECT 1 FROM jsonb_array_elements(COALESCE(value->'remotes', '[]'::jsonb)) r \
                     WHERE r->>'url' = ANY($3)) \
         LIMIT 1",
    )
    .bind(kind)
    .bind(except_name)
    .bind(urls)
    .fetch_optional(tx)
    .await
    .context("checking remote URL uniqueness (tx)")?;

    Ok(owner)
}

/// Fetch the `is_latest` row for `(kind, name)`.
pub async fn get_by_name(pool: &PgPool, kind: ArtifactKind, name: &str) -> Result<Option<ArtifactVersion>> {
    let row = sqlx::query(&format!(
        "SELECT {ARTIFACT_COLUMNS} FROM artifact_versions WHERE kind = $1 AND name = $2 AND is_latest = true"
    ))
    .bind(kind)
    .bind(name)
    .fetch_optional(pool)
    .await
    .context("fetching latest artifact")?;

    row.as_ref().map(row_to_artifact).transpose()
}

/// Fetch one version; `version == "latest"` resolves to the `is_latest` row.
pub async fn get_by_name_and_version(
    pool: &PgPool,
    kind: ArtifactKind,
    name: &str,
    version: &str,
    published_only: bool,
) -> Result<Option<ArtifactVersion>> {
    if version == "latest" {
        let row = get_by_name(pool, kind, name).await?;
        return Ok(row.filter(|r| !published_only || r.published));
    }

    let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(format!(
        "SELECT {ARTIFACT_COLUMNS} FROM artifact_versions WHERE kind = "
    ));
    qb.push_bind(kind)
        .push(" AND name = ")
        .push_bind(name)
        .push(" AND version = ")
        .push_bind(version);
    if published_only {
        qb.push(" AND published = true");
    }

    let row = qb
        .build()
        .fetch_optional(pool)
        .await
        .context("fetching artifact version")?;
    row.as_ref().map(row_to_artifact).transpose()
}

/// All versions of `(kind, name)`, newest `published_at` first.
pub async fn get_all_versions(pool: &PgPool, kind: ArtifactKind, name: &str) -> Result<Vec<ArtifactVersion>> {
    let rows = sqlx::query(&format!(
        "SELECT {ARTIFACT_COLUMNS} FROM artifact_versions WHERE kind = $1 AND name = $2 ORDER BY published_at DESC"
    ))
    .bind(kind)
    .bind(name)
    .fetch_all(pool)
    .await
    .context("fetching all versions")?;

    rows.iter().map(row_to_artifact).collect()
}

pub async fn count_versions(pool: &PgPool, kind: ArtifactKind, name: &str) -> Result<i64> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM artifact_versions WHERE kind = $1 AND name = $2",
    )
    .bind(kind)
    .bind(name)
    .fetch_one(pool)
    .await
    .context("counting versions")?;
    Ok(count)
}

/// Total row count for a whole kind, used by the indexer to report
/// `JobProgress.total` up front rather than leaving it at zero.
pub async fn count_by_kind(pool: &PgPool, kind: ArtifactKind) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM artifact_versions WHERE kind = $1")
        .bind(kind)
        .fetch_one(pool)
        .await
        .context("counting artifacts by kind")?;
    Ok(count)
}

pub async fn check_version_exists(pool: &PgPool, kind: ArtifactKind, name: &str, version: &str) -> Result<bool> {
    let exists: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM artifact_versions WHERE kind = $1 AND name = $2 AND version = $3)",
    )
    .bind(kind)
    .bind(name)
    .bind(version)
    .fetch_one(pool)
    .await
    .context("checking version existence")?;
    Ok(exists)
}

/// Find the `(kind, name)` — if any, other than `except_name` — that already
/// owns one of `urls` in its `remotes[*].url`.
pub async fn find_remote_url_owner(
    pool: &PgPool,
    kind: ArtifactKind,
    urls: &[String],
    except_name: &str,
) -> Result<Option<String>> {
    if urls.is_empty() {
        return Ok(None);
    }

    let owner: Option<String> = sqlx::query_scalar(
        "SELECT DISTINCT name FROM artifact_versions \
         WHERE kind = $1 AND name <> $2 \
         AND EXISTS (SELECT 1 FROM jsonb_array_elements(COALESCE(value->'remotes', '[]'::jsonb)) r \
                     WHERE r->>'url' = ANY($3)) \
         LIMIT 1",
    )
    .bind(kind)
    .bind(except_name)
    .bind(urls)
    .fetch_optional(pool)
    .await
    .context("checking remote URL uniqueness")?;

    Ok(owner)
}

pub async fn unmark_as_latest(tx: &mut sqlx::PgConnection, kind: ArtifactKind, name: &str) -> Result<()> {
    sqlx::query("UPDATE artifact_versions SET is_latest = false WHERE kind = $1 AND name = $2")
        .bind(kind)
        .bind(name)
        .execute(tx)
        .await
        .context("unmarking previous latest")?;
    Ok(())
}

/// Acquire the publish-lock for `(kind, name)`, scoped to the transaction —
/// released automatically at commit/rollback. Distinct names never block
/// each other.
pub async fn acquire_publish_lock(tx: &mut sqlx::PgConnection, kind: ArtifactKind, name: &str) -> Result<()> {
    let key = advisory_lock_key(kind, name);
    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(key)
        .execute(tx)
        .await
        .context("acquiring publish lock")?;
    Ok(())
}

pub struct InsertArtifact<'a> {
    pub kind: ArtifactKind,
    pub name: &'a str,
    pub version: &'a str,
    pub value: serde_json::Value,
    pub is_latest: bool,
    pub now: DateTime<Utc>,
}

pub async fn insert(tx: &mut sqlx::PgConnection, params: InsertArtifact<'_>) -> Result<ArtifactVersion> {
    let row = sqlx::query(&format!(
        "INSERT INTO artifact_versions (kind, name, version, status, published_at, updated_at, is_latest, published, value) \
         VALUES ($1, $2, $3, 'active', $4, $4, $5, false, $6) \
         RETURNING {ARTIFACT_COLUMNS}"
    ))
    .bind(params.kind)
    .bind(params.name)
    .bind(params.version)
    .bind(params.now)
    .bind(params.is_latest)
    .bind(params.value)
    .fetch_one(tx)
    .await
    .context("inserting artifact version")?;

    row_to_artifact(&row)
}

pub async fn update_value(
    pool: &PgPool,
    kind: ArtifactKind,
    name: &str,
    version: &str,
    value: serde_json::Value,
) -> Result<Option<ArtifactVersion>> {
    let row = sqlx::query(&format!(
        "UPDATE artifact_versions SET value = $4, updated_at = now() \
         WHERE kind = $1 AND name = $2 AND version = $3 RETURNING {ARTIFACT_COLUMNS}"
    ))
    .bind(kind)
    .bind(name)
    .bind(version)
    .bind(value)
    .fetch_optional(pool)
    .await
    .context("updating artifact value")?;

    row.as_ref().map(row_to_artifact).transpose()
}

pub async fn set_status(
    pool: &PgPool,
    kind: ArtifactKind,
    name: &str,
    version: &str,
    status: ArtifactStatus,
) -> Result<Option<ArtifactVersion>> {
    let published = !matches!(status, ArtifactStatus::Deleted);
    let row = sqlx::query(&format!(
        "UPDATE artifact_versions SET status = $4, updated_at = now(), \
         published = CASE WHEN $4 = 'deleted' THEN false ELSE published END \
         WHERE kind = $1 AND name = $2 AND version = $3 RETURNING {ARTIFACT_COLUMNS}"
    ))
    .bind(kind)
    .bind(name)
    .bind(version)
    .bind(status)
    .fetch_optional(pool)
    .await
    .context("setting artifact status")?;
    let _ = published;

    row.as_ref().map(row_to_artifact).transpose()
}

/// `UpdateArtifact`'s combined value+status write, applied as one statement
/// so the status transition is atomic with the value change.
pub async fn update_value_and_status(
    pool: &PgPool,
    kind: ArtifactKind,
    name: &str,
    version: &str,
    value: serde_json::Value,
    status: ArtifactStatus,
) -> Result<Option<ArtifactVersion>> {
    let row = sqlx::query(&format!(
        "UPDATE artifact_versions SET value = $4, status = $5, updated_at = now(), \
         published = CASE WHEN $5 = 'deleted' THEN false ELSE published END \
         WHERE kind = $1 AND name = $2 AND version = $3 RETURNING {ARTIFACT_COLUMNS}"
    ))
    .bind(kind)
    .bind(name)
    .bind(version)
    .bind(value)
    .bind(status)
    .fetch_optional(pool)
    .await
    .context("updating artifact value and status")?;

    row.as_ref().map(row_to_artifact).transpose()
}

pub async fn set_published(
    pool: &PgPool,
    kind: ArtifactKind,
    name: &str,
    version: &str,
    published: bool,
) -> Result<Option<ArtifactVersion>> {
    let row = if published {
        sqlx::query(&format!(
            "UPDATE artifact_versions SET published = true, unpublished_at = NULL, updated_at = now() \
             WHERE kind = $1 AND name = $2 AND version = $3 RETURNING {ARTIFACT_COLUMNS}"
        ))
    } else {
        sqlx::query(&format!(
            "UPDATE artifact_versions SET published = false, unpublished_at = now(), updated_at = now() \
             WHERE kind = $1 AND name = $2 AND version = $3 RETURNING {ARTIFACT_COLUMNS}"
        ))
    }
    .bind(kind)
    .bind(name)
    .bind(version)
    .fetch_optional(pool)
    .await
    .context("toggling publish state")?;

    row.as_ref().map(row_to_artifact).transpose()
}

pub async fn delete(pool: &PgPool, kind: ArtifactKind, name: &str, version: &str) -> Result<bool> {
    let result = sqlx::query("DELETE FROM artifact_versions WHERE kind = $1 AND name = $2 AND version = $3")
        .bind(kind)
        .bind(name)
        .bind(version)
        .execute(pool)
        .await
        .context("deleting artifact version")?;
    Ok(result.rows_affected() > 0)
}

pub async fn set_embedding(
    pool: &PgPool,
    kind: ArtifactKind,
    name: &str,
    version: &str,
    embedding: &SemanticEmbedding,
) -> Result<bool> {
    let value = serde_json::to_value(embedding).context("serializing embedding")?;
    let result = sqlx::query(
        "UPDATE artifact_versions SET embedding = $4 WHERE kind = $1 AND name = $2 AND version = $3",
    )
    .bind(kind)
    .bind(name)
    .bind(version)
    .bind(value)
    .execute(pool)
    .await
    .context("setting embedding")?;
    Ok(result.rows_affected() > 0)
}

pub async fn upsert_readme(pool: &PgPool, readme: &Readme) -> Result<()> {
    sqlx::query(
        "INSERT INTO readmes (kind, name, version, content, content_type, size, sha256, fetched_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
         ON CONFLICT (kind, name, version) DO UPDATE SET \
         content = EXCLUDED.content, content_type = EXCLUDED.content_type, \
         size = EXCLUDED.size, sha256 = EXCLUDED.sha256, fetched_at = EXCLUDED.fetched_at",
    )
    .bind(readme.kind)
    .bind(&readme.name)
    .bind(&readme.version)
    .bind(&readme.content)
    .bind(&readme.content_type)
    .bind(readme.size)
    .bind(&readme.sha256)
    .bind(readme.fetched_at)
    .execute(pool)
    .await
    .context("upserting readme")?;
    Ok(())
}

pub async fn get_readme(pool: &PgPool, kind: ArtifactKind, name: &str, version: &str) -> Result<Option<Readme>> {
    let row = sqlx::query(
        "SELECT kind, name, version, content, content_type, size, sha256, fetched_at \
         FROM readmes WHERE kind = $1 AND name = $2 AND version = $3",
    )
    .bind(kind)
    .bind(name)
    .bind(version)
    .fetch_optional(pool)
    .await
    .context("fetching readme")?;

    row.map(|row| {
        Ok(Readme {
            kind: row.try_get("kind")?,
            name: row.try_get("name")?,
            version: row.try_get("version")?,
            content: row.try_get("content")?,
            content_type: row.try_get("content_type")?,
            size: row.try_get("size")?,
            sha256: row.try_get("sha256")?,
            fetched_at: row.try_get("fetched_at")?,
        })
    })
    .transpose()
}

pub use extract_remote_urls as remote_urls_of;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advisory_lock_key_is_stable_and_nonnegative() {
        let a = advisory_lock_key(ArtifactKind::Server, "com.ex/foo");
        let b = advisory_lock_key(ArtifactKind::Server, "com.ex/foo");
        assert_eq!(a, b);
        assert!(a >= 0);
    }

    #[test]
    fn advisory_lock_key_differs_by_kind_and_name() {
        let a = advisory_lock_key(ArtifactKind::Server, "com.ex/foo");
        let b = advisory_lock_key(ArtifactKind::Agent, "com.ex/foo");
        let c = advisory_lock_key(ArtifactKind::Server, "com.ex/bar");
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn extracts_remote_urls_from_value() {
        let value = serde_json::json!({"remotes": [{"url": "https://a"}, {"url": "https://b"}]});
        assert_eq!(extract_remote_urls(&value), vec!["https://a", "https://b"]);
    }

    #[test]
    fn cosine_distance_identical_vectors_is_zero() {
        let v = vec![0.1, 0.9, 0.0];
        assert!(cosine_distance(&v, &v).abs() < 1e-6);
    }

    #[test]
    fn cosine_distance_orders_by_similarity() {
        let query = vec![0.1, 0.95, 0.0];
        let backup = vec![0.1, 0.9, 0.0];
        let weather = vec![0.9, 0.1, 0.0];
        assert!(cosine_distance(&query, &backup) < cosine_distance(&query, &weather));
    }
}
