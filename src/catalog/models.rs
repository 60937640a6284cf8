use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum number of versions retained per (kind, name)
pub const MAX_VERSIONS: i64 = 10_000;

/// One of the three artifact kinds the catalog tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text")]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Server,
    Agent,
    Skill,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::Server => "server",
            ArtifactKind::Agent => "agent",
            ArtifactKind::Skill => "skill",
        }
    }

    /// URL path segment used by the HTTP surface (`servers`, `agents`, `skills`).
    pub fn path_segment(&self) -> &'static str {
        match self {
            ArtifactKind::Server => "servers",
            ArtifactKind::Agent => "agents",
            ArtifactKind::Skill => "skills",
        }
    }
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Life-stage of an artifact version row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text")]
#[serde(rename_all = "snake_case")]
pub enum ArtifactStatus {
    Active,
    Deprecated,
    Deleted,
}

impl std::fmt::Display for ArtifactStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ArtifactStatus::Active => "active",
            ArtifactStatus::Deprecated => "deprecated",
            ArtifactStatus::Deleted => "deleted",
        };
        write!(f, "{}", s)
    }
}

/// Embedding metadata persisted alongside the vector itself
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticEmbedding {
    pub vector: Vec<f32>,
    pub provider: String,
    pub model: String,
    pub checksum: String,
    pub generated_at: DateTime<Utc>,
}

impl SemanticEmbedding {
    pub fn dimensions(&self) -> usize {
        self.vector.len()
    }
}

/// A single (kind, name, version) row as stored and returned to callers.
///
/// Rows are assembled by hand in `catalog::store` (via `from_row`) rather
/// than `#[derive(sqlx::FromRow)]`: the `embedding` column is a nullable
/// JSONB blob decoded into `SemanticEmbedding`, and most queries here are
/// built dynamically through `QueryBuilder` rather than the `query_as!`
/// macro, so there is no fixed column list for the derive to match against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactVersion {
    pub kind: ArtifactKind,
    pub name: String,
    pub version: String,
    pub status: ArtifactStatus,
    pub published_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub is_latest: bool,
    pub published: bool,
    pub unpublished_at: Option<DateTime<Utc>>,
    /// The artifact's full manifest, preserved bit-for-bit (under canonical
    /// encoding) for the external API.
    pub value: serde_json::Value,
    pub embedding: Option<SemanticEmbedding>,
}

/// A semantic search hit annotated with its similarity score
#[derive(Debug, Clone, Serialize)]
pub struct ScoredArtifact {
    #[serde(flatten)]
    pub artifact: ArtifactVersion,
    pub semantic: Option<SemanticScore>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SemanticScore {
    pub score: f32,
}

/// README attached to a single artifact version. At most one per version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Readme {
    pub kind: ArtifactKind,
    pub name: String,
    pub version: String,
    #[serde(skip_serializing)]
    pub content: Vec<u8>,
    pub content_type: String,
    pub size: i64,
    pub sha256: String,
    pub fetched_at: DateTime<Utc>,
}

/// Semantic sub-filter
#[derive(Debug, Clone, Default)]
pub struct SemanticFilter {
    pub raw_query: String,
    pub threshold: Option<f32>,
    pub query_embedding: Option<Vec<f32>>,
    pub hybrid_substring: bool,
}

/// Filter surface accepted by `CatalogStore::list`
#[derive(Debug, Clone, Default)]
pub struct ArtifactFilter {
    pub kind: ArtifactKind,
    pub name: Option<String>,
    pub remote_url: Option<String>,
    pub version: Option<String>,
    pub is_latest: Option<bool>,
    pub published: Option<bool>,
    pub updated_since: Option<DateTime<Utc>>,
    pub substring_name: Option<String>,
    pub semantic: Option<SemanticFilter>,
}

impl Default for ArtifactKind {
    fn default() -> Self {
        ArtifactKind::Server
    }
}

/// Opaque `name:version` pagination cursor
///
/// A malformed cursor (no `:`) degrades to a name-only cursor rather than
/// erroring — the whole string is treated as `name` with no `version`
/// bound, so e.g. `foo` still iterates correctly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor {
    pub name: String,
    pub version: Option<String>,
}

impl Cursor {
    pub fn parse(raw: &str) -> Self {
        match raw.split_once(':') {
            Some((name, version)) => Cursor {
                name: name.to_string(),
                version: Some(version.to_string()),
            },
            None => Cursor {
                name: raw.to_string(),
                version: None,
            },
        }
    }

    pub fn encode(&self) -> String {
        match &self.version {
            Some(v) => format!("{}:{}", self.name, v),
            None => self.name.clone(),
        }
    }
}

pub const DEFAULT_PAGE_LIMIT: i64 = 30;
pub const MAX_PAGE_LIMIT: i64 = 100;

#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<String>,
}
