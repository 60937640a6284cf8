use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::info;

use crate::error::ServerError;

/// The only job type this control plane currently runs; kept as an enum
/// (rather than a bare string) so `CreateJob`'s single-flight check is a
/// typed comparison
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Index,
}

impl JobType {
    fn prefix(&self) -> &'static str {
        match self {
            JobType::Index => "index",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// Overwritten wholesale on every update: "Progress updates
/// are O(1), overwrite the full JobProgress."
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobProgress {
    pub total: u64,
    pub processed: u64,
    pub updated: u64,
    pub skipped: u64,
    pub failures: u64,
}

/// Opaque job identifier, `<type>-<hex(random 6 bytes)>`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub String);

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn new_job_id(job_type: JobType) -> JobId {
    let mut bytes = [0u8; 6];
    rand::thread_rng().fill_bytes(&mut bytes);
    JobId(format!("{}-{}", job_type.prefix(), hex::encode(bytes)))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub job_type: JobType,
    pub status: JobStatus,
    pub progress: JobProgress,
    /// Present only once the job reaches a terminal status
    pub result: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// In-memory single-flight job tracker Jobs never touch
/// Postgres — "the Job Manager exclusively owns in-memory Job records"
/// — so this is a plain `RwLock<HashMap>`, the same shape the
/// teacher uses for its in-process caches, rather than a store-backed type.
pub struct JobManager {
    jobs: RwLock<HashMap<JobId, Job>>,
    ttl: chrono::Duration,
}

impl JobManager {
    pub fn new(ttl_secs: u64) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            ttl: chrono::Duration::seconds(ttl_secs as i64),
        }
    }

    /// Starts a new job of `job_type`, refusing with `AlreadyRunning` if a
    /// non-terminal job of the same type exists.
    pub async fn create_job(self: &Arc<Self>, job_type: JobType) -> Result<Job, ServerError> {
        let mut jobs = self.jobs.write().await;
        if jobs.values().any(|j| j.job_type == job_type && !j.status.is_terminal()) {
            return Err(ServerError::already_running(format!(
                "a {job_type:?} job is already running"
            )));
        }

        let now = Utc::now();
        let job = Job {
            id: new_job_id(job_type),
            job_type,
            status: JobStatus::Pending,
            progress: JobProgress::default(),
            result: None,
            created_at: now,
            updated_at: now,
        };
        jobs.insert(job.id.clone(), job.clone());
        Ok(job)
    }

    pub async fn get(&self, id: &JobId) -> Option<Job> {
        self.jobs.read().await.get(id).cloned()
    }

    pub async fn mark_running(&self, id: &JobId) {
        self.transition(id, |job| job.status = JobStatus::Running).await;
    }

    pub async fn update_progress(&self, id: &JobId, progress: JobProgress) {
        self.transition(id, |job| job.progress = progress).await;
    }

    pub async fn complete(&self, id: &JobId, result: serde_json::Value) {
        self.transition(id, |job| {
            job.status = JobStatus::Completed;
            job.result = Some(result);
        })
        .await;
    }

    pub async fn fail(&self, id: &JobId, result: serde_json::Value) {
        self.transition(id, |job| {
            job.status = JobStatus::Failed;
            job.result = Some(result);
        })
        .await;
    }

    async fn transition(&self, id: &JobId, mutate: impl FnOnce(&mut Job)) {
        let mut jobs = self.jobs.write().await;
        if let Some(job) = jobs.get_mut(id) {
            mutate(job);
            job.updated_at = Utc::now();
        }
    }

    /// Evicts terminal jobs older than the configured TTL. Called from a
    /// background ticker every `job_reap_interval_secs` ("a
    /// single background ticker at 10-minute intervals evicts them").
    pub async fn reap_expired(&self) {
        let cutoff = Utc::now() - self.ttl;
        let mut jobs = self.jobs.write().await;
        let before = jobs.len();
        jobs.retain(|_, job| !(job.status.is_terminal() && job.updated_at < cutoff));
        let evicted = before - jobs.len();
        if evicted > 0 {
            info!(evicted, "reaped expired jobs");
        }
    }

    pub fn spawn_reaper(self: Arc<Self>, interval_secs: u64) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_secs(interval_secs));
            loop {
                ticker.tick().await;
                self.reap_expired().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn single_flight_rejects_concurrent_same_type_job() {
        let manager = Arc::new(JobManager::new(3600));
        let first = manager.create_job(JobType::Index).await.unwrap();
        let second = manager.create_job(JobType::Index).await;
        assert!(second.is_err());
        manager.complete(&first.id, serde_json::json!({})).await;
        let third = manager.create_job(JobType::Index).await;
        assert!(third.is_ok());
    }

    #[tokio::test]
    async fn reap_expired_removes_only_old_terminal_jobs() {
        let manager = Arc::new(JobManager::new(0));
        let job = manager.create_job(JobType::Index).await.unwrap();
        manager.complete(&job.id, serde_json::json!({})).await;
        manager.reap_expired().await;
        assert!(manager.get(&job.id).await.is_none());
    }

    #[tokio::test]
    async fn running_job_is_never_reaped() {
        let manager = Arc::new(JobManager::new(0));
        let job = manager.create_job(JobType::Index).await.unwrap();
        manager.mark_running(&job.id).await;
        manager.reap_expired().await;
        assert!(manager.get(&job.id).await.is_some());
    }
}
