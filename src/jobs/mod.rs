pub mod indexer;
pub mod manager;

pub use indexer::{run_index, IndexOptions, IndexResult, IndexStats};
pub use manager::{Job, JobId, JobManager, JobProgress, JobStatus, JobType};
