pub mod models;
pub mod resolver;
pub mod store;

pub use models::*;
pub use resolver::{resolve_agent_manifest, ArtifactRef, RunRequest};
