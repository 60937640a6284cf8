pub mod reconciler;
pub mod translator;

pub use reconciler::Reconciler;

use serde::{Deserialize, Serialize};

use crate::catalog::ArtifactKind;
use crate::deployment::RunRequest;

/// Identifies one (kind, name, version) deployment row throughout the
/// reconcile pipeline, independent of its current desired/observed state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeploymentKey {
    pub kind: ArtifactKind,
    pub name: String,
    pub version: String,
}

impl std::fmt::Display for DeploymentKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}@{}", self.kind, self.name, self.version)
    }
}

/// One resource the reconciler wants to exist on a runtime target, after
/// agent-manifest resolution has expanded any `registry`-typed children
/// into their own entries.
#[derive(Debug, Clone)]
pub struct DesiredResource {
    pub key: DeploymentKey,
    pub run_request: RunRequest,
    /// `true` for a resource synthesized by expanding an agent's manifest
    /// rather than read directly off the Deployment table — it has no
    /// Deployment row of its own to mark failed on error.
    pub synthesized: bool,
}

/// Outcome of one `RuntimeTranslator::reconcile` call: the first error, if
/// any, is returned to the caller, but affected rows are still marked
/// `status = failed` so partial progress isn't lost.
#[derive(Debug, Default)]
pub struct ReconcileOutcome {
    pub created: Vec<DeploymentKey>,
    pub updated: Vec<DeploymentKey>,
    pub deleted: Vec<String>,
    pub failures: Vec<(DeploymentKey, String)>,
}

impl ReconcileOutcome {
    pub fn first_error(&self) -> Option<&str> {
        self.failures.first().map(|(_, msg)| msg.as_str())
    }
}
