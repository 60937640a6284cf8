pub mod compose;
#[cfg(feature = "kubernetes")]
pub mod kubernetes;

use async_trait::async_trait;

use super::{DesiredResource, ReconcileOutcome};

/// Converts a group of desired resources into either a compose document or
/// a set of Kubernetes custom resources and drives the runtime toward that
/// state.
#[async_trait]
pub trait RuntimeTranslator: Send + Sync {
    /// Diff `desired` against what the runtime currently holds for this
    /// target and converge: create missing, update changed, delete
    /// anything previously managed here that's no longer desired.
    async fn reconcile(&self, desired: &[DesiredResource]) -> anyhow::Result<ReconcileOutcome>;
}
