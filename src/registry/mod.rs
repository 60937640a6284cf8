pub mod semver_cmp;
pub mod service;
pub mod validation;

pub use service::{CreateArtifactInput, RegistryService, UpdateArtifactInput};
