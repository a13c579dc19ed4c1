//! Image references, platform resolution and the registry-facing seams.
//!
//! ```text
//! chart image string ──normalize──▶ ImageReference
//!                                       │
//!          ┌────────────────────────────┼─────────────────────────┐
//!          ▼                            ▼                         ▼
//!    RegistryTool (docker)       AuthGate (login)        RegistryManager (HTTP)
//!    pull/tag/push/save/load     once per host           tag digest / delete
//! ```

pub mod credentials;
pub mod docker;
pub mod platform;
pub mod reference;
pub mod registry;
pub mod tool;

pub use credentials::{AuthGate, CredentialStore, RegistryAuth, ToolLoginGate};
pub use docker::DockerCli;
pub use platform::{
    choose_platform_sequence, pull_with_policy, resolve_platform_digest, select_platform_digest,
    ManifestIndexEntry,
};
pub use reference::{normalize, strip_digest, ImageReference};
pub use registry::{DistributionRegistry, RegistryManager};
pub use tool::RegistryTool;
