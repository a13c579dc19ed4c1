//! chart-mirror Engine
//!
//! Mirrors the container images a Helm chart deploys into a private
//! registry and produces the values overlay that points the chart at the
//! mirrored copies.
//!
//! ```text
//! chart dir ──render──▶ manifests ──discover──▶ image refs
//!                                                   │
//!                                  plan destinations, ensure repositories
//!                                                   │
//!                          TransferExecutor (tier 1 → 4, per image)
//!                                                   │
//!                         succeeded pairs ──▶ generate_overlay(values)
//! ```

pub mod chart;
pub mod discovery;
pub mod mirror;
pub mod oci;
pub mod overlay;
pub mod transfer;

#[cfg(test)]
mod testing;

pub use chart::{default_overrides, ChartMetadata, ChartRenderer, HelmCli};
pub use discovery::extract_image_references;
pub use mirror::{ChartMirror, MirrorPlan, MirrorReport, PlannedImage, SkippedImage};
pub use oci::{
    normalize, AuthGate, DistributionRegistry, DockerCli, ImageReference, RegistryAuth,
    RegistryManager, RegistryTool, ToolLoginGate,
};
pub use overlay::{generate_overlay, Overlay, OverlayEntry, OverlayWarning};
pub use transfer::{Tier, TransferExecutor, TransferResult, TransferSettings};
