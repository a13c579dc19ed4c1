//! chart-mirror CLI - mirror a Helm chart's images into a private registry.

pub mod commands;
pub mod output;
