//! `chart-mirror version` command.

use clap::Args;

#[derive(Args)]
pub struct VersionArgs;

pub async fn execute(_args: VersionArgs) -> Result<(), Box<dyn std::error::Error>> {
    println!("chart-mirror version {}", chart_mirror_core::VERSION);
    Ok(())
}
