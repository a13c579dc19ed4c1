//! chart-mirror CLI entry point.

use clap::Parser;
use tracing_subscriber::EnvFilter;

use chart_mirror_cli::commands::{dispatch, Cli, LogFormat};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.default_log_level().to_string()));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    match cli.log_format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }

    if let Err(e) = dispatch(cli).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
