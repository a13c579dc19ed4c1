//! `chart-mirror overlay` command.

use std::path::PathBuf;

use chart_mirror_engine::overlay::{load_values, write_overlay};
use chart_mirror_engine::{generate_overlay, normalize, ImageReference};
use clap::Args;

#[derive(Args)]
pub struct OverlayArgs {
    /// Chart values file to scan
    pub values: PathBuf,

    /// Source to destination mapping (SRC=DST, repeatable)
    #[arg(long = "map", required = true, value_parser = super::parse_key_value)]
    pub map: Vec<(String, String)>,

    /// Write the overlay here instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

pub async fn execute(args: OverlayArgs) -> Result<(), Box<dyn std::error::Error>> {
    let tree = load_values(&args.values)?;

    let mut sources = Vec::with_capacity(args.map.len());
    let mut destinations = Vec::with_capacity(args.map.len());
    for (source, destination) in &args.map {
        sources.push(ImageReference::parse(&normalize(source))?);
        destinations.push(ImageReference::parse(destination)?);
    }

    let overlay = generate_overlay(&tree, &sources, &destinations);
    for warning in &overlay.warnings {
        eprintln!("warning: {warning}");
    }

    match &args.output {
        Some(path) => {
            write_overlay(path, &overlay.document)?;
            println!("Overlay: {} ({} entries)", path.display(), overlay.entries.len());
        }
        None => print!("{}", serde_yaml::to_string(&overlay.document)?),
    }
    Ok(())
}
