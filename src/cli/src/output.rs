//! Table formatting helpers for CLI output.

use chart_mirror_engine::{MirrorPlan, MirrorReport, TransferResult};
use comfy_table::{ContentArrangement, Table};

/// Create a styled table with the given headers.
pub fn new_table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.load_preset(comfy_table::presets::NOTHING);
    table.set_header(headers);
    table
}

/// Per-image summary table for a mirror run.
pub fn report_table(report: &MirrorReport) -> Table {
    let mut table = new_table(&["SOURCE", "DESTINATION", "STATUS", "TIER", "ATTEMPTS"]);
    for result in &report.results {
        table.add_row(vec![
            result.source.clone(),
            result.destination.clone(),
            status(result).to_string(),
            result.final_tier.number().to_string(),
            result.attempts.len().to_string(),
        ]);
    }
    table
}

/// Planned transfers for a scan-only run.
pub fn plan_table(plan: &MirrorPlan) -> Table {
    let mut table = new_table(&["SOURCE", "DESTINATION"]);
    for image in &plan.images {
        table.add_row(vec![image.source.clone(), image.destination.clone()]);
    }
    table
}

pub fn print_plan(plan: &MirrorPlan) {
    println!("{}", plan_table(plan));
    for skipped in &plan.skipped {
        println!("SKIP {}: {}", skipped.reference, skipped.reason);
    }
    println!(
        "{}: {} to mirror, {} skipped",
        plan.chart,
        plan.images.len(),
        plan.skipped.len()
    );
}

fn status(result: &TransferResult) -> &'static str {
    if result.succeeded {
        "mirrored"
    } else {
        "failed"
    }
}

/// Print the table, one summary line per failure, and overlay warnings.
pub fn print_report(report: &MirrorReport) {
    println!("{}", report_table(report));
    for result in report.results.iter().filter(|r| !r.succeeded) {
        println!("{}", result.summary_line());
    }
    for skipped in &report.skipped {
        println!("SKIP {}: {}", skipped.reference, skipped.reason);
    }
    for warning in &report.overlay.warnings {
        println!("warning: {warning}");
    }
    println!(
        "{}: {} mirrored, {} failed, {} overlay entries",
        report.chart,
        report.succeeded(),
        report.failed(),
        report.overlay.entries.len()
    );
}
