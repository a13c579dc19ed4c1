//! Integration test: run the `chart-mirror` binary for offline commands.
//!
//! Only commands that need neither docker nor helm are exercised here.
//!
//! ## Running
//!
//! ```bash
//! cargo test -p chart-mirror-cli --test overlay_cli
//! ```

use std::process::Command;

use tempfile::TempDir;

fn chart_mirror(args: &[&str]) -> (String, String, bool) {
    let output = Command::new(env!("CARGO_BIN_EXE_chart-mirror"))
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .expect("failed to run chart-mirror");
    (
        String::from_utf8_lossy(&output.stdout).to_string(),
        String::from_utf8_lossy(&output.stderr).to_string(),
        output.status.success(),
    )
}

#[test]
fn test_overlay_prints_yaml() {
    let dir = TempDir::new().unwrap();
    let values = dir.path().join("values.yaml");
    std::fs::write(
        &values,
        r#"
image:
  registry: quay.io
  repository: jetstack/cert-manager-controller
  tag: v1.14.4
"#,
    )
    .unwrap();

    let (stdout, _, ok) = chart_mirror(&[
        "overlay",
        values.to_str().unwrap(),
        "--map",
        "quay.io/jetstack/cert-manager-controller:v1.14.4=registry.internal/mirror/cert-manager/cert-manager-controller:v1.14.4",
    ]);

    assert!(ok);
    let overlay: serde_yaml::Value = serde_yaml::from_str(&stdout).unwrap();
    assert_eq!(overlay["image"]["registry"].as_str(), Some("registry.internal"));
    assert_eq!(
        overlay["image"]["repository"].as_str(),
        Some("mirror/cert-manager/cert-manager-controller")
    );
    assert_eq!(overlay["image"]["tag"].as_str(), Some("v1.14.4"));
}

#[test]
fn test_overlay_warns_on_unmatched_image() {
    let dir = TempDir::new().unwrap();
    let values = dir.path().join("values.yaml");
    std::fs::write(&values, "replicaCount: 2\n").unwrap();

    let (_, stderr, ok) = chart_mirror(&[
        "overlay",
        values.to_str().unwrap(),
        "--map",
        "quay.io/org/app:1.0=registry.internal/app:1.0",
    ]);

    assert!(ok);
    assert!(stderr.contains("no value location references quay.io/org/app:1.0"));
}

#[test]
fn test_mirror_without_registry_fails() {
    let dir = TempDir::new().unwrap();
    let (_, stderr, ok) = chart_mirror(&["mirror", dir.path().to_str().unwrap()]);
    assert!(!ok);
    assert!(stderr.contains("Error:"));
}

#[test]
fn test_version() {
    let (stdout, _, ok) = chart_mirror(&["version"]);
    assert!(ok);
    assert!(stdout.starts_with("chart-mirror version "));
}
