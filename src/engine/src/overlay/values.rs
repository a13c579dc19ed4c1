//! Value-tree codec: load chart values, write overlays, merge.

use std::path::Path;

use chart_mirror_core::error::{MirrorError, Result};
use serde_yaml::{Mapping, Value};

/// Load a values file. An empty file is an empty mapping.
pub fn load_values(path: &Path) -> Result<Value> {
    let data = std::fs::read_to_string(path).map_err(|e| {
        MirrorError::Other(format!("Failed to read values file {}: {}", path.display(), e))
    })?;
    if data.trim().is_empty() {
        return Ok(Value::Mapping(Mapping::new()));
    }
    let value: Value = serde_yaml::from_str(&data).map_err(|e| {
        MirrorError::SerializationError(format!("{}: {}", path.display(), e))
    })?;
    Ok(match value {
        Value::Null => Value::Mapping(Mapping::new()),
        other => other,
    })
}

/// Write an overlay document as YAML, creating parent directories.
pub fn write_overlay(path: &Path, overlay: &Value) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let data = serde_yaml::to_string(overlay)?;
    std::fs::write(path, data)?;
    tracing::info!(path = %path.display(), "Wrote values overlay");
    Ok(())
}

/// Deep merge: mappings merge key by key, anything else in `overlay`
/// replaces the base value.
pub fn merge_values(base: Value, overlay: &Value) -> Value {
    match (base, overlay) {
        (Value::Mapping(mut base), Value::Mapping(overlay)) => {
            for (key, value) in overlay {
                // Merge in place to keep the base key order
                match base.get_mut(key) {
                    Some(existing) => {
                        let current = std::mem::replace(existing, Value::Null);
                        *existing = merge_values(current, value);
                    }
                    None => {
                        base.insert(key.clone(), value.clone());
                    }
                }
            }
            Value::Mapping(base)
        }
        (_, overlay) => overlay.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn yaml(text: &str) -> Value {
        serde_yaml::from_str(text).unwrap()
    }

    #[test]
    fn test_load_empty_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("values.yaml");
        std::fs::write(&path, "\n# only a comment\n").unwrap();
        assert_eq!(load_values(&path).unwrap(), Value::Mapping(Mapping::new()));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = TempDir::new().unwrap();
        assert!(load_values(&dir.path().join("absent.yaml")).is_err());
    }

    #[test]
    fn test_write_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out").join("values.yaml");
        let overlay = yaml("image:\n  repository: dst.example.com/app\n  tag: '1.0'\n");
        write_overlay(&path, &overlay).unwrap();
        assert_eq!(load_values(&path).unwrap(), overlay);
    }

    #[test]
    fn test_merge_values_deep() {
        let base = yaml(
            r#"
replicaCount: 1
image:
  repository: src.example.com/team/app
  tag: "1.0"
  pullPolicy: IfNotPresent
sidecars:
  - a
  - b
"#,
        );
        let overlay = yaml(
            r#"
image:
  repository: dst.example.com/mirror/app
sidecars:
  - c
"#,
        );
        let merged = merge_values(base, &overlay);
        assert_eq!(merged["replicaCount"].as_u64(), Some(1));
        assert_eq!(
            merged["image"]["repository"].as_str(),
            Some("dst.example.com/mirror/app")
        );
        assert_eq!(merged["image"]["pullPolicy"].as_str(), Some("IfNotPresent"));
        // Lists are replaced wholesale
        assert_eq!(merged["sidecars"], yaml("[c]"));
    }
}
