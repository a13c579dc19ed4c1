//! Paths into a value tree and the overlay document built from them.

use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};

/// One step of a path into a value tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

/// Render a path as `a.b[0].c`.
pub fn display_path(path: &[PathSegment]) -> String {
    let mut out = String::new();
    for segment in path {
        match segment {
            PathSegment::Key(key) => {
                if !out.is_empty() {
                    out.push('.');
                }
                out.push_str(key);
            }
            PathSegment::Index(index) => out.push_str(&format!("[{}]", index)),
        }
    }
    out
}

/// Minimal overlay tree.
///
/// Helm merges mappings but replaces lists wholesale, so a write whose path
/// crosses a list index first copies that whole list from the source tree;
/// the write then lands inside the copy.
#[derive(Debug, Clone)]
pub struct OverlayDocument {
    root: Value,
}

impl Default for OverlayDocument {
    fn default() -> Self {
        Self {
            root: Value::Mapping(Mapping::new()),
        }
    }
}

impl OverlayDocument {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge `fields` into the mapping at `path`. Returns false when the path
    /// cannot be materialized (e.g. a list missing from the source tree).
    pub fn set(&mut self, path: &[PathSegment], fields: Mapping, source: &Value) -> bool {
        set_at(&mut self.root, Some(source), path, Value::Mapping(fields))
    }

    pub fn is_empty(&self) -> bool {
        matches!(&self.root, Value::Mapping(m) if m.is_empty())
    }

    pub fn as_value(&self) -> &Value {
        &self.root
    }

    pub fn into_value(self) -> Value {
        self.root
    }
}

fn set_at(target: &mut Value, source: Option<&Value>, path: &[PathSegment], value: Value) -> bool {
    let (segment, rest) = match path.split_first() {
        Some(split) => split,
        None => {
            merge_into(target, value);
            return true;
        }
    };

    match segment {
        PathSegment::Key(key) => {
            if !target.is_mapping() {
                *target = Value::Mapping(Mapping::new());
            }
            let map = match target {
                Value::Mapping(map) => map,
                _ => return false,
            };
            let source_child = source.and_then(|s| s.get(key.as_str()));
            let key = Value::String(key.clone());

            if !map.contains_key(&key) {
                let seed = match rest.first() {
                    Some(PathSegment::Index(_)) => match source_child {
                        Some(list @ Value::Sequence(_)) => list.clone(),
                        _ => return false,
                    },
                    _ => Value::Null,
                };
                map.insert(key.clone(), seed);
            }

            match map.get_mut(&key) {
                Some(child) => set_at(child, source_child, rest, value),
                None => false,
            }
        }
        PathSegment::Index(index) => {
            let list = match target {
                Value::Sequence(list) => list,
                _ => return false,
            };
            let source_child = source.and_then(|s| s.get(*index));
            match list.get_mut(*index) {
                Some(child) => set_at(child, source_child, rest, value),
                None => false,
            }
        }
    }
}

/// Mappings absorb the new keys; anything else is replaced.
fn merge_into(target: &mut Value, value: Value) {
    match (target, value) {
        (Value::Mapping(existing), Value::Mapping(new)) => {
            for (k, v) in new {
                existing.insert(k, v);
            }
        }
        (target, value) => *target = value,
    }
}
