//! Overlay Generator
//!
//! Walks a chart's value tree once, pre-order, and for every location that
//! references a transferred source image emits replacement fields pointing
//! at the mirrored destination, in the schema the chart already uses.

mod document;
mod schema;
pub mod values;

use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};

use crate::oci::reference::ImageReference;

pub use document::{display_path, OverlayDocument, PathSegment};
pub use schema::{classify, mentions_source, NodeSchema, SchemaKind};
pub use values::{load_values, merge_values, write_overlay};

/// One rewritten location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverlayEntry {
    pub path: Vec<PathSegment>,
    pub schema: SchemaKind,
    pub fields: Mapping,
    /// Source image this entry redirects
    pub source: String,
}

/// Soft findings of the walk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum OverlayWarning {
    /// A transferred image matched no location in the value tree.
    SchemaMiss { source: String, destination: String },
    /// A location matched but could not be written (e.g. it sits in a list
    /// element that cannot be wrapped).
    Unwritable { source: String, path: String },
}

impl std::fmt::Display for OverlayWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SchemaMiss {
                source,
                destination,
            } => write!(
                f,
                "no value location references {} (mirrored as {})",
                source, destination
            ),
            Self::Unwritable { source, path } => {
                write!(f, "cannot write overlay for {} at {}", source, path)
            }
        }
    }
}

/// Result of overlay generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Overlay {
    /// Entries in discovery order, unique by path
    pub entries: Vec<OverlayEntry>,
    /// The overlay tree, ready to merge over chart defaults
    pub document: Value,
    pub warnings: Vec<OverlayWarning>,
}

impl Overlay {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

struct Walker<'a> {
    tree: &'a Value,
    pairs: Vec<(&'a ImageReference, &'a ImageReference)>,
    matched: Vec<bool>,
    entries: Vec<OverlayEntry>,
    document: OverlayDocument,
    warnings: Vec<OverlayWarning>,
}

impl<'a> Walker<'a> {
    fn walk(&mut self, node: &'a Value, path: &mut Vec<PathSegment>) {
        match node {
            Value::Mapping(map) => {
                let claimed = self.match_node(map, path);
                for (key, value) in map {
                    let key = match key_string(key) {
                        Some(k) => k,
                        None => continue,
                    };
                    path.push(PathSegment::Key(key));
                    match value {
                        Value::String(leaf) => self.fallback(leaf, path, &claimed),
                        Value::Mapping(_) | Value::Sequence(_) | Value::Tagged(_) => {
                            self.walk(value, path)
                        }
                        _ => {}
                    }
                    path.pop();
                }
            }
            Value::Sequence(items) => {
                for (index, item) in items.iter().enumerate() {
                    path.push(PathSegment::Index(index));
                    self.walk(item, path);
                    path.pop();
                }
            }
            Value::Tagged(tagged) => self.walk(&tagged.value, path),
            _ => {}
        }
    }

    /// Schemas A-C at a mapping node. Returns, per pair, whether it
    /// claimed the node.
    fn match_node(&mut self, map: &Mapping, path: &[PathSegment]) -> Vec<bool> {
        let mut claimed = vec![false; self.pairs.len()];
        for i in 0..self.pairs.len() {
            let (source, destination) = self.pairs[i];
            if let Some(schema) = classify(map, source) {
                claimed[i] = true;
                self.emit(i, path.to_vec(), schema.kind(), schema.fields(destination));
            }
        }
        claimed
    }

    /// Schema D for a leaf string, for pairs that did not claim its node.
    fn fallback(&mut self, leaf: &str, leaf_path: &[PathSegment], claimed: &[bool]) {
        let index = match self
            .pairs
            .iter()
            .enumerate()
            .position(|(i, (source, _))| !claimed[i] && mentions_source(leaf, source))
        {
            Some(i) => i,
            None => return,
        };

        // The key holding the leaf's enclosing mapping
        let target = if leaf_path.len() >= 2 {
            leaf_path[..leaf_path.len() - 1].to_vec()
        } else {
            leaf_path.to_vec()
        };
        if matches!(target.last(), Some(PathSegment::Index(_))) {
            // Wrapping would replace a whole list element
            self.matched[index] = true;
            self.warnings.push(OverlayWarning::Unwritable {
                source: self.pairs[index].0.full_reference(),
                path: display_path(leaf_path),
            });
            return;
        }

        let destination = self.pairs[index].1;
        self.emit(
            index,
            target,
            SchemaKind::FallbackWrap,
            schema::fallback_fields(destination),
        );
    }

    fn emit(&mut self, pair: usize, path: Vec<PathSegment>, kind: SchemaKind, fields: Mapping) {
        self.matched[pair] = true;
        let source = self.pairs[pair].0.full_reference();
        let shown = display_path(&path);

        if let Some(existing) = self.entries.iter().find(|e| e.path == path) {
            if existing.source != source {
                tracing::warn!(path = %shown, source = %source, kept = %existing.source, "Overlay path already written for another image");
                self.warnings.push(OverlayWarning::Unwritable {
                    source,
                    path: shown,
                });
            } else {
                tracing::debug!(path = %shown, source = %source, "Overlay path already written; keeping first");
            }
            return;
        }
        if !self.document.set(&path, fields.clone(), self.tree) {
            tracing::warn!(path = %shown, source = %source, "Overlay path could not be written");
            self.warnings.push(OverlayWarning::Unwritable {
                source,
                path: shown,
            });
            return;
        }

        tracing::info!(path = %shown, schema = %kind, source = %source, "Found image reference");
        self.entries.push(OverlayEntry {
            path,
            schema: kind,
            fields,
            source,
        });
    }
}

fn key_string(key: &Value) -> Option<String> {
    match key {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Generate the overlay redirecting each `sources[i]` to `destinations[i]`.
///
/// Only call this with pairs whose transfer succeeded. Pairs beyond the
/// shorter of the two slices are ignored.
pub fn generate_overlay(
    tree: &Value,
    sources: &[ImageReference],
    destinations: &[ImageReference],
) -> Overlay {
    if sources.len() != destinations.len() {
        tracing::warn!(
            sources = sources.len(),
            destinations = destinations.len(),
            "Source and destination lists differ in length; extra entries ignored"
        );
    }
    let pairs: Vec<_> = sources.iter().zip(destinations.iter()).collect();

    let mut walker = Walker {
        tree,
        matched: vec![false; pairs.len()],
        pairs,
        entries: Vec::new(),
        document: OverlayDocument::new(),
        warnings: Vec::new(),
    };
    walker.walk(tree, &mut Vec::new());

    for (i, (source, destination)) in walker.pairs.iter().enumerate() {
        if !walker.matched[i] {
            tracing::warn!(source = %source, "No value location references this image");
            walker.warnings.push(OverlayWarning::SchemaMiss {
                source: source.full_reference(),
                destination: destination.full_reference(),
            });
        }
    }

    Overlay {
        entries: walker.entries,
        document: walker.document.into_value(),
        warnings: walker.warnings,
    }
}
