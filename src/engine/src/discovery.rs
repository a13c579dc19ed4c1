//! Image discovery in rendered chart output.

use serde::Deserialize;
use serde_yaml::Value;

use crate::oci::reference::{normalize, strip_digest};

/// Collect the image references a rendered chart deploys.
///
/// Every YAML document is parsed; every string found under an `image` key
/// at any depth is taken, stripped of its digest, normalized, and deduped
/// in first-seen order. Documents that fail to parse are skipped.
pub fn extract_image_references(rendered: &str) -> Vec<String> {
    let mut images: Vec<String> = Vec::new();

    for (index, document) in serde_yaml::Deserializer::from_str(rendered).enumerate() {
        let value = match Value::deserialize(document) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(document = index, error = %e, "Skipping unparseable rendered document");
                continue;
            }
        };
        collect_images(&value, &mut images);
    }

    tracing::debug!(count = images.len(), "Extracted image references");
    images
}

fn collect_images(node: &Value, images: &mut Vec<String>) {
    match node {
        Value::Mapping(map) => {
            for (key, value) in map {
                if key.as_str() == Some("image") {
                    if let Some(image) = value.as_str() {
                        push_unique(images, image);
                    }
                }
                collect_images(value, images);
            }
        }
        Value::Sequence(items) => {
            for item in items {
                collect_images(item, images);
            }
        }
        Value::Tagged(tagged) => collect_images(&tagged.value, images),
        _ => {}
    }
}

fn push_unique(images: &mut Vec<String>, raw: &str) {
    let raw = raw.trim();
    if raw.is_empty() {
        return;
    }
    let image = normalize(strip_digest(raw));
    if !images.contains(&image) {
        images.push(image);
    }
}
